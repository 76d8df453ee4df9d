//! Boundary to the synthesis backend.
//!
//! The engine is stateful and not safe for interleaved use, so every method
//! takes `&mut self`; callers only ever reach it through the inference lock
//! owned by [`crate::lifecycle::EngineHandle`].

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("acceleration backend unavailable: {0}")]
    AccelerationUnavailable(String),

    #[error("engine load failed: {0}")]
    Load(String),

    #[error("{0} is not supported by this engine")]
    Unsupported(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

/// Interleaved PCM samples in the range [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub channels: usize,
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn mono(samples: Vec<f32>) -> Self {
        Self {
            channels: 1,
            samples,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One unit of engine output.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub audio: AudioBuffer,
}

impl AudioChunk {
    pub fn mono(samples: Vec<f32>) -> Self {
        Self {
            audio: AudioBuffer::mono(samples),
        }
    }
}

/// Lazy engine output; only safe to drive while the inference lock is held.
pub type ChunkIter<'a> = Box<dyn Iterator<Item = Result<AudioChunk, EngineError>> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub stream: bool,
    pub speed: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            stream: false,
            speed: 1.0,
        }
    }
}

/// A loaded synthesis backend.
///
/// Entry points a backend cannot serve keep the default implementation,
/// which reports [`EngineError::Unsupported`] without touching engine state.
pub trait SynthesisEngine: Send {
    fn model_name(&self) -> String;

    /// Native output rate of every chunk this engine produces.
    fn sample_rate(&self) -> u32;

    /// Pretrained speaker names usable with [`SynthesisEngine::inference_sft`].
    fn speakers(&self) -> Vec<String>;

    /// Whether the newer instruct entry point (reference audio instead of a
    /// speaker name) is available.
    fn supports_instruct_v2(&self) -> bool {
        false
    }

    /// Seeds every random source the engine samples from. Global to the engine.
    fn set_seed(&mut self, seed: u64);

    /// Pre-computes and caches whatever the engine needs to clone `key` later
    /// without re-reading the reference audio.
    fn register_voice(
        &mut self,
        key: &str,
        reference_text: &str,
        reference_audio: &Path,
    ) -> Result<(), EngineError> {
        let _ = (key, reference_text, reference_audio);
        Err(EngineError::Unsupported("zero-shot voice registration".into()))
    }

    fn inference_sft(
        &mut self,
        text: &str,
        speaker: &str,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError>;

    fn inference_zero_shot(
        &mut self,
        text: &str,
        reference_text: &str,
        reference_audio: &Path,
        speaker_key: Option<&str>,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let _ = (text, reference_text, reference_audio, speaker_key, options);
        Err(EngineError::Unsupported("zero-shot cloning".into()))
    }

    fn inference_cross_lingual(
        &mut self,
        text: &str,
        reference_audio: &Path,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let _ = (text, reference_audio, options);
        Err(EngineError::Unsupported("cross-lingual cloning".into()))
    }

    fn inference_instruct(
        &mut self,
        text: &str,
        speaker: &str,
        instruct_text: &str,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let _ = (text, speaker, instruct_text, options);
        Err(EngineError::Unsupported("instruction-controlled synthesis".into()))
    }

    fn inference_instruct2(
        &mut self,
        text: &str,
        instruct_text: &str,
        reference_audio: &Path,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let _ = (text, instruct_text, reference_audio, options);
        Err(EngineError::Unsupported("instruction-controlled cloning".into()))
    }

    fn inference_vc(
        &mut self,
        source_audio: &Path,
        reference_audio: &Path,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let _ = (source_audio, reference_audio, options);
        Err(EngineError::Unsupported("voice conversion".into()))
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub model_dir: PathBuf,
    pub use_acceleration: bool,
    pub use_precision_reduction: bool,
    pub warmup: bool,
}

/// Builds engines. Construction is expensive and blocking.
pub trait EngineLoader {
    fn load(&self, options: &LoadOptions) -> Result<Box<dyn SynthesisEngine>, EngineError>;

    /// Whether an acceleration backend could be used on this host.
    fn acceleration_available(&self) -> bool {
        false
    }
}

/// Engine facts captured once at load time, readable without the lock.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInfo {
    pub model: String,
    pub sample_rate: u32,
    pub speakers: Vec<String>,
    pub instruct_v2: bool,
}

impl EngineInfo {
    pub fn probe(engine: &dyn SynthesisEngine) -> Self {
        Self {
            model: engine.model_name(),
            sample_rate: engine.sample_rate(),
            speakers: engine.speakers(),
            instruct_v2: engine.supports_instruct_v2(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_counts_per_channel() {
        let stereo = AudioBuffer {
            channels: 2,
            samples: vec![0.0; 10],
        };
        assert_eq!(stereo.frames(), 5);
        assert_eq!(AudioBuffer::mono(vec![0.1, 0.2, 0.3]).frames(), 3);
    }
}
