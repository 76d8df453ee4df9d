//! Piper backend.
//!
//! Piper voices are single ONNX models with a JSON config next to them
//! (`<name>.onnx` + `<name>.onnx.json`). They only do pretrained-speaker
//! synthesis; every cloning mode reports `Unsupported`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::{
    AudioChunk, ChunkIter, EngineError, EngineLoader, GenerationOptions, LoadOptions, SynthesisEngine,
};

const CONFIG_SUFFIX: &str = ".onnx.json";

#[derive(Debug, Clone, Deserialize)]
struct AudioSection {
    sample_rate: u32,
}

/// The parts of a Piper model config this backend reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    audio: AudioSection,
    #[serde(default)]
    speaker_id_map: HashMap<String, i64>,
    #[serde(default)]
    dataset: Option<String>,
}

impl ModelConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    /// Speaker names ordered by id.
    pub fn speaker_names(&self) -> Vec<String> {
        let mut speakers: Vec<(&String, &i64)> = self.speaker_id_map.iter().collect();
        speakers.sort_by_key(|(_, id)| **id);
        speakers.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Map a speaker name, or a numeric id given as text, to a Piper speaker id.
    /// Single-speaker models accept any name and return `None`.
    pub fn speaker_id(&self, speaker: &str) -> Result<Option<i64>, EngineError> {
        if self.speaker_id_map.is_empty() {
            return Ok(None);
        }
        if let Some(id) = self.speaker_id_map.get(speaker) {
            return Ok(Some(*id));
        }
        match speaker.parse::<i64>() {
            Ok(id) if self.speaker_id_map.values().any(|v| *v == id) => Ok(Some(id)),
            _ => Err(EngineError::Generation(format!("unknown speaker '{speaker}'"))),
        }
    }
}

/// Find the model config under `model_dir`. A path to a config file is used
/// as is; a directory yields its first `*.onnx.json` in name order.
pub fn locate_config(model_dir: &Path) -> Result<PathBuf, EngineError> {
    if model_dir.is_file() {
        return Ok(model_dir.to_path_buf());
    }

    let entries = fs::read_dir(model_dir)
        .map_err(|e| EngineError::Load(format!("cannot read model dir {}: {e}", model_dir.display())))?;
    let mut configs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CONFIG_SUFFIX))
        })
        .collect();
    configs.sort();

    configs
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::Load(format!("no *{CONFIG_SUFFIX} found in {}", model_dir.display())))
}

pub struct PiperEngine {
    name: String,
    config: ModelConfig,
    model: Arc<dyn piper_rs::PiperModel + Send + Sync>,
    synth: PiperSpeechSynthesizer,
}

impl SynthesisEngine for PiperEngine {
    fn model_name(&self) -> String {
        self.name.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    fn speakers(&self) -> Vec<String> {
        let names = self.config.speaker_names();
        if names.is_empty() {
            vec![self.name.clone()]
        } else {
            names
        }
    }

    fn set_seed(&mut self, seed: u64) {
        // Piper's noise comes from fixed scales inside the graph.
        debug!(seed, "seed has no effect on the Piper backend");
    }

    fn inference_sft(
        &mut self,
        text: &str,
        speaker: &str,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        if let Some(sid) = self.config.speaker_id(speaker)? {
            speaker_selected(sid, self.model.set_speaker(sid))?;
        }
        if (options.speed - 1.0).abs() > f32::EPSILON {
            debug!(speed = options.speed, "speed is not applied by the Piper backend");
        }

        let parts: PiperSpeechStreamParallel = self
            .synth
            .synthesize_parallel(text.to_string(), None)
            .map_err(|e| EngineError::Generation(format!("piper synth error: {e}")))?;
        let chunks = parts.map(|part| {
            part.map(|audio| AudioChunk::mono(audio.into_vec()))
                .map_err(|e| EngineError::Generation(format!("chunk error: {e}")))
        });

        if options.stream {
            return Ok(Box::new(chunks));
        }

        // Non-streaming callers get the whole utterance as one chunk.
        let mut samples = Vec::new();
        for chunk in chunks {
            samples.extend(chunk?.audio.samples);
        }
        Ok(Box::new(std::iter::once(Ok(AudioChunk::mono(samples)))))
    }
}

/// `set_speaker` reports failure through an error slot rather than a `Result`.
fn speaker_selected(sid: i64, failure: Option<piper_rs::PiperError>) -> Result<(), EngineError> {
    match failure {
        Some(e) => Err(EngineError::Generation(format!("cannot select speaker {sid}: {e}"))),
        None => Ok(()),
    }
}

/// Loads Piper models with `piper-rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiperLoader;

impl EngineLoader for PiperLoader {
    fn load(&self, options: &LoadOptions) -> Result<Box<dyn SynthesisEngine>, EngineError> {
        if options.use_acceleration {
            enable_cuda()?;
        }
        if options.use_precision_reduction {
            warn!("Piper models run at full precision, ignoring the precision reduction flag");
        }

        let config_path = locate_config(&options.model_dir)?;
        let config = ModelConfig::read(&config_path).map_err(|e| EngineError::Load(format!("{e:#}")))?;
        let name = config.dataset.clone().unwrap_or_else(|| {
            config_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.trim_end_matches(CONFIG_SUFFIX).to_string())
                .unwrap_or_else(|| "piper".to_string())
        });

        let model = piper_rs::from_config_path(&config_path)
            .map_err(|e| EngineError::Load(format!("piper load error: {e}")))?;
        let synth = PiperSpeechSynthesizer::new(model.clone())
            .map_err(|e| EngineError::Load(format!("piper synthesizer error: {e}")))?;

        info!(
            config = %config_path.display(),
            sample_rate = config.sample_rate(),
            speakers = config.speaker_id_map.len(),
            "Piper model loaded"
        );
        Ok(Box::new(PiperEngine {
            name,
            config,
            model,
            synth,
        }))
    }

    fn acceleration_available(&self) -> bool {
        cuda_available()
    }
}

#[cfg(feature = "cuda")]
fn cuda_available() -> bool {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
    CUDAExecutionProvider::default().is_available().unwrap_or(false)
}

#[cfg(feature = "cuda")]
fn enable_cuda() -> Result<(), EngineError> {
    use ort::execution_providers::CUDAExecutionProvider;
    if !cuda_available() {
        return Err(EngineError::AccelerationUnavailable(
            "CUDA execution provider is not available on this host".into(),
        ));
    }
    ort::init()
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .commit()
        .map_err(|e| EngineError::AccelerationUnavailable(e.to_string()))?;
    info!("CUDA execution provider registered");
    Ok(())
}

#[cfg(not(feature = "cuda"))]
fn cuda_available() -> bool {
    false
}

#[cfg(not(feature = "cuda"))]
fn enable_cuda() -> Result<(), EngineError> {
    Err(EngineError::AccelerationUnavailable(
        "built without the `cuda` feature".into(),
    ))
}
