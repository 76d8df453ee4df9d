//! Scripted engine for tests.
//!
//! Produces a fixed sequence of chunks and records every call so tests can
//! assert on ordering, seeding and lock discipline. Clones share one log.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::engine::{
    AudioChunk, ChunkIter, EngineError, EngineLoader, GenerationOptions, LoadOptions, SynthesisEngine,
};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Sft {
        text: String,
        speaker: String,
    },
    ZeroShot {
        text: String,
        reference_text: String,
        reference_audio: PathBuf,
        speaker_key: Option<String>,
    },
    CrossLingual {
        text: String,
        reference_audio: PathBuf,
    },
    Instruct {
        text: String,
        speaker: String,
        instruct_text: String,
    },
    Instruct2 {
        text: String,
        instruct_text: String,
        reference_audio: PathBuf,
    },
    Vc {
        source_audio: PathBuf,
        reference_audio: PathBuf,
    },
}

#[derive(Debug, Default)]
struct LogInner {
    calls: Vec<(EngineCall, GenerationOptions)>,
    seeds: Vec<u64>,
    registered: Vec<(String, String)>,
    emitted: Vec<(String, usize)>,
    active: usize,
    max_active: usize,
}

/// Shared record of what a [`ScriptedEngine`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
    inner: Arc<Mutex<LogInner>>,
}

impl EngineLog {
    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn options(&self) -> Vec<GenerationOptions> {
        self.lock().calls.iter().map(|(_, o)| *o).collect()
    }

    pub fn seeds(&self) -> Vec<u64> {
        self.lock().seeds.clone()
    }

    /// `(text, chunk index)` in the order chunks left the engine.
    pub fn emitted(&self) -> Vec<(String, usize)> {
        self.lock().emitted.clone()
    }

    /// Largest number of chunk iterators that were alive at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.lock().max_active
    }

    pub fn active(&self) -> usize {
        self.lock().active
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    sample_rate: u32,
    speakers: Vec<String>,
    chunks: Vec<Vec<f32>>,
    fail_after: Option<usize>,
    fail_on_call: bool,
    chunk_delay: Duration,
    instruct_v2: bool,
    accepts_voices: bool,
    log: EngineLog,
}

impl ScriptedEngine {
    /// Two short chunks of a constant tone at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            speakers: vec!["s1".to_string(), "s2".to_string()],
            chunks: vec![vec![0.25; 480], vec![-0.25; 480]],
            fail_after: None,
            fail_on_call: false,
            chunk_delay: Duration::ZERO,
            instruct_v2: false,
            accepts_voices: true,
            log: EngineLog::default(),
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<Vec<f32>>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Yield `n` chunks, then an error.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Every inference call fails before producing anything.
    pub fn failing(mut self) -> Self {
        self.fail_on_call = true;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_instruct_v2(mut self) -> Self {
        self.instruct_v2 = true;
        self
    }

    pub fn without_voice_registration(mut self) -> Self {
        self.accepts_voices = false;
        self
    }

    pub fn log(&self) -> EngineLog {
        self.log.clone()
    }

    pub fn registered_voices(&self) -> Vec<String> {
        self.log.lock().registered.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn registered_texts(&self) -> Vec<String> {
        self.log.lock().registered.iter().map(|(_, t)| t.clone()).collect()
    }

    fn run(&mut self, label: String, call: EngineCall, options: GenerationOptions) -> Result<ChunkIter<'_>, EngineError> {
        self.log.lock().calls.push((call, options));
        if self.fail_on_call {
            return Err(EngineError::Generation("scripted failure".into()));
        }

        {
            let mut inner = self.log.lock();
            inner.active += 1;
            inner.max_active = inner.max_active.max(inner.active);
        }

        Ok(Box::new(ScriptedChunks {
            label,
            chunks: self.chunks.clone(),
            next: 0,
            fail_after: self.fail_after,
            delay: self.chunk_delay,
            log: self.log.clone(),
            done: false,
        }))
    }
}

impl SynthesisEngine for ScriptedEngine {
    fn model_name(&self) -> String {
        "scripted".to_string()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn speakers(&self) -> Vec<String> {
        self.speakers.clone()
    }

    fn supports_instruct_v2(&self) -> bool {
        self.instruct_v2
    }

    fn set_seed(&mut self, seed: u64) {
        self.log.lock().seeds.push(seed);
    }

    fn register_voice(&mut self, key: &str, reference_text: &str, _reference_audio: &Path) -> Result<(), EngineError> {
        if !self.accepts_voices {
            return Err(EngineError::Unsupported("zero-shot voice registration".into()));
        }
        self.log
            .lock()
            .registered
            .push((key.to_string(), reference_text.to_string()));
        Ok(())
    }

    fn inference_sft(
        &mut self,
        text: &str,
        speaker: &str,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let call = EngineCall::Sft {
            text: text.to_string(),
            speaker: speaker.to_string(),
        };
        self.run(text.to_string(), call, options)
    }

    fn inference_zero_shot(
        &mut self,
        text: &str,
        reference_text: &str,
        reference_audio: &Path,
        speaker_key: Option<&str>,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let call = EngineCall::ZeroShot {
            text: text.to_string(),
            reference_text: reference_text.to_string(),
            reference_audio: reference_audio.to_path_buf(),
            speaker_key: speaker_key.map(str::to_string),
        };
        self.run(text.to_string(), call, options)
    }

    fn inference_cross_lingual(
        &mut self,
        text: &str,
        reference_audio: &Path,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let call = EngineCall::CrossLingual {
            text: text.to_string(),
            reference_audio: reference_audio.to_path_buf(),
        };
        self.run(text.to_string(), call, options)
    }

    fn inference_instruct(
        &mut self,
        text: &str,
        speaker: &str,
        instruct_text: &str,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        if self.instruct_v2 {
            return Err(EngineError::Unsupported("legacy instruct".into()));
        }
        let call = EngineCall::Instruct {
            text: text.to_string(),
            speaker: speaker.to_string(),
            instruct_text: instruct_text.to_string(),
        };
        self.run(text.to_string(), call, options)
    }

    fn inference_instruct2(
        &mut self,
        text: &str,
        instruct_text: &str,
        reference_audio: &Path,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        if !self.instruct_v2 {
            return Err(EngineError::Unsupported("instruct2".into()));
        }
        let call = EngineCall::Instruct2 {
            text: text.to_string(),
            instruct_text: instruct_text.to_string(),
            reference_audio: reference_audio.to_path_buf(),
        };
        self.run(text.to_string(), call, options)
    }

    fn inference_vc(
        &mut self,
        source_audio: &Path,
        reference_audio: &Path,
        options: GenerationOptions,
    ) -> Result<ChunkIter<'_>, EngineError> {
        let call = EngineCall::Vc {
            source_audio: source_audio.to_path_buf(),
            reference_audio: reference_audio.to_path_buf(),
        };
        self.run(source_audio.display().to_string(), call, options)
    }
}

struct ScriptedChunks {
    label: String,
    chunks: Vec<Vec<f32>>,
    next: usize,
    fail_after: Option<usize>,
    delay: Duration,
    log: EngineLog,
    done: bool,
}

impl Iterator for ScriptedChunks {
    type Item = Result<AudioChunk, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.fail_after == Some(self.next) {
            self.done = true;
            return Some(Err(EngineError::Generation(format!(
                "scripted failure after {} chunks",
                self.next
            ))));
        }
        let samples = self.chunks.get(self.next)?.clone();
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.log.lock().emitted.push((self.label.clone(), self.next));
        self.next += 1;
        Some(Ok(AudioChunk::mono(samples)))
    }
}

impl Drop for ScriptedChunks {
    fn drop(&mut self) {
        self.log.lock().active -= 1;
    }
}

/// Hands out clones of one scripted engine and counts constructions.
#[derive(Debug, Clone)]
pub struct ScriptedLoader {
    engine: ScriptedEngine,
    acceleration: bool,
    loads: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    pub fn new(engine: ScriptedEngine) -> Self {
        Self {
            engine,
            acceleration: false,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_acceleration(mut self) -> Self {
        self.acceleration = true;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl EngineLoader for ScriptedLoader {
    fn load(&self, options: &LoadOptions) -> Result<Box<dyn SynthesisEngine>, EngineError> {
        if options.use_acceleration && !self.acceleration {
            return Err(EngineError::AccelerationUnavailable("no accelerator on this host".into()));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.engine.clone()))
    }

    fn acceleration_available(&self) -> bool {
        self.acceleration
    }
}
