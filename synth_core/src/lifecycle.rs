//! Engine ownership and startup.
//!
//! The engine is wrapped in an async mutex that doubles as the process-wide
//! inference lock: the only way to reach the engine is through the guard
//! returned by [`EngineHandle::acquire`], and the guard releases on drop.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::dispatch::dispatch;
use crate::engine::{EngineError, EngineInfo, EngineLoader, LoadOptions, SynthesisEngine};
use crate::error::SynthesisError;
use crate::request::{resolve, SynthesisMode, SynthesisRequest};
use crate::voices::{VoiceCacheManager, VoiceConfig};

const WARMUP_TEXT: &str = "Hello, this is a warmup run.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Unloaded = 0,
    Loading = 1,
    Ready = 2,
    Warmed = 3,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LifecycleState::Loading,
            2 => LifecycleState::Ready,
            3 => LifecycleState::Warmed,
            _ => LifecycleState::Unloaded,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready | LifecycleState::Warmed)
    }
}

/// Exclusive access to the engine. Dropping it releases the inference lock.
pub type InferenceGuard = OwnedMutexGuard<Box<dyn SynthesisEngine>>;

pub struct EngineHandle {
    info: EngineInfo,
    engine: Arc<Mutex<Box<dyn SynthesisEngine>>>,
}

impl EngineHandle {
    fn new(info: EngineInfo, engine: Box<dyn SynthesisEngine>) -> Self {
        Self {
            info,
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn info(&self) -> &EngineInfo {
        &self.info
    }

    /// Wait for the inference lock. Waiters are served in FIFO order.
    pub async fn acquire(&self) -> InferenceGuard {
        self.engine.clone().lock_owned().await
    }

    /// Whether some request currently holds the lock.
    pub fn is_busy(&self) -> bool {
        self.engine.try_lock().is_err()
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle").field("info", &self.info).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct EngineLifecycle {
    load_gate: StdMutex<()>,
    handle: OnceLock<Arc<EngineHandle>>,
    state: AtomicU8,
}

impl Default for EngineLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineLifecycle {
    pub fn new() -> Self {
        Self {
            load_gate: StdMutex::new(()),
            handle: OnceLock::new(),
            state: AtomicU8::new(LifecycleState::Unloaded as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// The loaded engine, or `None` while startup is still running.
    pub fn handle(&self) -> Option<Arc<EngineHandle>> {
        self.handle.get().cloned()
    }

    /// Construct the engine, populate the voice cache and optionally warm up.
    ///
    /// Blocking. Once a load has succeeded every later call returns the same
    /// handle without doing any work.
    pub fn load(
        &self,
        loader: &dyn EngineLoader,
        options: &LoadOptions,
        voices: &VoiceCacheManager,
        configs: &[VoiceConfig],
    ) -> Result<Arc<EngineHandle>, SynthesisError> {
        if let Some(handle) = self.handle.get() {
            return Ok(handle.clone());
        }

        let _gate = self.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = self.handle.get() {
            return Ok(handle.clone());
        }

        if options.use_acceleration && !loader.acceleration_available() {
            return Err(EngineError::AccelerationUnavailable(
                "acceleration requested but no accelerator is available".into(),
            )
            .into());
        }

        self.set_state(LifecycleState::Loading);
        info!(
            model_dir = %options.model_dir.display(),
            acceleration = options.use_acceleration,
            precision_reduction = options.use_precision_reduction,
            "Loading synthesis engine"
        );
        let started = Instant::now();

        let mut engine = match loader.load(options) {
            Ok(engine) => engine,
            Err(e) => {
                self.set_state(LifecycleState::Unloaded);
                return Err(e.into());
            }
        };

        let info = EngineInfo::probe(engine.as_ref());
        info!(
            model = %info.model,
            sample_rate = info.sample_rate,
            speakers = info.speakers.len(),
            instruct_v2 = info.instruct_v2,
            "Engine loaded in {:.2}s",
            started.elapsed().as_secs_f64()
        );

        voices.load_voices(engine.as_mut(), configs);

        let ready = if options.warmup {
            warmup(engine.as_mut(), &info, voices);
            LifecycleState::Warmed
        } else {
            LifecycleState::Ready
        };

        let handle = Arc::new(EngineHandle::new(info, engine));
        // Guarded by load_gate, so the cell is still empty here.
        let _ = self.handle.set(handle.clone());
        // Readiness is published only once the handle is reachable.
        self.set_state(ready);
        Ok(handle)
    }
}

/// One throwaway non-streaming synthesis. Failures are logged only.
fn warmup(engine: &mut dyn SynthesisEngine, info: &EngineInfo, voices: &VoiceCacheManager) {
    let mut request = SynthesisRequest::new(WARMUP_TEXT, SynthesisMode::ZeroShot);
    if voices.get_default_voice().is_some() {
        request.voice_id = Some(voices.default_voice_id().to_string());
    } else if let Some(speaker) = info.speakers.first() {
        request.mode = SynthesisMode::Sft.as_str().to_string();
        request.speaker = Some(speaker.clone());
    } else {
        warn!("No default voice or speaker available, skipping warmup");
        return;
    }

    let started = Instant::now();
    let result = resolve(&request, voices).and_then(|resolved| {
        let chunks = dispatch(engine, info, &resolved)?;
        let mut produced = 0usize;
        for chunk in chunks {
            produced += chunk?.audio.samples.len();
        }
        Ok(produced)
    });

    match result {
        Ok(samples) => {
            debug!(samples, "warmup produced audio");
            info!("Warmup finished in {:.2}s", started.elapsed().as_secs_f64());
        }
        Err(e) => warn!("Warmup failed, continuing without it: {e}"),
    }
}
