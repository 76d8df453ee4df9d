//! Serving core for the speech-synthesis service.
//!
//! Owns the single engine instance and everything between a decoded client
//! request and an ordered stream of 16-bit PCM: voice cache, request
//! resolution, mode dispatch, the inference lock, resampling and timing.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod pipeline;
pub mod piper;
pub mod request;
pub mod resample;
pub mod voices;
pub mod wav;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{
    AudioBuffer, AudioChunk, ChunkIter, EngineError, EngineInfo, EngineLoader, GenerationOptions, LoadOptions,
    SynthesisEngine,
};
pub use error::SynthesisError;
pub use lifecycle::{EngineHandle, EngineLifecycle, InferenceGuard, LifecycleState};
pub use monitor::{PerformanceMonitor, PerformanceStats};
pub use pipeline::{BufferedAudio, PipelineSettings, StreamingPipeline, SynthesisStream};
pub use request::{
    format_reference_text, resolve, Invocation, ResolvedInvocation, SynthesisMode, SynthesisRequest,
    REFERENCE_TEXT_PREFIX,
};
pub use voices::{VoiceCacheManager, VoiceConfig, VoiceEntry};
