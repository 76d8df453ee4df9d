//! Request to byte stream.
//!
//! Every synthesis, buffered or streaming, goes through [`StreamingPipeline::open`]:
//! resolve, seed, take the inference lock, dispatch, then resample and encode
//! each chunk as 16-bit PCM into a bounded channel. Generation runs on the
//! blocking pool while the lock guard is held; the guard is dropped when the
//! engine is exhausted, fails, or the consumer goes away.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::dispatch::dispatch;
use crate::engine::{AudioBuffer, EngineInfo};
use crate::error::SynthesisError;
use crate::lifecycle::{EngineLifecycle, InferenceGuard};
use crate::monitor::{PerformanceMonitor, PerformanceStats};
use crate::request::{resolve, ResolvedInvocation, SynthesisRequest};
use crate::resample::resample;
use crate::voices::VoiceCacheManager;
use crate::wav::encode_pcm16;

/// Upper bound for generated seeds, inclusive.
pub const MAX_SEED: u64 = 100_000_000;

pub type ChunkResult = Result<Vec<u8>, SynthesisError>;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_sample_rate: u32,
    pub monitor: bool,
    /// Encoded chunks that may wait for the transport before generation pauses.
    pub buffer_chunks: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            output_sample_rate: 24_000,
            monitor: true,
            buffer_chunks: 8,
        }
    }
}

/// Result of a buffered synthesis.
#[derive(Debug, Clone)]
pub struct BufferedAudio {
    /// Mono 16-bit little-endian PCM.
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
    pub stats: PerformanceStats,
}

#[derive(Debug, Clone)]
pub struct StreamingPipeline {
    lifecycle: Arc<EngineLifecycle>,
    voices: Arc<VoiceCacheManager>,
    settings: PipelineSettings,
}

impl StreamingPipeline {
    pub fn new(lifecycle: Arc<EngineLifecycle>, voices: Arc<VoiceCacheManager>, settings: PipelineSettings) -> Self {
        Self {
            lifecycle,
            voices,
            settings,
        }
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.settings.output_sample_rate
    }

    pub fn lifecycle(&self) -> &EngineLifecycle {
        &self.lifecycle
    }

    pub fn voices(&self) -> &VoiceCacheManager {
        &self.voices
    }

    /// Start synthesis and return the ordered PCM stream.
    ///
    /// Readiness and resolution errors are returned here, before any lock is
    /// taken. Errors raised while generating arrive as the last stream item.
    /// Must be called from within a tokio runtime.
    pub fn open(&self, request: &SynthesisRequest) -> Result<SynthesisStream, SynthesisError> {
        let handle = self.lifecycle.handle().ok_or(SynthesisError::EngineNotReady)?;
        let resolved = resolve(request, &self.voices)?;
        let seed = request
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..=MAX_SEED));

        let mut monitor = PerformanceMonitor::new(format!("{} synthesis", resolved.mode()));
        if self.settings.monitor {
            monitor.start();
        }

        let output_rate = self.settings.output_sample_rate;
        let (tx, rx) = mpsc::channel(self.settings.buffer_chunks.max(1));
        let (stats_tx, stats_rx) = oneshot::channel();

        debug!(mode = %resolved.mode(), seed, stream = resolved.stream, "synthesis queued");

        tokio::spawn(async move {
            let guard = tokio::select! {
                biased;
                _ = tx.closed() => {
                    debug!("consumer left while waiting for the engine");
                    let _ = stats_tx.send(monitor.finish());
                    return;
                }
                guard = handle.acquire() => guard,
            };

            let info = handle.info().clone();
            let error_tx = tx.clone();
            let produced = tokio::task::spawn_blocking(move || {
                produce(guard, &info, &resolved, seed, output_rate, &mut monitor, &tx);
                monitor
            })
            .await;

            let stats = match produced {
                Ok(monitor) => monitor.finish(),
                Err(e) => {
                    error!("synthesis task failed: {e}");
                    let _ = error_tx
                        .send(Err(SynthesisError::Internal("synthesis task failed".into())))
                        .await;
                    PerformanceStats::default()
                }
            };
            drop(error_tx);
            let _ = stats_tx.send(stats);
        });

        Ok(SynthesisStream {
            rx,
            stats: stats_rx,
            sample_rate: output_rate,
        })
    }

    /// Run the full pipeline with `stream=false` and concatenate the output.
    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<BufferedAudio, SynthesisError> {
        let mut request = request.clone();
        request.stream = false;

        let mut stream = self.open(&request)?;
        let mut pcm = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            pcm.extend_from_slice(&chunk?);
        }

        let sample_rate = stream.sample_rate();
        let stats = stream.finish().await;
        if pcm.is_empty() {
            return Err(SynthesisError::EmptyOutput);
        }
        Ok(BufferedAudio {
            pcm,
            sample_rate,
            stats,
        })
    }
}

/// Runs on the blocking pool. A generation error is sent only after the
/// inference lock has been released.
fn produce(
    guard: InferenceGuard,
    info: &EngineInfo,
    resolved: &ResolvedInvocation,
    seed: u64,
    output_rate: u32,
    monitor: &mut PerformanceMonitor,
    tx: &mpsc::Sender<ChunkResult>,
) {
    if let Some(e) = generate(guard, info, resolved, seed, output_rate, monitor, tx) {
        let _ = tx.blocking_send(Err(e));
    }
}

/// Owns the guard; the lock is released on return.
fn generate(
    mut guard: InferenceGuard,
    info: &EngineInfo,
    resolved: &ResolvedInvocation,
    seed: u64,
    output_rate: u32,
    monitor: &mut PerformanceMonitor,
    tx: &mpsc::Sender<ChunkResult>,
) -> Option<SynthesisError> {
    guard.set_seed(seed);

    let chunks = match dispatch(&mut **guard, info, resolved) {
        Ok(chunks) => chunks,
        Err(e) => {
            error!(mode = %resolved.mode(), "synthesis failed to start: {e}");
            return Some(e);
        }
    };

    for (index, item) in chunks.enumerate() {
        if tx.is_closed() {
            info!(chunks = index, "client disconnected, stopping generation");
            break;
        }

        let pcm = match item
            .map_err(SynthesisError::from)
            .and_then(|chunk| encode(chunk.audio, info.sample_rate, output_rate))
        {
            Ok(pcm) => pcm,
            Err(e) => {
                error!(mode = %resolved.mode(), chunk = index, "synthesis failed: {e}");
                return Some(e);
            }
        };
        if pcm.is_empty() {
            continue;
        }

        monitor.record_first_chunk();
        monitor.record_chunk(pcm.len());
        if tx.blocking_send(Ok(pcm)).is_err() {
            info!(chunks = index, "client disconnected, stopping generation");
            break;
        }
    }
    None
}

fn encode(audio: AudioBuffer, from_rate: u32, to_rate: u32) -> Result<Vec<u8>, SynthesisError> {
    let audio = resample(audio, from_rate, to_rate)?;
    Ok(encode_pcm16(&audio.samples))
}

/// Ordered PCM chunks for one request.
///
/// Dropping the stream cancels generation at the next chunk boundary.
#[derive(Debug)]
pub struct SynthesisStream {
    rx: mpsc::Receiver<ChunkResult>,
    stats: oneshot::Receiver<PerformanceStats>,
    sample_rate: u32,
}

impl SynthesisStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub async fn next_chunk(&mut self) -> Option<ChunkResult> {
        self.rx.recv().await
    }

    /// Stop generation if it is still running and wait for the final stats.
    pub async fn finish(mut self) -> PerformanceStats {
        self.rx.close();
        while self.rx.recv().await.is_some() {}
        self.stats.await.unwrap_or_default()
    }
}

impl Stream for SynthesisStream {
    type Item = ChunkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
