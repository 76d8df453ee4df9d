//! Request model and voice resolution.
//!
//! [`resolve`] is a pure function: it turns a client request plus the voice
//! cache into a [`ResolvedInvocation`] that names exactly one engine entry
//! point and carries only the inputs that entry point needs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::voices::{VoiceCacheManager, VoiceEntry};

/// Header the engine expects in front of every zero-shot transcript.
pub const REFERENCE_TEXT_PREFIX: &str = "You are a helpful assistant.<|endofprompt|>";

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Prefix a reference transcript. Already-prefixed text is returned as is.
pub fn format_reference_text(text: &str) -> String {
    if text.starts_with(REFERENCE_TEXT_PREFIX) {
        text.to_string()
    } else {
        format!("{REFERENCE_TEXT_PREFIX}{text}")
    }
}

fn default_mode() -> String {
    SynthesisMode::Sft.as_str().to_string()
}

fn default_speed() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default, alias = "voice_id")]
    pub voice_id: Option<String>,
    #[serde(default, alias = "prompt_text", alias = "reference_text")]
    pub reference_text: Option<String>,
    #[serde(default, alias = "prompt_wav_path", alias = "reference_audio_path")]
    pub reference_audio_path: Option<String>,
    #[serde(default, alias = "instruct_text")]
    pub instruct_text: Option<String>,
    #[serde(default, alias = "source_wav_path", alias = "source_audio_path")]
    pub source_audio_path: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, mode: SynthesisMode) -> Self {
        Self {
            text: text.into(),
            mode: mode.as_str().to_string(),
            speaker: None,
            voice_id: None,
            reference_text: None,
            reference_audio_path: None,
            instruct_text: None,
            source_audio_path: None,
            stream: false,
            speed: default_speed(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthesisMode {
    Sft,
    ZeroShot,
    CrossLingual,
    Instruct,
    Vc,
}

impl SynthesisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisMode::Sft => "sft",
            SynthesisMode::ZeroShot => "zero_shot",
            SynthesisMode::CrossLingual => "cross_lingual",
            SynthesisMode::Instruct => "instruct",
            SynthesisMode::Vc => "vc",
        }
    }
}

impl FromStr for SynthesisMode {
    type Err = SynthesisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sft" => Ok(SynthesisMode::Sft),
            "zero_shot" => Ok(SynthesisMode::ZeroShot),
            "cross_lingual" => Ok(SynthesisMode::CrossLingual),
            "instruct" => Ok(SynthesisMode::Instruct),
            "vc" => Ok(SynthesisMode::Vc),
            other => Err(SynthesisError::UnsupportedMode(other.to_string())),
        }
    }
}

impl fmt::Display for SynthesisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for one engine entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Sft {
        speaker: String,
    },
    ZeroShot {
        /// Already carries [`REFERENCE_TEXT_PREFIX`].
        reference_text: String,
        reference_audio: PathBuf,
        /// Set when the voice is cached inside the engine.
        speaker_key: Option<String>,
    },
    CrossLingual {
        reference_audio: PathBuf,
    },
    /// Which of the two optional inputs is used depends on the engine's
    /// instruct capability, decided at dispatch.
    Instruct {
        instruct_text: String,
        speaker: Option<String>,
        reference_audio: Option<PathBuf>,
    },
    Vc {
        source_audio: PathBuf,
        reference_audio: PathBuf,
    },
}

impl Invocation {
    pub fn mode(&self) -> SynthesisMode {
        match self {
            Invocation::Sft { .. } => SynthesisMode::Sft,
            Invocation::ZeroShot { .. } => SynthesisMode::ZeroShot,
            Invocation::CrossLingual { .. } => SynthesisMode::CrossLingual,
            Invocation::Instruct { .. } => SynthesisMode::Instruct,
            Invocation::Vc { .. } => SynthesisMode::Vc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInvocation {
    pub text: String,
    pub invocation: Invocation,
    pub speed: f32,
    pub stream: bool,
}

impl ResolvedInvocation {
    pub fn mode(&self) -> SynthesisMode {
        self.invocation.mode()
    }

    pub fn reference_audio(&self) -> Option<&PathBuf> {
        match &self.invocation {
            Invocation::Sft { .. } => None,
            Invocation::ZeroShot { reference_audio, .. }
            | Invocation::CrossLingual { reference_audio }
            | Invocation::Vc { reference_audio, .. } => Some(reference_audio),
            Invocation::Instruct { reference_audio, .. } => reference_audio.as_ref(),
        }
    }

    pub fn reference_text(&self) -> Option<&str> {
        match &self.invocation {
            Invocation::ZeroShot { reference_text, .. } => Some(reference_text),
            _ => None,
        }
    }
}

/// Resolve `request` against the voice cache. Never touches the engine.
pub fn resolve(
    request: &SynthesisRequest,
    voices: &VoiceCacheManager,
) -> Result<ResolvedInvocation, SynthesisError> {
    let mode: SynthesisMode = request.mode.parse()?;

    if !(MIN_SPEED..=MAX_SPEED).contains(&request.speed) {
        return Err(SynthesisError::InvalidRequest(format!(
            "speed must be between {MIN_SPEED} and {MAX_SPEED}"
        )));
    }
    if mode != SynthesisMode::Vc && request.text.trim().is_empty() {
        return Err(SynthesisError::InvalidRequest("text must not be empty".into()));
    }

    let identifier = non_empty(request.voice_id.as_deref()).or(non_empty(request.speaker.as_deref()));
    let voice = identifier.and_then(|id| voices.get_voice(id));

    if request.voice_id.is_some() && voice.is_none() {
        warn!(voice_id = ?request.voice_id, "voice not found in cache, using identifier as given");
    }

    let invocation = match (mode, voice) {
        (SynthesisMode::Sft | SynthesisMode::ZeroShot, Some(voice)) => cached_zero_shot(voice),
        (SynthesisMode::Sft, None) => Invocation::Sft {
            speaker: identifier
                .map(str::to_string)
                .ok_or_else(|| missing("sft mode requires a speaker"))?,
        },
        (SynthesisMode::ZeroShot, None) => Invocation::ZeroShot {
            reference_text: format_reference_text(request.reference_text.as_deref().unwrap_or_default()),
            reference_audio: reference_audio(request, None, identifier)
                .ok_or_else(|| missing("zero_shot mode requires reference audio"))?,
            speaker_key: None,
        },
        (SynthesisMode::CrossLingual, voice) => Invocation::CrossLingual {
            reference_audio: reference_audio(request, voice, identifier)
                .ok_or_else(|| missing("cross_lingual mode requires reference audio"))?,
        },
        (SynthesisMode::Instruct, voice) => Invocation::Instruct {
            instruct_text: non_empty(request.instruct_text.as_deref())
                .map(str::to_string)
                .ok_or_else(|| missing("instruct mode requires instruction text"))?,
            speaker: identifier.map(str::to_string),
            reference_audio: reference_audio(request, voice, identifier),
        },
        (SynthesisMode::Vc, voice) => Invocation::Vc {
            source_audio: non_empty(request.source_audio_path.as_deref())
                .map(PathBuf::from)
                .ok_or_else(|| missing("vc mode requires source audio"))?,
            reference_audio: reference_audio(request, voice, identifier)
                .ok_or_else(|| missing("vc mode requires reference audio"))?,
        },
    };

    debug!(requested = %mode, resolved = %invocation.mode(), "request resolved");

    Ok(ResolvedInvocation {
        text: request.text.clone(),
        invocation,
        speed: request.speed,
        stream: request.stream,
    })
}

fn cached_zero_shot(voice: &VoiceEntry) -> Invocation {
    Invocation::ZeroShot {
        reference_text: format_reference_text(&voice.reference_text),
        reference_audio: voice.reference_audio_path.clone(),
        speaker_key: voice.engine_registered.then(|| voice.id.clone()),
    }
}

/// Explicit path first, then a matched cached voice, then the identifier as
/// a raw path.
fn reference_audio(
    request: &SynthesisRequest,
    voice: Option<&VoiceEntry>,
    identifier: Option<&str>,
) -> Option<PathBuf> {
    non_empty(request.reference_audio_path.as_deref())
        .map(PathBuf::from)
        .or_else(|| voice.map(|v| v.reference_audio_path.clone()))
        .or_else(|| identifier.map(PathBuf::from))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

fn missing(msg: &str) -> SynthesisError {
    SynthesisError::InvalidRequest(msg.to_string())
}
