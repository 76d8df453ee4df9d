use tracing::debug;

use crate::engine::{ChunkIter, EngineInfo, GenerationOptions, SynthesisEngine};
use crate::error::SynthesisError;
use crate::request::{Invocation, ResolvedInvocation};

/// Calls the engine entry point for `resolved`.
///
/// The caller must hold the inference lock for as long as the returned
/// iterator is alive.
pub fn dispatch<'e>(
    engine: &'e mut dyn SynthesisEngine,
    info: &EngineInfo,
    resolved: &ResolvedInvocation,
) -> Result<ChunkIter<'e>, SynthesisError> {
    let options = GenerationOptions {
        stream: resolved.stream,
        speed: resolved.speed,
    };
    let text = resolved.text.as_str();
    debug!(mode = %resolved.mode(), stream = options.stream, "dispatching to engine");

    let chunks = match &resolved.invocation {
        Invocation::Sft { speaker } => engine.inference_sft(text, speaker, options)?,
        Invocation::ZeroShot {
            reference_text,
            reference_audio,
            speaker_key,
        } => engine.inference_zero_shot(text, reference_text, reference_audio, speaker_key.as_deref(), options)?,
        Invocation::CrossLingual { reference_audio } => {
            engine.inference_cross_lingual(text, reference_audio, options)?
        }
        Invocation::Instruct {
            instruct_text,
            speaker,
            reference_audio,
        } => {
            if info.instruct_v2 {
                let reference_audio = reference_audio.as_deref().ok_or_else(|| {
                    SynthesisError::InvalidRequest("instruct mode requires reference audio".into())
                })?;
                engine.inference_instruct2(text, instruct_text, reference_audio, options)?
            } else {
                let speaker = speaker
                    .as_deref()
                    .ok_or_else(|| SynthesisError::InvalidRequest("instruct mode requires a speaker".into()))?;
                engine.inference_instruct(text, speaker, instruct_text, options)?
            }
        }
        Invocation::Vc {
            source_audio,
            reference_audio,
        } => engine.inference_vc(source_audio, reference_audio, options)?,
    };
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineCall, ScriptedEngine};
    use std::path::PathBuf;

    fn resolved(invocation: Invocation) -> ResolvedInvocation {
        ResolvedInvocation {
            text: "hello".into(),
            invocation,
            speed: 1.25,
            stream: true,
        }
    }

    fn run(engine: &mut ScriptedEngine, inv: Invocation) -> Result<usize, SynthesisError> {
        let info = EngineInfo::probe(&*engine);
        let chunks = dispatch(engine, &info, &resolved(inv))?;
        Ok(chunks.count())
    }

    #[test]
    fn test_sft_passes_options() {
        let mut engine = ScriptedEngine::new(22_050);
        let log = engine.log();
        assert_eq!(run(&mut engine, Invocation::Sft { speaker: "s1".into() }).unwrap(), 2);
        assert_eq!(
            log.calls(),
            vec![EngineCall::Sft {
                text: "hello".into(),
                speaker: "s1".into()
            }]
        );
        assert_eq!(
            log.options(),
            vec![GenerationOptions {
                stream: true,
                speed: 1.25
            }]
        );
    }

    #[test]
    fn test_zero_shot_forwards_speaker_key() {
        let mut engine = ScriptedEngine::new(22_050);
        let log = engine.log();
        run(
            &mut engine,
            Invocation::ZeroShot {
                reference_text: "ref".into(),
                reference_audio: PathBuf::from("a.wav"),
                speaker_key: Some("default".into()),
            },
        )
        .unwrap();
        assert!(matches!(
            &log.calls()[0],
            EngineCall::ZeroShot { speaker_key: Some(k), .. } if k == "default"
        ));
    }

    #[test]
    fn test_instruct_uses_legacy_entry_point() {
        let mut engine = ScriptedEngine::new(22_050);
        let log = engine.log();
        run(
            &mut engine,
            Invocation::Instruct {
                instruct_text: "whisper".into(),
                speaker: Some("s1".into()),
                reference_audio: Some(PathBuf::from("a.wav")),
            },
        )
        .unwrap();
        assert!(matches!(&log.calls()[0], EngineCall::Instruct { speaker, .. } if speaker == "s1"));
    }

    #[test]
    fn test_instruct_v2_uses_reference_audio() {
        let mut engine = ScriptedEngine::new(22_050).with_instruct_v2();
        let log = engine.log();
        run(
            &mut engine,
            Invocation::Instruct {
                instruct_text: "whisper".into(),
                speaker: None,
                reference_audio: Some(PathBuf::from("a.wav")),
            },
        )
        .unwrap();
        assert!(matches!(
            &log.calls()[0],
            EngineCall::Instruct2 { reference_audio, .. } if reference_audio == &PathBuf::from("a.wav")
        ));
    }

    #[test]
    fn test_instruct_v2_without_audio_is_rejected() {
        let mut engine = ScriptedEngine::new(22_050).with_instruct_v2();
        let log = engine.log();
        let err = run(
            &mut engine,
            Invocation::Instruct {
                instruct_text: "whisper".into(),
                speaker: Some("s1".into()),
                reference_audio: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SynthesisError::InvalidRequest(_)));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_vc_and_cross_lingual() {
        let mut engine = ScriptedEngine::new(22_050);
        let log = engine.log();
        run(
            &mut engine,
            Invocation::CrossLingual {
                reference_audio: PathBuf::from("ref.wav"),
            },
        )
        .unwrap();
        run(
            &mut engine,
            Invocation::Vc {
                source_audio: PathBuf::from("src.wav"),
                reference_audio: PathBuf::from("ref.wav"),
            },
        )
        .unwrap();
        let calls = log.calls();
        assert!(matches!(calls[0], EngineCall::CrossLingual { .. }));
        assert!(matches!(calls[1], EngineCall::Vc { .. }));
    }

    #[test]
    fn test_engine_error_propagates() {
        let mut engine = ScriptedEngine::new(22_050).failing();
        let err = run(&mut engine, Invocation::Sft { speaker: "s1".into() }).unwrap_err();
        assert!(matches!(err, SynthesisError::Engine(_)));
    }
}
