use synth_core::SynthesisRequest;

use crate::error::ApiError;

/// Maximum length of a voice id or speaker name
const MAX_IDENTIFIER_LENGTH: usize = 256;

/// Transport-level checks on a decoded request.
///
/// Mode, speed and per-mode inputs are checked by the resolver; this only
/// guards sizes so oversized payloads never reach the engine queue.
pub fn validate_tts_request(req: &SynthesisRequest, max_text_length: usize) -> Result<(), ApiError> {
    let chars = req.text.chars().count();
    if chars > max_text_length {
        return Err(ApiError::InvalidInput(format!(
            "Text too long ({chars} characters, max {max_text_length})"
        )));
    }

    for (name, value) in [("voiceId", &req.voice_id), ("speaker", &req.speaker)] {
        if let Some(value) = value {
            validate_identifier(name, value)?;
        }
    }

    Ok(())
}

fn validate_identifier(name: &str, value: &str) -> Result<(), ApiError> {
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "{name} too long (max {MAX_IDENTIFIER_LENGTH} bytes)"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(ApiError::InvalidInput(format!("{name} contains control characters")));
    }
    Ok(())
}
