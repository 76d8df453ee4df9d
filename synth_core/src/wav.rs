//! PCM and WAV encoding for synthesized audio.

use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};

/// Bytes per encoded sample.
pub const PCM_SAMPLE_BYTES: usize = 2;

const I16_MAX_F32: f32 = i16::MAX as f32;

/// Encode f32 samples in [-1.0, 1.0] as 16-bit little-endian PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * PCM_SAMPLE_BYTES);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM. A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(PCM_SAMPLE_BYTES)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Wrap 16-bit little-endian PCM into a mono WAV file and return it as Base64.
pub fn encode_wav_base64(pcm: &[u8], sample_rate: u32) -> anyhow::Result<String> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // WAV header (44 bytes) + payload
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;
        for sample in decode_pcm16(pcm) {
            writer
                .write_sample(sample)
                .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }

    Ok(general_purpose::STANDARD.encode(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pcm16_clamps_and_is_little_endian() {
        let bytes = encode_pcm16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..2], &[0, 0]);
        assert_eq!(&bytes[2..4], &i16::MAX.to_le_bytes());
        assert_eq!(&bytes[4..6], &(-i16::MAX).to_le_bytes());
        // out of range clamps to full scale
        assert_eq!(&bytes[6..8], &i16::MAX.to_le_bytes());
    }

    #[test]
    fn test_decode_ignores_trailing_byte() {
        let mut bytes = encode_pcm16(&[0.5, -0.5]);
        bytes.push(0xff);
        assert_eq!(decode_pcm16(&bytes).len(), 2);
    }

    #[test]
    fn test_wav_base64_roundtrips_through_hound() {
        let pcm = encode_pcm16(&[0.0, 0.25, -0.25, 0.5]);
        let b64 = encode_wav_base64(&pcm, 24_000).unwrap();
        let wav = general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");

        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, decode_pcm16(&pcm));
    }
}
