//! Vector wire encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::{Error, Result};

/// Base64 of the vector's little-endian f32 bytes (OpenAI `encoding_format: base64`).
pub fn encode_base64(v: &[f32]) -> String {
    let bytes: Vec<u8> = v.iter().flat_map(|x| x.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

pub fn decode_base64(s: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| Error::validation(format!("invalid base64 embedding: {e}")))?;
    if bytes.len() % 4 != 0 {
        return Err(Error::validation(format!(
            "base64 embedding length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_is_little_endian_f32() {
        // 1.0f32 = 0x3F800000 -> LE bytes 00 00 80 3F
        assert_eq!(encode_base64(&[1.0]), "AACAPw==");
        assert_eq!(decode_base64("AACAPw==").unwrap(), vec![1.0]);
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(decode_base64("AACA").is_err());
    }
}
