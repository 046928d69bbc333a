use crate::error::{MarketError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Wire messages are length-prefixed, self-describing records: a 4-byte
/// little-endian payload length followed by a JSON document.

pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body =
        serde_json::to_vec(msg).map_err(|e| MarketError::Serialization(e.to_string()))?;
    if body.len() > u32::MAX as usize {
        return Err(MarketError::InvalidFrame("frame too large".to_string()));
    }
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < 4 {
        return Err(MarketError::InvalidFrame(
            "frame shorter than length prefix".to_string(),
        ));
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let body = &bytes[4..];
    if body.len() != len {
        return Err(MarketError::InvalidFrame(format!(
            "frame length mismatch: header {} body {}",
            len,
            body.len()
        )));
    }
    serde_json::from_slice(body).map_err(|e| MarketError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        id: u64,
        label: String,
    }

    #[test]
    fn test_frame_round_trip() {
        let msg = Probe {
            id: 7,
            label: "deal".to_string(),
        };
        let frame = encode_frame(&msg).unwrap();
        let back: Probe = decode_frame(&frame).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_frame_rejects_truncation() {
        let msg = Probe {
            id: 7,
            label: "deal".to_string(),
        };
        let mut frame = encode_frame(&msg).unwrap();
        frame.pop();
        assert!(decode_frame::<Probe>(&frame).is_err());
        assert!(decode_frame::<Probe>(&frame[..2]).is_err());
    }
}
