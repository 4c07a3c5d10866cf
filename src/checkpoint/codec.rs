//! Checkpoint wire format: JSON compressed with zstd.

use crate::error::StorageError;

use super::Checkpoint;

const ZSTD_LEVEL: i32 = 3;

pub fn encode(checkpoint: &Checkpoint) -> Result<Vec<u8>, StorageError> {
    let json = serde_json::to_vec(checkpoint)?;
    zstd::encode_all(json.as_slice(), ZSTD_LEVEL).map_err(|e| StorageError::Codec(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Checkpoint, StorageError> {
    let json = zstd::decode_all(bytes).map_err(|e| StorageError::Codec(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::checkpoint;

    #[test]
    fn test_decodes_what_it_encodes() {
        let original = checkpoint("t1", 7);
        let bytes = encode(&original).unwrap();
        assert_eq!(decode(&bytes).unwrap(), original);
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        let err = decode(b"not zstd").unwrap_err();
        assert!(matches!(err, StorageError::Codec(_)));
    }
}
