use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::error::CacheError;

/// Converts cached values of type `T` to and from bytes
pub trait CacheCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CacheError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, CacheError>;
}

/// JSON codec for any serde type
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> CacheCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u32,
        title: String,
    }

    #[test]
    fn test_json_codec_decode_error() {
        let codec = JsonCodec;
        let result: Result<Record, _> = codec.decode(b"{\"id\": \"not a number\"}");
        assert!(matches!(result, Err(CacheError::Codec(_))));
    }

    #[test]
    fn test_json_codec_encodes_plain_json() {
        let bytes = JsonCodec
            .encode(&Record {
                id: 1,
                title: "t".to_string(),
            })
            .unwrap();
        assert_eq!(bytes, br#"{"id":1,"title":"t"}"#);
    }
}
