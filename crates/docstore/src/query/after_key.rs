//! Compound after-keys of composite aggregations.
//!
//! The server's `after_key` object is passed to callers as one opaque string, the
//! base64 encoded JSON of the object, and decoded back into the `after` parameter of
//! the next request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use crate::error::{QueryError, StorageResult};

/// Encodes an `after_key` object into a single string.
pub fn encode_after_key(after_key: &Map<String, Value>) -> String {
    STANDARD.encode(Value::Object(after_key.clone()).to_string())
}

/// Decodes a string created by [`encode_after_key`].
pub fn decode_after_key(key: &str) -> StorageResult<Map<String, Value>> {
    let invalid = || QueryError::InvalidAfterKey {
        key: key.to_string(),
    };

    let bytes = STANDARD.decode(key).map_err(|_| invalid())?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(after_key)) => Ok(after_key),
        _ => Err(invalid().into()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::StorageError;

    #[test]
    fn test_round_trip() {
        let after_key = json!({"name": "Ada", "age": 36, "nested": {"a": [1, null, "ü"]}});
        let Value::Object(after_key) = after_key else {
            unreachable!()
        };

        let encoded = encode_after_key(&after_key);
        assert!(!encoded.contains('{'));
        assert_eq!(decode_after_key(&encoded).unwrap(), after_key);
    }

    #[test]
    fn test_invalid_keys() {
        for key in ["not base64!", "W10=", ""] {
            assert!(matches!(
                decode_after_key(key),
                Err(StorageError::Query(QueryError::InvalidAfterKey { .. }))
            ));
        }
    }
}
