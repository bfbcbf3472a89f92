//! JSON payload codec using `serde_json`.
//!
//! Converts typed values to and from the [`Payload`] carried by messages.
//! An absent payload decodes like an explicit `null`, so `Option<T>` and
//! `()` targets accept both.
//!
//! # Example
//!
//! ```
//! use ipcbus::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Reading {
//!     sensor: String,
//!     celsius: f64,
//! }
//!
//! let reading = Reading { sensor: "attic".to_string(), celsius: 21.5 };
//! let payload = JsonCodec::encode(&reading).unwrap();
//! let decoded: Reading = JsonCodec::decode(Some(&payload)).unwrap();
//! assert_eq!(decoded, reading);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::Payload;

/// JSON codec for structured payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value into a payload.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented as JSON
    /// (for example a map with non-string keys).
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Payload> {
        Ok(serde_json::to_value(value)?)
    }

    /// Decode a payload into a value.
    ///
    /// # Errors
    ///
    /// Returns error if the payload does not have the shape of `T`.
    #[inline]
    pub fn decode<T: DeserializeOwned>(payload: Option<&Payload>) -> Result<T> {
        match payload {
            Some(value) => Ok(T::deserialize(value)?),
            None => Ok(T::deserialize(&Payload::Null)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let payload = JsonCodec::encode(&original).unwrap();
        assert_eq!(payload, json!({"id": 42, "name": "test", "active": true}));

        let decoded: TestStruct = JsonCodec::decode(Some(&payload)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_absent_payload_decodes_as_null() {
        assert!(JsonCodec::decode::<()>(None).is_ok());

        let optional: Option<i32> = JsonCodec::decode(None).unwrap();
        assert_eq!(optional, None);

        assert!(JsonCodec::decode::<i32>(None).is_err());
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let payload = json!("not a struct");
        assert!(JsonCodec::decode::<TestStruct>(Some(&payload)).is_err());
    }

    #[test]
    fn test_non_string_keys_fail_to_encode() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        assert!(JsonCodec::encode(&map).is_err());
    }
}
