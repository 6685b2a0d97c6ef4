use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// UTF-8 JSON wire encoding for event payloads.
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
        serde_json::to_string(payload).map_err(Into::into)
    }

    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(Into::into)
    }
}
