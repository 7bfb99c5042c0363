//! Payload serialization capability.
//!
//! The store never looks inside a payload; it only moves `Value` tokens
//! between producers, the data document and consumers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::{Error, Result};

pub trait Serializer {
    fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Value>;

    fn decode<T: DeserializeOwned>(&self, data: &Value) -> Result<T>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Value> {
        serde_json::to_value(payload).map_err(Error::Serialization)
    }

    fn decode<T: DeserializeOwned>(&self, data: &Value) -> Result<T> {
        T::deserialize(data).map_err(Error::Serialization)
    }
}
