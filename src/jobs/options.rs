//! Submission options and the tri-state field they are built from

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

/// An optional tool argument that distinguishes "not given" from `null`.
///
/// Use with `#[serde(default)]` so a missing key deserializes to `Unset`.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Unset,
    Null,
    Value(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T> Field<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Whether the caller passed the key at all
    pub fn is_given(&self) -> bool {
        !self.is_unset()
    }

    pub fn as_ref(&self) -> Field<&T> {
        match self {
            Self::Unset => Field::Unset,
            Self::Null => Field::Null,
            Self::Value(v) => Field::Value(v),
        }
    }

    /// The value, treating `null` like "not given"
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// `Unset` takes `default`; `Null` stays absent
    pub fn or_default_value(self, default: T) -> Option<T> {
        match self {
            Self::Unset => Some(default),
            Self::Null => None,
            Self::Value(v) => Some(v),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Self::Unset => Field::Unset,
            Self::Null => Field::Null,
            Self::Value(v) => Field::Value(f(v)),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Self::Value(value),
            None => Self::Null,
        })
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => v.serialize(serializer),
            _ => serializer.serialize_none(),
        }
    }
}

/// Options of `call_async`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallAsyncOptions {
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub extra_env: Field<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub timeout: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub runtime_memory: Field<u32>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub include_modules: Field<Vec<String>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub exclude_modules: Field<Vec<String>>,
}

/// Options of `map`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapOptions {
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub extra_args: Field<Value>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub timeout: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub extra_env: Field<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub include_modules: Field<Vec<String>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub exclude_modules: Field<Vec<String>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub chunksize: Field<usize>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub runtime_memory: Field<u32>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub obj_chunk_size: Field<u64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub obj_chunk_number: Field<u32>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub obj_newline: Field<String>,
}

/// Options of `map_reduce`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapReduceOptions {
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub timeout: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub extra_args: Field<Value>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub extra_args_reduce: Field<Value>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub chunksize: Field<usize>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub extra_env: Field<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub map_runtime_memory: Field<u32>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub reduce_runtime_memory: Field<u32>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub obj_chunk_size: Field<u64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub obj_chunk_number: Field<u32>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub obj_newline: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub obj_reduce_by_key: Field<bool>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub spawn_reducer: Field<u8>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub include_modules: Field<Vec<String>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub exclude_modules: Field<Vec<String>>,
}
