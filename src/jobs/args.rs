//! Conversion of raw tool arguments into rows and extra arguments

use serde_json::Value;

use super::options::Field;
use crate::error::{ComputeError, ErrorCode, Result};
use crate::executor::{DataRow, ExtraArgs};

/// Interpret one input item.
///
/// Mappings always bind by keyword. A sequence is unpacked into positional
/// arguments only when `tuple_list` is set; otherwise it is one value.
pub fn to_row(value: Value, tuple_list: bool) -> DataRow {
    match value {
        Value::Object(map) => DataRow::Mapping(map),
        Value::Array(items) if tuple_list => DataRow::Tuple(items),
        other => DataRow::Single(other),
    }
}

pub fn to_rows(items: Vec<Value>, tuple_list: bool) -> Vec<DataRow> {
    items
        .into_iter()
        .map(|item| to_row(item, tuple_list))
        .collect()
}

/// Interpret an extra-arguments value, converting sequences when `as_tuple`
pub fn to_extra(value: Value, as_tuple: bool, field: &str) -> Result<ExtraArgs> {
    match value {
        Value::Object(map) => Ok(ExtraArgs::Mapping(map)),
        Value::Array(items) if as_tuple => Ok(ExtraArgs::Tuple(items)),
        Value::Array(items) => Ok(ExtraArgs::Sequence(items)),
        other => Err(ComputeError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_TYPE,
            format!(
                "{} must be a list or a mapping, got {}",
                field,
                json_type(&other)
            ),
            Some(field.to_string()),
        )),
    }
}

/// An extra-arguments option; unset and `null` both mean "none requested"
pub fn extra_field(field: Field<Value>, as_tuple: bool, name: &str) -> Result<Option<ExtraArgs>> {
    field
        .value()
        .map(|value| to_extra(value, as_tuple, name))
        .transpose()
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
