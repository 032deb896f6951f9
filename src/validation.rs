//! Data schema validation
//!
//! Checks a decoded [`serde_json::Value`] against the [`DataSchema`] declared
//! by the Thing Description. Failures carry the violated constraint in an
//! [`Error::Evaluation`] so the caller never receives silently-wrong data.

use serde_json::Value;

use crate::error::Error;
use crate::thing::{ArraySchema, DataSchema, DataSchemaSubtype, IntegerSchema, NumberSchema, ObjectSchema, StringSchema};

/// Validates `value` against `schema`.
pub fn validate(value: &Value, schema: &DataSchema) -> Result<(), Error> {
    if let Some(constant) = &schema.constant {
        if value != constant {
            return Err(evaluation(format!(
                "value {value} does not match const {constant}"
            )));
        }
    }

    if let Some(enumeration) = &schema.enumeration {
        if !enumeration.contains(value) {
            return Err(evaluation(format!(
                "value {value} is not one of the enumerated values"
            )));
        }
    }

    if let Some(one_of) = &schema.one_of {
        if !one_of.iter().any(|sub| validate(value, sub).is_ok()) {
            return Err(evaluation(format!(
                "value {value} matches none of the oneOf schemas"
            )));
        }
    }

    match &schema.subtype {
        Some(subtype) => validate_subtype(value, subtype),
        None => Ok(()),
    }
}

fn validate_subtype(value: &Value, subtype: &DataSchemaSubtype) -> Result<(), Error> {
    match subtype {
        DataSchemaSubtype::Boolean => value
            .is_boolean()
            .then_some(())
            .ok_or_else(|| type_mismatch("boolean", value)),
        DataSchemaSubtype::Null => value
            .is_null()
            .then_some(())
            .ok_or_else(|| type_mismatch("null", value)),
        DataSchemaSubtype::Number(schema) => validate_number(value, schema),
        DataSchemaSubtype::Integer(schema) => validate_integer(value, schema),
        DataSchemaSubtype::String(schema) => validate_string(value, schema),
        DataSchemaSubtype::Array(schema) => validate_array(value, schema),
        DataSchemaSubtype::Object(schema) => validate_object(value, schema),
    }
}

fn validate_number(value: &Value, schema: &NumberSchema) -> Result<(), Error> {
    let number = value
        .as_f64()
        .ok_or_else(|| type_mismatch("number", value))?;

    if let Some(minimum) = &schema.minimum {
        if !minimum.satisfied_by(&number) {
            return Err(evaluation(format!("{number} violates the minimum bound")));
        }
    }

    if let Some(maximum) = &schema.maximum {
        if !maximum.satisfied_by(&number) {
            return Err(evaluation(format!("{number} violates the maximum bound")));
        }
    }

    if let Some(multiple_of) = schema.multiple_of {
        if multiple_of > 0.0 && (number / multiple_of).fract().abs() > f64::EPSILON {
            return Err(evaluation(format!(
                "{number} is not a multiple of {multiple_of}"
            )));
        }
    }

    Ok(())
}

fn validate_integer(value: &Value, schema: &IntegerSchema) -> Result<(), Error> {
    let integer = value
        .as_i64()
        .ok_or_else(|| type_mismatch("integer", value))?;

    if let Some(minimum) = &schema.minimum {
        if !minimum.satisfied_by(&integer) {
            return Err(evaluation(format!("{integer} violates the minimum bound")));
        }
    }

    if let Some(maximum) = &schema.maximum {
        if !maximum.satisfied_by(&integer) {
            return Err(evaluation(format!("{integer} violates the maximum bound")));
        }
    }

    Ok(())
}

fn validate_string(value: &Value, schema: &StringSchema) -> Result<(), Error> {
    let string = value
        .as_str()
        .ok_or_else(|| type_mismatch("string", value))?;

    if let Some(max_length) = schema.max_length {
        if string.chars().count() > max_length as usize {
            return Err(evaluation(format!(
                "string longer than maxLength {max_length}"
            )));
        }
    }

    Ok(())
}

fn validate_array(value: &Value, schema: &ArraySchema) -> Result<(), Error> {
    let array = value.as_array().ok_or_else(|| type_mismatch("array", value))?;

    if let Some(min_items) = schema.min_items {
        if array.len() < min_items as usize {
            return Err(evaluation(format!(
                "array has fewer than minItems {min_items} elements"
            )));
        }
    }

    if let Some(max_items) = schema.max_items {
        if array.len() > max_items as usize {
            return Err(evaluation(format!(
                "array has more than maxItems {max_items} elements"
            )));
        }
    }

    if let Some(items) = &schema.items {
        // A single item schema applies to every element, multiple schemas
        // validate the tuple position-wise.
        match items.as_slice() {
            [item] => {
                for element in array {
                    validate(element, item)?;
                }
            }
            items => {
                for (element, item) in array.iter().zip(items) {
                    validate(element, item)?;
                }
            }
        }
    }

    Ok(())
}

fn validate_object(value: &Value, schema: &ObjectSchema) -> Result<(), Error> {
    let object = value
        .as_object()
        .ok_or_else(|| type_mismatch("object", value))?;

    if let Some(required) = &schema.required {
        for name in required {
            if !object.contains_key(name) {
                return Err(evaluation(format!("missing required property \"{name}\"")));
            }
        }
    }

    if let Some(properties) = &schema.properties {
        for (name, property_schema) in properties {
            if let Some(property) = object.get(name) {
                validate(property, property_schema)?;
            }
        }
    }

    Ok(())
}

fn type_mismatch(expected: &str, value: &Value) -> Error {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };

    evaluation(format!("expected {expected}, found {found}"))
}

fn evaluation(message: String) -> Error {
    Error::Evaluation(message)
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::thing::{Maximum, Minimum};

    fn schema_of(subtype: DataSchemaSubtype) -> DataSchema {
        DataSchema {
            subtype: Some(subtype),
            ..Default::default()
        }
    }

    #[test]
    fn primitive_types() {
        assert!(validate(&json!(true), &schema_of(DataSchemaSubtype::Boolean)).is_ok());
        assert!(validate(&json!(1), &schema_of(DataSchemaSubtype::Boolean)).is_err());
        assert!(validate(&json!(null), &schema_of(DataSchemaSubtype::Null)).is_ok());
        assert!(
            validate(&json!(23.5), &schema_of(DataSchemaSubtype::Number(Default::default())))
                .is_ok()
        );
        assert!(
            validate(&json!("x"), &schema_of(DataSchemaSubtype::Number(Default::default())))
                .is_err()
        );
        // 2.5 is a number but not an integer.
        assert!(
            validate(&json!(2.5), &schema_of(DataSchemaSubtype::Integer(Default::default())))
                .is_err()
        );
    }

    #[test]
    fn numeric_bounds() {
        let schema = schema_of(DataSchemaSubtype::Number(NumberSchema {
            minimum: Some(Minimum::Inclusive(0.0)),
            maximum: Some(Maximum::Exclusive(100.0)),
            multiple_of: None,
        }));

        assert!(validate(&json!(0.0), &schema).is_ok());
        assert!(validate(&json!(99.9), &schema).is_ok());
        assert!(validate(&json!(100.0), &schema).is_err());
        assert!(validate(&json!(-0.1), &schema).is_err());

        let schema = schema_of(DataSchemaSubtype::Integer(IntegerSchema {
            minimum: Some(Minimum::Exclusive(0)),
            maximum: Some(Maximum::Inclusive(10)),
        }));

        assert!(validate(&json!(1), &schema).is_ok());
        assert!(validate(&json!(10), &schema).is_ok());
        assert!(validate(&json!(0), &schema).is_err());
    }

    #[test]
    fn const_and_enum() {
        let schema = DataSchema {
            constant: Some(json!("fixed")),
            ..Default::default()
        };
        assert!(validate(&json!("fixed"), &schema).is_ok());
        assert!(validate(&json!("other"), &schema).is_err());

        let schema = DataSchema {
            enumeration: Some(vec![json!("on"), json!("off")]),
            ..Default::default()
        };
        assert!(validate(&json!("on"), &schema).is_ok());
        assert!(validate(&json!("dim"), &schema).is_err());
    }

    #[test]
    fn arrays() {
        let schema = schema_of(DataSchemaSubtype::Array(ArraySchema {
            items: Some(vec![schema_of(DataSchemaSubtype::Integer(
                Default::default(),
            ))]),
            min_items: Some(1),
            max_items: Some(3),
        }));

        assert!(validate(&json!([1, 2]), &schema).is_ok());
        assert!(validate(&json!([]), &schema).is_err());
        assert!(validate(&json!([1, 2, 3, 4]), &schema).is_err());
        assert!(validate(&json!([1, "x"]), &schema).is_err());
    }

    #[test]
    fn objects() {
        let schema = schema_of(DataSchemaSubtype::Object(ObjectSchema {
            properties: Some(
                [(
                    "level".to_string(),
                    schema_of(DataSchemaSubtype::Integer(Default::default())),
                )]
                .into_iter()
                .collect(),
            ),
            required: Some(vec!["level".to_string()]),
        }));

        assert!(validate(&json!({"level": 3}), &schema).is_ok());
        assert!(validate(&json!({"level": "high"}), &schema).is_err());
        assert!(validate(&json!({}), &schema).is_err());
        assert!(validate(&json!(3), &schema).is_err());
    }

    #[test]
    fn string_max_length() {
        let schema = schema_of(DataSchemaSubtype::String(StringSchema {
            max_length: Some(3),
        }));

        assert!(validate(&json!("abc"), &schema).is_ok());
        assert!(validate(&json!("abcd"), &schema).is_err());
    }
}
