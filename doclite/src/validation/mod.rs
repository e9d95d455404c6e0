use crate::document::value_at;
use crate::error::{DocliteError, Result};
use crate::schema::{FieldDef, SchemaDef, SqlType};
use serde_json::Value;

/// A single problem found in a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: Option<String>,
    pub message: String,
}

/// Result of validating a payload
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// The first issue as an error, if there is one.
    pub fn into_error(self) -> Option<DocliteError> {
        self.issues.into_iter().next().map(|issue| DocliteError::Validation {
            field: issue.field,
            message: issue.message,
        })
    }
}

/// Check a serialized payload against the declared fields.
/// The payload must be an object; non-nullable fields must be present and
/// non-null; present values must fit the declared SQL type.
pub fn validate_payload<T>(schema: &SchemaDef<T>, payload: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    if !payload.is_object() {
        add_issue(
            &mut result,
            None,
            format!("Document payload must be a JSON object, got {}", type_name(payload)),
        );
        return result;
    }

    for field in &schema.fields {
        let value = value_at(payload, &field.json_path());
        match value {
            None | Some(Value::Null) => {
                if !field.nullable {
                    add_issue(
                        &mut result,
                        Some(&field.name),
                        format!("Field '{}' is required", field.name),
                    );
                }
            }
            Some(val) => validate_field_value(field, val, &mut result),
        }
    }

    result
}

fn validate_field_value(field: &FieldDef, value: &Value, result: &mut ValidationResult) {
    let fits = match field.sql_type {
        SqlType::Text => value.is_string(),
        SqlType::Integer => value.is_i64() || value.is_u64(),
        SqlType::Real | SqlType::Numeric => value.is_number(),
        SqlType::Boolean => value.is_boolean(),
        SqlType::Blob => value.is_string() || value.is_array(),
    };
    if !fits {
        add_issue(
            result,
            Some(&field.name),
            format!(
                "Field '{}' expected {}, got {}",
                field.name,
                expected_name(field.sql_type),
                type_name(value)
            ),
        );
    }
}

fn add_issue(result: &mut ValidationResult, field: Option<&str>, message: String) {
    result.issues.push(ValidationIssue {
        field: field.map(str::to_string),
        message,
    });
}

fn expected_name(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::Text => "string",
        SqlType::Integer => "integer",
        SqlType::Real | SqlType::Numeric => "number",
        SqlType::Boolean => "boolean",
        SqlType::Blob => "string or byte array",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Run the schema's validate hook, then check the serialized payload.
/// Returns the (possibly rewritten) payload and its JSON form.
pub fn validate_and_prepare<T: serde::Serialize>(schema: &SchemaDef<T>, data: T) -> Result<(T, Value)> {
    let data = match &schema.validate {
        Some(hook) => hook(data).map_err(|message| DocliteError::Validation {
            field: None,
            message,
        })?,
        None => data,
    };
    let payload = crate::document::encode_payload(&data)?;
    if let Some(err) = validate_payload(schema, &payload).into_error() {
        return Err(err);
    }
    Ok((data, payload))
}
