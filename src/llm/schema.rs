//! Schema validation for structured LLM responses: enumerations and
//! numeric ranges (`spec.md` §4.7 point 3). A violation fails the batch.

use serde_json::Value;

/// The type a field's value must conform to.
#[derive(Debug, Clone)]
pub enum FieldType {
    String,
    Float { min: Option<f64>, max: Option<f64> },
    Boolean,
    Enum(Vec<String>),
}

/// One field in a response schema.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, required: true }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, required: false }
    }
}

/// A schema violation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingField(String),
    TypeMismatch { field: String, expected: String },
    EnumInvalid { field: String, value: String, allowed: Vec<String> },
    RangeViolation { field: String, value: f64, min: Option<f64>, max: Option<f64> },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(name) => write!(f, "missing required field '{name}'"),
            ValidationError::TypeMismatch { field, expected } => {
                write!(f, "field '{field}' must be {expected}")
            }
            ValidationError::EnumInvalid { field, value, allowed } => write!(
                f,
                "field '{field}' has value '{value}' not in {{{}}}",
                allowed.join(", ")
            ),
            ValidationError::RangeViolation { field, value, min, max } => write!(
                f,
                "field '{field}' value {value} out of range [{:?}, {:?}]",
                min, max
            ),
        }
    }
}

/// Validate a single JSON object against a field schema.
pub fn validate_fields(value: &Value, fields: &[FieldSpec]) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let Value::Object(map) = value else {
        errors.push(ValidationError::TypeMismatch {
            field: "<root>".to_string(),
            expected: "object".to_string(),
        });
        return Err(errors);
    };

    for field in fields {
        match map.get(&field.name) {
            None => {
                if field.required {
                    errors.push(ValidationError::MissingField(field.name.clone()));
                }
            }
            Some(v) => {
                if let Err(e) = validate_value(&field.name, v, &field.field_type) {
                    errors.push(e);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_value(name: &str, value: &Value, field_type: &FieldType) -> Result<(), ValidationError> {
    match field_type {
        FieldType::String => {
            if !value.is_string() {
                return Err(ValidationError::TypeMismatch {
                    field: name.to_string(),
                    expected: "string".to_string(),
                });
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                return Err(ValidationError::TypeMismatch {
                    field: name.to_string(),
                    expected: "boolean".to_string(),
                });
            }
        }
        FieldType::Float { min, max } => {
            let n = value.as_f64().ok_or_else(|| ValidationError::TypeMismatch {
                field: name.to_string(),
                expected: "number".to_string(),
            })?;
            if min.map(|m| n < m).unwrap_or(false) || max.map(|m| n > m).unwrap_or(false) {
                return Err(ValidationError::RangeViolation {
                    field: name.to_string(),
                    value: n,
                    min: *min,
                    max: *max,
                });
            }
        }
        FieldType::Enum(allowed) => {
            let s = value.as_str().ok_or_else(|| ValidationError::TypeMismatch {
                field: name.to_string(),
                expected: "string".to_string(),
            })?;
            if !allowed.iter().any(|a| a == s) {
                return Err(ValidationError::EnumInvalid {
                    field: name.to_string(),
                    value: s.to_string(),
                    allowed: allowed.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Confidence fields appear throughout the response schemas; this is the
/// `0 ≤ confidence ≤ 1` constraint named in `spec.md` §4.7 point 3.
pub fn confidence_field(name: &str) -> FieldSpec {
    FieldSpec::required(name, FieldType::Float { min: Some(0.0), max: Some(1.0) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_a_valid_object() {
        let fields = vec![
            FieldSpec::required("indicator_id", FieldType::String),
            FieldSpec::required(
                "family",
                FieldType::Enum(vec!["physical-fundamental".to_string()]),
            ),
            confidence_field("confidence_family"),
        ];
        let value = json!({
            "indicator_id": "gdp-us",
            "family": "physical-fundamental",
            "confidence_family": 0.9,
        });
        assert!(validate_fields(&value, &fields).is_ok());
    }

    #[test]
    fn rejects_enum_violation() {
        let fields = vec![FieldSpec::required(
            "family",
            FieldType::Enum(vec!["physical-fundamental".to_string()]),
        )];
        let value = json!({"family": "not-a-family"});
        let errors = validate_fields(&value, &fields).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::EnumInvalid { .. }));
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let fields = vec![confidence_field("confidence_family")];
        let value = json!({"confidence_family": 1.5});
        let errors = validate_fields(&value, &fields).unwrap_err();
        assert!(matches!(errors[0], ValidationError::RangeViolation { .. }));
    }

    #[test]
    fn reports_missing_required_field() {
        let fields = vec![FieldSpec::required("indicator_id", FieldType::String)];
        let errors = validate_fields(&json!({}), &fields).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingField("indicator_id".to_string())]);
    }
}
