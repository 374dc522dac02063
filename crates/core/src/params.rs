use serde_json::{Map, Value};
use thiserror::Error;

pub type Params = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParamsError {
    message: String,
}

impl ParamsError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

pub fn parse_params(raw: &str) -> Result<Params, ParamsError> {
    if raw.trim().is_empty() {
        return Ok(Params::new());
    }

    let value: Value = serde_json::from_str(raw)
        .map_err(|error| ParamsError::new(format!("invalid parameters: {error}")))?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ParamsError::new(format!(
            "parameters must be a JSON object, got {}",
            value_kind(&other)
        ))),
    }
}

#[must_use]
pub fn render_params(params: &Params) -> String {
    serde_json::to_string_pretty(params).unwrap_or_else(|_| "{}".to_string())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_params, render_params};

    #[test]
    fn blank_input_is_an_empty_parameter_set() {
        assert!(parse_params("").expect("empty should parse").is_empty());
        assert!(parse_params("  \n\t").expect("blank should parse").is_empty());
    }

    #[test]
    fn object_input_parses_into_named_values() {
        let params = parse_params(r#"{"type": "post", "limit": 10}"#).expect("valid params");
        assert_eq!(params.get("type"), Some(&json!("post")));
        assert_eq!(params.get("limit"), Some(&json!(10)));
    }

    #[test]
    fn malformed_input_is_returned_as_error_value() {
        let error = parse_params(r#"{"type": "#).expect_err("truncated json should fail");
        assert!(error.message().starts_with("invalid parameters:"));
    }

    #[test]
    fn non_object_input_is_rejected() {
        let error = parse_params("[1, 2]").expect_err("array should be rejected");
        assert_eq!(error.message(), "parameters must be a JSON object, got an array");
    }

    #[test]
    fn rendered_params_use_two_space_indent() {
        let params = parse_params(r#"{"a":"x"}"#).expect("valid params");
        assert_eq!(render_params(&params), "{\n  \"a\": \"x\"\n}");
    }
}
