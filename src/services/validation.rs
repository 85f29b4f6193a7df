use crate::errors::ToolError;
use crate::services::drive::{DriveKind, DriveLocation};
use serde_json::Value;

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(&self, value: &Value, label: &str, trim: bool) -> Result<String, ToolError> {
        let text = value.as_str().ok_or_else(|| {
            ToolError::invalid_params(format!("{} must be a non-empty string", label))
        })?;
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        Ok(if trim {
            normalized.to_string()
        } else {
            text.to_string()
        })
    }

    pub fn required_string(&self, args: &Value, key: &str) -> Result<String, ToolError> {
        let value = args
            .get(key)
            .ok_or_else(|| ToolError::invalid_params(format!("{} is required", key)))?;
        self.ensure_string(value, key, true)
    }

    // Keeps whitespace and accepts "" (file content).
    pub fn required_text(&self, args: &Value, key: &str) -> Result<String, ToolError> {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::invalid_params(format!("{} must be a string", key)))
    }

    pub fn optional_string(&self, args: &Value, key: &str) -> Result<Option<String>, ToolError> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(value) => self.ensure_string(value, key, true).map(Some),
        }
    }

    pub fn ensure_identifier(&self, value: &str, label: &str) -> Result<String, ToolError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        if trimmed.contains('\0') {
            return Err(ToolError::invalid_params(format!(
                "{} must not contain null bytes",
                label
            )));
        }
        Ok(trimmed.to_string())
    }

    pub fn required_identifier(&self, args: &Value, key: &str) -> Result<String, ToolError> {
        let raw = self.required_string(args, key)?;
        self.ensure_identifier(&raw, key)
    }

    pub fn positive_integer(&self, args: &Value, key: &str) -> Result<u64, ToolError> {
        args.get(key)
            .and_then(Value::as_u64)
            .filter(|value| *value >= 1)
            .ok_or_else(|| ToolError::invalid_params(format!("{} must be an integer >= 1", key)))
    }

    pub fn rows(&self, args: &Value, key: &str) -> Result<Vec<Vec<Value>>, ToolError> {
        let rows = args
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::invalid_params(format!("{} must be an array of rows", key)))?;
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                let cells = row.as_array().ok_or_else(|| {
                    ToolError::invalid_params(format!("{}[{}] must be an array", key, index))
                })?;
                if cells.iter().any(|cell| cell.is_object() || cell.is_array()) {
                    return Err(ToolError::invalid_params(format!(
                        "{}[{}] must contain only scalar values",
                        key, index
                    )));
                }
                Ok(cells.clone())
            })
            .collect()
    }

    pub fn drive_location(&self, args: &Value) -> Result<DriveLocation, ToolError> {
        let kind: DriveKind = self
            .required_string(args, "location_type")?
            .parse()
            .map_err(ToolError::invalid_params)?;
        let id = self.required_identifier(args, "location_id")?;
        Ok(DriveLocation::new(kind, id))
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_optional_strings_are_absent() {
        let validation = Validation::new();
        let args = json!({"folder_path": "   "});
        assert_eq!(validation.optional_string(&args, "folder_path").expect("ok"), None);
    }

    #[test]
    fn drive_location_rejects_unknown_kind() {
        let validation = Validation::new();
        let err = validation
            .drive_location(&json!({"location_type": "box", "location_id": "x"}))
            .unwrap_err();
        assert!(err.message.contains("location_type"));
    }

    #[test]
    fn rows_reject_nested_values() {
        let validation = Validation::new();
        assert!(validation.rows(&json!({"data": [["a", 1]]}), "data").is_ok());
        assert!(validation.rows(&json!({"data": [["a", {"b": 1}]]}), "data").is_err());
        assert!(validation.rows(&json!({"data": ["a"]}), "data").is_err());
    }

    #[test]
    fn slide_index_must_be_positive() {
        let validation = Validation::new();
        assert_eq!(validation.positive_integer(&json!({"slide_index": 2}), "slide_index").expect("ok"), 2);
        assert!(validation.positive_integer(&json!({"slide_index": 0}), "slide_index").is_err());
    }
}
