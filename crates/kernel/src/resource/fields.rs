//! Field-by-field validation of request bodies.
//!
//! Reads typed values out of a JSON object and collects one [`FieldError`]
//! per failing field, so a single response can name every problem.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::FieldError;

pub struct Fields<'a> {
    input: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    pub fn new(input: &'a Map<String, Value>) -> Self {
        Self {
            input,
            errors: Vec::new(),
        }
    }

    /// True when the field is present and not null.
    pub fn has(&self, field: &str) -> bool {
        self.input.get(field).is_some_and(|v| !v.is_null())
    }

    /// A field that must be present; records `missing` otherwise.
    pub fn required<T: DeserializeOwned>(&mut self, field: &str, missing: &str) -> Option<T> {
        if !self.has(field) {
            self.error(field, missing);
            return None;
        }
        self.optional(field)
    }

    /// A field that may be absent or null; wrong types are still errors.
    pub fn optional<T: DeserializeOwned>(&mut self, field: &str) -> Option<T> {
        let value = self.input.get(field).filter(|v| !v.is_null())?;
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.error(field, format!("Invalid {field}: {}", display(value)));
                None
            }
        }
    }

    /// `required` on create, `optional` on partial update.
    pub fn field<T: DeserializeOwned>(
        &mut self,
        field: &str,
        creating: bool,
        missing: &str,
    ) -> Option<T> {
        if creating {
            self.required(field, missing)
        } else {
            self.optional(field)
        }
    }

    /// Like [`Fields::field`], with a fixed message for values that do not parse.
    pub fn choice<T: DeserializeOwned>(
        &mut self,
        field: &str,
        creating: bool,
        missing: &str,
        invalid: &str,
    ) -> Option<T> {
        let Some(value) = self.input.get(field).filter(|v| !v.is_null()) else {
            if creating {
                self.error(field, missing);
            }
            return None;
        };
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.error(field, invalid);
                None
            }
        }
    }

    /// Record `message` against `field` unless `ok`.
    pub fn check(&mut self, field: &str, ok: bool, message: impl Into<String>) {
        if !ok {
            self.error(field, message);
        }
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(value)` when nothing failed.
    pub fn finish<T>(self, value: T) -> Result<T, Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }

    pub fn into_errors(self) -> Vec<FieldError> {
        self.errors
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Character length, counting Unicode scalar values.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_every_failure() {
        let input = json!({"price": "cheap", "duration": 5});
        let input = input.as_object().unwrap();
        let mut fields = Fields::new(input);
        let name: Option<String> = fields.required("name", "A tour must have a name");
        let price: Option<f64> = fields.required("price", "A tour must have a price");
        let duration: Option<u32> = fields.required("duration", "A tour must have a duration");
        assert!(name.is_none());
        assert!(price.is_none());
        assert_eq!(duration, Some(5));

        let errors = fields.into_errors();
        let names: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(names, vec!["name", "price"]);
        assert_eq!(errors[1].message, "Invalid price: cheap");
    }

    #[test]
    fn null_counts_as_missing() {
        let input = json!({"summary": null});
        let mut fields = Fields::new(input.as_object().unwrap());
        assert!(!fields.has("summary"));
        let summary: Option<String> = fields.optional("summary");
        assert!(summary.is_none());
        assert!(fields.is_valid());
        assert_eq!(fields.finish(1).unwrap(), 1);
    }
}
