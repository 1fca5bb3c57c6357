//! Turns whatever the remote agent answered with into a well-formed payload.

use serde_json::{Map, Value};

pub const FALLBACK_MESSAGE: &str = "I don't have that information available right now.";
pub const DEFAULT_REQUIRED_FIELD: &str = "output";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub body: String,
    pub degraded: Option<String>,
}

impl Sanitized {
    fn intact(body: &str) -> Self {
        Self {
            body: body.to_string(),
            degraded: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ResponseSanitizer {
    required_field: String,
    fallback: String,
    accept_plain_text: bool,
}

impl Default for ResponseSanitizer {
    fn default() -> Self {
        Self {
            required_field: DEFAULT_REQUIRED_FIELD.to_string(),
            fallback: FALLBACK_MESSAGE.to_string(),
            accept_plain_text: false,
        }
    }
}

impl ResponseSanitizer {
    pub fn with_required_field(mut self, field: impl Into<String>) -> Self {
        self.required_field = field.into();
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Treat the body as a text answer: non-JSON text passes through and a
    /// JSON string literal is unquoted.
    pub fn accept_plain_text(mut self, accept: bool) -> Self {
        self.accept_plain_text = accept;
        self
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn sanitize(&self, raw: &str) -> Sanitized {
        if raw.trim().is_empty() {
            return self.replaced("empty response body");
        }
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) if self.accept_plain_text => return Sanitized::intact(raw),
            Err(err) => return self.replaced(&format!("unparseable response body: {err}")),
        };
        let mut object = match parsed {
            Value::Object(object) => object,
            Value::String(text) if !text.trim().is_empty() => {
                return if self.accept_plain_text {
                    Sanitized::intact(&text)
                } else {
                    Sanitized::intact(raw)
                };
            }
            other => {
                return self.replaced(&format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                ))
            }
        };
        match object.get(&self.required_field) {
            Some(value) if !value.is_null() => Sanitized::intact(raw),
            _ => {
                object.insert(
                    self.required_field.clone(),
                    Value::String(self.fallback.clone()),
                );
                Sanitized {
                    body: Value::Object(object).to_string(),
                    degraded: Some(format!(
                        "response missing required field '{}'",
                        self.required_field
                    )),
                }
            }
        }
    }

    fn replaced(&self, note: &str) -> Sanitized {
        let mut object = Map::new();
        object.insert(
            self.required_field.clone(),
            Value::String(self.fallback.clone()),
        );
        Sanitized {
            body: Value::Object(object).to_string(),
            degraded: Some(note.to_string()),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
