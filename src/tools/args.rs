//! Argument validation helpers for tools
//!
//! Every failure is a [`VitalgateError::MalformedRequest`] naming the
//! offending argument.

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

use crate::error::{Result, VitalgateError};

/// Read-only view over a tool's argument object.
#[derive(Debug, Clone, Copy)]
pub struct ToolArgs<'a> {
    map: &'a Map<String, Value>,
}

fn malformed(message: String) -> anyhow::Error {
    VitalgateError::MalformedRequest(message).into()
}

impl<'a> ToolArgs<'a> {
    /// Wraps `args`, which must be a JSON object.
    ///
    /// # Errors
    ///
    /// Fails when `args` is not an object.
    pub fn new(args: &'a Value) -> Result<Self> {
        args.as_object()
            .map(|map| Self { map })
            .ok_or_else(|| malformed("arguments must be a JSON object".to_string()))
    }

    /// Rejects any argument not in `allowed`.
    pub fn deny_unknown(&self, allowed: &[&str]) -> Result<()> {
        match self.map.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(malformed(format!("unexpected argument '{}'", key))),
            None => Ok(()),
        }
    }

    /// A required identifier: a non-empty string of `[A-Za-z0-9_-]`, or a
    /// non-negative integer.
    pub fn required_id(&self, name: &str) -> Result<String> {
        let value = self
            .map
            .get(name)
            .ok_or_else(|| malformed(format!("missing required argument '{}'", name)))?;
        let id = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) if n.as_u64().is_some() => n.to_string(),
            _ => {
                return Err(malformed(format!(
                    "argument '{}' must be a string or non-negative integer",
                    name
                )))
            }
        };
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(malformed(format!(
                "argument '{}' must be a non-empty identifier",
                name
            )));
        }
        Ok(id)
    }

    /// An optional non-empty string.
    pub fn optional_str(&self, name: &str) -> Result<Option<String>> {
        match self.map.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
            Some(_) => Err(malformed(format!(
                "argument '{}' must be a non-empty string",
                name
            ))),
        }
    }

    /// An optional RFC 3339 timestamp.
    pub fn optional_timestamp(&self, name: &str) -> Result<Option<DateTime<FixedOffset>>> {
        match self.optional_str(name)? {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(&raw).map(Some).map_err(|_| {
                malformed(format!(
                    "argument '{}' must be an RFC 3339 timestamp",
                    name
                ))
            }),
        }
    }

    /// An optional integer within `min..=max`.
    pub fn optional_int_in(&self, name: &str, min: u64, max: u64) -> Result<Option<u64>> {
        match self.map.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(v) if (min..=max).contains(&v) => Ok(Some(v)),
                _ => Err(malformed(format!(
                    "argument '{}' must be an integer between {} and {}",
                    name, min, max
                ))),
            },
            Some(_) => Err(malformed(format!(
                "argument '{}' must be an integer between {} and {}",
                name, min, max
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use serde_json::json;

    #[test]
    fn test_required_id_accepts_strings_and_integers() {
        let args = json!({"a": "ecfa-12_x", "b": 9071, "c": " 42 "});
        let view = ToolArgs::new(&args).unwrap();
        assert_eq!(view.required_id("a").unwrap(), "ecfa-12_x");
        assert_eq!(view.required_id("b").unwrap(), "9071");
        assert_eq!(view.required_id("c").unwrap(), "42");
    }

    #[test]
    fn test_required_id_rejects_missing_and_path_characters() {
        let args = json!({"a": "../etc", "b": "", "c": -1, "d": true});
        let view = ToolArgs::new(&args).unwrap();
        for name in ["a", "b", "c", "d", "missing"] {
            let err = view.required_id(name).unwrap_err();
            assert_eq!(error_kind(&err), ErrorKind::MalformedRequest, "{name}");
            assert!(err.to_string().contains(name));
        }
    }

    #[test]
    fn test_optional_timestamp() {
        let args = json!({"start": "2024-01-02T03:04:05Z", "end": "yesterday"});
        let view = ToolArgs::new(&args).unwrap();
        assert!(view.optional_timestamp("start").unwrap().is_some());
        assert!(view.optional_timestamp("absent").unwrap().is_none());
        assert!(view.optional_timestamp("end").is_err());
    }

    #[test]
    fn test_optional_int_in_bounds() {
        let args = json!({"ok": 25, "zero": 0, "big": 26, "text": "5"});
        let view = ToolArgs::new(&args).unwrap();
        assert_eq!(view.optional_int_in("ok", 1, 25).unwrap(), Some(25));
        assert_eq!(view.optional_int_in("absent", 1, 25).unwrap(), None);
        assert!(view.optional_int_in("zero", 1, 25).is_err());
        assert!(view.optional_int_in("big", 1, 25).is_err());
        assert!(view.optional_int_in("text", 1, 25).is_err());
    }

    #[test]
    fn test_deny_unknown() {
        let args = json!({"limit": 5, "colour": "blue"});
        let view = ToolArgs::new(&args).unwrap();
        let err = view.deny_unknown(&["limit"]).unwrap_err();
        assert!(err.to_string().contains("colour"));
        assert!(view.deny_unknown(&["limit", "colour"]).is_ok());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(ToolArgs::new(&json!("x")).is_err());
    }
}
