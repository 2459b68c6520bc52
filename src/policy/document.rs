//! Destructive reader for policy documents
//!
//! Fields are removed as they are validated; whatever is left over when the
//! reader is finished is an unknown (probably misspelt) field and fails the
//! load.

use crate::errors::{HsmError, Result};
use serde_json::{Map, Value};

pub struct FieldReader {
    fields: Map<String, Value>,
}

impl FieldReader {
    pub fn new(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(HsmError::validation(format!(
                "expected an object, got {}",
                kind(&other)
            ))),
        }
    }

    fn take(&mut self, name: &str) -> Option<Value> {
        match self.fields.remove(name) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }

    /// Accepts true/false and 0/1; absent means `false`.
    pub fn pop_bool(&mut self, name: &str) -> Result<bool> {
        match self.take(name) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(b),
            Some(Value::Number(n)) if n.as_u64() == Some(0) => Ok(false),
            Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(true),
            Some(_) => Err(HsmError::validation(format!("{}: must be boolean", name))),
        }
    }

    /// Whole number in `[mn..mx]`; integral floats like `5.0` are accepted.
    pub fn pop_int(&mut self, name: &str, mn: u64, mx: u64) -> Result<Option<u64>> {
        let Some(v) = self.take(name) else {
            return Ok(None);
        };

        let n: i128 = match &v {
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    u as i128
                } else if let Some(i) = n.as_i64() {
                    i as i128
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < 1e19 => f as i128,
                        _ => {
                            return Err(HsmError::validation(format!(
                                "{}: must be integer",
                                name
                            )))
                        }
                    }
                }
            }
            _ => {
                return Err(HsmError::validation(format!(
                    "{}: must be integer",
                    name
                )))
            }
        };

        if n < mn as i128 || n > mx as i128 {
            return Err(HsmError::validation(format!(
                "{}: must be in range: [{}..{}]",
                name, mn, mx
            )));
        }
        Ok(Some(n as u64))
    }

    pub fn pop_string(&mut self, name: &str, mn_len: usize, mx_len: usize) -> Result<Option<String>> {
        let Some(v) = self.take(name) else {
            return Ok(None);
        };

        let Value::String(s) = v else {
            return Err(HsmError::validation(format!("{}: must be string", name)));
        };

        let len = s.chars().count();
        if len < mn_len || len > mx_len {
            return Err(HsmError::validation(format!(
                "{}: length must be {}..{}",
                name, mn_len, mx_len
            )));
        }
        Ok(Some(s))
    }

    /// List field; absent or null is an empty list.
    pub fn pop_list(&mut self, name: &str) -> Result<Vec<Value>> {
        match self.take(name) {
            None => Ok(vec![]),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(HsmError::validation(format!("need a list for: {}", name))),
        }
    }

    /// List of strings, each passed through `clean`.
    pub fn pop_string_list<F>(&mut self, name: &str, max_items: usize, mut clean: F) -> Result<Vec<String>>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let items = self.pop_list(name)?;
        if items.len() > max_items {
            return Err(HsmError::validation(format!(
                "{}: at most {} items",
                name, max_items
            )));
        }

        items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => clean(&s),
                _ => Err(HsmError::validation(format!("{}: must be strings", name))),
            })
            .collect()
    }

    /// Fail if anything was not consumed.
    pub fn finish(self) -> Result<()> {
        if self.fields.is_empty() {
            return Ok(());
        }
        let mut extra: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        extra.sort_unstable();
        Err(HsmError::validation(format!("Unknown item: {}", extra.join(", "))))
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pop_int_range() {
        let mut r = FieldReader::new(json!({"a": 5, "b": 5.0, "c": -1, "d": 2.5, "e": "7"})).unwrap();
        assert_eq!(r.pop_int("a", 1, 10).unwrap(), Some(5));
        assert_eq!(r.pop_int("b", 1, 10).unwrap(), Some(5));
        assert_eq!(
            r.pop_int("c", 0, 10).unwrap_err().to_string(),
            "Invalid policy: c: must be in range: [0..10]"
        );
        assert!(r.pop_int("d", 0, 10).is_err());
        assert!(r.pop_int("e", 0, 10).is_err());
        assert_eq!(r.pop_int("missing", 0, 10).unwrap(), None);
    }

    #[test]
    fn test_pop_bool_forms() {
        let mut r = FieldReader::new(json!({"t": true, "one": 1, "zero": 0, "n": null, "s": "yes"})).unwrap();
        assert!(r.pop_bool("t").unwrap());
        assert!(r.pop_bool("one").unwrap());
        assert!(!r.pop_bool("zero").unwrap());
        assert!(!r.pop_bool("n").unwrap());
        assert!(!r.pop_bool("missing").unwrap());
        assert!(r.pop_bool("s").is_err());
    }

    #[test]
    fn test_pop_string_length() {
        let mut r = FieldReader::new(json!({"w": "", "x": "ok", "y": 3})).unwrap();
        assert!(r.pop_string("w", 1, 20).is_err());
        assert_eq!(r.pop_string("x", 1, 20).unwrap().as_deref(), Some("ok"));
        assert!(r.pop_string("y", 1, 20).is_err());
    }

    #[test]
    fn test_pop_list_requires_list() {
        let mut r = FieldReader::new(json!({"users": "bob", "none": null})).unwrap();
        assert_eq!(
            r.pop_list("users").unwrap_err().to_string(),
            "Invalid policy: need a list for: users"
        );
        assert!(r.pop_list("none").unwrap().is_empty());
    }

    #[test]
    fn test_leftover_fields_rejected() {
        let mut r = FieldReader::new(json!({"must_log": true, "mustlog": true, "perido": 5})).unwrap();
        r.pop_bool("must_log").unwrap();
        assert_eq!(
            r.finish().unwrap_err().to_string(),
            "Invalid policy: Unknown item: mustlog, perido"
        );
    }

    #[test]
    fn test_not_an_object() {
        assert!(FieldReader::new(json!([1, 2])).is_err());
    }
}
