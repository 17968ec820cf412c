// Container parameter bag with %key% interpolation

use crate::Error;
use serde_json::Value;
use std::collections::HashMap;

/// Flat key -> value store for configuration parameters.
///
/// String values may reference other parameters with `%key%` placeholders;
/// `%%` escapes a literal percent sign. Interpolation runs once, eagerly,
/// before the container graph is frozen, so unknown keys and interpolation
/// loops are configuration-time failures.
#[derive(Debug, Clone, Default)]
pub struct ParameterBag {
    parameters: HashMap<String, Value>,
    resolved: bool,
}

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.parameters.insert(key.into(), value);
        self.resolved = false;
    }

    pub fn has(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<&Value, Error> {
        self.parameters
            .get(key)
            .ok_or_else(|| Error::ParameterNotFound(key.to_string()))
    }

    pub fn all(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Interpolate every `%key%` placeholder, replacing the stored values.
    pub fn resolve(&mut self) -> Result<(), Error> {
        let mut resolved = HashMap::new();
        for key in self.parameters.keys() {
            let value = self.resolve_key(key, &mut Vec::new())?;
            resolved.insert(key.clone(), value);
        }
        self.parameters = resolved;
        self.resolved = true;
        Ok(())
    }

    fn resolve_key(&self, key: &str, visiting: &mut Vec<String>) -> Result<Value, Error> {
        if visiting.iter().any(|k| k == key) {
            let mut path = visiting.clone();
            path.push(key.to_string());
            return Err(Error::CircularReference { path });
        }
        let value = self.get(key)?.clone();
        visiting.push(key.to_string());
        let resolved = self.resolve_value(&value, visiting)?;
        visiting.pop();
        Ok(resolved)
    }

    fn resolve_value(&self, value: &Value, visiting: &mut Vec<String>) -> Result<Value, Error> {
        match value {
            Value::String(text) => self.resolve_string(text, visiting),
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, visiting))
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), self.resolve_value(item, visiting)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, text: &str, visiting: &mut Vec<String>) -> Result<Value, Error> {
        // A string that is exactly one placeholder keeps the referenced
        // value's type; anything else concatenates stringified values.
        if text.len() > 2 && text.starts_with('%') && text.ends_with('%') {
            let inner = &text[1..text.len() - 1];
            if !inner.contains('%') {
                return self.resolve_key(inner, visiting);
            }
        }

        let mut out = String::new();
        let mut chars = text.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            if let Some((_, '%')) = chars.peek() {
                chars.next();
                out.push('%');
                continue;
            }
            let key: String = chars
                .by_ref()
                .map(|(_, c)| c)
                .take_while(|&c| c != '%')
                .collect();
            if key.is_empty() || start + key.len() + 1 >= text.len() {
                return Err(Error::Compile(format!(
                    "unterminated `%` in parameter value `{text}`"
                )));
            }
            let value = self.resolve_key(&key, visiting)?;
            match value {
                Value::String(s) => out.push_str(&s),
                Value::Number(n) => out.push_str(&n.to_string()),
                Value::Bool(b) => out.push_str(&b.to_string()),
                other => {
                    return Err(Error::Compile(format!(
                        "parameter `{key}` resolves to a non-scalar value and cannot be \
                         interpolated into `{text}`: {other}"
                    )));
                }
            }
        }
        Ok(Value::String(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_values_pass_through() {
        let mut bag = ParameterBag::new();
        bag.set("debug", json!(true));
        bag.set("pool_size", json!(8));
        bag.resolve().unwrap();

        assert_eq!(bag.get("debug").unwrap(), &json!(true));
        assert_eq!(bag.get("pool_size").unwrap(), &json!(8));
    }

    #[test]
    fn test_interpolation_concatenates() {
        let mut bag = ParameterBag::new();
        bag.set("db.host", json!("localhost"));
        bag.set("db.port", json!(5432));
        bag.set("db.dsn", json!("postgres://%db.host%:%db.port%/app"));
        bag.resolve().unwrap();

        assert_eq!(
            bag.get("db.dsn").unwrap(),
            &json!("postgres://localhost:5432/app")
        );
    }

    #[test]
    fn test_sole_placeholder_preserves_type() {
        let mut bag = ParameterBag::new();
        bag.set("retries", json!(3));
        bag.set("http.retries", json!("%retries%"));
        bag.resolve().unwrap();

        assert_eq!(bag.get("http.retries").unwrap(), &json!(3));
    }

    #[test]
    fn test_nested_interpolation() {
        let mut bag = ParameterBag::new();
        bag.set("env", json!("prod"));
        bag.set("prefix", json!("app-%env%"));
        bag.set("queue", json!("%prefix%-jobs"));
        bag.resolve().unwrap();

        assert_eq!(bag.get("queue").unwrap(), &json!("app-prod-jobs"));
    }

    #[test]
    fn test_percent_escape() {
        let mut bag = ParameterBag::new();
        bag.set("discount", json!("100%% free"));
        bag.resolve().unwrap();

        assert_eq!(bag.get("discount").unwrap(), &json!("100% free"));
    }

    #[test]
    fn test_interpolation_inside_arrays_and_objects() {
        let mut bag = ParameterBag::new();
        bag.set("host", json!("example.org"));
        bag.set("mirrors", json!(["https://%host%/a", "https://%host%/b"]));
        bag.resolve().unwrap();

        assert_eq!(
            bag.get("mirrors").unwrap(),
            &json!(["https://example.org/a", "https://example.org/b"])
        );
    }

    #[test]
    fn test_unknown_key_fails() {
        let mut bag = ParameterBag::new();
        bag.set("dsn", json!("%missing%"));
        assert!(matches!(
            bag.resolve(),
            Err(Error::ParameterNotFound(_))
        ));
    }

    #[test]
    fn test_interpolation_loop_detected() {
        let mut bag = ParameterBag::new();
        bag.set("a", json!("%b%"));
        bag.set("b", json!("%a%"));

        match bag.resolve() {
            Err(Error::CircularReference { path }) => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("expected CircularReference, got {other:?}"),
        }
    }
}
