use std::{collections::BTreeMap, fmt};

use rhai::{Array, Dynamic, ImmutableString, Map, FLOAT, INT};
use serde::{Deserialize, Serialize};

/// A value crossing the boundary between a script and the host.
///
/// Scripts are dynamically typed; the host only ever sees this closed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum ScriptValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, ScriptValue::Null)
    }

    /// JavaScript truthiness: null, false, 0, NaN and "" are falsy.
    /// Empty lists and maps are truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            ScriptValue::Null => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ScriptValue::String(s) => !s.is_empty(),
            ScriptValue::List(_) | ScriptValue::Map(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::List(_) => "list",
            ScriptValue::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric coercion used by the ordering matchers.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            ScriptValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ScriptValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            ScriptValue::String(s) => Some(s.chars().count()),
            ScriptValue::List(items) => Some(items.len()),
            ScriptValue::Map(entries) => Some(entries.len()),
            _ => None,
        }
    }

    /// Rendering used in matcher messages: strings are quoted so `200` and
    /// `"200"` stay distinguishable.
    pub fn describe(&self) -> String {
        match self {
            ScriptValue::String(s) => format!("{s:?}"),
            ScriptValue::List(items) => render_list(items, ScriptValue::describe),
            ScriptValue::Map(entries) => render_map(entries, ScriptValue::describe),
            other => other.to_string(),
        }
    }

    /// Text stored in an environment: strings verbatim, everything else as JSON.
    pub fn to_env_string(&self) -> String {
        match self {
            ScriptValue::String(s) => s.clone(),
            ScriptValue::Null => String::new(),
            other => serde_json::to_string(&other.to_json()).unwrap_or_default(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            ScriptValue::Null => Value::Null,
            ScriptValue::Bool(b) => Value::Bool(*b),
            ScriptValue::Number(n) => {
                if is_integral(*n) {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            ScriptValue::String(s) => Value::String(s.clone()),
            ScriptValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ScriptValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ScriptValue::Null,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => ScriptValue::String(s.clone()),
            Value::Array(items) => ScriptValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(entries) => ScriptValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn from_dynamic(value: &Dynamic) -> Self {
        let value = value.flatten_clone();
        if value.is_unit() {
            return ScriptValue::Null;
        }
        if let Ok(b) = value.as_bool() {
            return ScriptValue::Bool(b);
        }
        if let Ok(n) = value.as_int() {
            return ScriptValue::Number(n as f64);
        }
        if let Ok(n) = value.as_float() {
            return ScriptValue::Number(n as f64);
        }
        if let Ok(c) = value.as_char() {
            return ScriptValue::String(c.to_string());
        }
        if let Some(s) = value.clone().try_cast::<ImmutableString>() {
            return ScriptValue::String(s.to_string());
        }
        if let Some(items) = value.clone().try_cast::<Array>() {
            return ScriptValue::List(items.iter().map(Self::from_dynamic).collect());
        }
        if let Some(entries) = value.clone().try_cast::<Map>() {
            return ScriptValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), Self::from_dynamic(v)))
                    .collect(),
            );
        }
        ScriptValue::String(value.to_string())
    }

    pub fn into_dynamic(self) -> Dynamic {
        match self {
            ScriptValue::Null => Dynamic::UNIT,
            ScriptValue::Bool(b) => Dynamic::from_bool(b),
            ScriptValue::Number(n) if is_integral(n) => Dynamic::from_int(n as INT),
            ScriptValue::Number(n) => Dynamic::from_float(n as FLOAT),
            ScriptValue::String(s) => Dynamic::from(s),
            ScriptValue::List(items) => {
                Dynamic::from_array(items.into_iter().map(Self::into_dynamic).collect())
            }
            ScriptValue::Map(entries) => Dynamic::from_map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into_dynamic()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ScriptValue {
    /// Console rendering: primitives as-is, containers as `{ k: v }` / `[ a, b ]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Null => f.write_str("null"),
            ScriptValue::Bool(b) => write!(f, "{b}"),
            ScriptValue::Number(n) => f.write_str(&format_number(*n)),
            ScriptValue::String(s) => f.write_str(s),
            ScriptValue::List(items) => f.write_str(&render_list(items, |v| v.to_string())),
            ScriptValue::Map(entries) => f.write_str(&render_map(entries, |v| v.to_string())),
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Number(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Number(value as f64)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if is_integral(n) {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn render_list(items: &[ScriptValue], render: impl Fn(&ScriptValue) -> String) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    let inner = items.iter().map(render).collect::<Vec<_>>().join(", ");
    format!("[ {inner} ]")
}

fn render_map(
    entries: &BTreeMap<String, ScriptValue>,
    render: impl Fn(&ScriptValue) -> String,
) -> String {
    if entries.is_empty() {
        return "{}".to_string();
    }
    let inner = entries
        .iter()
        .map(|(k, v)| format!("{k}: {}", render(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{ {inner} }}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(pairs: &[(&str, ScriptValue)]) -> ScriptValue {
        ScriptValue::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!ScriptValue::Number(0.0).is_truthy());
        assert!(!ScriptValue::from("").is_truthy());
        assert!(!ScriptValue::Bool(false).is_truthy());
        assert!(!ScriptValue::Null.is_truthy());
        assert!(!ScriptValue::Number(f64::NAN).is_truthy());

        assert!(ScriptValue::List(vec![]).is_truthy());
        assert!(map(&[]).is_truthy());
        assert!(ScriptValue::from("0").is_truthy());
        assert!(ScriptValue::Number(-1.5).is_truthy());
    }

    #[test]
    fn display_renders_containers() {
        let value = map(&[
            ("a", ScriptValue::Number(1.0)),
            (
                "b",
                ScriptValue::List(vec![ScriptValue::from("x"), ScriptValue::Bool(true)]),
            ),
        ]);
        assert_eq!(value.to_string(), "{ a: 1, b: [ x, true ] }");
        assert_eq!(ScriptValue::List(vec![]).to_string(), "[]");
        assert_eq!(map(&[]).to_string(), "{}");
        assert_eq!(ScriptValue::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn describe_quotes_strings() {
        assert_eq!(ScriptValue::from("200").describe(), "\"200\"");
        assert_eq!(ScriptValue::Number(200.0).describe(), "200");
        assert_eq!(
            ScriptValue::List(vec![ScriptValue::from("a")]).describe(),
            "[ \"a\" ]"
        );
    }

    #[test]
    fn json_conversion_keeps_shape() {
        let json = serde_json::json!({"id": 7, "tags": ["a", "b"], "ratio": 0.5, "none": null});
        let value = ScriptValue::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn dynamic_conversion_keeps_shape() {
        let value = map(&[
            ("n", ScriptValue::Number(3.0)),
            ("f", ScriptValue::Number(0.25)),
            ("s", ScriptValue::from("text")),
            ("l", ScriptValue::List(vec![ScriptValue::Null])),
        ]);
        let dynamic = value.clone().into_dynamic();
        assert!(dynamic.is::<Map>());
        assert_eq!(ScriptValue::from_dynamic(&dynamic), value);
    }

    #[test]
    fn env_strings_serialize_non_strings_as_json() {
        assert_eq!(ScriptValue::from("plain").to_env_string(), "plain");
        assert_eq!(ScriptValue::Number(42.0).to_env_string(), "42");
        assert_eq!(
            map(&[("a", ScriptValue::Bool(true))]).to_env_string(),
            r#"{"a":true}"#
        );
    }

    #[test]
    fn number_coercion() {
        assert_eq!(ScriptValue::from(" 12.5 ").to_number(), Some(12.5));
        assert_eq!(ScriptValue::Bool(true).to_number(), Some(1.0));
        assert_eq!(ScriptValue::from("abc").to_number(), None);
        assert_eq!(ScriptValue::Null.to_number(), None);
    }
}
