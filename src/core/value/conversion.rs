use super::types::{Element, Number64};
use crate::core::error::{QueryError, QueryResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Write as _;

impl From<serde_json::Value> for Element {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Element::Null,
            serde_json::Value::Bool(b) => Element::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Element::Number(Number64::Int(i))
                } else {
                    Element::Number(Number64::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Element::String(s),
            serde_json::Value::Array(items) => {
                Element::Array(items.into_iter().map(Element::from).collect())
            }
            serde_json::Value::Object(fields) => Element::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Element::from(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
}

impl Element {
    /// 转为 JSON。对象中的 `Undefined` 字段被省略，数组中的 `Undefined` 写为 null，
    /// 非有限浮点写为 null。
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Element::Undefined | Element::Null => serde_json::Value::Null,
            Element::Bool(b) => serde_json::Value::Bool(*b),
            Element::Number(Number64::Int(i)) => serde_json::Value::from(*i),
            Element::Number(Number64::Float(f)) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Element::String(s) => serde_json::Value::String(s.clone()),
            Element::Array(items) => {
                serde_json::Value::Array(items.iter().map(Element::to_json).collect())
            }
            Element::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// 序列化为紧凑 JSON 字符串
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// 从 JSON 字符串解析
    pub fn parse(text: &str) -> QueryResult<Element> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(Element::from(value))
    }

    /// 规范化字符串：对象键有序，整数值浮点写成整数，`Undefined` 写为 `undefined`。
    /// 用作分组键和去重键，相等的元素得到相同的字符串。
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Element::Undefined => out.push_str("undefined"),
            Element::Null => out.push_str("null"),
            Element::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Element::Number(n) => match n.as_i64() {
                Some(i) => {
                    let _ = write!(out, "{}", i);
                }
                None => {
                    let f = n.as_f64();
                    if f.is_nan() {
                        out.push_str("NaN");
                    } else {
                        let _ = write!(out, "{:?}", f);
                    }
                }
            },
            Element::String(s) => out.push_str(&serde_json::Value::String(s.clone()).to_string()),
            Element::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            Element::Object(fields) => {
                out.push('{');
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::Value::String(k.clone()).to_string());
                    out.push(':');
                    v.write_canonical(out);
                }
                out.push('}');
            }
        }
    }

    /// 按字段路径读取，路径任一段缺失返回 `Undefined`
    pub fn select_path(&self, path: &[&str]) -> Element {
        let mut current = self;
        for segment in path {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Element::Undefined,
            }
        }
        current.clone()
    }
}

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Element {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Element::from)
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

/// 读取必填字段，缺失时报续传令牌格式错误
pub(crate) fn required_field<'a>(
    element: &'a Element,
    field: &str,
    context: &str,
) -> QueryResult<&'a Element> {
    let fields = element.as_object().ok_or_else(|| {
        QueryError::malformed(format!(
            "{} 应为对象，实际为 {}",
            context,
            element.kind().name()
        ))
    })?;
    fields
        .get(field)
        .ok_or_else(|| QueryError::malformed(format!("{} 缺少字段 '{}'", context, field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion_keeps_integers() {
        let element = Element::from(json!({"pk": "x", "count": 3, "avg": 1.5}));
        assert_eq!(element.get("count").and_then(Element::as_i64), Some(3));
        assert_eq!(element.to_json(), json!({"pk": "x", "count": 3, "avg": 1.5}));
    }

    #[test]
    fn test_undefined_fields_are_omitted() {
        let element = Element::object([("a", Element::from(1)), ("b", Element::Undefined)]);
        assert_eq!(element.to_json(), json!({"a": 1}));
        let array = Element::Array(vec![Element::Undefined]);
        assert_eq!(array.to_json(), json!([null]));
    }

    #[test]
    fn test_canonical_string_normalizes_numbers() {
        let a = Element::Array(vec![Element::from(3), Element::from("x")]);
        let b = Element::Array(vec![Element::from(3.0), Element::from("x")]);
        assert_eq!(a.to_canonical_string(), b.to_canonical_string());
        assert_eq!(a.to_canonical_string(), "[3,\"x\"]");
        assert_ne!(
            Element::Undefined.to_canonical_string(),
            Element::Null.to_canonical_string()
        );
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = Element::parse("{oops").expect_err("invalid json should fail");
        assert!(matches!(err, QueryError::Serialization(_)));
    }

    #[test]
    fn test_required_field() {
        let element = Element::from(json!({"range": {"min": ""}}));
        assert!(required_field(&element, "range", "token").is_ok());
        let err = required_field(&element, "token", "token").expect_err("missing field");
        assert!(err.is_malformed_continuation());
        let err = required_field(&Element::from(1), "x", "token").expect_err("wrong kind");
        assert!(err.is_malformed_continuation());
    }

    #[test]
    fn test_select_path() {
        let element = Element::from(json!({"a": {"b": 7}}));
        assert_eq!(element.select_path(&["a", "b"]), Element::from(7));
        assert!(element.select_path(&["a", "c"]).is_undefined());
    }
}
