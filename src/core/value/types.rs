use std::collections::BTreeMap;

/// 数值：整数与浮点分开保存，比较和哈希按数值进行
#[derive(Debug, Clone, Copy)]
pub enum Number64 {
    Int(i64),
    Float(f64),
}

impl Number64 {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number64::Int(i) => *i as f64,
            Number64::Float(f) => *f,
        }
    }

    /// 仅当数值为整数（或整数值的浮点）时返回
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Number64::Int(i) => Some(*i),
            Number64::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(*f as i64),
            Number64::Float(_) => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Number64::Int(_))
    }
}

impl From<i64> for Number64 {
    fn from(value: i64) -> Self {
        Number64::Int(value)
    }
}

impl From<f64> for Number64 {
    fn from(value: f64) -> Self {
        Number64::Float(value)
    }
}

/// 元素类型标签，同时决定跨类型比较时的优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementKind {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Undefined => "undefined",
            ElementKind::Null => "null",
            ElementKind::Bool => "bool",
            ElementKind::Number => "number",
            ElementKind::String => "string",
            ElementKind::Array => "array",
            ElementKind::Object => "object",
        }
    }
}

/// 可移植的结构化元素树
///
/// 续传令牌、查询状态和结果文档都用它表示，与具体序列化库解耦。
/// `Undefined` 表示“字段不存在”，与 `Null` 不同：对象中的 `Undefined`
/// 字段在输出时被省略。
#[derive(Debug, Clone, Default)]
pub enum Element {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(Number64),
    String(String),
    Array(Vec<Element>),
    Object(BTreeMap<String, Element>),
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Undefined => ElementKind::Undefined,
            Element::Null => ElementKind::Null,
            Element::Bool(_) => ElementKind::Bool,
            Element::Number(_) => ElementKind::Number,
            Element::String(_) => ElementKind::String,
            Element::Array(_) => ElementKind::Array,
            Element::Object(_) => ElementKind::Object,
        }
    }

    /// 由键值对构造对象
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Element)>,
    {
        Element::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Element::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Element::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Element::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number64> {
        match self {
            Element::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(|n| n.as_f64())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(|n| n.as_i64())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Element::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Element>> {
        match self {
            Element::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Element>> {
        match self {
            Element::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// 读取对象字段；非对象或字段缺失时返回 `None`
    pub fn get(&self, key: &str) -> Option<&Element> {
        self.as_object().and_then(|fields| fields.get(key))
    }
}

impl From<bool> for Element {
    fn from(value: bool) -> Self {
        Element::Bool(value)
    }
}

impl From<i64> for Element {
    fn from(value: i64) -> Self {
        Element::Number(Number64::Int(value))
    }
}

impl From<i32> for Element {
    fn from(value: i32) -> Self {
        Element::Number(Number64::Int(value as i64))
    }
}

impl From<u64> for Element {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => Element::Number(Number64::Int(i)),
            Err(_) => Element::Number(Number64::Float(value as f64)),
        }
    }
}

impl From<usize> for Element {
    fn from(value: usize) -> Self {
        Element::from(value as u64)
    }
}

impl From<f64> for Element {
    fn from(value: f64) -> Self {
        Element::Number(Number64::Float(value))
    }
}

impl From<Number64> for Element {
    fn from(value: Number64) -> Self {
        Element::Number(value)
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Element::String(value)
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Element::String(value.to_string())
    }
}

impl From<Vec<Element>> for Element {
    fn from(value: Vec<Element>) -> Self {
        Element::Array(value)
    }
}

impl From<BTreeMap<String, Element>> for Element {
    fn from(value: BTreeMap<String, Element>) -> Self {
        Element::Object(value)
    }
}

impl<T: Into<Element>> From<Option<T>> for Element {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Element::Null,
        }
    }
}
