use super::types::{Element, Number64};
use std::cmp::Ordering as CmpOrdering;
use std::hash::{Hash, Hasher};

impl Number64 {
    /// NaN 视为最小，+0.0 与 -0.0 相等
    fn total_cmp_numeric(&self, other: &Self) -> CmpOrdering {
        match (self, other) {
            (Number64::Int(a), Number64::Int(b)) => a.cmp(b),
            _ => {
                let (a, b) = (self.as_f64(), other.as_f64());
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => CmpOrdering::Equal,
                    (true, false) => CmpOrdering::Less,
                    (false, true) => CmpOrdering::Greater,
                    (false, false) => a.partial_cmp(&b).unwrap_or(CmpOrdering::Equal),
                }
            }
        }
    }
}

impl PartialEq for Number64 {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp_numeric(other) == CmpOrdering::Equal
    }
}

impl Eq for Number64 {}

impl PartialOrd for Number64 {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number64 {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.total_cmp_numeric(other)
    }
}

impl Hash for Number64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // 整数与等值浮点必须哈希一致
        let f = self.as_f64();
        if f.is_nan() {
            0x7ff8_0000_0000_0000u64.hash(state);
        } else if f == 0.0 {
            0.0_f64.to_bits().hash(state);
        } else {
            f.to_bits().hash(state);
        }
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Element {}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self, other) {
            (Element::Undefined, Element::Undefined) => CmpOrdering::Equal,
            (Element::Null, Element::Null) => CmpOrdering::Equal,
            (Element::Bool(a), Element::Bool(b)) => a.cmp(b),
            (Element::Number(a), Element::Number(b)) => a.cmp(b),
            (Element::String(a), Element::String(b)) => a.cmp(b),
            (Element::Array(a), Element::Array(b)) => a.cmp(b),
            (Element::Object(a), Element::Object(b)) => a.iter().cmp(b.iter()),
            // 不同类型之间：按类型优先级
            (a, b) => a.kind().cmp(&b.kind()),
        }
    }
}

impl Hash for Element {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Element::Undefined => 0u8.hash(state),
            Element::Null => 1u8.hash(state),
            Element::Bool(b) => {
                2u8.hash(state);
                b.hash(state);
            }
            Element::Number(n) => {
                3u8.hash(state);
                n.hash(state);
            }
            Element::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Element::Array(items) => {
                5u8.hash(state);
                items.hash(state);
            }
            Element::Object(fields) => {
                6u8.hash(state);
                // BTreeMap 已按键排序
                for (k, v) in fields {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}
