//! 聚合器
//!
//! 每个聚合器把各分区返回的局部值合并成全局结果，并能序列化为续传令牌。
//! 局部值的形状：
//! - COUNT / COUNTIF / SUM：数字
//! - AVG：`{"sum": s, "count": c}`
//! - MIN / MAX：原值，或 `{"min"|"max": v, "count": c}`（`count` 为 0 时忽略）
//! - MAKELIST / MAKESET：数组
//!
//! undefined 局部值表示该分区没有可聚合的数据，直接跳过。

use crate::core::error::{QueryError, QueryResult};
use crate::core::value::{required_field, Element, Number64};
use crate::query::continuation::expect_u64;
use crate::query::plan::AggregateOperator;

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregator {
    Average { sum: f64, count: u64 },
    Count(u64),
    CountIf(u64),
    Sum(Number64),
    Min(Option<Element>),
    Max(Option<Element>),
    MakeList(Vec<Element>),
    MakeSet(Vec<Element>),
}

fn invalid(operator: AggregateOperator, partial: &Element) -> QueryError {
    QueryError::InvalidPayload(format!(
        "{} 的局部值类型无效: {}",
        operator.name(),
        partial.kind().name()
    ))
}

fn add_numbers(left: Number64, right: Number64) -> Number64 {
    match (left, right) {
        (Number64::Int(l), Number64::Int(r)) => match l.checked_add(r) {
            Some(sum) => Number64::Int(sum),
            None => Number64::Float(l as f64 + r as f64),
        },
        (l, r) => Number64::Float(l.as_f64() + r.as_f64()),
    }
}

fn count_of(element: &Element) -> Option<u64> {
    element.as_i64().filter(|c| *c >= 0).map(|c| c as u64)
}

impl Aggregator {
    pub fn new(operator: AggregateOperator) -> Self {
        match operator {
            AggregateOperator::Average => Aggregator::Average { sum: 0.0, count: 0 },
            AggregateOperator::Count => Aggregator::Count(0),
            AggregateOperator::CountIf => Aggregator::CountIf(0),
            AggregateOperator::Sum => Aggregator::Sum(Number64::Int(0)),
            AggregateOperator::Min => Aggregator::Min(None),
            AggregateOperator::Max => Aggregator::Max(None),
            AggregateOperator::MakeList => Aggregator::MakeList(Vec::new()),
            AggregateOperator::MakeSet => Aggregator::MakeSet(Vec::new()),
        }
    }

    pub fn operator(&self) -> AggregateOperator {
        match self {
            Aggregator::Average { .. } => AggregateOperator::Average,
            Aggregator::Count(_) => AggregateOperator::Count,
            Aggregator::CountIf(_) => AggregateOperator::CountIf,
            Aggregator::Sum(_) => AggregateOperator::Sum,
            Aggregator::Min(_) => AggregateOperator::Min,
            Aggregator::Max(_) => AggregateOperator::Max,
            Aggregator::MakeList(_) => AggregateOperator::MakeList,
            Aggregator::MakeSet(_) => AggregateOperator::MakeSet,
        }
    }

    /// 合并一个局部值
    pub fn aggregate(&mut self, partial: &Element) -> QueryResult<()> {
        if partial.is_undefined() {
            return Ok(());
        }
        let operator = self.operator();
        match self {
            Aggregator::Count(count) | Aggregator::CountIf(count) => {
                *count += count_of(partial).ok_or_else(|| invalid(operator, partial))?;
            }
            Aggregator::Sum(sum) => {
                let value = partial.as_number().ok_or_else(|| invalid(operator, partial))?;
                *sum = add_numbers(*sum, value);
            }
            Aggregator::Average { sum, count } => {
                let partial_count = partial
                    .get("count")
                    .and_then(count_of)
                    .ok_or_else(|| invalid(operator, partial))?;
                if partial_count == 0 {
                    return Ok(());
                }
                let partial_sum = partial
                    .get("sum")
                    .and_then(Element::as_f64)
                    .ok_or_else(|| invalid(operator, partial))?;
                *sum += partial_sum;
                *count += partial_count;
            }
            Aggregator::Min(current) | Aggregator::Max(current) => {
                let key = if operator == AggregateOperator::Min { "min" } else { "max" };
                let candidate = match partial.as_object() {
                    Some(fields) if fields.contains_key(key) || fields.contains_key("count") => {
                        if fields.get("count").and_then(count_of) == Some(0) {
                            return Ok(());
                        }
                        fields.get(key).cloned().unwrap_or(Element::Undefined)
                    }
                    _ => partial.clone(),
                };
                if candidate.is_undefined() {
                    return Ok(());
                }
                let replace = match current.as_ref() {
                    None => true,
                    Some(existing) if operator == AggregateOperator::Min => candidate < *existing,
                    Some(existing) => candidate > *existing,
                };
                if replace {
                    *current = Some(candidate);
                }
            }
            Aggregator::MakeList(items) => {
                let values = partial.as_array().ok_or_else(|| invalid(operator, partial))?;
                items.extend(values.iter().cloned());
            }
            Aggregator::MakeSet(items) => {
                let values = partial.as_array().ok_or_else(|| invalid(operator, partial))?;
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// 全局结果；没有输入的 AVG / MIN / MAX 为 undefined
    pub fn result(&self) -> Element {
        match self {
            Aggregator::Average { sum, count } => {
                if *count == 0 {
                    Element::Undefined
                } else {
                    Element::from(*sum / *count as f64)
                }
            }
            Aggregator::Count(count) | Aggregator::CountIf(count) => Element::from(*count),
            Aggregator::Sum(sum) => Element::Number(*sum),
            Aggregator::Min(value) | Aggregator::Max(value) => {
                value.clone().unwrap_or(Element::Undefined)
            }
            Aggregator::MakeList(items) | Aggregator::MakeSet(items) => Element::Array(items.clone()),
        }
    }

    pub fn to_token(&self) -> Element {
        match self {
            Aggregator::Average { sum, count } => Element::object([
                ("sum", Element::from(*sum)),
                ("count", Element::from(*count)),
            ]),
            Aggregator::Count(count) | Aggregator::CountIf(count) => Element::from(*count),
            Aggregator::Sum(sum) => Element::Number(*sum),
            Aggregator::Min(value) | Aggregator::Max(value) => match value {
                Some(value) => Element::object([("value", value.clone())]),
                None => Element::Null,
            },
            Aggregator::MakeList(items) | Aggregator::MakeSet(items) => Element::Array(items.clone()),
        }
    }

    pub fn from_token(operator: AggregateOperator, token: &Element) -> QueryResult<Self> {
        let malformed = || {
            QueryError::malformed(format!(
                "{} 聚合令牌无效: {}",
                operator.name(),
                token.kind().name()
            ))
        };
        let aggregator = match operator {
            AggregateOperator::Average => {
                let sum = required_field(token, "sum", "average token")?
                    .as_f64()
                    .ok_or_else(malformed)?;
                let count = expect_u64(required_field(token, "count", "average token")?, "count")?;
                Aggregator::Average { sum, count }
            }
            AggregateOperator::Count => Aggregator::Count(expect_u64(token, "count")?),
            AggregateOperator::CountIf => Aggregator::CountIf(expect_u64(token, "countif")?),
            AggregateOperator::Sum => Aggregator::Sum(token.as_number().ok_or_else(malformed)?),
            AggregateOperator::Min | AggregateOperator::Max => {
                let value = match token {
                    Element::Null => None,
                    other => Some(required_field(other, "value", "min/max token")?.clone()),
                };
                if operator == AggregateOperator::Min {
                    Aggregator::Min(value)
                } else {
                    Aggregator::Max(value)
                }
            }
            AggregateOperator::MakeList => {
                Aggregator::MakeList(token.as_array().ok_or_else(malformed)?.clone())
            }
            AggregateOperator::MakeSet => {
                Aggregator::MakeSet(token.as_array().ok_or_else(malformed)?.clone())
            }
        };
        Ok(aggregator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fold(operator: AggregateOperator, partials: serde_json::Value) -> Aggregator {
        let mut aggregator = Aggregator::new(operator);
        for partial in partials.as_array().cloned().unwrap_or_default() {
            aggregator
                .aggregate(&Element::from(partial))
                .expect("partial should be accepted");
        }
        aggregator
    }

    #[test]
    fn test_count_and_sum() {
        assert_eq!(fold(AggregateOperator::Count, json!([2, 3, 0])).result(), Element::from(5));
        assert_eq!(fold(AggregateOperator::Sum, json!([1, 2])).result(), Element::from(3));
        assert_eq!(fold(AggregateOperator::Sum, json!([1, 2.5])).result(), Element::from(3.5));
        // 空输入
        assert_eq!(fold(AggregateOperator::Sum, json!([])).result(), Element::from(0));
        assert_eq!(fold(AggregateOperator::Count, json!([])).result(), Element::from(0));
    }

    #[test]
    fn test_average_weights_by_count() {
        let avg = fold(
            AggregateOperator::Average,
            json!([{"sum": 10, "count": 4}, {"sum": 2, "count": 2}, {"sum": null, "count": 0}]),
        );
        assert_eq!(avg.result(), Element::from(2.0));
        assert!(fold(AggregateOperator::Average, json!([])).result().is_undefined());
    }

    #[test]
    fn test_min_max_accept_both_partial_shapes() {
        let min = fold(AggregateOperator::Min, json!([5, {"min": 2, "count": 1}, {"min": -9, "count": 0}]));
        assert_eq!(min.result(), Element::from(2));
        let max = fold(AggregateOperator::Max, json!(["a", "c", "b"]));
        assert_eq!(max.result(), Element::from("c"));
        assert!(fold(AggregateOperator::Max, json!([])).result().is_undefined());
    }

    #[test]
    fn test_make_set_deduplicates_across_partials() {
        let set = fold(AggregateOperator::MakeSet, json!([[1, 2], [2, 3]]));
        assert_eq!(set.result().to_json(), json!([1, 2, 3]));
        let list = fold(AggregateOperator::MakeList, json!([[1, 2], [2]]));
        assert_eq!(list.result().to_json(), json!([1, 2, 2]));
    }

    #[test]
    fn test_invalid_partial_is_rejected() {
        let mut count = Aggregator::new(AggregateOperator::Count);
        let err = count.aggregate(&Element::from("three")).expect_err("string count");
        assert!(matches!(err, QueryError::InvalidPayload(_)));
    }

    #[test]
    fn test_token_round_trip_preserves_state() {
        for aggregator in [
            fold(AggregateOperator::Average, json!([{"sum": 3, "count": 2}])),
            fold(AggregateOperator::Min, json!([4, 1])),
            Aggregator::new(AggregateOperator::Max),
            fold(AggregateOperator::MakeSet, json!([["x"]])),
        ] {
            let restored = Aggregator::from_token(aggregator.operator(), &aggregator.to_token())
                .expect("token should parse");
            assert_eq!(restored, aggregator);
        }
    }

    #[test]
    fn test_token_of_wrong_kind_is_malformed() {
        let err = Aggregator::from_token(AggregateOperator::Sum, &Element::from("1"))
            .expect_err("string sum");
        assert!(err.is_malformed_continuation());
    }
}
