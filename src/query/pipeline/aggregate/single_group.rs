//! 单个分组的聚合状态
//!
//! SELECT VALUE 形式只有一个值；SELECT 列表形式按别名各有一个值。每个值要么是
//! 聚合（合并局部值），要么是标量（分组键本身，取第一次出现的值）。

use super::aggregators::Aggregator;
use crate::core::error::{QueryError, QueryResult};
use crate::core::value::{required_field, Element};
use crate::query::plan::{AggregateOperator, QueryInfo};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateValue {
    Aggregate(Aggregator),
    Scalar { initialized: bool, value: Element },
}

/// 去掉 `{"item": x}` 包装；`{}` 表示 undefined
fn unwrap_item(partial: &Element) -> Element {
    match partial.as_object() {
        Some(fields) if fields.is_empty() => Element::Undefined,
        Some(fields) if fields.len() == 1 && fields.contains_key("item") => {
            fields.get("item").cloned().unwrap_or(Element::Undefined)
        }
        _ => partial.clone(),
    }
}

fn wrap_item(value: &Element) -> Element {
    if value.is_undefined() {
        Element::object(Vec::<(String, Element)>::new())
    } else {
        Element::object([("item", value.clone())])
    }
}

impl AggregateValue {
    pub fn new(operator: Option<AggregateOperator>) -> Self {
        match operator {
            Some(operator) => AggregateValue::Aggregate(Aggregator::new(operator)),
            None => AggregateValue::Scalar {
                initialized: false,
                value: Element::Undefined,
            },
        }
    }

    pub fn add(&mut self, partial: &Element) -> QueryResult<()> {
        match self {
            AggregateValue::Aggregate(aggregator) => aggregator.aggregate(&unwrap_item(partial)),
            AggregateValue::Scalar { initialized, value } => {
                if !*initialized {
                    *value = partial.clone();
                    *initialized = true;
                }
                Ok(())
            }
        }
    }

    pub fn result(&self) -> Element {
        match self {
            AggregateValue::Aggregate(aggregator) => aggregator.result(),
            AggregateValue::Scalar { value, .. } => value.clone(),
        }
    }

    pub fn to_token(&self) -> Element {
        match self {
            AggregateValue::Aggregate(aggregator) => aggregator.to_token(),
            AggregateValue::Scalar { initialized, value } => Element::object([
                ("initialized", Element::from(*initialized)),
                ("value", wrap_item(value)),
            ]),
        }
    }

    pub fn from_token(operator: Option<AggregateOperator>, token: &Element) -> QueryResult<Self> {
        match operator {
            Some(operator) => Ok(AggregateValue::Aggregate(Aggregator::from_token(operator, token)?)),
            None => {
                let initialized = required_field(token, "initialized", "scalar token")?
                    .as_bool()
                    .ok_or_else(|| QueryError::malformed("scalar token 的 initialized 应为布尔值"))?;
                let value = required_field(token, "value", "scalar token")?;
                if value.as_object().is_none() {
                    return Err(QueryError::malformed("scalar token 的 value 应为 {\"item\": v} 或 {}"));
                }
                Ok(AggregateValue::Scalar {
                    initialized,
                    value: unwrap_item(value),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SingleGroupAggregator {
    SelectValue(AggregateValue),
    SelectList(BTreeMap<String, AggregateValue>),
}

impl SingleGroupAggregator {
    pub fn new(query_info: &QueryInfo) -> Self {
        if query_info.has_select_value {
            let operator = query_info.aggregates.first().copied();
            return SingleGroupAggregator::SelectValue(AggregateValue::new(operator));
        }
        SingleGroupAggregator::SelectList(
            Self::aliases(query_info)
                .into_iter()
                .map(|(alias, operator)| (alias, AggregateValue::new(operator)))
                .collect(),
        )
    }

    fn aliases(query_info: &QueryInfo) -> Vec<(String, Option<AggregateOperator>)> {
        query_info
            .group_by_alias_to_aggregate_type
            .iter()
            .map(|(alias, operator)| (alias.clone(), *operator))
            .collect()
    }

    /// 合并一行局部结果；SELECT 列表形式的行必须是对象
    pub fn add_values(&mut self, payload: &Element) -> QueryResult<()> {
        match self {
            SingleGroupAggregator::SelectValue(value) => value.add(payload),
            SingleGroupAggregator::SelectList(values) => {
                let fields = payload.as_object().ok_or_else(|| {
                    QueryError::InvalidPayload(format!(
                        "聚合行应为对象，实际为 {}",
                        payload.kind().name()
                    ))
                })?;
                for (alias, value) in values.iter_mut() {
                    value.add(fields.get(alias).unwrap_or(&Element::Undefined))?;
                }
                Ok(())
            }
        }
    }

    /// 最终结果；SELECT 列表中 undefined 的别名不出现在结果里
    pub fn result(&self) -> Element {
        match self {
            SingleGroupAggregator::SelectValue(value) => value.result(),
            SingleGroupAggregator::SelectList(values) => Element::Object(
                values
                    .iter()
                    .map(|(alias, value)| (alias.clone(), value.result()))
                    .filter(|(_, result)| !result.is_undefined())
                    .collect(),
            ),
        }
    }

    pub fn to_token(&self) -> Element {
        match self {
            SingleGroupAggregator::SelectValue(value) => value.to_token(),
            SingleGroupAggregator::SelectList(values) => Element::Object(
                values
                    .iter()
                    .map(|(alias, value)| (alias.clone(), value.to_token()))
                    .collect(),
            ),
        }
    }

    pub fn from_token(query_info: &QueryInfo, token: &Element) -> QueryResult<Self> {
        if query_info.has_select_value {
            let operator = query_info.aggregates.first().copied();
            return Ok(SingleGroupAggregator::SelectValue(AggregateValue::from_token(
                operator, token,
            )?));
        }
        let mut values = BTreeMap::new();
        for (alias, operator) in Self::aliases(query_info) {
            let value = AggregateValue::from_token(operator, required_field(token, &alias, "aggregate token")?)?;
            values.insert(alias, value);
        }
        Ok(SingleGroupAggregator::SelectList(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn select_list_info() -> QueryInfo {
        let mut info = QueryInfo::default();
        info.aggregates = vec![AggregateOperator::Count, AggregateOperator::Max];
        info.group_by_alias_to_aggregate_type.insert("pk".to_string(), None);
        info.group_by_alias_to_aggregate_type
            .insert("count".to_string(), Some(AggregateOperator::Count));
        info.group_by_alias_to_aggregate_type
            .insert("top".to_string(), Some(AggregateOperator::Max));
        info
    }

    #[test]
    fn test_select_list_folds_per_alias() {
        let mut group = SingleGroupAggregator::new(&select_list_info());
        group
            .add_values(&Element::from(json!({"pk": "x", "count": {"item": 2}, "top": {}})))
            .expect("first row");
        group
            .add_values(&Element::from(json!({"pk": "x", "count": {"item": 1}, "top": {"item": 7}})))
            .expect("second row");
        assert_eq!(group.result().to_json(), json!({"pk": "x", "count": 3, "top": 7}));
    }

    #[test]
    fn test_undefined_aliases_are_omitted() {
        let group = SingleGroupAggregator::new(&select_list_info());
        // 没有任何输入：MAX 为 undefined，分组键未初始化
        assert_eq!(group.result().to_json(), json!({"count": 0}));
    }

    #[test]
    fn test_select_value_scalar_keeps_first_value() {
        let info = QueryInfo {
            has_select_value: true,
            ..Default::default()
        };
        let mut group = SingleGroupAggregator::new(&info);
        group.add_values(&Element::from("a")).expect("first");
        group.add_values(&Element::from("b")).expect("second");
        assert_eq!(group.result(), Element::from("a"));
    }

    #[test]
    fn test_token_round_trip() {
        let info = select_list_info();
        let mut group = SingleGroupAggregator::new(&info);
        group
            .add_values(&Element::from(json!({"pk": "y", "count": {"item": 4}, "top": {"item": 1}})))
            .expect("row");
        let restored = SingleGroupAggregator::from_token(&info, &group.to_token()).expect("token");
        assert_eq!(restored.result(), group.result());
    }

    #[test]
    fn test_select_list_rejects_non_object_rows() {
        let mut group = SingleGroupAggregator::new(&select_list_info());
        assert!(group.add_values(&Element::from(3)).is_err());
    }
}
