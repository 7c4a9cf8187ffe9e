//! 分区内的查询投影
//!
//! 模拟后端对改写后查询的执行：把一批文档投影为排序行、局部聚合行或分组行。

use crate::core::value::{Element, Number64};
use crate::query::continuation::order_by::wrap_items;
use crate::query::plan::{AggregateOperator, SortOrder};
use std::collections::BTreeMap;

/// 一个带别名的聚合
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub alias: String,
    pub operator: AggregateOperator,
    /// 聚合的字段路径（`a.b`），COUNT(1) 为 `None`
    pub field: Option<String>,
}

impl AggregateSpec {
    pub fn new(alias: impl Into<String>, operator: AggregateOperator, field: Option<&str>) -> Self {
        Self {
            alias: alias.into(),
            operator,
            field: field.map(str::to_string),
        }
    }
}

/// 后端对某条查询文本的执行方式
#[derive(Debug, Clone, PartialEq)]
pub enum RowProjection {
    /// 原样返回文档
    Documents,
    /// `{"orderByItems", "payload", "_rid"}`
    OrderBy { fields: Vec<(String, SortOrder)> },
    /// SELECT VALUE 单个聚合：`[{"item": 局部值}]`
    AggregateValue(AggregateSpec),
    /// SELECT 列表聚合：`{别名: {"item": 局部值}}`
    AggregateList(Vec<AggregateSpec>),
    /// `{"groupByItems", "payload"}`；`keys` 为 (别名, 字段路径)
    GroupBy {
        keys: Vec<(String, String)>,
        aggregates: Vec<AggregateSpec>,
        select_value: bool,
    },
}

impl RowProjection {
    pub fn order_by(fields: &[(&str, SortOrder)]) -> Self {
        RowProjection::OrderBy {
            fields: fields.iter().map(|(f, o)| (f.to_string(), *o)).collect(),
        }
    }

    /// 整页处理（聚合、分组）还是逐行处理
    pub fn is_per_chunk(&self) -> bool {
        matches!(
            self,
            RowProjection::AggregateValue(_)
                | RowProjection::AggregateList(_)
                | RowProjection::GroupBy { .. }
        )
    }

    pub fn sort_orders(&self) -> Vec<SortOrder> {
        match self {
            RowProjection::OrderBy { fields } => fields.iter().map(|(_, o)| *o).collect(),
            _ => Vec::new(),
        }
    }

    pub fn order_by_items(&self, document: &Element) -> Vec<Element> {
        match self {
            RowProjection::OrderBy { fields } => {
                fields.iter().map(|(f, _)| select_field(document, f)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// 投影一批已排序的文档 (rid, 文档)
    pub fn project(&self, chunk: &[(String, Element)]) -> Vec<Element> {
        match self {
            RowProjection::Documents => chunk.iter().map(|(_, doc)| doc.clone()).collect(),
            RowProjection::OrderBy { .. } => chunk
                .iter()
                .map(|(rid, doc)| {
                    Element::object([
                        ("orderByItems", wrap_items(&self.order_by_items(doc))),
                        ("payload", doc.clone()),
                        ("_rid", Element::from(rid.as_str())),
                    ])
                })
                .collect(),
            RowProjection::AggregateValue(spec) => {
                let docs: Vec<&Element> = chunk.iter().map(|(_, d)| d).collect();
                vec![Element::Array(vec![wrap_item(partial_aggregate(spec, &docs))])]
            }
            RowProjection::AggregateList(specs) => {
                let docs: Vec<&Element> = chunk.iter().map(|(_, d)| d).collect();
                vec![Element::Object(
                    specs
                        .iter()
                        .map(|spec| (spec.alias.clone(), wrap_item(partial_aggregate(spec, &docs))))
                        .collect(),
                )]
            }
            RowProjection::GroupBy {
                keys,
                aggregates,
                select_value,
            } => {
                let mut groups: BTreeMap<String, (Vec<Element>, Vec<&Element>)> = BTreeMap::new();
                for (_, doc) in chunk {
                    let values: Vec<Element> = keys.iter().map(|(_, f)| select_field(doc, f)).collect();
                    let key = Element::Array(values.clone()).to_canonical_string();
                    groups.entry(key).or_insert_with(|| (values, Vec::new())).1.push(doc);
                }
                groups
                    .into_values()
                    .map(|(values, docs)| {
                        let payload = if *select_value {
                            match aggregates.first() {
                                Some(spec) => wrap_item(partial_aggregate(spec, &docs)),
                                None => values.first().cloned().unwrap_or(Element::Undefined),
                            }
                        } else {
                            let mut fields = BTreeMap::new();
                            for ((alias, _), value) in keys.iter().zip(values.iter()) {
                                fields.insert(alias.clone(), value.clone());
                            }
                            for spec in aggregates {
                                fields.insert(spec.alias.clone(), wrap_item(partial_aggregate(spec, &docs)));
                            }
                            Element::Object(fields)
                        };
                        Element::object([
                            ("groupByItems", wrap_items(&values)),
                            ("payload", payload),
                        ])
                    })
                    .collect()
            }
        }
    }
}

pub fn select_field(document: &Element, path: &str) -> Element {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    document.select_path(&segments)
}

fn wrap_item(value: Element) -> Element {
    if value.is_undefined() {
        Element::object(Vec::<(String, Element)>::new())
    } else {
        Element::object([("item", value)])
    }
}

fn sum_numbers<'a>(values: impl Iterator<Item = &'a Element>) -> Number64 {
    let mut int_sum: i64 = 0;
    let mut float_sum: f64 = 0.0;
    let mut all_int = true;
    for n in values.filter_map(Element::as_number) {
        match n {
            Number64::Int(i) if all_int => match int_sum.checked_add(i) {
                Some(s) => int_sum = s,
                None => {
                    all_int = false;
                    float_sum = int_sum as f64 + i as f64;
                }
            },
            other => {
                if all_int {
                    all_int = false;
                    float_sum = int_sum as f64;
                }
                float_sum += other.as_f64();
            }
        }
    }
    if all_int {
        Number64::Int(int_sum)
    } else {
        Number64::Float(float_sum)
    }
}

/// 一批文档上的局部聚合值
pub fn partial_aggregate(spec: &AggregateSpec, docs: &[&Element]) -> Element {
    let values: Vec<Element> = match &spec.field {
        Some(field) => docs
            .iter()
            .map(|d| select_field(d, field))
            .filter(|v| !v.is_undefined())
            .collect(),
        None => docs.iter().map(|_| Element::from(1)).collect(),
    };
    match spec.operator {
        AggregateOperator::Count => Element::from(values.len()),
        AggregateOperator::CountIf => {
            Element::from(values.iter().filter(|v| v.as_bool() == Some(true)).count())
        }
        AggregateOperator::Sum => Element::Number(sum_numbers(values.iter())),
        AggregateOperator::Average => {
            let numbers: Vec<&Element> = values.iter().filter(|v| v.as_number().is_some()).collect();
            Element::object([
                ("sum", Element::Number(sum_numbers(numbers.iter().copied()))),
                ("count", Element::from(numbers.len())),
            ])
        }
        AggregateOperator::Min => values.iter().min().cloned().unwrap_or(Element::Undefined),
        AggregateOperator::Max => values.iter().max().cloned().unwrap_or(Element::Undefined),
        AggregateOperator::MakeList => Element::Array(values),
        AggregateOperator::MakeSet => {
            let mut unique: Vec<Element> = Vec::new();
            for v in values {
                if !unique.contains(&v) {
                    unique.push(v);
                }
            }
            Element::Array(unique)
        }
    }
}
