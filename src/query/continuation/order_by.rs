use super::parallel::ParallelContinuationToken;
use super::{expect_str, expect_u64, ContinuationToken};
use crate::core::error::{QueryError, QueryResult};
use crate::core::value::{required_field, Element};

/// 某个子范围中最后一条已输出行的位置
///
/// 恢复时重新取回页起始状态对应的页，丢弃排在该位置之前（含）的行。
/// 过滤基于值而不是偏移量，因此范围拆分后子范围可以直接继承。
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    pub order_by_items: Vec<Element>,
    pub rid: String,
    /// 与该位置完全相同（排序值与 rid 都相等）的已输出行数
    pub skip_count: u64,
}

/// 排序查询中单个子范围的令牌
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByContinuationToken {
    pub composite: ParallelContinuationToken,
    pub resume: Option<ResumePoint>,
}

/// `{"item": v}` 包装；`Undefined` 写成 `{}`，与 null 区分
pub(crate) fn wrap_items(items: &[Element]) -> Element {
    Element::Array(
        items
            .iter()
            .map(|item| match item {
                Element::Undefined => Element::object(Vec::<(String, Element)>::new()),
                other => Element::object([("item", other.clone())]),
            })
            .collect(),
    )
}

pub(crate) fn unwrap_items(element: &Element) -> QueryResult<Vec<Element>> {
    let items = element
        .as_array()
        .ok_or_else(|| QueryError::malformed("orderByItems 应为数组"))?;
    items
        .iter()
        .map(|wrapped| {
            let fields = wrapped
                .as_object()
                .ok_or_else(|| QueryError::malformed("orderByItems 元素应为对象"))?;
            Ok(fields.get("item").cloned().unwrap_or(Element::Undefined))
        })
        .collect()
}

impl ContinuationToken for OrderByContinuationToken {
    fn to_element(&self) -> Element {
        let (items, rid, skip) = match &self.resume {
            Some(point) => (
                wrap_items(&point.order_by_items),
                Element::from(point.rid.as_str()),
                Element::from(point.skip_count),
            ),
            None => (Element::Null, Element::Null, Element::from(0)),
        };
        Element::object([
            ("compositeToken", self.composite.to_element()),
            ("orderByItems", items),
            ("rid", rid),
            ("skipCount", skip),
        ])
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        const CONTEXT: &str = "order by continuation";
        let composite =
            ParallelContinuationToken::parse(required_field(element, "compositeToken", CONTEXT)?)?;
        let items = required_field(element, "orderByItems", CONTEXT)?;
        let rid = required_field(element, "rid", CONTEXT)?;
        let skip_count = expect_u64(required_field(element, "skipCount", CONTEXT)?, "skipCount")?;

        let resume = match (items, rid) {
            (Element::Null, Element::Null) => None,
            (Element::Null, _) | (_, Element::Null) => {
                return Err(QueryError::malformed(
                    "orderByItems 与 rid 必须同时为 null 或同时存在",
                ))
            }
            (items, rid) => {
                let order_by_items = unwrap_items(items)?;
                if order_by_items.is_empty() {
                    return Err(QueryError::malformed("orderByItems 不能为空"));
                }
                Some(ResumePoint {
                    order_by_items,
                    rid: expect_str(rid, "rid")?.to_string(),
                    skip_count,
                })
            }
        };

        Ok(Self { composite, resume })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::page::QueryState;
    use crate::routing::FeedRange;
    use serde_json::json;

    fn sample() -> OrderByContinuationToken {
        OrderByContinuationToken {
            composite: ParallelContinuationToken::new(
                Some(QueryState::new("page-3")),
                FeedRange::new("", "80").expect("range"),
            ),
            resume: Some(ResumePoint {
                order_by_items: vec![Element::from(5), Element::Undefined],
                rid: "00000012".to_string(),
                skip_count: 1,
            }),
        }
    }

    #[test]
    fn test_wire_shape() {
        assert_eq!(
            sample().to_element().to_json(),
            json!({
                "compositeToken": {"token": "page-3", "range": {"min": "", "max": "80"}},
                "orderByItems": [{"item": 5}, {}],
                "rid": "00000012",
                "skipCount": 1
            })
        );
    }

    #[test]
    fn test_undefined_item_survives_string_round_trip() {
        let text = sample().to_element().to_json_string();
        let parsed = OrderByContinuationToken::parse(&Element::parse(&text).expect("json"))
            .expect("should parse");
        assert_eq!(parsed, sample());
        let resume = parsed.resume.expect("resume point");
        assert!(resume.order_by_items[1].is_undefined());
    }

    #[test]
    fn test_inconsistent_resume_fields_are_malformed() {
        let bad = json!({
            "compositeToken": {"token": null, "range": {"min": "", "max": "FF"}},
            "orderByItems": null,
            "rid": "0001",
            "skipCount": 0
        });
        let err = OrderByContinuationToken::parse(&Element::from(bad)).expect_err("malformed");
        assert!(err.is_malformed_continuation());

        let missing_skip = json!({
            "compositeToken": {"token": null, "range": {"min": "", "max": "FF"}},
            "orderByItems": null,
            "rid": null
        });
        assert!(OrderByContinuationToken::parse(&Element::from(missing_skip)).is_err());
    }
}
