//! 两阶段（排空 -> 输出）阶段的令牌

use super::ContinuationToken;
use crate::core::error::{QueryError, QueryResult};
use crate::core::value::{required_field, Element};
use crate::query::page::QueryState;

/// 分组/聚合阶段的来源进度
///
/// 显式三态，取代魔法字符串：外部传入的字符串 `"DONE"` 只会被当作格式错误。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SourcePhase {
    #[default]
    NotStarted,
    /// 来源尚未耗尽，携带来源的续传状态
    Draining(QueryState),
    /// 来源已耗尽，只剩输出分组表
    Done,
}

impl SourcePhase {
    pub fn is_done(&self) -> bool {
        matches!(self, SourcePhase::Done)
    }

    /// 来源阶段恢复所用的状态
    pub fn source_state(&self) -> Option<&QueryState> {
        match self {
            SourcePhase::Draining(state) => Some(state),
            _ => None,
        }
    }

    /// 根据来源页状态推进
    pub fn advance(state: Option<QueryState>) -> Self {
        match state {
            Some(state) => SourcePhase::Draining(state),
            None => SourcePhase::Done,
        }
    }
}

impl ContinuationToken for SourcePhase {
    fn to_element(&self) -> Element {
        match self {
            SourcePhase::NotStarted => Element::object([("Phase", Element::from("NotStarted"))]),
            SourcePhase::Draining(state) => Element::object([
                ("Phase", Element::from("Draining")),
                ("Token", state.value().clone()),
            ]),
            SourcePhase::Done => Element::object([("Phase", Element::from("Done"))]),
        }
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        if let Element::String(text) = element {
            return Err(QueryError::malformed(format!(
                "SourceToken 不接受字符串值 '{}'",
                text
            )));
        }
        let phase = required_field(element, "Phase", "SourceToken")?
            .as_str()
            .ok_or_else(|| QueryError::malformed("SourceToken.Phase 应为字符串"))?;
        match phase {
            "NotStarted" => Ok(SourcePhase::NotStarted),
            "Done" => Ok(SourcePhase::Done),
            "Draining" => {
                let token = required_field(element, "Token", "SourceToken")?;
                if token.is_null() {
                    return Err(QueryError::malformed("Draining 阶段的 Token 不能为 null"));
                }
                Ok(SourcePhase::Draining(QueryState::new(token.clone())))
            }
            other => Err(QueryError::malformed(format!("未知的 SourceToken 阶段 '{}'", other))),
        }
    }
}

/// `{"SourceToken": <phase>, "GroupingTableContinuationToken": {<key>: <aggregator>}}`
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByContinuationToken {
    pub source: SourcePhase,
    pub grouping_table: Element,
}

impl ContinuationToken for GroupByContinuationToken {
    fn to_element(&self) -> Element {
        Element::object([
            ("SourceToken", self.source.to_element()),
            ("GroupingTableContinuationToken", self.grouping_table.clone()),
        ])
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        const CONTEXT: &str = "group by continuation";
        let source = SourcePhase::parse(required_field(element, "SourceToken", CONTEXT)?)?;
        let grouping_table = required_field(element, "GroupingTableContinuationToken", CONTEXT)?;
        if grouping_table.as_object().is_none() {
            return Err(QueryError::malformed("GroupingTableContinuationToken 应为对象"));
        }
        Ok(Self {
            source,
            grouping_table: grouping_table.clone(),
        })
    }
}

/// `{"SourceToken": <phase>, "AggregationToken": <aggregator>}`
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateContinuationToken {
    pub source: SourcePhase,
    pub aggregation: Element,
}

impl ContinuationToken for AggregateContinuationToken {
    fn to_element(&self) -> Element {
        Element::object([
            ("SourceToken", self.source.to_element()),
            ("AggregationToken", self.aggregation.clone()),
        ])
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        const CONTEXT: &str = "aggregate continuation";
        let source = SourcePhase::parse(required_field(element, "SourceToken", CONTEXT)?)?;
        let aggregation = required_field(element, "AggregationToken", CONTEXT)?.clone();
        Ok(Self {
            source,
            aggregation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_done_sentinel_string_is_malformed() {
        let element = Element::from(json!({
            "SourceToken": "DONE",
            "GroupingTableContinuationToken": {}
        }));
        let err = GroupByContinuationToken::parse(&element).expect_err("magic string rejected");
        assert!(err.is_malformed_continuation());
    }

    #[test]
    fn test_phase_round_trip() {
        for phase in [
            SourcePhase::NotStarted,
            SourcePhase::Done,
            SourcePhase::Draining(QueryState::new(Element::from(json!([{"token": null}])))),
        ] {
            let parsed = SourcePhase::parse(&phase.to_element()).expect("round trip");
            assert_eq!(parsed, phase);
        }
    }

    #[test]
    fn test_unknown_phase_and_null_token() {
        let unknown = Element::from(json!({"Phase": "Emitting"}));
        assert!(SourcePhase::parse(&unknown).is_err());
        let null_token = Element::from(json!({"Phase": "Draining", "Token": null}));
        assert!(SourcePhase::parse(&null_token).is_err());
    }

    #[test]
    fn test_grouping_table_must_be_object() {
        let element = Element::from(json!({
            "SourceToken": {"Phase": "Done"},
            "GroupingTableContinuationToken": []
        }));
        assert!(GroupByContinuationToken::parse(&element).is_err());
    }

    #[test]
    fn test_advance() {
        assert_eq!(SourcePhase::advance(None), SourcePhase::Done);
        let next = SourcePhase::advance(Some(QueryState::new("s")));
        assert_eq!(next.source_state(), Some(&QueryState::new("s")));
        assert!(!next.is_done());
    }
}
