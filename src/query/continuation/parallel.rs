use super::ContinuationToken;
use crate::core::error::QueryResult;
use crate::core::value::{required_field, Element};
use crate::query::page::QueryState;
use crate::routing::feed_range::{FeedRange, FeedRangeState};

/// 单个范围的续传令牌 `{"token": <el|null>, "range": {"min", "max"}}`
///
/// `token` 为 null 表示从头开始读这个范围。
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelContinuationToken {
    pub token: Option<QueryState>,
    pub range: FeedRange,
}

impl ParallelContinuationToken {
    pub fn new(token: Option<QueryState>, range: FeedRange) -> Self {
        Self { token, range }
    }

    pub fn into_feed_range_state(self) -> FeedRangeState<Option<QueryState>> {
        FeedRangeState::new(self.range, self.token)
    }
}

impl From<&FeedRangeState<Option<QueryState>>> for ParallelContinuationToken {
    fn from(state: &FeedRangeState<Option<QueryState>>) -> Self {
        Self::new(state.state.clone(), state.feed_range.clone())
    }
}

impl ContinuationToken for ParallelContinuationToken {
    fn to_element(&self) -> Element {
        Element::object([
            (
                "token",
                self.token
                    .as_ref()
                    .map(|s| s.value().clone())
                    .unwrap_or(Element::Null),
            ),
            ("range", self.range.to_element()),
        ])
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        let token = match required_field(element, "token", "parallel continuation")? {
            Element::Null => None,
            other => Some(QueryState::new(other.clone())),
        };
        let range = FeedRange::try_from_element(required_field(
            element,
            "range",
            "parallel continuation",
        )?)?;
        Ok(Self { token, range })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::continuation::{parse_token_array, tokens_to_element};
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let token = ParallelContinuationToken::new(
            Some(QueryState::new(Element::from(json!({"rid": "0007"})))),
            FeedRange::new("", "80").expect("range"),
        );
        assert_eq!(
            token.to_element().to_json(),
            json!({"token": {"rid": "0007"}, "range": {"min": "", "max": "80"}})
        );
    }

    #[test]
    fn test_null_token_means_from_scratch() {
        let element = Element::from(json!({"token": null, "range": {"min": "80", "max": "FF"}}));
        let parsed = ParallelContinuationToken::parse(&element).expect("should parse");
        assert_eq!(parsed.token, None);
        assert_eq!(parsed.range.min_inclusive(), "80");
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        for bad in [
            json!({"range": {"min": "", "max": "FF"}}),
            json!({"token": null}),
            json!({"token": null, "range": {"min": 1, "max": "FF"}}),
            json!({"token": null, "range": "all"}),
            json!([]),
        ] {
            let err = ParallelContinuationToken::parse(&Element::from(bad.clone()))
                .expect_err("should be malformed");
            assert!(err.is_malformed_continuation(), "{} -> {:?}", bad, err);
        }
    }

    #[test]
    fn test_array_round_trip() {
        let tokens = vec![
            ParallelContinuationToken::new(None, FeedRange::new("", "80").expect("range")),
            ParallelContinuationToken::new(
                Some(QueryState::new("abc")),
                FeedRange::new("80", "FF").expect("range"),
            ),
        ];
        let parsed: Vec<ParallelContinuationToken> =
            parse_token_array(&tokens_to_element(&tokens), "parallel").expect("round trip");
        assert_eq!(parsed, tokens);
    }
}
