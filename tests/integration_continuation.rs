//! 续传令牌集成测试
//!
//! 测试范围:
//! - 版本信封包装的各阶段令牌的字符串往返：并行、排序、分组、聚合、去重、OFFSET/LIMIT
//! - 跨范围状态的校验（空、重叠）

use crossquery::core::hash::epk_from_point;
use crossquery::core::value::Element;
use crossquery::query::continuation::order_by::ResumePoint;
use crossquery::query::continuation::{
    parse_token_array, tokens_to_element, AggregateContinuationToken, ContinuationToken,
    DistinctContinuationToken, GroupByContinuationToken, OrderByContinuationToken,
    ParallelContinuationToken, PipelineContinuationToken, SkipContinuationToken, SourcePhase,
    TakeContinuationToken,
};
use crossquery::query::page::QueryState;
use crossquery::routing::feed_range::{CrossFeedRangeState, FeedRange};
use proptest::prelude::*;

/// 互不重叠的范围及其后端令牌
fn arb_range_tokens() -> impl Strategy<Value = Vec<ParallelContinuationToken>> {
    prop::collection::btree_set(1u32..0xFE00_0000, 1..6).prop_flat_map(|bounds| {
        let bounds: Vec<u32> = bounds.into_iter().collect();
        let count = bounds.len();
        prop::collection::vec(prop::option::of("[a-z0-9]{1,12}"), count).prop_map(move |tokens| {
            let mut low = 0u32;
            bounds
                .iter()
                .zip(tokens)
                .map(|(high, token)| {
                    let range = FeedRange::new(epk_from_point(low), epk_from_point(*high))
                        .expect("下界小于上界");
                    low = *high;
                    ParallelContinuationToken::new(token.map(|t| QueryState::new(Element::from(t))), range)
                })
                .collect()
        })
    })
}

/// 可以写成 JSON 的任意元素（不含浮点数与 undefined）
fn arb_element() -> impl Strategy<Value = Element> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-zA-Z0-9 _-]{0,12}".prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|fields| serde_json::Value::Object(fields.into_iter().collect())),
        ]
    })
    .prop_map(Element::from)
}

/// 非空对象，键为分组键的规范化字符串
fn arb_grouping_table() -> impl Strategy<Value = Element> {
    prop::collection::btree_map("\\[\"[a-z]{1,4}\"\\]", arb_element(), 1..5).prop_map(|groups| {
        Element::Object(groups.into_iter().collect())
    })
}

fn arb_source_phase() -> impl Strategy<Value = SourcePhase> {
    prop_oneof![
        Just(SourcePhase::NotStarted),
        Just(SourcePhase::Done),
        arb_element()
            .prop_filter("Draining 的令牌不能为 null", |e| !e.is_null())
            .prop_map(|token| SourcePhase::Draining(QueryState::new(token))),
    ]
}

fn arb_resume_point() -> impl Strategy<Value = ResumePoint> {
    let item = prop_oneof![
        1 => Just(Element::Undefined),
        4 => arb_element(),
    ];
    (prop::collection::vec(item, 1..4), "[0-9]{8}", 0u64..64).prop_map(
        |(order_by_items, rid, skip_count)| ResumePoint {
            order_by_items,
            rid,
            skip_count,
        },
    )
}

fn arb_order_by_tokens() -> impl Strategy<Value = Vec<OrderByContinuationToken>> {
    arb_range_tokens().prop_flat_map(|composites| {
        let count = composites.len();
        prop::collection::vec(prop::option::of(arb_resume_point()), count).prop_map(move |resumes| {
            composites
                .iter()
                .cloned()
                .zip(resumes)
                .map(|(composite, resume)| OrderByContinuationToken { composite, resume })
                .collect()
        })
    })
}

/// 经过字符串信封后取回来源令牌
fn through_envelope(source: Element) -> Element {
    let text = PipelineContinuationToken::new(source).to_token_string();
    PipelineContinuationToken::from_token_string(&text)
        .expect("信封应能解析")
        .source
}

proptest! {
    #[test]
    fn parallel_tokens_round_trip_through_envelope(tokens in arb_range_tokens()) {
        let text = PipelineContinuationToken::new(tokens_to_element(&tokens)).to_token_string();
        let envelope = PipelineContinuationToken::from_token_string(&text).expect("信封应能解析");
        let parsed: Vec<ParallelContinuationToken> =
            parse_token_array(&envelope.source, "parallel continuation").expect("数组应能解析");
        prop_assert_eq!(&parsed, &tokens);

        let states = CrossFeedRangeState::new(
            parsed.into_iter().map(ParallelContinuationToken::into_feed_range_state).collect(),
        );
        prop_assert!(states.is_ok());
    }

    #[test]
    fn skip_take_tokens_round_trip_through_envelope(
        take in 0u64..1_000_000,
        skip in 0u64..1_000_000,
        inner in "[a-z]{0,16}",
    ) {
        let token = TakeContinuationToken {
            take_count: take,
            source: SkipContinuationToken {
                skip_count: skip,
                source: Element::from(inner.as_str()),
            }
            .to_element(),
        };
        let text = PipelineContinuationToken::new(token.to_element()).to_token_string();
        let envelope = PipelineContinuationToken::from_token_string(&text).expect("信封应能解析");
        let parsed = TakeContinuationToken::parse(&envelope.source).expect("take 令牌应能解析");
        prop_assert_eq!(&parsed, &token);
        let skip_token = SkipContinuationToken::parse(&parsed.source).expect("skip 令牌应能解析");
        prop_assert_eq!(skip_token.skip_count, skip);
    }

    #[test]
    fn order_by_tokens_round_trip_through_envelope(tokens in arb_order_by_tokens()) {
        let source = through_envelope(tokens_to_element(&tokens));
        let parsed: Vec<OrderByContinuationToken> =
            parse_token_array(&source, "order by continuation").expect("数组应能解析");
        prop_assert_eq!(&parsed, &tokens);
    }

    #[test]
    fn group_by_tokens_round_trip_through_envelope(
        source in arb_source_phase(),
        grouping_table in arb_grouping_table(),
    ) {
        let token = GroupByContinuationToken { source, grouping_table };
        let parsed = GroupByContinuationToken::parse(&through_envelope(token.to_element()))
            .expect("group by 令牌应能解析");
        prop_assert_eq!(&parsed, &token);
    }

    #[test]
    fn aggregate_tokens_round_trip_through_envelope(
        source in arb_source_phase(),
        aggregation in arb_element(),
    ) {
        let token = AggregateContinuationToken { source, aggregation };
        let parsed = AggregateContinuationToken::parse(&through_envelope(token.to_element()))
            .expect("聚合令牌应能解析");
        prop_assert_eq!(&parsed, &token);
    }

    #[test]
    fn distinct_tokens_round_trip_through_envelope(
        source in arb_element(),
        distinct_map in arb_element(),
    ) {
        let token = DistinctContinuationToken { source, distinct_map };
        let parsed = DistinctContinuationToken::parse(&through_envelope(token.to_element()))
            .expect("去重令牌应能解析");
        prop_assert_eq!(&parsed, &token);
    }
}

#[test]
fn test_overlapping_ranges_are_rejected() {
    let tokens = vec![
        ParallelContinuationToken::new(None, FeedRange::new("", "80000000").expect("range")),
        ParallelContinuationToken::new(None, FeedRange::new("40000000", "FF").expect("range")),
    ];
    let result = CrossFeedRangeState::new(
        tokens.into_iter().map(ParallelContinuationToken::into_feed_range_state).collect(),
    );
    let err = result.err().expect("重叠范围应被拒绝");
    assert!(err.is_malformed_continuation());
}

#[test]
fn test_empty_token_array_is_rejected() {
    let result: Result<Vec<ParallelContinuationToken>, _> =
        parse_token_array(&Element::Array(vec![]), "parallel continuation");
    assert!(result.expect_err("空数组应被拒绝").is_malformed_continuation());
}
