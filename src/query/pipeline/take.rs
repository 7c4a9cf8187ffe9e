//! LIMIT / TOP：最多输出 n 条结果，达到后不再访问来源

use super::{BoxedStage, QueryPipelineStage};
use crate::core::try_catch::TryCatch;
use crate::query::continuation::{ContinuationToken, TakeContinuationToken};
use crate::query::page::{QueryPage, QueryState};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct TakeStage {
    source: BoxedStage,
    remaining: u64,
    current: Option<TryCatch<QueryPage>>,
}

impl TakeStage {
    pub fn new(source: BoxedStage, remaining: u64) -> Self {
        Self {
            source,
            remaining,
            current: None,
        }
    }
}

#[async_trait]
impl QueryPipelineStage for TakeStage {
    async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if self.remaining == 0 || !self.source.move_next(cancellation).await {
            self.current = None;
            return false;
        }
        let page = match self.source.take_current() {
            Some(page) => page,
            None => {
                self.current = None;
                return false;
            }
        };

        let remaining = &mut self.remaining;
        self.current = Some(page.try_map(|page| {
            let taken = (*remaining).min(page.documents.len() as u64) as usize;
            *remaining -= taken as u64;
            let mut documents = page.documents.clone();
            documents.truncate(taken);
            let state = match page.state.clone() {
                Some(source) if *remaining > 0 => Some(QueryState::new(
                    TakeContinuationToken {
                        take_count: *remaining,
                        source: source.into_element(),
                    }
                    .to_element(),
                )),
                _ => None,
            };
            page.with_documents(documents, state)
        }));
        true
    }

    fn current(&self) -> Option<&TryCatch<QueryPage>> {
        self.current.as_ref()
    }

    fn take_current(&mut self) -> Option<TryCatch<QueryPage>> {
        self.current.take()
    }

    fn name(&self) -> &'static str {
        "Take"
    }

    async fn dispose(&mut self) {
        self.source.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Element;
    use crate::query::pipeline::testing::{page, ScriptedStage};

    fn ints(values: &[i64]) -> Vec<Element> {
        values.iter().copied().map(Element::from).collect()
    }

    #[tokio::test]
    async fn test_take_stops_once_count_is_reached() {
        let source = ScriptedStage::boxed(vec![
            page(ints(&[1, 2]), Some("s1")),
            page(ints(&[3, 4]), Some("s2")),
            page(ints(&[5]), None),
        ]);
        let mut stage = TakeStage::new(source, 3);
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await);
        let first = stage.take_current().expect("page").into_result().expect("ok");
        assert_eq!(first.documents, ints(&[1, 2]));
        let token = TakeContinuationToken::parse(first.state.expect("token").value()).expect("parse");
        assert_eq!(token.take_count, 1);

        assert!(stage.move_next(&cancel).await);
        let second = stage.take_current().expect("page").into_result().expect("ok");
        assert_eq!(second.documents, ints(&[3]));
        assert!(second.state.is_none());
        assert!(!stage.move_next(&cancel).await);
    }

    #[tokio::test]
    async fn test_zero_take_never_touches_source() {
        let source = ScriptedStage::boxed(vec![page(ints(&[1]), None)]);
        let mut stage = TakeStage::new(source, 0);
        assert!(!stage.move_next(&CancellationToken::new()).await);
    }
}
