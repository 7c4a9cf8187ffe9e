//! OFFSET：丢弃前 n 条结果

use super::{BoxedStage, QueryPipelineStage};
use crate::core::try_catch::TryCatch;
use crate::query::continuation::{ContinuationToken, SkipContinuationToken};
use crate::query::page::{QueryPage, QueryState};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct SkipStage {
    source: BoxedStage,
    remaining: u64,
    current: Option<TryCatch<QueryPage>>,
}

impl SkipStage {
    pub fn new(source: BoxedStage, remaining: u64) -> Self {
        Self {
            source,
            remaining,
            current: None,
        }
    }
}

#[async_trait]
impl QueryPipelineStage for SkipStage {
    async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if !self.source.move_next(cancellation).await {
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
            let skipped = (*remaining).min(page.documents.len() as u64) as usize;
            *remaining -= skipped as u64;
            let documents = page.documents[skipped..].to_vec();
            let state = page.state.clone().map(|source| {
                QueryState::new(
                    SkipContinuationToken {
                        skip_count: *remaining,
                        source: source.into_element(),
                    }
                    .to_element(),
                )
            });
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
        "Skip"
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
    async fn test_skip_spans_pages() {
        let source = ScriptedStage::boxed(vec![
            page(ints(&[1, 2]), Some("s1")),
            page(ints(&[3, 4, 5]), None),
        ]);
        let mut stage = SkipStage::new(source, 3);
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await);
        let first = stage.take_current().expect("page").into_result().expect("ok");
        assert!(first.documents.is_empty());
        let token = SkipContinuationToken::parse(first.state.expect("token").value()).expect("parse");
        assert_eq!(token.skip_count, 1);

        assert!(stage.move_next(&cancel).await);
        let second = stage.take_current().expect("page").into_result().expect("ok");
        assert_eq!(second.documents, ints(&[4, 5]));
        assert!(!stage.move_next(&cancel).await);
    }
}
