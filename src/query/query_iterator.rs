//! 查询迭代器
//!
//! 对调用方暴露的唯一入口。管道在第一次 `move_next` 时才创建，因此令牌解析、
//! 路由解析等创建期错误会作为第一页失败返回，之后迭代器结束。
//!
//! 输出页的 `state` 被替换为版本信封序列化后的字符串；恢复时用该字符串构造新的
//! 迭代器即可。

use crate::core::error::{QueryError, QueryResult};
use crate::core::try_catch::TryCatch;
use crate::core::value::Element;
use crate::query::continuation::PipelineContinuationToken;
use crate::query::page::{QueryPage, QueryState};
use crate::query::pipeline::{create_pipeline, BoxedStage, PipelineContext};
use log::{debug, info};
use tokio_util::sync::CancellationToken;

enum IteratorState {
    /// 管道尚未创建
    Pending,
    Running(BoxedStage),
    Done,
}

pub struct QueryIterator {
    context: PipelineContext,
    continuation: Option<String>,
    state: IteratorState,
    current: Option<TryCatch<QueryPage>>,
}

impl QueryIterator {
    /// `continuation` 为上一次输出页的 `continuation_token()`
    pub fn new(context: PipelineContext, continuation: Option<String>) -> Self {
        Self {
            context,
            continuation,
            state: IteratorState::Pending,
            current: None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, IteratorState::Done)
    }

    async fn create(&self) -> QueryResult<BoxedStage> {
        let source = match self.continuation.as_deref() {
            Some(text) => Some(PipelineContinuationToken::from_token_string(text)?.source),
            None => None,
        };
        create_pipeline(&self.context, source.as_ref()).await
    }

    pub async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if let IteratorState::Pending = self.state {
            if cancellation.is_cancelled() {
                self.current = Some(TryCatch::from_error(QueryError::Cancelled));
                return true;
            }
            match self.create().await {
                Ok(pipeline) => {
                    info!(
                        "query pipeline ready for collection {} (resumed: {})",
                        self.context.collection_id,
                        self.continuation.is_some()
                    );
                    self.state = IteratorState::Running(pipeline);
                }
                Err(e) => {
                    debug!("query pipeline creation failed: {}", e);
                    self.state = IteratorState::Done;
                    self.current = Some(TryCatch::from_error(e));
                    return true;
                }
            }
        }

        let pipeline = match &mut self.state {
            IteratorState::Running(pipeline) => pipeline,
            _ => {
                self.current = None;
                return false;
            }
        };

        if !pipeline.move_next(cancellation).await {
            self.state = IteratorState::Done;
            self.current = None;
            return false;
        }
        let page = match pipeline.take_current() {
            Some(page) => page,
            None => {
                self.state = IteratorState::Done;
                self.current = None;
                return false;
            }
        };

        let page = page.try_map(|page| {
            let state = page.state.clone().map(|source| {
                QueryState::new(Element::String(
                    PipelineContinuationToken::new(source.into_element()).to_token_string(),
                ))
            });
            page.with_state(state)
        });
        if page.succeeded() && page.result().state.is_none() {
            self.state = IteratorState::Done;
        }
        self.current = Some(page);
        true
    }

    pub fn current(&self) -> Option<&TryCatch<QueryPage>> {
        self.current.as_ref()
    }

    /// 取下一页；失败转换为 `Err`，结束时返回 `Ok(None)`
    pub async fn read_next_page(&mut self, cancellation: &CancellationToken) -> QueryResult<Option<QueryPage>> {
        if !self.move_next(cancellation).await {
            return Ok(None);
        }
        match self.current.take() {
            Some(page) => page.into_result().map(Some),
            None => Ok(None),
        }
    }

    pub async fn dispose(&mut self) {
        if let IteratorState::Running(pipeline) = &mut self.state {
            pipeline.dispose().await;
        }
        self.state = IteratorState::Done;
        self.current = None;
    }
}
