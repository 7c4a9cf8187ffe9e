//! 统一错误处理
//!
//! 管道中所有预期内的失败都以值的形式（[`QueryError`]，通常包在
//! [`TryCatch`](crate::core::TryCatch) 中）传递，不使用 panic 做控制流。
//! 后端错误只有一个变体，具体种类由 [`codes::BackendErrorKind`] 查表得到。

use thiserror::Error;

pub mod codes;

pub use codes::BackendErrorKind;

/// 管道错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// 调用方传回的续传令牌损坏或不兼容
    #[error("续传令牌格式错误: {0}")]
    MalformedContinuationToken(String),

    /// 远端分区返回的错误
    #[error("后端错误 {status}/{sub_status} ({kind}): {message}", kind = BackendErrorKind::lookup(*.status, *.sub_status))]
    Backend {
        status: u16,
        sub_status: u32,
        message: String,
        request_charge: f64,
    },

    #[error("路由错误: {0}")]
    Routing(String),

    #[error("操作已取消")]
    Cancelled,

    #[error("不支持的查询计划: {0}")]
    UnsupportedQueryPlan(String),

    /// 后端返回的行不符合改写后的投影结构
    #[error("无效的结果负载: {0}")]
    InvalidPayload(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 查询操作结果类型别名
pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    pub fn malformed(message: impl Into<String>) -> Self {
        QueryError::MalformedContinuationToken(message.into())
    }

    pub fn backend(status: u16, sub_status: u32, message: impl Into<String>) -> Self {
        QueryError::Backend {
            status,
            sub_status,
            message: message.into(),
            request_charge: 0.0,
        }
    }

    /// 后端错误的种类，非后端错误返回 `None`
    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            QueryError::Backend {
                status, sub_status, ..
            } => Some(BackendErrorKind::lookup(*status, *sub_status)),
            _ => None,
        }
    }

    /// 分区已拆分，需要用子范围替换当前游标
    pub fn is_split(&self) -> bool {
        self.backend_kind().map_or(false, |kind| kind.is_split())
    }

    pub fn is_transient(&self) -> bool {
        self.backend_kind().map_or(false, |kind| kind.is_transient())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }

    pub fn is_malformed_continuation(&self) -> bool {
        matches!(self, QueryError::MalformedContinuationToken(_))
    }

    pub fn request_charge(&self) -> f64 {
        match self {
            QueryError::Backend { request_charge, .. } => *request_charge,
            _ => 0.0,
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Serialization(e.to_string())
    }
}
