//! 后端状态码对照表
//!
//! 远端服务按 (HTTP 状态码, 子状态码) 报告错误。这里把两者映射为一个扁平的
//! [`BackendErrorKind`]，取代按状态码派生的异常类层次：
//! - 410/1002、410/1007、410/1008 表示分区已拆分或正在迁移，需要重新解析路由
//! - 410/1000 表示名称缓存过期
//! - 429、408、503 属于可重试的暂时性错误（重试由上层负责）

use serde::{Deserialize, Serialize};

/// 常用 HTTP 状态码
pub mod status {
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const GONE: u16 = 410;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const RETRY_WITH: u16 = 449;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// 子状态码
pub mod sub_status {
    pub const UNKNOWN: u32 = 0;
    pub const NAME_CACHE_IS_STALE: u32 = 1000;
    pub const PARTITION_KEY_RANGE_GONE: u32 = 1002;
    pub const COMPLETING_SPLIT: u32 = 1007;
    pub const COMPLETING_PARTITION_MIGRATION: u32 = 1008;
    pub const READ_SESSION_NOT_AVAILABLE: u32 = 1002;
    pub const REQUEST_RATE_TOO_LARGE: u32 = 3200;
    pub const MALFORMED_CONTINUATION_TOKEN: u32 = 21002;
}

/// 后端错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendErrorKind {
    /// 分区键范围已不存在（拆分完成）
    PartitionKeyRangeGone,
    /// 分区正在拆分
    CompletingSplit,
    /// 分区正在迁移
    CompletingPartitionMigration,
    /// 名称缓存过期
    NameCacheIsStale,
    /// 其他 410
    Gone,
    /// 请求被限流
    Throttled,
    RequestTimeout,
    ServiceUnavailable,
    RetryWith,
    NotFound,
    ReadSessionNotAvailable,
    BadRequest,
    InternalServerError,
    Unknown,
}

/// (状态码, 子状态码) -> 错误种类。子状态码为 `None` 的条目匹配任意子状态码。
const LOOKUP_TABLE: &[(u16, Option<u32>, BackendErrorKind)] = &[
    (status::GONE, Some(sub_status::PARTITION_KEY_RANGE_GONE), BackendErrorKind::PartitionKeyRangeGone),
    (status::GONE, Some(sub_status::COMPLETING_SPLIT), BackendErrorKind::CompletingSplit),
    (
        status::GONE,
        Some(sub_status::COMPLETING_PARTITION_MIGRATION),
        BackendErrorKind::CompletingPartitionMigration,
    ),
    (status::GONE, Some(sub_status::NAME_CACHE_IS_STALE), BackendErrorKind::NameCacheIsStale),
    (status::GONE, None, BackendErrorKind::Gone),
    (status::NOT_FOUND, Some(sub_status::READ_SESSION_NOT_AVAILABLE), BackendErrorKind::ReadSessionNotAvailable),
    (status::NOT_FOUND, None, BackendErrorKind::NotFound),
    (status::TOO_MANY_REQUESTS, None, BackendErrorKind::Throttled),
    (status::REQUEST_TIMEOUT, None, BackendErrorKind::RequestTimeout),
    (status::SERVICE_UNAVAILABLE, None, BackendErrorKind::ServiceUnavailable),
    (status::RETRY_WITH, None, BackendErrorKind::RetryWith),
    (status::BAD_REQUEST, None, BackendErrorKind::BadRequest),
    (status::INTERNAL_SERVER_ERROR, None, BackendErrorKind::InternalServerError),
];

impl BackendErrorKind {
    /// 根据状态码和子状态码查表
    pub fn lookup(status: u16, sub_status: u32) -> Self {
        LOOKUP_TABLE
            .iter()
            .find(|(code, sub, _)| *code == status && sub.map_or(true, |s| s == sub_status))
            .map(|(_, _, kind)| *kind)
            .unwrap_or(BackendErrorKind::Unknown)
    }

    /// 该错误是否表示分区拆分/迁移，需要重新解析子范围
    pub fn is_split(&self) -> bool {
        matches!(
            self,
            BackendErrorKind::PartitionKeyRangeGone
                | BackendErrorKind::CompletingSplit
                | BackendErrorKind::CompletingPartitionMigration
        )
    }

    /// 路由缓存是否过期（包括拆分）
    pub fn is_stale_routing(&self) -> bool {
        self.is_split() || matches!(self, BackendErrorKind::NameCacheIsStale)
    }

    /// 暂时性错误，交给上层的重试策略
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendErrorKind::Throttled
                | BackendErrorKind::RequestTimeout
                | BackendErrorKind::ServiceUnavailable
                | BackendErrorKind::RetryWith
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::PartitionKeyRangeGone => "PartitionKeyRangeGone",
            BackendErrorKind::CompletingSplit => "CompletingSplit",
            BackendErrorKind::CompletingPartitionMigration => "CompletingPartitionMigration",
            BackendErrorKind::NameCacheIsStale => "NameCacheIsStale",
            BackendErrorKind::Gone => "Gone",
            BackendErrorKind::Throttled => "Throttled",
            BackendErrorKind::RequestTimeout => "RequestTimeout",
            BackendErrorKind::ServiceUnavailable => "ServiceUnavailable",
            BackendErrorKind::RetryWith => "RetryWith",
            BackendErrorKind::NotFound => "NotFound",
            BackendErrorKind::ReadSessionNotAvailable => "ReadSessionNotAvailable",
            BackendErrorKind::BadRequest => "BadRequest",
            BackendErrorKind::InternalServerError => "InternalServerError",
            BackendErrorKind::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_split_codes() {
        assert_eq!(
            BackendErrorKind::lookup(410, 1002),
            BackendErrorKind::PartitionKeyRangeGone
        );
        assert_eq!(BackendErrorKind::lookup(410, 1007), BackendErrorKind::CompletingSplit);
        assert!(BackendErrorKind::lookup(410, 1008).is_split());
        assert!(!BackendErrorKind::lookup(410, 1000).is_split());
        assert!(BackendErrorKind::lookup(410, 1000).is_stale_routing());
    }

    #[test]
    fn test_lookup_falls_back_to_status_only_entry() {
        assert_eq!(BackendErrorKind::lookup(410, 42), BackendErrorKind::Gone);
        assert_eq!(BackendErrorKind::lookup(429, 3200), BackendErrorKind::Throttled);
        assert_eq!(BackendErrorKind::lookup(429, 0), BackendErrorKind::Throttled);
        assert_eq!(BackendErrorKind::lookup(404, 0), BackendErrorKind::NotFound);
        assert_eq!(BackendErrorKind::lookup(418, 0), BackendErrorKind::Unknown);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(BackendErrorKind::Throttled.is_transient());
        assert!(BackendErrorKind::ServiceUnavailable.is_transient());
        assert!(!BackendErrorKind::BadRequest.is_transient());
        assert!(!BackendErrorKind::PartitionKeyRangeGone.is_transient());
    }
}
