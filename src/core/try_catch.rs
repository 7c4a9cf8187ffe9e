//! 单子化的结果包装
//!
//! `TryCatch<T>` 要么持有成功值，要么持有失败（错误 + 创建时捕获的调用栈），
//! 二者不会同时存在。跨异步边界、在队列中传递时调用栈依然是失败发生时的那一个。
//!
//! 对成功值读取 `error()`，或对失败读取 `result()`，属于违反约定，会直接 panic。
//! `into_result()` 是调用方显式进入 `Result` / `?` 语义的唯一边界。
//!
//! 调用栈用 `Backtrace::capture()` 获取，只有设置了 `RUST_BACKTRACE` 或
//! `RUST_LIB_BACKTRACE` 时才会真正记录帧，否则为 disabled 状态。失败的源码位置
//! 总是通过 `#[track_caller]` 记录，见 [`CapturedError::location`]。

use std::backtrace::Backtrace;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use crate::core::error::{QueryError, QueryResult};

/// 捕获的失败：错误本身加上创建位置与调用栈
#[derive(Clone)]
pub struct CapturedError {
    error: QueryError,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl CapturedError {
    #[track_caller]
    fn capture(error: QueryError) -> Self {
        Self {
            error,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    pub fn error(&self) -> &QueryError {
        &self.error
    }

    /// 构造失败的源码位置，不依赖环境变量
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// 未开启 `RUST_BACKTRACE` / `RUST_LIB_BACKTRACE` 时 `status()` 为 `Disabled`
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Debug for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedError")
            .field("error", &self.error)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// 成功或失败二选一的结果
#[derive(Clone)]
pub struct TryCatch<T> {
    inner: Result<T, CapturedError>,
}

impl<T> TryCatch<T> {
    pub fn from_result(value: T) -> Self {
        Self { inner: Ok(value) }
    }

    #[track_caller]
    pub fn from_error(error: QueryError) -> Self {
        Self {
            inner: Err(CapturedError::capture(error)),
        }
    }

    /// 沿用已有失败（保留原始调用栈）
    pub fn from_captured(captured: CapturedError) -> Self {
        Self { inner: Err(captured) }
    }

    pub fn succeeded(&self) -> bool {
        self.inner.is_ok()
    }

    pub fn failed(&self) -> bool {
        self.inner.is_err()
    }

    /// 成功值
    ///
    /// # Panics
    /// 在失败结果上调用时 panic。
    pub fn result(&self) -> &T {
        match &self.inner {
            Ok(value) => value,
            Err(captured) => panic!(
                "TryCatch::result called on a failed result: {}",
                captured.error
            ),
        }
    }

    /// 失败的错误
    ///
    /// # Panics
    /// 在成功结果上调用时 panic。
    pub fn error(&self) -> &QueryError {
        match &self.inner {
            Ok(_) => panic!("TryCatch::error called on a successful result"),
            Err(captured) => &captured.error,
        }
    }

    /// 失败创建时的调用栈；成功时为 `None`
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.as_ref().err().map(|captured| captured.backtrace())
    }

    pub fn captured(&self) -> Option<&CapturedError> {
        self.inner.as_ref().err()
    }

    pub fn as_ref(&self) -> TryCatch<&T> {
        TryCatch {
            inner: self.inner.as_ref().map_err(Clone::clone),
        }
    }

    /// 成功时映射结果（对应 `Try`），失败原样传递
    pub fn try_map<U, F>(self, f: F) -> TryCatch<U>
    where
        F: FnOnce(T) -> U,
    {
        TryCatch {
            inner: self.inner.map(f),
        }
    }

    /// 成功时继续一个可能失败的步骤
    pub fn try_and_then<U, F>(self, f: F) -> TryCatch<U>
    where
        F: FnOnce(T) -> TryCatch<U>,
    {
        match self.inner {
            Ok(value) => f(value),
            Err(captured) => TryCatch::from_captured(captured),
        }
    }

    /// 异步版本的 `try_map`
    pub async fn try_map_async<U, F, Fut>(self, f: F) -> TryCatch<U>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = U>,
    {
        match self.inner {
            Ok(value) => TryCatch::from_result(f(value).await),
            Err(captured) => TryCatch::from_captured(captured),
        }
    }

    /// 异步版本的 `try_and_then`
    pub async fn try_and_then_async<U, F, Fut>(self, f: F) -> TryCatch<U>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = TryCatch<U>>,
    {
        match self.inner {
            Ok(value) => f(value).await,
            Err(captured) => TryCatch::from_captured(captured),
        }
    }

    /// 失败时执行恢复逻辑（对应 `Catch`）
    pub fn catch<F>(self, f: F) -> TryCatch<T>
    where
        F: FnOnce(&QueryError) -> TryCatch<T>,
    {
        match self.inner {
            Ok(value) => TryCatch::from_result(value),
            Err(captured) => f(&captured.error),
        }
    }

    /// 失败时做副作用（如记日志），结果不变
    pub fn inspect_error<F>(self, f: F) -> TryCatch<T>
    where
        F: FnOnce(&QueryError),
    {
        if let Err(captured) = &self.inner {
            f(&captured.error);
        }
        self
    }

    /// 两个分支都必须处理（对应 `Match`）
    pub fn match_with<R>(
        self,
        on_success: impl FnOnce(T) -> R,
        on_failure: impl FnOnce(CapturedError) -> R,
    ) -> R {
        match self.inner {
            Ok(value) => on_success(value),
            Err(captured) => on_failure(captured),
        }
    }

    /// 进入 `Result` 语义（对应 `ThrowIfFailed`），只在顶层 API 边界使用
    pub fn into_result(self) -> QueryResult<T> {
        self.inner.map_err(|captured| captured.error)
    }

    pub fn ok(self) -> Option<T> {
        self.inner.ok()
    }
}

impl TryCatch<()> {
    /// 无返回值的成功
    pub fn success() -> Self {
        TryCatch::from_result(())
    }
}

impl<T> From<QueryResult<T>> for TryCatch<T> {
    #[track_caller]
    fn from(result: QueryResult<T>) -> Self {
        match result {
            Ok(value) => TryCatch::from_result(value),
            Err(error) => TryCatch::from_error(error),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TryCatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Ok(value) => f.debug_tuple("TryCatch::Ok").field(value).finish(),
            Err(captured) => f.debug_tuple("TryCatch::Err").field(&captured.error).finish(),
        }
    }
}
