pub mod error;
pub mod hash;
pub mod try_catch;
pub mod value;

// 错误和结果类型
pub use error::{BackendErrorKind, QueryError, QueryResult};

pub use try_catch::{CapturedError, TryCatch};

// 核心数据类型
pub use value::{Element, ElementKind, Number64};
