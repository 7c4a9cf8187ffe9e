//! Value 模块 - 可移植元素树
//!
//! - 类型定义 (`types.rs`)
//! - 比较与哈希 (`comparison.rs`)
//! - JSON 转换与规范化字符串 (`conversion.rs`)

pub mod comparison;
pub mod conversion;
pub mod types;

pub use types::*;
pub(crate) use conversion::required_field;
