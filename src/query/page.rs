//! 查询页与续传状态

use crate::core::value::Element;

/// 阶段恢复所需的不透明状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryState(Element);

impl QueryState {
    pub fn new(value: impl Into<Element>) -> Self {
        QueryState(value.into())
    }

    pub fn value(&self) -> &Element {
        &self.0
    }

    pub fn into_element(self) -> Element {
        self.0
    }
}

/// 发往后端的查询（改写后的文本 + 参数）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub query_text: String,
    pub parameters: Vec<(String, Element)>,
}

impl QuerySpec {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Element>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }
}

/// 一页逻辑结果
///
/// `state` 为 `None` 表示该来源已耗尽。
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub documents: Vec<Element>,
    pub request_charge: f64,
    pub activity_id: String,
    pub response_length_bytes: usize,
    pub execution_info: Option<Element>,
    pub disallow_continuation_token_message: Option<String>,
    pub state: Option<QueryState>,
}

impl QueryPage {
    pub fn new(
        documents: Vec<Element>,
        request_charge: f64,
        activity_id: impl Into<String>,
        response_length_bytes: usize,
        state: Option<QueryState>,
    ) -> Self {
        Self {
            documents,
            request_charge,
            activity_id: activity_id.into(),
            response_length_bytes,
            execution_info: None,
            disallow_continuation_token_message: None,
            state,
        }
    }

    /// 不含文档的页（分组/聚合排空阶段使用）
    pub fn empty(request_charge: f64, activity_id: impl Into<String>, state: Option<QueryState>) -> Self {
        Self::new(Vec::new(), request_charge, activity_id, 0, state)
    }

    /// 保留元数据，替换文档和状态
    pub fn with_documents(self, documents: Vec<Element>, state: Option<QueryState>) -> Self {
        Self {
            documents,
            state,
            ..self
        }
    }

    pub fn with_state(self, state: Option<QueryState>) -> Self {
        Self { state, ..self }
    }

    /// 顶层续传令牌字符串；只有查询迭代器产出的页才有
    pub fn continuation_token(&self) -> Option<&str> {
        self.state.as_ref().and_then(|s| s.value().as_str())
    }
}
