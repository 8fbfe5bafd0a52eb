//! 错误类型定义
//!
//! SDK 内部统一使用 `anyhow::Result` 传递错误，需要区分类别（展示给用户）时
//! 使用 [`ChatError`]，再通过 [`error_message`] 转为界面可用的提示文案。

use thiserror::Error;

/// 聊天 SDK 的错误类别
#[derive(Debug, Error)]
pub enum ChatError {
    /// 当前没有登录会话
    #[error("用户未登录")]
    NotAuthenticated,

    /// 本地存储读写失败
    #[error("本地存储错误: {0}")]
    Storage(String),

    /// 网络请求失败
    #[error("网络错误: {0}")]
    Network(String),

    /// 服务器返回非 0 错误码
    #[error("服务器错误 {code}: {message}")]
    Server { code: i32, message: String },

    /// 数据格式不合法
    #[error("数据格式错误: {0}")]
    InvalidData(String),
}

impl ChatError {
    /// 面向用户的提示文案
    pub fn user_message(&self) -> String {
        match self {
            ChatError::NotAuthenticated => "请先登录".to_string(),
            ChatError::Storage(_) => "本地数据读写失败，请稍后重试".to_string(),
            ChatError::Network(_) => "网络连接失败，请检查网络".to_string(),
            ChatError::Server { message, .. } if !message.is_empty() => message.clone(),
            ChatError::Server { code, .. } => format!("服务器错误（{}）", code),
            ChatError::InvalidData(detail) => detail.clone(),
        }
    }
}

/// 把任意错误转换为用户可见的文案
///
/// 优先使用错误链中的 [`ChatError`]，其次识别 sqlx / reqwest 错误；
/// 其余错误使用自身描述，描述为空时返回 `fallback`。
pub fn error_message(err: &anyhow::Error, fallback: &str) -> String {
    for cause in err.chain() {
        if let Some(chat_err) = cause.downcast_ref::<ChatError>() {
            return non_empty_or(chat_err.user_message(), fallback);
        }
        if cause.downcast_ref::<sqlx::Error>().is_some() {
            return ChatError::Storage(cause.to_string()).user_message();
        }
        if cause.downcast_ref::<reqwest::Error>().is_some() {
            return ChatError::Network(cause.to_string()).user_message();
        }
    }
    non_empty_or(err.to_string(), fallback)
}

fn non_empty_or(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}
