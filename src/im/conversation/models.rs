//! 会话界面状态与已读请求

use crate::im::message::models::Message;
use crate::im::participant::models::Participant;
use serde::Serialize;

/// 标记会话已读的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    /// 已读到的最新对端消息时间（毫秒）
    pub read_at: i64,
    /// 已读到的最新对端消息序号
    #[serde(rename = "hasReadSeq")]
    pub seq: Option<i64>,
}

/// 会话界面状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationUiState {
    pub conversation_id: String,
    /// 按时间升序的消息列表
    pub messages: Vec<Message>,
    pub participant: Option<Participant>,
    /// 尚未确认已读的对端消息数
    pub unread_count: usize,
    pub is_loading: bool,
    /// 面向用户的错误提示
    pub error: Option<String>,
}

impl ConversationUiState {
    pub fn loading(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            is_loading: true,
            ..Default::default()
        }
    }
}
