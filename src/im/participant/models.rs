//! 会话参与者本地模型定义

use serde::{Deserialize, Serialize};

/// 会话参与者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    /// 已读到的消息序号
    pub last_read_seq: Option<i64>,
    /// 已读到的消息时间（毫秒）
    pub last_read_at: Option<i64>,
    /// 免打扰截止时间（毫秒），0 表示未开启
    #[serde(default)]
    pub mute_until: i64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub archived: bool,
}

impl Participant {
    /// 尚无本地记录时使用的默认参与者
    pub fn new_default(conversation_id: &str, user_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            last_read_seq: None,
            last_read_at: None,
            mute_until: 0,
            pinned: false,
            archived: false,
        }
    }

    pub fn is_muted_at(&self, now_millis: i64) -> bool {
        self.mute_until > now_millis
    }
}
