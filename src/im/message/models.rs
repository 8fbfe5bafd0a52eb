//! 消息本地模型定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 消息状态
///
/// 正常流转：SENDING → SENT → DELIVERED → READ，只能前进不能回退。
/// ERROR 表示发送失败，回执不会再改变它。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Error,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sending => "SENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
            MessageStatus::Error => "ERROR",
        }
    }

    /// 投递进度，ERROR 不参与排序
    pub fn rank(self) -> Option<u8> {
        match self {
            MessageStatus::Sending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Error => None,
        }
    }

    /// 是否允许从 `self` 升级到 `next`
    ///
    /// 只接受严格更高的进度，DELIVERED/READ 总能覆盖 SENT。ERROR 为终态。
    pub fn can_upgrade_to(self, next: MessageStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(next)) => next > current,
            _ => false,
        }
    }

    /// 同一条消息重复写入时保留进度更高的状态
    ///
    /// 服务端回传的消息说明已经发出，所以 ERROR 会被任何有进度的状态覆盖。
    pub fn max_progress(self, other: MessageStatus) -> MessageStatus {
        match (self.rank(), other.rank()) {
            (Some(current), Some(incoming)) if incoming > current => other,
            (None, Some(_)) => other,
            _ => self,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENDING" => Ok(MessageStatus::Sending),
            "SENT" => Ok(MessageStatus::Sent),
            "DELIVERED" => Ok(MessageStatus::Delivered),
            "READ" => Ok(MessageStatus::Read),
            "ERROR" => Ok(MessageStatus::Error),
            other => Err(anyhow::anyhow!("未知的消息状态: {}", other)),
        }
    }
}

/// 本地消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "messageID")]
    pub id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(default)]
    pub body: String,
    /// 创建时间（毫秒）
    pub created_at: i64,
    pub status: MessageStatus,
    /// 会话内单调递增的服务端序号
    #[serde(default)]
    pub message_seq: Option<i64>,
    /// 乐观发送时的本地临时 ID
    #[serde(rename = "localTempID", default)]
    pub local_temp_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// 是否为其他人发来的消息
    pub fn is_incoming(&self, current_user_id: &str) -> bool {
        self.sender_id != current_user_id
    }
}

/// 发送成功后服务端返回的确认信息
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    #[serde(rename = "messageID")]
    pub message_id: String,
    pub created_at: i64,
    #[serde(default)]
    pub message_seq: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_only_move_forward() {
        use MessageStatus::*;
        assert!(Sending.can_upgrade_to(Sent));
        assert!(Sent.can_upgrade_to(Delivered));
        assert!(Sent.can_upgrade_to(Read));
        assert!(Delivered.can_upgrade_to(Read));
        assert!(!Read.can_upgrade_to(Delivered));
        assert!(!Delivered.can_upgrade_to(Delivered));
        assert!(!Read.can_upgrade_to(Read));
        assert!(!Error.can_upgrade_to(Read));
        assert!(!Sent.can_upgrade_to(Sent));
    }

    #[test]
    fn max_progress_never_downgrades() {
        use MessageStatus::*;
        assert_eq!(Read.max_progress(Sent), Read);
        assert_eq!(Sent.max_progress(Delivered), Delivered);
        assert_eq!(Sending.max_progress(Sent), Sent);
        assert_eq!(Sent.max_progress(Sending), Sent);
        assert_eq!(Error.max_progress(Sent), Sent);
        assert_eq!(Read.max_progress(Error), Read);
    }

    #[test]
    fn status_text_roundtrip() {
        for status in [
            MessageStatus::Sending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
            MessageStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        assert!("LOST".parse::<MessageStatus>().is_err());
    }
}
