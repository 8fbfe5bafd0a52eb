//! 收件箱数据结构

use crate::im::message::models::{Message, MessageStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 回执类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboxActionType {
    Delivered,
    Read,
}

impl InboxActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            InboxActionType::Delivered => "DELIVERED",
            InboxActionType::Read => "READ",
        }
    }

    /// 回执对应的目标消息状态
    pub fn target_status(self) -> MessageStatus {
        match self {
            InboxActionType::Delivered => MessageStatus::Delivered,
            InboxActionType::Read => MessageStatus::Read,
        }
    }
}

impl fmt::Display for InboxActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 送达 / 已读回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxAction {
    /// 幂等键：`messageId:actionType:actorId`
    #[serde(rename = "actionID")]
    pub id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(rename = "receiverID")]
    pub receiver_id: String,
    pub action_type: InboxActionType,
    pub action_at_millis: i64,
}

impl InboxAction {
    /// 构造回执，`receiver_id` 即执行动作的一方
    pub fn new(
        message_id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        action_type: InboxActionType,
        action_at_millis: i64,
    ) -> Self {
        let message_id = message_id.into();
        let receiver_id = receiver_id.into();
        Self {
            id: Self::composite_id(&message_id, action_type, &receiver_id),
            message_id,
            sender_id: sender_id.into(),
            receiver_id,
            action_type,
            action_at_millis,
        }
    }

    pub fn composite_id(message_id: &str, action_type: InboxActionType, actor_id: &str) -> String {
        format!("{}:{}:{}", message_id, action_type, actor_id)
    }
}

/// 远端收件箱条目：新消息与回执交错推送
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum InboxItem {
    #[serde(rename = "message")]
    NewMessage(Message),
    #[serde(rename = "action")]
    Action(InboxAction),
}

impl InboxItem {
    /// 条目时间（毫秒），用于推进订阅游标
    pub fn timestamp_millis(&self) -> i64 {
        match self {
            InboxItem::NewMessage(message) => message.created_at,
            InboxItem::Action(action) => action.action_at_millis,
        }
    }

    /// 条目唯一键：消息 ID 或回执 ID
    pub fn key(&self) -> &str {
        match self {
            InboxItem::NewMessage(message) => &message.id,
            InboxItem::Action(action) => &action.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_combines_message_type_and_actor() {
        let action = InboxAction::new("msg-2", "me", "bob", InboxActionType::Read, 10);
        assert_eq!(action.id, "msg-2:READ:bob");
        assert_eq!(action.action_type.target_status(), MessageStatus::Read);
    }

    #[test]
    fn decodes_interleaved_items() {
        let json = r#"[
            {"kind":"message","messageID":"m-1","conversationID":"c-1","senderID":"bob",
             "body":"hi","createdAt":100,"status":"SENT","messageSeq":4},
            {"kind":"action","actionID":"m-0:DELIVERED:bob","messageID":"m-0","senderID":"me",
             "receiverID":"bob","actionType":"DELIVERED","actionAtMillis":120}
        ]"#;
        let items: Vec<InboxItem> = serde_json::from_str(json).unwrap();
        assert_eq!(items.len(), 2);
        match &items[0] {
            InboxItem::NewMessage(m) => {
                assert_eq!(m.message_seq, Some(4));
                assert_eq!(m.status, MessageStatus::Sent);
            }
            other => panic!("unexpected item: {:?}", other),
        }
        assert_eq!(items[1].timestamp_millis(), 120);
    }
}
