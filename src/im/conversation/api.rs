//! 会话 HTTP API 客户端
//!
//! 负责标记已读、发送消息等会话相关的 HTTP 请求

use crate::im::conversation::models::MarkReadRequest;
use crate::im::error::ChatError;
use crate::im::message::models::{Message, SendAck};
use crate::im::types::handle_http_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// 已读回执上报
#[async_trait]
pub trait ReadReceiptApi: Send + Sync {
    async fn mark_read(&self, request: &MarkReadRequest) -> Result<()>;
}

/// 消息发送
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, message: &Message) -> Result<SendAck>;
}

/// 会话相关的 HTTP API 客户端
#[derive(Clone)]
pub struct ConversationApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
}

impl ConversationApi {
    /// 创建新的会话 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, api_base_url: String, user_id: String) -> Self {
        Self {
            client,
            api_base_url,
            user_id,
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        operation_name: &str,
    ) -> Result<Option<T>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.api_base_url, path);
        debug!(
            "[ConvAPI] 📡 {}: url={}, operationID={}",
            operation_name, url, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))
            .with_context(|| format!("{}请求失败", operation_name))?;

        let resp = handle_http_response::<T>(response, operation_name).await?;
        Ok(resp.data)
    }
}

#[async_trait]
impl ReadReceiptApi for ConversationApi {
    async fn mark_read(&self, request: &MarkReadRequest) -> Result<()> {
        info!(
            "[ConvAPI] 📡 标记会话已读: conversationID={}, hasReadSeq={:?}, readAt={}",
            request.conversation_id, request.seq, request.read_at
        );
        self.post::<serde_json::Value>(
            "/conversation/mark_read",
            serde_json::json!({
                "conversationID": request.conversation_id,
                "userID": self.user_id,
                "readAt": request.read_at,
                "hasReadSeq": request.seq,
            }),
            "标记会话已读",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSender for ConversationApi {
    async fn send_message(&self, message: &Message) -> Result<SendAck> {
        let ack = self
            .post::<SendAck>(
                "/msg/send",
                serde_json::json!({
                    "conversationID": message.conversation_id,
                    "senderID": self.user_id,
                    "localTempID": message.local_temp_id,
                    "body": message.body,
                    "createdAt": message.created_at,
                    "metadata": message.metadata,
                }),
                "发送消息",
            )
            .await?
            .ok_or_else(|| ChatError::InvalidData("发送消息响应中没有数据".to_string()))?;
        info!(
            "[ConvAPI] ✅ 消息发送成功: conversationID={}, messageID={}",
            message.conversation_id, ack.message_id
        );
        Ok(ack)
    }
}
