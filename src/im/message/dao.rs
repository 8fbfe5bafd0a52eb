//! 消息数据访问层（DAO）
//!
//! 负责所有消息相关的数据库操作，将数据访问逻辑与业务逻辑分离。
//! 本地消息库是唯一数据源：乐观发送、回执对账、本地删除都通过这里写入，
//! 界面层通过 [`MessageStore::observe_messages`] 响应式地读取。

use crate::im::db::observe_query;
use crate::im::message::models::{Message, MessageStatus, SendAck};
use crate::im::types::now_millis;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 对账器依赖的本地存储能力
#[async_trait]
pub trait MessageStatusStore: Send + Sync {
    /// 查询消息当前状态，消息不存在时返回 `None`
    async fn get_message_status(&self, message_id: &str) -> Result<Option<MessageStatus>>;

    /// 写入消息状态
    async fn update_message_status(&self, message_id: &str, status: MessageStatus) -> Result<()>;

    /// 动作是否已经处理过
    async fn has_processed_action(&self, action_id: &str) -> Result<bool>;

    /// 记录动作已处理（幂等标记）
    async fn mark_action_processed(&self, action_id: &str) -> Result<()>;

    /// 写入或更新一条消息，已存在时状态不降级
    async fn upsert_message(&self, message: &Message) -> Result<()>;

    /// 读取会话的远端订阅游标，从未订阅过时返回 `None`
    async fn load_inbox_cursor(&self, conversation_id: &str) -> Result<Option<i64>>;

    /// 保存会话的远端订阅游标
    async fn save_inbox_cursor(&self, conversation_id: &str, since_millis: i64) -> Result<()>;
}

/// 本地消息存储（sqlx / SQLite）
pub struct MessageStore {
    pool: Pool<Sqlite>,
    /// 变更通知，内容为发生变更的会话 ID
    changes: broadcast::Sender<String>,
}

impl MessageStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { pool, changes }
    }

    fn notify(&self, conversation_id: &str) {
        // 没有观察者时 send 返回 Err，可以忽略
        let _ = self.changes.send(conversation_id.to_string());
    }

    /// 观察会话消息列表，每次变更产出一份按时间排序的完整快照
    pub fn observe_messages(
        self: &Arc<Self>,
        conversation_id: &str,
    ) -> BoxStream<'static, Result<Vec<Message>>> {
        let store = Arc::clone(self);
        observe_query(
            self.changes.subscribe(),
            conversation_id.to_string(),
            move |conversation_id| {
                let store = Arc::clone(&store);
                async move { store.get_messages(&conversation_id).await }
            },
        )
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM local_messages WHERE message_id = ? LIMIT 1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .context("查询消息失败")?;
        row.map(Self::row_to_message).transpose()
    }

    /// 会话内全部消息，按创建时间升序
    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM local_messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, message_seq ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .context("查询会话消息失败")?;

        let messages = rows
            .into_iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "[MsgStore] 会话 {} 共 {} 条消息",
            conversation_id,
            messages.len()
        );
        Ok(messages)
    }

    /// 乐观发送成功后，用服务端 ID / seq 替换临时记录并推进到 SENT
    ///
    /// 如果远端推送已经先写入了服务端 ID 对应的消息，只删除临时记录。
    pub async fn confirm_sent(&self, temp_id: &str, ack: &SendAck) -> Result<()> {
        let mut tx = self.pool.begin().await.context("开启事务失败")?;

        let temp_row = sqlx::query("SELECT conversation_id FROM local_messages WHERE message_id = ?")
            .bind(temp_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(temp_row) = temp_row else {
            debug!("[MsgStore] 临时消息 {} 已不存在，跳过确认", temp_id);
            return Ok(());
        };
        let conversation_id: String = temp_row.try_get("conversation_id")?;

        let existing = sqlx::query("SELECT status FROM local_messages WHERE message_id = ?")
            .bind(&ack.message_id)
            .fetch_optional(&mut *tx)
            .await?;

        if existing.is_some() && ack.message_id != temp_id {
            sqlx::query("DELETE FROM local_messages WHERE message_id = ?")
                .bind(temp_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE local_messages
                SET message_id = ?, status = ?, created_at = ?, message_seq = ?
                WHERE message_id = ?
                "#,
            )
            .bind(&ack.message_id)
            .bind(MessageStatus::Sent.as_str())
            .bind(ack.created_at)
            .bind(ack.message_seq)
            .bind(temp_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.context("提交事务失败")?;

        info!(
            "[MsgStore] ✅ 消息发送确认: tempID={} -> messageID={}",
            temp_id, ack.message_id
        );
        self.notify(&conversation_id);
        Ok(())
    }

    /// 本地删除消息，返回是否删除了记录
    pub async fn delete_message(&self, message_id: &str) -> Result<bool> {
        let row = sqlx::query("DELETE FROM local_messages WHERE message_id = ? RETURNING conversation_id")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .context("删除消息失败")?;
        match row {
            Some(row) => {
                let conversation_id: String = row.try_get("conversation_id")?;
                self.notify(&conversation_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn row_to_message(row: SqliteRow) -> Result<Message> {
        let status: String = row.try_get("status")?;
        let metadata: String = row.try_get("metadata")?;
        Ok(Message {
            id: row.try_get("message_id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_id: row.try_get("sender_id")?,
            body: row.try_get("body")?,
            created_at: row.try_get("created_at")?,
            status: status.parse()?,
            message_seq: row.try_get("message_seq")?,
            local_temp_id: row.try_get("local_temp_id")?,
            metadata: serde_json::from_str::<HashMap<String, String>>(&metadata)
                .context("解析消息 metadata 失败")?,
        })
    }
}

#[async_trait]
impl MessageStatusStore for MessageStore {
    async fn get_message_status(&self, message_id: &str) -> Result<Option<MessageStatus>> {
        let row = sqlx::query("SELECT status FROM local_messages WHERE message_id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .context("查询消息状态失败")?;
        row.map(|row| -> Result<MessageStatus> { row.try_get::<String, _>("status")?.parse() })
            .transpose()
    }

    async fn update_message_status(&self, message_id: &str, status: MessageStatus) -> Result<()> {
        let row = sqlx::query(
            "UPDATE local_messages SET status = ? WHERE message_id = ? RETURNING conversation_id",
        )
        .bind(status.as_str())
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .context("更新消息状态失败")?;

        if let Some(row) = row {
            let conversation_id: String = row.try_get("conversation_id")?;
            debug!(
                "[MsgStore] 消息状态更新: messageID={}, status={}",
                message_id, status
            );
            self.notify(&conversation_id);
        }
        Ok(())
    }

    async fn has_processed_action(&self, action_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS hit FROM local_processed_actions WHERE action_id = ?")
            .bind(action_id)
            .fetch_optional(&self.pool)
            .await
            .context("查询幂等标记失败")?;
        Ok(row.is_some())
    }

    async fn mark_action_processed(&self, action_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO local_processed_actions (action_id, processed_at) VALUES (?, ?)",
        )
        .bind(action_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .context("写入幂等标记失败")?;
        Ok(())
    }

    async fn load_inbox_cursor(&self, conversation_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT since_millis FROM local_inbox_cursors WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .context("查询订阅游标失败")?;
        row.map(|row| row.try_get::<i64, _>("since_millis"))
            .transpose()
            .map_err(Into::into)
    }

    async fn save_inbox_cursor(&self, conversation_id: &str, since_millis: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_inbox_cursors (conversation_id, since_millis, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                since_millis = excluded.since_millis,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(since_millis)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .context("保存订阅游标失败")?;
        debug!(
            "[MsgStore] 订阅游标更新: conversationID={}, since={}",
            conversation_id, since_millis
        );
        Ok(())
    }

    async fn upsert_message(&self, message: &Message) -> Result<()> {
        let metadata = serde_json::to_string(&message.metadata)?;
        let mut tx = self.pool.begin().await.context("开启事务失败")?;

        // 远端回传了乐观发送的消息：去掉临时记录，避免重复展示
        if let Some(temp_id) = message.local_temp_id.as_deref() {
            if temp_id != message.id {
                sqlx::query("DELETE FROM local_messages WHERE message_id = ?")
                    .bind(temp_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let existing = sqlx::query("SELECT status FROM local_messages WHERE message_id = ?")
            .bind(&message.id)
            .fetch_optional(&mut *tx)
            .await?;
        let status = match existing {
            Some(row) => row
                .try_get::<String, _>("status")?
                .parse::<MessageStatus>()?
                .max_progress(message.status),
            None => message.status,
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO local_messages (
                message_id, conversation_id, sender_id, body, created_at,
                status, message_seq, local_temp_id, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.body)
        .bind(message.created_at)
        .bind(status.as_str())
        .bind(message.message_seq)
        .bind(&message.local_temp_id)
        .bind(&metadata)
        .execute(&mut *tx)
        .await?;
        tx.commit().await.context("提交事务失败")?;

        debug!(
            "[MsgStore] 写入消息: conversationID={}, messageID={}, status={}",
            message.conversation_id, message.id, status
        );
        self.notify(&message.conversation_id);
        Ok(())
    }
}
