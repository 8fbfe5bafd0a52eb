//! 会话参与者数据访问层（DAO）

use crate::im::db::observe_query;
use crate::im::participant::models::Participant;
use crate::im::types::max_opt;
use anyhow::{Context, Result};
use futures_util::stream::BoxStream;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite, Transaction};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 参与者存储（基于 sqlx）
pub struct ParticipantStore {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<String>,
}

impl ParticipantStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { pool, changes }
    }

    fn notify(&self, conversation_id: &str) {
        let _ = self.changes.send(conversation_id.to_string());
    }

    /// 观察某用户在会话中的参与者记录（记录不存在时产出 `None`）
    pub fn observe_participant(
        self: &Arc<Self>,
        conversation_id: &str,
        user_id: &str,
    ) -> BoxStream<'static, Result<Option<Participant>>> {
        let store = Arc::clone(self);
        let user_id = user_id.to_string();
        observe_query(
            self.changes.subscribe(),
            conversation_id.to_string(),
            move |conversation_id| {
                let store = Arc::clone(&store);
                let user_id = user_id.clone();
                async move { store.get_participant(&conversation_id, &user_id).await }
            },
        )
    }

    pub async fn get_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>> {
        let row = sqlx::query(
            "SELECT * FROM local_participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("查询参与者失败")?;
        row.map(Self::row_to_participant).transpose()
    }

    /// 记录已读位置，不存在时先创建默认参与者
    ///
    /// `last_read_seq` / `last_read_at` 只会变大，较早到达的旧确认不会回退状态。
    pub async fn record_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        read_seq: Option<i64>,
        read_at: i64,
    ) -> Result<Participant> {
        let mut tx = self.pool.begin().await.context("开启事务失败")?;
        let current = Self::ensure_in_tx(&mut tx, conversation_id, user_id).await?;

        let last_read_seq = max_opt(current.last_read_seq, read_seq);
        let last_read_at = max_opt(current.last_read_at, Some(read_at));
        sqlx::query(
            r#"
            UPDATE local_participants
            SET last_read_seq = ?, last_read_at = ?
            WHERE conversation_id = ? AND user_id = ?
            "#,
        )
        .bind(last_read_seq)
        .bind(last_read_at)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("更新已读位置失败")?;
        tx.commit().await.context("提交事务失败")?;

        info!(
            "[Participant] 已读位置: conversationID={}, userID={}, seq={:?}, at={:?}",
            conversation_id, user_id, last_read_seq, last_read_at
        );
        self.notify(conversation_id);
        Ok(Participant {
            last_read_seq,
            last_read_at,
            ..current
        })
    }

    /// 设置免打扰截止时间（毫秒），0 表示关闭
    pub async fn set_mute_until(
        &self,
        conversation_id: &str,
        user_id: &str,
        mute_until: i64,
    ) -> Result<()> {
        self.update_flag(conversation_id, user_id, "mute_until", mute_until)
            .await
    }

    pub async fn set_pinned(&self, conversation_id: &str, user_id: &str, pinned: bool) -> Result<()> {
        self.update_flag(conversation_id, user_id, "pinned", pinned as i64)
            .await
    }

    pub async fn set_archived(
        &self,
        conversation_id: &str,
        user_id: &str,
        archived: bool,
    ) -> Result<()> {
        self.update_flag(conversation_id, user_id, "archived", archived as i64)
            .await
    }

    async fn update_flag(
        &self,
        conversation_id: &str,
        user_id: &str,
        column: &'static str,
        value: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("开启事务失败")?;
        Self::ensure_in_tx(&mut tx, conversation_id, user_id).await?;
        let sql = format!(
            "UPDATE local_participants SET {column} = ? WHERE conversation_id = ? AND user_id = ?"
        );
        sqlx::query(&sql)
            .bind(value)
            .bind(conversation_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("更新参与者字段 {} 失败", column))?;
        tx.commit().await.context("提交事务失败")?;

        debug!(
            "[Participant] {}={}: conversationID={}, userID={}",
            column, value, conversation_id, user_id
        );
        self.notify(conversation_id);
        Ok(())
    }

    /// 确保参与者记录存在，返回当前记录
    async fn ensure_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Participant> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO local_participants (conversation_id, user_id) VALUES (?, ?)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .context("创建默认参与者失败")?;
        if inserted.rows_affected() > 0 {
            debug!(
                "[Participant] 创建默认参与者: conversationID={}, userID={}",
                conversation_id, user_id
            );
        }

        let row = sqlx::query(
            "SELECT * FROM local_participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
        .context("查询参与者失败")?;
        Self::row_to_participant(row)
    }

    fn row_to_participant(row: SqliteRow) -> Result<Participant> {
        Ok(Participant {
            conversation_id: row.try_get("conversation_id")?,
            user_id: row.try_get("user_id")?,
            last_read_seq: row.try_get("last_read_seq")?,
            last_read_at: row.try_get("last_read_at")?,
            mute_until: row.try_get("mute_until")?,
            pinned: row.try_get::<i64, _>("pinned")? != 0,
            archived: row.try_get::<i64, _>("archived")? != 0,
        })
    }
}
