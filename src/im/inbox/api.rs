//! 收件箱 HTTP API 客户端
//!
//! 以轮询方式把远端收件箱包装成可重启的实时流

use crate::im::error::ChatError;
use crate::im::inbox::types::InboxItem;
use crate::im::types::handle_http_response;
use anyhow::{Context, Result};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 远端收件箱
///
/// 返回的流按投递顺序产出条目，可以随时丢弃后用新的游标重新订阅。
pub trait RemoteInbox: Send + Sync {
    fn observe_conversation(
        &self,
        conversation_id: &str,
        since_millis: i64,
    ) -> BoxStream<'static, Result<InboxItem>>;
}

#[derive(Debug, Deserialize)]
struct PullInboxResp {
    #[serde(default)]
    items: Vec<InboxItem>,
}

/// 收件箱相关的 HTTP API 客户端
#[derive(Clone)]
pub struct InboxApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
    poll_interval: Duration,
}

impl InboxApi {
    /// 创建新的收件箱 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证头
    pub fn new(
        client: reqwest::Client,
        api_base_url: String,
        user_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            api_base_url,
            user_id,
            poll_interval,
        }
    }

    /// 拉取会话中 `since_millis`（含）之后的收件箱条目
    pub async fn pull(&self, conversation_id: &str, since_millis: i64) -> Result<Vec<InboxItem>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/inbox/pull", self.api_base_url);
        debug!(
            "[InboxAPI] 📡 拉取收件箱: conversationID={}, since={}, operationID={}",
            conversation_id, since_millis, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&serde_json::json!({
                "conversationID": conversation_id,
                "userID": self.user_id,
                "sinceMillis": since_millis,
            }))
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))
            .context("拉取收件箱请求失败")?;

        let resp = handle_http_response::<PullInboxResp>(response, "拉取收件箱").await?;
        let items = resp.data.map(|d| d.items).unwrap_or_default();
        if !items.is_empty() {
            info!(
                "[InboxAPI] 📥 收到 {} 条收件箱条目: conversationID={}",
                items.len(),
                conversation_id
            );
        }
        Ok(items)
    }
}

struct PollState {
    api: InboxApi,
    conversation_id: String,
    /// 下一次拉取使用的游标（闭区间）
    cursor: i64,
    /// 已产出条目的键和时间，只保留时间不早于游标的部分，用于闭区间去重
    seen: HashMap<String, i64>,
    buffer: VecDeque<InboxItem>,
    first: bool,
}

impl PollState {
    /// 接收一整批拉取结果
    ///
    /// 服务端时间可能乱序，同一批内的条目只按键去重，全部进入缓冲区；
    /// 整批入队后游标才推进到这一批的最大时间。
    fn accept_batch(&mut self, items: Vec<InboxItem>) {
        let mut latest = self.cursor;
        for item in items {
            let ts = item.timestamp_millis();
            if self.seen.contains_key(item.key()) {
                debug!(
                    "[InboxAPI] 跳过重复条目: conversationID={}, key={}, ts={}",
                    self.conversation_id,
                    item.key(),
                    ts
                );
                continue;
            }
            latest = latest.max(ts);
            self.seen.insert(item.key().to_string(), ts);
            self.buffer.push_back(item);
        }
        self.cursor = latest;
        self.seen.retain(|_, ts| *ts >= latest);
    }
}

impl RemoteInbox for InboxApi {
    fn observe_conversation(
        &self,
        conversation_id: &str,
        since_millis: i64,
    ) -> BoxStream<'static, Result<InboxItem>> {
        let state = PollState {
            api: self.clone(),
            conversation_id: conversation_id.to_string(),
            cursor: since_millis,
            seen: HashMap::new(),
            buffer: VecDeque::new(),
            first: true,
        };
        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.buffer.pop_front() {
                    return Some((Ok(item), state));
                }
                if !state.first {
                    tokio::time::sleep(state.api.poll_interval).await;
                }
                state.first = false;
                match state.api.pull(&state.conversation_id, state.cursor).await {
                    Ok(items) => state.accept_batch(items),
                    Err(e) => {
                        warn!(
                            "[InboxAPI] 拉取失败，稍后重试: conversationID={}, err={:#}",
                            state.conversation_id, e
                        );
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed()
    }
}
