//! 回执对账
//!
//! 把远端推送的送达 / 已读回执转换为本地消息状态的单调升级：
//! - 同一个回执 ID 至多生效一次（幂等标记持久化在本地库）；
//! - 状态只前进不后退，迟到的 DELIVERED 不会覆盖 READ；
//! - 引用了本地不存在的消息的回执直接标记已处理，不做重试；
//! - 写状态失败时错误返回给调用方，回执保持未处理，重新投递时会再次尝试。

use crate::im::inbox::types::{InboxAction, InboxItem};
use crate::im::message::dao::MessageStatusStore;
use crate::im::message::models::MessageStatus;
use anyhow::{Context, Result};
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 单个回执的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// 状态已升级
    Applied {
        from: MessageStatus,
        to: MessageStatus,
    },
    /// 当前状态已经不低于回执目标，忽略
    Ignored { current: MessageStatus },
    /// 本地没有这条消息
    MissingMessage,
    /// 此前已经处理过
    AlreadyProcessed,
}

/// 重新订阅时使用的游标
///
/// 成功处理的条目推进游标；处理失败的条目会把游标钉在它的时间上，
/// 下次订阅从那里重新拉取。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeCursor {
    handled: i64,
    earliest_failed: Option<i64>,
}

impl ResumeCursor {
    pub fn new(since_millis: i64) -> Self {
        Self {
            handled: since_millis,
            earliest_failed: None,
        }
    }

    pub fn record_success(&mut self, ts: i64) {
        self.handled = self.handled.max(ts);
    }

    pub fn record_failure(&mut self, ts: i64) {
        self.earliest_failed = Some(self.earliest_failed.map_or(ts, |t| t.min(ts)));
    }

    pub fn resume_from(&self) -> i64 {
        match self.earliest_failed {
            Some(failed) => failed.min(self.handled),
            None => self.handled,
        }
    }

    /// 开始新一轮订阅，返回订阅起点
    pub fn restart(&mut self) -> i64 {
        let from = self.resume_from();
        self.handled = from;
        self.earliest_failed = None;
        from
    }
}

/// 一次 `run` 的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub handled: usize,
    pub failed: usize,
}

/// 回执对账器
pub struct ActionReconciler {
    store: Arc<dyn MessageStatusStore>,
}

impl ActionReconciler {
    pub fn new(store: Arc<dyn MessageStatusStore>) -> Self {
        Self { store }
    }

    /// 处理单个回执
    pub async fn process_action(&self, action: &InboxAction) -> Result<ActionOutcome> {
        if self.store.has_processed_action(&action.id).await? {
            debug!("[Reconciler] 回执已处理，跳过: actionID={}", action.id);
            return Ok(ActionOutcome::AlreadyProcessed);
        }

        let Some(current) = self.store.get_message_status(&action.message_id).await? else {
            debug!(
                "[Reconciler] 本地无此消息，标记回执已处理: actionID={}, messageID={}",
                action.id, action.message_id
            );
            self.store.mark_action_processed(&action.id).await?;
            return Ok(ActionOutcome::MissingMessage);
        };

        let target = action.action_type.target_status();
        let outcome = if current.can_upgrade_to(target) {
            self.store
                .update_message_status(&action.message_id, target)
                .await
                .with_context(|| format!("应用回执失败: actionID={}", action.id))?;
            info!(
                "[Reconciler] ✅ 消息状态升级: messageID={}, {} -> {}",
                action.message_id, current, target
            );
            ActionOutcome::Applied {
                from: current,
                to: target,
            }
        } else {
            debug!(
                "[Reconciler] 忽略过期回执: messageID={}, 当前={}, 回执={}",
                action.message_id, current, action.action_type
            );
            ActionOutcome::Ignored { current }
        };

        // 状态写入成功后才记录幂等标记
        self.store.mark_action_processed(&action.id).await?;
        Ok(outcome)
    }

    /// 处理收件箱条目：新消息写入本地库，回执走对账
    pub async fn process_item(&self, item: &InboxItem) -> Result<Option<ActionOutcome>> {
        match item {
            InboxItem::NewMessage(message) => {
                self.store
                    .upsert_message(message)
                    .await
                    .with_context(|| format!("写入新消息失败: messageID={}", message.id))?;
                Ok(None)
            }
            InboxItem::Action(action) => self.process_action(action).await.map(Some),
        }
    }

    /// 按投递顺序消费整条远端流，直到流结束
    ///
    /// 单个条目失败只记录并跳过（回执保持未处理），流本身的错误交给 `on_error`。
    /// 游标每次变化都写入本地库，重新打开会话时从这里继续订阅。
    pub async fn run<F>(
        &self,
        conversation_id: &str,
        mut stream: BoxStream<'static, Result<InboxItem>>,
        cursor: &mut ResumeCursor,
        mut on_error: F,
    ) -> RunSummary
    where
        F: FnMut(&anyhow::Error) + Send,
    {
        let mut summary = RunSummary::default();
        let mut saved = cursor.resume_from();
        while let Some(next) = stream.next().await {
            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    warn!("[Reconciler] 远端流错误: {:#}", e);
                    on_error(&e);
                    continue;
                }
            };
            match self.process_item(&item).await {
                Ok(_) => {
                    summary.handled += 1;
                    cursor.record_success(item.timestamp_millis());
                }
                Err(e) => {
                    warn!("[Reconciler] 处理条目失败，等待重新投递: {:#}", e);
                    summary.failed += 1;
                    cursor.record_failure(item.timestamp_millis());
                    on_error(&e);
                }
            }

            let from = cursor.resume_from();
            if from != saved {
                match self.store.save_inbox_cursor(conversation_id, from).await {
                    Ok(()) => saved = from,
                    Err(e) => {
                        warn!("[Reconciler] 保存订阅游标失败: {:#}", e);
                        on_error(&e);
                    }
                }
            }
        }
        debug!(
            "[Reconciler] 远端流结束: handled={}, failed={}",
            summary.handled, summary.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::db::memory_pool;
    use crate::im::inbox::types::InboxActionType;
    use crate::im::message::dao::tests::message;
    use crate::im::message::dao::MessageStore;
    use crate::im::message::models::Message;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 统计写状态次数，可配置前 N 次写入失败
    struct CountingStore {
        inner: MessageStore,
        updates: AtomicUsize,
        fail_next_updates: AtomicUsize,
    }

    impl CountingStore {
        async fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: MessageStore::new(memory_pool().await),
                updates: AtomicUsize::new(0),
                fail_next_updates: AtomicUsize::new(0),
            })
        }

        fn updates(&self) -> usize {
            self.updates.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageStatusStore for CountingStore {
        async fn get_message_status(&self, message_id: &str) -> Result<Option<MessageStatus>> {
            self.inner.get_message_status(message_id).await
        }

        async fn update_message_status(
            &self,
            message_id: &str,
            status: MessageStatus,
        ) -> Result<()> {
            let remaining = self.fail_next_updates.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next_updates.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("disk I/O error");
            }
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update_message_status(message_id, status).await
        }

        async fn has_processed_action(&self, action_id: &str) -> Result<bool> {
            self.inner.has_processed_action(action_id).await
        }

        async fn mark_action_processed(&self, action_id: &str) -> Result<()> {
            self.inner.mark_action_processed(action_id).await
        }

        async fn upsert_message(&self, message: &Message) -> Result<()> {
            self.inner.upsert_message(message).await
        }

        async fn load_inbox_cursor(&self, conversation_id: &str) -> Result<Option<i64>> {
            self.inner.load_inbox_cursor(conversation_id).await
        }

        async fn save_inbox_cursor(&self, conversation_id: &str, since_millis: i64) -> Result<()> {
            self.inner.save_inbox_cursor(conversation_id, since_millis).await
        }
    }

    fn receipt(message_id: &str, actor: &str, kind: InboxActionType, at: i64) -> InboxAction {
        InboxAction::new(message_id, "me", actor, kind, at)
    }

    async fn status_of(store: &CountingStore, id: &str) -> Option<MessageStatus> {
        store.get_message_status(id).await.unwrap()
    }

    #[tokio::test]
    async fn delivered_then_read_then_stale_redelivery() {
        let store = CountingStore::new().await;
        store
            .upsert_message(&message("msg-2", "me", 100, MessageStatus::Sent))
            .await
            .unwrap();
        let reconciler = ActionReconciler::new(store.clone());

        let delivered = receipt("msg-2", "bob", InboxActionType::Delivered, 110);
        let read = receipt("msg-2", "bob", InboxActionType::Read, 120);

        assert_eq!(
            reconciler.process_action(&delivered).await.unwrap(),
            ActionOutcome::Applied {
                from: MessageStatus::Sent,
                to: MessageStatus::Delivered
            }
        );
        assert_eq!(
            reconciler.process_action(&read).await.unwrap(),
            ActionOutcome::Applied {
                from: MessageStatus::Delivered,
                to: MessageStatus::Read
            }
        );
        assert_eq!(
            reconciler.process_action(&delivered).await.unwrap(),
            ActionOutcome::AlreadyProcessed
        );

        assert_eq!(status_of(&store, "msg-2").await, Some(MessageStatus::Read));
        assert_eq!(store.updates(), 2);
    }

    #[tokio::test]
    async fn same_action_applies_once() {
        let store = CountingStore::new().await;
        store
            .upsert_message(&message("m-1", "me", 100, MessageStatus::Sent))
            .await
            .unwrap();
        let reconciler = ActionReconciler::new(store.clone());

        let read = receipt("m-1", "bob", InboxActionType::Read, 120);
        reconciler.process_action(&read).await.unwrap();
        reconciler.process_action(&read).await.unwrap();
        reconciler.process_action(&read).await.unwrap();

        assert_eq!(store.updates(), 1);
        assert!(store.has_processed_action(&read.id).await.unwrap());
    }

    #[tokio::test]
    async fn stale_delivered_after_read_from_other_actor_is_ignored() {
        let store = CountingStore::new().await;
        store
            .upsert_message(&message("m-1", "me", 100, MessageStatus::Sent))
            .await
            .unwrap();
        let reconciler = ActionReconciler::new(store.clone());

        reconciler
            .process_action(&receipt("m-1", "bob", InboxActionType::Read, 120))
            .await
            .unwrap();
        let outcome = reconciler
            .process_action(&receipt("m-1", "carol", InboxActionType::Delivered, 110))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ActionOutcome::Ignored {
                current: MessageStatus::Read
            }
        );
        assert_eq!(status_of(&store, "m-1").await, Some(MessageStatus::Read));
        assert_eq!(store.updates(), 1);
    }

    #[tokio::test]
    async fn missing_message_is_marked_processed() {
        let store = CountingStore::new().await;
        let reconciler = ActionReconciler::new(store.clone());
        let ghost = receipt("ghost", "bob", InboxActionType::Read, 120);

        assert_eq!(
            reconciler.process_action(&ghost).await.unwrap(),
            ActionOutcome::MissingMessage
        );
        assert!(store.has_processed_action(&ghost.id).await.unwrap());
        assert_eq!(store.updates(), 0);

        // 消息之后才到达，旧回执不会再次生效
        store
            .upsert_message(&message("ghost", "me", 100, MessageStatus::Sent))
            .await
            .unwrap();
        assert_eq!(
            reconciler.process_action(&ghost).await.unwrap(),
            ActionOutcome::AlreadyProcessed
        );
        assert_eq!(status_of(&store, "ghost").await, Some(MessageStatus::Sent));
    }

    #[tokio::test]
    async fn storage_failure_leaves_action_unprocessed() {
        let store = CountingStore::new().await;
        store
            .upsert_message(&message("m-1", "me", 100, MessageStatus::Sent))
            .await
            .unwrap();
        store.fail_next_updates.store(1, Ordering::SeqCst);
        let reconciler = ActionReconciler::new(store.clone());
        let delivered = receipt("m-1", "bob", InboxActionType::Delivered, 110);

        assert!(reconciler.process_action(&delivered).await.is_err());
        assert!(!store.has_processed_action(&delivered.id).await.unwrap());
        assert_eq!(status_of(&store, "m-1").await, Some(MessageStatus::Sent));

        // 重新投递后收敛到同一结果
        reconciler.process_action(&delivered).await.unwrap();
        assert_eq!(status_of(&store, "m-1").await, Some(MessageStatus::Delivered));
        assert!(store.has_processed_action(&delivered.id).await.unwrap());
    }

    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[tokio::test]
    async fn final_status_is_max_for_every_order() {
        let actions = vec![
            receipt("m-1", "bob", InboxActionType::Delivered, 110),
            receipt("m-1", "carol", InboxActionType::Delivered, 111),
            receipt("m-1", "bob", InboxActionType::Read, 120),
            receipt("m-1", "bob", InboxActionType::Delivered, 110),
        ];

        for order in permutations(&actions) {
            let store = CountingStore::new().await;
            store
                .upsert_message(&message("m-1", "me", 100, MessageStatus::Sent))
                .await
                .unwrap();
            let reconciler = ActionReconciler::new(store.clone());
            for action in &order {
                reconciler.process_action(action).await.unwrap();
            }
            assert_eq!(status_of(&store, "m-1").await, Some(MessageStatus::Read));
            assert!(store.updates() <= 2, "order {:?}", order);
        }

        for order in permutations(&actions[..2]) {
            let store = CountingStore::new().await;
            store
                .upsert_message(&message("m-1", "me", 100, MessageStatus::Sent))
                .await
                .unwrap();
            let reconciler = ActionReconciler::new(store.clone());
            for action in &order {
                reconciler.process_action(action).await.unwrap();
            }
            assert_eq!(
                status_of(&store, "m-1").await,
                Some(MessageStatus::Delivered)
            );
            assert_eq!(store.updates(), 1);
        }
    }

    #[tokio::test]
    async fn run_consumes_interleaved_stream_and_tracks_cursor() {
        let store = CountingStore::new().await;
        let reconciler = ActionReconciler::new(store.clone());
        store.fail_next_updates.store(1, Ordering::SeqCst);

        let items: Vec<Result<InboxItem>> = vec![
            Ok(InboxItem::NewMessage(message("m-1", "me", 100, MessageStatus::Sent))),
            Ok(InboxItem::Action(receipt("m-1", "bob", InboxActionType::Delivered, 110))),
            Err(anyhow::anyhow!("temporary outage")),
            Ok(InboxItem::Action(receipt("m-1", "bob", InboxActionType::Read, 130))),
        ];
        let mut cursor = ResumeCursor::new(0);
        let mut errors = 0;
        let summary = reconciler
            .run("conv-1", stream::iter(items).boxed(), &mut cursor, |_| errors += 1)
            .await;

        assert_eq!(summary, RunSummary { handled: 2, failed: 1 });
        assert_eq!(errors, 2);
        assert_eq!(status_of(&store, "m-1").await, Some(MessageStatus::Read));
        // 失败的 DELIVERED 把游标钉在 110
        assert_eq!(cursor.resume_from(), 110);
        assert_eq!(
            store.load_inbox_cursor("conv-1").await.unwrap(),
            Some(110)
        );
        assert_eq!(cursor.restart(), 110);
        assert_eq!(cursor.resume_from(), 110);
    }
}
