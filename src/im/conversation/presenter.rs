//! 会话展示层
//!
//! 一个 [`ConversationPresenter`] 对应一个打开的会话，负责：
//! - 观察本地消息与参与者记录，合成界面状态；
//! - 订阅远端收件箱并交给对账器写入本地库；
//! - 发现新的对端消息时自动上报已读（同一会话只保留一个进行中的请求，新请求会取消旧请求）；
//! - `stop()` 时同步取消以上所有后台任务。

use crate::im::auth::Session;
use crate::im::conversation::api::{MessageSender, ReadReceiptApi};
use crate::im::conversation::models::{ConversationUiState, MarkReadRequest};
use crate::im::conversation::read_state::ReadStateTracker;
use crate::im::error::{error_message, ChatError};
use crate::im::inbox::api::RemoteInbox;
use crate::im::inbox::reconciler::{ActionReconciler, ResumeCursor};
use crate::im::message::dao::{MessageStatusStore, MessageStore};
use crate::im::message::models::{Message, MessageStatus};
use crate::im::participant::dao::ParticipantStore;
use crate::im::types::now_millis;
use anyhow::Result;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 会话展示层依赖
#[derive(Clone)]
pub struct ConversationDeps {
    pub session: Session,
    pub messages: Arc<MessageStore>,
    pub participants: Arc<ParticipantStore>,
    pub inbox: Arc<dyn RemoteInbox>,
    pub read_receipts: Arc<dyn ReadReceiptApi>,
    pub sender: Arc<dyn MessageSender>,
    /// 远端流结束或出错后重新订阅前的等待时间
    pub resubscribe_delay: Duration,
}

struct Inner {
    tracker: ReadStateTracker,
    mark_read_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    stopped: bool,
}

struct Shared {
    conversation_id: String,
    state_tx: watch::Sender<ConversationUiState>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_error(&self, message: String) {
        self.state_tx.send_modify(|state| state.error = Some(message));
    }
}

/// 会话展示层
pub struct ConversationPresenter {
    deps: ConversationDeps,
    shared: Arc<Shared>,
}

impl ConversationPresenter {
    /// 打开会话并启动后台任务，必须在 tokio 运行时内调用
    pub fn start(deps: ConversationDeps, conversation_id: &str) -> Self {
        let (state_tx, _) = watch::channel(ConversationUiState::loading(conversation_id));
        let shared = Arc::new(Shared {
            conversation_id: conversation_id.to_string(),
            state_tx,
            inner: Mutex::new(Inner {
                tracker: ReadStateTracker::new(conversation_id, &deps.session.user_id),
                mark_read_task: None,
                tasks: Vec::new(),
                stopped: false,
            }),
        });
        let presenter = Self { deps, shared };

        if !presenter.deps.session.is_authenticated() {
            warn!(
                "[Presenter] 未登录，不启动会话任务: conversationID={}",
                conversation_id
            );
            let message = ChatError::NotAuthenticated.user_message();
            presenter.shared.state_tx.send_modify(|state| {
                state.is_loading = false;
                state.error = Some(message);
            });
            return presenter;
        }

        info!("[Presenter] 🔄 打开会话: conversationID={}", conversation_id);
        let tasks = vec![
            tokio::spawn(Self::observe_messages(
                presenter.shared.clone(),
                presenter.deps.clone(),
            )),
            tokio::spawn(Self::observe_participant(
                presenter.shared.clone(),
                presenter.deps.clone(),
            )),
            tokio::spawn(Self::sync_inbox(
                presenter.shared.clone(),
                presenter.deps.clone(),
            )),
        ];
        presenter.shared.lock().tasks = tasks;
        presenter
    }

    pub fn conversation_id(&self) -> &str {
        &self.shared.conversation_id
    }

    /// 订阅界面状态
    pub fn state(&self) -> watch::Receiver<ConversationUiState> {
        self.shared.state_tx.subscribe()
    }

    /// 当前界面状态快照
    pub fn snapshot(&self) -> ConversationUiState {
        self.shared.state_tx.borrow().clone()
    }

    /// 界面已展示错误后清除
    pub fn clear_error(&self) {
        self.shared.state_tx.send_modify(|state| state.error = None);
    }

    /// 关闭会话：同步取消消息观察、参与者观察、远端订阅和进行中的已读请求
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if inner.stopped {
            return;
        }
        inner.stopped = true;
        if let Some(task) = inner.mark_read_task.take() {
            task.abort();
        }
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        info!(
            "[Presenter] 会话已关闭: conversationID={}",
            self.shared.conversation_id
        );
    }

    /// 发送文本消息：先以 SENDING 写入本地，成功后替换为服务端 ID 并标记 SENT，失败标记 ERROR
    pub async fn send_text(&self, body: &str) -> Result<Message> {
        let user_id = self.deps.session.require_user_id()?.to_string();
        let temp_id = format!("local-{}", Uuid::new_v4());
        let pending = Message {
            id: temp_id.clone(),
            conversation_id: self.shared.conversation_id.clone(),
            sender_id: user_id,
            body: body.to_string(),
            created_at: now_millis(),
            status: MessageStatus::Sending,
            message_seq: None,
            local_temp_id: Some(temp_id.clone()),
            metadata: HashMap::new(),
        };
        self.deps.messages.upsert_message(&pending).await?;

        match self.deps.sender.send_message(&pending).await {
            Ok(ack) => {
                self.deps.messages.confirm_sent(&temp_id, &ack).await?;
                Ok(Message {
                    id: ack.message_id,
                    created_at: ack.created_at,
                    message_seq: ack.message_seq,
                    status: MessageStatus::Sent,
                    ..pending
                })
            }
            Err(e) => {
                warn!("[Presenter] 消息发送失败: tempID={}, err={:#}", temp_id, e);
                self.deps
                    .messages
                    .update_message_status(&temp_id, MessageStatus::Error)
                    .await?;
                self.shared.set_error(error_message(&e, "消息发送失败"));
                Err(e)
            }
        }
    }

    /// 本地删除消息
    pub async fn delete_message(&self, message_id: &str) -> Result<bool> {
        self.deps.messages.delete_message(message_id).await
    }

    pub async fn set_muted_until(&self, mute_until: i64) -> Result<()> {
        let user_id = self.deps.session.require_user_id()?;
        self.deps
            .participants
            .set_mute_until(&self.shared.conversation_id, user_id, mute_until)
            .await
    }

    pub async fn set_pinned(&self, pinned: bool) -> Result<()> {
        let user_id = self.deps.session.require_user_id()?;
        self.deps
            .participants
            .set_pinned(&self.shared.conversation_id, user_id, pinned)
            .await
    }

    pub async fn set_archived(&self, archived: bool) -> Result<()> {
        let user_id = self.deps.session.require_user_id()?;
        self.deps
            .participants
            .set_archived(&self.shared.conversation_id, user_id, archived)
            .await
    }

    async fn observe_messages(shared: Arc<Shared>, deps: ConversationDeps) {
        let mut stream = deps.messages.observe_messages(&shared.conversation_id);
        while let Some(next) = stream.next().await {
            match next {
                Ok(messages) => {
                    debug!(
                        "[Presenter] 消息列表更新: conversationID={}, count={}",
                        shared.conversation_id,
                        messages.len()
                    );
                    shared.state_tx.send_modify(|state| {
                        state.messages = messages;
                        state.is_loading = false;
                    });
                    Self::on_state_changed(&shared, &deps);
                }
                Err(e) => {
                    warn!("[Presenter] 读取消息失败: {:#}", e);
                    shared.set_error(error_message(&e, "读取消息失败"));
                }
            }
        }
    }

    async fn observe_participant(shared: Arc<Shared>, deps: ConversationDeps) {
        let mut stream = deps
            .participants
            .observe_participant(&shared.conversation_id, &deps.session.user_id);
        while let Some(next) = stream.next().await {
            match next {
                Ok(participant) => {
                    shared
                        .state_tx
                        .send_modify(|state| state.participant = participant);
                    Self::on_state_changed(&shared, &deps);
                }
                Err(e) => {
                    warn!("[Presenter] 读取参与者失败: {:#}", e);
                    shared.set_error(error_message(&e, "读取会话状态失败"));
                }
            }
        }
    }

    /// 远端订阅循环：流结束或出错后按游标重新订阅
    async fn sync_inbox(shared: Arc<Shared>, deps: ConversationDeps) {
        let since = match deps.messages.load_inbox_cursor(&shared.conversation_id).await {
            Ok(saved) => saved.unwrap_or(0),
            Err(e) => {
                warn!("[Presenter] 读取订阅游标失败，从头订阅: {:#}", e);
                0
            }
        };
        let reconciler = ActionReconciler::new(deps.messages.clone());
        let mut cursor = ResumeCursor::new(since);

        loop {
            let from = cursor.restart();
            info!(
                "[Presenter] 📥 订阅远端收件箱: conversationID={}, since={}",
                shared.conversation_id, from
            );
            let stream = deps.inbox.observe_conversation(&shared.conversation_id, from);
            let summary = reconciler
                .run(&shared.conversation_id, stream, &mut cursor, |e| {
                    shared.set_error(error_message(e, "同步消息失败"))
                })
                .await;
            debug!(
                "[Presenter] 远端流结束: handled={}, failed={}，{:?} 后重新订阅",
                summary.handled, summary.failed, deps.resubscribe_delay
            );
            tokio::time::sleep(deps.resubscribe_delay).await;
        }
    }

    /// 消息或参与者变化后刷新未读数并判断是否需要上报已读
    fn on_state_changed(shared: &Arc<Shared>, deps: &ConversationDeps) {
        let mut inner = shared.lock();
        if inner.stopped {
            return;
        }

        let (request, unread_count) = {
            let state = shared.state_tx.borrow();
            let request = inner
                .tracker
                .evaluate(&state.messages, state.participant.as_ref());
            let unread = inner
                .tracker
                .unread_count(&state.messages, state.participant.as_ref());
            (request, unread)
        };
        shared.state_tx.send_if_modified(|state| {
            let changed = state.unread_count != unread_count;
            state.unread_count = unread_count;
            changed
        });

        let Some(request) = request else {
            return;
        };
        if let Some(previous) = inner.mark_read_task.take() {
            debug!("[Presenter] 取消旧的已读请求");
            previous.abort();
        }
        inner.mark_read_task = Some(tokio::spawn(Self::mark_read(
            shared.clone(),
            deps.clone(),
            request,
        )));
    }

    async fn mark_read(shared: Arc<Shared>, deps: ConversationDeps, request: MarkReadRequest) {
        match deps.read_receipts.mark_read(&request).await {
            Ok(()) => {
                shared.lock().tracker.on_success(&request);
                if let Err(e) = deps
                    .participants
                    .record_read(
                        &request.conversation_id,
                        &deps.session.user_id,
                        request.seq,
                        request.read_at,
                    )
                    .await
                {
                    warn!("[Presenter] 记录本地已读位置失败: {:#}", e);
                    shared.set_error(error_message(&e, "标记已读失败"));
                }
            }
            Err(e) => {
                warn!(
                    "[Presenter] 标记已读失败: conversationID={}, err={:#}",
                    request.conversation_id, e
                );
                shared.lock().tracker.on_failure(&request);
                shared.set_error(error_message(&e, "标记已读失败"));
            }
        }
    }
}

impl Drop for ConversationPresenter {
    fn drop(&mut self) {
        self.stop();
    }
}
