//! 自动已读判定
//!
//! 每次消息列表变化时找出最新一条对端消息，和已知的已读位置比较，
//! 决定是否需要发出"标记会话已读"请求。
//!
//! 已读位置取参与者记录与本地已确认位置中较大的一个。优先按服务端分配的 seq 比较，
//! 缺少 seq 时退回按创建时间比较（存在时钟偏差时可能误判，保留现有行为）。

use crate::im::conversation::models::MarkReadRequest;
use crate::im::message::models::Message;
use crate::im::participant::models::Participant;
use crate::im::types::max_opt;
use tracing::debug;

/// 单个会话的已读跟踪器
#[derive(Debug, Clone)]
pub struct ReadStateTracker {
    conversation_id: String,
    current_user_id: String,
    last_marked_seq: Option<i64>,
    last_marked_at: Option<i64>,
    /// 正在进行中的请求，同一会话最多一个
    in_flight: Option<MarkReadRequest>,
}

impl ReadStateTracker {
    pub fn new(conversation_id: &str, current_user_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            current_user_id: current_user_id.to_string(),
            last_marked_seq: None,
            last_marked_at: None,
            in_flight: None,
        }
    }

    pub fn in_flight(&self) -> Option<&MarkReadRequest> {
        self.in_flight.as_ref()
    }

    pub fn last_marked(&self) -> (Option<i64>, Option<i64>) {
        (self.last_marked_seq, self.last_marked_at)
    }

    /// 判定是否需要发出新的已读请求
    ///
    /// 返回 `Some` 时该请求成为新的进行中请求，调用方应取消旧请求后发出它。
    pub fn evaluate(
        &mut self,
        messages: &[Message],
        participant: Option<&Participant>,
    ) -> Option<MarkReadRequest> {
        let latest = latest_incoming(messages, &self.current_user_id)?;
        let (known_seq, known_at) = self.known_position(participant);

        if is_acknowledged(latest, known_seq, known_at) {
            return None;
        }
        if let Some(pending) = &self.in_flight {
            if is_acknowledged(latest, pending.seq, Some(pending.read_at)) {
                debug!(
                    "[ReadState] 已有进行中的已读请求覆盖最新消息: conversationID={}",
                    self.conversation_id
                );
                return None;
            }
        }

        let request = MarkReadRequest {
            conversation_id: self.conversation_id.clone(),
            read_at: latest.created_at,
            seq: latest.message_seq,
        };
        debug!(
            "[ReadState] 需要标记已读: conversationID={}, seq={:?}, readAt={}",
            self.conversation_id, request.seq, request.read_at
        );
        self.in_flight = Some(request.clone());
        Some(request)
    }

    /// 请求成功：本地已读位置只前进不后退
    pub fn on_success(&mut self, request: &MarkReadRequest) {
        self.last_marked_seq = max_opt(self.last_marked_seq, request.seq);
        self.last_marked_at = max_opt(self.last_marked_at, Some(request.read_at));
        if self.in_flight.as_ref() == Some(request) {
            self.in_flight = None;
        }
    }

    /// 请求失败：释放进行中位置，下次更新时重试
    pub fn on_failure(&mut self, request: &MarkReadRequest) {
        if self.in_flight.as_ref() == Some(request) {
            self.in_flight = None;
        }
    }

    /// 未确认已读的对端消息数
    pub fn unread_count(&self, messages: &[Message], participant: Option<&Participant>) -> usize {
        let (known_seq, known_at) = self.known_position(participant);
        messages
            .iter()
            .filter(|m| m.is_incoming(&self.current_user_id))
            .filter(|m| !is_acknowledged(m, known_seq, known_at))
            .count()
    }

    fn known_position(&self, participant: Option<&Participant>) -> (Option<i64>, Option<i64>) {
        let known_seq = max_opt(participant.and_then(|p| p.last_read_seq), self.last_marked_seq);
        let known_at = max_opt(participant.and_then(|p| p.last_read_at), self.last_marked_at);
        (known_seq, known_at)
    }
}

/// 最新一条对端消息（按创建时间）
pub fn latest_incoming<'a>(messages: &'a [Message], current_user_id: &str) -> Option<&'a Message> {
    messages
        .iter()
        .filter(|m| m.is_incoming(current_user_id))
        .max_by_key(|m| (m.created_at, m.message_seq))
}

fn is_acknowledged(message: &Message, known_seq: Option<i64>, known_at: Option<i64>) -> bool {
    match (message.message_seq, known_seq) {
        (Some(seq), Some(known)) => seq <= known,
        _ => known_at.is_some_and(|known| message.created_at <= known),
    }
}
