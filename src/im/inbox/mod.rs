//! 收件箱模块
//!
//! 远端收件箱推送（新消息 + 送达/已读回执）与本地对账

pub mod api;
pub mod reconciler;
pub mod types;

pub use api::{InboxApi, RemoteInbox};
pub use reconciler::{ActionOutcome, ActionReconciler};
pub use types::{InboxAction, InboxActionType, InboxItem};
