//! 会话模块
//!
//! 会话界面状态、自动已读上报以及会话相关的 HTTP 接口

pub mod api;
pub mod models;
pub mod presenter;
pub mod read_state;

// 重新导出主要类型
pub use api::{ConversationApi, MessageSender, ReadReceiptApi};
pub use models::{ConversationUiState, MarkReadRequest};
pub use presenter::{ConversationDeps, ConversationPresenter};
pub use read_state::ReadStateTracker;
