pub mod im;

// 重新导出常用类型和函数，方便外部使用
pub use im::{
    client::{ChatClient, ClientConfig},
    conversation::{ConversationPresenter, ConversationUiState},
    inbox::{ActionOutcome, ActionReconciler},
    message::{Message, MessageStatus},
    participant::Participant,
    error_message, login_async, ChatError, Session,
};
