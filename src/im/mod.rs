pub mod auth;
pub mod client;
pub mod conversation;
pub mod db;
pub mod error;
pub mod inbox;
pub mod message;
pub mod participant;
pub mod types;

// 重新导出认证相关函数
pub use auth::{login_async, Session};

// 重新导出错误类型
pub use error::{error_message, ChatError};
