//! 消息模块
//!
//! 本地消息存储、消息状态与观察接口

pub mod dao;
pub mod models;

// 重新导出主要类型
pub use dao::{MessageStatusStore, MessageStore};
pub use models::{Message, MessageStatus, SendAck};
