//! 会话参与者模块
//!
//! 每个用户在每个会话中的已读位置、免打扰、置顶、归档状态

pub mod dao;
pub mod models;

pub use dao::ParticipantStore;
pub use models::Participant;
