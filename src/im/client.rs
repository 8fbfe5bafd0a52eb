//! 聊天客户端入口
//!
//! 负责根据配置创建本地数据库、各个存储和 HTTP 客户端，并为每个会话创建展示层。

use crate::im::auth::Session;
use crate::im::conversation::{ConversationApi, ConversationDeps, ConversationPresenter};
use crate::im::db::create_sqlite_pool_with_migration;
use crate::im::inbox::{InboxApi, RemoteInbox};
use crate::im::message::MessageStore;
use crate::im::participant::ParticipantStore;
use crate::im::types::build_http_client;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 用户 ID
    pub user_id: String,
    /// 认证 token
    pub token: String,
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://chat.db?mode=rwc`
    pub db_url: String,
    /// 收件箱轮询间隔
    pub poll_interval: Duration,
    /// 远端流结束后重新订阅前的等待时间
    pub resubscribe_delay: Duration,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(user_id: String, token: String) -> Self {
        Self {
            user_id,
            token,
            api_base_url: "http://localhost:10002".to_string(),
            db_url: "sqlite://chat.db?mode=rwc".to_string(),
            poll_interval: Duration::from_secs(2),
            resubscribe_delay: Duration::from_secs(3),
        }
    }

    pub fn session(&self) -> Session {
        Session::new(self.user_id.clone(), self.token.clone())
    }
}

/// 聊天客户端
#[derive(Clone)]
pub struct ChatClient {
    config: ClientConfig,
    session: Session,
    messages: Arc<MessageStore>,
    participants: Arc<ParticipantStore>,
    inbox: Arc<dyn RemoteInbox>,
    conversation_api: Arc<ConversationApi>,
}

impl ChatClient {
    /// 创建客户端：初始化本地数据库（含迁移）和 HTTP 客户端
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let pool = create_sqlite_pool_with_migration(&config.db_url)
            .await
            .context("初始化本地数据库失败")?;
        let http = build_http_client(&config.token)?;
        let session = config.session();

        let inbox = InboxApi::new(
            http.clone(),
            config.api_base_url.clone(),
            config.user_id.clone(),
            config.poll_interval,
        );
        let conversation_api =
            ConversationApi::new(http, config.api_base_url.clone(), config.user_id.clone());

        info!(
            "[Client] ✅ 客户端初始化完成: userID={}, api={}",
            config.user_id, config.api_base_url
        );
        Ok(Self {
            session,
            messages: Arc::new(MessageStore::new(pool.clone())),
            participants: Arc::new(ParticipantStore::new(pool)),
            inbox: Arc::new(inbox),
            conversation_api: Arc::new(conversation_api),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn messages(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    pub fn participants(&self) -> &Arc<ParticipantStore> {
        &self.participants
    }

    /// 会话展示层依赖
    pub fn conversation_deps(&self) -> ConversationDeps {
        ConversationDeps {
            session: self.session.clone(),
            messages: self.messages.clone(),
            participants: self.participants.clone(),
            inbox: self.inbox.clone(),
            read_receipts: self.conversation_api.clone(),
            sender: self.conversation_api.clone(),
            resubscribe_delay: self.config.resubscribe_delay,
        }
    }

    /// 打开会话，返回的展示层在被丢弃或 `stop()` 时停止后台任务
    pub fn open_conversation(&self, conversation_id: &str) -> ConversationPresenter {
        ConversationPresenter::start(self.conversation_deps(), conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::login_async;
    use std::sync::Once;

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            // 打开当前 crate 的 debug，关闭底层 HTTP 客户端的 debug 噪音
            let filter_layer = EnvFilter::new(
                "info,chat_sdk_core_rust=debug,sqlx=warn,hyper_util::client=info,reqwest=info",
            );

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        });
    }

    fn memory_config(user_id: &str, token: &str) -> ClientConfig {
        ClientConfig {
            db_url: "sqlite::memory:".to_string(),
            ..ClientConfig::new(user_id.to_string(), token.to_string())
        }
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new("me".to_string(), "token".to_string());
        assert_eq!(config.api_base_url, "http://localhost:10002");
        assert_eq!(config.db_url, "sqlite://chat.db?mode=rwc");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.resubscribe_delay, Duration::from_secs(3));
        assert!(config.session().is_authenticated());
    }

    #[tokio::test]
    async fn open_conversation_without_login_reports_error() {
        init_test_logger();
        let client = ChatClient::new(memory_config("", "")).await.unwrap();
        let presenter = client.open_conversation("conv-1");

        let state = presenter.snapshot();
        assert_eq!(state.conversation_id, "conv-1");
        assert_eq!(state.error.as_deref(), Some("请先登录"));
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn open_conversation_loads_local_messages() {
        init_test_logger();
        let client = ChatClient::new(memory_config("me", "token")).await.unwrap();
        let presenter = client.open_conversation("conv-1");

        let mut state = presenter.state();
        let loaded = tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| !s.is_loading),
        )
        .await
        .is_ok_and(|r| r.is_ok());
        assert!(loaded);
        assert!(presenter.snapshot().messages.is_empty());
        presenter.stop();
    }

    #[tokio::test]
    #[ignore]
    async fn run_chat_client_against_server() {
        init_test_logger();

        let session = login_async(
            "http://localhost:10002",
            "alice".to_string(),
            "password".to_string(),
            5,
        )
        .await
        .unwrap();
        let config = ClientConfig {
            db_url: "sqlite::memory:".to_string(),
            ..ClientConfig::new(session.user_id, session.token)
        };
        let client = ChatClient::new(config).await.unwrap();
        let presenter = client.open_conversation("si_alice_bob");
        tokio::time::sleep(Duration::from_secs(10)).await;
        info!("[Test] 会话状态: {:?}", presenter.snapshot());
        presenter.stop();
    }
}
