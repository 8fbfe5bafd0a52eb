//! 聊天 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示会话同步功能
//! 启动时通过命令行参数指定用户和会话，自动打开会话，只展示界面状态变化

use anyhow::Result;
use chat_sdk_core_rust::{login_async, ChatClient, ClientConfig, ConversationUiState};
use clap::Parser;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// 聊天 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "chat-cli")]
#[command(about = "聊天 CLI 客户端 - 用于测试和展示会话同步", long_about = None)]
struct Args {
    /// 要打开的会话 ID
    #[arg(short, long)]
    conversation: String,

    /// 用户 ID（提供 token 时使用）
    #[arg(short, long, default_value = "")]
    user: String,

    /// 认证 token，为空时使用账号密码登录
    #[arg(short, long, default_value = "")]
    token: String,

    /// 登录账号
    #[arg(long)]
    account: Option<String>,

    /// 登录密码
    #[arg(long, default_value = "")]
    password: String,

    /// HTTP API 基础地址
    #[arg(long, default_value = "http://localhost:10002")]
    api_url: String,

    /// 本地数据库 URL
    #[arg(long, default_value = "sqlite://chat.db?mode=rwc")]
    db_url: String,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,chat_sdk_core_rust=debug）
    #[arg(long, default_value = "info,chat_sdk_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（输出到 stdout）
fn init_logger(log_level: &str) {
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .init();
}

fn print_state(state: &ConversationUiState) {
    if let Some(err) = &state.error {
        warn!("[CLI] ⚠️  {}", err);
    }
    info!(
        "[CLI] 📋 会话 {} | 消息: {} | 未读: {} | 加载中: {}",
        state.conversation_id,
        state.messages.len(),
        state.unread_count,
        state.is_loading
    );
    if let Some(last) = state.messages.last() {
        info!(
            "[CLI]   最新: [{}] {}: {}",
            last.status, last.sender_id, last.body
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    info!("[CLI] 🚀 聊天 CLI 客户端（测试模式）");
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let (user_id, token) = match (&args.account, args.token.is_empty()) {
        (Some(account), true) => {
            let session = login_async(&args.api_url, account.clone(), args.password.clone(), 5)
                .await
                .map_err(|e| anyhow::anyhow!("登录失败: {:#}", e))?;
            info!("[CLI] ✅ 登录成功！用户ID: {}", session.user_id);
            (session.user_id, session.token)
        }
        _ => (args.user.clone(), args.token.clone()),
    };

    let config = ClientConfig {
        api_base_url: args.api_url.clone(),
        db_url: args.db_url.clone(),
        ..ClientConfig::new(user_id, token)
    };
    let client = ChatClient::new(config).await?;
    let presenter = client.open_conversation(&args.conversation);

    let mut state = presenter.state();
    let watcher = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let snapshot = state.borrow_and_update().clone();
            print_state(&snapshot);
        }
    });

    info!("[CLI] 📥 开始监听会话...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[CLI] 等待退出信号失败: {}", e);
        }
    }

    presenter.stop();
    drop(presenter);
    watcher.abort();
    info!("[CLI] 👋 程序退出");
    Ok(())
}
