//! 登录与会话身份
//!
//! 当前用户 ID / token 通过显式的 [`Session`] 传入各组件，不使用全局状态。

use crate::im::error::ChatError;
use crate::im::types::handle_http_response;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// 登录会话
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }

    /// 未登录时的空会话
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_empty() && !self.token.is_empty()
    }

    /// 返回当前用户 ID，未登录时返回 [`ChatError::NotAuthenticated`]
    pub fn require_user_id(&self) -> Result<&str, ChatError> {
        if self.is_authenticated() {
            Ok(&self.user_id)
        } else {
            Err(ChatError::NotAuthenticated)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub account: String,
    pub password: String,
    pub platform: i32,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    #[serde(rename = "token")]
    pub token: String,
    #[serde(rename = "userID")]
    pub user_id: String,
}

/// 账号密码登录，成功后返回 [`Session`]
pub async fn login_async(
    api_base_url: &str,
    account: String,
    password: String,
    platform: i32,
) -> Result<Session> {
    let operation_id = Uuid::new_v4().to_string();
    let url = format!("{}/account/login", api_base_url);

    info!("[Auth] 🔐 正在登录...");
    debug!("[Auth]   URL: {}, 账号: {}, OperationID: {}", url, account, operation_id);

    let response = reqwest::Client::new()
        .post(&url)
        .header("Content-Type", "application/json")
        .header("operationID", &operation_id)
        .json(&LoginRequest {
            account,
            password,
            platform,
        })
        .send()
        .await
        .map_err(|e| ChatError::Network(e.to_string()))
        .context("登录请求失败")?;

    let resp = handle_http_response::<LoginData>(response, "登录").await?;
    let data = resp
        .data
        .ok_or_else(|| ChatError::InvalidData("登录响应中没有数据".to_string()))?;

    info!("[Auth] ✅ 登录成功，userID={}", data.user_id);
    Ok(Session::new(data.user_id, data.token))
}
