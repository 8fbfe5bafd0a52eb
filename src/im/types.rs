use crate::im::error::ChatError;
use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, error, info};

/// 统一的 API 响应包装结构体（包含 errCode、errMsg、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg", default)]
    pub err_msg: String,
    pub data: Option<T>,
}

/// 通用 HTTP 响应处理函数：直接反序列化为统一的响应结构体
///
/// 非 2xx 状态返回 [`ChatError::Network`]，errCode 非 0 返回 [`ChatError::Server`]
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    let status = response.status();

    // body 只能读取一次
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(ChatError::Network(format!("HTTP 错误 {}: {}", status, body_str)).into());
    }

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        ChatError::InvalidData(format!("反序列化响应失败: {}", e))
    })?;

    if api_resp.err_code != 0 {
        error!(
            "[HTTP] {}服务器错误，错误码: {}, 错误信息: {}",
            operation_name, api_resp.err_code, api_resp.err_msg
        );
        return Err(ChatError::Server {
            code: api_resp.err_code,
            message: api_resp.err_msg,
        }
        .into());
    }

    info!("[HTTP] {}请求成功", operation_name);
    Ok(api_resp)
}

/// 创建带认证头的 HTTP 客户端（token 通过 default_headers 自动添加）
pub fn build_http_client(token: &str) -> anyhow::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .default_headers({
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::HeaderName::from_static("token"),
                reqwest::header::HeaderValue::from_str(token).context("无效的 token")?,
            );
            headers
        })
        .build()
        .context("创建 HTTP 客户端失败")
}

/// 当前时间（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 两个可选位置中较大的一个，缺失的一方不参与比较
pub fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_opt_ignores_missing_side() {
        assert_eq!(max_opt(Some(3), Some(5)), Some(5));
        assert_eq!(max_opt(Some(7), None), Some(7));
        assert_eq!(max_opt(None, Some(2)), Some(2));
        assert_eq!(max_opt(None, None), None);
    }
}
