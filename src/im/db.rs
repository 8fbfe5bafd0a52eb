//! SQLite 数据库工具：统一创建连接池并执行 sqlx 迁移
//!
//! 约定：本 crate 根目录下存在 `migrations/` 目录，存放所有迁移 SQL 文件。
//! 通过 `sqlx::migrate!()` 自动管理 schema 升级。

use anyhow::{Context, Result};
use futures_util::stream::{self, BoxStream, StreamExt};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::future::Future;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 创建 SQLite 连接池并执行所有未执行的迁移
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    // 内存库每个连接都是独立的数据库，只能用单个常驻连接
    let options = if db_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    let pool = options
        .connect(db_url)
        .await
        .with_context(|| format!("连接SQLite数据库失败: {}", db_url))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("执行数据库迁移失败")?;

    info!("[DB] 数据库初始化完成: {}", db_url);
    Ok(pool)
}

/// 测试用内存数据库
#[cfg(test)]
pub async fn memory_pool() -> Pool<Sqlite> {
    create_sqlite_pool_with_migration("sqlite::memory:")
        .await
        .expect("创建内存数据库失败")
}

/// 把"变更通知 + 重新查询"组合成一个观察流
///
/// 先订阅再做首次查询，首次结果立即产出；之后每收到一次 `key` 对应的变更通知就重新查询。
/// 通知滞后（Lagged）时同样重新查询，保证观察者最终看到最新数据。
pub fn observe_query<T, F, Fut>(
    changes: broadcast::Receiver<String>,
    key: String,
    fetch: F,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    stream::unfold(
        (changes, key, fetch, true),
        |(mut changes, key, fetch, first)| async move {
            if !first {
                loop {
                    match changes.recv().await {
                        Ok(changed) if changed == key => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("[DB] 变更通知滞后 {} 条，重新查询 key={}", skipped, key);
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
            let result = fetch(key.clone()).await;
            Some((result, (changes, key, fetch, false)))
        },
    )
    .boxed()
}
