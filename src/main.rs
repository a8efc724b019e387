pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod gemini;
pub mod logging;
pub mod quota;
pub mod retry;
pub mod types;
pub mod util;

use crate::retry::RetryConfig;
use crate::util::clock::SystemClock;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing(&cfg);

    if cfg.gemini_api_key.trim().is_empty() {
        tracing::warn!("未配置 GEMINI_API_KEY，远程提取将全部失败并走降级解析");
    }
    if cfg.data_dir.trim().is_empty() {
        return Err(error::AppError::config("DATA_DIR 不能为空").into());
    }

    let clock = Arc::new(SystemClock);
    let quota = Arc::new(quota::QuotaTracker::new(clock.clone()));

    let cache = Arc::new(cache::ExtractionCache::new(&cfg.data_dir, clock));
    cache.load().await;

    let client =
        gemini::GeminiClient::new(&cfg, quota.clone()).context("初始化 GeminiClient 失败")?;

    let retry = RetryConfig {
        max_retries: cfg.retry_max_attempts,
        initial_delay_ms: cfg.retry_initial_delay_ms,
        max_delay_ms: cfg.retry_max_delay_ms,
    };

    let state = Arc::new(gateway::AppState {
        engine: engine::Engine::new(client, quota, cache, retry),
        log_level: cfg.log_level(),
    });

    let app = gateway::router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    Ok(())
}

fn init_tracing(cfg: &config::Config) {
    // DEBUG=off 完全静默；否则依赖库压到 warn、本项目保底 info，
    // 避免环境里预设的 RUST_LOG=warn 把关键日志过滤掉。
    let debug = cfg.debug.trim().to_lowercase();
    let filter = if debug == "off" {
        EnvFilter::new("off")
    } else {
        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let env = env.trim();
        if env.is_empty() {
            EnvFilter::new("warn,bookly_extract=info")
        } else if env.contains("bookly_extract") {
            EnvFilter::new(env)
        } else {
            EnvFilter::new(format!("{env},bookly_extract=info"))
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}
