//! 入站 HTTP 适配层。
//!
//! - POST /v1/extract  — 智能提取：{inputs, inventory, options} → {result, source, error?}
//! - GET  /v1/quota    — 当日配额统计 + 单行摘要
//! - GET  /v1/cache    — 缓存统计
//! - POST /v1/cache/clear — 清空缓存
//! - GET  /health

use crate::engine::{Engine, ExtractOptions, SmartOutcome};
use crate::error::AppError;
use crate::gemini::GeminiClient;
use crate::logging;
use crate::quota::QuotaStats;
use crate::types::{InputFragment, InventoryItem};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub engine: Engine<GeminiClient>,
    pub log_level: logging::LogLevel,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/v1/extract", post(handle_extract))
        .route("/v1/quota", get(handle_quota))
        .route("/v1/cache", get(handle_cache_stats))
        .route("/v1/cache/clear", post(handle_cache_clear))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest {
    inputs: Vec<InputFragment>,
    #[serde(default)]
    inventory: Vec<InventoryItem>,
    #[serde(default)]
    options: ExtractOptions,
}

/// POST /v1/extract - 智能提取入口
async fn handle_extract(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let start = Instant::now();
    if state.log_level.client_enabled() {
        logging::client_request("POST", "/v1/extract", &body);
    }

    let req: ExtractRequest = sonic_rs::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("请求体不是合法 JSON：{e}")))?;
    if req.inputs.is_empty() {
        return Err(AppError::bad_request("inputs 不能为空"));
    }

    let outcome: SmartOutcome = state
        .engine
        .smart_extract(&req.inputs, &req.inventory, req.options)
        .await;

    let resp = json_response(StatusCode::OK, &outcome);
    if state.log_level.client_enabled() {
        let encoded = sonic_rs::to_vec(&outcome).unwrap_or_default();
        logging::client_response(StatusCode::OK.as_u16(), start.elapsed(), &encoded);
    }
    Ok(resp)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuotaResponse {
    #[serde(flatten)]
    stats: QuotaStats,
    summary: String,
}

/// GET /v1/quota - 当日用量
async fn handle_quota(State(state): State<Arc<AppState>>) -> Response {
    let quota = state.engine.quota();
    let resp = QuotaResponse {
        stats: quota.stats(),
        summary: quota.format_stats(),
    };
    json_response(StatusCode::OK, &resp)
}

/// GET /v1/cache - 缓存条目数与序列化体积
async fn handle_cache_stats(State(state): State<Arc<AppState>>) -> Response {
    let stats = state.engine.cache().stats().await;
    json_response(StatusCode::OK, &stats)
}

/// POST /v1/cache/clear - 清空缓存并删除持久化文件
async fn handle_cache_clear(State(state): State<Arc<AppState>>) -> Response {
    state.engine.cache().clear().await;
    tracing::info!("提取缓存已清空");
    json_response(StatusCode::OK, &ClearedResponse { cleared: true })
}

#[derive(Debug, Serialize)]
struct ClearedResponse {
    cleared: bool,
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match sonic_rs::to_string(value) {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("响应序列化失败：{e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
