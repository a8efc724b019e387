//! Gemini generateContent 远程提取客户端。
//!
//! - 强类型请求/响应 + responseSchema 收口模型输出
//! - 响应文本先做围栏/游离文本清理再解析
//! - 销售记录本地补算 orderTotal，单客户时展平 legacy 字段
//! - 任何失败路径按固定 100 tokens 记入配额（服务端照样计费）

use crate::config::Config;
use crate::gemini::types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, InlineData, Part,
    RESPONSE_SCHEMA_JSON, SystemInstruction,
};
use crate::logging;
use crate::quota::{DEFAULT_TOKENS_PER_REQUEST, FAILED_CALL_TOKENS, QuotaTracker};
use crate::types::{ExtractionResult, InputFragment, InventoryItem};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Gemini API 错误 {status}: {message}")]
    Http { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),

    #[error("Gemini 响应不含任何文本 part")]
    EmptyResponse,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 请求超时按可重试错误对待（上层与 429 同路径处理）。
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    quota: Arc<QuotaTracker>,
    response_schema: sonic_rs::Value,
    log_level: logging::LogLevel,
}

impl GeminiClient {
    pub fn new(cfg: &Config, quota: Arc<QuotaTracker>) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if cfg.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.timeout_ms));
        }
        if !cfg.proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?);
        }

        let response_schema =
            sonic_rs::from_str(RESPONSE_SCHEMA_JSON).context("解析内置 responseSchema 失败")?;

        Ok(Self {
            http: builder.build()?,
            api_key: cfg.gemini_api_key.clone(),
            model: cfg.gemini_model.clone(),
            quota,
            response_schema,
            log_level: cfg.log_level(),
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }

    /// 发起一次远程提取。任何失败（网络、HTTP、解析、空响应）
    /// 都会先按 [`FAILED_CALL_TOKENS`] 记账再向上抛出。
    pub async fn extract(
        &self,
        inputs: &[InputFragment],
        inventory: &[InventoryItem],
    ) -> Result<ExtractionResult, ApiError> {
        match self.extract_inner(inputs, inventory).await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.quota.track_usage(FAILED_CALL_TOKENS);
                Err(err)
            }
        }
    }

    async fn extract_inner(
        &self,
        inputs: &[InputFragment],
        inventory: &[InventoryItem],
    ) -> Result<ExtractionResult, ApiError> {
        let req = build_request(inputs, inventory, self.response_schema.clone());
        let url = self.generate_url();
        let body = sonic_rs::to_vec(&req)?;

        if self.log_level.backend_enabled() {
            if self.log_level.raw_enabled() {
                logging::backend_request_raw("POST", &url, &body);
            } else {
                logging::backend_request("POST", &url, &body);
            }
        }

        let start = std::time::Instant::now();
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        if self.log_level.backend_enabled() {
            if self.log_level.raw_enabled() {
                logging::backend_response_raw(status.as_u16(), start.elapsed(), &bytes);
            } else {
                logging::backend_response(status.as_u16(), start.elapsed(), &bytes);
            }
        }

        if !status.is_success() {
            return Err(extract_error_details(status.as_u16(), &bytes));
        }

        let resp = sonic_rs::from_slice::<GenerateContentResponse>(&bytes)?;

        // 成功响应按实际用量记账；缺少 usageMetadata 时按保守估算。
        let tokens = resp
            .usage_metadata
            .as_ref()
            .map(|u| u.total_token_count)
            .filter(|&t| t > 0)
            .unwrap_or(DEFAULT_TOKENS_PER_REQUEST);
        self.quota.track_usage(tokens);

        let text = resp.first_text().ok_or(ApiError::EmptyResponse)?;
        parse_extraction(text)
    }
}

fn build_request(
    inputs: &[InputFragment],
    inventory: &[InventoryItem],
    response_schema: sonic_rs::Value,
) -> GenerateContentRequest {
    let inventory_list = inventory
        .iter()
        .map(|p| format!("\"{}\" (Price:{}, Stock:{})", p.name, p.price, p.stock))
        .collect::<Vec<_>>()
        .join(", ");

    let system_instruction = format!(
        "You are the Bookly AI Engine. Analyze business inputs and return structured JSON.\n\n\
         INTENT CATEGORIES:\n\
         1. \"sale\": Customer buying/ordering items.\n\
         2. \"expense\": Business costs (rent, logistics, delivery fees).\n\
         3. \"product\": New inventory items.\n\
         4. \"inquiry\": Customer asking for info (delivery cost, account details, availability).\n\n\
         RECORD TYPE CLASSIFICATION:\n\
         - For \"sale\" intent: set \"recordType\" to \"order\"\n\
         - For \"expense\" intent: set \"recordType\" to \"expense\"\n\
         - For other intents: recordType is optional\n\n\
         INSTRUCTIONS:\n\
         - Match products to this list if possible: {inventory_list}.\n\
         - If a product isn't on the list, still extract it as a new item.\n\
         - If \"inquiry\" is detected, provide \"suggestedActions\" (e.g., \"Send Account Details\", \"Calculate Shipping\").\n\
         - Look for delivery or shipping fees in sales dialogue and extract into \"deliveryFee\".\n\
         - \"confidence\": \"high\", \"medium\", or \"low\".\n\
         - Return ONLY valid JSON."
    );

    let mut parts = Vec::new();
    for input in inputs {
        if let Some(text) = &input.text
            && !text.is_empty()
        {
            parts.push(Part {
                text: format!("INPUT:\n{text}"),
                inline_data: None,
            });
        }
        if let Some(image) = &input.image_base64
            && !image.is_empty()
        {
            // 兼容 data URL：只取逗号后的 base64 载荷。
            let data = image
                .split_once(',')
                .map(|(_, d)| d)
                .unwrap_or(image.as_str());
            parts.push(Part {
                text: String::new(),
                inline_data: Some(InlineData {
                    mime_type: "image/jpeg".to_string(),
                    data: data.to_string(),
                }),
            });
        }
    }

    GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts,
        }],
        system_instruction: Some(SystemInstruction {
            parts: vec![Part {
                text: system_instruction,
                inline_data: None,
            }],
        }),
        generation_config: Some(GenerationConfig {
            response_mime_type: "application/json".to_string(),
            temperature: 0.1,
            response_schema: Some(response_schema),
        }),
    }
}

fn parse_extraction(text: &str) -> Result<ExtractionResult, ApiError> {
    let cleaned = clean_json_response(text);
    let mut result = sonic_rs::from_str::<ExtractionResult>(&cleaned)?;
    if let ExtractionResult::Sale(sale) = &mut result {
        normalize_sale(sale);
    }
    Ok(result)
}

/// 剥离 Markdown 围栏和 JSON 前后的游离文本：
/// 优先取 ``` 围栏内容，再截取首个 `{` 到末个 `}` 的窗口。
pub(crate) fn clean_json_response(text: &str) -> String {
    let mut cleaned = text.trim();
    if cleaned.contains("```")
        && let Some(start) = cleaned.find("```")
    {
        let after = &cleaned[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            cleaned = after[..end].trim();
        }
    }
    if let (Some(first), Some(last)) = (cleaned.find('{'), cleaned.rfind('}'))
        && last > first
    {
        cleaned = &cleaned[first..=last];
    }
    cleaned.to_string()
}

/// 销售记录规整：
/// - 每个客户缺失/为零的 orderTotal 以 Σ(unitPrice × quantity) 补算
/// - 恰好单客户时将字段展平到顶层 legacy 字段；多客户时顶层保持空
pub(crate) fn normalize_sale(sale: &mut crate::types::SaleRecord) {
    for customer in &mut sale.customers {
        if customer.order_total.unwrap_or(0.0) == 0.0 {
            let computed: f64 = customer
                .items
                .iter()
                .map(|item| item.unit_price.unwrap_or(0.0) * item.quantity as f64)
                .sum();
            customer.order_total = Some(computed);
        }
    }

    if sale.customers.len() == 1 {
        let first = &sale.customers[0];
        sale.customer_name = Some(if first.handle.is_empty() {
            "Customer".to_string()
        } else {
            first.handle.clone()
        });
        sale.customer_handle = if first.handle.is_empty() {
            None
        } else {
            Some(first.handle.clone())
        };
        sale.order_items = Some(first.items.clone());
        sale.total = first.order_total;
        sale.delivery_fee = Some(first.delivery_fee.unwrap_or(0.0));
        sale.platform = Some(
            first
                .platform
                .clone()
                .unwrap_or_else(|| "WhatsApp".to_string()),
        );
    }
}

fn extract_error_details(status: u16, body: &[u8]) -> ApiError {
    #[derive(Debug, serde::Deserialize)]
    struct ErrResp {
        error: ErrInner,
    }

    #[derive(Debug, serde::Deserialize)]
    struct ErrInner {
        #[serde(default)]
        code: Option<sonic_rs::Value>,
        #[serde(default)]
        message: String,
        #[serde(default)]
        status: String,
    }

    use sonic_rs::JsonValueTrait;

    let mut out_status = status;
    let mut message = "Unknown error".to_string();

    if let Ok(err_resp) = sonic_rs::from_slice::<ErrResp>(body) {
        let err = err_resp.error;
        if !err.message.is_empty() {
            message = err.message;
        }

        let code_name = if !err.status.is_empty() {
            Some(err.status.to_uppercase())
        } else {
            err.code
                .as_ref()
                .and_then(|c| c.as_str())
                .map(|s| s.to_uppercase())
        };
        match code_name.as_deref() {
            Some("RESOURCE_EXHAUSTED") => out_status = 429,
            Some("UNAUTHENTICATED") => out_status = 401,
            Some("INTERNAL") => out_status = 500,
            _ => {
                if let Some(i) = err.code.as_ref().and_then(|c| c.as_i64())
                    && i > 0
                    && i <= u16::MAX as i64
                {
                    out_status = i as u16;
                }
            }
        }
    }

    ApiError::Http {
        status: out_status,
        message,
    }
}
