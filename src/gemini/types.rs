use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_mime_type: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<sonic_rs::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// 取第一个非空文本 part。
    pub fn first_text(&self) -> Option<&str> {
        self.candidates.iter().find_map(|c| {
            let content = c.content.as_ref()?;
            content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .find(|t| !t.is_empty())
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub total_token_count: u64,
}

/// 强类型响应 Schema：枚举收口到列出的取值，intent/confidence 必填。
/// `cached` 置信度是缓存命中时本地合成的，不在模型可返回的取值里。
pub const RESPONSE_SCHEMA_JSON: &str = r#"{
  "type": "OBJECT",
  "properties": {
    "intent": {"type": "STRING", "enum": ["sale", "product", "expense", "inquiry"]},
    "recordType": {"type": "STRING", "enum": ["order", "expense"]},
    "confidence": {"type": "STRING", "enum": ["high", "medium", "low"]},
    "suggestedActions": {"type": "ARRAY", "items": {"type": "STRING"}},
    "orderType": {"type": "STRING", "enum": ["single", "batch"]},
    "customers": {
      "type": "ARRAY",
      "items": {
        "type": "OBJECT",
        "properties": {
          "handle": {"type": "STRING"},
          "platform": {"type": "STRING"},
          "deliveryFee": {"type": "NUMBER"},
          "items": {
            "type": "ARRAY",
            "items": {
              "type": "OBJECT",
              "properties": {
                "productName": {"type": "STRING"},
                "quantity": {"type": "INTEGER"},
                "variant": {"type": "STRING"},
                "unitPrice": {"type": "NUMBER"}
              }
            }
          },
          "orderTotal": {"type": "NUMBER"},
          "address": {"type": "STRING"}
        }
      }
    },
    "name": {"type": "STRING"},
    "price": {"type": "NUMBER"},
    "costPrice": {"type": "NUMBER"},
    "stock": {"type": "INTEGER"},
    "category": {"type": "STRING"},
    "amount": {"type": "NUMBER"},
    "description": {"type": "STRING"},
    "vendor": {"type": "STRING"},
    "paymentMethod": {"type": "STRING"}
  },
  "required": ["intent", "confidence"]
}"#;
