//! 请求/响应日志块。
//!
//! 日志等级（DEBUG 环境变量）：
//! - off：不输出请求响应详情
//! - low：输出客户端（入站）请求/响应（格式化/脱敏）
//! - medium：输出客户端 + 后端（Gemini）请求/响应（格式化/脱敏）
//! - high：后端请求/响应完全原始输出（不折叠 base64）
//!
//! 脱敏重点是内联图片：`imageBase64` / `inlineData.data` 字段只保留首尾片段，
//! 避免整段 base64 刷屏。

use sonic_rs::prelude::*;
use std::borrow::Cow;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "client" => Self::Low,
            "medium" | "backend" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn client_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn backend_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn client_request(method: &str, path: &str, body: &[u8]) {
    tracing::info!(
        "\n===================== 客户端请求 ======================\n[客户端请求] {method} {path}\n{}\n=========================================================",
        format_body_bytes(body)
    );
}

pub fn client_response(status: u16, duration: Duration, body: &[u8]) {
    tracing::info!(
        "\n===================== 客户端响应 ======================\n[客户端响应] {} {}ms\n{}\n=========================================================",
        status,
        format_duration_ms(duration),
        format_body_bytes(body)
    );
}

pub fn backend_request(method: &str, url: &str, body: &[u8]) {
    tracing::info!(
        "\n====================== 后端请求 ========================\n[后端请求] {method} {url}\n{}\n=========================================================",
        format_body_bytes(body)
    );
}

pub fn backend_request_raw(method: &str, url: &str, body: &[u8]) {
    tracing::info!(
        "\n=================== 后端请求（RAW） ===================\n[后端请求] {method} {url}\n{}\n=========================================================",
        String::from_utf8_lossy(body)
    );
}

pub fn backend_response(status: u16, duration: Duration, body: &[u8]) {
    tracing::info!(
        "\n====================== 后端响应 ========================\n[后端响应] {} {}ms\n{}\n=========================================================",
        status,
        format_duration_ms(duration),
        format_body_bytes(body)
    );
}

pub fn backend_response_raw(status: u16, duration: Duration, body: &[u8]) {
    tracing::info!(
        "\n=================== 后端响应（RAW） ===================\n[后端响应] {} {}ms\n{}\n=========================================================",
        status,
        format_duration_ms(duration),
        String::from_utf8_lossy(body)
    );
}

fn format_body_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    match sonic_rs::from_slice::<sonic_rs::Value>(bytes) {
        Ok(v) => {
            let sanitized = sanitize_json_for_log(&v, false);
            match sonic_rs::to_string_pretty(&sanitized) {
                Ok(s) => s,
                Err(_) => sanitized.to_string(),
            }
        }
        Err(_) => truncate_text_for_log(&String::from_utf8_lossy(bytes)),
    }
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 32 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}

/// 递归走 Value 做脱敏，避免先反序列化到强类型结构体导致字段丢失。
fn sanitize_json_for_log(v: &sonic_rs::Value, in_inline_data: bool) -> sonic_rs::Value {
    if let Some(obj) = v.as_object() {
        let mut out = sonic_rs::Object::new();
        for (key, child) in obj.iter() {
            let sanitized = match key {
                "inlineData" => sanitize_json_for_log(child, true),
                "data" if in_inline_data => sanitize_base64_value(child),
                "imageBase64" => sanitize_base64_value(child),
                _ => sanitize_json_for_log(child, in_inline_data),
            };
            out.insert(key, sanitized);
        }
        return out.into_value();
    }

    if let Some(arr) = v.as_array() {
        let mut out = Vec::with_capacity(arr.len());
        for item in arr {
            out.push(sanitize_json_for_log(item, in_inline_data));
        }
        return sonic_rs::Value::from(out);
    }

    v.to_owned()
}

fn sanitize_base64_value(v: &sonic_rs::Value) -> sonic_rs::Value {
    if let Some(s) = v.as_str() {
        return sonic_rs::Value::from(truncate_base64(s).as_ref());
    }
    v.to_owned()
}

fn truncate_base64(s: &str) -> Cow<'_, str> {
    const KEEP: usize = 20;
    if s.len() <= KEEP * 2 + 10 {
        return Cow::Borrowed(s);
    }
    let omitted = s.len() - KEEP * 2;
    Cow::Owned(format!(
        "{}...[TRUNCATED: {omitted} chars]...{}",
        &s[..KEEP],
        &s[s.len() - KEEP..]
    ))
}
