//! 提取结果缓存。
//!
//! - 以输入文本的指纹为键，TTL 24 小时，查询时惰性清除过期条目
//! - 条目上限 50：超限时按时间戳保留最新 N 条（按插入时间淘汰，非 LRU）
//! - 命中时置信度强制改写为 `cached`，提示 UI 数值可能过时
//! - 整张表序列化为单个 JSON 文件持久化；读写失败一律吞掉并当作空缓存
//!   （缓存只是优化，绝不把存储故障传给调用方）

use crate::types::{Confidence, ExtractionResult};
use crate::util::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const CACHE_TTL_MS: i64 = 24 * 60 * 60 * 1000;
const MAX_CACHE_ENTRIES: usize = 50;
const CACHE_FILE_NAME: &str = "extraction_cache.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub input_hash: String,
    pub result: ExtractionResult,
    /// Unix 毫秒时间戳（写入时刻）。
    pub timestamp: i64,
    /// 原始输入长度，仅诊断用途。
    pub input_length: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
}

pub struct ExtractionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl ExtractionCache {
    pub fn new(data_dir: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: PathBuf::from(data_dir).join(CACHE_FILE_NAME),
            clock,
        }
    }

    /// 从磁盘加载缓存文件。文件缺失或损坏都视为空缓存。
    pub async fn load(&self) {
        let map = match tokio::fs::read(&self.path).await {
            Ok(bytes) => match sonic_rs::from_slice::<HashMap<String, CacheEntry>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("缓存文件解析失败，按空缓存处理: {e}");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!("缓存文件读取失败，按空缓存处理: {e}");
                HashMap::new()
            }
        };

        let mut entries = self.entries.lock().await;
        *entries = map;
    }

    /// 查询缓存。命中且未过期时返回置信度为 `cached` 的副本；
    /// 过期条目就地删除并持久化删除结果。
    pub async fn get(&self, input: &str) -> Option<ExtractionResult> {
        if input.trim().is_empty() {
            return None;
        }

        let hash = input_hash(input);
        let now_ms = self.clock.now().timestamp_millis();

        let mut entries = self.entries.lock().await;
        let entry = entries.get(&hash)?;

        if now_ms - entry.timestamp < CACHE_TTL_MS {
            let mut result = entry.result.clone();
            result.set_confidence(Confidence::Cached);
            tracing::debug!("命中提取缓存（hash={hash}）");
            return Some(result);
        }

        entries.remove(&hash);
        self.persist(&entries).await;
        None
    }

    /// 写入缓存并持久化。空输入不落缓存。
    pub async fn set(&self, input: &str, result: &ExtractionResult) {
        if input.trim().is_empty() {
            return;
        }

        let hash = input_hash(input);
        let mut entries = self.entries.lock().await;
        entries.insert(
            hash.clone(),
            CacheEntry {
                input_hash: hash,
                result: result.clone(),
                timestamp: self.clock.now().timestamp_millis(),
                input_length: input.len(),
            },
        );

        if entries.len() > MAX_CACHE_ENTRIES {
            // 按时间戳降序，仅保留最新的 MAX_CACHE_ENTRIES 条。
            let mut sorted: Vec<CacheEntry> = entries.drain().map(|(_, e)| e).collect();
            sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            sorted.truncate(MAX_CACHE_ENTRIES);
            for e in sorted {
                entries.insert(e.input_hash.clone(), e);
            }
        }

        self.persist(&entries).await;
    }

    /// 清空缓存并删除持久化文件。
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        match tokio::fs::remove_file(&self.path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("缓存文件删除失败: {e}"),
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        let size_bytes = sonic_rs::to_vec(&*entries).map(|v| v.len()).unwrap_or(0);
        CacheStats {
            entries: entries.len(),
            size_bytes,
        }
    }

    async fn persist(&self, entries: &HashMap<String, CacheEntry>) {
        let bytes = match sonic_rs::to_vec(entries) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("缓存序列化失败: {e}");
                return;
            }
        };

        if let Some(dir) = self.path.parent()
            && let Err(e) = tokio::fs::create_dir_all(dir).await
        {
            tracing::warn!("缓存目录创建失败: {e}");
            return;
        }
        if let Err(e) = tokio::fs::write(&self.path, bytes).await {
            tracing::warn!("缓存文件写入失败: {e}");
        }
    }
}

/// 输入文本指纹：逐 UTF-16 码元滚动哈希（`h = (h<<5) - h + ch`，32 位回绕），
/// 取绝对值后 base36 编码。非加密哈希，不同输入可能碰撞并串用缓存结果；
/// 对单租户本地缓存可接受。
pub(crate) fn input_hash(input: &str) -> String {
    let mut h: i32 = 0;
    for unit in input.encode_utf16() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(unit as i32);
    }
    to_base36((h as i64).unsigned_abs())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
