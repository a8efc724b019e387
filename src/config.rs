use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8046;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 2;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub gemini_api_key: String,
    pub gemini_model: String,
    pub timeout_ms: u64,
    pub proxy: String,

    /// 重试次数上限（不含首次调用）。
    pub retry_max_attempts: usize,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    pub debug: String,
    pub data_dir: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "GEMINI_API_KEY")]
    gemini_api_key: Option<String>,
    #[serde(alias = "GEMINI_MODEL")]
    gemini_model: Option<String>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY")]
    proxy: Option<String>,

    #[serde(alias = "RETRY_MAX_ATTEMPTS")]
    retry_max_attempts: Option<usize>,
    #[serde(alias = "RETRY_INITIAL_DELAY_MS")]
    retry_initial_delay_ms: Option<u64>,
    #[serde(alias = "RETRY_MAX_DELAY_MS")]
    retry_max_delay_ms: Option<u64>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,
    #[serde(alias = "DATA_DIR")]
    data_dir: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        let mut cfg = Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            gemini_api_key: raw.gemini_api_key.unwrap_or_default(),
            gemini_model: raw
                .gemini_model
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: raw.proxy.unwrap_or_default(),
            retry_max_attempts: raw.retry_max_attempts.unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
            retry_initial_delay_ms: raw
                .retry_initial_delay_ms
                .unwrap_or(DEFAULT_RETRY_INITIAL_DELAY_MS),
            retry_max_delay_ms: raw.retry_max_delay_ms.unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
            data_dir: raw.data_dir.unwrap_or_else(|| "./data".to_string()),
        };

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(content) = std::fs::read_to_string(&dotenv_path) else {
        return;
    };

    for line in content.lines() {
        let Some((key, value)) = parse_dotenv_line(line) else {
            continue;
        };
        if std::env::var_os(&key).is_some() {
            // 已设置的环境变量优先于 .env。
            continue;
        }
        // Rust 2024：修改进程环境变量在并发场景下可能触发 UB，因此 API 为 unsafe。
        // 这里在启动阶段加载 .env，尚无并发访问环境变量，符合使用前提。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 避免跨越仓库根目录：发现 Cargo.toml 或 .git 即停止向上寻找。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let Some(parent) = dir.parent() else {
            break;
        };
        if parent == dir {
            break;
        }
        dir = parent;
    }

    None
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_line_parsing() {
        assert_eq!(
            parse_dotenv_line("GEMINI_API_KEY=abc123"),
            Some(("GEMINI_API_KEY".to_string(), "abc123".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("export DEBUG=\"medium\""),
            Some(("DEBUG".to_string(), "medium".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("TIMEOUT=5000 # 毫秒"),
            Some(("TIMEOUT".to_string(), "5000".to_string()))
        );
        assert_eq!(parse_dotenv_line("# 注释"), None);
        assert_eq!(parse_dotenv_line("   "), None);
        assert_eq!(parse_dotenv_line("no_equals_sign"), None);
    }
}
