use chrono::{DateTime, Utc};

/// 可注入时钟：配额日切与缓存 TTL 都经由该接口取当前时间，测试中可拨表。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
