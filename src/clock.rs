//! 时钟模块
//!
//! 引擎中所有"当前时间"都来自显式注入的 [`Clock`]，而不是环境全局时间，
//! 从而使过期、时间桶和并发测试完全可确定。
//!
//! ## 示例
//!
//! ```rust
//! use passrs::clock::{Clock, FixedClock, SystemClock};
//! use chrono::Duration;
//!
//! let clock = SystemClock;
//! let now = clock.now();
//!
//! // 测试中使用可控时钟
//! let fixed = FixedClock::at(now);
//! fixed.advance(Duration::seconds(121));
//! assert_eq!(fixed.now(), now + Duration::seconds(121));
//! ```

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// 时间源接口
///
/// 实现此 trait 以提供自定义的时间源（测试、重放等）。
pub trait Clock: Send + Sync {
    /// 返回当前时刻
    fn now(&self) -> DateTime<Utc>;
}

/// 系统墙钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 固定时钟
///
/// 时间只在显式调用 [`FixedClock::set`] 或 [`FixedClock::advance`] 时变化，
/// 适用于确定性测试。
#[derive(Debug)]
pub struct FixedClock {
    instant: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    /// 以指定时刻创建固定时钟
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            instant: RwLock::new(instant),
        }
    }

    /// 设置当前时刻
    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut guard) = self.instant.write() {
            *guard = instant;
        }
    }

    /// 向前拨动时钟
    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.instant.write() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
            .read()
            .map(|guard| *guard)
            .unwrap_or_else(|_| Utc::now())
    }
}
