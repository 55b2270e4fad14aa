//! 一次性访问码会话模块
//!
//! 短时效的匿名访问会话：签发时产生人类可抄写的一次性访问码，
//! 持码方在有效期内以主体身份认领恰好一次。认领由存储的原子
//! 条件更新裁决，并发认领中至多一个成功。
//!
//! ## 使用示例
//!
//! ```rust
//! use passrs::otac::{OtacConfig, OtacManager, Scope, SessionStatus};
//!
//! let manager = OtacManager::in_memory(OtacConfig::default());
//!
//! let issued = manager.issue_session(Scope::login(), None).unwrap();
//! let session = manager
//!     .claim(&issued.session_id, &issued.code, "alice")
//!     .unwrap();
//!
//! assert_eq!(session.status, SessionStatus::Claimed);
//! assert_eq!(session.owner_id.as_deref(), Some("alice"));
//!
//! // 同一会话第二次认领必然失败
//! assert!(manager.claim(&issued.session_id, &issued.code, "bob").is_err());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audit::{AuditEventKind, AuditLogger, AuditRecord, EventSeverity, NoopAuditLogger};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result, ValidationError};
use crate::random::{constant_time_compare, generate_access_code, generate_session_id};

/// 默认访问码长度
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// 默认会话有效期（秒）
pub const DEFAULT_SESSION_TTL_SECS: i64 = 300;

// ============================================================================
// 会话模型
// ============================================================================

/// 认领后授予的权限范围
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Scope {
    /// 是否授予登录权限
    pub login: bool,
    /// 附加属性（由调用方解释）
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Scope {
    /// 登录权限范围
    pub fn login() -> Self {
        Self {
            login: true,
            attributes: HashMap::new(),
        }
    }

    /// 添加附加属性
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// 会话状态
///
/// `Pending` 是唯一起点；`Claimed` 与 `Expired` 都是终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// 等待认领
    Pending,
    /// 已被认领
    Claimed,
    /// 已过期
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Claimed => write!(f, "claimed"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

/// 一次性访问码会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtacSession {
    /// 会话 ID
    pub session_id: String,
    /// 访问码（绝不出现在状态查询响应中）
    pub code: String,
    /// 认领后授予的权限范围
    pub scope: Scope,
    /// 认领者（认领前为 `None`——会话在认领前是匿名的）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// 当前状态
    pub status: SessionStatus,
    /// 签发时间
    pub issued_at: DateTime<Utc>,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
    /// 认领时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl OtacSession {
    /// 是否已到达过期时间（相对给定时刻惰性判定）
    ///
    /// 会话只在 `now < expires_at` 期间可认领，到达边界瞬间即失效。
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// 配置
// ============================================================================

/// 会话配置
#[derive(Debug, Clone)]
pub struct OtacConfig {
    /// 访问码长度
    pub code_length: usize,
    /// 会话有效期
    pub ttl: Duration,
}

impl Default for OtacConfig {
    fn default() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        }
    }
}

impl OtacConfig {
    /// 高安全性预设：更长的码与更短的有效期
    pub fn high_security() -> Self {
        Self {
            code_length: 12,
            ttl: Duration::seconds(60),
        }
    }

    /// 宽松预设：适用于开发环境
    pub fn relaxed() -> Self {
        Self {
            code_length: 6,
            ttl: Duration::minutes(30),
        }
    }

    /// 设置访问码长度
    pub fn with_code_length(mut self, length: usize) -> Self {
        self.code_length = length;
        self
    }

    /// 设置会话有效期
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

// ============================================================================
// 存储接口
// ============================================================================

/// 认领转换要写入的新字段
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    /// 新状态
    pub status: Option<SessionStatus>,
    /// 绑定的认领者
    pub owner_id: Option<String>,
    /// 认领时间
    pub claimed_at: Option<DateTime<Utc>>,
}

/// 会话存储接口
///
/// 与凭证存储同一契约：`conditional_update` 只在会话仍处于期望状态时
/// 生效，这是认领恰好一次语义的全部依据。
pub trait OtacStore: Send + Sync {
    /// 插入新会话
    fn insert(&self, session: &OtacSession) -> Result<()>;

    /// 按 ID 读取
    fn get_by_id(&self, session_id: &str) -> Result<Option<OtacSession>>;

    /// 原子条件更新：仅当当前状态等于 `expected` 时应用
    fn conditional_update(
        &self,
        session_id: &str,
        expected: SessionStatus,
        update: SessionUpdate,
    ) -> Result<Option<OtacSession>>;

    /// 删除已越过过期时间的会话，返回删除数量
    fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// 内存会话存储
#[derive(Debug, Default)]
pub struct InMemoryOtacStore {
    sessions: RwLock<HashMap<String, OtacSession>>,
}

impl InMemoryOtacStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前会话数量
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OtacStore for InMemoryOtacStore {
    fn insert(&self, session: &OtacSession) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn get_by_id(&self, session_id: &str) -> Result<Option<OtacSession>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;
        Ok(sessions.get(session_id).cloned())
    }

    fn conditional_update(
        &self,
        session_id: &str,
        expected: SessionStatus,
        update: SessionUpdate,
    ) -> Result<Option<OtacSession>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;

        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if session.status != expected {
            return Ok(None);
        }

        if let Some(status) = update.status {
            session.status = status;
        }
        if let Some(owner_id) = update.owner_id {
            session.owner_id = Some(owner_id);
        }
        if let Some(claimed_at) = update.claimed_at {
            session.claimed_at = Some(claimed_at);
        }
        Ok(Some(session.clone()))
    }

    fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok(before - sessions.len())
    }
}

// ============================================================================
// 管理器
// ============================================================================

/// 签发结果
///
/// 访问码只在这里交付一次，之后任何查询接口都不再返回它。
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// 会话 ID
    pub session_id: String,
    /// 一次性访问码
    pub code: String,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
}

/// 状态查询视图
///
/// 刻意不含访问码与权限范围：状态查询对任何持有会话 ID 的人开放。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatusView {
    /// 当前状态
    pub status: SessionStatus,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
}

/// 一次性访问码会话管理器
pub struct OtacManager<S: OtacStore = InMemoryOtacStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditLogger>,
    config: OtacConfig,
}

impl OtacManager<InMemoryOtacStore> {
    /// 以内存存储创建管理器
    pub fn in_memory(config: OtacConfig) -> Self {
        Self::new(Arc::new(InMemoryOtacStore::new()), config)
    }
}

impl<S: OtacStore> OtacManager<S> {
    /// 以显式存储创建管理器
    pub fn new(store: Arc<S>, config: OtacConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            audit: Arc::new(NoopAuditLogger),
            config,
        }
    }

    /// 替换时间源
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 替换审计日志器
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// 底层存储
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 签发新会话
    ///
    /// 会话在认领前是匿名的。`ttl` 为 `None` 时使用配置默认值。
    pub fn issue_session(&self, scope: Scope, ttl: Option<Duration>) -> Result<IssuedSession> {
        let now = self.clock.now();
        let expires_at = now + ttl.unwrap_or(self.config.ttl);
        let session = OtacSession {
            session_id: generate_session_id()?,
            code: generate_access_code(self.config.code_length)?,
            scope,
            owner_id: None,
            status: SessionStatus::Pending,
            issued_at: now,
            expires_at,
            claimed_at: None,
        };
        self.store.insert(&session)?;

        self.audit
            .log(AuditRecord::session_issued(&session.session_id));
        Ok(IssuedSession {
            session_id: session.session_id,
            code: session.code,
            expires_at,
        })
    }

    /// 认领会话
    ///
    /// 访问码正确且会话仍在有效期内时，以一次条件更新完成
    /// `pending → claimed` 并绑定认领者；并发认领中恰好一个成功。
    ///
    /// # Errors
    ///
    /// - `AlreadyClaimedOrExpired` - 会话不存在、已过期或已被认领
    /// - `CodeMismatch` - 访问码错误（会话保持可认领）
    pub fn claim(&self, session_id: &str, code: &str, owner_id: &str) -> Result<OtacSession> {
        if owner_id.is_empty() {
            return Err(ValidationError::EmptyField("owner_id".into()).into());
        }
        let now = self.clock.now();

        let Some(session) = self.store.get_by_id(session_id)? else {
            // 不区分"不存在"与"已消亡"，避免泄露会话存在性
            return Err(Error::AlreadyClaimedOrExpired);
        };

        if session.is_expired(now) {
            // 惰性过期：尝试落到状态字段，然后按不可认领处理
            self.store.conditional_update(
                session_id,
                SessionStatus::Pending,
                SessionUpdate {
                    status: Some(SessionStatus::Expired),
                    owner_id: None,
                    claimed_at: None,
                },
            )?;
            self.audit
                .log(AuditRecord::claim_failed(session_id, "expired"));
            return Err(Error::AlreadyClaimedOrExpired);
        }

        // 访问码错误不消耗会话，也不转移状态
        if !code_matches(&session.code, code) {
            self.audit
                .log(AuditRecord::claim_failed(session_id, "code_mismatch"));
            return Err(ValidationError::CodeMismatch.into());
        }

        let claimed = self.store.conditional_update(
            session_id,
            SessionStatus::Pending,
            SessionUpdate {
                status: Some(SessionStatus::Claimed),
                owner_id: Some(owner_id.into()),
                claimed_at: Some(now),
            },
        )?;

        match claimed {
            Some(session) => {
                self.audit
                    .log(AuditRecord::session_claimed(session_id, owner_id));
                Ok(session)
            }
            None => {
                self.audit
                    .log(AuditRecord::claim_failed(session_id, "lost_claim_race"));
                Err(Error::AlreadyClaimedOrExpired)
            }
        }
    }

    /// 查询会话状态
    ///
    /// 只返回状态与过期时间，绝不返回访问码。已越过有效期但尚未
    /// 落状态的会话报告为 `Expired`。
    pub fn session_status(&self, session_id: &str) -> Result<SessionStatusView> {
        let session = self
            .store
            .get_by_id(session_id)?
            .ok_or(Error::NotFoundOrAlreadyUsed)?;
        let now = self.clock.now();

        let status = if session.status == SessionStatus::Pending && session.is_expired(now) {
            // 尽力落状态；竞争失败也不影响报告结果
            self.store.conditional_update(
                session_id,
                SessionStatus::Pending,
                SessionUpdate {
                    status: Some(SessionStatus::Expired),
                    owner_id: None,
                    claimed_at: None,
                },
            )?;
            SessionStatus::Expired
        } else {
            session.status
        };

        Ok(SessionStatusView {
            status,
            expires_at: session.expires_at,
        })
    }

    /// 删除已过期的会话，返回删除数量
    pub fn cleanup_expired(&self) -> Result<usize> {
        let removed = self.store.cleanup_expired(self.clock.now())?;
        if removed > 0 {
            self.audit.log(
                AuditRecord::new(AuditEventKind::SessionExpired, EventSeverity::Info)
                    .with_message(format!("Removed {} expired sessions", removed)),
            );
        }
        Ok(removed)
    }
}

/// 摘要均衡的常量时间访问码比较
fn code_matches(expected: &str, presented: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(presented.as_bytes());
    constant_time_compare(&a, &b)
}
