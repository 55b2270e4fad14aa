//! 审计日志模块
//!
//! 记录凭证与会话生命周期中的安全事件，包括事后追查双重使用企图
//! 所需的失败记录。
//!
//! ## 使用示例
//!
//! ```rust
//! use passrs::audit::{AuditLogger, AuditRecord, EventSeverity, InMemoryAuditLogger};
//!
//! let logger = InMemoryAuditLogger::new();
//!
//! logger.log(AuditRecord::credential_issued("alice", "cred-1"));
//! logger.log(AuditRecord::double_use_attempt("alice", "cred-1"));
//!
//! let events = logger.get_events();
//! assert_eq!(events.len(), 2);
//!
//! let warnings = logger.get_events_by_severity(EventSeverity::Warning);
//! assert_eq!(warnings.len(), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::random::generate_random_hex;

/// 事件严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventSeverity {
    /// 一般信息
    #[default]
    Info,
    /// 警告
    Warning,
    /// 错误
    Error,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Info => write!(f, "INFO"),
            EventSeverity::Warning => write!(f, "WARNING"),
            EventSeverity::Error => write!(f, "ERROR"),
        }
    }
}

/// 审计事件类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// 凭证签发
    CredentialIssued,
    /// 凭证消费
    CredentialUsed,
    /// 凭证轮换（后继已创建）
    CredentialRotated,
    /// 凭证吊销
    CredentialRevoked,
    /// 凭证过期标记
    CredentialExpired,
    /// 双重使用企图（输掉并发竞争或重放旧凭证）
    DoubleUseAttempt,
    /// 验证成功
    VerifySucceeded,
    /// 验证失败
    VerifyFailed,
    /// 轮换失败（将被异步重试）
    RotationFailed,
    /// 会话签发
    SessionIssued,
    /// 会话认领成功
    SessionClaimed,
    /// 会话认领失败
    ClaimFailed,
    /// 会话过期
    SessionExpired,
    /// 自定义事件
    Custom(String),
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditEventKind::CredentialIssued => write!(f, "credential_issued"),
            AuditEventKind::CredentialUsed => write!(f, "credential_used"),
            AuditEventKind::CredentialRotated => write!(f, "credential_rotated"),
            AuditEventKind::CredentialRevoked => write!(f, "credential_revoked"),
            AuditEventKind::CredentialExpired => write!(f, "credential_expired"),
            AuditEventKind::DoubleUseAttempt => write!(f, "double_use_attempt"),
            AuditEventKind::VerifySucceeded => write!(f, "verify_succeeded"),
            AuditEventKind::VerifyFailed => write!(f, "verify_failed"),
            AuditEventKind::RotationFailed => write!(f, "rotation_failed"),
            AuditEventKind::SessionIssued => write!(f, "session_issued"),
            AuditEventKind::SessionClaimed => write!(f, "session_claimed"),
            AuditEventKind::ClaimFailed => write!(f, "claim_failed"),
            AuditEventKind::SessionExpired => write!(f, "session_expired"),
            AuditEventKind::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// 审计记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// 记录 ID
    pub id: String,
    /// 事件类型
    pub kind: AuditEventKind,
    /// 严重程度
    pub severity: EventSeverity,
    /// 归属主体（如果适用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// 相关凭证 ID（如果适用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    /// 相关会话 ID（如果适用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// 事件消息/描述
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 额外详情
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
    /// 事件时间
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// 创建新的审计记录
    pub fn new(kind: AuditEventKind, severity: EventSeverity) -> Self {
        Self {
            id: generate_random_hex(8).unwrap_or_else(|_| "evt".into()),
            kind,
            severity,
            owner_id: None,
            credential_id: None,
            session_id: None,
            message: None,
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// 创建自定义记录
    pub fn custom(name: impl Into<String>, severity: EventSeverity) -> Self {
        Self::new(AuditEventKind::Custom(name.into()), severity)
    }

    /// 设置归属主体
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// 设置凭证 ID
    pub fn with_credential(mut self, credential_id: impl Into<String>) -> Self {
        self.credential_id = Some(credential_id.into());
        self
    }

    /// 设置会话 ID
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// 设置消息
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// 添加详情
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    // ========================================================================
    // 便捷构造方法
    // ========================================================================

    /// 凭证签发事件
    pub fn credential_issued(
        owner_id: impl Into<String>,
        credential_id: impl Into<String>,
    ) -> Self {
        Self::new(AuditEventKind::CredentialIssued, EventSeverity::Info)
            .with_owner(owner_id)
            .with_credential(credential_id)
            .with_message("Credential issued")
    }

    /// 凭证消费事件
    pub fn credential_used(owner_id: impl Into<String>, credential_id: impl Into<String>) -> Self {
        Self::new(AuditEventKind::CredentialUsed, EventSeverity::Info)
            .with_owner(owner_id)
            .with_credential(credential_id)
            .with_message("Credential consumed")
    }

    /// 凭证轮换事件
    pub fn credential_rotated(
        owner_id: impl Into<String>,
        predecessor_id: impl Into<String>,
        successor_id: impl Into<String>,
    ) -> Self {
        Self::new(AuditEventKind::CredentialRotated, EventSeverity::Info)
            .with_owner(owner_id)
            .with_credential(predecessor_id)
            .with_detail("successor_id", successor_id.into())
            .with_message("Successor credential created")
    }

    /// 凭证吊销事件
    pub fn credential_revoked(credential_id: impl Into<String>) -> Self {
        Self::new(AuditEventKind::CredentialRevoked, EventSeverity::Warning)
            .with_credential(credential_id)
            .with_message("Credential revoked")
    }

    /// 双重使用企图事件
    pub fn double_use_attempt(
        owner_id: impl Into<String>,
        credential_id: impl Into<String>,
    ) -> Self {
        Self::new(AuditEventKind::DoubleUseAttempt, EventSeverity::Warning)
            .with_owner(owner_id)
            .with_credential(credential_id)
            .with_message("Attempt to consume a credential that is not active")
    }

    /// 验证失败事件
    pub fn verify_failed(credential_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AuditEventKind::VerifyFailed, EventSeverity::Warning)
            .with_credential(credential_id)
            .with_detail("reason", reason.into())
            .with_message("Verification failed")
    }

    /// 轮换失败事件
    pub fn rotation_failed(credential_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AuditEventKind::RotationFailed, EventSeverity::Error)
            .with_credential(credential_id)
            .with_message(format!("Rotation failed, queued for retry: {}", reason.into()))
    }

    /// 会话签发事件
    pub fn session_issued(session_id: impl Into<String>) -> Self {
        Self::new(AuditEventKind::SessionIssued, EventSeverity::Info)
            .with_session(session_id)
            .with_message("One-time access session issued")
    }

    /// 会话认领成功事件
    pub fn session_claimed(session_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self::new(AuditEventKind::SessionClaimed, EventSeverity::Info)
            .with_session(session_id)
            .with_owner(owner_id)
            .with_message("Session claimed")
    }

    /// 会话认领失败事件
    pub fn claim_failed(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AuditEventKind::ClaimFailed, EventSeverity::Warning)
            .with_session(session_id)
            .with_detail("reason", reason.into())
            .with_message("Session claim failed")
    }
}

// ============================================================================
// 日志接口与实现
// ============================================================================

/// 审计日志接口
///
/// 实现此 trait 以将事件写入外部日志/SIEM 系统。
pub trait AuditLogger: Send + Sync {
    /// 记录一条审计事件
    fn log(&self, record: AuditRecord);
}

/// 内存审计日志器
///
/// 适用于测试和开发环境。
#[derive(Debug, Default)]
pub struct InMemoryAuditLogger {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLogger {
    /// 创建新的内存日志器
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取所有事件
    pub fn get_events(&self) -> Vec<AuditRecord> {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// 按归属主体过滤事件
    pub fn get_events_by_owner(&self, owner_id: &str) -> Vec<AuditRecord> {
        self.get_events()
            .into_iter()
            .filter(|r| r.owner_id.as_deref() == Some(owner_id))
            .collect()
    }

    /// 按严重程度过滤事件
    pub fn get_events_by_severity(&self, severity: EventSeverity) -> Vec<AuditRecord> {
        self.get_events()
            .into_iter()
            .filter(|r| r.severity == severity)
            .collect()
    }

    /// 按事件类型过滤事件
    pub fn get_events_by_kind(&self, kind: &AuditEventKind) -> Vec<AuditRecord> {
        self.get_events()
            .into_iter()
            .filter(|r| &r.kind == kind)
            .collect()
    }

    /// 清空事件
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.write() {
            records.clear();
        }
    }

    /// 事件数量
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLogger for InMemoryAuditLogger {
    fn log(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.write() {
            records.push(record);
        }
    }
}

/// 丢弃所有事件的日志器（默认接线）
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

impl AuditLogger for NoopAuditLogger {
    fn log(&self, _record: AuditRecord) {}
}
