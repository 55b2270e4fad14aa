//! 凭证生命周期引擎
//!
//! 本模块族实现一次性凭证的完整生命周期：
//!
//! - **数据模型**（本文件）：凭证记录、状态机、追加式事件日志
//! - **存储适配器** ([`store`])：带原子条件更新的持久化接口
//! - **状态机** ([`lifecycle`])：签发、消费、轮换、吊销与配额
//! - **验证引擎** ([`verify`])：常量时间验证与时钟偏移容忍
//!
//! 核心不变量：一个凭证的 `active → used` 转换恰好发生一次；任何凭证
//! 都不会重新回到 `active`；轮换链是单链表，每个节点至多一个后继。
//!
//! ## 示例
//!
//! ```rust
//! use passrs::credential::IssueOptions;
//! use passrs::credential::lifecycle::{CredentialManager, LifecycleConfig};
//!
//! let manager = CredentialManager::in_memory(LifecycleConfig::default());
//!
//! // 签发一次性明文密码
//! let issued = manager
//!     .issue("alice", IssueOptions::disposable().with_label("email"))
//!     .unwrap();
//!
//! // 验证后显式消费；消费触发轮换
//! let verification = manager.verify(&issued.credential.id, &issued.password).unwrap();
//! assert!(verification.valid);
//!
//! let outcome = manager.consume(&issued.credential.id, "alice").unwrap();
//! assert!(outcome.successor.is_some());
//! ```

pub mod lifecycle;
pub mod store;
pub mod verify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::derive::DeriveAlgorithm;

// ============================================================================
// 状态与事件
// ============================================================================

/// 凭证状态
///
/// 状态单调推进：`Active` 是唯一的起点，`Used`/`Expired`/`Revoked`
/// 都是不可回退的。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialStatus {
    /// 可被验证与消费
    Active,
    /// 已被消费恰好一次
    Used,
    /// 已过期（惰性判定，或由清扫标记）
    Expired,
    /// 已被显式吊销
    Revoked,
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialStatus::Active => write!(f, "active"),
            CredentialStatus::Used => write!(f, "used"),
            CredentialStatus::Expired => write!(f, "expired"),
            CredentialStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// 生命周期事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// 签发
    Issued,
    /// 消费
    Used,
    /// 轮换（后继已链接）
    Rotated,
    /// 验证成功
    Verified,
    /// 失败的使用/验证企图
    Failed,
    /// 吊销
    Revoked,
    /// 过期标记
    Expired,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Issued => write!(f, "issued"),
            EventKind::Used => write!(f, "used"),
            EventKind::Rotated => write!(f, "rotated"),
            EventKind::Verified => write!(f, "verified"),
            EventKind::Failed => write!(f, "failed"),
            EventKind::Revoked => write!(f, "revoked"),
            EventKind::Expired => write!(f, "expired"),
        }
    }
}

/// 生命周期事件
///
/// 只追加，从不修改或删除；`seq` 按凭证单调递增，足以事后重建完整
/// 历史并追查双重使用企图。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEvent {
    /// 凭证内单调递增的序号（从 1 开始）
    pub seq: u64,
    /// 事件类型
    pub kind: EventKind,
    /// 发生时间
    pub occurred_at: DateTime<Utc>,
}

// ============================================================================
// 密钥材料
// ============================================================================

/// 凭证的密钥材料
///
/// 明文一次性值和派生描述符二选一，绝不同时存在。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretMaterial {
    /// 一次性明文密码（仅一次性凭证模式）
    Plaintext {
        /// 存储的明文值
        value: String,
    },
    /// 哈希派生描述符——明文从不落盘，验证时按描述符重算
    Derived {
        /// 派生算法
        algorithm: DeriveAlgorithm,
        /// 迭代次数
        iterations: u32,
        /// 派生时的时间桶
        time_bucket: u64,
        /// 派生 nonce
        nonce: String,
        /// 基础密钥引用（由外部密钥管理方解析）
        base_secret_ref: String,
    },
}

impl SecretMaterial {
    /// 是否为哈希派生模式
    pub fn is_derived(&self) -> bool {
        matches!(self, SecretMaterial::Derived { .. })
    }
}

// ============================================================================
// 凭证记录
// ============================================================================

/// 凭证记录
///
/// 记录本身归存储适配器所有；引擎只以 ID 传递请求范围内的值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// 不透明唯一标识，创建时分配，不可变
    pub id: String,

    /// 归属主体，不可变
    pub owner_id: String,

    /// 密钥材料
    pub secret_material: SecretMaterial,

    /// 当前有效密文的哈希（十六进制）
    pub verification_hash: String,

    /// 当前状态。同一主体同一标签至多一个 `Active`
    pub status: CredentialStatus,

    /// 用户自选名称；沿轮换链保持不变
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 过期时间（可选；必须晚于 `created_at`）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// 前驱凭证 ID（轮换链后向链接，置一次后不再变）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predecessor_id: Option<String>,

    /// 后继凭证 ID（轮换链前向链接，置一次后不再变）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successor_id: Option<String>,

    /// 追加式事件日志
    pub events: Vec<CredentialEvent>,
}

impl Credential {
    /// 是否已过期（相对给定时刻惰性判定）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// 是否处于活跃状态（不含过期判定）
    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }

    /// 下一个事件序号
    pub(crate) fn next_event_seq(&self) -> u64 {
        self.events.last().map(|e| e.seq + 1).unwrap_or(1)
    }
}

// ============================================================================
// 签发选项
// ============================================================================

/// 凭证种类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialKind {
    /// 一次性明文密码
    Disposable,
    /// 哈希派生密码
    Derived {
        /// 基础密钥引用
        base_secret_ref: String,
    },
}

/// 签发选项
#[derive(Debug, Clone)]
pub struct IssueOptions {
    /// 凭证种类
    pub kind: CredentialKind,
    /// 标签（同一主体下一个标签至多一个活跃凭证）
    pub label: Option<String>,
    /// 过期时间
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssueOptions {
    /// 一次性明文凭证
    pub fn disposable() -> Self {
        Self {
            kind: CredentialKind::Disposable,
            label: None,
            expires_at: None,
        }
    }

    /// 哈希派生凭证
    pub fn derived(base_secret_ref: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::Derived {
                base_secret_ref: base_secret_ref.into(),
            },
            label: None,
            expires_at: None,
        }
    }

    /// 设置标签
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// 设置过期时间
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}
