//! # passrs
//!
//! 短时效自失效凭证引擎。凭证的安全性不依赖长期保密，而依赖
//! 快速失效：每个凭证恰好可用一次，消费后自动轮换出毫不相关的
//! 后继，双重使用在存储层被原子裁决并留下审计痕迹。
//!
//! ## 功能特性
//!
//! - **一次性凭证**：`active → used` 转换恰好发生一次，并发消费
//!   至多一个成功
//! - **哈希派生密码**：由基础密钥、时间桶与 nonce 确定性派生，
//!   明文从不落盘
//! - **消费即轮换**：消费成功后自动创建后继凭证，轮换链完整可查
//! - **一次性访问码**：匿名会话凭人类可抄写的访问码认领恰好一次
//! - **配额与权益**：免费主体受活跃槽位配额约束，付费主体不受限
//! - **审计日志**：签发、消费、轮换、双重使用企图全程留痕
//!
//! ## 快速开始
//!
//! ### 一次性凭证
//!
//! ```rust
//! use passrs::credential::IssueOptions;
//! use passrs::credential::lifecycle::{CredentialManager, LifecycleConfig};
//!
//! let manager = CredentialManager::in_memory(LifecycleConfig::default());
//!
//! let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();
//! assert!(manager.verify(&issued.credential.id, &issued.password).unwrap().valid);
//!
//! // 消费触发轮换，后继的密码与前驱毫不相关
//! let outcome = manager.consume(&issued.credential.id, "alice").unwrap();
//! let successor = outcome.successor.unwrap();
//! assert_ne!(successor.password, issued.password);
//! ```
//!
//! ### 一次性访问码会话
//!
//! ```rust
//! use passrs::otac::{OtacConfig, OtacManager, Scope};
//!
//! let manager = OtacManager::in_memory(OtacConfig::default());
//!
//! let issued = manager.issue_session(Scope::login(), None).unwrap();
//! let session = manager.claim(&issued.session_id, &issued.code, "alice").unwrap();
//! assert_eq!(session.owner_id.as_deref(), Some("alice"));
//! ```

pub mod audit;
pub mod clock;
pub mod credential;
pub mod derive;
pub mod error;
pub mod otac;
pub mod random;
pub mod secrets;

pub use audit::{AuditEventKind, AuditLogger, AuditRecord, InMemoryAuditLogger, NoopAuditLogger};
pub use clock::{Clock, FixedClock, SystemClock};
pub use credential::lifecycle::{
    ConsumeOutcome, CredentialManager, Entitlements, InMemoryEntitlements, IssuedCredential,
    LifecycleConfig,
};
pub use credential::store::{CredentialStore, InMemoryCredentialStore};
pub use credential::verify::{Verification, VerifyReason};
pub use credential::{Credential, CredentialKind, CredentialStatus, IssueOptions};
pub use derive::{DeriveAlgorithm, Derivation, Deriver};
pub use error::{Error, Result, ValidationError};
pub use otac::{InMemoryOtacStore, OtacConfig, OtacManager, OtacSession, Scope, SessionStatus};
pub use secrets::{InMemorySecretProvider, SecretProvider};
