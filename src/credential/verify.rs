//! 凭证验证引擎
//!
//! 纯校验：验证本身从不改变凭证状态，消费由调用方显式发起。
//! 所有密文比较都是常量时间的；两侧先做等长摘要，使长度差异
//! 也无法提前短路。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::credential::{Credential, SecretMaterial};
use crate::derive::{Deriver, verification_hash_of};
use crate::error::Result;
use crate::random::constant_time_compare;
use crate::secrets::SecretProvider;

// ============================================================================
// 验证结果
// ============================================================================

/// 验证失败原因（仅供内部审计，外部响应一律脱敏）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyReason {
    /// 密文不匹配
    HashMismatch,
    /// 凭证已过期
    Expired,
    /// 凭证不处于活跃状态
    NotActive,
    /// 凭证不存在
    NotFound,
}

impl std::fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyReason::HashMismatch => write!(f, "hash_mismatch"),
            VerifyReason::Expired => write!(f, "expired"),
            VerifyReason::NotActive => write!(f, "not_active"),
            VerifyReason::NotFound => write!(f, "not_found"),
        }
    }
}

/// 验证结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// 是否有效
    pub valid: bool,
    /// 失败原因（成功时为 `None`）
    pub reason: Option<VerifyReason>,
}

impl Verification {
    /// 成功结果
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    /// 失败结果
    pub fn invalid(reason: VerifyReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }

    /// 对外响应用的脱敏文本
    ///
    /// 失败原因不区分"不存在/已用/密文错误"，避免泄露凭证存在性。
    pub fn redacted(&self) -> &'static str {
        if self.valid { "ok" } else { "invalid" }
    }
}

// ============================================================================
// 验证器
// ============================================================================

/// 凭证验证器
///
/// 哈希派生凭证按存储的描述符重算候选密码；为容忍派生与验证跨越
/// 时间桶边界的时钟偏移，额外接受恰好相邻（±1）的两个时间桶。
pub struct Verifier {
    secrets: Arc<dyn SecretProvider>,
    clock: Arc<dyn Clock>,
}

impl Verifier {
    /// 创建验证器
    pub fn new(secrets: Arc<dyn SecretProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { secrets, clock }
    }

    /// 验证明文密文是否匹配凭证
    ///
    /// 检查顺序：过期 → 状态 → 密文。不修改凭证。
    pub fn verify(&self, credential: &Credential, presented: &str) -> Result<Verification> {
        if credential.is_expired(self.clock.now()) {
            return Ok(Verification::invalid(VerifyReason::Expired));
        }
        if !credential.is_active() {
            return Ok(Verification::invalid(VerifyReason::NotActive));
        }

        let matched = match &credential.secret_material {
            SecretMaterial::Plaintext { value } => digest_eq(value, presented),
            SecretMaterial::Derived {
                algorithm,
                iterations,
                time_bucket,
                nonce,
                base_secret_ref,
            } => {
                let base_secret = self.secrets.base_secret(base_secret_ref)?;
                let deriver = Deriver::new(*algorithm).with_iterations(*iterations);
                let presented_hash = verification_hash_of(*algorithm, presented);

                // 严格限定为存储桶与两个相邻桶，不做更宽的回溯
                let mut matched = false;
                for bucket in [
                    Some(*time_bucket),
                    time_bucket.checked_sub(1),
                    time_bucket.checked_add(1),
                ]
                .into_iter()
                .flatten()
                {
                    let candidate = deriver.derive(&base_secret, bucket, nonce)?;
                    if digest_eq(&candidate.verification_hash, &presented_hash) {
                        matched = true;
                    }
                }
                matched
            }
        };

        if matched {
            Ok(Verification::ok())
        } else {
            Ok(Verification::invalid(VerifyReason::HashMismatch))
        }
    }
}

/// 摘要均衡的常量时间字符串比较
///
/// 两侧先取 SHA-256 再比较，长度不同的输入也走完整比较路径。
fn digest_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    constant_time_compare(&da, &db)
}
