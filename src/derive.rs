//! 哈希派生引擎模块
//!
//! 从基础密钥、时间桶和 nonce 确定性地派生出可展示的密码及其验证哈希。
//! 派生是带密钥的迭代哈希（HMAC 后拉伸）：任何一个输入变化都会以压倒性
//! 概率改变输出（雪崩性质）。这正是轮换"不可逆"的来源——新的
//! nonce/时间桶产生一个毫不相关的新密码，旧的验证哈希永远无法再匹配
//! 新派生出的值。
//!
//! ## 示例
//!
//! ```rust
//! use passrs::derive::{DeriveAlgorithm, Deriver};
//!
//! let deriver = Deriver::new(DeriveAlgorithm::Sha256).with_iterations(1_000);
//! let d = deriver.derive(b"base-secret", 42, "a1b2c3").unwrap();
//!
//! // 同样的输入永远产生同样的输出
//! let d2 = deriver.derive(b"base-secret", 42, "a1b2c3").unwrap();
//! assert_eq!(d.password, d2.password);
//!
//! // 密码定长且 URL 安全；哈希从不泄露明文
//! assert_eq!(d.password.len(), 24);
//! assert_ne!(d.password, d.verification_hash);
//! ```

use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use blake2::Blake2b512;
use chrono::{DateTime, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac, SimpleHmac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Result, ValidationError};
use crate::random::{PASSWORD_BYTES, hex_encode};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;
// Blake2b 的块缓冲是惰性的，不满足 Hmac 的 Eager 约束，用 SimpleHmac。
type HmacBlake2b = SimpleHmac<Blake2b512>;

/// 允许的最小迭代次数
pub const MIN_ITERATIONS: u32 = 1_000;

/// 允许的最大迭代次数（限制单次派生的 CPU 成本）
pub const MAX_ITERATIONS: u32 = 100_000;

/// 默认迭代次数
pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// 默认时间桶宽度（秒）
pub const DEFAULT_BUCKET_SECS: u64 = 3_600;

// ============================================================================
// 算法
// ============================================================================

/// 派生支持的哈希算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeriveAlgorithm {
    /// SHA-256（默认）
    #[default]
    Sha256,
    /// SHA-512
    Sha512,
    /// BLAKE2b-512
    Blake2b,
}

impl DeriveAlgorithm {
    /// 算法的摘要输出长度（字节）
    pub fn digest_length(&self) -> usize {
        match self {
            DeriveAlgorithm::Sha256 => 32,
            DeriveAlgorithm::Sha512 => 64,
            DeriveAlgorithm::Blake2b => 64,
        }
    }
}

impl std::fmt::Display for DeriveAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeriveAlgorithm::Sha256 => write!(f, "sha256"),
            DeriveAlgorithm::Sha512 => write!(f, "sha512"),
            DeriveAlgorithm::Blake2b => write!(f, "blake2b"),
        }
    }
}

impl FromStr for DeriveAlgorithm {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DeriveAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(DeriveAlgorithm::Sha512),
            "blake2b" | "blake2b-512" => Ok(DeriveAlgorithm::Blake2b),
            other => Err(ValidationError::InvalidAlgorithm(other.to_string())),
        }
    }
}

// ============================================================================
// 派生结果
// ============================================================================

/// 一次派生的输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    /// 可展示的密码（定长、URL 安全字母表）
    pub password: String,

    /// 密码的单向摘要（十六进制）——哈希模式下只持久化它，从不存明文
    pub verification_hash: String,
}

// ============================================================================
// 派生器
// ============================================================================

/// 哈希派生器
///
/// 纯函数式：输出只取决于输入，没有副作用。nonce 由调用方提供
/// （通常来自 [`crate::random::generate_nonce`]）。
#[derive(Debug, Clone, Copy)]
pub struct Deriver {
    algorithm: DeriveAlgorithm,
    iterations: u32,
}

impl Default for Deriver {
    fn default() -> Self {
        Self::new(DeriveAlgorithm::default())
    }
}

impl Deriver {
    /// 以指定算法和默认迭代次数创建派生器
    pub fn new(algorithm: DeriveAlgorithm) -> Self {
        Self {
            algorithm,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// 设置迭代次数
    ///
    /// 越界的值在 [`Deriver::derive`] 时返回 `IterationsOutOfRange`。
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// 获取当前算法
    pub fn algorithm(&self) -> DeriveAlgorithm {
        self.algorithm
    }

    /// 获取当前迭代次数
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// 执行派生
    ///
    /// 计算 `HMAC(base_secret, time_bucket ‖ nonce)`，再做带密钥的迭代
    /// 拉伸，取前 [`PASSWORD_BYTES`] 字节编码为密码。
    ///
    /// # Errors
    ///
    /// - `EmptyBaseSecret` - 基础密钥为空
    /// - `IterationsOutOfRange` - 迭代次数不在允许范围内
    pub fn derive(&self, base_secret: &[u8], time_bucket: u64, nonce: &str) -> Result<Derivation> {
        if base_secret.is_empty() {
            return Err(ValidationError::EmptyBaseSecret.into());
        }
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(ValidationError::IterationsOutOfRange {
                min: MIN_ITERATIONS,
                max: MAX_ITERATIONS,
                actual: self.iterations,
            }
            .into());
        }

        // 时间桶固定 8 字节大端，再接 nonce，无歧义拼接
        let mut message = Vec::with_capacity(8 + nonce.len());
        message.extend_from_slice(&time_bucket.to_be_bytes());
        message.extend_from_slice(nonce.as_bytes());

        let okm = match self.algorithm {
            DeriveAlgorithm::Sha256 => {
                stretch::<HmacSha256>(base_secret, &message, self.iterations)?
            }
            DeriveAlgorithm::Sha512 => {
                stretch::<HmacSha512>(base_secret, &message, self.iterations)?
            }
            DeriveAlgorithm::Blake2b => {
                stretch::<HmacBlake2b>(base_secret, &message, self.iterations)?
            }
        };

        let password = URL_SAFE_NO_PAD.encode(&okm[..PASSWORD_BYTES]);
        let verification_hash = verification_hash_of(self.algorithm, &password);

        Ok(Derivation {
            password,
            verification_hash,
        })
    }
}

/// 带密钥的迭代拉伸：每一轮都以基础密钥为 HMAC 密钥重新混入上一轮输出
fn stretch<M: Mac + KeyInit>(key: &[u8], message: &[u8], iterations: u32) -> Result<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| ValidationError::Custom("invalid key length".into()))?;
    mac.update(message);
    let mut okm = mac.finalize().into_bytes().to_vec();

    for _ in 1..iterations {
        let mut mac = <M as Mac>::new_from_slice(key)
            .map_err(|_| ValidationError::Custom("invalid key length".into()))?;
        mac.update(&okm);
        okm = mac.finalize().into_bytes().to_vec();
    }

    Ok(okm)
}

/// 计算密码的单向验证哈希（十六进制）
///
/// 可由存储的描述符独立重算，用于不落明文的再验证。
pub fn verification_hash_of(algorithm: DeriveAlgorithm, password: &str) -> String {
    match algorithm {
        DeriveAlgorithm::Sha256 => hex_encode(&Sha256::digest(password.as_bytes())),
        DeriveAlgorithm::Sha512 => hex_encode(&Sha512::digest(password.as_bytes())),
        DeriveAlgorithm::Blake2b => hex_encode(&Blake2b512::digest(password.as_bytes())),
    }
}

/// 计算某一时刻所属的时间桶
///
/// 粗粒度时间窗口作为派生输入，使得不换 nonce 时输出也会随时间改变。
pub fn time_bucket(at: DateTime<Utc>, bucket_secs: u64) -> u64 {
    let secs = at.timestamp().max(0) as u64;
    secs / bucket_secs.max(1)
}
