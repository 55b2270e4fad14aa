//! 统一错误类型模块
//!
//! 提供 passrs 库中所有凭证生命周期操作的错误类型定义。
//!
//! 错误分类遵循引擎的传播策略：所有生命周期/验证错误都以类型化结果返回，
//! 绝不静默吞掉；唯一的例外是消费后的轮换失败，它被记录并异步重试
//! （见 `credential::lifecycle`）。

use std::fmt;

/// passrs 库的统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// passrs 库的错误类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// 输入校验错误（非法算法、迭代次数越界、缺失字段等）
    Validation(ValidationError),

    /// 凭证不存在，或已在并发竞争中被消费
    ///
    /// 调用方无法（也不应该）区分"真的不存在"和"刚刚输掉了竞争"。
    NotFoundOrAlreadyUsed,

    /// 会话已被认领或已过期（或不存在）
    AlreadyClaimedOrExpired,

    /// 免费额度已用尽
    QuotaExceeded {
        /// 归属主体
        owner_id: String,
        /// 允许的活跃凭证槽位数
        limit: usize,
    },

    /// 同一主体下已存在同名的活跃凭证（每个标签只允许一个活跃槽位）
    DuplicateActiveLabel {
        /// 归属主体
        owner_id: String,
        /// 冲突的标签
        label: String,
    },

    /// 存储暂时不可用（瞬时基础设施故障，可重试）
    ///
    /// 在关键路径（`mark_used`、`claim`）上此错误必须原样传播——
    /// 引擎绝不猜测操作是否成功。
    StoreUnavailable(String),
}

impl Error {
    /// 创建一个校验错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::Custom(msg.into()))
    }

    /// 创建一个存储不可用错误
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Error::StoreUnavailable(msg.into())
    }

    /// 此错误是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

/// 校验相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 不支持的派生算法
    InvalidAlgorithm(String),
    /// 迭代次数超出配置允许的范围
    IterationsOutOfRange {
        /// 允许的最小值
        min: u32,
        /// 允许的最大值
        max: u32,
        /// 实际传入值
        actual: u32,
    },
    /// 基础密钥为空
    EmptyBaseSecret,
    /// 字段为空
    EmptyField(String),
    /// 过期时间不晚于创建时间
    ExpiresBeforeCreation,
    /// 访问码不匹配
    CodeMismatch,
    /// 自定义校验错误
    Custom(String),
}

// ============================================================================
// Display 实现
// ============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::NotFoundOrAlreadyUsed => {
                write!(f, "credential not found or already used")
            }
            Error::AlreadyClaimedOrExpired => {
                write!(f, "session already claimed or expired")
            }
            Error::QuotaExceeded { owner_id, limit } => {
                write!(
                    f,
                    "quota exceeded for owner '{}': at most {} active credentials",
                    owner_id, limit
                )
            }
            Error::DuplicateActiveLabel { owner_id, label } => {
                write!(
                    f,
                    "owner '{}' already has an active credential labeled '{}'",
                    owner_id, label
                )
            }
            Error::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidAlgorithm(name) => {
                write!(f, "unsupported derivation algorithm: {}", name)
            }
            ValidationError::IterationsOutOfRange { min, max, actual } => {
                write!(
                    f,
                    "iterations out of range: expected {}..={}, got {}",
                    min, max, actual
                )
            }
            ValidationError::EmptyBaseSecret => write!(f, "base secret must not be empty"),
            ValidationError::EmptyField(field) => {
                write!(f, "field '{}' cannot be empty", field)
            }
            ValidationError::ExpiresBeforeCreation => {
                write!(f, "expires_at must be later than created_at")
            }
            ValidationError::CodeMismatch => write!(f, "access code does not match"),
            ValidationError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

// ============================================================================
// std::error::Error 实现
// ============================================================================

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// From 实现 - 方便错误转换
// ============================================================================

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFoundOrAlreadyUsed;
        assert_eq!(err.to_string(), "credential not found or already used");
    }

    #[test]
    fn test_quota_display() {
        let err = Error::QuotaExceeded {
            owner_id: "alice".into(),
            limit: 3,
        };
        assert_eq!(
            err.to_string(),
            "quota exceeded for owner 'alice': at most 3 active credentials"
        );
    }

    #[test]
    fn test_validation_error_from() {
        let err: Error = ValidationError::EmptyBaseSecret.into();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Validation error: base secret must not be empty"
        );
    }

    #[test]
    fn test_iterations_out_of_range_display() {
        let err = ValidationError::IterationsOutOfRange {
            min: 1_000,
            max: 100_000,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "iterations out of range: expected 1000..=100000, got 5"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::store_unavailable("timeout").is_retryable());
        assert!(!Error::NotFoundOrAlreadyUsed.is_retryable());
    }
}
