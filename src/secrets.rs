//! 基础密钥提供者模块
//!
//! 哈希派生密码的基础密钥由外部密钥管理协作方持有，并以更慢的
//! 账户级节奏轮换。对本引擎而言基础密钥是只读的：引擎只通过
//! `base_secret_ref` 引用按需取用，从不持久化密钥本身。

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result, ValidationError};

/// 基础密钥提供者接口
///
/// 实现此 trait 以接入外部密钥管理系统（Vault、KMS 等）。
pub trait SecretProvider: Send + Sync {
    /// 按引用解析基础密钥
    ///
    /// # Errors
    ///
    /// 引用未知时返回校验错误；后端不可达时返回 `StoreUnavailable`。
    fn base_secret(&self, reference: &str) -> Result<Vec<u8>>;
}

/// 内存密钥提供者
///
/// 适用于测试与单实例部署。
#[derive(Debug, Default)]
pub struct InMemorySecretProvider {
    secrets: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySecretProvider {
    /// 创建空的提供者
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个基础密钥
    pub fn insert(&self, reference: impl Into<String>, secret: impl Into<Vec<u8>>) -> Result<()> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;
        secrets.insert(reference.into(), secret.into());
        Ok(())
    }
}

impl SecretProvider for InMemorySecretProvider {
    fn base_secret(&self, reference: &str) -> Result<Vec<u8>> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;
        secrets.get(reference).cloned().ok_or_else(|| {
            ValidationError::Custom(format!("unknown base secret reference '{}'", reference)).into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_resolve() {
        let provider = InMemorySecretProvider::new();
        provider.insert("acct-1", b"master-secret".to_vec()).unwrap();

        let secret = provider.base_secret("acct-1").unwrap();
        assert_eq!(secret, b"master-secret");
    }

    #[test]
    fn test_unknown_reference() {
        let provider = InMemorySecretProvider::new();
        assert!(provider.base_secret("missing").is_err());
    }

    #[test]
    fn test_overwrite_reference() {
        let provider = InMemorySecretProvider::new();
        provider.insert("acct-1", b"old".to_vec()).unwrap();
        provider.insert("acct-1", b"new".to_vec()).unwrap();
        assert_eq!(provider.base_secret("acct-1").unwrap(), b"new");
    }
}
