//! 凭证存储适配器
//!
//! 引擎与持久化之间的唯一边界。跨请求的全部协调都依赖
//! [`CredentialStore::conditional_update`]：一次只有在 WHERE 式谓词
//! 对当前行成立时才生效的更新，原子地返回更新后的行或 `None`。
//! 引擎内部绝不做"读-改-写"，那会重新引入此契约要消除的竞争。
//!
//! 对同一个凭证 ID，存储保证条件更新串行化：并发的 `mark_used`
//! 至多一个观察到成功，其余观察到"已被消费"。任何操作都不阻塞
//! 等待另一个操作。

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::credential::{Credential, CredentialEvent, CredentialStatus, EventKind};
use crate::error::{Error, Result};

// ============================================================================
// 条件更新契约
// ============================================================================

/// 条件更新的谓词
///
/// 所有设置的字段必须同时成立，更新才会生效。
#[derive(Debug, Clone, Default)]
pub struct CredentialPredicate {
    /// 期望的当前状态
    pub status: Option<CredentialStatus>,
    /// 期望的归属主体
    pub owner_id: Option<String>,
    /// 要求后继链接尚未设置（用于轮换链接的置一次语义）
    pub successor_unset: bool,
}

impl CredentialPredicate {
    /// 仅匹配指定状态
    pub fn status(status: CredentialStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// 追加归属主体条件
    pub fn owned_by(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// 追加"后继未设置"条件
    pub fn without_successor(mut self) -> Self {
        self.successor_unset = true;
        self
    }

    fn matches(&self, credential: &Credential) -> bool {
        if let Some(status) = self.status {
            if credential.status != status {
                return false;
            }
        }
        if let Some(owner_id) = &self.owner_id {
            if &credential.owner_id != owner_id {
                return false;
            }
        }
        if self.successor_unset && credential.successor_id.is_some() {
            return false;
        }
        true
    }
}

/// 条件更新要写入的新字段
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    /// 新状态
    pub status: Option<CredentialStatus>,
    /// 后继凭证 ID（轮换链接）
    pub successor_id: Option<String>,
    /// 随本次转换追加的事件
    pub event: Option<(EventKind, DateTime<Utc>)>,
}

impl CredentialUpdate {
    /// 状态转换并追加对应事件
    pub fn transition(status: CredentialStatus, kind: EventKind, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            successor_id: None,
            event: Some((kind, at)),
        }
    }

    /// 设置后继链接
    pub fn with_successor(mut self, successor_id: impl Into<String>) -> Self {
        self.successor_id = Some(successor_id.into());
        self
    }
}

// ============================================================================
// 存储接口
// ============================================================================

/// 凭证存储接口
///
/// 实现此 trait 以接入事务性行存储。实现必须保证
/// `conditional_update` 对同一 ID 的并发调用串行生效。
pub trait CredentialStore: Send + Sync {
    /// 插入新凭证（单行插入，无竞争）
    fn insert(&self, credential: &Credential) -> Result<()>;

    /// 按 ID 读取
    fn get_by_id(&self, id: &str) -> Result<Option<Credential>>;

    /// 原子条件更新
    ///
    /// 谓词对当前行成立时应用更新并返回新行；否则返回 `None`，
    /// 行保持不变。这是 `mark_used` 防双花的全部依据。
    fn conditional_update(
        &self,
        id: &str,
        expected: &CredentialPredicate,
        update: CredentialUpdate,
    ) -> Result<Option<Credential>>;

    /// 追加一条事件（不触碰状态；用于 verified/failed 审计轨迹）
    fn append_event(&self, id: &str, kind: EventKind, occurred_at: DateTime<Utc>) -> Result<()>;

    /// 列出主体的全部凭证
    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Credential>>;
}

// ============================================================================
// 内存实现
// ============================================================================

/// 内存凭证存储
///
/// 单个写锁就是条件更新的串行化点。适用于测试与单实例部署；
/// 生产环境应以数据库的条件 UPDATE 实现同一契约。
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<String, Credential>>,
}

impl InMemoryCredentialStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存储的凭证数量
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn insert(&self, credential: &Credential) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;
        if records.contains_key(&credential.id) {
            return Err(Error::store_unavailable(format!(
                "duplicate credential id '{}'",
                credential.id
            )));
        }
        records.insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Credential>> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;
        Ok(records.get(id).cloned())
    }

    fn conditional_update(
        &self,
        id: &str,
        expected: &CredentialPredicate,
        update: CredentialUpdate,
    ) -> Result<Option<Credential>> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;

        let Some(record) = records.get_mut(id) else {
            return Ok(None);
        };
        if !expected.matches(record) {
            return Ok(None);
        }

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(successor_id) = update.successor_id {
            record.successor_id = Some(successor_id);
        }
        if let Some((kind, occurred_at)) = update.event {
            let seq = record.next_event_seq();
            record.events.push(CredentialEvent {
                seq,
                kind,
                occurred_at,
            });
        }

        Ok(Some(record.clone()))
    }

    fn append_event(&self, id: &str, kind: EventKind, occurred_at: DateTime<Utc>) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;

        if let Some(record) = records.get_mut(id) {
            let seq = record.next_event_seq();
            record.events.push(CredentialEvent {
                seq,
                kind,
                occurred_at,
            });
        }
        Ok(())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Credential>> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::store_unavailable("lock poisoned"))?;
        let mut out: Vec<Credential> = records
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}
