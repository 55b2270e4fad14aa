//! 凭证生命周期状态机
//!
//! [`CredentialManager`] 编排签发、验证、消费、轮换、吊销与过期清扫。
//! 它自身不持有任何跨请求的可变状态；全部协调都下沉到存储的原子
//! 条件更新上，因此管理器可以在任意多的线程间共享。
//!
//! 消费与轮换的先后关系是固定的：先以一次条件更新完成 `active → used`
//! 转换（这是防双花的唯一裁决点），成功后再尽力创建后继。轮换失败
//! 不回滚消费——凭证保持已消费状态，轮换进入待重试队列。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::audit::{AuditEventKind, AuditLogger, AuditRecord, EventSeverity, NoopAuditLogger};
use crate::clock::{Clock, SystemClock};
use crate::credential::store::{
    CredentialPredicate, CredentialStore, CredentialUpdate, InMemoryCredentialStore,
};
use crate::credential::verify::{Verification, Verifier, VerifyReason};
use crate::credential::{
    Credential, CredentialEvent, CredentialKind, CredentialStatus, EventKind, IssueOptions,
    SecretMaterial,
};
use crate::derive::{
    DEFAULT_BUCKET_SECS, DEFAULT_ITERATIONS, DeriveAlgorithm, Deriver, time_bucket,
    verification_hash_of,
};
use crate::error::{Error, Result, ValidationError};
use crate::random::{generate_credential_id, generate_nonce, generate_password};
use crate::secrets::{InMemorySecretProvider, SecretProvider};

// ============================================================================
// 配额与权益
// ============================================================================

/// 主体权益接口
///
/// 免费主体受活跃凭证槽位配额约束，付费主体不受限。
/// 实现此 trait 以接入外部计费/订阅系统。
pub trait Entitlements: Send + Sync {
    /// 主体是否为付费档位
    fn is_pro(&self, owner_id: &str) -> bool;
}

/// 内存权益表
///
/// 适用于测试与单实例部署。
#[derive(Debug, Default)]
pub struct InMemoryEntitlements {
    pro: RwLock<HashSet<String>>,
}

impl InMemoryEntitlements {
    /// 创建空的权益表（所有主体都是免费档位）
    pub fn new() -> Self {
        Self::default()
    }

    /// 授予付费档位
    pub fn grant_pro(&self, owner_id: impl Into<String>) {
        if let Ok(mut pro) = self.pro.write() {
            pro.insert(owner_id.into());
        }
    }

    /// 撤销付费档位
    pub fn revoke_pro(&self, owner_id: &str) {
        if let Ok(mut pro) = self.pro.write() {
            pro.remove(owner_id);
        }
    }
}

impl Entitlements for InMemoryEntitlements {
    fn is_pro(&self, owner_id: &str) -> bool {
        self.pro
            .read()
            .map(|pro| pro.contains(owner_id))
            .unwrap_or(false)
    }
}

// ============================================================================
// 配置
// ============================================================================

/// 免费档位默认的活跃凭证槽位数
pub const DEFAULT_FREE_ACTIVE_LIMIT: usize = 3;

/// 生命周期配置
///
/// # Example
///
/// ```rust
/// use passrs::credential::lifecycle::LifecycleConfig;
/// use passrs::derive::DeriveAlgorithm;
///
/// let config = LifecycleConfig::default()
///     .with_algorithm(DeriveAlgorithm::Sha512)
///     .with_iterations(50_000);
/// ```
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// 派生与验证哈希使用的算法
    pub algorithm: DeriveAlgorithm,
    /// 派生迭代次数
    pub iterations: u32,
    /// 派生时间桶宽度（秒）
    pub bucket_secs: u64,
    /// 免费档位的活跃凭证槽位上限
    pub free_active_limit: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            algorithm: DeriveAlgorithm::default(),
            iterations: DEFAULT_ITERATIONS,
            bucket_secs: DEFAULT_BUCKET_SECS,
            free_active_limit: DEFAULT_FREE_ACTIVE_LIMIT,
        }
    }
}

impl LifecycleConfig {
    /// 高安全性预设：更强的算法与更高的迭代次数
    pub fn high_security() -> Self {
        Self {
            algorithm: DeriveAlgorithm::Sha512,
            iterations: 100_000,
            bucket_secs: 300,
            free_active_limit: DEFAULT_FREE_ACTIVE_LIMIT,
        }
    }

    /// 宽松预设：适用于开发环境
    pub fn relaxed() -> Self {
        Self {
            algorithm: DeriveAlgorithm::Sha256,
            iterations: 1_000,
            bucket_secs: 86_400,
            free_active_limit: 10,
        }
    }

    /// 设置算法
    pub fn with_algorithm(mut self, algorithm: DeriveAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// 设置迭代次数
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// 设置时间桶宽度（秒）
    pub fn with_bucket_secs(mut self, bucket_secs: u64) -> Self {
        self.bucket_secs = bucket_secs;
        self
    }

    /// 设置免费档位槽位上限
    pub fn with_free_active_limit(mut self, limit: usize) -> Self {
        self.free_active_limit = limit;
        self
    }
}

// ============================================================================
// 操作结果
// ============================================================================

/// 签发结果
///
/// 明文密码只在这里出现一次；凭证记录本身（哈希模式下）从不携带明文。
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    /// 新凭证记录
    pub credential: Credential,
    /// 可展示给用户的密码
    pub password: String,
}

/// 消费结果
#[derive(Debug, Clone)]
pub struct ConsumeOutcome {
    /// 已消费的凭证（状态为 `Used`）
    pub used: Credential,
    /// 轮换出的后继（轮换失败时为 `None`，已入队重试）
    pub successor: Option<IssuedCredential>,
}

// ============================================================================
// 生命周期管理器
// ============================================================================

/// 凭证生命周期管理器
///
/// # Example
///
/// ```rust
/// use passrs::credential::IssueOptions;
/// use passrs::credential::lifecycle::{CredentialManager, LifecycleConfig};
///
/// let manager = CredentialManager::in_memory(LifecycleConfig::default());
/// let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();
///
/// let outcome = manager.consume(&issued.credential.id, "alice").unwrap();
/// assert!(outcome.successor.is_some());
///
/// // 同一凭证第二次消费必然失败
/// assert!(manager.consume(&issued.credential.id, "alice").is_err());
/// ```
pub struct CredentialManager<S: CredentialStore = InMemoryCredentialStore> {
    store: Arc<S>,
    secrets: Arc<dyn SecretProvider>,
    entitlements: Arc<dyn Entitlements>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditLogger>,
    config: LifecycleConfig,
    /// 轮换失败后待重试的前驱 ID
    pending_rotations: Mutex<Vec<String>>,
}

impl CredentialManager<InMemoryCredentialStore> {
    /// 以全内存接线创建管理器
    ///
    /// 所有主体为免费档位；需要派生凭证或付费权益时用
    /// [`CredentialManager::new`] 显式接线。
    pub fn in_memory(config: LifecycleConfig) -> Self {
        Self::new(
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemorySecretProvider::new()),
            Arc::new(InMemoryEntitlements::new()),
            config,
        )
    }
}

impl<S: CredentialStore> CredentialManager<S> {
    /// 以显式依赖创建管理器
    ///
    /// 默认系统墙钟与丢弃式审计日志，可用 [`CredentialManager::with_clock`]
    /// 和 [`CredentialManager::with_audit`] 替换。
    pub fn new(
        store: Arc<S>,
        secrets: Arc<dyn SecretProvider>,
        entitlements: Arc<dyn Entitlements>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            secrets,
            entitlements,
            clock: Arc::new(SystemClock),
            audit: Arc::new(NoopAuditLogger),
            config,
            pending_rotations: Mutex::new(Vec::new()),
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

    fn verifier(&self) -> Verifier {
        Verifier::new(self.secrets.clone(), self.clock.clone())
    }

    // ========================================================================
    // 签发
    // ========================================================================

    /// 主体当前是否还有空闲槽位
    pub fn can_issue(&self, owner_id: &str) -> Result<bool> {
        if self.entitlements.is_pro(owner_id) {
            return Ok(true);
        }
        let active = self.active_count(owner_id)?;
        Ok(active < self.config.free_active_limit)
    }

    /// 签发新凭证
    ///
    /// # Errors
    ///
    /// - `EmptyField` - 主体 ID 为空
    /// - `ExpiresBeforeCreation` - 过期时间不晚于当前时刻
    /// - `QuotaExceeded` - 免费槽位已用尽
    /// - `DuplicateActiveLabel` - 同名活跃凭证已存在
    pub fn issue(&self, owner_id: &str, options: IssueOptions) -> Result<IssuedCredential> {
        let IssueOptions {
            kind,
            label,
            expires_at,
        } = options;

        if owner_id.is_empty() {
            return Err(ValidationError::EmptyField("owner_id".into()).into());
        }
        let now = self.clock.now();
        if let Some(at) = expires_at {
            if at <= now {
                return Err(ValidationError::ExpiresBeforeCreation.into());
            }
        }

        if !self.can_issue(owner_id)? {
            return Err(Error::QuotaExceeded {
                owner_id: owner_id.into(),
                limit: self.config.free_active_limit,
            });
        }
        if let Some(label) = &label {
            self.ensure_label_free(owner_id, label, now)?;
        }

        let issued = self.mint(owner_id, &kind, label, expires_at, None)?;
        self.audit
            .log(AuditRecord::credential_issued(owner_id, &issued.credential.id));
        Ok(issued)
    }

    /// 构造并插入一条新的活跃凭证
    ///
    /// 轮换路径复用此函数但跳过配额与标签检查：后继继承前驱的槽位。
    fn mint(
        &self,
        owner_id: &str,
        kind: &CredentialKind,
        label: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        predecessor_id: Option<String>,
    ) -> Result<IssuedCredential> {
        let now = self.clock.now();

        let (secret_material, verification_hash, password) = match kind {
            CredentialKind::Disposable => {
                let password = generate_password()?;
                let hash = verification_hash_of(self.config.algorithm, &password);
                (
                    SecretMaterial::Plaintext {
                        value: password.clone(),
                    },
                    hash,
                    password,
                )
            }
            CredentialKind::Derived { base_secret_ref } => {
                let base_secret = self.secrets.base_secret(base_secret_ref)?;
                let nonce = generate_nonce()?;
                let bucket = time_bucket(now, self.config.bucket_secs);
                let derivation = Deriver::new(self.config.algorithm)
                    .with_iterations(self.config.iterations)
                    .derive(&base_secret, bucket, &nonce)?;
                (
                    SecretMaterial::Derived {
                        algorithm: self.config.algorithm,
                        iterations: self.config.iterations,
                        time_bucket: bucket,
                        nonce,
                        base_secret_ref: base_secret_ref.clone(),
                    },
                    derivation.verification_hash,
                    derivation.password,
                )
            }
        };

        let credential = Credential {
            id: generate_credential_id()?,
            owner_id: owner_id.into(),
            secret_material,
            verification_hash,
            status: CredentialStatus::Active,
            label,
            created_at: now,
            expires_at,
            predecessor_id,
            successor_id: None,
            events: vec![CredentialEvent {
                seq: 1,
                kind: EventKind::Issued,
                occurred_at: now,
            }],
        };
        self.store.insert(&credential)?;

        Ok(IssuedCredential {
            credential,
            password,
        })
    }

    fn ensure_label_free(&self, owner_id: &str, label: &str, now: DateTime<Utc>) -> Result<()> {
        let has_active = self
            .store
            .list_by_owner(owner_id)?
            .iter()
            .any(|c| c.is_active() && !c.is_expired(now) && c.label.as_deref() == Some(label));
        if has_active {
            return Err(Error::DuplicateActiveLabel {
                owner_id: owner_id.into(),
                label: label.into(),
            });
        }
        Ok(())
    }

    fn active_count(&self, owner_id: &str) -> Result<usize> {
        let now = self.clock.now();
        Ok(self
            .store
            .list_by_owner(owner_id)?
            .iter()
            .filter(|c| c.is_active() && !c.is_expired(now))
            .count())
    }

    // ========================================================================
    // 消费
    // ========================================================================

    /// 将凭证标记为已消费
    ///
    /// `active → used` 由一次条件更新裁决；并发调用中恰好一个成功，
    /// 其余得到 `NotFoundOrAlreadyUsed`。落败的企图会在凭证事件日志
    /// 和审计日志中各留下一条失败记录。
    pub fn mark_used(&self, credential_id: &str, owner_id: &str) -> Result<Credential> {
        let now = self.clock.now();

        // 惰性过期：过期的活跃凭证先转为 expired，再按不可用处理
        if let Some(existing) = self.store.get_by_id(credential_id)? {
            if existing.is_active() && existing.is_expired(now) {
                self.store.conditional_update(
                    credential_id,
                    &CredentialPredicate::status(CredentialStatus::Active),
                    CredentialUpdate::transition(
                        CredentialStatus::Expired,
                        EventKind::Expired,
                        now,
                    ),
                )?;
                return Err(Error::NotFoundOrAlreadyUsed);
            }
        } else {
            return Err(Error::NotFoundOrAlreadyUsed);
        }

        let updated = self.store.conditional_update(
            credential_id,
            &CredentialPredicate::status(CredentialStatus::Active).owned_by(owner_id),
            CredentialUpdate::transition(CredentialStatus::Used, EventKind::Used, now),
        )?;

        match updated {
            Some(credential) => {
                self.audit
                    .log(AuditRecord::credential_used(owner_id, credential_id));
                Ok(credential)
            }
            None => {
                // 输掉竞争或重放：留下可追查的痕迹
                self.store
                    .append_event(credential_id, EventKind::Failed, now)?;
                self.audit
                    .log(AuditRecord::double_use_attempt(owner_id, credential_id));
                Err(Error::NotFoundOrAlreadyUsed)
            }
        }
    }

    /// 消费凭证并尽力轮换
    ///
    /// 消费成功后轮换失败不是错误：后继为 `None`，前驱 ID 进入
    /// 待重试队列，由 [`CredentialManager::retry_pending_rotations`] 收尾。
    pub fn consume(&self, credential_id: &str, owner_id: &str) -> Result<ConsumeOutcome> {
        let used = self.mark_used(credential_id, owner_id)?;

        match self.rotate(credential_id) {
            Ok(successor) => Ok(ConsumeOutcome {
                used,
                successor: Some(successor),
            }),
            Err(err) => {
                self.audit
                    .log(AuditRecord::rotation_failed(credential_id, err.to_string()));
                if err.is_retryable() {
                    if let Ok(mut pending) = self.pending_rotations.lock() {
                        pending.push(credential_id.to_string());
                    }
                }
                Ok(ConsumeOutcome {
                    used,
                    successor: None,
                })
            }
        }
    }

    // ========================================================================
    // 轮换
    // ========================================================================

    /// 为已消费的凭证创建后继并建立链接
    ///
    /// 后继只能作为前驱 `active → used` 转换的后续产生：前驱仍活跃时
    /// 轮换会让同一标签出现两个活跃凭证，已吊销/过期的前驱轮换则会
    /// 复活死链，两者都拒绝。
    ///
    /// 先插入后继（带后向链接），再以"已消费且后继未设置"为谓词条件
    /// 更新前驱建立前向链接。链接竞争落败时吊销自己刚插入的后继作为
    /// 补偿，保证前驱至多链接一个后继。
    ///
    /// 后继继承前驱的种类、标签与有效时长，密钥材料全新生成。
    pub fn rotate(&self, predecessor_id: &str) -> Result<IssuedCredential> {
        let predecessor = self
            .store
            .get_by_id(predecessor_id)?
            .ok_or(Error::NotFoundOrAlreadyUsed)?;
        if predecessor.status != CredentialStatus::Used || predecessor.successor_id.is_some() {
            return Err(Error::NotFoundOrAlreadyUsed);
        }

        let kind = match &predecessor.secret_material {
            SecretMaterial::Plaintext { .. } => CredentialKind::Disposable,
            SecretMaterial::Derived { base_secret_ref, .. } => CredentialKind::Derived {
                base_secret_ref: base_secret_ref.clone(),
            },
        };
        let now = self.clock.now();
        let expires_at = predecessor
            .expires_at
            .map(|at| now + (at - predecessor.created_at));

        let successor = self.mint(
            &predecessor.owner_id,
            &kind,
            predecessor.label.clone(),
            expires_at,
            Some(predecessor.id.clone()),
        )?;

        let linked = self.store.conditional_update(
            predecessor_id,
            &CredentialPredicate::status(CredentialStatus::Used).without_successor(),
            CredentialUpdate {
                status: None,
                successor_id: Some(successor.credential.id.clone()),
                event: Some((EventKind::Rotated, now)),
            },
        )?;

        if linked.is_none() {
            // 另一个轮换抢先完成链接；吊销自己的后继，它从未被交付
            self.store.conditional_update(
                &successor.credential.id,
                &CredentialPredicate::status(CredentialStatus::Active),
                CredentialUpdate::transition(CredentialStatus::Revoked, EventKind::Revoked, now),
            )?;
            return Err(Error::NotFoundOrAlreadyUsed);
        }

        self.audit.log(AuditRecord::credential_rotated(
            &predecessor.owner_id,
            predecessor_id,
            &successor.credential.id,
        ));
        Ok(successor)
    }

    /// 重试此前失败的轮换
    ///
    /// 返回本轮成功补上的后继数量。仍然失败的前驱留在队列中。
    pub fn retry_pending_rotations(&self) -> Result<usize> {
        let drained: Vec<String> = {
            let mut pending = self
                .pending_rotations
                .lock()
                .map_err(|_| Error::store_unavailable("lock poisoned"))?;
            std::mem::take(&mut *pending)
        };

        let mut succeeded = 0;
        let mut still_pending = Vec::new();
        for predecessor_id in drained {
            match self.rotate(&predecessor_id) {
                Ok(_) => succeeded += 1,
                // 已有后继说明别处补上了，视为已解决
                Err(Error::NotFoundOrAlreadyUsed) => {}
                Err(err) => {
                    self.audit
                        .log(AuditRecord::rotation_failed(&predecessor_id, err.to_string()));
                    still_pending.push(predecessor_id);
                }
            }
        }

        if !still_pending.is_empty() {
            if let Ok(mut pending) = self.pending_rotations.lock() {
                pending.extend(still_pending);
            }
        }
        Ok(succeeded)
    }

    /// 待重试的轮换数量
    pub fn pending_rotation_count(&self) -> usize {
        self.pending_rotations.lock().map(|p| p.len()).unwrap_or(0)
    }

    // ========================================================================
    // 吊销与清扫
    // ========================================================================

    /// 吊销凭证
    ///
    /// 活跃与已消费的凭证都可吊销。幂等：重复吊销以及吊销已过期的
    /// 凭证返回当前记录而不报错。
    pub fn revoke(&self, credential_id: &str) -> Result<Credential> {
        let now = self.clock.now();
        // 谓词携带读到的状态，输给并发转换时重读再试
        loop {
            let existing = self
                .store
                .get_by_id(credential_id)?
                .ok_or(Error::NotFoundOrAlreadyUsed)?;
            if matches!(
                existing.status,
                CredentialStatus::Revoked | CredentialStatus::Expired
            ) {
                return Ok(existing);
            }

            let updated = self.store.conditional_update(
                credential_id,
                &CredentialPredicate::status(existing.status),
                CredentialUpdate::transition(CredentialStatus::Revoked, EventKind::Revoked, now),
            )?;
            if let Some(credential) = updated {
                self.audit.log(AuditRecord::credential_revoked(credential_id));
                return Ok(credential);
            }
        }
    }

    /// 清扫主体的过期凭证
    ///
    /// 将已越过 `expires_at` 的活跃凭证标记为 `expired`，返回本轮
    /// 标记的数量。过期判定本身是惰性的，清扫只是让状态字段追上事实。
    pub fn sweep_expired(&self, owner_id: &str) -> Result<usize> {
        let now = self.clock.now();
        let mut swept = 0;
        for credential in self.store.list_by_owner(owner_id)? {
            if credential.is_active() && credential.is_expired(now) {
                let updated = self.store.conditional_update(
                    &credential.id,
                    &CredentialPredicate::status(CredentialStatus::Active),
                    CredentialUpdate::transition(
                        CredentialStatus::Expired,
                        EventKind::Expired,
                        now,
                    ),
                )?;
                if updated.is_some() {
                    self.audit.log(
                        AuditRecord::new(AuditEventKind::CredentialExpired, EventSeverity::Info)
                            .with_owner(owner_id)
                            .with_credential(&credential.id)
                            .with_message("Credential expired"),
                    );
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }

    // ========================================================================
    // 验证与查询
    // ========================================================================

    /// 验证密文是否匹配凭证
    ///
    /// 验证从不改变凭证状态，但会在事件日志中追加 verified/failed
    /// 事件。凭证不存在时返回脱敏的无效结果而非错误。
    pub fn verify(&self, credential_id: &str, presented: &str) -> Result<Verification> {
        let Some(credential) = self.store.get_by_id(credential_id)? else {
            return Ok(Verification::invalid(VerifyReason::NotFound));
        };

        let verification = self.verifier().verify(&credential, presented)?;
        let now = self.clock.now();
        if verification.valid {
            self.store
                .append_event(credential_id, EventKind::Verified, now)?;
            self.audit.log(
                AuditRecord::new(AuditEventKind::VerifySucceeded, EventSeverity::Info)
                    .with_owner(&credential.owner_id)
                    .with_credential(credential_id),
            );
        } else {
            self.store
                .append_event(credential_id, EventKind::Failed, now)?;
            let reason = verification
                .reason
                .map(|r| r.to_string())
                .unwrap_or_default();
            self.audit
                .log(AuditRecord::verify_failed(credential_id, reason));
        }
        Ok(verification)
    }

    /// 按 ID 读取凭证
    pub fn get(&self, credential_id: &str) -> Result<Option<Credential>> {
        self.store.get_by_id(credential_id)
    }

    /// 列出主体的全部凭证（含历史状态）
    pub fn list(&self, owner_id: &str) -> Result<Vec<Credential>> {
        self.store.list_by_owner(owner_id)
    }

    /// 返回凭证所在的完整轮换链，从最老的根到当前末端
    pub fn rotation_chain(&self, credential_id: &str) -> Result<Vec<Credential>> {
        let mut root = self
            .store
            .get_by_id(credential_id)?
            .ok_or(Error::NotFoundOrAlreadyUsed)?;

        // 链接置一次后不再变，链上没有环
        while let Some(predecessor_id) = root.predecessor_id.clone() {
            match self.store.get_by_id(&predecessor_id)? {
                Some(predecessor) => root = predecessor,
                None => break,
            }
        }

        let mut chain = vec![root];
        loop {
            let Some(successor_id) = chain
                .last()
                .and_then(|c| c.successor_id.clone())
            else {
                break;
            };
            match self.store.get_by_id(&successor_id)? {
                Some(successor) => chain.push(successor),
                None => break,
            }
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLogger;
    use crate::clock::FixedClock;
    use chrono::Duration;

    fn manager() -> CredentialManager {
        CredentialManager::in_memory(LifecycleConfig::default())
    }

    fn wired() -> (
        CredentialManager,
        Arc<InMemorySecretProvider>,
        Arc<InMemoryEntitlements>,
        Arc<InMemoryAuditLogger>,
        Arc<FixedClock>,
    ) {
        let secrets = Arc::new(InMemorySecretProvider::new());
        let entitlements = Arc::new(InMemoryEntitlements::new());
        let audit = Arc::new(InMemoryAuditLogger::new());
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let manager = CredentialManager::new(
            Arc::new(InMemoryCredentialStore::new()),
            secrets.clone(),
            entitlements.clone(),
            LifecycleConfig::default().with_iterations(1_000),
        )
        .with_clock(clock.clone())
        .with_audit(audit.clone());
        (manager, secrets, entitlements, audit, clock)
    }

    #[test]
    fn test_issue_disposable() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();

        assert_eq!(issued.credential.owner_id, "alice");
        assert_eq!(issued.credential.status, CredentialStatus::Active);
        assert_eq!(issued.password.len(), 24);
        assert_eq!(issued.credential.events.len(), 1);
        assert_eq!(issued.credential.events[0].kind, EventKind::Issued);
    }

    #[test]
    fn test_issue_empty_owner() {
        let manager = manager();
        assert!(manager.issue("", IssueOptions::disposable()).is_err());
    }

    #[test]
    fn test_issue_expires_in_past() {
        let (manager, _, _, _, clock) = wired();
        let err = manager
            .issue(
                "alice",
                IssueOptions::disposable().with_expires_at(clock.now() - Duration::minutes(1)),
            )
            .unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::ExpiresBeforeCreation)
        );
    }

    #[test]
    fn test_issue_derived_and_verify() {
        let (manager, secrets, _, _, _) = wired();
        secrets.insert("acct-1", b"master".to_vec()).unwrap();

        let issued = manager
            .issue("alice", IssueOptions::derived("acct-1"))
            .unwrap();
        assert!(issued.credential.secret_material.is_derived());

        let v = manager.verify(&issued.credential.id, &issued.password).unwrap();
        assert!(v.valid);

        let v = manager.verify(&issued.credential.id, "wrong").unwrap();
        assert!(!v.valid);
    }

    #[test]
    fn test_verify_unknown_id_is_redacted() {
        let manager = manager();
        let v = manager.verify("missing", "anything").unwrap();
        assert!(!v.valid);
        assert_eq!(v.redacted(), "invalid");
    }

    #[test]
    fn test_verify_does_not_consume() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();

        for _ in 0..3 {
            assert!(manager.verify(&issued.credential.id, &issued.password).unwrap().valid);
        }
        let current = manager.get(&issued.credential.id).unwrap().unwrap();
        assert_eq!(current.status, CredentialStatus::Active);
        // issued + 3 次 verified
        assert_eq!(current.events.len(), 4);
    }

    #[test]
    fn test_consume_rotates() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();

        let outcome = manager.consume(&issued.credential.id, "alice").unwrap();
        assert_eq!(outcome.used.status, CredentialStatus::Used);

        let successor = outcome.successor.unwrap();
        assert_eq!(successor.credential.status, CredentialStatus::Active);
        assert_eq!(
            successor.credential.predecessor_id.as_deref(),
            Some(issued.credential.id.as_str())
        );
        assert_ne!(successor.password, issued.password);

        let predecessor = manager.get(&issued.credential.id).unwrap().unwrap();
        assert_eq!(
            predecessor.successor_id.as_deref(),
            Some(successor.credential.id.as_str())
        );
    }

    #[test]
    fn test_double_consume_fails() {
        let (manager, _, _, audit, _) = wired();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();

        manager.consume(&issued.credential.id, "alice").unwrap();
        let err = manager.consume(&issued.credential.id, "alice").unwrap_err();
        assert_eq!(err, Error::NotFoundOrAlreadyUsed);

        // 落败企图留下审计记录
        let attempts = audit.get_events_by_kind(&AuditEventKind::DoubleUseAttempt);
        assert_eq!(attempts.len(), 1);

        // 以及凭证事件日志中的 failed 事件
        let record = manager.get(&issued.credential.id).unwrap().unwrap();
        assert!(record.events.iter().any(|e| e.kind == EventKind::Failed));
    }

    #[test]
    fn test_consume_wrong_owner_fails() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();

        assert_eq!(
            manager.consume(&issued.credential.id, "mallory").unwrap_err(),
            Error::NotFoundOrAlreadyUsed
        );
        // 凭证未被消费
        let record = manager.get(&issued.credential.id).unwrap().unwrap();
        assert_eq!(record.status, CredentialStatus::Active);
    }

    #[test]
    fn test_expired_cannot_be_consumed() {
        let (manager, _, _, _, clock) = wired();
        let issued = manager
            .issue(
                "alice",
                IssueOptions::disposable().with_expires_at(clock.now() + Duration::minutes(5)),
            )
            .unwrap();

        clock.advance(Duration::minutes(6));
        assert_eq!(
            manager.consume(&issued.credential.id, "alice").unwrap_err(),
            Error::NotFoundOrAlreadyUsed
        );
        // 惰性过期已落到状态字段
        let record = manager.get(&issued.credential.id).unwrap().unwrap();
        assert_eq!(record.status, CredentialStatus::Expired);
    }

    #[test]
    fn test_quota_enforced_for_free_tier() {
        let (manager, _, entitlements, _, _) = wired();
        for i in 0..DEFAULT_FREE_ACTIVE_LIMIT {
            manager
                .issue("alice", IssueOptions::disposable().with_label(format!("slot-{}", i)))
                .unwrap();
        }

        let err = manager.issue("alice", IssueOptions::disposable()).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { limit: 3, .. }));
        assert!(!manager.can_issue("alice").unwrap());

        // 付费档位不受限
        entitlements.grant_pro("alice");
        assert!(manager.can_issue("alice").unwrap());
        assert!(manager.issue("alice", IssueOptions::disposable()).is_ok());
    }

    #[test]
    fn test_rotation_does_not_consume_quota() {
        let manager = manager();
        let issued = manager
            .issue("alice", IssueOptions::disposable().with_label("email"))
            .unwrap();
        manager.issue("alice", IssueOptions::disposable()).unwrap();
        manager.issue("alice", IssueOptions::disposable()).unwrap();

        // 三个槽位已满；消费加轮换不应触发配额错误
        let outcome = manager.consume(&issued.credential.id, "alice").unwrap();
        assert!(outcome.successor.is_some());
        // 后继继承标签
        assert_eq!(
            outcome.successor.unwrap().credential.label.as_deref(),
            Some("email")
        );
    }

    #[test]
    fn test_duplicate_active_label_rejected() {
        let manager = manager();
        manager
            .issue("alice", IssueOptions::disposable().with_label("email"))
            .unwrap();

        let err = manager
            .issue("alice", IssueOptions::disposable().with_label("email"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateActiveLabel { .. }));

        // 其他主体不受影响
        assert!(
            manager
                .issue("bob", IssueOptions::disposable().with_label("email"))
                .is_ok()
        );
    }

    #[test]
    fn test_revoke_idempotent() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();

        let revoked = manager.revoke(&issued.credential.id).unwrap();
        assert_eq!(revoked.status, CredentialStatus::Revoked);

        // 重复吊销不报错也不追加事件
        let again = manager.revoke(&issued.credential.id).unwrap();
        assert_eq!(again.status, CredentialStatus::Revoked);
        assert_eq!(again.events.len(), revoked.events.len());
    }

    #[test]
    fn test_revoke_used_credential() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();
        manager.consume(&issued.credential.id, "alice").unwrap();

        // 已消费的凭证也可被强制吊销
        let revoked = manager.revoke(&issued.credential.id).unwrap();
        assert_eq!(revoked.status, CredentialStatus::Revoked);
    }

    #[test]
    fn test_revoked_cannot_be_consumed() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();
        manager.revoke(&issued.credential.id).unwrap();

        assert_eq!(
            manager.consume(&issued.credential.id, "alice").unwrap_err(),
            Error::NotFoundOrAlreadyUsed
        );
    }

    #[test]
    fn test_sweep_expired() {
        let (manager, _, _, _, clock) = wired();
        manager
            .issue(
                "alice",
                IssueOptions::disposable().with_expires_at(clock.now() + Duration::minutes(5)),
            )
            .unwrap();
        manager.issue("alice", IssueOptions::disposable()).unwrap();

        clock.advance(Duration::minutes(10));
        assert_eq!(manager.sweep_expired("alice").unwrap(), 1);
        // 再清扫一轮没有新增
        assert_eq!(manager.sweep_expired("alice").unwrap(), 0);
    }

    #[test]
    fn test_rotation_chain_order() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();

        let mut current = issued.credential.id.clone();
        for _ in 0..3 {
            let outcome = manager.consume(&current, "alice").unwrap();
            current = outcome.successor.unwrap().credential.id;
        }

        // 从链上任意一点查询都得到完整的链
        let chain = manager.rotation_chain(&current).unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0].id, issued.credential.id);
        assert_eq!(chain[3].id, current);
        for window in chain.windows(2) {
            assert_eq!(window[0].successor_id.as_deref(), Some(window[1].id.as_str()));
            assert_eq!(window[1].predecessor_id.as_deref(), Some(window[0].id.as_str()));
        }
        // 只有末端是活跃的
        assert!(chain[..3].iter().all(|c| c.status == CredentialStatus::Used));
        assert_eq!(chain[3].status, CredentialStatus::Active);
    }

    #[test]
    fn test_rotate_twice_fails() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();

        manager.consume(&issued.credential.id, "alice").unwrap();
        assert_eq!(
            manager.rotate(&issued.credential.id).unwrap_err(),
            Error::NotFoundOrAlreadyUsed
        );
    }

    #[test]
    fn test_rotate_active_credential_rejected() {
        let manager = manager();
        let issued = manager
            .issue("alice", IssueOptions::disposable().with_label("email"))
            .unwrap();

        // 仍然活跃的凭证不可轮换，否则同一标签会出现两个活跃槽位
        assert_eq!(
            manager.rotate(&issued.credential.id).unwrap_err(),
            Error::NotFoundOrAlreadyUsed
        );
        let active: Vec<_> = manager
            .list("alice")
            .unwrap()
            .into_iter()
            .filter(|c| c.is_active())
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, issued.credential.id);
        assert!(active[0].successor_id.is_none());
    }

    #[test]
    fn test_rotate_revoked_credential_rejected() {
        let manager = manager();
        let issued = manager.issue("alice", IssueOptions::disposable()).unwrap();
        manager.revoke(&issued.credential.id).unwrap();

        // 已吊销的链不能通过轮换复活
        assert_eq!(
            manager.rotate(&issued.credential.id).unwrap_err(),
            Error::NotFoundOrAlreadyUsed
        );
        assert_eq!(manager.rotation_chain(&issued.credential.id).unwrap().len(), 1);
        assert!(
            manager
                .list("alice")
                .unwrap()
                .iter()
                .all(|c| !c.is_active())
        );
    }

    #[test]
    fn test_successor_inherits_ttl() {
        let (manager, _, _, _, clock) = wired();
        let issued = manager
            .issue(
                "alice",
                IssueOptions::disposable().with_expires_at(clock.now() + Duration::minutes(30)),
            )
            .unwrap();

        clock.advance(Duration::minutes(10));
        let outcome = manager.consume(&issued.credential.id, "alice").unwrap();
        let successor = outcome.successor.unwrap().credential;
        assert_eq!(
            successor.expires_at,
            Some(clock.now() + Duration::minutes(30))
        );
    }
}
