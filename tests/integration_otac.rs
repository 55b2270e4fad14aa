//! 一次性访问码会话集成测试
//!
//! 覆盖认领的恰好一次语义（含并发竞争）、有效期边界与过期清理。

use std::sync::Arc;

use chrono::{Duration, Utc};
use passrs::error::Error;
use passrs::otac::{OtacConfig, OtacManager, OtacStore, Scope, SessionStatus};
use passrs::{FixedClock, ValidationError};

fn wired() -> (OtacManager, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::at(Utc::now()));
    let manager = OtacManager::in_memory(OtacConfig::default()).with_clock(clock.clone());
    (manager, clock)
}

#[test]
fn issue_claim_round_trip() {
    let (manager, _) = wired();
    let issued = manager.issue_session(Scope::login(), None).unwrap();

    // 认领前会话匿名且等待中
    let view = manager.session_status(&issued.session_id).unwrap();
    assert_eq!(view.status, SessionStatus::Pending);

    let session = manager.claim(&issued.session_id, &issued.code, "alice").unwrap();
    assert_eq!(session.status, SessionStatus::Claimed);
    assert_eq!(session.owner_id.as_deref(), Some("alice"));
    assert!(session.scope.login);

    let view = manager.session_status(&issued.session_id).unwrap();
    assert_eq!(view.status, SessionStatus::Claimed);
}

#[test]
fn concurrent_claims_exactly_one_winner() {
    let (manager, _) = wired();
    let manager = Arc::new(manager);
    let issued = manager.issue_session(Scope::login(), None).unwrap();

    const THREADS: usize = 16;
    let mut results = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let manager = manager.clone();
                let session_id = issued.session_id.clone();
                let code = issued.code.clone();
                let owner = format!("claimer-{}", i);
                scope.spawn(move || manager.claim(&session_id, &code, &owner))
            })
            .collect();
        for handle in handles {
            results.push(handle.join().unwrap());
        }
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyClaimedOrExpired)))
            .count(),
        THREADS - 1
    );

    // 落定的绑定就是胜者的绑定
    let session = manager.store().get_by_id(&issued.session_id).unwrap().unwrap();
    assert_eq!(session.owner_id, winners[0].owner_id);
}

#[test]
fn claim_at_expiry_boundary() {
    let (manager, clock) = wired();
    let issued = manager
        .issue_session(Scope::login(), Some(Duration::seconds(120)))
        .unwrap();

    // ttl 的最后一秒内仍可认领
    clock.advance(Duration::seconds(119));
    let view = manager.session_status(&issued.session_id).unwrap();
    assert_eq!(view.status, SessionStatus::Pending);

    // 到达 expires_at 瞬间即失效，且会话保持未认领
    clock.advance(Duration::seconds(1));
    assert_eq!(
        manager.claim(&issued.session_id, &issued.code, "alice").unwrap_err(),
        Error::AlreadyClaimedOrExpired
    );
    let session = manager.store().get_by_id(&issued.session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Expired);
    assert!(session.owner_id.is_none());
    assert!(session.claimed_at.is_none());
}

#[test]
fn wrong_code_leaves_session_claimable() {
    let (manager, _) = wired();
    let issued = manager.issue_session(Scope::login(), None).unwrap();

    for _ in 0..3 {
        assert_eq!(
            manager
                .claim(&issued.session_id, "BADCODE2", "mallory")
                .unwrap_err(),
            Error::Validation(ValidationError::CodeMismatch)
        );
    }

    // 错误尝试不转移状态，正确的码仍然成功
    let view = manager.session_status(&issued.session_id).unwrap();
    assert_eq!(view.status, SessionStatus::Pending);
    assert!(manager.claim(&issued.session_id, &issued.code, "alice").is_ok());
}

#[test]
fn status_view_never_exposes_code() {
    let (manager, _) = wired();
    let issued = manager.issue_session(Scope::login(), None).unwrap();

    let view = manager.session_status(&issued.session_id).unwrap();
    // 视图只包含状态与过期时间
    let rendered = format!("{:?}", view);
    assert!(!rendered.contains(&issued.code));
}

#[test]
fn cleanup_removes_only_expired_sessions() {
    let (manager, clock) = wired();
    manager
        .issue_session(Scope::login(), Some(Duration::seconds(60)))
        .unwrap();
    manager
        .issue_session(Scope::login(), Some(Duration::seconds(60)))
        .unwrap();
    let keep = manager
        .issue_session(Scope::login(), Some(Duration::minutes(30)))
        .unwrap();

    clock.advance(Duration::seconds(61));
    assert_eq!(manager.cleanup_expired().unwrap(), 2);
    assert_eq!(manager.store().len(), 1);

    // 幸存的会话照常可认领
    assert!(manager.claim(&keep.session_id, &keep.code, "alice").is_ok());
}

#[test]
fn claimed_session_survives_cleanup_until_expiry() {
    let (manager, clock) = wired();
    let issued = manager
        .issue_session(Scope::login(), Some(Duration::seconds(120)))
        .unwrap();
    manager.claim(&issued.session_id, &issued.code, "alice").unwrap();

    // 已认领但未过期的会话不被清理
    clock.advance(Duration::seconds(60));
    assert_eq!(manager.cleanup_expired().unwrap(), 0);

    // 过期后连同已认领的会话一起清理
    clock.advance(Duration::seconds(61));
    assert_eq!(manager.cleanup_expired().unwrap(), 1);
    assert_eq!(
        manager.session_status(&issued.session_id).unwrap_err(),
        Error::NotFoundOrAlreadyUsed
    );
}
