//! End-to-end tests for the key registry against the real clock.

use keyspace::{ExpiryBasis, Registry, RegistryOptions};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_expire_and_purge_scenario() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let registry = Registry::new(Duration::from_millis(1000), temp.path().join("ks-test"))?;

    let token = registry.issue_token();
    assert!(!registry.is_expired(&token));

    registry.write(&token, "a.txt", "hello")?;
    assert_eq!(registry.read(&token, "a.txt").as_deref(), Some("hello"));
    let key_dir = registry.root().join(&token);
    assert!(key_dir.is_dir());

    thread::sleep(Duration::from_millis(1100));
    assert!(registry.is_expired(&token));

    let report = registry.purge_expired();
    assert_eq!(report.purged, vec![token.clone()]);
    assert!(registry.read(&token, "a.txt").is_none());
    assert!(!key_dir.exists());
    assert_eq!(registry.tracked_key_count(), 0);
    Ok(())
}

#[test]
fn test_issued_tokens_are_distinct() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let registry = Registry::new(Duration::from_secs(60), temp.path().join("keys"))?;

    let tokens: HashSet<String> = (0..500).map(|_| registry.issue_token()).collect();
    assert_eq!(tokens.len(), 500);
    assert_eq!(registry.tracked_key_count(), 500);
    for token in &tokens {
        assert!(!token.contains(std::path::MAIN_SEPARATOR));
        assert!(!token.contains('/'));
        assert!(!registry.is_expired(token));
    }
    Ok(())
}

#[test]
fn test_second_registry_wipes_first() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path().join("shared");

    let first = Registry::new(Duration::from_secs(60), &root)?;
    let token = first.issue_token();
    first.write(&token, "a.txt", "first")?;

    let second = Registry::new(Duration::from_secs(60), &root)?;
    assert!(second.is_expired(&token));
    assert!(second.read(&token, "a.txt").is_none());
    assert_eq!(fs::read_dir(second.root())?.count(), 0);
    Ok(())
}

#[test]
fn test_relative_root_is_made_absolute() -> anyhow::Result<()> {
    let dir_name = format!("keyspace-relative-{}", std::process::id());
    let registry = Registry::new(Duration::from_secs(60), &dir_name)?;
    assert!(registry.root().is_absolute());
    assert!(registry.root().ends_with(&dir_name));

    let root = registry.root().to_path_buf();
    drop(registry);
    fs::remove_dir_all(root)?;
    Ok(())
}

// =============================================================================
// Sharing between threads
// =============================================================================

#[test]
fn test_purge_concurrent_with_issue() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let registry = Arc::new(Registry::new(
        Duration::from_millis(50),
        temp.path().join("keys"),
    )?);

    let issuer = {
        let registry = registry.clone();
        thread::spawn(move || {
            (0..200)
                .map(|_| {
                    let token = registry.issue_token();
                    registry.write(&token, "f.txt", "x").map(|()| token)
                })
                .collect::<Result<Vec<_>, _>>()
        })
    };
    let sweeper = {
        let registry = registry.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                registry.purge_expired();
                thread::sleep(Duration::from_millis(2));
            }
        })
    };

    let tokens = issuer
        .join()
        .map_err(|_| anyhow::anyhow!("issuer panicked"))??;
    sweeper
        .join()
        .map_err(|_| anyhow::anyhow!("sweeper panicked"))?;

    thread::sleep(Duration::from_millis(60));
    registry.purge_expired();
    registry.purge_orphaned()?;

    assert_eq!(registry.tracked_key_count(), 0);
    for token in &tokens {
        assert!(registry.is_expired(token));
    }
    assert_eq!(fs::read_dir(registry.root())?.count(), 0);
    Ok(())
}

#[test]
fn test_last_access_keeps_busy_key_alive() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let options = RegistryOptions::new(temp.path().join("keys"), Duration::from_millis(300))
        .with_expiry_basis(ExpiryBasis::LastAccess);
    let registry = Registry::with_options(options)?;

    let busy = registry.issue_token();
    let idle = registry.issue_token();
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(100));
        registry.write(&busy, "tick.txt", "tick")?;
    }

    assert!(!registry.is_expired(&busy));
    assert!(registry.is_expired(&idle));

    let report = registry.purge_expired();
    assert_eq!(report.purged, vec![idle]);
    assert!(registry.exists(&busy, "tick.txt"));
    Ok(())
}
