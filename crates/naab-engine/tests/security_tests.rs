//! Audit-chain and sandbox behaviour, end to end.

use naab_engine::limits::SecureString;
use naab_engine::security::{
    verify_log, AuditConfig, AuditEvent, AuditLogger, Capability, SandboxGuard,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn temp_log(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "naab-sec-{tag}-{}.jsonl",
        std::process::id()
    ));
    fs::remove_file(&path).ok();
    path
}

fn write_events(path: &PathBuf, count: usize, hmac_key: Option<&str>) {
    let logger = AuditLogger::new(AuditConfig {
        log_file: Some(path.clone()),
        tamper_evident: true,
        hmac_key: hmac_key.map(SecureString::from),
        ..Default::default()
    });
    for i in 0..count {
        let mut meta = BTreeMap::new();
        meta.insert("index".to_string(), i.to_string());
        logger
            .log_with_metadata(AuditEvent::BlockExecute, &format!("execution {i}"), &meta)
            .unwrap();
    }
}

#[test]
fn test_fifty_entry_chain_verifies() {
    let path = temp_log("clean");
    write_events(&path, 50, Some("chain-key"));
    let result = verify_log(&path, Some(b"chain-key")).unwrap();
    assert!(result.is_valid, "{}", result.report());
    assert_eq!(result.total_entries, 50);
    assert_eq!(result.verified_entries, 50);
    fs::remove_file(&path).ok();
}

#[test]
fn test_single_byte_flip_is_localised() {
    let path = temp_log("flip");
    write_events(&path, 50, None);

    // Flip one byte inside entry 25's details field.
    let mut bytes = fs::read(&path).unwrap();
    let text = String::from_utf8(bytes.clone()).unwrap();
    let line_start: usize = text
        .lines()
        .take(25)
        .map(|l| l.len() + 1)
        .sum();
    let line = text.lines().nth(25).unwrap();
    let details_at = line.find("execution 25").unwrap();
    let flip_at = line_start + details_at + "execution 2".len();
    bytes[flip_at] ^= 0x01; // '5' -> '4'
    fs::write(&path, &bytes).unwrap();

    let result = verify_log(&path, None).unwrap();
    assert!(!result.is_valid);
    assert!(result.tampered_sequences.contains(&25));
    // Entry 25's stored hash still links entry 26, so later entries may
    // verify; nothing before 25 may be reported.
    assert!(result.tampered_sequences.iter().all(|&s| s >= 25));
    fs::remove_file(&path).ok();
}

#[test]
fn test_reordered_entries_rejected() {
    let path = temp_log("reorder");
    write_events(&path, 20, None);

    let text = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines.swap(10, 11);
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    let result = verify_log(&path, None).unwrap();
    assert!(!result.is_valid);
    assert!(result.tampered_sequences.contains(&10) || result.tampered_sequences.contains(&11));
    fs::remove_file(&path).ok();
}

#[test]
fn test_truncated_head_rejected() {
    let path = temp_log("truncate");
    write_events(&path, 10, None);

    let text = fs::read_to_string(&path).unwrap();
    let without_genesis: Vec<&str> = text.lines().skip(1).collect();
    fs::write(&path, without_genesis.join("\n") + "\n").unwrap();

    let result = verify_log(&path, None).unwrap();
    assert!(!result.is_valid);
    assert!(result.tampered_sequences.contains(&1));
    fs::remove_file(&path).ok();
}

#[test]
fn test_signature_required_when_key_supplied() {
    let path = temp_log("unsigned");
    write_events(&path, 5, None); // chain without signatures
    let result = verify_log(&path, Some(b"some-key")).unwrap();
    assert!(!result.is_valid, "unsigned entries must fail keyed verification");
    fs::remove_file(&path).ok();
}

#[test]
fn test_each_capability_denial_is_audited_once() {
    let path = temp_log("caps");
    let audit = Arc::new(AuditLogger::new(AuditConfig {
        log_file: Some(path.clone()),
        ..Default::default()
    }));
    let guard = SandboxGuard::with_capabilities([], audit);

    for cap in Capability::all() {
        guard.require(cap, "op", "subject").unwrap_err();
    }

    let text = fs::read_to_string(&path).unwrap();
    let violations = text
        .lines()
        .filter(|l| l.contains("SECURITY_VIOLATION"))
        .count();
    assert_eq!(violations, Capability::all().len());
    for cap in Capability::all() {
        assert!(text.contains(cap.as_str()), "missing audit for {cap}");
    }
    fs::remove_file(&path).ok();
}
