//! Append-only security audit log with optional tamper evidence.
//!
//! Every entry is one canonical JSON line. In tamper-evident mode entries
//! form a SHA-256 hash chain starting from a genesis entry (sequence 0,
//! prev_hash of 64 zeros); HMAC mode additionally signs each entry. The
//! canonical byte sequence for hashing and signing is the entry serialised
//! with keys in sorted order and the `hash`/`signature` fields omitted.

use crate::limits::{MonotonicCounter, SecureString};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde_json::{json, Map as JsonMap, Value as Json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// `prev_hash` of the genesis entry.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    /// Block loaded successfully.
    BlockLoad,
    /// Block executed.
    BlockExecute,
    /// Security policy violation.
    SecurityViolation,
    /// Execution timeout.
    Timeout,
    /// Path traversal attempt.
    InvalidPath,
    /// Malformed block identifier.
    InvalidBlockId,
    /// Code integrity check failed.
    HashMismatch,
    /// Permission or access denied.
    PermissionDenied,
}

impl AuditEvent {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::BlockLoad => "BLOCK_LOAD",
            AuditEvent::BlockExecute => "BLOCK_EXECUTE",
            AuditEvent::SecurityViolation => "SECURITY_VIOLATION",
            AuditEvent::Timeout => "TIMEOUT",
            AuditEvent::InvalidPath => "INVALID_PATH",
            AuditEvent::InvalidBlockId => "INVALID_BLOCK_ID",
            AuditEvent::HashMismatch => "HASH_MISMATCH",
            AuditEvent::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the audit subsystem.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Log file I/O failed.
    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A log line could not be parsed.
    #[error("malformed audit entry at line {line}: {reason}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Parse failure description.
        reason: String,
    },

    /// The sequence counter hit its ceiling.
    #[error("audit sequence overflow: {0}")]
    SequenceOverflow(String),
}

/// Logger configuration.
#[derive(Debug)]
pub struct AuditConfig {
    /// Log file path; `None` disables writing.
    pub log_file: Option<PathBuf>,
    /// Rotate once the file reaches this many bytes.
    pub max_file_size: u64,
    /// Rotated files kept (`file.1` .. `file.N`).
    pub retention: usize,
    /// Enable the sequence/prev_hash/hash chain.
    pub tamper_evident: bool,
    /// HMAC-SHA256 signing key.
    pub hmac_key: Option<SecureString>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            max_file_size: 10 * 1024 * 1024,
            retention: 5,
            tamper_evident: false,
            hmac_key: None,
        }
    }
}

struct AuditState {
    config: AuditConfig,
    /// Next sequence number; wraparound-guarded.
    sequence: MonotonicCounter,
    /// Hash of the newest entry. Equals [`GENESIS_PREV_HASH`] until the
    /// genesis entry is written.
    last_hash: String,
}

/// Thread-safe audit logger. All writes are serialised under one lock.
pub struct AuditLogger {
    state: Mutex<AuditState>,
}

impl AuditLogger {
    /// Logger with the given configuration. If the log file already
    /// contains tamper-evident entries the chain continues from its last
    /// entry.
    pub fn new(config: AuditConfig) -> Self {
        let (sequence, last_hash) = match (&config.log_file, config.tamper_evident) {
            (Some(path), true) => match last_chain_entry(path) {
                Some((seq, hash)) => (MonotonicCounter::starting_at(seq.saturating_add(1)), hash),
                None => (MonotonicCounter::new(), GENESIS_PREV_HASH.to_string()),
            },
            _ => (MonotonicCounter::new(), GENESIS_PREV_HASH.to_string()),
        };
        Self {
            state: Mutex::new(AuditState {
                config,
                sequence,
                last_hash,
            }),
        }
    }

    /// A disabled logger that drops every event.
    pub fn disabled() -> Self {
        Self::new(AuditConfig::default())
    }

    /// Append one event.
    pub fn log(&self, event: AuditEvent, details: &str) -> Result<(), AuditError> {
        self.log_with_metadata(event, details, &BTreeMap::new())
    }

    /// Append one event with metadata.
    pub fn log_with_metadata(
        &self,
        event: AuditEvent,
        details: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), AuditError> {
        let mut state = self.state.lock();
        let Some(path) = state.config.log_file.clone() else {
            return Ok(());
        };

        let mut entry = JsonMap::new();
        entry.insert("timestamp".to_string(), json!(iso8601_now()));
        entry.insert("event".to_string(), json!(event.as_str()));
        entry.insert("details".to_string(), json!(details));
        entry.insert("metadata".to_string(), json!(metadata));

        if state.config.tamper_evident {
            entry.insert("sequence".to_string(), json!(state.sequence.get()));
            entry.insert("prev_hash".to_string(), json!(state.last_hash.clone()));

            let canonical = canonical_bytes(&entry);
            let hash = sha256_hex(&canonical);
            entry.insert("hash".to_string(), json!(hash.clone()));
            if let Some(key) = &state.config.hmac_key {
                entry.insert(
                    "signature".to_string(),
                    json!(hmac_hex(key.expose(), &canonical)),
                );
            }

            state
                .sequence
                .increment()
                .map_err(|e| AuditError::SequenceOverflow(e.message))?;
            state.last_hash = hash;
        }

        rotate_if_needed(&path, state.config.max_file_size, state.config.retention)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", Json::Object(entry))?;
        Ok(())
    }

    /// Convenience: block load.
    pub fn log_block_load(&self, block_id: &str, hash: &str) {
        let mut meta = BTreeMap::new();
        meta.insert("block_id".to_string(), block_id.to_string());
        meta.insert("hash".to_string(), hash.to_string());
        let _ = self.log_with_metadata(AuditEvent::BlockLoad, "block loaded", &meta);
    }

    /// Convenience: block execution.
    pub fn log_block_execute(&self, block_id: &str, language: &str) {
        let mut meta = BTreeMap::new();
        meta.insert("block_id".to_string(), block_id.to_string());
        meta.insert("language".to_string(), language.to_string());
        let _ = self.log_with_metadata(AuditEvent::BlockExecute, "block executed", &meta);
    }

    /// Convenience: sandbox violation.
    pub fn log_security_violation(&self, operation: &str, subject: &str, capability: &str) {
        let mut meta = BTreeMap::new();
        meta.insert("operation".to_string(), operation.to_string());
        meta.insert("subject".to_string(), subject.to_string());
        meta.insert("required_capability".to_string(), capability.to_string());
        let _ = self.log_with_metadata(
            AuditEvent::SecurityViolation,
            "operation denied by sandbox",
            &meta,
        );
    }

    /// Convenience: timeout.
    pub fn log_timeout(&self, operation: &str, timeout_ms: u64) {
        let mut meta = BTreeMap::new();
        meta.insert("operation".to_string(), operation.to_string());
        meta.insert("timeout_ms".to_string(), timeout_ms.to_string());
        let _ = self.log_with_metadata(AuditEvent::Timeout, "execution timed out", &meta);
    }

    /// Convenience: hash mismatch.
    pub fn log_hash_mismatch(&self, block_id: &str, expected: &str, actual: &str) {
        let mut meta = BTreeMap::new();
        meta.insert("block_id".to_string(), block_id.to_string());
        meta.insert("expected".to_string(), expected.to_string());
        meta.insert("actual".to_string(), actual.to_string());
        let _ = self.log_with_metadata(AuditEvent::HashMismatch, "code integrity check failed", &meta);
    }
}

/// Result of an offline verification pass.
#[derive(Debug, Default)]
pub struct VerificationResult {
    /// True when every entry verified.
    pub is_valid: bool,
    /// Human-readable failure descriptions.
    pub errors: Vec<String>,
    /// Sequence numbers of entries that failed verification.
    pub tampered_sequences: Vec<u64>,
    /// Total entries examined.
    pub total_entries: u64,
    /// Entries that verified.
    pub verified_entries: u64,
}

impl VerificationResult {
    /// Human-readable report.
    pub fn report(&self) -> String {
        let mut out = String::new();
        if self.is_valid {
            out.push_str(&format!(
                "OK: {} entries verified\n",
                self.verified_entries
            ));
        } else {
            out.push_str(&format!(
                "FAILED: {} of {} entries verified\n",
                self.verified_entries, self.total_entries
            ));
            for e in &self.errors {
                out.push_str(&format!("  - {e}\n"));
            }
        }
        out
    }
}

/// Verify a tamper-evident log file offline.
///
/// Walks entries in file order and flags every entry whose sequence is
/// out of order, whose `prev_hash` does not match the previous entry's
/// hash, whose recomputed hash differs from the stored one, or whose
/// HMAC signature (when `hmac_key` is supplied) fails to verify.
pub fn verify_log(path: &Path, hmac_key: Option<&[u8]>) -> Result<VerificationResult, AuditError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut result = VerificationResult {
        is_valid: true,
        ..Default::default()
    };
    let mut expected_sequence: u64 = 0;
    let mut prev_hash = GENESIS_PREV_HASH.to_string();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        result.total_entries += 1;

        let parsed: JsonMap<String, Json> = serde_json::from_str(&line).map_err(|e| {
            AuditError::Malformed {
                line: line_no + 1,
                reason: e.to_string(),
            }
        })?;

        let sequence = parsed
            .get("sequence")
            .and_then(Json::as_u64)
            .ok_or(AuditError::Malformed {
                line: line_no + 1,
                reason: "missing sequence".to_string(),
            })?;

        let mut entry_ok = true;
        let fail = |result: &mut VerificationResult, msg: String| {
            result.errors.push(msg);
            result.is_valid = false;
        };

        if sequence != expected_sequence {
            fail(
                &mut result,
                format!("entry {sequence}: expected sequence {expected_sequence}"),
            );
            entry_ok = false;
        }

        let stored_prev = parsed
            .get("prev_hash")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();
        if stored_prev != prev_hash {
            fail(&mut result, format!("entry {sequence}: broken hash chain"));
            entry_ok = false;
        }

        let stored_hash = parsed
            .get("hash")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();
        let mut canonical_entry = parsed.clone();
        canonical_entry.remove("hash");
        let stored_signature = canonical_entry
            .remove("signature")
            .and_then(|s| s.as_str().map(str::to_string));
        let canonical = canonical_bytes(&canonical_entry);

        if sha256_hex(&canonical) != stored_hash {
            fail(&mut result, format!("entry {sequence}: hash mismatch"));
            entry_ok = false;
        }

        if let Some(key) = hmac_key {
            match &stored_signature {
                Some(sig) if *sig == hmac_hex(key, &canonical) => {}
                _ => {
                    fail(
                        &mut result,
                        format!("entry {sequence}: signature verification failed"),
                    );
                    entry_ok = false;
                }
            }
        }

        if entry_ok {
            result.verified_entries += 1;
        } else {
            result.tampered_sequences.push(sequence);
        }

        // Continue the chain from what the file claims, so a single
        // tampered entry does not cascade into rejecting the rest.
        prev_hash = stored_hash;
        expected_sequence = sequence.wrapping_add(1);
    }

    Ok(result)
}

fn canonical_bytes(entry: &JsonMap<String, Json>) -> Vec<u8> {
    // serde_json maps are BTreeMap-backed, so serialisation is already
    // key-sorted at every nesting level.
    Json::Object(entry.clone()).to_string().into_bytes()
}

fn sha256_hex(bytes: &[u8]) -> String {
    HEXLOWER.encode(&Sha256::digest(bytes))
}

fn hmac_hex(key: &[u8], bytes: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(bytes);
    HEXLOWER.encode(&mac.finalize().into_bytes())
}

fn iso8601_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn last_chain_entry(path: &Path) -> Option<(u64, String)> {
    let file = File::open(path).ok()?;
    let reader = BufReader::new(file);
    let mut last = None;
    for line in reader.lines().map_while(Result::ok) {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(parsed) = serde_json::from_str::<JsonMap<String, Json>>(&line) {
            let seq = parsed.get("sequence").and_then(Json::as_u64);
            let hash = parsed.get("hash").and_then(Json::as_str);
            if let (Some(seq), Some(hash)) = (seq, hash) {
                last = Some((seq, hash.to_string()));
            }
        }
    }
    last
}

fn rotate_if_needed(path: &Path, max_size: u64, retention: usize) -> Result<(), AuditError> {
    let Ok(meta) = fs::metadata(path) else {
        return Ok(());
    };
    if meta.len() < max_size {
        return Ok(());
    }
    // Shift file.N → file.(N+1), dropping the oldest.
    for n in (1..retention).rev() {
        let from = rotated_name(path, n);
        let to = rotated_name(path, n + 1);
        if from.exists() {
            fs::rename(&from, &to)?;
        }
    }
    fs::rename(path, rotated_name(path, 1))?;
    Ok(())
}

fn rotated_name(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static UNIQUE: AtomicU64 = AtomicU64::new(0);

    fn temp_log(tag: &str) -> PathBuf {
        let n = UNIQUE.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "naab-audit-{tag}-{}-{n}.jsonl",
            std::process::id()
        ))
    }

    fn chained_logger(path: &Path, key: Option<&str>) -> AuditLogger {
        AuditLogger::new(AuditConfig {
            log_file: Some(path.to_path_buf()),
            tamper_evident: true,
            hmac_key: key.map(SecureString::from),
            ..Default::default()
        })
    }

    #[test]
    fn test_plain_logging_writes_json_lines() {
        let path = temp_log("plain");
        let logger = AuditLogger::new(AuditConfig {
            log_file: Some(path.clone()),
            ..Default::default()
        });
        logger.log_block_load("BLOCK-CPP-MATH", "abc123");
        logger.log(AuditEvent::Timeout, "python eval").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Json = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "BLOCK_LOAD");
        assert_eq!(first["metadata"]["block_id"], "BLOCK-CPP-MATH");
        assert!(first.get("sequence").is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_chain_starts_at_genesis() {
        let path = temp_log("genesis");
        let logger = chained_logger(&path, None);
        logger.log(AuditEvent::BlockLoad, "first").unwrap();
        logger.log(AuditEvent::BlockLoad, "second").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let entries: Vec<Json> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(entries[0]["sequence"], 0);
        assert_eq!(entries[0]["prev_hash"], GENESIS_PREV_HASH);
        assert_eq!(entries[1]["sequence"], 1);
        assert_eq!(entries[1]["prev_hash"], entries[0]["hash"]);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_verifier_accepts_untampered_chain() {
        let path = temp_log("ok");
        let logger = chained_logger(&path, Some("secret-key"));
        for i in 0..20 {
            logger.log(AuditEvent::BlockExecute, &format!("exec {i}")).unwrap();
        }
        let result = verify_log(&path, Some(b"secret-key")).unwrap();
        assert!(result.is_valid, "{}", result.report());
        assert_eq!(result.verified_entries, 20);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_verifier_detects_tampered_details() {
        let path = temp_log("tamper");
        let logger = chained_logger(&path, None);
        for i in 0..50 {
            logger.log(AuditEvent::BlockExecute, &format!("exec {i}")).unwrap();
        }

        // Flip entry 25's details.
        let text = fs::read_to_string(&path).unwrap();
        let mutated: Vec<String> = text
            .lines()
            .map(|l| {
                if l.contains("exec 25") {
                    l.replace("exec 25", "exec 99")
                } else {
                    l.to_string()
                }
            })
            .collect();
        fs::write(&path, mutated.join("\n") + "\n").unwrap();

        let result = verify_log(&path, None).unwrap();
        assert!(!result.is_valid);
        assert!(result.tampered_sequences.contains(&25));
        // Only the rewritten entry itself fails; its stored hash still
        // links entry 26.
        assert!(result
            .tampered_sequences
            .iter()
            .all(|&s| (25..=50).contains(&s)));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_verifier_detects_removed_entry() {
        let path = temp_log("removed");
        let logger = chained_logger(&path, None);
        for i in 0..10 {
            logger.log(AuditEvent::BlockExecute, &format!("exec {i}")).unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        let without_fifth: Vec<&str> = text
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != 5)
            .map(|(_, l)| l)
            .collect();
        fs::write(&path, without_fifth.join("\n") + "\n").unwrap();

        let result = verify_log(&path, None).unwrap();
        assert!(!result.is_valid);
        assert!(result.tampered_sequences.contains(&6));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_verifier_detects_wrong_hmac_key() {
        let path = temp_log("hmac");
        let logger = chained_logger(&path, Some("right-key"));
        logger.log(AuditEvent::BlockLoad, "entry").unwrap();

        assert!(verify_log(&path, Some(b"right-key")).unwrap().is_valid);
        let bad = verify_log(&path, Some(b"wrong-key")).unwrap();
        assert!(!bad.is_valid);
        assert!(bad.errors[0].contains("signature"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_chain_resumes_across_logger_instances() {
        let path = temp_log("resume");
        {
            let logger = chained_logger(&path, None);
            logger.log(AuditEvent::BlockLoad, "one").unwrap();
        }
        {
            let logger = chained_logger(&path, None);
            logger.log(AuditEvent::BlockLoad, "two").unwrap();
        }
        let result = verify_log(&path, None).unwrap();
        assert!(result.is_valid, "{}", result.report());
        assert_eq!(result.total_entries, 2);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rotation_shifts_files() {
        let path = temp_log("rotate");
        let logger = AuditLogger::new(AuditConfig {
            log_file: Some(path.clone()),
            max_file_size: 64, // tiny: rotate after the first entry
            retention: 2,
            ..Default::default()
        });
        for i in 0..4 {
            logger.log(AuditEvent::BlockExecute, &format!("entry {i}")).unwrap();
        }
        assert!(rotated_name(&path, 1).exists());
        fs::remove_file(&path).ok();
        for n in 1..=3 {
            fs::remove_file(rotated_name(&path, n)).ok();
        }
    }
}
