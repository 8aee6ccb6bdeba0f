//! Append-only, hash-chained audit trail of gate verdicts and action outcomes.
//!
//! Each record links to its predecessor:
//! `this_hash = sha256_hex(prev_hash + sha256_hex(canonical_json(body)))`,
//! where `body` holds `ts_ms`, `actor`, `action`, `subject` and `meta`,
//! starting from a genesis hash of 64 zeros. Editing any of those fields
//! breaks [`verify_chain`].

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{OrchestratorError, Result};

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor: String,
    pub action: String,
    pub subject: String,
    pub meta: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts_ms: u64,
    pub actor: String,
    pub action: String,
    pub subject: String,
    pub prev_hash: String,
    pub this_hash: String,
    #[serde(default)]
    pub meta: Value,
}

pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent) -> Result<AuditRecord>;
}

/// Chain head; hands out linked records.
#[derive(Debug, Clone)]
pub struct AuditChain {
    last_hash: String,
}

impl Default for AuditChain {
    fn default() -> Self {
        Self::resume(GENESIS_HASH)
    }
}

impl AuditChain {
    pub fn resume(last_hash: impl Into<String>) -> Self {
        Self {
            last_hash: last_hash.into(),
        }
    }

    #[must_use]
    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    pub fn link(&mut self, event: AuditEvent) -> AuditRecord {
        let mut record = AuditRecord {
            ts_ms: now_ms(),
            actor: event.actor,
            action: event.action,
            subject: event.subject,
            prev_hash: std::mem::take(&mut self.last_hash),
            this_hash: String::new(),
            meta: event.meta,
        };
        record.this_hash = chain_hash(&record);
        self.last_hash = record.this_hash.clone();
        record
    }
}

/// Checks that records form an unbroken chain from the genesis hash.
#[must_use]
pub fn verify_chain(records: &[AuditRecord]) -> bool {
    let mut expected_prev = GENESIS_HASH.to_string();
    for record in records {
        if record.prev_hash != expected_prev {
            return false;
        }
        if chain_hash(record) != record.this_hash {
            return false;
        }
        expected_prev.clone_from(&record.this_hash);
    }
    true
}

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    state: Mutex<(AuditChain, Vec<AuditRecord>)>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.1.clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: AuditEvent) -> Result<AuditRecord> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let record = state.0.link(event);
        state.1.push(record.clone());
        Ok(record)
    }
}

/// JSONL file sink. Reopening an existing file continues its chain.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    chain: Mutex<AuditChain>,
}

impl JsonlAuditSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let last_hash = match read_records(&path)?.last() {
            Some(record) => record.this_hash.clone(),
            None => GENESIS_HASH.to_string(),
        };
        Ok(Self {
            path,
            chain: Mutex::new(AuditChain::resume(last_hash)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, event: AuditEvent) -> Result<AuditRecord> {
        let mut chain = self.chain.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = chain.clone();
        let record = next.link(event);

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        // Advance only after the line is durable so a failed write leaves the head intact.
        *chain = next;
        Ok(record)
    }
}

/// Reads every record of a JSONL audit file; a missing file reads as empty.
pub fn read_records(path: &Path) -> Result<Vec<AuditRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|err| {
            OrchestratorError::CorruptAudit(format!("{}:{}: {err}", path.display(), idx + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Hash over `prev_hash` and every record field except `this_hash`.
fn chain_hash(record: &AuditRecord) -> String {
    let body = serde_json::json!({
        "ts_ms": record.ts_ms,
        "actor": record.actor,
        "action": record.action,
        "subject": record.subject,
        "meta": record.meta,
    });
    let body_hash = sha256_hex(canonical_json(&body).as_bytes());
    sha256_hex(format!("{}{body_hash}", record.prev_hash).as_bytes())
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Minified JSON with object keys sorted, independent of map ordering features.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
