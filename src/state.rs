//! Persisted state format and the FileStateStore implementation: an atomic
//! write-to-temp-then-rename JSON document plus a newline-delimited trade
//! audit log.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::interfaces::StateStore;
use crate::risk::OpenPosition;
use crate::types::Trade;

/// Serializable view of an open trade, for crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSnapshot {
    pub id: String,
    pub entry_price: f64,
    pub token_qty: Option<f64>,
    pub size: f64,
    pub open_time: i64,
    pub trade: Trade,
    pub order_id: String,
    pub order_status: String,
}

/// The single JSON document persisted by `StateStore::save_state`.
/// `peak_bankroll` is deliberately omitted: it is session-local and
/// recomputed from `bankroll` on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub bankroll: f64,
    pub daily_pnl: f64,
    pub daily_pnl_reset_at: i64,
    pub open_positions: std::collections::HashMap<String, OpenPosition>,
    pub open_snapshot: Vec<OpenSnapshot>,
    pub saved_at: String,
}

/// One record in the newline-delimited trade audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub id: String,
    pub label: String,
    pub direction: crate::types::Direction,
    pub entry_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    pub token_qty: f64,
    pub size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub open_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_exit: Option<bool>,
    #[serde(rename = "_at")]
    pub at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Open,
    PartialClose,
    Close,
    ExpiredOnRestore,
}

pub struct FileStateStore {
    state_path: PathBuf,
    audit_path: PathBuf,
    /// Serializes append_audit so concurrent close/partial-close events
    /// don't interleave their writes.
    audit_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(state_path: impl Into<PathBuf>, audit_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            audit_path: audit_path.into(),
            audit_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save_state(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("serialize state")?;
        write_atomic(&self.state_path, &json).await
    }

    async fn load_state(&self) -> Result<Option<PersistedState>> {
        match fs::read_to_string(&self.state_path).await {
            Ok(contents) => {
                let state = serde_json::from_str(&contents).context("parse state document")?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("read state document"),
        }
    }

    async fn append_audit(&self, line: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let _guard = self.audit_lock.lock().await;
        if let Some(parent) = self.audit_path.parent() {
            fs::create_dir_all(parent).await.ok();
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)
            .await
            .context("open audit log")?;
        file.write_all(line.as_bytes())
            .await
            .context("write audit line")?;
        file.write_all(b"\n").await.context("write newline")?;
        Ok(())
    }
}

/// Write to a `.tmp` sibling then rename into place (atomic on POSIX).
async fn write_atomic(path: &PathBuf, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .context("create state directory")?;
    }
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)
        .await
        .context("write temp state file")?;
    fs::rename(&temp_path, path)
        .await
        .context("rename temp state file into place")?;
    Ok(())
}

pub fn audit_timestamp() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"), dir.path().join("audit.ndjson"));

        let state = PersistedState {
            bankroll: 950.5,
            daily_pnl: -12.3,
            daily_pnl_reset_at: 1_700_000_000_000,
            open_positions: HashMap::new(),
            open_snapshot: vec![],
            saved_at: audit_timestamp(),
        };

        store.save_state(&state).await.unwrap();
        let loaded = store.load_state().await.unwrap().unwrap();
        assert_eq!(loaded.bankroll, 950.5);
        assert_eq!(loaded.daily_pnl, -12.3);
    }

    #[tokio::test]
    async fn load_missing_state_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("missing.json"), dir.path().join("audit.ndjson"));
        assert!(store.load_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_audit_is_newline_delimited() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"), dir.path().join("audit.ndjson"));
        store.append_audit("{\"event\":\"open\"}").await.unwrap();
        store.append_audit("{\"event\":\"close\"}").await.unwrap();
        let contents = fs::read_to_string(dir.path().join("audit.ndjson"))
            .await
            .unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
