//! The one-line state file holding the last committed selection and alarm.
//!
//! Disk is a write sink plus a one-shot initializer: the record is read once
//! at startup and only ever written afterwards.  Persistence is best-effort;
//! a missing or corrupt file just means defaults.

use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use crate::protocol::AlarmSetting;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistedState {
    pub active_index: usize,
    pub alarm: AlarmSetting,
}

impl PersistedState {
    /// `<index>:<hours>:<minutes>:<0|1>` — the same shape as the panel's
    /// alarm record.
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.active_index,
            self.alarm.hours,
            self.alarm.minutes,
            self.alarm.flag()
        )
    }

    pub fn decode(line: &str) -> Option<Self> {
        let mut fields = line.trim().split(':');
        let active_index = fields.next()?.parse().ok()?;
        let hours = fields.next()?.parse().ok()?;
        let minutes = fields.next()?.parse().ok()?;
        let enabled = match fields.next()? {
            "0" => false,
            "1" => true,
            _ => return None,
        };
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            active_index,
            alarm: AlarmSetting {
                hours,
                minutes,
                enabled,
            },
        })
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the record back.  Any I/O or parse failure means "no saved
    /// state" and the caller falls back to defaults.
    pub fn load(&self) -> Option<PersistedState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("state file {:?} unreadable: {}", self.path, e);
                }
                return None;
            }
        };
        match PersistedState::decode(&content) {
            Some(state) => Some(state),
            None => {
                warn!("state file {:?} corrupt: {:?}", self.path, content.trim());
                None
            }
        }
    }

    /// Write the record through a temp file and rename, so losing power
    /// mid-write leaves the previous record intact.
    pub async fn save(&self, state: &PersistedState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {:?}", parent))?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, state.encode())
            .await
            .with_context(|| format!("writing {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {:?}", self.path))?;
        Ok(())
    }
}
