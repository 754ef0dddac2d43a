//! Persistent deny list guarding the rendezvous entry points.

use libp2p::PeerId;
use parking_lot::RwLock;
use polaris_core::{AdminError, EntryError, ListEntry, RawEntry};
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the persisted deny list inside the auth directory.
pub const DENY_LIST_FILE: &str = "blacklist.json";

/// In-memory deny list with optional JSON persistence.
///
/// When disabled, nothing is ever banned but entries can still be edited
/// and persisted, so an operator can stage a list before turning
/// enforcement on.
pub struct ListManager {
    path: Option<PathBuf>,
    enabled: bool,
    entries: RwLock<Vec<ListEntry>>,
}

impl ListManager {
    /// Load the deny list from `auth_dir/blacklist.json`. A missing file
    /// yields an empty list; an unreadable or unparseable one is logged
    /// and treated as empty rather than refusing to start.
    pub fn load(auth_dir: Option<&Path>, enabled: bool) -> Self {
        let path = auth_dir.map(|d| d.join(DENY_LIST_FILE));
        let entries = match &path {
            Some(p) if p.exists() => match Self::read_file(p) {
                Ok(entries) => {
                    info!(path = %p.display(), count = entries.len(), "deny list loaded");
                    entries
                }
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "deny list unreadable, starting empty");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        ListManager {
            path,
            enabled,
            entries: RwLock::new(entries),
        }
    }

    /// An in-memory manager with no persistence, for tests and embedders.
    pub fn ephemeral(enabled: bool) -> Self {
        ListManager {
            path: None,
            enabled,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn read_file(path: &Path) -> Result<Vec<ListEntry>, String> {
        let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let raws: Vec<RawEntry> = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        let mut entries = Vec::with_capacity(raws.len());
        for raw in &raws {
            entries.push(ListEntry::from_raw(raw).map_err(|e| e.to_string())?);
        }
        Ok(entries)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a connection from `(ip, pid)` is banned. Always false when
    /// enforcement is disabled.
    pub fn is_banned(&self, ip: IpAddr, pid: &PeerId) -> bool {
        if !self.enabled {
            return false;
        }
        self.entries.read().iter().any(|e| e.contains(ip, pid))
    }

    /// Current entries, in stored order. Indexes into this listing are the
    /// indexes [`Self::remove`] accepts.
    pub fn entries(&self) -> Vec<ListEntry> {
        self.entries.read().clone()
    }

    /// Validate, append, and persist a new entry.
    pub fn add(&self, raw: &RawEntry) -> Result<ListEntry, EntryError> {
        let entry = ListEntry::from_raw(raw)?;
        {
            let mut entries = self.entries.write();
            entries.push(entry.clone());
            self.persist(&entries);
        }
        info!(entry = %entry, "deny-list entry added");
        Ok(entry)
    }

    /// Remove the entry at `index` and persist.
    pub fn remove(&self, index: usize) -> Result<ListEntry, AdminError> {
        let removed = {
            let mut entries = self.entries.write();
            if index >= entries.len() {
                return Err(AdminError::OutOfRange(index));
            }
            let removed = entries.remove(index);
            self.persist(&entries);
            removed
        };
        info!(entry = %removed, "deny-list entry removed");
        Ok(removed)
    }

    /// Write the list to disk via a temp file and rename, so a crash never
    /// leaves a half-written list. Persistence failures are logged, not
    /// fatal: the in-memory list stays authoritative.
    fn persist(&self, entries: &[ListEntry]) {
        let Some(path) = &self.path else {
            return;
        };
        let raws: Vec<RawEntry> = entries.iter().map(|e| e.to_raw()).collect();
        if let Err(e) = Self::write_atomic(path, &raws) {
            warn!(path = %path.display(), error = %e, "failed to persist deny list");
        }
    }

    fn write_atomic(path: &Path, raws: &[RawEntry]) -> Result<(), String> {
        let json = serde_json::to_string_pretty(raws).map_err(|e| e.to_string())?;
        let tmp = path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(|e| e.to_string())?;
        file.write_all(json.as_bytes()).map_err(|e| e.to_string())?;
        file.sync_all().map_err(|e| e.to_string())?;
        std::fs::rename(&tmp, path).map_err(|e| e.to_string())?;
        Ok(())
    }
}
