//! Iteration ledger: append-only persistence of Sessions.
//!
//! [`FsLedger`] layout under `.pairloop/sessions/<session-id>/`:
//!
//! - `session.json`: latest Session snapshot, replaced atomically.
//! - `iterations/<seq>.json`: one file per iteration, never overwritten.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;
use uuid::Uuid;

use crate::core::session::{Iteration, Session, SessionStatus};

/// Persistence collaborator for Sessions.
pub trait Ledger {
    fn create_session(&self, session: &Session) -> Result<()>;
    /// Persist `iteration`, already appended to `session`.
    fn append_iteration(&self, session: &Session, iteration: &Iteration) -> Result<()>;
    /// Record the terminal status. Repeating the same status is a no-op; a
    /// different status after a terminal one is an error.
    fn finalize(&self, session: &Session, status: SessionStatus) -> Result<()>;
    fn load_session(&self, id: Uuid) -> Result<Session>;
}

fn check_finalize(stored: SessionStatus, requested: SessionStatus) -> Result<bool> {
    if !requested.is_terminal() {
        bail!("cannot finalize a session as {requested}");
    }
    if stored == requested {
        return Ok(false);
    }
    if stored.is_terminal() {
        bail!("session already finalized as {stored}, cannot finalize as {requested}");
    }
    Ok(true)
}

/// JSON files on disk.
#[derive(Debug, Clone)]
pub struct FsLedger {
    sessions_dir: PathBuf,
}

impl FsLedger {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    pub fn session_dir(&self, id: Uuid) -> PathBuf {
        self.sessions_dir.join(id.to_string())
    }

    fn session_path(&self, id: Uuid) -> PathBuf {
        self.session_dir(id).join("session.json")
    }

    fn iteration_path(&self, id: Uuid, seq: u32) -> PathBuf {
        self.session_dir(id)
            .join("iterations")
            .join(format!("{seq:04}.json"))
    }
}

impl Ledger for FsLedger {
    fn create_session(&self, session: &Session) -> Result<()> {
        let dir = self.session_dir(session.id()).join("iterations");
        fs::create_dir_all(&dir)
            .with_context(|| format!("create session dir {}", dir.display()))?;
        debug!(session_id = %session.id(), "session created");
        write_json_atomic(&self.session_path(session.id()), session)
    }

    fn append_iteration(&self, session: &Session, iteration: &Iteration) -> Result<()> {
        let path = self.iteration_path(session.id(), iteration.seq);
        let mut buf = serde_json::to_string_pretty(iteration).context("serialize iteration")?;
        buf.push('\n');
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create iteration record {}", path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("write iteration record {}", path.display()))?;
        debug!(session_id = %session.id(), seq = iteration.seq, "iteration persisted");
        write_json_atomic(&self.session_path(session.id()), session)
    }

    fn finalize(&self, session: &Session, status: SessionStatus) -> Result<()> {
        let stored = self.load_session(session.id())?;
        if !check_finalize(stored.status(), status)? {
            return Ok(());
        }
        if session.status() != status {
            bail!(
                "session snapshot is {} but finalize requested {status}",
                session.status()
            );
        }
        debug!(session_id = %session.id(), %status, "session finalized");
        write_json_atomic(&self.session_path(session.id()), session)
    }

    fn load_session(&self, id: Uuid) -> Result<Session> {
        let path = self.session_path(id);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read session {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse session {}", path.display()))
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("ledger path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// In-memory ledger for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    sessions: Mutex<BTreeMap<Uuid, Session>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sessions<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<Uuid, Session>) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("memory ledger lock poisoned"))?;
        f(&mut sessions)
    }
}

impl Ledger for MemoryLedger {
    fn create_session(&self, session: &Session) -> Result<()> {
        self.with_sessions(|sessions| {
            if sessions.contains_key(&session.id()) {
                bail!("session {} already exists", session.id());
            }
            sessions.insert(session.id(), session.clone());
            Ok(())
        })
    }

    fn append_iteration(&self, session: &Session, iteration: &Iteration) -> Result<()> {
        self.with_sessions(|sessions| {
            let stored = sessions
                .get_mut(&session.id())
                .ok_or_else(|| anyhow!("unknown session {}", session.id()))?;
            if stored.next_seq() != iteration.seq {
                bail!(
                    "iteration {} already recorded or out of order (next is {})",
                    iteration.seq,
                    stored.next_seq()
                );
            }
            *stored = session.clone();
            Ok(())
        })
    }

    fn finalize(&self, session: &Session, status: SessionStatus) -> Result<()> {
        self.with_sessions(|sessions| {
            let stored = sessions
                .get_mut(&session.id())
                .ok_or_else(|| anyhow!("unknown session {}", session.id()))?;
            if check_finalize(stored.status(), status)? {
                *stored = session.clone();
            }
            Ok(())
        })
    }

    fn load_session(&self, id: Uuid) -> Result<Session> {
        self.with_sessions(|sessions| {
            sessions
                .get(&id)
                .cloned()
                .ok_or_else(|| anyhow!("unknown session {id}"))
        })
    }
}
