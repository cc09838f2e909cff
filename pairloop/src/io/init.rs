//! Workspace scaffolding for `.pairloop/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{PairloopConfig, write_config};

/// All canonical paths within `.pairloop/` for a working directory.
#[derive(Debug, Clone)]
pub struct PairloopPaths {
    pub root: PathBuf,
    pub pairloop_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub config_path: PathBuf,
    pub events_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl PairloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let pairloop_dir = root.join(".pairloop");
        Self {
            root: root.clone(),
            sessions_dir: pairloop_dir.join("sessions"),
            config_path: pairloop_dir.join("config.toml"),
            events_path: pairloop_dir.join("events.jsonl"),
            gitignore_path: pairloop_dir.join(".gitignore"),
            pairloop_dir,
        }
    }
}

/// Options for [`init_workspace`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing pairloop-owned files.
    pub force: bool,
}

/// Create `.pairloop/` scaffolding with a default config in `root`.
///
/// Fails if `.pairloop/` already exists unless `options.force` is set.
/// Existing sessions are never touched.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<PairloopPaths> {
    let paths = PairloopPaths::new(root);
    if paths.pairloop_dir.exists() && !paths.pairloop_dir.is_dir() {
        return Err(anyhow!(
            "pairloop init: .pairloop exists but is not a directory"
        ));
    }
    if paths.pairloop_dir.exists() && !options.force {
        return Err(anyhow!(
            "pairloop init: .pairloop already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.sessions_dir)
        .with_context(|| format!("create directory {}", paths.sessions_dir.display()))?;
    fs::write(&paths.gitignore_path, PAIRLOOP_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &PairloopConfig::default())?;

    Ok(paths)
}

const PAIRLOOP_GITIGNORE: &str = "sessions/\nevents.jsonl\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    /// Verifies init creates the directory layout and a loadable default config.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.pairloop_dir.is_dir());
        assert!(paths.sessions_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            PAIRLOOP_GITIGNORE
        );
        assert_eq!(
            load_config(&paths.config_path).expect("load"),
            PairloopConfig::default()
        );
    }

    /// Verifies init refuses to overwrite without --force.
    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Verifies --force restores the default config but keeps sessions.
    #[test]
    fn init_with_force_rewrites_config_and_keeps_sessions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "[policy]\nmax_iterations = 7\n").expect("custom");
        let kept = paths.sessions_dir.join("keep.txt");
        fs::write(&kept, "x").expect("session file");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert_eq!(
            load_config(&paths.config_path).expect("load"),
            PairloopConfig::default()
        );
        assert!(kept.exists());
    }
}
