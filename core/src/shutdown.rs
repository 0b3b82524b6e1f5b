//! The Run/Quit signal file workers poll to learn when to stop.
//!
//! The supervisor owns the file and writes it at most once, atomically, via a temp-file-plus-
//! rename so a worker never observes a half-written state. Workers only read it, and are expected
//! to poll at a relaxed cadence (on the order of once a minute) rather than on every acquisition
//! tick.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::{ErrorKind, ResultExt, TypedResult};

/// The two states the signal file can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Run,
    Quit,
}

impl RunState {
    fn as_str(self) -> &'static str {
        match self {
            RunState::Run => "Run",
            RunState::Quit => "Quit",
        }
    }
}

/// Reads the current run state from `path`. Missing or unrecognized content is treated as `Run`:
/// a worker should not stop because the state file hasn't been created yet.
pub fn read_state(path: &Path) -> RunState {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim() == "Quit" => RunState::Quit,
        _ => RunState::Run,
    }
}

/// Atomically writes `state` to `path` by writing a sibling temp file and renaming it into place.
pub fn write_state(path: &Path, state: RunState) -> TypedResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path: PathBuf = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    ));
    {
        let mut f = fs::File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))
            .typ(ErrorKind::WriteContention)?;
        f.write_all(state.as_str().as_bytes())
            .context("writing run state")
            .typ(ErrorKind::WriteContention)?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))
        .typ(ErrorKind::WriteContention)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_run() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.txt");
        assert_eq!(read_state(&path), RunState::Run);
    }

    #[test]
    fn round_trips_quit() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.txt");
        write_state(&path, RunState::Quit).unwrap();
        assert_eq!(read_state(&path), RunState::Quit);
    }

    #[test]
    fn round_trips_run_after_quit() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.txt");
        write_state(&path, RunState::Quit).unwrap();
        write_state(&path, RunState::Run).unwrap();
        assert_eq!(read_state(&path), RunState::Run);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.txt");
        write_state(&path, RunState::Run).unwrap();
        let leftover = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftover, 0);
    }
}
