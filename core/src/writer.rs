//! Output-file rotation and row writing.
//!
//! A header-bearing instrument writes rows led by a newline, so the header line never gets a
//! trailing blank line appended after it. A headerless instrument writes rows trailed by a
//! newline instead. Both conventions are preserved from the original writer rather than
//! unified, since unifying them would change the byte layout of files already being appended to
//! in the field.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};

use crate::clock::filename_stamp;
use crate::error::{ErrorKind, ResultExt, TypedResult};
use crate::schedule::NewFileSchedule;

/// Tracks the currently open output file for one instrument and decides when to roll over.
pub struct FileState {
    output_directory: PathBuf,
    instrument_name: String,
    header: Option<String>,
    schedule: NewFileSchedule,
    current_path: Option<PathBuf>,
}

impl FileState {
    pub fn new(
        output_directory: PathBuf,
        instrument_name: String,
        header: Option<String>,
        schedule: NewFileSchedule,
    ) -> Self {
        Self {
            output_directory,
            instrument_name,
            header,
            schedule,
            current_path: None,
        }
    }

    /// Checks whether `now` falls on a rotation boundary and, if so, starts a new file (creating
    /// the output directory and writing the header if one is configured). Returns the path rows
    /// should currently be written to.
    pub fn roll_if_due(&mut self, now: DateTime<Local>) -> TypedResult<&Path> {
        use chrono::Timelike;

        let due = match &self.schedule {
            NewFileSchedule::Minute(minutes) => {
                minutes.contains(&now.minute()) && now.second() < 5
            }
            NewFileSchedule::Hour(hours) => {
                hours.contains(&now.hour()) && now.minute() == 0 && now.second() < 5
            }
            NewFileSchedule::Daily => now.hour() == 0 && now.minute() == 0 && now.second() < 5,
        };

        if due || self.current_path.is_none() {
            let candidate = self.file_path_for(now);
            if self.current_path.as_deref() != Some(candidate.as_path()) {
                self.start_file(&candidate)?;
                self.current_path = Some(candidate);
            }
        }

        Ok(self.current_path.as_deref().expect("rolled above"))
    }

    fn file_path_for(&self, now: DateTime<Local>) -> PathBuf {
        self.output_directory
            .join(format!("{}_{}.dat", self.instrument_name, filename_stamp(now)))
    }

    fn start_file(&self, path: &Path) -> TypedResult<()> {
        fs::create_dir_all(&self.output_directory)
            .with_context(|| format!("creating output directory {}", self.output_directory.display()))
            .typ(ErrorKind::FatalStartup)?;
        if let Some(header) = &self.header {
            let mut f = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening {}", path.display()))
                .typ(ErrorKind::WriteContention)?;
            f.write_all(header.as_bytes())
                .context("writing header")
                .typ(ErrorKind::WriteContention)?;
        }
        Ok(())
    }

    /// Appends `rows` to the current file. A no-op if `rows` is empty.
    pub fn write_rows(&self, rows: &[String]) -> TypedResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let path = self
            .current_path
            .as_deref()
            .context("write_rows called before roll_if_due")
            .typ(ErrorKind::WriteContention)?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))
            .typ(ErrorKind::WriteContention)?;
        if self.header.is_none() {
            for row in rows {
                writeln!(f, "{row}")
                    .context("appending row")
                    .typ(ErrorKind::WriteContention)?;
            }
        } else {
            for row in rows {
                write!(f, "\n{row}")
                    .context("appending row")
                    .typ(ErrorKind::WriteContention)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state(dir: &Path, header: Option<&str>) -> FileState {
        FileState::new(
            dir.to_path_buf(),
            "met_station".to_string(),
            header.map(str::to_string),
            NewFileSchedule::Daily,
        )
    }

    #[test]
    fn headerless_rows_are_trailed_with_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let mut st = state(tmp.path(), None);
        let now = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let path = st.roll_if_due(now).unwrap().to_path_buf();
        st.write_rows(&["a,1".to_string(), "b,2".to_string()]).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "a,1\nb,2\n");
    }

    #[test]
    fn headered_rows_are_led_with_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let mut st = state(tmp.path(), Some("time,a,b"));
        let now = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let path = st.roll_if_due(now).unwrap().to_path_buf();
        st.write_rows(&["a,1".to_string()]).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "time,a,b\na,1");
    }

    #[test]
    fn does_not_roll_twice_for_the_same_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut st = state(tmp.path(), None);
        let now = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let first = st.roll_if_due(now).unwrap().to_path_buf();
        let later = now + chrono::Duration::seconds(1);
        let second = st.roll_if_due(later).unwrap().to_path_buf();
        assert_eq!(first, second);
    }
}
