//! Enables or disables an instrument by rewriting the `Enabled` line of its configuration file
//! in place.

use std::fs;
use std::path::Path;

use anyhow::Context;
use daq_core::error::{AcquisitionError, ErrorKind, ResultExt, TypedResult};
use itertools::Itertools;

/// Rewrites the `Enabled=` line in the instrument configuration file at `config_path`.
///
/// The rest of the file is left untouched and line order is preserved; only the line containing
/// the `Enabled` key is replaced, matching how the original editor rewrites this file in place
/// rather than regenerating it from scratch.
pub fn set_enabled(config_path: &Path, enabled: bool) -> TypedResult<()> {
    let contents = fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))
        .typ(ErrorKind::ConfigFileMissing)?;

    let value = if enabled { "True" } else { "False" };
    let mut found = false;
    let rewritten = contents
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("Enabled") {
                found = true;
                format!("Enabled={value}")
            } else {
                line.to_string()
            }
        })
        .join("\n");

    if !found {
        return Err(AcquisitionError::new(
            ErrorKind::ConfigInvalid,
            anyhow::anyhow!(
                "{} has no Enabled key to rewrite",
                config_path.display()
            ),
        ));
    }

    let mut rewritten = rewritten;
    if contents.ends_with('\n') {
        rewritten.push('\n');
    }

    fs::write(config_path, rewritten)
        .with_context(|| format!("writing {}", config_path.display()))
        .typ(ErrorKind::WriteContention)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_enabled_line_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("met_station.txt");
        fs::write(
            &path,
            "Instrument Name=met_station\nEnabled=True\nPort=/dev/ttyUSB0\n",
        )
        .unwrap();

        set_enabled(&path, false).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "Instrument Name=met_station\nEnabled=False\nPort=/dev/ttyUSB0\n"
        );
    }

    #[test]
    fn errors_when_no_enabled_key_present() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("met_station.txt");
        fs::write(&path, "Instrument Name=met_station\nPort=/dev/ttyUSB0\n").unwrap();

        let err = set_enabled(&path, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}
