//! Parses the newline-separated instrument list that tells the supervisor which configuration
//! files exist.

use std::path::{Path, PathBuf};

/// One entry from `Instrument List.txt`: the instrument's name, and the configuration file path
/// derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentListEntry {
    pub name: String,
    pub config_path: PathBuf,
}

/// Parses the contents of an instrument list file, resolving each entry's configuration file
/// path against `config_dir`.
///
/// One instrument name per line. Blank trailing lines are ignored.
pub fn parse_instrument_list(contents: &str, config_dir: &Path) -> Vec<InstrumentListEntry> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|name| InstrumentListEntry {
            name: name.to_string(),
            config_path: config_dir.join(format!("{name}.txt")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_resolves_paths() {
        let contents = "met_station\ngas_analyzer\n";
        let entries = parse_instrument_list(contents, Path::new("/cfg"));
        assert_eq!(
            entries,
            vec![
                InstrumentListEntry {
                    name: "met_station".to_string(),
                    config_path: PathBuf::from("/cfg/met_station.txt"),
                },
                InstrumentListEntry {
                    name: "gas_analyzer".to_string(),
                    config_path: PathBuf::from("/cfg/gas_analyzer.txt"),
                },
            ]
        );
    }

    #[test]
    fn ignores_blank_lines() {
        let contents = "met_station\n\n\ngas_analyzer\n";
        let entries = parse_instrument_list(contents, Path::new("/cfg"));
        assert_eq!(entries.len(), 2);
    }
}
