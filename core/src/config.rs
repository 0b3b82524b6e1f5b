//! Instrument configuration: the `Key=Value` file format and the typed struct it decodes into.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context};

use crate::error::{ErrorKind, ResultExt, TypedResult};
use crate::value::{parse_raw_string, parse_value, Value};

/// The three configuration keys whose value is the raw line content, not a probed literal.
const RAW_STRING_KEYS: &[&str] = &["Instrument Name", "Communication Type", "Output Directory"];

/// How an instrument's acquisition loop talks to its hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationType {
    Serial,
    SerialStream,
    TcpIp,
    ModbusSerial,
    ModbusTcp,
}

impl CommunicationType {
    fn parse(raw: &str) -> TypedResult<Self> {
        match raw {
            "Serial" => Ok(Self::Serial),
            "Serial Stream" => Ok(Self::SerialStream),
            "TCPIP" => Ok(Self::TcpIp),
            "Modbus Serial" => Ok(Self::ModbusSerial),
            "Modbus TCP" => Ok(Self::ModbusTcp),
            other => Err(anyhow!("unrecognized Communication Type: {other}"))
                .typ(ErrorKind::ConfigInvalid),
        }
    }
}

/// A fully parsed and validated instrument configuration.
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    pub instrument_name: String,
    pub communication_type: CommunicationType,
    pub output_directory: String,
    pub enabled: bool,

    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub ip_address: Option<String>,
    pub ip_port: Option<u16>,
    pub modbus_slave_id: Option<u8>,
    pub use_input_registers: bool,
    /// Ordered register name -> register address map, for Modbus instruments.
    pub register_map: Vec<(String, u16)>,

    pub sample_interval_seconds: f64,
    pub new_file_interval_minutes: f64,
    pub write_interval_seconds: f64,
    /// Expected period between streamed readings; drives the timestamp de-duplication rule in
    /// the stream acquisition loop when it equals exactly 1 second.
    pub stream_log_interval_seconds: f64,

    pub header_string: Option<String>,
    pub command_string: Option<String>,
    pub end_of_string: Option<String>,
    pub stream: bool,
    pub multiline: bool,
    pub sentence_delimiter: Option<String>,
    pub row_delimiter: String,
    /// Ordered list of sentence keys a multi-sentence streaming source assembles before a tick
    /// yields a reading. Empty for single-sentence sources.
    pub sentence_list: Vec<String>,

    /// Modbus TCP float registers (register name -> raw address, before the offset is applied).
    pub float_register_map: Vec<(String, u16)>,
    /// Modbus TCP unsigned 16-bit registers.
    pub unsigned_register_map: Vec<(String, u16)>,
    /// Modbus TCP unsigned 32-bit registers, spanning two consecutive 16-bit registers each.
    pub unsigned32_register_map: Vec<(String, u16)>,
    pub register_address_offset: u16,
    pub low_significance_first: bool,
    pub write_metric_names: bool,
    /// Byte threshold used to drain a stale TCP backlog on connect, and the streaming TCP
    /// per-tick acceptance bound.
    pub length_max: usize,

    /// Seconds to spend purging a command/response serial instrument's RX buffer at startup by
    /// writing the command once per second and discarding whatever comes back.
    pub startup_purge_seconds: f64,
    /// When set, bytes that fail UTF-8 decoding are discarded rather than treated as fatal.
    pub handle_garbled: bool,
    /// Byte threshold beyond which a streaming serial instrument's accumulated RX buffer is
    /// discarded as transient garbage rather than parsed.
    pub buffer_size_max: usize,
    /// Single-byte command prefix sent ahead of `command_string`, computed as
    /// `(instrument_id + 128)` and interpreted as a hex nibble pair, as some instruments require.
    pub instrument_id: Option<u8>,
    /// Explicit command prefix byte, treated identically to `instrument_id`'s derived prefix.
    pub command_prefix: Option<u8>,
    /// Delay observed between writing a command and reading the response on a raw TCP
    /// command/response instrument.
    pub command_delay_ms: Option<u64>,

    pub raw: HashMap<String, Value>,
}

impl InstrumentConfig {
    /// Parses an instrument configuration file's contents.
    ///
    /// Lines are `Key=Value`. Blank lines and lines starting with `#` are ignored. The file-stem
    /// of `path`, if given, must match `Instrument Name` or the config is rejected: the worker
    /// binary is spawned with `--instrument-name <stem>` and looks the file up by that stem.
    pub fn parse(contents: &str, expected_stem: Option<&str>) -> TypedResult<Self> {
        let mut raw: HashMap<String, Value> = HashMap::new();
        let mut raw_strings: HashMap<String, String> = HashMap::new();

        for (lineno, line) in contents.lines().enumerate() {
            let trimmed = line.trim_end();
            if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
                continue;
            }
            let (key, value) = trimmed
                .split_once('=')
                .ok_or_else(|| anyhow!("line {}: not a Key=Value pair: {trimmed}", lineno + 1))
                .typ(ErrorKind::ConfigInvalid)?;
            let key = key.trim().to_string();
            if RAW_STRING_KEYS.contains(&key.as_str()) {
                raw_strings.insert(key, parse_raw_string(value.trim()));
            } else {
                let parsed = parse_value(value)
                    .with_context(|| format!("line {}: {trimmed}", lineno + 1))
                    .typ(ErrorKind::ConfigInvalid)?;
                raw.insert(key, parsed);
            }
        }

        let instrument_name = raw_strings
            .get("Instrument Name")
            .cloned()
            .ok_or_else(|| anyhow!("missing required key: Instrument Name"))
            .typ(ErrorKind::ConfigInvalid)?;

        if let Some(stem) = expected_stem {
            if stem != instrument_name {
                return Err(anyhow!(
                    "instrument name '{instrument_name}' does not match file stem '{stem}'"
                ))
                .typ(ErrorKind::ConfigInvalid);
            }
        }

        let communication_type = CommunicationType::parse(
            raw_strings
                .get("Communication Type")
                .map(String::as_str)
                .ok_or_else(|| anyhow!("missing required key: Communication Type"))
                .typ(ErrorKind::ConfigInvalid)?,
        )?;

        let output_directory = raw_strings
            .get("Output Directory")
            .cloned()
            .ok_or_else(|| anyhow!("missing required key: Output Directory"))
            .typ(ErrorKind::ConfigInvalid)?;

        // `create_EnableState_df`'s Python original assigns the enable-state column with `==`
        // rather than `=`, a no-op that leaves every instrument parsed as enabled regardless of
        // the file's actual `Enabled` key. That bug is not reproduced here: `Enabled` is read and
        // actually governs whether the supervisor spawns a worker for this instrument.
        let enabled = raw
            .get("Enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let port = raw.get("Port").and_then(Value::as_str).map(String::from);
        let baud_rate = raw
            .get("Baud Rate")
            .and_then(Value::as_i64)
            .map(|v| v as u32);
        let ip_address = raw
            .get("IP Address")
            .and_then(Value::as_str)
            .map(String::from);
        let ip_port = raw.get("IP Port").and_then(Value::as_i64).map(|v| v as u16);
        let modbus_slave_id = raw
            .get("Slave ID")
            .and_then(Value::as_i64)
            .map(|v| v as u8);
        let use_input_registers = raw
            .get("Use Input Registers")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let register_map = raw
            .get("Register Map")
            .and_then(Value::as_map)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(k, v)| v.as_i64().map(|addr| (k.clone(), addr as u16)))
                    .collect()
            })
            .unwrap_or_default();

        let sample_interval_seconds = raw
            .get("Sample Interval")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        let new_file_interval_minutes = raw
            .get("New File Interval")
            .and_then(Value::as_f64)
            .unwrap_or(60.0);
        let write_interval_seconds = raw
            .get("Write Interval")
            .and_then(Value::as_f64)
            .unwrap_or(sample_interval_seconds);
        let stream_log_interval_seconds = raw
            .get("Stream Log Interval")
            .and_then(Value::as_f64)
            .unwrap_or(sample_interval_seconds);

        let header_string = raw
            .get("Header String")
            .and_then(Value::as_str)
            .map(String::from);
        let command_string = raw
            .get("Command String")
            .and_then(Value::as_str)
            .map(String::from);
        let end_of_string = raw
            .get("End Of String")
            .and_then(Value::as_str)
            .map(String::from);
        let stream = raw.get("Stream").and_then(Value::as_bool).unwrap_or(false);
        let multiline = raw
            .get("Multiline")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let sentence_delimiter = raw
            .get("Sentence Delimiter")
            .and_then(Value::as_str)
            .map(String::from);
        let row_delimiter = raw
            .get("Delimiter")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| ",".to_string());
        let sentence_list = raw
            .get("Sentence List")
            .and_then(Value::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let float_register_map = raw
            .get("Float Register Dictionary")
            .and_then(Value::as_map)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(k, v)| v.as_i64().map(|addr| (k.clone(), addr as u16)))
                    .collect()
            })
            .unwrap_or_default();
        let unsigned_register_map = raw
            .get("Unsigned 16 Bit Register Dictionary")
            .and_then(Value::as_map)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(k, v)| v.as_i64().map(|addr| (k.clone(), addr as u16)))
                    .collect()
            })
            .unwrap_or_default();
        let register_address_offset = raw
            .get("Register Address Offset")
            .and_then(Value::as_i64)
            .unwrap_or(0) as u16;
        let low_significance_first = raw
            .get("LoSigFirst")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let write_metric_names = raw
            .get("Write Metric Name")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let length_max = raw
            .get("Length Max")
            .and_then(Value::as_i64)
            .unwrap_or(1024) as usize;
        let unsigned32_register_map = raw
            .get("Unsigned 32 Bit Register Dictionary")
            .and_then(Value::as_map)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(k, v)| v.as_i64().map(|addr| (k.clone(), addr as u16)))
                    .collect()
            })
            .unwrap_or_default();

        let startup_purge_seconds = raw
            .get("Startup Purge")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let handle_garbled = raw
            .get("Handle Garbled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let buffer_size_max = raw
            .get("Buffer Size Max")
            .and_then(Value::as_i64)
            .unwrap_or(4096) as usize;
        let instrument_id = raw.get("Instrument ID").and_then(Value::as_i64).map(|v| v as u8);
        let command_prefix = raw
            .get("Command Prefix")
            .and_then(Value::as_i64)
            .map(|v| v as u8);
        let command_delay_ms = raw
            .get("Command Delay")
            .and_then(Value::as_f64)
            .map(|secs| (secs * 1000.0) as u64);

        Ok(Self {
            instrument_name,
            communication_type,
            output_directory,
            enabled,
            port,
            baud_rate,
            ip_address,
            ip_port,
            modbus_slave_id,
            use_input_registers,
            register_map,
            sample_interval_seconds,
            new_file_interval_minutes,
            write_interval_seconds,
            stream_log_interval_seconds,
            header_string,
            command_string,
            end_of_string,
            stream,
            multiline,
            sentence_delimiter,
            row_delimiter,
            sentence_list,
            float_register_map,
            unsigned_register_map,
            unsigned32_register_map,
            register_address_offset,
            low_significance_first,
            write_metric_names,
            length_max,
            startup_purge_seconds,
            handle_garbled,
            buffer_size_max,
            instrument_id,
            command_prefix,
            command_delay_ms,
            raw,
        })
    }

    /// Reads and parses an instrument configuration file from disk, validating the name against
    /// the file's stem.
    pub fn read_from_path(path: &Path) -> TypedResult<Self> {
        let stem = path.file_stem().and_then(|s| s.to_str()).map(String::from);
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))
            .typ(ErrorKind::ConfigFileMissing)?;
        Self::parse(&contents, stem.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        [
            "Instrument Name=met_station",
            "Communication Type=Serial",
            "Output Directory=/data/met_station",
            "Port='/dev/ttyUSB0'",
            "Baud Rate=9600",
            "Sample Interval=10",
            "New File Interval=60",
            "Enabled=True",
        ]
        .join("\n")
    }

    #[test]
    fn parses_a_serial_instrument() {
        let cfg = InstrumentConfig::parse(&sample(), Some("met_station")).unwrap();
        assert_eq!(cfg.instrument_name, "met_station");
        assert_eq!(cfg.communication_type, CommunicationType::Serial);
        assert_eq!(cfg.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cfg.baud_rate, Some(9600));
        assert!(cfg.enabled);
    }

    #[test]
    fn rejects_name_stem_mismatch() {
        let err = InstrumentConfig::parse(&sample(), Some("other_name")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn ignores_blank_and_comment_lines() {
        let mut text = sample();
        text.push_str("\n# a trailing comment\n\n");
        let cfg = InstrumentConfig::parse(&text, None).unwrap();
        assert_eq!(cfg.instrument_name, "met_station");
    }

    #[test]
    fn parses_register_map_preserving_order() {
        let text = [
            "Instrument Name=gas_analyzer",
            "Communication Type=Modbus TCP",
            "Output Directory=/data/gas",
            "IP Address='192.168.1.50'",
            "IP Port=502",
            "Register Map={'CO2': 100, 'H2O': 102, 'Pressure': 104}",
        ]
        .join("\n");
        let cfg = InstrumentConfig::parse(&text, None).unwrap();
        assert_eq!(
            cfg.register_map,
            vec![
                ("CO2".to_string(), 100),
                ("H2O".to_string(), 102),
                ("Pressure".to_string(), 104),
            ]
        );
    }

    #[test]
    fn defaults_enabled_true_when_absent() {
        let text = [
            "Instrument Name=x",
            "Communication Type=TCPIP",
            "Output Directory=/data/x",
        ]
        .join("\n");
        let cfg = InstrumentConfig::parse(&text, None).unwrap();
        assert!(cfg.enabled);
    }
}
