#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::time::Duration;

use chrono::Timelike;
use clap::Parser;
use daq_core::clock::{dedup_stream_timestamp, duration_to_next_tick, round_to_second, timestamp};
use daq_core::config::{CommunicationType, InstrumentConfig};
use daq_core::error::{AcquisitionError, ErrorKind};
use daq_core::framer::FramingMode;
use daq_core::schedule::{new_file_schedule, write_schedule};
use daq_core::shutdown::{read_state, RunState};
use daq_core::transport::modbus_rtu::{ModbusRtuTransport, RegisterSpec};
use daq_core::transport::modbus_tcp::{
    FloatRegisterSpec, ModbusTcpTransport, Unsigned32RegisterSpec, UnsignedRegisterSpec,
};
use daq_core::transport::serial::{command_prefix_bytes, SerialTransport};
use daq_core::transport::tcp::TcpTransport;
use daq_core::transport::Instrument;
use daq_core::writer::FileState;

/// Runs the acquisition loop for exactly one instrument.
#[derive(Parser, Debug)]
#[command(name = "daq-worker", version, about)]
struct Args {
    /// Name of the instrument to acquire, matching the stem of its configuration file.
    #[arg(long, visible_alias = "instrument_name", short = 'i')]
    instrument_name: String,

    /// Directory containing instrument configuration files.
    #[arg(long, default_value = "./config")]
    config_dir: PathBuf,

    /// Run-state signal file written by the supervisor.
    #[arg(long, default_value = "./logger_state.txt")]
    signal_file: PathBuf,

    /// Seconds between checks of the run-state signal file.
    #[arg(long, default_value_t = 60)]
    signal_poll_seconds: u64,
}

#[quit::main]
fn main() {
    daq_core::init_logging();

    let args = Args::parse();
    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => {
            if let Err(e) = rt.block_on(run(args)) {
                error!("{e}");
                quit::with_code(1);
            }
        }
        Err(e) => {
            error!("failed to start tokio runtime: {e}");
            quit::with_code(1);
        }
    }
}

async fn run(args: Args) -> Result<(), AcquisitionError> {
    let config_path = args.config_dir.join(format!("{}.txt", args.instrument_name));
    let config = InstrumentConfig::read_from_path(&config_path)?;

    if !config.enabled {
        info!("{} is disabled, exiting", config.instrument_name);
        return Ok(());
    }

    info!("starting acquisition for {}", config.instrument_name);

    let mut instrument = build_instrument(&config).await?;
    let mut file_state = FileState::new(
        PathBuf::from(&config.output_directory),
        config.instrument_name.clone(),
        config.header_string.clone(),
        new_file_schedule(config.new_file_interval_minutes),
    );
    let write_ticks = write_schedule(config.write_interval_seconds);

    let mut buffer: Vec<String> = Vec::new();
    let mut last_signal_check = tokio::time::Instant::now();
    let mut last_log_time: Option<chrono::DateTime<chrono::Local>> = None;

    loop {
        let raw_now = chrono::Local::now();
        let now = if config.stream {
            let rounded = round_to_second(raw_now);
            dedup_stream_timestamp(rounded, last_log_time, config.stream_log_interval_seconds)
        } else {
            raw_now
        };

        file_state.roll_if_due(now)?;

        match instrument.acquire().await {
            Ok(Some(payload)) => {
                buffer.push(format!(
                    "{}{delim}{}{delim}{payload}",
                    config.instrument_name,
                    timestamp(now),
                    delim = config.row_delimiter
                ));
                if config.stream {
                    last_log_time = Some(now);
                }
            }
            Ok(None) => {}
            Err(e) if e.kind() == ErrorKind::TransientTransport => {
                warn!("transient transport error, continuing: {e}");
            }
            Err(e) if e.kind() == ErrorKind::FramingUnderrun => {
                warn!("dropped an incomplete sentence: {e}");
            }
            Err(e) => return Err(e),
        }

        let due_to_flush = write_ticks.contains(&now.second()) || now.second() == 59;
        if due_to_flush && !buffer.is_empty() {
            match file_state.write_rows(&buffer) {
                Ok(()) => buffer.clear(),
                Err(e) if e.kind() == ErrorKind::WriteContention => {
                    warn!("output file contended, deferring {} pending row(s): {e}", buffer.len());
                }
                Err(e) => return Err(e),
            }
        }

        if last_signal_check.elapsed() >= Duration::from_secs(args.signal_poll_seconds) {
            last_signal_check = tokio::time::Instant::now();
            if read_state(&args.signal_file) == RunState::Quit {
                info!("received Quit signal, flushing and exiting");
                if let Err(e) = file_state.write_rows(&buffer) {
                    warn!("final flush on shutdown failed, {} row(s) not written: {e}", buffer.len());
                }
                return Ok(());
            }
        }

        tokio::time::sleep(duration_to_next_tick(raw_now, config.sample_interval_seconds)).await;
    }
}

async fn build_instrument(config: &InstrumentConfig) -> Result<Instrument, AcquisitionError> {
    let framing = if config.multiline {
        FramingMode::Multiline {
            sentence_delimiter: config
                .sentence_delimiter
                .clone()
                .unwrap_or_else(|| "\r\n".to_string()),
            row_delimiter: config.row_delimiter.clone(),
        }
    } else {
        FramingMode::SingleLine
    };

    match config.communication_type {
        CommunicationType::Serial => {
            let port = require(&config.port, "Port")?;
            let baud = config.baud_rate.unwrap_or(9600);
            let end_of_string = require(&config.end_of_string, "End Of String")?;
            let mut command = command_prefix_bytes(config.instrument_id, config.command_prefix);
            command.extend(config.command_string.clone().unwrap_or_default().into_bytes());
            Ok(Instrument::Serial(
                SerialTransport::open_command_response(
                    &port,
                    baud,
                    command,
                    end_of_string,
                    framing,
                    config.startup_purge_seconds,
                    config.handle_garbled,
                )
                .await?,
            ))
        }
        CommunicationType::SerialStream => {
            let port = require(&config.port, "Port")?;
            let baud = config.baud_rate.unwrap_or(9600);
            if !config.sentence_list.is_empty() {
                let sentence_delimiter = config
                    .sentence_delimiter
                    .clone()
                    .unwrap_or_else(|| "\r\n".to_string());
                Ok(Instrument::Serial(SerialTransport::open_streaming_multi_sentence(
                    &port,
                    baud,
                    config.sentence_list.clone(),
                    sentence_delimiter,
                    config.row_delimiter.clone(),
                    config.buffer_size_max,
                    config.handle_garbled,
                )?))
            } else {
                let end_of_string = require(&config.end_of_string, "End Of String")?;
                Ok(Instrument::Serial(SerialTransport::open_streaming(
                    &port,
                    baud,
                    end_of_string,
                    framing,
                    config.handle_garbled,
                )?))
            }
        }
        CommunicationType::TcpIp => {
            let host = require(&config.ip_address, "IP Address")?;
            let port = config.ip_port.unwrap_or(23);
            let end_of_string = config.end_of_string.clone().unwrap_or_default();
            if config.stream {
                Ok(Instrument::Tcp(
                    TcpTransport::connect_streaming(
                        &host,
                        port,
                        end_of_string,
                        framing,
                        config.length_max,
                    )
                    .await?,
                ))
            } else {
                let command = config.command_string.clone().map(String::into_bytes);
                let command_delay = config.command_delay_ms.map(Duration::from_millis);
                Ok(Instrument::Tcp(TcpTransport::command_response(
                    host,
                    port,
                    command,
                    command_delay,
                    end_of_string,
                    framing,
                )))
            }
        }
        CommunicationType::ModbusSerial => {
            let port = require(&config.port, "Port")?;
            let baud = config.baud_rate.unwrap_or(9600);
            let slave_id = config.modbus_slave_id.unwrap_or(1);
            let registers = config
                .register_map
                .iter()
                .map(|(name, addr)| RegisterSpec {
                    name: name.clone(),
                    address: *addr,
                    factor: 1.0,
                })
                .collect();
            Ok(Instrument::ModbusRtu(
                ModbusRtuTransport::open(
                    &port,
                    baud,
                    slave_id,
                    registers,
                    config.row_delimiter.clone(),
                    config.use_input_registers,
                )
                .await?,
            ))
        }
        CommunicationType::ModbusTcp => {
            let host = require(&config.ip_address, "IP Address")?;
            let port = config.ip_port.unwrap_or(502);
            let float_registers = config
                .float_register_map
                .iter()
                .map(|(name, addr)| FloatRegisterSpec {
                    name: name.clone(),
                    address: *addr,
                })
                .collect();
            let unsigned_registers = config
                .unsigned_register_map
                .iter()
                .map(|(name, addr)| UnsignedRegisterSpec {
                    name: name.clone(),
                    address: *addr,
                })
                .collect();
            let unsigned32_registers = config
                .unsigned32_register_map
                .iter()
                .map(|(name, addr)| Unsigned32RegisterSpec {
                    name: name.clone(),
                    address: *addr,
                })
                .collect();
            Ok(Instrument::ModbusTcp(
                ModbusTcpTransport::connect(
                    &host,
                    port,
                    float_registers,
                    unsigned_registers,
                    unsigned32_registers,
                    config.register_address_offset,
                    config.low_significance_first,
                    config.write_metric_names,
                    config.row_delimiter.clone(),
                    config.use_input_registers,
                )
                .await?,
            ))
        }
    }
}

fn require(field: &Option<String>, name: &str) -> Result<String, AcquisitionError> {
    field.clone().ok_or_else(|| {
        AcquisitionError::new(
            ErrorKind::ConfigInvalid,
            anyhow::anyhow!("missing required key: {name}"),
        )
    })
}
