//! Serial transport: command/response reads and continuous streaming reads (single- and
//! multi-sentence).

use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{ErrorKind, ResultExt, TypedResult};
use crate::framer::{clean_string, FramingMode, SentenceAssembler};

/// How the serial transport obtains one reading.
enum Mode {
    /// Write `command`, then read until `end_of_string` appears.
    CommandResponse {
        command: Vec<u8>,
        end_of_string: String,
    },
    /// No command is sent; read whatever arrives until `end_of_string` appears, carrying any
    /// partial sentence over to the next call.
    Streaming { end_of_string: String },
    /// No command is sent; assemble a reading out of several keyed sentences appearing in the
    /// RX stream, in any order, across up to ten 100ms polling passes per tick.
    StreamingMultiSentence {
        sentence_delimiter: String,
        row_delimiter: String,
        assembler: SentenceAssembler,
        buffer_size_max: usize,
    },
}

/// A serial-port-backed instrument connection.
pub struct SerialTransport {
    port: SerialStream,
    mode: Mode,
    framing: FramingMode,
    pending: String,
    read_retry_budget: u32,
    handle_garbled: bool,
}

/// Computes the single-byte command prefix some instruments require, as two ASCII hex digits:
/// `(instrument_id + 128)` (or an explicit override), formatted as a hex nibble pair and sent
/// ahead of the configured command string.
pub fn command_prefix_bytes(instrument_id: Option<u8>, explicit_prefix: Option<u8>) -> Vec<u8> {
    let byte = match explicit_prefix {
        Some(b) => b,
        None => match instrument_id {
            Some(id) => id.wrapping_add(128),
            None => return Vec::new(),
        },
    };
    format!("{byte:02x}").into_bytes()
}

/// Decodes `chunk` as text, optionally discarding invalid byte sequences instead of replacing
/// them with the Unicode replacement character.
fn decode_chunk(chunk: &[u8], handle_garbled: bool) -> String {
    if handle_garbled {
        match std::str::from_utf8(chunk) {
            Ok(s) => s.to_string(),
            Err(_) => chunk
                .iter()
                .filter(|b| b.is_ascii())
                .map(|&b| b as char)
                .collect(),
        }
    } else {
        String::from_utf8_lossy(chunk).into_owned()
    }
}

impl SerialTransport {
    /// Opens `path` at `baud_rate` and prepares a command/response transport. If
    /// `startup_purge_seconds > 0`, spends that many seconds writing `command` once per second
    /// and discarding whatever comes back, clearing a stale RX buffer before real acquisition
    /// begins; otherwise any pending bytes are drained once.
    pub async fn open_command_response(
        path: &str,
        baud_rate: u32,
        command: Vec<u8>,
        end_of_string: String,
        framing: FramingMode,
        startup_purge_seconds: f64,
        handle_garbled: bool,
    ) -> TypedResult<Self> {
        let mut port = tokio_serial::new(path, baud_rate)
            .timeout(Duration::from_millis(500))
            .open_native_async()
            .with_context(|| format!("opening serial port {path} at {baud_rate} baud"))
            .typ(ErrorKind::FatalStartup)?;

        if startup_purge_seconds > 0.0 {
            let passes = startup_purge_seconds.round().max(1.0) as u32;
            let mut scratch = [0u8; 1024];
            for _ in 0..passes {
                let _ = port.write_all(&command).await;
                sleep(Duration::from_secs(1)).await;
                let _ = port.try_read(&mut scratch);
            }
        } else {
            let mut scratch = [0u8; 1024];
            let _ = port.try_read(&mut scratch);
        }

        Ok(Self {
            port,
            mode: Mode::CommandResponse {
                command,
                end_of_string,
            },
            framing,
            pending: String::new(),
            read_retry_budget: 200,
            handle_garbled,
        })
    }

    /// Opens `path` at `baud_rate` and prepares a single-sentence streaming transport.
    pub fn open_streaming(
        path: &str,
        baud_rate: u32,
        end_of_string: String,
        framing: FramingMode,
        handle_garbled: bool,
    ) -> TypedResult<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .timeout(Duration::from_millis(500))
            .open_native_async()
            .with_context(|| format!("opening serial port {path} at {baud_rate} baud"))
            .typ(ErrorKind::FatalStartup)?;
        Ok(Self {
            port,
            mode: Mode::Streaming { end_of_string },
            framing,
            pending: String::new(),
            read_retry_budget: 200,
            handle_garbled,
        })
    }

    /// Opens `path` at `baud_rate` and prepares a multi-sentence keyed streaming transport:
    /// `sentence_list` names the keys a reading must fill before a tick yields a row.
    pub fn open_streaming_multi_sentence(
        path: &str,
        baud_rate: u32,
        sentence_list: Vec<String>,
        sentence_delimiter: String,
        row_delimiter: String,
        buffer_size_max: usize,
        handle_garbled: bool,
    ) -> TypedResult<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .timeout(Duration::from_millis(500))
            .open_native_async()
            .with_context(|| format!("opening serial port {path} at {baud_rate} baud"))
            .typ(ErrorKind::FatalStartup)?;
        Ok(Self {
            port,
            mode: Mode::StreamingMultiSentence {
                sentence_delimiter,
                row_delimiter,
                assembler: SentenceAssembler::new(sentence_list),
                buffer_size_max,
            },
            framing: FramingMode::SingleLine,
            pending: String::new(),
            read_retry_budget: 200,
            handle_garbled,
        })
    }

    pub async fn acquire(&mut self) -> TypedResult<Option<String>> {
        match &mut self.mode {
            Mode::CommandResponse {
                command,
                end_of_string,
            } => {
                let command = command.clone();
                let end_of_string = end_of_string.clone();
                self.port
                    .write_all(&command)
                    .await
                    .context("writing command to serial port")
                    .typ(ErrorKind::TransientTransport)?;
                let raw = self.read_until(&end_of_string).await?;
                Ok(Some(clean_string(&raw, &self.framing)))
            }
            Mode::Streaming { end_of_string } => {
                let end_of_string = end_of_string.clone();
                let mut buf = std::mem::take(&mut self.pending);
                let mut chunk = [0u8; 1024];
                let mut tries = 0u32;
                loop {
                    if buf.contains(&end_of_string) {
                        let idx = buf.find(&end_of_string).unwrap();
                        let sentence = buf[..idx].to_string();
                        self.pending = buf[idx + end_of_string.len()..].to_string();
                        return Ok(Some(clean_string(&sentence, &self.framing)));
                    }
                    if tries >= self.read_retry_budget {
                        self.pending = buf;
                        return Err(anyhow!(
                            "no complete sentence after {} read attempts",
                            self.read_retry_budget
                        ))
                        .typ(ErrorKind::FramingUnderrun);
                    }
                    sleep(Duration::from_millis(50)).await;
                    let n = self
                        .port
                        .read(&mut chunk)
                        .await
                        .context("reading from serial port")
                        .typ(ErrorKind::TransientTransport)?;
                    buf.push_str(&decode_chunk(&chunk[..n], self.handle_garbled));
                    tries += 1;
                }
            }
            Mode::StreamingMultiSentence {
                sentence_delimiter,
                row_delimiter,
                assembler,
                buffer_size_max,
            } => {
                // Pull whatever is already in the RX buffer for this tick; a passive stream
                // never writes a command.
                let mut chunk = [0u8; 1024];
                let n = self
                    .port
                    .try_read(&mut chunk)
                    .unwrap_or(0);
                if n > 0 {
                    self.pending.push_str(&decode_chunk(&chunk[..n], self.handle_garbled));
                }
                if self.pending.len() > *buffer_size_max {
                    warn_buffer_overflow(self.pending.len(), *buffer_size_max);
                    self.pending.clear();
                    return Ok(None);
                }

                assembler.fill(&mut self.pending, sentence_delimiter);
                if assembler.is_complete() {
                    return Ok(Some(assembler.take_row(row_delimiter)));
                }

                for _ in 0..10 {
                    sleep(Duration::from_millis(100)).await;
                    let n = self
                        .port
                        .read(&mut chunk)
                        .await
                        .context("reading from serial port")
                        .typ(ErrorKind::TransientTransport)?;
                    self.pending.push_str(&decode_chunk(&chunk[..n], self.handle_garbled));
                    if self.pending.len() > *buffer_size_max {
                        warn_buffer_overflow(self.pending.len(), *buffer_size_max);
                        self.pending.clear();
                        return Ok(None);
                    }
                    assembler.fill(&mut self.pending, sentence_delimiter);
                    if assembler.is_complete() {
                        return Ok(Some(assembler.take_row(row_delimiter)));
                    }
                }
                Err(anyhow!("sentence list incomplete after 10 retry passes"))
                    .typ(ErrorKind::FramingUnderrun)
            }
        }
    }

    async fn read_until(&mut self, end_of_string: &str) -> TypedResult<String> {
        let mut buf = String::new();
        let mut chunk = [0u8; 1024];
        let mut tries = 0u32;
        loop {
            if buf.contains(end_of_string) {
                return Ok(buf);
            }
            if tries >= self.read_retry_budget {
                return Err(anyhow!(
                    "no complete response after {} read attempts",
                    self.read_retry_budget
                ))
                .typ(ErrorKind::FramingUnderrun);
            }
            sleep(Duration::from_millis(50)).await;
            let n = self
                .port
                .read(&mut chunk)
                .await
                .context("reading from serial port")
                .typ(ErrorKind::TransientTransport)?;
            buf.push_str(&decode_chunk(&chunk[..n], self.handle_garbled));
            tries += 1;
        }
    }
}

fn warn_buffer_overflow(len: usize, max: usize) {
    log::warn!("streamed RX buffer grew to {len} bytes (max {max}), discarding as transient");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_prefix_from_instrument_id() {
        // instrument_id 1 -> byte 129 -> "81" in hex.
        assert_eq!(command_prefix_bytes(Some(1), None), b"81".to_vec());
    }

    #[test]
    fn explicit_command_prefix_wins() {
        assert_eq!(command_prefix_bytes(Some(1), Some(0xff)), b"ff".to_vec());
    }

    #[test]
    fn no_prefix_when_neither_configured() {
        assert!(command_prefix_bytes(None, None).is_empty());
    }

    #[test]
    fn decode_chunk_lossy_keeps_replacement_by_default() {
        let decoded = decode_chunk(&[0x41, 0xff, 0x42], false);
        assert!(decoded.contains('A') && decoded.contains('B'));
    }

    #[test]
    fn decode_chunk_garbled_drops_invalid_bytes() {
        let decoded = decode_chunk(&[0x41, 0xff, 0x42], true);
        assert_eq!(decoded, "AB");
    }
}
