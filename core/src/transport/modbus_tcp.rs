//! Modbus TCP transport: reads IEEE-754 float registers, unsigned 16-bit registers, and
//! unsigned 32-bit registers.

use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::time::sleep;
use tokio_modbus::client::{tcp, Context as ModbusContext};
use tokio_modbus::prelude::*;

use crate::error::{ErrorKind, ResultExt, TypedResult};

const READ_RETRY_ATTEMPTS: u32 = 5;
const READ_RETRY_BACKOFF_MS: u64 = 10;

/// A named float metric spread across two consecutive 16-bit registers.
#[derive(Debug, Clone)]
pub struct FloatRegisterSpec {
    pub name: String,
    pub address: u16,
}

/// A named unsigned metric in a single 16-bit register.
#[derive(Debug, Clone)]
pub struct UnsignedRegisterSpec {
    pub name: String,
    pub address: u16,
}

/// A named unsigned metric spread across two consecutive 16-bit registers.
#[derive(Debug, Clone)]
pub struct Unsigned32RegisterSpec {
    pub name: String,
    pub address: u16,
}

/// Rounds `v` to `decimals` places and renders it the way Python's `str(round(v, decimals))`
/// would: trailing zeros after the decimal point are trimmed, but at least one digit is always
/// kept so whole numbers still read as floats (`1.0`, not `1`).
fn round_and_trim(v: f64, decimals: usize) -> String {
    let fixed = format!("{v:.decimals$}");
    let trimmed = fixed.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    }
}

/// A Modbus-TCP-backed instrument connection.
pub struct ModbusTcpTransport {
    host: String,
    port: u16,
    ctx: ModbusContext,
    float_registers: Vec<FloatRegisterSpec>,
    unsigned_registers: Vec<UnsignedRegisterSpec>,
    unsigned32_registers: Vec<Unsigned32RegisterSpec>,
    register_address_offset: u16,
    low_significance_first: bool,
    write_metric_names: bool,
    delimiter: String,
    use_input_registers: bool,
}

impl ModbusTcpTransport {
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        host: &str,
        port: u16,
        float_registers: Vec<FloatRegisterSpec>,
        unsigned_registers: Vec<UnsignedRegisterSpec>,
        unsigned32_registers: Vec<Unsigned32RegisterSpec>,
        register_address_offset: u16,
        low_significance_first: bool,
        write_metric_names: bool,
        delimiter: String,
        use_input_registers: bool,
    ) -> TypedResult<Self> {
        let ctx = Self::open_context(host, port).await?;
        Ok(Self {
            host: host.to_string(),
            port,
            ctx,
            float_registers,
            unsigned_registers,
            unsigned32_registers,
            register_address_offset,
            low_significance_first,
            write_metric_names,
            delimiter,
            use_input_registers,
        })
    }

    async fn open_context(host: &str, port: u16) -> TypedResult<ModbusContext> {
        let socket: std::net::SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("parsing modbus TCP address {host}:{port}"))
            .typ(ErrorKind::ConfigInvalid)?;
        tcp::connect(socket)
            .await
            .with_context(|| format!("connecting to modbus TCP device {host}:{port}"))
            .typ(ErrorKind::FatalStartup)
    }

    pub async fn acquire(&mut self) -> TypedResult<Option<String>> {
        let mut fields = Vec::with_capacity(
            self.float_registers.len() + self.unsigned_registers.len() + self.unsigned32_registers.len(),
        );

        // Float registers (3 decimals, or 6 when reading the input-register class), sentinel
        // "None" on retry exhaustion.
        for reg in self.float_registers.clone() {
            let address = reg.address.saturating_sub(self.register_address_offset);
            let mut value = None;
            for attempt in 0..READ_RETRY_ATTEMPTS {
                value = self.read_ieee_float(address).await;
                if value.is_some() || !self.backoff_and_reconnect(attempt).await {
                    break;
                }
            }
            let rendered = value
                .map(|v| round_and_trim(v, if self.use_input_registers { 6 } else { 3 }))
                .unwrap_or_else(|| "None".to_string());
            fields.push(self.format_field(&reg.name, &rendered));
        }

        // Unsigned 16-bit registers: a single register read, rendered as a plain decimal;
        // sentinel "None" on retry exhaustion.
        for reg in self.unsigned_registers.clone() {
            let address = reg.address.saturating_sub(self.register_address_offset);
            let mut raw = None;
            for attempt in 0..READ_RETRY_ATTEMPTS {
                raw = self.read_registers(address, 1).await.ok();
                if raw.is_some() || !self.backoff_and_reconnect(attempt).await {
                    break;
                }
            }
            let rendered = raw
                .and_then(|v| v.first().copied())
                .map(|v| v.to_string())
                .unwrap_or_else(|| "None".to_string());
            fields.push(self.format_field(&reg.name, &rendered));
        }

        // Unsigned 32-bit registers: two registers re-ordered per significance, rendered as
        // `0x%04x%04x`; sentinel "NaN" on retry exhaustion.
        for reg in self.unsigned32_registers.clone() {
            let address = reg.address.saturating_sub(self.register_address_offset);
            let mut raw = None;
            for attempt in 0..READ_RETRY_ATTEMPTS {
                raw = self.read_registers(address, 2).await.ok().filter(|r| r.len() >= 2);
                if raw.is_some() || !self.backoff_and_reconnect(attempt).await {
                    break;
                }
            }
            let rendered = match raw {
                Some(raw) => {
                    let (lo, hi) = if self.low_significance_first {
                        (raw[0], raw[1])
                    } else {
                        (raw[1], raw[0])
                    };
                    format!("0x{hi:04x}{lo:04x}")
                }
                None => "NaN".to_string(),
            };
            fields.push(self.format_field(&reg.name, &rendered));
        }

        Ok(Some(fields.join(&self.delimiter)))
    }

    fn format_field(&self, name: &str, value: &str) -> String {
        if self.write_metric_names {
            format!("{name},{value}")
        } else {
            value.to_string()
        }
    }

    /// Sleeps [READ_RETRY_BACKOFF_MS]ms and reconnects before a further retry attempt. Returns
    /// `false` once `attempt` has exhausted the retry budget, telling the caller to stop.
    async fn backoff_and_reconnect(&mut self, attempt: u32) -> bool {
        if attempt + 1 >= READ_RETRY_ATTEMPTS {
            return false;
        }
        sleep(Duration::from_millis(READ_RETRY_BACKOFF_MS)).await;
        if let Ok(ctx) = Self::open_context(&self.host, self.port).await {
            self.ctx = ctx;
        }
        true
    }

    /// Reads two consecutive 16-bit holding/input registers starting at `address` and decodes
    /// them as an IEEE-754 single-precision float. Returns `None` on a decode or transport error.
    async fn read_ieee_float(&mut self, address: u16) -> Option<f64> {
        let raw = self.read_registers(address, 2).await.ok()?;
        if raw.len() < 2 {
            return None;
        }
        let (lo, hi) = if self.low_significance_first {
            (raw[0], raw[1])
        } else {
            (raw[1], raw[0])
        };
        let bits = ((hi as u32) << 16) | lo as u32;
        let value = f32::from_bits(bits) as f64;
        if !value.is_finite() {
            return None;
        }
        Some(value)
    }

    async fn read_registers(&mut self, address: u16, count: u16) -> TypedResult<Vec<u16>> {
        let result = if self.use_input_registers {
            self.ctx.read_input_registers(address, count).await
        } else {
            self.ctx.read_holding_registers(address, count).await
        };
        result
            .context("modbus TCP register read")
            .typ(ErrorKind::TransientTransport)?
            .map_err(|e| anyhow!("modbus exception: {e}"))
            .typ(ErrorKind::TransientTransport)
    }
}

#[cfg(test)]
mod tests {
    use super::round_and_trim;

    #[test]
    fn trims_trailing_zeros_but_keeps_one_decimal() {
        assert_eq!(round_and_trim(1.0, 3), "1.0");
        assert_eq!(round_and_trim(1.2, 3), "1.2");
        assert_eq!(round_and_trim(23.4567, 3), "23.457");
        assert_eq!(round_and_trim(0.0, 6), "0.0");
    }

    #[test]
    fn decodes_ieee_float_bit_pattern() {
        // 23.5f32 as IEEE-754 bits split across two 16-bit words, low-significance first.
        let bits = 23.5f32.to_bits();
        let lo = (bits & 0xFFFF) as u16;
        let hi = (bits >> 16) as u16;
        let reassembled = ((hi as u32) << 16) | lo as u32;
        assert_eq!(f32::from_bits(reassembled), 23.5);
    }

    #[test]
    fn unsigned32_hex_format_matches_spec() {
        let (lo, hi): (u16, u16) = (0x0000, 0x3f80);
        let rendered = format!("0x{hi:04x}{lo:04x}");
        assert_eq!(rendered, "0x3f800000");
    }
}
