//! Modbus RTU (serial) transport: reads a fixed list of holding/input registers per tick.

use std::time::Duration;

use anyhow::Context;
use tokio::time::sleep;
use tokio_modbus::client::{rtu, Context as ModbusContext};
use tokio_modbus::prelude::*;
use tokio_serial::SerialPortBuilderExt;

use crate::error::{ErrorKind, ResultExt, TypedResult};

const READ_RETRY_ATTEMPTS: u32 = 5;
const READ_RETRY_BACKOFF_MS: u64 = 10;

/// One named register to read and the scaling factor applied to its raw value.
#[derive(Debug, Clone)]
pub struct RegisterSpec {
    pub name: String,
    pub address: u16,
    pub factor: f64,
}

/// A Modbus-RTU-backed instrument connection, reading 16-bit integer registers.
pub struct ModbusRtuTransport {
    ctx: ModbusContext,
    slave: Slave,
    registers: Vec<RegisterSpec>,
    delimiter: String,
    use_input_registers: bool,
}

impl ModbusRtuTransport {
    pub async fn open(
        path: &str,
        baud_rate: u32,
        slave_id: u8,
        registers: Vec<RegisterSpec>,
        delimiter: String,
        use_input_registers: bool,
    ) -> TypedResult<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .timeout(Duration::from_millis(500))
            .open_native_async()
            .with_context(|| format!("opening serial port {path} at {baud_rate} baud"))
            .typ(ErrorKind::FatalStartup)?;
        let slave = Slave(slave_id);
        let ctx = rtu::attach_slave(port, slave);
        Ok(Self {
            ctx,
            slave,
            registers,
            delimiter,
            use_input_registers,
        })
    }

    pub async fn acquire(&mut self) -> TypedResult<Option<String>> {
        self.ctx
            .set_slave(self.slave)
            .context("selecting modbus slave")
            .typ(ErrorKind::TransientTransport)?;
        let mut fields = Vec::with_capacity(self.registers.len());
        for reg in self.registers.clone() {
            // Read-retry-then-sentinel, matching the Modbus TCP register policy: five attempts,
            // 10ms back-off, sentinel "None" once exhausted.
            let mut raw = None;
            for attempt in 0..READ_RETRY_ATTEMPTS {
                raw = self.read_register(reg.address).await;
                if raw.is_some() {
                    break;
                }
                if attempt + 1 < READ_RETRY_ATTEMPTS {
                    sleep(Duration::from_millis(READ_RETRY_BACKOFF_MS)).await;
                }
            }
            let rendered = raw
                .map(|v| (v as f64 * reg.factor).to_string())
                .unwrap_or_else(|| "None".to_string());
            fields.push(rendered);
        }
        Ok(Some(fields.join(&self.delimiter)))
    }

    async fn read_register(&mut self, address: u16) -> Option<u16> {
        let result = if self.use_input_registers {
            self.ctx.read_input_registers(address, 1).await
        } else {
            self.ctx.read_holding_registers(address, 1).await
        };
        result.ok()?.ok()?.first().copied()
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn scales_raw_register_value() {
        let raw = 235u16;
        let factor = 0.1;
        assert_eq!(raw as f64 * factor, 23.5);
    }
}
