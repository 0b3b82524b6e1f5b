//! Instrument transports: serial, TCP/IP, and Modbus, unified behind one polling enum.

pub mod modbus_rtu;
pub mod modbus_tcp;
pub mod serial;
pub mod tcp;

use crate::error::TypedResult;

/// One instrument connection, regardless of the physical layer underneath it.
///
/// Each variant owns its connection handle; `acquire` performs exactly one sample: send a command
/// if the instrument is polled, read the response (or the next streamed sentence), and return the
/// cleaned row. Returning `Ok(None)` means the read completed with no data worth writing (for
/// example a streamed read that timed out waiting on a partial sentence) and the caller should
/// simply try again next tick. A plain enum is used instead of a trait object so each transport
/// can borrow its own connection type without boxing a dyn future.
pub enum Instrument {
    Serial(serial::SerialTransport),
    Tcp(tcp::TcpTransport),
    ModbusRtu(modbus_rtu::ModbusRtuTransport),
    ModbusTcp(modbus_tcp::ModbusTcpTransport),
}

impl Instrument {
    pub async fn acquire(&mut self) -> TypedResult<Option<String>> {
        match self {
            Instrument::Serial(t) => t.acquire().await,
            Instrument::Tcp(t) => t.acquire().await,
            Instrument::ModbusRtu(t) => t.acquire().await,
            Instrument::ModbusTcp(t) => t.acquire().await,
        }
    }
}
