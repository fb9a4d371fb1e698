//! PLC link: transport traits, the S7 client, an in-memory PLC, the
//! command dispatcher and the polling gateway.

pub mod dispatcher;
pub mod gateway;
pub mod memory;
pub mod s7;

pub use dispatcher::{report_loop, CommandDispatcher, PulseReport};
pub use gateway::{GatewayHandle, PlcGateway};
pub use memory::{MemoryPlc, MemoryPlcConnector, WriteRecord};
pub use s7::{S7Client, S7Connector};

pub use crate::config::{BitAddress, PlcBitMap};

use thiserror::Error;

use crate::models::SensorSnapshot;

#[derive(Debug, Error)]
pub enum PlcError {
    #[error("PLC I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("PLC protocol error: {0}")]
    Protocol(String),

    #[error("PLC rejected the request (return code 0x{code:02X})")]
    Rejected { code: u8 },

    #[error("PLC is not connected")]
    NotConnected,

    #[error("DB{db} bytes {start}..{end} are outside the data block")]
    OutOfRange { db: u16, start: u16, end: usize },
}

/// Byte-level access to PLC data blocks.
pub trait PlcClient: Send {
    fn read_area(&mut self, db: u16, start: u16, len: u16) -> Result<Vec<u8>, PlcError>;

    fn write_area(&mut self, db: u16, start: u16, data: &[u8]) -> Result<(), PlcError>;

    fn disconnect(&mut self) {}
}

/// Opens a fresh [`PlcClient`]. Used at startup and for reconnects.
pub trait PlcConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn PlcClient>, PlcError>;
}

/// Reads one bit, writes the byte that holds it back with only that bit
/// changed.
pub fn write_bit(
    client: &mut dyn PlcClient,
    db: u16,
    address: BitAddress,
    value: bool,
) -> Result<(), PlcError> {
    let current = client.read_area(db, address.byte, 1)?;
    let byte = current
        .first()
        .copied()
        .ok_or_else(|| PlcError::Protocol("empty read while updating bit".into()))?;
    client.write_area(db, address.byte, &[address.apply(byte, value)])
}

/// Decodes the five input bits out of a byte range starting at `start`.
pub fn decode_sensors(bits: &PlcBitMap, start: u16, bytes: &[u8]) -> Result<SensorSnapshot, PlcError> {
    let mut snapshot = SensorSnapshot::default();
    for signal in crate::models::Signal::ALL {
        let address = bits.input(signal);
        let level = address.read(start, bytes).ok_or_else(|| {
            PlcError::Protocol(format!(
                "{} at byte {} is outside the {} bytes read from {start}",
                signal.as_str(),
                address.byte,
                bytes.len()
            ))
        })?;
        snapshot.set(signal, level);
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Signal;

    #[test]
    fn decodes_reference_bit_map() {
        let bits = PlcBitMap::default();
        // bigfacePresence (0.1), odPresence (1.4), headClassify (2.2)
        let snapshot = decode_sensors(&bits, 0, &[0b0000_0010, 0b0001_0000, 0b0000_0100]).unwrap();
        assert!(snapshot.get(Signal::BigfacePresence));
        assert!(snapshot.get(Signal::OdPresence));
        assert!(snapshot.get(Signal::HeadClassify));
        assert!(!snapshot.get(Signal::BigfaceSlot));
        assert!(!snapshot.get(Signal::OdSlot));

        assert!(decode_sensors(&bits, 0, &[0, 0]).is_err());
    }

    #[test]
    fn write_bit_preserves_neighbours() {
        let plc = MemoryPlc::new(86, 4);
        plc.set_byte(1, 0b1000_0001);
        let mut client = plc.client();
        write_bit(&mut client, 86, BitAddress::new(1, 3), true).unwrap();
        assert_eq!(plc.byte(1), 0b1000_1001);
        write_bit(&mut client, 86, BitAddress::new(1, 7), false).unwrap();
        assert_eq!(plc.byte(1), 0b0000_1001);
    }
}
