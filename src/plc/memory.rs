//! PLC stand-in backed by a byte vector. Drives the line without hardware
//! and records every write so pulses can be checked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BitAddress, PlcClient, PlcConnector, PlcError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub start: u16,
    pub data: Vec<u8>,
}

struct State {
    db: u16,
    data: Vec<u8>,
    writes: Vec<WriteRecord>,
    failing_reads: u32,
    failing_writes: u32,
    connections: u32,
}

#[derive(Clone)]
pub struct MemoryPlc {
    state: Arc<Mutex<State>>,
}

impl MemoryPlc {
    pub fn new(db: u16, size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                db,
                data: vec![0; size],
                writes: Vec::new(),
                failing_reads: 0,
                failing_writes: 0,
                connections: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn client(&self) -> MemoryPlcClient {
        self.lock().connections += 1;
        MemoryPlcClient {
            plc: self.clone(),
            open: true,
        }
    }

    pub fn byte(&self, index: u16) -> u8 {
        self.lock().data.get(index as usize).copied().unwrap_or(0)
    }

    pub fn set_byte(&self, index: u16, value: u8) {
        if let Some(byte) = self.lock().data.get_mut(index as usize) {
            *byte = value;
        }
    }

    pub fn bit(&self, address: BitAddress) -> bool {
        self.byte(address.byte) & address.mask() != 0
    }

    /// Sets an input bit as if a sensor changed.
    pub fn set_bit(&self, address: BitAddress, value: bool) {
        let mut state = self.lock();
        if let Some(byte) = state.data.get_mut(address.byte as usize) {
            *byte = address.apply(*byte, value);
        }
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    /// Value of `address` after each write that touched its byte.
    pub fn bit_history(&self, address: BitAddress) -> Vec<bool> {
        self.lock()
            .writes
            .iter()
            .filter_map(|write| {
                let offset = address.byte.checked_sub(write.start)? as usize;
                write.data.get(offset).map(|byte| byte & address.mask() != 0)
            })
            .collect()
    }

    /// Completed true-then-false pulses on `address`.
    pub fn pulse_count(&self, address: BitAddress) -> usize {
        self.bit_history(address)
            .windows(2)
            .filter(|pair| pair[0] && !pair[1])
            .count()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.lock().failing_reads = count;
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.lock().failing_writes = count;
    }

    pub fn connections(&self) -> u32 {
        self.lock().connections
    }

    fn check_range(state: &State, db: u16, start: u16, len: usize) -> Result<(), PlcError> {
        let end = start as usize + len;
        if db != state.db || end > state.data.len() {
            return Err(PlcError::OutOfRange { db, start, end });
        }
        Ok(())
    }
}

pub struct MemoryPlcClient {
    plc: MemoryPlc,
    open: bool,
}

impl PlcClient for MemoryPlcClient {
    fn read_area(&mut self, db: u16, start: u16, len: u16) -> Result<Vec<u8>, PlcError> {
        if !self.open {
            return Err(PlcError::NotConnected);
        }
        let mut state = self.plc.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(PlcError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "simulated read timeout",
            )));
        }
        MemoryPlc::check_range(&state, db, start, len as usize)?;
        let start = start as usize;
        Ok(state.data[start..start + len as usize].to_vec())
    }

    fn write_area(&mut self, db: u16, start: u16, data: &[u8]) -> Result<(), PlcError> {
        if !self.open {
            return Err(PlcError::NotConnected);
        }
        let mut state = self.plc.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(PlcError::Rejected { code: 0x05 });
        }
        MemoryPlc::check_range(&state, db, start, data.len())?;
        let offset = start as usize;
        state.data[offset..offset + data.len()].copy_from_slice(data);
        state.writes.push(WriteRecord {
            start,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.open = false;
    }
}

/// Hands out clients of one [`MemoryPlc`]; can be told to refuse
/// connections.
#[derive(Clone)]
pub struct MemoryPlcConnector {
    plc: MemoryPlc,
    refuse: Arc<AtomicBool>,
}

impl MemoryPlcConnector {
    pub fn new(plc: MemoryPlc) -> Self {
        Self {
            plc,
            refuse: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn plc(&self) -> &MemoryPlc {
        &self.plc
    }
}

impl PlcConnector for MemoryPlcConnector {
    fn connect(&self) -> Result<Box<dyn PlcClient>, PlcError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PlcError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "simulated connection refused",
            )));
        }
        Ok(Box::new(self.plc.client()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_writes_and_records() {
        let plc = MemoryPlc::new(86, 3);
        let mut client = plc.client();
        client.write_area(86, 1, &[0b0100_0000]).unwrap();
        client.write_area(86, 1, &[0b0000_0000]).unwrap();

        assert_eq!(client.read_area(86, 0, 3).unwrap(), vec![0, 0, 0]);
        assert_eq!(plc.pulse_count(BitAddress::new(1, 6)), 1);
        assert!(matches!(
            client.read_area(86, 2, 2),
            Err(PlcError::OutOfRange { .. })
        ));
        assert!(client.read_area(12, 0, 1).is_err());

        client.disconnect();
        assert!(matches!(client.read_area(86, 0, 1), Err(PlcError::NotConnected)));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let plc = MemoryPlc::new(86, 1);
        let mut client = plc.client();
        plc.fail_next_reads(1);
        assert!(client.read_area(86, 0, 1).is_err());
        assert!(client.read_area(86, 0, 1).is_ok());

        let connector = MemoryPlcConnector::new(plc.clone());
        connector.set_refuse(true);
        assert!(connector.connect().is_err());
        connector.set_refuse(false);
        assert!(connector.connect().is_ok());
        assert_eq!(plc.connections(), 2);
    }
}
