use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::PlcConfig;

use super::{PlcClient, PlcConnector, PlcError};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "plc";

use crate::{log_debug, log_info};

const TPKT_HEADER_LEN: usize = 4;
const COTP_DATA: [u8; 3] = [0x02, 0xF0, 0x80];
const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const FUNC_READ_VAR: u8 = 0x04;
const FUNC_WRITE_VAR: u8 = 0x05;
const AREA_DB: u8 = 0x84;
const TRANSPORT_BYTE: u8 = 0x02;
const DATA_TRANSPORT_BYTES: u8 = 0x04;
const RETURN_OK: u8 = 0xFF;
const REQUESTED_PDU: u16 = 480;
/// Request/response overhead that has to fit in the negotiated PDU along
/// with the payload.
const ITEM_OVERHEAD: usize = 18;

///
/// Siemens S7 client over ISO-on-TCP (RFC1006)
///
/// ## Message format
///
/// ```ignore
///  TPKT          | COTP         | S7 header             | Params      | Data
///  ---           | ---          | ---                   | ---         | ---
///  03 00 len(2)  | 02 F0 80     | 32 rosctr 00 00 ref(2)| plen bytes  | dlen bytes
///                |              | plen(2) dlen(2)       |             |
/// ```
///
/// A single-item read of `len` bytes at `start` in data block `db`:
///
/// ```ignore
///  params: 04 01 | 12 0A 10 02 len(2) db(2) 84 (start * 8)(3)
/// ```
///
/// A write carries the same item in its params with `05` as function and
/// appends `00 04 bits(2) data`.
pub struct S7Client {
    stream: Option<TcpStream>,
    pdu_length: u16,
    pdu_ref: u16,
}

impl S7Client {
    pub fn connect(config: &PlcConfig) -> Result<Self, PlcError> {
        let addr = resolve(&config.address, config.port)?;
        let timeout = config.io_timeout();
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream: Some(stream),
            pdu_length: REQUESTED_PDU,
            pdu_ref: 0,
        };
        client.iso_connect(config.rack, config.slot)?;
        client.negotiate_pdu()?;
        log_info!(
            "connected to {addr} (rack {}, slot {}, pdu {})",
            config.rack,
            config.slot,
            client.pdu_length
        );
        Ok(client)
    }

    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    fn iso_connect(&mut self, rack: u8, slot: u8) -> Result<(), PlcError> {
        let request = build_connection_request(rack, slot);
        let reply = self.exchange(&request)?;
        if reply.len() < 6 || reply[5] != 0xD0 {
            return Err(PlcError::Protocol("COTP connection refused".into()));
        }
        Ok(())
    }

    fn negotiate_pdu(&mut self) -> Result<(), PlcError> {
        let request = build_setup_communication(REQUESTED_PDU);
        let reply = self.exchange(&request)?;
        if reply.len() < 27 {
            return Err(PlcError::Protocol(format!(
                "setup communication reply too short ({} bytes)",
                reply.len()
            )));
        }
        check_error_class(&reply)?;
        self.pdu_length = u16::from_be_bytes([reply[25], reply[26]]);
        if (self.pdu_length as usize) <= ITEM_OVERHEAD {
            return Err(PlcError::Protocol(format!(
                "negotiated PDU length {} is unusable",
                self.pdu_length
            )));
        }
        Ok(())
    }

    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    fn check_payload(&self, len: usize) -> Result<(), PlcError> {
        if len + ITEM_OVERHEAD > self.pdu_length as usize {
            return Err(PlcError::Protocol(format!(
                "{len} bytes do not fit in a {} byte PDU",
                self.pdu_length
            )));
        }
        Ok(())
    }

    /// Sends one TPKT frame and reads one back.
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, PlcError> {
        let stream = self.stream.as_mut().ok_or(PlcError::NotConnected)?;
        stream.write_all(request)?;

        let mut header = [0u8; TPKT_HEADER_LEN];
        stream.read_exact(&mut header)?;
        if header[0] != 0x03 {
            return Err(PlcError::Protocol(format!(
                "bad TPKT version 0x{:02X}",
                header[0]
            )));
        }
        let total = u16::from_be_bytes([header[2], header[3]]) as usize;
        if total < TPKT_HEADER_LEN {
            return Err(PlcError::Protocol(format!("bad TPKT length {total}")));
        }

        let mut frame = vec![0u8; total];
        frame[..TPKT_HEADER_LEN].copy_from_slice(&header);
        stream.read_exact(&mut frame[TPKT_HEADER_LEN..])?;
        Ok(frame)
    }
}

impl PlcClient for S7Client {
    fn read_area(&mut self, db: u16, start: u16, len: u16) -> Result<Vec<u8>, PlcError> {
        self.check_payload(len as usize)?;
        let pdu_ref = self.next_ref();
        let request = build_read_request(pdu_ref, db, start, len);
        let reply = self.exchange(&request)?;
        parse_read_response(&reply, len as usize)
    }

    fn write_area(&mut self, db: u16, start: u16, data: &[u8]) -> Result<(), PlcError> {
        self.check_payload(data.len())?;
        let pdu_ref = self.next_ref();
        let request = build_write_request(pdu_ref, db, start, data)?;
        let reply = self.exchange(&request)?;
        parse_write_response(&reply)
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            log_debug!("S7 connection closed");
        }
    }
}

impl Drop for S7Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

pub struct S7Connector {
    config: PlcConfig,
}

impl S7Connector {
    pub fn new(config: PlcConfig) -> Self {
        Self { config }
    }
}

impl PlcConnector for S7Connector {
    fn connect(&self) -> Result<Box<dyn PlcClient>, PlcError> {
        Ok(Box::new(S7Client::connect(&self.config)?))
    }
}

fn resolve(address: &str, port: u16) -> Result<SocketAddr, PlcError> {
    (address, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| PlcError::Protocol(format!("{address}:{port} did not resolve")))
}

fn tpkt(payload_len: usize) -> Vec<u8> {
    let total = (payload_len + TPKT_HEADER_LEN) as u16;
    let mut bytes = Vec::with_capacity(total as usize);
    bytes.extend([0x03, 0x00]);
    bytes.extend(total.to_be_bytes());
    bytes
}

fn build_connection_request(rack: u8, slot: u8) -> Vec<u8> {
    let cotp = [
        0x11, 0xE0, 0x00, 0x00, 0x00, 0x01, 0x00, // CR, dst ref, src ref, class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // local TSAP
        0xC2, 0x02, 0x01, rack.wrapping_mul(0x20).wrapping_add(slot), // remote TSAP
    ];
    let mut bytes = tpkt(cotp.len());
    bytes.extend(cotp);
    bytes
}

fn build_setup_communication(pdu_length: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(21);
    body.extend(COTP_DATA);
    body.extend([S7_PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00, 0x04, 0x00, 0x00, 0x08, 0x00, 0x00]);
    body.extend([0xF0, 0x00, 0x00, 0x01, 0x00, 0x01]);
    body.extend(pdu_length.to_be_bytes());

    let mut bytes = tpkt(body.len());
    bytes.extend(body);
    bytes
}

fn item(db: u16, start: u16, len: u16) -> Vec<u8> {
    let bit_address = (start as u32) * 8;
    let mut bytes = vec![0x12, 0x0A, 0x10, TRANSPORT_BYTE];
    bytes.extend(len.to_be_bytes());
    bytes.extend(db.to_be_bytes());
    bytes.push(AREA_DB);
    bytes.extend(&bit_address.to_be_bytes()[1..]);
    bytes
}

fn job_header(pdu_ref: u16, param_len: u16, data_len: u16) -> Vec<u8> {
    let mut bytes = vec![S7_PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00];
    bytes.extend(pdu_ref.to_be_bytes());
    bytes.extend(param_len.to_be_bytes());
    bytes.extend(data_len.to_be_bytes());
    bytes
}

fn build_read_request(pdu_ref: u16, db: u16, start: u16, len: u16) -> Vec<u8> {
    let mut params = vec![FUNC_READ_VAR, 0x01];
    params.extend(item(db, start, len));

    let mut body = Vec::with_capacity(27);
    body.extend(COTP_DATA);
    body.extend(job_header(pdu_ref, params.len() as u16, 0));
    body.extend(params);

    let mut bytes = tpkt(body.len());
    bytes.extend(body);
    bytes
}

fn build_write_request(pdu_ref: u16, db: u16, start: u16, data: &[u8]) -> Result<Vec<u8>, PlcError> {
    let len = u16::try_from(data.len())
        .map_err(|_| PlcError::Protocol(format!("{} bytes is too large to write", data.len())))?;

    let mut params = vec![FUNC_WRITE_VAR, 0x01];
    params.extend(item(db, start, len));

    let mut payload = vec![0x00, DATA_TRANSPORT_BYTES];
    payload.extend((len.wrapping_mul(8)).to_be_bytes());
    payload.extend_from_slice(data);

    let mut body = Vec::with_capacity(31 + data.len());
    body.extend(COTP_DATA);
    body.extend(job_header(pdu_ref, params.len() as u16, payload.len() as u16));
    body.extend(params);
    body.extend(payload);

    let mut bytes = tpkt(body.len());
    bytes.extend(body);
    Ok(bytes)
}

fn check_error_class(reply: &[u8]) -> Result<(), PlcError> {
    let (class, code) = (reply[17], reply[18]);
    if class != 0 || code != 0 {
        return Err(PlcError::Protocol(format!(
            "S7 error class 0x{class:02X} code 0x{code:02X}"
        )));
    }
    Ok(())
}

fn parse_read_response(reply: &[u8], len: usize) -> Result<Vec<u8>, PlcError> {
    if reply.len() < 22 {
        return Err(PlcError::Protocol(format!(
            "read reply too short ({} bytes)",
            reply.len()
        )));
    }
    check_error_class(reply)?;
    if reply[21] != RETURN_OK {
        return Err(PlcError::Rejected { code: reply[21] });
    }
    let data = reply
        .get(25..25 + len)
        .ok_or_else(|| PlcError::Protocol(format!("read reply carries fewer than {len} bytes")))?;
    Ok(data.to_vec())
}

fn parse_write_response(reply: &[u8]) -> Result<(), PlcError> {
    if reply.len() < 22 {
        return Err(PlcError::Protocol(format!(
            "write reply too short ({} bytes)",
            reply.len()
        )));
    }
    check_error_class(reply)?;
    if reply[21] != RETURN_OK {
        return Err(PlcError::Rejected { code: reply[21] });
    }
    Ok(())
}
