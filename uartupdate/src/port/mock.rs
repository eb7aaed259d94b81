//! Scripted transports for unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig};
use crate::protocol::crc::CrcWidth;
use crate::protocol::{Opcode, StatusHeader};

/// Produces the device's answer to one written frame at the current rate.
pub(crate) type Responder = Box<dyn FnMut(&[u8], u32) -> Vec<u8> + Send>;

pub(crate) struct MockPort {
    name: String,
    baud_rate: u32,
    pending: VecDeque<u8>,
    responder: Responder,
    /// Every frame written, in order.
    pub(crate) written: Vec<Vec<u8>>,
    /// Every configuration applied through `configure`.
    pub(crate) configs: Vec<SerialConfig>,
    /// Make `configure` fail.
    pub(crate) fail_configure: bool,
    /// Accept only half of each frame.
    pub(crate) short_write: bool,
    /// Report nothing queued for this many `bytes_available` polls.
    pub(crate) hold_polls: usize,
    pub(crate) closed: bool,
}

impl MockPort {
    pub(crate) fn new(responder: Responder) -> Self {
        Self {
            name: "mock".into(),
            baud_rate: 115200,
            pending: VecDeque::new(),
            responder,
            written: Vec::new(),
            configs: Vec::new(),
            fail_configure: false,
            short_write: false,
            hold_polls: 0,
            closed: false,
        }
    }

    /// Port that never answers.
    pub(crate) fn silent() -> Self {
        Self::new(Box::new(|_, _| Vec::new()))
    }

    /// Port that answers every frame with the same bytes.
    pub(crate) fn replying(reply: &[u8]) -> Self {
        let reply = reply.to_vec();
        Self::new(Box::new(move |_, _| reply.clone()))
    }

    /// Port backed by a shared device model.
    pub(crate) fn with_device(device: &Arc<Mutex<MemoryDevice>>) -> Self {
        let device = Arc::clone(device);
        Self::new(Box::new(move |frame, baud| {
            device
                .lock()
                .map(|mut d| d.respond(frame, baud))
                .unwrap_or_default()
        }))
    }

    /// Queue bytes as if they had already arrived.
    pub(crate) fn push_incoming(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes);
    }

    #[must_use]
    pub(crate) fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"));
        }
        let accepted = if self.short_write { buf.len() / 2 } else { buf.len() };
        self.written.push(buf[..accepted].to_vec());
        if accepted == buf.len() {
            let reply = (self.responder)(buf, self.baud_rate);
            self.pending.extend(reply);
        }
        Ok(accepted)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn configure(&mut self, config: &SerialConfig) -> Result<()> {
        if self.fail_configure {
            return Err(Error::Unsupported(format!("rate {}", config.baud_rate)));
        }
        self.configs.push(config.clone());
        self.baud_rate = config.baud_rate;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        if self.hold_polls > 0 {
            self.hold_polls -= 1;
            return Ok(0);
        }
        Ok(self.pending.len())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Minimal boot-ROM model: byte-addressed memory behind the frame protocol.
pub(crate) struct MemoryDevice {
    crc: CrcWidth,
    memory: HashMap<u32, u8>,
    writes: usize,
    /// Rates answered with 0x5A.
    pub(crate) sync_ok: RangeInclusive<u32>,
    /// Rates answered with a wrong byte.
    pub(crate) sync_garbled: Vec<RangeInclusive<u32>>,
    /// One-based index of a write window to answer with 0xFF.
    pub(crate) fail_write: Option<usize>,
    /// Result code returned by a returning call.
    pub(crate) call_result: u8,
    /// Frames whose trailer did not match.
    pub(crate) crc_errors: usize,
}

impl MemoryDevice {
    pub(crate) fn new(crc: CrcWidth) -> Self {
        Self {
            crc,
            memory: HashMap::new(),
            writes: 0,
            sync_ok: 0..=u32::MAX,
            sync_garbled: Vec::new(),
            fail_write: None,
            call_result: 0,
            crc_errors: 0,
        }
    }

    pub(crate) fn shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    pub(crate) fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let a = addr.wrapping_add(u32::try_from(i).unwrap_or(u32::MAX));
                self.memory.get(&a).copied().unwrap_or(0)
            })
            .collect()
    }

    pub(crate) fn is_written(&self, addr: u32) -> bool {
        self.memory.contains_key(&addr)
    }

    fn respond(&mut self, frame: &[u8], baud: u32) -> Vec<u8> {
        let Some(&opcode) = frame.first() else {
            return Vec::new();
        };

        if opcode == Opcode::Sync as u8 {
            if self.sync_ok.contains(&baud) {
                return vec![Opcode::SyncResponse as u8];
            }
            if self.sync_garbled.iter().any(|r| r.contains(&baud)) {
                return vec![0x00];
            }
            return Vec::new();
        }
        if opcode == Opcode::SetHighRate as u8 {
            return Vec::new();
        }

        let Some((body, trailer)) = self.crc.split_trailer(frame) else {
            return vec![Opcode::Error as u8];
        };
        if body.len() < 6 || self.crc.checksum(body) != trailer {
            self.crc_errors += 1;
            return vec![Opcode::Error as u8];
        }

        let size = usize::from(body[1]) + 1;
        let addr = u32::from_be_bytes([body[2], body[3], body[4], body[5]]);

        match Opcode::from_byte(opcode) {
            Some(Opcode::Write) => {
                self.writes += 1;
                if self.fail_write == Some(self.writes) {
                    return vec![Opcode::Error as u8];
                }
                for (offset, &byte) in (0u32..).zip(&body[6..]) {
                    self.memory.insert(addr.wrapping_add(offset), byte);
                }
                vec![Opcode::Write as u8]
            },
            Some(Opcode::Read) => {
                let mut reply = vec![Opcode::Read as u8];
                reply.extend(self.peek(addr, size));
                CrcWidth::Crc16.append(&mut reply);
                reply
            },
            Some(Opcode::Call) => vec![
                Opcode::Call as u8,
                Opcode::CallResult as u8,
                self.call_result,
            ],
            _ => vec![Opcode::Error as u8],
        }
    }
}

/// Encode a status record for the scripted stream.
pub(crate) fn status_record(status: u32, data: &[u8]) -> Vec<u8> {
    let mut record = status.to_le_bytes().to_vec();
    record.extend(u32::try_from(data.len()).unwrap_or(u32::MAX).to_le_bytes());
    record.extend_from_slice(data);
    debug_assert_eq!(StatusHeader::parse(&record).map(|h| h.status), Some(status));
    record
}

/// Opener over a fixed set of device names.
pub(crate) struct MockOpener {
    /// Names that can be opened; `None` means every name.
    pub(crate) present: Option<Vec<String>>,
    /// The single name whose device answers sync.
    pub(crate) answering: Option<String>,
    /// Every name passed to `open`, in order.
    pub(crate) probed: Vec<String>,
}

impl MockOpener {
    pub(crate) fn answering_at(name: &str) -> Self {
        Self {
            present: None,
            answering: Some(name.to_string()),
            probed: Vec::new(),
        }
    }
}

impl PortOpener for MockOpener {
    type Port = MockPort;

    fn open(&mut self, name: &str, config: &SerialConfig) -> Result<MockPort> {
        self.probed.push(name.to_string());

        if let Some(present) = &self.present {
            if !present.iter().any(|p| p == name) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    name.to_string(),
                )));
            }
        }

        let port = if self.answering.as_deref() == Some(name) {
            MockPort::replying(&[Opcode::SyncResponse as u8])
        } else {
            MockPort::silent()
        };
        let mut port = port.named(name);
        port.baud_rate = config.baud_rate;
        Ok(port)
    }
}
