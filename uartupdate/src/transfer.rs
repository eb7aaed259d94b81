//! Memory transfer orchestration.
//!
//! Reads and writes larger than one packet are split into windows; each
//! window is one command, sent and acknowledged before the next. A failed
//! window aborts the rest of the transfer. Windows that already completed
//! stay written on the device (or delivered to the sink).

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::link::LinkSession;
use crate::is_interrupted_requested;
use crate::port::Port;
use crate::protocol::{Command, MAX_PACKET_SIZE, Response, StatusHeader, TimeoutClass};
use log::{debug, info, warn};
use std::io::Write;
use std::time::Duration;

/// Window size for word-token input.
pub const WORD_WINDOW: usize = 4;

/// Data to write to device memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteSource {
    /// Raw bytes, sent in 256-byte windows.
    Bytes(Vec<u8>),
    /// 32-bit words, each sent on its own as four little-endian bytes.
    Words(Vec<u32>),
}

impl WriteSource {
    /// Parse whitespace-delimited hexadecimal words (`0x` prefix optional).
    pub fn parse_words(text: &str) -> Result<Self> {
        let words = text
            .split_whitespace()
            .map(|token| {
                let digits = token
                    .strip_prefix("0x")
                    .or_else(|| token.strip_prefix("0X"))
                    .unwrap_or(token);
                u32::from_str_radix(digits, 16)
                    .map_err(|_| Error::InvalidInput(format!("invalid hex word: {token}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::Words(words))
    }

    /// Payload length in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Words(words) => words.len() * 4,
        }
    }

    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }

    /// Window size for this kind of input.
    pub fn window_size(&self) -> usize {
        match self {
            Self::Bytes(_) => MAX_PACKET_SIZE,
            Self::Words(_) => WORD_WINDOW,
        }
    }

    /// Bytes as they go on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bytes(bytes) => bytes.clone(),
            Self::Words(words) => words.iter().flat_map(|w| w.to_le_bytes()).collect(),
        }
    }
}

/// Split of a transfer into windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    /// First address.
    pub addr: u32,
    /// Total byte count.
    pub total: usize,
    /// Maximum bytes per window.
    pub window: usize,
}

/// One window of a [`TransferPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Zero-based window index.
    pub index: usize,
    /// Target address.
    pub addr: u32,
    /// Offset into the payload.
    pub offset: usize,
    /// Byte count.
    pub len: usize,
}

impl TransferPlan {
    /// Plan a transfer, rejecting empty or address-overflowing ranges.
    pub fn new(addr: u32, total: usize, window: usize) -> Result<Self> {
        if total == 0 {
            return Err(Error::EmptyPayload);
        }
        if window == 0 || window > MAX_PACKET_SIZE {
            return Err(Error::PacketTooLarge {
                len: window,
                max: MAX_PACKET_SIZE,
            });
        }
        let end = u64::from(addr) + total as u64;
        if end > u64::from(u32::MAX) + 1 {
            return Err(Error::InvalidInput(format!(
                "{total} bytes at {addr:#010x} run past the end of the address space"
            )));
        }
        Ok(Self {
            addr,
            total,
            window,
        })
    }

    /// Number of windows, `ceil(total / window)`.
    pub fn windows(&self) -> usize {
        self.total.div_ceil(self.window)
    }

    /// Iterate over the windows in address order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = Window> + '_ {
        (0..self.windows()).map(move |index| {
            let offset = index * self.window;
            Window {
                index,
                // In range, checked by `new`
                addr: self.addr.wrapping_add(offset as u32),
                offset,
                len: self.window.min(self.total - offset),
            }
        })
    }
}

/// Progress after each completed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// One-based index of the window just completed.
    pub window: usize,
    /// Total number of windows.
    pub windows: usize,
    /// Bytes completed so far.
    pub bytes: usize,
    /// Total bytes in the transfer.
    pub total: usize,
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Windows sent.
    pub windows: usize,
    /// Bytes transferred.
    pub bytes: usize,
}

/// Mismatch for a decoded response of the wrong kind.
fn mismatch(command: &Command<'_>, raw: &[u8]) -> Error {
    Error::ResponseMismatch {
        command: command.name(),
        expected: command.opcode() as u8,
        actual: raw.first().copied().unwrap_or_default(),
    }
}

impl<P: Port, C: Clock> LinkSession<P, C> {
    /// Send `command`, returning the raw answer with its decoding.
    fn exchange(&mut self, command: &Command<'_>) -> Result<(Vec<u8>, Response)> {
        let request = command.request(self.crc())?;
        let raw = self.transact(&request)?;
        let response = command.decode(&raw)?;
        Ok((raw, response))
    }

    /// Run `step` for every window, stopping at the first failure.
    fn run_plan<F, G>(&mut self, plan: &TransferPlan, mut step: F, mut progress: G) -> Result<TransferReport>
    where
        F: FnMut(&mut Self, &Window) -> Result<()>,
        G: FnMut(Progress),
    {
        let windows = plan.windows();
        let mut committed = 0;

        for window in plan.iter() {
            let outcome = if is_interrupted_requested() {
                Err(Error::Interrupted)
            } else {
                step(self, &window)
            };
            if let Err(e) = outcome {
                warn!(
                    "Window {}/{windows} at {:#010x} failed: {e}",
                    window.index + 1,
                    window.addr
                );
                return Err(Error::Transfer {
                    window: window.index + 1,
                    windows,
                    committed,
                    source: Box::new(e),
                });
            }

            committed += window.len;
            debug!(
                "Window {}/{windows}: {} bytes at {:#010x}",
                window.index + 1,
                window.len,
                window.addr
            );
            progress(Progress {
                window: window.index + 1,
                windows,
                bytes: committed,
                total: plan.total,
            });
        }

        Ok(TransferReport {
            windows,
            bytes: committed,
        })
    }

    /// Write `source` to device memory starting at `addr`.
    pub fn write_memory<F>(&mut self, addr: u32, source: &WriteSource, progress: F) -> Result<TransferReport>
    where
        F: FnMut(Progress),
    {
        let data = source.to_bytes();
        let plan = TransferPlan::new(addr, data.len(), source.window_size())?;
        info!(
            "Writing {} bytes to {addr:#010x} in {} packets",
            plan.total,
            plan.windows()
        );

        self.run_plan(
            &plan,
            |link, window| {
                let chunk = &data[window.offset..window.offset + window.len];
                link.execute(&Command::write(window.addr, chunk)?)?;
                Ok(())
            },
            progress,
        )
    }

    /// Read `size` bytes starting at `addr` into `sink`.
    pub fn read_memory<W, F>(&mut self, addr: u32, size: usize, sink: &mut W, progress: F) -> Result<TransferReport>
    where
        W: Write + ?Sized,
        F: FnMut(Progress),
    {
        let plan = TransferPlan::new(addr, size, MAX_PACKET_SIZE)?;
        info!(
            "Reading {size} bytes from {addr:#010x} in {} packets",
            plan.windows()
        );

        self.run_plan(
            &plan,
            |link, window| {
                let command = Command::read(window.addr, window.len)?;
                let (raw, response) = link.exchange(&command)?;
                let Response::Data(data) = response else {
                    return Err(mismatch(&command, &raw));
                };
                sink.write_all(&data).map_err(Error::Output)
            },
            progress,
        )
    }

    /// Jump to `addr`. The ROM leaves command mode afterwards.
    pub fn execute_exit(&mut self, addr: u32) -> Result<()> {
        info!("Executing from {addr:#010x}");
        self.execute(&Command::ExecuteExit { addr })?;
        Ok(())
    }

    /// Call code at `addr` and return its result code.
    pub fn execute_return(&mut self, addr: u32) -> Result<u8> {
        info!("Calling {addr:#010x}");
        let command = Command::ExecuteReturn { addr };
        let (raw, response) = self.exchange(&command)?;
        let Response::Returned(code) = response else {
            return Err(mismatch(&command, &raw));
        };
        info!("Call returned {code:#04x}");
        Ok(code)
    }

    /// Ask the device to switch to its high baud rate.
    ///
    /// No answer is expected; the host side is not changed.
    pub fn set_high_baud_rate(&mut self) -> Result<()> {
        self.execute(&Command::SetHighBaudRate)?;
        Ok(())
    }

    /// Switch the device to its high rate, follow on the host side and
    /// re-synchronize at `baud_rate`.
    pub fn switch_to_high_baud_rate(&mut self, baud_rate: u32, settle: Duration) -> Result<()> {
        info!("Switching to {baud_rate} baud");
        self.set_high_baud_rate()?;
        self.pause(settle);
        self.set_baud_rate(baud_rate)?;
        self.synchronize()
    }

    /// Copy status records into `sink` until the end record has been written.
    ///
    /// Returns the number of records, including the end record.
    pub fn read_status_messages<W>(&mut self, sink: &mut W) -> Result<usize>
    where
        W: Write + ?Sized,
    {
        let timeout = self.timeouts().for_class(TimeoutClass::Long);
        let mut records = 0;

        info!("Reading status messages");
        loop {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            let raw = self.receive(StatusHeader::LEN, timeout)?;
            sink.write_all(&raw).map_err(Error::Output)?;
            records += 1;

            let Some(header) = StatusHeader::parse(&raw) else {
                return Err(Error::ShortRead {
                    received: raw.len(),
                    expected: StatusHeader::LEN,
                });
            };
            debug!(
                "Status {:#010x}, {} data bytes",
                header.status, header.data_size
            );
            if header.is_end() {
                break;
            }

            let data_len = header.trailing_len();
            if data_len > 0 {
                let data = self.receive(data_len, timeout)?;
                sink.write_all(&data).map_err(Error::Output)?;
            }
        }

        sink.flush().map_err(Error::Output)?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::port::SerialConfig;
    use crate::port::mock::{MemoryDevice, MockPort, status_record};
    use crate::protocol::{CrcWidth, crc_of};
    use crate::protocol::status::STATUS_APP_END;
    use std::sync::{Arc, Mutex};

    fn link(
        crc: CrcWidth,
        device: MemoryDevice,
    ) -> (LinkSession<MockPort, ManualClock>, Arc<Mutex<MemoryDevice>>) {
        let device = device.shared();
        let link = LinkSession::new(MockPort::with_device(&device), SerialConfig::new("mock", 115200))
            .with_crc(crc)
            .with_clock(ManualClock::new());
        (link, device)
    }

    #[test]
    fn test_plan_windows() {
        let plan = TransferPlan::new(0x1000, 260, 256).unwrap();
        assert_eq!(plan.windows(), 2);

        let windows: Vec<_> = plan.iter().collect();
        assert_eq!(windows[0].addr, 0x1000);
        assert_eq!(windows[0].len, 256);
        assert_eq!(windows[1].addr, 0x1100);
        assert_eq!(windows[1].offset, 256);
        assert_eq!(windows[1].len, 4);

        assert_eq!(TransferPlan::new(0, 512, 256).unwrap().windows(), 2);
        assert_eq!(TransferPlan::new(0, 1, 4).unwrap().windows(), 1);
    }

    #[test]
    fn test_plan_rejects_bad_input() {
        assert!(matches!(TransferPlan::new(0, 0, 256), Err(Error::EmptyPayload)));
        assert!(TransferPlan::new(0, 10, 0).is_err());
        assert!(TransferPlan::new(0xFFFF_FF00, 0x101, 256).is_err());
        assert!(TransferPlan::new(0xFFFF_FF00, 0x100, 256).is_ok());
    }

    #[test]
    fn test_parse_words() {
        let source = WriteSource::parse_words("DEADBEEF 0x1 \n 0X00000010").unwrap();
        assert_eq!(source, WriteSource::Words(vec![0xDEADBEEF, 1, 0x10]));
        assert_eq!(source.byte_len(), 12);
        assert_eq!(source.window_size(), 4);
        assert_eq!(&source.to_bytes()[..4], &[0xEF, 0xBE, 0xAD, 0xDE]);

        assert!(WriteSource::parse_words("12 zz").is_err());
        assert!(WriteSource::parse_words("   ").unwrap().is_empty());
    }

    #[test]
    fn test_read_260_bytes_uses_two_windows() {
        let (mut link, _device) = link(CrcWidth::Crc16, MemoryDevice::new(CrcWidth::Crc16));
        let mut sink = Vec::new();

        let report = link.read_memory(0x1000, 260, &mut sink, |_| {}).unwrap();

        assert_eq!(report, TransferReport { windows: 2, bytes: 260 });
        assert_eq!(sink.len(), 260);

        let frames = &link.port().written;
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..6], &[0x1C, 0xFF, 0x00, 0x00, 0x10, 0x00]);
        assert_eq!(&frames[1][..6], &[0x1C, 0x03, 0x00, 0x00, 0x11, 0x00]);
        for frame in frames {
            let (body, trailer) = CrcWidth::Crc16.split_trailer(frame).unwrap();
            assert_eq!(trailer, crc_of(body, CrcWidth::Crc16));
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        for crc in [CrcWidth::Crc16, CrcWidth::Crc32] {
            let (mut link, device) = link(crc, MemoryDevice::new(crc));
            let payload: Vec<u8> = (0..700u32).map(|i| (i * 7 % 251) as u8).collect();

            let report = link
                .write_memory(0x2000_0000, &WriteSource::Bytes(payload.clone()), |_| {})
                .unwrap();
            assert_eq!(report.windows, 3);

            let mut back = Vec::new();
            link.read_memory(0x2000_0000, payload.len(), &mut back, |_| {})
                .unwrap();

            assert_eq!(back, payload);
            assert_eq!(device.lock().unwrap().crc_errors, 0);
        }
    }

    #[test]
    fn test_word_mode_writes_little_endian_words() {
        let (mut link, device) = link(CrcWidth::Crc16, MemoryDevice::new(CrcWidth::Crc16));
        let source = WriteSource::parse_words("11223344 AABBCCDD").unwrap();

        let report = link.write_memory(0x100, &source, |_| {}).unwrap();

        assert_eq!(report.windows, 2);
        let frames = &link.port().written;
        assert_eq!(frames[0][1], 0x03);
        assert_eq!(&frames[1][2..6], &[0x00, 0x00, 0x01, 0x04]);
        assert_eq!(
            device.lock().unwrap().peek(0x100, 8),
            [0x44, 0x33, 0x22, 0x11, 0xDD, 0xCC, 0xBB, 0xAA]
        );
    }

    #[test]
    fn test_failed_window_aborts_and_keeps_committed() {
        let mut device = MemoryDevice::new(CrcWidth::Crc16);
        device.fail_write = Some(2);
        let (mut link, device) = link(CrcWidth::Crc16, device);
        let payload = vec![0xA5; 3 * 256];
        let mut seen = Vec::new();

        let err = link
            .write_memory(0x4000, &WriteSource::Bytes(payload), |p| seen.push(p.window))
            .unwrap_err();

        match err {
            Error::Transfer {
                window,
                windows,
                committed,
                source,
            } => {
                assert_eq!((window, windows, committed), (2, 3, 256));
                assert!(matches!(*source, Error::ResponseMismatch { actual: 0xFF, .. }));
            },
            other => panic!("unexpected error: {other}"),
        }

        // Window 3 never sent
        assert_eq!(link.port().written.len(), 2);
        assert_eq!(seen, [1]);

        let device = device.lock().unwrap();
        assert!(device.is_written(0x4000));
        assert!(device.is_written(0x40FF));
        assert!(!device.is_written(0x4100));
        assert!(!device.is_written(0x4200));
    }

    #[test]
    fn test_progress_reports_every_window() {
        let (mut link, _device) = link(CrcWidth::Crc16, MemoryDevice::new(CrcWidth::Crc16));
        let mut updates = Vec::new();

        link.write_memory(0, &WriteSource::Bytes(vec![1; 600]), |p| updates.push(p))
            .unwrap();

        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].bytes, 256);
        assert_eq!(updates[2].window, 3);
        assert_eq!(updates[2].windows, 3);
        assert_eq!(updates[2].bytes, 600);
        assert_eq!(updates[2].total, 600);
    }

    #[test]
    fn test_empty_write_sends_nothing() {
        let (mut link, _device) = link(CrcWidth::Crc16, MemoryDevice::new(CrcWidth::Crc16));
        let err = link
            .write_memory(0, &WriteSource::Bytes(Vec::new()), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));
        assert!(link.port().written.is_empty());
    }

    #[test]
    fn test_execute_variants() {
        let mut device = MemoryDevice::new(CrcWidth::Crc16);
        device.call_result = 0x2A;
        let (mut link, _device) = link(CrcWidth::Crc16, device);

        assert_eq!(link.execute_return(0x2000_0000).unwrap(), 0x2A);
        assert_eq!(&link.port().written[0][..6], &[0x70, 0x00, 0x20, 0x00, 0x00, 0x00]);
        assert_eq!(link.port().written[0].len(), 8);

        // Only the leading 0x70 echo is consumed
        link.execute_exit(0x2000_0000).unwrap();
        assert_eq!(link.port().written.len(), 2);
    }

    #[test]
    fn test_execute_exit_mismatch() {
        let port = MockPort::replying(&[0x07]);
        let mut link =
            LinkSession::new(port, SerialConfig::new("mock", 115200)).with_clock(ManualClock::new());
        assert!(matches!(
            link.execute_exit(0),
            Err(Error::ResponseMismatch { expected: 0x70, .. })
        ));
    }

    #[test]
    fn test_set_high_baud_rate_expects_nothing() {
        let (mut link, _device) = link(CrcWidth::Crc32, MemoryDevice::new(CrcWidth::Crc32));
        link.set_high_baud_rate().unwrap();
        assert_eq!(link.port().written, vec![vec![0xA0]]);
    }

    #[test]
    fn test_switch_to_high_baud_rate_resyncs() {
        let (mut link, _device) = link(CrcWidth::Crc16, MemoryDevice::new(CrcWidth::Crc16));

        link.switch_to_high_baud_rate(921600, Duration::from_millis(100))
            .unwrap();

        assert_eq!(link.baud_rate(), 921600);
        assert_eq!(link.port().written, vec![vec![0xA0], vec![0x55]]);
    }

    #[test]
    fn test_status_messages_until_end() {
        let mut stream = status_record(0x01, &[]);
        stream.extend(status_record(0x02, b"flash ok"));
        stream.extend(status_record(STATUS_APP_END, &[]));

        let mut port = MockPort::silent();
        port.push_incoming(&stream);
        let mut link =
            LinkSession::new(port, SerialConfig::new("mock", 115200)).with_clock(ManualClock::new());
        let mut sink = Vec::new();

        let records = link.read_status_messages(&mut sink).unwrap();

        assert_eq!(records, 3);
        assert_eq!(sink, stream);
    }

    #[test]
    fn test_status_stream_cut_short_times_out() {
        let mut port = MockPort::silent();
        port.push_incoming(&status_record(0x03, &[])[..5]);
        let mut link =
            LinkSession::new(port, SerialConfig::new("mock", 115200)).with_clock(ManualClock::new());
        let mut sink = Vec::new();

        let err = link.read_status_messages(&mut sink).unwrap_err();
        assert!(matches!(err, Error::Timeout { available: 5, expected: 8 }));
        assert!(sink.is_empty());
    }

    /// Sink that accepts `room` bytes, then fails.
    struct FullDisk {
        room: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.len() > self.room {
                return Err(std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"));
            }
            self.room -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_sink_failure_is_output_error() {
        let (mut link, _device) = link(CrcWidth::Crc16, MemoryDevice::new(CrcWidth::Crc16));
        let mut sink = FullDisk { room: 256 };

        let err = link.read_memory(0x1000, 300, &mut sink, |_| {}).unwrap_err();

        match &err {
            Error::Transfer {
                window,
                committed,
                source,
                ..
            } => {
                assert_eq!((*window, *committed), (2, 256));
                assert!(matches!(**source, Error::Output(_)));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_output());
        assert!(!err.is_transport());
    }

    #[test]
    fn test_status_sink_failure_is_output_error() {
        let mut port = MockPort::silent();
        port.push_incoming(&status_record(0x01, b"data"));
        let mut link =
            LinkSession::new(port, SerialConfig::new("mock", 115200)).with_clock(ManualClock::new());

        let err = link
            .read_status_messages(&mut FullDisk { room: 4 })
            .unwrap_err();
        assert!(matches!(err, Error::Output(_)));
    }

    #[test]
    fn test_read_after_failed_read_gets_its_own_data() {
        let (mut link, device) = link(CrcWidth::Crc16, MemoryDevice::new(CrcWidth::Crc16));
        link.write_memory(0x40, &WriteSource::Bytes(vec![9, 8, 7, 6]), |_| {})
            .unwrap();
        // A late, partial answer from an earlier command
        link.port_mut().push_incoming(&[0x1C, 0x00]);
        let mut out = Vec::new();

        link.read_memory(0x40, 4, &mut out, |_| {}).unwrap();

        assert_eq!(out, [9, 8, 7, 6]);
        assert_eq!(device.lock().unwrap().crc_errors, 0);
    }

    #[test]
    fn test_wrong_response_kind_is_mismatch() {
        let command = Command::read(0x10, 4).unwrap();
        assert!(matches!(
            mismatch(&command, &[0x73, 0x00]),
            Error::ResponseMismatch {
                expected: 0x1C,
                actual: 0x73,
                ..
            }
        ));
        assert!(matches!(
            mismatch(&Command::ExecuteReturn { addr: 0 }, &[]),
            Error::ResponseMismatch { actual: 0, .. }
        ));
    }
}
