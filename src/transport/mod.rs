//! Binary request/response transport to the DMR TEST device.
//!
//! A [`Transport`] owns one open link. Every request clears both link buffers,
//! writes a packet, checks the 4-byte acknowledgement and, when the command
//! returns data, reads and validates the reply. Requests are strictly
//! sequential; callers sharing a device go through [`SharedTransport`].
//!
//! ```text
//! host                                  device
//!  | \0NAME\0 len payload END\0  ---->    |
//!  |                       <----  ACK\0   |
//!  |                <----  len data END\0 |   (data commands only)
//! ```

pub mod mock;
pub mod packet;
pub mod registry;

use crate::diagnostics::{debug_enabled, hex_preview};
use crate::error::TransportError;
use crate::numerics::NumericRoutines;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub use packet::{Payload, Reply, WordSize};
pub use registry::{Connection, ConnectionRegistry, DeviceLink, LinkOpener, LinkSettings};

/// Default interval between `STATUS` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default time allowed for a PLL to report lock.
pub const DEFAULT_PLL_LOCK_TIMEOUT: Duration = Duration::from_millis(600);

const PREVIEW_BYTES: usize = 100;
const READ_CHUNK: usize = 512;

/// Byte stream to the device.
///
/// Reads are expected to block up to the link read timeout and then return
/// `ErrorKind::TimedOut` (or `Ok(0)`) when nothing arrived.
pub trait SerialLink: Read + Write + Send {
    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> io::Result<()>;
}

#[cfg(feature = "serial")]
impl SerialLink for Box<dyn serialport::SerialPort> {
    fn clear_buffers(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::All)
            .map_err(io::Error::from)
    }
}

/// Frequency synthesizer selector; the value is the device PLL number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pll {
    Modulator = 1,
    Demodulator = 2,
}

impl Pll {
    /// Device status bit raised when this PLL is locked.
    pub fn lock_mask(self) -> u16 {
        1 << (1 + self as u16)
    }
}

/// Outcome of [`Transport::wait_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWait {
    /// A masked bit was set; carries the full status word.
    Reached(u16),
    /// Timeout expired; carries the last status read, if any.
    TimedOut(Option<u16>),
}

impl StatusWait {
    /// True if the awaited bit was observed.
    pub fn is_reached(self) -> bool {
        matches!(self, StatusWait::Reached(_))
    }
}

/// Request/response channel over one open link.
pub struct Transport {
    link: Box<dyn SerialLink>,
    path: String,
    poll_interval: Duration,
    pll_lock_timeout: Duration,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("path", &self.path)
            .field("poll_interval", &self.poll_interval)
            .field("pll_lock_timeout", &self.pll_lock_timeout)
            .finish()
    }
}

impl Transport {
    /// Wrap an open link with default timing.
    pub fn new(link: Box<dyn SerialLink>, path: impl Into<String>) -> Self {
        Self {
            link,
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            pll_lock_timeout: DEFAULT_PLL_LOCK_TIMEOUT,
        }
    }

    /// Override status poll interval and PLL lock timeout.
    pub fn with_timing(mut self, poll_interval: Duration, pll_lock_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.pll_lock_timeout = pll_lock_timeout;
        self
    }

    /// Device path this transport was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send one command and return the reply words.
    ///
    /// With [`Reply::None`] the result is empty once the acknowledgement
    /// arrived.
    pub fn command(
        &mut self,
        name: &str,
        payload: &Payload,
        reply: Reply,
    ) -> Result<Vec<u16>, TransportError> {
        let request = packet::encode_packet(name, payload);

        self.link.clear_buffers().map_err(TransportError::Clear)?;
        if debug_enabled() {
            debug!(target: "transport", command = name, "send {}", hex_preview(&request, PREVIEW_BYTES));
        }
        self.link
            .write_all(&request)
            .and_then(|_| self.link.flush())
            .map_err(TransportError::Write)?;

        let ack = self.read_up_to(packet::ACK.len())?;
        if debug_enabled() {
            debug!(target: "transport", command = name, "ack {}", hex_preview(&ack, PREVIEW_BYTES));
        }
        packet::check_ack(name, &ack)?;

        let response = match reply {
            Reply::None => return Ok(Vec::new()),
            Reply::Words(_) => {
                let expected = reply.expected_bytes().unwrap_or_default();
                self.read_up_to(expected)?
            }
            Reply::All => self.read_until_end()?,
        };
        if debug_enabled() {
            debug!(
                target: "transport",
                command = name,
                bytes = response.len(),
                "received {}",
                hex_preview(&response, PREVIEW_BYTES)
            );
        }
        packet::decode_reply(name, reply, &response)
    }

    /// Read the device status word.
    pub fn status(&mut self) -> Result<Option<u16>, TransportError> {
        Ok(self
            .command("STATUS", &Payload::empty(), Reply::Words(1))?
            .first()
            .copied())
    }

    /// Poll `STATUS` until `status & mask != 0` or the timeout expires.
    ///
    /// A zero timeout polls without limit.
    pub fn wait_status(&mut self, mask: u16, timeout: Duration) -> Result<StatusWait, TransportError> {
        let start = Instant::now();
        loop {
            let status = self.status()?;
            if let Some(word) = status {
                if word & mask != 0 {
                    return Ok(StatusWait::Reached(word));
                }
            }
            if !timeout.is_zero() && start.elapsed() > timeout {
                return Ok(StatusWait::TimedOut(status));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Program a PLL to `frequency` Hz and wait for it to lock.
    ///
    /// The demodulator runs at twice the requested frequency. Returns `false`
    /// without any I/O when no register set exists for the frequency, and
    /// `false` when the lock bit did not come up in time.
    pub fn set_pll_frequency(
        &mut self,
        pll: Pll,
        frequency: u64,
        numerics: &dyn NumericRoutines,
    ) -> Result<bool, TransportError> {
        let target = match pll {
            Pll::Modulator => frequency,
            Pll::Demodulator => frequency * 2,
        };
        let registers = match numerics.synthesize_pll_registers(target) {
            Ok(registers) => registers,
            Err(err) => {
                warn!(?pll, target, "PLL register synthesis failed: {err}");
                return Ok(false);
            }
        };

        self.command("SET PLL", &Payload::words([1, 1], WordSize::Two), Reply::None)?;
        let load = Payload::mixed(
            std::iter::once((pll as u64, WordSize::Two))
                .chain(registers.iter().map(|&r| (u64::from(r), WordSize::Four))),
        );
        self.command("LOAD PLL", &load, Reply::None)?;

        let locked = self
            .wait_status(pll.lock_mask(), self.pll_lock_timeout)?
            .is_reached();
        debug!(?pll, target, locked, "PLL programmed");
        Ok(locked)
    }

    fn read_up_to(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; count];
        let mut filled = 0;
        while filled < count {
            match self.link.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Read(e)),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn read_until_end(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        while !out.ends_with(packet::END) {
            match self.link.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Read(e)),
            }
        }
        Ok(out)
    }
}

/// Transport shared by every task talking to the same device.
pub type SharedTransport = Arc<Mutex<Transport>>;

/// Lock a shared transport.
///
/// A panic while the lock was held leaves the link in an unknown state but the
/// next command clears both buffers anyway, so the guard is recovered.
pub fn lock(transport: &SharedTransport) -> MutexGuard<'_, Transport> {
    transport.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::mock::{MockDevice, MockReply};
    use super::*;
    use crate::numerics::mock::ScriptedNumerics;
    use crate::numerics::NumericsError;
    use tracing_test::traced_test;

    fn transport(device: &MockDevice) -> Transport {
        Transport::new(device.link(), "/dev/mock")
            .with_timing(Duration::from_millis(1), Duration::from_millis(20))
    }

    #[test]
    fn test_command_without_reply() {
        let device = MockDevice::new();
        let mut t = transport(&device);
        let words = t
            .command("SET ATT", &Payload::single(63), Reply::None)
            .expect("acknowledged");
        assert!(words.is_empty());
        let requests = device.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].name, "SET ATT");
        assert_eq!(requests[0].u16_words(), vec![63]);
        assert_eq!(device.clear_count(), 1);
    }

    #[test]
    fn test_command_with_word_reply() {
        let device = MockDevice::new();
        device.push_reply("GET PWR", MockReply::Words(vec![500, 700]));
        let mut t = transport(&device);
        let words = t
            .command("GET PWR", &Payload::single(64), Reply::Words(2))
            .expect("reply");
        assert_eq!(words, vec![500, 700]);
    }

    #[test]
    fn test_read_all_until_terminator() {
        let device = MockDevice::new();
        device.push_reply("GET DMRDIBIT", MockReply::Words((0..300).collect()));
        let mut t = transport(&device);
        let words = t
            .command("GET DMRDIBIT", &Payload::empty(), Reply::All)
            .expect("reply");
        assert_eq!(words.len(), 300);
        assert_eq!(words[299], 299);
    }

    #[test]
    fn test_missing_ack_consumes_no_reply() {
        let device = MockDevice::new();
        device.push_reply("GET PWR", MockReply::Raw(b"NAK\0\x02\x00".to_vec()));
        let mut t = transport(&device);
        let err = t
            .command("GET PWR", &Payload::single(1), Reply::Words(2))
            .unwrap_err();
        assert!(matches!(err, TransportError::MissingAck { .. }));
    }

    #[test]
    fn test_silent_device_times_out() {
        let device = MockDevice::new();
        device.push_reply("STATUS", MockReply::Silence);
        let mut t = transport(&device);
        assert!(t.status().unwrap_err().is_timeout());
    }

    #[test]
    fn test_busy_device() {
        let device = MockDevice::new();
        device.push_reply("SET MEASST", MockReply::Busy);
        let mut t = transport(&device);
        let err = t
            .command("SET MEASST", &Payload::single(1), Reply::None)
            .unwrap_err();
        assert!(err.is_device_busy());
    }

    #[test]
    fn test_wait_status_reached_and_timed_out() {
        let device = MockDevice::new();
        device.push_reply("STATUS", MockReply::Words(vec![0]));
        device.push_reply("STATUS", MockReply::Words(vec![0x08]));
        let mut t = transport(&device);
        assert_eq!(
            t.wait_status(0x08, Duration::from_secs(1)).expect("polls"),
            StatusWait::Reached(0x08)
        );

        device.set_status(0x01);
        let outcome = t.wait_status(0x08, Duration::from_millis(5)).expect("polls");
        assert_eq!(outcome, StatusWait::TimedOut(Some(0x01)));
    }

    #[test]
    fn test_set_pll_frequency_sequence() {
        let device = MockDevice::new();
        device.set_status(Pll::Demodulator.lock_mask());
        let numerics = ScriptedNumerics::new();
        numerics.push_registers(Ok([1, 2, 3, 4, 5, 6]));
        let mut t = transport(&device);

        let locked = t
            .set_pll_frequency(Pll::Demodulator, 200_000_000, &numerics)
            .expect("no fault");
        assert!(locked);
        assert_eq!(numerics.synthesized_frequencies(), vec![400_000_000]);

        let names = device.request_names();
        assert_eq!(names, vec!["SET PLL", "LOAD PLL", "STATUS"]);
        let load = &device.requests()[1];
        assert_eq!(load.length_units, 13);
        let mut sizes = vec![WordSize::Two];
        sizes.extend([WordSize::Four; 6]);
        assert_eq!(load.words(&sizes), Some(vec![2, 1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn test_set_pll_frequency_without_registers_does_no_io() {
        let device = MockDevice::new();
        let numerics = ScriptedNumerics::new();
        numerics.push_registers(Err(NumericsError::NotFound));
        let mut t = transport(&device);
        let locked = t
            .set_pll_frequency(Pll::Modulator, 138_000_000, &numerics)
            .expect("no fault");
        assert!(!locked);
        assert!(device.requests().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_unlocked_pll_is_logged() {
        let device = MockDevice::new();
        let numerics = ScriptedNumerics::new();
        let mut t = transport(&device);
        let locked = t
            .set_pll_frequency(Pll::Modulator, 138_000_000, &numerics)
            .expect("no fault");
        assert!(!locked);
        assert!(logs_contain("PLL programmed"));
        assert!(logs_contain("locked=false"));
    }
}
