//! In-memory device double for tests and dry runs.
//!
//! [`MockDevice`] decodes every packet written to its links, records it and
//! queues the scripted reply bytes for the host to read. Unscripted commands
//! are acknowledged; `STATUS` answers with the configured status word.

use super::packet::{self, DecodedRequest};
use super::registry::{LinkOpener, LinkSettings};
use super::SerialLink;
use crate::error::TransportError;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Scripted device behaviour for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Acknowledgement only.
    Ack,
    /// Acknowledgement followed by a well-formed data reply.
    Words(Vec<u16>),
    /// Exact bytes, acknowledgement included.
    Raw(Vec<u8>),
    /// Nothing at all.
    Silence,
    /// The busy report sent by a hung controller.
    Busy,
}

impl MockReply {
    fn bytes(&self) -> Vec<u8> {
        match self {
            MockReply::Ack => packet::ACK.to_vec(),
            MockReply::Words(words) => {
                let mut out = packet::ACK.to_vec();
                out.extend(packet::encode_reply(words));
                out
            }
            MockReply::Raw(bytes) => bytes.clone(),
            MockReply::Silence => Vec::new(),
            MockReply::Busy => b"MCU BUSY".to_vec(),
        }
    }
}

#[derive(Default)]
struct MockState {
    incoming: Vec<u8>,
    outgoing: VecDeque<u8>,
    requests: Vec<DecodedRequest>,
    scripted: HashMap<String, VecDeque<MockReply>>,
    persistent: HashMap<String, MockReply>,
    status: u16,
    clears: usize,
}

impl MockState {
    fn accept(&mut self, request: DecodedRequest) {
        let reply = self
            .scripted
            .get_mut(&request.name)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.persistent.get(&request.name).cloned())
            .unwrap_or_else(|| {
                if request.name == "STATUS" {
                    MockReply::Words(vec![self.status])
                } else {
                    MockReply::Ack
                }
            });
        self.outgoing.extend(reply.bytes());
        self.requests.push(request);
    }
}

/// Shared state of a simulated device. Clones observe the same device.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// Device that acknowledges everything and reports status 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// New link connected to this device.
    pub fn link(&self) -> Box<dyn SerialLink> {
        Box::new(MockLink {
            device: self.clone(),
        })
    }

    /// Queue a one-shot reply for the next `name` request.
    pub fn push_reply(&self, name: &str, reply: MockReply) {
        self.state()
            .scripted
            .entry(name.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Reply used for `name` whenever no one-shot reply is queued.
    pub fn set_reply(&self, name: &str, reply: MockReply) {
        self.state().persistent.insert(name.to_string(), reply);
    }

    /// Status word returned by unscripted `STATUS` requests.
    pub fn set_status(&self, status: u16) {
        self.state().status = status;
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<DecodedRequest> {
        self.state().requests.clone()
    }

    /// Names of all requests received so far.
    pub fn request_names(&self) -> Vec<String> {
        self.state().requests.iter().map(|r| r.name.clone()).collect()
    }

    /// Requests with the given name.
    pub fn requests_named(&self, name: &str) -> Vec<DecodedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    /// Number of buffer clears performed by the host.
    pub fn clear_count(&self) -> usize {
        self.state().clears
    }
}

/// Host side of a [`MockDevice`].
pub struct MockLink {
    device: MockDevice,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if state.outgoing.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timeout"));
        }
        let n = buf.len().min(state.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(state.outgoing.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        state.incoming.extend_from_slice(buf);
        if state.incoming.ends_with(packet::END) {
            let raw = std::mem::take(&mut state.incoming);
            match packet::decode_request(&raw) {
                Some(request) => state.accept(request),
                None => state.incoming = raw,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for MockLink {
    fn clear_buffers(&mut self) -> io::Result<()> {
        let mut state = self.device.state();
        state.incoming.clear();
        state.outgoing.clear();
        state.clears += 1;
        Ok(())
    }
}

/// Opener handing out links to one [`MockDevice`] for any path.
#[derive(Clone, Default)]
pub struct MockOpener {
    device: MockDevice,
    opens: Arc<AtomicUsize>,
    offline: bool,
}

impl MockOpener {
    /// Opener connected to `device`.
    pub fn new(device: MockDevice) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }

    /// Opener that finds no device.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// How many links were opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl LinkOpener for MockOpener {
    fn open(&self, path: &str, _settings: &LinkSettings) -> Result<Box<dyn SerialLink>, TransportError> {
        if self.offline {
            return Err(TransportError::Open {
                path: path.to_string(),
                reason: "device is offline".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.device.link())
    }

    fn discover(&self) -> Result<String, TransportError> {
        if self.offline {
            Err(TransportError::NoDevice)
        } else {
            Ok("/dev/mock".to_string())
        }
    }
}
