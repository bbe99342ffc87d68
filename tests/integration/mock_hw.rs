//! Recording mocks for the serial link and the emergency collaborators.
//! Every call is journaled so tests can assert on full command history
//! without a Pico or a positioning service attached.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use futures::channel::oneshot;
use tokio_util::sync::CancellationToken;

use pico_sos::device::session::{PermissionAuthority, RadioCommands};
use pico_sos::device::types::DeviceHandle;
use pico_sos::error::TransportError;
use pico_sos::serial::transport::{LinkFactory, RawLink};
use pico_sos::sos::orchestrator::{Dialer, ShareSink};
use pico_sos::telemetry::location::{FixOutcome, LocationProvider, PositionFix};
use pico_sos::voice::{SpeechOutcome, VoiceEngine};

/// Shared call journal, so ordering can be asserted across mocks.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

// ── Serial link ───────────────────────────────────────────────

pub struct LinkState {
    pub written: Mutex<Vec<u8>>,
    pub reads: Mutex<VecDeque<Vec<u8>>>,
    handles: AtomicUsize,
}

impl LinkState {
    /// Outbound traffic split into newline-terminated commands.
    pub fn written_lines(&self) -> Vec<String> {
        let written = self.written.lock().unwrap();
        String::from_utf8_lossy(&written)
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// True once every handle (writer and read-loop clone) is gone.
    pub fn closed(&self) -> bool {
        self.handles.load(Ordering::SeqCst) == 0
    }
}

pub struct MockLink {
    state: Arc<LinkState>,
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.state.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RawLink for MockLink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.state.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let next = self.state.reads.lock().unwrap().pop_front();
        match next {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            },
            None => {
                thread::sleep(Duration::from_millis(1));
                Ok(0)
            },
        }
    }

    fn try_clone_link(&self) -> Result<Box<dyn RawLink>, TransportError> {
        self.state.handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLink {
            state: self.state.clone(),
        }))
    }
}

pub struct MockFactory {
    pub links: Mutex<Vec<Arc<LinkState>>>,
    pub fail_next: AtomicBool,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(MockFactory {
            links: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        })
    }

    pub fn link(&self, index: usize) -> Arc<LinkState> {
        self.links.lock().unwrap()[index].clone()
    }

    pub fn open_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

pub struct FactoryHandle(pub Arc<MockFactory>);

impl LinkFactory for FactoryHandle {
    fn open(&self, _port_id: &str) -> Result<Box<dyn RawLink>, TransportError> {
        if self.0.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::OpenFailed {
                source: serialport::Error::new(serialport::ErrorKind::NoDevice, "mock open failure"),
            });
        }

        let state = Arc::new(LinkState {
            written: Mutex::new(Vec::new()),
            reads: Mutex::new(VecDeque::new()),
            handles: AtomicUsize::new(1),
        });

        self.0.links.lock().unwrap().push(state.clone());
        Ok(Box::new(MockLink { state }))
    }
}

// ── Permission authority ──────────────────────────────────────

pub struct GateAuthority {
    pub granted: AtomicBool,
    pub requests: Mutex<Vec<DeviceHandle>>,
}

impl GateAuthority {
    pub fn new(granted: bool) -> Arc<Self> {
        Arc::new(GateAuthority {
            granted: AtomicBool::new(granted),
            requests: Mutex::new(Vec::new()),
        })
    }
}

pub struct AuthorityHandle(pub Arc<GateAuthority>);

impl PermissionAuthority for AuthorityHandle {
    fn has_permission(&self, _handle: &DeviceHandle) -> bool {
        self.0.granted.load(Ordering::SeqCst)
    }

    fn request_permission(&self, handle: &DeviceHandle) {
        self.0.requests.lock().unwrap().push(handle.clone());
    }
}

// ── Radio commands ────────────────────────────────────────────

pub struct MockRadio {
    pub connected: AtomicBool,
    journal: Journal,
}

impl MockRadio {
    pub fn new(connected: bool, journal: Journal) -> Arc<Self> {
        Arc::new(MockRadio {
            connected: AtomicBool::new(connected),
            journal,
        })
    }
}

impl RadioCommands for MockRadio {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_frequency(&self, tx_mhz: f64, rx_mhz: f64) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("FREQ {:.3} {:.3}", tx_mhz, rx_mhz));
    }

    fn report_position(&self, latitude: f64, longitude: f64) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("GPS {} {}", latitude, longitude));
    }

    fn ptt_down(&self) {
        self.journal.lock().unwrap().push("PTT 1".to_string());
    }

    fn ptt_up(&self) {
        self.journal.lock().unwrap().push("PTT 0".to_string());
    }
}

// ── Location provider ─────────────────────────────────────────

pub enum FixBehavior {
    Fix(PositionFix),
    Unavailable,
    Error,
    /// Provider abandons the request without answering.
    Drop,
}

pub struct MockLocation {
    pub granted: AtomicBool,
    pub permission_requests: AtomicUsize,
    pub fix_requests: AtomicUsize,
    behavior: Mutex<FixBehavior>,
}

impl MockLocation {
    pub fn new(granted: bool, behavior: FixBehavior) -> Arc<Self> {
        Arc::new(MockLocation {
            granted: AtomicBool::new(granted),
            permission_requests: AtomicUsize::new(0),
            fix_requests: AtomicUsize::new(0),
            behavior: Mutex::new(behavior),
        })
    }
}

impl LocationProvider for MockLocation {
    fn has_permission(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request_permission(&self) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn request_fix(&self, _cancel: CancellationToken) -> oneshot::Receiver<FixOutcome> {
        self.fix_requests.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();

        match &*self.behavior.lock().unwrap() {
            FixBehavior::Fix(fix) => {
                let _ = sender.send(FixOutcome::Fix(*fix));
            },
            FixBehavior::Unavailable => {
                let _ = sender.send(FixOutcome::Unavailable);
            },
            FixBehavior::Error => {
                let _ = sender.send(FixOutcome::Error("mock gps failure".to_string()));
            },
            FixBehavior::Drop => drop(sender),
        }

        receiver
    }
}

// ── Voice engine ──────────────────────────────────────────────

pub enum VoiceBehavior {
    Done,
    Error,
    /// Engine dies without reporting back.
    Drop,
}

pub struct MockVoice {
    behavior: Mutex<VoiceBehavior>,
    journal: Journal,
}

impl MockVoice {
    pub fn new(behavior: VoiceBehavior, journal: Journal) -> Arc<Self> {
        Arc::new(MockVoice {
            behavior: Mutex::new(behavior),
            journal,
        })
    }
}

impl VoiceEngine for MockVoice {
    fn speak(&self, text: &str) -> oneshot::Receiver<SpeechOutcome> {
        self.journal.lock().unwrap().push(format!("SPEAK {}", text));
        let (sender, receiver) = oneshot::channel();

        match &*self.behavior.lock().unwrap() {
            VoiceBehavior::Done => {
                let _ = sender.send(SpeechOutcome::Done);
            },
            VoiceBehavior::Error => {
                let _ = sender.send(SpeechOutcome::Error);
            },
            VoiceBehavior::Drop => drop(sender),
        }

        receiver
    }
}

// ── Handoffs ──────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingDialer {
    pub dialed: Mutex<Vec<String>>,
}

impl Dialer for RecordingDialer {
    fn dial(&self, number: &str) {
        self.dialed.lock().unwrap().push(number.to_string());
    }
}

#[derive(Default)]
pub struct RecordingShare {
    pub shared: Mutex<Vec<String>>,
}

impl ShareSink for RecordingShare {
    fn share(&self, text: &str) {
        self.shared.lock().unwrap().push(text.to_string());
    }
}
