//! The device session: one permission-gated connection to one Pico peer,
//! a fixed outbound command vocabulary, and the latest inbound status line.

use std::sync::Mutex;
use std::thread;
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::device::constants::EVENT_CHANNEL_SIZE;
use crate::device::types::{DeviceHandle, SessionEvent, SessionState};
use crate::serial::transport::{new_last_line_cell, spawn_read_loop, LastLineCell, LinkFactory, RawLink};

/// Platform authority that grants access to a peer device. The grant
/// result arrives out-of-band through [`DeviceSession::on_permission_result`].
pub trait PermissionAuthority: Send + Sync {
    fn has_permission(&self, handle: &DeviceHandle) -> bool;

    fn request_permission(&self, handle: &DeviceHandle);
}

/// Desktop serial ports need no user grant; opening the port is the check.
pub struct AlwaysGranted;

impl PermissionAuthority for AlwaysGranted {
    fn has_permission(&self, _handle: &DeviceHandle) -> bool {
        true
    }

    fn request_permission(&self, _handle: &DeviceHandle) {}
}

/// The fixed radio command surface the emergency flow drives. Implemented
/// by [`DeviceSession`]; every command is fire-and-forget advisory.
pub trait RadioCommands: Send + Sync {
    fn is_connected(&self) -> bool;

    fn set_frequency(&self, tx_mhz: f64, rx_mhz: f64);

    fn report_position(&self, latitude: f64, longitude: f64);

    fn ptt_down(&self);

    fn ptt_up(&self);
}

struct SessionInner {
    state: SessionState,
    handle: Option<DeviceHandle>,
    pending: Option<DeviceHandle>,
    writer: Option<Box<dyn RawLink>>,
    read_cancel: Option<CancellationToken>,
    read_thread: Option<thread::JoinHandle<()>>,
}

pub struct DeviceSession {
    factory: Box<dyn LinkFactory>,
    authority: Box<dyn PermissionAuthority>,
    tx_timeout_ms: u32,
    idle_timeout_ms: u32,
    inner: Mutex<SessionInner>,
    last_line: LastLineCell,
    senders: Mutex<Vec<Sender<SessionEvent>>>,
}

impl DeviceSession {
    pub fn new(
        factory: Box<dyn LinkFactory>,
        authority: Box<dyn PermissionAuthority>,
        tx_timeout_ms: u32,
        idle_timeout_ms: u32,
    ) -> Self {
        DeviceSession {
            factory,
            authority,
            tx_timeout_ms,
            idle_timeout_ms,
            inner: Mutex::new(SessionInner {
                state: SessionState::Disconnected,
                handle: None,
                pending: None,
                writer: None,
                read_cancel: None,
                read_thread: None,
            }),
            last_line: new_last_line_cell(),
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber for state changes and status texts.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (sender, receiver) = channel::<SessionEvent>(EVENT_CHANNEL_SIZE);
        self.senders.lock().expect("Failed to lock session senders").push(sender);
        receiver
    }

    fn broadcast(&self, event: SessionEvent) {
        let mut senders = self.senders.lock().expect("Failed to lock session senders");
        senders.retain_mut(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(err) if err.is_disconnected() => false,
            Err(_) => {
                warn!("Dropping session event, subscriber is not keeping up");
                true
            },
        });
    }

    fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        if inner.state != state {
            inner.state = state;
            self.broadcast(SessionEvent::StateChange(state));
        }
    }

    fn status(&self, text: &str) {
        info!("{}", text);
        self.broadcast(SessionEvent::Status(text.to_string()));
    }

    /// Connect to `handle`, negotiating platform permission first if it has
    /// not been granted yet.
    pub fn request_connect(&self, handle: DeviceHandle) {
        if self.authority.has_permission(&handle) {
            self.connect(handle);
            return;
        }

        {
            let mut inner = self.inner.lock().expect("Failed to lock session");
            self.teardown(&mut inner);
            inner.handle = None;
            inner.pending = Some(handle.clone());
            self.set_state(&mut inner, SessionState::PermissionPending);
        }

        self.authority.request_permission(&handle);
    }

    /// Out-of-band permission result. Anything but a grant for the handle
    /// we are waiting on is ignored; a denial is not an error.
    pub fn on_permission_result(&self, handle: DeviceHandle, granted: bool) {
        let matches_pending = {
            let inner = self.inner.lock().expect("Failed to lock session");
            inner.state == SessionState::PermissionPending
                && inner.pending.as_ref() == Some(&handle)
        };

        if !matches_pending || !granted {
            return;
        }

        self.connect(handle);
    }

    /// Open the transport and bring the session up. Any prior live
    /// transport is torn down first, so at most one ever exists.
    pub fn connect(&self, handle: DeviceHandle) {
        let mut inner = self.inner.lock().expect("Failed to lock session");

        self.teardown(&mut inner);
        inner.pending = None;
        inner.handle = Some(handle.clone());
        self.set_state(&mut inner, SessionState::Connecting);

        let writer = match self.factory.open(&handle.id) {
            Ok(link) => link,
            Err(err) => {
                warn!("Failed to open {}: {}", handle.id, err);
                inner.handle = None;
                self.set_state(&mut inner, SessionState::Disconnected);
                self.status("USB échec connexion");
                return;
            },
        };

        let reader = match writer.try_clone_link() {
            Ok(reader) => reader,
            Err(err) => {
                warn!("Failed to clone link for read loop: {}", err);
                inner.handle = None;
                self.set_state(&mut inner, SessionState::Disconnected);
                self.status("USB échec connexion");
                return;
            },
        };

        let cancel = CancellationToken::new();
        inner.writer = Some(writer);
        inner.read_cancel = Some(cancel.clone());
        inner.read_thread = Some(spawn_read_loop(reader, cancel, self.last_line.clone()));
        self.set_state(&mut inner, SessionState::Connected);
        self.status("USB connecté");

        self.send_line(&mut inner, "INIT".to_string());
        self.send_line(
            &mut inner,
            format!("SAFE TXTO={} IDLE={}", self.tx_timeout_ms, self.idle_timeout_ms),
        );
    }

    /// Stop the read loop, close the transport, go Disconnected. Calling
    /// this while already disconnected is a no-op.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock().expect("Failed to lock session");
        let was_down = inner.state == SessionState::Disconnected;

        self.teardown(&mut inner);
        inner.handle = None;
        inner.pending = None;

        if !was_down {
            self.set_state(&mut inner, SessionState::Disconnected);
            self.status("USB déconnecté");
        }
    }

    /// The platform reports the peer was physically removed.
    pub fn on_device_detached(&self, handle: &DeviceHandle) {
        let is_current = {
            let inner = self.inner.lock().expect("Failed to lock session");
            inner.handle.as_ref() == Some(handle)
        };

        if is_current {
            info!("Device {} detached", handle.id);
            self.disconnect();
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().expect("Failed to lock session").state
    }

    pub fn connected_handle(&self) -> Option<DeviceHandle> {
        self.inner.lock().expect("Failed to lock session").handle.clone()
    }

    /// Latest fully-received line from the peer, if any arrived yet.
    pub fn last_status_line(&self) -> Option<String> {
        self.last_line.lock().expect("Failed to lock last line slot").clone()
    }

    fn teardown(&self, inner: &mut SessionInner) {
        if let Some(cancel) = inner.read_cancel.take() {
            cancel.cancel();
        }

        if let Some(handle) = inner.read_thread.take() {
            if handle.join().is_err() {
                warn!("Read loop thread panicked");
            }
        }

        // dropping the port handle closes it
        inner.writer = None;
    }

    fn send_line(&self, inner: &mut SessionInner, line: String) {
        if inner.state != SessionState::Connected {
            return;
        }

        if let Some(writer) = inner.writer.as_mut() {
            let mut bytes = line.into_bytes();
            bytes.push(b'\n');

            if let Err(err) = writer.write_bytes(&bytes) {
                warn!("Failed to send command: {}", err);
            }
        }
    }

    /// Silent no-op unless Connected; commands are fire-and-forget advisory.
    fn command(&self, line: String) {
        let mut inner = self.inner.lock().expect("Failed to lock session");
        self.send_line(&mut inner, line);
    }

    pub fn set_volume(&self, level: u8) {
        self.command(format!("VOL {}", level));
    }

    pub fn set_squelch(&self, level: u8) {
        self.command(format!("SQL {}", level));
    }

    pub fn request_status(&self) {
        self.command("STATUS".to_string());
    }

    pub fn recover(&self) {
        self.command("RECOVER".to_string());
    }
}

impl RadioCommands for DeviceSession {
    fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    fn set_frequency(&self, tx_mhz: f64, rx_mhz: f64) {
        self.command(format!("FREQ {:.3} {:.3}", tx_mhz, rx_mhz));
    }

    fn report_position(&self, latitude: f64, longitude: f64) {
        self.command(format!("GPS {} {}", latitude, longitude));
    }

    fn ptt_down(&self) {
        self.command("PTT 1".to_string());
    }

    fn ptt_up(&self) {
        self.command("PTT 0".to_string());
    }
}
