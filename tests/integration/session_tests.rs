//! Device session tests: connection lifecycle, permission negotiation,
//! the fixed init sequence and the fire-and-forget command surface, all
//! against the recording mock link.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures::channel::mpsc::Receiver;

use pico_sos::device::session::{DeviceSession, RadioCommands};
use pico_sos::device::types::{DeviceHandle, SessionEvent, SessionState};

use crate::mock_hw::{AuthorityHandle, FactoryHandle, GateAuthority, MockFactory};

fn make_session(granted: bool) -> (Arc<DeviceSession>, Arc<MockFactory>, Arc<GateAuthority>) {
    let factory = MockFactory::new();
    let authority = GateAuthority::new(granted);
    let session = Arc::new(DeviceSession::new(
        Box::new(FactoryHandle(factory.clone())),
        Box::new(AuthorityHandle(authority.clone())),
        2500,
        30000,
    ));

    (session, factory, authority)
}

fn pico() -> DeviceHandle {
    DeviceHandle::new("/dev/ttyACM0", "Pico")
}

fn drain_statuses(receiver: &mut Receiver<SessionEvent>) -> Vec<String> {
    let mut statuses = Vec::new();
    while let Ok(Some(event)) = receiver.try_next() {
        if let SessionEvent::Status(text) = event {
            statuses.push(text);
        }
    }
    statuses
}

// ── Connect and the init sequence ─────────────────────────────

#[test]
fn connect_sends_init_then_safe() {
    let (session, factory, _) = make_session(true);

    session.request_connect(pico());

    assert!(session.is_connected());
    assert_eq!(
        factory.link(0).written_lines(),
        ["INIT", "SAFE TXTO=2500 IDLE=30000"],
    );
}

#[test]
fn connect_failure_stays_disconnected_and_reports() {
    let (session, factory, _) = make_session(true);
    let mut events = session.subscribe();
    factory.fail_next.store(true, Ordering::SeqCst);

    session.request_connect(pico());

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_connected());
    assert!(drain_statuses(&mut events).contains(&"USB échec connexion".to_string()));
}

#[test]
fn reconnect_tears_down_the_prior_transport_first() {
    let (session, factory, _) = make_session(true);

    session.connect(pico());
    session.connect(DeviceHandle::new("/dev/ttyACM1", "Pico"));

    assert_eq!(factory.open_count(), 2);
    assert!(factory.link(0).closed(), "first link must be fully released");
    assert!(!factory.link(1).closed(), "second link is the live one");
    assert!(session.is_connected());
}

// ── Commands are fire-and-forget advisory ─────────────────────

#[test]
fn commands_while_disconnected_produce_no_output_and_no_error() {
    let (session, factory, _) = make_session(true);

    session.ptt_down();
    session.ptt_up();
    session.set_frequency(156.800, 156.800);
    session.set_volume(5);
    session.set_squelch(2);
    session.request_status();
    session.recover();
    session.report_position(48.85, 2.35);

    assert_eq!(factory.open_count(), 0, "no link must ever be opened");
}

#[test]
fn command_shorthands_map_to_the_fixed_line_formats() {
    let (session, factory, _) = make_session(true);
    session.connect(pico());

    session.set_frequency(156.800, 156.800);
    session.report_position(48.85, 2.35);
    session.set_volume(7);
    session.set_squelch(3);
    session.request_status();
    session.recover();
    session.ptt_down();
    session.ptt_up();

    assert_eq!(
        factory.link(0).written_lines(),
        [
            "INIT",
            "SAFE TXTO=2500 IDLE=30000",
            "FREQ 156.800 156.800",
            "GPS 48.85 2.35",
            "VOL 7",
            "SQL 3",
            "STATUS",
            "RECOVER",
            "PTT 1",
            "PTT 0",
        ],
    );
}

// ── Permission negotiation ────────────────────────────────────

#[test]
fn missing_permission_defers_the_connect_until_granted() {
    let (session, factory, authority) = make_session(false);

    session.request_connect(pico());

    assert_eq!(session.state(), SessionState::PermissionPending);
    assert_eq!(factory.open_count(), 0);
    assert_eq!(authority.requests.lock().unwrap().as_slice(), &[pico()]);

    session.on_permission_result(pico(), true);

    assert!(session.is_connected());
    assert_eq!(factory.open_count(), 1);
}

#[test]
fn denied_permission_is_a_no_op() {
    let (session, factory, _) = make_session(false);

    session.request_connect(pico());
    session.on_permission_result(pico(), false);

    assert_eq!(session.state(), SessionState::PermissionPending);
    assert_eq!(factory.open_count(), 0);
}

#[test]
fn grant_for_a_different_handle_is_ignored() {
    let (session, factory, _) = make_session(false);

    session.request_connect(pico());
    session.on_permission_result(DeviceHandle::new("/dev/ttyUSB7", "other"), true);

    assert_eq!(session.state(), SessionState::PermissionPending);
    assert_eq!(factory.open_count(), 0);
}

#[test]
fn stray_grant_without_a_pending_request_is_ignored() {
    let (session, factory, _) = make_session(false);

    session.on_permission_result(pico(), true);

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(factory.open_count(), 0);
}

// ── Disconnect and detach ─────────────────────────────────────

#[test]
fn disconnect_is_idempotent() {
    let (session, factory, _) = make_session(true);
    let mut events = session.subscribe();

    session.connect(pico());
    session.disconnect();
    session.disconnect();
    session.disconnect();

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(factory.link(0).closed());

    let down_reports = drain_statuses(&mut events)
        .iter()
        .filter(|text| text.as_str() == "USB déconnecté")
        .count();
    assert_eq!(down_reports, 1, "repeated disconnects must not re-report");
}

#[test]
fn detach_of_the_connected_handle_disconnects_immediately() {
    let (session, factory, _) = make_session(true);
    session.connect(pico());

    session.on_device_detached(&DeviceHandle::new("/dev/ttyUSB7", "other"));
    assert!(session.is_connected(), "unrelated detach must be ignored");

    session.on_device_detached(&pico());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(factory.link(0).closed());
}

// ── Inbound status lines ──────────────────────────────────────

#[test]
fn last_status_line_is_the_latest_complete_line() {
    let (session, factory, _) = make_session(true);
    session.connect(pico());

    assert_eq!(session.last_status_line(), None, "nothing received yet");

    {
        let link = factory.link(0);
        let mut reads = link.reads.lock().unwrap();
        reads.push_back(b"STATUS ".to_vec());
        reads.push_back(b"OK\r\n".to_vec());
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if session.last_status_line().as_deref() == Some("STATUS OK") {
            break;
        }
        assert!(Instant::now() < deadline, "timed out waiting for the status line");
        thread::sleep(Duration::from_millis(5));
    }

    session.disconnect();
}

#[test]
fn state_changes_are_published_to_subscribers() {
    let (session, _, _) = make_session(true);
    let mut events = session.subscribe();

    session.connect(pico());
    session.disconnect();

    let mut states = Vec::new();
    while let Ok(Some(event)) = events.try_next() {
        if let SessionEvent::StateChange(state) = event {
            states.push(state);
        }
    }

    assert_eq!(
        states,
        [
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Disconnected,
        ],
    );
}
