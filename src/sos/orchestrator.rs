//! The emergency flow: position, retune, report, transmit.
//!
//! One SOS trigger runs as a single sequential chain (permission gate,
//! one-shot fix, radio commands, voice transmission) with the key-up
//! guaranteed on every path out of the transmit window.

use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::device::session::RadioCommands;
use crate::telemetry::heart_rate::HeartRateCell;
use crate::telemetry::location::{FixOutcome, LocationProvider, PositionFix};
use crate::voice::VoiceEngine;

/**
 * Marine VHF channel 16 (distress), in MHz. The Pico is retuned here for
 * both transmit and receive before anything else happens.
 */
pub const EMERGENCY_FREQ_MHZ: f64 = 156.800;

const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SosPhase {
    Idle,
    AwaitingPosition,
    Transmitting,
    TestComplete,
    Complete,
    Failed,
}

#[derive(Debug, Clone)]
pub enum SosEvent {
    Phase(SosPhase),
    Status(String),
}

/// Hand a number to the platform dialer.
pub trait Dialer: Send + Sync {
    fn dial(&self, number: &str);
}

/// Hand a prepared text to the platform share mechanism.
pub trait ShareSink: Send + Sync {
    fn share(&self, text: &str);
}

/// Coarse region allowlist; not a complete international mapping.
pub fn emergency_number(region: &str) -> &'static str {
    match region.to_ascii_uppercase().as_str() {
        "US" | "CA" | "MX" => "911",
        _ => "112",
    }
}

/// The spoken distress message, recomputed fresh for every transmission.
pub fn emergency_message(fix: &PositionFix, bpm: Option<u16>) -> String {
    match bpm {
        Some(bpm) => format!(
            "Urgence. Position GPS. Latitude {}. Longitude {}. Fréquence cardiaque {} battements par minute.",
            fix.latitude, fix.longitude, bpm,
        ),
        None => format!(
            "Urgence. Position GPS. Latitude {}. Longitude {}.",
            fix.latitude, fix.longitude,
        ),
    }
}

/// Shareable text variant of the distress message.
pub fn share_text(fix: &PositionFix, bpm: Option<u16>) -> String {
    match bpm {
        Some(bpm) => format!(
            "URGENT. Position GPS: {}, {}. FC: {} bpm.",
            fix.latitude, fix.longitude, bpm,
        ),
        None => format!("URGENT. Position GPS: {}, {}.", fix.latitude, fix.longitude),
    }
}

pub struct EmergencyOrchestrator {
    radio: Arc<dyn RadioCommands>,
    location: Arc<dyn LocationProvider>,
    voice: Arc<dyn VoiceEngine>,
    heart_rate: HeartRateCell,
    phase: Mutex<SosPhase>,
    last_fix: Mutex<Option<PositionFix>>,
    senders: Mutex<Vec<Sender<SosEvent>>>,
}

impl EmergencyOrchestrator {
    pub fn new(
        radio: Arc<dyn RadioCommands>,
        location: Arc<dyn LocationProvider>,
        voice: Arc<dyn VoiceEngine>,
        heart_rate: HeartRateCell,
    ) -> Self {
        EmergencyOrchestrator {
            radio,
            location,
            voice,
            heart_rate,
            phase: Mutex::new(SosPhase::Idle),
            last_fix: Mutex::new(None),
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<SosEvent> {
        let (sender, receiver) = channel::<SosEvent>(EVENT_CHANNEL_SIZE);
        self.senders.lock().expect("Failed to lock sos senders").push(sender);
        receiver
    }

    pub fn phase(&self) -> SosPhase {
        *self.phase.lock().expect("Failed to lock sos phase")
    }

    /// Last fix obtained by any flow; kept for UI reuse only.
    pub fn last_known_fix(&self) -> Option<PositionFix> {
        *self.last_fix.lock().expect("Failed to lock last fix")
    }

    fn broadcast(&self, event: SosEvent) {
        let mut senders = self.senders.lock().expect("Failed to lock sos senders");
        senders.retain_mut(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(err) if err.is_disconnected() => false,
            Err(_) => {
                warn!("Dropping sos event, subscriber is not keeping up");
                true
            },
        });
    }

    fn set_phase(&self, phase: SosPhase) {
        {
            let mut slot = self.phase.lock().expect("Failed to lock sos phase");
            *slot = phase;
        }
        self.broadcast(SosEvent::Phase(phase));
    }

    fn status(&self, text: &str) {
        info!("{}", text);
        self.broadcast(SosEvent::Status(text.to_string()));
    }

    fn latest_bpm(&self) -> Option<u16> {
        *self.heart_rate.lock().expect("Failed to lock heart rate cell")
    }

    /// Run one confirmed SOS trigger to completion. The confirmation step
    /// (normal vs test mode) happens in the caller's UI before this.
    pub async fn trigger_sos(&self, test_mode: bool) {
        if !self.radio.is_connected() {
            self.status("USB non connecté");
            return;
        }

        if !self.location.has_permission() {
            self.status("Autoriser la localisation pour SOS");
            self.location.request_permission();
            return;
        }

        self.set_phase(SosPhase::AwaitingPosition);
        self.status(if test_mode {
            "TEST: récupération GPS…"
        } else {
            "SOS: récupération GPS…"
        });

        let fix_cancel = CancellationToken::new();
        let outcome = self.location.request_fix(fix_cancel.clone()).await;

        let fix = match outcome {
            Ok(FixOutcome::Fix(fix)) => fix,
            Ok(FixOutcome::Unavailable) => {
                self.status("SOS: GPS indisponible");
                self.set_phase(SosPhase::Failed);
                self.set_phase(SosPhase::Idle);
                return;
            },
            Ok(FixOutcome::Error(err)) => {
                warn!("Location fix failed: {}", err);
                self.status("SOS: erreur GPS");
                self.set_phase(SosPhase::Failed);
                self.set_phase(SosPhase::Idle);
                return;
            },
            Err(_dropped) => {
                self.status("SOS: erreur GPS");
                self.set_phase(SosPhase::Failed);
                self.set_phase(SosPhase::Idle);
                return;
            },
        };

        {
            let mut slot = self.last_fix.lock().expect("Failed to lock last fix");
            *slot = Some(fix);
        }

        // Both modes retune to the distress channel and report the position.
        self.radio.set_frequency(EMERGENCY_FREQ_MHZ, EMERGENCY_FREQ_MHZ);
        self.radio.report_position(fix.latitude, fix.longitude);

        if test_mode {
            self.status("TEST: GPS envoyé (sans émission)");
            self.set_phase(SosPhase::TestComplete);
            self.set_phase(SosPhase::Idle);
            return;
        }

        let message = emergency_message(&fix, self.latest_bpm());
        self.status("SOS: émission…");
        self.set_phase(SosPhase::Transmitting);

        self.radio.ptt_down();
        let done = self.voice.speak(&message);
        // success, engine error, or a dropped engine all close the window;
        // a stuck key is worse than a truncated message
        let _ = done.await;
        self.radio.ptt_up();

        self.status("SOS envoyé");
        self.set_phase(SosPhase::Complete);
        self.set_phase(SosPhase::Idle);
    }

    /// Resolve the regional emergency number and hand it to the dialer.
    /// Never touches the radio.
    pub fn call_emergency(&self, region: &str, dialer: &dyn Dialer) -> &'static str {
        let number = emergency_number(region);
        dialer.dial(number);
        self.status(&format!("Appel urgences: {}", number));
        number
    }

    /// Same permission-then-fix sequence as SOS, but the result is a
    /// shareable text. Never touches the radio.
    pub async fn share_emergency(&self, sink: &dyn ShareSink) {
        if !self.location.has_permission() {
            self.status("Autoriser la localisation pour partager");
            self.location.request_permission();
            return;
        }

        let fix_cancel = CancellationToken::new();
        let outcome = self.location.request_fix(fix_cancel.clone()).await;

        let fix = match outcome {
            Ok(FixOutcome::Fix(fix)) => fix,
            Ok(FixOutcome::Unavailable) => {
                self.status("Partage: GPS indisponible");
                return;
            },
            Ok(FixOutcome::Error(err)) => {
                warn!("Location fix failed: {}", err);
                self.status("Partage: erreur GPS");
                return;
            },
            Err(_dropped) => {
                self.status("Partage: erreur GPS");
                return;
            },
        };

        {
            let mut slot = self.last_fix.lock().expect("Failed to lock last fix");
            *slot = Some(fix);
        }

        let text = share_text(&fix, self.latest_bpm());
        sink.share(&text);
        self.status("Message prêt à partager");
    }
}
