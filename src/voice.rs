use futures::channel::oneshot;
use log::info;

/// How the engine finished. An engine error still closes the transmit
/// window: the emergency flow treats both outcomes as "done speaking".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    Done,
    Error,
}

/// Speak a text aloud and report completion once, out-of-band. Platform
/// TTS engines implement this; the rendering itself is not our concern.
pub trait VoiceEngine: Send + Sync {
    fn speak(&self, text: &str) -> oneshot::Receiver<SpeechOutcome>;
}

/// Engine for hosts without a TTS stack: logs the utterance and completes
/// immediately.
pub struct LoggingVoice;

impl VoiceEngine for LoggingVoice {
    fn speak(&self, text: &str) -> oneshot::Receiver<SpeechOutcome> {
        let (sender, receiver) = oneshot::channel();
        info!("TTS: {}", text);
        let _ = sender.send(SpeechOutcome::Done);
        receiver
    }
}
