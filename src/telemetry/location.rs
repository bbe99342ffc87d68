use futures::channel::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// Result of a one-shot fix request. A missing permission is reported
/// before the request is ever made, so it does not appear here.
#[derive(Debug, Clone)]
pub enum FixOutcome {
    Fix(PositionFix),
    Unavailable,
    Error(String),
}

/// One-shot current-position provider. The platform implementation wraps
/// whatever high-accuracy fetch the OS offers; the caller may abandon an
/// in-flight request through the cancellation token.
pub trait LocationProvider: Send + Sync {
    fn has_permission(&self) -> bool;

    /// Ask the platform for the permission. The grant lands out-of-band;
    /// the triggering flow must be re-run afterwards.
    fn request_permission(&self);

    fn request_fix(&self, cancel: CancellationToken) -> oneshot::Receiver<FixOutcome>;
}

/// Fixed coordinates supplied up front (command line or config). Stands in
/// for the platform provider on hosts without a positioning service.
pub struct ManualLocation {
    fix: Option<PositionFix>,
}

impl ManualLocation {
    pub fn new(fix: Option<PositionFix>) -> Self {
        ManualLocation { fix }
    }
}

impl LocationProvider for ManualLocation {
    fn has_permission(&self) -> bool {
        true
    }

    fn request_permission(&self) {}

    fn request_fix(&self, _cancel: CancellationToken) -> oneshot::Receiver<FixOutcome> {
        let (sender, receiver) = oneshot::channel();

        let outcome = match self.fix {
            Some(fix) => FixOutcome::Fix(fix),
            None => FixOutcome::Unavailable,
        };
        let _ = sender.send(outcome);

        receiver
    }
}
