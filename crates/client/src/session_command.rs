//! Messages consumed by the session actor.

use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::stomp_link::StompLink;

/// A command sent from a `Session` handle.
pub(crate) enum SessionCommand {
    // -- Lifecycle (fire-and-forget) --
    Connect,
    Disconnect,
    Reconnect,

    /// The shared config was already merged by the handle.
    ConfigUpdated { link_changed: bool },

    // -- Teardown --
    /// Close the link, stop the actor, then reply.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Result of a spawned connection attempt, tagged with the attempt id so the
/// actor can discard attempts it no longer wants.
pub(crate) struct AttemptOutcome {
    pub attempt_id: u64,
    pub result: Result<StompLink, SessionError>,
}

/// What a deferred timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeferredAction {
    /// Reconnection back-off elapsed.
    Retry,
    /// Delayed connect after a credential change.
    Connect,
}

pub(crate) struct TimerFired {
    pub timer_id: u64,
    pub action: DeferredAction,
}
