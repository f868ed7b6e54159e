//! Pure reconnection state machine
//!
//! `transition(state, input, policy) -> (state, effects)` decides every
//! connection lifecycle step. No IO, no timers, no async: the session actor
//! executes the returned effects.

use std::time::Duration;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Idle,
    /// A connection attempt is in flight. `attempt` is 0 for the first try
    /// and the retry number otherwise.
    Connecting { attempt: u32 },
    Connected,
    /// Waiting for the retry delay before attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// Retries exhausted; only a manual reconnect leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Connected or still working towards a connection.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting { .. }
                | ConnectionState::Connected
                | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn attempt(&self) -> u32 {
        match self {
            ConnectionState::Connecting { attempt } | ConnectionState::Reconnecting { attempt } => {
                *attempt
            }
            _ => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Automatic retries after a failure. Zero fails immediately.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Linear growth (`base × attempt`), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Input / Effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// `connect()` from a consumer or a deferred connect.
    ConnectRequested,
    /// The handshake of the current attempt completed.
    Established,
    /// Transport error, protocol error, or unexpected close.
    ConnectionLost,
    /// The scheduled retry delay elapsed.
    RetryDue,
    /// Deliberate `disconnect()`.
    DisconnectRequested,
    /// Manual `reconnect()`.
    ManualReconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start a fresh connection attempt (full handshake and subscriptions).
    OpenConnection,
    /// Abort any in-flight attempt and close the current link.
    CloseConnection,
    /// Run the on-connect procedure on the established link.
    Activate,
    ScheduleRetry { attempt: u32, delay: Duration },
    CancelRetry,
    /// Automatic retries are used up.
    Exhausted,
}

// ---------------------------------------------------------------------------
// transition
// ---------------------------------------------------------------------------

pub fn transition(
    state: ConnectionState,
    input: Input,
    policy: &ReconnectPolicy,
) -> (ConnectionState, Vec<Effect>) {
    use ConnectionState::*;

    match (state, input) {
        // -- Deliberate control ------------------------------------------------
        (_, Input::DisconnectRequested) => (Idle, vec![Effect::CancelRetry, Effect::CloseConnection]),
        (_, Input::ManualReconnect) => (
            Connecting { attempt: 0 },
            vec![
                Effect::CancelRetry,
                Effect::CloseConnection,
                Effect::OpenConnection,
            ],
        ),

        // -- connect() ---------------------------------------------------------
        (Idle, Input::ConnectRequested) => (Connecting { attempt: 0 }, vec![Effect::OpenConnection]),
        (Failed, Input::ConnectRequested) => (
            Connecting { attempt: 0 },
            vec![Effect::CancelRetry, Effect::OpenConnection],
        ),
        (_, Input::ConnectRequested) => (state, vec![]),

        // -- Handshake results -------------------------------------------------
        (Connecting { .. }, Input::Established) => (Connected, vec![Effect::Activate]),
        // Nobody is waiting for this link any more (disconnect won the race).
        (_, Input::Established) => (state, vec![Effect::CloseConnection]),

        (Connecting { attempt }, Input::ConnectionLost) => schedule_retry(attempt + 1, policy),
        (Connected, Input::ConnectionLost) => {
            let (next, mut effects) = schedule_retry(1, policy);
            effects.insert(0, Effect::CloseConnection);
            (next, effects)
        }
        // Already waiting, failed, or deliberately idle.
        (_, Input::ConnectionLost) => (state, vec![]),

        // -- Timers --------------------------------------------------------------
        (Reconnecting { attempt }, Input::RetryDue) => {
            (Connecting { attempt }, vec![Effect::OpenConnection])
        }
        (_, Input::RetryDue) => (state, vec![]),
    }
}

fn schedule_retry(attempt: u32, policy: &ReconnectPolicy) -> (ConnectionState, Vec<Effect>) {
    if attempt > policy.max_attempts {
        return (ConnectionState::Failed, vec![Effect::Exhausted]);
    }
    (
        ConnectionState::Reconnecting { attempt },
        vec![Effect::ScheduleRetry {
            attempt,
            delay: policy.delay_for(attempt),
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }

    #[test]
    fn connect_from_idle_opens_once() {
        let (state, effects) = transition(ConnectionState::Idle, Input::ConnectRequested, &policy());
        assert_eq!(state, ConnectionState::Connecting { attempt: 0 });
        assert_eq!(effects, vec![Effect::OpenConnection]);

        let (same, effects) = transition(state, Input::ConnectRequested, &policy());
        assert_eq!(same, state);
        assert!(effects.is_empty());

        let (same, effects) =
            transition(ConnectionState::Connected, Input::ConnectRequested, &policy());
        assert_eq!(same, ConnectionState::Connected);
        assert!(effects.is_empty());
    }

    #[test]
    fn established_activates_and_resets_attempts() {
        let (state, effects) = transition(
            ConnectionState::Connecting { attempt: 3 },
            Input::Established,
            &policy(),
        );
        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(state.attempt(), 0);
        assert_eq!(effects, vec![Effect::Activate]);
    }

    #[test]
    fn lost_connection_schedules_first_retry() {
        let (state, effects) =
            transition(ConnectionState::Connected, Input::ConnectionLost, &policy());
        assert_eq!(state, ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(
            effects,
            vec![
                Effect::CloseConnection,
                Effect::ScheduleRetry {
                    attempt: 1,
                    delay: Duration::from_secs(1)
                }
            ]
        );
    }

    #[test]
    fn delay_grows_linearly_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(5), Duration::from_secs(3));
    }

    #[test]
    fn six_consecutive_failures_exhaust_the_budget() {
        let p = policy();
        let mut state = ConnectionState::Idle;
        let mut opens = 0;
        let mut exhausted = false;

        let (next, effects) = transition(state, Input::ConnectRequested, &p);
        state = next;
        opens += effects.iter().filter(|e| **e == Effect::OpenConnection).count();

        for _ in 0..6 {
            let (next, effects) = transition(state, Input::ConnectionLost, &p);
            state = next;
            if effects.contains(&Effect::Exhausted) {
                exhausted = true;
                break;
            }
            let (next, effects) = transition(state, Input::RetryDue, &p);
            state = next;
            opens += effects.iter().filter(|e| **e == Effect::OpenConnection).count();
        }

        assert!(exhausted);
        assert_eq!(state, ConnectionState::Failed);
        // Initial attempt plus five retries.
        assert_eq!(opens, 6);

        let (still, effects) = transition(state, Input::RetryDue, &p);
        assert_eq!(still, ConnectionState::Failed);
        assert!(effects.is_empty());
        let (still, effects) = transition(state, Input::ConnectionLost, &p);
        assert_eq!(still, ConnectionState::Failed);
        assert!(effects.is_empty());
    }

    #[test]
    fn manual_reconnect_leaves_failed_with_fresh_counter() {
        let (state, effects) =
            transition(ConnectionState::Failed, Input::ManualReconnect, &policy());
        assert_eq!(state, ConnectionState::Connecting { attempt: 0 });
        assert_eq!(
            effects,
            vec![
                Effect::CancelRetry,
                Effect::CloseConnection,
                Effect::OpenConnection
            ]
        );
    }

    #[test]
    fn disconnect_cancels_pending_retry() {
        let (state, effects) = transition(
            ConnectionState::Reconnecting { attempt: 2 },
            Input::DisconnectRequested,
            &policy(),
        );
        assert_eq!(state, ConnectionState::Idle);
        assert_eq!(effects, vec![Effect::CancelRetry, Effect::CloseConnection]);

        // A retry timer that already fired is ignored.
        let (state, effects) = transition(state, Input::RetryDue, &policy());
        assert_eq!(state, ConnectionState::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn late_establish_after_disconnect_is_closed() {
        let (state, effects) = transition(ConnectionState::Idle, Input::Established, &policy());
        assert_eq!(state, ConnectionState::Idle);
        assert_eq!(effects, vec![Effect::CloseConnection]);
    }

    #[test]
    fn zero_budget_fails_on_first_loss() {
        let p = ReconnectPolicy {
            max_attempts: 0,
            ..policy()
        };
        let (state, effects) = transition(ConnectionState::Connected, Input::ConnectionLost, &p);
        assert_eq!(state, ConnectionState::Failed);
        assert_eq!(effects, vec![Effect::CloseConnection, Effect::Exhausted]);
    }

    #[test]
    fn connect_request_restarts_from_failed() {
        let (state, effects) =
            transition(ConnectionState::Failed, Input::ConnectRequested, &policy());
        assert_eq!(state, ConnectionState::Connecting { attempt: 0 });
        assert!(effects.contains(&Effect::OpenConnection));
    }
}
