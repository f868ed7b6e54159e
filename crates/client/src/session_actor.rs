//! Session actor: owns the STOMP link and drives the reconnection machine.
//!
//! Commands, attempt results, timer expiries, and inbound frames are handled
//! one at a time on a single task, so session state never needs a lock.
//! Connection attempts and timers run as separate tasks tagged with ids; a
//! result whose id is no longer current is discarded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use consultline_protocol::destinations::{subscription_topics, ANNOUNCE_DESTINATION};
use consultline_protocol::{Frame, PresenceAnnouncement, StompCommand};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::decoder;
use crate::error::SessionError;
use crate::listener::{ListenerSet, SessionEvent};
use crate::reconnect::{transition, ConnectionState, Effect, Input};
use crate::session_command::{AttemptOutcome, DeferredAction, SessionCommand, TimerFired};
use crate::stomp_link::{self, StompLink};
use crate::transport::Transport;

pub(crate) struct SessionActor {
    id: String,
    transport: Arc<dyn Transport>,
    config: Arc<ArcSwap<SessionConfig>>,
    listeners: Arc<ListenerSet>,
    events: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<ConnectionState>,

    state: ConnectionState,
    link: Option<StompLink>,
    /// True between `on_connect` and the matching `on_disconnect`.
    connected_notified: bool,

    attempt: Option<(u64, JoinHandle<()>)>,
    next_attempt_id: u64,
    attempt_tx: mpsc::UnboundedSender<AttemptOutcome>,
    attempt_rx: mpsc::UnboundedReceiver<AttemptOutcome>,

    timer: Option<(u64, CancellationToken)>,
    next_timer_id: u64,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
}

impl SessionActor {
    pub(crate) fn new(
        id: String,
        transport: Arc<dyn Transport>,
        config: Arc<ArcSwap<SessionConfig>>,
        listeners: Arc<ListenerSet>,
        events: broadcast::Sender<SessionEvent>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            id,
            transport,
            config,
            listeners,
            events,
            state_tx,
            state: ConnectionState::Idle,
            link: None,
            connected_notified: false,
            attempt: None,
            next_attempt_id: 0,
            attempt_tx,
            attempt_rx,
            timer: None,
            next_timer_id: 0,
            timer_tx,
            timer_rx,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        debug!(
            component = "session_actor",
            event = "session.actor.started",
            session_id = %self.id,
            "Session actor started"
        );

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(outcome) = self.attempt_rx.recv() => self.handle_attempt(outcome).await,
                Some(fired) = self.timer_rx.recv() => self.handle_timer(fired).await,
                inbound = next_frame(&mut self.link) => self.handle_inbound(inbound).await,
            }
        }

        debug!(
            component = "session_actor",
            event = "session.actor.stopped",
            session_id = %self.id,
            "Session actor stopped"
        );
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => self.apply(Input::ConnectRequested).await,
            SessionCommand::Disconnect => self.apply(Input::DisconnectRequested).await,
            SessionCommand::Reconnect => self.apply(Input::ManualReconnect).await,
            SessionCommand::ConfigUpdated { link_changed } => {
                if link_changed && self.state.is_connected() {
                    let delay = self.config.load().settings.credential_refresh_delay;
                    info!(
                        component = "session_actor",
                        event = "session.config.cycled",
                        session_id = %self.id,
                        delay_ms = delay.as_millis() as u64,
                        "Endpoint, principal or credential changed, cycling connection"
                    );
                    self.apply(Input::DisconnectRequested).await;
                    self.arm_timer(delay, DeferredAction::Connect);
                }
            }
            // Handled by the run loop.
            SessionCommand::Shutdown { .. } => {}
        }
    }

    async fn handle_attempt(&mut self, outcome: AttemptOutcome) {
        let current = self.attempt.as_ref().map(|(id, _)| *id);
        if current != Some(outcome.attempt_id) {
            debug!(
                component = "session_actor",
                event = "session.attempt.discarded",
                session_id = %self.id,
                attempt_id = outcome.attempt_id,
                "Discarding stale connection attempt"
            );
            if let Ok(link) = outcome.result {
                link.close().await;
            }
            return;
        }
        self.attempt = None;

        match outcome.result {
            Ok(link) => {
                self.link = Some(link);
                self.apply(Input::Established).await;
            }
            Err(error) => {
                warn!(
                    component = "session_actor",
                    event = "session.connect.failed",
                    session_id = %self.id,
                    attempt = self.state.attempt(),
                    error = %error,
                    "Connection attempt failed"
                );
                self.notify_error(error);
                self.apply(Input::ConnectionLost).await;
            }
        }
    }

    async fn handle_timer(&mut self, fired: TimerFired) {
        let current = self.timer.as_ref().map(|(id, _)| *id);
        if current != Some(fired.timer_id) {
            return;
        }
        self.timer = None;
        match fired.action {
            DeferredAction::Retry => self.apply(Input::RetryDue).await,
            DeferredAction::Connect => self.apply(Input::ConnectRequested).await,
        }
    }

    async fn handle_inbound(&mut self, inbound: Result<Frame, SessionError>) {
        match inbound {
            Ok(frame) => match frame.command {
                StompCommand::Message => {
                    decoder::dispatch(&self.id, &frame, &self.listeners, &self.events);
                }
                StompCommand::Error => {
                    let error = SessionError::from_error_frame(&frame);
                    warn!(
                        component = "session_actor",
                        event = "session.broker.error",
                        session_id = %self.id,
                        error = %error,
                        "Broker sent ERROR"
                    );
                    self.notify_error(error);
                    self.apply(Input::ConnectionLost).await;
                }
                other => {
                    debug!(
                        component = "session_actor",
                        event = "session.frame.ignored",
                        session_id = %self.id,
                        command = %other,
                        "Ignoring frame"
                    );
                }
            },
            Err(error) => {
                warn!(
                    component = "session_actor",
                    event = "session.link.lost",
                    session_id = %self.id,
                    error = %error,
                    "Connection lost"
                );
                self.notify_error(error);
                self.apply(Input::ConnectionLost).await;
            }
        }
    }

    // -- State machine ------------------------------------------------------

    async fn apply(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            let policy = self.config.load().settings.reconnect;
            let (next, effects) = transition(self.state, input, &policy);
            self.set_state(next);
            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::OpenConnection => {
                self.start_attempt().await;
                None
            }
            Effect::CloseConnection => {
                self.close_link().await;
                None
            }
            Effect::Activate => self.activate().await.err().map(|error| {
                warn!(
                    component = "session_actor",
                    event = "session.activate.failed",
                    session_id = %self.id,
                    error = %error,
                    "Subscribing after connect failed"
                );
                self.notify_error(error);
                Input::ConnectionLost
            }),
            Effect::ScheduleRetry { attempt, delay } => {
                info!(
                    component = "session_actor",
                    event = "session.retry.scheduled",
                    session_id = %self.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.arm_timer(delay, DeferredAction::Retry);
                None
            }
            Effect::CancelRetry => {
                self.cancel_timer();
                None
            }
            Effect::Exhausted => {
                warn!(
                    component = "session_actor",
                    event = "session.retry.exhausted",
                    session_id = %self.id,
                    "Reconnect attempts exhausted, giving up until reconnect()"
                );
                None
            }
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        debug!(
            component = "session_actor",
            event = "session.state.changed",
            session_id = %self.id,
            from = self.state.label(),
            to = next.label(),
            attempt = next.attempt(),
            "Connection state changed"
        );
        self.state = next;
        self.state_tx.send_replace(next);
        self.listeners.each(|listener| listener.on_state_change(next));
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    // -- Effects ------------------------------------------------------------

    async fn start_attempt(&mut self) {
        self.abort_attempt().await;
        self.next_attempt_id += 1;
        let attempt_id = self.next_attempt_id;

        let transport = self.transport.clone();
        let config = self.config.load_full();
        let session_id = self.id.clone();
        let tx = self.attempt_tx.clone();

        info!(
            component = "session_actor",
            event = "session.connect.started",
            session_id = %self.id,
            attempt = self.state.attempt(),
            url = %config.websocket_url(),
            "Connecting"
        );

        let handle = tokio::spawn(async move {
            let result = stomp_link::open(transport.as_ref(), &config, &session_id).await;
            let _ = tx.send(AttemptOutcome { attempt_id, result });
        });
        self.attempt = Some((attempt_id, handle));
    }

    /// Abort the in-flight attempt and wait until its link is dropped.
    async fn abort_attempt(&mut self) {
        if let Some((_, handle)) = self.attempt.take() {
            handle.abort();
            let _ = handle.await;
        }
        // Outcomes already queued belong to attempts nobody wants any more.
        while let Ok(outcome) = self.attempt_rx.try_recv() {
            if let Ok(link) = outcome.result {
                link.close().await;
            }
        }
    }

    async fn close_link(&mut self) {
        self.abort_attempt().await;
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        if std::mem::take(&mut self.connected_notified) {
            info!(
                component = "session_actor",
                event = "session.disconnected",
                session_id = %self.id,
                "Disconnected"
            );
            self.listeners.each(|listener| listener.on_disconnect());
            let _ = self.events.send(SessionEvent::Disconnected);
        }
    }

    async fn activate(&mut self) -> Result<(), SessionError> {
        let config = self.config.load_full();
        let link = self.link.as_mut().ok_or(SessionError::Closed)?;
        let topics = subscribe_and_announce(link, &config).await?;

        info!(
            component = "session_actor",
            event = "session.connected",
            session_id = %self.id,
            principal_id = config.principal.id,
            role = %config.principal.role,
            topics = ?topics,
            "Connected"
        );
        self.connected_notified = true;
        self.listeners.each(|listener| listener.on_connect());
        let _ = self.events.send(SessionEvent::Connected);
        Ok(())
    }

    fn arm_timer(&mut self, delay: Duration, action: DeferredAction) {
        self.cancel_timer();
        self.next_timer_id += 1;
        let timer_id = self.next_timer_id;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.timer_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(TimerFired { timer_id, action });
                }
            }
        });
        self.timer = Some((timer_id, token));
    }

    fn cancel_timer(&mut self) {
        if let Some((_, token)) = self.timer.take() {
            token.cancel();
        }
    }

    fn notify_error(&self, error: SessionError) {
        self.listeners.each(|listener| listener.on_error(&error));
        let _ = self.events.send(SessionEvent::Error(Arc::new(error)));
    }

    async fn teardown(&mut self) {
        self.apply(Input::DisconnectRequested).await;
    }
}

/// Subscribe every routed topic and send the presence announcement.
async fn subscribe_and_announce(
    link: &mut StompLink,
    config: &SessionConfig,
) -> Result<Vec<String>, SessionError> {
    let principal = config.principal;
    let topics = subscription_topics(principal.role, principal.id);
    for topic in &topics {
        link.subscribe(topic).await?;
    }

    let announcement = PresenceAnnouncement::now(principal.id, principal.role);
    let body = serde_json::to_string(&announcement).map_err(|e| SessionError::Frame(e.to_string()))?;
    link.send(&Frame::send_json(ANNOUNCE_DESTINATION, body)).await?;
    Ok(topics)
}

async fn next_frame(link: &mut Option<StompLink>) -> Result<Frame, SessionError> {
    match link {
        Some(link) => link.next_frame().await,
        None => std::future::pending().await,
    }
}
