//! STOMP session over one transport link: handshake, heart-beats, framing.

use std::collections::VecDeque;
use std::time::Duration;

use consultline_protocol::stomp::{HEARTBEAT, SUBPROTOCOLS};
use consultline_protocol::{decode_frames, Frame, HeartBeat, StompCommand};
use tokio::time::{interval_at, sleep_until, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::transport::{ConnectRequest, Link, Transport};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub(crate) struct StompLink {
    session_id: String,
    link: Box<dyn Link>,
    pending: VecDeque<Frame>,
    heart_beat: HeartBeat,
    heartbeat_tick: Option<Interval>,
    last_inbound: Instant,
    next_subscription: u64,
}

/// Open a link and complete the STOMP handshake.
pub(crate) async fn open(
    transport: &dyn Transport,
    config: &SessionConfig,
    session_id: &str,
) -> Result<StompLink, SessionError> {
    let url = config.websocket_url();
    let mut request = ConnectRequest::new(url.clone()).header("Sec-WebSocket-Protocol", SUBPROTOCOLS);
    if let Some(token) = &config.auth_token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }

    let mut link = transport.open(request).await?;

    let offer = config.settings.heart_beat();
    let connect = Frame::connect(host_of(&url), offer, config.auth_token.as_deref());
    if let Err(e) = link.send_text(connect.encode()).await {
        link.close().await;
        return Err(e.into());
    }

    let handshake = await_connected(link.as_mut());
    let outcome = match config.settings.handshake_timeout {
        Some(limit) => timeout(limit, handshake)
            .await
            .unwrap_or(Err(SessionError::HandshakeTimeout(limit))),
        None => handshake.await,
    };

    let (connected, pending) = match outcome {
        Ok(result) => result,
        Err(e) => {
            link.close().await;
            return Err(e);
        }
    };

    let server = connected
        .get("heart-beat")
        .and_then(HeartBeat::parse)
        .unwrap_or_default();
    let heart_beat = HeartBeat::negotiate(offer, server);

    debug!(
        component = "stomp",
        event = "stomp.handshake.completed",
        session_id = %session_id,
        version = connected.get("version").unwrap_or("1.0"),
        heart_beat = %heart_beat.header_value(),
        "STOMP session established"
    );

    let heartbeat_tick = (!heart_beat.outgoing.is_zero()).then(|| {
        let mut tick = interval_at(Instant::now() + heart_beat.outgoing, heart_beat.outgoing);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick
    });

    Ok(StompLink {
        session_id: session_id.to_string(),
        link,
        pending,
        heart_beat,
        heartbeat_tick,
        last_inbound: Instant::now(),
        next_subscription: 0,
    })
}

/// Wait for `CONNECTED`. Frames batched after it are handed back.
async fn await_connected(link: &mut dyn Link) -> Result<(Frame, VecDeque<Frame>), SessionError> {
    loop {
        let text = match link.recv_text().await {
            Some(text) => text?,
            None => return Err(SessionError::HandshakeClosed),
        };
        let mut frames: VecDeque<Frame> = decode_frames(&text)
            .map_err(|e| SessionError::Frame(e.to_string()))?
            .into();
        let Some(first) = frames.pop_front() else {
            continue;
        };
        return match first.command {
            StompCommand::Connected => Ok((first, frames)),
            StompCommand::Error => Err(SessionError::from_error_frame(&first)),
            other => Err(SessionError::UnexpectedFrame(other.to_string())),
        };
    }
}

impl StompLink {
    pub(crate) fn heart_beat(&self) -> HeartBeat {
        self.heart_beat
    }

    /// Next inbound frame. Heart-beats are absorbed and outgoing heart-beats
    /// are sent while waiting. Any error means the link is dead.
    pub(crate) async fn next_frame(&mut self) -> Result<Frame, SessionError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }

            let deadline = (!self.heart_beat.incoming.is_zero())
                .then(|| self.last_inbound + self.heart_beat.incoming * 2);

            tokio::select! {
                biased;
                inbound = self.link.recv_text() => {
                    let text = match inbound {
                        Some(text) => text?,
                        None => return Err(SessionError::Closed),
                    };
                    self.last_inbound = Instant::now();
                    match decode_frames(&text) {
                        Ok(frames) => self.pending.extend(frames),
                        Err(e) => warn!(
                            component = "stomp",
                            event = "stomp.frame.malformed",
                            session_id = %self.session_id,
                            error = %e,
                            "Dropping malformed STOMP frame"
                        ),
                    }
                }
                _ = tick(&mut self.heartbeat_tick) => {
                    self.link.send_text(HEARTBEAT.to_string()).await?;
                }
                _ = expire(deadline) => {
                    return Err(SessionError::HeartbeatTimeout(self.heart_beat.incoming * 2));
                }
            }
        }
    }

    /// Subscribe with a fresh subscription id.
    pub(crate) async fn subscribe(&mut self, destination: &str) -> Result<String, SessionError> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.send(&Frame::subscribe(id.clone(), destination)).await?;
        Ok(id)
    }

    pub(crate) async fn send(&mut self, frame: &Frame) -> Result<(), SessionError> {
        self.link.send_text(frame.encode()).await?;
        Ok(())
    }

    /// Polite close: DISCONNECT, then close the link. Bounded so a stuck
    /// peer cannot stall teardown.
    pub(crate) async fn close(mut self) {
        let link = &mut self.link;
        let polite = async {
            let _ = link.send_text(Frame::disconnect().encode()).await;
            link.close().await;
        };
        if timeout(CLOSE_GRACE, polite).await.is_err() {
            debug!(
                component = "stomp",
                event = "stomp.close.timed_out",
                session_id = %self.session_id,
                "Link close timed out"
            );
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Authority part of a URL, used as the STOMP `host` header.
fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    &rest[..end]
}
