//! In-memory broker, collaborator and recording listener for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use consultline_protocol::destinations::{consultant_topic, user_topic, ANNOUNCE_DESTINATION};
use consultline_protocol::stomp::HEARTBEAT;
use consultline_protocol::{
    decode_frames, group_by_sender, AnswerSubmission, CancelRequest, Consultation,
    ConsultationEdit, ConsultationId, ConsultationStatus, Frame, GroupedConsultationThread,
    NewConsultation, NotificationEnvelope, Page, Principal, PrincipalId, PrincipalRef, Role,
    StompCommand,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::api::{ApiError, ConsultationApi, SenderQuery};
use crate::config::{SessionConfig, TransportSettings};
use crate::error::{SessionError, TransportError};
use crate::listener::SessionListener;
use crate::reconnect::{ConnectionState, ReconnectPolicy};
use crate::transport::{ConnectRequest, Link, Transport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn test_config(id: PrincipalId, role: Role, token: Option<&str>) -> SessionConfig {
    SessionConfig::new(
        "http://broker.test",
        Principal::new(id, role),
        token.map(str::to_string),
    )
}

/// Short retry delays so paused-clock tests stay quick.
pub(crate) fn fast_settings() -> TransportSettings {
    TransportSettings {
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_attempts: 5,
        },
        credential_refresh_delay: Duration::from_millis(200),
        ..TransportSettings::default()
    }
}

pub(crate) fn notification_body(kind: &str, data: Value) -> String {
    json!({
        "type": kind,
        "message": format!("{kind} notification"),
        "data": data,
        "timestamp": "2025-03-01T10:05:00Z",
    })
    .to_string()
}

fn sent_at_for(id: ConsultationId) -> String {
    format!("2025-01-01T{:02}:{:02}:00", (id / 60) % 24, id % 60)
}

pub(crate) fn consultation(
    id: ConsultationId,
    sender_id: PrincipalId,
    consultant_id: PrincipalId,
    status: ConsultationStatus,
) -> Consultation {
    Consultation {
        id,
        sender: PrincipalRef::id_only(sender_id),
        consultant: PrincipalRef::id_only(consultant_id),
        title: format!("question {id}"),
        content: "content".to_string(),
        answer: (status == ConsultationStatus::Answered).then(|| "answer".to_string()),
        status,
        sent_at: sent_at_for(id),
        sender_updated_at: None,
        answered_at: None,
        consultant_updated_at: None,
        resolution_notes: None,
    }
}

/// Poll `check` until it holds. Paused-clock tests advance time while
/// sleeping here.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

// ---------------------------------------------------------------------------
// Recording listener
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) enum Recorded {
    Connect,
    Disconnect,
    Error(SessionError),
    Notification(NotificationEnvelope),
    State(ConnectionState),
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    log: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    fn collect<T>(&self, f: impl Fn(&Recorded) -> Option<T>) -> Vec<T> {
        lock(&self.log).iter().filter_map(f).collect()
    }

    pub(crate) fn connects(&self) -> usize {
        self.collect(|r| matches!(r, Recorded::Connect).then_some(())).len()
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.collect(|r| matches!(r, Recorded::Disconnect).then_some(())).len()
    }

    pub(crate) fn errors(&self) -> Vec<SessionError> {
        self.collect(|r| match r {
            Recorded::Error(e) => Some(e.clone()),
            _ => None,
        })
    }

    pub(crate) fn notifications(&self) -> Vec<NotificationEnvelope> {
        self.collect(|r| match r {
            Recorded::Notification(n) => Some(n.clone()),
            _ => None,
        })
    }

    pub(crate) fn states(&self) -> Vec<ConnectionState> {
        self.collect(|r| match r {
            Recorded::State(s) => Some(*s),
            _ => None,
        })
    }

    pub(crate) fn position(&self, f: impl Fn(&Recorded) -> bool) -> Option<usize> {
        lock(&self.log).iter().position(f)
    }

    pub(crate) fn clear(&self) {
        lock(&self.log).clear();
    }

    fn record(&self, entry: Recorded) {
        lock(&self.log).push(entry);
    }
}

impl SessionListener for RecordingListener {
    fn on_connect(&self) {
        self.record(Recorded::Connect);
    }

    fn on_disconnect(&self) {
        self.record(Recorded::Disconnect);
    }

    fn on_error(&self, error: &SessionError) {
        self.record(Recorded::Error(error.clone()));
    }

    fn on_notification(&self, notification: &NotificationEnvelope) {
        self.record(Recorded::Notification(notification.clone()));
    }

    fn on_state_change(&self, state: ConnectionState) {
        self.record(Recorded::State(state));
    }
}

// ---------------------------------------------------------------------------
// In-memory STOMP broker
// ---------------------------------------------------------------------------

struct LinkEntry {
    inbound: mpsc::UnboundedSender<Result<String, TransportError>>,
    authorization: Option<String>,
    /// (subscription id, destination) in subscription order.
    subscriptions: Vec<(String, String)>,
}

struct BrokerState {
    refuse_all: bool,
    silent: bool,
    rejected_token: Option<String>,
    server_heart_beat: String,
    opens: usize,
    next_link: u64,
    next_message: u64,
    links: Vec<(u64, LinkEntry)>,
    max_live: usize,
    last_authorization: Option<String>,
    connect_frames: Vec<Frame>,
    sent_commands: Vec<StompCommand>,
    announcements: Vec<String>,
    heartbeats: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            refuse_all: false,
            silent: false,
            rejected_token: None,
            server_heart_beat: "0,0".to_string(),
            opens: 0,
            next_link: 0,
            next_message: 0,
            links: Vec::new(),
            max_live: 0,
            last_authorization: None,
            connect_frames: Vec::new(),
            sent_commands: Vec::new(),
            announcements: Vec::new(),
            heartbeats: 0,
        }
    }
}

impl BrokerState {
    fn link(&mut self, id: u64) -> Option<&mut LinkEntry> {
        self.links
            .iter_mut()
            .find(|(link_id, _)| *link_id == id)
            .map(|(_, entry)| entry)
    }

    fn release(&mut self, id: u64) {
        self.links.retain(|(link_id, _)| *link_id != id);
    }

    fn handle(&mut self, id: u64, text: &str) {
        let Ok(frames) = decode_frames(text) else {
            return;
        };
        if frames.is_empty() && text == HEARTBEAT {
            self.heartbeats += 1;
            return;
        }
        for frame in frames {
            self.sent_commands.push(frame.command);
            match frame.command {
                StompCommand::Connect | StompCommand::Stomp => self.answer_connect(id, frame),
                StompCommand::Subscribe => {
                    let sub_id = frame.get("id").unwrap_or_default().to_string();
                    let destination = frame.get("destination").unwrap_or_default().to_string();
                    if let Some(link) = self.link(id) {
                        link.subscriptions.push((sub_id, destination));
                    }
                }
                StompCommand::Send if frame.get("destination") == Some(ANNOUNCE_DESTINATION) => {
                    self.announcements.push(frame.body.clone());
                }
                _ => {}
            }
        }
    }

    fn answer_connect(&mut self, id: u64, frame: Frame) {
        let presented = frame
            .get("Authorization")
            .map(str::to_string)
            .or_else(|| self.link(id).and_then(|link| link.authorization.clone()));
        self.connect_frames.push(frame);
        if self.silent {
            return;
        }

        let rejected = self
            .rejected_token
            .as_ref()
            .is_some_and(|token| presented.as_deref() == Some(format!("Bearer {token}").as_str()));
        let reply = if rejected {
            Frame::new(StompCommand::Error)
                .header("message", "Invalid token")
                .with_body("credential rejected")
        } else {
            Frame::new(StompCommand::Connected)
                .header("version", "1.2")
                .header("heart-beat", self.server_heart_beat.clone())
        };
        if let Some(link) = self.link(id) {
            let _ = link.inbound.send(Ok(reply.encode()));
        }
    }
}

/// Scriptable broker implementing [`Transport`]. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        lock(&self.state)
    }

    /// Refuse every open at the transport level.
    pub(crate) fn set_refuse_all(&self, refuse: bool) {
        self.state().refuse_all = refuse;
    }

    /// Answer CONNECT with ERROR when it carries this token.
    pub(crate) fn reject_token(&self, token: Option<&str>) {
        self.state().rejected_token = token.map(str::to_string);
    }

    /// Never answer CONNECT.
    pub(crate) fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// `heart-beat` header value of CONNECTED (`sx,sy`).
    pub(crate) fn set_server_heart_beat(&self, value: &str) {
        self.state().server_heart_beat = value.to_string();
    }

    pub(crate) fn opens(&self) -> usize {
        self.state().opens
    }

    pub(crate) fn live(&self) -> usize {
        self.state().links.len()
    }

    pub(crate) fn max_live(&self) -> usize {
        self.state().max_live
    }

    pub(crate) fn last_authorization(&self) -> Option<String> {
        self.state().last_authorization.clone()
    }

    pub(crate) fn connect_frames(&self) -> Vec<Frame> {
        self.state().connect_frames.clone()
    }

    /// Destinations subscribed on live links.
    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.state()
            .links
            .iter()
            .flat_map(|(_, link)| link.subscriptions.iter().map(|(_, d)| d.clone()))
            .collect()
    }

    pub(crate) fn announcements(&self) -> Vec<String> {
        self.state().announcements.clone()
    }

    pub(crate) fn sent_commands(&self) -> Vec<StompCommand> {
        self.state().sent_commands.clone()
    }

    pub(crate) fn heartbeats(&self) -> usize {
        self.state().heartbeats
    }

    /// Deliver a MESSAGE to every live subscription on `destination`.
    /// Returns how many subscriptions received it.
    pub(crate) fn publish(&self, destination: &str, body: &str) -> usize {
        let mut state = self.state();
        let mut delivered = 0;
        let mut message_id = state.next_message;
        for (_, link) in &state.links {
            for (sub_id, subscribed) in &link.subscriptions {
                if subscribed != destination {
                    continue;
                }
                let frame = Frame::new(StompCommand::Message)
                    .header("destination", destination)
                    .header("subscription", sub_id.clone())
                    .header("message-id", format!("m-{message_id}"))
                    .header("content-type", "application/json")
                    .with_body(body);
                message_id += 1;
                if link.inbound.send(Ok(frame.encode())).is_ok() {
                    delivered += 1;
                }
            }
        }
        state.next_message = message_id;
        delivered
    }

    /// Push raw wire text to every live link.
    pub(crate) fn push_raw(&self, text: &str) {
        for (_, link) in &self.state().links {
            let _ = link.inbound.send(Ok(text.to_string()));
        }
    }

    /// Every live link fails with a receive error.
    pub(crate) fn fail_connections(&self) {
        let mut state = self.state();
        for (_, link) in state.links.drain(..) {
            let _ = link
                .inbound
                .send(Err(TransportError::Receive("connection reset".to_string())));
        }
    }

    /// Every live link is closed by the peer.
    pub(crate) fn close_connections(&self) {
        self.state().links.clear();
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn open(&self, request: ConnectRequest) -> Result<Box<dyn Link>, TransportError> {
        let mut state = self.state();
        state.opens += 1;
        let authorization = request.get("Authorization").map(str::to_string);
        state.last_authorization = authorization.clone();
        if state.refuse_all {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let id = state.next_link;
        state.next_link += 1;
        let (inbound, rx) = mpsc::unbounded_channel();
        state.links.push((
            id,
            LinkEntry {
                inbound,
                authorization,
                subscriptions: Vec::new(),
            },
        ));
        state.max_live = state.max_live.max(state.links.len());
        drop(state);

        Ok(Box::new(MemoryLink {
            id,
            broker: self.clone(),
            inbound: rx,
        }))
    }
}

struct MemoryLink {
    id: u64,
    broker: MemoryBroker,
    inbound: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

#[async_trait]
impl Link for MemoryLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        if state.link(self.id).is_none() {
            return Err(TransportError::Send("link closed".to_string()));
        }
        state.handle(self.id, &text);
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.broker.state().release(self.id);
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.broker.state().release(self.id);
    }
}

// ---------------------------------------------------------------------------
// In-memory collaborator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ApiState {
    records: Vec<Consultation>,
    calls: HashMap<&'static str, usize>,
    fail_reads: bool,
}

impl ApiState {
    fn count(&mut self, name: &'static str) {
        *self.calls.entry(name).or_default() += 1;
    }

    fn read(&mut self, name: &'static str) -> Result<(), ApiError> {
        self.count(name);
        if self.fail_reads {
            return Err(ApiError::Status {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn find(&mut self, id: ConsultationId) -> Result<&mut Consultation, ApiError> {
        self.records
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ApiError::Rejected {
                code: 4004,
                message: format!("consultation {id} not found"),
            })
    }

    /// Newest first.
    fn sorted(&self, keep: impl Fn(&Consultation) -> bool) -> Vec<Consultation> {
        let mut matching: Vec<Consultation> =
            self.records.iter().filter(|c| keep(c)).cloned().collect();
        matching.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then(b.id.cmp(&a.id)));
        matching
    }
}

/// Collaborator backed by a vector. With a broker attached, mutations push
/// the same notifications the real server does.
#[derive(Default)]
pub(crate) struct MemoryConsultationApi {
    state: Mutex<ApiState>,
    broker: Option<MemoryBroker>,
}

impl MemoryConsultationApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_broker(broker: MemoryBroker) -> Self {
        Self {
            state: Mutex::default(),
            broker: Some(broker),
        }
    }

    pub(crate) fn seed(&self, consultation: Consultation) {
        lock(&self.state).records.push(consultation);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        lock(&self.state).calls.get(name).copied().unwrap_or(0)
    }

    fn push(&self, destination: String, kind: &str, consultation: &Consultation) {
        if let Some(broker) = &self.broker {
            let data = serde_json::to_value(consultation).unwrap_or(Value::Null);
            broker.publish(&destination, &notification_body(kind, data));
        }
    }

    fn mutate(
        &self,
        name: &'static str,
        id: ConsultationId,
        f: impl FnOnce(&mut Consultation),
    ) -> Result<Consultation, ApiError> {
        let mut state = lock(&self.state);
        state.count(name);
        let record = state.find(id)?;
        f(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl ConsultationApi for MemoryConsultationApi {
    async fn create_consultation(&self, request: NewConsultation) -> Result<Consultation, ApiError> {
        let created = {
            let mut state = lock(&self.state);
            state.count("create_consultation");
            let id = state.records.iter().map(|c| c.id).max().unwrap_or(0) + 1;
            let mut created = consultation(
                id,
                request.sender_id,
                request.consultant_id,
                ConsultationStatus::Pending,
            );
            created.title = request.title;
            created.content = request.content;
            state.records.push(created.clone());
            created
        };
        self.push(
            consultant_topic(created.consultant.id),
            "NEW_CONSULTATION",
            &created,
        );
        Ok(created)
    }

    async fn update_consultation(
        &self,
        id: ConsultationId,
        edit: ConsultationEdit,
    ) -> Result<Consultation, ApiError> {
        let updated = self.mutate("update_consultation", id, |c| {
            c.title = edit.title;
            c.content = edit.content;
            c.sender_updated_at = Some("2025-02-01T00:00:00".to_string());
        })?;
        self.push(
            consultant_topic(updated.consultant.id),
            "CONSULTATION_UPDATED",
            &updated,
        );
        Ok(updated)
    }

    async fn cancel_consultation(
        &self,
        id: ConsultationId,
        request: CancelRequest,
    ) -> Result<Consultation, ApiError> {
        let cancelled = self.mutate("cancel_consultation", id, |c| {
            c.status = ConsultationStatus::Cancelled;
            c.resolution_notes = request.resolution_notes;
        })?;
        self.push(
            user_topic(cancelled.sender.id),
            "CONSULTATION_CANCELLED",
            &cancelled,
        );
        Ok(cancelled)
    }

    async fn submit_answer(
        &self,
        id: ConsultationId,
        answer: AnswerSubmission,
    ) -> Result<Consultation, ApiError> {
        let answered = self.mutate("submit_answer", id, |c| {
            c.answer = Some(answer.answer);
            c.status = ConsultationStatus::Answered;
            c.answered_at = Some("2025-02-01T00:00:00".to_string());
        })?;
        self.push(
            user_topic(answered.sender.id),
            "CONSULTATION_ANSWERED",
            &answered,
        );
        Ok(answered)
    }

    async fn update_answer(
        &self,
        id: ConsultationId,
        answer: AnswerSubmission,
    ) -> Result<Consultation, ApiError> {
        let updated = self.mutate("update_answer", id, |c| {
            c.answer = Some(answer.answer);
            c.consultant_updated_at = Some("2025-02-02T00:00:00".to_string());
        })?;
        self.push(
            user_topic(updated.sender.id),
            "CONSULTATION_UPDATED",
            &updated,
        );
        Ok(updated)
    }

    async fn consultations_by_sender(
        &self,
        query: SenderQuery,
    ) -> Result<Page<Consultation>, ApiError> {
        let mut state = lock(&self.state);
        state.read("consultations_by_sender")?;
        let matching = state.sorted(|c| {
            c.sender.id == query.sender_id
                && query.consultant_id.map_or(true, |id| c.consultant.id == id)
        });
        let size = query.size.max(1) as usize;
        let total = matching.len();
        let content = matching
            .into_iter()
            .skip(query.page as usize * size)
            .take(size)
            .collect();
        Ok(Page {
            content,
            total_elements: total as u64,
            total_pages: total.div_ceil(size) as u32,
            number: query.page,
            size: query.size,
        })
    }

    async fn grouped_for_consultant(
        &self,
        consultant_id: PrincipalId,
    ) -> Result<Vec<GroupedConsultationThread>, ApiError> {
        let mut state = lock(&self.state);
        state.read("grouped_for_consultant")?;
        Ok(group_by_sender(
            state.sorted(|c| c.consultant.id == consultant_id),
        ))
    }

    async fn search_consultations(
        &self,
        consultant_id: PrincipalId,
        keyword: &str,
    ) -> Result<Vec<Consultation>, ApiError> {
        let mut state = lock(&self.state);
        state.read("search_consultations")?;
        let keyword = keyword.to_lowercase();
        Ok(state.sorted(|c| {
            c.consultant.id == consultant_id
                && (c.title.to_lowercase().contains(&keyword)
                    || c.content.to_lowercase().contains(&keyword))
        }))
    }
}
