//! Connection manager state machine.
//!
//! Owns the connection lifecycle, outbound throttling, latency probing,
//! traffic accounting and the reconnection grace timer. Like the rest of the
//! client's protocol logic it does no I/O: every method takes the current
//! time and returns [`SessionAction`]s for the driver to carry out, and every
//! timer is a deadline the driver waits on via [`Session::poll_timeout`].
//!
//! # State Machine
//!
//! ```text
//!                connect()               opened
//! ┌──────────────┐ ───────> ┌────────────┐ ─────> ┌───────────┐
//! │ Disconnected │          │ Connecting │        │ Connected │
//! └──────────────┘ <─────── └────────────┘        └───────────┘
//!        ^          closed / fatal error                │
//!        └──────────────────────────────────────────────┘
//!          closed / fatal error / latency timeout / disconnect()
//! ```
//!
//! Each `connect()` opens a fresh [`ConnectionId`]. Transport events carry the
//! id of the socket that produced them, and only the current one can move the
//! state machine; a socket that was replaced or torn down is ignored.

use crate::config::SessionConfig;
use crate::latency::LatencyProbe;
use crate::throttle::{Coalescer, RateGate};
use crate::transport::{ConnectionId, TransportError, TransportEvent};
use log::{debug, error, info, warn};
use serde::Serialize;
use shared::{
    codec, AttackContact, ChatMessage, Message, MessageType, PlayerAttack, PositionUpdate, Vec2,
};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// The application asked for it.
    Requested,
    /// The transport closed without reporting an error.
    TransportClosed,
    /// The transport failed with a fatal error.
    TransportError(TransportError),
    /// Too many latency probes went unanswered.
    LatencyTimeout,
}

/// Things the application should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        reason: Option<DisconnectReason>,
    },
    /// A decoded inbound message other than a latency echo.
    Delivered(Message),
    LatencyMeasured(Duration),
    /// Every transport error is surfaced, fatal or not.
    TransportError(TransportError),
    /// The grace period after an unexpected disconnect has passed and the
    /// session is still down.
    ReconnectGraceElapsed,
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open a new socket under this id.
    Connect(ConnectionId),
    Disconnect,
    SendBinary(Vec<u8>),
    Emit(SessionEvent),
}

/// Throughput since the connection opened, in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DataRate {
    pub sent_per_second: f64,
    pub received_per_second: f64,
}

#[derive(Debug, Clone, Default)]
struct Traffic {
    since: Option<Instant>,
    sent: u64,
    received: u64,
}

pub struct Session {
    config: SessionConfig,
    player_id: String,
    state: ConnectionState,
    connection: Option<ConnectionId>,
    next_connection: ConnectionId,
    position_updates: Coalescer<PositionUpdate>,
    pulses: RateGate,
    probe: LatencyProbe,
    grace_deadline: Option<Instant>,
    traffic: Traffic,
    latency: Option<Duration>,
}

impl Session {
    pub fn new(config: SessionConfig, player_id: impl Into<String>, now: Instant) -> Self {
        let probe = LatencyProbe::new(
            now,
            config.ping_period,
            config.ping_max_age(),
            config.drop_threshold,
        );
        Self {
            position_updates: Coalescer::new(config.position_update_interval),
            pulses: RateGate::new(config.pulse_interval),
            probe,
            config,
            player_id: player_id.into(),
            state: ConnectionState::Disconnected,
            connection: None,
            next_connection: 1,
            grace_deadline: None,
            traffic: Traffic::default(),
            latency: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The connection attempt the session currently listens to.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Most recent round-trip measurement.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn pending_pings(&self) -> usize {
        self.probe.pending()
    }

    pub fn data_rate(&self, now: Instant) -> DataRate {
        let Some(since) = self.traffic.since else {
            return DataRate::default();
        };
        let elapsed = now.saturating_duration_since(since).as_secs_f64();
        if elapsed <= 0.0 {
            return DataRate::default();
        }
        DataRate {
            sent_per_second: self.traffic.sent as f64 / elapsed,
            received_per_second: self.traffic.received as f64 / elapsed,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.traffic.sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.traffic.received
    }

    // -- lifecycle --------------------------------------------------------

    pub fn connect(&mut self, _now: Instant) -> Vec<SessionAction> {
        if self.state != ConnectionState::Disconnected {
            debug!("Connect ignored in state {:?}", self.state);
            return Vec::new();
        }
        self.grace_deadline = None;
        let connection = self.next_connection;
        self.next_connection += 1;
        self.connection = Some(connection);
        let event = self.transition(ConnectionState::Connecting, None);
        vec![SessionAction::Emit(event), SessionAction::Connect(connection)]
    }

    /// Tears the session down. Safe to call any number of times; only the
    /// first call from a live state produces a transition.
    pub fn disconnect(&mut self, _now: Instant) -> Vec<SessionAction> {
        self.grace_deadline = None;
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        let event = self.teardown(DisconnectReason::Requested);
        vec![SessionAction::Disconnect, SessionAction::Emit(event)]
    }

    /// Feeds back something the socket for `connection` reported. Events
    /// from any other connection are dropped.
    pub fn handle_transport_event(
        &mut self,
        connection: ConnectionId,
        event: TransportEvent,
        now: Instant,
    ) -> Vec<SessionAction> {
        if self.connection != Some(connection) {
            debug!("Ignoring {:?} from stale connection {}", event, connection);
            return Vec::new();
        }
        match event {
            TransportEvent::Opened => self.on_opened(now),
            TransportEvent::Closed(error) => self.on_closed(error, now),
            TransportEvent::Errored(error) => self.on_errored(error, now),
            TransportEvent::Binary(bytes) => self.on_binary(&bytes, now),
            TransportEvent::Text(text) => self.on_text(&text),
        }
    }

    fn on_opened(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.grace_deadline = None;
        self.traffic = Traffic {
            since: Some(now),
            ..Traffic::default()
        };
        self.probe.start(now);
        let event = self.transition(ConnectionState::Connected, None);
        vec![SessionAction::Emit(event)]
    }

    fn on_closed(&mut self, error: Option<TransportError>, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if let Some(error) = &error {
            warn!("Transport closed with error: {}", error);
            actions.push(SessionAction::Emit(SessionEvent::TransportError(
                error.clone(),
            )));
        }
        if self.state != ConnectionState::Disconnected {
            let reason = error.map_or(
                DisconnectReason::TransportClosed,
                DisconnectReason::TransportError,
            );
            actions.push(SessionAction::Emit(self.teardown(reason)));
            self.arm_grace(now);
        }
        actions
    }

    fn on_errored(&mut self, error: TransportError, now: Instant) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::Emit(SessionEvent::TransportError(
            error.clone(),
        ))];
        if !error.is_fatal() {
            warn!("Transient transport error: {}", error);
            return actions;
        }

        error!("Fatal transport error: {}", error);
        if self.state != ConnectionState::Disconnected {
            let event = self.teardown(DisconnectReason::TransportError(error));
            actions.push(SessionAction::Disconnect);
            actions.push(SessionAction::Emit(event));
            self.arm_grace(now);
        }
        actions
    }

    fn on_binary(&mut self, bytes: &[u8], now: Instant) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connected {
            debug!("Dropping {} bytes received while {:?}", bytes.len(), self.state);
            return Vec::new();
        }
        self.traffic.received += bytes.len() as u64;

        match codec::decode(bytes) {
            Ok(Message::LatencyPing(ping)) => match self.probe.acknowledge(ping, now) {
                Some(rtt) => {
                    debug!("Round trip {:?}", rtt);
                    self.latency = Some(rtt);
                    vec![SessionAction::Emit(SessionEvent::LatencyMeasured(rtt))]
                }
                None => {
                    debug!("Unmatched latency echo {}", ping.timestamp);
                    Vec::new()
                }
            },
            Ok(message) => {
                debug!("Received {}", message.kind());
                vec![SessionAction::Emit(SessionEvent::Delivered(message))]
            }
            Err(e) => {
                warn!("Dropping malformed message: {}", e);
                Vec::new()
            }
        }
    }

    fn on_text(&mut self, text: &str) -> Vec<SessionAction> {
        if self.traffic.since.is_some() {
            self.traffic.received += text.len() as u64;
        }
        info!("Server says: {}", text);
        Vec::new()
    }

    fn transition(
        &mut self,
        to: ConnectionState,
        reason: Option<DisconnectReason>,
    ) -> SessionEvent {
        let from = self.state;
        self.state = to;
        info!("Connection {:?} -> {:?}", from, to);
        SessionEvent::StateChanged { from, to, reason }
    }

    /// Moves to `Disconnected`, cancelling every session timer and clearing
    /// the pending probes and throttle caches in the same step.
    fn teardown(&mut self, reason: DisconnectReason) -> SessionEvent {
        self.position_updates.clear();
        self.pulses.reset();
        self.probe.stop();
        self.traffic.since = None;
        self.connection = None;
        self.transition(ConnectionState::Disconnected, Some(reason))
    }

    fn arm_grace(&mut self, now: Instant) {
        if self.grace_deadline.is_none() {
            self.grace_deadline = Some(now + self.config.reconnect_grace);
        }
    }

    // -- timers -----------------------------------------------------------

    /// Earliest armed deadline, if any.
    pub fn poll_timeout(&self) -> Option<Instant> {
        [
            self.position_updates.deadline(),
            self.probe.deadline(),
            self.grace_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fires every timer that is due at `now`.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if let Some(update) = self.position_updates.poll(now) {
            self.push_frame(&mut actions, MessageType::PositionUpdate, &update);
        }

        if self.probe.deadline().is_some_and(|at| at <= now) {
            let tick = self.probe.fire(now);
            self.push_frame(&mut actions, MessageType::LatencyPing, &tick.ping);
            if tick.overdue {
                warn!(
                    "{} latency probes unanswered; presuming the link dead",
                    self.probe.pending()
                );
                let event = self.teardown(DisconnectReason::LatencyTimeout);
                actions.push(SessionAction::Disconnect);
                actions.push(SessionAction::Emit(event));
                self.arm_grace(now);
            }
        }

        if self.grace_deadline.is_some_and(|at| at <= now) {
            self.grace_deadline = None;
            if self.state == ConnectionState::Disconnected {
                actions.push(SessionAction::Emit(SessionEvent::ReconnectGraceElapsed));
            }
        }

        actions
    }

    // -- outbound ---------------------------------------------------------

    /// Throttled, coalesced position update. Only the latest value offered in
    /// an interval is ever sent.
    pub fn send_position_update(
        &mut self,
        position: Vec2,
        trajectory: Vec2,
        now: Instant,
    ) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        let update = PositionUpdate::new(position, trajectory, Some(self.player_id.clone()));
        let mut actions = Vec::new();
        if let Some(update) = self.position_updates.offer(update, now) {
            self.push_frame(&mut actions, MessageType::PositionUpdate, &update);
        }
        actions
    }

    /// Throttled position pulse. Calls inside the interval are dropped.
    pub fn send_position_pulse(
        &mut self,
        position: Vec2,
        trajectory: Vec2,
        now: Instant,
    ) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connected || !self.pulses.allow(now) {
            return Vec::new();
        }
        let update = PositionUpdate::new(position, trajectory, Some(self.player_id.clone()));
        let mut actions = Vec::new();
        self.push_frame(&mut actions, MessageType::PositionPulse, &update);
        actions
    }

    pub fn send_chat(&mut self, message: impl Into<String>) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        let chat = ChatMessage {
            message: message.into(),
            owner_id: self.player_id.clone(),
        };
        let mut actions = Vec::new();
        self.push_frame(&mut actions, MessageType::ChatMessage, &chat);
        actions
    }

    pub fn send_attack(&mut self, contacts: Vec<AttackContact>) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        let attack = PlayerAttack {
            attacker_id: self.player_id.clone(),
            contacts,
        };
        let mut actions = Vec::new();
        self.push_frame(&mut actions, MessageType::PlayerAttack, &attack);
        actions
    }

    fn push_frame<P: Serialize>(
        &mut self,
        actions: &mut Vec<SessionAction>,
        kind: MessageType,
        payload: &P,
    ) {
        match codec::encode(kind, payload) {
            Ok(frame) => {
                self.traffic.sent += frame.len() as u64;
                actions.push(SessionAction::SendBinary(frame));
            }
            Err(e) => error!("Failed to encode {}: {}", kind, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode, HealthUpdate, LatencyPing, PulseUpdate};

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn connected(t0: Instant) -> Session {
        let mut session = Session::new(config(), "me", t0);
        session.connect(t0);
        deliver(&mut session, TransportEvent::Opened, t0);
        assert_eq!(session.state(), ConnectionState::Connected);
        session
    }

    /// Hands `event` to the session as if the current socket reported it.
    fn deliver(session: &mut Session, event: TransportEvent, at: Instant) -> Vec<SessionAction> {
        let connection = session.connection().expect("no live connection");
        session.handle_transport_event(connection, event, at)
    }

    fn connect_id(actions: &[SessionAction]) -> Option<ConnectionId> {
        actions.iter().find_map(|action| match action {
            SessionAction::Connect(id) => Some(*id),
            _ => None,
        })
    }

    fn sent_frames(actions: &[SessionAction]) -> Vec<Message> {
        actions
            .iter()
            .filter_map(|action| match action {
                SessionAction::SendBinary(frame) => {
                    let (kind, body) = codec::decode_frame(frame).ok()?;
                    match kind {
                        MessageType::PositionUpdate | MessageType::PositionPulse => {
                            let update: PositionUpdate = codec::decode_payload(kind, body).ok()?;
                            Some(Message::PositionUpdate(update))
                        }
                        _ => decode(frame).ok(),
                    }
                }
                _ => None,
            })
            .collect()
    }

    fn state_changes(actions: &[SessionAction]) -> Vec<(ConnectionState, ConnectionState)> {
        actions
            .iter()
            .filter_map(|action| match action {
                SessionAction::Emit(SessionEvent::StateChanged { from, to, .. }) => {
                    Some((*from, *to))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_connect_cycle() {
        let t0 = Instant::now();
        let mut session = Session::new(config(), "me", t0);

        let actions = session.connect(t0);
        assert_eq!(connect_id(&actions), session.connection());
        assert!(session.connection().is_some());
        assert_eq!(
            state_changes(&actions),
            vec![(ConnectionState::Disconnected, ConnectionState::Connecting)]
        );
        assert!(session.connect(t0).is_empty());

        let actions = deliver(&mut session, TransportEvent::Opened, t0);
        assert_eq!(
            state_changes(&actions),
            vec![(ConnectionState::Connecting, ConnectionState::Connected)]
        );
        assert_eq!(session.poll_timeout(), Some(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let old = session.connection().unwrap();

        let first = session.disconnect(t0);
        assert!(first.contains(&SessionAction::Disconnect));
        assert_eq!(state_changes(&first).len(), 1);

        assert!(session.disconnect(t0).is_empty());
        let late_close = session.handle_transport_event(old, TransportEvent::Closed(None), t0);
        assert!(state_changes(&late_close).is_empty());
        assert_eq!(session.poll_timeout(), None);
    }

    #[test]
    fn test_position_updates_coalesce_to_last_value() {
        let t0 = Instant::now();
        let mut session = connected(t0);

        let first = session.send_position_update(Vec2::new(0.0, 0.0), Vec2::ZERO, t0);
        assert_eq!(sent_frames(&first).len(), 1);

        let mut sent = Vec::new();
        for i in 1..=10 {
            let at = t0 + Duration::from_millis(i * 5);
            sent.extend(session.send_position_update(
                Vec2::new(i as f64, 0.0),
                Vec2::new(1.0, 0.0),
                at,
            ));
        }
        assert!(sent_frames(&sent).is_empty());

        let deadline = session.poll_timeout().unwrap();
        assert!(deadline < t0 + Duration::from_secs(1));
        let flushed = sent_frames(&session.handle_timeout(deadline));
        assert_eq!(flushed.len(), 1);
        match &flushed[0] {
            Message::PositionUpdate(update) => {
                assert_eq!(update.position, Vec2::new(10.0, 0.0));
                assert_eq!(update.owner_id.as_deref(), Some("me"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(sent_frames(&session.handle_timeout(deadline)).is_empty());
    }

    #[test]
    fn test_pulses_inside_interval_are_dropped() {
        let t0 = Instant::now();
        let mut session = connected(t0);

        assert_eq!(
            sent_frames(&session.send_position_pulse(Vec2::ZERO, Vec2::ZERO, t0)).len(),
            1
        );
        for ms in [16, 100, 300] {
            let at = t0 + Duration::from_millis(ms);
            assert!(session.send_position_pulse(Vec2::ZERO, Vec2::ZERO, at).is_empty());
        }
        let later = t0 + Duration::from_millis(334);
        assert_eq!(
            sent_frames(&session.send_position_pulse(Vec2::ZERO, Vec2::ZERO, later)).len(),
            1
        );
        // Nothing was cached for a retry.
        assert_eq!(session.poll_timeout(), Some(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_sends_are_dropped_while_disconnected() {
        let t0 = Instant::now();
        let mut session = Session::new(config(), "me", t0);
        assert!(session.send_position_update(Vec2::ZERO, Vec2::ZERO, t0).is_empty());
        assert!(session.send_position_pulse(Vec2::ZERO, Vec2::ZERO, t0).is_empty());
        assert!(session.send_chat("hi").is_empty());
        assert!(session.send_attack(Vec::new()).is_empty());
    }

    #[test]
    fn test_latency_probe_round_trip() {
        let t0 = Instant::now();
        let mut session = connected(t0);

        let at = t0 + Duration::from_secs(1);
        let frames = sent_frames(&session.handle_timeout(at));
        let ping = match frames.as_slice() {
            [Message::LatencyPing(ping)] => *ping,
            other => panic!("expected one ping, got {other:?}"),
        };
        assert_eq!(session.pending_pings(), 1);

        let echo = codec::encode(MessageType::LatencyPing, &ping).unwrap();
        let actions = deliver(
            &mut session,
            TransportEvent::Binary(echo),
            at + Duration::from_millis(80),
        );
        assert_eq!(
            actions,
            vec![SessionAction::Emit(SessionEvent::LatencyMeasured(
                Duration::from_millis(80)
            ))]
        );
        assert_eq!(session.pending_pings(), 0);
        assert_eq!(session.latency(), Some(Duration::from_millis(80)));
    }

    #[test]
    fn test_unanswered_probes_disconnect_exactly_once() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let old = session.connection().unwrap();

        let mut transitions = Vec::new();
        let mut disconnects = 0;
        for second in 1..=30 {
            let actions = session.handle_timeout(t0 + Duration::from_secs(second));
            transitions.extend(state_changes(&actions));
            disconnects += actions
                .iter()
                .filter(|a| **a == SessionAction::Disconnect)
                .count();
        }
        let late_close = session.handle_transport_event(
            old,
            TransportEvent::Closed(None),
            t0 + Duration::from_secs(31),
        );
        transitions.extend(state_changes(&late_close));

        assert_eq!(
            transitions,
            vec![(ConnectionState::Connected, ConnectionState::Disconnected)]
        );
        assert_eq!(disconnects, 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.pending_pings(), 0);

        // A fresh connect starts a new cycle.
        let again = session.connect(t0 + Duration::from_secs(32));
        assert_eq!(
            state_changes(&again),
            vec![(ConnectionState::Disconnected, ConnectionState::Connecting)]
        );
    }

    #[test]
    fn test_latency_timeout_reason() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let mut reason = None;
        for second in 1..=11 {
            for action in session.handle_timeout(t0 + Duration::from_secs(second)) {
                if let SessionAction::Emit(SessionEvent::StateChanged { reason: r, .. }) = action {
                    reason = r;
                }
            }
        }
        assert_eq!(reason, Some(DisconnectReason::LatencyTimeout));
    }

    #[test]
    fn test_malformed_payload_keeps_connection() {
        let t0 = Instant::now();
        let mut session = connected(t0);

        for garbage in [
            b"noSuchType\0\x01".to_vec(),
            b"positionPulse\0\x05".to_vec(),
            vec![0xff; 40],
        ] {
            let actions = deliver(&mut session, TransportEvent::Binary(garbage), t0);
            assert!(actions.is_empty());
        }
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_inbound_messages_are_delivered() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let pulse = Message::PositionPulse(vec![PulseUpdate {
            owner_id: "a".to_string(),
            position: PositionUpdate::new(Vec2::new(1.0, 2.0), Vec2::ZERO, None),
            health: HealthUpdate { current: 10, max: 10 },
        }]);
        let frame = codec::encode_message(&pulse).unwrap();
        let actions = deliver(&mut session, TransportEvent::Binary(frame), t0);
        assert_eq!(
            actions,
            vec![SessionAction::Emit(SessionEvent::Delivered(pulse))]
        );
    }

    #[test]
    fn test_transient_error_is_reported_without_teardown() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let error = TransportError::Io("timed out".to_string());
        let actions = deliver(&mut session, TransportEvent::Errored(error.clone()), t0);
        assert_eq!(
            actions,
            vec![SessionAction::Emit(SessionEvent::TransportError(error))]
        );
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_fatal_error_tears_down() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let old = session.connection().unwrap();
        let actions = deliver(
            &mut session,
            TransportEvent::Errored(TransportError::ConnectionReset),
            t0,
        );
        assert_eq!(
            actions[0],
            SessionAction::Emit(SessionEvent::TransportError(
                TransportError::ConnectionReset
            ))
        );
        assert!(actions.contains(&SessionAction::Disconnect));
        assert_eq!(
            state_changes(&actions),
            vec![(ConnectionState::Connected, ConnectionState::Disconnected)]
        );

        // The socket's own close notification follows; no second transition.
        let closed = session.handle_transport_event(old, TransportEvent::Closed(None), t0);
        assert!(closed.is_empty());
    }

    #[test]
    fn test_grace_timer_is_singular() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let old = session.connection().unwrap();
        deliver(&mut session, TransportEvent::Closed(None), t0);
        session.handle_transport_event(
            old,
            TransportEvent::Closed(Some(TransportError::NotConnected)),
            t0 + Duration::from_secs(1),
        );
        assert_eq!(session.poll_timeout(), Some(t0 + Duration::from_secs(3)));

        let fired = session.handle_timeout(t0 + Duration::from_secs(3));
        assert_eq!(
            fired,
            vec![SessionAction::Emit(SessionEvent::ReconnectGraceElapsed)]
        );
        assert_eq!(session.poll_timeout(), None);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reconnect_cancels_grace_timer() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        deliver(&mut session, TransportEvent::Closed(None), t0);
        assert!(session.poll_timeout().is_some());

        session.connect(t0 + Duration::from_millis(500));
        assert_eq!(session.poll_timeout(), None);
        deliver(&mut session, TransportEvent::Opened, t0 + Duration::from_secs(1));
        let fired = session.handle_timeout(t0 + Duration::from_secs(3));
        assert!(!fired.contains(&SessionAction::Emit(SessionEvent::ReconnectGraceElapsed)));
    }

    #[test]
    fn test_requested_disconnect_arms_no_grace() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        session.disconnect(t0);
        assert_eq!(session.poll_timeout(), None);
    }

    #[test]
    fn test_teardown_clears_caches_and_timers() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        session.send_position_update(Vec2::ZERO, Vec2::ZERO, t0);
        session.send_position_update(Vec2::new(5.0, 5.0), Vec2::ZERO, t0);
        session.handle_timeout(t0 + Duration::from_secs(1));
        assert_eq!(session.pending_pings(), 1);

        session.disconnect(t0 + Duration::from_secs(1));
        assert_eq!(session.pending_pings(), 0);
        assert_eq!(session.poll_timeout(), None);
        assert!(session
            .handle_timeout(t0 + Duration::from_secs(5))
            .is_empty());
    }

    #[test]
    fn test_open_after_teardown_is_ignored() {
        let t0 = Instant::now();
        let mut session = Session::new(config(), "me", t0);
        let cancelled = connect_id(&session.connect(t0)).unwrap();
        session.disconnect(t0);
        let actions = session.handle_transport_event(cancelled, TransportEvent::Opened, t0);
        assert!(actions.is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reconnect_ignores_close_of_previous_socket() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let old = session.connection().unwrap();
        session.disconnect(t0);
        let new = connect_id(&session.connect(t0)).unwrap();
        assert_ne!(old, new);

        let stale = session.handle_transport_event(old, TransportEvent::Closed(None), t0);
        assert!(stale.is_empty());
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(session.poll_timeout(), None);

        let opened = session.handle_transport_event(new, TransportEvent::Opened, t0);
        assert_eq!(
            state_changes(&opened),
            vec![(ConnectionState::Connecting, ConnectionState::Connected)]
        );
    }

    #[test]
    fn test_cancelled_attempt_cannot_open_the_next_one() {
        let t0 = Instant::now();
        let mut session = Session::new(config(), "me", t0);
        let cancelled = connect_id(&session.connect(t0)).unwrap();
        assert!(session.connect(t0).is_empty());
        session.disconnect(t0);
        let current = connect_id(&session.connect(t0)).unwrap();

        for event in [
            TransportEvent::Opened,
            TransportEvent::Closed(Some(TransportError::NetworkUnreachable)),
        ] {
            assert!(session
                .handle_transport_event(cancelled, event, t0)
                .is_empty());
        }
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(session.poll_timeout(), None);

        let opened = session.handle_transport_event(current, TransportEvent::Opened, t0);
        assert_eq!(
            state_changes(&opened),
            vec![(ConnectionState::Connecting, ConnectionState::Connected)]
        );
    }

    #[test]
    fn test_data_rate() {
        let t0 = Instant::now();
        let mut session = connected(t0);
        let ping = codec::encode(MessageType::LatencyPing, &LatencyPing { timestamp: 1 }).unwrap();
        deliver(&mut session, TransportEvent::Binary(ping.clone()), t0);
        session.send_chat("hello");

        let rate = session.data_rate(t0 + Duration::from_secs(2));
        assert_eq!(rate.received_per_second, ping.len() as f64 / 2.0);
        assert_eq!(rate.sent_per_second, session.bytes_sent() as f64 / 2.0);
        assert!(session.bytes_sent() > 0);

        session.disconnect(t0);
        assert_eq!(session.data_rate(t0 + Duration::from_secs(3)), DataRate::default());
    }
}
