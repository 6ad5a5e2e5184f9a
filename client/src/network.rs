//! The async client driver.
//!
//! A single task owns the [`Session`], the [`Roster`] and the transport, and
//! multiplexes transport events, application commands, session timers and
//! the simulation tick with `tokio::select!`. Everything that mutates client
//! state happens on that task. The application talks to it through a
//! [`ClientHandle`]: commands in, [`ClientEvent`]s out, and roster snapshots
//! published on a `watch` channel for the renderer to read at its own pace.

use crate::config::{Bootstrap, ConfigError, PlayerInfo, SessionConfig};
use crate::game::{CombatHit, Entity, Roster, UpdateOutcome};
use crate::session::{
    ConnectionState, DataRate, DisconnectReason, Session, SessionAction, SessionEvent,
};
use crate::transport::{SocketEvent, Transport, TransportError};
use log::{debug, info, warn};
use shared::{Message, Vec2};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, MissedTickBehavior};

/// Requests from the application to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect,
    Disconnect,
    /// Sets the local player's movement direction. Zero stops.
    Move { trajectory: Vec2 },
    /// Melee strike from the local player's current position and facing.
    Attack,
    Chat(String),
    SetPlayerInfo { id: String, info: PlayerInfo },
    ReportDataRate,
    Shutdown,
}

/// Notifications from the driver to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Lifecycle {
        from: ConnectionState,
        to: ConnectionState,
        reason: Option<DisconnectReason>,
    },
    Chat {
        owner_id: String,
        message: String,
        /// The sender is in the roster.
        known: bool,
    },
    CombatHit(CombatHit),
    Latency(Duration),
    TransportError(TransportError),
    RosterChanged {
        spawned: Vec<String>,
        removed: Vec<String>,
    },
    MetadataNeeded(Vec<String>),
    LocalPlayerDied,
    ReconnectGraceElapsed,
    DataRate(DataRate),
}

/// The application's end of a running [`Client`].
pub struct ClientHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub snapshots: watch::Receiver<Vec<Entity>>,
}

impl ClientHandle {
    /// Queues a command. Returns false once the driver has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn snapshot(&self) -> Vec<Entity> {
        self.snapshots.borrow().clone()
    }
}

pub struct Client<T: Transport> {
    session: Session,
    roster: Roster,
    transport: T,
    transport_events: mpsc::UnboundedReceiver<SocketEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    snapshots: watch::Sender<Vec<Entity>>,
    tick: Duration,
    last_step: Instant,
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

impl<T: Transport> Client<T> {
    /// Builds a driver around `transport`, whose events must arrive on
    /// `transport_events`.
    pub fn new(
        config: SessionConfig,
        bootstrap: Bootstrap,
        transport: T,
        transport_events: mpsc::UnboundedReceiver<SocketEvent>,
    ) -> Result<(Self, ClientHandle), ConfigError> {
        config.validate()?;

        let started = now();
        let tick = config.tick;
        let roster = Roster::new(bootstrap.player_id.clone(), bootstrap.spawn);
        let session = Session::new(config, bootstrap.player_id.clone(), started);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(roster.snapshot());

        let mut client = Client {
            session,
            roster,
            transport,
            transport_events,
            commands: command_rx,
            events: event_tx,
            snapshots: snapshot_tx,
            tick,
            last_step: started,
        };
        client
            .roster
            .set_player_info(&bootstrap.player_id, bootstrap.info);

        info!(
            "Client ready for {} in room {}",
            bootstrap.player_id, bootstrap.room_id
        );

        let handle = ClientHandle {
            commands: command_tx,
            events: event_rx,
            snapshots: snapshot_rx,
        };
        Ok((client, handle))
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Runs until [`Command::Shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        let mut tick = interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.last_step = now();

        loop {
            let deadline = self.session.poll_timeout();

            tokio::select! {
                Some(SocketEvent { connection, event }) = self.transport_events.recv() => {
                    let actions = self.session.handle_transport_event(connection, event, now());
                    self.execute(actions);
                },

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                _ = wait_for(deadline) => {
                    let actions = self.session.handle_timeout(now());
                    self.execute(actions);
                },

                _ = tick.tick() => self.on_tick(),
            }
        }

        info!("Client shutting down");
        let actions = self.session.disconnect(now());
        self.execute(actions);
    }

    fn handle_command(&mut self, command: Command) {
        let at = now();
        match command {
            Command::Connect => {
                let actions = self.session.connect(at);
                self.execute(actions);
            }
            Command::Disconnect => {
                let actions = self.session.disconnect(at);
                self.execute(actions);
            }
            Command::Move { trajectory } => {
                self.roster.set_local_trajectory(trajectory);
                if let Some(local) = self.roster.local() {
                    let (position, trajectory) = (local.position, local.trajectory);
                    let actions = self.session.send_position_update(position, trajectory, at);
                    self.execute(actions);
                }
            }
            Command::Attack => self.attack(),
            Command::Chat(message) => {
                let actions = self.session.send_chat(message);
                self.execute(actions);
            }
            Command::SetPlayerInfo { id, info } => {
                self.roster.set_player_info(&id, info);
            }
            Command::ReportDataRate => {
                self.emit(ClientEvent::DataRate(self.session.data_rate(at)));
            }
            Command::Shutdown => {}
        }
    }

    fn attack(&mut self) {
        if self.roster.is_local_dead() {
            debug!("Ignoring attack while dead");
            return;
        }
        let contacts = self.roster.local_strike();
        let attacker_id = self.roster.local_id().to_string();
        for contact in &contacts {
            self.emit(ClientEvent::CombatHit(CombatHit {
                attacker_id: attacker_id.clone(),
                victim_id: contact.victim_id.clone(),
                strength: contact.strength,
                local_victim: false,
            }));
        }
        let actions = self.session.send_attack(contacts);
        self.execute(actions);
        self.publish();
    }

    fn on_tick(&mut self) {
        let at = now();
        let dt = at.saturating_duration_since(self.last_step).as_secs_f64();
        self.last_step = at;
        self.roster.step(dt);

        if let Some(local) = self.roster.local() {
            let (position, trajectory) = (local.position, local.trajectory);
            if !trajectory.is_zero() {
                let actions = self.session.send_position_update(position, trajectory, at);
                self.execute(actions);
            }
            let actions = self.session.send_position_pulse(position, trajectory, at);
            self.execute(actions);
        }

        self.publish();
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Connect(connection) => self.transport.connect(connection),
                SessionAction::Disconnect => self.transport.disconnect(),
                SessionAction::SendBinary(frame) => self.transport.send_binary(frame),
                SessionAction::Emit(event) => self.on_session_event(event),
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to, reason } => {
                if to == ConnectionState::Disconnected {
                    self.roster.clear_remote();
                    self.publish();
                }
                self.emit(ClientEvent::Lifecycle { from, to, reason });
            }
            SessionEvent::Delivered(message) => self.route(message),
            SessionEvent::LatencyMeasured(rtt) => self.emit(ClientEvent::Latency(rtt)),
            SessionEvent::TransportError(error) => self.emit(ClientEvent::TransportError(error)),
            SessionEvent::ReconnectGraceElapsed => self.emit(ClientEvent::ReconnectGraceElapsed),
        }
    }

    fn route(&mut self, message: Message) {
        match message {
            Message::PositionPulse(batch) => {
                let report = self.roster.apply_pulse(&batch);
                if !report.spawned.is_empty() || !report.removed.is_empty() {
                    self.emit(ClientEvent::RosterChanged {
                        spawned: report.spawned,
                        removed: report.removed,
                    });
                }
                if !report.needs_metadata.is_empty() {
                    self.emit(ClientEvent::MetadataNeeded(report.needs_metadata));
                }
                if report.local_died {
                    self.emit(ClientEvent::LocalPlayerDied);
                }
                self.publish();
            }
            Message::PositionUpdate(update) => {
                if self.roster.apply_position_update(&update) == UpdateOutcome::Spawned {
                    if let Some(id) = update.owner_id {
                        self.emit(ClientEvent::RosterChanged {
                            spawned: vec![id.clone()],
                            removed: Vec::new(),
                        });
                        if self.roster.player_info(&id).is_none() {
                            self.emit(ClientEvent::MetadataNeeded(vec![id]));
                        }
                    }
                }
                self.publish();
            }
            Message::ChatMessage(chat) => {
                let known = self.roster.contains(&chat.owner_id);
                if !known {
                    warn!("Chat from untracked player {}", chat.owner_id);
                }
                self.emit(ClientEvent::Chat {
                    owner_id: chat.owner_id,
                    message: chat.message,
                    known,
                });
            }
            Message::PlayerAttack(attack) => {
                for hit in self.roster.apply_attack(&attack) {
                    self.emit(ClientEvent::CombatHit(hit));
                }
                self.publish();
            }
            Message::LatencyPing(ping) => {
                debug!("Stray latency ping {}", ping.timestamp);
            }
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for client events");
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.roster.snapshot());
    }
}
