//! # Arena Client Library
//!
//! This library is the real-time synchronization layer of the arena client.
//! It keeps a live duplex connection to the game server, speaks the tagged
//! binary wire protocol from the `shared` crate, reconciles the roster of
//! remote players against the server's periodic pulses and resolves melee
//! strikes from local geometry.
//!
//! ## Architecture Overview
//!
//! Protocol logic and I/O are kept apart. The connection manager
//! ([`session::Session`]) and the roster ([`game::Roster`]) are plain state
//! machines that take the current time as an argument and never touch a
//! socket or a timer. The async driver ([`network::Client`]) owns both, plus
//! the transport, and is the only place that waits on anything.
//!
//! ### Throttled Outbound Traffic
//! Position updates are coalesced: within one interval only the most recent
//! value is kept, and a single deferred flush sends it. Position pulses are
//! advisory and simply dropped when they come too soon.
//!
//! ### Drift-Tolerant Reconciliation
//! An inbound position close to the tracked one becomes a destination the
//! entity walks to on its own; anything farther is a teleport. Applying the
//! same pulse twice, or its entries in any order, lands in the same roster.
//!
//! ### Link Health
//! A latency probe goes out every period. When too many go unanswered the
//! link is presumed dead and the session drops to `Disconnected` on its own.
//!
//! ## Module Organization
//!
//! - `config`: timing constants, bootstrap data and the session URL
//! - `transport`: the [`transport::Transport`] seam and its WebSocket
//!   implementation
//! - `throttle`: the coalescing and dropping rate limiters
//! - `latency`: outstanding-probe bookkeeping
//! - `session`: the connection lifecycle state machine
//! - `game`: entities, reconciliation, combat application and stepping
//! - `network`: the driver task and its command/event handle
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::{session_url, Bootstrap, PlayerInfo, SessionConfig};
//! use client::network::{Client, Command};
//! use client::transport::WsTransport;
//! use shared::Vec2;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bootstrap = Bootstrap {
//!     player_id: "p1".to_string(),
//!     room_id: "lobby".to_string(),
//!     spawn: Vec2::new(400.0, 300.0),
//!     info: PlayerInfo::default(),
//! };
//!
//! let (events_tx, events_rx) = mpsc::unbounded_channel();
//! let url = session_url("ws://127.0.0.1:8080", &bootstrap.player_id);
//! let transport = WsTransport::new(url, events_tx);
//!
//! let (client, mut handle) =
//!     Client::new(SessionConfig::default(), bootstrap, transport, events_rx)?;
//! tokio::spawn(client.run());
//!
//! handle.send(Command::Connect);
//! handle.send(Command::Move { trajectory: Vec2::new(1.0, 0.0) });
//!
//! while let Some(event) = handle.events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod game;
pub mod latency;
pub mod network;
pub mod session;
pub mod throttle;
pub mod transport;
