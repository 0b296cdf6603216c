//! Spore Arena Server Library
//!
//! A real-time multiplayer arena server using WebTransport. Players roam a
//! shared arena, eat spores and smaller players, and keep a persistent best
//! score.
//!
//! - [`hub`] owns client membership, broadcast fan-out and the spore economy
//! - [`states`] holds the per-client state machine (connected, in game)
//! - [`game`] holds the shared arena objects, spawning and claim validation
//! - [`net`] holds the wire protocol and WebTransport plumbing

pub mod config;
pub mod db;
pub mod game;
pub mod hub;
pub mod metrics;
pub mod net;
pub mod states;
pub mod util;
