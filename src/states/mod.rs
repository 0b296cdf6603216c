//! Per-connection behaviour
//!
//! A session is always in exactly one [`ClientState`]. Transitions are driven
//! by the session runner: the old state's `on_exit`, then `set_client` and
//! `on_enter` on the new one, before any further message is handled.

pub mod connected;
pub mod in_game;

pub use connected::Connected;
pub use in_game::InGame;

use crate::game::objects::Player;
use crate::hub::client::ClientContext;
use crate::net::protocol::Msg;

pub enum ClientState {
    /// Menu: not in the arena
    Connected(Connected),
    InGame(InGame),
}

impl ClientState {
    pub fn connected() -> Self {
        ClientState::Connected(Connected::new())
    }

    pub fn in_game(player: Player) -> Self {
        ClientState::InGame(InGame::new(player))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientState::Connected(_) => Connected::NAME,
            ClientState::InGame(_) => InGame::NAME,
        }
    }

    /// Bind to the owning session. Called before anything else
    pub fn set_client(&mut self, client: ClientContext) {
        match self {
            ClientState::Connected(state) => state.set_client(client),
            ClientState::InGame(state) => state.set_client(client),
        }
    }

    pub fn on_enter(&mut self) {
        match self {
            ClientState::Connected(state) => state.on_enter(),
            ClientState::InGame(state) => state.on_enter(),
        }
    }

    /// Handle one message. `sender_id` equal to the session's own ID means the
    /// message came from this client's connection. Returns the state to
    /// switch to, if any.
    pub async fn handle_message(&mut self, sender_id: u64, msg: Msg) -> Option<ClientState> {
        match self {
            ClientState::Connected(state) => state.handle_message(sender_id, msg).await,
            ClientState::InGame(state) => state.handle_message(sender_id, msg).await,
        }
    }

    pub fn on_exit(&mut self) {
        match self {
            ClientState::Connected(state) => state.on_exit(),
            ClientState::InGame(state) => state.on_exit(),
        }
    }
}
