use tracing::{debug, info, warn};

use super::{ClientState, InGame};
use crate::game::constants::net::{HISCORE_BOARD_SIZE, MAX_NAME_LEN};
use crate::game::objects::Player;
use crate::hub::client::ClientContext;
use crate::net::protocol::{HiscoreEntry, Msg};

/// Collapse whitespace runs (tabs and newlines included) to single spaces,
/// strip remaining control and markup characters, then cap the length in
/// characters
pub fn sanitize_name(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped: String = collapsed
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| *c != '<' && *c != '>' && *c != '&')
        .collect();

    // Stripping can leave doubled or edge spaces behind
    let cleaned = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    cleaned.chars().take(MAX_NAME_LEN).collect::<String>().trim_end().to_string()
}

/// Lobby state: the client has a session ID but no avatar
#[derive(Default)]
pub struct Connected {
    client: Option<ClientContext>,
}

impl Connected {
    pub const NAME: &'static str = "Connected";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_client(&mut self, client: ClientContext) {
        self.client = Some(client);
    }

    pub fn on_enter(&mut self) {
        if let Some(client) = &self.client {
            client.socket_send(Msg::Id { id: client.id() });
        }
    }

    pub async fn handle_message(&mut self, sender_id: u64, msg: Msg) -> Option<ClientState> {
        let client = self.client.clone()?;
        if sender_id != client.id() {
            return None;
        }

        match msg {
            Msg::Join { name } => Self::handle_join(&client, &name).await,
            Msg::HiscoreBoardRequest => {
                Self::handle_hiscore_board_request(&client).await;
                None
            }
            other => {
                debug!(client = client.id(), state = Self::NAME, "Ignoring {}", other.kind());
                None
            }
        }
    }

    pub fn on_exit(&mut self) {}

    async fn handle_join(client: &ClientContext, raw_name: &str) -> Option<ClientState> {
        let name = sanitize_name(raw_name);

        if name.is_empty() {
            warn!(client = client.id(), "Rejecting join with empty/invalid name");
            client.socket_send(Msg::deny("Invalid player name"));
            return None;
        }

        if client.objects().player_name_taken(&name) {
            info!(client = client.id(), "Rejecting join, '{}' is already in the game", name);
            client.socket_send(Msg::deny("Player with that name is already in the game"));
            return None;
        }

        let record = match client.db().get_or_create_player(&name).await {
            Ok(record) => record,
            Err(e) => {
                warn!(client = client.id(), "Failed to load player '{}': {}", name, e);
                client.socket_send(Msg::deny("Could not load player"));
                return None;
            }
        };

        let game = InGame::new(Player::new(record.id, record.name, record.color, record.best_score));

        // The check above ran before the database await; only the reservation is authoritative
        if !client.objects().reserve_player(client.id(), game.player()) {
            info!(client = client.id(), "Rejecting join, '{}' was taken while loading", name);
            client.socket_send(Msg::deny("Player with that name is already in the game"));
            return None;
        }

        info!(client = client.id(), "Player '{}' joined (db id {})", name, record.id);
        client.socket_send(Msg::OkResponse);

        Some(ClientState::InGame(game))
    }

    async fn handle_hiscore_board_request(client: &ClientContext) {
        match client.db().top_scores(HISCORE_BOARD_SIZE).await {
            Ok(records) => {
                let hiscores = records
                    .into_iter()
                    .map(|r| HiscoreEntry {
                        name: r.name,
                        score: r.best_score,
                    })
                    .collect();
                client.socket_send(Msg::HiscoreBoard { hiscores });
            }
            Err(e) => {
                warn!(client = client.id(), "Failed to load hiscores: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::objects::Player;
    use crate::hub::test_services;
    use crate::net::protocol::Packet;
    use parking_lot::RwLock;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn connected(id: u64) -> (Connected, ClientContext, mpsc::Receiver<Packet>) {
        let (services, _events) = test_services().await;
        let (tx, rx) = mpsc::channel(64);
        let client = ClientContext::new(id, tx, services);

        let mut state = Connected::new();
        state.set_client(client.clone());
        (state, client, rx)
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  alice  "), "alice");
        assert_eq!(sanitize_name("a  b\tc"), "a b c");
        assert_eq!(sanitize_name("<b>bob</b>"), "bbob/b");
        assert_eq!(sanitize_name("x\u{7}y"), "xy");
        assert_eq!(sanitize_name("abcdefghijklmnopqrstuvwxyz").len(), MAX_NAME_LEN);
        assert!(sanitize_name(" <>& ").is_empty());
    }

    #[test]
    fn test_sanitize_name_whitespace_does_not_use_length() {
        assert_eq!(sanitize_name("a\n\tb"), "a b");
        assert_eq!(sanitize_name("a                    bcdefg"), "a bcdefg");
        assert_eq!(sanitize_name("a < b"), "a b");
        // Cut at the limit never leaves a trailing space
        assert_eq!(sanitize_name("abcdefghijklmno pq"), "abcdefghijklmno");
        assert_eq!(sanitize_name("ééééééééééééééééééé").chars().count(), MAX_NAME_LEN);
    }

    #[tokio::test]
    async fn test_on_enter_sends_id() {
        let (mut state, _client, mut rx) = connected(4).await;
        state.on_enter();

        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.sender_id, 4);
        assert!(matches!(packet.msg, Msg::Id { id: 4 }));
    }

    #[tokio::test]
    async fn test_join_enters_game() {
        let (mut state, client, mut rx) = connected(1).await;

        let next = state
            .handle_message(1, Msg::Join { name: " alice ".into() })
            .await;

        assert!(matches!(rx.recv().await.unwrap().msg, Msg::OkResponse));
        match next {
            Some(ClientState::InGame(game)) => assert_eq!(game.player().read().name, "alice"),
            _ => panic!("Expected to enter the game"),
        }

        let stored = client.db().top_scores(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "alice");
    }

    #[tokio::test]
    async fn test_join_rejects_invalid_name() {
        let (mut state, _client, mut rx) = connected(1).await;

        let next = state.handle_message(1, Msg::Join { name: "<>".into() }).await;

        assert!(next.is_none());
        assert!(matches!(rx.recv().await.unwrap().msg, Msg::DenyResponse { .. }));
    }

    #[tokio::test]
    async fn test_join_rejects_name_in_game() {
        let (mut state, client, mut rx) = connected(1).await;
        client
            .objects()
            .players
            .add_with_id(Arc::new(RwLock::new(Player::new(1, "Alice".into(), 0, 0))), 9);

        let next = state.handle_message(1, Msg::Join { name: "alice".into() }).await;

        assert!(next.is_none());
        assert!(matches!(rx.recv().await.unwrap().msg, Msg::DenyResponse { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_joins_with_same_name_admit_one() {
        let (services, _events) = test_services().await;
        let mut sessions = Vec::new();
        for id in [1, 2] {
            let (tx, rx) = mpsc::channel(64);
            let mut state = Connected::new();
            state.set_client(ClientContext::new(id, tx, services.clone()));
            sessions.push((state, rx));
        }
        let (mut second, mut second_rx) = sessions.pop().unwrap();
        let (mut first, mut first_rx) = sessions.pop().unwrap();

        let (a, b) = tokio::join!(
            first.handle_message(1, Msg::Join { name: "alice".into() }),
            second.handle_message(2, Msg::Join { name: "Alice".into() }),
        );

        let entered = [&a, &b]
            .iter()
            .filter(|next| matches!(next, Some(ClientState::InGame(_))))
            .count();
        assert_eq!(entered, 1);
        assert!(a.is_none() || b.is_none());
        assert_eq!(services.objects.players.len(), 1);

        let replies = [first_rx.recv().await.unwrap().msg, second_rx.recv().await.unwrap().msg];
        assert_eq!(replies.iter().filter(|m| matches!(m, Msg::OkResponse)).count(), 1);
        assert_eq!(
            replies.iter().filter(|m| matches!(m, Msg::DenyResponse { .. })).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_join_reserves_player_slot() {
        let (mut state, client, _rx) = connected(3).await;

        let next = state.handle_message(3, Msg::Join { name: "carol".into() }).await;

        let Some(ClientState::InGame(game)) = next else {
            panic!("Expected to enter the game");
        };
        let reserved = client.objects().players.get(3).unwrap();
        assert!(Arc::ptr_eq(&reserved, game.player()));
    }

    #[tokio::test]
    async fn test_peer_messages_ignored() {
        let (mut state, _client, mut rx) = connected(1).await;

        let next = state.handle_message(2, Msg::Join { name: "bob".into() }).await;

        assert!(next.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hiscore_board() {
        let (mut state, client, mut rx) = connected(1).await;
        for (name, score) in [("low", 10), ("high", 900)] {
            let record = client.db().get_or_create_player(name).await.unwrap();
            client.db().update_player_best_score(record.id, score).await.unwrap();
        }

        state.handle_message(1, Msg::HiscoreBoardRequest).await;

        match rx.recv().await.unwrap().msg {
            Msg::HiscoreBoard { hiscores } => {
                assert_eq!(hiscores.len(), 2);
                assert_eq!(hiscores[0].name, "high");
                assert_eq!(hiscores[0].score, 900);
            }
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }
}
