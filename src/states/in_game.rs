//! In-game state: movement, growth and consumption claims
//!
//! The owning client is the authority for its own actions, but every claim
//! it makes is checked here before it takes effect. Anything relayed from
//! another client is passed through to this client untouched.

use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::ClientState;
use crate::game::constants::player as player_consts;
use crate::game::constants::streaming::{BATCH_DELAY, SPORE_BATCH_SIZE};
use crate::game::constants::validation::DISTANCE_BUFFER;
use crate::game::objects::{Player, SharedPlayer, Spore};
use crate::game::spawn::spawn_coords;
use crate::game::validation::{validate_player_claim, validate_spore_claim, ClaimRejection};
use crate::hub::client::ClientContext;
use crate::metrics::Metrics;
use crate::net::protocol::Msg;

/// Per-tick probability that a player of `radius` sheds a spore in an arena
/// stocked with `max_spores`
pub fn drop_chance(radius: f64, max_spores: usize) -> f64 {
    if radius <= player_consts::DROP_MIN_RADIUS || max_spores == 0 {
        return 0.0;
    }
    (radius / (max_spores as f64 * player_consts::DROP_CHANCE_DIVISOR)).min(1.0)
}

pub struct InGame {
    client: Option<ClientContext>,
    player: SharedPlayer,
    movement: Option<JoinHandle<()>>,
    spore_stream: Option<JoinHandle<()>>,
}

impl InGame {
    pub const NAME: &'static str = "InGame";

    pub fn new(player: Player) -> Self {
        Self {
            client: None,
            player: Arc::new(RwLock::new(player)),
            movement: None,
            spore_stream: None,
        }
    }

    pub fn player(&self) -> &SharedPlayer {
        &self.player
    }

    pub fn set_client(&mut self, client: ClientContext) {
        self.client = Some(client);
    }

    /// Spawn the avatar, announce it to its owner and start streaming the
    /// current spores
    pub fn on_enter(&mut self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let id = client.id();
        let objects = client.objects();

        let position = spawn_coords(player_consts::START_RADIUS, objects, Some(id));
        let snapshot = {
            let mut player = self.player.write();
            player.position = position;
            player.speed = player_consts::START_SPEED;
            player.radius = player_consts::START_RADIUS;
            info!(client = id, state = Self::NAME, "Adding player {} to the shared collection", player.name);
            Msg::player(id, &player)
        };

        objects.players.add_with_id(self.player.clone(), id);
        Metrics::set(&client.metrics().players_in_game, objects.players.len());

        client.socket_send(snapshot);

        self.spore_stream = Some(tokio::spawn(stream_spores(
            client,
            SPORE_BATCH_SIZE,
            BATCH_DELAY,
        )));
    }

    pub async fn handle_message(&mut self, sender_id: u64, msg: Msg) -> Option<ClientState> {
        let client = self.client.clone()?;
        let own = sender_id == client.id();

        match msg {
            Msg::Player(_) => {
                if own {
                    debug!(client = client.id(), "Received player message from our own client, ignoring");
                } else {
                    client.socket_send_as(msg, sender_id);
                }
            }
            Msg::PlayerDirection { direction } => {
                if own {
                    self.player.write().direction = direction;
                    self.ensure_movement(&client);
                } else {
                    client.socket_send_as(msg, sender_id);
                }
            }
            Msg::Chat { .. } => {
                if own {
                    client.broadcast(msg);
                } else {
                    client.socket_send_as(msg, sender_id);
                }
            }
            Msg::SporeConsumed { spore_id } => {
                if own {
                    match self.consume_spore(&client, spore_id) {
                        Ok(()) => {
                            client.broadcast(msg);
                            self.sync_best_score();
                        }
                        Err(e) => self.reject(&client, "spore", e),
                    }
                } else {
                    client.socket_send_as(msg, sender_id);
                }
            }
            Msg::PlayerConsumed { player_id } => {
                if own {
                    match self.consume_player(&client, player_id) {
                        Ok(()) => {
                            client.broadcast(msg);
                            self.sync_best_score();
                        }
                        Err(e) => self.reject(&client, "player", e),
                    }
                } else {
                    client.socket_send_as(msg, sender_id);
                    if player_id == client.id() {
                        info!(client = client.id(), "Player was consumed, respawning");
                        self.sync_best_score();
                        let fresh = self.player.read().respawned();
                        return Some(ClientState::in_game(fresh));
                    }
                }
            }
            Msg::Spore(_) => client.socket_send_as(msg, sender_id),
            Msg::Disconnect { .. } => {
                if own {
                    client.broadcast(msg);
                    return Some(ClientState::connected());
                }
                client.socket_send_as(msg, sender_id);
            }
            other => {
                debug!(client = client.id(), state = Self::NAME, "Ignoring {}", other.kind());
            }
        }

        None
    }

    /// Stop background work, leave the arena and persist any new best score
    pub fn on_exit(&mut self) {
        if let Some(task) = self.movement.take() {
            task.abort();
        }
        if let Some(task) = self.spore_stream.take() {
            task.abort();
        }

        let Some(client) = &self.client else {
            return;
        };
        let objects = client.objects();
        objects.players.remove(client.id());
        Metrics::set(&client.metrics().players_in_game, objects.players.len());

        self.sync_best_score();
    }

    /// Start the movement task unless one is already running
    fn ensure_movement(&mut self, client: &ClientContext) {
        if self.movement.is_some() {
            return;
        }
        debug!(client = client.id(), "Starting movement loop");
        self.movement = Some(tokio::spawn(movement_loop(client.clone(), self.player.clone())));
    }

    fn consume_spore(&self, client: &ClientContext, spore_id: u64) -> Result<(), ClaimRejection> {
        let spores = &client.objects().spores;
        let spore = spores.get(spore_id).ok_or(ClaimRejection::SporeMissing(spore_id))?;

        {
            let player = self.player.read();
            validate_spore_claim(client.id(), &player, &spore, DISTANCE_BUFFER, Instant::now())?;
        }

        // Another player may have eaten it since the lookup
        if spores.remove(spore_id).is_none() {
            return Err(ClaimRejection::SporeMissing(spore_id));
        }
        self.player.write().grow(spore.mass());

        let metrics = client.metrics();
        Metrics::incr(&metrics.spores_consumed);
        Metrics::set(&metrics.spore_count, spores.len());
        Ok(())
    }

    fn consume_player(&self, client: &ClientContext, target_id: u64) -> Result<(), ClaimRejection> {
        if target_id == client.id() {
            return Err(ClaimRejection::SelfTarget);
        }

        let players = &client.objects().players;
        let target = players.get(target_id).ok_or(ClaimRejection::PlayerMissing(target_id))?;

        // Never hold two player locks at once
        let consumer = self.player.read().clone();
        let target_mass = {
            let target = target.read();
            validate_player_claim(&consumer, &target, DISTANCE_BUFFER)?;
            target.mass()
        };

        if players.remove(target_id).is_none() {
            return Err(ClaimRejection::PlayerMissing(target_id));
        }
        self.player.write().grow(target_mass);

        let metrics = client.metrics();
        Metrics::incr(&metrics.players_consumed);
        Metrics::set(&metrics.players_in_game, players.len());
        Ok(())
    }

    fn reject(&self, client: &ClientContext, what: &str, reason: ClaimRejection) {
        Metrics::incr(&client.metrics().claims_rejected);
        info!(client = client.id(), "Could not verify {} consumption: {}", what, reason);
    }

    /// Persist the current score if it beats the stored best. The write runs
    /// in the background and a failure is only logged.
    fn sync_best_score(&self) {
        let Some(client) = &self.client else {
            return;
        };

        let (db_id, score) = {
            let mut player = self.player.write();
            let score = player.score();
            if score <= player.best_score {
                return;
            }
            player.best_score = score;
            (player.db_id, score)
        };

        let db = client.db().clone();
        let id = client.id();
        tokio::spawn(async move {
            if let Err(e) = db.update_player_best_score(db_id, score).await {
                warn!(client = id, "Error updating player best score: {}", e);
            }
        });
    }
}

/// Send every current spore to the client in fixed-size batches
async fn stream_spores(client: ClientContext, batch_size: usize, delay: Duration) {
    let spores = client.objects().spores.snapshot();

    for (i, batch) in spores.chunks(batch_size.max(1)).enumerate() {
        if i > 0 {
            sleep(delay).await;
        }
        client.socket_send(Msg::spore_batch(
            batch.iter().map(|(id, spore)| (*id, spore.as_ref())),
        ));
    }

    debug!(client = client.id(), "Sent {} initial spores", spores.len());
}

/// Advance the player every tick until aborted
async fn movement_loop(client: ClientContext, player: SharedPlayer) {
    let mut ticker = interval(player_consts::TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let dt = player_consts::TICK.as_secs_f64();

    loop {
        ticker.tick().await;
        sync_player(&client, &player, dt, &mut rand::thread_rng());
    }
}

/// One movement tick: integrate, maybe shed a spore, then publish the player
fn sync_player<R: Rng + ?Sized>(client: &ClientContext, player: &SharedPlayer, dt: f64, rng: &mut R) {
    let id = client.id();

    let (snapshot, dropped) = {
        let mut player = player.write();
        player.integrate(dt);

        let dropped = if rng.gen::<f64>() < drop_chance(player.radius, client.max_spores()) {
            let spore = Spore::dropped_by(id, player.position, Spore::drop_radius(player.radius));
            player.grow(-spore.mass());
            Some(spore)
        } else {
            None
        };

        (Msg::player(id, &player), dropped)
    };

    if let Some(spore) = dropped {
        let spores = &client.objects().spores;
        let spore = Arc::new(spore);
        let spore_id = spores.add(spore.clone());

        let msg = Msg::spore(spore_id, &spore);
        client.broadcast(msg.clone());
        client.socket_send(msg);

        let metrics = client.metrics();
        Metrics::incr(&metrics.spores_dropped);
        Metrics::set(&metrics.spore_count, spores.len());
    }

    client.broadcast(snapshot.clone());
    client.socket_send(snapshot);
}
