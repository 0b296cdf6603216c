//! Spawn placement for players and spores
//!
//! Samples random points in a square around the origin until one does not
//! overlap any existing player or spore. The square is widened after a round
//! of failed attempts, and after the final round the last candidate is
//! accepted even if it overlaps, so placement always terminates.

use rand::Rng;
use tracing::debug;

use crate::game::constants::spawn::{ATTEMPTS_PER_ROUND, BUFFER, INITIAL_BOUND, MAX_ROUNDS};
use crate::game::objects::SharedGameObjects;
use crate::util::vec2::Vec2;

/// An occupied circle in the arena
#[derive(Debug, Clone, Copy)]
pub struct Obstacle {
    pub position: Vec2,
    pub radius: f64,
}

/// Sampling parameters for [`find_spawn`]
#[derive(Debug, Clone)]
pub struct SpawnRules {
    pub initial_bound: f64,
    pub attempts_per_round: u32,
    pub max_rounds: u32,
    pub buffer: f64,
}

impl Default for SpawnRules {
    fn default() -> Self {
        Self {
            initial_bound: INITIAL_BOUND,
            attempts_per_round: ATTEMPTS_PER_ROUND,
            max_rounds: MAX_ROUNDS,
            buffer: BUFFER,
        }
    }
}

/// Whether a circle at `position` would overlap any obstacle
pub fn overlaps_any(position: Vec2, radius: f64, obstacles: &[Obstacle], buffer: f64) -> bool {
    obstacles.iter().any(|other| {
        let min_dist = radius + other.radius + buffer;
        position.distance_sq_to(other.position) < min_dist * min_dist
    })
}

/// Pick a position for a circle of `radius` avoiding `obstacles`
pub fn find_spawn<R: Rng + ?Sized>(
    rng: &mut R,
    radius: f64,
    obstacles: &[Obstacle],
    rules: &SpawnRules,
) -> Vec2 {
    let mut bound = rules.initial_bound;
    let mut candidate = Vec2::ZERO;

    for _ in 0..rules.max_rounds.max(1) {
        for _ in 0..rules.attempts_per_round.max(1) {
            candidate = Vec2::new(rng.gen_range(-bound..=bound), rng.gen_range(-bound..=bound));
            if !overlaps_any(candidate, radius, obstacles, rules.buffer) {
                return candidate;
            }
        }
        bound *= 2.0;
    }

    debug!(
        "No free spawn found for radius {:.1} among {} objects, accepting overlap",
        radius,
        obstacles.len()
    );
    candidate
}

/// Every player and spore currently in the arena, except the player
/// registered under `exclude_player`
pub fn collect_obstacles(objects: &SharedGameObjects, exclude_player: Option<u64>) -> Vec<Obstacle> {
    let mut obstacles = Vec::with_capacity(objects.players.len() + objects.spores.len());

    objects.players.for_each(|id, player| {
        if Some(id) != exclude_player {
            let player = player.read();
            obstacles.push(Obstacle {
                position: player.position,
                radius: player.radius,
            });
        }
    });
    objects.spores.for_each(|_, spore| {
        obstacles.push(Obstacle {
            position: spore.position,
            radius: spore.radius,
        });
    });

    obstacles
}

/// Spawn coordinates for a circle of `radius` in the shared arena
pub fn spawn_coords(radius: f64, objects: &SharedGameObjects, exclude_player: Option<u64>) -> Vec2 {
    let obstacles = collect_obstacles(objects, exclude_player);
    find_spawn(&mut rand::thread_rng(), radius, &obstacles, &SpawnRules::default())
}
