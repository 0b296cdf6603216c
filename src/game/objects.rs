use parking_lot::RwLock;
use rand::Rng;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Instant;

use crate::game::constants::{player, spores};
use crate::game::registry::Registry;
use crate::util::vec2::Vec2;

/// Area-equivalent mass of a circle
#[inline]
pub fn radius_to_mass(radius: f64) -> f64 {
    PI * radius * radius
}

/// Radius of a circle with the given mass
#[inline]
pub fn mass_to_radius(mass: f64) -> f64 {
    (mass.max(0.0) / PI).sqrt()
}

/// Player avatar. Shared between its owning session, its movement task and
/// any peer validating a consumption claim against it.
#[derive(Debug, Clone, Default)]
pub struct Player {
    /// Persisted player row
    pub db_id: i64,
    pub name: String,
    pub position: Vec2,
    pub radius: f64,
    /// Heading in radians
    pub direction: f64,
    pub speed: f64,
    pub color: i32,
    /// Highest score persisted so far
    pub best_score: i64,
}

impl Player {
    pub fn new(db_id: i64, name: String, color: i32, best_score: i64) -> Self {
        Self {
            db_id,
            name,
            color,
            best_score,
            radius: player::START_RADIUS,
            speed: player::START_SPEED,
            ..Default::default()
        }
    }

    /// A fresh avatar for the same persisted player
    pub fn respawned(&self) -> Self {
        Self::new(self.db_id, self.name.clone(), self.color, self.best_score)
    }

    pub fn mass(&self) -> f64 {
        radius_to_mass(self.radius)
    }

    /// Add (or, when negative, remove) mass and recompute the radius
    pub fn grow(&mut self, mass_diff: f64) {
        self.radius = mass_to_radius(self.mass() + mass_diff);
    }

    /// Current score, the rounded mass
    pub fn score(&self) -> i64 {
        self.mass().round() as i64
    }

    /// Advance the position along the current heading
    pub fn integrate(&mut self, dt: f64) {
        self.position += Vec2::from_angle(self.direction) * (self.speed * dt);
    }
}

pub type SharedPlayer = Arc<RwLock<Player>>;

/// Provenance of a spore shed by a player. Holds the dropping player's
/// session ID, never the player itself.
#[derive(Debug, Clone, Copy)]
pub struct SporeDrop {
    pub player_id: u64,
    pub at: Instant,
}

/// Stationary consumable pickup
#[derive(Debug, Clone)]
pub struct Spore {
    pub position: Vec2,
    pub radius: f64,
    pub dropped: Option<SporeDrop>,
}

impl Spore {
    pub fn new(position: Vec2, radius: f64) -> Self {
        Self {
            position,
            radius,
            dropped: None,
        }
    }

    /// A spore shed by `player_id` at its current position
    pub fn dropped_by(player_id: u64, position: Vec2, radius: f64) -> Self {
        Self {
            position,
            radius,
            dropped: Some(SporeDrop {
                player_id,
                at: Instant::now(),
            }),
        }
    }

    pub fn mass(&self) -> f64 {
        radius_to_mass(self.radius)
    }

    /// Radius for a freshly placed spore: normally distributed around
    /// `RADIUS_MEAN`, clamped below at `RADIUS_MIN`
    pub fn random_radius<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        let sample = spores::RADIUS_MEAN + standard_normal(rng) * spores::RADIUS_STDDEV;
        sample.max(spores::RADIUS_MIN)
    }

    /// Radius of a spore shed by a player of the given radius
    pub fn drop_radius(player_radius: f64) -> f64 {
        (player::DROP_BASE_RADIUS + player_radius / player::DROP_RADIUS_DIVISOR)
            .min(player::DROP_MAX_RADIUS)
    }
}

/// Box-Muller sample from N(0, 1)
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // gen::<f64>() is in [0, 1); shift to (0, 1] so ln() stays finite
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Player and spore registries shared by every session
pub struct SharedGameObjects {
    /// Keyed by the owning session's client ID
    pub players: Registry<SharedPlayer>,
    pub spores: Registry<Arc<Spore>>,
}

impl SharedGameObjects {
    pub fn new() -> Self {
        Self {
            players: Registry::new(),
            spores: Registry::with_capacity(spores::MAX),
        }
    }

    /// Whether a player with this display name is currently in the game
    pub fn player_name_taken(&self, name: &str) -> bool {
        self.players
            .snapshot()
            .iter()
            .any(|(_, player)| player.read().name.eq_ignore_ascii_case(name))
    }

    /// Add `player` under `id` unless another player already uses its name
    /// (case-insensitively). Returns false when the name is taken
    pub fn reserve_player(&self, id: u64, player: &SharedPlayer) -> bool {
        let name = player.read().name.clone();
        self.players
            .add_with_id_unless(player.clone(), id, |other| other.read().name.eq_ignore_ascii_case(&name))
    }
}

impl Default for SharedGameObjects {
    fn default() -> Self {
        Self::new()
    }
}
