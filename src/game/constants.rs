/// Spore economy constants
pub mod spores {
    use std::time::Duration;

    /// Target spore population the hub keeps nudging the arena towards
    pub const MAX: usize = 1000;
    /// Mean radius of a freshly placed spore
    pub const RADIUS_MEAN: f64 = 10.0;
    /// Standard deviation of a freshly placed spore's radius
    pub const RADIUS_STDDEV: f64 = 3.0;
    /// Smallest radius a freshly placed spore can have
    pub const RADIUS_MIN: f64 = 5.0;
    /// How often the replenishment task checks the spore deficit
    pub const REPLENISH_INTERVAL: Duration = Duration::from_secs(5);
    /// Maximum spores created per replenishment tick
    pub const REPLENISH_BATCH: usize = 10;
    /// Delay between consecutive replenishment announcements
    pub const REPLENISH_PACING: Duration = Duration::from_millis(50);
}

/// Player movement and growth constants
pub mod player {
    use std::time::Duration;

    /// Speed (units/second) assigned on entering the game
    pub const START_SPEED: f64 = 150.0;
    /// Radius assigned on entering the game
    pub const START_RADIUS: f64 = 20.0;
    /// Fixed movement timestep
    pub const TICK: Duration = Duration::from_millis(50);
    /// Players at or below this radius never shed spores
    pub const DROP_MIN_RADIUS: f64 = 10.0;
    /// Base radius of a shed spore (grows with player radius / DROP_RADIUS_DIVISOR)
    pub const DROP_BASE_RADIUS: f64 = 5.0;
    pub const DROP_RADIUS_DIVISOR: f64 = 50.0;
    /// Largest spore a player can shed
    pub const DROP_MAX_RADIUS: f64 = 15.0;
    /// Drop probability per tick is radius / (max_spores * DROP_CHANCE_DIVISOR),
    /// where max_spores is the configured arena population
    pub const DROP_CHANCE_DIVISOR: f64 = 5.0;
}

/// Consumption claim validation constants
pub mod validation {
    /// Slack added to the circle-overlap distance test
    pub const DISTANCE_BUFFER: f64 = 10.0;
    /// Consumer mass must be strictly greater than target mass times this
    pub const MASS_ADVANTAGE: f64 = 1.5;
}

/// Spawn placement constants
pub mod spawn {
    /// Half-width of the initial square sampling area
    pub const INITIAL_BOUND: f64 = 3000.0;
    /// Attempts per sampling area before it is widened
    pub const ATTEMPTS_PER_ROUND: u32 = 25;
    /// Sampling rounds before falling back. The area doubles between
    /// rounds, so the last round samples within 16x the initial bound
    pub const MAX_ROUNDS: u32 = 5;
    /// Extra clearance required between a spawn and existing objects
    pub const BUFFER: f64 = 0.0;
}

/// Initial spore streaming to a client entering the game
pub mod streaming {
    use std::time::Duration;

    /// Spores per batch message
    pub const SPORE_BATCH_SIZE: usize = 100;
    /// Pause between batches
    pub const BATCH_DELAY: Duration = Duration::from_millis(10);
}

/// Connection/session constants
pub mod net {
    /// Maximum framed message size (64KB)
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Outbound queue depth per client before packets are dropped
    pub const OUTBOUND_QUEUE: usize = 256;
    /// Maximum player name length after sanitising
    pub const MAX_NAME_LEN: usize = 16;
    /// Entries returned on a hiscore board request
    pub const HISCORE_BOARD_SIZE: i64 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replenish_batch_below_target() {
        assert!(spores::REPLENISH_BATCH < spores::MAX);
        assert!(spores::REPLENISH_BATCH > 0);
    }

    #[test]
    fn test_drop_radius_bounds() {
        assert!(player::DROP_BASE_RADIUS <= player::DROP_MAX_RADIUS);
        assert!(player::START_RADIUS > player::DROP_MIN_RADIUS);
    }

    #[test]
    fn test_spawn_rounds_terminate() {
        assert!(spawn::ATTEMPTS_PER_ROUND > 0);
        assert!(spawn::MAX_ROUNDS > 0);
    }
}
