//! Server-side checks for client-claimed consumption events
//!
//! A rejected claim is logged and dropped. Nothing is sent back to the
//! claiming client; later broadcasts resynchronise its view.

use std::time::{Duration, Instant};

use crate::game::constants::validation::MASS_ADVANTAGE;
use crate::game::objects::{Player, Spore};
use crate::util::vec2::Vec2;

/// Reasons a consumption claim is rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClaimRejection {
    #[error("spore {0} no longer exists")]
    SporeMissing(u64),
    #[error("player {0} no longer exists")]
    PlayerMissing(u64),
    #[error("player cannot consume itself")]
    SelfTarget,
    #[error("player is too far from the object (dist_sq {dist_sq:.2}, threshold_sq {threshold_sq:.2})")]
    TooFar { dist_sq: f64, threshold_sq: f64 },
    #[error("player dropped the spore too recently ({elapsed:?}, min acceptable {required:?})")]
    DropCooldown { elapsed: Duration, required: Duration },
    #[error("player not massive enough (our mass {ours:.2}, needs more than {required:.2})")]
    InsufficientMass { ours: f64, required: f64 },
}

/// Circle-overlap test with slack: the object must lie within
/// `player.radius + buffer + radius` of the player's centre (inclusive)
pub fn check_close_to(
    player: &Player,
    position: Vec2,
    radius: f64,
    buffer: f64,
) -> Result<(), ClaimRejection> {
    let dist_sq = player.position.distance_sq_to(position);
    let threshold = player.radius + buffer + radius;
    let threshold_sq = threshold * threshold;

    if dist_sq > threshold_sq {
        return Err(ClaimRejection::TooFar {
            dist_sq,
            threshold_sq,
        });
    }
    Ok(())
}

/// Time a player needs before re-eating a spore it dropped: how long it takes
/// to travel clear of the spore at its current speed
pub fn drop_cooldown(player: &Player, spore: &Spore, buffer: f64) -> Duration {
    let min_distance = spore.radius + player.radius + buffer;
    if player.speed <= 0.0 {
        return Duration::MAX;
    }
    Duration::try_from_secs_f64(min_distance / player.speed).unwrap_or(Duration::MAX)
}

/// Reject a player re-consuming its own freshly dropped spore
pub fn check_drop_cooldown(
    player_id: u64,
    player: &Player,
    spore: &Spore,
    buffer: f64,
    now: Instant,
) -> Result<(), ClaimRejection> {
    let Some(drop) = spore.dropped else {
        return Ok(());
    };
    if drop.player_id != player_id {
        return Ok(());
    }

    let required = drop_cooldown(player, spore, buffer);
    let elapsed = now.saturating_duration_since(drop.at);
    if elapsed < required {
        return Err(ClaimRejection::DropCooldown { elapsed, required });
    }
    Ok(())
}

/// The consumer must be strictly more than `MASS_ADVANTAGE` times the target's mass
pub fn check_mass_advantage(consumer_mass: f64, target_mass: f64) -> Result<(), ClaimRejection> {
    let ours = consumer_mass;
    let required = target_mass * MASS_ADVANTAGE;

    if ours <= required {
        return Err(ClaimRejection::InsufficientMass { ours, required });
    }
    Ok(())
}

/// All checks for a spore consumption claim, in order
pub fn validate_spore_claim(
    player_id: u64,
    player: &Player,
    spore: &Spore,
    buffer: f64,
    now: Instant,
) -> Result<(), ClaimRejection> {
    check_close_to(player, spore.position, spore.radius, buffer)?;
    check_drop_cooldown(player_id, player, spore, buffer, now)?;
    Ok(())
}

/// All checks for a player consumption claim, in order
pub fn validate_player_claim(
    consumer: &Player,
    target: &Player,
    buffer: f64,
) -> Result<(), ClaimRejection> {
    check_mass_advantage(consumer.mass(), target.mass())?;
    check_close_to(consumer, target.position, target.radius, buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::validation::DISTANCE_BUFFER;
    use crate::game::objects::{radius_to_mass, SporeDrop};

    fn player_at(x: f64, y: f64, radius: f64) -> Player {
        let mut player = Player::new(1, "p".into(), 0, 0);
        player.position = Vec2::new(x, y);
        player.radius = radius;
        player
    }

    #[test]
    fn test_close_enough_inside() {
        let player = player_at(0.0, 0.0, 20.0);
        assert!(check_close_to(&player, Vec2::new(30.0, 0.0), 10.0, DISTANCE_BUFFER).is_ok());
    }

    #[test]
    fn test_close_enough_exact_boundary_accepted() {
        // 20 + 10 + 10 = 40, a 3-4-5 triangle lands exactly on it
        let player = player_at(0.0, 0.0, 20.0);
        assert!(check_close_to(&player, Vec2::new(24.0, 32.0), 10.0, DISTANCE_BUFFER).is_ok());
    }

    #[test]
    fn test_too_far_rejected() {
        let player = player_at(0.0, 0.0, 20.0);
        let result = check_close_to(&player, Vec2::new(40.01, 0.0), 10.0, DISTANCE_BUFFER);
        assert!(matches!(result, Err(ClaimRejection::TooFar { .. })));
    }

    #[test]
    fn test_cooldown_duration() {
        let player = player_at(0.0, 0.0, 20.0);
        let spore = Spore::new(Vec2::ZERO, 10.0);
        // (10 + 20 + 10) / 150
        let expected = Duration::from_secs_f64(40.0 / 150.0);
        assert_eq!(drop_cooldown(&player, &spore, DISTANCE_BUFFER), expected);
    }

    #[test]
    fn test_own_drop_rejected_before_cooldown() {
        let player = player_at(0.0, 0.0, 20.0);
        let at = Instant::now();
        let spore = Spore {
            position: Vec2::ZERO,
            radius: 10.0,
            dropped: Some(SporeDrop { player_id: 1, at }),
        };
        let required = drop_cooldown(&player, &spore, DISTANCE_BUFFER);

        let early = at + required - Duration::from_millis(1);
        let result = check_drop_cooldown(1, &player, &spore, DISTANCE_BUFFER, early);
        assert!(matches!(result, Err(ClaimRejection::DropCooldown { .. })));
    }

    #[test]
    fn test_own_drop_accepted_after_cooldown() {
        let player = player_at(0.0, 0.0, 20.0);
        let at = Instant::now();
        let spore = Spore {
            position: Vec2::ZERO,
            radius: 10.0,
            dropped: Some(SporeDrop { player_id: 1, at }),
        };
        let required = drop_cooldown(&player, &spore, DISTANCE_BUFFER);

        assert!(check_drop_cooldown(1, &player, &spore, DISTANCE_BUFFER, at + required).is_ok());
        assert!(check_drop_cooldown(
            1,
            &player,
            &spore,
            DISTANCE_BUFFER,
            at + required + Duration::from_millis(1)
        )
        .is_ok());
    }

    #[test]
    fn test_other_players_drop_has_no_cooldown() {
        let player = player_at(0.0, 0.0, 20.0);
        let at = Instant::now();
        let spore = Spore {
            position: Vec2::ZERO,
            radius: 10.0,
            dropped: Some(SporeDrop { player_id: 2, at }),
        };
        assert!(check_drop_cooldown(1, &player, &spore, DISTANCE_BUFFER, at).is_ok());
    }

    #[test]
    fn test_stationary_player_never_clears_cooldown() {
        let mut player = player_at(0.0, 0.0, 20.0);
        player.speed = 0.0;
        let spore = Spore::new(Vec2::ZERO, 10.0);
        assert_eq!(drop_cooldown(&player, &spore, DISTANCE_BUFFER), Duration::MAX);
    }

    #[test]
    fn test_mass_advantage_threshold() {
        // Mass ratio is the squared radius ratio; sqrt(1.5) ~= 1.2247
        let target = radius_to_mass(10.0);
        assert!(check_mass_advantage(radius_to_mass(10.0), target).is_err());
        assert!(check_mass_advantage(radius_to_mass(12.2), target).is_err());
        assert!(check_mass_advantage(radius_to_mass(12.3), target).is_ok());
    }

    #[test]
    fn test_mass_advantage_exact_ratio_rejected() {
        // 100 * 1.5 is exactly 150 in binary floating point
        let result = check_mass_advantage(150.0, 100.0);
        assert_eq!(
            result,
            Err(ClaimRejection::InsufficientMass {
                ours: 150.0,
                required: 150.0
            })
        );
        assert!(check_mass_advantage(150.0 + 1e-9, 100.0).is_ok());
    }

    #[test]
    fn test_player_claim_checks_mass_before_distance() {
        let consumer = player_at(0.0, 0.0, 10.0);
        let target = player_at(1000.0, 0.0, 10.0);
        let result = validate_player_claim(&consumer, &target, DISTANCE_BUFFER);
        assert!(matches!(result, Err(ClaimRejection::InsufficientMass { .. })));
    }

    #[test]
    fn test_player_claim_accepted() {
        let consumer = player_at(0.0, 0.0, 40.0);
        let target = player_at(30.0, 0.0, 20.0);
        assert!(validate_player_claim(&consumer, &target, DISTANCE_BUFFER).is_ok());
    }
}
