//! Durable per-username rating object and the registry that interns them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::game::Result_;

const INITIAL_RATING: i64 = 1500;
const K: f64 = 32.0;

/// One player's durable identity and skill rating. Lives for the process's
/// lifetime once created; shared by `Arc` among every session ever logged in
/// under its name.
pub struct Player {
    name: String,
    rating: Mutex<i64>,
}

impl Player {
    fn new(name: String) -> Self {
        Player {
            name,
            rating: Mutex::new(INITIAL_RATING),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rating(&self) -> i64 {
        *self.rating.lock().unwrap()
    }
}

/// Update both players' ratings for the outcome of a completed game between
/// them. `result` is from player1's perspective. No-op if `p1` and `p2` are
/// the same player.
pub fn post_result(p1: &Arc<Player>, p2: &Arc<Player>, result: Result_) {
    if Arc::ptr_eq(p1, p2) {
        return;
    }
    let s1 = match result {
        Result_::FirstWins => 1.0,
        Result_::SecondWins => 0.0,
        Result_::Draw => 0.5,
    };

    // Lock in a deterministic order (by address) to avoid deadlock when two
    // games post results for the same pair concurrently from opposite sides.
    let (first, second, first_is_p1) = if Arc::as_ptr(p1) as usize <= Arc::as_ptr(p2) as usize {
        (p1, p2, true)
    } else {
        (p2, p1, false)
    };
    let mut first_rating = first.rating.lock().unwrap();
    let mut second_rating = second.rating.lock().unwrap();

    let (r1_old, r2_old) = if first_is_p1 {
        (*first_rating, *second_rating)
    } else {
        (*second_rating, *first_rating)
    };

    let e1 = 1.0 / (1.0 + 10f64.powf((r2_old - r1_old) as f64 / 400.0));
    let r1_new = (r1_old as f64 + K * (s1 - e1)).round() as i64;
    let r2_new = r1_old + r2_old - r1_new;

    if first_is_p1 {
        *first_rating = r1_new;
        *second_rating = r2_new;
    } else {
        *first_rating = r2_new;
        *second_rating = r1_new;
    }
}

/// Process-wide `name -> Player` table. Monotonically grows; no eviction.
#[derive(Default)]
pub struct PlayerRegistry {
    players: Mutex<HashMap<String, Arc<Player>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        PlayerRegistry::default()
    }

    /// Return the existing Player for `name`, or create one with the
    /// initial rating and insert it.
    pub fn register(&self, name: &str) -> Arc<Player> {
        let mut players = self.players.lock().unwrap();
        players
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Player::new(name.to_string())))
            .clone()
    }

    /// Snapshot of every interned player, for tests and diagnostics.
    pub fn all(&self) -> Vec<Arc<Player>> {
        self.players.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_returns_the_same_player() {
        let registry = PlayerRegistry::new();
        let a1 = registry.register("alice");
        let a2 = registry.register("alice");
        assert!(Arc::ptr_eq(&a1, &a2));
    }

    #[test]
    fn elo_update_preserves_total_rating_and_matches_known_values() {
        let registry = PlayerRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        let total_before = a.rating() + b.rating();
        post_result(&a, &b, Result_::SecondWins);
        assert_eq!(a.rating() + b.rating(), total_before);
        assert_eq!(a.rating(), 1484);
        assert_eq!(b.rating(), 1516);
    }

    #[test]
    fn post_result_is_a_no_op_for_the_same_player() {
        let registry = PlayerRegistry::new();
        let a = registry.register("a");
        post_result(&a, &a, Result_::FirstWins);
        assert_eq!(a.rating(), 1500);
    }

    #[test]
    fn draw_leaves_equally_rated_players_unchanged() {
        let registry = PlayerRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        post_result(&a, &b, Result_::Draw);
        assert_eq!(a.rating(), 1500);
        assert_eq!(b.rating(), 1500);
    }
}
