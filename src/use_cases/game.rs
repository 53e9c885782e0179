// Movement processor: the single mutual-exclusion domain around the world.

use crate::domain::{Direction, MovementError, World, WorldError, WorldSnapshot};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Shared handle to the authoritative world.
///
/// Every read and write goes through one lock, so concurrent intents from any number
/// of connections are applied one at a time and snapshots never observe a torn update.
#[derive(Debug)]
pub struct GameWorld {
    world: Mutex<World>,
}

impl GameWorld {
    pub fn new(width: i32, height: i32) -> Result<Self, WorldError> {
        Ok(Self {
            world: Mutex::new(World::new(width, height)?),
        })
    }

    pub async fn apply_movement(
        &self,
        player_id: &str,
        direction: Direction,
    ) -> Result<bool, MovementError> {
        let mut world = self.world.lock().await;
        let changed = world.apply_movement(player_id, direction)?;
        if changed {
            debug!(player_id, ?direction, "player moved");
        }
        Ok(changed)
    }

    pub async fn join(&self, player_id: &str) -> Result<bool, MovementError> {
        let changed = self.world.lock().await.join(player_id)?;
        if changed {
            info!(player_id, "player joined");
        }
        Ok(changed)
    }

    pub async fn leave(&self, player_id: &str) -> bool {
        let changed = self.world.lock().await.leave(player_id);
        if changed {
            info!(player_id, "player left");
        }
        changed
    }

    pub async fn snapshot(&self) -> WorldSnapshot {
        self.world.lock().await.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Player;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_moves_from_distinct_players_are_all_applied() {
        let world = Arc::new(GameWorld::new(40, 40).expect("valid dimensions"));
        let callers = 32;

        let tasks: Vec<_> = (0..callers)
            .map(|i| {
                let world = world.clone();
                tokio::spawn(async move {
                    world
                        .apply_movement(&format!("p{i}"), Direction::Down)
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.expect("task completes"), Ok(true));
        }

        let snapshot = world.snapshot().await;
        assert_eq!(snapshot.players.len(), callers);
        for i in 0..callers {
            assert_eq!(
                snapshot.players[&format!("p{i}")],
                Player {
                    x: 0,
                    y: 1,
                    alive: true
                }
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_moves_on_one_player_are_never_lost() {
        let world = Arc::new(GameWorld::new(40, 40).expect("valid dimensions"));
        let steps = 30;

        let tasks: Vec<_> = (0..steps)
            .map(|_| {
                let world = world.clone();
                tokio::spawn(async move { world.apply_movement("p1", Direction::Right).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.expect("task completes"), Ok(true));
        }

        let snapshot = world.snapshot().await;
        assert_eq!(snapshot.players["p1"].x, steps);
    }

    #[tokio::test]
    async fn left_players_reject_moves_until_they_rejoin() {
        let world = GameWorld::new(10, 10).expect("valid dimensions");
        assert_eq!(world.join("p1").await, Ok(true));
        assert!(world.leave("p1").await);

        assert_eq!(world.apply_movement("p1", Direction::Right).await, Ok(false));
        assert_eq!(world.snapshot().await.players["p1"].x, 0);

        assert_eq!(world.join("p1").await, Ok(true));
        assert_eq!(world.apply_movement("p1", Direction::Right).await, Ok(true));
    }
}
