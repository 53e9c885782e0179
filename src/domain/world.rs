// Authoritative board model and the movement rules applied to it.

use super::direction::Direction;
use std::collections::{BTreeMap, HashMap};

pub const MAX_PLAYER_ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Player {
    pub x: i32,
    pub y: i32,
    pub alive: bool,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            alive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    InvalidDimensions { width: i32, height: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementError {
    // Empty or oversized identity; never creates a player.
    InvalidPlayerId,
}

/// Immutable copy of the world taken at broadcast time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSnapshot {
    pub width: i32,
    pub height: i32,
    // Ordered so identical states serialize identically.
    pub players: BTreeMap<String, Player>,
}

#[derive(Debug)]
pub struct World {
    width: i32,
    height: i32,
    players: HashMap<String, Player>,
}

/// Ids must be non-blank, carry no surrounding whitespace and fit in `MAX_PLAYER_ID_LEN` bytes.
pub fn validate_player_id(player_id: &str) -> Result<(), MovementError> {
    if player_id.trim().is_empty()
        || player_id.trim() != player_id
        || player_id.len() > MAX_PLAYER_ID_LEN
    {
        return Err(MovementError::InvalidPlayerId);
    }
    Ok(())
}

impl World {
    pub fn new(width: i32, height: i32) -> Result<Self, WorldError> {
        if width <= 0 || height <= 0 {
            return Err(WorldError::InvalidDimensions { width, height });
        }
        Ok(Self {
            width,
            height,
            players: HashMap::new(),
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Applies one step for `player_id`, creating the player at the origin if unseen.
    ///
    /// Returns `Ok(true)` only when the position actually changed. Moves into a wall
    /// are clamped per axis, and dead players are rejected silently with `Ok(false)`.
    pub fn apply_movement(
        &mut self,
        player_id: &str,
        direction: Direction,
    ) -> Result<bool, MovementError> {
        validate_player_id(player_id)?;
        let (width, height) = (self.width, self.height);
        let player = self.players.entry(player_id.to_string()).or_default();

        if !player.alive {
            return Ok(false);
        }

        let (dx, dy) = direction.delta();
        let x = (player.x + dx).clamp(0, width - 1);
        let y = (player.y + dy).clamp(0, height - 1);
        let changed = x != player.x || y != player.y;
        player.x = x;
        player.y = y;
        Ok(changed)
    }

    /// Marks a player as connected: spawns it if unseen, revives it otherwise.
    pub fn join(&mut self, player_id: &str) -> Result<bool, MovementError> {
        validate_player_id(player_id)?;
        match self.players.get_mut(player_id) {
            Some(player) if player.alive => Ok(false),
            Some(player) => {
                player.alive = true;
                Ok(true)
            }
            None => {
                self.players.insert(player_id.to_string(), Player::default());
                Ok(true)
            }
        }
    }

    /// Marks a player as gone. The player keeps its position and stays visible.
    pub fn leave(&mut self, player_id: &str) -> bool {
        match self.players.get_mut(player_id) {
            Some(player) if player.alive => {
                player.alive = false;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            width: self.width,
            height: self.height,
            players: self
                .players
                .iter()
                .map(|(id, player)| (id.clone(), *player))
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn place(&mut self, player_id: &str, player: Player) {
        self.players.insert(player_id.to_string(), player);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> World {
        World::new(40, 40).expect("valid dimensions")
    }

    #[test]
    fn rejects_non_positive_dimensions() {
        assert_eq!(
            World::new(0, 10).unwrap_err(),
            WorldError::InvalidDimensions {
                width: 0,
                height: 10
            }
        );
        assert!(World::new(10, -1).is_err());
        assert!(World::new(1, 1).is_ok());
    }

    #[test]
    fn unseen_player_is_created_at_origin_before_moving() {
        let mut world = world();

        assert_eq!(world.apply_movement("p1", Direction::Right), Ok(true));
        assert_eq!(
            world.player("p1"),
            Some(&Player {
                x: 1,
                y: 0,
                alive: true
            })
        );
    }

    #[test]
    fn each_direction_moves_exactly_one_unit() {
        for direction in Direction::ALL {
            let mut world = world();
            world.place(
                "p1",
                Player {
                    x: 10,
                    y: 10,
                    alive: true,
                },
            );

            assert_eq!(world.apply_movement("p1", direction), Ok(true));

            let (dx, dy) = direction.delta();
            let player = world.player("p1").copied().expect("player exists");
            assert_eq!((player.x, player.y), (10 + dx, 10 + dy), "{direction:?}");
        }
    }

    #[test]
    fn moves_into_walls_are_clamped_and_report_no_change() {
        let mut world = world();

        // Fresh player sits in the top-left corner.
        assert_eq!(world.apply_movement("p1", Direction::Left), Ok(false));
        assert_eq!(world.apply_movement("p1", Direction::Up), Ok(false));
        assert_eq!(world.player("p1").map(|p| (p.x, p.y)), Some((0, 0)));

        world.place(
            "p2",
            Player {
                x: 39,
                y: 39,
                alive: true,
            },
        );
        assert_eq!(world.apply_movement("p2", Direction::Right), Ok(false));
        assert_eq!(world.apply_movement("p2", Direction::Down), Ok(false));
        assert_eq!(world.player("p2").map(|p| (p.x, p.y)), Some((39, 39)));
    }

    #[test]
    fn single_cell_board_never_moves() {
        let mut world = World::new(1, 1).expect("valid dimensions");
        for direction in Direction::ALL {
            assert_eq!(world.apply_movement("p1", direction), Ok(false));
        }
        assert_eq!(world.player("p1").map(|p| (p.x, p.y)), Some((0, 0)));
    }

    #[test]
    fn dead_players_never_move() {
        let mut world = world();
        let dead = Player {
            x: 5,
            y: 5,
            alive: false,
        };
        world.place("ghost", dead);

        for direction in Direction::ALL {
            assert_eq!(world.apply_movement("ghost", direction), Ok(false));
        }
        assert_eq!(world.player("ghost"), Some(&dead));
    }

    #[test]
    fn invalid_player_ids_are_rejected_without_creating_players() {
        let mut world = world();
        let oversized = "x".repeat(MAX_PLAYER_ID_LEN + 1);

        assert_eq!(
            world.apply_movement("", Direction::Up),
            Err(MovementError::InvalidPlayerId)
        );
        assert_eq!(
            world.apply_movement(&oversized, Direction::Up),
            Err(MovementError::InvalidPlayerId)
        );
        assert_eq!(world.player_count(), 0);
    }

    #[test]
    fn blank_or_padded_player_ids_are_rejected() {
        let mut world = world();

        for id in ["   ", "\t", " p1", "p1 "] {
            assert_eq!(
                world.apply_movement(id, Direction::Right),
                Err(MovementError::InvalidPlayerId),
                "id {id:?}"
            );
            assert_eq!(world.join(id), Err(MovementError::InvalidPlayerId));
        }
        assert_eq!(world.player_count(), 0);
        assert_eq!(validate_player_id("p 1"), Ok(()));
    }

    #[test]
    fn leave_and_join_toggle_liveness_but_keep_position() {
        let mut world = world();
        assert_eq!(world.join("p1"), Ok(true));
        assert_eq!(world.join("p1"), Ok(false));
        world.apply_movement("p1", Direction::Down).expect("valid id");

        assert!(world.leave("p1"));
        assert!(!world.leave("p1"));
        assert!(!world.leave("nobody"));
        assert_eq!(
            world.player("p1"),
            Some(&Player {
                x: 0,
                y: 1,
                alive: false
            })
        );

        assert_eq!(world.join("p1"), Ok(true));
        assert_eq!(world.player("p1").map(|p| p.alive), Some(true));
        assert_eq!(world.player("p1").map(|p| p.y), Some(1));
    }

    #[test]
    fn snapshot_is_detached_from_later_moves() {
        let mut world = world();
        world.apply_movement("p1", Direction::Right).expect("valid id");

        let snapshot = world.snapshot();
        world.apply_movement("p1", Direction::Right).expect("valid id");

        assert_eq!(snapshot.width, 40);
        assert_eq!(snapshot.height, 40);
        assert_eq!(snapshot.players["p1"].x, 1);
        assert_eq!(world.player("p1").map(|p| p.x), Some(2));
    }
}
