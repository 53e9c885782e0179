// Domain layer: board model and movement rules.

pub mod direction;
pub mod world;

pub use direction::{Direction, DirectionError};
pub use world::{MAX_PLAYER_ID_LEN, MovementError, Player, World, WorldError, WorldSnapshot};
