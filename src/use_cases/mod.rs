// Use cases layer: serialized access to the shared world.

pub mod game;
pub mod types;

pub use game::GameWorld;
pub use types::StateChanged;
