// Wire protocol DTOs and conversions for messages exchanged over the WebSocket.

use crate::domain::{Player, WorldSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Movement intent sent by a client.
///
/// `direction` stays a raw string here; unknown values are rejected intents rather
/// than decode failures.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub player_id: String,
    pub direction: String,
}

/// Messages the server sends to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "gameState")]
    pub game_state: GameStateDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateDto {
    pub width: i32,
    pub height: i32,
    pub players: BTreeMap<String, PlayerDto>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerDto {
    pub x: i32,
    pub y: i32,
    pub alive: bool,
}

impl From<&Player> for PlayerDto {
    fn from(player: &Player) -> Self {
        Self {
            x: player.x,
            y: player.y,
            alive: player.alive,
        }
    }
}

impl From<PlayerDto> for Player {
    fn from(player: PlayerDto) -> Self {
        Self {
            x: player.x,
            y: player.y,
            alive: player.alive,
        }
    }
}

impl From<&WorldSnapshot> for ServerMessage {
    fn from(snapshot: &WorldSnapshot) -> Self {
        Self {
            game_state: GameStateDto {
                width: snapshot.width,
                height: snapshot.height,
                players: snapshot
                    .players
                    .iter()
                    .map(|(id, player)| (id.clone(), PlayerDto::from(player)))
                    .collect(),
            },
        }
    }
}

impl From<ServerMessage> for WorldSnapshot {
    fn from(msg: ServerMessage) -> Self {
        let state = msg.game_state;
        Self {
            width: state.width,
            height: state.height,
            players: state
                .players
                .into_iter()
                .map(|(id, player)| (id, Player::from(player)))
                .collect(),
        }
    }
}

pub fn encode_snapshot(snapshot: &WorldSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ServerMessage::from(snapshot))
}
