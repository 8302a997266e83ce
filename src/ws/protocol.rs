//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::MovementConfig;

/// Engine game modes. Anything but survival/adventure bypasses prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl Default for GameMode {
    fn default() -> Self {
        Self::Survival
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Handshake sent once after connecting
    Hello {
        /// Client runs local prediction and wants correction snapshots
        #[serde(default)]
        supports_prediction: bool,
    },

    /// Movement input for one client tick
    Input {
        /// Monotonic per player; zero is invalid
        sequence_id: u64,
        /// Bitfield of held keys
        input_bits: u32,
        /// Degrees
        yaw: f32,
        /// Degrees
        pitch: f32,
    },

    /// Engine-native position update from a client
    Move {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
    },

    /// Turn authoritative prediction on or off for this player
    SetPrediction {
        enabled: bool,
        #[serde(default)]
        controller_id: Option<String>,
        #[serde(default)]
        config: Option<MovementConfig>,
    },

    /// Game mode switch
    SetGameMode { mode: GameMode },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        player_id: Uuid,
        world_id: Uuid,
        server_time: u64,
        tick_rate: u32,
    },

    /// Authoritative correction after a simulated tick
    Snapshot {
        /// Last input sequence applied
        ack_sequence_id: u64,
        x: f64,
        y: f64,
        z: f64,
        vel_x: f32,
        vel_y: f32,
        vel_z: f32,
        on_ground: bool,
    },

    /// Prediction mode toggle
    PhysicsMode {
        enabled: bool,
        controller_id: Option<String>,
        config: Option<MovementConfig>,
    },

    /// Engine position override (rejected move)
    Position {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_message_parses() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"input","sequence_id":12,"input_bits":17,"yaw":90.0,"pitch":-5.0}"#,
        )
        .expect("parse");

        match msg {
            ClientMsg::Input {
                sequence_id,
                input_bits,
                ..
            } => {
                assert_eq!(sequence_id, 12);
                assert_eq!(input_bits, 17);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn hello_defaults_to_no_prediction() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"hello"}"#).expect("parse");
        assert!(matches!(
            msg,
            ClientMsg::Hello {
                supports_prediction: false
            }
        ));
    }

    #[test]
    fn snapshot_serializes_with_tag() {
        let msg = ServerMsg::Snapshot {
            ack_sequence_id: 3,
            x: 1.0,
            y: 64.0,
            z: -2.5,
            vel_x: 0.0,
            vel_y: 0.0,
            vel_z: 0.0,
            on_ground: true,
        };
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["ack_sequence_id"], 3);
        assert_eq!(value["on_ground"], true);
    }
}
