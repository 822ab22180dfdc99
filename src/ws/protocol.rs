//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::game::events::DeathReason;
use crate::game::player::{validate_name, MoveFlags, PlayerId};

/// Largest text frame accepted from a client, in bytes
pub const MAX_MESSAGE_BYTES: usize = 1024;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// First message on a connection
    Join { name: String },

    /// Movement and look state
    Input {
        /// Monotonic per player, superseded by later values
        seq: u32,
        /// `MoveFlags` bits
        move_flags: u8,
        yaw: f32,
        pitch: f32,
        #[serde(default)]
        jump: bool,
        #[serde(default)]
        dash: bool,
    },

    /// Fire along the given view angles
    Shoot {
        /// Monotonic per player, separate from input seq
        seq: u32,
        origin_yaw: f32,
        origin_pitch: f32,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Graceful disconnect
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Join accepted, with the full world state
    JoinAck {
        id: PlayerId,
        tick: u64,
        snapshot: Vec<EntityState>,
    },

    /// Join refused at capacity; the socket closes afterwards
    ServerFull { max_players: usize },

    /// Join refused for another reason; the socket closes afterwards
    JoinRejected { reason: String },

    /// Diff since the previous broadcast
    StateBroadcast(StateBroadcast),

    /// Someone fired
    Shot {
        shooter_id: PlayerId,
        origin: Vec3,
        direction: Vec3,
    },

    /// A player left the server
    Disconnect { id: PlayerId },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },

    /// Error message
    Error { code: String, message: String },
}

/// Full entity state, sent on join and for newly joined players
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: PlayerId,
    pub name: String,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub health: i32,
    pub kills: u32,
    pub deaths: u32,
    pub alive: bool,
}

/// Changed fields of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub id: PlayerId,
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub health: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeathNotice {
    pub victim_id: PlayerId,
    pub killer_id: Option<PlayerId>,
    pub position: Vec3,
    pub reason: DeathReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespawnNotice {
    pub id: PlayerId,
    pub position: Vec3,
    pub health: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitNotice {
    pub shooter_id: PlayerId,
    pub target_id: PlayerId,
    pub damage: i32,
    pub health: i32,
}

/// Everything that changed since the previous broadcast
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateBroadcast {
    pub tick: u64,
    pub changed: Vec<EntityUpdate>,
    pub joined: Vec<EntityState>,
    pub left: Vec<PlayerId>,
    pub deaths: Vec<DeathNotice>,
    pub respawns: Vec<RespawnNotice>,
    pub hits: Vec<HitNotice>,
}

impl StateBroadcast {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
            && self.joined.is_empty()
            && self.left.is_empty()
            && self.deaths.is_empty()
            && self.respawns.is_empty()
            && self.hits.is_empty()
    }
}

/// Why an inbound message was dropped
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message too large ({0} bytes)")]
    TooLarge(usize),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Non-finite number in {0}")]
    NonFinite(&'static str),

    #[error("Unknown movement flags {0:#04x}")]
    InvalidFlags(u8),

    #[error("Sequence number must be positive")]
    InvalidSeq,

    #[error("Invalid player name")]
    InvalidName,
}

/// Parse and validate one text frame from a client
pub fn parse_client_msg(text: &str) -> Result<ClientMsg, ProtocolError> {
    if text.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge(text.len()));
    }

    let msg: ClientMsg = serde_json::from_str(text)?;
    match &msg {
        ClientMsg::Join { name } => {
            if validate_name(name).is_none() {
                return Err(ProtocolError::InvalidName);
            }
        }
        ClientMsg::Input {
            seq,
            move_flags,
            yaw,
            pitch,
            ..
        } => {
            if *seq == 0 {
                return Err(ProtocolError::InvalidSeq);
            }
            if !MoveFlags(*move_flags).is_valid() {
                return Err(ProtocolError::InvalidFlags(*move_flags));
            }
            if !yaw.is_finite() || !pitch.is_finite() {
                return Err(ProtocolError::NonFinite("input"));
            }
        }
        ClientMsg::Shoot {
            seq,
            origin_yaw,
            origin_pitch,
        } => {
            if *seq == 0 {
                return Err(ProtocolError::InvalidSeq);
            }
            if !origin_yaw.is_finite() || !origin_pitch.is_finite() {
                return Err(ProtocolError::NonFinite("shoot"));
            }
        }
        ClientMsg::Ping { .. } | ClientMsg::Leave => {}
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn parses_input_with_optional_flags() {
        let msg = parse_client_msg(
            r#"{"type":"input","seq":3,"move_flags":17,"yaw":0.5,"pitch":-0.1}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMsg::Input {
                seq: 3,
                move_flags: 17,
                yaw: 0.5,
                pitch: -0.1,
                jump: false,
                dash: false,
            }
        );
    }

    #[test]
    fn parses_join_shoot_ping_and_leave() {
        assert!(matches!(
            parse_client_msg(r#"{"type":"join","name":"ann"}"#).unwrap(),
            ClientMsg::Join { .. }
        ));
        assert!(matches!(
            parse_client_msg(r#"{"type":"shoot","seq":1,"origin_yaw":0,"origin_pitch":0}"#).unwrap(),
            ClientMsg::Shoot { seq: 1, .. }
        ));
        assert_eq!(
            parse_client_msg(r#"{"type":"ping","t":42}"#).unwrap(),
            ClientMsg::Ping { t: 42 }
        );
        assert_eq!(parse_client_msg(r#"{"type":"leave"}"#).unwrap(), ClientMsg::Leave);
    }

    #[rstest]
    #[case::not_json("hello")]
    #[case::unknown_kind(r#"{"type":"teleport","x":1}"#)]
    #[case::missing_field(r#"{"type":"input","seq":1}"#)]
    #[case::wrong_type(r#"{"type":"input","seq":"one","move_flags":0,"yaw":0,"pitch":0}"#)]
    #[case::zero_seq(r#"{"type":"input","seq":0,"move_flags":0,"yaw":0,"pitch":0}"#)]
    #[case::bad_flags(r#"{"type":"input","seq":1,"move_flags":128,"yaw":0,"pitch":0}"#)]
    #[case::overflowing_float(r#"{"type":"shoot","seq":1,"origin_yaw":1e40,"origin_pitch":0}"#)]
    #[case::bad_name(r#"{"type":"join","name":"<b>"}"#)]
    #[case::long_name(r#"{"type":"join","name":"abcdefghijklmnopq"}"#)]
    fn rejects_malformed_messages(#[case] text: &str) {
        assert!(parse_client_msg(text).is_err());
    }

    #[test]
    fn rejects_oversized_frames() {
        let text = format!(r#"{{"type":"join","name":"{}"}}"#, "a".repeat(2000));
        assert!(matches!(parse_client_msg(&text), Err(ProtocolError::TooLarge(_))));
    }

    #[test]
    fn server_messages_are_type_tagged() {
        let msg = ServerMsg::StateBroadcast(StateBroadcast {
            tick: 9,
            left: vec![PlayerId(4)],
            deaths: vec![DeathNotice {
                victim_id: PlayerId(2),
                killer_id: None,
                position: Vec3::new(1.0, -51.0, 0.0),
                reason: DeathReason::Void,
            }],
            ..StateBroadcast::default()
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "state_broadcast");
        assert_eq!(value["tick"], 9);
        assert_eq!(value["left"], json!([4]));
        assert_eq!(value["deaths"][0]["killer_id"], json!(null));
        assert_eq!(value["deaths"][0]["reason"], "void");

        let full = serde_json::to_value(ServerMsg::ServerFull { max_players: 16 }).unwrap();
        assert_eq!(full, json!({"type": "server_full", "max_players": 16}));
    }
}
