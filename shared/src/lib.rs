//! Wire protocol and playfield geometry shared by the Pong server and the
//! controller clients that talk to it.
//!
//! Frames are UTF-8 text, one per line, with fields separated by `:`.
//! Inbound frames come from controllers (`JOIN`, `READY`, `LEAVE`, `up`,
//! `down`); outbound commands are broadcast by the server (`START`, `STOP`,
//! `SCORE`, `STATE`).

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_PLAYERS: usize = 2;

pub const SCENE_WIDTH: f32 = 800.0;
pub const SCENE_HEIGHT: f32 = 600.0;

pub const PADDLE_WIDTH: f32 = 20.0;
pub const PADDLE_HEIGHT: f32 = 120.0;
/// Horizontal gap between a scene edge and the outer face of its paddle.
pub const PADDLE_OFFSET: f32 = 50.0;
pub const PADDLE_STEP: f32 = 20.0;

pub const BALL_SIZE: f32 = 20.0;
/// Ball speed in scene units per tick at the start of a rally.
pub const BALL_SPEED: f32 = 6.0;
pub const BALL_SPEED_UP: f32 = 1.05;
pub const BALL_MAX_SPEED: f32 = 18.0;

/// Longest inbound frame accepted, in bytes, excluding the line terminator.
pub const MAX_FRAME_LEN: usize = 2048;

pub const FIELD_SEPARATOR: char = ':';

/// Half of the playfield a player controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn parse(raw: &str) -> Option<Side> {
        match raw {
            "left" => Some(Side::Left),
            "right" => Some(Side::Right),
            _ => None,
        }
    }

    pub fn opponent(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame sent by a controller to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Join { side: Side, name: String },
    Ready(bool),
    Leave { name: String },
    Up,
    Down,
}

impl Frame {
    /// Parses one inbound frame.
    ///
    /// Returns `None` for anything that is not a well-formed known command:
    /// unknown names, missing fields, an unknown side, an empty name, or a
    /// ready flag other than `0`/`1`. The protocol is permissive, so callers
    /// drop such frames instead of treating them as errors.
    pub fn parse(raw: &str) -> Option<Frame> {
        let raw = raw.trim();

        let Some((command, rest)) = raw.split_once(FIELD_SEPARATOR) else {
            return match raw {
                "up" => Some(Frame::Up),
                "down" => Some(Frame::Down),
                _ => None,
            };
        };

        match command {
            "JOIN" => {
                let (side, name) = rest.split_once(FIELD_SEPARATOR)?;
                let side = Side::parse(side.trim())?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some(Frame::Join {
                    side,
                    name: name.to_string(),
                })
            }
            "READY" => match rest.trim() {
                "1" => Some(Frame::Ready(true)),
                "0" => Some(Frame::Ready(false)),
                _ => None,
            },
            "LEAVE" => {
                let name = rest.trim();
                if name.is_empty() {
                    return None;
                }
                Some(Frame::Leave {
                    name: name.to_string(),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Join { side, name } => write!(f, "JOIN:{}:{}", side, name),
            Frame::Ready(ready) => write!(f, "READY:{}", if *ready { 1 } else { 0 }),
            Frame::Leave { name } => write!(f, "LEAVE:{}", name),
            Frame::Up => f.write_str("up"),
            Frame::Down => f.write_str("down"),
        }
    }
}

/// A command broadcast by the server to every connected controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Score { left: u32, right: u32 },
    /// JSON snapshot of the match, sent after every tick when state sync is on.
    State(String),
    /// Free-form text pushed through the public broadcast operation.
    Message(String),
}

impl Command {
    pub fn parse(raw: &str) -> Command {
        let raw = raw.trim_end_matches(&['\r', '\n'][..]);
        match raw {
            "START" => return Command::Start,
            "STOP" => return Command::Stop,
            _ => {}
        }

        if let Some(json) = raw.strip_prefix("STATE:") {
            return Command::State(json.to_string());
        }

        if let Some(scores) = raw.strip_prefix("SCORE:") {
            if let Some((left, right)) = scores.split_once(FIELD_SEPARATOR) {
                if let (Ok(left), Ok(right)) = (left.parse(), right.parse()) {
                    return Command::Score { left, right };
                }
            }
        }

        Command::Message(raw.to_string())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => f.write_str("START"),
            Command::Stop => f.write_str("STOP"),
            Command::Score { left, right } => write!(f, "SCORE:{}:{}", left, right),
            Command::State(json) => write!(f, "STATE:{}", json),
            Command::Message(text) => f.write_str(text),
        }
    }
}

/// Axis-aligned bounding box in scene coordinates (y grows downwards).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Aabb {
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            min_x: cx - width / 2.0,
            min_y: cy - height / 2.0,
            max_x: cx + width / 2.0,
            max_y: cy + height / 2.0,
        }
    }

    /// Boxes that only touch along an edge do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        !(self.max_x <= other.min_x
            || other.max_x <= self.min_x
            || self.max_y <= other.min_y
            || other.max_y <= self.min_y)
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}
