//! Aggregate readiness of the match.
//!
//! The match is ready when at least one player is known and every known
//! player has reported ready. Only changes are reported, so each transition
//! produces exactly one `START` or `STOP`.

use crate::lobby::{Lobby, Player};
use log::info;
use shared::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ready,
    Unready,
}

impl Transition {
    pub fn command(self) -> Command {
        match self {
            Transition::Ready => Command::Start,
            Transition::Unready => Command::Stop,
        }
    }
}

#[derive(Debug, Default)]
pub struct Readiness {
    all_ready: bool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.all_ready
    }

    pub fn compute(players: &[Player]) -> bool {
        !players.is_empty() && players.iter().all(|p| p.ready)
    }

    /// Recomputes readiness and reports the edge, if any.
    pub fn recompute(&mut self, players: &[Player]) -> Option<Transition> {
        let all_ready = Self::compute(players);
        if all_ready == self.all_ready {
            return None;
        }

        self.all_ready = all_ready;
        info!("All players ready: {}", all_ready);
        Some(if all_ready {
            Transition::Ready
        } else {
            Transition::Unready
        })
    }

    /// Clears every remaining player's ready flag, then recomputes.
    ///
    /// Used whenever the player set changes, so a partial departure always
    /// drops the match back to "not ready".
    pub fn reset(&mut self, lobby: &mut Lobby) -> Option<Transition> {
        lobby.clear_ready();
        self.recompute(lobby.players())
    }
}
