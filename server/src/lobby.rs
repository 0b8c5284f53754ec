//! Players of the current match and the per-side rosters.
//!
//! At most one player may hold each side, and names are unique within the
//! match. The lobby owns the players; connections refer to them by name
//! through the client manager.

use log::info;
use serde::{Deserialize, Serialize};
use shared::Side;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub side: Side,
    pub ready: bool,
}

impl Player {
    pub fn new(name: impl Into<String>, side: Side) -> Self {
        Self {
            name: name.into(),
            side,
            ready: false,
        }
    }
}

/// Why a JOIN was turned down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinRejection {
    #[error("side {side} is already held by {holder}")]
    SideTaken { side: Side, holder: String },

    #[error("name {0} is already in use")]
    NameTaken(String),
}

#[derive(Debug, Default)]
pub struct Lobby {
    /// Players in join order.
    players: Vec<Player>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, side: Side, name: &str) -> Result<&Player, JoinRejection> {
        if self.get(name).is_some() {
            return Err(JoinRejection::NameTaken(name.to_string()));
        }
        if let Some(holder) = self.occupant(side) {
            return Err(JoinRejection::SideTaken {
                side,
                holder: holder.name.clone(),
            });
        }

        info!("{} joined on the {} side", name, side);
        self.players.push(Player::new(name, side));
        Ok(&self.players[self.players.len() - 1])
    }

    pub fn remove(&mut self, name: &str) -> Option<Player> {
        let index = self.players.iter().position(|p| p.name == name)?;
        let player = self.players.remove(index);
        info!("{} left the {} side", player.name, player.side);
        Some(player)
    }

    pub fn get(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    /// Returns false if no player has that name.
    pub fn set_ready(&mut self, name: &str, ready: bool) -> bool {
        match self.players.iter_mut().find(|p| p.name == name) {
            Some(player) => {
                player.ready = ready;
                true
            }
            None => false,
        }
    }

    pub fn clear_ready(&mut self) {
        for player in &mut self.players {
            player.ready = false;
        }
    }

    pub fn occupant(&self, side: Side) -> Option<&Player> {
        self.players.iter().find(|p| p.side == side)
    }

    /// Names on `side` in join order.
    pub fn roster(&self, side: Side) -> Vec<String> {
        self.players
            .iter()
            .filter(|p| p.side == side)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Both sides have a player.
    pub fn is_full(&self) -> bool {
        Side::ALL.iter().all(|side| self.occupant(*side).is_some())
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_fills_rosters_in_order() {
        let mut lobby = Lobby::new();

        lobby.join(Side::Left, "Alice").unwrap();
        lobby.join(Side::Right, "Bob").unwrap();

        assert_eq!(lobby.roster(Side::Left), vec!["Alice".to_string()]);
        assert_eq!(lobby.roster(Side::Right), vec!["Bob".to_string()]);
        assert_eq!(lobby.len(), 2);
        assert!(lobby.is_full());
        assert!(lobby.players().iter().all(|p| !p.ready));
    }

    #[test]
    fn test_join_occupied_side_rejected() {
        let mut lobby = Lobby::new();
        lobby.join(Side::Left, "Alice").unwrap();

        let result = lobby.join(Side::Left, "Carol");
        assert_eq!(
            result.unwrap_err(),
            JoinRejection::SideTaken {
                side: Side::Left,
                holder: "Alice".to_string()
            }
        );
        assert_eq!(lobby.roster(Side::Left), vec!["Alice".to_string()]);
        assert!(!lobby.is_full());
    }

    #[test]
    fn test_join_duplicate_name_rejected() {
        let mut lobby = Lobby::new();
        lobby.join(Side::Left, "Alice").unwrap();

        let result = lobby.join(Side::Right, "Alice");
        assert_eq!(
            result.unwrap_err(),
            JoinRejection::NameTaken("Alice".to_string())
        );
        assert!(lobby.roster(Side::Right).is_empty());
    }

    #[test]
    fn test_remove_player() {
        let mut lobby = Lobby::new();
        lobby.join(Side::Left, "Alice").unwrap();
        lobby.join(Side::Right, "Bob").unwrap();

        let removed = lobby.remove("Alice").unwrap();
        assert_eq!(removed.side, Side::Left);
        assert!(lobby.roster(Side::Left).is_empty());
        assert_eq!(lobby.len(), 1);

        assert!(lobby.remove("Alice").is_none());
    }

    #[test]
    fn test_ready_flags() {
        let mut lobby = Lobby::new();
        lobby.join(Side::Left, "Alice").unwrap();
        lobby.join(Side::Right, "Bob").unwrap();

        assert!(lobby.set_ready("Alice", true));
        assert!(lobby.get("Alice").unwrap().ready);
        assert!(!lobby.get("Bob").unwrap().ready);
        assert!(!lobby.set_ready("Nobody", true));

        lobby.set_ready("Bob", true);
        lobby.clear_ready();
        assert!(lobby.players().iter().all(|p| !p.ready));
    }

    #[test]
    fn test_clear() {
        let mut lobby = Lobby::new();
        lobby.join(Side::Left, "Alice").unwrap();
        lobby.clear();
        assert!(lobby.is_empty());
        assert!(lobby.occupant(Side::Left).is_none());
    }
}
