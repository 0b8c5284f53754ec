//! Applies inbound controller frames to the match.
//!
//! Frames are parsed with [`shared::Frame::parse`]; anything that does not
//! parse is logged and dropped without affecting the connection.

use crate::client_manager::ClientId;
use crate::controller::MatchController;
use crate::game::PaddleMove;
use crate::lobby::JoinRejection;
use log::{debug, warn};
use shared::{Frame, Side};

impl MatchController {
    /// Handles one raw line received from `client_id`.
    pub fn handle_frame(&mut self, client_id: ClientId, raw: &str) {
        let Some(frame) = Frame::parse(raw) else {
            debug!("Ignoring malformed frame {:?} from client {}", raw, client_id);
            return;
        };

        match frame {
            Frame::Join { side, name } => self.handle_join(client_id, side, &name),
            Frame::Ready(ready) => self.handle_ready(client_id, ready),
            Frame::Leave { name } => self.handle_leave(&name),
            Frame::Up => self.handle_move(client_id, PaddleMove::Up),
            Frame::Down => self.handle_move(client_id, PaddleMove::Down),
        }
    }

    fn handle_join(&mut self, client_id: ClientId, side: Side, name: &str) {
        if self.clients.get(&client_id).is_none() {
            return;
        }

        // A connection that already joined may switch side or name; its own
        // player never blocks the new JOIN.
        let previous = self.clients.player_of(&client_id).map(str::to_string);
        let is_previous = |candidate: &str| previous.as_deref() == Some(candidate);

        if is_previous(name) && self.lobby.get(name).map(|p| p.side) == Some(side) {
            debug!("Client {} already joined as {} on {}", client_id, name, side);
            return;
        }

        let rejection = if self.lobby.get(name).is_some() && !is_previous(name) {
            Some(JoinRejection::NameTaken(name.to_string()))
        } else {
            self.lobby
                .occupant(side)
                .filter(|holder| !is_previous(&holder.name))
                .map(|holder| JoinRejection::SideTaken {
                    side,
                    holder: holder.name.clone(),
                })
        };
        if let Some(rejection) = rejection {
            warn!("Client {} cannot join as {}: {}", client_id, name, rejection);
            return;
        }

        if let Some(previous) = previous.as_deref() {
            if let Some(old) = self.lobby.remove(previous) {
                if old.side != side {
                    self.game.recenter_paddle(old.side);
                }
            }
            self.clients.unbind_player(previous);
        }

        match self.lobby.join(side, name) {
            Ok(_) => {
                self.clients.bind_player(&client_id, name);
            }
            Err(rejection) => warn!("Client {} cannot join as {}: {}", client_id, name, rejection),
        }

        let transition = if previous.is_some() {
            self.readiness.reset(&mut self.lobby)
        } else {
            self.readiness.recompute(self.lobby.players())
        };
        self.apply_transition(transition);
    }

    fn handle_ready(&mut self, client_id: ClientId, ready: bool) {
        let Some(name) = self.clients.player_of(&client_id).map(str::to_string) else {
            debug!("Ignoring READY from client {} before JOIN", client_id);
            return;
        };

        self.lobby.set_ready(&name, ready);
        let transition = self.readiness.recompute(self.lobby.players());
        self.apply_transition(transition);
    }

    fn handle_leave(&mut self, name: &str) {
        let Some(player) = self.lobby.remove(name) else {
            debug!("Ignoring LEAVE for unknown player {}", name);
            return;
        };

        self.clients.unbind_player(name);
        self.game.recenter_paddle(player.side);

        let transition = self.readiness.reset(&mut self.lobby);
        self.apply_transition(transition);
        self.stop_loop();
    }

    fn handle_move(&mut self, client_id: ClientId, movement: PaddleMove) {
        let Some(name) = self.clients.player_of(&client_id) else {
            return;
        };
        let Some(side) = self.lobby.get(name).map(|p| p.side) else {
            return;
        };

        self.game.move_paddle(side, movement, &self.config.physics);
    }
}
