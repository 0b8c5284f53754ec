//! Match controller: the single owner of every piece of mutable match state.
//!
//! The controller is synchronous. The network layer feeds it accepted
//! connections, frames, closures, timer expiries and control requests one at a
//! time from a single task, then reconciles the listener and tick timer with
//! what the controller wants (`should_listen`, `is_running`, `start_deadline`).

use crate::client_manager::{ClientId, ClientManager};
use crate::config::{Scene, ServerConfig};
use crate::game::GameState;
use crate::lobby::Lobby;
use crate::physics::Vector2;
use crate::readiness::{Readiness, Transition};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use shared::{Command, Side};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Read-only view of the match published after every handled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub tick: u64,
    pub ball_position: Vector2,
    pub ball_velocity: Vector2,
    pub paddle_left_y: f32,
    pub paddle_right_y: f32,
    pub score_left: u32,
    pub score_right: u32,
    pub running: bool,
    pub scene: Scene,
    pub roster_left: Vec<String>,
    pub roster_right: Vec<String>,
    pub all_ready: bool,
    pub listening: bool,
    pub connections: usize,
}

impl MatchSnapshot {
    pub fn roster(&self, side: Side) -> &[String] {
        match side {
            Side::Left => &self.roster_left,
            Side::Right => &self.roster_right,
        }
    }
}

pub struct MatchController {
    pub(crate) config: ServerConfig,
    pub(crate) clients: ClientManager,
    pub(crate) lobby: Lobby,
    pub(crate) readiness: Readiness,
    pub(crate) game: GameState,
    rng: StdRng,
    /// When the countdown or post-point pause ends.
    start_deadline: Option<Instant>,
    listening: bool,
}

impl MatchController {
    pub fn new(config: ServerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            clients: ClientManager::new(config.max_players),
            lobby: Lobby::new(),
            readiness: Readiness::new(),
            game: GameState::new(config.scene),
            rng,
            start_deadline: None,
            listening: false,
            config,
        }
    }

    /// Registers a freshly accepted connection, or returns None if the player
    /// cap is already reached. A rejected connection must be closed by the caller.
    pub fn accept_connection(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::Sender<String>,
    ) -> Option<ClientId> {
        let Some(client_id) = self.clients.add_client(addr, sender) else {
            warn!(
                "Rejecting connection from {}: player cap of {} reached",
                addr,
                self.clients.max_clients()
            );
            return None;
        };

        if self.clients.is_full() {
            info!("Player cap of {} reached", self.clients.max_clients());
        }
        Some(client_id)
    }

    /// Cleans up after a connection closed for any reason.
    ///
    /// Returns false if the connection was already gone.
    pub fn on_connection_closed(&mut self, client_id: ClientId) -> bool {
        let Some(client) = self.clients.remove_client(&client_id) else {
            return false;
        };

        if let Some(name) = client.player {
            if let Some(player) = self.lobby.remove(&name) {
                self.game.recenter_paddle(player.side);
            }
        }

        let transition = self.readiness.reset(&mut self.lobby);
        self.apply_transition(transition);
        self.stop_loop();

        if self.clients.is_empty() {
            info!("No controllers left, resetting the match");
            self.lobby.clear();
            self.game.reset();
        }
        true
    }

    /// Starts the tick loop if every player is ready and both sides are filled.
    /// Returns whether the loop is running afterwards.
    pub fn start_loop(&mut self) -> bool {
        if self.game.running {
            return true;
        }
        if !self.readiness.is_ready() || !self.lobby.is_full() {
            debug!(
                "Not starting the match loop (ready: {}, both sides filled: {})",
                self.readiness.is_ready(),
                self.lobby.is_full()
            );
            return false;
        }

        self.start_deadline = None;
        self.game.start(&self.config.physics, &mut self.rng);
        info!("Match loop started");
        true
    }

    /// Stops the tick loop and cancels any pending countdown or resume.
    pub fn stop_loop(&mut self) {
        self.start_deadline = None;
        if self.game.running {
            self.game.stop();
            info!("Match loop stopped");
        }
    }

    /// Called when the countdown or post-point pause ends.
    pub fn on_start_timer(&mut self) {
        self.start_deadline = None;
        if !self.start_loop() {
            debug!("Start timer fired but the match is not ready");
        }
    }

    /// Runs one physics tick. Returns the side that scored, if any.
    pub fn tick(&mut self) -> Option<Side> {
        let scorer = self.game.advance(&self.config.physics, &mut self.rng);

        if scorer.is_some() {
            self.clients.broadcast(&Command::Score {
                left: self.game.score_left,
                right: self.game.score_right,
            });
            self.stop_loop();
            self.schedule_start(self.config.score_pause);
        } else if self.config.sync_state && self.game.running {
            match serde_json::to_string(&self.snapshot()) {
                Ok(json) => {
                    self.clients.broadcast(&Command::State(json));
                }
                Err(e) => warn!("Failed to encode match state: {}", e),
            }
        }

        scorer
    }

    /// Broadcasts free-form text as a single frame.
    pub fn broadcast_message(&mut self, message: &str) -> usize {
        let text = message.replace(|c: char| c == '\r' || c == '\n', " ");
        self.clients.broadcast(&Command::Message(text))
    }

    /// Closes every connection whose outbox overflowed with a control
    /// command. Returns how many were closed.
    pub fn close_stalled(&mut self) -> usize {
        let mut closed = 0;
        // Closing one connection may broadcast STOP and stall another.
        loop {
            let stalled = self.clients.stalled();
            if stalled.is_empty() {
                return closed;
            }
            for client_id in stalled {
                warn!("Closing client {}: not reading its commands", client_id);
                if self.on_connection_closed(client_id) {
                    closed += 1;
                }
            }
        }
    }

    pub(crate) fn apply_transition(&mut self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };

        self.clients.broadcast(&transition.command());
        match transition {
            Transition::Ready => self.schedule_start(self.config.countdown),
            Transition::Unready => {
                self.stop_loop();
                self.game.recenter_ball();
            }
        }
    }

    fn schedule_start(&mut self, delay: Duration) {
        if delay.is_zero() {
            self.start_loop();
        } else {
            debug!("Match loop starts in {:?}", delay);
            self.start_deadline = Some(Instant::now() + delay);
        }
    }

    pub fn should_listen(&self) -> bool {
        !self.clients.is_full()
    }

    pub fn set_listening(&mut self, listening: bool) {
        self.listening = listening;
    }

    pub fn is_running(&self) -> bool {
        self.game.running
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn start_deadline(&self) -> Option<Instant> {
        self.start_deadline
    }

    pub fn tick_duration(&self) -> Duration {
        self.config.tick_duration()
    }

    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.clients.get(&client_id).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            tick: self.game.tick,
            ball_position: self.game.ball.position,
            ball_velocity: self.game.ball.velocity,
            paddle_left_y: self.game.paddles.left_y,
            paddle_right_y: self.game.paddles.right_y,
            score_left: self.game.score_left,
            score_right: self.game.score_right,
            running: self.game.running,
            scene: self.game.scene,
            roster_left: self.lobby.roster(Side::Left),
            roster_right: self.lobby.roster(Side::Right),
            all_ready: self.readiness.is_ready(),
            listening: self.listening,
            connections: self.clients.len(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use crate::client_manager::OUTBOX_CAPACITY;

    pub(crate) type Outbox = mpsc::Receiver<String>;

    pub(crate) fn test_config() -> ServerConfig {
        ServerConfig {
            countdown: Duration::ZERO,
            score_pause: Duration::from_secs(1),
            seed: Some(42),
            ..Default::default()
        }
    }

    pub(crate) fn connect(controller: &mut MatchController, port: u16) -> (ClientId, Outbox) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let id = controller.accept_connection(addr, tx).unwrap();
        (id, rx)
    }

    pub(crate) fn drain(outbox: &mut Outbox) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = outbox.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Two joined and ready players, outboxes drained.
    fn ready_match(config: ServerConfig) -> (MatchController, ClientId, Outbox, ClientId, Outbox) {
        let mut controller = MatchController::new(config);
        let (alice, mut alice_rx) = connect(&mut controller, 5001);
        let (bob, mut bob_rx) = connect(&mut controller, 5002);
        controller.handle_frame(alice, "JOIN:left:Alice");
        controller.handle_frame(bob, "JOIN:right:Bob");
        controller.handle_frame(alice, "READY:1");
        controller.handle_frame(bob, "READY:1");
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        (controller, alice, alice_rx, bob, bob_rx)
    }

    #[test]
    fn test_two_players_join_and_ready_starts_match() {
        let mut controller = MatchController::new(test_config());
        assert!(controller.should_listen());

        let (alice, mut alice_rx) = connect(&mut controller, 5001);
        assert!(controller.should_listen());
        let (bob, mut bob_rx) = connect(&mut controller, 5002);
        assert!(!controller.should_listen(), "Listener stops at capacity");

        controller.handle_frame(alice, "JOIN:left:Alice");
        controller.handle_frame(bob, "JOIN:right:Bob");
        controller.handle_frame(alice, "READY:1");
        assert!(!controller.is_ready());
        assert!(!controller.is_running());

        controller.handle_frame(bob, "READY:1");
        assert!(controller.is_ready());
        assert!(controller.is_running());

        assert_eq!(drain(&mut alice_rx), vec!["START\n".to_string()]);
        assert_eq!(drain(&mut bob_rx), vec!["START\n".to_string()]);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.roster_left, vec!["Alice".to_string()]);
        assert_eq!(snapshot.roster_right, vec!["Bob".to_string()]);
        assert!(snapshot.all_ready);
        assert!(snapshot.running);
        assert_eq!(snapshot.connections, 2);
    }

    #[test]
    fn test_connection_beyond_cap_rejected_without_side_effects() {
        let (mut controller, _, mut alice_rx, _, _) = ready_match(test_config());

        let (tx, _rx) = mpsc::channel(OUTBOX_CAPACITY);
        let rejected = controller.accept_connection("127.0.0.1:5003".parse().unwrap(), tx);

        assert!(rejected.is_none());
        assert_eq!(controller.connection_count(), 2);
        assert_eq!(controller.lobby().roster(Side::Left), vec!["Alice".to_string()]);
        assert_eq!(controller.lobby().roster(Side::Right), vec!["Bob".to_string()]);
        assert!(controller.is_running());
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[test]
    fn test_repeated_ready_broadcasts_once() {
        let (mut controller, alice, mut alice_rx, bob, mut bob_rx) = ready_match(test_config());

        controller.handle_frame(alice, "READY:1");
        controller.handle_frame(bob, "READY:1");

        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_unready_broadcasts_stop_and_stops_loop() {
        let (mut controller, alice, mut alice_rx, _, mut bob_rx) = ready_match(test_config());

        controller.handle_frame(alice, "READY:0");

        assert!(!controller.is_ready());
        assert!(!controller.is_running());
        assert_eq!(drain(&mut alice_rx), vec!["STOP\n".to_string()]);
        assert_eq!(drain(&mut bob_rx), vec!["STOP\n".to_string()]);

        controller.handle_frame(alice, "READY:0");
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_disconnect_during_match() {
        let (mut controller, alice, _, bob, mut bob_rx) = ready_match(test_config());
        assert!(!controller.should_listen());

        assert!(controller.on_connection_closed(alice));

        assert!(!controller.is_ready());
        assert!(!controller.is_running());
        assert!(controller.should_listen(), "Listener resumes below capacity");
        assert_eq!(drain(&mut bob_rx), vec!["STOP\n".to_string()]);
        assert!(controller.lobby().roster(Side::Left).is_empty());
        assert!(!controller.lobby().get("Bob").unwrap().ready);
        assert_eq!(controller.connection_count(), 1);

        // Closing twice has no further effect.
        assert!(!controller.on_connection_closed(alice));
        assert!(drain(&mut bob_rx).is_empty());

        // Bob has to ready up again once a new opponent arrives.
        let (carol, _carol_rx) = connect(&mut controller, 5003);
        controller.handle_frame(carol, "JOIN:left:Carol");
        controller.handle_frame(carol, "READY:1");
        assert!(!controller.is_ready());
        controller.handle_frame(bob, "READY:1");
        assert!(controller.is_running());
    }

    #[test]
    fn test_disconnect_recenters_departed_paddle() {
        let (mut controller, alice, _, _, _) = ready_match(test_config());
        controller.handle_frame(alice, "up");
        controller.handle_frame(alice, "up");
        assert!(controller.game().paddles.left_y < 300.0);

        controller.on_connection_closed(alice);

        assert_eq!(controller.game().paddles.left_y, 300.0);
    }

    #[test]
    fn test_last_disconnect_resets_match() {
        let (mut controller, alice, _, bob, _) = ready_match(test_config());
        controller.game.score_left = 3;
        controller.game.score_right = 5;
        controller.handle_frame(bob, "down");

        controller.on_connection_closed(alice);
        assert_eq!(controller.game().score_left, 3);
        controller.on_connection_closed(bob);

        let game = controller.game();
        assert_eq!(game.score_left, 0);
        assert_eq!(game.score_right, 0);
        assert_eq!(game.paddles.right_y, 300.0);
        assert_eq!(game.ball.position, game.scene.center());
        assert!(controller.lobby().is_empty());
        assert!(controller.should_listen());
    }

    #[test]
    fn test_unbound_connection_frames_are_noops() {
        let mut controller = MatchController::new(test_config());
        let (id, mut rx) = connect(&mut controller, 5001);

        controller.handle_frame(id, "READY:1");
        controller.handle_frame(id, "up");
        controller.handle_frame(id, "down");

        assert!(!controller.is_ready());
        assert_eq!(controller.game().paddles.left_y, 300.0);
        assert_eq!(controller.game().paddles.right_y, 300.0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_single_ready_player_does_not_start_loop() {
        let mut controller = MatchController::new(test_config());
        let (alice, mut rx) = connect(&mut controller, 5001);
        controller.handle_frame(alice, "JOIN:left:Alice");
        controller.handle_frame(alice, "READY:1");

        assert!(controller.is_ready());
        assert_eq!(drain(&mut rx), vec!["START\n".to_string()]);
        assert!(!controller.is_running());
        assert!(!controller.start_loop());

        // A fresh, unready opponent drops readiness again.
        let (bob, _bob_rx) = connect(&mut controller, 5002);
        controller.handle_frame(bob, "JOIN:right:Bob");
        assert!(!controller.is_ready());
        assert_eq!(drain(&mut rx), vec!["STOP\n".to_string()]);
    }

    #[test]
    fn test_countdown_delays_start() {
        let config = ServerConfig {
            countdown: Duration::from_secs(3),
            ..test_config()
        };
        let (mut controller, alice, _, _, _) = ready_match(config);

        assert!(controller.is_ready());
        assert!(!controller.is_running());
        assert!(controller.start_deadline().is_some());

        controller.on_start_timer();
        assert!(controller.is_running());
        assert!(controller.start_deadline().is_none());

        controller.handle_frame(alice, "READY:0");
        assert!(!controller.is_running());
    }

    #[test]
    fn test_start_timer_after_readiness_lost() {
        let config = ServerConfig {
            countdown: Duration::from_secs(3),
            ..test_config()
        };
        let (mut controller, alice, _, _, _) = ready_match(config);

        controller.handle_frame(alice, "READY:0");
        assert!(controller.start_deadline().is_none());

        controller.on_start_timer();
        assert!(!controller.is_running());
    }

    #[test]
    fn test_stop_loop_cancels_pending_start() {
        let config = ServerConfig {
            countdown: Duration::from_secs(3),
            ..test_config()
        };
        let (mut controller, _, _, _, _) = ready_match(config);
        assert!(controller.start_deadline().is_some());

        controller.stop_loop();

        assert!(controller.start_deadline().is_none());
        assert!(!controller.is_running());
        assert!(controller.start_loop());
        assert!(controller.is_running());
    }

    #[test]
    fn test_tick_only_advances_while_running() {
        let (mut controller, alice, _, _, _) = ready_match(test_config());
        let before = controller.game().ball.position;

        controller.tick();
        assert_ne!(controller.game().ball.position, before);
        assert_eq!(controller.game().tick, 1);

        controller.handle_frame(alice, "READY:0");
        let stopped_at = controller.game().ball.position;
        controller.tick();
        assert_eq!(controller.game().ball.position, stopped_at);
        assert_eq!(controller.game().tick, 1);
    }

    #[test]
    fn test_scoring_pauses_and_resumes() {
        let (mut controller, _, mut alice_rx, _, mut bob_rx) = ready_match(test_config());
        controller.game.paddles.left_y = 100.0;
        controller.game.ball.position = Vector2 { x: 12.0, y: 500.0 };
        controller.game.ball.velocity = Vector2 { x: -6.0, y: 0.0 };

        assert_eq!(controller.tick(), Some(Side::Right));

        assert_eq!(controller.game().score_right, 1);
        assert_eq!(controller.game().score_left, 0);
        assert!(!controller.is_running());
        assert!(controller.start_deadline().is_some());
        assert_eq!(drain(&mut alice_rx), vec!["SCORE:0:1\n".to_string()]);
        assert_eq!(drain(&mut bob_rx), vec!["SCORE:0:1\n".to_string()]);

        // Exactly one point per crossing.
        assert_eq!(controller.tick(), None);
        assert_eq!(controller.game().score_right, 1);

        controller.on_start_timer();
        assert!(controller.is_running());
        assert!(controller.game().ball.velocity.x < 0.0);
    }

    #[test]
    fn test_resume_skipped_when_readiness_lost_during_pause() {
        let (mut controller, _, _, bob, _) = ready_match(test_config());
        controller.game.paddles.right_y = 100.0;
        controller.game.ball.position = Vector2 { x: 788.0, y: 500.0 };
        controller.game.ball.velocity = Vector2 { x: 6.0, y: 0.0 };

        assert_eq!(controller.tick(), Some(Side::Left));
        controller.handle_frame(bob, "READY:0");
        controller.on_start_timer();

        assert!(!controller.is_running());
        assert_eq!(controller.game().score_left, 1);
    }

    #[test]
    fn test_state_sync_broadcasts_every_tick() {
        let config = ServerConfig {
            sync_state: true,
            ..test_config()
        };
        let (mut controller, _, mut alice_rx, _, _) = ready_match(config);

        controller.tick();
        controller.tick();

        let lines = drain(&mut alice_rx);
        assert_eq!(lines.len(), 2);
        for line in lines {
            let json = line.trim_end().strip_prefix("STATE:").unwrap();
            let snapshot: MatchSnapshot = serde_json::from_str(json).unwrap();
            assert!(snapshot.running);
            assert_eq!(snapshot.roster_left, vec!["Alice".to_string()]);
        }
    }

    #[test]
    fn test_broadcast_message_is_single_frame() {
        let (mut controller, _, mut alice_rx, _, mut bob_rx) = ready_match(test_config());

        assert_eq!(controller.broadcast_message("hello\nphones"), 2);

        assert_eq!(drain(&mut alice_rx), vec!["hello phones\n".to_string()]);
        assert_eq!(drain(&mut bob_rx), vec!["hello phones\n".to_string()]);
    }

    #[test]
    fn test_external_start_refused_until_ready() {
        let mut controller = MatchController::new(test_config());
        let (alice, _) = connect(&mut controller, 5001);
        let (bob, _) = connect(&mut controller, 5002);
        controller.handle_frame(alice, "JOIN:left:Alice");
        controller.handle_frame(bob, "JOIN:right:Bob");

        assert!(!controller.start_loop());
        assert!(!controller.is_running());
    }

    #[test]
    fn test_state_sync_outbox_bounded_for_idle_reader() {
        let config = ServerConfig {
            sync_state: true,
            score_pause: Duration::ZERO,
            ..test_config()
        };
        let (mut controller, alice, mut alice_rx, bob, mut bob_rx) = ready_match(config);

        // Ten minutes of play at 60Hz while Alice never reads.
        for _ in 0..36_000 {
            controller.tick();
            drain(&mut bob_rx);
            controller.close_stalled();
        }

        assert!(drain(&mut alice_rx).len() <= OUTBOX_CAPACITY);
        assert!(controller.is_connected(bob));
        if controller.is_connected(alice) {
            assert!(controller.is_running());
        }
    }

    #[test]
    fn test_stalled_connection_is_closed() {
        let (mut controller, alice, _alice_rx, bob, mut bob_rx) = ready_match(test_config());

        for _ in 0..=OUTBOX_CAPACITY {
            controller.broadcast_message("ping");
            drain(&mut bob_rx);
        }

        assert_eq!(controller.close_stalled(), 1);
        assert!(!controller.is_connected(alice));
        assert!(controller.is_connected(bob));
        assert!(!controller.is_running());
        assert!(controller.should_listen());
        assert_eq!(drain(&mut bob_rx), vec!["STOP\n".to_string()]);
        assert_eq!(controller.close_stalled(), 0);
    }
}
