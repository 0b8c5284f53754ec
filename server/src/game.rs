use crate::config::{PhysicsConfig, Scene};
use crate::physics::{self, Ball, Paddles};
use log::{debug, info};
use rand::Rng;
use shared::Side;

/// Direction of a paddle input frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddleMove {
    Up,
    Down,
}

/// Ball, paddles and score of the match.
///
/// Only the physics tick and explicit resets change it; readers get a copy
/// through the match snapshot.
#[derive(Debug, Clone)]
pub struct GameState {
    pub tick: u64,
    pub scene: Scene,
    pub ball: Ball,
    pub paddles: Paddles,
    pub score_left: u32,
    pub score_right: u32,
    pub running: bool,
}

impl GameState {
    pub fn new(scene: Scene) -> Self {
        Self {
            tick: 0,
            scene,
            ball: Ball::at_rest(&scene),
            paddles: Paddles::centered(&scene),
            score_left: 0,
            score_right: 0,
            running: false,
        }
    }

    pub fn score(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.score_left,
            Side::Right => self.score_right,
        }
    }

    /// Moves a paddle one step, keeping it inside the scene. Applies
    /// immediately, independent of the tick.
    pub fn move_paddle(&mut self, side: Side, movement: PaddleMove, config: &PhysicsConfig) {
        let step = match movement {
            PaddleMove::Up => -config.paddle_step,
            PaddleMove::Down => config.paddle_step,
        };
        let scene = self.scene;
        let y = self.paddles.y_mut(side);
        *y = physics::clamp_paddle(*y + step, &scene, config);
    }

    pub fn recenter_paddle(&mut self, side: Side) {
        *self.paddles.y_mut(side) = self.scene.height / 2.0;
    }

    /// Puts the ball back in the middle, motionless. The next start serves.
    pub fn recenter_ball(&mut self) {
        self.ball = Ball::at_rest(&self.scene);
    }

    /// Starts the simulation, serving in a random direction if the ball is at rest.
    pub fn start<R: Rng + ?Sized>(&mut self, config: &PhysicsConfig, rng: &mut R) {
        if self.ball.velocity.is_zero() {
            let toward = if rng.gen_bool(0.5) {
                Side::Left
            } else {
                Side::Right
            };
            self.ball = Ball::serve(&self.scene, config, toward, rng);
            debug!("Serving toward {}", toward);
        }
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Advances the simulation by one tick while running.
    ///
    /// On a point the scorer's count goes up, the simulation stops and the
    /// ball is re-served from the center toward the side that conceded.
    /// Returns the scoring side.
    pub fn advance<R: Rng + ?Sized>(&mut self, config: &PhysicsConfig, rng: &mut R) -> Option<Side> {
        if !self.running {
            return None;
        }

        self.tick += 1;
        let scorer = physics::step(&mut self.ball, &self.paddles, &self.scene, config)?;

        match scorer {
            Side::Left => self.score_left += 1,
            Side::Right => self.score_right += 1,
        }
        info!(
            "Point for {} ({} - {})",
            scorer, self.score_left, self.score_right
        );

        self.running = false;
        self.ball = Ball::serve(&self.scene, config, scorer.opponent(), rng);
        Some(scorer)
    }

    /// Back to a fresh match: ball and paddles centered, scores zeroed.
    pub fn reset(&mut self) {
        self.running = false;
        self.ball = Ball::at_rest(&self.scene);
        self.paddles = Paddles::centered(&self.scene);
        self.score_left = 0;
        self.score_right = 0;
        self.tick = 0;
    }
}
