//! Server and physics configuration with validated defaults.

use crate::error::{ServerError, ServerResult};
use crate::physics::Vector2;
use serde::{Deserialize, Serialize};
use shared::{
    BALL_MAX_SPEED, BALL_SIZE, BALL_SPEED, BALL_SPEED_UP, MAX_PLAYERS, PADDLE_HEIGHT,
    PADDLE_OFFSET, PADDLE_STEP, PADDLE_WIDTH, SCENE_HEIGHT, SCENE_WIDTH,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Playfield dimensions in scene units. Origin is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub width: f32,
    pub height: f32,
}

impl Scene {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> Vector2 {
        Vector2 {
            x: self.width / 2.0,
            y: self.height / 2.0,
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Scene::new(SCENE_WIDTH, SCENE_HEIGHT)
    }
}

/// Tunables for ball and paddle motion. Speeds are in scene units per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsConfig {
    pub paddle_width: f32,
    pub paddle_height: f32,
    pub paddle_offset: f32,
    /// Distance a paddle moves for one `up`/`down` frame.
    pub paddle_step: f32,
    pub ball_size: f32,
    pub base_speed: f32,
    /// Multiplier applied to the ball speed on every paddle hit.
    pub speed_up: f32,
    /// Upper bound on the ball speed. Must stay below
    /// `paddle_width + ball_size` or the ball can skip a paddle in one tick.
    pub max_speed: f32,
    /// Vertical velocities a serve picks from.
    pub serve_dy: Vec<f32>,
    /// Extra vertical speed given by a hit on the very tip of a paddle.
    pub deflection: f32,
}

impl PhysicsConfig {
    pub fn ball_radius(&self) -> f32 {
        self.ball_size / 2.0
    }

    pub fn half_paddle(&self) -> f32 {
        self.paddle_height / 2.0
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        PhysicsConfig {
            paddle_width: PADDLE_WIDTH,
            paddle_height: PADDLE_HEIGHT,
            paddle_offset: PADDLE_OFFSET,
            paddle_step: PADDLE_STEP,
            ball_size: BALL_SIZE,
            base_speed: BALL_SPEED,
            speed_up: BALL_SPEED_UP,
            max_speed: BALL_MAX_SPEED,
            serve_dy: vec![-4.0, -2.0, 2.0, 4.0],
            deflection: 3.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_players: usize,
    /// Physics ticks per second.
    pub tick_rate: u32,
    pub scene: Scene,
    /// Delay between readiness and the first serve.
    pub countdown: Duration,
    /// Pause after a point before play resumes.
    pub score_pause: Duration,
    /// Broadcast a `STATE` frame after every tick.
    pub sync_state: bool,
    /// Seed for serve randomisation; entropy when unset.
    pub seed: Option<u64>,
    pub physics: PhysicsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            max_players: MAX_PLAYERS,
            tick_rate: 60,
            scene: Scene::default(),
            countdown: Duration::from_secs(3),
            score_pause: Duration::from_secs(1),
            sync_state: false,
            seed: None,
            physics: PhysicsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    /// Rejects configurations the match cannot run with.
    pub fn validate(&self) -> ServerResult<()> {
        let physics = &self.physics;

        let scalars = [
            ("scene width", self.scene.width),
            ("scene height", self.scene.height),
            ("paddle width", physics.paddle_width),
            ("paddle height", physics.paddle_height),
            ("paddle offset", physics.paddle_offset),
            ("paddle step", physics.paddle_step),
            ("ball size", physics.ball_size),
            ("base ball speed", physics.base_speed),
            ("speed-up factor", physics.speed_up),
            ("velocity cap", physics.max_speed),
            ("deflection", physics.deflection),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(ServerError::Config(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        if let Some(dy) = physics.serve_dy.iter().find(|dy| !dy.is_finite()) {
            return Err(ServerError::Config(format!(
                "serve velocity must be finite, got {}",
                dy
            )));
        }

        if self.tick_rate == 0 {
            return Err(ServerError::Config("tick rate must be positive".into()));
        }
        if self.max_players == 0 {
            return Err(ServerError::Config("player cap must be positive".into()));
        }
        if physics.ball_size <= 0.0 || physics.paddle_width <= 0.0 || physics.paddle_height <= 0.0
        {
            return Err(ServerError::Config(
                "ball and paddle dimensions must be positive".into(),
            ));
        }

        let min_width = 2.0 * (physics.paddle_offset + physics.paddle_width) + physics.ball_size;
        if self.scene.width <= min_width {
            return Err(ServerError::Config(format!(
                "scene width {} leaves no room between the paddles (need more than {})",
                self.scene.width, min_width
            )));
        }
        if self.scene.height <= physics.paddle_height.max(physics.ball_size) {
            return Err(ServerError::Config(format!(
                "scene height {} is smaller than a paddle",
                self.scene.height
            )));
        }

        if physics.base_speed <= 0.0 {
            return Err(ServerError::Config("base ball speed must be positive".into()));
        }
        if physics.speed_up < 1.0 {
            return Err(ServerError::Config(
                "speed-up factor must be at least 1.0".into(),
            ));
        }
        if physics.max_speed < physics.base_speed {
            return Err(ServerError::Config(
                "velocity cap is below the base ball speed".into(),
            ));
        }
        if physics.max_speed >= physics.paddle_width + physics.ball_size {
            return Err(ServerError::Config(format!(
                "velocity cap {} lets the ball pass through a paddle in one tick (must be below {})",
                physics.max_speed,
                physics.paddle_width + physics.ball_size
            )));
        }
        if physics.serve_dy.is_empty() {
            return Err(ServerError::Config(
                "serve needs at least one vertical velocity".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_players, 2);
        assert_eq!(config.tick_rate, 60);
    }

    #[test]
    fn test_tick_duration() {
        let config = ServerConfig {
            tick_rate: 50,
            ..Default::default()
        };
        assert_eq!(config.tick_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_zero_tick_rate_rejected() {
        let config = ServerConfig {
            tick_rate: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_tiny_scene_rejected() {
        let config = ServerConfig {
            scene: Scene::new(100.0, 600.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            scene: Scene::new(800.0, 100.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let config = ServerConfig {
            scene: Scene::new(800.0, f32::NAN),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));

        let config = ServerConfig {
            scene: Scene::new(f32::INFINITY, 600.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.physics.speed_up = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.physics.deflection = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.physics.base_speed = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.physics.serve_dy.push(f32::NEG_INFINITY);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_velocity_cap_must_prevent_tunneling() {
        let mut config = ServerConfig::default();
        config.physics.max_speed = config.physics.paddle_width + config.physics.ball_size;
        assert!(config.validate().is_err());

        config.physics.max_speed -= 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_speed_up_and_serve_checks() {
        let mut config = ServerConfig::default();
        config.physics.speed_up = 0.9;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.physics.serve_dy.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scene_center() {
        let center = Scene::new(800.0, 600.0).center();
        assert_eq!(center.x, 400.0);
        assert_eq!(center.y, 300.0);
    }
}
