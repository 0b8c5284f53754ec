use crate::config::{PhysicsConfig, Scene};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::{Aabb, Side};

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down, matching screen coordinates.
    pub y: f32,
}

impl Vector2 {
    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2 { x: 0.0, y: 0.0 }
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

///The ball. Position is its center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Ball {
    pub position: Vector2,
    pub velocity: Vector2,
}

impl Ball {
    ///A motionless ball in the middle of the scene.
    pub fn at_rest(scene: &Scene) -> Ball {
        Ball {
            position: scene.center(),
            velocity: Vector2::default(),
        }
    }

    ///A ball in the middle of the scene heading towards `toward` with a
    /// vertical component drawn from the configured serve set.
    pub fn serve<R: Rng + ?Sized>(
        scene: &Scene,
        config: &PhysicsConfig,
        toward: Side,
        rng: &mut R,
    ) -> Ball {
        let dy = config.serve_dy.choose(rng).copied().unwrap_or(0.0);
        let dx = match toward {
            Side::Left => -config.base_speed,
            Side::Right => config.base_speed,
        };

        Ball {
            position: scene.center(),
            velocity: Vector2 { x: dx, y: dy },
        }
    }

    pub fn bounds(&self, config: &PhysicsConfig) -> Aabb {
        Aabb::from_center(
            self.position.x,
            self.position.y,
            config.ball_size,
            config.ball_size,
        )
    }
}

///Vertical centers of both paddles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Paddles {
    pub left_y: f32,
    pub right_y: f32,
}

impl Paddles {
    pub fn centered(scene: &Scene) -> Paddles {
        Paddles {
            left_y: scene.height / 2.0,
            right_y: scene.height / 2.0,
        }
    }

    pub fn y(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.left_y,
            Side::Right => self.right_y,
        }
    }

    pub fn y_mut(&mut self, side: Side) -> &mut f32 {
        match side {
            Side::Left => &mut self.left_y,
            Side::Right => &mut self.right_y,
        }
    }
}

///Bounding box of a paddle. Paddles sit `paddle_offset` in from their scene edge.
pub fn paddle_bounds(side: Side, paddle_y: f32, scene: &Scene, config: &PhysicsConfig) -> Aabb {
    let center_x = match side {
        Side::Left => config.paddle_offset + config.paddle_width / 2.0,
        Side::Right => scene.width - config.paddle_offset - config.paddle_width / 2.0,
    };
    Aabb::from_center(center_x, paddle_y, config.paddle_width, config.paddle_height)
}

///Clamps a paddle center so the whole paddle stays inside the scene.
pub fn clamp_paddle(y: f32, scene: &Scene, config: &PhysicsConfig) -> f32 {
    let half = config.half_paddle();
    y.clamp(half, scene.height - half)
}

///Advances the ball by one tick.
///Returns the side that scored, if the ball left the scene through a goal.
pub fn step(ball: &mut Ball, paddles: &Paddles, scene: &Scene, config: &PhysicsConfig) -> Option<Side> {
    let radius = config.ball_radius();

    ball.position = ball.position.add(&ball.velocity);

    // Walls are resolved before paddles: clamp, then send the ball back inside.
    if ball.position.y - radius <= 0.0 {
        ball.position.y = radius;
        ball.velocity.y = ball.velocity.y.abs();
    } else if ball.position.y + radius >= scene.height {
        ball.position.y = scene.height - radius;
        ball.velocity.y = -ball.velocity.y.abs();
    }

    let ball_box = ball.bounds(config);
    for side in Side::ALL {
        let paddle = paddle_bounds(side, paddles.y(side), scene, config);
        let approaching = match side {
            Side::Left => ball.velocity.x < 0.0,
            Side::Right => ball.velocity.x > 0.0,
        };

        if approaching && ball_box.intersects(&paddle) {
            bounce_off_paddle(ball, side, &paddle, config);
            break;
        }
    }

    if ball.position.x - radius < 0.0 {
        Some(Side::Right)
    } else if ball.position.x + radius > scene.width {
        Some(Side::Left)
    } else {
        None
    }
}

///Sends the ball back from a paddle it hit.
///
///The ball is moved flush against the paddle face so it cannot stick inside
/// it on the next tick. The horizontal component flips and speeds up, the
/// vertical component is nudged by how far from the paddle center the hit
/// landed (capped at 45 degrees), and the total speed is capped.
fn bounce_off_paddle(ball: &mut Ball, side: Side, paddle: &Aabb, config: &PhysicsConfig) {
    let (_, paddle_center_y) = paddle.center();
    let hit = ((ball.position.y - paddle_center_y) / (paddle.height() / 2.0)).clamp(-1.0, 1.0);

    let vx = -ball.velocity.x * config.speed_up;
    let vy = (ball.velocity.y * config.speed_up + hit * config.deflection).clamp(-vx.abs(), vx.abs());

    let mut velocity = Vector2 { x: vx, y: vy };
    if velocity.magnitude() > config.max_speed {
        velocity = velocity.normalize().scale(config.max_speed);
    }
    ball.velocity = velocity;

    let radius = config.ball_radius();
    ball.position.x = match side {
        Side::Left => paddle.max_x + radius,
        Side::Right => paddle.min_x - radius,
    };
}
