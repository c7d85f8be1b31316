//! Paddle-v0: keep a bouncing ball in play with a paddle.
//!
//! Keys `left`/`right` move the paddle while held. Each return scores +1;
//! a miss scores -1 and ends the episode.

use async_trait::async_trait;
use envstream_core::{
    Action, Environment, EnvironmentFault, EnvSpec, KeyWhitelist, RawFrame, StepOutcome,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::SeedSource;

pub const NAME: &str = "Paddle-v0";
pub const WIDTH: u32 = 96;
pub const HEIGHT: u32 = 64;

const PADDLE_WIDTH: i32 = 16;
const PADDLE_HEIGHT: i32 = 2;
const PADDLE_SPEED: i32 = 3;
/// Top row of the paddle
const PADDLE_Y: i32 = HEIGHT as i32 - 4;
const BALL_SIZE: i32 = 2;
/// Episode length cap
const MAX_STEPS: u64 = 2_000;

const BACKGROUND: [u8; 3] = [16, 16, 32];
const PADDLE_COLOR: [u8; 3] = [230, 230, 230];
const BALL_COLOR: [u8; 3] = [255, 140, 0];

/// Paddle game state.
#[derive(Debug)]
pub struct Paddle {
    rng: ChaCha8Rng,
    paddle_x: i32,
    ball: (i32, i32),
    velocity: (i32, i32),
    steps: u64,
    returns: u32,
}

impl Paddle {
    pub fn new(seed: u64) -> Self {
        let mut paddle = Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            paddle_x: 0,
            ball: (0, 0),
            velocity: (0, 0),
            steps: 0,
            returns: 0,
        };
        paddle.serve();
        paddle
    }

    /// Spec drawing one seed per instance from `seeds`.
    pub fn spec(seeds: Arc<SeedSource>) -> EnvSpec {
        EnvSpec::new(
            NAME,
            WIDTH,
            HEIGHT,
            KeyWhitelist::new(["left", "right"]),
            move |_: &EnvSpec| {
                Ok(Box::new(Paddle::new(seeds.next_seed())) as Box<dyn Environment>)
            },
        )
    }

    pub fn paddle_x(&self) -> i32 {
        self.paddle_x
    }

    pub fn ball(&self) -> (i32, i32) {
        self.ball
    }

    fn serve(&mut self) {
        self.paddle_x = (WIDTH as i32 - PADDLE_WIDTH) / 2;
        self.ball = (self.rng.gen_range(0..=WIDTH as i32 - BALL_SIZE), 4);
        let speed = self.rng.gen_range(1..=2);
        let vx = if self.rng.gen_bool(0.5) { speed } else { -speed };
        self.velocity = (vx, 1);
        self.steps = 0;
        self.returns = 0;
    }

    /// Advances the ball one step; returns (reward, missed).
    fn advance_ball(&mut self) -> (f64, bool) {
        let (mut x, mut y) = (self.ball.0 + self.velocity.0, self.ball.1 + self.velocity.1);
        let max_x = WIDTH as i32 - BALL_SIZE;

        if x < 0 {
            x = -x;
            self.velocity.0 = -self.velocity.0;
        } else if x > max_x {
            x = 2 * max_x - x;
            self.velocity.0 = -self.velocity.0;
        }
        if y < 0 {
            y = -y;
            self.velocity.1 = -self.velocity.1;
        }

        let mut reward = 0.0;
        let mut missed = false;
        let crossing = self.velocity.1 > 0
            && y + BALL_SIZE >= PADDLE_Y
            && self.ball.1 + BALL_SIZE <= PADDLE_Y;
        if crossing && x + BALL_SIZE > self.paddle_x && x < self.paddle_x + PADDLE_WIDTH {
            y = PADDLE_Y - BALL_SIZE;
            self.velocity.1 = -self.velocity.1;
            self.returns += 1;
            reward = 1.0;
        } else if y >= HEIGHT as i32 {
            missed = true;
            reward = -1.0;
        }

        self.ball = (x, y);
        (reward, missed)
    }

    fn draw(&self) -> RawFrame {
        let mut frame = RawFrame::filled(WIDTH, HEIGHT, BACKGROUND);
        frame.fill_rect(
            self.paddle_x as u32,
            PADDLE_Y as u32,
            PADDLE_WIDTH as u32,
            PADDLE_HEIGHT as u32,
            PADDLE_COLOR,
        );
        if self.ball.1 < HEIGHT as i32 {
            frame.fill_rect(
                self.ball.0.max(0) as u32,
                self.ball.1.max(0) as u32,
                BALL_SIZE as u32,
                BALL_SIZE as u32,
                BALL_COLOR,
            );
        }
        frame
    }
}

#[async_trait]
impl Environment for Paddle {
    async fn reset(&mut self) -> Result<RawFrame, EnvironmentFault> {
        self.serve();
        Ok(self.draw())
    }

    async fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvironmentFault> {
        let direction = action.is_held("right") as i32 - action.is_held("left") as i32;
        self.paddle_x =
            (self.paddle_x + direction * PADDLE_SPEED).clamp(0, WIDTH as i32 - PADDLE_WIDTH);

        let (reward, missed) = self.advance_ball();
        self.steps += 1;
        let done = missed || self.steps >= MAX_STEPS;
        if done {
            debug!(steps = self.steps, returns = self.returns, missed, "paddle episode over");
        }

        Ok(StepOutcome {
            observation: self.draw(),
            reward,
            done,
        })
    }

    async fn render(&mut self) -> Result<RawFrame, EnvironmentFault> {
        Ok(self.draw())
    }

    async fn close(&mut self) -> Result<(), EnvironmentFault> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(keys: &[&str]) -> Action {
        Action {
            held: keys.iter().map(|k| k.to_string()).collect(),
            events: vec![],
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_episode() {
        let mut a = Paddle::new(99);
        let mut b = Paddle::new(99);
        a.reset().await.unwrap();
        b.reset().await.unwrap();

        for _ in 0..50 {
            let x = a.step(&hold(&["left"])).await.unwrap();
            let y = b.step(&hold(&["left"])).await.unwrap();
            assert_eq!(x, y);
        }
    }

    #[tokio::test]
    async fn test_held_keys_move_paddle() {
        let mut env = Paddle::new(1);
        env.reset().await.unwrap();
        let start = env.paddle_x();

        env.step(&hold(&["left"])).await.unwrap();
        assert_eq!(env.paddle_x(), start - PADDLE_SPEED);

        env.step(&hold(&["left", "right"])).await.unwrap();
        assert_eq!(env.paddle_x(), start - PADDLE_SPEED);

        for _ in 0..100 {
            env.step(&hold(&["right"])).await.unwrap();
        }
        assert_eq!(env.paddle_x(), WIDTH as i32 - PADDLE_WIDTH);
    }

    #[tokio::test]
    async fn test_frames_match_declared_size() {
        let mut env = Paddle::new(3);
        let frame = env.reset().await.unwrap();
        assert_eq!((frame.width, frame.height), (WIDTH, HEIGHT));
        assert_eq!(frame.pixels.len(), frame.expected_len());
    }

    #[tokio::test]
    async fn test_episode_ends() {
        let mut env = Paddle::new(5);
        env.reset().await.unwrap();

        let mut last = None;
        for _ in 0..MAX_STEPS {
            let outcome = env.step(&Action::idle()).await.unwrap();
            if outcome.done {
                last = Some(outcome);
                break;
            }
        }
        let last = last.expect("episode should end");
        assert!(last.reward == -1.0 || env.steps == MAX_STEPS);
        let (_, y) = env.ball();
        assert!(y >= HEIGHT as i32 || env.steps == MAX_STEPS);
    }
}
