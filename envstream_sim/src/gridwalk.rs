//! Gridwalk-v0: walk to the goal cell.
//!
//! Every key press (a `Down` transition) moves one cell. Each step costs
//! 0.01; reaching the goal pays 1 and ends the episode.

use async_trait::async_trait;
use envstream_core::{
    Action, Environment, EnvironmentFault, EnvSpec, KeyEvent, KeyWhitelist, RawFrame,
    StepOutcome,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

use crate::catalog::SeedSource;

pub const NAME: &str = "Gridwalk-v0";
pub const CELLS: i32 = 8;
pub const CELL_PX: u32 = 8;
pub const WIDTH: u32 = CELLS as u32 * CELL_PX;
pub const HEIGHT: u32 = CELLS as u32 * CELL_PX;

const STEP_COST: f64 = 0.01;
const GOAL_REWARD: f64 = 1.0;
const MAX_STEPS: u64 = 200;

const FLOOR: [u8; 3] = [40, 40, 40];
const GRID: [u8; 3] = [70, 70, 70];
const GOAL: [u8; 3] = [40, 200, 80];
const WALKER: [u8; 3] = [60, 120, 255];

#[derive(Debug)]
pub struct Gridwalk {
    rng: ChaCha8Rng,
    walker: (i32, i32),
    goal: (i32, i32),
    steps: u64,
}

impl Gridwalk {
    pub fn new(seed: u64) -> Self {
        let mut env = Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            walker: (0, 0),
            goal: (0, 0),
            steps: 0,
        };
        env.place();
        env
    }

    pub fn spec(seeds: Arc<SeedSource>) -> EnvSpec {
        EnvSpec::new(
            NAME,
            WIDTH,
            HEIGHT,
            KeyWhitelist::new(["up", "down", "left", "right"]),
            move |_: &EnvSpec| {
                Ok(Box::new(Gridwalk::new(seeds.next_seed())) as Box<dyn Environment>)
            },
        )
    }

    pub fn walker(&self) -> (i32, i32) {
        self.walker
    }

    pub fn goal(&self) -> (i32, i32) {
        self.goal
    }

    /// Places walker and goal on distinct cells.
    fn place(&mut self) {
        self.walker = (self.rng.gen_range(0..CELLS), self.rng.gen_range(0..CELLS));
        loop {
            self.goal = (self.rng.gen_range(0..CELLS), self.rng.gen_range(0..CELLS));
            if self.goal != self.walker {
                break;
            }
        }
        self.steps = 0;
    }

    fn walk(&mut self, key: &str) {
        let (dx, dy) = match key {
            "up" => (0, -1),
            "down" => (0, 1),
            "left" => (-1, 0),
            "right" => (1, 0),
            _ => return,
        };
        self.walker.0 = (self.walker.0 + dx).clamp(0, CELLS - 1);
        self.walker.1 = (self.walker.1 + dy).clamp(0, CELLS - 1);
    }

    fn draw(&self) -> RawFrame {
        let mut frame = RawFrame::filled(WIDTH, HEIGHT, FLOOR);
        for i in 0..CELLS as u32 {
            frame.fill_rect(i * CELL_PX, 0, 1, HEIGHT, GRID);
            frame.fill_rect(0, i * CELL_PX, WIDTH, 1, GRID);
        }
        let cell = |(x, y): (i32, i32), frame: &mut RawFrame, rgb: [u8; 3]| {
            let (px, py) = (x as u32 * CELL_PX + 1, y as u32 * CELL_PX + 1);
            frame.fill_rect(px, py, CELL_PX - 1, CELL_PX - 1, rgb);
        };
        cell(self.goal, &mut frame, GOAL);
        cell(self.walker, &mut frame, WALKER);
        frame
    }
}

#[async_trait]
impl Environment for Gridwalk {
    async fn reset(&mut self) -> Result<RawFrame, EnvironmentFault> {
        self.place();
        Ok(self.draw())
    }

    async fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvironmentFault> {
        for event in &action.events {
            if let KeyEvent::Down(key) = event {
                self.walk(key);
            }
        }
        self.steps += 1;

        let reached = self.walker == self.goal;
        let reward = if reached { GOAL_REWARD - STEP_COST } else { -STEP_COST };
        Ok(StepOutcome {
            observation: self.draw(),
            reward,
            done: reached || self.steps >= MAX_STEPS,
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
    use proptest::prelude::*;

    fn press(key: &str) -> Action {
        Action {
            held: vec![key.to_string()],
            events: vec![KeyEvent::Down(key.to_string())],
        }
    }

    #[tokio::test]
    async fn test_walk_to_goal() {
        let mut env = Gridwalk::new(11);
        env.reset().await.unwrap();

        let mut outcome = None;
        for _ in 0..(2 * CELLS) {
            let (wx, wy) = env.walker();
            let (gx, gy) = env.goal();
            let key = if wx < gx {
                "right"
            } else if wx > gx {
                "left"
            } else if wy < gy {
                "down"
            } else {
                "up"
            };
            let step = env.step(&press(key)).await.unwrap();
            if step.done {
                outcome = Some(step);
                break;
            }
            assert_eq!(step.reward, -STEP_COST);
        }

        let outcome = outcome.expect("goal should be reachable");
        assert_eq!(outcome.reward, GOAL_REWARD - STEP_COST);
        assert_eq!(env.walker(), env.goal());
    }

    #[tokio::test]
    async fn test_held_key_moves_once() {
        let mut env = Gridwalk::new(2);
        env.reset().await.unwrap();
        env.walker = (3, 3);
        env.goal = (0, 0);

        env.step(&press("right")).await.unwrap();
        let held = Action {
            held: vec!["right".into()],
            events: vec![],
        };
        env.step(&held).await.unwrap();
        assert_eq!(env.walker(), (4, 3));
    }

    #[tokio::test]
    async fn test_walls_clamp() {
        let mut env = Gridwalk::new(4);
        env.walker = (0, 0);
        env.goal = (7, 7);
        env.step(&press("left")).await.unwrap();
        env.step(&press("up")).await.unwrap();
        assert_eq!(env.walker(), (0, 0));
    }

    #[test]
    fn test_placement_is_seeded() {
        let a = Gridwalk::new(77);
        let b = Gridwalk::new(77);
        assert_eq!((a.walker(), a.goal()), (b.walker(), b.goal()));
        assert_ne!(a.walker(), a.goal());
    }

    proptest! {
        #[test]
        fn prop_walker_stays_on_grid(
            seed in any::<u64>(),
            moves in proptest::collection::vec(0usize..5, 0..64)
        ) {
            let keys = ["up", "down", "left", "right", "jump"];
            let mut env = Gridwalk::new(seed);
            for m in moves {
                env.walk(keys[m]);
                let (x, y) = env.walker();
                prop_assert!((0..CELLS).contains(&x));
                prop_assert!((0..CELLS).contains(&y));
            }
        }
    }
}
