//! Deterministic scripted environments for tests and benchmarks.

use std::sync::Arc;

use crate::config::EnvConfig;
use crate::error::{Result, UlerlError};

use super::environment::{EnvFactory, Environment, Frame, StepOutcome};

/// Frames are a pure function of the step count and the last action, so
/// every reset replays the same episode for the same action sequence.
#[derive(Clone, Debug)]
pub struct ScriptedEnv {
    shape: [usize; 3],
    actions: usize,
    episode_len: usize,
    fail_at: Option<usize>,
    t: usize,
    last_action: usize,
}

impl ScriptedEnv {
    pub fn new(shape: [usize; 3], actions: usize, episode_len: usize) -> Self {
        Self {
            shape,
            actions,
            episode_len,
            fail_at: None,
            t: 0,
            last_action: 0,
        }
    }

    /// Step number `step` (1-based) reports an environment failure.
    pub fn failing_at(mut self, step: usize) -> Self {
        self.fail_at = Some(step);
        self
    }

    /// Reward paid by every micro-step taking `action`.
    pub fn reward_for(action: usize) -> f64 {
        1.0 + 0.5 * action as f64
    }

    /// Factory building fresh copies of this environment.
    pub fn factory(self) -> EnvFactory {
        Arc::new(move |_: &EnvConfig| Ok(Box::new(self.clone()) as Box<dyn Environment>))
    }

    fn frame(&self) -> Frame {
        let len: usize = self.shape.iter().product();
        let data = (0..len)
            .map(|i| ((self.t * 31 + self.last_action * 17 + i * 7) % 256) as f64)
            .collect();
        Frame {
            shape: self.shape,
            data,
        }
    }
}

impl Environment for ScriptedEnv {
    fn reset(&mut self) -> Result<Frame> {
        self.t = 0;
        self.last_action = 0;
        Ok(self.frame())
    }

    fn step(&mut self, action: usize) -> Result<StepOutcome> {
        self.t += 1;
        if self.fail_at == Some(self.t) {
            return Err(UlerlError::Environment(format!(
                "scripted failure at step {}",
                self.t
            )));
        }
        self.last_action = action;
        Ok(StepOutcome {
            frame: self.frame(),
            reward: Self::reward_for(action),
            done: self.t >= self.episode_len,
            info: serde_json::json!({ "t": self.t }),
        })
    }

    fn action_count(&self) -> usize {
        self.actions
    }
}

/// Replays a fixed list of single-channel frames, one per step, whatever
/// the action. The reset frame is `frames[0]`.
#[derive(Clone, Debug)]
pub struct FrameScript {
    rows: usize,
    cols: usize,
    frames: Vec<Vec<f64>>,
    actions: usize,
    t: usize,
}

impl FrameScript {
    pub fn new(rows: usize, cols: usize, frames: Vec<Vec<f64>>, actions: usize) -> Self {
        Self {
            rows,
            cols,
            frames,
            actions,
            t: 0,
        }
    }

    pub fn factory(self) -> EnvFactory {
        Arc::new(move |_: &EnvConfig| Ok(Box::new(self.clone()) as Box<dyn Environment>))
    }

    fn frame(&self) -> Result<Frame> {
        let data = self.frames.get(self.t).cloned().ok_or_else(|| {
            UlerlError::Environment(format!("script has no frame {}", self.t))
        })?;
        Frame::gray(self.rows, self.cols, data)
    }
}

impl Environment for FrameScript {
    fn reset(&mut self) -> Result<Frame> {
        self.t = 0;
        self.frame()
    }

    fn step(&mut self, _action: usize) -> Result<StepOutcome> {
        self.t += 1;
        Ok(StepOutcome {
            frame: self.frame()?,
            reward: 1.0,
            done: self.t + 1 >= self.frames.len(),
            info: serde_json::Value::Null,
        })
    }

    fn action_count(&self) -> usize {
        self.actions
    }
}
