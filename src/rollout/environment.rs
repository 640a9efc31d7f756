//! Environment interface and the binding that turns raw frames into
//! compressor-ready observations.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{CompressorConfig, EnvConfig};
use crate::error::{Result, UlerlError};
use crate::kernel::downsampled_shape;

use super::aggregation::{Preprocessing, SkipPolicy};

/// Raw frame, row-major `(rows, cols, channels)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub shape: [usize; 3],
    pub data: Vec<f64>,
}

impl Frame {
    pub fn new(shape: [usize; 3], data: Vec<f64>) -> Result<Self> {
        let expected = shape.iter().product();
        if data.len() != expected {
            return Err(UlerlError::ShapeMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Single-channel frame.
    pub fn gray(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        Self::new([rows, cols, 1], data)
    }

    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    pub fn cols(&self) -> usize {
        self.shape[1]
    }

    pub fn channels(&self) -> usize {
        self.shape[2]
    }
}

/// One environment transition.
#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub frame: Frame,
    pub reward: f64,
    pub done: bool,
    pub info: serde_json::Value,
}

/// Simulation environment with a discrete action space.
pub trait Environment: Send {
    fn reset(&mut self) -> Result<Frame>;

    fn step(&mut self, action: usize) -> Result<StepOutcome>;

    /// Best effort; failures are logged and ignored by the caller.
    fn render(&mut self) -> Result<()> {
        Ok(())
    }

    fn action_count(&self) -> usize;
}

/// Builds one environment instance per binding.
pub type EnvFactory = Arc<dyn Fn(&EnvConfig) -> Result<Box<dyn Environment>> + Send + Sync>;

/// Aggregate of one action plus its skipped micro-steps.
#[derive(Clone, Debug)]
pub struct Transition {
    /// Processed observations, action step first
    pub observations: Vec<Vec<f64>>,
    /// Sum of rewards over every micro-step
    pub reward: f64,
    /// Whether any micro-step ended the episode
    pub done: bool,
    pub infos: Vec<serde_json::Value>,
}

/// An environment plus its cached metadata and observation pipeline.
///
/// Frames are optionally background-subtracted against the last reset
/// frame, downsampled by integer stride (partial strides at the far edge
/// dropped), averaged over channels and flattened.
pub struct EnvBinding {
    env: Box<dyn Environment>,
    frame_shape: [usize; 3],
    downsample: [usize; 2],
    obs_shape: (usize, usize),
    preproc: Preprocessing,
    action_count: usize,
    reset_frame: Frame,
    reset_obs: Vec<f64>,
}

impl fmt::Debug for EnvBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvBinding")
            .field("frame_shape", &self.frame_shape)
            .field("obs_shape", &self.obs_shape)
            .field("action_count", &self.action_count)
            .finish()
    }
}

impl EnvBinding {
    /// Reset once and cache the frame shape and action count.
    pub fn new(mut env: Box<dyn Environment>, config: &CompressorConfig) -> Result<Self> {
        let reset_frame = env.reset()?;
        if reset_frame.data.is_empty() {
            return Err(UlerlError::Environment("empty observation space".into()));
        }
        let action_count = env.action_count();
        if action_count == 0 {
            return Err(UlerlError::Environment("empty action space".into()));
        }
        let frame_shape = reset_frame.shape;
        let obs_shape = downsampled_shape((frame_shape[0], frame_shape[1]), config.downsample)?;

        let mut binding = Self {
            env,
            frame_shape,
            downsample: config.downsample,
            obs_shape,
            preproc: config.preproc,
            action_count,
            reset_obs: Vec::new(),
            reset_frame,
        };
        binding.reset_obs = binding.process(&binding.reset_frame)?;
        debug!(
            frame = ?frame_shape,
            obs = ?obs_shape,
            actions = action_count,
            "environment bound"
        );
        Ok(binding)
    }

    /// Build through a factory.
    pub fn from_factory(
        factory: &EnvFactory,
        env_config: &EnvConfig,
        compr_config: &CompressorConfig,
    ) -> Result<Self> {
        Self::new(factory(env_config)?, compr_config)
    }

    // --- Accessors ---

    pub fn frame_shape(&self) -> [usize; 3] {
        self.frame_shape
    }

    /// `(rows, cols)` of the raw frame.
    pub fn frame_size(&self) -> (usize, usize) {
        (self.frame_shape[0], self.frame_shape[1])
    }

    /// `(rows, cols)` of processed observations.
    pub fn obs_shape(&self) -> (usize, usize) {
        self.obs_shape
    }

    pub fn obs_size(&self) -> usize {
        self.obs_shape.0 * self.obs_shape.1
    }

    pub fn action_count(&self) -> usize {
        self.action_count
    }

    /// Processed observation of the last reset.
    pub fn reset_observation(&self) -> &[f64] {
        &self.reset_obs
    }

    // --- Pipeline ---

    /// Raw frame to flat observation.
    pub fn process(&self, frame: &Frame) -> Result<Vec<f64>> {
        if frame.shape != self.frame_shape {
            return Err(UlerlError::ShapeMismatch {
                expected: self.frame_shape.iter().product(),
                got: frame.data.len(),
            });
        }
        let [_, cols, channels] = self.frame_shape;
        let subtract = self.preproc == Preprocessing::SubtractBackground;
        let (out_rows, out_cols) = self.obs_shape;

        let mut obs = Vec::with_capacity(out_rows * out_cols);
        for r in 0..out_rows {
            let row = r * self.downsample[0];
            for c in 0..out_cols {
                let col = c * self.downsample[1];
                let base = (row * cols + col) * channels;
                let mut total = 0.0;
                for ch in 0..channels {
                    let mut v = frame.data[base + ch];
                    if subtract {
                        v -= self.reset_frame.data[base + ch];
                    }
                    total += v;
                }
                obs.push(total / channels as f64);
            }
        }
        Ok(obs)
    }

    /// Reset the episode and return its first observation.
    pub fn reset(&mut self) -> Result<Vec<f64>> {
        let frame = self.env.reset()?;
        if frame.shape != self.frame_shape {
            return Err(UlerlError::ShapeMismatch {
                expected: self.frame_shape.iter().product(),
                got: frame.data.len(),
            });
        }
        // Background is the latest reset frame.
        self.reset_frame = frame;
        self.reset_obs = self.process(&self.reset_frame)?;
        Ok(self.reset_obs.clone())
    }

    /// Take `action`, then `skip_frames` more micro-steps under `policy`.
    ///
    /// Skipping stops as soon as a micro-step ends the episode.
    pub fn execute(
        &mut self,
        action: usize,
        skip_frames: usize,
        policy: SkipPolicy,
    ) -> Result<Transition> {
        if action >= self.action_count {
            return Err(UlerlError::Environment(format!(
                "action {} out of range for {} actions",
                action, self.action_count
            )));
        }
        let mut transition = Transition {
            observations: Vec::with_capacity(skip_frames + 1),
            reward: 0.0,
            done: false,
            infos: Vec::with_capacity(skip_frames + 1),
        };

        for micro in 0..=skip_frames {
            let act = if micro == 0 {
                action
            } else {
                policy.action(action)
            };
            let outcome = self.env.step(act)?;
            transition.observations.push(self.process(&outcome.frame)?);
            transition.reward += outcome.reward;
            transition.infos.push(outcome.info);
            if outcome.done {
                transition.done = true;
                break;
            }
        }
        Ok(transition)
    }

    pub fn render(&mut self) {
        if let Err(err) = self.env.render() {
            warn!(error = %err, "render failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::testing::ScriptedEnv;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(downsample: [usize; 2], preproc: Preprocessing) -> CompressorConfig {
        CompressorConfig {
            downsample,
            preproc,
            ..Default::default()
        }
    }

    #[test]
    fn test_metadata_cached_at_construction() {
        let env = ScriptedEnv::new([4, 6, 3], 5, 10);
        let binding = EnvBinding::new(Box::new(env), &config([2, 3], Preprocessing::None)).unwrap();
        assert_eq!(binding.frame_shape(), [4, 6, 3]);
        assert_eq!(binding.obs_shape(), (2, 2));
        assert_eq!(binding.action_count(), 5);
        assert_eq!(binding.reset_observation().len(), 4);
        assert_eq!(binding.obs_size(), 4);
    }

    #[test]
    fn test_stride_and_channel_mean() {
        let env = ScriptedEnv::new([3, 3, 2], 2, 10);
        let binding = EnvBinding::new(Box::new(env), &config([2, 2], Preprocessing::None)).unwrap();
        // Pixel (r, c) has channels (v, v + 1)
        let data = (0..9).flat_map(|p| [p as f64, p as f64 + 1.0]).collect();
        let frame = Frame::new([3, 3, 2], data).unwrap();
        // 3 / 2 = 1 row and col: only pixel (0, 0)
        assert_eq!(binding.process(&frame).unwrap(), vec![0.5]);

        let binding = EnvBinding::new(
            Box::new(ScriptedEnv::new([3, 3, 2], 2, 10)),
            &config([1, 2], Preprocessing::None),
        )
        .unwrap();
        // Rows 0..3, cols {0}: pixels 0, 3, 6
        assert_eq!(binding.process(&frame).unwrap(), vec![0.5, 3.5, 6.5]);
    }

    #[test]
    fn test_subtract_background() {
        let env = ScriptedEnv::new([2, 2, 1], 2, 10);
        let mut binding =
            EnvBinding::new(Box::new(env), &config([1, 1], Preprocessing::SubtractBackground))
                .unwrap();
        let reset = binding.reset().unwrap();
        assert!(reset.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_execute_sums_rewards_and_stops_on_done() {
        let env = ScriptedEnv::new([2, 2, 1], 3, 4);
        let mut binding = EnvBinding::new(Box::new(env), &config([1, 1], Preprocessing::None)).unwrap();
        binding.reset().unwrap();

        let t = binding.execute(2, 2, SkipPolicy::Repeat).unwrap();
        assert_eq!(t.observations.len(), 3);
        assert_eq!(t.reward, 3.0 * ScriptedEnv::reward_for(2));
        assert!(!t.done);

        // Episode ends at step 4: only one more micro-step runs.
        let t = binding.execute(1, 5, SkipPolicy::Noop).unwrap();
        assert!(t.done);
        assert_eq!(t.observations.len(), 1);
        assert_eq!(t.reward, ScriptedEnv::reward_for(1));
    }

    #[test]
    fn test_action_out_of_range() {
        let env = ScriptedEnv::new([2, 2, 1], 3, 4);
        let mut binding = EnvBinding::new(Box::new(env), &config([1, 1], Preprocessing::None)).unwrap();
        assert!(matches!(
            binding.execute(3, 0, SkipPolicy::Noop),
            Err(UlerlError::Environment(_))
        ));
    }

    /// Wraps a scripted environment whose renderer always fails.
    struct BrokenDisplay {
        inner: ScriptedEnv,
        renders: Arc<AtomicUsize>,
    }

    impl Environment for BrokenDisplay {
        fn reset(&mut self) -> Result<Frame> {
            self.inner.reset()
        }

        fn step(&mut self, action: usize) -> Result<StepOutcome> {
            self.inner.step(action)
        }

        fn render(&mut self) -> Result<()> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Err(UlerlError::Environment("no display".into()))
        }

        fn action_count(&self) -> usize {
            self.inner.action_count()
        }
    }

    #[test]
    fn test_render_failure_is_ignored() {
        let renders = Arc::new(AtomicUsize::new(0));
        let env = BrokenDisplay {
            inner: ScriptedEnv::new([2, 2, 1], 2, 5),
            renders: Arc::clone(&renders),
        };
        let mut binding = EnvBinding::new(Box::new(env), &config([1, 1], Preprocessing::None)).unwrap();

        binding.render();
        binding.render();
        assert_eq!(renders.load(Ordering::SeqCst), 2);

        // The binding keeps working after failed renders.
        let transition = binding.execute(1, 0, SkipPolicy::Noop).unwrap();
        assert_eq!(transition.observations.len(), 1);
        assert_eq!(transition.reward, ScriptedEnv::reward_for(1));
    }
}
