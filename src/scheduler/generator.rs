use std::iter::StepBy;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::payload::{BlockBatch, PayloadGenerator};
use crate::scheduler::job::{Job, Mode};

/// Order in which heights are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Sequential,
    /// Heights sampled with replacement; always uses a step of 1
    Random,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Random => write!(f, "random"),
        }
    }
}

/// What to generate: the height window, its walk order and payload shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPlan {
    pub start: u64,
    pub blocks: u64,
    pub step: u64,
    pub mode: Mode,
    pub strategy: Strategy,
    pub execute_scripts: bool,
    /// Seed for the random strategy; entropy when unset
    pub seed: Option<u64>,
}

impl GenerationPlan {
    pub fn new(start: u64, blocks: u64) -> Self {
        Self {
            start,
            blocks,
            step: 1,
            mode: Mode::Light,
            strategy: Strategy::Sequential,
            execute_scripts: false,
            seed: None,
        }
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_execute_scripts(mut self, execute_scripts: bool) -> Self {
        self.execute_scripts = execute_scripts;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

/// Lazy height sequence for a plan.
#[derive(Debug, Clone)]
pub enum Heights {
    Sequential {
        inner: StepBy<Range<u64>>,
        step: u64,
    },
    Random {
        rng: StdRng,
        range: Range<u64>,
        remaining: u64,
    },
}

impl Heights {
    /// Block span covered by each height.
    pub fn step(&self) -> u64 {
        match self {
            Heights::Sequential { step, .. } => *step,
            Heights::Random { .. } => 1,
        }
    }
}

impl Iterator for Heights {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self {
            Heights::Sequential { inner, .. } => inner.next(),
            Heights::Random {
                rng,
                range,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                *remaining -= 1;
                Some(rng.gen_range(range.clone()))
            }
        }
    }
}

/// Heights a plan visits, with the effective step.
pub fn plan_heights(plan: &GenerationPlan) -> Result<Heights> {
    let end = plan.start.checked_add(plan.blocks).ok_or_else(|| {
        ClientError::InvalidConfig(format!(
            "height range {} + {} overflows",
            plan.start, plan.blocks
        ))
    })?;

    match plan.strategy {
        Strategy::Sequential => {
            if plan.step == 0 {
                return Err(ClientError::InvalidConfig(
                    "step must be at least 1".to_string(),
                ));
            }
            let stride = usize::try_from(plan.step).map_err(|_| {
                ClientError::InvalidConfig(format!("step {} is too large", plan.step))
            })?;
            Ok(Heights::Sequential {
                inner: (plan.start..end).step_by(stride),
                step: plan.step,
            })
        }
        Strategy::Random => {
            let rng = match plan.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            Ok(Heights::Random {
                rng,
                range: plan.start..end,
                remaining: plan.blocks,
            })
        }
    }
}

/// Turns a [`GenerationPlan`] into staged jobs, one height at a time.
///
/// Each call to [`next_job`](Self::next_job) generates one batch, writes it
/// to `<cache_dir>/<mode>_<height>_<step>.json` and returns the job with its
/// weight. Heights whose payload cannot be produced are logged and skipped.
pub struct JobGenerator {
    heights: Heights,
    mode: Mode,
    execute_scripts: bool,
    payloads: Arc<dyn PayloadGenerator>,
    cache_dir: PathBuf,
    token: CancellationToken,
    generated: u64,
    failed: u64,
}

impl JobGenerator {
    pub fn new(
        plan: &GenerationPlan,
        payloads: Arc<dyn PayloadGenerator>,
        cache_dir: impl Into<PathBuf>,
        token: CancellationToken,
    ) -> Result<Self> {
        let heights = plan_heights(plan)?;
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;

        if plan.strategy == Strategy::Random && plan.step != 1 {
            tracing::warn!(
                requested_step = plan.step,
                "Random strategy always uses step 1"
            );
        }

        Ok(Self {
            heights,
            mode: plan.mode,
            execute_scripts: plan.execute_scripts,
            payloads,
            cache_dir,
            token,
            generated: 0,
            failed: 0,
        })
    }

    /// Next staged job, or `None` once the plan is exhausted or cancelled.
    pub async fn next_job(&mut self) -> Option<(Job, u64)> {
        let step = self.heights.step();
        loop {
            if self.token.is_cancelled() {
                return None;
            }
            let height = self.heights.next()?;

            // A blocking generator keeps running once abandoned; its result is dropped.
            let staged = tokio::select! {
                staged = self.stage(height, step) => staged,
                _ = self.token.cancelled() => {
                    tracing::debug!(height, step, "Generation abandoned on cancellation");
                    return None;
                }
            };

            match staged {
                Ok(staged) => {
                    self.generated += 1;
                    return Some(staged);
                }
                Err(e) => {
                    self.failed += 1;
                    tracing::error!(height, step, error = %e, "Error while generating data");
                }
            }
        }
    }

    async fn stage(&self, height: u64, step: u64) -> Result<(Job, u64)> {
        let payloads = Arc::clone(&self.payloads);
        let mode = self.mode;
        let batch: BlockBatch =
            tokio::task::spawn_blocking(move || payloads.generate(mode, height, step, true))
                .await??;

        let weight = batch.weight(mode);
        let staging_file = Job::staging_path(&self.cache_dir, mode, height, step);
        let json = serde_json::to_vec_pretty(&batch)?;
        tokio::fs::write(&staging_file, json).await?;

        let job = Job::new(
            height,
            step,
            mode,
            weight,
            staging_file,
            self.execute_scripts,
        );
        Ok((job, weight))
    }

    /// Jobs staged so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }

    /// Heights skipped because generation or staging failed.
    pub fn failed(&self) -> u64 {
        self.failed
    }
}
