//! Cost-bounded batch scheduler
//!
//! Records are handed to the [`DialogDriver`] in fixed-size batches, strictly
//! one batch at a time. Before each batch the cost accumulated so far is
//! compared against the limit; once it is exceeded no further batch starts.
//! A batch that is already running always completes, so the final cost may
//! overshoot the limit by up to one batch.

use crate::config::DialogConfig;
use crate::dataset::ScenarioRecord;
use crate::error::{PolicySimError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of one simulated conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// 1-based id of the scenario record
    pub event_id: usize,

    /// Conversation identifier assigned by the driver
    pub thread_id: String,

    /// Messages written by the simulated user, in order
    pub user_messages: Vec<String>,

    /// Reasoning notes of the simulated user, in order
    #[serde(default)]
    pub user_thoughts: Vec<String>,

    /// Cost attributed to this conversation
    #[serde(default)]
    pub cost: f64,
}

/// What the driver returns for one batch
#[derive(Debug, Clone, Default)]
pub struct BatchRun {
    /// One result per completed scenario
    pub results: Vec<BatchResult>,

    /// Incremental cost of the whole batch
    pub cost: f64,
}

/// Runs conversations between the simulated user and the agent under test
#[async_trait]
pub trait DialogDriver: Send + Sync {
    /// Prepare for a new experiment; artifacts may be written to
    /// `experiment_dir`
    async fn init(&self, _experiment_dir: &Path) -> Result<()> {
        Ok(())
    }

    /// Run every record of a batch to completion
    async fn run_batch(&self, records: &[ScenarioRecord]) -> Result<BatchRun>;
}

/// Why the scheduler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every planned batch ran
    Completed,
    /// The cumulative cost exceeded the limit
    CostLimit,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::CostLimit => write!(f, "terminated by cost limit"),
        }
    }
}

/// Collected results of a scheduler run
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    /// Results of every completed batch, in batch order
    pub results: Vec<BatchResult>,

    /// Sum of the incremental batch costs
    pub total_cost: f64,

    /// Batches the records were partitioned into
    pub batches_planned: usize,

    /// Batches actually executed
    pub batches_run: usize,

    /// Trailing records never scheduled because they did not fill a batch
    pub dropped_records: usize,

    pub stop_reason: StopReason,
}

/// Batch scheduler settings
#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    batch_size: usize,
    cost_limit: f64,
    drop_remainder: bool,
}

impl BatchScheduler {
    /// Create a scheduler that drops the trailing partial batch
    pub fn new(batch_size: usize, cost_limit: f64) -> Result<Self> {
        if batch_size == 0 {
            return Err(PolicySimError::Configuration(
                "batch size must be positive".to_string(),
            ));
        }
        if !cost_limit.is_finite() || cost_limit < 0.0 {
            return Err(PolicySimError::Configuration(format!(
                "cost limit must be a non-negative number, got {}",
                cost_limit
            )));
        }
        Ok(Self {
            batch_size,
            cost_limit,
            drop_remainder: true,
        })
    }

    /// Scheduler for a dialogue configuration
    pub fn from_config(config: &DialogConfig) -> Result<Self> {
        Ok(Self::new(config.batch_size, config.cost_limit)?
            .with_drop_remainder(config.drop_remainder))
    }

    /// Choose whether the trailing partial batch is skipped
    pub fn with_drop_remainder(mut self, drop_remainder: bool) -> Self {
        self.drop_remainder = drop_remainder;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn cost_limit(&self) -> f64 {
        self.cost_limit
    }

    /// Partition `records` into the batches that will be offered to the driver
    pub fn plan<'a>(&self, records: &'a [ScenarioRecord]) -> (Vec<&'a [ScenarioRecord]>, usize) {
        let chunks = records.chunks_exact(self.batch_size);
        let remainder = chunks.remainder();
        let mut batches: Vec<&[ScenarioRecord]> = chunks.collect();

        if remainder.is_empty() {
            (batches, 0)
        } else if self.drop_remainder {
            (batches, remainder.len())
        } else {
            batches.push(remainder);
            (batches, 0)
        }
    }

    /// Drive all batches through the dialogue driver.
    ///
    /// # Errors
    ///
    /// Driver errors abort the run and are returned unchanged; results of
    /// batches that already completed are discarded with it. A negative or
    /// non-finite batch cost is reported as a collaborator error.
    pub async fn run(
        &self,
        records: &[ScenarioRecord],
        driver: &dyn DialogDriver,
    ) -> Result<ScheduleOutcome> {
        let (batches, dropped_records) = self.plan(records);
        if dropped_records > 0 {
            tracing::warn!(
                dropped_records,
                batch_size = self.batch_size,
                "Trailing records do not fill a batch and will not run"
            );
        }

        let mut outcome = ScheduleOutcome {
            results: Vec::new(),
            total_cost: 0.0,
            batches_planned: batches.len(),
            batches_run: 0,
            dropped_records,
            stop_reason: StopReason::Completed,
        };

        tracing::info!(
            records = records.len(),
            batches = batches.len(),
            cost_limit = self.cost_limit,
            "Start running the simulator"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            if outcome.total_cost > self.cost_limit {
                tracing::warn!(
                    total_cost = outcome.total_cost,
                    cost_limit = self.cost_limit,
                    remaining_batches = outcome.batches_planned - index,
                    "The cost limit for the experiment is reached, stopping the simulation"
                );
                outcome.stop_reason = StopReason::CostLimit;
                break;
            }

            tracing::info!(batch = index, size = batch.len(), "Running batch");
            let run = driver.run_batch(batch).await?;

            if !run.cost.is_finite() || run.cost < 0.0 {
                return Err(PolicySimError::collaborator(format!(
                    "dialogue driver reported invalid cost {} for batch {}",
                    run.cost, index
                )));
            }

            outcome.total_cost += run.cost;
            outcome.results.extend(run.results);
            outcome.batches_run += 1;
            tracing::debug!(
                batch = index,
                batch_cost = run.cost,
                total_cost = outcome.total_cost,
                "Batch finished"
            );
        }

        tracing::info!(
            batches_run = outcome.batches_run,
            results = outcome.results.len(),
            total_cost = outcome.total_cost,
            stop_reason = %outcome.stop_reason,
            "Finished running the simulator"
        );
        Ok(outcome)
    }
}
