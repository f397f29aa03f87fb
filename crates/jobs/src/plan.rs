//! Stage plans: the ordered, weighted breakdown of a job's work.
//!
//! A plan's weights always sum to exactly 100, so the cumulative weight after
//! stage *k* is directly the percentage reported when stage *k* completes.
//! The work behind each stage is opaque to the runner: it is a `StageWork`
//! supplied by the analysis/training collaborator.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use autoinsights_types::JobId;
use serde_json::Value;

/// Everything a stage's work gets to see.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: JobId,
    /// Zero-based position of the stage in its plan.
    pub index: usize,
    pub stage: String,
    /// Submission parameters, shared by every stage of the job.
    pub params: Arc<Value>,
}

/// Why a stage's work did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),
    #[error("panicked: {0}")]
    Panicked(String),
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        StageError::Failed(message.into())
    }
}

impl From<String> for StageError {
    fn from(value: String) -> Self {
        StageError::Failed(value)
    }
}

impl From<&str> for StageError {
    fn from(value: &str) -> Self {
        StageError::Failed(value.to_string())
    }
}

/// The work behind one named stage. Returns a JSON summary that ends up in
/// the job's result under the stage's name.
#[async_trait]
pub trait StageWork: Send + Sync {
    async fn run(&self, ctx: StageContext) -> Result<Value, StageError>;
}

struct FnStage<F>(F);

#[async_trait]
impl<F, Fut> StageWork for FnStage<F>
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StageError>> + Send + 'static,
{
    async fn run(&self, ctx: StageContext) -> Result<Value, StageError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as stage work.
pub fn stage_fn<F, Fut>(f: F) -> Arc<dyn StageWork>
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StageError>> + Send + 'static,
{
    Arc::new(FnStage(f))
}

/// One named, weighted step of a plan.
#[derive(Clone)]
pub struct Stage {
    name: String,
    weight: u8,
    work: Arc<dyn StageWork>,
}

impl Stage {
    pub fn new(name: impl Into<String>, weight: u8, work: Arc<dyn StageWork>) -> Self {
        Self {
            name: name.into(),
            weight,
            work,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> u8 {
        self.weight
    }

    pub fn work(&self) -> &Arc<dyn StageWork> {
        &self.work
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("stage plan has no stages")]
    Empty,
    #[error("stage {index} has a blank name")]
    BlankName { index: usize },
    #[error("stage name {0:?} appears more than once")]
    DuplicateName(String),
    #[error("stage weights sum to {0}, expected 100")]
    WeightSum(u32),
}

/// A validated, ordered sequence of stages whose weights sum to 100.
#[derive(Debug, Clone)]
pub struct StagePlan {
    stages: Vec<Stage>,
}

impl StagePlan {
    pub fn new(stages: Vec<Stage>) -> Result<Self, PlanError> {
        if stages.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = HashSet::new();
        for (index, stage) in stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(PlanError::BlankName { index });
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(PlanError::DuplicateName(stage.name.clone()));
            }
        }

        let total: u32 = stages.iter().map(|s| u32::from(s.weight)).sum();
        if total != 100 {
            return Err(PlanError::WeightSum(total));
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Each stage paired with the progress reached once it completes.
    pub fn checkpoints(&self) -> impl Iterator<Item = (&Stage, u8)> + '_ {
        self.stages.iter().scan(0u8, |acc, stage| {
            // Cannot overflow: validated weights sum to exactly 100.
            *acc += stage.weight;
            Some((stage, *acc))
        })
    }
}
