//! Workload catalog: turns a submission's `kind` + `params` into a stage plan.
//!
//! The built-in workloads stand in for the analysis/training collaborator.
//! Their stages only sleep and report what they would have done; the stage
//! names and weights are the ones the real pipelines report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use autoinsights_jobs::{stage_fn, PlanError, Stage, StageContext, StageError, StagePlan};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("unknown job kind '{0}'")]
    UnknownKind(String),
    #[error("invalid params for '{kind}': {reason}")]
    InvalidParams { kind: String, reason: String },
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// A kind of job the server knows how to run.
pub trait Workload: Send + Sync {
    fn kind(&self) -> &str;

    /// Validate `params` and build the plan for one job.
    fn plan(&self, params: &Value) -> Result<StagePlan, WorkloadError>;
}

/// Registered workloads keyed by kind.
#[derive(Clone, Default)]
pub struct WorkloadCatalog {
    workloads: BTreeMap<String, Arc<dyn Workload>>,
}

impl WorkloadCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// `eda`, `automl` and `preprocessing`, each stage taking `stage_delay`.
    pub fn builtin(stage_delay: Duration) -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(SimulatedWorkload::eda(stage_delay)));
        catalog.register(Arc::new(SimulatedWorkload::automl(stage_delay)));
        catalog.register(Arc::new(SimulatedWorkload::preprocessing(stage_delay)));
        catalog
    }

    /// Replaces any workload already registered under the same kind.
    pub fn register(&mut self, workload: Arc<dyn Workload>) {
        self.workloads.insert(workload.kind().to_string(), workload);
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.workloads.keys().map(String::as_str).collect()
    }

    pub fn plan(&self, kind: &str, params: &Value) -> Result<StagePlan, WorkloadError> {
        let workload = self
            .workloads
            .get(kind)
            .ok_or_else(|| WorkloadError::UnknownKind(kind.to_string()))?;
        if !(params.is_object() || params.is_null()) {
            return Err(WorkloadError::InvalidParams {
                kind: kind.to_string(),
                reason: "params must be a JSON object".to_string(),
            });
        }
        workload.plan(params)
    }
}

const EDA_STAGES: &[(&str, u8)] = &[
    ("Loading dataset", 5),
    ("Global dataset summary", 10),
    ("Target analysis", 10),
    ("Univariate numeric analysis", 10),
    ("Univariate categorical analysis", 10),
    ("Missing data patterns", 10),
    ("Outlier detection", 10),
    ("Bivariate analysis", 10),
    ("Correlation and multicollinearity", 10),
    ("Temporal patterns", 10),
    ("Bias and PII detection", 5),
];

const AUTOML_STAGES: &[(&str, u8)] = &[
    ("Loading dataset", 5),
    ("Preparing train/test split", 10),
    ("Configuring model search", 10),
    ("Training models", 55),
    ("Evaluating on test set", 10),
    ("Saving model and results", 10),
];

const PREPROCESSING_STAGES: &[(&str, u8)] = &[
    ("Loading dataset", 20),
    ("Building preprocessing pipeline", 20),
    ("Applying transformations", 40),
    ("Saving transformed dataset", 20),
];

const PROBLEM_TYPES: &[&str] = &["auto", "classification", "regression"];

/// Sleeps through a fixed list of stages.
///
/// `params.fail_at_stage` makes the named stage fail, which is how demos and
/// tests exercise the failure path end to end.
pub struct SimulatedWorkload {
    kind: &'static str,
    stages: &'static [(&'static str, u8)],
    stage_delay: Duration,
    required: &'static [&'static str],
}

impl SimulatedWorkload {
    pub fn eda(stage_delay: Duration) -> Self {
        Self {
            kind: "eda",
            stages: EDA_STAGES,
            stage_delay,
            required: &[],
        }
    }

    pub fn automl(stage_delay: Duration) -> Self {
        Self {
            kind: "automl",
            stages: AUTOML_STAGES,
            stage_delay,
            required: &["target_column"],
        }
    }

    pub fn preprocessing(stage_delay: Duration) -> Self {
        Self {
            kind: "preprocessing",
            stages: PREPROCESSING_STAGES,
            stage_delay,
            required: &[],
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> WorkloadError {
        WorkloadError::InvalidParams {
            kind: self.kind.to_string(),
            reason: reason.into(),
        }
    }

    fn validate(&self, params: &Value) -> Result<(), WorkloadError> {
        for key in self.required {
            match params.get(key).and_then(Value::as_str) {
                Some(v) if !v.trim().is_empty() => {}
                _ => return Err(self.invalid(format!("'{key}' is required"))),
            }
        }
        if let Some(problem_type) = params.get("problem_type") {
            let ok = problem_type
                .as_str()
                .is_some_and(|p| PROBLEM_TYPES.contains(&p));
            if !ok {
                return Err(self.invalid(format!(
                    "'problem_type' must be one of {}",
                    PROBLEM_TYPES.join(", ")
                )));
            }
        }
        if let Some(stage) = params.get("fail_at_stage") {
            let known = stage
                .as_str()
                .is_some_and(|s| self.stages.iter().any(|(name, _)| *name == s));
            if !known {
                return Err(self.invalid(format!("'fail_at_stage' {stage} is not a stage")));
            }
        }
        Ok(())
    }
}

impl Workload for SimulatedWorkload {
    fn kind(&self) -> &str {
        self.kind
    }

    fn plan(&self, params: &Value) -> Result<StagePlan, WorkloadError> {
        self.validate(params)?;
        let delay = self.stage_delay;
        let stages = self
            .stages
            .iter()
            .map(|&(name, weight)| {
                let work = stage_fn(move |ctx: StageContext| async move {
                    tokio::time::sleep(delay).await;
                    if ctx.params.get("fail_at_stage").and_then(Value::as_str) == Some(name) {
                        return Err(StageError::new(format!("simulated failure in {name}")));
                    }
                    Ok(json!({
                        "stage": ctx.index + 1,
                        "simulated": true,
                        "duration_ms": delay.as_millis() as u64,
                    }))
                });
                Stage::new(name, weight, work)
            })
            .collect();
        Ok(StagePlan::new(stages)?)
    }
}
