/// Job queue types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Status transitions are monotonic: Queued -> Running -> terminal,
    /// plus Queued -> Failed for jobs cancelled before they start.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a job does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Model training run, one progress step per epoch
    Training { epochs: u32, learning_rate: f64 },

    /// Job body registered under `runner` on the queue
    Custom { runner: String, params: Value },
}

impl JobKind {
    /// Key used to look up the job body
    pub fn runner_key(&self) -> &str {
        match self {
            JobKind::Training { .. } => "training",
            JobKind::Custom { runner, .. } => runner,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub kind: JobKind,
}

impl JobSpec {
    pub fn training(name: &str, epochs: u32) -> Self {
        Self {
            name: name.to_string(),
            kind: JobKind::Training {
                epochs,
                learning_rate: 0.001,
            },
        }
    }
}

/// One step-level progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: u32,
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub events: Vec<ProgressEvent>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            status: JobStatus::Queued,
            events: Vec::new(),
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_kind_serializes_tagged() {
        let kind = JobKind::Training {
            epochs: 3,
            learning_rate: 0.01,
        };
        let json = serde_json::to_value(&kind).expect("serialize");
        assert_eq!(json["type"], "training");
        assert_eq!(json["epochs"], 3);
        assert_eq!(kind.runner_key(), "training");
    }
}
