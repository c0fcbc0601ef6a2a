/// Built-in training job body
///
/// Stands in for the external trainer: one `loss` step per epoch, decaying
/// with the learning rate.
use async_trait::async_trait;
use std::time::Duration;

use super::runner::{JobContext, JobRunner};
use super::types::{JobKind, JobSpec};
use crate::errors::JobError;
use crate::logger::{self, LogTag};

pub struct TrainingRunner {
    epoch_duration: Duration,
}

impl TrainingRunner {
    pub fn new(epoch_duration: Duration) -> Self {
        Self { epoch_duration }
    }

    fn loss_at(epoch: u32, learning_rate: f64) -> f64 {
        let decay = (learning_rate * 1000.0).max(0.1);
        1.0 / (1.0 + decay * epoch as f64)
    }
}

impl Default for TrainingRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl JobRunner for TrainingRunner {
    async fn run(&self, spec: &JobSpec, ctx: &JobContext) -> Result<(), JobError> {
        let (epochs, learning_rate) = match &spec.kind {
            JobKind::Training {
                epochs,
                learning_rate,
            } => (*epochs, *learning_rate),
            other => {
                return Err(JobError::Execution(format!(
                    "training runner cannot run '{}' jobs",
                    other.runner_key()
                )))
            }
        };

        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(JobError::Execution(format!(
                "invalid learning rate {}",
                learning_rate
            )));
        }

        for epoch in 1..=epochs {
            ctx.checkpoint()?;
            if !self.epoch_duration.is_zero() {
                tokio::time::sleep(self.epoch_duration).await;
            }
            let loss = Self::loss_at(epoch, learning_rate);
            ctx.report(epoch, "loss", loss).await?;
            logger::debug(
                LogTag::Jobs,
                &format!("{}: epoch {}/{} loss {:.4}", spec.name, epoch, epochs, loss),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_decreases() {
        let first = TrainingRunner::loss_at(1, 0.001);
        let second = TrainingRunner::loss_at(2, 0.001);
        assert!(second < first);
        assert!(first < 1.0);
    }
}
