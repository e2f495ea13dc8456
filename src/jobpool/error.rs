use std::fmt;
use std::time::Duration;

/// Why a single job did not produce a result
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Failed(anyhow::Error),
    #[error("job cancelled")]
    Cancelled,
    #[error("job timed out after {0:?}")]
    TimedOut(Duration),
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("job never ran")]
    NotRun,
}

/// One failed job inside a [`PoolError`]
#[derive(Debug, Clone)]
pub struct JobFailure {
    /// Position of the job in the pool
    pub index: usize,
    /// Full error chain, rendered
    pub message: String,
}

/// Every job failure of a pool run, combined.
///
/// Displays one line per failed job so each underlying message stays
/// recognisable in the aggregate.
#[derive(Debug, Clone)]
pub struct PoolError {
    pub(super) failures: Vec<JobFailure>,
}

impl PoolError {
    pub fn failures(&self) -> &[JobFailure] {
        &self.failures
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "job {}: {}", failure.index, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PoolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_every_failure() {
        let err = PoolError {
            failures: vec![
                JobFailure {
                    index: 0,
                    message: "boom".to_string(),
                },
                JobFailure {
                    index: 4,
                    message: "quota exceeded".to_string(),
                },
            ],
        };
        assert_eq!(err.to_string(), "job 0: boom\njob 4: quota exceeded");
    }

    #[test]
    fn test_failed_is_transparent() {
        let err = JobError::Failed(anyhow::anyhow!("listing failed"));
        assert_eq!(err.to_string(), "listing failed");
    }
}
