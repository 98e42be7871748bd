//! The validated job list of one orchestration invocation.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::JobSpec;

/// One orchestrated execution of a list of jobs
///
/// Job order carries no meaning beyond input identity; results come back in
/// completion order. The same batch may be run more than once; each run gets its own
/// CSV/log pair.
#[derive(Clone, Debug)]
pub struct BatchRun {
    jobs: Vec<JobSpec>,
}

impl BatchRun {
    /// Validate every job and check correlation ids are unique
    pub fn new(jobs: Vec<JobSpec>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            job.validate()?;
            if !seen.insert(&job.correlation_id) {
                return Err(Error::DuplicateCorrelationId(job.correlation_id.to_string()));
            }
        }

        Ok(Self { jobs })
    }

    /// Jobs in input order
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    /// Number of jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the batch has no jobs
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub(crate) fn into_jobs(self) -> Vec<JobSpec> {
        self.jobs
    }
}
