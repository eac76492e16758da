//! Batch-scheduler job identification and seed selection.

use rand::Rng;
use tracing::warn;

/// Environment variables carrying the scheduler job identifier, in lookup order.
pub const JOB_ID_VARS: [&str; 3] = ["PBS_JOBID", "SLURM_JOB_ID", "LSB_JOBID"];

/// Job identifier used when not running under a scheduler.
pub const LOCAL_JOB_ID: &str = "local";

/// Upper bound (exclusive) of randomly chosen seeds.
pub const RANDOM_SEED_MAX: u64 = 100_000;

/// Job identifier and seed of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    /// Scheduler job identifier, or `local`.
    pub job_id: String,
    /// Seed of the run's random stream.
    pub seed: u64,
}

impl JobIdentity {
    /// Identify the current job from the environment.
    pub fn from_env(seed_override: Option<u64>) -> Self {
        let job_id = JOB_ID_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()));
        Self::resolve(job_id.as_deref(), seed_override)
    }

    /// Identify a job given its (optional) scheduler id.
    ///
    /// The seed is the integer before the first `.` of the job id; without a usable job id it is
    /// random in `[0, 100000)`. `seed_override` wins over both.
    pub fn resolve(job_id: Option<&str>, seed_override: Option<u64>) -> Self {
        let job_id = job_id.map(str::trim).unwrap_or(LOCAL_JOB_ID).to_string();
        let derived = if job_id == LOCAL_JOB_ID { None } else { seed_from_job_id(&job_id) };
        if derived.is_none() && job_id != LOCAL_JOB_ID && seed_override.is_none() {
            warn!(job_id = %job_id, "job id has no numeric prefix; using a random seed");
        }
        let seed = seed_override
            .or(derived)
            .unwrap_or_else(|| rand::rng().random_range(0..RANDOM_SEED_MAX));
        Self { job_id, seed }
    }

    /// Whether the run is outside a batch scheduler.
    pub fn is_local(&self) -> bool {
        self.job_id == LOCAL_JOB_ID
    }
}

/// Integer prefix of a scheduler job id (`"12345.server"` -> `12345`).
pub fn seed_from_job_id(job_id: &str) -> Option<u64> {
    job_id.split('.').next().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_from_job_id() {
        assert_eq!(seed_from_job_id("12345.pbs-server.local"), Some(12345));
        assert_eq!(seed_from_job_id("987"), Some(987));
        assert_eq!(seed_from_job_id("abc.def"), None);
        assert_eq!(seed_from_job_id("12345[3].server"), None);
    }

    #[test]
    fn test_scheduler_job() {
        let id = JobIdentity::resolve(Some("4242.cluster"), None);
        assert_eq!(id.job_id, "4242.cluster");
        assert_eq!(id.seed, 4242);
        assert!(!id.is_local());
    }

    #[test]
    fn test_local_job_random_seed() {
        let id = JobIdentity::resolve(None, None);
        assert!(id.is_local());
        assert!(id.seed < RANDOM_SEED_MAX);
    }

    #[test]
    fn test_override_wins() {
        assert_eq!(JobIdentity::resolve(Some("4242.cluster"), Some(7)).seed, 7);
        assert_eq!(JobIdentity::resolve(None, Some(7)).seed, 7);
    }
}
