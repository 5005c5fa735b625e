//! Bounded fixed-interval polling of jobs and instance status.
//!
//! Both loops query immediately, then sleep `interval` between queries until
//! the deadline passes. There is no backoff; a remote error ends the wait.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::api::{DiskId, Instance, InstanceId, Job, JobAction, JobId, JobStatus, LinodeApi};
use crate::status::MachineState;

use super::LinodeDriverError;

/// Interval between job polls.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound on any single job wait.
pub const JOB_POLL_TIMEOUT: Duration = Duration::from_secs(60);
/// Interval between instance status polls after boot.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Upper bound on the post-boot status wait.
pub const STATUS_POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Polling cadence and deadline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between queries.
    pub interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Policy used for provider jobs.
    pub const JOB: Self = Self {
        interval: JOB_POLL_INTERVAL,
        timeout: JOB_POLL_TIMEOUT,
    };

    /// Policy used for the post-boot status wait.
    pub const STATUS: Self = Self {
        interval: STATUS_POLL_INTERVAL,
        timeout: STATUS_POLL_TIMEOUT,
    };
}

/// The operation a job must describe for a wait to accept it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JobTarget {
    /// Instance the job runs against.
    pub instance: InstanceId,
    /// Action the job performs.
    pub action: JobAction,
    /// Disk the job deploys, when the operation created one.
    pub disk: Option<DiskId>,
}

impl JobTarget {
    /// Targets `action` on `instance` without a secondary entity check.
    #[must_use]
    pub const fn new(instance: InstanceId, action: JobAction) -> Self {
        Self {
            instance,
            action,
            disk: None,
        }
    }

    /// Also requires the job's secondary entity to be `disk`.
    #[must_use]
    pub const fn on_disk(mut self, disk: DiskId) -> Self {
        self.disk = Some(disk);
        self
    }

    fn matches(&self, id: JobId, job: &Job) -> bool {
        job.id == id
            && job.entity_id == self.instance
            && job.action == self.action.as_str()
            && self
                .disk
                .is_none_or(|disk| job.secondary_entity_id == Some(disk.get()))
    }
}

/// Waits until `job` finishes successfully, checking on every poll that it
/// still describes `target`.
///
/// # Errors
///
/// - [`LinodeDriverError::JobNotFound`] when the provider no longer knows the
///   job, or reports it against another instance, action or disk.
/// - [`LinodeDriverError::JobFailed`] when the job completes unsuccessfully.
/// - [`LinodeDriverError::Timeout`] when the deadline passes first.
/// - [`LinodeDriverError::Api`] when a poll request fails.
pub async fn wait_for_job<A>(
    api: &A,
    target: JobTarget,
    job: JobId,
    policy: PollPolicy,
) -> Result<(), LinodeDriverError>
where
    A: LinodeApi + ?Sized,
{
    let instance = target.instance;
    let deadline = Instant::now() + policy.timeout;

    while Instant::now() <= deadline {
        let reported = api.get_job(job).await?;
        let Some(current) = reported.filter(|found| target.matches(job, found)) else {
            return Err(LinodeDriverError::JobNotFound {
                instance_id: instance,
                job: job.to_string(),
            });
        };

        if current.status.is_success() {
            debug!(instance_id = %instance, job_id = %job, "job finished");
            return Ok(());
        }

        if current.status == JobStatus::Failed {
            return Err(LinodeDriverError::JobFailed {
                instance_id: instance,
                job_id: job,
            });
        }

        sleep(policy.interval).await;
    }

    Err(LinodeDriverError::Timeout {
        action: format!("job {job}"),
        target: format!("instance {instance}"),
    })
}

/// Waits until `instance` reports `expected`, returning the final snapshot.
///
/// # Errors
///
/// Returns [`LinodeDriverError::Timeout`] when the state is not reached before
/// the deadline, or [`LinodeDriverError::Api`] when a poll request fails.
pub async fn wait_for_status<A>(
    api: &A,
    instance: InstanceId,
    expected: MachineState,
    policy: PollPolicy,
) -> Result<Instance, LinodeDriverError>
where
    A: LinodeApi + ?Sized,
{
    let deadline = Instant::now() + policy.timeout;

    while Instant::now() <= deadline {
        let current = api.get_instance(instance).await?;
        let state = current.status.machine_state();
        if state == expected {
            return Ok(current);
        }
        debug!(instance_id = %instance, status = %current.status, "waiting for instance");
        sleep(policy.interval).await;
    }

    Err(LinodeDriverError::Timeout {
        action: format!("state {expected}"),
        target: format!("instance {instance}"),
    })
}
