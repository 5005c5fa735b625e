//! Error types for the Linode driver.

use thiserror::Error;

use crate::api::{ApiError, InstanceId, JobId};
use crate::config::ConfigError;
use crate::ssh_key::SshKeyError;

/// Errors raised by [`super::LinodeDriver`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LinodeDriverError {
    /// Raised when configuration binding or validation fails.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Wrapper for remote API failures.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Raised when the SSH keypair cannot be produced.
    #[error(transparent)]
    SshKey(#[from] SshKeyError),
    /// Raised when a bounded wait exceeds its deadline.
    #[error("timeout waiting for {action} on {target}")]
    Timeout {
        /// What was being waited on.
        action: String,
        /// Job or instance being polled.
        target: String,
    },
    /// Raised when the provider has no job for the operation just issued, or
    /// returns a job for a different instance.
    #[error("job {job} not found for instance {instance_id}")]
    JobNotFound {
        /// Instance the job should belong to.
        instance_id: InstanceId,
        /// Job identifier or action that was looked up.
        job: String,
    },
    /// Raised when a job completes unsuccessfully.
    #[error("job {job_id} failed on instance {instance_id}")]
    JobFailed {
        /// Instance the job ran against.
        instance_id: InstanceId,
        /// Failed job.
        job_id: JobId,
    },
    /// Raised when every IPv4 address on the instance is private.
    #[error("instance {instance_id} has no public IPv4 address")]
    NoPublicAddress {
        /// Provider instance identifier.
        instance_id: InstanceId,
    },
    /// Raised when the plan's disk cannot hold the swap disk plus a root disk.
    #[error("plan disk of {plan_disk_mb} MB cannot fit {swap_size_mb} MB of swap")]
    DiskTooSmall {
        /// Disk allotment of the plan.
        plan_disk_mb: u32,
        /// Requested swap size.
        swap_size_mb: u32,
    },
    /// Raised when a verb needs an instance but none has been created.
    #[error("machine {machine_name} has no instance; run create first")]
    NotCreated {
        /// Host-assigned machine name.
        machine_name: String,
    },
    /// Raised when the IP address is requested before create recorded one.
    #[error("machine {machine_name} has no recorded IP address")]
    MissingIpAddress {
        /// Host-assigned machine name.
        machine_name: String,
    },
}
