//! Linode API abstraction.
//!
//! [`LinodeApi`] has one method per remote call the driver makes. The driver
//! only ever talks to it through a [`ClientFactory`], which lets tests swap
//! in a scripted implementation.

mod client;
mod error;
mod types;

use std::future::Future;
use std::pin::Pin;

pub use client::{HttpClientFactory, HttpLinodeClient};
pub use error::ApiError;
pub use types::{
    AllocateRequest, BootConfig, BootConfigRequest, ConfigId, Disk, DiskId, DiskRequest, Instance,
    InstanceId, InstanceSpecs, Job, JobAction, JobId, JobStatus,
};

/// Future returned by API operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Remote calls against the Linode instance API.
pub trait LinodeApi: Send + Sync {
    /// Allocates a bare instance.
    fn create_instance<'a>(&'a self, request: &'a AllocateRequest) -> ApiFuture<'a, Instance>;

    /// Fetches an instance.
    fn get_instance(&self, id: InstanceId) -> ApiFuture<'_, Instance>;

    /// Changes an instance's label.
    fn rename_instance<'a>(&'a self, id: InstanceId, label: &'a str) -> ApiFuture<'a, Instance>;

    /// Deletes an instance and its disks.
    fn delete_instance(&self, id: InstanceId) -> ApiFuture<'_, ()>;

    /// Boots an instance, optionally with a specific configuration profile.
    fn boot_instance(&self, id: InstanceId, config: Option<ConfigId>) -> ApiFuture<'_, ()>;

    /// Shuts an instance down.
    fn shutdown_instance(&self, id: InstanceId) -> ApiFuture<'_, ()>;

    /// Reboots an instance.
    fn reboot_instance(&self, id: InstanceId) -> ApiFuture<'_, ()>;

    /// Creates a disk on an instance.
    fn create_disk<'a>(&'a self, id: InstanceId, request: &'a DiskRequest) -> ApiFuture<'a, Disk>;

    /// Creates a boot configuration profile on an instance.
    fn create_boot_config<'a>(
        &'a self,
        id: InstanceId,
        request: &'a BootConfigRequest,
    ) -> ApiFuture<'a, BootConfig>;

    /// Returns the most recent job for `action` on an instance, if any.
    fn latest_job(&self, id: InstanceId, action: JobAction) -> ApiFuture<'_, Option<JobId>>;

    /// Fetches a job; `None` when the provider no longer knows it.
    fn get_job(&self, id: JobId) -> ApiFuture<'_, Option<Job>>;
}

/// Builds API clients from a credential.
pub trait ClientFactory: Send + Sync {
    /// Client type produced by this factory.
    type Client: LinodeApi + Clone;

    /// Builds a client authenticated with `token`.
    fn connect(&self, token: &str) -> Self::Client;
}
