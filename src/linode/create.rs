//! The create workflow.
//!
//! Creating a machine is a non-atomic sequence of remote calls. Each stage
//! must succeed before the next one starts, and the furthest stage reached is
//! recorded in [`CreateProgress`] so the caller can persist it whether the
//! workflow finished or not. Nothing is rolled back on failure; the recorded
//! instance identifier lets `remove` clean up.

use std::fmt;
use std::net::Ipv4Addr;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{
    AllocateRequest, BootConfigRequest, DiskRequest, InstanceId, JobAction, LinodeApi,
};
use crate::config::LinodeConfig;
use crate::ssh_key::KeyGenerator;
use crate::status::MachineState;

use super::address::select_public_address;
use super::wait::{JobTarget, wait_for_job, wait_for_status};
use super::{LinodeDriverError, MachineRecord, PollSettings};

const ROOT_DISK_LABEL: &str = "root";
const BOOT_CONFIG_LABEL: &str = "linode-machine";
const ROOT_DEVICE_INDEX: u8 = 1;

/// Furthest point the create workflow has reached.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CreateStage {
    /// Nothing has happened yet.
    #[default]
    Unprovisioned,
    /// The local SSH keypair exists.
    KeyGenerated,
    /// The provider assigned an instance identifier.
    InstanceAllocated,
    /// The label was applied, or none was configured.
    Labeled,
    /// The primary disk finished deploying.
    DiskCreated,
    /// The swap disk exists.
    SwapCreated,
    /// The boot configuration exists.
    ConfigCreated,
    /// The boot job finished.
    Booting,
    /// The instance reported `running`.
    Running,
}

impl CreateStage {
    /// Snake-case name used in logs and the persisted record.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unprovisioned => "unprovisioned",
            Self::KeyGenerated => "key_generated",
            Self::InstanceAllocated => "instance_allocated",
            Self::Labeled => "labeled",
            Self::DiskCreated => "disk_created",
            Self::SwapCreated => "swap_created",
            Self::ConfigCreated => "config_created",
            Self::Booting => "booting",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for CreateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable outcome of a create attempt, complete or not.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(super) struct CreateProgress {
    pub(super) stage: CreateStage,
    pub(super) instance_id: Option<InstanceId>,
    pub(super) ip_address: Option<Ipv4Addr>,
}

impl CreateProgress {
    /// Copies the stage and any discovered identifiers into `record`.
    pub(super) fn apply_to(&self, record: &mut MachineRecord) {
        record.create_stage = self.stage;
        if self.instance_id.is_some() {
            record.instance_id = self.instance_id;
        }
        if self.ip_address.is_some() {
            record.ip_address = self.ip_address;
        }
    }
}

/// Borrowed inputs for one create run. `on_advance` sees the progress after
/// every stage change.
pub(super) struct CreateWorkflow<'a, A: ?Sized, K: ?Sized> {
    pub(super) api: &'a A,
    pub(super) keygen: &'a K,
    pub(super) config: &'a LinodeConfig,
    pub(super) key_path: &'a Utf8Path,
    pub(super) polls: PollSettings,
    pub(super) on_advance: &'a (dyn Fn(&CreateProgress) + Sync),
}

impl<A, K> CreateWorkflow<'_, A, K>
where
    A: LinodeApi + ?Sized,
    K: KeyGenerator + Sync + ?Sized,
{
    fn advance(&self, progress: &mut CreateProgress, stage: CreateStage) {
        debug!(stage = %stage, instance_id = ?progress.instance_id, "create stage reached");
        progress.stage = stage;
        (self.on_advance)(progress);
    }

    pub(super) async fn run(&self, progress: &mut CreateProgress) -> Result<(), LinodeDriverError> {
        let public_key = self.keygen.generate(self.key_path)?;
        self.advance(progress, CreateStage::KeyGenerated);

        let instance = self
            .api
            .create_instance(&AllocateRequest {
                region: self.config.region.clone(),
                instance_type: self.config.instance_type.clone(),
                payment_term: self.config.payment_term,
            })
            .await?;
        let id = instance.id;
        progress.instance_id = Some(id);
        self.advance(progress, CreateStage::InstanceAllocated);

        if let Some(label) = self.config.label.as_deref() {
            self.api.rename_instance(id, label).await?;
        }
        self.advance(progress, CreateStage::Labeled);

        let address = select_public_address(id, &instance.ipv4)?;
        progress.ip_address = Some(address);
        debug!(instance_id = %id, ip_address = %address, "selected public address");

        let swap_size = self.config.swap_size_mb;
        let root_size = instance
            .specs
            .disk
            .checked_sub(swap_size)
            .filter(|size| *size > 0)
            .ok_or(LinodeDriverError::DiskTooSmall {
                plan_disk_mb: instance.specs.disk,
                swap_size_mb: swap_size,
            })?;

        let root_disk = self
            .api
            .create_disk(
                id,
                &DiskRequest::from_image(
                    ROOT_DISK_LABEL,
                    root_size,
                    self.config.image.as_str(),
                    self.config.root_password.as_str(),
                    vec![public_key],
                ),
            )
            .await?;
        self.await_latest_job(JobTarget::new(id, JobAction::DiskCreate).on_disk(root_disk.id))
            .await?;
        self.advance(progress, CreateStage::DiskCreated);

        let swap_disk = self.api.create_disk(id, &DiskRequest::swap(swap_size)).await?;
        self.await_latest_job(JobTarget::new(id, JobAction::DiskCreate).on_disk(swap_disk.id))
            .await?;
        self.advance(progress, CreateStage::SwapCreated);

        let boot_config = self
            .api
            .create_boot_config(
                id,
                &BootConfigRequest {
                    label: BOOT_CONFIG_LABEL.to_owned(),
                    kernel: self.config.kernel.clone(),
                    disks: vec![root_disk.id, swap_disk.id],
                    root_device_index: ROOT_DEVICE_INDEX,
                    root_device_read_only: true,
                    helper_distro: true,
                },
            )
            .await?;
        self.advance(progress, CreateStage::ConfigCreated);

        self.api.boot_instance(id, Some(boot_config.id)).await?;
        self.await_latest_job(JobTarget::new(id, JobAction::LinodeBoot)).await?;
        self.advance(progress, CreateStage::Booting);

        wait_for_status(self.api, id, MachineState::Running, self.polls.status).await?;
        self.advance(progress, CreateStage::Running);
        Ok(())
    }

    async fn await_latest_job(&self, target: JobTarget) -> Result<(), LinodeDriverError> {
        let JobTarget { instance, action, .. } = target;
        let job = self
            .api
            .latest_job(instance, action)
            .await?
            .ok_or_else(|| LinodeDriverError::JobNotFound {
                instance_id: instance,
                job: action.to_string(),
            })?;
        debug!(
            instance_id = %instance,
            job_id = %job,
            action = %action,
            disk_id = ?target.disk,
            "waiting for job"
        );
        wait_for_job(self.api, target, job, self.polls.job).await
    }
}
