//! Request and response shapes for the Linode API.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::status::InstanceStatus;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a Linode instance.
    InstanceId
);
numeric_id!(
    /// Identifier of a disk attached to an instance.
    DiskId
);
numeric_id!(
    /// Identifier of a boot configuration profile.
    ConfigId
);
numeric_id!(
    /// Identifier of an asynchronous job (an account event).
    JobId
);

/// Hardware allotment of a plan.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct InstanceSpecs {
    /// Total disk in megabytes.
    #[serde(default)]
    pub disk: u32,
    /// Memory in megabytes.
    #[serde(default)]
    pub memory: u32,
    /// Virtual CPU count.
    #[serde(default)]
    pub vcpus: u32,
}

/// Instance as reported by the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Instance {
    /// Provider identifier.
    pub id: InstanceId,
    /// Current label.
    #[serde(default)]
    pub label: String,
    /// Current status.
    pub status: InstanceStatus,
    /// Region slug.
    #[serde(default)]
    pub region: String,
    /// Plan slug.
    #[serde(rename = "type", default)]
    pub instance_type: String,
    /// IPv4 addresses in provider order, public and private mixed.
    #[serde(default)]
    pub ipv4: Vec<Ipv4Addr>,
    /// Plan allotment.
    #[serde(default)]
    pub specs: InstanceSpecs,
}

/// Request allocating a bare instance with no disks.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AllocateRequest {
    /// Region slug.
    pub region: String,
    /// Plan slug.
    #[serde(rename = "type")]
    pub instance_type: String,
    /// Billing term in months. Not part of the v4 request body.
    #[serde(skip)]
    pub payment_term: u32,
}

/// Request creating a disk on an instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DiskRequest {
    /// Disk label.
    pub label: String,
    /// Size in megabytes.
    pub size: u32,
    /// Image deployed onto the disk, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Root password for image deployments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_pass: Option<String>,
    /// Public keys installed for root.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorized_keys: Vec<String>,
    /// Filesystem for blank disks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<String>,
}

impl DiskRequest {
    /// Builds a request deploying `image` onto a new disk.
    #[must_use]
    pub fn from_image(
        label: impl Into<String>,
        size: u32,
        image: impl Into<String>,
        root_pass: impl Into<String>,
        authorized_keys: Vec<String>,
    ) -> Self {
        Self {
            label: label.into(),
            size,
            image: Some(image.into()),
            root_pass: Some(root_pass.into()),
            authorized_keys,
            filesystem: None,
        }
    }

    /// Builds a request for a swap disk of `size` megabytes.
    #[must_use]
    pub fn swap(size: u32) -> Self {
        Self {
            label: String::from("swap"),
            size,
            image: None,
            root_pass: None,
            authorized_keys: Vec::new(),
            filesystem: Some(String::from("swap")),
        }
    }
}

/// Disk as reported by the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Disk {
    /// Provider identifier.
    pub id: DiskId,
    /// Disk label.
    #[serde(default)]
    pub label: String,
    /// Provisioning status (`ready`, `not ready`, `deleting`).
    #[serde(default)]
    pub status: String,
    /// Size in megabytes.
    #[serde(default)]
    pub size: u32,
}

/// Boot configuration profile to create.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootConfigRequest {
    /// Profile label.
    pub label: String,
    /// Kernel slug.
    pub kernel: String,
    /// Disks in device order; the first becomes `/dev/sda`.
    pub disks: Vec<DiskId>,
    /// One-based index into `disks` of the root device.
    pub root_device_index: u8,
    /// Whether the root device is mounted read-only during early boot. The v4
    /// adapter has no field for this and relies on the distro helper instead.
    pub root_device_read_only: bool,
    /// Whether the distribution helper applies distro-specific fixups.
    pub helper_distro: bool,
}

/// Boot configuration profile as reported by the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct BootConfig {
    /// Provider identifier.
    pub id: ConfigId,
    /// Profile label.
    #[serde(default)]
    pub label: String,
    /// Kernel slug.
    #[serde(default)]
    pub kernel: String,
}

/// Remote operations tracked as jobs.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobAction {
    /// Disk creation, including image deployment.
    DiskCreate,
    /// Instance boot.
    LinodeBoot,
}

impl JobAction {
    /// Provider action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DiskCreate => "disk_create",
            Self::LinodeBoot => "linode_boot",
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// Queued but not started.
    Scheduled,
    /// In progress.
    Started,
    /// Completed successfully.
    Finished,
    /// Completed unsuccessfully.
    Failed,
    /// Informational event that never progresses.
    Notification,
    /// Any value the provider may add later.
    Unrecognized(String),
}

impl JobStatus {
    /// Decodes a provider status string.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "scheduled" => Self::Scheduled,
            "started" => Self::Started,
            "finished" => Self::Finished,
            "failed" => Self::Failed,
            "notification" => Self::Notification,
            other => Self::Unrecognized(other.to_owned()),
        }
    }

    /// Returns `true` when the job completed successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Finished | Self::Notification)
    }
}

/// Asynchronous job tracked by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Instance the job operates on.
    pub entity_id: InstanceId,
    /// Secondary entity, such as the disk a `disk_create` job deploys.
    pub secondary_entity_id: Option<u64>,
    /// Provider action name.
    pub action: String,
    /// Current progress.
    pub status: JobStatus,
}
