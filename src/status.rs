//! Provider instance statuses and their mapping onto host machine states.
//!
//! Linode reports statuses as strings (`"running"`, `"shutting_down"`, ...);
//! the legacy API reported small integers. Both decode into
//! [`InstanceStatus`], which maps onto exactly one [`MachineState`].

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// Lifecycle state reported to the host.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum MachineState {
    /// State is unknown or transitional without a better classification.
    #[default]
    None,
    /// The instance is running.
    Running,
    /// The instance is booting or being created.
    Starting,
    /// The instance is shutting down or being deleted.
    Stopping,
    /// The instance is powered off.
    Stopped,
    /// The instance failed to boot.
    Error,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "None",
            Self::Running => "Running",
            Self::Starting => "Starting",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Status reported by the provider for an instance.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum InstanceStatus {
    /// `running`, legacy `1`.
    Running,
    /// `offline`, legacy `2` (powered off).
    Offline,
    /// `booting`.
    Booting,
    /// `rebooting`.
    Rebooting,
    /// `shutting_down`, legacy `3`.
    ShuttingDown,
    /// `provisioning`.
    Provisioning,
    /// `deleting`.
    Deleting,
    /// `migrating`.
    Migrating,
    /// `rebuilding`.
    Rebuilding,
    /// `cloning`.
    Cloning,
    /// `restoring`.
    Restoring,
    /// `resizing`.
    Resizing,
    /// Legacy `-2`.
    BootFailed,
    /// Legacy `-1`.
    BeingCreated,
    /// Legacy `0`: created but never booted.
    BrandNew,
    /// Legacy `4`.
    SavedToDisk,
    /// Any value the provider may add later.
    Unrecognized(String),
}

impl InstanceStatus {
    /// Decodes a named status string.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "running" => Self::Running,
            "offline" => Self::Offline,
            "booting" => Self::Booting,
            "rebooting" => Self::Rebooting,
            "shutting_down" => Self::ShuttingDown,
            "provisioning" => Self::Provisioning,
            "deleting" => Self::Deleting,
            "migrating" => Self::Migrating,
            "rebuilding" => Self::Rebuilding,
            "cloning" => Self::Cloning,
            "restoring" => Self::Restoring,
            "resizing" => Self::Resizing,
            other => Self::Unrecognized(other.to_owned()),
        }
    }

    /// Decodes a legacy numeric status code.
    #[must_use]
    pub fn from_legacy_code(code: i64) -> Self {
        match code {
            -2 => Self::BootFailed,
            -1 => Self::BeingCreated,
            0 => Self::BrandNew,
            1 => Self::Running,
            2 => Self::Offline,
            3 => Self::ShuttingDown,
            4 => Self::SavedToDisk,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Maps the provider status onto the host vocabulary.
    #[must_use]
    pub const fn machine_state(&self) -> MachineState {
        match self {
            Self::Running => MachineState::Running,
            Self::Booting | Self::Rebooting | Self::Provisioning | Self::BeingCreated => {
                MachineState::Starting
            }
            Self::ShuttingDown | Self::Deleting => MachineState::Stopping,
            Self::Offline | Self::Rebuilding | Self::BrandNew => MachineState::Stopped,
            Self::BootFailed => MachineState::Error,
            Self::Migrating
            | Self::Cloning
            | Self::Restoring
            | Self::Resizing
            | Self::SavedToDisk
            | Self::Unrecognized(_) => MachineState::None,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Offline => "offline",
            Self::Booting => "booting",
            Self::Rebooting => "rebooting",
            Self::ShuttingDown => "shutting_down",
            Self::Provisioning => "provisioning",
            Self::Deleting => "deleting",
            Self::Migrating => "migrating",
            Self::Rebuilding => "rebuilding",
            Self::Cloning => "cloning",
            Self::Restoring => "restoring",
            Self::Resizing => "resizing",
            Self::BootFailed => "boot_failed",
            Self::BeingCreated => "being_created",
            Self::BrandNew => "brand_new",
            Self::SavedToDisk => "saved_to_disk",
            Self::Unrecognized(other) => other.as_str(),
        };
        f.write_str(name)
    }
}

struct StatusVisitor;

impl Visitor<'_> for StatusVisitor {
    type Value = InstanceStatus;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a status name or legacy status code")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(InstanceStatus::from_name(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(InstanceStatus::from_legacy_code(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(i64::try_from(value).map_or_else(
            |_| InstanceStatus::Unrecognized(value.to_string()),
            InstanceStatus::from_legacy_code,
        ))
    }
}

impl<'de> Deserialize<'de> for InstanceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StatusVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("running", MachineState::Running)]
    #[case("booting", MachineState::Starting)]
    #[case("rebooting", MachineState::Starting)]
    #[case("provisioning", MachineState::Starting)]
    #[case("shutting_down", MachineState::Stopping)]
    #[case("deleting", MachineState::Stopping)]
    #[case("offline", MachineState::Stopped)]
    #[case("rebuilding", MachineState::Stopped)]
    #[case("migrating", MachineState::None)]
    #[case("cloning", MachineState::None)]
    #[case("restoring", MachineState::None)]
    #[case("resizing", MachineState::None)]
    #[case("hibernating", MachineState::None)]
    #[case("", MachineState::None)]
    fn named_status_maps_to_machine_state(#[case] name: &str, #[case] expected: MachineState) {
        assert_eq!(InstanceStatus::from_name(name).machine_state(), expected);
    }

    #[rstest]
    #[case(-2, MachineState::Error)]
    #[case(-1, MachineState::Starting)]
    #[case(0, MachineState::Stopped)]
    #[case(1, MachineState::Running)]
    #[case(2, MachineState::Stopped)]
    #[case(3, MachineState::Stopping)]
    #[case(4, MachineState::None)]
    #[case(5, MachineState::None)]
    #[case(-3, MachineState::None)]
    fn legacy_code_maps_to_machine_state(#[case] code: i64, #[case] expected: MachineState) {
        assert_eq!(InstanceStatus::from_legacy_code(code).machine_state(), expected);
    }

    #[test]
    fn mapping_is_deterministic_across_calls() {
        for code in -5..10 {
            let first = InstanceStatus::from_legacy_code(code).machine_state();
            let second = InstanceStatus::from_legacy_code(code).machine_state();
            assert_eq!(first, second, "code {code} mapped inconsistently");
        }
    }

    #[rstest]
    #[case("\"shutting_down\"", InstanceStatus::ShuttingDown)]
    #[case("1", InstanceStatus::Running)]
    #[case("-2", InstanceStatus::BootFailed)]
    #[case("\"warp_drive\"", InstanceStatus::Unrecognized(String::from("warp_drive")))]
    fn status_decodes_from_json(#[case] json: &str, #[case] expected: InstanceStatus) {
        let decoded: InstanceStatus =
            serde_json::from_str(json).unwrap_or_else(|err| panic!("decode {json}: {err}"));
        assert_eq!(decoded, expected);
    }

    #[test]
    fn unrecognized_status_displays_raw_value() {
        assert_eq!(
            InstanceStatus::Unrecognized(String::from("warp_drive")).to_string(),
            "warp_drive"
        );
    }
}
