//! Create-time flags exposed to the provisioning host.
//!
//! The host enumerates [`create_flags`], resolves each flag from its command
//! line, environment variable, or default, and hands the result back to the
//! driver as a [`DriverOptions`] source.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::{
    DEFAULT_DOCKER_PORT, DEFAULT_IMAGE, DEFAULT_INSTANCE_TYPE, DEFAULT_KERNEL,
    DEFAULT_PAYMENT_TERM, DEFAULT_REGION, DEFAULT_SSH_PORT, DEFAULT_SWAP_SIZE_MB,
};

/// API token flag.
pub const TOKEN_FLAG: &str = "linode-token";
/// Root password flag.
pub const ROOT_PASS_FLAG: &str = "linode-root-pass";
/// Instance label flag.
pub const LABEL_FLAG: &str = "linode-label";
/// Region flag.
pub const REGION_FLAG: &str = "linode-region";
/// Instance type flag.
pub const TYPE_FLAG: &str = "linode-type";
/// SSH port flag.
pub const SSH_PORT_FLAG: &str = "linode-ssh-port";
/// Distribution image flag.
pub const IMAGE_FLAG: &str = "linode-image";
/// Kernel flag.
pub const KERNEL_FLAG: &str = "linode-kernel";
/// Docker daemon port flag.
pub const DOCKER_PORT_FLAG: &str = "linode-docker-port";
/// Swap size flag.
pub const SWAP_SIZE_FLAG: &str = "linode-swap-size";
/// Payment term flag.
pub const PAYMENT_TERM_FLAG: &str = "linode-payment-term";

/// Value carried by a flag, typed the way the host declares it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FlagValue {
    /// Free-form string value.
    String(String),
    /// Integer value.
    Int(i64),
}

impl FlagValue {
    fn as_string(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::Int(value) => value.to_string(),
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::String(value) => value.trim().parse().ok(),
            Self::Int(value) => Some(*value),
        }
    }

    /// Parses `raw` into the same variant as `self`.
    fn parse_like(&self, raw: &str) -> Option<Self> {
        match self {
            Self::String(_) => Some(Self::String(raw.to_owned())),
            Self::Int(_) => raw.trim().parse().ok().map(Self::Int),
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.pad(value),
            Self::Int(value) => value.fmt(f),
        }
    }
}

/// Declaration of a single create flag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct McnFlag {
    /// Flag name without leading dashes.
    pub name: &'static str,
    /// Environment variable consulted when the flag is absent.
    pub env_var: &'static str,
    /// One-line help text.
    pub usage: &'static str,
    /// Default value; its variant fixes the flag's type.
    pub default: FlagValue,
}

impl McnFlag {
    const fn new(
        name: &'static str,
        env_var: &'static str,
        usage: &'static str,
        default: FlagValue,
    ) -> Self {
        Self {
            name,
            env_var,
            usage,
            default,
        }
    }
}

/// Returns the flags the Linode driver accepts at create time.
#[must_use]
pub fn create_flags() -> Vec<McnFlag> {
    vec![
        McnFlag::new(
            TOKEN_FLAG,
            "LINODE_TOKEN",
            "Linode API Token",
            FlagValue::String(String::new()),
        ),
        McnFlag::new(
            ROOT_PASS_FLAG,
            "LINODE_ROOT_PASSWORD",
            "Root Password",
            FlagValue::String(String::new()),
        ),
        McnFlag::new(
            LABEL_FLAG,
            "LINODE_LABEL",
            "Linode Instance Label",
            FlagValue::String(String::new()),
        ),
        McnFlag::new(
            REGION_FLAG,
            "LINODE_REGION",
            "Linode Region",
            FlagValue::String(DEFAULT_REGION.to_owned()),
        ),
        McnFlag::new(
            TYPE_FLAG,
            "LINODE_INSTANCE_TYPE",
            "Linode Instance Type",
            FlagValue::String(DEFAULT_INSTANCE_TYPE.to_owned()),
        ),
        McnFlag::new(
            SSH_PORT_FLAG,
            "LINODE_SSH_PORT",
            "Linode Instance SSH Port",
            FlagValue::Int(i64::from(DEFAULT_SSH_PORT)),
        ),
        McnFlag::new(
            IMAGE_FLAG,
            "LINODE_IMAGE",
            "Linode Instance Image",
            FlagValue::String(DEFAULT_IMAGE.to_owned()),
        ),
        McnFlag::new(
            KERNEL_FLAG,
            "LINODE_KERNEL",
            "Linode Instance Kernel",
            FlagValue::String(DEFAULT_KERNEL.to_owned()),
        ),
        McnFlag::new(
            DOCKER_PORT_FLAG,
            "LINODE_DOCKER_PORT",
            "Docker Port",
            FlagValue::Int(i64::from(DEFAULT_DOCKER_PORT)),
        ),
        McnFlag::new(
            SWAP_SIZE_FLAG,
            "LINODE_SWAP_SIZE",
            "Linode Instance Swap Size (MB)",
            FlagValue::Int(i64::from(DEFAULT_SWAP_SIZE_MB)),
        ),
        McnFlag::new(
            PAYMENT_TERM_FLAG,
            "LINODE_PAYMENT_TERM",
            "Linode Payment Term (months, legacy accounts only)",
            FlagValue::Int(i64::from(DEFAULT_PAYMENT_TERM)),
        ),
    ]
}

/// Source of resolved flag values handed to the driver by the host.
///
/// Missing keys read as the type's zero value, matching the host's RPC flag
/// store.
pub trait DriverOptions {
    /// Returns the string value for `key`, or an empty string.
    fn string(&self, key: &str) -> String;
    /// Returns the integer value for `key`, or zero.
    fn int(&self, key: &str) -> i64;
}

/// Map-backed [`DriverOptions`] resolved from defaults, environment, and
/// explicit values in increasing precedence.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlagValues {
    values: BTreeMap<String, FlagValue>,
}

impl FlagValues {
    /// Creates an empty set of values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds every flag with its declared default.
    #[must_use]
    pub fn with_defaults(flags: &[McnFlag]) -> Self {
        let values = flags
            .iter()
            .map(|flag| (flag.name.to_owned(), flag.default.clone()))
            .collect();
        Self { values }
    }

    /// Overrides defaults with environment values found through `lookup`.
    ///
    /// Values that do not parse as the flag's type are ignored, leaving the
    /// default in place.
    #[must_use]
    pub fn with_env(mut self, flags: &[McnFlag], lookup: impl Fn(&str) -> Option<String>) -> Self {
        for flag in flags {
            let Some(raw) = lookup(flag.env_var) else {
                continue;
            };
            if let Some(value) = flag.default.parse_like(&raw) {
                self.values.insert(flag.name.to_owned(), value);
            }
        }
        self
    }

    /// Sets an explicit value for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: FlagValue) {
        self.values.insert(key.into(), value);
    }

    /// Builder-style variant of [`FlagValues::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: FlagValue) -> Self {
        self.set(key, value);
        self
    }
}

impl DriverOptions for FlagValues {
    fn string(&self, key: &str) -> String {
        self.values
            .get(key)
            .map(FlagValue::as_string)
            .unwrap_or_default()
    }

    fn int(&self, key: &str) -> i64 {
        self.values
            .get(key)
            .and_then(FlagValue::as_int)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_owned())
        }
    }

    #[test]
    fn create_flags_have_unique_names_and_env_vars() {
        let flags = create_flags();
        let mut names: Vec<_> = flags.iter().map(|flag| flag.name).collect();
        let mut envs: Vec<_> = flags.iter().map(|flag| flag.env_var).collect();
        names.sort_unstable();
        names.dedup();
        envs.sort_unstable();
        envs.dedup();
        assert_eq!(names.len(), flags.len());
        assert_eq!(envs.len(), flags.len());
    }

    #[test]
    fn defaults_seed_every_flag() {
        let flags = create_flags();
        let values = FlagValues::with_defaults(&flags);
        assert_eq!(values.string(REGION_FLAG), "us-east");
        assert_eq!(values.string(TYPE_FLAG), "g6-standard-4");
        assert_eq!(values.string(IMAGE_FLAG), "linode/debian8");
        assert_eq!(values.string(KERNEL_FLAG), "linode/grub2");
        assert_eq!(values.int(SSH_PORT_FLAG), 22);
        assert_eq!(values.int(DOCKER_PORT_FLAG), 2376);
        assert_eq!(values.int(SWAP_SIZE_FLAG), 512);
        assert_eq!(values.string(TOKEN_FLAG), "");
    }

    #[test]
    fn environment_overrides_defaults_and_explicit_overrides_environment() {
        let flags = create_flags();
        let values = FlagValues::with_defaults(&flags)
            .with_env(
                &flags,
                env_from(&[("LINODE_REGION", "eu-central"), ("LINODE_SWAP_SIZE", "1024")]),
            )
            .with(REGION_FLAG, FlagValue::String(String::from("ap-south")));

        assert_eq!(values.string(REGION_FLAG), "ap-south");
        assert_eq!(values.int(SWAP_SIZE_FLAG), 1024);
    }

    #[test]
    fn unparsable_environment_integer_keeps_default() {
        let flags = create_flags();
        let values = FlagValues::with_defaults(&flags)
            .with_env(&flags, env_from(&[("LINODE_SSH_PORT", "twenty-two")]));
        assert_eq!(values.int(SSH_PORT_FLAG), 22);
    }

    #[test]
    fn missing_keys_read_as_zero_values() {
        let values = FlagValues::new();
        assert_eq!(values.string("unknown"), "");
        assert_eq!(values.int("unknown"), 0);
    }
}
