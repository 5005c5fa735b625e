//! Driver configuration binding and CLI tool settings.
//!
//! [`LinodeConfig`] is the flat record the driver provisions from. It is bound
//! from host-supplied [`DriverOptions`] and persisted with the machine record.
//! [`ToolConfig`] holds settings for the `linode-machine` binary itself and is
//! loaded through `ortho-config`.

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flags::{
    DOCKER_PORT_FLAG, DriverOptions, IMAGE_FLAG, KERNEL_FLAG, LABEL_FLAG, PAYMENT_TERM_FLAG,
    REGION_FLAG, ROOT_PASS_FLAG, SSH_PORT_FLAG, SWAP_SIZE_FLAG, TOKEN_FLAG, TYPE_FLAG,
};

/// Default region.
pub const DEFAULT_REGION: &str = "us-east";
/// Default instance type.
pub const DEFAULT_INSTANCE_TYPE: &str = "g6-standard-4";
/// Default distribution image.
pub const DEFAULT_IMAGE: &str = "linode/debian8";
/// Default kernel.
pub const DEFAULT_KERNEL: &str = "linode/grub2";
/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Default Docker daemon port.
pub const DEFAULT_DOCKER_PORT: u16 = 2376;
/// Default swap disk size in megabytes.
pub const DEFAULT_SWAP_SIZE_MB: u32 = 512;
/// Default payment term in months.
pub const DEFAULT_PAYMENT_TERM: u32 = 1;
/// Default Linode API base URL.
pub const DEFAULT_API_URL: &str = "https://api.linode.com/v4";
/// Default machine storage directory.
pub const DEFAULT_STORAGE_PATH: &str = "~/.linode-machine";

/// Provisioning parameters for a single Linode.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LinodeConfig {
    /// Personal access token for the Linode API. Required.
    pub token: String,
    /// Root password injected into the primary disk. Required.
    pub root_password: String,
    /// Label applied after allocation; `None` leaves the provider's label.
    pub label: Option<String>,
    /// Region (datacenter) slug, for example `us-east`.
    pub region: String,
    /// Plan slug, for example `g6-standard-4`.
    pub instance_type: String,
    /// Distribution image used for the primary disk.
    pub image: String,
    /// Kernel referenced by the boot configuration.
    pub kernel: String,
    /// SSH port the host connects to.
    pub ssh_port: u16,
    /// Docker daemon port published in the machine URL.
    pub docker_port: u16,
    /// Swap disk size in megabytes.
    pub swap_size_mb: u32,
    /// Billing term in months. Only legacy accounts honour it.
    pub payment_term: u32,
}

impl Default for LinodeConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            root_password: String::new(),
            label: None,
            region: DEFAULT_REGION.to_owned(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_owned(),
            image: DEFAULT_IMAGE.to_owned(),
            kernel: DEFAULT_KERNEL.to_owned(),
            ssh_port: DEFAULT_SSH_PORT,
            docker_port: DEFAULT_DOCKER_PORT,
            swap_size_mb: DEFAULT_SWAP_SIZE_MB,
            payment_term: DEFAULT_PAYMENT_TERM,
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    flag: &'static str,
    env_var: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, flag: &'static str, env_var: &'static str) -> Self {
        Self {
            description,
            flag,
            env_var,
        }
    }
}

impl LinodeConfig {
    /// Binds configuration from host-resolved options and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the token or root password
    /// is empty, or [`ConfigError::Invalid`] when an integer is out of range.
    pub fn from_options(options: &dyn DriverOptions) -> Result<Self, ConfigError> {
        let label = options.string(LABEL_FLAG);
        let config = Self {
            token: options.string(TOKEN_FLAG).trim().to_owned(),
            root_password: options.string(ROOT_PASS_FLAG),
            label: (!label.trim().is_empty()).then(|| label.trim().to_owned()),
            region: options.string(REGION_FLAG).trim().to_owned(),
            instance_type: options.string(TYPE_FLAG).trim().to_owned(),
            image: options.string(IMAGE_FLAG).trim().to_owned(),
            kernel: options.string(KERNEL_FLAG).trim().to_owned(),
            ssh_port: convert(options.int(SSH_PORT_FLAG), SSH_PORT_FLAG)?,
            docker_port: convert(options.int(DOCKER_PORT_FLAG), DOCKER_PORT_FLAG)?,
            swap_size_mb: convert(options.int(SWAP_SIZE_FLAG), SWAP_SIZE_FLAG)?,
            payment_term: convert(options.int(PAYMENT_TERM_FLAG), PAYMENT_TERM_FLAG)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "linode driver requires the --{} option (or {}) for the {}",
                metadata.flag, metadata.env_var, metadata.description
            )));
        }
        Ok(())
    }

    /// Checks that the credential and root password are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the flag and environment
    /// variable to set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.token,
            &FieldMetadata::new("Linode API token", TOKEN_FLAG, "LINODE_TOKEN"),
        )?;
        Self::require_field(
            &self.root_password,
            &FieldMetadata::new("root password", ROOT_PASS_FLAG, "LINODE_ROOT_PASSWORD"),
        )?;
        Ok(())
    }

    /// Performs the stricter checks run before create: required fields plus
    /// non-empty placement values and non-zero sizes and ports.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first offending field.
    pub fn validate_for_create(&self) -> Result<(), ConfigError> {
        self.validate()?;
        Self::require_field(
            &self.region,
            &FieldMetadata::new("region", REGION_FLAG, "LINODE_REGION"),
        )?;
        Self::require_field(
            &self.instance_type,
            &FieldMetadata::new("instance type", TYPE_FLAG, "LINODE_INSTANCE_TYPE"),
        )?;
        Self::require_field(
            &self.image,
            &FieldMetadata::new("image", IMAGE_FLAG, "LINODE_IMAGE"),
        )?;
        Self::require_field(
            &self.kernel,
            &FieldMetadata::new("kernel", KERNEL_FLAG, "LINODE_KERNEL"),
        )?;
        for (flag, value) in [
            (SSH_PORT_FLAG, u32::from(self.ssh_port)),
            (DOCKER_PORT_FLAG, u32::from(self.docker_port)),
            (SWAP_SIZE_FLAG, self.swap_size_mb),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: flag.to_owned(),
                    message: String::from("must be greater than zero"),
                });
            }
        }
        Ok(())
    }
}

fn convert<T: TryFrom<i64>>(value: i64, flag: &str) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::Invalid {
        field: flag.to_owned(),
        message: format!("{value} is out of range"),
    })
}

/// Settings for the `linode-machine` binary loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "LINODE_MACHINE",
    discovery(
        app_name = "linode-machine",
        env_var = "LINODE_MACHINE_CONFIG_PATH",
        config_file_name = "linode-machine.toml",
        dotfile_name = ".linode-machine.toml",
        project_file_name = "linode-machine.toml"
    )
)]
pub struct ToolConfig {
    /// Directory holding machine records and SSH keys. A leading `~/` expands
    /// to `$HOME`.
    #[ortho_config(default = DEFAULT_STORAGE_PATH.to_owned())]
    pub storage_path: String,
    /// Base URL of the Linode API.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub api_url: String,
}

impl ToolConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("linode-machine")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the storage path with a leading `~/` expanded.
    #[must_use]
    pub fn resolved_storage_path(&self) -> String {
        expand_tilde(&self.storage_path)
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If `HOME` is not set the input is returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Errors raised during configuration binding and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid value for {field}: {message}")]
    Invalid {
        /// Flag name of the offending field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
