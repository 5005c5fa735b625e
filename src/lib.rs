//! Core library for the Linode machine driver.
//!
//! The crate exposes the host lifecycle contract ([`Driver`]) and a Linode
//! implementation ([`LinodeDriver`]) that provisions one instance through the
//! Linode API: allocate, label, deploy disks, boot, and wait for `running`.

pub mod api;
pub mod command;
pub mod config;
pub mod driver;
pub mod flags;
pub mod linode;
pub mod machine_store;
pub mod ssh_key;
pub mod status;
pub mod test_support;

pub use api::{ApiError, ClientFactory, HttpClientFactory, HttpLinodeClient, LinodeApi};
pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, LinodeConfig, ToolConfig};
pub use driver::{Driver, DriverFuture};
pub use flags::{DriverOptions, FlagValue, FlagValues, McnFlag, create_flags};
pub use linode::{
    CreateStage, JobTarget, LinodeDriver, LinodeDriverError, MachineRecord, PollPolicy,
    PollSettings, StageObserver,
};
pub use machine_store::{MachineStore, MachineStoreError};
pub use ssh_key::{KeyGenerator, SshKeyError, SshKeygen};
pub use status::{InstanceStatus, MachineState};
