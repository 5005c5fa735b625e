//! Command-line interface definitions for the `linode-machine` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `linode-machine` binary.
#[derive(Debug, Parser)]
#[command(
    name = "linode-machine",
    about = "Provision and manage a Docker host on a Linode instance",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List the flags accepted by `create`.
    #[command(name = "flags", about = "List the flags accepted by create")]
    Flags,
    /// Provision a new machine.
    #[command(name = "create", about = "Provision a new machine")]
    Create(CreateCommand),
    /// Print the machine's public IP address.
    #[command(name = "ip", about = "Print the machine's public IP address")]
    Ip(MachineArgs),
    /// Print the machine's Docker URL.
    #[command(name = "url", about = "Print the machine's Docker URL")]
    Url(MachineArgs),
    /// Print the machine's current state.
    #[command(name = "state", about = "Print the machine's current state")]
    State(MachineArgs),
    /// Boot the machine.
    #[command(name = "start", about = "Boot the machine")]
    Start(MachineArgs),
    /// Shut the machine down.
    #[command(name = "stop", about = "Shut the machine down")]
    Stop(MachineArgs),
    /// Reboot the machine.
    #[command(name = "restart", about = "Reboot the machine")]
    Restart(MachineArgs),
    /// Power the machine off.
    #[command(name = "kill", about = "Power the machine off")]
    Kill(MachineArgs),
    /// Delete the instance and its local record.
    #[command(name = "remove", about = "Delete the instance and its local record")]
    Remove(RemoveCommand),
    /// Print the host to use for SSH.
    #[command(name = "ssh-hostname", about = "Print the host to use for SSH")]
    SshHostname(MachineArgs),
    /// Print the user to use for SSH.
    #[command(name = "ssh-username", about = "Print the user to use for SSH")]
    SshUsername(MachineArgs),
}

/// Machine selector shared by single-machine subcommands.
#[derive(Debug, Args)]
pub(crate) struct MachineArgs {
    /// Machine name.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}

/// Arguments for `linode-machine remove`.
#[derive(Debug, Args)]
pub(crate) struct RemoveCommand {
    /// Machine name.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
    /// Drop the local record even if deleting the instance fails.
    #[arg(long, short = 'f')]
    pub(crate) force: bool,
}

/// Arguments for `linode-machine create`.
///
/// Every option falls back to its environment variable, then to its default
/// (see `linode-machine flags`).
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Machine name.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
    /// Linode API token.
    #[arg(long = "linode-token", value_name = "TOKEN")]
    pub(crate) token: Option<String>,
    /// Root password for the instance.
    #[arg(long = "linode-root-pass", value_name = "PASSWORD")]
    pub(crate) root_pass: Option<String>,
    /// Label applied to the instance.
    #[arg(long = "linode-label", value_name = "LABEL")]
    pub(crate) label: Option<String>,
    /// Region slug.
    #[arg(long = "linode-region", value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Plan slug.
    #[arg(long = "linode-type", value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// SSH port.
    #[arg(long = "linode-ssh-port", value_name = "PORT")]
    pub(crate) ssh_port: Option<i64>,
    /// Distribution image.
    #[arg(long = "linode-image", value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Kernel slug.
    #[arg(long = "linode-kernel", value_name = "KERNEL")]
    pub(crate) kernel: Option<String>,
    /// Docker daemon port.
    #[arg(long = "linode-docker-port", value_name = "PORT")]
    pub(crate) docker_port: Option<i64>,
    /// Swap disk size in megabytes.
    #[arg(long = "linode-swap-size", value_name = "MB")]
    pub(crate) swap_size: Option<i64>,
    /// Payment term in months (legacy accounts only).
    #[arg(long = "linode-payment-term", value_name = "MONTHS")]
    pub(crate) payment_term: Option<i64>,
}
