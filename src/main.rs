//! Binary entry point for the `linode-machine` CLI.
//!
//! The binary plays the provisioning host: it resolves create flags, keeps
//! each machine's record in the storage directory between invocations, and
//! maps every subcommand onto one driver verb.

mod cli;

use std::env;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use linode_machine::flags::{
    DOCKER_PORT_FLAG, IMAGE_FLAG, KERNEL_FLAG, LABEL_FLAG, PAYMENT_TERM_FLAG, REGION_FLAG,
    ROOT_PASS_FLAG, SSH_PORT_FLAG, SWAP_SIZE_FLAG, TOKEN_FLAG, TYPE_FLAG,
};
use linode_machine::{
    ConfigError, Driver, FlagValue, FlagValues, HttpClientFactory, LinodeDriver,
    LinodeDriverError, MachineStore, MachineStoreError, SshKeygen, ToolConfig, create_flags,
};

use cli::{Cli, CreateCommand, MachineArgs, RemoveCommand};

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] MachineStoreError),
    #[error(transparent)]
    Driver(#[from] LinodeDriverError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let settings = ToolConfig::load_without_cli_args()?;
    let store = MachineStore::new(Utf8PathBuf::from(settings.resolved_storage_path()));
    let factory = HttpClientFactory::new(settings.api_url.as_str());
    let mut out = io::stdout();

    match cli {
        Cli::Flags => write_flags(&mut out)?,
        Cli::Create(command) => {
            let url = create(&store, factory, command).await?;
            writeln!(out, "{url}")?;
        }
        Cli::Ip(MachineArgs { name }) => {
            writeln!(out, "{}", open(&store, factory, &name)?.get_ip()?)?;
        }
        Cli::Url(MachineArgs { name }) => {
            writeln!(out, "{}", open(&store, factory, &name)?.get_url()?)?;
        }
        Cli::State(MachineArgs { name }) => {
            let state = open(&store, factory, &name)?.get_state().await?;
            writeln!(out, "{state}")?;
        }
        Cli::Start(MachineArgs { name }) => open(&store, factory, &name)?.start().await?,
        Cli::Stop(MachineArgs { name }) => open(&store, factory, &name)?.stop().await?,
        Cli::Restart(MachineArgs { name }) => open(&store, factory, &name)?.restart().await?,
        Cli::Kill(MachineArgs { name }) => open(&store, factory, &name)?.kill().await?,
        Cli::Remove(command) => remove(&store, factory, command).await?,
        Cli::SshHostname(MachineArgs { name }) => {
            writeln!(out, "{}", open(&store, factory, &name)?.get_ssh_hostname()?)?;
        }
        Cli::SshUsername(MachineArgs { name }) => {
            writeln!(out, "{}", open(&store, factory, &name)?.get_ssh_username())?;
        }
    }
    Ok(())
}

fn write_flags(mut target: impl Write) -> io::Result<()> {
    for flag in create_flags() {
        writeln!(
            target,
            "--{:<22} {:<22} {:<16} {}",
            flag.name, flag.env_var, flag.default, flag.usage
        )?;
    }
    Ok(())
}

fn open(
    store: &MachineStore,
    factory: HttpClientFactory,
    name: &str,
) -> Result<LinodeDriver, CliError> {
    let record = store.load(name)?;
    Ok(LinodeDriver::from_record(
        record,
        factory,
        SshKeygen::with_process_runner(),
    ))
}

async fn create(
    store: &MachineStore,
    factory: HttpClientFactory,
    command: CreateCommand,
) -> Result<String, CliError> {
    if store.exists(&command.name)? {
        return Err(MachineStoreError::AlreadyExists { name: command.name }.into());
    }

    let progress_store = store.clone();
    let mut driver = LinodeDriver::new(
        command.name.as_str(),
        store.root(),
        factory,
        SshKeygen::with_process_runner(),
    )
    .with_stage_observer(move |record| {
        if let Err(err) = progress_store.save(record) {
            warn!(machine = %record.machine_name, error = %err, "failed to persist create progress");
        }
    });
    let flags = driver.get_create_flags();
    let mut options =
        FlagValues::with_defaults(&flags).with_env(&flags, |key| env::var(key).ok());
    for (key, value) in explicit_flags(command) {
        options.set(key, value);
    }

    driver.set_config_from_flags(&options)?;
    driver.pre_create_check()?;

    // The key generator writes into the machine directory, so it must exist.
    store.save(driver.record())?;
    let outcome = driver.create().await;
    let saved = store.save(driver.record());
    settle_create(outcome, saved)?;

    Ok(driver.get_url()?)
}

/// Surfaces the create error ahead of a failure to save the final record.
fn settle_create(
    outcome: Result<(), LinodeDriverError>,
    saved: Result<Utf8PathBuf, MachineStoreError>,
) -> Result<(), CliError> {
    match (outcome, saved) {
        (Err(err), Err(save_err)) => {
            warn!(error = %save_err, "failed to save record after create failure");
            Err(err.into())
        }
        (Err(err), Ok(_)) => Err(err.into()),
        (Ok(()), saved) => saved.map(drop).map_err(CliError::from),
    }
}

async fn remove(
    store: &MachineStore,
    factory: HttpClientFactory,
    command: RemoveCommand,
) -> Result<(), CliError> {
    let driver = open(store, factory, &command.name)?;
    let has_instance = driver.record().instance_id.is_some();
    if has_instance && let Err(err) = driver.remove().await {
        if !command.force {
            return Err(err.into());
        }
        warn!(machine = %command.name, error = %err, "instance delete failed; removing record");
    }
    store.remove(&command.name)?;
    Ok(())
}

fn explicit_flags(command: CreateCommand) -> Vec<(&'static str, FlagValue)> {
    let strings = [
        (TOKEN_FLAG, command.token),
        (ROOT_PASS_FLAG, command.root_pass),
        (LABEL_FLAG, command.label),
        (REGION_FLAG, command.region),
        (TYPE_FLAG, command.instance_type),
        (IMAGE_FLAG, command.image),
        (KERNEL_FLAG, command.kernel),
    ];
    let ints = [
        (SSH_PORT_FLAG, command.ssh_port),
        (DOCKER_PORT_FLAG, command.docker_port),
        (SWAP_SIZE_FLAG, command.swap_size),
        (PAYMENT_TERM_FLAG, command.payment_term),
    ];

    strings
        .into_iter()
        .filter_map(|(key, value)| value.map(|text| (key, FlagValue::String(text))))
        .chain(
            ints.into_iter()
                .filter_map(|(key, value)| value.map(|number| (key, FlagValue::Int(number)))),
        )
        .collect()
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_command(name: &str) -> CreateCommand {
        CreateCommand {
            name: name.to_owned(),
            token: None,
            root_pass: None,
            label: None,
            region: None,
            instance_type: None,
            ssh_port: None,
            image: None,
            kernel: None,
            docker_port: None,
            swap_size: None,
            payment_term: None,
        }
    }

    #[test]
    fn explicit_flags_only_include_supplied_options() {
        let mut command = create_command("dev");
        command.token = Some(String::from("secret"));
        command.swap_size = Some(1024);

        let flags = explicit_flags(command);

        assert_eq!(
            flags,
            vec![
                (TOKEN_FLAG, FlagValue::String(String::from("secret"))),
                (SWAP_SIZE_FLAG, FlagValue::Int(1024)),
            ]
        );
    }

    #[test]
    fn write_flags_lists_every_create_flag() {
        let mut buf = Vec::new();
        write_flags(&mut buf).unwrap_or_else(|err| panic!("write flags: {err}"));
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));

        assert_eq!(rendered.lines().count(), create_flags().len());
        assert!(rendered.contains("--linode-token"), "rendered: {rendered}");
        assert!(rendered.contains("LINODE_ROOT_PASSWORD"), "rendered: {rendered}");
    }

    #[test]
    fn create_error_wins_over_save_error() {
        let outcome = Err(LinodeDriverError::NotCreated {
            machine_name: String::from("dev"),
        });
        let saved = Err(MachineStoreError::Io {
            path: Utf8PathBuf::from("/store/machines/dev/config.json"),
            message: String::from("read-only file system"),
        });

        let err = settle_create(outcome, saved).expect_err("create failed");

        assert!(
            matches!(err, CliError::Driver(LinodeDriverError::NotCreated { .. })),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn save_error_reported_after_successful_create() {
        let saved = Err(MachineStoreError::Io {
            path: Utf8PathBuf::from("/store/machines/dev/config.json"),
            message: String::from("disk full"),
        });

        let err = settle_create(Ok(()), saved).expect_err("save failed");

        assert!(matches!(err, CliError::Store(MachineStoreError::Io { .. })), "unexpected error: {err}");
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Store(MachineStoreError::NotFound {
            name: String::from("dev"),
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(rendered, "machine dev does not exist\n");
    }
}
