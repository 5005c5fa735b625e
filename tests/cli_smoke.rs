//! Behavioural smoke tests for the CLI entrypoint.

use std::net::{Ipv4Addr, TcpListener};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use linode_machine::api::InstanceId;
use linode_machine::{CreateStage, MachineRecord, MachineStore};
use predicates::prelude::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn command(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("linode-machine");
        cmd.env("LINODE_MACHINE_STORAGE_PATH", self.root.as_str())
            .env_remove("LINODE_TOKEN")
            .env_remove("LINODE_ROOT_PASSWORD")
            .env_remove("RUST_LOG");
        cmd
    }
}

#[fixture]
fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-utf8 temp dir: {}", path.display()));
    Workspace { _dir: dir, root }
}

#[fixture]
fn seeded(workspace: Workspace) -> Workspace {
    let mut record = MachineRecord::new("dev", workspace.root.clone());
    record.instance_id = Some(InstanceId(7001));
    record.ip_address = Some(Ipv4Addr::new(45, 33, 2, 10));
    record.create_stage = CreateStage::Running;
    MachineStore::new(workspace.root.clone())
        .save(&record)
        .unwrap_or_else(|err| panic!("seed record: {err}"));
    workspace
}

#[rstest]
fn help_lists_subcommands(workspace: Workspace) {
    workspace
        .command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("ssh-hostname"));
}

#[rstest]
fn flags_lists_create_flags(workspace: Workspace) {
    workspace
        .command()
        .arg("flags")
        .assert()
        .success()
        .stdout(predicate::str::contains("--linode-token"))
        .stdout(predicate::str::contains("LINODE_ROOT_PASSWORD"));
}

#[rstest]
fn unknown_machine_is_reported(workspace: Workspace) {
    workspace
        .command()
        .args(["ip", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[rstest]
fn create_without_token_names_the_flag(workspace: Workspace) {
    workspace
        .command()
        .args(["create", "dev"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("linode-token"));

    assert!(!workspace.root.join("machines/dev").exists());
}

#[rstest]
#[case("ip", "45.33.2.10")]
#[case("url", "tcp://45.33.2.10:2376")]
#[case("ssh-hostname", "45.33.2.10")]
#[case("ssh-username", "root")]
fn seeded_machine_answers_local_queries(
    seeded: Workspace,
    #[case] subcommand: &str,
    #[case] expected: &str,
) {
    seeded
        .command()
        .args([subcommand, "dev"])
        .assert()
        .success()
        .stdout(format!("{expected}\n"));
}

#[rstest]
fn remove_without_instance_drops_the_record(workspace: Workspace) {
    MachineStore::new(workspace.root.clone())
        .save(&MachineRecord::new("half", workspace.root.clone()))
        .unwrap_or_else(|err| panic!("seed record: {err}"));

    workspace.command().args(["remove", "half"]).assert().success();

    assert!(!workspace.root.join("machines/half").exists());
}

fn closed_api_url() -> String {
    let listener =
        TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind listener: {err}"));
    let address = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("local addr: {err}"));
    drop(listener);
    format!("http://{address}/v4")
}

#[rstest]
fn remove_keeps_record_when_delete_fails(seeded: Workspace) {
    seeded
        .command()
        .env("LINODE_MACHINE_API_URL", closed_api_url())
        .args(["remove", "dev"])
        .assert()
        .failure();

    assert!(seeded.root.join("machines/dev/config.json").exists());
}

#[rstest]
fn forced_remove_drops_record_when_delete_fails(seeded: Workspace) {
    seeded
        .command()
        .env("LINODE_MACHINE_API_URL", closed_api_url())
        .args(["remove", "--force", "dev"])
        .assert()
        .success();

    assert!(!seeded.root.join("machines/dev").exists());
}
