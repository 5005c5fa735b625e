//! Linode implementation of the host [`Driver`] contract.
//!
//! A [`LinodeDriver`] manages exactly one instance. Its persistent state is a
//! [`MachineRecord`], which the host stores between invocations; the API
//! client is built lazily from the recorded token and reused for the lifetime
//! of the handle.

mod address;
mod create;
mod error;
pub mod wait;

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{ClientFactory, HttpClientFactory, InstanceId, LinodeApi};
use crate::config::LinodeConfig;
use crate::driver::{Driver, DriverFuture};
use crate::flags::{DriverOptions, McnFlag, create_flags};
use crate::machine_store::machine_dir;
use crate::ssh_key::{KeyGenerator, SshKeygen};
use crate::status::MachineState;

pub use address::select_public_address;
pub use create::CreateStage;
pub use error::LinodeDriverError;
pub use wait::{JobTarget, PollPolicy, wait_for_job, wait_for_status};

use create::{CreateProgress, CreateWorkflow};

/// Name the host uses to identify this driver.
pub const DRIVER_NAME: &str = "linode";
/// SSH user assumed when the record does not name one.
pub const DEFAULT_SSH_USER: &str = "root";

const SSH_KEY_FILE: &str = "id_rsa";

/// Poll policies applied during create.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// Policy for disk and boot jobs.
    pub job: PollPolicy,
    /// Policy for the post-boot status wait.
    pub status: PollPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            job: PollPolicy::JOB,
            status: PollPolicy::STATUS,
        }
    }
}

/// Persistent state of one machine.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MachineRecord {
    /// Host-assigned machine name.
    pub machine_name: String,
    /// Root of the host's storage directory.
    pub store_path: Utf8PathBuf,
    /// User for SSH sessions; empty means [`DEFAULT_SSH_USER`].
    #[serde(default)]
    pub ssh_user: String,
    /// Bound provisioning parameters.
    #[serde(default)]
    pub config: LinodeConfig,
    /// Provider identifier, set once allocation succeeds.
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    /// Public address observed during create. Never refreshed.
    #[serde(default)]
    pub ip_address: Option<Ipv4Addr>,
    /// Furthest create stage reached.
    #[serde(default)]
    pub create_stage: CreateStage,
}

impl MachineRecord {
    /// Creates an empty record for `machine_name` under `store_path`.
    #[must_use]
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            ssh_user: DEFAULT_SSH_USER.to_owned(),
            ..Self::default()
        }
    }
}

/// Callback receiving the updated record whenever create reaches a new stage.
pub type StageObserver = Box<dyn Fn(&MachineRecord) + Send + Sync>;

/// Driver for a single Linode instance.
pub struct LinodeDriver<F: ClientFactory = HttpClientFactory, K = SshKeygen> {
    record: MachineRecord,
    factory: F,
    keygen: K,
    polls: PollSettings,
    observer: Option<StageObserver>,
    client: OnceLock<F::Client>,
}

impl<F, K> LinodeDriver<F, K>
where
    F: ClientFactory,
    K: KeyGenerator + Send + Sync,
{
    /// Creates an unconfigured driver for a new machine.
    #[must_use]
    pub fn new(
        machine_name: impl Into<String>,
        store_path: impl Into<Utf8PathBuf>,
        factory: F,
        keygen: K,
    ) -> Self {
        Self::from_record(MachineRecord::new(machine_name, store_path), factory, keygen)
    }

    /// Restores a driver from a persisted record.
    #[must_use]
    pub fn from_record(record: MachineRecord, factory: F, keygen: K) -> Self {
        Self {
            record,
            factory,
            keygen,
            polls: PollSettings::default(),
            observer: None,
            client: OnceLock::new(),
        }
    }

    /// Overrides the create-time poll policies.
    #[must_use]
    pub const fn with_poll_settings(mut self, polls: PollSettings) -> Self {
        self.polls = polls;
        self
    }

    /// Reports every create stage change to `observer`, so the host can
    /// persist the instance id before create finishes.
    #[must_use]
    pub fn with_stage_observer(
        mut self,
        observer: impl Fn(&MachineRecord) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Returns the persistent record.
    #[must_use]
    pub const fn record(&self) -> &MachineRecord {
        &self.record
    }

    /// Consumes the driver, returning its record.
    #[must_use]
    pub fn into_record(self) -> MachineRecord {
        self.record
    }

    /// Path of the private SSH key for this machine.
    #[must_use]
    pub fn ssh_key_path(&self) -> Utf8PathBuf {
        machine_dir(&self.record.store_path, &self.record.machine_name).join(SSH_KEY_FILE)
    }

    /// Returns the API client, building it from the recorded token on first
    /// use.
    #[must_use]
    pub fn client(&self) -> &F::Client {
        self.client
            .get_or_init(|| self.factory.connect(&self.record.config.token))
    }

    fn instance_id(&self) -> Result<InstanceId, LinodeDriverError> {
        self.record
            .instance_id
            .ok_or_else(|| LinodeDriverError::NotCreated {
                machine_name: self.record.machine_name.clone(),
            })
    }

    fn ip_address(&self) -> Result<Ipv4Addr, LinodeDriverError> {
        self.record
            .ip_address
            .ok_or_else(|| LinodeDriverError::MissingIpAddress {
                machine_name: self.record.machine_name.clone(),
            })
    }

    async fn run_create(&mut self) -> Result<(), LinodeDriverError> {
        debug!(machine = %self.record.machine_name, "creating linode machine");
        let key_path = self.ssh_key_path();
        let api = self.client().clone();
        let observer = self.observer.as_deref();
        let snapshot = self.record.clone();
        let notify = |progress: &CreateProgress| {
            if let Some(observe) = observer {
                let mut record = snapshot.clone();
                progress.apply_to(&mut record);
                observe(&record);
            }
        };
        let workflow = CreateWorkflow {
            api: &api,
            keygen: &self.keygen,
            config: &self.record.config,
            key_path: key_path.as_path(),
            polls: self.polls,
            on_advance: &notify,
        };
        let mut progress = CreateProgress::default();
        let outcome = workflow.run(&mut progress).await;

        progress.apply_to(&mut self.record);

        match &outcome {
            Ok(()) => info!(
                machine = %self.record.machine_name,
                instance_id = ?self.record.instance_id,
                ip_address = ?self.record.ip_address,
                "linode machine created"
            ),
            Err(err) => warn!(
                machine = %self.record.machine_name,
                stage = %progress.stage,
                instance_id = ?progress.instance_id,
                error = %err,
                "create aborted"
            ),
        }
        outcome
    }

    async fn instance_action(&self, action: InstanceAction) -> Result<(), LinodeDriverError> {
        let id = self.instance_id()?;
        debug!(instance_id = %id, action = ?action, "issuing instance action");
        let api = self.client();
        match action {
            InstanceAction::Boot => api.boot_instance(id, None).await?,
            InstanceAction::Shutdown => api.shutdown_instance(id).await?,
            InstanceAction::Reboot => api.reboot_instance(id).await?,
            InstanceAction::Delete => api.delete_instance(id).await?,
        }
        Ok(())
    }
}

/// Single-call verbs; stop and kill share `Shutdown`.
#[derive(Clone, Copy, Debug)]
enum InstanceAction {
    Boot,
    Shutdown,
    Reboot,
    Delete,
}

impl<F, K> Driver for LinodeDriver<F, K>
where
    F: ClientFactory,
    K: KeyGenerator + Send + Sync,
{
    type Error = LinodeDriverError;

    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn get_create_flags(&self) -> Vec<McnFlag> {
        create_flags()
    }

    fn set_config_from_flags(&mut self, options: &dyn DriverOptions) -> Result<(), Self::Error> {
        self.record.config = LinodeConfig::from_options(options)?;
        Ok(())
    }

    fn pre_create_check(&self) -> Result<(), Self::Error> {
        self.record.config.validate_for_create()?;
        debug!(
            machine = %self.record.machine_name,
            key_path = %self.ssh_key_path(),
            "pre-create check passed"
        );
        Ok(())
    }

    fn create(&mut self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.run_create())
    }

    fn get_ip(&self) -> Result<String, Self::Error> {
        self.ip_address().map(|address| address.to_string())
    }

    fn get_url(&self) -> Result<String, Self::Error> {
        let address = self.ip_address()?;
        Ok(format!("tcp://{address}:{}", self.record.config.docker_port))
    }

    fn get_state(&self) -> DriverFuture<'_, MachineState, Self::Error> {
        Box::pin(async move {
            let id = self.instance_id()?;
            let instance = self.client().get_instance(id).await?;
            let state = instance.status.machine_state();
            debug!(instance_id = %id, status = %instance.status, state = %state, "fetched state");
            Ok(state)
        })
    }

    fn start(&self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.instance_action(InstanceAction::Boot))
    }

    fn stop(&self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.instance_action(InstanceAction::Shutdown))
    }

    fn restart(&self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.instance_action(InstanceAction::Reboot))
    }

    fn kill(&self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.instance_action(InstanceAction::Shutdown))
    }

    fn remove(&self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.instance_action(InstanceAction::Delete))
    }

    fn get_ssh_username(&self) -> String {
        if self.record.ssh_user.is_empty() {
            DEFAULT_SSH_USER.to_owned()
        } else {
            self.record.ssh_user.clone()
        }
    }

    fn get_ssh_hostname(&self) -> Result<String, Self::Error> {
        self.get_ip()
    }
}
