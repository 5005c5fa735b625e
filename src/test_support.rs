//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::api::{
    AllocateRequest, ApiError, ApiFuture, BootConfig, BootConfigRequest, ClientFactory, ConfigId,
    Disk, DiskId, DiskRequest, Instance, InstanceId, InstanceSpecs, Job, JobAction, JobId,
    JobStatus, LinodeApi,
};
use crate::command::{CommandOutput, CommandRunner, SpawnError};
use crate::ssh_key::{KeyGenerator, SshKeyError};
use crate::status::InstanceStatus;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        locked(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        locked(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
        locked(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        locked(&self.responses)
            .pop_front()
            .ok_or_else(|| SpawnError {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Remote call recorded by [`ScriptedLinodeApi`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApiCall {
    /// `create_instance`.
    CreateInstance(AllocateRequest),
    /// `get_instance`.
    GetInstance(InstanceId),
    /// `rename_instance`.
    RenameInstance(InstanceId, String),
    /// `delete_instance`.
    DeleteInstance(InstanceId),
    /// `boot_instance`.
    BootInstance(InstanceId, Option<ConfigId>),
    /// `shutdown_instance`.
    ShutdownInstance(InstanceId),
    /// `reboot_instance`.
    RebootInstance(InstanceId),
    /// `create_disk`.
    CreateDisk(InstanceId, DiskRequest),
    /// `create_boot_config`.
    CreateBootConfig(InstanceId, BootConfigRequest),
    /// `latest_job`.
    LatestJob(InstanceId, JobAction),
    /// `get_job`.
    GetJob(JobId),
}

impl ApiCall {
    /// Short method name, used to target failure injection.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::CreateInstance(_) => "create_instance",
            Self::GetInstance(_) => "get_instance",
            Self::RenameInstance(..) => "rename_instance",
            Self::DeleteInstance(_) => "delete_instance",
            Self::BootInstance(..) => "boot_instance",
            Self::ShutdownInstance(_) => "shutdown_instance",
            Self::RebootInstance(_) => "reboot_instance",
            Self::CreateDisk(..) => "create_disk",
            Self::CreateBootConfig(..) => "create_boot_config",
            Self::LatestJob(..) => "latest_job",
            Self::GetJob(_) => "get_job",
        }
    }
}

#[derive(Debug)]
struct ApiScript {
    instance: Instance,
    statuses: VecDeque<InstanceStatus>,
    job_statuses: VecDeque<JobStatus>,
    job_entity: Option<InstanceId>,
    latest_job_missing: bool,
    latest_job_stale: bool,
    job_missing: bool,
    failures: Vec<(&'static str, ApiError)>,
    next_disk: u64,
    last_disk: Option<DiskId>,
    next_job: u64,
    jobs: BTreeMap<JobId, (JobAction, Option<DiskId>)>,
    calls: Vec<ApiCall>,
}

/// In-memory [`LinodeApi`] that replays scripted responses and records every
/// call.
///
/// Unless scripted otherwise, jobs finish on the first poll and the instance
/// reports `running`. Each job handed out by `latest_job` remembers its action
/// and, for disk jobs, the most recently created disk.
#[derive(Clone, Debug)]
pub struct ScriptedLinodeApi {
    script: Arc<Mutex<ApiScript>>,
}

impl Default for ScriptedLinodeApi {
    fn default() -> Self {
        Self::new(Self::instance(
            7001,
            &[Ipv4Addr::new(192, 168, 140, 3), Ipv4Addr::new(45, 33, 2, 10)],
        ))
    }
}

impl ScriptedLinodeApi {
    /// Creates an API whose `create_instance` returns `instance`.
    #[must_use]
    pub fn new(instance: Instance) -> Self {
        Self {
            script: Arc::new(Mutex::new(ApiScript {
                instance,
                statuses: VecDeque::new(),
                job_statuses: VecDeque::new(),
                job_entity: None,
                latest_job_missing: false,
                latest_job_stale: false,
                job_missing: false,
                failures: Vec::new(),
                next_disk: 100,
                last_disk: None,
                next_job: 500,
                jobs: BTreeMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// Builds an instance snapshot with a 81920 MB plan disk.
    #[must_use]
    pub fn instance(id: u64, ipv4: &[Ipv4Addr]) -> Instance {
        Instance {
            id: InstanceId(id),
            label: format!("linode{id}"),
            status: InstanceStatus::Provisioning,
            region: String::from("us-east"),
            instance_type: String::from("g6-standard-4"),
            ipv4: ipv4.to_vec(),
            specs: InstanceSpecs {
                disk: 81_920,
                memory: 8_192,
                vcpus: 4,
            },
        }
    }

    /// Queues statuses returned by successive `get_instance` calls. The last
    /// one repeats once the queue drains.
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = InstanceStatus>) {
        locked(&self.script).statuses.extend(statuses);
    }

    /// Queues statuses returned by successive `get_job` calls. The last one
    /// repeats once the queue drains; an empty queue reports `finished`.
    pub fn push_job_statuses(&self, statuses: impl IntoIterator<Item = JobStatus>) {
        locked(&self.script).job_statuses.extend(statuses);
    }

    /// Makes `get_job` report jobs against `instance`.
    pub fn report_jobs_for(&self, instance: InstanceId) {
        locked(&self.script).job_entity = Some(instance);
    }

    /// Makes `latest_job` find nothing.
    pub fn hide_latest_job(&self) {
        locked(&self.script).latest_job_missing = true;
    }

    /// Makes `latest_job` keep returning the first job it handed out, as the
    /// events feed does before a newer event is listed.
    pub fn repeat_first_job(&self) {
        locked(&self.script).latest_job_stale = true;
    }

    /// Makes `get_job` return `None`.
    pub fn forget_jobs(&self) {
        locked(&self.script).job_missing = true;
    }

    /// Makes every call to `method` fail with `error`.
    pub fn fail_on(&self, method: &'static str, error: ApiError) {
        locked(&self.script).failures.push((method, error));
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        locked(&self.script).calls.clone()
    }

    /// Returns the method names of every call made so far.
    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        locked(&self.script).calls.iter().map(ApiCall::method).collect()
    }

    fn record(&self, call: ApiCall) -> Result<(), ApiError> {
        let mut script = locked(&self.script);
        let method = call.method();
        script.calls.push(call);
        script
            .failures
            .iter()
            .find(|(name, _)| *name == method)
            .map_or(Ok(()), |(_, error)| Err(error.clone()))
    }

    fn next_status(&self) -> InstanceStatus {
        let mut script = locked(&self.script);
        if script.statuses.len() > 1 {
            script.statuses.pop_front().unwrap_or(InstanceStatus::Running)
        } else {
            script
                .statuses
                .front()
                .cloned()
                .unwrap_or(InstanceStatus::Running)
        }
    }

    fn next_job_status(&self) -> JobStatus {
        let mut script = locked(&self.script);
        if script.job_statuses.len() > 1 {
            script.job_statuses.pop_front().unwrap_or(JobStatus::Finished)
        } else {
            script
                .job_statuses
                .front()
                .cloned()
                .unwrap_or(JobStatus::Finished)
        }
    }
}

impl LinodeApi for ScriptedLinodeApi {
    fn create_instance<'a>(&'a self, request: &'a AllocateRequest) -> ApiFuture<'a, Instance> {
        Box::pin(async move {
            self.record(ApiCall::CreateInstance(request.clone()))?;
            Ok(locked(&self.script).instance.clone())
        })
    }

    fn get_instance(&self, id: InstanceId) -> ApiFuture<'_, Instance> {
        Box::pin(async move {
            self.record(ApiCall::GetInstance(id))?;
            let status = self.next_status();
            let mut instance = locked(&self.script).instance.clone();
            instance.status = status;
            Ok(instance)
        })
    }

    fn rename_instance<'a>(&'a self, id: InstanceId, label: &'a str) -> ApiFuture<'a, Instance> {
        Box::pin(async move {
            self.record(ApiCall::RenameInstance(id, label.to_owned()))?;
            let mut script = locked(&self.script);
            label.clone_into(&mut script.instance.label);
            Ok(script.instance.clone())
        })
    }

    fn delete_instance(&self, id: InstanceId) -> ApiFuture<'_, ()> {
        Box::pin(async move { self.record(ApiCall::DeleteInstance(id)) })
    }

    fn boot_instance(&self, id: InstanceId, config: Option<ConfigId>) -> ApiFuture<'_, ()> {
        Box::pin(async move { self.record(ApiCall::BootInstance(id, config)) })
    }

    fn shutdown_instance(&self, id: InstanceId) -> ApiFuture<'_, ()> {
        Box::pin(async move { self.record(ApiCall::ShutdownInstance(id)) })
    }

    fn reboot_instance(&self, id: InstanceId) -> ApiFuture<'_, ()> {
        Box::pin(async move { self.record(ApiCall::RebootInstance(id)) })
    }

    fn create_disk<'a>(&'a self, id: InstanceId, request: &'a DiskRequest) -> ApiFuture<'a, Disk> {
        Box::pin(async move {
            self.record(ApiCall::CreateDisk(id, request.clone()))?;
            let mut script = locked(&self.script);
            let disk_id = DiskId(script.next_disk);
            script.next_disk += 1;
            script.last_disk = Some(disk_id);
            Ok(Disk {
                id: disk_id,
                label: request.label.clone(),
                status: String::from("not ready"),
                size: request.size,
            })
        })
    }

    fn create_boot_config<'a>(
        &'a self,
        id: InstanceId,
        request: &'a BootConfigRequest,
    ) -> ApiFuture<'a, BootConfig> {
        Box::pin(async move {
            self.record(ApiCall::CreateBootConfig(id, request.clone()))?;
            Ok(BootConfig {
                id: ConfigId(900),
                label: request.label.clone(),
                kernel: request.kernel.clone(),
            })
        })
    }

    fn latest_job(&self, id: InstanceId, action: JobAction) -> ApiFuture<'_, Option<JobId>> {
        Box::pin(async move {
            self.record(ApiCall::LatestJob(id, action))?;
            let mut script = locked(&self.script);
            if script.latest_job_missing {
                return Ok(None);
            }
            if script.latest_job_stale
                && let Some(first) = script.jobs.keys().next()
            {
                return Ok(Some(*first));
            }
            let job = JobId(script.next_job);
            script.next_job += 1;
            let disk = match action {
                JobAction::DiskCreate => script.last_disk,
                JobAction::LinodeBoot => None,
            };
            script.jobs.insert(job, (action, disk));
            Ok(Some(job))
        })
    }

    fn get_job(&self, id: JobId) -> ApiFuture<'_, Option<Job>> {
        Box::pin(async move {
            self.record(ApiCall::GetJob(id))?;
            let status = self.next_job_status();
            let script = locked(&self.script);
            if script.job_missing {
                return Ok(None);
            }
            let (action, disk) = script
                .jobs
                .get(&id)
                .copied()
                .unwrap_or((JobAction::DiskCreate, None));
            Ok(Some(Job {
                id,
                entity_id: script.job_entity.unwrap_or(script.instance.id),
                secondary_entity_id: disk.map(DiskId::get),
                action: action.as_str().to_owned(),
                status,
            }))
        })
    }
}

/// [`ClientFactory`] handing out clones of one [`ScriptedLinodeApi`] and
/// counting how often a client is built.
#[derive(Clone, Debug, Default)]
pub struct ScriptedClientFactory {
    api: ScriptedLinodeApi,
    tokens: Arc<Mutex<Vec<String>>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedClientFactory {
    /// Creates a factory serving `api`.
    #[must_use]
    pub fn new(api: ScriptedLinodeApi) -> Self {
        Self {
            api,
            tokens: Arc::default(),
            connects: Arc::default(),
        }
    }

    /// Number of clients built so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Tokens passed to [`ClientFactory::connect`].
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        locked(&self.tokens).clone()
    }
}

impl ClientFactory for ScriptedClientFactory {
    type Client = ScriptedLinodeApi;

    fn connect(&self, token: &str) -> Self::Client {
        self.connects.fetch_add(1, Ordering::SeqCst);
        locked(&self.tokens).push(token.to_owned());
        self.api.clone()
    }
}

/// [`KeyGenerator`] returning a fixed public key without touching disk.
#[derive(Clone, Debug)]
pub struct StaticKeyGenerator {
    public_key: String,
    fail: bool,
    paths: Arc<Mutex<Vec<Utf8PathBuf>>>,
}

impl Default for StaticKeyGenerator {
    fn default() -> Self {
        Self::new("ssh-rsa AAAAB3NzaC1yc2E test@linode-machine")
    }
}

impl StaticKeyGenerator {
    /// Creates a generator returning `public_key`.
    #[must_use]
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            fail: false,
            paths: Arc::default(),
        }
    }

    /// Creates a generator that always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Private key paths requested so far.
    #[must_use]
    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        locked(&self.paths).clone()
    }
}

impl KeyGenerator for StaticKeyGenerator {
    fn generate(&self, private_key: &Utf8Path) -> Result<String, SshKeyError> {
        locked(&self.paths).push(private_key.to_path_buf());
        if self.fail {
            return Err(SshKeyError::GeneratorFailed {
                program: String::from("ssh-keygen"),
                status_text: String::from("1"),
                stderr: String::from("simulated failure"),
            });
        }
        Ok(self.public_key.clone())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
