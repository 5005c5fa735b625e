//! HTTP implementation of [`LinodeApi`] against Linode API v4.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{
    AllocateRequest, ApiError, ApiFuture, BootConfig, BootConfigRequest, ClientFactory, ConfigId,
    Disk, DiskRequest, Instance, InstanceId, Job, JobAction, JobId, JobStatus, LinodeApi,
};
use crate::config::DEFAULT_API_URL;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const EVENTS_PAGE_SIZE: &str = "25";
const DEVICE_SLOTS: &[&str] = &["sda", "sdb", "sdc", "sdd", "sde", "sdf", "sdg", "sdh"];

/// Linode API client bound to a single token.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct HttpLinodeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Deserialize)]
struct ErrorReason {
    #[serde(default)]
    field: Option<String>,
    reason: String,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct EventBody {
    id: JobId,
    #[serde(default)]
    action: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    entity: Option<EntityBody>,
    #[serde(default)]
    secondary_entity: Option<EntityBody>,
}

#[derive(Deserialize)]
struct EntityBody {
    id: u64,
}

impl From<EventBody> for Job {
    fn from(value: EventBody) -> Self {
        Self {
            id: value.id,
            entity_id: value
                .entity
                .map_or(InstanceId(0), |entity| InstanceId(entity.id)),
            secondary_entity_id: value.secondary_entity.map(|entity| entity.id),
            status: JobStatus::from_name(&value.status),
            action: value.action,
        }
    }
}

#[derive(Serialize)]
struct DeviceBody {
    disk_id: u64,
}

#[derive(Serialize)]
struct HelpersBody {
    distro: bool,
}

// v4 has no read-only root field, so `root_device_read_only` is not sent; the
// distro helper remounts root after fsck.
#[derive(Serialize)]
struct BootConfigBody<'a> {
    label: &'a str,
    kernel: &'a str,
    devices: BTreeMap<&'static str, DeviceBody>,
    root_device: String,
    helpers: HelpersBody,
}

impl<'a> BootConfigBody<'a> {
    fn from_request(request: &'a BootConfigRequest) -> Self {
        let devices = DEVICE_SLOTS
            .iter()
            .copied()
            .zip(request.disks.iter())
            .map(|(slot, disk)| (slot, DeviceBody { disk_id: disk.get() }))
            .collect();
        let root_slot = usize::from(request.root_device_index.max(1)) - 1;
        let root_device = DEVICE_SLOTS
            .get(root_slot)
            .map_or_else(|| String::from("/dev/sda"), |slot| format!("/dev/{slot}"));
        Self {
            label: &request.label,
            kernel: &request.kernel,
            devices,
            root_device,
            helpers: HelpersBody {
                distro: request.helper_distro,
            },
        }
    }
}

impl HttpLinodeClient {
    /// Creates a client for `token` against `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Vec<u8>, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| ApiError::Transport {
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ApiError::Transport {
                message: err.to_string(),
            })?;
        debug!(status = status.as_u16(), bytes = body.len(), "linode api response");

        if status.is_success() {
            return Ok(body.to_vec());
        }

        Err(ApiError::Remote {
            status: status.as_u16(),
            reasons: Self::error_reasons(&body),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let body = self.execute(request).await?;
        serde_json::from_slice(&body).map_err(|err| ApiError::Decode {
            message: err.to_string(),
        })
    }

    fn error_reasons(body: &[u8]) -> String {
        let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) else {
            return String::from_utf8_lossy(body).into_owned();
        };
        if parsed.errors.is_empty() {
            return String::from_utf8_lossy(body).into_owned();
        }
        parsed
            .errors
            .into_iter()
            .map(|error| match error.field {
                Some(field) => format!("{field}: {}", error.reason),
                None => error.reason,
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn instance_path(id: InstanceId) -> String {
        format!("/linode/instances/{id}")
    }
}

impl LinodeApi for HttpLinodeClient {
    fn create_instance<'a>(&'a self, request: &'a AllocateRequest) -> ApiFuture<'a, Instance> {
        Box::pin(async move {
            let builder = self.http.post(self.url("/linode/instances")).json(request);
            self.send(builder).await
        })
    }

    fn get_instance(&self, id: InstanceId) -> ApiFuture<'_, Instance> {
        Box::pin(async move {
            let builder = self.http.get(self.url(&Self::instance_path(id)));
            self.send(builder).await
        })
    }

    fn rename_instance<'a>(&'a self, id: InstanceId, label: &'a str) -> ApiFuture<'a, Instance> {
        Box::pin(async move {
            let builder = self
                .http
                .put(self.url(&Self::instance_path(id)))
                .json(&json!({ "label": label }));
            self.send(builder).await
        })
    }

    fn delete_instance(&self, id: InstanceId) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let builder = self.http.delete(self.url(&Self::instance_path(id)));
            self.execute(builder).await.map(drop)
        })
    }

    fn boot_instance(&self, id: InstanceId, config: Option<ConfigId>) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let body = config.map_or_else(
                || json!({}),
                |config_id| json!({ "config_id": config_id.get() }),
            );
            let builder = self
                .http
                .post(self.url(&format!("{}/boot", Self::instance_path(id))))
                .json(&body);
            self.execute(builder).await.map(drop)
        })
    }

    fn shutdown_instance(&self, id: InstanceId) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let builder = self
                .http
                .post(self.url(&format!("{}/shutdown", Self::instance_path(id))));
            self.execute(builder).await.map(drop)
        })
    }

    fn reboot_instance(&self, id: InstanceId) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let builder = self
                .http
                .post(self.url(&format!("{}/reboot", Self::instance_path(id))));
            self.execute(builder).await.map(drop)
        })
    }

    fn create_disk<'a>(&'a self, id: InstanceId, request: &'a DiskRequest) -> ApiFuture<'a, Disk> {
        Box::pin(async move {
            let builder = self
                .http
                .post(self.url(&format!("{}/disks", Self::instance_path(id))))
                .json(request);
            self.send(builder).await
        })
    }

    fn create_boot_config<'a>(
        &'a self,
        id: InstanceId,
        request: &'a BootConfigRequest,
    ) -> ApiFuture<'a, BootConfig> {
        Box::pin(async move {
            let builder = self
                .http
                .post(self.url(&format!("{}/configs", Self::instance_path(id))))
                .json(&BootConfigBody::from_request(request));
            self.send(builder).await
        })
    }

    fn latest_job(&self, id: InstanceId, action: JobAction) -> ApiFuture<'_, Option<JobId>> {
        Box::pin(async move {
            let filter = json!({
                "entity.id": id.get(),
                "entity.type": "linode",
                "action": action.as_str(),
                "+order_by": "created",
                "+order": "desc",
            });
            let builder = self
                .http
                .get(self.url("/account/events"))
                .query(&[("page_size", EVENTS_PAGE_SIZE)])
                .header("X-Filter", filter.to_string());
            let page: Page<EventBody> = self.send(builder).await?;
            Ok(page.data.into_iter().next().map(|event| event.id))
        })
    }

    fn get_job(&self, id: JobId) -> ApiFuture<'_, Option<Job>> {
        Box::pin(async move {
            let builder = self.http.get(self.url(&format!("/account/events/{id}")));
            match self.send::<EventBody>(builder).await {
                Ok(event) => Ok(Some(Job::from(event))),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            }
        })
    }
}

/// Factory producing [`HttpLinodeClient`]s for a fixed base URL.
#[derive(Clone, Debug)]
pub struct HttpClientFactory {
    base_url: String,
}

impl HttpClientFactory {
    /// Creates a factory targeting `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl ClientFactory for HttpClientFactory {
    type Client = HttpLinodeClient;

    fn connect(&self, token: &str) -> Self::Client {
        HttpLinodeClient::new(self.base_url.as_str(), token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DiskId;

    #[test]
    fn error_reasons_join_provider_messages() {
        let body = br#"{"errors":[{"field":"region","reason":"region is not valid"},{"reason":"Unauthorized"}]}"#;
        assert_eq!(
            HttpLinodeClient::error_reasons(body),
            "region: region is not valid; Unauthorized"
        );
    }

    #[test]
    fn error_reasons_fall_back_to_raw_body() {
        assert_eq!(
            HttpLinodeClient::error_reasons(b"gateway timeout"),
            "gateway timeout"
        );
    }

    #[test]
    fn boot_config_body_maps_disks_onto_device_slots() {
        let request = BootConfigRequest {
            label: String::from("boot"),
            kernel: String::from("linode/grub2"),
            disks: vec![DiskId(11), DiskId(12)],
            root_device_index: 1,
            root_device_read_only: true,
            helper_distro: true,
        };
        let body = serde_json::to_value(BootConfigBody::from_request(&request))
            .unwrap_or_else(|err| panic!("serialise boot config: {err}"));

        assert_eq!(
            body,
            json!({
                "label": "boot",
                "kernel": "linode/grub2",
                "devices": { "sda": { "disk_id": 11 }, "sdb": { "disk_id": 12 } },
                "root_device": "/dev/sda",
                "helpers": { "distro": true },
            })
        );
    }

    #[test]
    fn read_only_root_does_not_change_boot_config_body() {
        let mut request = BootConfigRequest {
            label: String::from("boot"),
            kernel: String::from("linode/grub2"),
            disks: vec![DiskId(11)],
            root_device_index: 1,
            root_device_read_only: true,
            helper_distro: true,
        };
        let read_only = serde_json::to_value(BootConfigBody::from_request(&request))
            .unwrap_or_else(|err| panic!("serialise boot config: {err}"));
        request.root_device_read_only = false;
        let writable = serde_json::to_value(BootConfigBody::from_request(&request))
            .unwrap_or_else(|err| panic!("serialise boot config: {err}"));

        assert_eq!(read_only, writable);
    }

    #[test]
    fn event_secondary_entity_names_the_disk() {
        let event: EventBody = serde_json::from_str(
            r#"{"id":8,"action":"disk_create","status":"finished","entity":{"id":3,"type":"linode"},"secondary_entity":{"id":42,"type":"disk"}}"#,
        )
        .unwrap_or_else(|err| panic!("decode event: {err}"));
        let job = Job::from(event);
        assert_eq!(job.entity_id, InstanceId(3));
        assert_eq!(job.secondary_entity_id, Some(42));
    }

    #[test]
    fn event_without_entity_maps_to_unmatched_job() {
        let event: EventBody = serde_json::from_str(r#"{"id":7,"action":"disk_create","status":"started"}"#)
            .unwrap_or_else(|err| panic!("decode event: {err}"));
        let job = Job::from(event);
        assert_eq!(job.entity_id, InstanceId(0));
        assert_eq!(job.secondary_entity_id, None);
        assert_eq!(job.status, JobStatus::Started);
    }
}
