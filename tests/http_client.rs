//! Wire-level tests for the HTTP Linode client against a canned local server.

use std::sync::{Arc, Mutex, PoisonError};

use linode_machine::api::{
    AllocateRequest, ApiError, BootConfigRequest, ClientFactory, ConfigId, DiskId, DiskRequest,
    HttpClientFactory, InstanceId, JobAction, JobId, JobStatus, LinodeApi,
};
use linode_machine::status::InstanceStatus;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TOKEN: &str = "token-123";

struct CannedServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|err| panic!("bind: {err}"));
        let address = listener
            .local_addr()
            .unwrap_or_else(|err| panic!("local addr: {err}"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut stream).await;
                recorded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(request);
                let response = format!(
                    "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.ok();
                stream.shutdown().await.ok();
            }
        });

        Self {
            base_url: format!("http://{address}/v4"),
            requests,
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn only_request(&self) -> String {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "requests: {requests:?}");
        requests.into_iter().next().unwrap_or_default()
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let read = stream.read(&mut chunk).await.unwrap_or(0);
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(chunk.get(..read).unwrap_or_default());
        let text = String::from_utf8_lossy(&buffer).into_owned();
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let content_length = text
            .get(..header_end)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buffer.len() >= header_end + 4 + content_length {
            break;
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn body_of(request: &str) -> serde_json::Value {
    let body = request
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or_default();
    serde_json::from_str(body).unwrap_or_else(|err| panic!("request body json: {err}: {body}"))
}

#[tokio::test]
async fn create_instance_posts_placement_and_decodes_instance() {
    let server = CannedServer::start(vec![(
        200,
        r#"{"id":123,"label":"linode123","status":"provisioning","region":"us-east","type":"g6-standard-4","ipv4":["45.33.2.10","192.168.1.4"],"specs":{"disk":81920,"memory":8192,"vcpus":4}}"#,
    )])
    .await;
    let client = HttpClientFactory::new(server.base_url.as_str()).connect(TOKEN);

    let instance = client
        .create_instance(&AllocateRequest {
            region: String::from("us-east"),
            instance_type: String::from("g6-standard-4"),
            payment_term: 1,
        })
        .await
        .unwrap_or_else(|err| panic!("create instance: {err}"));

    assert_eq!(instance.id, InstanceId(123));
    assert_eq!(instance.status, InstanceStatus::Provisioning);
    assert_eq!(instance.specs.disk, 81_920);
    assert_eq!(instance.ipv4.len(), 2);

    let request = server.only_request();
    assert!(request.starts_with("POST /v4/linode/instances "), "request: {request}");
    assert!(
        request
            .to_ascii_lowercase()
            .contains("authorization: bearer token-123"),
        "request: {request}"
    );
    assert_eq!(
        body_of(&request),
        serde_json::json!({ "region": "us-east", "type": "g6-standard-4" })
    );
}

#[tokio::test]
async fn error_responses_carry_provider_reasons() {
    let server = CannedServer::start(vec![(
        400,
        r#"{"errors":[{"field":"region","reason":"region is not valid"}]}"#,
    )])
    .await;
    let client = HttpClientFactory::new(server.base_url.as_str()).connect(TOKEN);

    let err = client
        .get_instance(InstanceId(5))
        .await
        .expect_err("remote error expected");

    assert_eq!(
        err,
        ApiError::Remote {
            status: 400,
            reasons: String::from("region: region is not valid"),
        }
    );
}

#[tokio::test]
async fn unknown_job_reads_as_none() {
    let server =
        CannedServer::start(vec![(404, r#"{"errors":[{"reason":"Not found"}]}"#)]).await;
    let client = HttpClientFactory::new(server.base_url.as_str()).connect(TOKEN);

    let job = client
        .get_job(JobId(77))
        .await
        .unwrap_or_else(|err| panic!("get job: {err}"));

    assert_eq!(job, None);
    assert!(
        server.only_request().starts_with("GET /v4/account/events/77 "),
        "unexpected request path"
    );
}

#[tokio::test]
async fn job_lookup_filters_events_and_decodes_status() {
    let server = CannedServer::start(vec![
        (
            200,
            r#"{"data":[{"id":901,"action":"disk_create","status":"started","entity":{"id":123,"type":"linode"}}],"page":1,"pages":1,"results":1}"#,
        ),
        (
            200,
            r#"{"id":901,"action":"disk_create","status":"finished","entity":{"id":123,"type":"linode"},"secondary_entity":{"id":10,"type":"disk"}}"#,
        ),
    ])
    .await;
    let client = HttpClientFactory::new(server.base_url.as_str()).connect(TOKEN);

    let latest = client
        .latest_job(InstanceId(123), JobAction::DiskCreate)
        .await
        .unwrap_or_else(|err| panic!("latest job: {err}"));
    let job = client
        .get_job(JobId(901))
        .await
        .unwrap_or_else(|err| panic!("get job: {err}"))
        .unwrap_or_else(|| panic!("job should exist"));

    assert_eq!(latest, Some(JobId(901)));
    assert_eq!(job.entity_id, InstanceId(123));
    assert_eq!(job.secondary_entity_id, Some(10));
    assert_eq!(job.action, "disk_create");
    assert_eq!(job.status, JobStatus::Finished);

    let lookup = server
        .requests()
        .first()
        .map(|request| request.to_ascii_lowercase())
        .unwrap_or_default();
    assert!(lookup.starts_with("get /v4/account/events?page_size=25 "), "request: {lookup}");
    assert!(lookup.contains("x-filter: "), "request: {lookup}");
    assert!(lookup.contains(r#""action":"disk_create""#), "request: {lookup}");
    assert!(lookup.contains(r#""entity.id":123"#), "request: {lookup}");
}

#[tokio::test]
async fn boot_config_request_uses_device_map() {
    let server = CannedServer::start(vec![(
        200,
        r#"{"id":55,"label":"linode-machine","kernel":"linode/grub2"}"#,
    )])
    .await;
    let client = HttpClientFactory::new(server.base_url.as_str()).connect(TOKEN);

    let config = client
        .create_boot_config(
            InstanceId(123),
            &BootConfigRequest {
                label: String::from("linode-machine"),
                kernel: String::from("linode/grub2"),
                disks: vec![DiskId(10), DiskId(11)],
                root_device_index: 1,
                root_device_read_only: true,
                helper_distro: true,
            },
        )
        .await
        .unwrap_or_else(|err| panic!("create config: {err}"));

    assert_eq!(config.kernel, "linode/grub2");
    let request = server.only_request();
    assert!(
        request.starts_with("POST /v4/linode/instances/123/configs "),
        "request: {request}"
    );
    let body = body_of(&request);
    assert_eq!(body.pointer("/devices/sda/disk_id"), Some(&serde_json::json!(10)));
    assert_eq!(body.pointer("/devices/sdb/disk_id"), Some(&serde_json::json!(11)));
    assert_eq!(body.pointer("/root_device"), Some(&serde_json::json!("/dev/sda")));
}

#[tokio::test]
async fn disk_requests_send_only_relevant_fields() {
    let server = CannedServer::start(vec![
        (200, r#"{"id":10,"label":"root","status":"not ready","size":81408}"#),
        (200, r#"{"id":11,"label":"swap","status":"not ready","size":512}"#),
    ])
    .await;
    let client = HttpClientFactory::new(server.base_url.as_str()).connect(TOKEN);

    let root = client
        .create_disk(
            InstanceId(123),
            &DiskRequest::from_image(
                "root",
                81_408,
                "linode/debian8",
                "hunter2",
                vec![String::from("ssh-rsa AAAA test@host")],
            ),
        )
        .await
        .unwrap_or_else(|err| panic!("create root disk: {err}"));
    let swap = client
        .create_disk(InstanceId(123), &DiskRequest::swap(512))
        .await
        .unwrap_or_else(|err| panic!("create swap disk: {err}"));

    assert_eq!(root.id, DiskId(10));
    assert_eq!(swap.id, DiskId(11));
    let requests = server.requests();
    assert_eq!(requests.len(), 2, "requests: {requests:?}");
    for request in &requests {
        assert!(
            request.starts_with("POST /v4/linode/instances/123/disks "),
            "request: {request}"
        );
    }
    let bodies: Vec<_> = requests.iter().map(|request| body_of(request)).collect();
    assert_eq!(
        bodies,
        vec![
            serde_json::json!({
                "label": "root",
                "size": 81_408,
                "image": "linode/debian8",
                "root_pass": "hunter2",
                "authorized_keys": ["ssh-rsa AAAA test@host"],
            }),
            serde_json::json!({
                "label": "swap",
                "size": 512,
                "filesystem": "swap",
            }),
        ]
    );
}

#[tokio::test]
async fn boot_sends_config_id_only_when_given() {
    let server = CannedServer::start(vec![(200, "{}"), (200, "{}")]).await;
    let client = HttpClientFactory::new(server.base_url.as_str()).connect(TOKEN);

    client
        .boot_instance(InstanceId(123), Some(ConfigId(55)))
        .await
        .unwrap_or_else(|err| panic!("boot with config: {err}"));
    client
        .boot_instance(InstanceId(123), None)
        .await
        .unwrap_or_else(|err| panic!("boot: {err}"));

    let requests = server.requests();
    assert_eq!(requests.len(), 2, "requests: {requests:?}");
    for request in &requests {
        assert!(
            request.starts_with("POST /v4/linode/instances/123/boot "),
            "request: {request}"
        );
    }
    let bodies: Vec<_> = requests.iter().map(|request| body_of(request)).collect();
    assert_eq!(
        bodies,
        vec![serde_json::json!({ "config_id": 55 }), serde_json::json!({})]
    );
}
