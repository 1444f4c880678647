//! Client tests over an in-process engine and a scripted executor.

use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::config::parse_services;
use crate::driver::{DriverDeps, DriverRegistry};
use crate::engine::{Engine, ServiceResult};
use crate::executor::{ExecutorTable, sha256_hex};
use crate::service::ServiceRegistry;
use crate::test_support::ScriptedRunner;

const EXECUTOR_BYTES: &[u8] = b"#!/bin/sh\necho 7\n";
const MOCK_DEVICES: &str =
    r#"{"driver":"mock","deviceMap":{"/dev/xvda":"/var/log","/dev/xvdb":"/home","/dev/xvdc":"/net/share"}}"#;

struct Harness {
    _dirs: (TempDir, TempDir),
    tool_dir: Utf8PathBuf,
    runner: ScriptedRunner,
    client: Client<LocalTransport>,
}

impl Harness {
    fn executor_path(&self) -> Utf8PathBuf {
        self.tool_dir.join(Platform::Linux.executor_name())
    }

    fn executor_commands(&self, commands: &[&str]) -> Vec<String> {
        commands
            .iter()
            .map(|command| format!("{} {command}", self.executor_path()))
            .collect()
    }
}

fn utf8(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir")
}

fn harness_with(doc: &str, serve_executor: bool) -> Harness {
    let served = TempDir::new().expect("executor dir");
    let tools = TempDir::new().expect("tool dir");
    let executors = if serve_executor {
        std::fs::write(served.path().join(Platform::Linux.executor_name()), EXECUTOR_BYTES)
            .expect("write executor");
        ExecutorTable::scan(&utf8(&served)).expect("scan executors")
    } else {
        ExecutorTable::empty()
    };

    let configs = parse_services(doc, "mock").expect("valid services");
    let deps = DriverDeps::with_runner(Arc::new(ScriptedRunner::new()));
    let services =
        ServiceRegistry::build(configs, &DriverRegistry::builtin(), &deps).expect("registry builds");
    let engine = Arc::new(Engine::new(services, executors));

    let runner = ScriptedRunner::new();
    let tool_dir = utf8(&tools);
    let options = ClientOptions {
        tool_dir: tool_dir.clone(),
        executor_timeout: Duration::from_secs(5),
        platform: Some(Platform::Linux),
        executor_path: None,
    };
    let client = Client::with_runner(LocalTransport::new(engine), options, Arc::new(runner.clone()));
    Harness {
        _dirs: (served, tools),
        tool_dir,
        runner,
        client,
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with(r#"[{"name": "mock2"}, {"name": "mock3"}]"#, true)
}

fn mount_points(volume: &Volume) -> Vec<&str> {
    volume
        .attachments
        .iter()
        .map(|att| att.mount_point.as_str())
        .collect()
}

#[rstest]
#[tokio::test]
async fn volumes_carry_local_mount_points(harness: Harness) {
    harness.runner.push_stdout("7");
    harness
        .runner
        .push_stdout(r#"{"id":"iid-000","driver":"mock"}"#);
    harness.runner.push_stdout(MOCK_DEVICES);

    let map = harness
        .client
        .volumes(VolumeAttachments::AnyInstance)
        .await
        .expect("aggregate succeeds");

    assert_eq!(map.keys(), vec!["mock", "mock2", "mock3"]);
    let mock = map.get("mock").and_then(ServiceResult::ok).expect("mock answered");
    let seeded = mock.first().expect("vol-000");
    assert_eq!(mount_points(seeded), vec!["/var/log", "/home", "/net/share"]);
    assert_eq!(
        harness.runner.command_strings(),
        harness.executor_commands(&["mock supported", "mock instanceID", "mock localDevices"])
    );
}

#[rstest]
#[tokio::test]
async fn device_maps_are_read_on_every_request(harness: Harness) {
    harness.runner.push_stdout("7");
    harness
        .runner
        .push_stdout(r#"{"id":"iid-000","driver":"mock"}"#);
    harness.runner.push_stdout(MOCK_DEVICES);
    harness.runner.push_stdout(
        r#"{"driver":"mock","deviceMap":{"/dev/xvda":"/mnt/data","/dev/xvdb":"/home","/dev/xvdc":"/net/share"}}"#,
    );

    let before = harness
        .client
        .volumes_by_service("mock", VolumeAttachments::AnyInstance)
        .await
        .expect("first listing");
    let after = harness
        .client
        .volumes_by_service("mock", VolumeAttachments::AnyInstance)
        .await
        .expect("second listing");

    let first = before.first().expect("vol-000");
    assert_eq!(mount_points(first), vec!["/var/log", "/home", "/net/share"]);
    let second = after.first().expect("vol-000");
    assert_eq!(mount_points(second), vec!["/mnt/data", "/home", "/net/share"]);
    assert_eq!(
        harness.runner.command_strings(),
        harness.executor_commands(&[
            "mock supported",
            "mock instanceID",
            "mock localDevices",
            "mock localDevices",
        ])
    );
}

#[rstest]
#[tokio::test]
async fn disabled_device_headers_leave_mounts_unset(mut harness: Harness) {
    harness.client.set_local_devices_headers(false);
    harness.runner.push_stdout("7");
    harness
        .runner
        .push_stdout(r#"{"id":"iid-000","driver":"mock"}"#);

    let volumes = harness
        .client
        .volumes_by_service("mock", VolumeAttachments::AnyInstance)
        .await
        .expect("listing succeeds");

    let seeded = volumes.first().expect("vol-000");
    assert_eq!(seeded.attachments.len(), 3);
    assert_ne!(mount_points(seeded), vec!["/var/log", "/home", "/net/share"]);
    assert_eq!(harness.runner.pending(), 0);
}

#[rstest]
#[tokio::test]
async fn executor_is_fetched_verified_and_cached(harness: Harness) {
    std::fs::write(harness.executor_path(), b"stale").expect("write stale copy");

    let executor = harness.client.executor().await.expect("executor installs");
    assert_eq!(executor.program(), harness.executor_path().as_path());
    let installed = std::fs::read(harness.executor_path()).expect("read installed");
    assert_eq!(sha256_hex(&installed), sha256_hex(EXECUTOR_BYTES));

    let again = harness.client.executor().await.expect("cached executor");
    assert_eq!(again.program(), executor.program());
}

#[rstest]
#[tokio::test]
async fn facts_are_cached_per_driver(harness: Harness) {
    harness.runner.push_stdout("7");
    harness
        .runner
        .push_stdout(r#"{"id":"iid-000","driver":"mock"}"#);

    let first = harness.client.instance_id("mock").await.expect("instance id");
    let second = harness.client.instance_id("mock2").await.expect("cached id");

    assert_eq!(first, InstanceId::new("iid-000", "mock"));
    assert_eq!(second, first);
    assert_eq!(harness.runner.invocations().len(), 2);
}

#[rstest]
#[tokio::test]
async fn missing_executor_build_falls_back_to_engine() {
    let harness = harness_with("[]", false);

    let id = harness.client.instance_id("mock").await.expect("engine answers");

    assert_eq!(id, InstanceId::new("iid-000", "mock"));
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn attach_uses_the_predicted_device() {
    let harness = harness_with(
        r#"[{"name": "mock2", "nextDevice": {"ignore": false}}]"#,
        true,
    );
    harness.runner.push_stdout("7");
    harness
        .runner
        .push_stdout(r#"{"id":"iid-009","driver":"mock"}"#);
    harness.runner.push_stdout(MOCK_DEVICES);
    harness.runner.push_stdout(r#""/dev/xvdd""#);

    let (volume, token) = harness
        .client
        .volume_attach("mock2", "vol-001", &VolumeAttachRequest::default())
        .await
        .expect("attach succeeds");

    assert!(!token.as_str().is_empty());
    let attachment = volume
        .attachment_for(&InstanceId::new("iid-009", "mock"))
        .expect("caller attached");
    assert_eq!(attachment.device_name, "/dev/xvdd");
    let commands = harness.runner.command_strings();
    assert_eq!(
        commands.last().map(String::as_str),
        Some(format!(r"{} mock nextDevice false xvd \w", harness.executor_path()).as_str())
    );
}

#[rstest]
#[tokio::test]
async fn unadvertised_instance_id_defers_to_engine(harness: Harness) {
    harness.runner.push_stdout("0");

    let (volume, _token) = harness
        .client
        .volume_attach("mock2", "vol-002", &VolumeAttachRequest::default())
        .await
        .expect("attach succeeds");

    assert!(volume.attachment_for(&InstanceId::new("iid-000", "mock")).is_some());
    assert_eq!(
        harness.runner.command_strings(),
        harness.executor_commands(&["mock supported"])
    );
}

#[rstest]
#[tokio::test]
async fn executor_failure_blocks_attach(harness: Harness) {
    harness.runner.push_stdout("7");
    harness
        .runner
        .push_failure(5, r#"{"message":"timed out after 5000ms: instanceID","status":504}"#);

    let err = harness
        .client
        .volume_attach("mock", "vol-001", &VolumeAttachRequest::default())
        .await
        .expect_err("attach needs the instance");

    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[rstest]
#[tokio::test]
async fn remove_round_trips_through_the_envelope(harness: Harness) {
    let request = VolumeCreateRequest::builder()
        .name("scratch")
        .size(1)
        .build()
        .expect("valid request");
    let volume = harness
        .client
        .volume_create("mock3", &request)
        .await
        .expect("create succeeds");

    harness
        .client
        .volume_remove("mock3", &volume.id, false)
        .await
        .expect("first remove succeeds");
    let err = harness
        .client
        .volume_remove("mock3", &volume.id, false)
        .await
        .expect_err("second remove fails");
    assert_eq!(err.status(), 404);
    assert_eq!(err.to_string(), crate::error::NOT_FOUND_MESSAGE);
}

struct WrongReply;

#[async_trait]
impl Transport for WrongReply {
    async fn send(&self, _ctx: &RequestContext, _request: Request) -> Result<Response> {
        Ok(Response::Ok)
    }
}

#[rstest]
#[tokio::test]
async fn mismatched_replies_are_internal_errors() {
    let options = ClientOptions {
        tool_dir: Utf8Path::new("/nonexistent").to_path_buf(),
        executor_timeout: Duration::from_secs(1),
        platform: Some(Platform::Linux),
        executor_path: None,
    };
    let client = Client::with_runner(WrongReply, options, Arc::new(ScriptedRunner::new()));

    let err = client.services().await.expect_err("wrong variant");

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("unexpected ok response"));
}

#[rstest]
fn requests_serialise_with_an_op_tag() {
    let request = Request::VolumeRemove {
        service: String::from("mock"),
        volume_id: String::from("vol-000"),
        force: true,
    };

    let value = serde_json::to_value(&request).expect("serialise");

    assert_eq!(
        value,
        json!({"op": "volumeRemove", "service": "mock", "volumeId": "vol-000", "force": true})
    );
    assert_eq!(request.service(), Some("mock"));
    assert_eq!(Request::Snapshots.service(), None);
}
