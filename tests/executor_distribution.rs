//! End-to-end executor distribution: the engine serves a platform build,
//! the client installs it into its tool directory and runs it as a child
//! process.
#![cfg(unix)]

#[path = "common/workspace.rs"]
mod workspace;

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use stevedore::driver::DriverDeps;
use stevedore::executor::{ExecutorTable, sha256_hex};
use stevedore::{
    Client, ClientOptions, DriverRegistry, Engine, ErrorKind, LocalTransport, Platform,
    ProcessCommandRunner, ServiceRegistry, ServiceResult, VolumeAttachments,
    config::parse_services,
};
use workspace::{SEEDED_MOUNTS, THREE_MOCKS, Workspace, read};

const FAKE_EXECUTOR: &str = r#"case "$2" in
  supported) echo 7 ;;
  instanceID) echo '{"id":"iid-000","driver":"mock"}' ;;
  localDevices) echo '{"driver":"mock","deviceMap":{"/dev/xvda":"/var/log","/dev/xvdb":"/home","/dev/xvdc":"/net/share"}}' ;;
  nextDevice) echo null ;;
  *) echo '{"message":"unsupported operation: '"$2"'","status":501}' >&2; exit 3 ;;
esac"#;

const HUNG_EXECUTOR: &str = "sleep 30";

fn client_for(ws: &Workspace, script: &str, timeout: Duration) -> Client<LocalTransport> {
    let served = ws.dir("served");
    ws.write_script(
        &format!("served/{}", Platform::Linux.executor_name()),
        script,
    );
    let configs = parse_services(THREE_MOCKS, "mock").expect("valid services");
    let deps = DriverDeps::with_runner(Arc::new(ProcessCommandRunner));
    let services =
        ServiceRegistry::build(configs, &DriverRegistry::builtin(), &deps).expect("registry");
    let executors = ExecutorTable::scan(&served).expect("scan executors");
    let engine = Engine::new(services, executors);

    let options = ClientOptions {
        tool_dir: ws.path().join("tools"),
        executor_timeout: timeout,
        platform: Some(Platform::Linux),
        executor_path: None,
    };
    Client::new(LocalTransport::new(Arc::new(engine)), options)
}

#[rstest]
#[tokio::test]
async fn installed_executor_supplies_host_facts() {
    let ws = Workspace::new();
    let client = client_for(&ws, FAKE_EXECUTOR, Duration::from_secs(10));

    let volumes = client
        .volumes(VolumeAttachments::AnyInstance)
        .await
        .expect("aggregate succeeds");

    let installed = ws
        .path()
        .join("tools")
        .join(Platform::Linux.executor_name());
    let served = ws
        .path()
        .join("served")
        .join(Platform::Linux.executor_name());
    assert_eq!(sha256_hex(&read(&installed)), sha256_hex(&read(&served)));

    let mock = volumes
        .get("mock")
        .and_then(ServiceResult::ok)
        .expect("mock answered");
    let seeded = mock.first().expect("vol-000");
    let mounts: Vec<&str> = seeded
        .attachments
        .iter()
        .map(|att| att.mount_point.as_str())
        .collect();
    assert_eq!(mounts, SEEDED_MOUNTS.to_vec());
}

#[rstest]
#[tokio::test]
async fn advertised_executors_match_served_files() {
    let ws = Workspace::new();
    let client = client_for(&ws, FAKE_EXECUTOR, Duration::from_secs(10));

    let executors = client.executors().await.expect("executor list");

    let names: Vec<&str> = executors.iter().map(|info| info.name.as_str()).collect();
    assert_eq!(names, vec![Platform::Linux.executor_name()]);
}

#[rstest]
#[tokio::test]
async fn hung_executor_is_killed_and_times_out() {
    let ws = Workspace::new();
    let client = client_for(&ws, HUNG_EXECUTOR, Duration::from_millis(300));

    let err = client.supported("mock").await.expect_err("executor hangs");

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_retryable());
}
