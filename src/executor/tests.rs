//! Unit tests for the executor protocol, table and client.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::error::ErrorKind;
use crate::test_support::ScriptedRunner;
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

/// Executor advertising only `instanceID` and `nextDevice`.
struct PartialExecutor;

#[async_trait]
impl LocalExecutor for PartialExecutor {
    fn driver(&self) -> &str {
        "fake"
    }

    fn supported(&self) -> ExecutorOps {
        ExecutorOps::INSTANCE_ID | ExecutorOps::NEXT_DEVICE
    }

    async fn instance_id(&self) -> Result<InstanceId> {
        Ok(InstanceId::new("iid-123", "fake"))
    }

    async fn next_device(&self, info: &NextDeviceInfo) -> Result<Option<String>> {
        let existing = BTreeSet::from([String::from("/dev/xvda")]);
        next_device_name(info, &existing)
    }
}

async fn run(command: &str, args: &[&str]) -> (i32, String, String) {
    let owned: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run_executor(&PartialExecutor, command, &owned, &mut stdout, &mut stderr)
        .await
        .expect("buffers accept writes");
    (
        code,
        String::from_utf8(stdout).expect("utf8 stdout"),
        String::from_utf8(stderr).expect("utf8 stderr"),
    )
}

#[rstest]
#[case("supported", LsxCommand::Supported)]
#[case("instanceID", LsxCommand::InstanceId)]
#[case("nextDevice", LsxCommand::NextDevice)]
#[case("localDevices", LsxCommand::LocalDevices)]
fn command_names_parse(#[case] name: &str, #[case] expected: LsxCommand) {
    assert_eq!(name.parse::<LsxCommand>(), Ok(expected));
    assert_eq!(expected.to_string(), name);
}

#[rstest]
#[tokio::test]
async fn supported_prints_the_bitmask() {
    let (code, stdout, stderr) = run("supported", &[]).await;
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "3");
    assert!(stderr.is_empty());
}

#[rstest]
#[tokio::test]
async fn instance_id_prints_json() {
    let (code, stdout, _) = run("instanceID", &[]).await;
    assert_eq!(code, 0);
    let iid: InstanceId = serde_json::from_str(&stdout).expect("instance id JSON");
    assert_eq!(iid, InstanceId::new("iid-123", "fake"));
}

#[rstest]
#[tokio::test]
async fn unadvertised_command_is_unsupported() {
    let (code, stdout, stderr) = run("localDevices", &[]).await;
    assert_eq!(code, ErrorKind::Unsupported.exit_code());
    assert!(stdout.is_empty());
    let err: JsonError = serde_json::from_str(&stderr).expect("structured error");
    assert_eq!(err.status, 501);
}

#[rstest]
#[tokio::test]
async fn unknown_command_is_unsupported() {
    let (code, _, _) = run("mount", &[]).await;
    assert_eq!(code, ErrorKind::Unsupported.exit_code());
}

#[rstest]
#[case(&["false", "xvd", r"\w"], "\"/dev/xvdb\"")]
#[case(&["true", "xvd", r"\w"], "null")]
#[tokio::test]
async fn next_device_honours_ignore(#[case] args: &[&str], #[case] expected: &str) {
    let (code, stdout, _) = run("nextDevice", args).await;
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), expected);
}

#[rstest]
#[case(&["xvd", r"\w"])]
#[case(&["maybe", "xvd", r"\w"])]
#[tokio::test]
async fn malformed_next_device_args_fail_validation(#[case] args: &[&str]) {
    let (code, _, _) = run("nextDevice", args).await;
    assert_eq!(code, ErrorKind::Validation.exit_code());
}

#[rstest]
#[case(r"\w", &["/dev/xvda"], Some("/dev/xvdb"))]
#[case(r"\d", &["/dev/xvd0", "/dev/xvd1"], Some("/dev/xvd2"))]
#[case("[f-p]", &["/dev/xvdf"], Some("/dev/xvdg"))]
#[case("q", &[], Some("/dev/xvdq"))]
fn next_device_picks_first_free(
    #[case] pattern: &str,
    #[case] taken: &[&str],
    #[case] expected: Option<&str>,
) {
    let info = NextDeviceInfo {
        ignore: false,
        prefix: String::from("xvd"),
        pattern: pattern.to_owned(),
    };
    let existing: BTreeSet<String> = taken.iter().map(|name| (*name).to_owned()).collect();
    let found = next_device_name(&info, &existing).expect("pattern is valid");
    assert_eq!(found.as_deref(), expected);
}

#[rstest]
fn exhausted_device_names_conflict() {
    let info = NextDeviceInfo {
        ignore: false,
        prefix: String::from("sd"),
        pattern: String::from("a"),
    };
    let existing = BTreeSet::from([String::from("/dev/sda")]);
    let err = next_device_name(&info, &existing).expect_err("namespace exhausted");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[rstest]
#[case(r"\s")]
#[case("[z-a]")]
#[case("ab")]
fn unsupported_patterns_are_rejected(#[case] pattern: &str) {
    assert!(pattern.parse::<DevicePattern>().is_err());
}

#[rstest]
fn mounts_keep_devices_only() {
    let table = "\
sysfs /sys sysfs rw 0 0
/dev/rbd0 /var/lib/data ext4 rw 0 0
/dev/sda1 /boot ext4 rw 0 0
/dev/rbd1 /mnt/with\\040space xfs rw 0 0
/dev/rbd0 /var/lib/again ext4 rw 0 0
";
    let all = parse_mounts("rbd", table, None);
    assert_eq!(all.device_map.len(), 3);
    let rbd = parse_mounts("rbd", table, Some("/dev/rbd"));
    assert_eq!(rbd.mount_point("/dev/rbd0"), Some("/var/lib/data"));
    assert_eq!(rbd.mount_point("/dev/rbd1"), Some("/mnt/with space"));
    assert_eq!(rbd.mount_point("/dev/sda1"), None);
}

#[fixture]
fn executor_dir() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    std::fs::write(path.join("stevedore-lsx-linux"), b"#!/bin/sh\necho linux\n").expect("write");
    std::fs::write(path.join("stevedore-lsx-darwin"), b"#!/bin/sh\necho darwin\n").expect("write");
    (dir, path)
}

#[rstest]
fn table_lists_present_platforms(executor_dir: (TempDir, Utf8PathBuf)) {
    let (_guard, path) = executor_dir;
    let table = ExecutorTable::scan(&path).expect("scan succeeds");
    let names: Vec<_> = table.list().into_iter().map(|info| info.name).collect();
    assert_eq!(names, vec!["stevedore-lsx-linux", "stevedore-lsx-darwin"]);
    assert!(table.for_platform(Platform::Windows).is_none());

    let info = table.inspect("stevedore-lsx-linux").expect("linux executor");
    assert_eq!(info.sha256, sha256_hex(b"#!/bin/sh\necho linux\n"));
    assert_eq!(
        table.inspect("stevedore-lsx-plan9").map_err(|e| e.kind()),
        Err(ErrorKind::NotFound)
    );
}

#[rstest]
fn fetch_refuses_tampered_binaries(executor_dir: (TempDir, Utf8PathBuf)) {
    let (_guard, path) = executor_dir;
    let table = ExecutorTable::scan(&path).expect("scan succeeds");
    assert!(table.fetch("stevedore-lsx-linux").is_ok());
    std::fs::write(path.join("stevedore-lsx-linux"), b"tampered").expect("write");
    let err = table.fetch("stevedore-lsx-linux").expect_err("checksum mismatch");
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[rstest]
fn install_verifies_and_replaces(executor_dir: (TempDir, Utf8PathBuf)) {
    let (_guard, path) = executor_dir;
    let table = ExecutorTable::scan(&path).expect("scan succeeds");
    let info = table.inspect("stevedore-lsx-linux").expect("linux executor");
    let bytes = table.fetch(&info.name).expect("fetch");
    let tools = path.join("tools");

    assert_eq!(installed_checksum(&tools, &info.name), Ok(None));
    let bad = install_executor(&tools, &info, b"not the executor").expect_err("bad checksum");
    assert_eq!(bad.kind(), ErrorKind::Transport);

    let installed = install_executor(&tools, &info, &bytes).expect("install");
    assert_eq!(installed, tools.join("stevedore-lsx-linux"));
    assert_eq!(
        installed_checksum(&tools, &info.name),
        Ok(Some(info.sha256.clone()))
    );
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&installed).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}

fn scripted_client() -> (ScriptedRunner, ExecutorClient) {
    let runner = ScriptedRunner::new();
    let client = ExecutorClient::new(
        Arc::new(runner.clone()),
        "/opt/stevedore/stevedore-lsx-linux",
        Duration::from_secs(3),
    );
    (runner, client)
}

#[rstest]
#[tokio::test]
async fn client_decodes_replies_and_passes_arguments() {
    let (runner, client) = scripted_client();
    runner.push_stdout("7\n");
    runner.push_stdout("\"/dev/xvdc\"\n");

    assert_eq!(client.supported("mock").await, Ok(ExecutorOps::ALL));
    let next = client
        .next_device("mock", &NextDeviceInfo::default())
        .await
        .expect("next device");
    assert_eq!(next.as_deref(), Some("/dev/xvdc"));

    let calls = runner.invocations();
    assert_eq!(
        calls.iter().map(|call| call.command_string()).collect::<Vec<_>>(),
        vec![
            "/opt/stevedore/stevedore-lsx-linux mock supported",
            r"/opt/stevedore/stevedore-lsx-linux mock nextDevice false xvd \w",
        ]
    );
    assert!(calls.iter().all(|call| call.timeout == Duration::from_secs(3)));
}

#[rstest]
#[tokio::test]
async fn client_skips_executor_when_device_naming_is_ignored() {
    let (runner, client) = scripted_client();
    let info = NextDeviceInfo {
        ignore: true,
        ..NextDeviceInfo::default()
    };
    assert_eq!(client.next_device("mock", &info).await, Ok(None));
    assert!(runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn client_maps_structured_errors() {
    let (runner, client) = scripted_client();
    runner.push_failure(6, r#"{"message":"no route","status":500}"#);
    runner.push_failure(3, r#"{"message":"nope","status":501}"#);
    runner.push_failure(1, "segfault");
    runner.push_timeout();
    runner.push_missing_exit_code();

    let kinds = [
        client.instance_id("rbd").await.map_err(|e| e.kind()),
        client.instance_id("rbd").await.map_err(|e| e.kind()),
        client.instance_id("rbd").await.map_err(|e| e.kind()),
        client.instance_id("rbd").await.map_err(|e| e.kind()),
        client.instance_id("rbd").await.map_err(|e| e.kind()),
    ];
    assert_eq!(
        kinds,
        [
            Err(ErrorKind::Resolution),
            Err(ErrorKind::Unsupported),
            Err(ErrorKind::Transport),
            Err(ErrorKind::Timeout),
            Err(ErrorKind::Transport),
        ]
    );
}

/// Executor whose `instanceID` fails with a fixed error.
struct FailingExecutor(StorageError);

#[async_trait]
impl LocalExecutor for FailingExecutor {
    fn driver(&self) -> &str {
        "fake"
    }

    fn supported(&self) -> ExecutorOps {
        ExecutorOps::INSTANCE_ID
    }

    async fn instance_id(&self) -> Result<InstanceId> {
        Err(self.0.clone())
    }
}

#[rstest]
#[case(StorageError::not_found("instance", "iid-9"))]
#[case(StorageError::Conflict(String::from("busy")))]
#[case(StorageError::Unsupported(String::from("no mount table")))]
#[case(StorageError::Timeout { operation: String::from("ip route get"), timeout_ms: 250 })]
#[case(StorageError::Transport(String::from("monitor unreachable")))]
#[case(StorageError::Resolution(String::from("no candidate address")))]
#[case(StorageError::Validation(String::from("bad prefix")))]
#[case(StorageError::Cancelled)]
#[case(StorageError::Config(String::from("no monitors")))]
#[case(StorageError::Internal(String::from("boom")))]
#[tokio::test]
async fn executor_failures_keep_kind_and_message(#[case] raised: StorageError) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run_executor(
        &FailingExecutor(raised.clone()),
        "instanceID",
        &[],
        &mut stdout,
        &mut stderr,
    )
    .await
    .expect("buffers accept writes");
    let (runner, client) = scripted_client();
    runner.push_failure(code, String::from_utf8(stderr).expect("utf8 stderr"));

    let decoded = client.instance_id("fake").await.expect_err("executor failed");

    assert_eq!(decoded.kind(), raised.kind());
    assert_eq!(decoded.to_string(), raised.to_string());
    assert_eq!(decoded.status(), raised.status());
}
