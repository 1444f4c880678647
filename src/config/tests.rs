//! Configuration loading and service parsing tests.

use super::*;
use crate::test_support::EnvGuard;
use crate::types::NextDeviceInfo;
use rstest::{fixture, rstest};

#[fixture]
fn base_config() -> StevedoreConfig {
    StevedoreConfig::defaults()
}

#[rstest]
fn defaults_validate(base_config: StevedoreConfig) {
    assert!(base_config.validate().is_ok());
    assert_eq!(base_config.executor_timeout(), Duration::from_secs(60));
}

#[rstest]
fn blank_driver_names_its_env_var(base_config: StevedoreConfig) {
    let cfg = StevedoreConfig {
        default_driver: String::from("  "),
        ..base_config
    };
    let err = cfg.validate().expect_err("blank driver is rejected");
    assert!(err.to_string().contains("STEVEDORE_DEFAULT_DRIVER"));
}

#[rstest]
fn zero_timeout_is_rejected(base_config: StevedoreConfig) {
    let cfg = StevedoreConfig {
        executor_timeout_secs: 0,
        ..base_config
    };
    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("STEVEDORE_DEFAULT_DRIVER", "rbd"),
        ("STEVEDORE_EXECUTOR_TIMEOUT_SECS", "5"),
    ])
    .await;

    let cfg = StevedoreConfig::load_without_cli_args().expect("config should load from env");
    assert_eq!(cfg.default_driver, "rbd");
    assert_eq!(cfg.executor_timeout_secs, 5);
    assert_eq!(cfg.local_devices_file, DEFAULT_LOCAL_DEVICES_FILE);
}

#[rstest]
fn primary_service_is_prepended() {
    let services = parse_services(r#"[{"name":"mock2"},{"name":"mock3"}]"#, "mock")
        .expect("services parse");
    let names: Vec<_> = services.iter().map(|svc| svc.name.as_str()).collect();
    assert_eq!(names, vec!["mock", "mock2", "mock3"]);
    assert!(services.iter().all(|svc| svc.driver == "mock"));
}

#[rstest]
fn declared_primary_keeps_its_position() {
    let services = parse_services(
        r#"[{"name":"fast","driver":"rbd","defaultPool":"ssd"},{"name":"rbd","driver":"rbd"}]"#,
        "rbd",
    )
    .expect("services parse");
    let names: Vec<_> = services.iter().map(|svc| svc.name.as_str()).collect();
    assert_eq!(names, vec!["fast", "rbd"]);
    assert_eq!(
        services.first().and_then(|svc| svc.default_pool.as_deref()),
        Some("ssd")
    );
}

#[rstest]
fn unknown_options_are_preserved() {
    let services = parse_services(
        r#"[{"name":"mock","nextDevice":{"prefix":"sd"},"tier":"gold","replicas":3}]"#,
        "mock",
    )
    .expect("services parse");
    let svc = services.first().expect("one service");
    assert_eq!(svc.extra.get("tier"), Some(&serde_json::json!("gold")));
    assert_eq!(svc.extra.get("replicas"), Some(&serde_json::json!(3)));
    assert!(!svc.extra.contains_key("nextDevice"));

    let info = svc.next_device.apply(NextDeviceInfo::default());
    assert_eq!(info.prefix, "sd");
    assert_eq!(info.pattern, r"\w");
}

#[rstest]
#[case(r#"[{"name":"a"},{"name":"a"}]"#)]
#[case(r#"[{"name":" "}]"#)]
#[case(r#"{"name":"a"}"#)]
fn invalid_documents_are_rejected(#[case] document: &str) {
    assert!(parse_services(document, "mock").is_err());
}

#[rstest]
fn services_file_is_read_from_disk(base_config: StevedoreConfig) {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let path = dir.path().join("services.json");
    std::fs::write(&path, r#"[{"name":"mock2"}]"#).expect("write services");
    let cfg = StevedoreConfig {
        services_file: Some(path.to_string_lossy().into_owned()),
        ..base_config
    };
    let services = cfg.service_configs().expect("services load");
    assert_eq!(services.len(), 2);

    let missing = StevedoreConfig {
        services_file: Some(String::from("/nonexistent/services.json")),
        ..cfg
    };
    assert!(matches!(
        missing.service_configs(),
        Err(ConfigError::Services { .. })
    ));
}
