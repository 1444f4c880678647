//! Shared fixtures for lifecycle BDD scenarios.

use std::sync::Arc;

use rstest::fixture;
use stevedore::config::parse_services;
use stevedore::executor::ExecutorTable;
use stevedore::test_support::ScriptedRunner;
use stevedore::{
    DriverDeps, DriverRegistry, Engine, RequestContext, ServiceMap, ServiceRegistry, Volume,
};

use crate::workspace::THREE_MOCKS;

/// A failed operation, as its HTTP status and message.
#[derive(Clone, Debug)]
pub struct Failure {
    pub status: u16,
    pub message: String,
}

pub type Outcome<T> = Result<T, Failure>;

#[derive(Clone)]
pub struct LifecycleContext {
    pub engine: Arc<Engine>,
    pub request: RequestContext,
    pub listing: Option<Outcome<Vec<Volume>>>,
    pub aggregate: Option<ServiceMap<Vec<Volume>>>,
    pub detaches: Vec<Outcome<Volume>>,
    pub removes: Vec<Outcome<()>>,
    pub created: Option<Outcome<Volume>>,
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    let configs = parse_services(THREE_MOCKS, "mock")
        .unwrap_or_else(|err| panic!("three mock services should parse: {err}"));
    let deps = DriverDeps::with_runner(Arc::new(ScriptedRunner::new()));
    let services = ServiceRegistry::build(configs, &DriverRegistry::builtin(), &deps)
        .unwrap_or_else(|err| panic!("registry should build: {err}"));
    LifecycleContext {
        engine: Arc::new(Engine::new(services, ExecutorTable::empty())),
        request: RequestContext::new(),
        listing: None,
        aggregate: None,
        detaches: Vec::new(),
        removes: Vec::new(),
        created: None,
    }
}

pub fn failure(err: &stevedore::StorageError) -> Failure {
    Failure {
        status: err.status(),
        message: err.to_string(),
    }
}

/// Splits a comma-separated step argument.
pub fn list(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).collect()
}

pub fn mount_points(volume: &Volume) -> Vec<&str> {
    volume
        .attachments
        .iter()
        .map(|att| att.mount_point.as_str())
        .collect()
}
