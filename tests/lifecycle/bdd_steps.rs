//! BDD step definitions for volume lifecycle behaviour.

use rstest_bdd_macros::{given, then, when};
use serde_json::{Value, json};
use stevedore::driver::mock::MockExecutor;
use stevedore::{
    InstanceId, LocalExecutor, Volume, VolumeAttachments, VolumeCreateRequest, VolumeDetachRequest,
};
use tokio::runtime::Runtime;

use super::test_helpers::{LifecycleContext, failure, list, mount_points};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn runtime() -> Runtime {
    Runtime::new().unwrap_or_else(|err| panic!("tokio runtime should start: {err}"))
}

fn listed_volume<'a>(ctx: &'a LifecycleContext, id: &str) -> Result<&'a Volume, StepError> {
    let Some(Ok(volumes)) = ctx.listing.as_ref() else {
        return Err(StepError::Assertion(format!(
            "expected a successful listing, got {:?}",
            ctx.listing
        )));
    };
    volumes
        .iter()
        .find(|volume| volume.id == id)
        .ok_or_else(|| StepError::Assertion(format!("volume {id} missing from listing")))
}

fn created_volume(ctx: &LifecycleContext) -> Result<&Volume, StepError> {
    match ctx.created.as_ref() {
        Some(Ok(volume)) => Ok(volume),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected a created volume, got failure: {}",
            err.message
        ))),
        None => Err(StepError::Assertion(String::from("missing create outcome"))),
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), StepError> {
    if condition {
        Ok(())
    } else {
        Err(StepError::Assertion(message()))
    }
}

#[given("three mock services")]
fn three_mock_services(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
}

#[given("the local device map of this host")]
fn local_device_map(mut lifecycle_context: LifecycleContext) -> LifecycleContext {
    let devices = runtime()
        .block_on(MockExecutor.local_devices())
        .unwrap_or_else(|err| panic!("mock executor should list devices: {err}"));
    lifecycle_context.request = lifecycle_context.request.with_local_devices(devices);
    lifecycle_context
}

#[given("the caller instance \"{id}\"")]
fn caller_instance(mut lifecycle_context: LifecycleContext, id: String) -> LifecycleContext {
    lifecycle_context.request = lifecycle_context
        .request
        .with_instance_id(InstanceId::new(id, "mock"));
    lifecycle_context
}

#[when("I list the volumes of service \"{service}\" with attachments")]
fn list_service_volumes(mut lifecycle_context: LifecycleContext, service: String) -> LifecycleContext {
    let outcome = runtime().block_on(lifecycle_context.engine.volumes_by_service(
        &lifecycle_context.request,
        &service,
        VolumeAttachments::AnyInstance,
    ));
    lifecycle_context.listing = Some(outcome.map_err(|err| failure(&err)));
    lifecycle_context
}

#[when("I list the volumes of every service with attachments")]
fn list_every_service(mut lifecycle_context: LifecycleContext) -> LifecycleContext {
    let map = runtime()
        .block_on(
            lifecycle_context
                .engine
                .volumes(&lifecycle_context.request, VolumeAttachments::AnyInstance),
        )
        .unwrap_or_else(|err| panic!("aggregate listing should succeed: {err}"));
    lifecycle_context.aggregate = Some(map);
    lifecycle_context
}

#[when("I detach volume \"{volume}\" from service \"{service}\" twice")]
fn detach_twice(
    mut lifecycle_context: LifecycleContext,
    volume: String,
    service: String,
) -> LifecycleContext {
    let rt = runtime();
    for _ in 0..2 {
        let outcome = rt.block_on(lifecycle_context.engine.volume_detach(
            &lifecycle_context.request,
            &service,
            &volume,
            &VolumeDetachRequest::default(),
        ));
        lifecycle_context
            .detaches
            .push(outcome.map_err(|err| failure(&err)));
    }
    lifecycle_context
}

#[when("I remove volume \"{volume}\" from service \"{service}\" twice")]
fn remove_twice(
    mut lifecycle_context: LifecycleContext,
    volume: String,
    service: String,
) -> LifecycleContext {
    let rt = runtime();
    for _ in 0..2 {
        let outcome = rt.block_on(lifecycle_context.engine.volume_remove(
            &lifecycle_context.request,
            &service,
            &volume,
            false,
        ));
        lifecycle_context
            .removes
            .push(outcome.map_err(|err| failure(&err)));
    }
    lifecycle_context
}

#[when(
    "I create volume \"{name}\" in service \"{service}\" from snapshot \"{snapshot}\" with priority {priority:u32} and owner \"{owner}\""
)]
fn create_from_snapshot(
    mut lifecycle_context: LifecycleContext,
    name: String,
    service: String,
    snapshot: String,
    priority: u32,
    owner: String,
) -> LifecycleContext {
    let request = VolumeCreateRequest::builder()
        .name(name)
        .opt("priority", priority)
        .opt("owner", owner)
        .build()
        .unwrap_or_else(|err| panic!("create request should be valid: {err}"));
    let outcome = runtime().block_on(lifecycle_context.engine.volume_create_from_snapshot(
        &lifecycle_context.request,
        &service,
        &snapshot,
        &request,
    ));
    lifecycle_context.created = Some(outcome.map_err(|err| failure(&err)));
    lifecycle_context
}

#[then("volume \"{id}\" has {count:u32} attachments")]
fn attachment_count(lifecycle_context: &LifecycleContext, id: String, count: u32) -> Result<(), StepError> {
    let volume = listed_volume(lifecycle_context, &id)?;
    check(volume.attachments.len() == count as usize, || {
        format!("expected {count} attachments on {id}, got {:?}", volume.attachments)
    })
}

#[then("volume \"{id}\" is mounted at \"{mounts}\"")]
fn mounted_at(lifecycle_context: &LifecycleContext, id: String, mounts: String) -> Result<(), StepError> {
    let volume = listed_volume(lifecycle_context, &id)?;
    let actual = mount_points(volume);
    check(actual == list(&mounts), || {
        format!("expected {id} mounted at {mounts}, got {actual:?}")
    })
}

#[then("volume \"{id}\" is not mounted at \"{mounts}\"")]
fn not_mounted_at(lifecycle_context: &LifecycleContext, id: String, mounts: String) -> Result<(), StepError> {
    let volume = listed_volume(lifecycle_context, &id)?;
    let actual = mount_points(volume);
    check(actual != list(&mounts), || {
        format!("expected {id} without local mount points, got {actual:?}")
    })
}

#[then("the registry reports {count:u32} services")]
fn registry_reports(lifecycle_context: &LifecycleContext, count: u32) -> Result<(), StepError> {
    let services = lifecycle_context
        .engine
        .services(&lifecycle_context.request)
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    check(services.len() == count as usize, || {
        format!("expected {count} services, got {services:?}")
    })
}

#[then("the listing is keyed by \"{services}\"")]
fn listing_keys(lifecycle_context: &LifecycleContext, services: String) -> Result<(), StepError> {
    let map = lifecycle_context
        .aggregate
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing aggregate listing")))?;
    let keys = map.keys();
    check(keys == list(&services), || {
        format!("expected keys {services}, got {keys:?}")
    })
}

#[then("every service reports {count:u32} volumes")]
fn every_service_reports(lifecycle_context: &LifecycleContext, count: u32) -> Result<(), StepError> {
    let map = lifecycle_context
        .aggregate
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing aggregate listing")))?;
    for (service, result) in map.iter() {
        let volumes = result
            .ok()
            .ok_or_else(|| StepError::Assertion(format!("{service} returned {result:?}")))?;
        check(volumes.len() == count as usize, || {
            format!("expected {count} volumes from {service}, got {}", volumes.len())
        })?;
    }
    Ok(())
}

#[then("only service \"{attached}\" reports attached volumes")]
fn only_service_attached(lifecycle_context: &LifecycleContext, attached: String) -> Result<(), StepError> {
    let map = lifecycle_context
        .aggregate
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing aggregate listing")))?;
    for (service, result) in map.iter() {
        let any_attached = result
            .ok()
            .is_some_and(|volumes| volumes.iter().any(Volume::is_attached));
        check(any_attached == (service == attached), || {
            format!("unexpected attachment state for {service}: {result:?}")
        })?;
    }
    check(
        map.get(&attached).is_some_and(|result| result.ok().is_some()),
        || format!("{attached} did not answer"),
    )
}

#[then("every detach leaves the caller unattached")]
fn detaches_leave_caller_unattached(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let caller = InstanceId::new("iid-042", "mock");
    check(!lifecycle_context.detaches.is_empty(), || {
        String::from("no detach was attempted")
    })?;
    for outcome in &lifecycle_context.detaches {
        let volume = outcome
            .as_ref()
            .map_err(|err| StepError::Assertion(format!("detach failed: {}", err.message)))?;
        check(volume.attachment_for(&caller).is_none(), || {
            format!("caller still attached to {}", volume.id)
        })?;
    }
    Ok(())
}

#[then("the first remove succeeds")]
fn first_remove_succeeds(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match lifecycle_context.removes.first() {
        Some(Ok(())) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected the first remove to succeed, got {other:?}"
        ))),
    }
}

#[then("the second remove fails with status {status:u16} and message \"{message}\"")]
fn second_remove_fails(
    lifecycle_context: &LifecycleContext,
    status: u16,
    message: String,
) -> Result<(), StepError> {
    let Some(Err(err)) = lifecycle_context.removes.get(1) else {
        return Err(StepError::Assertion(format!(
            "expected the second remove to fail, got {:?}",
            lifecycle_context.removes.get(1)
        )));
    };
    check(err.status == status && err.message == message, || {
        format!("expected {status} {message:?}, got {err:?}")
    })
}

#[then("the created volume is named \"{name}\"")]
fn created_volume_named(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let volume = created_volume(lifecycle_context)?;
    check(volume.name == name, || {
        format!("expected name {name:?}, got {:?}", volume.name)
    })
}

#[then("the created volume has option \"{key}\" set to {value:u32}")]
fn created_volume_number_option(
    lifecycle_context: &LifecycleContext,
    key: String,
    value: u32,
) -> Result<(), StepError> {
    let volume = created_volume(lifecycle_context)?;
    option_equals(volume, &key, &json!(value))
}

#[then("the created volume has option \"{key}\" set to \"{value}\"")]
fn created_volume_text_option(
    lifecycle_context: &LifecycleContext,
    key: String,
    value: String,
) -> Result<(), StepError> {
    let volume = created_volume(lifecycle_context)?;
    option_equals(volume, &key, &Value::String(value))
}

fn option_equals(volume: &Volume, key: &str, expected: &Value) -> Result<(), StepError> {
    let actual = volume.opts.get(key);
    check(actual == Some(expected), || {
        format!("expected option {key} = {expected}, got {actual:?}")
    })
}

