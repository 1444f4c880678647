//! Core library for the Stevedore storage orchestration layer.
//!
//! The crate exposes one storage API over pluggable backend drivers. A
//! [`ServiceRegistry`] binds configured service names to driver instances,
//! the [`Engine`] routes calls to one service or fans them out to all of
//! them, and the [`Client`] gathers host facts through the `stevedore-lsx`
//! executor before each request. Two drivers ship with the crate: an
//! in-memory `mock` driver and an `rbd` driver for Ceph block devices.

pub mod client;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod resolver;
pub mod runner;
pub mod service;
pub mod test_support;
pub mod types;

pub use client::{Client, ClientOptions, LocalTransport, Request, Response, Transport};
pub use config::{ConfigError, ServiceConfig, StevedoreConfig};
pub use driver::{DriverDeps, DriverRegistry, StorageDriver};
pub use engine::{Engine, RequestContext, ServiceMap, ServiceResult};
pub use error::{ErrorKind, JsonError, NOT_FOUND_MESSAGE, StorageError};
pub use executor::{EXECUTOR_BASENAME, ExecutorClient, ExecutorInfo, LocalExecutor, Platform};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
pub use service::{Service, ServiceRegistry};
pub use types::{
    AttachToken, Attachment, ExecutorOps, InstanceId, LocalDevices, NextDeviceInfo, Opts,
    ServiceInfo, Snapshot, SnapshotCopyRequest, Volume, VolumeAttachRequest, VolumeAttachments,
    VolumeCopyRequest, VolumeCreateRequest, VolumeDetachRequest, VolumeSnapshotRequest,
};
