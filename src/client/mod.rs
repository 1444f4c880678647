//! Client facade over the lifecycle engine.
//!
//! The client gathers the caller's host facts through the executor before
//! each request: it installs the executor advertised by the engine into its
//! tool directory, asks it which commands it implements and then attaches
//! instance IDs and local device maps to the outgoing request. Instance IDs
//! and executor capabilities are cached for the lifetime of the client;
//! device maps change with every attach and are read afresh per request.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::slice;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::StevedoreConfig;
use crate::engine::{RequestContext, ServiceMap};
use crate::error::{ErrorKind, Result, StorageError};
use crate::executor::{
    ExecutorClient, ExecutorInfo, Platform, install_executor, installed_checksum,
};
use crate::runner::{CommandRunner, ProcessCommandRunner};
use crate::types::{
    AttachToken, ExecutorOps, InstanceId, LocalDevices, ServiceInfo, Snapshot,
    SnapshotCopyRequest, Volume, VolumeAttachRequest, VolumeAttachments, VolumeCopyRequest,
    VolumeCreateRequest, VolumeDetachRequest, VolumeSnapshotRequest,
};

mod message;
mod transport;

pub use message::{Request, Response};
pub use transport::{LocalTransport, Transport};

/// Directory name used under the system temporary directory when no tool
/// directory is configured.
const DEFAULT_TOOL_DIR_NAME: &str = "stevedore-tools";

macro_rules! expect_response {
    ($response:expr, $pattern:pat => $value:expr) => {
        match $response {
            $pattern => Ok($value),
            other => Err(unexpected(other.kind())),
        }
    };
}

/// Where and how the client runs its executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Directory the executor is installed into.
    pub tool_dir: Utf8PathBuf,
    /// Deadline for each executor invocation.
    pub executor_timeout: Duration,
    /// Platform whose executor build is fetched. `None` uses the running
    /// platform.
    pub platform: Option<Platform>,
    /// Pre-installed executor to use instead of fetching one.
    pub executor_path: Option<Utf8PathBuf>,
}

impl ClientOptions {
    /// Options derived from process configuration.
    #[must_use]
    pub fn from_config(config: &StevedoreConfig) -> Self {
        let tool_dir = config
            .tool_dir
            .as_deref()
            .map_or_else(default_tool_dir, Utf8PathBuf::from);
        Self {
            tool_dir,
            executor_timeout: config.executor_timeout(),
            platform: None,
            executor_path: None,
        }
    }
}

fn default_tool_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
        .join(DEFAULT_TOOL_DIR_NAME)
}

/// Facts that stay valid for the client's lifetime, per service and per
/// driver.
#[derive(Debug, Default)]
struct ClientStore {
    services: BTreeMap<String, ServiceInfo>,
    instance_ids: BTreeMap<String, InstanceId>,
    supported: BTreeMap<String, ExecutorOps>,
}

/// Typed entry point for callers of the storage API.
pub struct Client<T> {
    transport: T,
    runner: Arc<dyn CommandRunner>,
    options: ClientOptions,
    local_devices_headers: bool,
    cancel: CancellationToken,
    executor: OnceCell<ExecutorClient>,
    store: Mutex<ClientStore>,
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("local_devices_headers", &self.local_devices_headers)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Client<T> {
    /// Creates a client that runs its executor as a child process.
    #[must_use]
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self::with_runner(transport, options, Arc::new(ProcessCommandRunner))
    }

    /// Creates a client that runs its executor through `runner`.
    #[must_use]
    pub fn with_runner(transport: T, options: ClientOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            transport,
            runner,
            options,
            local_devices_headers: true,
            cancel: CancellationToken::new(),
            executor: OnceCell::new(),
            store: Mutex::new(ClientStore::default()),
        }
    }

    /// Observes `token` on every request this client sends.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Controls whether local device maps accompany requests. Without them
    /// attachments carry no mount points.
    pub const fn set_local_devices_headers(&mut self, enabled: bool) {
        self.local_devices_headers = enabled;
    }

    /// The transport requests are sent through.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Describes every service and caches each description.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn services(&self) -> Result<Vec<ServiceInfo>> {
        let response = self.send(self.bare_context(), Request::Services).await?;
        let services = expect_response!(response, Response::Services(list) => list)?;
        let mut store = self.store();
        for service in &services {
            store.services.insert(service.name.clone(), service.clone());
        }
        Ok(services)
    }

    /// Describes one service, from the cache when already known.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown services.
    pub async fn service_inspect(&self, service: &str) -> Result<ServiceInfo> {
        let cached = self.store().services.get(service).cloned();
        if let Some(info) = cached {
            return Ok(info);
        }
        let call = Request::ServiceInspect {
            service: service.to_owned(),
        };
        let response = self.send(self.bare_context(), call).await?;
        let info = expect_response!(response, Response::Service(info) => info)?;
        self.store()
            .services
            .insert(service.to_owned(), info.clone());
        Ok(info)
    }

    /// Lists volumes of every service.
    ///
    /// # Errors
    ///
    /// Returns the engine's error; per-service failures are reported
    /// inside the map.
    #[instrument(skip(self))]
    pub async fn volumes(&self, attachments: VolumeAttachments) -> Result<ServiceMap<Vec<Volume>>> {
        let services = self.services().await?;
        let ctx = self
            .context(&services, attachments.requires_instance())
            .await?;
        let response = self.send(ctx, Request::Volumes { attachments }).await?;
        expect_response!(response, Response::Volumes(map) => map)
    }

    /// Lists the volumes of one service.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[instrument(skip(self))]
    pub async fn volumes_by_service(
        &self,
        service: &str,
        attachments: VolumeAttachments,
    ) -> Result<Vec<Volume>> {
        let ctx = self
            .service_context(service, attachments.requires_instance())
            .await?;
        let call = Request::VolumesByService {
            service: service.to_owned(),
            attachments,
        };
        let response = self.send(ctx, call).await?;
        expect_response!(response, Response::VolumeList(list) => list)
    }

    /// Inspects one volume.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[instrument(skip(self))]
    pub async fn volume_inspect(
        &self,
        service: &str,
        volume_id: &str,
        attachments: VolumeAttachments,
    ) -> Result<Volume> {
        let ctx = self
            .service_context(service, attachments.requires_instance())
            .await?;
        let call = Request::VolumeInspect {
            service: service.to_owned(),
            volume_id: volume_id.to_owned(),
            attachments,
        };
        let response = self.send(ctx, call).await?;
        expect_response!(response, Response::Volume(volume) => volume)
    }

    /// Creates a volume.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn volume_create(&self, service: &str, request: &VolumeCreateRequest) -> Result<Volume> {
        let call = Request::VolumeCreate {
            service: service.to_owned(),
            request: request.clone(),
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::Volume(volume) => volume)
    }

    /// Creates a volume from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[instrument(skip(self, request))]
    pub async fn volume_create_from_snapshot(
        &self,
        service: &str,
        snapshot_id: &str,
        request: &VolumeCreateRequest,
    ) -> Result<Volume> {
        let call = Request::VolumeCreateFromSnapshot {
            service: service.to_owned(),
            snapshot_id: snapshot_id.to_owned(),
            request: request.clone(),
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::Volume(volume) => volume)
    }

    /// Copies a volume.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[instrument(skip(self, request))]
    pub async fn volume_copy(
        &self,
        service: &str,
        volume_id: &str,
        request: &VolumeCopyRequest,
    ) -> Result<Volume> {
        let call = Request::VolumeCopy {
            service: service.to_owned(),
            volume_id: volume_id.to_owned(),
            request: request.clone(),
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::Volume(volume) => volume)
    }

    /// Snapshots a volume.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[instrument(skip(self, request))]
    pub async fn volume_snapshot(
        &self,
        service: &str,
        volume_id: &str,
        request: &VolumeSnapshotRequest,
    ) -> Result<Snapshot> {
        let call = Request::VolumeSnapshot {
            service: service.to_owned(),
            volume_id: volume_id.to_owned(),
            request: request.clone(),
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::Snapshot(snapshot) => snapshot)
    }

    /// Removes a volume.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the volume is already gone.
    #[instrument(skip(self))]
    pub async fn volume_remove(&self, service: &str, volume_id: &str, force: bool) -> Result<()> {
        let call = Request::VolumeRemove {
            service: service.to_owned(),
            volume_id: volume_id.to_owned(),
            force,
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::Ok => ())
    }

    /// Attaches a volume to this host. When the request names no device,
    /// the executor predicts the next free one for drivers that need it.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or the executor's when the instance ID
    /// cannot be determined.
    #[instrument(skip(self, request))]
    pub async fn volume_attach(
        &self,
        service: &str,
        volume_id: &str,
        request: &VolumeAttachRequest,
    ) -> Result<(Volume, AttachToken)> {
        let info = self.service_inspect(service).await?;
        let ctx = self.context(slice::from_ref(&info), true).await?;
        let mut prepared = request.clone();
        if prepared.next_device_name.is_none() {
            prepared.next_device_name = self.next_device(&info).await?;
        }
        let call = Request::VolumeAttach {
            service: service.to_owned(),
            volume_id: volume_id.to_owned(),
            request: prepared,
        };
        let response = self.send(ctx, call).await?;
        expect_response!(response, Response::Attached { volume, token } => (volume, token))
    }

    /// Detaches a volume from this host, or from every host when forced.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[instrument(skip(self, request))]
    pub async fn volume_detach(
        &self,
        service: &str,
        volume_id: &str,
        request: &VolumeDetachRequest,
    ) -> Result<Volume> {
        let ctx = self.service_context(service, true).await?;
        let call = Request::VolumeDetach {
            service: service.to_owned(),
            volume_id: volume_id.to_owned(),
            request: request.clone(),
        };
        let response = self.send(ctx, call).await?;
        expect_response!(response, Response::Volume(volume) => volume)
    }

    /// Lists snapshots of every service.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn snapshots(&self) -> Result<ServiceMap<Vec<Snapshot>>> {
        let response = self.send(self.bare_context(), Request::Snapshots).await?;
        expect_response!(response, Response::Snapshots(map) => map)
    }

    /// Lists the snapshots of one service.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn snapshots_by_service(&self, service: &str) -> Result<Vec<Snapshot>> {
        let call = Request::SnapshotsByService {
            service: service.to_owned(),
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::SnapshotList(list) => list)
    }

    /// Inspects one snapshot.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn snapshot_inspect(&self, service: &str, snapshot_id: &str) -> Result<Snapshot> {
        let call = Request::SnapshotInspect {
            service: service.to_owned(),
            snapshot_id: snapshot_id.to_owned(),
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::Snapshot(snapshot) => snapshot)
    }

    /// Copies a snapshot.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn snapshot_copy(
        &self,
        service: &str,
        snapshot_id: &str,
        request: &SnapshotCopyRequest,
    ) -> Result<Snapshot> {
        let call = Request::SnapshotCopy {
            service: service.to_owned(),
            snapshot_id: snapshot_id.to_owned(),
            request: request.clone(),
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::Snapshot(snapshot) => snapshot)
    }

    /// Removes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn snapshot_remove(&self, service: &str, snapshot_id: &str) -> Result<()> {
        let call = Request::SnapshotRemove {
            service: service.to_owned(),
            snapshot_id: snapshot_id.to_owned(),
        };
        let response = self.send(self.bare_context(), call).await?;
        expect_response!(response, Response::Ok => ())
    }

    /// Executors the engine serves.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn executors(&self) -> Result<Vec<ExecutorInfo>> {
        let response = self.send(self.bare_context(), Request::Executors).await?;
        expect_response!(response, Response::Executors(list) => list)
    }

    /// This host's instance ID for a service's driver. The executor answers
    /// when it implements `instanceID`; otherwise the engine is asked.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] when neither side can compute
    /// the identity, or the resolution error.
    pub async fn instance_id(&self, service: &str) -> Result<InstanceId> {
        let info = self.service_inspect(service).await?;
        match self.executor_instance_id(&info.driver.name).await {
            Err(err) if is_absent(&err) => {
                let call = Request::InstanceId {
                    service: service.to_owned(),
                };
                let response = self.send(self.bare_context(), call).await?;
                expect_response!(response, Response::InstanceId(id) => id)
            }
            other => other,
        }
    }

    /// This host's current device map for a service's driver. Never
    /// cached.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] when the executor does not
    /// implement `localDevices`.
    pub async fn local_devices(&self, service: &str) -> Result<LocalDevices> {
        let info = self.service_inspect(service).await?;
        self.executor_local_devices(&info.driver.name).await
    }

    /// Commands the executor implements for `driver`.
    ///
    /// # Errors
    ///
    /// Returns an error when the executor cannot be installed or run.
    pub async fn supported(&self, driver: &str) -> Result<ExecutorOps> {
        let cached = self.store().supported.get(driver).copied();
        if let Some(ops) = cached {
            return Ok(ops);
        }
        let ops = self.executor().await?.supported(driver).await?;
        debug!(driver, ops = ops.bits(), "executor capabilities");
        self.store().supported.insert(driver.to_owned(), ops);
        Ok(ops)
    }

    /// Installs or verifies the executor, returning the client that runs
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the engine serves no build
    /// for this platform, or [`StorageError::Transport`] when the download
    /// fails verification.
    pub async fn executor(&self) -> Result<&ExecutorClient> {
        self.executor.get_or_try_init(|| self.prepare_executor()).await
    }

    async fn prepare_executor(&self) -> Result<ExecutorClient> {
        let timeout = self.options.executor_timeout;
        if let Some(path) = &self.options.executor_path {
            return Ok(ExecutorClient::new(Arc::clone(&self.runner), path.clone(), timeout));
        }
        let platform = self
            .options
            .platform
            .or_else(Platform::current)
            .ok_or_else(|| {
                StorageError::Unsupported(format!(
                    "no executor build exists for {}",
                    std::env::consts::OS
                ))
            })?;
        let name = platform.executor_name();
        let inspect = Request::ExecutorInspect {
            name: name.to_owned(),
        };
        let response = self.send(self.bare_context(), inspect).await?;
        let advertised = expect_response!(response, Response::Executor(info) => info)?;

        let tool_dir = &self.options.tool_dir;
        let current = installed_checksum(tool_dir, name)?;
        let path = if current.as_deref() == Some(advertised.sha256.as_str()) {
            debug!(%tool_dir, name, "installed executor is current");
            tool_dir.join(name)
        } else {
            info!(%tool_dir, name, "fetching executor");
            let fetch = Request::ExecutorFetch {
                name: name.to_owned(),
            };
            let response = self.send(self.bare_context(), fetch).await?;
            let bytes = expect_response!(response, Response::ExecutorBytes(bytes) => bytes)?;
            install_executor(tool_dir, &advertised, &bytes)?
        };
        Ok(ExecutorClient::new(Arc::clone(&self.runner), path, timeout))
    }

    async fn executor_instance_id(&self, driver: &str) -> Result<InstanceId> {
        let cached = self.store().instance_ids.get(driver).cloned();
        if let Some(id) = cached {
            return Ok(id);
        }
        self.require(driver, ExecutorOps::INSTANCE_ID, "instanceID")
            .await?;
        let id = self.executor().await?.instance_id(driver).await?;
        self.store()
            .instance_ids
            .insert(driver.to_owned(), id.clone());
        Ok(id)
    }

    async fn executor_local_devices(&self, driver: &str) -> Result<LocalDevices> {
        self.require(driver, ExecutorOps::LOCAL_DEVICES, "localDevices")
            .await?;
        self.executor().await?.local_devices(driver).await
    }

    async fn next_device(&self, info: &ServiceInfo) -> Result<Option<String>> {
        let next = &info.driver.next_device;
        if next.ignore {
            return Ok(None);
        }
        let driver = info.driver.name.as_str();
        match self.require(driver, ExecutorOps::NEXT_DEVICE, "nextDevice").await {
            Ok(()) => self.executor().await?.next_device(driver, next).await,
            Err(err) => {
                debug!(driver, error = %err, "attaching without a predicted device");
                Ok(None)
            }
        }
    }

    async fn require(&self, driver: &str, op: ExecutorOps, command: &str) -> Result<()> {
        if self.supported(driver).await?.contains(op) {
            return Ok(());
        }
        Err(StorageError::Unsupported(format!(
            "the {driver} executor does not implement {command}"
        )))
    }

    async fn service_context(&self, service: &str, need_instance: bool) -> Result<RequestContext> {
        let info = self.service_inspect(service).await?;
        self.context(slice::from_ref(&info), need_instance).await
    }

    /// Builds a request context carrying this host's facts for every
    /// driver behind `services`.
    ///
    /// Missing facts are tolerated: the engine computes instance IDs itself
    /// where it can and rejects requests that need one it cannot compute.
    async fn context(&self, services: &[ServiceInfo], need_instance: bool) -> Result<RequestContext> {
        let mut ctx = self.bare_context();
        let drivers: BTreeSet<&str> = services
            .iter()
            .map(|service| service.driver.name.as_str())
            .collect();
        for driver in drivers {
            match self.executor_instance_id(driver).await {
                Ok(id) => ctx = ctx.with_instance_id(id),
                Err(err) if is_absent(&err) => {
                    debug!(driver, error = %err, "no executor instance ID");
                }
                Err(err) if need_instance => return Err(err),
                Err(err) => warn!(driver, error = %err, "executor failed to report instance ID"),
            }
            if !self.local_devices_headers {
                continue;
            }
            match self.executor_local_devices(driver).await {
                Ok(devices) => ctx = ctx.with_local_devices(devices),
                Err(err) => debug!(driver, error = %err, "no local devices"),
            }
        }
        Ok(ctx)
    }

    fn bare_context(&self) -> RequestContext {
        RequestContext::new().with_cancellation(self.cancel.clone())
    }

    async fn send(&self, ctx: RequestContext, request: Request) -> Result<Response> {
        self.transport.send(&ctx, request).await
    }

    fn store(&self) -> MutexGuard<'_, ClientStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether `err` means the fact is unavailable rather than broken.
fn is_absent(err: &StorageError) -> bool {
    matches!(err.kind(), ErrorKind::Unsupported | ErrorKind::NotFound)
}

fn unexpected(kind: &str) -> StorageError {
    StorageError::Internal(format!("unexpected {kind} response"))
}

#[cfg(test)]
mod tests;
