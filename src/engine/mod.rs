//! Lifecycle engine: routes calls to one service or fans them out to all.
//!
//! Every entry point validates its request before touching a backend,
//! honours the caller's cancellation token and adds the service name to
//! driver errors without changing their kind. Aggregate calls run one task
//! per service concurrently and keep registry order in the reply.

use std::future::Future;

use futures::future::join_all;
use tracing::{debug, info, instrument};

use crate::config::StevedoreConfig;
use crate::driver::DriverRegistry;
use crate::error::{Result, StorageError};
use crate::executor::{ExecutorInfo, ExecutorTable};
use crate::service::{Service, ServiceRegistry};
use crate::types::{
    AttachToken, InstanceId, ServiceInfo, Snapshot, SnapshotCopyRequest, Volume,
    VolumeAttachRequest, VolumeAttachments, VolumeCopyRequest, VolumeCreateRequest,
    VolumeDetachRequest, VolumeSnapshotRequest,
};

mod aggregate;
mod context;

pub use aggregate::{ServiceMap, ServiceResult};
pub use context::RequestContext;

/// Entry point for every storage operation.
#[derive(Debug)]
pub struct Engine {
    services: ServiceRegistry,
    executors: ExecutorTable,
}

impl Engine {
    /// Creates an engine over a built registry and executor table.
    #[must_use]
    pub const fn new(services: ServiceRegistry, executors: ExecutorTable) -> Self {
        Self {
            services,
            executors,
        }
    }

    /// Builds the registry and executor table from process configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when services or the executor
    /// directory cannot be loaded.
    pub fn from_config(config: &StevedoreConfig, drivers: &DriverRegistry) -> Result<Self> {
        config.validate()?;
        let services = ServiceRegistry::from_config(config, drivers)?;
        let executors = match config.executor_dir_path() {
            Some(dir) => ExecutorTable::scan(&dir)?,
            None => ExecutorTable::empty(),
        };
        info!(
            services = services.len(),
            executors = executors.list().len(),
            "engine ready"
        );
        Ok(Self::new(services, executors))
    }

    /// The service registry.
    #[must_use]
    pub const fn registry(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Describes every service in registry order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`] after cancellation.
    pub fn services(&self, ctx: &RequestContext) -> Result<Vec<ServiceInfo>> {
        ctx.ensure_live()?;
        Ok(self.services.services())
    }

    /// Describes one service.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown services.
    pub fn service_inspect(&self, ctx: &RequestContext, service: &str) -> Result<ServiceInfo> {
        ctx.ensure_live()?;
        self.services.inspect(service)
    }

    /// Lists volumes of every service.
    ///
    /// A failing service is reported under its own key; the others still
    /// answer.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`] after cancellation.
    #[instrument(skip(self, ctx))]
    pub async fn volumes(
        &self,
        ctx: &RequestContext,
        attachments: VolumeAttachments,
    ) -> Result<ServiceMap<Vec<Volume>>> {
        ctx.ensure_live()?;
        let replies = join_all(self.services.iter().map(|service| async move {
            let result = list_volumes(ctx, service, attachments).await;
            (service.name().to_owned(), result)
        }))
        .await;
        ctx.ensure_live()?;
        Ok(replies.into_iter().collect())
    }

    /// Lists the volumes of one service.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown services, or the
    /// driver's error scoped to the service.
    #[instrument(skip(self, ctx))]
    pub async fn volumes_by_service(
        &self,
        ctx: &RequestContext,
        service: &str,
        attachments: VolumeAttachments,
    ) -> Result<Vec<Volume>> {
        let svc = self.services.get(service)?;
        list_volumes(ctx, svc, attachments).await
    }

    /// Inspects one volume.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown services or volumes,
    /// including attached volumes under
    /// [`VolumeAttachments::OnlyUnattached`].
    #[instrument(skip(self, ctx))]
    pub async fn volume_inspect(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        attachments: VolumeAttachments,
    ) -> Result<Volume> {
        require_id(volume_id, "volume")?;
        let svc = self.services.get(service)?;
        scoped(svc, async {
            let instance = visibility_instance(ctx, svc, attachments).await?;
            let volume = ctx
                .read(svc.driver().volume_inspect(volume_id, attachments))
                .await?;
            volume
                .apply_visibility(
                    attachments,
                    instance.as_ref(),
                    ctx.local_devices(svc.driver().name()),
                )
                .ok_or_else(|| StorageError::not_found("volume", volume_id))
        })
        .await
    }

    /// Creates a volume. Service options the request does not set are
    /// added to its options.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for invalid requests, or the
    /// driver's error scoped to the service.
    #[instrument(skip(self, ctx, request), fields(name = %request.name))]
    pub async fn volume_create(
        &self,
        ctx: &RequestContext,
        service: &str,
        request: &VolumeCreateRequest,
    ) -> Result<Volume> {
        request.validate()?;
        let svc = self.services.get(service)?;
        let merged = with_service_opts(svc, request);
        let volume = scoped(svc, ctx.mutate(svc.driver().volume_create(&merged))).await?;
        info!(service, volume_id = %volume.id, "volume created");
        Ok(volume)
    }

    /// Creates a volume from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for invalid requests, or the
    /// driver's error scoped to the service.
    #[instrument(skip(self, ctx, request), fields(name = %request.name))]
    pub async fn volume_create_from_snapshot(
        &self,
        ctx: &RequestContext,
        service: &str,
        snapshot_id: &str,
        request: &VolumeCreateRequest,
    ) -> Result<Volume> {
        require_id(snapshot_id, "snapshot")?;
        request.validate()?;
        let svc = self.services.get(service)?;
        let merged = with_service_opts(svc, request);
        let volume = scoped(
            svc,
            ctx.mutate(svc.driver().volume_create_from_snapshot(snapshot_id, &merged)),
        )
        .await?;
        info!(service, snapshot_id, volume_id = %volume.id, "volume created from snapshot");
        Ok(volume)
    }

    /// Copies a volume.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for invalid requests, or the
    /// driver's error scoped to the service.
    #[instrument(skip(self, ctx, request))]
    pub async fn volume_copy(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        request: &VolumeCopyRequest,
    ) -> Result<Volume> {
        require_id(volume_id, "volume")?;
        request.validate()?;
        let svc = self.services.get(service)?;
        scoped(svc, ctx.mutate(svc.driver().volume_copy(volume_id, request))).await
    }

    /// Snapshots a volume.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for invalid requests, or the
    /// driver's error scoped to the service.
    #[instrument(skip(self, ctx, request))]
    pub async fn volume_snapshot(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        request: &VolumeSnapshotRequest,
    ) -> Result<Snapshot> {
        require_id(volume_id, "volume")?;
        request.validate()?;
        let svc = self.services.get(service)?;
        scoped(svc, ctx.mutate(svc.driver().volume_snapshot(volume_id, request))).await
    }

    /// Removes a volume. Removing it again fails with
    /// [`StorageError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown services or volumes.
    #[instrument(skip(self, ctx))]
    pub async fn volume_remove(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        force: bool,
    ) -> Result<()> {
        require_id(volume_id, "volume")?;
        let svc = self.services.get(service)?;
        scoped(svc, ctx.mutate(svc.driver().volume_remove(volume_id, force))).await?;
        info!(service, volume_id, "volume removed");
        Ok(())
    }

    /// Attaches a volume to the caller's instance.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] when the caller's instance ID is
    /// unknown, [`StorageError::Conflict`] when the backend refuses the
    /// attachment, or another driver error scoped to the service.
    #[instrument(skip(self, ctx, request))]
    pub async fn volume_attach(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        request: &VolumeAttachRequest,
    ) -> Result<(Volume, AttachToken)> {
        require_id(volume_id, "volume")?;
        let svc = self.services.get(service)?;
        scoped(svc, async {
            let instance = caller_instance(ctx, svc).await?;
            let volume = ctx
                .mutate(svc.driver().volume_attach(volume_id, &instance, request))
                .await?;
            info!(service, volume_id, %instance, "volume attached");
            let enriched = volume
                .apply_visibility(
                    VolumeAttachments::AnyInstance,
                    Some(&instance),
                    ctx.local_devices(svc.driver().name()),
                )
                .ok_or_else(|| StorageError::not_found("volume", volume_id))?;
            Ok((enriched, AttachToken::issue()))
        })
        .await
    }

    /// Detaches a volume from the caller, or from everyone when forced.
    /// Detaching an unattached volume succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] when the caller's instance ID is
    /// unknown, or a driver error scoped to the service.
    #[instrument(skip(self, ctx, request))]
    pub async fn volume_detach(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        request: &VolumeDetachRequest,
    ) -> Result<Volume> {
        require_id(volume_id, "volume")?;
        let svc = self.services.get(service)?;
        scoped(svc, async {
            let instance = caller_instance(ctx, svc).await?;
            let volume = ctx
                .mutate(svc.driver().volume_detach(volume_id, &instance, request))
                .await?;
            info!(service, volume_id, %instance, force = request.force, "volume detached");
            Ok(volume)
        })
        .await
    }

    /// Lists snapshots of every service.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`] after cancellation.
    #[instrument(skip(self, ctx))]
    pub async fn snapshots(&self, ctx: &RequestContext) -> Result<ServiceMap<Vec<Snapshot>>> {
        ctx.ensure_live()?;
        let replies = join_all(self.services.iter().map(|service| async move {
            let result = scoped(service, ctx.read(service.driver().snapshots())).await;
            (service.name().to_owned(), result)
        }))
        .await;
        ctx.ensure_live()?;
        Ok(replies.into_iter().collect())
    }

    /// Lists the snapshots of one service.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown services.
    #[instrument(skip(self, ctx))]
    pub async fn snapshots_by_service(&self, ctx: &RequestContext, service: &str) -> Result<Vec<Snapshot>> {
        let svc = self.services.get(service)?;
        scoped(svc, ctx.read(svc.driver().snapshots())).await
    }

    /// Inspects one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown services or
    /// snapshots.
    #[instrument(skip(self, ctx))]
    pub async fn snapshot_inspect(
        &self,
        ctx: &RequestContext,
        service: &str,
        snapshot_id: &str,
    ) -> Result<Snapshot> {
        require_id(snapshot_id, "snapshot")?;
        let svc = self.services.get(service)?;
        scoped(svc, ctx.read(svc.driver().snapshot_inspect(snapshot_id))).await
    }

    /// Copies a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for invalid requests, or the
    /// driver's error scoped to the service.
    #[instrument(skip(self, ctx, request))]
    pub async fn snapshot_copy(
        &self,
        ctx: &RequestContext,
        service: &str,
        snapshot_id: &str,
        request: &SnapshotCopyRequest,
    ) -> Result<Snapshot> {
        require_id(snapshot_id, "snapshot")?;
        request.validate()?;
        let svc = self.services.get(service)?;
        scoped(svc, ctx.mutate(svc.driver().snapshot_copy(snapshot_id, request))).await
    }

    /// Removes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown services or
    /// snapshots.
    #[instrument(skip(self, ctx))]
    pub async fn snapshot_remove(
        &self,
        ctx: &RequestContext,
        service: &str,
        snapshot_id: &str,
    ) -> Result<()> {
        require_id(snapshot_id, "snapshot")?;
        let svc = self.services.get(service)?;
        scoped(svc, ctx.mutate(svc.driver().snapshot_remove(snapshot_id))).await?;
        info!(service, snapshot_id, "snapshot removed");
        Ok(())
    }

    /// Executors available for download.
    #[must_use]
    pub fn executors(&self) -> Vec<ExecutorInfo> {
        self.executors.list()
    }

    /// Describes one executor.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown executors.
    pub fn executor_inspect(&self, name: &str) -> Result<ExecutorInfo> {
        self.executors.inspect(name)
    }

    /// Reads an executor's bytes, re-checking its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown executors or
    /// [`StorageError::Internal`] when the file changed since startup.
    pub fn executor_fetch(&self, name: &str) -> Result<Vec<u8>> {
        self.executors.fetch(name)
    }

    /// This process's instance ID for a service's driver.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] when the driver relies on the
    /// caller's executor, or a resolution error.
    #[instrument(skip(self, ctx))]
    pub async fn instance_id(&self, ctx: &RequestContext, service: &str) -> Result<InstanceId> {
        let svc = self.services.get(service)?;
        scoped(svc, ctx.read(svc.instance_id())).await
    }
}

async fn list_volumes(
    ctx: &RequestContext,
    service: &Service,
    attachments: VolumeAttachments,
) -> Result<Vec<Volume>> {
    scoped(service, async {
        let instance = visibility_instance(ctx, service, attachments).await?;
        let volumes = ctx.read(service.driver().volumes(attachments)).await?;
        let devices = ctx.local_devices(service.driver().name());
        let visible: Vec<Volume> = volumes
            .into_iter()
            .filter_map(|volume| volume.apply_visibility(attachments, instance.as_ref(), devices))
            .collect();
        debug!(service = service.name(), count = visible.len(), "volumes listed");
        Ok(visible)
    })
    .await
}

/// The caller's instance ID when `attachments` filters by instance.
async fn visibility_instance(
    ctx: &RequestContext,
    service: &Service,
    attachments: VolumeAttachments,
) -> Result<Option<InstanceId>> {
    if attachments.requires_instance() {
        caller_instance(ctx, service).await.map(Some)
    } else {
        Ok(ctx.instance_id(service.driver().name()).cloned())
    }
}

/// The caller's instance ID from the context, or the one this process
/// computes when the driver can do so without an executor.
async fn caller_instance(ctx: &RequestContext, service: &Service) -> Result<InstanceId> {
    if let Some(instance) = ctx.instance_id(service.driver().name()) {
        return Ok(instance.clone());
    }
    match ctx.read(service.instance_id()).await {
        Err(StorageError::Unsupported(_)) => Err(StorageError::Validation(format!(
            "an instance ID for driver {} is required",
            service.driver().name()
        ))),
        other => other,
    }
}

async fn scoped<T>(service: &Service, operation: impl Future<Output = Result<T>>) -> Result<T> {
    operation.await.map_err(|err| err.scoped(service.name()))
}

fn require_id(id: &str, resource: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(StorageError::Validation(format!("{resource} ID is required")));
    }
    Ok(())
}

fn with_service_opts(service: &Service, request: &VolumeCreateRequest) -> VolumeCreateRequest {
    let mut merged = request.clone();
    for (key, value) in &service.config().extra {
        merged
            .opts
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    merged
}
