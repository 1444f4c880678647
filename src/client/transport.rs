//! Carries requests from a client to an engine.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::message::{Request, Response};
use crate::engine::{Engine, RequestContext};
use crate::error::Result;

/// Delivers one request and returns the engine's reply.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` with the caller facts in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for the request, or a transport error
    /// when the engine cannot be reached.
    async fn send(&self, ctx: &RequestContext, request: Request) -> Result<Response>;
}

/// Dispatches requests to an engine in the same process.
#[derive(Clone)]
pub struct LocalTransport {
    engine: Arc<Engine>,
}

impl fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransport").finish_non_exhaustive()
    }
}

impl LocalTransport {
    /// Wraps a shared engine.
    #[must_use]
    pub const fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// The engine requests are dispatched to.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, ctx: &RequestContext, request: Request) -> Result<Response> {
        debug!(?request, "dispatching");
        let engine = &*self.engine;
        let response = match request {
            Request::Services => Response::Services(engine.services(ctx)?),
            Request::ServiceInspect { service } => {
                Response::Service(engine.service_inspect(ctx, &service)?)
            }
            Request::Volumes { attachments } => {
                Response::Volumes(engine.volumes(ctx, attachments).await?)
            }
            Request::VolumesByService {
                service,
                attachments,
            } => Response::VolumeList(engine.volumes_by_service(ctx, &service, attachments).await?),
            Request::VolumeInspect {
                service,
                volume_id,
                attachments,
            } => Response::Volume(
                engine
                    .volume_inspect(ctx, &service, &volume_id, attachments)
                    .await?,
            ),
            Request::VolumeCreate { service, request } => {
                Response::Volume(engine.volume_create(ctx, &service, &request).await?)
            }
            Request::VolumeCreateFromSnapshot {
                service,
                snapshot_id,
                request,
            } => Response::Volume(
                engine
                    .volume_create_from_snapshot(ctx, &service, &snapshot_id, &request)
                    .await?,
            ),
            Request::VolumeCopy {
                service,
                volume_id,
                request,
            } => Response::Volume(engine.volume_copy(ctx, &service, &volume_id, &request).await?),
            Request::VolumeSnapshot {
                service,
                volume_id,
                request,
            } => Response::Snapshot(
                engine
                    .volume_snapshot(ctx, &service, &volume_id, &request)
                    .await?,
            ),
            Request::VolumeRemove {
                service,
                volume_id,
                force,
            } => {
                engine.volume_remove(ctx, &service, &volume_id, force).await?;
                Response::Ok
            }
            Request::VolumeAttach {
                service,
                volume_id,
                request,
            } => {
                let (volume, token) = engine
                    .volume_attach(ctx, &service, &volume_id, &request)
                    .await?;
                Response::Attached { volume, token }
            }
            Request::VolumeDetach {
                service,
                volume_id,
                request,
            } => Response::Volume(
                engine
                    .volume_detach(ctx, &service, &volume_id, &request)
                    .await?,
            ),
            Request::Snapshots => Response::Snapshots(engine.snapshots(ctx).await?),
            Request::SnapshotsByService { service } => {
                Response::SnapshotList(engine.snapshots_by_service(ctx, &service).await?)
            }
            Request::SnapshotInspect {
                service,
                snapshot_id,
            } => Response::Snapshot(engine.snapshot_inspect(ctx, &service, &snapshot_id).await?),
            Request::SnapshotCopy {
                service,
                snapshot_id,
                request,
            } => Response::Snapshot(
                engine
                    .snapshot_copy(ctx, &service, &snapshot_id, &request)
                    .await?,
            ),
            Request::SnapshotRemove {
                service,
                snapshot_id,
            } => {
                engine.snapshot_remove(ctx, &service, &snapshot_id).await?;
                Response::Ok
            }
            Request::Executors => {
                ctx.ensure_live()?;
                Response::Executors(engine.executors())
            }
            Request::ExecutorInspect { name } => {
                ctx.ensure_live()?;
                Response::Executor(engine.executor_inspect(&name)?)
            }
            Request::ExecutorFetch { name } => {
                ctx.ensure_live()?;
                Response::ExecutorBytes(engine.executor_fetch(&name)?)
            }
            Request::InstanceId { service } => {
                Response::InstanceId(engine.instance_id(ctx, &service).await?)
            }
        };
        Ok(response)
    }
}
