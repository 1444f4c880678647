//! Binary entry point for the Stevedore CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use stevedore::{
    AttachToken, Client, ClientOptions, DriverRegistry, EXECUTOR_BASENAME, Engine, ErrorKind,
    LocalTransport, Opts, SnapshotCopyRequest, StevedoreConfig, StorageError, Volume,
    VolumeAttachRequest, VolumeAttachments, VolumeCopyRequest, VolumeCreateRequest,
    VolumeDetachRequest, VolumeSnapshotRequest, logging,
};

mod cli;

use cli::{
    AttachmentMode, Cli, Command, ServiceArg, ServiceCommand, SnapshotCommand, VolumeCommand,
    VolumeSpec,
};

type LocalClient = Client<LocalTransport>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid option {0:?}: expected KEY=VALUE")]
    InvalidOpt(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Storage(err) => err.kind().exit_code(),
            Self::InvalidOpt(_) => ErrorKind::Validation.exit_code(),
            Self::Config(_) => ErrorKind::Config.exit_code(),
            Self::Output(_) => ErrorKind::Internal.exit_code(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Attached {
    volume: Volume,
    attach_token: AttachToken,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config =
        StevedoreConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let engine = Engine::from_config(&config, &DriverRegistry::builtin())?;

    let mut options = ClientOptions::from_config(&config);
    if config.executor_dir.is_none() {
        options.executor_path = sibling_executor();
    }
    let mut client = Client::new(LocalTransport::new(Arc::new(engine)), options);
    client.set_local_devices_headers(!cli.no_local_devices);

    dispatch(&client, &config.default_driver, cli.command).await
}

/// The executor built alongside this binary, used when no executor
/// directory is served.
fn sibling_executor() -> Option<Utf8PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let name = format!("{EXECUTOR_BASENAME}{}", std::env::consts::EXE_SUFFIX);
    let path = Utf8PathBuf::from_path_buf(exe.with_file_name(name)).ok()?;
    path.is_file().then_some(path)
}

async fn dispatch(client: &LocalClient, primary: &str, command: Command) -> Result<(), CliError> {
    match command {
        Command::Services => emit(&client.services().await?),
        Command::Service(ServiceCommand::Inspect { name }) => {
            emit(&client.service_inspect(&name).await?)
        }
        Command::Volumes(args) => {
            let attachments = attachment_mode(args.attachments);
            match args.service {
                Some(service) => emit(&client.volumes_by_service(&service, attachments).await?),
                None => emit(&client.volumes(attachments).await?),
            }
        }
        Command::Volume(volume) => volume_command(client, primary, volume).await,
        Command::Snapshots(args) => match args.service {
            Some(service) => emit(&client.snapshots_by_service(&service).await?),
            None => emit(&client.snapshots().await?),
        },
        Command::Snapshot(snapshot) => snapshot_command(client, primary, snapshot).await,
        Command::Executors => emit(&client.executors().await?),
        Command::InstanceId(target) => {
            emit(&client.instance_id(service_name(&target, primary)).await?)
        }
    }
}

async fn volume_command(
    client: &LocalClient,
    primary: &str,
    command: VolumeCommand,
) -> Result<(), CliError> {
    match command {
        VolumeCommand::Inspect {
            target,
            volume_id,
            attachments,
        } => {
            let service = service_name(&target, primary);
            let mode = attachment_mode(attachments);
            emit(&client.volume_inspect(service, &volume_id, mode).await?)
        }
        VolumeCommand::Create { target, spec } => {
            let request = create_request(spec)?;
            emit(&client.volume_create(service_name(&target, primary), &request).await?)
        }
        VolumeCommand::Remove {
            target,
            volume_id,
            force,
        } => {
            client
                .volume_remove(service_name(&target, primary), &volume_id, force)
                .await?;
            Ok(())
        }
        VolumeCommand::Attach {
            target,
            volume_id,
            device,
            force,
            opts,
        } => {
            let request = VolumeAttachRequest {
                next_device_name: device,
                force,
                opts: parse_opts(&opts)?,
            };
            let (volume, attach_token) = client
                .volume_attach(service_name(&target, primary), &volume_id, &request)
                .await?;
            emit(&Attached {
                volume,
                attach_token,
            })
        }
        VolumeCommand::Detach {
            target,
            volume_id,
            force,
            opts,
        } => {
            let request = VolumeDetachRequest {
                force,
                opts: parse_opts(&opts)?,
            };
            emit(
                &client
                    .volume_detach(service_name(&target, primary), &volume_id, &request)
                    .await?,
            )
        }
        VolumeCommand::Snapshot {
            target,
            volume_id,
            snapshot_name,
            opts,
        } => {
            let request = VolumeSnapshotRequest {
                snapshot_name,
                opts: parse_opts(&opts)?,
            };
            emit(
                &client
                    .volume_snapshot(service_name(&target, primary), &volume_id, &request)
                    .await?,
            )
        }
        VolumeCommand::Copy {
            target,
            volume_id,
            volume_name,
            opts,
        } => {
            let request = VolumeCopyRequest {
                volume_name,
                opts: parse_opts(&opts)?,
            };
            emit(
                &client
                    .volume_copy(service_name(&target, primary), &volume_id, &request)
                    .await?,
            )
        }
    }
}

async fn snapshot_command(
    client: &LocalClient,
    primary: &str,
    command: SnapshotCommand,
) -> Result<(), CliError> {
    match command {
        SnapshotCommand::Inspect {
            target,
            snapshot_id,
        } => emit(
            &client
                .snapshot_inspect(service_name(&target, primary), &snapshot_id)
                .await?,
        ),
        SnapshotCommand::Remove {
            target,
            snapshot_id,
        } => {
            client
                .snapshot_remove(service_name(&target, primary), &snapshot_id)
                .await?;
            Ok(())
        }
        SnapshotCommand::Copy {
            target,
            snapshot_id,
            snapshot_name,
            dest_id,
            opts,
        } => {
            let request = SnapshotCopyRequest {
                snapshot_name,
                dest_id,
                opts: parse_opts(&opts)?,
            };
            emit(
                &client
                    .snapshot_copy(service_name(&target, primary), &snapshot_id, &request)
                    .await?,
            )
        }
        SnapshotCommand::CreateVolume {
            target,
            snapshot_id,
            spec,
        } => {
            let request = create_request(spec)?;
            emit(
                &client
                    .volume_create_from_snapshot(service_name(&target, primary), &snapshot_id, &request)
                    .await?,
            )
        }
    }
}

fn service_name<'a>(target: &'a ServiceArg, primary: &'a str) -> &'a str {
    target.service.as_deref().unwrap_or(primary)
}

const fn attachment_mode(mode: AttachmentMode) -> VolumeAttachments {
    match mode {
        AttachmentMode::None => VolumeAttachments::None,
        AttachmentMode::Instance => VolumeAttachments::ForInstance,
        AttachmentMode::Devices => VolumeAttachments::ForInstanceWithDevices,
        AttachmentMode::Any => VolumeAttachments::AnyInstance,
        AttachmentMode::Unattached => VolumeAttachments::OnlyUnattached,
    }
}

fn create_request(spec: VolumeSpec) -> Result<VolumeCreateRequest, CliError> {
    let opts = parse_opts(&spec.opts)?;
    Ok(VolumeCreateRequest {
        name: spec.name,
        availability_zone: spec.availability_zone,
        iops: spec.iops,
        size: spec.size,
        volume_type: spec.volume_type,
        opts,
    })
}

/// Parses `KEY=VALUE` pairs. Values that parse as JSON keep their type, so
/// `priority=2` yields a number and `owner=root` a string.
fn parse_opts(pairs: &[String]) -> Result<Opts, CliError> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .ok_or_else(|| CliError::InvalidOpt(pair.clone()))?;
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
            Ok((key.trim().to_owned(), value))
        })
        .collect()
}

fn emit<T: Serialize>(value: &T) -> Result<(), CliError> {
    write_json(io::stdout().lock(), value)
}

fn write_json<T: Serialize>(mut target: impl Write, value: &T) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut target, value).map_err(io::Error::from)?;
    writeln!(target)?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn opts_keep_json_types() {
        let opts = parse_opts(&[
            String::from("priority=2"),
            String::from("owner=root@example.com"),
            String::from("tags=[\"a\"]"),
        ])
        .expect("valid pairs");

        assert_eq!(opts.get("priority"), Some(&json!(2)));
        assert_eq!(opts.get("owner"), Some(&json!("root@example.com")));
        assert_eq!(opts.get("tags"), Some(&json!(["a"])));
    }

    #[rstest]
    #[case("novalue")]
    #[case("=value")]
    fn malformed_opts_are_rejected(#[case] pair: &str) {
        let err = parse_opts(&[pair.to_owned()]).expect_err("malformed pair");
        assert!(matches!(err, CliError::InvalidOpt(_)));
        assert_eq!(err.exit_code(), ErrorKind::Validation.exit_code());
    }

    #[rstest]
    fn storage_errors_keep_their_exit_codes() {
        let err = CliError::from(StorageError::not_found("volume", "vol-9"));
        assert_eq!(err.exit_code(), ErrorKind::NotFound.exit_code());
    }

    #[rstest]
    fn unnamed_service_uses_primary() {
        let target = ServiceArg { service: None };
        assert_eq!(service_name(&target, "mock"), "mock");
        let named = ServiceArg {
            service: Some(String::from("mock2")),
        };
        assert_eq!(service_name(&named, "mock"), "mock2");
    }

    #[rstest]
    fn json_output_ends_with_newline() {
        let mut buf = Vec::new();
        write_json(&mut buf, &json!({"name": "mock"})).expect("write");
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.ends_with("}\n"), "rendered: {rendered}");
    }

    #[rstest]
    fn write_error_renders_message() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::InvalidOpt(String::from("x")));
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("expected KEY=VALUE"), "rendered: {rendered}");
    }
}
