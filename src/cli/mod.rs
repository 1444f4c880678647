//! Command-line interface definitions for the `stevedore` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! depends on clap alone for that reason.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `stevedore` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stevedore",
    about = "Inspect and manage volumes across configured storage services",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv). `RUST_LOG` overrides it.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Do not send local device maps; attachments then carry no mount points.
    #[arg(long, global = true)]
    pub(crate) no_local_devices: bool,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations exposed by the CLI.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// List every configured service.
    #[command(name = "services")]
    Services,
    /// Inspect one service.
    #[command(name = "service", subcommand)]
    Service(ServiceCommand),
    /// List volumes of every service, or of one with --service.
    #[command(name = "volumes")]
    Volumes(ListVolumes),
    /// Operate on one volume.
    #[command(name = "volume", subcommand)]
    Volume(VolumeCommand),
    /// List snapshots of every service, or of one with --service.
    #[command(name = "snapshots")]
    Snapshots(ListSnapshots),
    /// Operate on one snapshot.
    #[command(name = "snapshot", subcommand)]
    Snapshot(SnapshotCommand),
    /// List executors served for download.
    #[command(name = "executors")]
    Executors,
    /// Print this host's instance ID for a service.
    #[command(name = "instance-id")]
    InstanceId(ServiceArg),
}

/// Service selection shared by single-service commands.
#[derive(Debug, Args)]
pub(crate) struct ServiceArg {
    /// Service to address. Defaults to the service named after the default
    /// driver.
    #[arg(short, long, value_name = "SERVICE")]
    pub(crate) service: Option<String>,
}

/// `stevedore service` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum ServiceCommand {
    /// Describe a service and its driver.
    Inspect {
        /// Service name.
        name: String,
    },
}

/// Attachment visibility selectable on listings and inspection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum AttachmentMode {
    /// Omit attachments.
    #[default]
    None,
    /// Only this host's attachment, without device names.
    Instance,
    /// Only this host's attachment, with device names and mount points.
    Devices,
    /// Every attachment.
    Any,
    /// Only volumes with no attachments.
    Unattached,
}

/// Arguments for `stevedore volumes`.
#[derive(Debug, Args)]
pub(crate) struct ListVolumes {
    /// Limit the listing to one service.
    #[arg(short, long, value_name = "SERVICE")]
    pub(crate) service: Option<String>,
    /// Attachment visibility.
    #[arg(short, long, value_enum, default_value_t)]
    pub(crate) attachments: AttachmentMode,
}

/// Arguments for `stevedore snapshots`.
#[derive(Debug, Args)]
pub(crate) struct ListSnapshots {
    /// Limit the listing to one service.
    #[arg(short, long, value_name = "SERVICE")]
    pub(crate) service: Option<String>,
}

/// `stevedore volume` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum VolumeCommand {
    /// Inspect a volume.
    Inspect {
        #[command(flatten)]
        target: ServiceArg,
        /// Volume ID.
        volume_id: String,
        /// Attachment visibility.
        #[arg(short, long, value_enum, default_value_t)]
        attachments: AttachmentMode,
    },
    /// Create a volume.
    Create {
        #[command(flatten)]
        target: ServiceArg,
        #[command(flatten)]
        spec: VolumeSpec,
    },
    /// Remove a volume. Removing a missing volume fails.
    Remove {
        #[command(flatten)]
        target: ServiceArg,
        /// Volume ID.
        volume_id: String,
        /// Remove even when attached, where the backend allows it.
        #[arg(long)]
        force: bool,
    },
    /// Attach a volume to this host.
    Attach {
        #[command(flatten)]
        target: ServiceArg,
        /// Volume ID.
        volume_id: String,
        /// Device name to request instead of asking the executor.
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,
        /// Re-attach when this host already holds the volume.
        #[arg(long)]
        force: bool,
        /// Extra option as KEY=VALUE. Values parse as JSON when they can.
        #[arg(long = "opt", value_name = "KEY=VALUE")]
        opts: Vec<String>,
    },
    /// Detach a volume from this host.
    Detach {
        #[command(flatten)]
        target: ServiceArg,
        /// Volume ID.
        volume_id: String,
        /// Detach every host.
        #[arg(long)]
        force: bool,
        /// Extra option as KEY=VALUE. Values parse as JSON when they can.
        #[arg(long = "opt", value_name = "KEY=VALUE")]
        opts: Vec<String>,
    },
    /// Snapshot a volume.
    Snapshot {
        #[command(flatten)]
        target: ServiceArg,
        /// Source volume ID.
        volume_id: String,
        /// Name of the new snapshot.
        snapshot_name: String,
        /// Extra option as KEY=VALUE. Values parse as JSON when they can.
        #[arg(long = "opt", value_name = "KEY=VALUE")]
        opts: Vec<String>,
    },
    /// Copy a volume.
    Copy {
        #[command(flatten)]
        target: ServiceArg,
        /// Source volume ID.
        volume_id: String,
        /// Name of the new volume.
        volume_name: String,
        /// Extra option as KEY=VALUE. Values parse as JSON when they can.
        #[arg(long = "opt", value_name = "KEY=VALUE")]
        opts: Vec<String>,
    },
}

/// Fields of a volume creation request.
#[derive(Debug, Args)]
pub(crate) struct VolumeSpec {
    /// Volume name. Some drivers accept `pool.name`.
    pub(crate) name: String,
    /// Size in GiB.
    #[arg(long)]
    pub(crate) size: Option<i64>,
    /// Provisioned IOPS.
    #[arg(long)]
    pub(crate) iops: Option<i64>,
    /// Volume type.
    #[arg(long = "type", value_name = "TYPE")]
    pub(crate) volume_type: Option<String>,
    /// Availability zone.
    #[arg(long, value_name = "ZONE")]
    pub(crate) availability_zone: Option<String>,
    /// Extra option as KEY=VALUE. Values parse as JSON when they can.
    #[arg(long = "opt", value_name = "KEY=VALUE")]
    pub(crate) opts: Vec<String>,
}

/// `stevedore snapshot` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum SnapshotCommand {
    /// Inspect a snapshot.
    Inspect {
        #[command(flatten)]
        target: ServiceArg,
        /// Snapshot ID.
        snapshot_id: String,
    },
    /// Remove a snapshot.
    Remove {
        #[command(flatten)]
        target: ServiceArg,
        /// Snapshot ID.
        snapshot_id: String,
    },
    /// Copy a snapshot.
    Copy {
        #[command(flatten)]
        target: ServiceArg,
        /// Source snapshot ID.
        snapshot_id: String,
        /// Name of the new snapshot.
        snapshot_name: String,
        /// Destination region or pool, when the backend supports one.
        #[arg(long, value_name = "ID")]
        dest_id: Option<String>,
        /// Extra option as KEY=VALUE. Values parse as JSON when they can.
        #[arg(long = "opt", value_name = "KEY=VALUE")]
        opts: Vec<String>,
    },
    /// Create a volume from a snapshot.
    CreateVolume {
        #[command(flatten)]
        target: ServiceArg,
        /// Source snapshot ID.
        snapshot_id: String,
        #[command(flatten)]
        spec: VolumeSpec,
    },
}
