//! Leaf-operation boundary between tasks and the machine.
//!
//! Every task delegates its side effect to a [`Platform`]. Implementations own
//! the details (mount flags, service supervision, disk layout); the engine only
//! sees success or a [`PlatformError`].

use async_trait::async_trait;
use machined_core::{ConfigSection, InstallOptions, MachineConfig, RecoverSource};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::core::TaskContext;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

impl PlatformError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Early system preparation steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStep {
    EnforceKernelRequirements,
    SetupSystemDirectory,
    MountPseudoFilesystems,
    SetRLimit,
    WriteIMAPolicy,
    CreateSystemCgroups,
    CreateOSReleaseFile,
    SetUserEnvVars,
    SetupVarDirectory,
    WriteUserFiles,
    WriteUserSysctls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountTarget {
    StatePartition,
    EphemeralPartition,
    Overlay,
    UserDisks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Udevd,
    Machined,
    Containerd,
    Etcd,
    Kubelet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOp {
    CordonAndDrain,
    RemoveAllPods,
    LeaveEtcd,
    BootstrapEtcd,
    BootstrapKubernetes,
    LabelControlPlane,
    RestoreEtcdSnapshot(PathBuf),
    RenderControlPlaneManifests(RecoverSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WipeTarget {
    SystemDisk,
    Partitions(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Reboot,
    PowerOff,
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn prepare_system(&self, ctx: &TaskContext, step: SystemStep) -> PlatformResult<()>;

    async fn mount(&self, ctx: &TaskContext, target: MountTarget) -> PlatformResult<()>;

    async fn unmount(&self, ctx: &TaskContext, target: MountTarget) -> PlatformResult<()>;

    async fn start_service(&self, ctx: &TaskContext, service: Service) -> PlatformResult<()>;

    async fn stop_service(&self, ctx: &TaskContext, service: Service) -> PlatformResult<()>;

    async fn start_all_services(&self, ctx: &TaskContext) -> PlatformResult<()>;

    async fn stop_all_services(&self, ctx: &TaskContext) -> PlatformResult<()>;

    /// Acquire the machine configuration (kernel argument source, disk, cloud metadata).
    async fn load_config(&self, ctx: &TaskContext) -> PlatformResult<MachineConfig>;

    async fn save_config(&self, ctx: &TaskContext, config: &MachineConfig) -> PlatformResult<()>;

    async fn apply_config_section(
        &self,
        ctx: &TaskContext,
        section: ConfigSection,
        config: &MachineConfig,
    ) -> PlatformResult<()>;

    async fn install(&self, ctx: &TaskContext, options: &InstallOptions) -> PlatformResult<()>;

    async fn verify_install(&self, ctx: &TaskContext) -> PlatformResult<()>;

    async fn verify_disk(&self, ctx: &TaskContext, disk: &str) -> PlatformResult<()>;

    /// A single pull attempt; callers wrap it in their retry policy.
    async fn pull_image(&self, ctx: &TaskContext, reference: &str) -> PlatformResult<()>;

    /// A single import attempt; callers wrap it in their retry policy.
    async fn import_image(&self, ctx: &TaskContext, path: &Path) -> PlatformResult<()>;

    async fn stage_upgrade(&self, ctx: &TaskContext, image: &str) -> PlatformResult<()>;

    async fn cluster(&self, ctx: &TaskContext, op: ClusterOp) -> PlatformResult<()>;

    async fn wipe(&self, ctx: &TaskContext, target: WipeTarget) -> PlatformResult<()>;

    async fn power(&self, ctx: &TaskContext, action: PowerAction) -> PlatformResult<()>;
}

/// Platform that logs every operation and performs none of them.
#[derive(Debug, Clone, Default)]
pub struct DryRunPlatform {
    config: Option<MachineConfig>,
}

impl DryRunPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: MachineConfig) -> Self {
        self.config = Some(config);
        self
    }

    fn record(&self, ctx: &TaskContext, operation: impl std::fmt::Debug) {
        info!(
            sequence = %ctx.sequence,
            phase = %ctx.phase,
            task = %ctx.task,
            operation = ?operation,
            "dry-run"
        );
    }
}

#[async_trait]
impl Platform for DryRunPlatform {
    async fn prepare_system(&self, ctx: &TaskContext, step: SystemStep) -> PlatformResult<()> {
        self.record(ctx, step);
        Ok(())
    }

    async fn mount(&self, ctx: &TaskContext, target: MountTarget) -> PlatformResult<()> {
        self.record(ctx, ("mount", target));
        Ok(())
    }

    async fn unmount(&self, ctx: &TaskContext, target: MountTarget) -> PlatformResult<()> {
        self.record(ctx, ("unmount", target));
        Ok(())
    }

    async fn start_service(&self, ctx: &TaskContext, service: Service) -> PlatformResult<()> {
        self.record(ctx, ("start", service));
        Ok(())
    }

    async fn stop_service(&self, ctx: &TaskContext, service: Service) -> PlatformResult<()> {
        self.record(ctx, ("stop", service));
        Ok(())
    }

    async fn start_all_services(&self, ctx: &TaskContext) -> PlatformResult<()> {
        self.record(ctx, "start all services");
        Ok(())
    }

    async fn stop_all_services(&self, ctx: &TaskContext) -> PlatformResult<()> {
        self.record(ctx, "stop all services");
        Ok(())
    }

    async fn load_config(&self, ctx: &TaskContext) -> PlatformResult<MachineConfig> {
        self.record(ctx, "load config");
        self.config
            .clone()
            .ok_or_else(|| PlatformError::NotFound("machine configuration".to_string()))
    }

    async fn save_config(&self, ctx: &TaskContext, _config: &MachineConfig) -> PlatformResult<()> {
        self.record(ctx, "save config");
        Ok(())
    }

    async fn apply_config_section(
        &self,
        ctx: &TaskContext,
        section: ConfigSection,
        _config: &MachineConfig,
    ) -> PlatformResult<()> {
        self.record(ctx, ("apply", section));
        Ok(())
    }

    async fn install(&self, ctx: &TaskContext, options: &InstallOptions) -> PlatformResult<()> {
        self.record(ctx, options);
        Ok(())
    }

    async fn verify_install(&self, ctx: &TaskContext) -> PlatformResult<()> {
        self.record(ctx, "verify install");
        Ok(())
    }

    async fn verify_disk(&self, ctx: &TaskContext, disk: &str) -> PlatformResult<()> {
        self.record(ctx, ("verify disk", disk));
        Ok(())
    }

    async fn pull_image(&self, ctx: &TaskContext, reference: &str) -> PlatformResult<()> {
        self.record(ctx, ("pull", reference));
        Ok(())
    }

    async fn import_image(&self, ctx: &TaskContext, path: &Path) -> PlatformResult<()> {
        self.record(ctx, ("import", path));
        Ok(())
    }

    async fn stage_upgrade(&self, ctx: &TaskContext, image: &str) -> PlatformResult<()> {
        self.record(ctx, ("stage upgrade", image));
        Ok(())
    }

    async fn cluster(&self, ctx: &TaskContext, op: ClusterOp) -> PlatformResult<()> {
        self.record(ctx, op);
        Ok(())
    }

    async fn wipe(&self, ctx: &TaskContext, target: WipeTarget) -> PlatformResult<()> {
        self.record(ctx, target);
        Ok(())
    }

    async fn power(&self, ctx: &TaskContext, action: PowerAction) -> PlatformResult<()> {
        self.record(ctx, action);
        Ok(())
    }
}
