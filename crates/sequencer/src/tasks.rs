//! Task library used by the planner.
//!
//! Every task is a thin wrapper that hands its side effect to the runtime's
//! [`Platform`](crate::platform::Platform). Names are the identifiers that
//! appear in plans and logs.

use machined_core::{
    ConfigSection, InstallOptions, MachineConfig, PlatformMode, RecoverSource, UpgradeRequest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::{Task, TaskMode};
use crate::error::{TaskError, TaskResult};
use crate::platform::{ClusterOp, MountTarget, PowerAction, Service, SystemStep, WipeTarget};
use crate::runtime::Runtime;
use crate::services::image;

/// Archive of system images bundled with the OS.
pub const SYSTEM_IMAGES_ARCHIVE: &str = "/usr/images/system.tar";

fn require_config(runtime: &Runtime) -> Result<MachineConfig, TaskError> {
    runtime
        .config()
        .ok_or_else(|| TaskError::failed("machine configuration is not loaded"))
}

/// Checks a configuration document against what this machine can act on.
pub fn validate(config: &MachineConfig, mode: PlatformMode) -> TaskResult {
    if !mode.is_container() && config.install.disk.is_empty() {
        return Err(TaskError::failed("install disk is not set"));
    }
    if config.hostname.as_deref() == Some("") {
        return Err(TaskError::failed("hostname must not be empty"));
    }
    if let Some(file) = config.files.iter().find(|f| !f.path.starts_with('/')) {
        return Err(TaskError::failed(format!(
            "file path {:?} is not absolute",
            file.path
        )));
    }
    Ok(())
}

fn system_step(name: &'static str, mode: TaskMode, step: SystemStep) -> Task {
    Task::new(name, mode, move |ctx, runtime| async move {
        runtime.platform().prepare_system(&ctx, step).await?;
        Ok(())
    })
}

fn mount(name: &'static str, target: MountTarget) -> Task {
    Task::exclusive(name, move |ctx, runtime| async move {
        runtime.platform().mount(&ctx, target).await?;
        Ok(())
    })
}

fn unmount(name: &'static str, target: MountTarget) -> Task {
    Task::concurrent(name, move |ctx, runtime| async move {
        runtime.platform().unmount(&ctx, target).await?;
        Ok(())
    })
}

fn start_service(name: &'static str, service: Service) -> Task {
    Task::exclusive(name, move |ctx, runtime| async move {
        runtime.platform().start_service(&ctx, service).await?;
        Ok(())
    })
}

fn stop_service(name: &'static str, service: Service) -> Task {
    Task::exclusive(name, move |ctx, runtime| async move {
        runtime.platform().stop_service(&ctx, service).await?;
        Ok(())
    })
}

fn cluster(name: &'static str, op: ClusterOp) -> Task {
    Task::exclusive(name, move |ctx, runtime| {
        let op = op.clone();
        async move {
            runtime.platform().cluster(&ctx, op).await?;
            Ok(())
        }
    })
}

fn power(name: &'static str, action: PowerAction) -> Task {
    Task::exclusive(name, move |ctx, runtime| async move {
        runtime.platform().power(&ctx, action).await?;
        Ok(())
    })
}

// System preparation

pub fn enforce_kernel_requirements() -> Task {
    system_step(
        "enforceKernelRequirements",
        TaskMode::Concurrent,
        SystemStep::EnforceKernelRequirements,
    )
}

pub fn setup_system_directory() -> Task {
    system_step(
        "setupSystemDirectory",
        TaskMode::Concurrent,
        SystemStep::SetupSystemDirectory,
    )
}

pub fn mount_pseudo_filesystems() -> Task {
    system_step(
        "mountPseudoFilesystems",
        TaskMode::Concurrent,
        SystemStep::MountPseudoFilesystems,
    )
}

pub fn set_rlimit() -> Task {
    system_step("setRLimit", TaskMode::Concurrent, SystemStep::SetRLimit)
}

pub fn write_ima_policy() -> Task {
    system_step("writeIMAPolicy", TaskMode::Exclusive, SystemStep::WriteIMAPolicy)
}

pub fn create_system_cgroups() -> Task {
    system_step(
        "createSystemCgroups",
        TaskMode::Concurrent,
        SystemStep::CreateSystemCgroups,
    )
}

pub fn create_os_release_file() -> Task {
    system_step(
        "createOSReleaseFile",
        TaskMode::Concurrent,
        SystemStep::CreateOSReleaseFile,
    )
}

pub fn set_user_env_vars() -> Task {
    system_step("setUserEnvVars", TaskMode::Exclusive, SystemStep::SetUserEnvVars)
}

pub fn setup_var_directory() -> Task {
    system_step(
        "setupVarDirectory",
        TaskMode::Exclusive,
        SystemStep::SetupVarDirectory,
    )
}

pub fn write_user_files() -> Task {
    system_step("writeUserFiles", TaskMode::Concurrent, SystemStep::WriteUserFiles)
}

pub fn write_user_sysctls() -> Task {
    system_step(
        "writeUserSysctls",
        TaskMode::Concurrent,
        SystemStep::WriteUserSysctls,
    )
}

// Services

pub fn start_udevd() -> Task {
    start_service("startUdevd", Service::Udevd)
}

pub fn start_machined() -> Task {
    start_service("startMachined", Service::Machined)
}

pub fn start_containerd() -> Task {
    start_service("startContainerd", Service::Containerd)
}

pub fn start_etcd() -> Task {
    start_service("startEtcd", Service::Etcd)
}

pub fn stop_etcd() -> Task {
    stop_service("stopEtcd", Service::Etcd)
}

pub fn start_all_services() -> Task {
    Task::exclusive("startAllServices", |ctx, runtime| async move {
        runtime.platform().start_all_services(&ctx).await?;
        Ok(())
    })
}

pub fn stop_all_services() -> Task {
    Task::exclusive("stopAllServices", |ctx, runtime| async move {
        runtime.platform().stop_all_services(&ctx).await?;
        Ok(())
    })
}

/// Stops the workloads that hold the system disk before an in-place upgrade.
pub fn stop_services_for_upgrade() -> Task {
    Task::exclusive("stopServicesForUpgrade", |ctx, runtime| async move {
        let platform = runtime.platform();
        platform.stop_service(&ctx, Service::Kubelet).await?;
        if runtime.state().is_control_plane() {
            platform.stop_service(&ctx, Service::Etcd).await?;
        }
        Ok(())
    })
}

pub fn import_system_images() -> Task {
    Task::exclusive("importSystemImages", |ctx, runtime| async move {
        let settings = runtime.settings().import;
        image::import(
            runtime.platform().as_ref(),
            &ctx,
            Path::new(SYSTEM_IMAGES_ARCHIVE),
            &settings,
        )
        .await
    })
}

// Configuration

pub fn load_config() -> Task {
    Task::exclusive("loadConfig", |ctx, runtime| async move {
        let config = runtime.platform().load_config(&ctx).await?;
        info!(
            machine_type = config.machine_type.as_str(),
            "Machine configuration loaded"
        );
        runtime.set_config(config);
        Ok(())
    })
}

pub fn validate_config() -> Task {
    Task::exclusive("validateConfig", |_ctx, runtime| async move {
        let config = require_config(&runtime)?;
        validate(&config, runtime.state().mode)
    })
}

pub fn save_config() -> Task {
    Task::exclusive("saveConfig", |ctx, runtime| async move {
        let config = require_config(&runtime)?;
        runtime.platform().save_config(&ctx, &config).await?;
        Ok(())
    })
}

pub fn validate_new_config(config: Arc<MachineConfig>) -> Task {
    Task::exclusive("validateNewConfig", move |_ctx, runtime| {
        let config = config.clone();
        async move { validate(&config, runtime.state().mode) }
    })
}

pub fn save_new_config(config: Arc<MachineConfig>) -> Task {
    Task::exclusive("saveNewConfig", move |ctx, runtime| {
        let config = config.clone();
        async move {
            runtime.platform().save_config(&ctx, &config).await?;
            Ok(())
        }
    })
}

/// Hot-apply one changed section of `config`.
pub fn apply_config_section(section: ConfigSection, config: Arc<MachineConfig>) -> Task {
    let name = match section {
        ConfigSection::Network => "applyNetwork",
        ConfigSection::Sysctls => "applySysctls",
        ConfigSection::Files => "applyFiles",
        ConfigSection::UserDisks => "applyUserDisks",
    };
    Task::concurrent(name, move |ctx, runtime| {
        let config = config.clone();
        async move {
            runtime
                .platform()
                .apply_config_section(&ctx, section, &config)
                .await?;
            Ok(())
        }
    })
}

/// Make `config` the runtime's active configuration.
pub fn activate_config(config: Arc<MachineConfig>) -> Task {
    Task::exclusive("activateConfig", move |_ctx, runtime| {
        let config = config.clone();
        async move {
            runtime.set_config(config.as_ref().clone());
            debug!("New machine configuration activated");
            Ok(())
        }
    })
}

// Install and upgrade

pub fn install() -> Task {
    Task::exclusive("install", |ctx, runtime| async move {
        let config = require_config(&runtime)?;
        let options = InstallOptions::from_config(&config.install);
        info!(disk = %options.disk, image = %options.image, "Installing");
        runtime.platform().install(&ctx, &options).await?;
        runtime.set_installed(true);
        Ok(())
    })
}

pub fn verify_install() -> Task {
    Task::exclusive("verifyInstall", |ctx, runtime| async move {
        runtime.platform().verify_install(&ctx).await?;
        Ok(())
    })
}

pub fn verify_disk() -> Task {
    Task::exclusive("verifyDisk", |ctx, runtime| async move {
        let config = require_config(&runtime)?;
        runtime.platform().verify_disk(&ctx, &config.install.disk).await?;
        Ok(())
    })
}

pub fn pull_installer_image(reference: impl Into<String>) -> Task {
    let reference: Arc<str> = reference.into().into();
    Task::exclusive("pullInstallerImage", move |ctx, runtime| {
        let reference = reference.clone();
        async move {
            let settings = runtime.settings().pull;
            image::pull(runtime.platform().as_ref(), &ctx, &reference, &settings).await
        }
    })
}

pub fn stage_upgrade(reference: impl Into<String>) -> Task {
    let reference: Arc<str> = reference.into().into();
    Task::exclusive("stageUpgrade", move |ctx, runtime| {
        let reference = reference.clone();
        async move {
            runtime.platform().stage_upgrade(&ctx, &reference).await?;
            Ok(())
        }
    })
}

pub fn install_upgrade(request: &UpgradeRequest) -> Task {
    let (image, force) = (request.image.clone(), request.force);
    Task::exclusive("installUpgrade", move |ctx, runtime| {
        let image = image.clone();
        async move {
            let config = require_config(&runtime)?;
            let options = InstallOptions::from_config(&config.install).for_upgrade(image, force);
            info!(disk = %options.disk, image = %options.image, force, "Installing upgrade");
            runtime.platform().install(&ctx, &options).await?;
            Ok(())
        }
    })
}

// Filesystems

pub fn mount_state_partition() -> Task {
    mount("mountStatePartition", MountTarget::StatePartition)
}

pub fn unmount_state_partition() -> Task {
    unmount("unmountStatePartition", MountTarget::StatePartition)
}

pub fn mount_ephemeral_partition() -> Task {
    mount("mountEphemeralPartition", MountTarget::EphemeralPartition)
}

pub fn unmount_ephemeral_partition() -> Task {
    unmount("unmountEphemeralPartition", MountTarget::EphemeralPartition)
}

pub fn mount_overlay() -> Task {
    mount("mountOverlay", MountTarget::Overlay)
}

pub fn unmount_overlay() -> Task {
    unmount("unmountOverlay", MountTarget::Overlay)
}

pub fn mount_user_disks() -> Task {
    mount("mountUserDisks", MountTarget::UserDisks)
}

pub fn unmount_user_disks() -> Task {
    unmount("unmountUserDisks", MountTarget::UserDisks)
}

// Cluster membership

pub fn cordon_and_drain_node() -> Task {
    cluster("cordonAndDrainNode", ClusterOp::CordonAndDrain)
}

pub fn remove_all_pods() -> Task {
    cluster("removeAllPods", ClusterOp::RemoveAllPods)
}

pub fn leave_etcd() -> Task {
    cluster("leaveEtcd", ClusterOp::LeaveEtcd)
}

/// Only a control plane node can found a new etcd cluster.
pub fn bootstrap_etcd() -> Task {
    Task::exclusive("bootstrapEtcd", |ctx, runtime| async move {
        let state = runtime.state();
        if !state.is_control_plane() {
            let machine_type = state
                .machine_type()
                .map(|t| t.as_str())
                .unwrap_or("unconfigured");
            return Err(TaskError::failed(format!(
                "etcd can only be bootstrapped on a control plane node (machine type: {machine_type})"
            )));
        }
        runtime.platform().cluster(&ctx, ClusterOp::BootstrapEtcd).await?;
        Ok(())
    })
}

pub fn bootstrap_kubernetes() -> Task {
    cluster("bootstrapKubernetes", ClusterOp::BootstrapKubernetes)
}

pub fn label_control_plane() -> Task {
    cluster("labelControlPlane", ClusterOp::LabelControlPlane)
}

pub fn restore_etcd_snapshot(path: PathBuf) -> Task {
    cluster("restoreEtcdSnapshot", ClusterOp::RestoreEtcdSnapshot(path))
}

pub fn render_control_plane_manifests(source: RecoverSource) -> Task {
    cluster(
        "renderControlPlaneManifests",
        ClusterOp::RenderControlPlaneManifests(source),
    )
}

// Disks and power

pub fn wipe_system_disk() -> Task {
    Task::exclusive("wipeSystemDisk", |ctx, runtime| async move {
        runtime.platform().wipe(&ctx, WipeTarget::SystemDisk).await?;
        Ok(())
    })
}

pub fn wipe_system_disk_partitions(labels: Vec<String>) -> Task {
    Task::exclusive("wipeSystemDiskPartitions", move |ctx, runtime| {
        let labels = labels.clone();
        async move {
            runtime
                .platform()
                .wipe(&ctx, WipeTarget::Partitions(labels))
                .await?;
            Ok(())
        }
    })
}

pub fn reboot() -> Task {
    power("reboot", PowerAction::Reboot)
}

pub fn power_off() -> Task {
    power("powerOff", PowerAction::PowerOff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::DryRunPlatform;
    use crate::runtime::MachineState;
    use crate::core::TaskContext;
    use machined_core::{MachineFile, MachineType, Sequence};
    use tokio_util::sync::CancellationToken;

    fn runtime(state: MachineState, platform: DryRunPlatform) -> Arc<Runtime> {
        Arc::new(Runtime::new(state, Arc::new(platform)))
    }

    async fn run(task: &Task, runtime: &Arc<Runtime>) -> TaskResult {
        let ctx = TaskContext::new(Sequence::Boot, "test", task.name(), CancellationToken::new());
        task.run(ctx, runtime.clone()).await
    }

    fn control_plane() -> MachineConfig {
        MachineConfig::new(MachineType::ControlPlane)
    }

    #[test]
    fn test_validate_requires_install_disk_on_metal() {
        let mut config = control_plane();
        config.install.disk.clear();

        assert!(validate(&config, PlatformMode::Metal).is_err());
        assert!(validate(&config, PlatformMode::Container).is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_file_paths() {
        let mut config = control_plane();
        config.files.push(MachineFile {
            path: "etc/motd".to_string(),
            content: "hello".to_string(),
            permissions: 0o644,
        });

        let err = validate(&config, PlatformMode::Metal).unwrap_err();
        assert!(err.to_string().contains("etc/motd"));
    }

    #[tokio::test]
    async fn test_load_config_populates_runtime() {
        let runtime = runtime(
            MachineState::default(),
            DryRunPlatform::new().with_config(control_plane()),
        );

        run(&load_config(), &runtime).await.unwrap();
        assert!(runtime.state().is_control_plane());
    }

    #[tokio::test]
    async fn test_load_config_missing_fails() {
        let runtime = runtime(MachineState::default(), DryRunPlatform::new());

        let err = run(&load_config(), &runtime).await.unwrap_err();
        assert!(matches!(err, TaskError::Platform(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_save_config_without_config_fails() {
        let runtime = runtime(MachineState::default(), DryRunPlatform::new());

        let err = run(&save_config(), &runtime).await.unwrap_err();
        assert!(err.to_string().contains("not loaded"));
    }

    #[tokio::test]
    async fn test_install_marks_runtime_installed() {
        let runtime = runtime(
            MachineState::default().with_config(control_plane()),
            DryRunPlatform::new(),
        );

        run(&install(), &runtime).await.unwrap();
        assert!(runtime.state().installed);
    }

    #[tokio::test]
    async fn test_bootstrap_etcd_rejects_worker() {
        let runtime = runtime(
            MachineState::default().with_config(MachineConfig::new(MachineType::Worker)),
            DryRunPlatform::new(),
        );

        let err = run(&bootstrap_etcd(), &runtime).await.unwrap_err();
        assert!(err.to_string().contains("machine type: worker"));
    }

    #[tokio::test]
    async fn test_bootstrap_etcd_on_control_plane() {
        let runtime = runtime(
            MachineState::default().with_config(control_plane()),
            DryRunPlatform::new(),
        );
        assert!(run(&bootstrap_etcd(), &runtime).await.is_ok());
    }

    #[tokio::test]
    async fn test_activate_config_replaces_runtime_config() {
        let runtime = runtime(
            MachineState::default().with_config(control_plane()),
            DryRunPlatform::new(),
        );
        let mut next = MachineConfig::new(MachineType::Worker);
        next.hostname = Some("worker-1".to_string());

        run(&activate_config(Arc::new(next.clone())), &runtime)
            .await
            .unwrap();
        assert_eq!(runtime.config(), Some(next));
    }

    #[test]
    fn test_apply_section_task_names() {
        let config = Arc::new(control_plane());
        let names: Vec<String> = [
            ConfigSection::Network,
            ConfigSection::Sysctls,
            ConfigSection::Files,
            ConfigSection::UserDisks,
        ]
        .into_iter()
        .map(|s| apply_config_section(s, config.clone()).name().to_string())
        .collect();

        assert_eq!(
            names,
            vec!["applyNetwork", "applySysctls", "applyFiles", "applyUserDisks"]
        );
    }
}
