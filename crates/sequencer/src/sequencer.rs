//! Lifecycle planning.
//!
//! A [`Sequencer`] maps a trigger, the runtime's current state and an optional
//! request to the ordered phases that carry the machine through the
//! transition. Planning never performs I/O and never fails: whether a
//! transition is feasible is for the tasks to find out.

use machined_core::{
    ApplyConfigurationRequest, RecoverRequest, RecoverSource, ResetRequest, UpgradeRequest,
};
use std::sync::Arc;

use crate::core::{Phase, PhaseList, Task};
use crate::runtime::{MachineState, Runtime};
use crate::tasks;

pub trait Sequencer: Send + Sync {
    fn apply_configuration(
        &self,
        runtime: &Runtime,
        request: &ApplyConfigurationRequest,
    ) -> Vec<Phase>;

    fn boot(&self, runtime: &Runtime) -> Vec<Phase>;

    fn bootstrap(&self, runtime: &Runtime) -> Vec<Phase>;

    fn initialize(&self, runtime: &Runtime) -> Vec<Phase>;

    fn install(&self, runtime: &Runtime) -> Vec<Phase>;

    fn reboot(&self, runtime: &Runtime) -> Vec<Phase>;

    fn recover(&self, runtime: &Runtime, request: &RecoverRequest) -> Vec<Phase>;

    fn reset(&self, runtime: &Runtime, request: &ResetRequest) -> Vec<Phase>;

    fn shutdown(&self, runtime: &Runtime) -> Vec<Phase>;

    fn upgrade(&self, runtime: &Runtime, request: &UpgradeRequest) -> Vec<Phase>;

    /// No lifecycle action.
    fn noop(&self, _runtime: &Runtime) -> Vec<Phase> {
        Vec::new()
    }
}

/// The production planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineSequencer;

impl MachineSequencer {
    pub fn new() -> Self {
        Self
    }

    /// Drain workloads, stop services and release every mount.
    fn stop_and_unmount(state: &MachineState) -> PhaseList {
        let container = state.is_container();
        PhaseList::new()
            .append_when(!container, "cleanup", vec![tasks::remove_all_pods()])
            .append("stopEverything", vec![tasks::stop_all_services()])
            .append_when(!container, "unmountUser", vec![tasks::unmount_user_disks()])
            .append_when(!container, "unmountOverlay", vec![tasks::unmount_overlay()])
            .append_when(
                !container,
                "unmountSystem",
                vec![
                    tasks::unmount_ephemeral_partition(),
                    tasks::unmount_state_partition(),
                ],
            )
    }
}

impl Sequencer for MachineSequencer {
    fn apply_configuration(
        &self,
        runtime: &Runtime,
        request: &ApplyConfigurationRequest,
    ) -> Vec<Phase> {
        let current = runtime.config().unwrap_or_default();
        let config = Arc::new(request.config.clone());

        let phases = PhaseList::new()
            .append(
                "validateConfig",
                vec![tasks::validate_new_config(config.clone())],
            )
            .append("saveConfig", vec![tasks::save_new_config(config.clone())]);

        if request.immediate {
            let mut apply: Vec<Task> = current
                .changed_sections(&request.config)
                .into_iter()
                .map(|section| tasks::apply_config_section(section, config.clone()))
                .collect();
            apply.push(tasks::activate_config(config));
            phases.append("applyConfig", apply).into_vec()
        } else if request.on_reboot {
            phases.into_vec()
        } else {
            phases.extend(self.reboot(runtime)).into_vec()
        }
    }

    fn boot(&self, runtime: &Runtime) -> Vec<Phase> {
        let state = runtime.state();
        let container = state.is_container();
        let user_disks = state
            .config
            .as_ref()
            .is_some_and(|c| !c.user_disks.is_empty());

        PhaseList::new()
            .append_when(state.config.is_none(), "config", vec![tasks::load_config()])
            .append("validateConfig", vec![tasks::validate_config()])
            .append("saveConfig", vec![tasks::save_config()])
            .append("env", vec![tasks::set_user_env_vars()])
            .append(
                "containerd",
                vec![tasks::start_containerd(), tasks::import_system_images()],
            )
            .append_when(
                !container,
                "ephemeral",
                vec![tasks::mount_ephemeral_partition()],
            )
            .append_when(!container, "verifyInstall", vec![tasks::verify_install()])
            .append("var", vec![tasks::setup_var_directory()])
            .append_when(!container, "overlay", vec![tasks::mount_overlay()])
            .append(
                "userSetup",
                vec![tasks::write_user_files(), tasks::write_user_sysctls()],
            )
            .append_when(
                !container && user_disks,
                "userDisks",
                vec![tasks::mount_user_disks()],
            )
            .append("startEverything", vec![tasks::start_all_services()])
            .append_when(
                state.is_control_plane(),
                "labelControlPlane",
                vec![tasks::label_control_plane()],
            )
            .into_vec()
    }

    fn bootstrap(&self, _runtime: &Runtime) -> Vec<Phase> {
        PhaseList::new()
            .append("etcd", vec![tasks::bootstrap_etcd()])
            .append("kubernetes", vec![tasks::bootstrap_kubernetes()])
            .append("labelControlPlane", vec![tasks::label_control_plane()])
            .into_vec()
    }

    fn initialize(&self, runtime: &Runtime) -> Vec<Phase> {
        let state = runtime.state();
        let etc = vec![
            tasks::create_system_cgroups(),
            tasks::create_os_release_file(),
        ];

        if state.is_container() {
            return PhaseList::new()
                .append(
                    "systemRequirements",
                    vec![tasks::setup_system_directory()],
                )
                .append("etc", etc)
                .append("config", vec![tasks::load_config()])
                .into_vec();
        }

        PhaseList::new()
            .append(
                "systemRequirements",
                vec![
                    tasks::enforce_kernel_requirements(),
                    tasks::setup_system_directory(),
                    tasks::mount_pseudo_filesystems(),
                    tasks::set_rlimit(),
                ],
            )
            .append("integrity", vec![tasks::write_ima_policy()])
            .append("etc", etc)
            .append("udevd", vec![tasks::start_udevd()])
            .append("machined", vec![tasks::start_machined()])
            .append("config", vec![tasks::load_config()])
            .append_when(!state.installed, "install", vec![tasks::install()])
            .append_when(!state.installed, "saveConfig", vec![tasks::save_config()])
            .append_when(!state.installed, "reboot", vec![tasks::reboot()])
            .into_vec()
    }

    fn install(&self, runtime: &Runtime) -> Vec<Phase> {
        let state = runtime.state();

        if state.is_container() {
            return Vec::new();
        }
        if state.installed {
            return PhaseList::new()
                .append("verifyInstall", vec![tasks::verify_install()])
                .into_vec();
        }

        PhaseList::new()
            .append("validateConfig", vec![tasks::validate_config()])
            .append("env", vec![tasks::set_user_env_vars()])
            .append("containerd", vec![tasks::start_containerd()])
            .append("install", vec![tasks::install()])
            .append("mountState", vec![tasks::mount_state_partition()])
            .append("saveConfig", vec![tasks::save_config()])
            .append("unmountState", vec![tasks::unmount_state_partition()])
            .append("stopEverything", vec![tasks::stop_all_services()])
            .append("reboot", vec![tasks::reboot()])
            .into_vec()
    }

    fn reboot(&self, runtime: &Runtime) -> Vec<Phase> {
        Self::stop_and_unmount(&runtime.state())
            .append("reboot", vec![tasks::reboot()])
            .into_vec()
    }

    fn recover(&self, _runtime: &Runtime, request: &RecoverRequest) -> Vec<Phase> {
        let mut phases = PhaseList::new();

        if let RecoverSource::Snapshot { path } = &request.source {
            phases = phases
                .append("stopEtcd", vec![tasks::stop_etcd()])
                .append("restore", vec![tasks::restore_etcd_snapshot(path.clone())])
                .append("startEtcd", vec![tasks::start_etcd()]);
        }

        phases
            .append(
                "recover",
                vec![tasks::render_control_plane_manifests(request.source.clone())],
            )
            .into_vec()
    }

    fn reset(&self, runtime: &Runtime, request: &ResetRequest) -> Vec<Phase> {
        let state = runtime.state();
        let graceful = request.graceful;

        let mut phases = PhaseList::new()
            .append_when(graceful, "drain", vec![tasks::cordon_and_drain_node()])
            .append_when(graceful, "cleanup", vec![tasks::remove_all_pods()])
            .append_when(
                graceful && state.is_control_plane(),
                "leave",
                vec![tasks::leave_etcd()],
            );

        if !state.is_container() {
            phases = if request.system_partitions_to_wipe.is_empty() {
                phases.append("resetSystemDisk", vec![tasks::wipe_system_disk()])
            } else {
                phases.append(
                    "resetSystemDiskPartitions",
                    vec![tasks::wipe_system_disk_partitions(
                        request.system_partitions_to_wipe.clone(),
                    )],
                )
            };
        }

        let phases = phases.append("stopEverything", vec![tasks::stop_all_services()]);
        if request.reboot {
            phases.append("reboot", vec![tasks::reboot()]).into_vec()
        } else {
            phases.append("shutdown", vec![tasks::power_off()]).into_vec()
        }
    }

    fn shutdown(&self, runtime: &Runtime) -> Vec<Phase> {
        Self::stop_and_unmount(&runtime.state())
            .append("shutdown", vec![tasks::power_off()])
            .into_vec()
    }

    fn upgrade(&self, runtime: &Runtime, request: &UpgradeRequest) -> Vec<Phase> {
        let state = runtime.state();

        let phases = PhaseList::new()
            .append("cordon", vec![tasks::cordon_and_drain_node()])
            .append_when(
                state.is_control_plane() && !request.preserve,
                "leave",
                vec![tasks::leave_etcd()],
            )
            .append(
                "pullImage",
                vec![tasks::pull_installer_image(request.image.as_str())],
            );

        if request.stage {
            return phases
                .append(
                    "stageUpgrade",
                    vec![tasks::stage_upgrade(request.image.as_str())],
                )
                .extend(self.reboot(runtime))
                .into_vec();
        }

        phases
            .append("stopServices", vec![tasks::stop_services_for_upgrade()])
            .append(
                "unmount",
                vec![tasks::unmount_user_disks(), tasks::unmount_overlay()],
            )
            .append(
                "unmountSystem",
                vec![
                    tasks::unmount_ephemeral_partition(),
                    tasks::unmount_state_partition(),
                ],
            )
            .append("verifyDisk", vec![tasks::verify_disk()])
            .append("upgrade", vec![tasks::install_upgrade(request)])
            .append("stopEverything", vec![tasks::stop_all_services()])
            .append("reboot", vec![tasks::reboot()])
            .into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::summarize;
    use crate::platform::DryRunPlatform;
    use machined_core::{MachineConfig, MachineType, PlatformMode};
    use std::path::PathBuf;

    fn runtime(state: MachineState) -> Runtime {
        Runtime::new(state, Arc::new(DryRunPlatform::new()))
    }

    fn metal(machine_type: MachineType) -> MachineState {
        MachineState::new(PlatformMode::Metal)
            .installed(true)
            .with_config(MachineConfig::new(machine_type))
    }

    fn names(phases: &[Phase]) -> Vec<&str> {
        phases.iter().map(Phase::name).collect()
    }

    #[test]
    fn test_boot_on_configured_control_plane() {
        let phases = MachineSequencer::new().boot(&runtime(metal(MachineType::ControlPlane)));
        assert_eq!(
            names(&phases),
            vec![
                "validateConfig",
                "saveConfig",
                "env",
                "containerd",
                "ephemeral",
                "verifyInstall",
                "var",
                "overlay",
                "userSetup",
                "startEverything",
                "labelControlPlane",
            ]
        );
        assert_eq!(
            phases[8].task_names(),
            vec!["writeUserFiles", "writeUserSysctls"]
        );
    }

    #[test]
    fn test_boot_without_config_loads_it_first() {
        let state = MachineState::new(PlatformMode::Metal);
        let phases = MachineSequencer::new().boot(&runtime(state));
        assert_eq!(phases[0].name(), "config");
        assert_eq!(phases[0].task_names(), vec!["loadConfig"]);
        assert!(!names(&phases).contains(&"labelControlPlane"));
    }

    #[test]
    fn test_boot_in_container_skips_disks() {
        let mut config = MachineConfig::new(MachineType::Worker);
        config.user_disks.push("/dev/sdb".to_string());
        let state = MachineState::new(PlatformMode::Container).with_config(config.clone());
        let container = names(&MachineSequencer::new().boot(&runtime(state))).join(",");
        assert_eq!(
            container,
            "validateConfig,saveConfig,env,containerd,var,userSetup,startEverything"
        );

        let state = MachineState::new(PlatformMode::Metal).with_config(config);
        let phases = MachineSequencer::new().boot(&runtime(state));
        assert!(names(&phases).contains(&"userDisks"));
    }

    #[test]
    fn test_initialize_not_installed_installs_and_reboots() {
        let state = MachineState::new(PlatformMode::Metal);
        let phases = MachineSequencer::new().initialize(&runtime(state));
        assert_eq!(
            names(&phases),
            vec![
                "systemRequirements",
                "integrity",
                "etc",
                "udevd",
                "machined",
                "config",
                "install",
                "saveConfig",
                "reboot",
            ]
        );
        assert_eq!(phases[0].batches().len(), 1);
    }

    #[test]
    fn test_initialize_installed_and_container() {
        let sequencer = MachineSequencer::new();
        let installed = MachineState::new(PlatformMode::Metal).installed(true);
        let installed = sequencer.initialize(&runtime(installed));
        assert_eq!(names(&installed).last(), Some(&"config"));

        let container = MachineState::new(PlatformMode::Container);
        let container = sequencer.initialize(&runtime(container));
        assert_eq!(names(&container), vec!["systemRequirements", "etc", "config"]);
    }

    #[test]
    fn test_install_variants() {
        let sequencer = MachineSequencer::new();

        let fresh = sequencer.install(&runtime(
            MachineState::new(PlatformMode::Metal).with_config(MachineConfig::default()),
        ));
        assert_eq!(names(&fresh).first(), Some(&"validateConfig"));
        assert_eq!(names(&fresh).last(), Some(&"reboot"));
        assert_eq!(fresh.len(), 9);

        let installed = sequencer.install(&runtime(metal(MachineType::Worker)));
        assert_eq!(names(&installed), vec!["verifyInstall"]);

        let container = sequencer.install(&runtime(MachineState::new(PlatformMode::Container)));
        assert!(container.is_empty());
    }

    #[test]
    fn test_bootstrap_same_for_every_machine_type() {
        let sequencer = MachineSequencer::new();
        let worker = summarize(&sequencer.bootstrap(&runtime(metal(MachineType::Worker))));
        let init = summarize(&sequencer.bootstrap(&runtime(metal(MachineType::Init))));
        assert_eq!(worker, init);
        assert_eq!(worker[0].tasks[0].name, "bootstrapEtcd");
    }

    #[test]
    fn test_apply_configuration_immediate_applies_changed_sections() {
        let runtime = runtime(metal(MachineType::Worker));
        let mut next = MachineConfig::new(MachineType::Worker);
        next.sysctls
            .insert("net.ipv4.ip_forward".to_string(), "1".to_string());
        next.hostname = Some("worker-1".to_string());

        let request = ApplyConfigurationRequest::new(next).immediate();
        let phases = MachineSequencer::new().apply_configuration(&runtime, &request);

        assert_eq!(
            names(&phases),
            vec!["validateConfig", "saveConfig", "applyConfig"]
        );
        assert_eq!(
            phases[2].task_names(),
            vec!["applyNetwork", "applySysctls", "activateConfig"]
        );
        assert_eq!(phases[2].batches().len(), 2);
    }

    #[test]
    fn test_apply_configuration_on_reboot_and_default() {
        let runtime = runtime(metal(MachineType::Worker));
        let sequencer = MachineSequencer::new();
        let config = MachineConfig::new(MachineType::Worker);

        let staged = sequencer.apply_configuration(
            &runtime,
            &ApplyConfigurationRequest::new(config.clone()).on_reboot(),
        );
        assert_eq!(names(&staged), vec!["validateConfig", "saveConfig"]);

        let rebooting =
            sequencer.apply_configuration(&runtime, &ApplyConfigurationRequest::new(config));
        assert_eq!(names(&rebooting).last(), Some(&"reboot"));
        assert_eq!(
            rebooting.len(),
            2 + sequencer.reboot(&runtime).len()
        );
    }

    #[test]
    fn test_upgrade_control_plane_leaves_etcd_unless_preserved() {
        let sequencer = MachineSequencer::new();
        let runtime = runtime(metal(MachineType::ControlPlane));
        let mut request = UpgradeRequest::new("ghcr.io/siderolabs/installer:v1.2.0");

        let phases = sequencer.upgrade(&runtime, &request);
        assert_eq!(
            names(&phases),
            vec![
                "cordon",
                "leave",
                "pullImage",
                "stopServices",
                "unmount",
                "unmountSystem",
                "verifyDisk",
                "upgrade",
                "stopEverything",
                "reboot",
            ]
        );

        request.preserve = true;
        let preserved = sequencer.upgrade(&runtime, &request);
        assert!(!names(&preserved).contains(&"leave"));
    }

    #[test]
    fn test_upgrade_staged_reboots_after_staging() {
        let sequencer = MachineSequencer::new();
        let runtime = runtime(metal(MachineType::Worker));
        let mut request = UpgradeRequest::new("ghcr.io/siderolabs/installer:v1.2.0");
        request.stage = true;

        let phases = sequencer.upgrade(&runtime, &request);
        let names = names(&phases);
        assert_eq!(&names[..3], &["cordon", "pullImage", "stageUpgrade"]);
        assert_eq!(names.last(), Some(&"reboot"));
        assert!(!names.contains(&"upgrade"));
    }

    #[test]
    fn test_reset_variants() {
        let sequencer = MachineSequencer::new();
        let runtime = runtime(metal(MachineType::ControlPlane));

        let graceful = sequencer.reset(&runtime, &ResetRequest::default());
        assert_eq!(
            names(&graceful),
            vec![
                "drain",
                "cleanup",
                "leave",
                "resetSystemDisk",
                "stopEverything",
                "shutdown"
            ]
        );

        let forced = sequencer.reset(
            &runtime,
            &ResetRequest {
                graceful: false,
                reboot: true,
                system_partitions_to_wipe: vec!["STATE".to_string(), "EPHEMERAL".to_string()],
            },
        );
        assert_eq!(
            names(&forced),
            vec!["resetSystemDiskPartitions", "stopEverything", "reboot"]
        );
    }

    #[test]
    fn test_reboot_and_shutdown_share_teardown() {
        let sequencer = MachineSequencer::new();
        let runtime = runtime(metal(MachineType::Worker));

        let reboot = names(&sequencer.reboot(&runtime)).join(",");
        let shutdown = names(&sequencer.shutdown(&runtime)).join(",");
        assert_eq!(
            reboot,
            "cleanup,stopEverything,unmountUser,unmountOverlay,unmountSystem,reboot"
        );
        assert_eq!(
            shutdown,
            "cleanup,stopEverything,unmountUser,unmountOverlay,unmountSystem,shutdown"
        );

        let container = runtime_in_container();
        assert_eq!(
            names(&sequencer.reboot(&container)),
            vec!["stopEverything", "reboot"]
        );
    }

    fn runtime_in_container() -> Runtime {
        runtime(MachineState::new(PlatformMode::Container))
    }

    #[test]
    fn test_recover_from_snapshot_restores_etcd_first() {
        let sequencer = MachineSequencer::new();
        let runtime = runtime(metal(MachineType::Init));

        let snapshot = sequencer.recover(
            &runtime,
            &RecoverRequest {
                source: RecoverSource::Snapshot {
                    path: PathBuf::from("/var/lib/etcd.snapshot"),
                },
            },
        );
        assert_eq!(
            names(&snapshot),
            vec!["stopEtcd", "restore", "startEtcd", "recover"]
        );

        let from_etcd = sequencer.recover(
            &runtime,
            &RecoverRequest {
                source: RecoverSource::Etcd,
            },
        );
        assert_eq!(names(&from_etcd), vec!["recover"]);
    }

    #[test]
    fn test_noop_is_empty() {
        let runtime = runtime(metal(MachineType::Worker));
        assert!(MachineSequencer::new().noop(&runtime).is_empty());
    }
}
