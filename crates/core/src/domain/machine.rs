use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Role of the machine in the cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MachineType {
    /// First control-plane member, responsible for bootstrapping the cluster.
    Init,
    ControlPlane,
    #[default]
    Worker,
}

impl MachineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ControlPlane => "control_plane",
            Self::Worker => "worker",
        }
    }

    pub fn is_control_plane(&self) -> bool {
        matches!(self, Self::Init | Self::ControlPlane)
    }
}

/// Environment the operating system is running in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformMode {
    #[default]
    Metal,
    Cloud,
    /// Running inside a container; disks and the kernel are not ours to manage.
    Container,
    Interactive,
}

impl PlatformMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metal => "metal",
            Self::Cloud => "cloud",
            Self::Container => "container",
            Self::Interactive => "interactive",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container)
    }
}

impl fmt::Display for PlatformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metal" => Ok(Self::Metal),
            "cloud" => Ok(Self::Cloud),
            "container" => Ok(Self::Container),
            "interactive" => Ok(Self::Interactive),
            _ => Err(CoreError::UnknownPlatformMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallConfig {
    /// Block device the OS is installed to.
    pub disk: String,
    /// Installer image reference.
    pub image: String,
    #[serde(default)]
    pub extra_kernel_args: Vec<String>,
    #[serde(default = "default_bootloader")]
    pub bootloader: bool,
    /// Write zeros to the disk before installing.
    #[serde(default)]
    pub wipe: bool,
}

fn default_bootloader() -> bool {
    true
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            disk: "/dev/sda".to_string(),
            image: String::new(),
            extra_kernel_args: Vec::new(),
            bootloader: true,
            wipe: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineFile {
    pub path: String,
    pub content: String,
    #[serde(default = "default_permissions")]
    pub permissions: u32,
}

fn default_permissions() -> u32 {
    0o644
}

/// Top-level configuration sections that can be hot-applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSection {
    Network,
    Sysctls,
    Files,
    UserDisks,
}

impl ConfigSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Sysctls => "sysctls",
            Self::Files => "files",
            Self::UserDisks => "user_disks",
        }
    }
}

/// Already-validated machine configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineConfig {
    #[serde(default)]
    pub machine_type: MachineType,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sysctls: BTreeMap<String, String>,
    #[serde(default)]
    pub files: Vec<MachineFile>,
    #[serde(default)]
    pub user_disks: Vec<String>,
}

impl MachineConfig {
    pub fn new(machine_type: MachineType) -> Self {
        Self {
            machine_type,
            ..Default::default()
        }
    }

    /// Sections whose contents differ between `self` and `other`, in a fixed order.
    pub fn changed_sections(&self, other: &MachineConfig) -> Vec<ConfigSection> {
        let mut changed = Vec::new();
        if self.network != other.network || self.hostname != other.hostname {
            changed.push(ConfigSection::Network);
        }
        if self.sysctls != other.sysctls {
            changed.push(ConfigSection::Sysctls);
        }
        if self.files != other.files {
            changed.push(ConfigSection::Files);
        }
        if self.user_disks != other.user_disks {
            changed.push(ConfigSection::UserDisks);
        }
        changed
    }
}

/// Options handed to the installer for a fresh install or an upgrade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallOptions {
    pub disk: String,
    pub image: String,
    pub extra_kernel_args: Vec<String>,
    pub bootloader: bool,
    /// The install is being performed by an upgrade.
    pub upgrade: bool,
    /// Forcefully format the partitions.
    pub force: bool,
    /// Write zeros to the disk before installing.
    pub zero: bool,
}

impl InstallOptions {
    pub fn from_config(install: &InstallConfig) -> Self {
        Self {
            disk: install.disk.clone(),
            image: install.image.clone(),
            extra_kernel_args: install.extra_kernel_args.clone(),
            bootloader: install.bootloader,
            upgrade: false,
            force: false,
            zero: install.wipe,
        }
    }

    pub fn for_upgrade(mut self, image: impl Into<String>, force: bool) -> Self {
        self.image = image.into();
        self.upgrade = true;
        self.force = force;
        self.zero = false;
        self
    }
}
