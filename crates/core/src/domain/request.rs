use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::machine::MachineConfig;
use super::sequence::Sequence;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyConfigurationRequest {
    /// The new configuration document.
    pub config: MachineConfig,
    /// Persist the configuration and apply it on the next reboot only.
    #[serde(default)]
    pub on_reboot: bool,
    /// Apply changed sections to the running machine without rebooting.
    #[serde(default)]
    pub immediate: bool,
}

impl ApplyConfigurationRequest {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            on_reboot: false,
            immediate: false,
        }
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn on_reboot(mut self) -> Self {
        self.on_reboot = true;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Installer image reference to upgrade to.
    pub image: String,
    /// Keep the node's data (and etcd membership) across the upgrade.
    #[serde(default)]
    pub preserve: bool,
    /// Stage the upgrade and perform it after a reboot.
    #[serde(default)]
    pub stage: bool,
    #[serde(default)]
    pub force: bool,
}

impl UpgradeRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetRequest {
    /// Leave the cluster cleanly before wiping.
    #[serde(default = "default_true")]
    pub graceful: bool,
    /// Reboot after the reset instead of powering off.
    #[serde(default)]
    pub reboot: bool,
    /// Partition labels to wipe; empty wipes the whole system disk.
    #[serde(default)]
    pub system_partitions_to_wipe: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ResetRequest {
    fn default() -> Self {
        Self {
            graceful: true,
            reboot: false,
            system_partitions_to_wipe: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoverSource {
    /// Regenerate control plane manifests from etcd.
    Etcd,
    /// Regenerate control plane manifests from the API server.
    ApiServer,
    /// Restore etcd from a snapshot, then regenerate manifests from it.
    Snapshot { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoverRequest {
    pub source: RecoverSource,
}

/// A trigger payload, matched against the sequence it accompanies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "request", rename_all = "snake_case")]
pub enum SequenceRequest {
    #[default]
    None,
    ApplyConfiguration(ApplyConfigurationRequest),
    Upgrade(UpgradeRequest),
    Reset(ResetRequest),
    Recover(RecoverRequest),
}

impl SequenceRequest {
    /// Whether this payload is the one `sequence` expects.
    pub fn matches(&self, sequence: Sequence) -> bool {
        match self {
            Self::None => !sequence.takes_request(),
            Self::ApplyConfiguration(_) => sequence == Sequence::ApplyConfiguration,
            Self::Upgrade(_) => sequence == Sequence::Upgrade,
            Self::Reset(_) => sequence == Sequence::Reset,
            Self::Recover(_) => sequence == Sequence::Recover,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ApplyConfiguration(_) => "apply_configuration",
            Self::Upgrade(_) => "upgrade",
            Self::Reset(_) => "reset",
            Self::Recover(_) => "recover",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_matches_sequence() {
        assert!(SequenceRequest::None.matches(Sequence::Boot));
        assert!(!SequenceRequest::None.matches(Sequence::Upgrade));
        assert!(SequenceRequest::Upgrade(UpgradeRequest::new("img")).matches(Sequence::Upgrade));
        assert!(!SequenceRequest::Upgrade(UpgradeRequest::new("img")).matches(Sequence::Reset));
        assert!(SequenceRequest::Reset(ResetRequest::default()).matches(Sequence::Reset));
        assert!(!SequenceRequest::Reset(ResetRequest::default()).matches(Sequence::Noop));
    }

    #[test]
    fn test_reset_defaults_to_graceful() {
        let request: ResetRequest = serde_json::from_str("{}").unwrap();
        assert!(request.graceful);
        assert!(!request.reboot);
        assert!(request.system_partitions_to_wipe.is_empty());
    }

    #[test]
    fn test_sequence_request_deserialization() {
        let json = r#"{"type":"upgrade","request":{"image":"installer:v2","preserve":true}}"#;
        let request: SequenceRequest = serde_json::from_str(json).unwrap();

        match request {
            SequenceRequest::Upgrade(upgrade) => {
                assert_eq!(upgrade.image, "installer:v2");
                assert!(upgrade.preserve);
                assert!(!upgrade.stage);
            }
            other => panic!("Wrong request type: {}", other.kind()),
        }
    }

    #[test]
    fn test_recover_source_serialization() {
        let request = RecoverRequest {
            source: RecoverSource::Snapshot {
                path: PathBuf::from("/var/lib/etcd.snapshot"),
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"kind\":\"snapshot\""));
        assert!(json.contains("etcd.snapshot"));
    }

    #[test]
    fn test_apply_configuration_builders() {
        let request = ApplyConfigurationRequest::new(MachineConfig::default()).immediate();
        assert!(request.immediate);
        assert!(!request.on_reboot);
    }
}
