mod machine;
mod request;
mod sequence;

pub use machine::{
    ConfigSection, InstallConfig, InstallOptions, MachineConfig, MachineFile, MachineType,
    NetworkConfig, PlatformMode,
};
pub use request::{
    ApplyConfigurationRequest, RecoverRequest, RecoverSource, ResetRequest, SequenceRequest,
    UpgradeRequest,
};
pub use sequence::Sequence;
