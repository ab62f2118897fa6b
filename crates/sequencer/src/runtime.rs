//! Shared machine state passed to every planner call and task.

use chrono::{DateTime, Utc};
use events::EventBus;
use machined_core::{MachineConfig, MachineType, PlatformMode, Sequence};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::config::SequencerConfig;
use crate::core::OrderedEventEmitter;
use crate::error::Result;
use crate::platform::Platform;
use crate::resources::{ActiveSlot, SequenceGuard};

/// Snapshot of the machine facts the planner reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineState {
    pub mode: PlatformMode,
    /// The OS is installed on persistent storage.
    pub installed: bool,
    /// Loaded configuration, absent until the machine has obtained one.
    pub config: Option<MachineConfig>,
}

impl MachineState {
    pub fn new(mode: PlatformMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn installed(mut self, installed: bool) -> Self {
        self.installed = installed;
        self
    }

    pub fn with_config(mut self, config: MachineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn machine_type(&self) -> Option<MachineType> {
        self.config.as_ref().map(|c| c.machine_type)
    }

    pub fn is_control_plane(&self) -> bool {
        self.machine_type()
            .map(|t| t.is_control_plane())
            .unwrap_or(false)
    }

    pub fn is_container(&self) -> bool {
        self.mode.is_container()
    }
}

/// Where the in-flight sequence currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceProgress {
    pub sequence: Sequence,
    pub phase_index: Option<usize>,
    pub phase: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// The process-wide machine runtime.
///
/// Exactly one exists per machine process and it outlives every sequence run
/// against it. At most one sequence may be in flight at a time; see
/// [`Runtime::begin_sequence`].
pub struct Runtime {
    state: RwLock<MachineState>,
    platform: Arc<dyn Platform>,
    events: OrderedEventEmitter,
    settings: SequencerConfig,
    active: ActiveSlot,
}

impl Runtime {
    pub fn new(state: MachineState, platform: Arc<dyn Platform>) -> Self {
        Self::with_settings(state, platform, SequencerConfig::default())
    }

    pub fn with_settings(
        state: MachineState,
        platform: Arc<dyn Platform>,
        settings: SequencerConfig,
    ) -> Self {
        let bus = EventBus::with_capacity(settings.event_capacity);
        Self {
            state: RwLock::new(state),
            platform,
            events: OrderedEventEmitter::new(bus),
            settings,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// A copy of the current machine state.
    pub fn state(&self) -> MachineState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> Option<MachineConfig> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .config
            .clone()
    }

    pub fn set_config(&self, config: MachineConfig) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .config = Some(config);
    }

    pub fn set_installed(&self, installed: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .installed = installed;
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn events(&self) -> &OrderedEventEmitter {
        &self.events
    }

    pub fn settings(&self) -> &SequencerConfig {
        &self.settings
    }

    /// Progress of the in-flight sequence, `None` when idle.
    pub fn progress(&self) -> Option<SequenceProgress> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_idle(&self) -> bool {
        self.progress().is_none()
    }

    /// Mark `sequence` as in flight.
    ///
    /// Fails with [`SequencerError::SequenceInProgress`](crate::SequencerError::SequenceInProgress)
    /// while another guard is alive; the running sequence is not affected.
    pub fn begin_sequence(&self, sequence: Sequence) -> Result<SequenceGuard> {
        SequenceGuard::acquire(self.active.clone(), self.events.clone(), sequence)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("progress", &self.progress())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
