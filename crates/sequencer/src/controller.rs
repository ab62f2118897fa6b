//! Trigger dispatch: sequence + request in, planned and executed run out.

use machined_core::{Sequence, SequenceRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{Executor, Phase};
use crate::error::{Result, SequencerError};
use crate::runtime::Runtime;
use crate::sequencer::{MachineSequencer, Sequencer};

/// Entry point used by API handlers and boot-time init.
#[derive(Clone)]
pub struct Controller {
    runtime: Arc<Runtime>,
    sequencer: Arc<dyn Sequencer>,
    executor: Executor,
}

impl Controller {
    pub fn new(runtime: Arc<Runtime>, sequencer: Arc<dyn Sequencer>) -> Self {
        Self {
            runtime,
            sequencer,
            executor: Executor::new(),
        }
    }

    /// Controller backed by the production planner.
    pub fn with_machine_sequencer(runtime: Arc<Runtime>) -> Self {
        Self::new(runtime, Arc::new(MachineSequencer::new()))
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Plan `sequence` without running it.
    ///
    /// A payload that does not belong to `sequence` is rejected with
    /// [`SequencerError::RequestMismatch`].
    pub fn plan(&self, sequence: Sequence, request: &SequenceRequest) -> Result<Vec<Phase>> {
        let runtime = self.runtime.as_ref();
        let sequencer = self.sequencer.as_ref();

        let phases = match (sequence, request) {
            (Sequence::ApplyConfiguration, SequenceRequest::ApplyConfiguration(r)) => {
                sequencer.apply_configuration(runtime, r)
            }
            (Sequence::Upgrade, SequenceRequest::Upgrade(r)) => sequencer.upgrade(runtime, r),
            (Sequence::Reset, SequenceRequest::Reset(r)) => sequencer.reset(runtime, r),
            (Sequence::Recover, SequenceRequest::Recover(r)) => sequencer.recover(runtime, r),
            (Sequence::Boot, SequenceRequest::None) => sequencer.boot(runtime),
            (Sequence::Bootstrap, SequenceRequest::None) => sequencer.bootstrap(runtime),
            (Sequence::Initialize, SequenceRequest::None) => sequencer.initialize(runtime),
            (Sequence::Install, SequenceRequest::None) => sequencer.install(runtime),
            (Sequence::Reboot, SequenceRequest::None) => sequencer.reboot(runtime),
            (Sequence::Shutdown, SequenceRequest::None) => sequencer.shutdown(runtime),
            (Sequence::Noop, SequenceRequest::None) => sequencer.noop(runtime),
            (sequence, request) => {
                return Err(SequencerError::RequestMismatch {
                    sequence,
                    received: request.kind(),
                })
            }
        };

        debug!(
            sequence = %sequence,
            phases = ?phases.iter().map(Phase::name).collect::<Vec<_>>(),
            "Sequence planned"
        );
        Ok(phases)
    }

    /// Claim the runtime, plan `sequence` against the claimed state and
    /// execute it.
    ///
    /// A trigger arriving while another sequence runs is rejected before any
    /// planning happens. A rejected payload releases the claim without
    /// publishing anything.
    pub async fn run(
        &self,
        sequence: Sequence,
        request: SequenceRequest,
        cancel: CancellationToken,
    ) -> Result<()> {
        let guard = self.runtime.begin_sequence(sequence)?;

        let phases = match self.plan(sequence, &request) {
            Ok(phases) => phases,
            Err(e) => {
                guard.abandon();
                return Err(e);
            }
        };

        info!(
            sequence = %sequence,
            request = request.kind(),
            phases = phases.len(),
            "Dispatching sequence"
        );
        self.executor
            .run_with_guard(guard, &self.runtime, phases, cancel)
            .await
    }

    /// [`run`](Self::run) for a sequence identifier received as text.
    pub async fn run_str(
        &self,
        sequence: &str,
        request: SequenceRequest,
        cancel: CancellationToken,
    ) -> Result<()> {
        let sequence = Sequence::parse(sequence)?;
        self.run(sequence, request, cancel).await
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}
