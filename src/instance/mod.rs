//! Instances of a loaded FMU and the lifecycle state machine they obey.
//!
//! [`Instance`] is generic over an interface tag ([`ME`] or [`CS`]); the
//! verbs shared by both interfaces live in `common`, the interface-specific
//! surfaces in their own modules behind the `me`/`cs` features. Every verb
//! is checked against the FMI 2.0 state machine before the native call.

use std::marker::PhantomData;

use crate::binding::{self, fmi2CallbackFunctions};
use crate::handle::HandleId;
use crate::import::Fmu;
use crate::jacobian::{BlockKey, JacobianCache};
use crate::solution::Solution;
use crate::{Error, Result, Status, Success};

mod common;
#[cfg(feature = "cs")]
mod co_simulation;
#[cfg(feature = "me")]
mod model_exchange;

pub use common::{FmuState, StartPhase};
#[cfg(feature = "me")]
pub use model_exchange::{EventStep, EventSummary, IntegratorStepOutcome};

/// Tag for Model Exchange instances.
pub struct ME;
/// Tag for Co-Simulation instances.
pub struct CS;

#[cfg(feature = "me")]
pub type InstanceME<'a> = Instance<'a, ME>;
#[cfg(feature = "cs")]
pub type InstanceCS<'a> = Instance<'a, CS>;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ME {}
    impl Sealed for super::CS {}
}

pub trait InterfaceTag: sealed::Sealed {
    const KIND: binding::fmi2Type;
    const LABEL: &'static str;
    /// The state reached by `exit_initialization_mode`.
    const AFTER_INIT: ModelState;
    /// Whether the jacobian layer may reposition time for sampling.
    const CAN_SET_TIME: bool;
}

impl InterfaceTag for ME {
    const KIND: binding::fmi2Type = binding::fmi2ModelExchange;
    const LABEL: &'static str = "ModelExchange";
    const AFTER_INIT: ModelState = ModelState::EventMode;
    const CAN_SET_TIME: bool = true;
}

impl InterfaceTag for CS {
    const KIND: binding::fmi2Type = binding::fmi2CoSimulation;
    const LABEL: &'static str = "CoSimulation";
    const AFTER_INIT: ModelState = ModelState::StepMode;
    const CAN_SET_TIME: bool = false;
}

/// Position in the FMI 2.0 instance state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Instantiated,
    InitializationMode,
    /// Model Exchange only.
    EventMode,
    /// Model Exchange only.
    ContinuousTimeMode,
    /// Co-Simulation only: between communication points.
    StepMode,
    Terminated,
    /// A call returned `fmi2Error`; only state restore, reset and free
    /// remain legal.
    Error,
    /// A call returned `fmi2Fatal`; only free remains legal.
    Fatal,
}

/// Operation classes the legality table is written over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    SetupExperiment,
    EnterInitialization,
    ExitInitialization,
    Terminate,
    Reset,
    Read,
    Write,
    GetState,
    SetState,
    SerializeState,
    DirectionalDerivative,
    SetDebugLogging,
    EnterEventMode,
    NewDiscreteStates,
    EnterContinuousTimeMode,
    CompletedIntegratorStep,
    SetTime,
    SetContinuousStates,
    ReadDerivatives,
    DoStep,
    CancelStep,
    ReadStatus,
}

impl Op {
    pub(crate) const fn label(self) -> &'static str {
        match self {
            Op::SetupExperiment => "fmi2SetupExperiment",
            Op::EnterInitialization => "fmi2EnterInitializationMode",
            Op::ExitInitialization => "fmi2ExitInitializationMode",
            Op::Terminate => "fmi2Terminate",
            Op::Reset => "fmi2Reset",
            Op::Read => "fmi2GetXXX",
            Op::Write => "fmi2SetXXX",
            Op::GetState => "fmi2GetFMUstate",
            Op::SetState => "fmi2SetFMUstate",
            Op::SerializeState => "fmi2SerializeFMUstate",
            Op::DirectionalDerivative => "fmi2GetDirectionalDerivative",
            Op::SetDebugLogging => "fmi2SetDebugLogging",
            Op::EnterEventMode => "fmi2EnterEventMode",
            Op::NewDiscreteStates => "fmi2NewDiscreteStates",
            Op::EnterContinuousTimeMode => "fmi2EnterContinuousTimeMode",
            Op::CompletedIntegratorStep => "fmi2CompletedIntegratorStep",
            Op::SetTime => "fmi2SetTime",
            Op::SetContinuousStates => "fmi2SetContinuousStates",
            Op::ReadDerivatives => "fmi2GetDerivatives",
            Op::DoStep => "fmi2DoStep",
            Op::CancelStep => "fmi2CancelStep",
            Op::ReadStatus => "fmi2GetStatus",
        }
    }
}

/// Pure legality table of the FMI 2.0 state machine.
pub(crate) fn allowed(op: Op, state: ModelState) -> bool {
    use ModelState::*;
    match op {
        Op::SetupExperiment | Op::EnterInitialization => matches!(state, Instantiated),
        Op::ExitInitialization => matches!(state, InitializationMode),
        Op::Terminate => matches!(state, EventMode | ContinuousTimeMode | StepMode),
        Op::Reset => !matches!(state, Fatal),
        Op::Read | Op::DirectionalDerivative => matches!(
            state,
            InitializationMode | EventMode | ContinuousTimeMode | StepMode | Terminated
        ),
        Op::Write => matches!(
            state,
            Instantiated | InitializationMode | EventMode | ContinuousTimeMode | StepMode
        ),
        Op::GetState | Op::SerializeState => matches!(
            state,
            Instantiated | InitializationMode | EventMode | ContinuousTimeMode | StepMode
                | Terminated
        ),
        // Restoring a captured state is the documented recovery path out of
        // the error state.
        Op::SetState => matches!(
            state,
            Instantiated | InitializationMode | EventMode | ContinuousTimeMode | StepMode
                | Terminated | Error
        ),
        Op::SetDebugLogging => !matches!(state, Fatal),
        Op::EnterEventMode => matches!(state, EventMode | ContinuousTimeMode),
        Op::NewDiscreteStates | Op::EnterContinuousTimeMode => matches!(state, EventMode),
        Op::CompletedIntegratorStep | Op::SetContinuousStates => {
            matches!(state, ContinuousTimeMode)
        }
        Op::SetTime => matches!(state, EventMode | ContinuousTimeMode),
        Op::ReadDerivatives => matches!(state, EventMode | ContinuousTimeMode | Terminated),
        Op::DoStep | Op::CancelStep => matches!(state, StepMode),
        Op::ReadStatus => matches!(state, StepMode | Terminated),
    }
}

/// Host-side behavior knobs, per instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Escalate `fmi2Warning` returns into errors.
    pub assert_on_warning: bool,
    /// Reject calls the state machine forbids instead of logging and
    /// forwarding them to the binary anyway. Off by default: the binary's
    /// own status is trusted for out-of-state calls.
    pub strict_state_check: bool,
    /// Elide `fmi2SetTime`/`fmi2SetContinuousStates` calls that repeat the
    /// last written value.
    pub skip_redundant_writes: bool,
    /// Bound on `fmi2NewDiscreteStates` rounds in one event iteration.
    pub max_event_iterations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assert_on_warning: false,
            strict_state_check: false,
            skip_redundant_writes: true,
            max_event_iterations: 100,
        }
    }
}

/// A live native instance, borrowing the [`Fmu`] it was created from.
pub struct Instance<'a, Tag> {
    fmu: &'a Fmu,
    handle: HandleId,
    name: String,
    /// The binary may retain this pointer for its whole lifetime.
    #[allow(dead_code)]
    callbacks: Box<fmi2CallbackFunctions>,
    state: ModelState,
    config: Config,
    jacobian: JacobianCache,
    solution: Solution,
    time: f64,
    last_time: Option<f64>,
    last_states: Option<Vec<f64>>,
    // Retained for reset-by-reinstantiation.
    visible: bool,
    logging_on: bool,
    _tag: PhantomData<Tag>,
}

impl<'a, Tag: InterfaceTag> Instance<'a, Tag> {
    /// Instantiate a fresh native instance of the tagged interface kind.
    pub fn new(fmu: &'a Fmu, name: &str, visible: bool, logging_on: bool) -> Result<Self> {
        let md = fmu.model().description();
        let provided = match Tag::KIND {
            binding::fmi2ModelExchange => md.model_exchange.is_some(),
            _ => md.co_simulation.is_some(),
        };
        if !provided {
            return Err(Error::InterfaceNotProvided(Tag::LABEL));
        }

        let callbacks = Box::new(fmi2CallbackFunctions::default());
        let handle = instantiate_native(fmu, name, Tag::KIND, &callbacks, visible, logging_on)?;
        log::debug!("Instantiated {} instance `{name}`", Tag::LABEL);

        let model = fmu.model();
        Ok(Self {
            fmu,
            handle,
            name: name.to_owned(),
            callbacks,
            state: ModelState::Instantiated,
            config: Config::default(),
            jacobian: JacobianCache::new(),
            solution: Solution::new(model.num_states(), model.output_refs().len()),
            time: 0.0,
            last_time: None,
            last_states: None,
            visible,
            logging_on,
            _tag: PhantomData,
        })
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }
}

impl<'a, Tag> Instance<'a, Tag> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fmu(&self) -> &'a Fmu {
        self.fmu
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    pub fn take_solution(&mut self) -> Solution {
        let model = self.fmu.model();
        std::mem::replace(
            &mut self.solution,
            Solution::new(model.num_states(), model.output_refs().len()),
        )
    }

    /// Sensitivity evaluations spent so far: `(directional, sampled)`.
    pub fn jacobian_evals(&self) -> (usize, usize) {
        self.jacobian.evals()
    }

    /// How many times the given Jacobian block has been (re)assembled.
    pub fn jacobian_recomputes(&self, key: BlockKey) -> usize {
        self.jacobian.recompute_count(key)
    }

    pub(crate) fn component(&self) -> Result<binding::fmi2Component> {
        self.fmu.handles().get(self.handle)
    }

    /// Gate `op` on the state machine. Illegal calls fail under
    /// `strict_state_check` and are logged and forwarded otherwise.
    pub(crate) fn require(&self, op: Op) -> Result<()> {
        if allowed(op, self.state) {
            Ok(())
        } else if self.config.strict_state_check {
            Err(Error::InvalidState {
                op: op.label(),
                from: self.state,
            })
        } else {
            log::warn!(
                "`{}`: {} called in state {:?}",
                self.name,
                op.label(),
                self.state
            );
            Ok(())
        }
    }

    /// Fold a raw status into the state machine and the configured warning
    /// policy.
    pub(crate) fn consume_status(
        &mut self,
        op: Op,
        raw: binding::fmi2Status,
    ) -> Result<Success> {
        let status = Status::from_raw(raw);
        match status {
            Status::Error => self.state = ModelState::Error,
            Status::Fatal => self.state = ModelState::Fatal,
            _ => {}
        }
        let success = status.ok()?;
        if success == Success::Warning {
            log::warn!("`{}`: {} returned fmi2Warning", self.name, op.label());
            if self.config.assert_on_warning {
                return Err(Error::WarningEscalated { op: op.label() });
            }
        }
        Ok(success)
    }
}

impl<'a, Tag> Drop for Instance<'a, Tag> {
    fn drop(&mut self) {
        if let Ok(ptr) = self.fmu.handles().free(self.handle) {
            if let Ok(free) = self.fmu.api().free_instance.get() {
                log::trace!("Freeing native instance `{}`", self.name);
                unsafe { free(ptr) };
            }
        }
        let name = self.name.clone();
        self.fmu.with_instances(|list| {
            if let Some(pos) = list.iter().position(|n| n == &name) {
                list.remove(pos);
            }
        });
    }
}

/// Native instantiation, serialized with the live-instance list so the
/// duplicate-name check cannot race a concurrent create.
fn instantiate_native(
    fmu: &Fmu,
    name: &str,
    kind: binding::fmi2Type,
    callbacks: &fmi2CallbackFunctions,
    visible: bool,
    logging_on: bool,
) -> Result<HandleId> {
    let f = fmu.api().instantiate.get()?;
    let name_c = common::cstring(name)?;
    let guid_c = common::cstring(fmu.model().guid())?;
    let resource_c = common::cstring(fmu.resource_url().as_str())?;

    fmu.with_instances(|live| {
        if live.iter().any(|n| n == name) {
            log::warn!("instance name `{name}` is already in use for this FMU");
        }
        let ptr = unsafe {
            f(
                name_c.as_ptr(),
                kind,
                guid_c.as_ptr(),
                resource_c.as_ptr(),
                callbacks,
                visible as binding::fmi2Boolean,
                logging_on as binding::fmi2Boolean,
            )
        };
        if ptr.is_null() {
            return Err(Error::Instantiation {
                name: name.to_owned(),
            });
        }
        live.push(name.to_owned());
        Ok(fmu.handles().alloc(ptr))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_and_initialization_are_pre_run_only() {
        assert!(allowed(Op::SetupExperiment, ModelState::Instantiated));
        assert!(!allowed(Op::SetupExperiment, ModelState::InitializationMode));
        assert!(!allowed(Op::SetupExperiment, ModelState::StepMode));
        assert!(allowed(Op::EnterInitialization, ModelState::Instantiated));
        assert!(allowed(Op::ExitInitialization, ModelState::InitializationMode));
        assert!(!allowed(Op::ExitInitialization, ModelState::Instantiated));
    }

    #[test]
    fn reads_are_forbidden_before_initialization_mode() {
        assert!(!allowed(Op::Read, ModelState::Instantiated));
        assert!(allowed(Op::Read, ModelState::InitializationMode));
        assert!(allowed(Op::Read, ModelState::Terminated));
        assert!(allowed(Op::Write, ModelState::Instantiated));
        assert!(!allowed(Op::Write, ModelState::Terminated));
    }

    #[test]
    fn continuous_time_ops_need_continuous_time_mode() {
        assert!(allowed(Op::SetContinuousStates, ModelState::ContinuousTimeMode));
        assert!(!allowed(Op::SetContinuousStates, ModelState::EventMode));
        assert!(allowed(Op::SetTime, ModelState::EventMode));
        assert!(allowed(Op::CompletedIntegratorStep, ModelState::ContinuousTimeMode));
        assert!(!allowed(Op::CompletedIntegratorStep, ModelState::StepMode));
        assert!(allowed(Op::NewDiscreteStates, ModelState::EventMode));
        assert!(!allowed(Op::NewDiscreteStates, ModelState::ContinuousTimeMode));
    }

    #[test]
    fn error_state_only_leaves_room_for_recovery() {
        assert!(!allowed(Op::Read, ModelState::Error));
        assert!(!allowed(Op::Write, ModelState::Error));
        assert!(!allowed(Op::DoStep, ModelState::Error));
        assert!(!allowed(Op::GetState, ModelState::Error));
        assert!(allowed(Op::SetState, ModelState::Error));
        assert!(allowed(Op::Reset, ModelState::Error));
    }

    #[test]
    fn fatal_state_allows_nothing() {
        for op in [
            Op::SetupExperiment,
            Op::Read,
            Op::Write,
            Op::Reset,
            Op::SetState,
            Op::Terminate,
            Op::SetDebugLogging,
            Op::DoStep,
        ] {
            assert!(!allowed(op, ModelState::Fatal), "{op:?}");
        }
    }

    #[test]
    fn terminate_needs_a_running_instance() {
        assert!(!allowed(Op::Terminate, ModelState::Instantiated));
        assert!(!allowed(Op::Terminate, ModelState::InitializationMode));
        assert!(allowed(Op::Terminate, ModelState::StepMode));
        assert!(allowed(Op::Terminate, ModelState::ContinuousTimeMode));
        assert!(!allowed(Op::Terminate, ModelState::Terminated));
    }

    #[test]
    fn default_config_warns_and_forwards_out_of_state_calls() {
        let c = Config::default();
        assert!(!c.assert_on_warning);
        assert!(!c.strict_state_check, "strict mode is opt-in");
        assert!(c.skip_redundant_writes);
        assert!(c.max_event_iterations >= 1);
    }
}
