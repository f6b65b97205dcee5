//! Per-symbol resolution of the FMI 2.0 entry points.
//!
//! Each entry point lives in a [`FunctionSlot`] that is either resolved or
//! carries the reason it is unavailable. Symbols gated by a capability flag
//! the model description does not declare are never looked up; declared but
//! missing optional symbols are logged and marked unavailable; missing
//! required symbols fail the whole load.

use std::ffi::CStr;
use std::path::Path;

use libloading::Library;

use crate::Error;
use fmu_schema::ModelDescription;

use super::*;

const GATE_CAPABILITY: &str = "capability not declared in the model description";
const GATE_EXPORT: &str = "symbol not exported by the binary";
const GATE_UNLOADED: &str = "shared library has been unloaded";

/// An entry point that is either callable or has a recorded reason why not.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSlot<F> {
    name: &'static str,
    state: Slot<F>,
}

#[derive(Debug, Clone, Copy)]
enum Slot<F> {
    Resolved(F),
    Unavailable(&'static str),
}

impl<F: Copy> FunctionSlot<F> {
    fn resolved(name: &'static str, f: F) -> Self {
        Self {
            name,
            state: Slot::Resolved(f),
        }
    }

    fn unavailable(name: &'static str, reason: &'static str) -> Self {
        Self {
            name,
            state: Slot::Unavailable(reason),
        }
    }

    /// The raw function pointer, or a diagnostic naming the symbol and the
    /// reason it cannot be called.
    pub fn get(&self) -> Result<F, Error> {
        match self.state {
            Slot::Resolved(f) => Ok(f),
            Slot::Unavailable(reason) => Err(Error::SymbolUnavailable {
                name: self.name,
                reason,
            }),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, Slot::Resolved(_))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn revoke(&mut self, reason: &'static str) {
        self.state = Slot::Unavailable(reason);
    }
}

/// Capability gates controlling which optional symbol groups are looked up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiFlags {
    pub model_exchange: bool,
    pub co_simulation: bool,
    pub can_get_set_state: bool,
    pub can_serialize_state: bool,
    pub provides_directional_derivative: bool,
}

impl ApiFlags {
    pub fn from_model(md: &ModelDescription) -> Self {
        let me = md.model_exchange.as_ref();
        let cs = md.co_simulation.as_ref();
        Self {
            model_exchange: me.is_some(),
            co_simulation: cs.is_some(),
            can_get_set_state: me.map_or(false, |x| x.can_get_and_set_fmu_state)
                || cs.map_or(false, |x| x.can_get_and_set_fmu_state),
            can_serialize_state: me.map_or(false, |x| x.can_serialize_fmu_state)
                || cs.map_or(false, |x| x.can_serialize_fmu_state),
            provides_directional_derivative: me
                .map_or(false, |x| x.provides_directional_derivative)
                || cs.map_or(false, |x| x.provides_directional_derivative),
        }
    }
}

unsafe fn required<F: Copy>(lib: &Library, name: &'static str) -> Result<FunctionSlot<F>, Error> {
    match lib.get::<F>(name.as_bytes()) {
        Ok(sym) => Ok(FunctionSlot::resolved(name, *sym)),
        Err(source) => {
            log::error!("required entry point `{name}` is not exported: {source}");
            Err(Error::MissingSymbol { name })
        }
    }
}

unsafe fn optional<F: Copy>(lib: &Library, name: &'static str, enabled: bool) -> FunctionSlot<F> {
    if !enabled {
        return FunctionSlot::unavailable(name, GATE_CAPABILITY);
    }
    match lib.get::<F>(name.as_bytes()) {
        Ok(sym) => FunctionSlot::resolved(name, *sym),
        Err(source) => {
            log::warn!("entry point `{name}` declared by the model description but not exported: {source}");
            FunctionSlot::unavailable(name, GATE_EXPORT)
        }
    }
}

/// The resolved FMI 2.0 API of one shared library.
///
/// Owns the [`Library`]; [`Fmi2Api::unload`] revokes every slot before the
/// handle is dropped so no stale pointer can outlive the mapping.
#[derive(Debug)]
pub struct Fmi2Api {
    lib: Option<Library>,

    pub get_types_platform: FunctionSlot<GetTypesPlatformFn>,
    pub get_version: FunctionSlot<GetVersionFn>,
    pub set_debug_logging: FunctionSlot<SetDebugLoggingFn>,
    pub instantiate: FunctionSlot<InstantiateFn>,
    pub free_instance: FunctionSlot<FreeInstanceFn>,
    pub setup_experiment: FunctionSlot<SetupExperimentFn>,
    pub enter_initialization_mode: FunctionSlot<EnterInitializationModeFn>,
    pub exit_initialization_mode: FunctionSlot<ExitInitializationModeFn>,
    pub terminate: FunctionSlot<TerminateFn>,
    pub reset: FunctionSlot<ResetFn>,

    pub get_real: FunctionSlot<GetRealFn>,
    pub get_integer: FunctionSlot<GetIntegerFn>,
    pub get_boolean: FunctionSlot<GetBooleanFn>,
    pub get_string: FunctionSlot<GetStringFn>,
    pub set_real: FunctionSlot<SetRealFn>,
    pub set_integer: FunctionSlot<SetIntegerFn>,
    pub set_boolean: FunctionSlot<SetBooleanFn>,
    pub set_string: FunctionSlot<SetStringFn>,

    pub get_fmu_state: FunctionSlot<GetFMUstateFn>,
    pub set_fmu_state: FunctionSlot<SetFMUstateFn>,
    pub free_fmu_state: FunctionSlot<FreeFMUstateFn>,
    pub serialized_fmu_state_size: FunctionSlot<SerializedFMUstateSizeFn>,
    pub serialize_fmu_state: FunctionSlot<SerializeFMUstateFn>,
    pub de_serialize_fmu_state: FunctionSlot<DeSerializeFMUstateFn>,

    pub get_directional_derivative: FunctionSlot<GetDirectionalDerivativeFn>,

    pub enter_event_mode: FunctionSlot<EnterEventModeFn>,
    pub new_discrete_states: FunctionSlot<NewDiscreteStatesFn>,
    pub enter_continuous_time_mode: FunctionSlot<EnterContinuousTimeModeFn>,
    pub completed_integrator_step: FunctionSlot<CompletedIntegratorStepFn>,
    pub set_time: FunctionSlot<SetTimeFn>,
    pub set_continuous_states: FunctionSlot<SetContinuousStatesFn>,
    pub get_derivatives: FunctionSlot<GetDerivativesFn>,
    pub get_event_indicators: FunctionSlot<GetEventIndicatorsFn>,
    pub get_continuous_states: FunctionSlot<GetContinuousStatesFn>,
    pub get_nominals_of_continuous_states: FunctionSlot<GetNominalsOfContinuousStatesFn>,

    pub set_real_input_derivatives: FunctionSlot<SetRealInputDerivativesFn>,
    pub get_real_output_derivatives: FunctionSlot<GetRealOutputDerivativesFn>,
    pub do_step: FunctionSlot<DoStepFn>,
    pub cancel_step: FunctionSlot<CancelStepFn>,
    pub get_status: FunctionSlot<GetStatusFn>,
    pub get_real_status: FunctionSlot<GetRealStatusFn>,
    pub get_integer_status: FunctionSlot<GetIntegerStatusFn>,
    pub get_boolean_status: FunctionSlot<GetBooleanStatusFn>,
    pub get_string_status: FunctionSlot<GetStringStatusFn>,
}

impl Fmi2Api {
    /// Map the shared library at `path` and resolve every entry point.
    pub fn load(path: &Path, flags: ApiFlags) -> Result<Self, Error> {
        let lib = unsafe { Library::new(path) }?;
        unsafe { Self::resolve(lib, flags) }
    }

    unsafe fn resolve(lib: Library, flags: ApiFlags) -> Result<Self, Error> {
        let serialize = flags.can_get_set_state && flags.can_serialize_state;
        let api = Self {
            get_types_platform: required(&lib, "fmi2GetTypesPlatform")?,
            get_version: required(&lib, "fmi2GetVersion")?,
            set_debug_logging: required(&lib, "fmi2SetDebugLogging")?,
            instantiate: required(&lib, "fmi2Instantiate")?,
            free_instance: required(&lib, "fmi2FreeInstance")?,
            setup_experiment: required(&lib, "fmi2SetupExperiment")?,
            enter_initialization_mode: required(&lib, "fmi2EnterInitializationMode")?,
            exit_initialization_mode: required(&lib, "fmi2ExitInitializationMode")?,
            terminate: required(&lib, "fmi2Terminate")?,
            // Absent reset is tolerated; the lifecycle layer falls back to
            // free + re-instantiate.
            reset: optional(&lib, "fmi2Reset", true),

            get_real: required(&lib, "fmi2GetReal")?,
            get_integer: required(&lib, "fmi2GetInteger")?,
            get_boolean: required(&lib, "fmi2GetBoolean")?,
            get_string: required(&lib, "fmi2GetString")?,
            set_real: required(&lib, "fmi2SetReal")?,
            set_integer: required(&lib, "fmi2SetInteger")?,
            set_boolean: required(&lib, "fmi2SetBoolean")?,
            set_string: required(&lib, "fmi2SetString")?,

            get_fmu_state: optional(&lib, "fmi2GetFMUstate", flags.can_get_set_state),
            set_fmu_state: optional(&lib, "fmi2SetFMUstate", flags.can_get_set_state),
            free_fmu_state: optional(&lib, "fmi2FreeFMUstate", flags.can_get_set_state),
            serialized_fmu_state_size: optional(&lib, "fmi2SerializedFMUstateSize", serialize),
            serialize_fmu_state: optional(&lib, "fmi2SerializeFMUstate", serialize),
            de_serialize_fmu_state: optional(&lib, "fmi2DeSerializeFMUstate", serialize),

            get_directional_derivative: optional(
                &lib,
                "fmi2GetDirectionalDerivative",
                flags.provides_directional_derivative,
            ),

            enter_event_mode: optional(&lib, "fmi2EnterEventMode", flags.model_exchange),
            new_discrete_states: optional(&lib, "fmi2NewDiscreteStates", flags.model_exchange),
            enter_continuous_time_mode: optional(
                &lib,
                "fmi2EnterContinuousTimeMode",
                flags.model_exchange,
            ),
            completed_integrator_step: optional(
                &lib,
                "fmi2CompletedIntegratorStep",
                flags.model_exchange,
            ),
            set_time: optional(&lib, "fmi2SetTime", flags.model_exchange),
            set_continuous_states: optional(&lib, "fmi2SetContinuousStates", flags.model_exchange),
            get_derivatives: optional(&lib, "fmi2GetDerivatives", flags.model_exchange),
            get_event_indicators: optional(&lib, "fmi2GetEventIndicators", flags.model_exchange),
            get_continuous_states: optional(&lib, "fmi2GetContinuousStates", flags.model_exchange),
            get_nominals_of_continuous_states: optional(
                &lib,
                "fmi2GetNominalsOfContinuousStates",
                flags.model_exchange,
            ),

            set_real_input_derivatives: optional(
                &lib,
                "fmi2SetRealInputDerivatives",
                flags.co_simulation,
            ),
            get_real_output_derivatives: optional(
                &lib,
                "fmi2GetRealOutputDerivatives",
                flags.co_simulation,
            ),
            do_step: optional(&lib, "fmi2DoStep", flags.co_simulation),
            cancel_step: optional(&lib, "fmi2CancelStep", flags.co_simulation),
            get_status: optional(&lib, "fmi2GetStatus", flags.co_simulation),
            get_real_status: optional(&lib, "fmi2GetRealStatus", flags.co_simulation),
            get_integer_status: optional(&lib, "fmi2GetIntegerStatus", flags.co_simulation),
            get_boolean_status: optional(&lib, "fmi2GetBooleanStatus", flags.co_simulation),
            get_string_status: optional(&lib, "fmi2GetStringStatus", flags.co_simulation),

            lib: Some(lib),
        };
        Ok(api)
    }

    /// The `fmi2GetVersion` string, typically `"2.0"`.
    pub fn version(&self) -> Result<String, Error> {
        let f = self.get_version.get()?;
        Ok(unsafe { CStr::from_ptr(f()) }
            .to_string_lossy()
            .into_owned())
    }

    /// The `fmi2GetTypesPlatform` string, `"default"` for conforming binaries.
    pub fn types_platform(&self) -> Result<String, Error> {
        let f = self.get_types_platform.get()?;
        Ok(unsafe { CStr::from_ptr(f()) }
            .to_string_lossy()
            .into_owned())
    }

    pub fn is_loaded(&self) -> bool {
        self.lib.is_some()
    }

    /// Revoke every slot, then drop the library mapping. Idempotent.
    ///
    /// Callers must have freed all native instances first; the instance
    /// lifetime parameter ties that down at compile time.
    pub fn unload(&mut self) {
        macro_rules! revoke_all {
            ($($field:ident),* $(,)?) => {
                $( self.$field.revoke(GATE_UNLOADED); )*
            };
        }
        revoke_all!(
            get_types_platform,
            get_version,
            set_debug_logging,
            instantiate,
            free_instance,
            setup_experiment,
            enter_initialization_mode,
            exit_initialization_mode,
            terminate,
            reset,
            get_real,
            get_integer,
            get_boolean,
            get_string,
            set_real,
            set_integer,
            set_boolean,
            set_string,
            get_fmu_state,
            set_fmu_state,
            free_fmu_state,
            serialized_fmu_state_size,
            serialize_fmu_state,
            de_serialize_fmu_state,
            get_directional_derivative,
            enter_event_mode,
            new_discrete_states,
            enter_continuous_time_mode,
            completed_integrator_step,
            set_time,
            set_continuous_states,
            get_derivatives,
            get_event_indicators,
            get_continuous_states,
            get_nominals_of_continuous_states,
            set_real_input_derivatives,
            get_real_output_derivatives,
            do_step,
            cancel_step,
            get_status,
            get_real_status,
            get_integer_status,
            get_boolean_status,
            get_string_status,
        );
        self.lib = None;
    }
}
