//! Hand-written FMI 2.0 C ABI: scalar typedefs, callback/event records and
//! one function-pointer type per standard entry point.
//!
//! The FMI headers are not vendored; entry points are resolved one by one
//! from the shared library (see [`symbols`]) so that each optional symbol
//! can be individually absent without poisoning the load.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::os::raw::{c_char, c_int, c_uint, c_void};

mod logger;
mod symbols;

pub use logger::callback_logger;
pub use symbols::{ApiFlags, Fmi2Api, FunctionSlot};

pub type fmi2Component = *mut c_void;
pub type fmi2ComponentEnvironment = *mut c_void;
pub type fmi2FMUstate = *mut c_void;
pub type fmi2ValueReference = c_uint;
pub type fmi2Real = f64;
pub type fmi2Integer = c_int;
pub type fmi2Boolean = c_int;
pub type fmi2Char = c_char;
pub type fmi2String = *const c_char;
pub type fmi2Byte = c_char;

pub const fmi2True: fmi2Boolean = 1;
pub const fmi2False: fmi2Boolean = 0;

pub type fmi2Status = c_int;
pub const fmi2OK: fmi2Status = 0;
pub const fmi2Warning: fmi2Status = 1;
pub const fmi2Discard: fmi2Status = 2;
pub const fmi2Error: fmi2Status = 3;
pub const fmi2Fatal: fmi2Status = 4;
pub const fmi2Pending: fmi2Status = 5;

pub type fmi2Type = c_int;
pub const fmi2ModelExchange: fmi2Type = 0;
pub const fmi2CoSimulation: fmi2Type = 1;

pub type fmi2StatusKind = c_int;
pub const fmi2DoStepStatus: fmi2StatusKind = 0;
pub const fmi2PendingStatus: fmi2StatusKind = 1;
pub const fmi2LastSuccessfulTime: fmi2StatusKind = 2;
pub const fmi2Terminated: fmi2StatusKind = 3;

/// The `fmi2TypesPlatform` constant every conforming 2.0 binary reports.
pub const TYPES_PLATFORM: &[u8] = b"default\0";

pub type fmi2CallbackLogger = Option<
    unsafe extern "C" fn(
        componentEnvironment: fmi2ComponentEnvironment,
        instanceName: fmi2String,
        status: fmi2Status,
        category: fmi2String,
        message: fmi2String,
        ...
    ),
>;
pub type fmi2CallbackAllocateMemory =
    Option<unsafe extern "C" fn(nobj: usize, size: usize) -> *mut c_void>;
pub type fmi2CallbackFreeMemory = Option<unsafe extern "C" fn(obj: *mut c_void)>;
pub type fmi2StepFinished =
    Option<unsafe extern "C" fn(componentEnvironment: fmi2ComponentEnvironment, status: fmi2Status)>;

/// Caller-supplied services passed to `fmi2Instantiate`. The binary may
/// invoke the logger from a different thread than the triggering call.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct fmi2CallbackFunctions {
    pub logger: fmi2CallbackLogger,
    pub allocate_memory: fmi2CallbackAllocateMemory,
    pub free_memory: fmi2CallbackFreeMemory,
    pub step_finished: fmi2StepFinished,
    pub component_environment: fmi2ComponentEnvironment,
}

impl Default for fmi2CallbackFunctions {
    fn default() -> Self {
        Self {
            logger: Some(callback_logger),
            allocate_memory: Some(libc::calloc),
            free_memory: Some(libc::free),
            step_finished: None,
            component_environment: std::ptr::null_mut(),
        }
    }
}

/// Result record of `fmi2NewDiscreteStates`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct fmi2EventInfo {
    pub newDiscreteStatesNeeded: fmi2Boolean,
    pub terminateSimulation: fmi2Boolean,
    pub nominalsOfContinuousStatesChanged: fmi2Boolean,
    pub valuesOfContinuousStatesChanged: fmi2Boolean,
    pub nextEventTimeDefined: fmi2Boolean,
    pub nextEventTime: fmi2Real,
}

impl Default for fmi2EventInfo {
    fn default() -> Self {
        Self {
            newDiscreteStatesNeeded: fmi2False,
            terminateSimulation: fmi2False,
            nominalsOfContinuousStatesChanged: fmi2False,
            valuesOfContinuousStatesChanged: fmi2False,
            nextEventTimeDefined: fmi2False,
            nextEventTime: 0.0,
        }
    }
}

// Common entry points.
pub type GetTypesPlatformFn = unsafe extern "C" fn() -> fmi2String;
pub type GetVersionFn = unsafe extern "C" fn() -> fmi2String;
pub type SetDebugLoggingFn = unsafe extern "C" fn(
    c: fmi2Component,
    loggingOn: fmi2Boolean,
    nCategories: usize,
    categories: *const fmi2String,
) -> fmi2Status;
pub type InstantiateFn = unsafe extern "C" fn(
    instanceName: fmi2String,
    fmuType: fmi2Type,
    fmuGUID: fmi2String,
    fmuResourceLocation: fmi2String,
    functions: *const fmi2CallbackFunctions,
    visible: fmi2Boolean,
    loggingOn: fmi2Boolean,
) -> fmi2Component;
pub type FreeInstanceFn = unsafe extern "C" fn(c: fmi2Component);
pub type SetupExperimentFn = unsafe extern "C" fn(
    c: fmi2Component,
    toleranceDefined: fmi2Boolean,
    tolerance: fmi2Real,
    startTime: fmi2Real,
    stopTimeDefined: fmi2Boolean,
    stopTime: fmi2Real,
) -> fmi2Status;
pub type EnterInitializationModeFn = unsafe extern "C" fn(c: fmi2Component) -> fmi2Status;
pub type ExitInitializationModeFn = unsafe extern "C" fn(c: fmi2Component) -> fmi2Status;
pub type TerminateFn = unsafe extern "C" fn(c: fmi2Component) -> fmi2Status;
pub type ResetFn = unsafe extern "C" fn(c: fmi2Component) -> fmi2Status;

pub type GetRealFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    value: *mut fmi2Real,
) -> fmi2Status;
pub type GetIntegerFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    value: *mut fmi2Integer,
) -> fmi2Status;
pub type GetBooleanFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    value: *mut fmi2Boolean,
) -> fmi2Status;
pub type GetStringFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    value: *mut fmi2String,
) -> fmi2Status;
pub type SetRealFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    value: *const fmi2Real,
) -> fmi2Status;
pub type SetIntegerFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    value: *const fmi2Integer,
) -> fmi2Status;
pub type SetBooleanFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    value: *const fmi2Boolean,
) -> fmi2Status;
pub type SetStringFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    value: *const fmi2String,
) -> fmi2Status;

// FMU state management, gated by `canGetAndSetFMUstate`/`canSerializeFMUstate`.
pub type GetFMUstateFn =
    unsafe extern "C" fn(c: fmi2Component, state: *mut fmi2FMUstate) -> fmi2Status;
pub type SetFMUstateFn = unsafe extern "C" fn(c: fmi2Component, state: fmi2FMUstate) -> fmi2Status;
pub type FreeFMUstateFn =
    unsafe extern "C" fn(c: fmi2Component, state: *mut fmi2FMUstate) -> fmi2Status;
pub type SerializedFMUstateSizeFn =
    unsafe extern "C" fn(c: fmi2Component, state: fmi2FMUstate, size: *mut usize) -> fmi2Status;
pub type SerializeFMUstateFn = unsafe extern "C" fn(
    c: fmi2Component,
    state: fmi2FMUstate,
    data: *mut fmi2Byte,
    size: usize,
) -> fmi2Status;
pub type DeSerializeFMUstateFn = unsafe extern "C" fn(
    c: fmi2Component,
    data: *const fmi2Byte,
    size: usize,
    state: *mut fmi2FMUstate,
) -> fmi2Status;

// Gated by `providesDirectionalDerivative`.
pub type GetDirectionalDerivativeFn = unsafe extern "C" fn(
    c: fmi2Component,
    vUnknownRef: *const fmi2ValueReference,
    nUnknown: usize,
    vKnownRef: *const fmi2ValueReference,
    nKnown: usize,
    dvKnown: *const fmi2Real,
    dvUnknown: *mut fmi2Real,
) -> fmi2Status;

// Model Exchange entry points.
pub type EnterEventModeFn = unsafe extern "C" fn(c: fmi2Component) -> fmi2Status;
pub type NewDiscreteStatesFn =
    unsafe extern "C" fn(c: fmi2Component, eventInfo: *mut fmi2EventInfo) -> fmi2Status;
pub type EnterContinuousTimeModeFn = unsafe extern "C" fn(c: fmi2Component) -> fmi2Status;
pub type CompletedIntegratorStepFn = unsafe extern "C" fn(
    c: fmi2Component,
    noSetFMUStatePriorToCurrentPoint: fmi2Boolean,
    enterEventMode: *mut fmi2Boolean,
    terminateSimulation: *mut fmi2Boolean,
) -> fmi2Status;
pub type SetTimeFn = unsafe extern "C" fn(c: fmi2Component, time: fmi2Real) -> fmi2Status;
pub type SetContinuousStatesFn =
    unsafe extern "C" fn(c: fmi2Component, x: *const fmi2Real, nx: usize) -> fmi2Status;
pub type GetDerivativesFn =
    unsafe extern "C" fn(c: fmi2Component, derivatives: *mut fmi2Real, nx: usize) -> fmi2Status;
pub type GetEventIndicatorsFn =
    unsafe extern "C" fn(c: fmi2Component, eventIndicators: *mut fmi2Real, ni: usize) -> fmi2Status;
pub type GetContinuousStatesFn =
    unsafe extern "C" fn(c: fmi2Component, x: *mut fmi2Real, nx: usize) -> fmi2Status;
pub type GetNominalsOfContinuousStatesFn =
    unsafe extern "C" fn(c: fmi2Component, xNominal: *mut fmi2Real, nx: usize) -> fmi2Status;

// Co-Simulation entry points.
pub type SetRealInputDerivativesFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    order: *const fmi2Integer,
    value: *const fmi2Real,
) -> fmi2Status;
pub type GetRealOutputDerivativesFn = unsafe extern "C" fn(
    c: fmi2Component,
    vr: *const fmi2ValueReference,
    nvr: usize,
    order: *const fmi2Integer,
    value: *mut fmi2Real,
) -> fmi2Status;
pub type DoStepFn = unsafe extern "C" fn(
    c: fmi2Component,
    currentCommunicationPoint: fmi2Real,
    communicationStepSize: fmi2Real,
    noSetFMUStatePriorToCurrentPoint: fmi2Boolean,
) -> fmi2Status;
pub type CancelStepFn = unsafe extern "C" fn(c: fmi2Component) -> fmi2Status;
pub type GetStatusFn = unsafe extern "C" fn(
    c: fmi2Component,
    kind: fmi2StatusKind,
    value: *mut fmi2Status,
) -> fmi2Status;
pub type GetRealStatusFn =
    unsafe extern "C" fn(c: fmi2Component, kind: fmi2StatusKind, value: *mut fmi2Real) -> fmi2Status;
pub type GetIntegerStatusFn = unsafe extern "C" fn(
    c: fmi2Component,
    kind: fmi2StatusKind,
    value: *mut fmi2Integer,
) -> fmi2Status;
pub type GetBooleanStatusFn = unsafe extern "C" fn(
    c: fmi2Component,
    kind: fmi2StatusKind,
    value: *mut fmi2Boolean,
) -> fmi2Status;
pub type GetStringStatusFn = unsafe extern "C" fn(
    c: fmi2Component,
    kind: fmi2StatusKind,
    value: *mut fmi2String,
) -> fmi2Status;
