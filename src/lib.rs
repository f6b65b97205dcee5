//! A native interface to FMI 2.0 Functional Mock-up Units.
//!
//! An [`Fmu`] is loaded from a `.fmu` archive (or an already extracted
//! directory), its `modelDescription.xml` parsed into a [`Model`] index, and
//! the platform shared library resolved symbol by symbol into a
//! [`binding::Fmi2Api`]. Instances created from it drive the FMI lifecycle
//! as typed verbs, with Model Exchange and Co-Simulation surfaces selected
//! at compile time by the `me`/`cs` features.
//!
//! ```no_run
//! let fmu = fmu_bind::Fmu::load("SpringMass.fmu")?;
//! let mut inst = fmu.instantiate_cs("spring", false, true)?;
//! inst.setup_experiment(Some(1e-6), 0.0, Some(10.0))?;
//! inst.enter_initialization_mode()?;
//! inst.exit_initialization_mode()?;
//! inst.do_step(0.0, 0.01)?;
//! # Ok::<(), fmu_bind::Error>(())
//! ```

pub mod binding;
pub mod handle;
pub mod import;
pub mod instance;
pub mod jacobian;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod solution;

pub use handle::{HandleArena, HandleId};
pub use import::Fmu;
#[cfg(feature = "cs")]
pub use instance::InstanceCS;
#[cfg(feature = "me")]
pub use instance::InstanceME;
pub use instance::{Config, Instance, ModelState};
pub use jacobian::{
    BlockKey, JacobianBlock, JacobianCache, KnownGroup, SensitivityProvider, UnknownGroup,
};
pub use model::Model;
pub use resolver::{Group, Selector};
pub use solution::Solution;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Status code returned by every FMI 2.0 call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Warning,
    Discard,
    Error,
    Fatal,
    Pending,
}

/// The non-failing half of [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Success {
    Ok,
    Warning,
    Pending,
}

/// The failing half of [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    /// The call was rejected but the instance remains usable. For Model
    /// Exchange this typically asks for a smaller step; for Co-Simulation
    /// the master decides whether the run can continue.
    #[error("the call returned fmi2Discard")]
    Discard,
    /// The instance can no longer be used, except to restore a previously
    /// captured FMU state, reset, or free it.
    #[error("the call returned fmi2Error")]
    Error,
    /// The model computations are irreparably corrupted.
    #[error("the call returned fmi2Fatal")]
    Fatal,
}

impl Status {
    pub fn from_raw(raw: binding::fmi2Status) -> Self {
        match raw {
            binding::fmi2OK => Status::Ok,
            binding::fmi2Warning => Status::Warning,
            binding::fmi2Discard => Status::Discard,
            binding::fmi2Error => Status::Error,
            binding::fmi2Fatal => Status::Fatal,
            binding::fmi2Pending => Status::Pending,
            other => {
                log::error!("binary returned unknown status code {other}, treating as Error");
                Status::Error
            }
        }
    }

    /// Split into the success and failure halves.
    pub fn ok(self) -> Result<Success, StatusError> {
        match self {
            Status::Ok => Ok(Success::Ok),
            Status::Warning => Ok(Success::Warning),
            Status::Pending => Ok(Success::Pending),
            Status::Discard => Err(StatusError::Discard),
            Status::Error => Err(StatusError::Error),
            Status::Fatal => Err(StatusError::Fatal),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error parsing model description: {0}")]
    Schema(#[from] fmu_schema::Error),

    #[error("unsupported fmiVersion `{0}`, only 2.0 is handled")]
    UnsupportedFmiVersion(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("error extracting archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("no binary for this platform: expected `{}`", .path.display())]
    BinaryMissing { path: std::path::PathBuf },

    #[error("error loading shared library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    #[error("required entry point `{name}` is not exported by the binary")]
    MissingSymbol { name: &'static str },

    #[error("entry point `{name}` is unavailable: {reason}")]
    SymbolUnavailable {
        name: &'static str,
        reason: &'static str,
    },

    #[error("the model description declares no {0} interface")]
    InterfaceNotProvided(&'static str),

    #[error("fmi2Instantiate returned NULL for instance `{name}`")]
    Instantiation { name: String },

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("`{op}` is not legal in state {from:?}")]
    InvalidState { op: &'static str, from: ModelState },

    #[error("`{op}` returned fmi2Warning (escalated by configuration)")]
    WarningEscalated { op: &'static str },

    #[error("stale or freed instance handle")]
    InvalidHandle,

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("selector resolved to {expected} variables but {got} values were given")]
    LengthMismatch { expected: usize, got: usize },

    #[error("variable `{name}` is not of type {expected}")]
    VariableTypeMismatch { name: String, expected: &'static str },

    #[error("cannot perturb `{name}`: finite-difference step underflowed to zero")]
    ZeroPerturbation { name: String },

    #[error("sampled sensitivity of `{name}` is not finite")]
    NonFiniteSample { name: String },

    #[error("event iteration did not converge within {limit} rounds")]
    EventLoopStalled { limit: usize },

    #[error("a nul byte in `{0}` cannot cross the C boundary")]
    InvalidCString(String),
}
