//! The error type returned by every fallible operation in this crate.

use crate::trap::{ExitStatus, FrameInfo, GuestFault, HostFailure, TrapCode};
use crate::ValueKind;
use core::fmt;

/// Convenience alias used throughout this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors raised while marshaling values or crossing the host/guest boundary.
///
/// Every variant belongs to exactly one [`ErrorKind`], see [`Error::kind`].
/// Failures that come back from guest code ([`Error::Host`], [`Error::Trap`]
/// and [`Error::Exit`]) carry structured information about what went wrong;
/// in particular a [`HostFailure`] holds the original error object returned
/// by a host callback, untouched, no matter how many host/guest transitions
/// it crossed on its way out.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A value box was read as a kind it cannot be converted to.
    #[error("invalid cast from `{from}` to `{to}`")]
    InvalidCast {
        /// The kind stored in the box.
        from: ValueKind,
        /// The kind that was requested.
        to: ValueKind,
    },

    /// A null reference was read where a non-null one was required.
    #[error("unexpected null `{0}`")]
    NullReference(ValueKind),

    /// A value handed to `op` did not have the declared kind.
    #[error("type mismatch in {op}: {position} expected `{expected}`, found `{found}`")]
    TypeMismatch {
        /// The operation that detected the mismatch.
        op: &'static str,
        /// Which parameter or result was wrong.
        position: Position,
        /// The declared kind.
        expected: ValueKind,
        /// The kind that was provided.
        found: ValueKind,
    },

    /// The number of values handed to `op` did not match its signature.
    #[error("arity mismatch in {op}: expected {expected} {what}, found {found}")]
    ArityMismatch {
        /// The operation that detected the mismatch.
        op: &'static str,
        /// Either "parameters" or "results".
        what: &'static str,
        /// The declared count.
        expected: usize,
        /// The provided count.
        found: usize,
    },

    /// A fixed-size value was built from the wrong number of bytes.
    #[error("expected {expected} bytes, found {found}")]
    LengthMismatch {
        /// The required length.
        expected: usize,
        /// The length that was provided.
        found: usize,
    },

    /// A handle was used after the resource it names was disposed.
    #[error("{0} used after it was disposed")]
    Disposed(&'static str),

    /// Guest code was not entered because the fuel counter was already zero.
    #[error("all fuel consumed before entering guest code")]
    OutOfFuel,

    /// An explicit fuel consumption request exceeded the remaining fuel.
    #[error("cannot consume {requested} units of fuel, only {remaining} remaining")]
    FuelOverflow {
        /// The amount that was requested.
        requested: u64,
        /// The amount that was left, unchanged by the request.
        remaining: u64,
    },

    /// A host callback failed while being called from guest code.
    #[error(transparent)]
    Host(Box<HostFailure>),

    /// Guest code trapped.
    #[error(transparent)]
    Trap(Box<GuestFault>),

    /// Guest code requested termination with an exit status.
    #[error(transparent)]
    Exit(ExitStatus),

    /// The API was used in a way that is not allowed.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// An index into a table or linear memory was out of range.
    #[error("{what} access out of bounds: index {index}, size {size}")]
    OutOfBounds {
        /// "table" or "memory".
        what: &'static str,
        /// The first index that was accessed.
        index: u64,
        /// The size of the accessed object at the time of the access.
        size: u64,
    },

    /// Any other failure raised by the engine, such as compilation or link
    /// errors.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

/// The class of an [`Error`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A value or signature had the wrong kind or arity.
    TypeMismatch,
    /// A fixed-size value was built from the wrong number of bytes.
    LengthMismatch,
    /// A handle outlived its resource.
    DisposedResource,
    /// The bridge refused to enter guest code without fuel.
    OutOfFuel,
    /// An explicit fuel request would have underflowed the counter.
    FuelOverflow,
    /// A host callback failed; the cause is available.
    HostCause,
    /// Guest code trapped with no host cause.
    GuestFault,
    /// Guest code exited with a valid status.
    Exit,
    /// The API was misused.
    Usage,
    /// An out of range table or memory access.
    OutOfBounds,
    /// Some other engine failure.
    Engine,
}

/// Which parameter or result a [`Error::TypeMismatch`] refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Position {
    /// The parameter at this index.
    Param(usize),
    /// The result at this index.
    Result(usize),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Param(i) => write!(f, "parameter {i}"),
            Position::Result(i) => write!(f, "result {i}"),
        }
    }
}

/// Ways of misusing this crate's API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum UsageError {
    /// A handle was used with a context other than the one that created it.
    #[error("{0} belongs to a different context")]
    WrongContext(&'static str),

    /// A suspending host function was entered while another suspension on
    /// the same context was still outstanding.
    #[error("a suspending host call is already outstanding on this context")]
    ConcurrentSuspension,

    /// A synchronous entry point was used on an async context, or the other
    /// way around.
    #[error("`{op}` cannot be used on a context {} async support", with_or_without(.async_support))]
    AsyncMismatch {
        /// The entry point that was used.
        op: &'static str,
        /// Whether the context was configured for async support.
        async_support: bool,
    },

    /// Fuel was queried or changed on a context without fuel metering.
    #[error("fuel metering is not enabled for this context")]
    FuelNotEnabled,

    /// A wasm type with no [`ValueKind`] was encountered.
    #[error("unsupported value type: {0}")]
    UnsupportedType(String),

    /// A host function was defined with the dynamic `Value` type in its
    /// signature, which has no single kind.
    #[error("host function signatures must name a concrete kind at every position")]
    DynamicHostSignature,

    /// An immutable global was written.
    #[error("cannot set the value of an immutable global")]
    ImmutableGlobal,

    /// A host object was downcast to the wrong type.
    #[error("host object is not a `{0}`")]
    ObjectType(&'static str),

    /// An `externref` that was not created by this crate reached the host.
    #[error("externref does not wrap a host object of this context")]
    ForeignExternRef,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn with_or_without(enabled: &bool) -> &'static str {
    if *enabled { "with" } else { "without" }
}

impl Error {
    /// Builds the error a host function returns to terminate the guest with
    /// `status`.
    ///
    /// Statuses in `[0, 126)` produce [`Error::Exit`]; anything else is not a
    /// valid exit status and produces a [`Error::Trap`] with code
    /// [`TrapCode::InvalidExitStatus`].
    pub fn exit(status: i32) -> Error {
        if ExitStatus::is_valid(status) {
            Error::Exit(ExitStatus::new(status))
        } else {
            log::debug!("rejecting invalid exit status {status}");
            Error::Trap(Box::new(GuestFault::new(
                TrapCode::InvalidExitStatus(status),
                Vec::new(),
            )))
        }
    }

    /// Returns the class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidCast { .. }
            | Error::NullReference(_)
            | Error::TypeMismatch { .. }
            | Error::ArityMismatch { .. } => ErrorKind::TypeMismatch,
            Error::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Error::Disposed(_) => ErrorKind::DisposedResource,
            Error::OutOfFuel => ErrorKind::OutOfFuel,
            Error::FuelOverflow { .. } => ErrorKind::FuelOverflow,
            Error::Host(_) => ErrorKind::HostCause,
            Error::Trap(_) => ErrorKind::GuestFault,
            Error::Exit(_) => ErrorKind::Exit,
            Error::Usage(_) => ErrorKind::Usage,
            Error::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Error::Engine(_) => ErrorKind::Engine,
        }
    }

    /// The error object originally returned by a failing host callback.
    pub fn host_cause(&self) -> Option<&anyhow::Error> {
        match self {
            Error::Host(failure) => Some(failure.cause()),
            _ => None,
        }
    }

    /// The trap code, if guest code trapped.
    pub fn trap_code(&self) -> Option<TrapCode> {
        match self {
            Error::Trap(fault) => Some(fault.code()),
            _ => None,
        }
    }

    /// The exit status, if guest code exited.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            Error::Exit(status) => Some(status.status()),
            _ => None,
        }
    }

    /// The wasm frames captured when this error crossed out of guest code.
    pub fn frames(&self) -> &[FrameInfo] {
        match self {
            Error::Host(failure) => failure.frames(),
            Error::Trap(fault) => fault.frames(),
            _ => &[],
        }
    }

    /// Whether this error means that fuel ran out, either before entering
    /// guest code or in the middle of it.
    pub fn is_out_of_fuel(&self) -> bool {
        matches!(self, Error::OutOfFuel) || self.trap_code() == Some(TrapCode::OutOfFuel)
    }

    /// Whether this error is already a boundary failure, in which case it
    /// crosses further host/guest transitions unchanged.
    ///
    /// Usage errors raised by a callback's own work are that callback's
    /// failure. Only a refused suspension keeps its kind, since it names the
    /// context's state rather than the callback.
    pub(crate) fn crosses_boundaries(&self) -> bool {
        matches!(
            self,
            Error::Host(_)
                | Error::Trap(_)
                | Error::Exit(_)
                | Error::OutOfFuel
                | Error::Usage(UsageError::ConcurrentSuspension)
        )
    }
}
