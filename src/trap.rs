//! Boundary failures and how they travel through the engine.
//!
//! Wasmtime reports every failure as an [`anyhow::Error`]. Errors returned by
//! host functions are passed through untouched, and errors raised by guest
//! code have a [`wasmtime::Trap`] at their root. Both get a
//! [`WasmBacktrace`] attached as context.
//!
//! This module keeps the crate's own [`Error`] as the payload of those
//! `anyhow` errors. A host callback's failure is wrapped exactly once, at the
//! boundary where it was raised, into a [`HostFailure`]. Every later crossing
//! recognizes that payload and forwards it as-is. As a result the outermost
//! caller sees the very same cause object, however many host/guest
//! transitions lie in between.

use crate::Error;
use core::fmt;
use wasmtime::WasmBacktrace;

/// A structured guest trap code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TrapCode {
    /// The call stack was exhausted.
    StackOverflow,
    /// An out of bounds linear memory access.
    MemoryOutOfBounds,
    /// A misaligned atomic memory access.
    HeapMisaligned,
    /// An out of bounds table access.
    TableOutOfBounds,
    /// An indirect call through a null table entry.
    IndirectCallToNull,
    /// An indirect call whose signature did not match.
    BadSignature,
    /// Integer arithmetic overflowed.
    IntegerOverflow,
    /// Integer division by zero.
    IntegerDivisionByZero,
    /// A float could not be converted to an integer.
    BadConversionToInteger,
    /// An `unreachable` instruction was executed.
    UnreachableCodeReached,
    /// Execution was interrupted by an epoch deadline.
    Interrupt,
    /// Guest code ran out of fuel.
    OutOfFuel,
    /// A null reference was dereferenced.
    NullReference,
    /// Guest code requested exit with a status outside `[0, 126)`.
    InvalidExitStatus(i32),
    /// A trap this crate has no name for.
    Unknown,
}

impl From<wasmtime::Trap> for TrapCode {
    fn from(trap: wasmtime::Trap) -> TrapCode {
        use wasmtime::Trap;
        match trap {
            Trap::StackOverflow => TrapCode::StackOverflow,
            Trap::MemoryOutOfBounds => TrapCode::MemoryOutOfBounds,
            Trap::HeapMisaligned => TrapCode::HeapMisaligned,
            Trap::TableOutOfBounds => TrapCode::TableOutOfBounds,
            Trap::IndirectCallToNull => TrapCode::IndirectCallToNull,
            Trap::BadSignature => TrapCode::BadSignature,
            Trap::IntegerOverflow => TrapCode::IntegerOverflow,
            Trap::IntegerDivisionByZero => TrapCode::IntegerDivisionByZero,
            Trap::BadConversionToInteger => TrapCode::BadConversionToInteger,
            Trap::UnreachableCodeReached => TrapCode::UnreachableCodeReached,
            Trap::Interrupt => TrapCode::Interrupt,
            Trap::OutOfFuel => TrapCode::OutOfFuel,
            Trap::NullReference => TrapCode::NullReference,
            _ => TrapCode::Unknown,
        }
    }
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self {
            TrapCode::StackOverflow => "call stack exhausted",
            TrapCode::MemoryOutOfBounds => "out of bounds memory access",
            TrapCode::HeapMisaligned => "misaligned memory access",
            TrapCode::TableOutOfBounds => "undefined element: out of bounds table access",
            TrapCode::IndirectCallToNull => "uninitialized element",
            TrapCode::BadSignature => "indirect call type mismatch",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::IntegerDivisionByZero => "integer divide by zero",
            TrapCode::BadConversionToInteger => "invalid conversion to integer",
            TrapCode::UnreachableCodeReached => "wasm `unreachable` instruction executed",
            TrapCode::Interrupt => "interrupt",
            TrapCode::OutOfFuel => "all fuel consumed by WebAssembly",
            TrapCode::NullReference => "null reference",
            TrapCode::InvalidExitStatus(status) => {
                return write!(f, "invalid exit status {status}, expected a value in [0, 126)");
            }
            TrapCode::Unknown => "unknown trap",
        };
        f.write_str(desc)
    }
}

/// One wasm frame of a captured backtrace, innermost first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    module_name: Option<String>,
    func_index: u32,
    func_name: Option<String>,
}

impl FrameInfo {
    /// The index of the function within its module.
    pub fn func_index(&self) -> u32 {
        self.func_index
    }

    /// The function's name from the `name` section, if the module has one.
    pub fn func_name(&self) -> Option<&str> {
        self.func_name.as_deref()
    }

    /// The name of the module the function belongs to, if it has one.
    pub fn module_name(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    fn capture(err: &anyhow::Error) -> Vec<FrameInfo> {
        let Some(backtrace) = err.downcast_ref::<WasmBacktrace>() else {
            return Vec::new();
        };
        backtrace
            .frames()
            .iter()
            .map(|frame| FrameInfo {
                module_name: frame.module().name().map(str::to_string),
                func_index: frame.func_index(),
                func_name: frame.func_name().map(str::to_string),
            })
            .collect()
    }
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module_name {
            write!(f, "{module}!")?;
        }
        match &self.func_name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "<wasm function {}>", self.func_index),
        }
    }
}

/// A host callback failed while being called from guest code.
///
/// The error the callback returned is kept as [`HostFailure::cause`],
/// exactly as it was returned, and is also reported as this failure's
/// [`source`](std::error::Error::source).
#[derive(Debug)]
pub struct HostFailure {
    function: Option<String>,
    cause: anyhow::Error,
    frames: Vec<FrameInfo>,
}

impl HostFailure {
    /// The name the failing host function was defined under, if any.
    pub fn function(&self) -> Option<&str> {
        self.function.as_deref()
    }

    /// The error object the host callback returned.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Takes ownership of the host callback's error object.
    pub fn into_cause(self) -> anyhow::Error {
        self.cause
    }

    /// The wasm frames that were active when the failure was raised.
    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "host function `{name}` failed"),
            None => f.write_str("host function failed"),
        }
    }
}

impl std::error::Error for HostFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

/// Guest code trapped with no host cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestFault {
    code: TrapCode,
    frames: Vec<FrameInfo>,
}

impl GuestFault {
    pub(crate) fn new(code: TrapCode, frames: Vec<FrameInfo>) -> GuestFault {
        GuestFault { code, frames }
    }

    /// The trap code.
    pub fn code(&self) -> TrapCode {
        self.code
    }

    /// The wasm frames active when the trap was raised.
    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }
}

impl fmt::Display for GuestFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wasm trap: {}", self.code)?;
        if let Some(frame) = self.frames.first() {
            write!(f, " in {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for GuestFault {}

/// Guest code exited with a valid status.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExitStatus(i32);

impl ExitStatus {
    pub(crate) fn is_valid(status: i32) -> bool {
        (0..126).contains(&status)
    }

    pub(crate) fn new(status: i32) -> ExitStatus {
        debug_assert!(ExitStatus::is_valid(status));
        ExitStatus(status)
    }

    /// The exit status.
    pub fn status(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exited with status {}", self.0)
    }
}

impl std::error::Error for ExitStatus {}

/// Packs `err` so that it can be returned from a host function to the
/// engine.
pub(crate) fn into_wasm(err: Error) -> anyhow::Error {
    anyhow::Error::new(err)
}

/// Classifies the error returned by a host callback at the boundary where it
/// was raised.
///
/// Boundary failures that come back from a nested call are forwarded as-is.
/// Anything else becomes the cause of a new [`HostFailure`]; the cause
/// object itself is moved, never re-wrapped.
pub(crate) fn host_failure(function: Option<String>, err: anyhow::Error) -> Error {
    if err
        .downcast_ref::<Error>()
        .is_some_and(Error::crosses_boundaries)
    {
        match err.downcast::<Error>() {
            Ok(err) => return err,
            Err(err) => return Error::Engine(err),
        }
    }
    log::debug!(
        "host function `{}` failed: {err:#}",
        function.as_deref().unwrap_or("<anonymous>")
    );
    Error::Host(Box::new(HostFailure {
        function,
        cause: err,
        frames: Vec::new(),
    }))
}

/// Recovers a crate error from the result of calling into guest code.
pub(crate) fn from_wasm(err: anyhow::Error) -> Error {
    let frames = FrameInfo::capture(&err);
    let err = match err.downcast::<Error>() {
        Ok(mut err) => {
            match &mut err {
                Error::Host(failure) if failure.frames.is_empty() => failure.frames = frames,
                Error::Trap(fault) if fault.frames.is_empty() => fault.frames = frames,
                _ => {}
            }
            return err;
        }
        Err(err) => err,
    };
    match err.downcast_ref::<wasmtime::Trap>() {
        Some(trap) => Error::Trap(Box::new(GuestFault::new((*trap).into(), frames))),
        None => Error::Engine(err),
    }
}
