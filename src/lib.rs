//! Typed value marshaling and function binding on top of Wasmtime.
//!
//! This crate is the layer between a host program and WebAssembly guest
//! code. It provides:
//!
//! * [`Value`], a dynamically typed box for every wasm value kind, with
//!   checked and widening accessors;
//! * [`Signature`] and [`Shape`] for matching host call shapes against
//!   function signatures, and [`TypedFunc`] wrappers cached per context;
//! * host functions, synchronous ([`Func::new`], [`Func::wrap`]) and
//!   suspending ([`Func::new_async`]);
//! * an error model that keeps a host callback's error intact while it
//!   unwinds through guest frames ([`Error::Host`]) and distinguishes it
//!   from guest faults ([`Error::Trap`]) and exit requests ([`Error::Exit`]);
//! * fuel accounting per [`Context`].
//!
//! ```
//! use wasmtime_bind::{Context, Engine, Func, HostCaller, Module, Value};
//!
//! # fn main() -> wasmtime_bind::Result<()> {
//! let engine = Engine::default();
//! let module = Module::new(&engine, r#"
//!     (module
//!         (import "host" "double" (func $double (param i32) (result i32)))
//!         (func (export "run") (param i32) (result i32)
//!             local.get 0
//!             call $double))
//! "#)?;
//!
//! let mut cx = Context::new(&engine)?;
//! let double = Func::wrap(&mut cx, |_: &mut HostCaller<'_>, x: i32| Ok(x * 2))?;
//! cx.define("host", "double", double)?;
//! let instance = cx.instantiate(&module)?;
//! let run = instance.get_func(&mut cx, "run")?.expect("`run` is exported");
//!
//! assert_eq!(run.call(&mut cx, &[Value::I32(21)])?, [Value::I32(42)]);
//!
//! let run = run.typed::<i32, i32>(&mut cx)?.expect("shape matches");
//! assert_eq!(run.call(&mut cx, 4)?, 8);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod config;
mod context;
mod engine;
mod error;
mod externals;
mod fuel;
mod func;
mod kind;
mod object;
mod signature;
mod trap;
mod value;

pub use crate::config::Config;
pub use crate::context::{AsContext, AsContextMut, Context, HostCaller};
#[doc(hidden)]
pub use crate::context::ContextData;
pub use crate::engine::{Engine, Instance, Module};
pub use crate::error::{Error, ErrorKind, Position, Result, UsageError};
pub use crate::externals::{Extern, Global, GlobalType, Memory, Table};
pub use crate::func::{Func, TypedFunc, WasmParams, WasmResults, WasmType};
pub use crate::kind::ValueKind;
pub use crate::object::ObjectRef;
pub use crate::signature::{Shape, Signature, Slot, MAX_TYPED_ARITY};
pub use crate::trap::{ExitStatus, FrameInfo, GuestFault, HostFailure, TrapCode};
pub use crate::value::{Value, V128};
