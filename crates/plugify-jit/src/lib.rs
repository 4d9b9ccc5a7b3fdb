//! JIT-generated thunks bridging calls across language runtimes.
//!
//! Two directions:
//!
//! - [`JitCall`] wraps a native function of arbitrary signature behind a
//!   uniform `fn(args: *const u64, ret: *mut u64)` entry, so generated code
//!   from any language module can invoke it without knowing the target ABI.
//! - [`JitCallback`] is the inverse: it produces a native-ABI function
//!   pointer that re-marshals its arguments into the uniform shape and
//!   hands them to a host callback.
//!
//! Machine code is produced with Cranelift and owned by a process-wide
//! runtime; dropping a thunk releases its code.

pub mod abi;
pub mod call;
pub mod callback;
pub mod runtime;
pub mod signature;

pub use call::{CallThunk, JitCall, WaitType};
pub use callback::{CallbackHandler, CallbackThunk, JitCallback};
pub use signature::{CallingConvention, Signature};

use thiserror::Error;

/// Errors from thunk generation
#[derive(Debug, Clone, Error)]
pub enum JitError {
    /// A parameter type has no 8-byte slot representation
    #[error("Parameters wider than 64 bits are not supported: {0}")]
    UnsupportedParameter(plugify_core::ValueType),

    /// Variadic signatures cannot be expressed by the backend
    #[error("Variadic signatures are not supported")]
    Variadic,

    /// Unknown calling convention string
    #[error("Unknown calling convention: {0}")]
    UnknownCallConv(String),

    /// Cranelift reported a failure
    #[error("Code generation failed: {0}")]
    Codegen(String),

    /// The host has no usable JIT backend
    #[error("JIT runtime unavailable: {0}")]
    Runtime(String),
}
