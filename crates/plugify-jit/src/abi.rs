//! Maps the core value-type enumeration onto the target machine ABI.
//!
//! Arguments always occupy one 8-byte slot: integers and chars as their
//! width, floats in an FP register, everything else by pointer. Returns are
//! classified per platform; aggregates that the ABI returns through an
//! implicit pointer are [`RetClass::Hidden`].

use crate::JitError;
use cranelift_codegen::ir::{types, Type};
use plugify_core::ValueType;

/// How a declared return value travels back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetClass {
    /// Nothing comes back
    Void,

    /// One register of the given type
    Scalar(Type),

    /// Several registers, stored contiguously into the return buffer
    Regs(Vec<Type>),

    /// Caller passes a pointer; the callee writes through it
    Hidden,
}

impl RetClass {
    /// Byte offsets at which each register value lands in the return
    /// buffer, matching the aggregate's memory layout.
    pub fn offsets(&self) -> Vec<(Type, i32)> {
        match self {
            RetClass::Void | RetClass::Hidden => Vec::new(),
            RetClass::Scalar(ty) => vec![(*ty, 0)],
            RetClass::Regs(tys) => {
                let mut offset = 0;
                tys.iter()
                    .map(|&ty| {
                        let entry = (ty, offset);
                        offset += ty.bytes() as i32;
                        entry
                    })
                    .collect()
            }
        }
    }
}

/// Register class of a value used as an argument slot.
pub fn param_type(ty: ValueType) -> Result<Type, JitError> {
    Ok(match ty {
        ValueType::Void => return Err(JitError::UnsupportedParameter(ty)),
        ValueType::Bool | ValueType::Char8 | ValueType::Int8 | ValueType::UInt8 => types::I8,
        ValueType::Char16 | ValueType::Int16 | ValueType::UInt16 => types::I16,
        ValueType::Int32 | ValueType::UInt32 => types::I32,
        ValueType::Int64 | ValueType::UInt64 => types::I64,
        ValueType::Float => types::F32,
        ValueType::Double => types::F64,
        // Pointers, strings, callables and aggregates all pass by pointer
        _ => types::I64,
    })
}

/// Whether the declared return of `ty` travels through a hidden pointer on
/// this target.
pub fn return_is_hidden(ty: ValueType) -> bool {
    classify_return(ty) == RetClass::Hidden
}

/// Return classification for the host target.
pub fn classify_return(ty: ValueType) -> RetClass {
    match ty {
        ValueType::Void => RetClass::Void,
        ValueType::Bool | ValueType::Char8 | ValueType::Int8 | ValueType::UInt8 => {
            RetClass::Scalar(types::I8)
        }
        ValueType::Char16 | ValueType::Int16 | ValueType::UInt16 => RetClass::Scalar(types::I16),
        ValueType::Int32 | ValueType::UInt32 => RetClass::Scalar(types::I32),
        ValueType::Int64 | ValueType::UInt64 => RetClass::Scalar(types::I64),
        ValueType::Float => RetClass::Scalar(types::F32),
        ValueType::Double => RetClass::Scalar(types::F64),
        ValueType::Pointer | ValueType::Function => RetClass::Scalar(types::I64),
        ValueType::Vector2 => vector2_return(),
        ValueType::Vector3 => vector_return(3),
        ValueType::Vector4 => vector_return(4),
        // Strings, `any` and arrays are non-trivial objects; the matrix
        // never fits in registers
        _ => RetClass::Hidden,
    }
}

/// `vec2` fits in registers on every supported target.
fn vector2_return() -> RetClass {
    #[cfg(all(windows, target_arch = "x86_64"))]
    {
        // Packed into rax
        RetClass::Scalar(types::I64)
    }
    #[cfg(all(not(windows), target_arch = "x86_64"))]
    {
        // Both floats packed into xmm0
        RetClass::Scalar(types::F64)
    }
    #[cfg(target_arch = "aarch64")]
    {
        // Homogeneous float aggregate: s0, s1
        RetClass::Regs(vec![types::F32, types::F32])
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        RetClass::Hidden
    }
}

/// `vec3`/`vec4` placement for the host target.
fn vector_return(lanes: usize) -> RetClass {
    #[cfg(all(windows, target_arch = "x86_64"))]
    {
        let _ = lanes;
        RetClass::Hidden
    }
    #[cfg(all(not(windows), target_arch = "x86_64"))]
    {
        // Two SSE eightbytes: xmm0 holds (x, y), xmm1 holds (z[, w])
        let _ = lanes;
        RetClass::Regs(vec![types::F64, types::F64])
    }
    #[cfg(target_arch = "aarch64")]
    {
        // Homogeneous float aggregate: one s-register per lane
        RetClass::Regs(vec![types::F32; lanes])
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = lanes;
        RetClass::Hidden
    }
}
