//! Machine-independent call signatures.

use crate::abi;
use crate::JitError;
use plugify_core::{Method, ValueType};
use std::str::FromStr;

/// Calling convention named in a manifest.
///
/// x86-64 has a single convention per OS, so everything lowers to the
/// host's default; the distinctions only matter on 32-bit x86, which the
/// Cranelift backend does not target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingConvention {
    #[default]
    Default,
    Cdecl,
    Stdcall,
    Fastcall,
    Thiscall,
    Vectorcall,
}

impl FromStr for CallingConvention {
    type Err = JitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(CallingConvention::Default),
            "cdecl" => Ok(CallingConvention::Cdecl),
            "stdcall" => Ok(CallingConvention::Stdcall),
            "fastcall" => Ok(CallingConvention::Fastcall),
            "thiscall" => Ok(CallingConvention::Thiscall),
            "vectorcall" => Ok(CallingConvention::Vectorcall),
            other => Err(JitError::UnknownCallConv(other.to_string())),
        }
    }
}

/// A function shape over the core value-type enumeration, independent of
/// any machine ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub call_conv: CallingConvention,
    pub ret: ValueType,
    pub params: Vec<ValueType>,
    pub var_index: Option<u8>,
}

impl Signature {
    pub fn new(call_conv: CallingConvention, ret: ValueType, params: Vec<ValueType>) -> Self {
        Signature {
            call_conv,
            ret,
            params,
            var_index: None,
        }
    }

    /// Derive the wire signature of a [`Method`].
    ///
    /// Hidden-return rewrite: when the declared return goes through a
    /// hidden pointer, the return type becomes `ptr64` and a `ptr64`
    /// leading argument is prepended for the return storage. By-ref
    /// parameters degrade to `ptr64`.
    ///
    /// Returns the signature plus whether the return is hidden.
    pub fn for_method(method: &Method) -> Result<(Signature, bool), JitError> {
        let call_conv = match method.call_conv.as_deref() {
            Some(s) => s.parse()?,
            None => CallingConvention::Default,
        };

        let ret = method.ret_type.ty;
        let hidden = abi::return_is_hidden(ret);

        let mut params = Vec::with_capacity(method.param_types.len() + usize::from(hidden));
        if hidden {
            params.push(ValueType::Pointer);
        }
        for param in &method.param_types {
            params.push(if param.is_ref() {
                ValueType::Pointer
            } else {
                param.ty
            });
        }

        Ok((
            Signature {
                call_conv,
                ret: if hidden { ValueType::Pointer } else { ret },
                params,
                var_index: method.var_index,
            },
            hidden,
        ))
    }
}
