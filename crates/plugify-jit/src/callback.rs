//! Incoming thunks: a native-ABI entry that funnels into a host callback.

use crate::abi::{self, RetClass};
use crate::runtime::JitRuntime;
use crate::signature::Signature;
use crate::JitError;
use cranelift_codegen::ir::{
    self, types, AbiParam, ArgumentPurpose, InstBuilder, MemFlags, StackSlotData, StackSlotKind,
};
use plugify_core::Method;
use std::ffi::c_void;

/// Host-side hook a generated in-thunk re-marshals into.
///
/// `args` points at one 8-byte slot per parameter of the emitted native
/// signature; with a hidden return, slot 0 holds the caller-provided
/// return-storage pointer and `ret` aliases it. Otherwise `ret` points at
/// thunk-local return storage the hook must fill.
pub type CallbackHandler = unsafe extern "C" fn(
    method: *const Method,
    user_data: *mut c_void,
    args: *const u64,
    count: usize,
    ret: *mut u64,
);

/// Entry address of a generated in-thunk; its function type is the
/// method's native signature.
pub type CallbackThunk = usize;

/// A generated in-thunk and the code behind it.
///
/// The callback pointer and `user_data` are baked into the code as
/// immediates. Once generated the stub is read-only and callable from any
/// thread.
pub struct JitCallback {
    function: usize,
    user_data: usize,
}

impl JitCallback {
    /// Generate a native-ABI entry for `method` that forwards to `handler`.
    ///
    /// The `method` pointer is captured in the generated code and must
    /// stay valid for the thunk's lifetime.
    pub fn for_method(
        method: *const Method,
        handler: CallbackHandler,
        user_data: *mut c_void,
    ) -> Result<Self, JitError> {
        let (signature, hidden) = Signature::for_method(unsafe { &*method })?;
        Self::generate(&signature, method, handler, user_data, hidden)
    }

    /// Generate an in-thunk for an explicit signature.
    pub fn generate(
        signature: &Signature,
        method: *const Method,
        handler: CallbackHandler,
        user_data: *mut c_void,
        hidden: bool,
    ) -> Result<Self, JitError> {
        if signature.var_index.is_some() {
            return Err(JitError::Variadic);
        }

        let host = JitRuntime::host()?;

        // With a hidden return, slot 0 is the `ptr64` for the return
        // storage
        let mut slots = Vec::with_capacity(signature.params.len());
        for &param in &signature.params {
            slots.push(abi::param_type(param)?);
        }

        let ret_class = if hidden {
            RetClass::Hidden
        } else {
            abi::classify_return(signature.ret)
        };

        let mut native_sig = ir::Signature::new(host.call_conv);
        for (i, &ty) in slots.iter().enumerate() {
            if hidden && i == 0 {
                native_sig
                    .params
                    .push(AbiParam::special(host.pointer, ArgumentPurpose::StructReturn));
            } else {
                native_sig.params.push(AbiParam::new(ty));
            }
        }
        for (ty, _) in ret_class.offsets() {
            native_sig.returns.push(AbiParam::new(ty));
        }

        let arg_count = slots.len();
        let method_addr = method as usize;
        let handler_addr = handler as usize;
        let data_addr = user_data as usize;

        let function = JitRuntime::compile(native_sig, move |builder, entry| {
            let params = builder.block_params(entry).to_vec();

            // Uniform argument array lives on this frame
            let args_size = (8 * arg_count.max(1)) as u32;
            let args_slot = builder.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                args_size,
                4,
            ));
            let ret_slot = builder.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                16,
                4,
            ));

            // Spill incoming registers, widening everything to 8 bytes
            for (i, (&value, &ty)) in params.iter().zip(&slots).enumerate() {
                let offset = (i * 8) as i32;
                let wide = if ty == types::I64 {
                    value
                } else if ty == types::F64 {
                    builder.ins().bitcast(types::I64, MemFlags::new(), value)
                } else if ty == types::F32 {
                    let bits = builder.ins().bitcast(types::I32, MemFlags::new(), value);
                    builder.ins().uextend(types::I64, bits)
                } else {
                    builder.ins().uextend(types::I64, value)
                };
                builder.ins().stack_store(wide, args_slot, offset);
            }

            let args_addr = builder.ins().stack_addr(host.pointer, args_slot, 0);

            // With a hidden return the callback writes straight through the
            // caller's buffer
            let ret_addr = if hidden {
                params[0]
            } else {
                builder.ins().stack_addr(host.pointer, ret_slot, 0)
            };

            let mut handler_sig = ir::Signature::new(host.call_conv);
            handler_sig.params.push(AbiParam::new(host.pointer)); // method
            handler_sig.params.push(AbiParam::new(host.pointer)); // user_data
            handler_sig.params.push(AbiParam::new(host.pointer)); // args
            handler_sig.params.push(AbiParam::new(host.pointer)); // count
            handler_sig.params.push(AbiParam::new(host.pointer)); // ret
            let handler_ref = builder.import_signature(handler_sig);

            let method_val = builder.ins().iconst(host.pointer, method_addr as i64);
            let data_val = builder.ins().iconst(host.pointer, data_addr as i64);
            let count_val = builder.ins().iconst(host.pointer, arg_count as i64);
            let handler_val = builder.ins().iconst(host.pointer, handler_addr as i64);

            builder.ins().call_indirect(
                handler_ref,
                handler_val,
                &[method_val, data_val, args_addr, count_val, ret_addr],
            );

            match &ret_class {
                RetClass::Void | RetClass::Hidden => {
                    // An sret function returns its pointer implicitly
                    builder.ins().return_(&[]);
                }
                _ => {
                    let mut results = Vec::new();
                    for (ty, offset) in ret_class.offsets() {
                        results.push(builder.ins().stack_load(ty, ret_slot, offset));
                    }
                    builder.ins().return_(&results);
                }
            }
            Ok(())
        })?;

        Ok(JitCallback {
            function,
            user_data: data_addr,
        })
    }

    /// Entry address of the generated native-ABI stub.
    pub fn address(&self) -> CallbackThunk {
        self.function
    }

    /// The user data baked into the stub.
    pub fn user_data(&self) -> *mut c_void {
        self.user_data as *mut c_void
    }

    /// The stub reinterpreted as a concrete function pointer type.
    ///
    /// # Safety
    ///
    /// `F` must be the exact native function type of the generated
    /// signature.
    pub unsafe fn function<F: Copy>(&self) -> F {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        std::mem::transmute_copy(&self.function)
    }
}

impl Drop for JitCallback {
    fn drop(&mut self) {
        JitRuntime::release(self.function);
    }
}

// Generated code is immutable after build
unsafe impl Send for JitCallback {}
unsafe impl Sync for JitCallback {}
