//! Outgoing thunks: a uniform `(args, ret)` entry around a native target.

use crate::abi::{self, RetClass};
use crate::runtime::JitRuntime;
use crate::signature::Signature;
use crate::JitError;
use cranelift_codegen::ir::{self, types, AbiParam, ArgumentPurpose, InstBuilder, MemFlags};
use plugify_core::Method;

/// The uniform entry every generated out-thunk exposes.
///
/// `args` points at one 8-byte slot per argument in declaration order;
/// with a hidden return, slot 0 holds the pointer to caller-allocated
/// return storage. `ret` points at storage for the declared return, up to
/// 2 x u64 / 4 x f32.
pub type CallThunk = unsafe extern "C" fn(args: *const u64, ret: *mut u64);

/// Debugging aid emitted immediately before the target call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitType {
    /// Call straight through
    #[default]
    None,

    /// Emit a trap so an attached debugger stops on first entry
    Breakpoint,

    /// Call `getchar` so a debugger can be attached by hand
    Keypress,
}

extern "C" {
    fn getchar() -> i32;
}

/// A generated out-thunk and the code behind it.
///
/// The machine code is owned by the process-wide JIT runtime; dropping the
/// `JitCall` releases it. The stub itself never allocates and preserves
/// the target's calling convention exactly.
#[derive(Debug)]
pub struct JitCall {
    function: usize,
    target: usize,
}

impl JitCall {
    /// Generate a thunk for a [`Method`] whose implementation lives at
    /// `target`.
    pub fn for_method(method: &Method, target: usize, wait: WaitType) -> Result<Self, JitError> {
        let (signature, hidden) = Signature::for_method(method)?;
        Self::generate(&signature, target, wait, hidden)
    }

    /// Generate a thunk for an explicit signature.
    ///
    /// `hidden` marks the first parameter as the hidden-return pointer;
    /// [`Signature::for_method`] produces signatures in that shape.
    pub fn generate(
        signature: &Signature,
        target: usize,
        wait: WaitType,
        hidden: bool,
    ) -> Result<Self, JitError> {
        if signature.var_index.is_some() {
            return Err(JitError::Variadic);
        }

        let host = JitRuntime::host()?;

        // Slot load types, one per declared argument; with a hidden
        // return, slot 0 is the `ptr64` for the return storage
        let mut slots = Vec::with_capacity(signature.params.len());
        for &param in &signature.params {
            slots.push(abi::param_type(param)?);
        }

        let ret_class = if hidden {
            RetClass::Hidden
        } else {
            abi::classify_return(signature.ret)
        };

        let mut target_sig = ir::Signature::new(host.call_conv);
        for (i, &ty) in slots.iter().enumerate() {
            if hidden && i == 0 {
                target_sig
                    .params
                    .push(AbiParam::special(host.pointer, ArgumentPurpose::StructReturn));
            } else {
                target_sig.params.push(AbiParam::new(ty));
            }
        }
        for (ty, _) in ret_class.offsets() {
            target_sig.returns.push(AbiParam::new(ty));
        }

        let mut entry_sig = ir::Signature::new(host.call_conv);
        entry_sig.params.push(AbiParam::new(host.pointer)); // args
        entry_sig.params.push(AbiParam::new(host.pointer)); // ret

        let function = JitRuntime::compile(entry_sig, move |builder, entry| {
            let args_ptr = builder.block_params(entry)[0];
            let ret_ptr = builder.block_params(entry)[1];

            let mut call_args = Vec::with_capacity(slots.len());
            for (i, &ty) in slots.iter().enumerate() {
                let offset = (i * 8) as i32;
                let value = builder.ins().load(ty, MemFlags::trusted(), args_ptr, offset);
                call_args.push(value);
            }

            match wait {
                WaitType::None => {}
                WaitType::Breakpoint => {
                    builder.ins().debugtrap();
                }
                WaitType::Keypress => {
                    let mut wait_sig = ir::Signature::new(host.call_conv);
                    wait_sig.returns.push(AbiParam::new(types::I32));
                    let wait_ref = builder.import_signature(wait_sig);
                    let wait_fn: unsafe extern "C" fn() -> i32 = getchar;
                    let wait_addr = builder.ins().iconst(host.pointer, wait_fn as usize as i64);
                    builder.ins().call_indirect(wait_ref, wait_addr, &[]);
                }
            }

            let sig_ref = builder.import_signature(target_sig);
            let callee = builder.ins().iconst(host.pointer, target as i64);
            let call = builder.ins().call_indirect(sig_ref, callee, &call_args);

            match &ret_class {
                RetClass::Void => {}
                RetClass::Hidden => {
                    // The callee filled the buffer; hand its address back
                    let sret = call_args[0];
                    builder.ins().store(MemFlags::trusted(), sret, ret_ptr, 0);
                }
                _ => {
                    let results = builder.inst_results(call).to_vec();
                    for ((_, offset), value) in ret_class.offsets().iter().zip(results) {
                        builder
                            .ins()
                            .store(MemFlags::trusted(), value, ret_ptr, *offset);
                    }
                }
            }

            builder.ins().return_(&[]);
            Ok(())
        })?;

        Ok(JitCall { function, target })
    }

    /// Entry address of the generated stub.
    pub fn address(&self) -> usize {
        self.function
    }

    /// Address this thunk calls into.
    pub fn target(&self) -> usize {
        self.target
    }

    /// The stub as a callable function pointer.
    pub fn thunk(&self) -> CallThunk {
        unsafe { std::mem::transmute(self.function) }
    }

    /// Invoke the target through the stub.
    ///
    /// # Safety
    ///
    /// `args` must hold one slot per declared argument and `ret` must be
    /// writable storage large enough for the declared return.
    pub unsafe fn invoke(&self, args: *const u64, ret: *mut u64) {
        (self.thunk())(args, ret)
    }
}

impl Drop for JitCall {
    fn drop(&mut self) {
        JitRuntime::release(self.function);
    }
}

// Generated code is immutable after build
unsafe impl Send for JitCall {}
unsafe impl Sync for JitCall {}
