//! Process-wide JIT runtime.
//!
//! One Cranelift ISA for the host plus a registry of per-thunk
//! [`JITModule`]s keyed by entry address. All thunk code lives here; a
//! thunk's owner asks the runtime to release its module when it drops.
//! The registry mutex also serializes code generation.

use crate::JitError;
use cranelift_codegen::ir;
use cranelift_codegen::isa::{CallConv, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, Linkage, Module};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;

static RUNTIME: OnceCell<Mutex<JitRuntime>> = OnceCell::new();

/// Host facts needed while emitting IR, copied out of the runtime so
/// emission closures never re-enter the lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HostInfo {
    pub pointer: ir::Type,
    pub call_conv: CallConv,
}

pub(crate) struct JitRuntime {
    isa: OwnedTargetIsa,
    modules: HashMap<usize, JITModule>,
    next_id: u32,
}

impl JitRuntime {
    fn create() -> Result<Mutex<JitRuntime>, JitError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| JitError::Runtime(format!("Failed to set opt_level: {}", e)))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| JitError::Runtime(format!("Failed to set is_pic: {}", e)))?;
        let flags = settings::Flags::new(flag_builder);

        let isa = cranelift_native::builder()
            .map_err(|e| JitError::Runtime(format!("Unsupported host: {}", e)))?
            .finish(flags)
            .map_err(|e| JitError::Runtime(format!("Failed to build ISA: {}", e)))?;

        Ok(Mutex::new(JitRuntime {
            isa,
            modules: HashMap::new(),
            next_id: 0,
        }))
    }

    fn instance() -> Result<&'static Mutex<JitRuntime>, JitError> {
        RUNTIME.get_or_try_init(Self::create)
    }

    /// Pointer type and default calling convention of the host.
    pub(crate) fn host() -> Result<HostInfo, JitError> {
        let runtime = Self::instance()?.lock();
        Ok(HostInfo {
            pointer: runtime.isa.pointer_type(),
            call_conv: runtime.isa.default_call_conv(),
        })
    }

    /// Compile one function and return its entry address.
    ///
    /// `emit` receives a builder positioned in the sealed entry block and
    /// must terminate the function.
    pub(crate) fn compile(
        sig: ir::Signature,
        emit: impl FnOnce(&mut FunctionBuilder<'_>, ir::Block) -> Result<(), JitError>,
    ) -> Result<usize, JitError> {
        let mut runtime = Self::instance()?.lock();
        let id = runtime.next_id;
        runtime.next_id += 1;

        let builder = JITBuilder::with_isa(runtime.isa.clone(), default_libcall_names());
        let mut module = JITModule::new(builder);

        let result = Self::compile_in(&mut module, id, sig, emit);
        match result {
            Ok(code) => {
                runtime.modules.insert(code, module);
                Ok(code)
            }
            Err(err) => {
                // Nothing escaped, reclaim the module's mappings
                unsafe { module.free_memory() };
                Err(err)
            }
        }
    }

    fn compile_in(
        module: &mut JITModule,
        id: u32,
        sig: ir::Signature,
        emit: impl FnOnce(&mut FunctionBuilder<'_>, ir::Block) -> Result<(), JitError>,
    ) -> Result<usize, JitError> {
        let name = format!("thunk_{}", id);
        let func_id = module
            .declare_function(&name, Linkage::Local, &sig)
            .map_err(|e| JitError::Codegen(e.to_string()))?;

        let mut ctx = Context::new();
        ctx.func.signature = sig;
        ctx.func.name = ir::UserFuncName::user(0, id);

        let mut fb_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            builder.seal_block(entry);

            emit(&mut builder, entry)?;

            builder.finalize();
        }

        module
            .define_function(func_id, &mut ctx)
            .map_err(|e| JitError::Codegen(e.to_string()))?;
        module
            .finalize_definitions()
            .map_err(|e| JitError::Codegen(e.to_string()))?;

        Ok(module.get_finalized_function(func_id) as usize)
    }

    /// Release the module owning the thunk at `address`.
    ///
    /// The caller guarantees no pointer into the code is still live.
    pub(crate) fn release(address: usize) {
        if let Some(runtime) = RUNTIME.get() {
            let mut runtime = runtime.lock();
            if let Some(module) = runtime.modules.remove(&address) {
                unsafe { module.free_memory() };
            }
        }
    }
}
