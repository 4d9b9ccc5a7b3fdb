#![cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]

//! End-to-end thunk tests: generate real machine code and call it.
//!
//! Covers both directions (out-thunk to a native target, in-thunk driven
//! as a native function pointer), their composition, and the hidden-return
//! path.

use plugify_core::manifest::{Method, Property};
use plugify_core::ValueType;
use plugify_jit::{CallingConvention, JitCall, JitCallback, JitError, Signature, WaitType};
use std::ffi::c_void;
use std::ptr;

// ============================================================================
// Native targets
// ============================================================================

extern "C" fn add_i32(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

extern "C" fn id_u64(v: u64) -> u64 {
    v
}

extern "C" fn id_bool(v: bool) -> bool {
    v
}

extern "C" fn mix_float(a: f32, b: f64) -> f64 {
    a as f64 * b
}

extern "C" fn seven() -> i32 {
    7
}

static mut SIDE_EFFECT: i32 = 0;

extern "C" fn record(v: i32) {
    unsafe { SIDE_EFFECT = v }
}

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Debug)]
struct Mat4 {
    m: [f32; 16],
}

extern "C" fn make_mat(seed: f32) -> Mat4 {
    let mut m = [0.0f32; 16];
    for (i, cell) in m.iter_mut().enumerate() {
        *cell = seed + i as f32;
    }
    Mat4 { m }
}

// ============================================================================
// Helpers
// ============================================================================

fn method(name: &str, ret: ValueType, params: &[ValueType]) -> Method {
    Method {
        name: name.into(),
        func_name: format!("ext_{}", name),
        call_conv: None,
        param_types: params.iter().map(|&ty| Property::plain(ty)).collect(),
        ret_type: Property::plain(ret),
        var_index: None,
    }
}

unsafe fn invoke(call: &JitCall, args: &[u64]) -> [u64; 2] {
    let mut ret = [0u64; 2];
    let args_ptr = if args.is_empty() {
        ptr::null()
    } else {
        args.as_ptr()
    };
    call.invoke(args_ptr, ret.as_mut_ptr());
    ret
}

// ============================================================================
// Out-thunks
// ============================================================================

#[test]
fn test_call_int_args() {
    let m = method("Add", ValueType::Int32, &[ValueType::Int32, ValueType::Int32]);
    let call = JitCall::for_method(&m, add_i32 as usize, WaitType::None).unwrap();

    let ret = unsafe { invoke(&call, &[2, 3]) };
    assert_eq!(ret[0] as u32 as i32, 5);

    let negative = [(-5i32) as u32 as u64, 3];
    let ret = unsafe { invoke(&call, &negative) };
    assert_eq!(ret[0] as u32 as i32, -2);
}

#[test]
fn test_call_u64_bit_exact() {
    let m = method("Id", ValueType::UInt64, &[ValueType::UInt64]);
    let call = JitCall::for_method(&m, id_u64 as usize, WaitType::None).unwrap();

    for value in [0u64, 1, u64::MAX, 0xDEAD_BEEF_CAFE_BABE] {
        let ret = unsafe { invoke(&call, &[value]) };
        assert_eq!(ret[0], value);
    }
}

#[test]
fn test_call_float_args() {
    let m = method("Mix", ValueType::Double, &[ValueType::Float, ValueType::Double]);
    let call = JitCall::for_method(&m, mix_float as usize, WaitType::None).unwrap();

    let args = [1.5f32.to_bits() as u64, 2.0f64.to_bits()];
    let ret = unsafe { invoke(&call, &args) };
    assert_eq!(f64::from_bits(ret[0]), 3.0);
}

#[test]
fn test_call_no_args() {
    let m = method("Seven", ValueType::Int32, &[]);
    let call = JitCall::for_method(&m, seven as usize, WaitType::None).unwrap();
    let ret = unsafe { invoke(&call, &[]) };
    assert_eq!(ret[0] as u32 as i32, 7);
}

#[test]
fn test_call_void_return() {
    let m = method("Record", ValueType::Void, &[ValueType::Int32]);
    let call = JitCall::for_method(&m, record as usize, WaitType::None).unwrap();
    unsafe {
        invoke(&call, &[41]);
        assert_eq!(SIDE_EFFECT, 41);
    }
}

#[test]
fn test_call_hidden_return() {
    let m = method("MakeMat", ValueType::Matrix4x4, &[ValueType::Float]);
    let call = JitCall::for_method(&m, make_mat as usize, WaitType::None).unwrap();

    let mut out = Mat4 { m: [0.0; 16] };
    let args = [&mut out as *mut Mat4 as u64, 2.0f32.to_bits() as u64];
    let ret = unsafe { invoke(&call, &args) };

    assert_eq!(out, make_mat(2.0));
    // The stub reports the buffer the callee wrote through
    assert_eq!(ret[0], &mut out as *mut Mat4 as u64);
}

#[test]
fn test_variadic_rejected() {
    let mut m = method("Printf", ValueType::Int32, &[ValueType::Pointer, ValueType::Int32]);
    m.var_index = Some(1);
    let err = JitCall::for_method(&m, seven as usize, WaitType::None).unwrap_err();
    assert!(matches!(err, JitError::Variadic));
}

#[cfg(all(unix, target_arch = "x86_64"))]
mod sysv_vectors {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Vec2f {
        x: f32,
        y: f32,
    }

    #[repr(C)]
    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Vec4f {
        x: f32,
        y: f32,
        z: f32,
        w: f32,
    }

    extern "C" fn make_vec2() -> Vec2f {
        Vec2f { x: 1.0, y: -2.0 }
    }

    extern "C" fn make_vec4() -> Vec4f {
        Vec4f { x: 1.0, y: 2.0, z: 3.0, w: 4.0 }
    }

    fn lane(slots: &[u64; 2], index: usize) -> f32 {
        let word = slots[index / 2];
        let bits = if index % 2 == 0 { word as u32 } else { (word >> 32) as u32 };
        f32::from_bits(bits)
    }

    #[test]
    fn test_vec2_returned_in_xmm0() {
        let m = method("MakeVec2", ValueType::Vector2, &[]);
        let call = JitCall::for_method(&m, make_vec2 as usize, WaitType::None).unwrap();
        let ret = unsafe { invoke(&call, &[]) };
        assert_eq!(lane(&ret, 0), 1.0);
        assert_eq!(lane(&ret, 1), -2.0);
    }

    #[test]
    fn test_vec4_returned_in_xmm_pair() {
        let m = method("MakeVec4", ValueType::Vector4, &[]);
        let call = JitCall::for_method(&m, make_vec4 as usize, WaitType::None).unwrap();
        let ret = unsafe { invoke(&call, &[]) };
        assert_eq!([lane(&ret, 0), lane(&ret, 1), lane(&ret, 2), lane(&ret, 3)], [1.0, 2.0, 3.0, 4.0]);
    }
}

// ============================================================================
// In-thunks
// ============================================================================

unsafe extern "C" fn add_handler(
    _method: *const Method,
    _user_data: *mut c_void,
    args: *const u64,
    count: usize,
    ret: *mut u64,
) {
    assert_eq!(count, 2);
    let a = *args as u32 as i32;
    let b = *args.add(1) as u32 as i32;
    *ret = a.wrapping_add(b) as u32 as u64;
}

#[test]
fn test_callback_marshals_args() {
    let m = method("Add", ValueType::Int32, &[ValueType::Int32, ValueType::Int32]);
    let cb = JitCallback::for_method(&m, add_handler, ptr::null_mut()).unwrap();

    let f: extern "C" fn(i32, i32) -> i32 = unsafe { cb.function() };
    assert_eq!(f(2, 3), 5);
    assert_eq!(f(-10, 4), -6);
}

unsafe extern "C" fn float_handler(
    _method: *const Method,
    _user_data: *mut c_void,
    args: *const u64,
    count: usize,
    ret: *mut u64,
) {
    assert_eq!(count, 2);
    let a = f32::from_bits(*args as u32);
    let b = f64::from_bits(*args.add(1));
    *ret = (a as f64 * b).to_bits();
}

#[test]
fn test_callback_float_marshalling() {
    let m = method("Mix", ValueType::Double, &[ValueType::Float, ValueType::Double]);
    let cb = JitCallback::for_method(&m, float_handler, ptr::null_mut()).unwrap();

    let f: extern "C" fn(f32, f64) -> f64 = unsafe { cb.function() };
    assert_eq!(f(1.5, 2.0), 3.0);
}

unsafe extern "C" fn user_data_handler(
    _method: *const Method,
    user_data: *mut c_void,
    _args: *const u64,
    _count: usize,
    ret: *mut u64,
) {
    *ret = user_data as u64;
}

#[test]
fn test_callback_user_data_baked_in() {
    let marker = 0x1234_5678usize;
    let m = method("Marker", ValueType::UInt64, &[]);
    let cb = JitCallback::for_method(&m, user_data_handler, marker as *mut c_void).unwrap();
    assert_eq!(cb.user_data() as usize, marker);

    let f: extern "C" fn() -> u64 = unsafe { cb.function() };
    assert_eq!(f(), marker as u64);
}

unsafe extern "C" fn mat_handler(
    _method: *const Method,
    _user_data: *mut c_void,
    args: *const u64,
    count: usize,
    ret: *mut u64,
) {
    // Hidden slot plus the seed
    assert_eq!(count, 2);
    assert_eq!(*args, ret as u64);
    let seed = f32::from_bits(*args.add(1) as u32);
    *(ret as *mut Mat4) = make_mat(seed);
}

#[test]
fn test_callback_hidden_return() {
    let m = method("MakeMat", ValueType::Matrix4x4, &[ValueType::Float]);
    let cb = JitCallback::for_method(&m, mat_handler, ptr::null_mut()).unwrap();

    let f: extern "C" fn(f32) -> Mat4 = unsafe { cb.function() };
    assert_eq!(f(3.0), make_mat(3.0));
}

// ============================================================================
// Composition: callback-in wrapping call-out is the identity bridge
// ============================================================================

struct Bridge {
    call: JitCall,
}

unsafe extern "C" fn bridge_handler(
    _method: *const Method,
    user_data: *mut c_void,
    args: *const u64,
    _count: usize,
    ret: *mut u64,
) {
    let bridge = &*(user_data as *const Bridge);
    bridge.call.invoke(args, ret);
}

#[test]
fn test_bridge_int_round_trip() {
    let m = method("Add", ValueType::Int32, &[ValueType::Int32, ValueType::Int32]);

    let out = JitCall::for_method(&m, add_i32 as usize, WaitType::None).unwrap();
    let bridge = Bridge { call: out };
    let cb = JitCallback::for_method(&m, bridge_handler, &bridge as *const Bridge as *mut c_void)
        .unwrap();

    let f: extern "C" fn(i32, i32) -> i32 = unsafe { cb.function() };
    assert_eq!(f(20, 22), 42);
}

#[test]
fn test_bridge_u64_bit_exact() {
    let m = method("Id", ValueType::UInt64, &[ValueType::UInt64]);

    let out = JitCall::for_method(&m, id_u64 as usize, WaitType::None).unwrap();
    let bridge = Bridge { call: out };
    let cb = JitCallback::for_method(&m, bridge_handler, &bridge as *const Bridge as *mut c_void)
        .unwrap();

    let f: extern "C" fn(u64) -> u64 = unsafe { cb.function() };
    for value in [0u64, 1, u64::MAX, 0xA5A5_A5A5_5A5A_5A5A] {
        assert_eq!(f(value), value);
    }
}

#[test]
fn test_bridge_bool_round_trip() {
    let m = method("Id", ValueType::Bool, &[ValueType::Bool]);

    let out = JitCall::for_method(&m, id_bool as usize, WaitType::None).unwrap();
    let bridge = Bridge { call: out };
    let cb = JitCallback::for_method(&m, bridge_handler, &bridge as *const Bridge as *mut c_void)
        .unwrap();

    let f: extern "C" fn(bool) -> bool = unsafe { cb.function() };
    assert!(f(true));
    assert!(!f(false));
}

#[test]
fn test_bridge_hidden_aggregate_round_trip() {
    let m = method("MakeMat", ValueType::Matrix4x4, &[ValueType::Float]);

    let out = JitCall::for_method(&m, make_mat as usize, WaitType::None).unwrap();
    let bridge = Bridge { call: out };
    let cb = JitCallback::for_method(&m, bridge_handler, &bridge as *const Bridge as *mut c_void)
        .unwrap();

    let f: extern "C" fn(f32) -> Mat4 = unsafe { cb.function() };
    assert_eq!(f(5.0), make_mat(5.0));
}

// ============================================================================
// Raw signature entry points
// ============================================================================

#[test]
fn test_generate_from_raw_signature() {
    let sig = Signature::new(
        CallingConvention::Default,
        ValueType::Int32,
        vec![ValueType::Int32, ValueType::Int32],
    );
    let call = JitCall::generate(&sig, add_i32 as usize, WaitType::None, false).unwrap();
    assert_eq!(call.target(), add_i32 as usize);
    assert_ne!(call.address(), 0);

    let ret = unsafe { invoke(&call, &[30, 12]) };
    assert_eq!(ret[0] as u32 as i32, 42);
}
