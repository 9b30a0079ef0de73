mod context;
mod error;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::c_char;

use calm_core::{forward, UPDATE_KV_ONLY};
use calm_tensor::{DeviceBuffer, KvDType, WeightDType};

/// Execute a closure that returns a `CalmStatus`, catching any panics and
/// converting them into `CalmStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> CalmStatus>(f: F) -> CalmStatus {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic".to_string());
            CalmStatus::ErrorInternal
        }
    }
}

/// Create a new, empty inference context.
///
/// On success, writes a heap-allocated `CalmContext` pointer into
/// `*ctx_out` and returns `CalmStatus::Ok`. The caller must later call
/// `calm_context_destroy` to free the context.
#[no_mangle]
pub extern "C" fn calm_context_create(_backend: CalmBackendType, ctx_out: *mut *mut CalmContext) -> CalmStatus {
    catch_panic(|| {
        if ctx_out.is_null() {
            set_last_error("ctx_out is null".to_string());
            return CalmStatus::ErrorInvalidArgument;
        }
        let ctx = Box::new(CalmContext::new());
        unsafe {
            *ctx_out = Box::into_raw(ctx);
        }
        CalmStatus::Ok
    })
}

/// Destroy a context previously created by `calm_context_create`.
///
/// Passing a null pointer is a no-op and returns `CalmStatus::Ok`.
///
/// # Safety
/// `ctx` must be either null or a pointer previously returned via
/// `calm_context_create` and not yet destroyed.
#[no_mangle]
pub unsafe extern "C" fn calm_context_destroy(ctx: *mut CalmContext) -> CalmStatus {
    if ctx.is_null() {
        return CalmStatus::Ok;
    }
    drop(unsafe { Box::from_raw(ctx) });
    CalmStatus::Ok
}

/// Validate `config`, upload `weights` to device memory, and allocate the
/// run state and KV cache (§4.1, §6 `prepare`).
///
/// # Safety
/// `ctx`, `config`, and `weights` must be non-null and valid for reads;
/// `weights` must satisfy the preconditions documented on
/// [`context::host_weights_from_c`].
#[no_mangle]
pub unsafe extern "C" fn calm_prepare(ctx: *mut CalmContext, config: *const CalmConfig, weights: *const CalmWeights) -> CalmStatus {
    catch_panic(|| {
        if ctx.is_null() || config.is_null() || weights.is_null() {
            set_last_error("null argument".to_string());
            return CalmStatus::ErrorInvalidArgument;
        }
        let ctx = unsafe { &mut *ctx };
        let config = unsafe { &*config };

        let dbits = match WeightDType::from_dbits(config.dbits) {
            Some(d) => d,
            None => {
                set_last_error(format!("unsupported dbits {}", config.dbits));
                return CalmStatus::ErrorInvalidArgument;
            }
        };
        let kvbits = match KvDType::from_kvbits(config.kvbits) {
            Some(k) => k,
            None => {
                set_last_error(format!("unsupported kvbits {}", config.kvbits));
                return CalmStatus::ErrorInvalidArgument;
            }
        };

        let host_weights = match unsafe { context::host_weights_from_c(&*weights) } {
            Some(w) => w,
            None => {
                set_last_error("malformed weights: missing a required block".to_string());
                return CalmStatus::ErrorInvalidArgument;
            }
        };

        let core_config = context::config_from_c(config, dbits, kvbits);
        match calm_core::Transformer::prepare(core_config, host_weights, context::new_device()) {
            Ok(t) => {
                ctx.transformer = Some(t);
                CalmStatus::Ok
            }
            Err(e) => {
                set_last_error(e.to_string());
                CalmStatus::ErrorConfig
            }
        }
    })
}

/// Stage a host byte slice into a new device allocation, returning its
/// length on success. This is the `upload` utility of §6, usable
/// independently of `calm_prepare` by a weight loader staging blocks one
/// at a time.
///
/// # Safety
/// `host_ptr` must point to at least `size` initialized bytes.
#[no_mangle]
pub unsafe extern "C" fn calm_upload(host_ptr: *const u8, size: usize) -> usize {
    if host_ptr.is_null() {
        return 0;
    }
    let bytes = unsafe { std::slice::from_raw_parts(host_ptr, size) };
    let buf = DeviceBuffer::upload(bytes);
    buf.len()
}

/// Run one forward pass (§4.5, §6).
///
/// `flags` bit 0 is `CALM_UPDATE_KV_ONLY`: on prompt pre-fill the caller
/// sets it to skip classifier projection and avoid copying logits out.
/// On success, writes a pointer to a host-visible logits buffer of length
/// `V` into `*logits_out` (null when `CALM_UPDATE_KV_ONLY` is set) and the
/// vocab size into `*len_out`. The returned pointer is valid until the
/// next call to `calm_forward` or `calm_context_destroy` on this context.
///
/// # Safety
/// `ctx`, `logits_out`, and `len_out` must be non-null and valid for
/// writes. `calm_prepare` must have succeeded on `ctx` first.
#[no_mangle]
pub unsafe extern "C" fn calm_forward(
    ctx: *mut CalmContext,
    token: usize,
    pos: usize,
    flags: u32,
    logits_out: *mut *const f32,
    len_out: *mut usize,
) -> CalmStatus {
    catch_panic(|| {
        if ctx.is_null() || logits_out.is_null() || len_out.is_null() {
            set_last_error("null argument".to_string());
            return CalmStatus::ErrorInvalidArgument;
        }
        let ctx = unsafe { &mut *ctx };
        let transformer = match ctx.transformer.as_mut() {
            Some(t) => t,
            None => {
                set_last_error("calm_prepare must be called before calm_forward".to_string());
                return CalmStatus::ErrorInvalidArgument;
            }
        };

        if token >= transformer.config.v {
            set_last_error(format!("token {token} exceeds vocab size {}", transformer.config.v));
            return CalmStatus::ErrorInvalidArgument;
        }

        match forward(transformer, token, pos, flags) {
            Some(logits) => {
                ctx.last_logits = logits;
                unsafe {
                    *logits_out = ctx.last_logits.as_ptr();
                    *len_out = ctx.last_logits.len();
                }
                CalmStatus::Ok
            }
            None => {
                debug_assert_ne!(flags & UPDATE_KV_ONLY, 0);
                unsafe {
                    *logits_out = std::ptr::null();
                    *len_out = 0;
                }
                CalmStatus::Ok
            }
        }
    })
}

/// Reset the KV cache (e.g. to start a new sequence).
///
/// # Safety
/// `ctx` must be either null or a valid, non-destroyed context pointer.
#[no_mangle]
pub unsafe extern "C" fn calm_reset(ctx: *mut CalmContext) -> CalmStatus {
    if ctx.is_null() {
        return CalmStatus::ErrorInvalidArgument;
    }
    let ctx = unsafe { &mut *ctx };
    if let Some(t) = ctx.transformer.as_mut() {
        t.reset();
    }
    CalmStatus::Ok
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error, or
/// null if no error has occurred. The caller must free the returned
/// string with `calm_free_string`.
#[no_mangle]
pub extern "C" fn calm_last_error() -> *const c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null(),
    }
}

/// Free a string previously returned by `calm_last_error`.
///
/// # Safety
/// `s` must be either null or a pointer previously returned by
/// `calm_last_error` and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn calm_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { std::ffi::CString::from_raw(s) });
    }
}
