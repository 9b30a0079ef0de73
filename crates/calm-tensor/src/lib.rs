//! `calm-tensor` - Device memory management and numeric kernels for the
//! calm-rs transformer inference core.
//!
//! This crate provides:
//! - A `Device` trait for pluggable compute devices (CPU reference, Metal)
//! - A `DeviceBuffer` type standing in for device-resident allocations
//! - The `WeightElem`/`KvElem` numeric element abstraction, monomorphized
//!   per `(dbits, kvbits)` instantiation
//! - Weight/KV-cache precision tags (`WeightDType`, `KvDType`) and their
//!   encode/decode primitives (gf4, e5m2)

pub mod cpu;
pub mod device;
pub mod dtype;
pub mod element;
pub mod error;
#[cfg(feature = "metal")]
pub mod metal;
pub mod storage;

// Re-export primary types at the crate root for convenience.
pub use cpu::CpuDevice;
pub use device::Device;
pub use dtype::{e5m2_to_f32, f32_to_e5m2, gf4_decode, gf4_encode, KvDType, WeightDType};
pub use element::{Fp8Elem, Gf4Elem, KvElem, KvF16Elem, KvFp8Elem, WeightElem, F16Elem};
pub use error::{DeviceFault, Result, TensorError};
pub use storage::DeviceBuffer;
