//! Numeric element abstraction (design note §9): kernels are written once,
//! generic over an abstract element type with `dequant`/`load`/`store`
//! operations, and dispatched at the dtype boundary to one of the concrete
//! instantiations enumerated below.

use half::f16;

use crate::dtype::{e5m2_to_f32, f32_to_e5m2, gf4_decode, KvDType, WeightDType};

/// A weight element format: given the packed byte representation of an
/// entire matrix, dequantize element `index` to `f32`.
pub trait WeightElem {
    const DTYPE: WeightDType;

    fn dequant(bytes: &[u8], index: usize) -> f32;
}

/// 4-bit group-quantized weights (group size 8: one `u32` word of packed
/// nibbles plus one `f16` scale per group, 6 bytes per group of 8 elements).
pub struct Gf4Elem;

impl WeightElem for Gf4Elem {
    const DTYPE: WeightDType = WeightDType::Gf4;

    fn dequant(bytes: &[u8], index: usize) -> f32 {
        const GROUP_BYTES: usize = 6; // 4 (word) + 2 (f16 scale)
        let group = index / 8;
        let lane = index % 8;
        let base = group * GROUP_BYTES;
        let word = u32::from_le_bytes(bytes[base..base + 4].try_into().unwrap());
        let scale = f16::from_le_bytes(bytes[base + 4..base + 6].try_into().unwrap()).to_f32();
        gf4_decode(word, lane, scale)
    }
}

/// FP8 E5M2 weights: one byte per element.
pub struct Fp8Elem;

impl WeightElem for Fp8Elem {
    const DTYPE: WeightDType = WeightDType::Fp8;

    fn dequant(bytes: &[u8], index: usize) -> f32 {
        e5m2_to_f32(bytes[index])
    }
}

/// FP16 weights: two little-endian bytes per element.
pub struct F16Elem;

impl WeightElem for F16Elem {
    const DTYPE: WeightDType = WeightDType::Fp16;

    fn dequant(bytes: &[u8], index: usize) -> f32 {
        let b: [u8; 2] = bytes[index * 2..index * 2 + 2].try_into().unwrap();
        f16::from_le_bytes(b).to_f32()
    }
}

/// A KV-cache element format: load and store one element in place, by
/// physical flat index into the cache's byte buffer.
pub trait KvElem {
    const DTYPE: KvDType;

    fn load(bytes: &[u8], index: usize) -> f32;
    fn store(bytes: &mut [u8], index: usize, value: f32);
}

/// FP8 E5M2 KV cache: one byte per element.
pub struct KvFp8Elem;

impl KvElem for KvFp8Elem {
    const DTYPE: KvDType = KvDType::Fp8;

    fn load(bytes: &[u8], index: usize) -> f32 {
        e5m2_to_f32(bytes[index])
    }

    fn store(bytes: &mut [u8], index: usize, value: f32) {
        bytes[index] = f32_to_e5m2(value);
    }
}

/// FP16 KV cache: two little-endian bytes per element.
pub struct KvF16Elem;

impl KvElem for KvF16Elem {
    const DTYPE: KvDType = KvDType::Fp16;

    fn load(bytes: &[u8], index: usize) -> f32 {
        let b: [u8; 2] = bytes[index * 2..index * 2 + 2].try_into().unwrap();
        f16::from_le_bytes(b).to_f32()
    }

    fn store(bytes: &mut [u8], index: usize, value: f32) {
        let b = f16::from_f32(value).to_le_bytes();
        bytes[index * 2..index * 2 + 2].copy_from_slice(&b);
    }
}
