use std::fmt;

use half::f16;

/// Weight precision tag, `dbits` in the data model: selects how a weight
/// matrix is packed in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightDType {
    /// 4-bit group-quantized floats: 8 values packed into one 32-bit word,
    /// sharing a single `f16` scale per group of 8.
    Gf4,
    /// 8-bit floating point, E5M2 layout (5 exponent bits, 2 mantissa bits).
    Fp8,
    /// 16-bit IEEE-754 half precision.
    Fp16,
}

impl WeightDType {
    /// The `dbits` value as it appears in the data model / wire tag.
    pub fn dbits(&self) -> u8 {
        match self {
            WeightDType::Gf4 => 4,
            WeightDType::Fp8 => 8,
            WeightDType::Fp16 => 16,
        }
    }

    pub fn from_dbits(dbits: u8) -> Option<WeightDType> {
        match dbits {
            4 => Some(WeightDType::Gf4),
            8 => Some(WeightDType::Fp8),
            16 => Some(WeightDType::Fp16),
            _ => None,
        }
    }

    /// Number of elements sharing one scale factor.
    pub fn group_size(&self) -> usize {
        match self {
            WeightDType::Gf4 => 8,
            WeightDType::Fp8 | WeightDType::Fp16 => 1,
        }
    }

    /// Bytes consumed by `n` contiguous elements of this dtype, including
    /// any shared scale words for quantized formats.
    pub fn bytes_for(&self, n: usize) -> usize {
        match self {
            WeightDType::Gf4 => {
                let groups = n.div_ceil(8);
                // one u32 of packed nibbles + one f16 scale per group of 8
                groups * (4 + 2)
            }
            WeightDType::Fp8 => n,
            WeightDType::Fp16 => n * 2,
        }
    }
}

impl fmt::Display for WeightDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightDType::Gf4 => write!(f, "gf4"),
            WeightDType::Fp8 => write!(f, "fp8"),
            WeightDType::Fp16 => write!(f, "fp16"),
        }
    }
}

/// KV-cache precision tag, `kvbits` in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvDType {
    Fp8,
    Fp16,
}

impl KvDType {
    pub fn kvbits(&self) -> u8 {
        match self {
            KvDType::Fp8 => 8,
            KvDType::Fp16 => 16,
        }
    }

    pub fn from_kvbits(kvbits: u8) -> Option<KvDType> {
        match kvbits {
            8 => Some(KvDType::Fp8),
            16 => Some(KvDType::Fp16),
            _ => None,
        }
    }

    pub fn bytes_for(&self, n: usize) -> usize {
        match self {
            KvDType::Fp8 => n,
            KvDType::Fp16 => n * 2,
        }
    }
}

impl fmt::Display for KvDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvDType::Fp8 => write!(f, "fp8"),
            KvDType::Fp16 => write!(f, "fp16"),
        }
    }
}

/// Encode an `f32` into an 8-bit E5M2 float (5 exponent bits, bias 15, 2
/// mantissa bits), the FP8 format used for both weights and the KV cache.
///
/// Rounding goes through the intermediate `f16` representation, which
/// shares the same exponent width and only needs its mantissa truncated
/// from 10 bits to 2 (round-to-nearest, ties away from zero).
pub fn f32_to_e5m2(x: f32) -> u8 {
    let h = f16::from_f32(x).to_bits();
    let sign = (h >> 15) & 0x1;
    let exp = (h >> 10) & 0x1F;
    let mant10 = h & 0x3FF;
    let round_bit = (mant10 >> 7) & 0x1;
    let mut mant2 = mant10 >> 8;
    let mut exp = exp;
    if round_bit == 1 && (mant10 & 0x7F) != 0 {
        mant2 += 1;
        if mant2 > 0x3 {
            mant2 = 0;
            exp = exp.saturating_add(1);
        }
    }
    let exp = exp.min(0x1F);
    ((sign << 7) | (exp << 2) | mant2) as u8
}

/// Decode an 8-bit E5M2 float back to `f32`.
pub fn e5m2_to_f32(byte: u8) -> f32 {
    let sign = (byte >> 7) & 0x1;
    let exp = (byte >> 2) & 0x1F;
    let mant2 = byte & 0x3;
    let bits16: u16 = ((sign as u16) << 15) | ((exp as u16) << 10) | ((mant2 as u16) << 8);
    f16::from_bits(bits16).to_f32()
}

/// Dequantize one lane of a gf4 group.
///
/// `word` packs 8 signed 4-bit nibbles (values -8..=7), least-significant
/// nibble first; `scale` is the shared per-group scale.
pub fn gf4_decode(word: u32, lane: usize, scale: f32) -> f32 {
    let nibble = ((word >> (lane * 4)) & 0xF) as i32;
    let signed = if nibble >= 8 { nibble - 16 } else { nibble };
    signed as f32 * scale
}

/// Pack 8 values into one gf4 word plus a shared `f16` scale, choosing the
/// scale as `max(|v|) / 7` so every value fits in the signed 4-bit range.
pub fn gf4_encode(values: &[f32; 8]) -> (u32, f16) {
    let max_abs = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    let scale = if max_abs == 0.0 { 1.0 } else { max_abs / 7.0 };
    let mut word: u32 = 0;
    for (lane, &v) in values.iter().enumerate() {
        let q = (v / scale).round().clamp(-8.0, 7.0) as i32;
        let nibble = (q & 0xF) as u32;
        word |= nibble << (lane * 4);
    }
    (word, f16::from_f32(scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbits_roundtrip() {
        for d in [WeightDType::Gf4, WeightDType::Fp8, WeightDType::Fp16] {
            assert_eq!(WeightDType::from_dbits(d.dbits()), Some(d));
        }
        assert_eq!(WeightDType::from_dbits(3), None);
    }

    #[test]
    fn kvbits_roundtrip() {
        for k in [KvDType::Fp8, KvDType::Fp16] {
            assert_eq!(KvDType::from_kvbits(k.kvbits()), Some(k));
        }
    }

    #[test]
    fn e5m2_roundtrip_coarse() {
        for v in [0.0f32, 1.0, -1.0, 2.0, 0.5, 16.0, -0.25] {
            let back = e5m2_to_f32(f32_to_e5m2(v));
            assert!((back - v).abs() <= v.abs() * 0.3 + 0.05, "{v} -> {back}");
        }
    }

    #[test]
    fn gf4_roundtrip() {
        let values = [1.0f32, -1.0, 3.5, -3.5, 0.0, 7.0, -7.0, 2.0];
        let (word, scale) = gf4_encode(&values);
        let scale_f32 = scale.to_f32();
        for (lane, &expected) in values.iter().enumerate() {
            let got = gf4_decode(word, lane, scale_f32);
            assert!((got - expected).abs() <= scale_f32 * 0.5 + 1e-6);
        }
    }

    #[test]
    fn gf4_all_zero_scale_is_finite() {
        let (_, scale) = gf4_encode(&[0.0; 8]);
        assert!(scale.to_f32().is_finite());
    }
}
