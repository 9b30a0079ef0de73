use crate::device::Device;
use crate::dtype::WeightDType;
use crate::element::{Fp8Elem, Gf4Elem, WeightElem, F16Elem};
use crate::error::DeviceFault;

/// Pure-Rust CPU reference device.
///
/// Implements every kernel from §4.2 with straightforward loops. Where the
/// original design calls for warp-level parallelism (one warp per matvec
/// row, lanes striding the inner dimension plus a warp-sum reduction) this
/// device instead computes the equivalent reduction sequentially; the
/// numeric result is identical, only the parallelism is absent. This device
/// is both the correctness reference used by the test suite and the
/// default device when no accelerator-specific device is compiled in.
#[derive(Debug, Clone, Default)]
pub struct CpuDevice;

impl CpuDevice {
    pub fn new() -> Self {
        CpuDevice
    }
}

/// Generic warp-parallel matvec, monomorphized per weight element format.
/// This is the "kernel generic over an abstract numeric element" from the
/// design notes: the loop body is written once and instantiated for each
/// of the three weight formats.
fn matvec_generic<W: WeightElem>(
    w: &[u8],
    x: &[f32],
    out_dim: usize,
    in_dim: usize,
    bias: Option<&[f32]>,
    accumulate: bool,
    out: &mut [f32],
) {
    for i in 0..out_dim {
        let row = i * in_dim;
        let mut sum = 0.0f32;
        for j in 0..in_dim {
            sum += W::dequant(w, row + j) * x[j];
        }
        if let Some(b) = bias {
            sum += b[i];
        }
        if accumulate {
            out[i] += sum;
        } else {
            out[i] = sum;
        }
    }
}

fn embedding_gather_generic<W: WeightElem>(
    table: &[u8],
    token: usize,
    d: usize,
    embed_scale: f32,
    out: &mut [f32],
) {
    let base = token * d;
    for i in 0..d {
        out[i] = W::dequant(table, base + i) * embed_scale;
    }
}

impl Device for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn embedding_gather(
        &self,
        table: &[u8],
        dbits: WeightDType,
        token: usize,
        d: usize,
        embed_scale: f32,
        out: &mut [f32],
    ) {
        if out.len() != d {
            DeviceFault::new("embedding_gather", format!("out.len()={} does not match d={d}", out.len())).fatal();
        }
        match dbits {
            WeightDType::Gf4 => embedding_gather_generic::<Gf4Elem>(table, token, d, embed_scale, out),
            WeightDType::Fp8 => embedding_gather_generic::<Fp8Elem>(table, token, d, embed_scale, out),
            WeightDType::Fp16 => embedding_gather_generic::<F16Elem>(table, token, d, embed_scale, out),
        }
    }

    fn rms_norm(&self, x: &[f32], weight: &[f32], eps: f32, out: &mut [f32]) {
        debug_assert_eq!(x.len(), weight.len());
        debug_assert_eq!(x.len(), out.len());
        let n = x.len() as f32;
        let mean_sq: f32 = x.iter().map(|v| v * v).sum::<f32>() / n;
        let s = 1.0 / (mean_sq + eps).sqrt();
        for j in 0..x.len() {
            out[j] = x[j] * weight[j] * s;
        }
    }

    fn layer_norm(&self, x: &mut [f32], acc: Option<&[f32]>, weight: &[f32], eps: f32, out: &mut [f32]) {
        debug_assert_eq!(x.len(), weight.len());
        debug_assert_eq!(x.len(), out.len());
        if let Some(acc) = acc {
            debug_assert_eq!(acc.len(), x.len());
            for j in 0..x.len() {
                x[j] += acc[j];
            }
        }
        let n = x.len() as f32;
        // Shifted-estimator trick: subtract x[0] before summing, to keep
        // the running sums small when x carries a large common offset.
        let shift = x[0];
        let mut sum = 0.0f32;
        let mut sum_sq = 0.0f32;
        for &v in x.iter() {
            let d = v - shift;
            sum += d;
            sum_sq += d * d;
        }
        let mean = shift + sum / n;
        let var = (sum_sq - sum * sum / n) / n;
        let inv_std = 1.0 / (var + eps).sqrt();
        for j in 0..x.len() {
            out[j] = (x[j] - mean) * weight[j] * inv_std;
        }
    }

    fn matvec(
        &self,
        w: &[u8],
        dbits: WeightDType,
        x: &[f32],
        out_dim: usize,
        in_dim: usize,
        bias: Option<&[f32]>,
        accumulate: bool,
        out: &mut [f32],
    ) {
        if x.len() != in_dim || out.len() != out_dim {
            DeviceFault::new(
                "matvec",
                format!("shape mismatch: x.len()={}, in_dim={in_dim}, out.len()={}, out_dim={out_dim}", x.len(), out.len()),
            )
            .fatal();
        }
        match dbits {
            WeightDType::Gf4 => matvec_generic::<Gf4Elem>(w, x, out_dim, in_dim, bias, accumulate, out),
            WeightDType::Fp8 => matvec_generic::<Fp8Elem>(w, x, out_dim, in_dim, bias, accumulate, out),
            WeightDType::Fp16 => matvec_generic::<F16Elem>(w, x, out_dim, in_dim, bias, accumulate, out),
        }
    }

    fn silu_inplace(&self, x: &mut [f32]) {
        for v in x.iter_mut() {
            *v /= 1.0 + (-*v).exp();
        }
    }

    fn gelu_inplace(&self, x: &mut [f32]) {
        const SQRT_2_OVER_PI: f32 = 0.797_884_6;
        for v in x.iter_mut() {
            let inner = SQRT_2_OVER_PI * (*v + 0.044715 * v.powi(3));
            *v = 0.5 * *v * (1.0 + inner.tanh());
        }
    }

    fn softmax_inplace(&self, x: &mut [f32]) {
        if x.is_empty() {
            return;
        }
        let max_val = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for v in x.iter_mut() {
            *v = (*v - max_val).exp();
        }
    }

    fn add_inplace(&self, dst: &mut [f32], src: &[f32]) {
        debug_assert_eq!(dst.len(), src.len());
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d += *s;
        }
    }

    fn mul_inplace(&self, dst: &mut [f32], src: &[f32]) {
        debug_assert_eq!(dst.len(), src.len());
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d *= *s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::gf4_encode;

    fn device() -> CpuDevice {
        CpuDevice::new()
    }

    fn fp16_bytes(values: &[f32]) -> Vec<u8> {
        let mut out = Vec::new();
        for &v in values {
            out.extend_from_slice(&half::f16::from_f32(v).to_le_bytes());
        }
        out
    }

    #[test]
    fn matvec_fp16_matches_naive_dot_product() {
        let d = device();
        let w = fp16_bytes(&[1.0, 2.0, 3.0, 4.0]);
        let x = [5.0f32, 6.0];
        let mut out = [0.0f32; 2];
        d.matvec(&w, WeightDType::Fp16, &x, 2, 2, None, false, &mut out);
        assert!((out[0] - 17.0).abs() < 1e-3);
        assert!((out[1] - 39.0).abs() < 1e-3);
    }

    #[test]
    fn matvec_accumulate_adds_into_out() {
        let d = device();
        let w = fp16_bytes(&[1.0, 0.0, 0.0, 1.0]);
        let x = [2.0f32, 3.0];
        let mut out = [10.0f32, 20.0];
        d.matvec(&w, WeightDType::Fp16, &x, 2, 2, None, true, &mut out);
        assert!((out[0] - 12.0).abs() < 1e-3);
        assert!((out[1] - 23.0).abs() < 1e-3);
    }

    #[test]
    fn matvec_with_bias() {
        let d = device();
        let w = fp16_bytes(&[1.0, 0.0]);
        let x = [5.0f32];
        let bias = [100.0f32];
        let mut out = [0.0f32];
        d.matvec(&w, WeightDType::Fp16, &x, 1, 1, Some(&bias), false, &mut out);
        assert!((out[0] - 105.0).abs() < 1e-3);
    }

    #[test]
    fn rms_norm_unit_weight_large_x_approaches_unit_rms() {
        let d = device();
        let x = vec![1000.0f32; 64];
        let w = vec![1.0f32; 64];
        let mut out = vec![0.0f32; 64];
        d.rms_norm(&x, &w, 1e-5, &mut out);
        let rms: f32 = (out.iter().map(|v| v * v).sum::<f32>() / 64.0).sqrt();
        assert!((rms - 1.0).abs() < 1e-3);
    }

    #[test]
    fn layer_norm_accumulates_then_normalizes() {
        let d = device();
        let mut x = vec![1.0f32, 2.0, 3.0, 4.0];
        let acc = vec![1.0f32, 1.0, 1.0, 1.0];
        let w = vec![1.0f32; 4];
        let mut out = vec![0.0f32; 4];
        d.layer_norm(&mut x, Some(&acc), &w, 1e-5, &mut out);
        assert_eq!(x, vec![2.0, 3.0, 4.0, 5.0]);
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-3);
    }

    #[test]
    fn silu_zero_is_zero() {
        let d = device();
        let mut x = [0.0f32];
        d.silu_inplace(&mut x);
        assert!(x[0].abs() < 1e-6);
    }

    #[test]
    fn gelu_zero_is_zero() {
        let d = device();
        let mut x = [0.0f32];
        d.gelu_inplace(&mut x);
        assert!(x[0].abs() < 1e-6);
    }

    #[test]
    fn softmax_then_normalize_sums_to_one() {
        let d = device();
        let mut x = [1.0f32, 2.0, 3.0];
        d.softmax_inplace(&mut x);
        let sum: f32 = x.iter().sum();
        for v in x.iter_mut() {
            *v /= sum;
        }
        let total: f32 = x.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(x[0] < x[1] && x[1] < x[2]);
    }

    #[test]
    fn embedding_gather_gf4_scales_correctly() {
        let d = device();
        let values = [1.0f32, 2.0, 3.0, 4.0, -1.0, -2.0, -3.0, -4.0];
        let (word, scale) = gf4_encode(&values);
        let mut table = Vec::new();
        table.extend_from_slice(&word.to_le_bytes());
        table.extend_from_slice(&scale.to_le_bytes());
        let mut out = [0.0f32; 8];
        d.embedding_gather(&table, WeightDType::Gf4, 0, 8, 2.0, &mut out);
        let tol = scale.to_f32() * 0.5 + 1e-3;
        for (got, &expected) in out.iter().zip(values.iter()) {
            assert!((got - expected * 2.0).abs() <= tol * 2.0, "{got} vs {expected}");
        }
    }

    #[test]
    fn add_and_mul_inplace() {
        let d = device();
        let mut a = [1.0f32, 2.0];
        d.add_inplace(&mut a, &[3.0, 4.0]);
        assert_eq!(a, [4.0, 6.0]);
        d.mul_inplace(&mut a, &[2.0, 0.5]);
        assert_eq!(a, [8.0, 3.0]);
    }
}
