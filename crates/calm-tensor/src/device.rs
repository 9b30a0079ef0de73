use std::fmt::Debug;

use crate::dtype::WeightDType;

/// Trait for pluggable compute devices (CPU reference, Metal, ...).
///
/// Every method operates on a single token's worth of data, per §4.2: the
/// core is a single-stream, one-token-at-a-time engine, never a batched
/// one. Weight operands are passed as raw device-buffer bytes tagged with
/// their `WeightDType`; activation buffers are always `f32`. Shape
/// contracts are enforced with `debug_assert!` rather than `Result`,
/// matching the error-handling design: a shape violation here is a
/// programming error in the driver above, not a recoverable condition.
pub trait Device: Send + Sync + Debug {
    /// Returns the name of this device (e.g. "cpu", "metal").
    fn name(&self) -> &str;

    /// Embedding gather: `out[i] = dequant(table[token * d + i]) * embed_scale`.
    fn embedding_gather(
        &self,
        table: &[u8],
        dbits: WeightDType,
        token: usize,
        d: usize,
        embed_scale: f32,
        out: &mut [f32],
    );

    /// RMSNorm: `out[j] = x[j] * weight[j] / sqrt(mean(x^2) + eps)`.
    fn rms_norm(&self, x: &[f32], weight: &[f32], eps: f32, out: &mut [f32]);

    /// LayerNorm with an optional pre-accumulation step (the Phi
    /// parallel-branch accumulator): if `acc` is present, `x[j] += acc[j]`
    /// happens in place before computing statistics. Uses the
    /// shifted-estimator trick (subtracting `x[0] (+ acc[0])` before
    /// summing squares) for numerical stability.
    fn layer_norm(&self, x: &mut [f32], acc: Option<&[f32]>, weight: &[f32], eps: f32, out: &mut [f32]);

    /// Warp-parallel matrix-vector multiply: `out[i] = sum_j W[i,j] * x[j]`,
    /// dequantizing `W` inline per the `dbits` tag. If `bias` is present it
    /// is added after the dot product. If `accumulate` is set, the result
    /// is added into `out` rather than overwriting it (the residual-add
    /// fused form used by attention/FFN output projections).
    #[allow(clippy::too_many_arguments)]
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
    );

    /// SiLU activation in place: `x[i] = x[i] / (1 + exp(-x[i]))`.
    fn silu_inplace(&self, x: &mut [f32]);

    /// GELU (tanh approximation) in place.
    fn gelu_inplace(&self, x: &mut [f32]);

    /// Softmax, max-subtracted and exponentiated but *not* normalized. The
    /// caller divides by the running sum (folded into the attention mix
    /// step per §4.3).
    fn softmax_inplace(&self, x: &mut [f32]);

    /// Elementwise add: `dst[i] += src[i]`.
    fn add_inplace(&self, dst: &mut [f32], src: &[f32]);

    /// Elementwise multiply: `dst[i] *= src[i]`.
    fn mul_inplace(&self, dst: &mut [f32], src: &[f32]);
}
