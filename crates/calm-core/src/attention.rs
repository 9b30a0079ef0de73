use calm_tensor::Device;

use crate::config::Config;
use crate::kv_cache::KvCache;
use crate::run_state::RunState;
use crate::weights::DeviceLayerWeights;

/// Rotary frequency for head-dim offset `j_head`, per §4.3: zero beyond the
/// rotary dimension, so those elements pass through RoPE unrotated.
fn rope_freq(j_head: usize, dr: usize, theta: f32) -> f32 {
    if j_head < dr {
        (-(theta.log2()) * j_head as f32 / dr as f32).exp2()
    } else {
        0.0
    }
}

/// Rotate one adjacent pair `(v0, v1)` by the rotary angle for absolute
/// position `pos` at head-dim offset `j_head`.
fn rope_rotate(v0: f32, v1: f32, pos: usize, j_head: usize, dr: usize, theta: f32) -> (f32, f32) {
    let freq = rope_freq(j_head, dr, theta);
    let angle = pos as f32 * freq;
    let (sin, cos) = angle.sin_cos();
    (v0 * cos - v1 * sin, v0 * sin + v1 * cos)
}

/// Fused QKV projection + RoPE + KV-cache write, scoring, softmax, value
/// mix, and output projection with residual (§4.3). Writes the attention
/// output directly into `state.x` via the residual-accumulating matvec.
#[allow(clippy::too_many_arguments)]
pub fn run_attention(
    device: &dyn Device,
    config: &Config,
    layer: &DeviceLayerWeights,
    state: &mut RunState,
    kv_cache: &mut KvCache,
    layer_idx: usize,
    pos: usize,
    kv_pos: usize,
    kv_len: usize,
) {
    let d = config.d;
    let dh = config.dh;
    let dr = config.dr;
    let theta = config.rope_theta;
    let hq = config.hq;
    let hkv = config.hkv;
    let heads_per_kv = config.heads_per_kv();
    let q_width = config.q_width();
    let kv_width = config.kv_width();

    let mut q_raw = vec![0.0f32; q_width];
    device.matvec(
        layer.wq.0.as_bytes(),
        layer.wq.1,
        &state.xb,
        q_width,
        d,
        layer.bq.as_deref(),
        false,
        &mut q_raw,
    );

    let mut k_raw = vec![0.0f32; kv_width];
    device.matvec(
        layer.wk.0.as_bytes(),
        layer.wk.1,
        &state.xb,
        kv_width,
        d,
        layer.bk.as_deref(),
        false,
        &mut k_raw,
    );

    let mut v_raw = vec![0.0f32; kv_width];
    device.matvec(
        layer.wv.0.as_bytes(),
        layer.wv.1,
        &state.xb,
        kv_width,
        d,
        layer.bv.as_deref(),
        false,
        &mut v_raw,
    );

    // RoPE + write Q into state.q, K into the transposed key cache.
    for h in 0..hq {
        let base = h * dh;
        for j in (0..dh).step_by(2) {
            let (r0, r1) = rope_rotate(q_raw[base + j], q_raw[base + j + 1], pos, j, dr, theta);
            state.q[base + j] = r0;
            state.q[base + j + 1] = r1;
        }
    }
    for h in 0..hkv {
        let base = h * dh;
        for j in (0..dh).step_by(2) {
            let (r0, r1) = rope_rotate(k_raw[base + j], k_raw[base + j + 1], pos, j, dr, theta);
            kv_cache.write_key_pair(layer_idx, (base + j) / 2, kv_pos, r0, r1);
        }
        for j in 0..dh {
            kv_cache.write_value(layer_idx, base + j, kv_pos, v_raw[base + j]);
        }
    }

    // Scaled dot-product scoring against cached keys, GQA-grouped.
    let scale = 1.0 / (dh as f32).sqrt();
    for h in 0..hq {
        let kv_h = h / heads_per_kv;
        let q_head = &state.q[h * dh..h * dh + dh];
        let att_row = &mut state.att[h * config.smax..h * config.smax + kv_len];
        for (t, score) in att_row.iter_mut().enumerate() {
            let mut dot = 0.0f32;
            for d in 0..dh {
                dot += q_head[d] * kv_cache.read_key(layer_idx, kv_h * dh + d, t);
            }
            *score = dot * scale;
        }
        device.softmax_inplace(&mut state.att[h * config.smax..h * config.smax + kv_len]);
    }

    // Weighted value mix, normalized by the exponent sum (softmax folded
    // into the divide here rather than in a separate normalization pass).
    let mut mix = vec![0.0f32; q_width];
    for h in 0..hq {
        let kv_h = h / heads_per_kv;
        let att_row = &state.att[h * config.smax..h * config.smax + kv_len];
        let sum: f32 = att_row.iter().sum();
        let sum = if sum == 0.0 { 1.0 } else { sum };
        for d in 0..dh {
            let mut acc = 0.0f32;
            for (t, &w) in att_row.iter().enumerate() {
                acc += w * kv_cache.read_value(layer_idx, kv_h * dh + d, t);
            }
            mix[h * dh + d] = acc / sum;
        }
    }

    // Output projection with residual accumulation directly into x.
    device.matvec(
        layer.wo.0.as_bytes(),
        layer.wo.1,
        &mix,
        d,
        q_width,
        None,
        true,
        &mut state.x,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rope_is_identity_at_pos_zero() {
        let (r0, r1) = rope_rotate(3.0, 4.0, 0, 0, 16, 10000.0);
        assert!((r0 - 3.0).abs() < 1e-6);
        assert!((r1 - 4.0).abs() < 1e-6);
    }

    #[test]
    fn rope_freq_is_zero_beyond_rotary_dim() {
        assert_eq!(rope_freq(20, 16, 10000.0), 0.0);
    }

    #[test]
    fn rope_beyond_rotary_dim_is_never_rotated_even_at_nonzero_pos() {
        let (r0, r1) = rope_rotate(3.0, 4.0, 5, 20, 16, 10000.0);
        assert!((r0 - 3.0).abs() < 1e-6);
        assert!((r1 - 4.0).abs() < 1e-6);
    }
}
