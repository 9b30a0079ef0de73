//! Cooperative fused path (§4.6): on real hardware this launches one
//! persistent grid-synchronous kernel covering every layer, trading
//! per-token kernel-launch overhead for a grid-wide barrier between
//! phases. Supported only for architectures without a parallel branch
//! (LlamaLike, Mixtral, Gemma) since the persistent-kernel scheme has no
//! secondary-stream equivalent.
//!
//! The CPU reference device has no concept of concurrently resident
//! blocks, so there is nothing to synchronize: a single host thread
//! already executes every phase in program order, which is a strictly
//! stronger ordering guarantee than a grid-wide barrier provides. This
//! path therefore reuses the exact same per-layer phase sequence as the
//! multi-kernel driver and produces bit-identical results. The
//! path-equivalence property holds trivially on this device. A real
//! Metal device would instead emulate the barrier by closing and
//! committing one command buffer per phase boundary (see `metal::mod`),
//! which is where the two paths could start to diverge in floating-point
//! accumulation order.

use crate::driver::finalize;
use crate::kv_cache::KvCache;
use crate::run_state::RunState;
use crate::transformer::Transformer;
use calm_tensor::Device;

use crate::attention::run_attention;
use crate::config::Config;
use crate::ffn::{run_gated_ffn, run_moe_ffn};
use crate::weights::DeviceWeights;

fn cooperative_layer(
    device: &dyn Device,
    config: &Config,
    weights: &DeviceWeights,
    state: &mut RunState,
    kv_cache: &mut KvCache,
    layer_idx: usize,
    pos: usize,
    kv_pos: usize,
    kv_len: usize,
) {
    let layer = &weights.layers[layer_idx];

    // Phase: pre-attention norm.
    device.rms_norm(&state.x, &layer.attn_norm, config.norm_eps, &mut state.xb);
    // Phase: QKV + RoPE + KV-write, score, softmax, mix, output projection.
    run_attention(device, config, layer, state, kv_cache, layer_idx, pos, kv_pos, kv_len);
    // Phase: pre-FFN norm.
    device.rms_norm(&state.x, &layer.ffn_norm, config.norm_eps, &mut state.xb);
    // Phase: FFN gate/up, down (MoE down-projection would use atomic adds
    // on real hardware since multiple experts write the same positions;
    // a single host thread needs no such protection).
    if config.architecture.is_moe() {
        run_moe_ffn(device, config, layer, state);
    } else {
        run_gated_ffn(device, config, layer, state);
    }
}

pub fn forward_cooperative(t: &mut Transformer, pos: usize, kv_pos: usize, kv_len: usize, flags: u32) -> Option<Vec<f32>> {
    debug_assert!(t.config.architecture.supports_cooperative_path());

    let device = t.device.as_ref();
    for layer_idx in 0..t.config.l {
        let is_last_layer = layer_idx + 1 == t.config.l;
        cooperative_layer(device, &t.config, &t.weights, &mut t.state, &mut t.kv_cache, layer_idx, pos, kv_pos, kv_len);

        if is_last_layer && (flags & crate::driver::UPDATE_KV_ONLY) != 0 {
            return None;
        }
    }

    finalize(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Architecture, Config};
    use crate::driver::forward;
    use crate::test_support::tiny_dense_weights;
    use calm_tensor::{CpuDevice, KvDType, WeightDType};

    fn tiny_config() -> Config {
        Config {
            architecture: Architecture::LlamaLike,
            d: 64,
            h: 128,
            dh: 16,
            l: 2,
            hq: 4,
            hkv: 2,
            v: 32,
            smax: 8,
            dr: 16,
            rope_theta: 10000.0,
            n_experts: 0,
            n_active_experts: 0,
            norm_eps: 1e-5,
            embed_scale: 1.0,
            dbits: WeightDType::Fp16,
            kvbits: KvDType::Fp16,
            kv_sink: 2,
        }
    }

    #[test]
    fn cooperative_path_matches_multi_kernel_path() {
        let cfg = tiny_config();
        let weights = tiny_dense_weights(&cfg);

        let mut multi = Transformer::prepare(cfg.clone(), weights.clone(), Box::new(CpuDevice::new())).unwrap();
        let multi_logits = forward(&mut multi, 5, 0, 0).unwrap();

        // Drive through the public entry point with CALM_COOP set so the
        // embedding gather and sink rotation steps run identically too.
        let mut coop = Transformer::prepare(cfg, weights, Box::new(CpuDevice::new())).unwrap();
        std::env::set_var("CALM_COOP", "1");
        let coop_logits = forward(&mut coop, 5, 0, 0).unwrap();
        std::env::remove_var("CALM_COOP");

        for (a, b) in multi_logits.iter().zip(coop_logits.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }
}
