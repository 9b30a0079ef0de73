use calm_tensor::Device;

use crate::attention::run_attention;
use crate::config::{Architecture, Config};
use crate::coop;
use crate::ffn::{run_gated_ffn, run_moe_ffn, run_ungated_ffn_with_bias};
use crate::kv_cache::KvCache;
use crate::run_state::RunState;
use crate::transformer::Transformer;
use crate::weights::DeviceWeights;

/// `flags` bit 0: stop after the KV-cache write on the last layer and
/// return no logits. Used for prompt pre-fill.
pub const UPDATE_KV_ONLY: u32 = 1;

fn coop_path_selected(architecture: Architecture) -> bool {
    let requested = std::env::var("CALM_COOP").map(|v| v == "1").unwrap_or(false);
    requested && architecture.supports_cooperative_path()
}

fn pre_norm(device: &dyn Device, config: &Config, weights: &DeviceWeights, state: &mut RunState, layer_idx: usize, acc: Option<&[f32]>) {
    let layer = &weights.layers[layer_idx];
    if config.architecture.uses_layer_norm() {
        device.layer_norm(&mut state.x, acc, &layer.attn_norm, config.norm_eps, &mut state.xb);
    } else {
        debug_assert!(acc.is_none(), "RMSNorm architectures never carry a parallel-branch accumulator");
        device.rms_norm(&state.x, &layer.attn_norm, config.norm_eps, &mut state.xb);
    }
}

fn ffn_norm(device: &dyn Device, config: &Config, weights: &DeviceWeights, state: &mut RunState, layer_idx: usize) {
    let layer = &weights.layers[layer_idx];
    if config.architecture.uses_layer_norm() {
        device.layer_norm(&mut state.x, None, &layer.ffn_norm, config.norm_eps, &mut state.xb);
    } else {
        device.rms_norm(&state.x, &layer.ffn_norm, config.norm_eps, &mut state.xb);
    }
}

/// Run one transformer layer, dispatching to the architecture's component
/// set. Returns the layer's `xa` (parallel-branch accumulator) to feed
/// into the next layer's pre-norm, or `None` for architectures without a
/// parallel branch.
#[allow(clippy::too_many_arguments)]
fn run_layer(
    device: &dyn Device,
    config: &Config,
    weights: &DeviceWeights,
    state: &mut RunState,
    kv_cache: &mut KvCache,
    layer_idx: usize,
    pos: usize,
    kv_pos: usize,
    kv_len: usize,
    prior_acc: Option<Vec<f32>>,
) -> Option<Vec<f32>> {
    pre_norm(device, config, weights, state, layer_idx, prior_acc.as_deref());

    let layer = &weights.layers[layer_idx];
    run_attention(device, config, layer, state, kv_cache, layer_idx, pos, kv_pos, kv_len);

    if config.architecture.has_parallel_branches() {
        run_ungated_ffn_with_bias(device, config, layer, state);
        return Some(std::mem::take(&mut state.xa));
    }

    ffn_norm(device, config, weights, state, layer_idx);
    if config.architecture.is_moe() {
        run_moe_ffn(device, config, layer, state);
    } else {
        run_gated_ffn(device, config, layer, state);
    }
    None
}

/// Run the multi-kernel forward driver for one token (§4.5).
pub fn forward(t: &mut Transformer, token: usize, pos: usize, flags: u32) -> Option<Vec<f32>> {
    assert!(token < t.config.v, "argument error: token {token} exceeds vocab size {}", t.config.v);

    let kv_sink = t.config.kv_sink;
    let smax = t.config.smax;
    let kv_pos = KvCache::physical_index(pos, smax, kv_sink);
    let kv_len = KvCache::kv_len(pos, smax);

    t.device.embedding_gather(
        t.weights.embedding.0.as_bytes(),
        t.weights.embedding.1,
        token,
        t.config.d,
        t.config.embed_scale,
        &mut t.state.x,
    );

    if kv_sink > 0 && pos >= smax {
        t.kv_cache.rotate_sink_keys(kv_sink, t.config.hkv, t.config.dh, t.config.dr, t.config.rope_theta);
    }

    if coop_path_selected(t.config.architecture) {
        return coop::forward_cooperative(t, pos, kv_pos, kv_len, flags);
    }

    let device = t.device.as_ref();
    let mut acc: Option<Vec<f32>> = None;
    for layer_idx in 0..t.config.l {
        let is_last_layer = layer_idx + 1 == t.config.l;
        acc = run_layer(device, &t.config, &t.weights, &mut t.state, &mut t.kv_cache, layer_idx, pos, kv_pos, kv_len, acc);

        if is_last_layer && (flags & UPDATE_KV_ONLY) != 0 {
            return None;
        }
    }

    if let Some(xa) = acc {
        device.add_inplace(&mut t.state.x, &xa);
    }

    finalize(t)
}

/// Final normalization and classifier projection, shared by the
/// multi-kernel and cooperative drivers.
pub fn finalize(t: &mut Transformer) -> Option<Vec<f32>> {
    let device = t.device.as_ref();
    if t.config.architecture.uses_layer_norm() {
        let mut x_copy = t.state.x.clone();
        device.layer_norm(&mut x_copy, None, &t.weights.output_norm, t.config.norm_eps, &mut t.state.xb);
    } else {
        device.rms_norm(&t.state.x, &t.weights.output_norm, t.config.norm_eps, &mut t.state.xb);
    }

    device.matvec(
        t.weights.classifier.0.as_bytes(),
        t.weights.classifier.1,
        &t.state.xb,
        t.config.v,
        t.config.d,
        t.weights.classifier_bias.as_deref(),
        false,
        &mut t.state.logits,
    );
    Some(t.state.logits.clone())
}
