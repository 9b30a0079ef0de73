use calm_tensor::Device;

use crate::config::{Activation, Config};
use crate::run_state::RunState;
use crate::weights::DeviceLayerWeights;

fn apply_activation(device: &dyn Device, activation: Activation, x: &mut [f32]) {
    match activation {
        Activation::Silu => device.silu_inplace(x),
        Activation::Gelu => device.gelu_inplace(x),
    }
}

/// Gated FFN (LlamaLike, Qwen, Olmo, Gemma, and the per-expert branch of
/// Mixtral): `g = act(W1 . xb) * (W3 . xb)`, `x += W2 . g` (§4.4). Uses
/// `state.hb` as the gate buffer and `state.he`'s first `H` elements as the
/// up buffer; both are prepare-time allocations, never reallocated here.
pub fn run_gated_ffn(device: &dyn Device, config: &Config, layer: &DeviceLayerWeights, state: &mut RunState) {
    let w3 = layer.w3.as_ref().expect("gated ffn requires w3");
    device.matvec(layer.w1.0.as_bytes(), layer.w1.1, &state.xb, config.h, config.d, None, false, &mut state.hb);
    apply_activation(device, config.architecture.gate_activation(), &mut state.hb);

    let up = &mut state.he[..config.h];
    device.matvec(w3.0.as_bytes(), w3.1, &state.xb, config.h, config.d, None, false, up);

    device.mul_inplace(&mut state.hb, &state.he[..config.h]);
    device.matvec(layer.w2.0.as_bytes(), layer.w2.1, &state.hb, config.d, config.h, None, true, &mut state.x);
}

/// Ungated FFN with bias (Phi's parallel branch): `g = GELU(W1.xb + b1)`,
/// `xa = W2.g + b2`. `xa` is *not* accumulated into `x` here; it feeds the
/// next layer's LayerNorm accumulator, realizing the parallel
/// attention/MLP branch structure (§4.4, §5). Uses `state.hb` as the
/// hidden scratch.
pub fn run_ungated_ffn_with_bias(device: &dyn Device, config: &Config, layer: &DeviceLayerWeights, state: &mut RunState) {
    device.matvec(
        layer.w1.0.as_bytes(),
        layer.w1.1,
        &state.xb,
        config.h,
        config.d,
        layer.b1.as_deref(),
        false,
        &mut state.hb,
    );
    device.gelu_inplace(&mut state.hb);

    state.xa.fill(0.0);
    device.matvec(
        layer.w2.0.as_bytes(),
        layer.w2.1,
        &state.hb,
        config.d,
        config.h,
        layer.b2.as_deref(),
        false,
        &mut state.xa,
    );
}

/// Pack a (weight, expert-index) pair into one sortable `u32`: the weight
/// quantized into the high 24 bits, the index in the low 8. Argmax over
/// these integers is argmax over the original weights (§4.4, §9).
fn pack_weight_index(weight: f32, index: usize) -> u32 {
    debug_assert!(index < 256);
    let quantized = (weight.clamp(0.0, 1.0) * ((1u32 << 24) - 1) as f32) as u32;
    (quantized << 8) | index as u32
}

fn unpack_index(packed: u32) -> usize {
    (packed & 0xFF) as usize
}

/// Select the top-`n_active` experts from `state.exp[0..n_experts]`
/// (already populated with raw gate logits): softmax-normalizes them in
/// place, then writes each selected expert's routing weight into
/// `state.exp[n_experts..n_experts + n_active]` and its index (as an exact
/// `f32`, expert counts never exceed 64) into
/// `state.exp[n_experts + n_active..n_experts + 2*n_active]`. Selected
/// weights sum to 1. Read results back with `selected_expert` (§4.4).
pub fn select_experts(device: &dyn Device, state: &mut RunState, n_experts: usize, n_active: usize) {
    let probs = &mut state.exp[..n_experts];
    device.softmax_inplace(probs);
    let sum: f32 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }

    for slot in 0..n_active {
        let packed = state.exp[..n_experts]
            .iter()
            .enumerate()
            .map(|(i, &w)| pack_weight_index(w, i))
            .max()
            .expect("logits must be non-empty");
        let idx = unpack_index(packed);
        let weight = state.exp[idx];
        state.exp[idx] = 0.0;
        state.exp[n_experts + slot] = weight;
        state.exp[n_experts + n_active + slot] = idx as f32;
    }

    let total: f32 = state.exp[n_experts..n_experts + n_active].iter().sum();
    let total = if total == 0.0 { 1.0 } else { total };
    for w in state.exp[n_experts..n_experts + n_active].iter_mut() {
        *w /= total;
    }
}

/// Read back the `slot`-th selected expert written by `select_experts`.
pub fn selected_expert(state: &RunState, n_experts: usize, n_active: usize, slot: usize) -> (usize, f32) {
    let weight = state.exp[n_experts + slot];
    let idx = state.exp[n_experts + n_active + slot] as usize;
    (idx, weight)
}

/// MoE FFN (Mixtral): route to the top-`Ea` of `E` experts and mix their
/// gated outputs weighted by the normalized routing weight (§4.4). Uses
/// `state.exp` for routing, `state.hb`/`state.he` as the per-expert
/// gate/up scratch, and `state.xa` (idle during MoE layers, since Mixtral
/// never has a parallel branch) as the per-expert output scratch.
pub fn run_moe_ffn(device: &dyn Device, config: &Config, layer: &DeviceLayerWeights, state: &mut RunState) {
    let wg = layer.wg.as_ref().expect("moe ffn requires a gate matrix");
    device.matvec(wg.0.as_bytes(), wg.1, &state.xb, config.n_experts, config.d, None, false, &mut state.exp[..config.n_experts]);

    select_experts(device, state, config.n_experts, config.n_active_experts);

    for slot in 0..config.n_active_experts {
        let (expert_idx, weight) = selected_expert(state, config.n_experts, config.n_active_experts, slot);
        let w1 = &layer.experts_w1[expert_idx];
        let w2 = &layer.experts_w2[expert_idx];
        let w3 = &layer.experts_w3[expert_idx];

        device.matvec(w1.0.as_bytes(), w1.1, &state.xb, config.h, config.d, None, false, &mut state.hb);
        device.silu_inplace(&mut state.hb);

        let up = &mut state.he[..config.h];
        device.matvec(w3.0.as_bytes(), w3.1, &state.xb, config.h, config.d, None, false, up);
        device.mul_inplace(&mut state.hb, &state.he[..config.h]);

        state.xa.fill(0.0);
        device.matvec(w2.0.as_bytes(), w2.1, &state.hb, config.d, config.h, None, false, &mut state.xa);

        for (x, e) in state.x.iter_mut().zip(state.xa.iter()) {
            *x += weight * e;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Architecture;
    use calm_tensor::{CpuDevice, KvDType, WeightDType};

    fn tiny_moe_config() -> Config {
        Config {
            architecture: Architecture::Mixtral,
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
            n_experts: 8,
            n_active_experts: 4,
            norm_eps: 1e-5,
            embed_scale: 1.0,
            dbits: WeightDType::Fp16,
            kvbits: KvDType::Fp16,
            kv_sink: 2,
        }
    }

    fn select(logits: &[f32], n_active: usize) -> Vec<(usize, f32)> {
        let cfg = tiny_moe_config();
        let device = CpuDevice::new();
        let mut state = RunState::new(&cfg);
        state.exp[..logits.len()].copy_from_slice(logits);
        select_experts(&device, &mut state, logits.len(), n_active);
        (0..n_active).map(|slot| selected_expert(&state, logits.len(), n_active, slot)).collect()
    }

    #[test]
    fn select_experts_picks_clear_top_two() {
        let logits = [0.0f32, 10.0, 0.0, 9.0, 0.0, 0.0, 0.0, 0.0];
        let selected = select(&logits, 2);
        assert_eq!(selected.len(), 2);
        let indices: Vec<usize> = selected.iter().map(|(i, _)| *i).collect();
        assert!(indices.contains(&1));
        assert!(indices.contains(&3));
        let weight_sum: f32 = selected.iter().map(|(_, w)| w).sum();
        assert!((weight_sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn select_experts_returns_distinct_indices() {
        let logits = vec![1.0f32; 8];
        let selected = select(&logits, 4);
        let mut indices: Vec<usize> = selected.iter().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 4);
    }

    #[test]
    fn pack_weight_index_orders_by_weight_first() {
        let low = pack_weight_index(0.1, 200);
        let high = pack_weight_index(0.9, 0);
        assert!(high > low);
    }
}
