//! Shared fixture builders for the test modules scattered across this
//! crate (model-file parsing is out of scope, so every test builds its
//! own in-memory weights rather than loading a real checkpoint).

use half::f16;

use calm_tensor::{gf4_encode, f32_to_e5m2, WeightDType};

use crate::config::Config;
use crate::weights::{HostWeights, LayerWeights, WeightBlock};

/// A small deterministic pseudo-random sequence, seeded per-call-site so
/// fixtures are reproducible without pulling in a `rand` dependency just
/// for test data.
fn lcg_f32(seed: &mut u64) -> f32 {
    *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let unit = ((*seed >> 40) as f32) / ((1u64 << 24) as f32);
    unit * 2.0 - 1.0
}

fn fp16_block(n: usize, seed: &mut u64) -> WeightBlock {
    let mut bytes = Vec::with_capacity(n * 2);
    for _ in 0..n {
        let v = lcg_f32(seed) * 0.1;
        bytes.extend_from_slice(&f16::from_f32(v).to_bits().to_le_bytes());
    }
    WeightBlock::new(bytes, WeightDType::Fp16)
}

fn fp8_block(n: usize, seed: &mut u64) -> WeightBlock {
    let bytes = (0..n).map(|_| f32_to_e5m2(lcg_f32(seed) * 0.1)).collect();
    WeightBlock::new(bytes, WeightDType::Fp8)
}

fn gf4_block(n: usize, seed: &mut u64) -> WeightBlock {
    let mut bytes = Vec::with_capacity(WeightDType::Gf4.bytes_for(n));
    for _ in 0..n.div_ceil(8) {
        let mut group = [0.0f32; 8];
        for v in group.iter_mut() {
            *v = lcg_f32(seed) * 0.1;
        }
        let (word, scale) = gf4_encode(&group);
        bytes.extend_from_slice(&word.to_le_bytes());
        bytes.extend_from_slice(&scale.to_le_bytes());
    }
    WeightBlock::new(bytes, WeightDType::Gf4)
}

/// Build a weight block's bytes at the given precision. Real gf4/fp8
/// conversion from a checkpoint is the model-file parser's job, not this
/// crate's, but a forward-pass test needs blocks that actually decode
/// under whatever `dbits` the config under test specifies.
fn weight_block(dbits: WeightDType, n: usize, seed: &mut u64) -> WeightBlock {
    match dbits {
        WeightDType::Gf4 => gf4_block(n, seed),
        WeightDType::Fp8 => fp8_block(n, seed),
        WeightDType::Fp16 => fp16_block(n, seed),
    }
}

fn vec_f32(n: usize, seed: &mut u64, center: f32) -> Vec<f32> {
    (0..n).map(|_| center + lcg_f32(seed) * 0.01).collect()
}

fn tiny_layer(config: &Config, seed: &mut u64) -> LayerWeights {
    let d = config.d;
    let h = config.h;
    let q_width = config.q_width();
    let kv_width = config.kv_width();
    let dbits = config.dbits;

    let (w3, b1, b2, wg, experts_w1, experts_w2, experts_w3) = if config.architecture.is_moe() {
        let experts_w1 = (0..config.n_experts).map(|_| weight_block(dbits, h * d, seed)).collect();
        let experts_w2 = (0..config.n_experts).map(|_| weight_block(dbits, d * h, seed)).collect();
        let experts_w3 = (0..config.n_experts).map(|_| weight_block(dbits, h * d, seed)).collect();
        (None, None, None, Some(weight_block(dbits, config.n_experts * d, seed)), experts_w1, experts_w2, experts_w3)
    } else if config.architecture.has_parallel_branches() {
        (
            None,
            Some(vec_f32(h, seed, 0.0)),
            Some(vec_f32(d, seed, 0.0)),
            None,
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    } else {
        (Some(weight_block(dbits, h * d, seed)), None, None, None, Vec::new(), Vec::new(), Vec::new())
    };

    LayerWeights {
        attn_norm: vec_f32(d, seed, 1.0),
        ffn_norm: vec_f32(d, seed, 1.0),
        wq: weight_block(dbits, q_width * d, seed),
        wk: weight_block(dbits, kv_width * d, seed),
        wv: weight_block(dbits, kv_width * d, seed),
        wo: weight_block(dbits, d * q_width, seed),
        bq: None,
        bk: None,
        bv: None,
        w1: weight_block(dbits, h * d, seed),
        w2: weight_block(dbits, d * h, seed),
        w3,
        b1,
        b2,
        wg,
        experts_w1,
        experts_w2,
        experts_w3,
    }
}

/// Build a fully-populated, dense-initialized `HostWeights` sized for
/// `config`, suitable for driving a real forward pass end to end in tests.
/// Weight blocks are encoded at `config.dbits`, so a test can exercise any
/// of the three weight precisions by varying the config it passes in.
pub fn tiny_dense_weights(config: &Config) -> HostWeights {
    let mut seed = 0x9E3779B97F4A7C15u64 ^ (config.l as u64);

    HostWeights {
        embedding: weight_block(config.dbits, config.v * config.d, &mut seed),
        output_norm: vec_f32(config.d, &mut seed, 1.0),
        classifier: weight_block(config.dbits, config.v * config.d, &mut seed),
        classifier_bias: None,
        layers: (0..config.l).map(|_| tiny_layer(config, &mut seed)).collect(),
    }
}
