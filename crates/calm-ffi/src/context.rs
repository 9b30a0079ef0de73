use calm_core::{Architecture, Config, HostWeights, LayerWeights, Transformer, WeightBlock};
use calm_tensor::{CpuDevice, KvDType, WeightDType};

use crate::types::{CalmArchitecture, CalmConfig, CalmFloatSlice, CalmLayerWeights, CalmWeightBlock, CalmWeights};

/// Opaque context handle that owns the uploaded transformer and the most
/// recent forward pass's logits, kept alive here so the pointer handed
/// back through `calm_forward` stays valid until the next call.
pub struct CalmContext {
    pub transformer: Option<Transformer>,
    pub last_logits: Vec<f32>,
}

impl Default for CalmContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CalmContext {
    pub fn new() -> Self {
        Self {
            transformer: None,
            last_logits: Vec::new(),
        }
    }
}

fn architecture_from_c(a: CalmArchitecture) -> Architecture {
    match a {
        CalmArchitecture::LlamaLike => Architecture::LlamaLike,
        CalmArchitecture::Qwen => Architecture::Qwen,
        CalmArchitecture::Phi => Architecture::Phi,
        CalmArchitecture::Mixtral => Architecture::Mixtral,
        CalmArchitecture::Olmo => Architecture::Olmo,
        CalmArchitecture::Gemma => Architecture::Gemma,
    }
}

/// Convert a C-side config struct into the core's validated config type.
/// `dbits`/`kvbits` values outside the supported set are rejected by the
/// caller (`calm_prepare`) before this runs.
pub fn config_from_c(c: &CalmConfig, dbits: WeightDType, kvbits: KvDType) -> Config {
    Config {
        architecture: architecture_from_c(c.architecture),
        d: c.d,
        h: c.h,
        dh: c.dh,
        l: c.l,
        hq: c.hq,
        hkv: c.hkv,
        v: c.v,
        smax: c.smax,
        dr: c.dr,
        rope_theta: c.rope_theta,
        n_experts: c.n_experts,
        n_active_experts: c.n_active_experts,
        norm_eps: c.norm_eps,
        embed_scale: c.embed_scale,
        dbits,
        kvbits,
        kv_sink: c.kv_sink,
    }
}

/// # Safety
/// `slice.data` must either be null (in which case `len` is ignored and
/// the slice is treated as empty/absent) or point to at least `slice.len`
/// contiguous, initialized `f32` values that outlive this call.
unsafe fn read_float_slice(slice: CalmFloatSlice) -> Vec<f32> {
    if slice.data.is_null() || slice.len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(slice.data, slice.len) }.to_vec()
    }
}

/// # Safety
/// See [`read_float_slice`]; returns `None` for an empty/absent slice.
unsafe fn read_float_slice_opt(slice: CalmFloatSlice) -> Option<Vec<f32>> {
    if slice.data.is_null() || slice.len == 0 {
        None
    } else {
        Some(unsafe { read_float_slice(slice) })
    }
}

/// # Safety
/// `block.bytes` must either be null (absent) or point to at least
/// `block.len` initialized bytes that outlive this call; `block.dbits`
/// must be 4, 8, or 16.
unsafe fn read_weight_block(block: CalmWeightBlock) -> Option<WeightBlock> {
    if block.bytes.is_null() {
        return None;
    }
    let dbits = WeightDType::from_dbits(block.dbits)?;
    let bytes = unsafe { std::slice::from_raw_parts(block.bytes, block.len) }.to_vec();
    Some(WeightBlock::new(bytes, dbits))
}

/// # Safety
/// `ptr` must point to at least `n` contiguous, initialized
/// `CalmWeightBlock` values (or be null/`n == 0`), each itself satisfying
/// [`read_weight_block`]'s preconditions.
unsafe fn read_weight_block_array(ptr: *const CalmWeightBlock, n: usize) -> Option<Vec<WeightBlock>> {
    if ptr.is_null() || n == 0 {
        return None;
    }
    let raw = unsafe { std::slice::from_raw_parts(ptr, n) };
    raw.iter().map(|&b| unsafe { read_weight_block(b) }).collect()
}

/// # Safety
/// `c` must satisfy the preconditions documented on [`CalmLayerWeights`]'s
/// fields: every pointer either null or pointing at its declared length of
/// initialized data, outliving this call.
unsafe fn layer_weights_from_c(c: &CalmLayerWeights) -> Option<LayerWeights> {
    Some(LayerWeights {
        attn_norm: unsafe { read_float_slice(c.attn_norm) },
        ffn_norm: unsafe { read_float_slice(c.ffn_norm) },
        wq: unsafe { read_weight_block(c.wq) }?,
        wk: unsafe { read_weight_block(c.wk) }?,
        wv: unsafe { read_weight_block(c.wv) }?,
        wo: unsafe { read_weight_block(c.wo) }?,
        bq: unsafe { read_float_slice_opt(c.bq) },
        bk: unsafe { read_float_slice_opt(c.bk) },
        bv: unsafe { read_float_slice_opt(c.bv) },
        w1: unsafe { read_weight_block(c.w1) }?,
        w2: unsafe { read_weight_block(c.w2) }?,
        w3: unsafe { read_weight_block(c.w3) },
        b1: unsafe { read_float_slice_opt(c.b1) },
        b2: unsafe { read_float_slice_opt(c.b2) },
        wg: unsafe { read_weight_block(c.wg) },
        experts_w1: unsafe { read_weight_block_array(c.experts_w1, c.n_experts) }.unwrap_or_default(),
        experts_w2: unsafe { read_weight_block_array(c.experts_w2, c.n_experts) }.unwrap_or_default(),
        experts_w3: unsafe { read_weight_block_array(c.experts_w3, c.n_experts) }.unwrap_or_default(),
    })
}

/// # Safety
/// `c.layers` must point to at least `c.n_layers` contiguous,
/// initialized `CalmLayerWeights` values, each satisfying
/// [`layer_weights_from_c`]'s preconditions; every other pointer field on
/// `c` must satisfy the same null-or-valid-for-its-length contract.
pub unsafe fn host_weights_from_c(c: &CalmWeights) -> Option<HostWeights> {
    if c.layers.is_null() {
        return None;
    }
    let raw_layers = unsafe { std::slice::from_raw_parts(c.layers, c.n_layers) };
    let layers = raw_layers
        .iter()
        .map(|l| unsafe { layer_weights_from_c(l) })
        .collect::<Option<Vec<_>>>()?;

    Some(HostWeights {
        embedding: unsafe { read_weight_block(c.embedding) }?,
        output_norm: unsafe { read_float_slice(c.output_norm) },
        classifier: unsafe { read_weight_block(c.classifier) }?,
        classifier_bias: unsafe { read_float_slice_opt(c.classifier_bias) },
        layers,
    })
}

pub fn new_device() -> Box<dyn calm_tensor::Device> {
    Box::new(CpuDevice::new())
}
