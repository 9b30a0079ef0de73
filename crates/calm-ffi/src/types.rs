/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalmStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorConfig = 2,
    ErrorInternal = 3,
}

/// Compute backend type selector.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum CalmBackendType {
    Cpu = 0,
    Metal = 1,
}

/// Architecture family tag, mirroring `calm_core::Architecture`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum CalmArchitecture {
    LlamaLike = 0,
    Qwen = 1,
    Phi = 2,
    Mixtral = 3,
    Olmo = 4,
    Gemma = 5,
}

/// Model configuration, mirroring `calm_core::Config`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CalmConfig {
    pub architecture: CalmArchitecture,
    pub d: usize,
    pub h: usize,
    pub dh: usize,
    pub l: usize,
    pub hq: usize,
    pub hkv: usize,
    pub v: usize,
    pub smax: usize,
    pub dr: usize,
    pub rope_theta: f32,
    pub n_experts: usize,
    pub n_active_experts: usize,
    pub norm_eps: f32,
    pub embed_scale: f32,
    /// 4, 8, or 16.
    pub dbits: u8,
    /// 8 or 16.
    pub kvbits: u8,
    pub kv_sink: usize,
}

/// A single weight matrix or vector as it arrives at the FFI boundary:
/// raw packed bytes plus the precision tag needed to interpret them. A
/// null `bytes` pointer marks an absent optional block.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CalmWeightBlock {
    pub bytes: *const u8,
    pub len: usize,
    /// 4, 8, or 16.
    pub dbits: u8,
}

/// An f32 vector at the FFI boundary. A null `data` pointer or zero `len`
/// marks an absent optional vector.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CalmFloatSlice {
    pub data: *const f32,
    pub len: usize,
}

/// Per-layer weight blocks, named per `calm_core::weights::LayerWeights`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CalmLayerWeights {
    pub attn_norm: CalmFloatSlice,
    pub ffn_norm: CalmFloatSlice,
    pub wq: CalmWeightBlock,
    pub wk: CalmWeightBlock,
    pub wv: CalmWeightBlock,
    pub wo: CalmWeightBlock,
    pub bq: CalmFloatSlice,
    pub bk: CalmFloatSlice,
    pub bv: CalmFloatSlice,
    pub w1: CalmWeightBlock,
    pub w2: CalmWeightBlock,
    /// Absent (`bytes` null) for Phi's ungated branch.
    pub w3: CalmWeightBlock,
    pub b1: CalmFloatSlice,
    pub b2: CalmFloatSlice,
    /// Absent for non-MoE architectures.
    pub wg: CalmWeightBlock,
    pub experts_w1: *const CalmWeightBlock,
    pub experts_w2: *const CalmWeightBlock,
    pub experts_w3: *const CalmWeightBlock,
    pub n_experts: usize,
}

/// The full set of host-resident weight blocks for one model.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CalmWeights {
    pub embedding: CalmWeightBlock,
    pub output_norm: CalmFloatSlice,
    pub classifier: CalmWeightBlock,
    pub classifier_bias: CalmFloatSlice,
    pub layers: *const CalmLayerWeights,
    pub n_layers: usize,
}
