use calm_tensor::{KvDType, WeightDType};

use crate::error::{ConfigError, Result};

const WARP_WIDTH: usize = 32;
const MAX_EXPERTS: usize = 64;
const MAX_LAYERS: usize = 128;

/// Architecture tag: selects the pre-composed attention/FFN pipeline the
/// forward driver runs for a given model. Carries no behavior itself;
/// `driver::dispatch` reads the tag and picks the matching component set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    LlamaLike,
    Qwen,
    Phi,
    Mixtral,
    Olmo,
    Gemma,
}

impl Architecture {
    /// Whether this architecture's FFN is the gated SwiGLU/GeGLU variant.
    pub fn is_gated_ffn(&self) -> bool {
        !matches!(self, Architecture::Phi)
    }

    /// Whether this architecture routes its FFN through a Mixture of Experts.
    pub fn is_moe(&self) -> bool {
        matches!(self, Architecture::Mixtral)
    }

    /// Whether pre-normalization uses LayerNorm (mean+variance) rather than
    /// RMSNorm.
    pub fn uses_layer_norm(&self) -> bool {
        matches!(self, Architecture::Olmo | Architecture::Phi)
    }

    /// Whether attention and MLP run as parallel branches accumulating into
    /// the next layer's normalization (Phi only).
    pub fn has_parallel_branches(&self) -> bool {
        matches!(self, Architecture::Phi)
    }

    /// The FFN gate activation for gated architectures.
    pub fn gate_activation(&self) -> Activation {
        match self {
            Architecture::Gemma => Activation::Gelu,
            _ => Activation::Silu,
        }
    }

    /// Whether the cooperative fused path supports this architecture.
    pub fn supports_cooperative_path(&self) -> bool {
        matches!(self, Architecture::LlamaLike | Architecture::Mixtral | Architecture::Gemma)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Silu,
    Gelu,
}

/// Immutable model configuration, validated once at prepare-time.
#[derive(Debug, Clone)]
pub struct Config {
    pub architecture: Architecture,
    /// Model (embedding) dimension.
    pub d: usize,
    /// FFN hidden dimension.
    pub h: usize,
    /// Dimension of each attention head.
    pub dh: usize,
    /// Number of transformer layers.
    pub l: usize,
    /// Number of query attention heads.
    pub hq: usize,
    /// Number of key/value attention heads (divides `hq`).
    pub hkv: usize,
    /// Vocabulary size.
    pub v: usize,
    /// Maximum sequence length / KV cache depth.
    pub smax: usize,
    /// Rotary dimension (`dr <= dh`); elements beyond it are not rotated.
    pub dr: usize,
    /// RoPE frequency base.
    pub rope_theta: f32,
    /// Total MoE expert count (0 for dense models).
    pub n_experts: usize,
    /// Active MoE expert count per token (0 for dense models).
    pub n_active_experts: usize,
    /// Normalization epsilon.
    pub norm_eps: f32,
    /// Embedding gather scale factor.
    pub embed_scale: f32,
    pub dbits: WeightDType,
    pub kvbits: KvDType,
    /// Attention-sink size: the first `kv_sink` positions are never
    /// overwritten once the cache wraps.
    pub kv_sink: usize,
}

impl Config {
    /// Key/value projection width, `Hkv * Dh`.
    pub fn kv_width(&self) -> usize {
        self.hkv * self.dh
    }

    /// Query projection width, `Hq * Dh`.
    pub fn q_width(&self) -> usize {
        self.hq * self.dh
    }

    /// How many query heads share one key/value head under GQA.
    pub fn heads_per_kv(&self) -> usize {
        self.hq / self.hkv
    }

    /// Validate every invariant from the data model. Called once at
    /// prepare-time; a config that fails validation never reaches the
    /// device memory manager.
    pub fn validate(&self) -> Result<()> {
        if self.d % WARP_WIDTH != 0 {
            return Err(ConfigError::ModelDimNotWarpAligned { d: self.d });
        }
        if self.h % WARP_WIDTH != 0 {
            return Err(ConfigError::HiddenDimNotWarpAligned { h: self.h });
        }
        let kv_width = self.kv_width();
        if kv_width % WARP_WIDTH != 0 {
            return Err(ConfigError::KvWidthNotWarpAligned { kv_width });
        }
        if self.v % WARP_WIDTH != 0 {
            return Err(ConfigError::VocabNotWarpAligned { v: self.v });
        }
        if self.hq % self.hkv != 0 {
            return Err(ConfigError::HeadCountMismatch {
                hq: self.hq,
                hkv: self.hkv,
            });
        }
        if self.dr % 2 != 0 {
            return Err(ConfigError::RotaryDimNotEven { dr: self.dr });
        }
        if self.dr > self.dh {
            return Err(ConfigError::RotaryDimExceedsHeadDim {
                dr: self.dr,
                dh: self.dh,
            });
        }
        if self.n_experts > MAX_EXPERTS {
            return Err(ConfigError::TooManyExperts { e: self.n_experts });
        }
        if self.n_active_experts > self.n_experts {
            return Err(ConfigError::ActiveExpertsExceedTotal {
                ea: self.n_active_experts,
                e: self.n_experts,
            });
        }
        if self.l > MAX_LAYERS {
            return Err(ConfigError::TooManyLayers { l: self.l });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn valid_config_passes() {
        assert!(tiny_config().validate().is_ok());
    }

    #[test]
    fn unaligned_model_dim_rejected() {
        let mut c = tiny_config();
        c.d = 65;
        assert!(matches!(c.validate(), Err(ConfigError::ModelDimNotWarpAligned { .. })));
    }

    #[test]
    fn mismatched_head_counts_rejected() {
        let mut c = tiny_config();
        c.hkv = 3;
        assert!(matches!(c.validate(), Err(ConfigError::HeadCountMismatch { .. })));
    }

    #[test]
    fn odd_rotary_dim_rejected() {
        let mut c = tiny_config();
        c.dr = 15;
        assert!(matches!(c.validate(), Err(ConfigError::RotaryDimNotEven { .. })));
    }

    #[test]
    fn too_many_experts_rejected() {
        let mut c = tiny_config();
        c.n_experts = 65;
        assert!(matches!(c.validate(), Err(ConfigError::TooManyExperts { .. })));
    }

    #[test]
    fn gate_activation_matches_architecture() {
        assert_eq!(Architecture::Gemma.gate_activation(), Activation::Gelu);
        assert_eq!(Architecture::LlamaLike.gate_activation(), Activation::Silu);
    }
}
