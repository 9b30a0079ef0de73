use crate::config::Config;

/// Mutable, device-resident scratch buffers for one forward pass (§3).
/// Allocated once at prepare-time and exclusively owned by the single
/// forward pass in flight; the caller must not issue a second forward
/// before the first returns.
#[derive(Debug)]
pub struct RunState {
    /// Residual stream, length `D`.
    pub x: Vec<f32>,
    /// Normalized scratch, length `D`.
    pub xb: Vec<f32>,
    /// Parallel-branch (Phi MLP) accumulator, length `D`.
    pub xa: Vec<f32>,
    /// FFN hidden scratch: the gate projection for gated FFNs, or a
    /// per-expert gate projection for MoE. Length `H`.
    pub hb: Vec<f32>,
    /// FFN auxiliary hidden scratch: the up projection for gated FFNs, or a
    /// per-expert up projection for MoE. Length `max(Ea, 1) * H` so it is
    /// always available as a second `H`-length buffer even for dense models.
    pub he: Vec<f32>,
    /// Query projection scratch, length `Hq * Dh`.
    pub q: Vec<f32>,
    /// Attention score scratch, length `Hq * Smax`.
    pub att: Vec<f32>,
    /// MoE gate/selection scratch, length `E + 2*Ea`: raw gate logits in
    /// `[0, E)`, selected routing weights in `[E, E + Ea)`, selected expert
    /// indices (as exact `f32`) in `[E + Ea, E + 2*Ea)`.
    pub exp: Vec<f32>,
    /// Host-visible logits buffer, length `V`.
    pub logits: Vec<f32>,
}

impl RunState {
    pub fn new(config: &Config) -> Self {
        RunState {
            x: vec![0.0; config.d],
            xb: vec![0.0; config.d],
            xa: vec![0.0; config.d],
            hb: vec![0.0; config.h],
            he: vec![0.0; config.n_active_experts.max(1) * config.h],
            q: vec![0.0; config.q_width()],
            att: vec![0.0; config.hq * config.smax],
            exp: vec![0.0; config.n_experts + 2 * config.n_active_experts],
            logits: vec![0.0; config.v],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Architecture;
    use calm_tensor::{KvDType, WeightDType};

    fn tiny_config() -> Config {
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
            n_active_experts: 2,
            norm_eps: 1e-5,
            embed_scale: 1.0,
            dbits: WeightDType::Fp16,
            kvbits: KvDType::Fp16,
            kv_sink: 2,
        }
    }

    #[test]
    fn buffers_sized_per_config() {
        let cfg = tiny_config();
        let rs = RunState::new(&cfg);
        assert_eq!(rs.x.len(), 64);
        assert_eq!(rs.hb.len(), 128);
        assert_eq!(rs.he.len(), 2 * 128);
        assert_eq!(rs.q.len(), 4 * 16);
        assert_eq!(rs.att.len(), 4 * 8);
        assert_eq!(rs.exp.len(), 8 + 2 * 2);
        assert_eq!(rs.logits.len(), 32);
    }
}
