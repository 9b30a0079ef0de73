use calm_tensor::Device;

use crate::config::Config;
use crate::error::Result;
use crate::kv_cache::KvCache;
use crate::run_state::RunState;
use crate::weights::{DeviceWeights, HostWeights};

/// The device memory manager's handle (§4.1): a validated config, the
/// device-resident weights, per-forward scratch state, and the KV cache,
/// all owned together so a forward pass never has to reach past this one
/// struct for anything it touches.
#[derive(Debug)]
pub struct Transformer {
    pub config: Config,
    pub weights: DeviceWeights,
    pub state: RunState,
    pub kv_cache: KvCache,
    pub device: Box<dyn Device>,
}

impl Transformer {
    /// Validate `config`, allocate device-resident state sized to it, and
    /// upload `host_weights`. Mirrors the calm.cpp `InferenceState`/weight
    /// upload split: configuration errors are caught here and returned,
    /// but a copy/allocation fault on the device itself is not recoverable
    /// and is never expected to surface from the CPU reference device.
    pub fn prepare(config: Config, host_weights: HostWeights, device: Box<dyn Device>) -> Result<Transformer> {
        config.validate()?;
        host_weights.validate_shapes(&config)?;

        let state = RunState::new(&config);
        let kv_cache = KvCache::new(config.l, config.smax, config.kv_width(), config.kvbits);
        let weights = host_weights.upload();

        Ok(Transformer {
            config,
            weights,
            state,
            kv_cache,
            device,
        })
    }

    /// Reset the KV cache, discarding all cached positions. Does not
    /// reallocate; the next `forward` call starts a fresh sequence.
    pub fn reset(&mut self) {
        self.kv_cache.reset();
    }
}
