pub mod attention;
pub mod config;
pub mod coop;
pub mod driver;
pub mod error;
pub mod ffn;
pub mod kv_cache;
pub mod run_state;
#[cfg(test)]
pub mod test_support;
pub mod transformer;
pub mod weights;

pub use config::{Activation, Architecture, Config};
pub use driver::{finalize, forward, UPDATE_KV_ONLY};
pub use error::{ConfigError, Result};
pub use kv_cache::KvCache;
pub use run_state::RunState;
pub use transformer::Transformer;
pub use weights::{DeviceLayerWeights, DeviceWeights, HostWeights, LayerWeights, WeightBlock};
