use thiserror::Error;

/// Configuration errors: the only error kind this crate surfaces as a
/// `Result`. Detected at prepare-time or at the first forward call; every
/// other failure mode (device faults, argument errors) is fatal by
/// construction and never returns here.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("model dim D={d} is not a multiple of the warp width (32)")]
    ModelDimNotWarpAligned { d: usize },
    #[error("hidden dim H={h} is not a multiple of the warp width (32)")]
    HiddenDimNotWarpAligned { h: usize },
    #[error("kv width (Hkv*Dh)={kv_width} is not a multiple of the warp width (32)")]
    KvWidthNotWarpAligned { kv_width: usize },
    #[error("vocab size V={v} is not a multiple of the warp width (32)")]
    VocabNotWarpAligned { v: usize },
    #[error("query head count Hq={hq} is not a multiple of kv head count Hkv={hkv}")]
    HeadCountMismatch { hq: usize, hkv: usize },
    #[error("rotary dim Dr={dr} is not even")]
    RotaryDimNotEven { dr: usize },
    #[error("rotary dim Dr={dr} exceeds head dim Dh={dh}")]
    RotaryDimExceedsHeadDim { dr: usize, dh: usize },
    #[error("expert count E={e} exceeds the maximum of 64")]
    TooManyExperts { e: usize },
    #[error("active expert count Ea={ea} exceeds expert count E={e}")]
    ActiveExpertsExceedTotal { ea: usize, e: usize },
    #[error("layer count L={l} exceeds the maximum of 128")]
    TooManyLayers { l: usize },
    #[error("weight block shape: {0}")]
    Tensor(#[from] calm_tensor::TensorError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
