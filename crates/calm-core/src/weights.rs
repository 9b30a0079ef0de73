use calm_tensor::{DeviceBuffer, TensorError, WeightDType};

use crate::config::Config;

/// A single weight matrix or vector as it arrives at the device memory
/// manager's boundary: raw packed bytes plus the precision tag needed to
/// interpret them. Populating these bytes (GGUF parsing, conversion,
/// quantization) is the model-file parser's job, not this crate's. These
/// blocks are the handoff point.
#[derive(Debug, Clone)]
pub struct WeightBlock {
    pub bytes: Vec<u8>,
    pub dbits: WeightDType,
}

impl WeightBlock {
    pub fn new(bytes: Vec<u8>, dbits: WeightDType) -> Self {
        WeightBlock { bytes, dbits }
    }

    /// Upload this block to device memory.
    pub fn upload(&self) -> DeviceBuffer {
        DeviceBuffer::upload(&self.bytes)
    }

    /// Check this block's byte length against the count of elements its
    /// matrix shape implies, at its own `dbits` precision.
    fn validate_len(&self, expected_elements: usize) -> Result<(), TensorError> {
        let expected = self.dbits.bytes_for(expected_elements);
        let got = self.bytes.len();
        if got != expected {
            return Err(TensorError::ShapeMismatch { expected, got });
        }
        Ok(())
    }
}

/// Per-layer host-resident weight blocks, named per the data model (§3).
#[derive(Debug, Clone)]
pub struct LayerWeights {
    pub attn_norm: Vec<f32>,
    pub ffn_norm: Vec<f32>,
    pub wq: WeightBlock,
    pub wk: WeightBlock,
    pub wv: WeightBlock,
    pub wo: WeightBlock,
    pub bq: Option<Vec<f32>>,
    pub bk: Option<Vec<f32>>,
    pub bv: Option<Vec<f32>>,
    /// Gate projection (SwiGLU/GeGLU `w1`, or Phi's single-branch `w1`).
    pub w1: WeightBlock,
    /// Down projection.
    pub w2: WeightBlock,
    /// Up projection, present only for gated architectures.
    pub w3: Option<WeightBlock>,
    pub b1: Option<Vec<f32>>,
    pub b2: Option<Vec<f32>>,
    /// MoE gate matrix, present only for MoE architectures.
    pub wg: Option<WeightBlock>,
    /// Per-expert gate/up/down projections, present only for MoE
    /// architectures; length `n_experts`.
    pub experts_w1: Vec<WeightBlock>,
    pub experts_w2: Vec<WeightBlock>,
    pub experts_w3: Vec<WeightBlock>,
}

/// All device-resident weight blocks for one model, uploaded once at
/// prepare-time and read-only thereafter.
#[derive(Debug, Clone)]
pub struct HostWeights {
    pub embedding: WeightBlock,
    pub output_norm: Vec<f32>,
    pub classifier: WeightBlock,
    pub classifier_bias: Option<Vec<f32>>,
    pub layers: Vec<LayerWeights>,
}

/// Device-resident counterpart of [`HostWeights`]: every blob uploaded via
/// `DeviceBuffer::upload`, retaining the precision tags needed to dispatch
/// kernels. Built once by the device memory manager and never mutated.
#[derive(Debug)]
pub struct DeviceLayerWeights {
    pub attn_norm: Vec<f32>,
    pub ffn_norm: Vec<f32>,
    pub wq: (DeviceBuffer, WeightDType),
    pub wk: (DeviceBuffer, WeightDType),
    pub wv: (DeviceBuffer, WeightDType),
    pub wo: (DeviceBuffer, WeightDType),
    pub bq: Option<Vec<f32>>,
    pub bk: Option<Vec<f32>>,
    pub bv: Option<Vec<f32>>,
    pub w1: (DeviceBuffer, WeightDType),
    pub w2: (DeviceBuffer, WeightDType),
    pub w3: Option<(DeviceBuffer, WeightDType)>,
    pub b1: Option<Vec<f32>>,
    pub b2: Option<Vec<f32>>,
    pub wg: Option<(DeviceBuffer, WeightDType)>,
    pub experts_w1: Vec<(DeviceBuffer, WeightDType)>,
    pub experts_w2: Vec<(DeviceBuffer, WeightDType)>,
    pub experts_w3: Vec<(DeviceBuffer, WeightDType)>,
}

#[derive(Debug)]
pub struct DeviceWeights {
    pub embedding: (DeviceBuffer, WeightDType),
    pub output_norm: Vec<f32>,
    pub classifier: (DeviceBuffer, WeightDType),
    pub classifier_bias: Option<Vec<f32>>,
    pub layers: Vec<DeviceLayerWeights>,
}

fn upload_opt(block: &Option<WeightBlock>) -> Option<(DeviceBuffer, WeightDType)> {
    block.as_ref().map(|b| (b.upload(), b.dbits))
}

impl HostWeights {
    /// Check every weight block's byte length against the shape `config`
    /// implies, before any device allocation happens (§4.1). Called once
    /// at prepare-time so a truncated or mis-packed weight block is caught
    /// before it ever reaches a kernel.
    pub fn validate_shapes(&self, config: &Config) -> Result<(), TensorError> {
        let d = config.d;
        let h = config.h;
        let q_width = config.q_width();
        let kv_width = config.kv_width();

        self.embedding.validate_len(config.v * d)?;
        self.classifier.validate_len(config.v * d)?;

        for layer in &self.layers {
            layer.wq.validate_len(q_width * d)?;
            layer.wk.validate_len(kv_width * d)?;
            layer.wv.validate_len(kv_width * d)?;
            layer.wo.validate_len(d * q_width)?;
            layer.w1.validate_len(h * d)?;
            layer.w2.validate_len(d * h)?;
            if let Some(w3) = &layer.w3 {
                w3.validate_len(h * d)?;
            }
            if let Some(wg) = &layer.wg {
                wg.validate_len(config.n_experts * d)?;
            }
            for w in &layer.experts_w1 {
                w.validate_len(h * d)?;
            }
            for w in &layer.experts_w2 {
                w.validate_len(d * h)?;
            }
            for w in &layer.experts_w3 {
                w.validate_len(h * d)?;
            }
        }
        Ok(())
    }

    /// Upload every weight block to device memory (the device memory
    /// manager's `prepare` step). Failure to allocate is a device fault,
    /// not a `Result`-returning error; `DeviceBuffer::upload` never fails
    /// on the CPU reference device since host memory stands in for device
    /// memory.
    pub fn upload(&self) -> DeviceWeights {
        DeviceWeights {
            embedding: (self.embedding.upload(), self.embedding.dbits),
            output_norm: self.output_norm.clone(),
            classifier: (self.classifier.upload(), self.classifier.dbits),
            classifier_bias: self.classifier_bias.clone(),
            layers: self
                .layers
                .iter()
                .map(|l| DeviceLayerWeights {
                    attn_norm: l.attn_norm.clone(),
                    ffn_norm: l.ffn_norm.clone(),
                    wq: (l.wq.upload(), l.wq.dbits),
                    wk: (l.wk.upload(), l.wk.dbits),
                    wv: (l.wv.upload(), l.wv.dbits),
                    wo: (l.wo.upload(), l.wo.dbits),
                    bq: l.bq.clone(),
                    bk: l.bk.clone(),
                    bv: l.bv.clone(),
                    w1: (l.w1.upload(), l.w1.dbits),
                    w2: (l.w2.upload(), l.w2.dbits),
                    w3: upload_opt(&l.w3),
                    b1: l.b1.clone(),
                    b2: l.b2.clone(),
                    wg: upload_opt(&l.wg),
                    experts_w1: l.experts_w1.iter().map(|b| (b.upload(), b.dbits)).collect(),
                    experts_w2: l.experts_w2.iter().map(|b| (b.upload(), b.dbits)).collect(),
                    experts_w3: l.experts_w3.iter().map(|b| (b.upload(), b.dbits)).collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(n: usize) -> WeightBlock {
        WeightBlock::new(vec![0u8; n], WeightDType::Fp16)
    }

    fn tiny_layer() -> LayerWeights {
        LayerWeights {
            attn_norm: vec![1.0; 4],
            ffn_norm: vec![1.0; 4],
            wq: block(32),
            wk: block(32),
            wv: block(32),
            wo: block(32),
            bq: None,
            bk: None,
            bv: None,
            w1: block(32),
            w2: block(32),
            w3: Some(block(32)),
            b1: None,
            b2: None,
            wg: None,
            experts_w1: Vec::new(),
            experts_w2: Vec::new(),
            experts_w3: Vec::new(),
        }
    }

    #[test]
    fn upload_preserves_layer_count_and_dtypes() {
        let hw = HostWeights {
            embedding: block(64),
            output_norm: vec![1.0; 4],
            classifier: block(64),
            classifier_bias: None,
            layers: vec![tiny_layer(), tiny_layer()],
        };
        let dw = hw.upload();
        assert_eq!(dw.layers.len(), 2);
        assert_eq!(dw.embedding.1, WeightDType::Fp16);
        assert_eq!(dw.layers[0].wq.0.len(), 32);
        assert!(dw.layers[0].w3.is_some());
    }
}
