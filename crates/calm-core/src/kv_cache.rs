use calm_tensor::element::{KvElem, KvF16Elem, KvFp8Elem};
use calm_tensor::KvDType;

/// Device-resident key/value cache for one model.
///
/// Layout is load-bearing (§3, §9). Keys are stored with position-pairs
/// interleaved within a head: for a fixed layer and head-dim *pair*
/// (`pair_idx = head_element / 2`), each position occupies a two-slot
/// block `[kv_pos*2, kv_pos*2+1]` holding the RoPE-rotated values `(r0,
/// r1)`; the next pair's block starts `smax*2` slots later. Values are
/// stored with positions contiguous within each head-element:
/// `(head_element, position)` is the fastest-varying pair, with no pairing
/// by twos. Both layouts make attention reads coalesced along the
/// position axis; an ordinary `(position, head, element)` layout would
/// work functionally but loses that property.
#[derive(Debug)]
pub struct KvCache {
    k: Vec<u8>,
    v: Vec<u8>,
    kvbits: KvDType,
    n_layers: usize,
    smax: usize,
    kv_width: usize,
}

fn kv_load(kvbits: KvDType, bytes: &[u8], index: usize) -> f32 {
    match kvbits {
        KvDType::Fp8 => KvFp8Elem::load(bytes, index),
        KvDType::Fp16 => KvF16Elem::load(bytes, index),
    }
}

fn kv_store(kvbits: KvDType, bytes: &mut [u8], index: usize, value: f32) {
    match kvbits {
        KvDType::Fp8 => KvFp8Elem::store(bytes, index, value),
        KvDType::Fp16 => KvF16Elem::store(bytes, index, value),
    }
}

impl KvCache {
    pub fn new(n_layers: usize, smax: usize, kv_width: usize, kvbits: KvDType) -> Self {
        let len = n_layers * smax * kv_width;
        KvCache {
            k: vec![0u8; kvbits.bytes_for(len)],
            v: vec![0u8; kvbits.bytes_for(len)],
            kvbits,
            n_layers,
            smax,
            kv_width,
        }
    }

    pub fn kvbits(&self) -> KvDType {
        self.kvbits
    }

    /// Physical write index for a given logical position, per the
    /// attention-sink wrap rule: sticky for `pos < smax`, otherwise wraps
    /// into `[kv_sink, smax)`.
    pub fn physical_index(pos: usize, smax: usize, kv_sink: usize) -> usize {
        if pos < smax {
            pos
        } else {
            kv_sink + (pos - kv_sink) % (smax - kv_sink)
        }
    }

    /// Number of valid cached positions for a given logical position.
    pub fn kv_len(pos: usize, smax: usize) -> usize {
        (pos + 1).min(smax)
    }

    fn key_index(&self, layer: usize, pair_idx: usize, kv_pos: usize, lane: usize) -> usize {
        debug_assert!(lane < 2);
        let layer_stride = self.kv_width * self.smax;
        layer * layer_stride + pair_idx * self.smax * 2 + kv_pos * 2 + lane
    }

    /// Write a rotated key pair `(r0, r1)` for head-dim pair
    /// `pair_idx = head_element / 2` at logical position `kv_pos`.
    pub fn write_key_pair(&mut self, layer: usize, pair_idx: usize, kv_pos: usize, r0: f32, r1: f32) {
        let idx0 = self.key_index(layer, pair_idx, kv_pos, 0);
        let idx1 = self.key_index(layer, pair_idx, kv_pos, 1);
        kv_store(self.kvbits, &mut self.k, idx0, r0);
        kv_store(self.kvbits, &mut self.k, idx1, r1);
    }

    /// Read one key element at `(layer, head_element, kv_pos)`.
    pub fn read_key(&self, layer: usize, head_element: usize, kv_pos: usize) -> f32 {
        let pair_idx = head_element / 2;
        let lane = head_element % 2;
        let idx = self.key_index(layer, pair_idx, kv_pos, lane);
        kv_load(self.kvbits, &self.k, idx)
    }

    fn value_index(&self, layer: usize, head_element: usize, kv_pos: usize) -> usize {
        let layer_stride = self.kv_width * self.smax;
        layer * layer_stride + head_element * self.smax + kv_pos
    }

    pub fn write_value(&mut self, layer: usize, head_element: usize, kv_pos: usize, value: f32) {
        let idx = self.value_index(layer, head_element, kv_pos);
        kv_store(self.kvbits, &mut self.v, idx, value);
    }

    pub fn read_value(&self, layer: usize, head_element: usize, kv_pos: usize) -> f32 {
        let idx = self.value_index(layer, head_element, kv_pos);
        kv_load(self.kvbits, &self.v, idx)
    }

    /// Rotate every sink key vector by one position worth of rotary
    /// frequency, keeping them aligned with non-sink keys once the cache
    /// has started wrapping. `dh` is the head dim, `dr` the rotary dim,
    /// `theta` the RoPE base.
    pub fn rotate_sink_keys(&mut self, kv_sink: usize, n_heads_kv: usize, dh: usize, dr: usize, theta: f32) {
        for layer in 0..self.n_layers {
            for kv_pos in 0..kv_sink {
                for h in 0..n_heads_kv {
                    for j in (0..dr).step_by(2) {
                        let he0 = h * dh + j;
                        let he1 = h * dh + j + 1;
                        let freq = (-(theta.log2()) * j as f32 / dr as f32).exp2();
                        let (sin, cos) = freq.sin_cos();
                        let v0 = self.read_key(layer, he0, kv_pos);
                        let v1 = self.read_key(layer, he1, kv_pos);
                        let r0 = v0 * cos - v1 * sin;
                        let r1 = v0 * sin + v1 * cos;
                        self.write_key_pair(layer, he0 / 2, kv_pos, r0, r1);
                    }
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.k.fill(0);
        self.v.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_index_is_identity_before_wrap() {
        for pos in 0..8 {
            assert_eq!(KvCache::physical_index(pos, 8, 2), pos);
        }
    }

    #[test]
    fn physical_index_wraps_into_sink_tail() {
        assert_eq!(KvCache::physical_index(8, 8, 2), 2);
        assert_eq!(KvCache::physical_index(9, 8, 2), 3);
        assert_eq!(KvCache::physical_index(13, 8, 2), 7);
        assert_eq!(KvCache::physical_index(14, 8, 2), 2);
    }

    #[test]
    fn sink_positions_never_selected_once_wrapping() {
        for pos in 8..20 {
            let idx = KvCache::physical_index(pos, 8, 2);
            assert!(idx >= 2);
        }
    }

    #[test]
    fn key_pair_roundtrips_through_transposed_layout() {
        let mut cache = KvCache::new(1, 8, 4, KvDType::Fp16);
        cache.write_key_pair(0, 0, 3, 1.5, -0.5);
        cache.write_key_pair(0, 0, 4, -2.5, 2.0);
        assert_eq!(cache.read_key(0, 0, 3), 1.5);
        assert_eq!(cache.read_key(0, 1, 3), -0.5);
        assert_eq!(cache.read_key(0, 0, 4), -2.5);
        assert_eq!(cache.read_key(0, 1, 4), 2.0);
    }

    #[test]
    fn value_roundtrips_contiguous_per_head_element() {
        let mut cache = KvCache::new(1, 8, 4, KvDType::Fp16);
        for pos in 0..8 {
            cache.write_value(0, 1, pos, pos as f32);
        }
        for pos in 0..8 {
            assert_eq!(cache.read_value(0, 1, pos), pos as f32);
        }
    }

    #[test]
    fn sink_rotation_changes_key_values() {
        let mut cache = KvCache::new(1, 8, 4, KvDType::Fp16);
        cache.write_key_pair(0, 0, 0, 1.0, 0.0);
        let before = (cache.read_key(0, 0, 0), cache.read_key(0, 1, 0));
        cache.rotate_sink_keys(2, 1, 4, 4, 10000.0);
        let after = (cache.read_key(0, 0, 0), cache.read_key(0, 1, 0));
        assert_ne!(before, after);
    }
}
