/// A raw device-resident allocation.
///
/// The CPU reference device stands host memory in for device memory (there
/// is no separate address space to cross); the Metal device wraps an actual
/// `MTLBuffer`. Everything above this layer only ever touches bytes through
/// `as_bytes`/`as_bytes_mut`, so the kernels in `cpu`/`metal` are agnostic to
/// which concrete allocation backs a given block.
#[derive(Debug)]
pub enum DeviceBuffer {
    /// Host-memory-backed allocation used by the CPU reference device.
    Host(Vec<u8>),
}

impl DeviceBuffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        DeviceBuffer::Host(vec![0u8; len])
    }

    /// Stage a host byte slice into a new device allocation (the `upload`
    /// primitive of the Device Memory Manager).
    pub fn upload(bytes: &[u8]) -> Self {
        DeviceBuffer::Host(bytes.to_vec())
    }

    pub fn len(&self) -> usize {
        match self {
            DeviceBuffer::Host(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DeviceBuffer::Host(v) => v.as_slice(),
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            DeviceBuffer::Host(v) => v.as_mut_slice(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_has_requested_len() {
        let b = DeviceBuffer::zeroed(16);
        assert_eq!(b.len(), 16);
        assert!(b.as_bytes().iter().all(|&x| x == 0));
    }

    #[test]
    fn upload_copies_bytes() {
        let src = [1u8, 2, 3, 4];
        let b = DeviceBuffer::upload(&src);
        assert_eq!(b.as_bytes(), &src);
    }

    #[test]
    fn mutation_is_visible() {
        let mut b = DeviceBuffer::zeroed(4);
        b.as_bytes_mut()[0] = 9;
        assert_eq!(b.as_bytes()[0], 9);
    }
}
