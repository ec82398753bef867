//! Fixed-address buffers handed to the privileged side.

/// Heap buffer whose address is stable for its whole life.
///
/// The component writes into it through a raw address, so the buffer is
/// never resized and is only read back after the request returned. It is
/// freed on every exit path when it goes out of scope.
#[derive(Debug)]
pub struct PinnedBuffer {
    bytes: Box<[u8]>,
}

impl PinnedBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self { bytes: vec![0u8; len].into_boxed_slice() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Address to put in a request. Takes `&mut self` because the other
    /// side will write through it.
    pub fn address(&mut self) -> u64 {
        self.bytes.as_mut_ptr() as u64
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_stable_and_contents_survive() {
        let mut buf = PinnedBuffer::zeroed(16);
        let a = buf.address();
        assert_eq!(a, buf.address());
        unsafe { *(a as *mut u8).add(3) = 0x7F };
        let v = buf.into_vec();
        assert_eq!(v.len(), 16);
        assert_eq!(v[3], 0x7F);
    }
}
