//! Inbound stream decryption
//!
//! The receive task runs every chunk through a [`Decryptor`] in place before
//! decompression. The cipher keeps its own state across chunks, so chunk
//! boundaries never affect the output.

/// In-place stream decryption
pub trait Decryptor: Send {
    /// Decrypt `data` in place
    fn decrypt(&mut self, data: &mut [u8]);
}

/// Rolling-iterator XOR cipher
///
/// Every 4 bytes the 32-bit iterator is advanced with
/// `iterator = iterator * 0x8088405 + key`; each data byte is XORed with the
/// matching little-endian byte of the current iterator.
#[derive(Debug, Clone)]
pub struct XorCipher {
    key: u8,
    iterator: u32,
    /// Bytes processed so far, used to keep the 4-byte phase across calls
    offset: u64,
}

impl XorCipher {
    /// Iterator value every session starts from
    pub const ITERATOR_START: u32 = 0x04A8_0B38;

    pub fn new(key: u8) -> Self {
        Self::with_iterator(key, Self::ITERATOR_START)
    }

    /// Cipher seeded with an explicit iterator (e.g. the handshake seed)
    pub fn with_iterator(key: u8, iterator: u32) -> Self {
        Self { key, iterator, offset: 0 }
    }

    /// Apply the keystream to `data`; encryption and decryption are the same operation
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let phase = (self.offset % 4) as usize;
            if phase == 0 {
                self.iterator = self.iterator.wrapping_mul(0x8088405);
                self.iterator = self.iterator.wrapping_add(self.key as u32);
            }
            *byte ^= self.iterator.to_le_bytes()[phase];
            self.offset += 1;
        }
    }
}

impl Decryptor for XorCipher {
    fn decrypt(&mut self, data: &mut [u8]) {
        self.apply(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_roundtrip() {
        let original = b"Hello, Britannia! This is a test of the cipher.".to_vec();

        let mut data = original.clone();
        XorCipher::new(0x5A).apply(&mut data);
        assert_ne!(data, original);

        XorCipher::new(0x5A).decrypt(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_xor_chunking_invariant() {
        let plain: Vec<u8> = (0..64u8).collect();

        let mut whole = plain.clone();
        XorCipher::new(7).apply(&mut whole);

        let mut chunked = plain.clone();
        let mut cipher = XorCipher::new(7);
        let (a, rest) = chunked.split_at_mut(3);
        let (b, c) = rest.split_at_mut(10);
        cipher.decrypt(a);
        cipher.decrypt(b);
        cipher.decrypt(c);

        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_first_keystream_bytes() {
        let mut data = [0u8; 4];
        XorCipher::with_iterator(0, 1).apply(&mut data);
        assert_eq!(data, 0x8088405u32.to_le_bytes());
    }
}
