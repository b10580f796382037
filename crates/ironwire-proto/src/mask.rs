//! Payload masking.

/// 4-byte masking key carried by client-to-server frames
pub type MaskKey = [u8; 4];

/// XOR `data` in place with `key`, starting at key offset 0.
///
/// Masking is an involution: applying the same key twice restores the input.
pub fn apply_mask(data: &mut [u8], key: MaskKey) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn rfc6455_hello_example() {
        let mut data = *b"Hello";
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    proptest! {
        #[test]
        fn masking_is_an_involution(data in proptest::collection::vec(any::<u8>(), 0..512), key in any::<[u8; 4]>()) {
            let mut masked = data.clone();
            apply_mask(&mut masked, key);
            apply_mask(&mut masked, key);
            prop_assert_eq!(masked, data);
        }
    }
}
