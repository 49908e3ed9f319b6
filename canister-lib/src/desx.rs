//! DESX wrapper around the DES core: key whitening plus CBC-style block
//! chaining, as implemented by the canister firmware (the RSA BSAFE flavour
//! of DESX).
//!
//! A context is created once per derived key and direction. [`DesxCbc::update`]
//! chains consecutive blocks through the current chaining value;
//! [`DesxCbc::restart`] rewinds the chain to the original IV without
//! recomputing the key schedule or the whitening values, which lets one key
//! cover several independently-chained regions of a record.

use crate::des::{self, BLOCK_LEN, Direction, Subkeys};
use crate::error::CanisterError;
use crate::key::CipherKey;

// Substitution table feeding the output-whitener shift register. Distinct from
// the cipher's own S-boxes.
static WHITENER_SBOX: [u8; 256] = [
    0xbd, 0x56, 0xea, 0xf2, 0xa2, 0xf1, 0xac, 0x2a, 0xb0, 0x93, 0xd1, 0x9c,
    0x1b, 0x33, 0xfd, 0xd0, 0x30, 0x04, 0xb6, 0xdc, 0x7d, 0xdf, 0x32, 0x4b,
    0xf7, 0xcb, 0x45, 0x9b, 0x31, 0xbb, 0x21, 0x5a, 0x41, 0x9f, 0xe1, 0xd9,
    0x4a, 0x4d, 0x9e, 0xda, 0xa0, 0x68, 0x2c, 0xc3, 0x27, 0x5f, 0x80, 0x36,
    0x3e, 0xee, 0xfb, 0x95, 0x1a, 0xfe, 0xce, 0xa8, 0x34, 0xa9, 0x13, 0xf0,
    0xa6, 0x3f, 0xd8, 0x0c, 0x78, 0x24, 0xaf, 0x23, 0x52, 0xc1, 0x67, 0x17,
    0xf5, 0x66, 0x90, 0xe7, 0xe8, 0x07, 0xb8, 0x60, 0x48, 0xe6, 0x1e, 0x53,
    0xf3, 0x92, 0xa4, 0x72, 0x8c, 0x08, 0x15, 0x6e, 0x86, 0x00, 0x84, 0xfa,
    0xf4, 0x7f, 0x8a, 0x42, 0x19, 0xf6, 0xdb, 0xcd, 0x14, 0x8d, 0x50, 0x12,
    0xba, 0x3c, 0x06, 0x4e, 0xec, 0xb3, 0x35, 0x11, 0xa1, 0x88, 0x8e, 0x2b,
    0x94, 0x99, 0xb7, 0x71, 0x74, 0xd3, 0xe4, 0xbf, 0x3a, 0xde, 0x96, 0x0e,
    0xbc, 0x0a, 0xed, 0x77, 0xfc, 0x37, 0x6b, 0x03, 0x79, 0x89, 0x62, 0xc6,
    0xd7, 0xc0, 0xd2, 0x7c, 0x6a, 0x8b, 0x22, 0xa3, 0x5b, 0x05, 0x5d, 0x02,
    0x75, 0xd5, 0x61, 0xe3, 0x18, 0x8f, 0x55, 0x51, 0xad, 0x1f, 0x0b, 0x5e,
    0x85, 0xe5, 0xc2, 0x57, 0x63, 0xca, 0x3d, 0x6c, 0xb4, 0xc5, 0xcc, 0x70,
    0xb2, 0x91, 0x59, 0x0d, 0x47, 0x20, 0xc8, 0x4f, 0x58, 0xe0, 0x01, 0xe2,
    0x16, 0x38, 0xc4, 0x6f, 0x3b, 0x0f, 0x65, 0x46, 0xbe, 0x7e, 0x2d, 0x7b,
    0x82, 0xf9, 0x40, 0xb5, 0x1d, 0x73, 0xf8, 0xeb, 0x26, 0xc7, 0x87, 0x97,
    0x25, 0x54, 0xb1, 0x28, 0xaa, 0x98, 0x9d, 0xa5, 0x64, 0x6d, 0x7a, 0xd4,
    0x10, 0x81, 0x44, 0xef, 0x49, 0xd6, 0xae, 0x2e, 0xdd, 0x76, 0x5c, 0x2f,
    0xa7, 0x1c, 0xc9, 0x09, 0x69, 0x9a, 0x83, 0xcf, 0x29, 0x39, 0xb9, 0xe9,
    0x4c, 0xff, 0x43, 0xab,
];

/// DESX-CBC cipher context.
pub struct DesxCbc {
    direction: Direction,
    subkeys: Subkeys,
    chain: [u32; 2],
    original_iv: [u32; 2],
    input_whitener: [u32; 2],
    output_whitener: [u32; 2],
}

impl DesxCbc {
    /// Build a context from a 16-byte key and an 8-byte IV.
    ///
    /// The first key half feeds the DES key schedule, the second is the input
    /// whitener. The output whitener digests all 16 key bytes through an
    /// 8-byte shift register mixed with the fixed substitution table.
    pub fn new(key: &CipherKey, iv: &[u8; BLOCK_LEN], direction: Direction) -> Self {
        let key = key.as_bytes();

        let mut register = [0u8; BLOCK_LEN];
        for &key_byte in key.iter() {
            let index = register[0] ^ register[1];
            register.rotate_left(1);
            register[BLOCK_LEN - 1] = WHITENER_SBOX[index as usize] ^ key_byte;
        }

        let base_key: [u8; BLOCK_LEN] = key[..BLOCK_LEN].try_into().expect("key split");
        let iv_words = des::pack_block(iv);

        DesxCbc {
            direction,
            subkeys: Subkeys::schedule(&base_key, direction),
            chain: iv_words,
            original_iv: iv_words,
            input_whitener: des::pack_block(&key[BLOCK_LEN..]),
            output_whitener: des::pack_block(&register),
        }
    }

    /// Process `input` into `output` in consecutive 8-byte blocks, advancing
    /// the chaining value per block.
    ///
    /// Fails with [`CanisterError::InvalidLength`] before touching `output`
    /// if either buffer is not a whole number of blocks or the lengths differ.
    pub fn update(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), CanisterError> {
        if input.len() % BLOCK_LEN != 0 {
            return Err(CanisterError::InvalidLength(input.len()));
        }
        if output.len() != input.len() {
            return Err(CanisterError::InvalidLength(output.len()));
        }

        for (block_in, block_out) in input
            .chunks_exact(BLOCK_LEN)
            .zip(output.chunks_exact_mut(BLOCK_LEN))
        {
            let received = des::pack_block(block_in);
            let mut work;
            match self.direction {
                Direction::Encrypt => {
                    work = [
                        received[0] ^ self.chain[0] ^ self.input_whitener[0],
                        received[1] ^ self.chain[1] ^ self.input_whitener[1],
                    ];
                    des::transform(&mut work, &self.subkeys);
                    work[0] ^= self.output_whitener[0];
                    work[1] ^= self.output_whitener[1];
                    self.chain = work;
                }
                Direction::Decrypt => {
                    work = [
                        received[0] ^ self.output_whitener[0],
                        received[1] ^ self.output_whitener[1],
                    ];
                    des::transform(&mut work, &self.subkeys);
                    work[0] ^= self.chain[0] ^ self.input_whitener[0];
                    work[1] ^= self.chain[1] ^ self.input_whitener[1];
                    // Chain on the received ciphertext, not the plaintext.
                    self.chain = received;
                }
            }
            des::unpack_block(work, block_out);
        }

        Ok(())
    }

    /// Rewind the chaining value to the original IV. Key schedule and
    /// whitening values are untouched.
    pub fn restart(&mut self) {
        self.chain = self.original_iv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
        0x0e, 0x0f,
    ];
    const ZERO_IV: [u8; 8] = [0; 8];

    fn cipher(direction: Direction) -> DesxCbc {
        DesxCbc::new(&CipherKey::from_bytes(KEY), &ZERO_IV, direction)
    }

    #[test]
    fn whitener_derivation_pinned() {
        let ctx = cipher(Direction::Encrypt);
        assert_eq!(ctx.input_whitener, [0x0809_0a0b, 0x0c0d_0e0f]);
        assert_eq!(ctx.output_whitener, [0x5efb_5c21, 0x5aff_882f]);
    }

    #[test]
    fn reference_vector_per_block_restart() {
        // Known-answer vector: each 8-byte block enciphered on a freshly
        // restarted chain, as the record codec drives the cipher.
        let plaintext = b"this is a test..";
        let mut ciphertext = [0u8; 16];
        let mut ctx = cipher(Direction::Encrypt);
        for (block_in, block_out) in plaintext.chunks_exact(8).zip(ciphertext.chunks_exact_mut(8)) {
            ctx.update(block_in, block_out).unwrap();
            ctx.restart();
        }
        assert_eq!(hex::encode(ciphertext), "38db9be09d1b24a07c774926af94e8d5");
    }

    #[test]
    fn chained_blocks_vector() {
        // Same key and input, but chained across the two blocks: the second
        // block picks up the first ciphertext as its chaining value.
        let plaintext = b"this is a test..";
        let mut ciphertext = [0u8; 16];
        cipher(Direction::Encrypt).update(plaintext, &mut ciphertext).unwrap();
        assert_eq!(hex::encode(ciphertext), "38db9be09d1b24a049125df85b27786e");
    }

    #[test]
    fn chained_roundtrip() {
        let plaintext = b"a pair of blocks";
        let mut ciphertext = [0u8; 16];
        cipher(Direction::Encrypt).update(plaintext, &mut ciphertext).unwrap();

        let mut recovered = [0u8; 16];
        cipher(Direction::Decrypt).update(&ciphertext, &mut recovered).unwrap();
        assert_eq!(&recovered, plaintext);
    }

    #[test]
    fn chaining_makes_equal_blocks_differ() {
        let plaintext = [0x42u8; 16];
        let mut ciphertext = [0u8; 16];
        cipher(Direction::Encrypt).update(&plaintext, &mut ciphertext).unwrap();
        assert_ne!(ciphertext[..8], ciphertext[8..]);
    }

    #[test]
    fn ragged_length_is_rejected() {
        let mut ctx = cipher(Direction::Encrypt);
        let mut output = [0u8; 8];
        assert_eq!(
            ctx.update(&[0u8; 7], &mut output[..7]),
            Err(CanisterError::InvalidLength(7))
        );
        assert_eq!(output, [0u8; 8]);
    }

    #[test]
    fn mismatched_buffers_are_rejected() {
        let mut ctx = cipher(Direction::Encrypt);
        let mut output = [0u8; 16];
        assert_eq!(
            ctx.update(&[0u8; 8], &mut output),
            Err(CanisterError::InvalidLength(16))
        );
    }

    #[test]
    fn restart_matches_fresh_context() {
        let block = *b"restartd";

        let mut warmed = cipher(Direction::Encrypt);
        let mut scratch = [0u8; 8];
        warmed.update(b"whatever", &mut scratch).unwrap();
        warmed.restart();
        let mut after_restart = [0u8; 8];
        warmed.update(&block, &mut after_restart).unwrap();

        let mut fresh_out = [0u8; 8];
        cipher(Direction::Encrypt).update(&block, &mut fresh_out).unwrap();

        assert_eq!(after_restart, fresh_out);
    }
}
