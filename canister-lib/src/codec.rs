//! Record codec: selective encryption and integrity checks over the canister
//! record layout.
//!
//! Encoding stamps the three plaintext checksums, encrypts the protected
//! content and the current-quantity field under the record's derived key, and
//! finishes with the two ciphertext checksums. Decoding mirrors this in
//! reverse. The key-fragment checksum gates everything on decode; the firmware
//! treats the remaining three checks as advisory and so does this decoder,
//! reporting them as [`IntegrityWarning`]s alongside the plaintext.

use std::fmt;
use std::ops::Range;

use tracing::{debug, warn};

use crate::crc16;
use crate::des::{BLOCK_LEN, Direction};
use crate::desx::DesxCbc;
use crate::error::CanisterError;
use crate::key::{self, CipherKey, DeviceId};
use crate::layout::{
    CONTENT, CONTENT_CRC, CONTENT_PROTECTED_LEN, CRYPTED_CONTENT_CRC, CRYPTED_QUANTITY_CRC,
    CURRENT_QUANTITY, KEY_FRAGMENT, KEY_FRAGMENT_CRC, QUANTITY_CRC, RECORD_LEN,
};

// The firmware chains every region from an all-zero IV.
const ZERO_IV: [u8; BLOCK_LEN] = [0; BLOCK_LEN];

// The encrypted prefix of the content payload.
const PROTECTED: Range<usize> = CONTENT.offset..CONTENT.offset + CONTENT_PROTECTED_LEN;

/// One advisory checksum mismatch found while decoding.
///
/// Only the key-fragment checksum aborts a decode. The other three mismatches
/// are reported and ignored, matching the printer's own lenient handling of
/// partially-corrupt records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityWarning {
    /// The current-quantity field, in its received encrypted form.
    CryptedQuantity { computed: u16, stored: u16 },
    /// The decrypted content payload.
    Content { computed: u16, stored: u16 },
    /// The decrypted current-quantity field.
    Quantity { computed: u16, stored: u16 },
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (what, computed, stored) = match self {
            IntegrityWarning::CryptedQuantity { computed, stored } => {
                ("crypted quantity", computed, stored)
            }
            IntegrityWarning::Content { computed, stored } => ("content", computed, stored),
            IntegrityWarning::Quantity { computed, stored } => ("quantity", computed, stored),
        };
        write!(
            f,
            "{what} checksum mismatch: computed {computed:#06x}, stored {stored:#06x}"
        )
    }
}

/// A successfully decoded record together with any advisory mismatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub record: [u8; RECORD_LEN],
    pub warnings: Vec<IntegrityWarning>,
}

impl DecodedRecord {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Encrypt one plaintext record for the given device identity.
///
/// The input is never modified; fields outside the checksum and cipher scopes
/// are copied through verbatim.
pub fn encode(
    device: &DeviceId,
    plaintext: &[u8; RECORD_LEN],
) -> Result<[u8; RECORD_LEN], CanisterError> {
    let mut record = *plaintext;

    let key_crc = crc16::checksum(KEY_FRAGMENT.of(plaintext));
    KEY_FRAGMENT_CRC.write_u16(&mut record, key_crc);
    debug!("key fragment checksum {key_crc:#06x}");

    let quantity_crc = crc16::checksum(CURRENT_QUANTITY.of(plaintext));
    QUANTITY_CRC.write_u16(&mut record, quantity_crc);
    debug!("current quantity checksum {quantity_crc:#06x}");

    let content_crc = crc16::checksum(&plaintext[PROTECTED]);
    CONTENT_CRC.write_u16(&mut record, content_crc);
    debug!("content checksum {content_crc:#06x}");

    let mut cipher = DesxCbc::new(&derive_key(device, plaintext), &ZERO_IV, Direction::Encrypt);
    cipher_region(&mut cipher, &plaintext[PROTECTED], &mut record[PROTECTED])?;
    cipher_region(
        &mut cipher,
        CURRENT_QUANTITY.of(plaintext),
        CURRENT_QUANTITY.of_mut(&mut record),
    )?;

    let crypted_content_crc = crc16::checksum(&record[PROTECTED]);
    CRYPTED_CONTENT_CRC.write_u16(&mut record, crypted_content_crc);
    debug!("crypted content checksum {crypted_content_crc:#06x}");

    let crypted_quantity_crc = crc16::checksum(CURRENT_QUANTITY.of(&record));
    CRYPTED_QUANTITY_CRC.write_u16(&mut record, crypted_quantity_crc);
    debug!("crypted quantity checksum {crypted_quantity_crc:#06x}");

    Ok(record)
}

/// Decrypt one record for the given device identity.
///
/// Fails with [`CanisterError::KeyChecksum`] before any decryption if the
/// key-fragment checksum does not hold; every other mismatch is collected
/// into [`DecodedRecord::warnings`].
pub fn decode(
    device: &DeviceId,
    ciphertext: &[u8; RECORD_LEN],
) -> Result<DecodedRecord, CanisterError> {
    let computed = crc16::checksum(KEY_FRAGMENT.of(ciphertext));
    let stored = KEY_FRAGMENT_CRC.read_u16(ciphertext);
    if computed != stored {
        return Err(CanisterError::KeyChecksum { computed, stored });
    }
    debug!("key fragment checksum {computed:#06x} valid");

    let mut record = *ciphertext;
    let mut cipher = DesxCbc::new(&derive_key(device, ciphertext), &ZERO_IV, Direction::Decrypt);
    cipher_region(&mut cipher, &ciphertext[PROTECTED], &mut record[PROTECTED])?;
    cipher_region(
        &mut cipher,
        CURRENT_QUANTITY.of(ciphertext),
        CURRENT_QUANTITY.of_mut(&mut record),
    )?;

    let mut warnings = Vec::new();

    let computed = crc16::checksum(CURRENT_QUANTITY.of(ciphertext));
    let stored = CRYPTED_QUANTITY_CRC.read_u16(ciphertext);
    if computed != stored {
        warnings.push(IntegrityWarning::CryptedQuantity { computed, stored });
    }

    let computed = crc16::checksum(&record[PROTECTED]);
    let stored = CONTENT_CRC.read_u16(ciphertext);
    if computed != stored {
        warnings.push(IntegrityWarning::Content { computed, stored });
    }

    let computed = crc16::checksum(CURRENT_QUANTITY.of(&record));
    let stored = QUANTITY_CRC.read_u16(ciphertext);
    if computed != stored {
        warnings.push(IntegrityWarning::Quantity { computed, stored });
    }

    for warning in &warnings {
        warn!("{warning}");
    }

    // The ciphertext checksums are meaningless in plaintext form.
    CRYPTED_CONTENT_CRC.write_u16(&mut record, 0);
    CRYPTED_QUANTITY_CRC.write_u16(&mut record, 0);

    Ok(DecodedRecord { record, warnings })
}

fn derive_key(device: &DeviceId, record: &[u8; RECORD_LEN]) -> CipherKey {
    let mut fragment = [0u8; 8];
    fragment.copy_from_slice(KEY_FRAGMENT.of(record));
    key::build_key(&device.machine_number, &device.eeprom_uid, &fragment)
}

// Every 8-byte block is chained independently: the firmware rewinds the
// chaining value to the IV between blocks.
fn cipher_region(
    cipher: &mut DesxCbc,
    input: &[u8],
    output: &mut [u8],
) -> Result<(), CanisterError> {
    if input.len() % BLOCK_LEN != 0 {
        return Err(CanisterError::InvalidLength(input.len()));
    }
    for (block_in, block_out) in input
        .chunks_exact(BLOCK_LEN)
        .zip(output.chunks_exact_mut(BLOCK_LEN))
    {
        cipher.update(block_in, block_out)?;
        cipher.restart();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MACHINE: [u8; 8] = [0x2C, 0x30, 0x47, 0x8B, 0xB7, 0xDE, 0x81, 0xE8];
    const UID: [u8; 8] = [0x23, 0xB7, 0xA1, 0x1E, 0x00, 0x00, 0x5F, 0xBC];

    fn device() -> DeviceId {
        DeviceId::new(MACHINE, UID)
    }

    // A record whose three plaintext checksums hold, as a packed cartridge
    // would have them.
    fn consistent_record() -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        for (i, byte) in record[PROTECTED].iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(7);
        }
        record[KEY_FRAGMENT.range()].copy_from_slice(b"fragment");
        record[CURRENT_QUANTITY.range()].copy_from_slice(&42.5f64.to_le_bytes());
        let content_crc = crc16::checksum(&record[PROTECTED]);
        CONTENT_CRC.write_u16(&mut record, content_crc);
        let key_crc = crc16::checksum(KEY_FRAGMENT.of(&record));
        KEY_FRAGMENT_CRC.write_u16(&mut record, key_crc);
        let quantity_crc = crc16::checksum(CURRENT_QUANTITY.of(&record));
        QUANTITY_CRC.write_u16(&mut record, quantity_crc);
        record
    }

    #[test]
    fn roundtrip_restores_plaintext() {
        let plaintext = consistent_record();
        let crypted = encode(&device(), &plaintext).unwrap();
        assert_ne!(crypted, plaintext);

        let decoded = decode(&device(), &crypted).unwrap();
        assert!(decoded.is_clean(), "warnings: {:?}", decoded.warnings);
        assert_eq!(decoded.record, plaintext);
    }

    #[test]
    fn unprotected_content_tail_passes_through() {
        let plaintext = consistent_record();
        let crypted = encode(&device(), &plaintext).unwrap();
        // The last 8 bytes of the content payload stay plaintext.
        assert_eq!(crypted[0x40..0x46], plaintext[0x40..0x46]);
        assert_eq!(crypted[KEY_FRAGMENT.range()], plaintext[KEY_FRAGMENT.range()]);
    }

    #[test]
    fn equal_blocks_encrypt_equal() {
        // The per-block chain rewind makes identical plaintext blocks map to
        // identical ciphertext blocks.
        let mut plaintext = consistent_record();
        let (head, tail) = plaintext.split_at_mut(0x10);
        tail[..8].copy_from_slice(&head[0x08..0x10]);
        let content_crc = crc16::checksum(&plaintext[PROTECTED]);
        CONTENT_CRC.write_u16(&mut plaintext, content_crc);

        let crypted = encode(&device(), &plaintext).unwrap();
        assert_eq!(crypted[0x08..0x10], crypted[0x10..0x18]);
    }

    #[test]
    fn corrupt_key_fragment_is_fatal() {
        let crypted = encode(&device(), &consistent_record()).unwrap();
        let mut bad = crypted;
        bad[KEY_FRAGMENT.offset + 1] ^= 0x01;
        assert!(matches!(
            decode(&device(), &bad),
            Err(CanisterError::KeyChecksum { .. })
        ));
    }

    #[test]
    fn corrupt_content_decodes_with_warning() {
        let plaintext = consistent_record();
        let crypted = encode(&device(), &plaintext).unwrap();
        let mut bad = crypted;
        bad[0x05] ^= 0xFF;

        let decoded = decode(&device(), &bad).unwrap();
        assert!(!decoded.is_clean());
        assert!(decoded
            .warnings
            .iter()
            .any(|w| matches!(w, IntegrityWarning::Content { .. })));
        assert_ne!(decoded.record, plaintext);
    }

    #[test]
    fn corrupt_quantity_flags_both_quantity_checks() {
        let crypted = encode(&device(), &consistent_record()).unwrap();
        let mut bad = crypted;
        bad[CURRENT_QUANTITY.offset] ^= 0x80;

        let decoded = decode(&device(), &bad).unwrap();
        assert!(decoded
            .warnings
            .iter()
            .any(|w| matches!(w, IntegrityWarning::CryptedQuantity { .. })));
        assert!(decoded
            .warnings
            .iter()
            .any(|w| matches!(w, IntegrityWarning::Quantity { .. })));
    }

    #[test]
    fn wrong_identity_still_returns_a_record() {
        let plaintext = consistent_record();
        let crypted = encode(&device(), &plaintext).unwrap();

        let stranger = DeviceId::new([0xAB; 8], UID);
        let decoded = decode(&stranger, &crypted).unwrap();
        // The key fragment is plaintext, so the gate passes; the decrypted
        // payload just fails its advisory checks.
        assert!(!decoded.is_clean());
        assert_ne!(decoded.record, plaintext);
    }

    #[test]
    fn decode_zeroes_ciphertext_checksums() {
        let crypted = encode(&device(), &consistent_record()).unwrap();
        assert_ne!(CRYPTED_CONTENT_CRC.read_u16(&crypted), 0);
        let decoded = decode(&device(), &crypted).unwrap();
        assert_eq!(CRYPTED_CONTENT_CRC.read_u16(&decoded.record), 0);
        assert_eq!(CRYPTED_QUANTITY_CRC.read_u16(&decoded.record), 0);
    }
}
