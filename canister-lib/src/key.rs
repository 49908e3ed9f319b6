//! Cipher-key derivation from device identity and the record's key fragment.
//!
//! Every byte of the 16-byte cipher key is the bitwise complement of one
//! input byte, picked by a fixed interleaving that the printer firmware uses.
//! The assignments below are load-bearing constants recovered from the
//! hardware; they have no derivable structure and must not be reordered.

use std::fmt;

/// Identity material for one encode/decode operation: the printer serial
/// number and the unique identifier of the canister's EEPROM, 8 bytes each.
///
/// Passed explicitly into every codec call; nothing in the crate holds onto
/// identity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    pub machine_number: [u8; 8],
    pub eeprom_uid: [u8; 8],
}

impl DeviceId {
    pub fn new(machine_number: [u8; 8], eeprom_uid: [u8; 8]) -> Self {
        DeviceId {
            machine_number,
            eeprom_uid,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "machine {} / uid {}",
            hex::encode(self.machine_number),
            hex::encode(self.eeprom_uid)
        )
    }
}

/// A derived 16-byte cipher key: 8 base-key bytes followed by 8 whitening
/// bytes. Lives only for the duration of one codec operation.
#[derive(Clone)]
pub struct CipherKey([u8; 16]);

impl CipherKey {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        CipherKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Derive the cipher key from the machine number, the EEPROM uid and the
/// record's 8-byte key fragment.
pub fn build_key(
    machine_number: &[u8; 8],
    eeprom_uid: &[u8; 8],
    key_fragment: &[u8; 8],
) -> CipherKey {
    CipherKey([
        !key_fragment[0],
        !key_fragment[2],
        !eeprom_uid[5],
        !key_fragment[6],
        !machine_number[0],
        !machine_number[2],
        !eeprom_uid[2],
        !machine_number[6],
        !machine_number[7],
        !eeprom_uid[6],
        !machine_number[3],
        !machine_number[1],
        !key_fragment[7],
        !eeprom_uid[1],
        !key_fragment[3],
        !key_fragment[1],
    ])
}

/// Key-derivation variant for chips without a distinct unique identifier:
/// the uid slots are filled from the key fragment and machine number instead.
pub fn build_key_without_uid(machine_number: &[u8; 8], key_fragment: &[u8; 8]) -> CipherKey {
    CipherKey([
        !key_fragment[0],
        !key_fragment[2],
        !key_fragment[4],
        !key_fragment[6],
        !machine_number[0],
        !machine_number[2],
        !machine_number[4],
        !machine_number[6],
        !machine_number[7],
        !machine_number[5],
        !machine_number[3],
        !machine_number[1],
        !key_fragment[7],
        !key_fragment[5],
        !key_fragment[3],
        !key_fragment[1],
    ])
}
