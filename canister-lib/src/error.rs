use thiserror::Error;

/// The primary error type for the `canister-lib` crate.
///
/// Only checksum failures that make further processing meaningless are errors;
/// the advisory decode-time mismatches are reported as
/// [`IntegrityWarning`](crate::codec::IntegrityWarning) values instead.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CanisterError {
    #[error("buffer length {0} is not a multiple of the cipher block size")]
    InvalidLength(usize),

    #[error("key fragment checksum mismatch: computed {computed:#06x}, stored {stored:#06x}")]
    KeyChecksum { computed: u16, stored: u16 },

    #[error("content checksum mismatch: computed {computed:#06x}, stored {stored:#06x}")]
    ContentChecksum { computed: u16, stored: u16 },

    #[error("material quantity checksum mismatch: computed {computed:#06x}, stored {stored:#06x}")]
    QuantityChecksum { computed: u16, stored: u16 },

    #[error("unknown material name: {0}")]
    UnknownMaterial(String),

    #[error("unknown machine type: {0}")]
    UnknownMachineType(String),

    #[error("record holds an invalid {field}")]
    InvalidDate { field: &'static str },

    #[error("manufacturing lot must be at most 20 ASCII bytes")]
    InvalidLot,
}
