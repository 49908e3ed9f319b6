pub mod cartridge;
pub mod codec;
pub mod crc16;
pub mod des;
pub mod desx;
pub mod error;
pub mod key;
pub mod layout;
pub mod machine;
pub mod material;


// Re-export the types a caller needs for one encode/decode pass
pub use cartridge::Cartridge;
pub use codec::{DecodedRecord, IntegrityWarning, decode, encode};
pub use error::CanisterError;
pub use key::DeviceId;
