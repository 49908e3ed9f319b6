//! Typed view of a plaintext canister record.
//!
//! [`Cartridge::pack`] lays the fields out on the 104-byte record and stamps
//! the three plaintext checksums, so a packed record is ready for
//! [`codec::encode`](crate::codec::encode). [`Cartridge::unpack`] is the
//! reverse and validates those checksums: a decoded record that fails them was
//! almost certainly decrypted under the wrong identity, so here the mismatch
//! is fatal rather than advisory.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::crc16;
use crate::error::CanisterError;
use crate::layout::{
    CONTENT_CRC, CONTENT_PROTECTED_LEN, CURRENT_QUANTITY, Field, INITIAL_QUANTITY, KEY_FRAGMENT,
    KEY_FRAGMENT_CRC, MANUFACTURING_DATE, MANUFACTURING_LOT, MATERIAL_TYPE, QUANTITY_CRC,
    RECORD_LEN, SERIAL_NUMBER, USE_DATE, VERSION,
};
use crate::material;

/// One consumable cartridge, as the printer sees it.
///
/// Quantities are in cubic inches. The serial number really is stored as a
/// floating-point value on the chip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cartridge {
    pub serial_number: f64,
    pub material_name: String,
    pub manufacturing_lot: String,
    pub manufacturing_date: NaiveDateTime,
    pub use_date: NaiveDateTime,
    pub initial_material_quantity: f64,
    pub current_material_quantity: f64,
    #[serde(with = "hex_fragment")]
    pub key_fragment: [u8; 8],
    pub version: u16,
}

impl Cartridge {
    /// Lay the cartridge out on a record and stamp the plaintext checksums.
    pub fn pack(&self) -> Result<[u8; RECORD_LEN], CanisterError> {
        let material_id = material::id_from_name(&self.material_name)
            .ok_or_else(|| CanisterError::UnknownMaterial(self.material_name.clone()))?;
        if self.manufacturing_lot.len() > MANUFACTURING_LOT.len || !self.manufacturing_lot.is_ascii()
        {
            return Err(CanisterError::InvalidLot);
        }

        let mut record = [0u8; RECORD_LEN];
        write_f64(&SERIAL_NUMBER, &mut record, self.serial_number);
        write_f64(&MATERIAL_TYPE, &mut record, f64::from(material_id));
        record[MANUFACTURING_LOT.offset..MANUFACTURING_LOT.offset + self.manufacturing_lot.len()]
            .copy_from_slice(self.manufacturing_lot.as_bytes());
        VERSION.write_u16(&mut record, self.version);
        encode_date(
            MANUFACTURING_DATE.of_mut(&mut record),
            &self.manufacturing_date,
            MANUFACTURING_DATE.name,
        )?;
        encode_date(USE_DATE.of_mut(&mut record), &self.use_date, USE_DATE.name)?;
        write_f64(&INITIAL_QUANTITY, &mut record, self.initial_material_quantity);

        let content_crc = crc16::checksum(&record[..CONTENT_PROTECTED_LEN]);
        CONTENT_CRC.write_u16(&mut record, content_crc);

        record[KEY_FRAGMENT.range()].copy_from_slice(&self.key_fragment);
        let key_crc = crc16::checksum(&self.key_fragment);
        KEY_FRAGMENT_CRC.write_u16(&mut record, key_crc);

        write_f64(&CURRENT_QUANTITY, &mut record, self.current_material_quantity);
        let quantity_crc = crc16::checksum(CURRENT_QUANTITY.of(&record));
        QUANTITY_CRC.write_u16(&mut record, quantity_crc);

        Ok(record)
    }

    /// Read a cartridge back out of a plaintext record.
    pub fn unpack(record: &[u8; RECORD_LEN]) -> Result<Cartridge, CanisterError> {
        let computed = crc16::checksum(&record[..CONTENT_PROTECTED_LEN]);
        let stored = CONTENT_CRC.read_u16(record);
        if computed != stored {
            return Err(CanisterError::ContentChecksum { computed, stored });
        }
        let computed = crc16::checksum(CURRENT_QUANTITY.of(record));
        let stored = QUANTITY_CRC.read_u16(record);
        if computed != stored {
            return Err(CanisterError::QuantityChecksum { computed, stored });
        }

        let material_raw = read_f64(&MATERIAL_TYPE, record);
        if material_raw.fract() != 0.0 || !(0.0..=255.0).contains(&material_raw) {
            return Err(CanisterError::UnknownMaterial(material_raw.to_string()));
        }
        let material_name = material::name_from_id(material_raw as u8)
            .unwrap_or("unknown")
            .to_string();

        let lot_bytes = MANUFACTURING_LOT.of(record);
        let lot_end = lot_bytes.iter().position(|&b| b == 0).unwrap_or(lot_bytes.len());
        let manufacturing_lot = String::from_utf8_lossy(&lot_bytes[..lot_end]).into_owned();

        let mut key_fragment = [0u8; 8];
        key_fragment.copy_from_slice(KEY_FRAGMENT.of(record));

        Ok(Cartridge {
            serial_number: read_f64(&SERIAL_NUMBER, record),
            material_name,
            manufacturing_lot,
            manufacturing_date: decode_date(
                MANUFACTURING_DATE.of(record),
                MANUFACTURING_DATE.name,
            )?,
            use_date: decode_date(USE_DATE.of(record), USE_DATE.name)?,
            initial_material_quantity: read_f64(&INITIAL_QUANTITY, record),
            current_material_quantity: read_f64(&CURRENT_QUANTITY, record),
            key_fragment,
            version: VERSION.read_u16(record),
        })
    }
}

fn write_f64(field: &Field, record: &mut [u8; RECORD_LEN], value: f64) {
    record[field.range()].copy_from_slice(&value.to_le_bytes());
}

fn read_f64(field: &Field, record: &[u8; RECORD_LEN]) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(field.of(record));
    f64::from_le_bytes(bytes)
}

// Dates are stored as year-since-1900 (u16), month, day, hour, minute (one
// byte each) and second (u16), all little-endian.
fn encode_date(
    out: &mut [u8],
    when: &NaiveDateTime,
    field: &'static str,
) -> Result<(), CanisterError> {
    let year = when.year() - 1900;
    if !(0..=i32::from(u16::MAX)).contains(&year) {
        return Err(CanisterError::InvalidDate { field });
    }
    out[0..2].copy_from_slice(&(year as u16).to_le_bytes());
    out[2] = when.month() as u8;
    out[3] = when.day() as u8;
    out[4] = when.hour() as u8;
    out[5] = when.minute() as u8;
    out[6..8].copy_from_slice(&(when.second() as u16).to_le_bytes());
    Ok(())
}

fn decode_date(bytes: &[u8], field: &'static str) -> Result<NaiveDateTime, CanisterError> {
    let year = i32::from(u16::from_le_bytes([bytes[0], bytes[1]])) + 1900;
    let second = u16::from_le_bytes([bytes[6], bytes[7]]);
    NaiveDate::from_ymd_opt(year, u32::from(bytes[2]), u32::from(bytes[3]))
        .and_then(|day| {
            day.and_hms_opt(u32::from(bytes[4]), u32::from(bytes[5]), u32::from(second))
        })
        .ok_or(CanisterError::InvalidDate { field })
}

mod hex_fragment {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(fragment: &[u8; 8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(fragment))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 8], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::custom("key fragment must be 16 hex digits"))
    }
}
