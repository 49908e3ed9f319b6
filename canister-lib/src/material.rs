//! Material identifiers stored in the record's material-type field.
//!
//! The id is what the printer actually checks; the names are the canonical
//! spellings used on cartridge labels. Real dumps contain ids outside this
//! table, so lookups return `Option`.

static MATERIALS: &[(u8, &str)] = &[
    (0x00, "ABS"),
    (0x01, "ABS_RED"),
    (0x02, "ABS_GRN"),
    (0x03, "ABS_BLK"),
    (0x04, "ABS_YEL"),
    (0x05, "ABS_BLU"),
    (0x06, "ABS_CST"),
    (0x07, "ABSI"),
    (0x08, "ABSI_RED"),
    (0x09, "ABSI_GRN"),
    (0x0a, "ABSI_BLK"),
    (0x0b, "ABSI_YEL"),
    (0x0c, "ABSI_BLU"),
    (0x0d, "ABSI_AMB"),
    (0x0e, "ABSI_CST"),
    (0x0f, "ABS_S"),
    (0x10, "PC"),
    (0x11, "PC_RED"),
    (0x12, "PC_GRN"),
    (0x13, "PC_BLK"),
    (0x14, "PC_YEL"),
    (0x15, "PC_BLU"),
    (0x16, "PC_CST"),
    (0x17, "PC_S"),
    (0x18, "ULT9085"),
    (0x19, "ULT_RED"),
    (0x1a, "ULT_GRN"),
    (0x1b, "ULT_BLK"),
    (0x1c, "ULT_YEL"),
    (0x1d, "ULT_BLU"),
    (0x1e, "ULT_CST"),
    (0x1f, "ULT_S"),
    (0x20, "PPSF"),
    (0x21, "PPSF_RED"),
    (0x22, "PPSF_GRN"),
    (0x23, "PPSF_BLK"),
    (0x24, "PPSF_YEL"),
    (0x25, "PPSF_BLU"),
    (0x26, "PPSF_CST"),
    (0x27, "PPSF_S"),
    (0x28, "ABS_SS"),
    (0x29, "P401"),
    (0x2a, "P401_RED"),
    (0x2b, "P401_GRN"),
    (0x2c, "P401_BLK"),
    (0x2d, "P401_YEL"),
    (0x2e, "P401_BLU"),
    (0x2f, "P401_CST"),
    (0x30, "ABS_SGRY"),
    (0x31, "ABS_GRY"),
    (0x33, "ABSI_GRY"),
    (0x3c, "P430"),
    (0x3d, "P430_RED"),
    (0x3e, "P430_GRN"),
    (0x3f, "P430_BLK"),
    (0x40, "P430_YEL"),
    (0x41, "P430_BLU"),
    (0x42, "P430_CST"),
    (0x43, "P430_GRY"),
    (0x44, "P430_NYL"),
    (0x45, "P430_ORG"),
    (0x46, "P430_FLS"),
    (0x47, "P430_IVR"),
    (0x50, "ABS_M30I"),
    (0x51, "ABS_ESD7"),
    (0x64, "PCABSWHT"),
    (0x65, "PCABSRED"),
    (0x66, "PCABSGRN"),
    (0x67, "PC_ABS"),
    (0x68, "PCABSYEL"),
    (0x69, "PCABSBLU"),
    (0x6a, "PCABSCST"),
    (0x6b, "PCABSGRY"),
    (0x78, "SR20"),
    (0x82, "PC_SR"),
    (0x8c, "ABS_M30"),
    (0x8d, "M30_RED"),
    (0x8e, "M30_GRN"),
    (0x8f, "M30_BLK"),
    (0x90, "M30_YEL"),
    (0x91, "M30_BLU"),
    (0x92, "M30_CST"),
    (0x93, "M30_GRY"),
    (0x94, "M30_SGRY"),
    (0x95, "M30_WHT"),
    (0x96, "M30_SIL"),
    (0xa0, "ABS_S_2"),
    (0xaa, "ABS_SS_2"),
    (0xab, "SR30"),
    (0xad, "ULT_S2"),
    (0xae, "SR_100"),
    (0xb4, "PC_ISO"),
    (0xbe, "PC_ISO_T"),
    (0xbf, "P1_5M1"),
    (0xc0, "P1_5M2"),
    (0xc1, "P1_5M3"),
    (0xc2, "RD1"),
    (0xc3, "RD2"),
    (0xc4, "RD3"),
    (0xc5, "RD4"),
    (0xc6, "RD5"),
    (0xc7, "RD6"),
    (0xc8, "RD7"),
    (0xc9, "RD8"),
    (0xca, "RD9"),
    (0xcb, "RD10"),
];

/// Canonical name for a material id.
pub fn name_from_id(id: u8) -> Option<&'static str> {
    MATERIALS
        .iter()
        .find(|&&(known, _)| known == id)
        .map(|&(_, name)| name)
}

/// Material id for a name; matching is case-insensitive.
pub fn id_from_name(name: &str) -> Option<u8> {
    MATERIALS
        .iter()
        .find(|&&(_, known)| known.eq_ignore_ascii_case(name))
        .map(|&(id, _)| id)
}

/// Every known material in id order, for listings.
pub fn known() -> impl Iterator<Item = (u8, &'static str)> {
    MATERIALS.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_is_material_zero() {
        assert_eq!(id_from_name("ABS"), Some(0x00));
        assert_eq!(name_from_id(0x00), Some("ABS"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(id_from_name("abs_m30"), Some(0x8c));
        assert_eq!(id_from_name("Sr30"), Some(0xab));
    }

    #[test]
    fn gaps_report_unknown() {
        assert_eq!(name_from_id(0x32), None);
        assert_eq!(name_from_id(0xff), None);
        assert_eq!(id_from_name("VIBRANIUM"), None);
    }

    #[test]
    fn names_map_back_to_their_ids() {
        for (id, name) in known() {
            assert_eq!(id_from_name(name), Some(id), "{name}");
        }
    }
}
