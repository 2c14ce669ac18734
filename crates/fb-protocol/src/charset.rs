//! Firebird character set registry.
//!
//! The table is fixed at compile time and indexed once on first use; it is
//! never mutated afterwards. Lookups are case-insensitive exact matches.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::ProtocolError;

/// A server character set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Charset {
    name: &'static str,
    id: u8,
    bytes_per_character: u8,
}

impl Charset {
    const fn new(id: u8, name: &'static str, bytes_per_character: u8) -> Self {
        Self {
            name,
            id,
            bytes_per_character,
        }
    }

    /// Canonical (upper-case) charset name, as sent in `isc_dpb_lc_ctype`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Protocol charset id.
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Maximum bytes per character.
    #[must_use]
    pub const fn bytes_per_character(&self) -> u8 {
        self.bytes_per_character
    }

    /// Text encoding used for this charset, if one exists.
    ///
    /// `NONE` and `OCTETS` carry raw bytes and return `None`.
    #[cfg(feature = "encoding")]
    #[must_use]
    pub fn encoding(&self) -> Option<&'static encoding_rs::Encoding> {
        use encoding_rs as enc;

        let encoding = match self.name {
            "ASCII" | "UTF8" | "UNICODE_FSS" => enc::UTF_8,
            "SJIS_0208" | "CP943C" => enc::SHIFT_JIS,
            "EUCJ_0208" => enc::EUC_JP,
            "ISO8859_1" | "WIN1252" => enc::WINDOWS_1252,
            "ISO8859_2" => enc::ISO_8859_2,
            "ISO8859_3" => enc::ISO_8859_3,
            "ISO8859_4" => enc::ISO_8859_4,
            "ISO8859_5" => enc::ISO_8859_5,
            "ISO8859_6" => enc::ISO_8859_6,
            "ISO8859_7" => enc::ISO_8859_7,
            "ISO8859_8" => enc::ISO_8859_8,
            "ISO8859_9" | "WIN1254" => enc::WINDOWS_1254,
            "ISO8859_13" => enc::ISO_8859_13,
            "KSC_5601" => enc::EUC_KR,
            "DOS866" => enc::IBM866,
            "WIN1250" => enc::WINDOWS_1250,
            "WIN1251" => enc::WINDOWS_1251,
            "WIN1253" => enc::WINDOWS_1253,
            "WIN1255" => enc::WINDOWS_1255,
            "WIN1256" => enc::WINDOWS_1256,
            "WIN1257" => enc::WINDOWS_1257,
            "WIN1258" => enc::WINDOWS_1258,
            "BIG_5" => enc::BIG5,
            "GB_2312" | "GBK" => enc::GBK,
            "GB18030" => enc::GB18030,
            "KOI8R" => enc::KOI8_R,
            "KOI8U" => enc::KOI8_U,
            "TIS620" => enc::WINDOWS_874,
            _ => return None,
        };
        Some(encoding)
    }
}

impl std::fmt::Display for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Default connection charset.
pub const NONE: Charset = Charset::new(0, "NONE", 1);

static CHARSETS: [Charset; 52] = [
    NONE,
    Charset::new(1, "OCTETS", 1),
    Charset::new(2, "ASCII", 1),
    Charset::new(3, "UNICODE_FSS", 3),
    Charset::new(4, "UTF8", 4),
    Charset::new(5, "SJIS_0208", 2),
    Charset::new(6, "EUCJ_0208", 2),
    Charset::new(9, "DOS737", 1),
    Charset::new(10, "DOS437", 1),
    Charset::new(11, "DOS850", 1),
    Charset::new(12, "DOS865", 1),
    Charset::new(13, "DOS860", 1),
    Charset::new(14, "DOS863", 1),
    Charset::new(15, "DOS775", 1),
    Charset::new(16, "DOS858", 1),
    Charset::new(17, "DOS862", 1),
    Charset::new(18, "DOS864", 1),
    Charset::new(19, "NEXT", 1),
    Charset::new(21, "ISO8859_1", 1),
    Charset::new(22, "ISO8859_2", 1),
    Charset::new(23, "ISO8859_3", 1),
    Charset::new(34, "ISO8859_4", 1),
    Charset::new(35, "ISO8859_5", 1),
    Charset::new(36, "ISO8859_6", 1),
    Charset::new(37, "ISO8859_7", 1),
    Charset::new(38, "ISO8859_8", 1),
    Charset::new(39, "ISO8859_9", 1),
    Charset::new(40, "ISO8859_13", 1),
    Charset::new(44, "KSC_5601", 2),
    Charset::new(45, "DOS852", 1),
    Charset::new(46, "DOS857", 1),
    Charset::new(47, "DOS861", 1),
    Charset::new(48, "DOS866", 1),
    Charset::new(49, "DOS869", 1),
    Charset::new(50, "CYRL", 1),
    Charset::new(51, "WIN1250", 1),
    Charset::new(52, "WIN1251", 1),
    Charset::new(53, "WIN1252", 1),
    Charset::new(54, "WIN1253", 1),
    Charset::new(55, "WIN1254", 1),
    Charset::new(56, "BIG_5", 2),
    Charset::new(57, "GB_2312", 2),
    Charset::new(58, "WIN1255", 1),
    Charset::new(59, "WIN1256", 1),
    Charset::new(60, "WIN1257", 1),
    Charset::new(63, "KOI8R", 1),
    Charset::new(64, "KOI8U", 1),
    Charset::new(65, "WIN1258", 1),
    Charset::new(66, "TIS620", 1),
    Charset::new(67, "GBK", 2),
    Charset::new(68, "CP943C", 2),
    Charset::new(69, "GB18030", 4),
];

static BY_NAME: Lazy<HashMap<&'static str, &'static Charset>> =
    Lazy::new(|| CHARSETS.iter().map(|c| (c.name, c)).collect());

/// Resolve a charset by name, ignoring ASCII case.
pub fn resolve(name: &str) -> Result<&'static Charset, ProtocolError> {
    BY_NAME
        .get(name.trim().to_ascii_uppercase().as_str())
        .copied()
        .ok_or_else(|| ProtocolError::UnknownCharset(name.to_string()))
}

/// Look up a charset by protocol id.
#[must_use]
pub fn by_id(id: u8) -> Option<&'static Charset> {
    CHARSETS.iter().find(|c| c.id == id)
}

/// Every registered charset.
#[must_use]
pub fn all() -> &'static [Charset] {
    &CHARSETS
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_case_insensitive() {
        let upper = resolve("UTF8").unwrap();
        let lower = resolve("utf8").unwrap();
        let mixed = resolve("Utf8").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper, mixed);
        assert_eq!(upper.id(), 4);
        assert_eq!(upper.bytes_per_character(), 4);
    }

    #[test]
    fn test_resolve_unknown() {
        assert!(matches!(
            resolve("klingon"),
            Err(ProtocolError::UnknownCharset(name)) if name == "klingon"
        ));
    }

    #[test]
    fn test_no_fuzzy_matching() {
        assert!(resolve("UTF-8").is_err());
        assert!(resolve("UTF").is_err());
    }

    #[test]
    fn test_by_id() {
        assert_eq!(by_id(52).map(Charset::name), Some("WIN1251"));
        assert!(by_id(200).is_none());
    }

    #[test]
    fn test_names_and_ids_are_unique() {
        let mut names: Vec<_> = all().iter().map(Charset::name).collect();
        let mut ids: Vec<_> = all().iter().map(Charset::id).collect();
        names.sort_unstable();
        names.dedup();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(names.len(), all().len());
        assert_eq!(ids.len(), all().len());
    }

    #[cfg(feature = "encoding")]
    #[test]
    fn test_encoding_lookup() {
        assert_eq!(resolve("win1251").unwrap().encoding(), Some(encoding_rs::WINDOWS_1251));
        assert!(NONE.encoding().is_none());
    }
}
