//! The ten canonical sale locations.
//!
//! Worker accounts carry a free-form location label; the order grid stores
//! one column per canonical location. `Location::from_label` is the single
//! normalization point between the two: lowercase, strip non-alphanumerics,
//! match against the canonical keys. Anything that does not match is
//! unmapped (`None`) and callers treat it as a warn-and-skip, never an
//! error.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Prabhadevi1,
    Prabhadevi2,
    Parel,
    SaatRasta,
    SeaFace,
    WorliBdd,
    WorliMix,
    Matunga,
    Mahim,
    KoliWada,
}

impl Location {
    pub const ALL: [Location; 10] = [
        Location::Prabhadevi1,
        Location::Prabhadevi2,
        Location::Parel,
        Location::SaatRasta,
        Location::SeaFace,
        Location::WorliBdd,
        Location::WorliMix,
        Location::Matunga,
        Location::Mahim,
        Location::KoliWada,
    ];

    /// Column name in the `location_orders` table.
    pub fn column(self) -> &'static str {
        match self {
            Location::Prabhadevi1 => "prabhadevi_1",
            Location::Prabhadevi2 => "prabhadevi_2",
            Location::Parel => "parel",
            Location::SaatRasta => "saat_rasta",
            Location::SeaFace => "sea_face",
            Location::WorliBdd => "worli_bdd",
            Location::WorliMix => "worli_mix",
            Location::Matunga => "matunga",
            Location::Mahim => "mahim",
            Location::KoliWada => "koli_wada",
        }
    }

    /// Human-facing name as printed on the order sheet.
    pub fn display_name(self) -> &'static str {
        match self {
            Location::Prabhadevi1 => "PRABHADEVI 1",
            Location::Prabhadevi2 => "PRABHADEVI 2",
            Location::Parel => "PAREL",
            Location::SaatRasta => "SAAT RASTA",
            Location::SeaFace => "SEA FACE",
            Location::WorliBdd => "WORLI B.D.D",
            Location::WorliMix => "WORLI MIX",
            Location::Matunga => "MATUNGA",
            Location::Mahim => "MAHIM",
            Location::KoliWada => "KOLI WADA",
        }
    }

    /// Position of this location's column in the fixed grid order.
    pub(crate) fn index(self) -> usize {
        Location::ALL.iter().position(|l| *l == self).unwrap_or(0)
    }

    /// Resolve a free-form worker location label to a canonical location.
    ///
    /// Returns `None` for labels that do not normalize to any of the ten
    /// canonical keys.
    pub fn from_label(label: &str) -> Option<Location> {
        match normalize(label).as_str() {
            "prabhadevi1" => Some(Location::Prabhadevi1),
            "prabhadevi2" => Some(Location::Prabhadevi2),
            "parel" => Some(Location::Parel),
            "saatrasta" => Some(Location::SaatRasta),
            "seaface" => Some(Location::SeaFace),
            "worlibdd" => Some(Location::WorliBdd),
            "worlimix" => Some(Location::WorliMix),
            "matunga" => Some(Location::Matunga),
            "mahim" => Some(Location::Mahim),
            "koliwada" => Some(Location::KoliWada),
            _ => None,
        }
    }
}

/// Lowercase and strip everything that is not a letter or digit.
fn normalize(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label_canonical_forms() {
        assert_eq!(
            Location::from_label("PRABHADEVI 1"),
            Some(Location::Prabhadevi1)
        );
        assert_eq!(
            Location::from_label("prabhadevi_2"),
            Some(Location::Prabhadevi2)
        );
        assert_eq!(Location::from_label("Saat Rasta"), Some(Location::SaatRasta));
        assert_eq!(Location::from_label("saatrasta"), Some(Location::SaatRasta));
        assert_eq!(Location::from_label("WORLI B.D.D"), Some(Location::WorliBdd));
        assert_eq!(Location::from_label("koli wada"), Some(Location::KoliWada));
        assert_eq!(Location::from_label("koliwada"), Some(Location::KoliWada));
    }

    #[test]
    fn test_from_label_unmapped() {
        assert_eq!(Location::from_label(""), None);
        assert_eq!(Location::from_label("Mix"), None);
        assert_eq!(Location::from_label("dadar"), None);
    }

    #[test]
    fn test_display_name_round_trips_through_normalization() {
        for loc in Location::ALL {
            assert_eq!(Location::from_label(loc.display_name()), Some(loc));
        }
    }

    #[test]
    fn test_columns_are_distinct() {
        let mut cols: Vec<&str> = Location::ALL.iter().map(|l| l.column()).collect();
        cols.sort_unstable();
        cols.dedup();
        assert_eq!(cols.len(), 10);
    }
}
