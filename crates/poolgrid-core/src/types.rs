//! Shared identifiers and the coordinate → cell mapping.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque user identifier supplied by the host runtime.
pub type UserId = String;

/// Identifier of one live session of a user.
pub type SessionId = String;

/// A reported position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn cell(&self) -> CellId {
        CellId::from_coords(self.lat, self.lon)
    }
}

/// Channel name of a proximity cell.
///
/// Both coordinates are rendered with six fixed decimals, so the same pair
/// always maps to the same channel and any difference visible at that
/// precision maps to a different one. Nearby cells are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(String);

impl CellId {
    pub fn from_coords(lat: f64, lon: f64) -> Self {
        Self(format!("cell_{lat:.6}_{lon:.6}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CellId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_uses_six_decimals() {
        assert_eq!(CellId::from_coords(1.0, 2.0).as_str(), "cell_1.000000_2.000000");
        assert_eq!(
            CellId::from_coords(-33.8688, 151.2093).as_str(),
            "cell_-33.868800_151.209300"
        );
    }

    #[test]
    fn same_pair_same_cell() {
        let a = Coordinates::new(48.137154, 11.576124).cell();
        let b = Coordinates::new(48.137154, 11.576124).cell();
        assert_eq!(a, b);
    }

    #[test]
    fn tiny_difference_is_a_different_cell() {
        let a = CellId::from_coords(48.137154, 11.576124);
        let b = CellId::from_coords(48.137155, 11.576124);
        assert_ne!(a, b);
    }

    #[test]
    fn sub_precision_difference_collapses() {
        // Differences below the sixth decimal are not visible in the name.
        let a = CellId::from_coords(10.0000001, 20.0);
        let b = CellId::from_coords(10.0000002, 20.0);
        assert_eq!(a, b);
    }
}
