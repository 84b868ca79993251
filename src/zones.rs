//! Heart rate zone lookup.
//!
//! Boundaries are the inclusive upper bpm limits of zones `1..n-1`; zone `n`
//! is open ended above the last boundary.
//!
//! A reading exactly on a boundary stays in the lower zone (`zone(120) == 1`
//! with the default model). Lookups that compare with `bpm < boundary` put it
//! one zone higher, so sessions scored elsewhere can differ at the edges.

use crate::error::ZoneModelError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ZoneModel {
    boundaries: Vec<f64>,
}

impl ZoneModel {
    /// Builds a model, rejecting boundaries that are not finite and strictly ascending.
    pub fn new(boundaries: Vec<f64>) -> Result<Self, ZoneModelError> {
        for (index, value) in boundaries.iter().enumerate() {
            if !value.is_finite() {
                return Err(ZoneModelError::NonFinite { index });
            }
            if index > 0 && *value <= boundaries[index - 1] {
                return Err(ZoneModelError::NotAscending { index });
            }
        }
        Ok(Self { boundaries })
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// Number of zones, including the open ended top zone
    pub fn zone_count(&self) -> usize {
        self.boundaries.len() + 1
    }

    /// 1-based zone index for `bpm`. Always at least 1.
    pub fn zone(&self, bpm: f64) -> usize {
        self.boundaries
            .iter()
            .position(|&upper| bpm <= upper)
            .map(|index| index + 1)
            .unwrap_or(self.boundaries.len() + 1)
    }
}

impl Default for ZoneModel {
    fn default() -> Self {
        Self {
            boundaries: vec![120.0, 140.0, 160.0, 180.0],
        }
    }
}

impl TryFrom<Vec<f64>> for ZoneModel {
    type Error = ZoneModelError;

    fn try_from(boundaries: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(boundaries)
    }
}

impl From<ZoneModel> for Vec<f64> {
    fn from(model: ZoneModel) -> Self {
        model.boundaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ZoneModel {
        ZoneModel::new(vec![120.0, 140.0, 160.0, 180.0]).unwrap()
    }

    #[test]
    fn test_zone_lookup() {
        let zones = model();
        assert_eq!(zones.zone(100.0), 1);
        assert_eq!(zones.zone(120.0), 1);
        assert_eq!(zones.zone(121.0), 2);
        assert_eq!(zones.zone(150.0), 3);
        assert_eq!(zones.zone(180.0), 4);
        assert_eq!(zones.zone(200.0), 5);
    }

    #[test]
    fn test_boundary_readings_stay_in_lower_zone() {
        let zones = model();
        for (index, boundary) in zones.boundaries().iter().enumerate() {
            assert_eq!(zones.zone(*boundary), index + 1);
            assert_eq!(zones.zone(boundary + 0.5), index + 2);
        }
    }

    #[test]
    fn test_zone_is_monotonic() {
        let zones = model();
        let mut previous = zones.zone(0.0);
        for bpm in 1..260 {
            let current = zones.zone(bpm as f64);
            assert!(current >= previous, "zone dropped at {} bpm", bpm);
            previous = current;
        }
        assert_eq!(previous, zones.zone_count());
    }

    #[test]
    fn test_empty_model_is_single_zone() {
        let zones = ZoneModel::new(Vec::new()).unwrap();
        assert_eq!(zones.zone(0.0), 1);
        assert_eq!(zones.zone(250.0), 1);
    }

    #[test]
    fn test_rejects_unsorted_boundaries() {
        assert_eq!(
            ZoneModel::new(vec![120.0, 120.0]),
            Err(ZoneModelError::NotAscending { index: 1 })
        );
        assert_eq!(
            ZoneModel::new(vec![f64::NAN]),
            Err(ZoneModelError::NonFinite { index: 0 })
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let parsed: Result<ZoneModel, _> = serde_json::from_str("[140.0, 120.0]");
        assert!(parsed.is_err());
        let parsed: ZoneModel = serde_json::from_str("[100.0, 130.0]").unwrap();
        assert_eq!(parsed.boundaries(), &[100.0, 130.0]);
    }
}
