//! Performance band classification.

use crate::domain::{PerformanceBand, PerformanceLevel};

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("no performance band matches score {0}")]
    NoMatchingBand(f64),
}

/// Maps a final score onto the tenant's band table.
///
/// Bands are `[min, max)` ranges; the band closing at 100 also takes scores
/// of exactly 100 and anything above it.
pub fn classify(score: f64, bands: &[PerformanceBand]) -> Result<PerformanceLevel, ClassifyError> {
    let band = if score > 100.0 {
        bands.iter().find(|band| band.max == 100.0)
    } else if score == 100.0 {
        bands
            .iter()
            .find(|band| band.min <= score && band.max == 100.0)
    } else {
        bands
            .iter()
            .find(|band| band.min <= score && score < band.max)
    };

    band.map(|band| PerformanceLevel {
        label: band.label.clone(),
        color: band.color.clone(),
    })
    .ok_or(ClassifyError::NoMatchingBand(score))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands() -> Vec<PerformanceBand> {
        vec![
            PerformanceBand {
                label: "Bajo".into(),
                color: "#D9534F".into(),
                min: 0.0,
                max: 40.0,
            },
            PerformanceBand {
                label: "Regular".into(),
                color: "#F0AD4E".into(),
                min: 40.0,
                max: 70.0,
            },
            PerformanceBand {
                label: "Bueno".into(),
                color: "#5BC0DE".into(),
                min: 70.0,
                max: 90.0,
            },
            PerformanceBand {
                label: "Excelente".into(),
                color: "#5CB85C".into(),
                min: 90.0,
                max: 100.0,
            },
        ]
    }

    #[test]
    fn scores_fall_in_half_open_ranges() {
        assert_eq!(classify(0.0, &bands()).expect("matches").label, "Bajo");
        assert_eq!(classify(39.99, &bands()).expect("matches").label, "Bajo");
        assert_eq!(classify(40.0, &bands()).expect("matches").label, "Regular");
        assert_eq!(classify(69.99, &bands()).expect("matches").label, "Regular");
        assert_eq!(classify(89.5, &bands()).expect("matches").label, "Bueno");
    }

    #[test]
    fn exact_hundred_takes_the_closing_band() {
        assert_eq!(classify(100.0, &bands()).expect("matches").label, "Excelente");
    }

    #[test]
    fn overflow_scores_take_the_closing_band() {
        assert_eq!(classify(128.4, &bands()).expect("matches").label, "Excelente");
    }

    #[test]
    fn no_band_is_an_error() {
        let err = classify(-3.0, &bands()).expect_err("nothing below zero");
        assert!(matches!(err, ClassifyError::NoMatchingBand(_)));
        let err = classify(50.0, &[]).expect_err("empty table");
        assert!(matches!(err, ClassifyError::NoMatchingBand(_)));
    }
}
