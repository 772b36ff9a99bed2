//! Spatial key derivation.
//!
//! Maps a geographic coordinate pair onto a 32-bit Hilbert-curve index used as
//! the tree's ordering and search key. Both axes are normalized onto a
//! 2^16 x 2^16 integer grid, then the grid cell is walked down the curve with
//! the standard bit-interleaving-with-rotation algorithm (Kamel & Faloutsos).
//! The mapping is a pure function: keys are persisted, so the same input must
//! produce the same key for the life of a record.

use crate::error::{Result, TreeError};

/// Curve order: bits of precision per axis.
pub const HILBERT_ORDER: u32 = 16;

/// Cells per axis of the normalization grid.
const GRID_SIDE: u32 = 1 << HILBERT_ORDER;

const LAT_MIN: f64 = -90.0;
const LAT_MAX: f64 = 90.0;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;

/// Computes the Hilbert key for a coordinate pair in decimal degrees.
///
/// Latitude must lie in [-90, 90] and longitude in [-180, 180]; anything
/// else, including NaN or infinities, is rejected with
/// [`TreeError::InvalidCoordinate`].
pub fn encode(latitude: f64, longitude: f64) -> Result<u32> {
    if !latitude.is_finite()
        || !longitude.is_finite()
        || !(LAT_MIN..=LAT_MAX).contains(&latitude)
        || !(LON_MIN..=LON_MAX).contains(&longitude)
    {
        return Err(TreeError::InvalidCoordinate {
            latitude,
            longitude,
        });
    }
    let x = to_grid(longitude, LON_MIN, LON_MAX);
    let y = to_grid(latitude, LAT_MIN, LAT_MAX);
    Ok(grid_to_key(x, y))
}

/// Normalizes `value` from `[min, max]` onto `[0, GRID_SIDE - 1]`.
fn to_grid(value: f64, min: f64, max: f64) -> u32 {
    let norm = (value - min) / (max - min);
    (norm * f64::from(GRID_SIDE - 1)) as u32
}

/// Hilbert distance of grid cell `(x, y)`.
///
/// Quadrant walk with rotation; the accumulator is widened to u64 because a
/// single quadrant contribution reaches 3 * 2^30.
fn grid_to_key(mut x: u32, mut y: u32) -> u32 {
    let mut d: u64 = 0;
    let mut s = GRID_SIDE / 2;
    while s > 0 {
        let rx = u32::from((x & s) > 0);
        let ry = u32::from((y & s) > 0);
        d += u64::from(s) * u64::from(s) * u64::from((3 * rx) ^ ry);
        if ry == 0 {
            if rx == 1 {
                x = GRID_SIDE - 1 - x;
                y = GRID_SIDE - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_deterministic() -> Result<()> {
        let first = encode(38.9, -77.03)?;
        let second = encode(38.9, -77.03)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn southwest_corner_maps_to_curve_origin() -> Result<()> {
        assert_eq!(encode(-90.0, -180.0)?, 0);
        Ok(())
    }

    #[test]
    fn distinct_cells_produce_distinct_keys() -> Result<()> {
        // One degree apart is hundreds of grid cells at order 16.
        assert_ne!(encode(10.0, 10.0)?, encode(11.0, 10.0)?);
        assert_ne!(encode(10.0, 10.0)?, encode(10.0, 11.0)?);
        Ok(())
    }

    #[test]
    fn latitude_out_of_range_is_rejected() {
        let err = encode(91.0, 0.0).unwrap_err();
        assert!(matches!(err, TreeError::InvalidCoordinate { .. }));
    }

    #[test]
    fn longitude_out_of_range_is_rejected() {
        assert!(encode(0.0, 180.5).is_err());
        assert!(encode(0.0, -181.0).is_err());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        assert!(encode(f64::NAN, 0.0).is_err());
        assert!(encode(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn bounds_are_inclusive() {
        assert!(encode(90.0, 180.0).is_ok());
        assert!(encode(-90.0, -180.0).is_ok());
    }

    #[test]
    fn unit_cells_follow_reference_order() {
        // The order-1 pattern (0,0) (0,1) (1,1) (1,0) holds for the four
        // cells at the grid origin.
        assert_eq!(grid_to_key(0, 0), 0);
        assert_eq!(grid_to_key(0, 1), 1);
        assert_eq!(grid_to_key(1, 1), 2);
        assert_eq!(grid_to_key(1, 0), 3);
    }

    #[test]
    fn quadrants_partition_the_key_space() {
        let q = GRID_SIDE / 2;
        let cell = u64::from(q) * u64::from(q);
        // Quadrant visit order at the top level: SW, NW, NE, SE.
        assert!(u64::from(grid_to_key(q / 2, q / 2)) < cell);
        assert!((cell..2 * cell).contains(&u64::from(grid_to_key(q / 2, q + q / 2))));
        assert!((2 * cell..3 * cell).contains(&u64::from(grid_to_key(q + q / 2, q + q / 2))));
        assert!(u64::from(grid_to_key(q + q / 2, q / 2)) >= 3 * cell);
    }
}
