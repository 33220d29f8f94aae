//! Distance and area conversion between map units and pixel counts.

use crate::types::{SclError, SclResult};
use num_traits::ToPrimitive;

fn check_resolution(resolution_m: f64) -> SclResult<f64> {
    if resolution_m.is_finite() && resolution_m > 0.0 {
        Ok(resolution_m / 1000.0)
    } else {
        Err(SclError::InvalidParameter(format!(
            "resolution must be positive, got {} m",
            resolution_m
        )))
    }
}

fn check_quantity(name: &str, value: f64) -> SclResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SclError::InvalidParameter(format!(
            "{} must be a non-negative number, got {}",
            name, value
        )))
    }
}

/// Number of pixels spanned by `distance_km` at `resolution_m` (rounded)
pub fn distance_to_pixels(distance_km: f64, resolution_m: f64) -> SclResult<u32> {
    let scale_km = check_resolution(resolution_m)?;
    check_quantity("distance", distance_km)?;
    (distance_km / scale_km).round().to_u32().ok_or_else(|| {
        SclError::InvalidParameter(format!(
            "distance {} km is too large for {} m cells",
            distance_km, resolution_m
        ))
    })
}

/// Number of pixels (fractional) covering `area_km2` at `resolution_m`
pub fn area_to_pixels(area_km2: f64, resolution_m: f64) -> SclResult<f64> {
    let scale_km = check_resolution(resolution_m)?;
    check_quantity("area", area_km2)?;
    Ok(area_km2 / (scale_km * scale_km))
}

/// Whole-pixel count for component-size thresholds (truncated toward zero)
pub fn area_to_pixel_count(area_km2: f64, resolution_m: f64) -> SclResult<u64> {
    area_to_pixels(area_km2, resolution_m)?
        .floor()
        .to_u64()
        .ok_or_else(|| SclError::InvalidParameter(format!("area {} km² overflows a pixel count", area_km2)))
}

pub fn pixels_to_distance_km(pixels: u32, resolution_m: f64) -> SclResult<f64> {
    Ok(pixels as f64 * check_resolution(resolution_m)?)
}

pub fn pixels_to_area_km2(pixels: f64, resolution_m: f64) -> SclResult<f64> {
    let scale_km = check_resolution(resolution_m)?;
    check_quantity("pixel count", pixels)?;
    Ok(pixels * scale_km * scale_km)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_known_values() {
        assert_eq!(distance_to_pixels(2.0, 300.0).unwrap(), 7);
        assert_eq!(distance_to_pixels(2.0, 1000.0).unwrap(), 2);
        assert_relative_eq!(area_to_pixels(5.0, 1000.0).unwrap(), 5.0);
        assert_relative_eq!(area_to_pixels(30.0, 300.0).unwrap(), 30.0 / 0.09, epsilon = 1e-9);
        assert_eq!(area_to_pixel_count(625.0, 300.0).unwrap(), 6944);
    }

    #[test]
    fn test_monotonic_in_distance_and_resolution() {
        let mut previous = 0;
        for step in 0..40 {
            let px = distance_to_pixels(step as f64 * 0.25, 250.0).unwrap();
            assert!(px >= previous);
            previous = px;
        }
        let mut previous = f64::INFINITY;
        for res in [30.0, 90.0, 250.0, 300.0, 1000.0, 5000.0] {
            let px = area_to_pixels(10.0, res).unwrap();
            assert!(px < previous);
            previous = px;
        }
        assert!(distance_to_pixels(10.0, 100.0).unwrap() > distance_to_pixels(10.0, 1000.0).unwrap());
    }

    #[test]
    fn test_round_trip_within_rounding() {
        for res in [30.0, 300.0, 1000.0] {
            for d in [0.5, 2.0, 7.3, 25.0] {
                let px = distance_to_pixels(d, res).unwrap();
                let back = pixels_to_distance_km(px, res).unwrap();
                assert!((back - d).abs() <= res / 2000.0 + 1e-12);
            }
            let a = 42.0;
            let back = pixels_to_area_km2(area_to_pixels(a, res).unwrap(), res).unwrap();
            assert_relative_eq!(back, a, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rejects_invalid_inputs() {
        assert!(distance_to_pixels(1.0, 0.0).is_err());
        assert!(distance_to_pixels(-1.0, 300.0).is_err());
        assert!(area_to_pixels(1.0, -30.0).is_err());
        assert!(area_to_pixels(f64::NAN, 30.0).is_err());
    }
}
