//! Geohash cell cover for radius queries and region locks.

use urbanwatch_core::geo::{GeoPoint, EARTH_RADIUS_METERS};

/// Cell precision used for index buckets and region locks. A precision-6
/// cell is roughly 1.2 km by 0.6 km at the equator.
pub const CELL_PRECISION: usize = 6;

fn meters_per_degree() -> f64 {
    EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0
}

/// Cell dimensions in degrees `(width, height)` for a geohash precision.
fn cell_degrees(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as i32;
    let lon_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;
    (360.0 / 2f64.powi(lon_bits), 180.0 / 2f64.powi(lat_bits))
}

/// Geohash of `point` at [`CELL_PRECISION`], if the point is encodable.
pub fn cell_of(point: GeoPoint) -> Option<String> {
    geohash::encode(
        geohash::Coord {
            x: point.lon,
            y: point.lat,
        },
        CELL_PRECISION,
    )
    .ok()
}

/// Whether every point within `radius_meters` of `point` lies in the
/// point's cell or one of its eight neighbours.
fn neighbourhood_covers(point: GeoPoint, radius_meters: f64) -> bool {
    let (width_deg, height_deg) = cell_degrees(CELL_PRECISION);
    // Narrowest parallel the 3x3 block can touch.
    let worst_lat = (point.lat.abs() + 2.0 * height_deg).min(90.0);
    let width_m = width_deg * meters_per_degree() * worst_lat.to_radians().cos();
    let height_m = height_deg * meters_per_degree();
    radius_meters <= width_m.min(height_m)
}

/// Sorted cell keys covering the disc of `radius_meters` around `point`.
///
/// Returns `None` when the neighbourhood is too small for the radius, the
/// point cannot be encoded, or the block would wrap the antimeridian.
/// Callers then fall back to a full scan (index) or a global key (locks).
pub fn covering_cells(point: GeoPoint, radius_meters: f64) -> Option<Vec<String>> {
    if !neighbourhood_covers(point, radius_meters) {
        return None;
    }
    let center = cell_of(point)?;
    let n = geohash::neighbors(&center).ok()?;
    let mut cells = vec![center, n.n, n.ne, n.e, n.se, n.s, n.sw, n.w, n.nw];
    cells.sort();
    cells.dedup();
    Some(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_six_dimensions() {
        let (w, h) = cell_degrees(6);
        assert!((w - 0.010986328125).abs() < 1e-12);
        assert!((h - 0.0054931640625).abs() < 1e-12);
    }

    #[test]
    fn merge_radius_is_covered_at_mid_latitudes() {
        let cells = covering_cells(GeoPoint::new(22.3149, 87.3105), 50.0).unwrap();
        assert_eq!(cells.len(), 9);
        assert!(cells.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn nearby_points_share_a_cell() {
        let a = GeoPoint::new(22.3149, 87.3105);
        for (dn, de) in [(49.0, 0.0), (0.0, 49.0), (-35.0, 35.0), (30.0, -30.0)] {
            let b = a.offset_north(dn).offset_east(de);
            let ca = covering_cells(a, 50.0).unwrap();
            let cell_b = cell_of(b).unwrap();
            assert!(ca.contains(&cell_b), "{cell_b} not in cover of a");
        }
    }

    #[test]
    fn large_radius_is_not_covered() {
        assert!(covering_cells(GeoPoint::new(22.3, 87.3), 5_000.0).is_none());
    }

    #[test]
    fn polar_points_are_not_covered() {
        assert!(covering_cells(GeoPoint::new(89.99, 0.0), 50.0).is_none());
    }
}
