//! Coordinate conversion module
//!
//! Provides conversions between geographic coordinates (latitude/longitude),
//! projected Web Mercator meters and the tile grid the cache is keyed on.

mod types;

pub use types::{
    CoordError, Envelope, GeoBounds, Tile, TileRange, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT,
    MIN_LON, MIN_ZOOM, WORLD_HALF_EXTENT,
};

use std::f64::consts::PI;

/// Earth radius used by the spherical Web Mercator projection, in meters.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Converts geographic coordinates to tile coordinates.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees (-85.05112878 to 85.05112878)
/// * `lon` - Longitude in degrees (-180.0 to 180.0)
/// * `zoom` - Zoom level (0 to 22)
///
/// # Returns
///
/// A `Result` containing the tile or an error if inputs are invalid.
#[inline]
pub fn to_tile_coords(lat: f64, lon: f64, zoom: u8) -> Result<Tile, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let last = (1u32 << zoom) - 1;
    let (fx, fy) = fractional_tile(lat, lon, zoom);

    // lon = 180 and lat = MIN_LAT land exactly on the far edge of the grid
    Ok(Tile {
        x: (fx.max(0.0) as u32).min(last),
        y: (fy.max(0.0) as u32).min(last),
        zoom,
    })
}

/// Converts tile coordinates back to geographic coordinates.
///
/// Returns the latitude/longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lon(tile: &Tile) -> (f64, f64) {
    let n = 2.0_f64.powi(tile.zoom as i32);

    let lon = tile.x as f64 / n * 360.0 - 180.0;

    // Inverse Web Mercator
    let y = tile.y as f64 / n;
    let lat_rad = (PI * (1.0 - 2.0 * y)).sinh().atan();
    let lat = lat_rad * 180.0 / PI;

    (lat, lon)
}

/// Projects geographic coordinates to Web Mercator meters.
///
/// Latitudes outside the projection's range are clamped.
#[inline]
pub fn project(lat: f64, lon: f64) -> (f64, f64) {
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Converts Web Mercator meters back to geographic coordinates.
#[inline]
pub fn unproject(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lat, lon)
}

/// Position of a geographic coordinate in tile units at `zoom`.
///
/// The integer part is the tile index; the fraction is the position within it.
#[inline]
pub(crate) fn fractional_tile(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32);
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat * PI / 180.0;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_york_city_at_zoom_16() {
        // New York City: 40.7128°N, 74.0060°W
        let result = to_tile_coords(40.7128, -74.0060, 16);
        assert!(result.is_ok(), "Valid coordinates should not error");

        let tile = result.unwrap();
        assert_eq!(tile.y, 24640);
        assert_eq!(tile.x, 19295);
        assert_eq!(tile.zoom, 16);
    }

    #[test]
    fn test_invalid_latitude() {
        let result = to_tile_coords(90.0, 0.0, 10);
        assert!(matches!(result.unwrap_err(), CoordError::InvalidLatitude(_)));
    }

    #[test]
    fn test_invalid_zoom() {
        let result = to_tile_coords(0.0, 0.0, 23);
        assert!(matches!(result.unwrap_err(), CoordError::InvalidZoom(23)));
    }

    #[test]
    fn test_far_edge_clamped_into_grid() {
        let tile = to_tile_coords(MIN_LAT, 180.0, 3).unwrap();
        assert_eq!(tile.x, 7);
        assert_eq!(tile.y, 7);
    }

    #[test]
    fn test_tile_to_lat_lon_northwest_corner() {
        let tile = Tile::new(19295, 24640, 16);
        let (lat, lon) = tile_to_lat_lon(&tile);

        assert!((lat - 40.713).abs() < 0.01);
        assert!((lon - (-74.007)).abs() < 0.01);
    }

    #[test]
    fn test_project_origin_and_extent() {
        let (x, y) = project(0.0, 0.0);
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);

        let (x, _) = project(0.0, 180.0);
        assert!((x - WORLD_HALF_EXTENT).abs() < 1e-3);

        let (_, y) = project(MAX_LAT, 0.0);
        assert!((y - WORLD_HALF_EXTENT).abs() < 1.0);
    }

    #[test]
    fn test_tile_envelope_matches_projected_corner() {
        let tile = Tile::new(19295, 24640, 16);
        let (lat, lon) = tile_to_lat_lon(&tile);
        let (x, y) = project(lat, lon);
        let env = tile.envelope();
        assert!((env.min_x - x).abs() < 1e-3);
        assert!((env.max_y - y).abs() < 1e-3);
    }

    #[test]
    fn test_projected_point_inside_its_tile() {
        let (lat, lon) = (51.5074, -0.1278);
        let tile = to_tile_coords(lat, lon, 14).unwrap();
        let (x, y) = project(lat, lon);
        assert!(tile.envelope().contains(&Envelope::point(x, y)));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_roundtrip_property(
                lat in -85.05..85.05_f64,
                lon in -180.0..180.0_f64,
                zoom in 0u8..=18
            ) {
                let tile = to_tile_coords(lat, lon, zoom)?;
                let (converted_lat, converted_lon) = tile_to_lat_lon(&tile);

                let tile_size = 360.0 / (2.0_f64.powi(zoom as i32));

                prop_assert!((converted_lat - lat).abs() < tile_size);
                prop_assert!((converted_lon - lon).abs() < tile_size);
            }

            #[test]
            fn test_tile_coords_in_bounds(
                lat in -85.05..85.05_f64,
                lon in -180.0..180.0_f64,
                zoom in 0u8..=18
            ) {
                let tile = to_tile_coords(lat, lon, zoom)?;
                let max_tile = 2u32.pow(zoom as u32);
                prop_assert!(tile.y < max_tile);
                prop_assert!(tile.x < max_tile);
                prop_assert_eq!(tile.zoom, zoom);
            }

            #[test]
            fn test_project_unproject_roundtrip(
                lat in -85.0..85.0_f64,
                lon in -180.0..180.0_f64,
            ) {
                let (x, y) = project(lat, lon);
                let (lat2, lon2) = unproject(x, y);
                prop_assert!((lat - lat2).abs() < 1e-9);
                prop_assert!((lon - lon2).abs() < 1e-9);
            }

            #[test]
            fn test_point_tile_covers_point(
                lat in -85.0..85.0_f64,
                lon in -179.9..179.9_f64,
                zoom in 0u8..=18
            ) {
                let tile = to_tile_coords(lat, lon, zoom)?;
                let (x, y) = project(lat, lon);
                let env = tile.envelope();
                // Rounding at tile edges is bounded well below a meter
                prop_assert!(x >= env.min_x - 1e-3 && x <= env.max_x + 1e-3);
                prop_assert!(y >= env.min_y - 1e-3 && y <= env.max_y + 1e-3);
            }

            #[test]
            fn test_reject_invalid_latitude(
                lat in -90.0..-85.06_f64,
                lon in -180.0..180.0_f64,
                zoom in 0u8..=18
            ) {
                let result = to_tile_coords(lat, lon, zoom);
                prop_assert!(matches!(result.unwrap_err(), CoordError::InvalidLatitude(_)));
            }
        }
    }
}
