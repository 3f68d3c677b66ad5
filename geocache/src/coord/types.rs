//! Core coordinate types: tiles, projected envelopes and geographic bounds.

use std::fmt;

use thiserror::Error;

/// Minimum latitude supported by Web Mercator.
pub const MIN_LAT: f64 = -85.05112878;
/// Maximum latitude supported by Web Mercator.
pub const MAX_LAT: f64 = 85.05112878;
/// Minimum longitude.
pub const MIN_LON: f64 = -180.0;
/// Maximum longitude.
pub const MAX_LON: f64 = 180.0;
/// Minimum zoom level.
pub const MIN_ZOOM: u8 = 0;
/// Maximum zoom level.
pub const MAX_ZOOM: u8 = 22;

/// Half the width of the projected world in meters (EPSG:3857).
pub const WORLD_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Errors from coordinate conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("invalid latitude {0} (must be within Web Mercator range)")]
    InvalidLatitude(f64),

    #[error("invalid longitude {0} (must be within [-180, 180])")]
    InvalidLongitude(f64),

    #[error("invalid zoom level {0} (max 22)")]
    InvalidZoom(u8),

    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("tile {0} is outside the grid")]
    InvalidTile(Tile),
}

// =============================================================================
// Envelope
// =============================================================================

/// Axis-aligned rectangle in projected (Web Mercator meter) coordinates.
///
/// Edges are closed: two envelopes sharing an edge intersect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Creates an envelope from two opposite corners in any order.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Degenerate envelope covering a single point.
    pub fn point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Envelope covering the whole projected world.
    pub fn world() -> Self {
        Self {
            min_x: -WORLD_HALF_EXTENT,
            min_y: -WORLD_HALF_EXTENT,
            max_x: WORLD_HALF_EXTENT,
            max_y: WORLD_HALF_EXTENT,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// True if the envelope has zero width or height.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// True if `other` lies entirely inside this envelope (boundary included).
    #[inline]
    pub fn contains(&self, other: &Envelope) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// True if the two envelopes share at least one point.
    #[inline]
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Returns the quadrant `index` (0 = NW, 1 = NE, 2 = SW, 3 = SE).
    pub(crate) fn quadrant(&self, index: usize) -> Envelope {
        let (cx, cy) = self.center();
        match index {
            0 => Envelope::new(self.min_x, cy, cx, self.max_y),
            1 => Envelope::new(cx, cy, self.max_x, self.max_y),
            2 => Envelope::new(self.min_x, self.min_y, cx, cy),
            _ => Envelope::new(cx, self.min_y, self.max_x, cy),
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}, {:.2}, {:.2}, {:.2}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

// =============================================================================
// Tile
// =============================================================================

/// A fixed grid cell of the Web Mercator tile pyramid.
///
/// `x` grows eastward from the antimeridian, `y` grows southward from the
/// northern edge of the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl Tile {
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Number of tiles along one axis at this tile's zoom level.
    ///
    /// Computed in `u64` so every `u8` zoom up to 63 is representable;
    /// above that the value saturates.
    #[inline]
    pub fn grid_size(&self) -> u64 {
        1u64.checked_shl(u32::from(self.zoom)).unwrap_or(u64::MAX)
    }

    /// Checks that the zoom is supported and `x`/`y` lie inside its grid.
    pub fn validate(&self) -> Result<(), CoordError> {
        if self.zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(self.zoom));
        }
        let n = self.grid_size();
        if u64::from(self.x) >= n || u64::from(self.y) >= n {
            return Err(CoordError::InvalidTile(*self));
        }
        Ok(())
    }

    /// Projected envelope of this tile.
    ///
    /// Edges are computed from the grid index alone so that shared edges of
    /// neighbours and of parent/child tiles compare exactly equal. Only
    /// meaningful for tiles that pass [`validate`](Self::validate).
    pub fn envelope(&self) -> Envelope {
        let n = self.grid_size() as f64;
        let size = 2.0 * WORLD_HALF_EXTENT / n;
        let edge_x = |i: u64| -WORLD_HALF_EXTENT + i as f64 * size;
        let edge_y = |j: u64| WORLD_HALF_EXTENT - j as f64 * size;
        let (x, y) = (u64::from(self.x), u64::from(self.y));
        Envelope {
            min_x: edge_x(x),
            max_x: edge_x(x + 1),
            max_y: edge_y(y),
            min_y: edge_y(y + 1),
        }
    }

    /// Parent tile one zoom level up, or `None` at zoom 0.
    pub fn parent(&self) -> Option<Tile> {
        if self.zoom == 0 {
            return None;
        }
        Some(Tile::new(self.x / 2, self.y / 2, self.zoom - 1))
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

// =============================================================================
// Tile Range
// =============================================================================

/// Inclusive rectangle of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub zoom: u8,
}

impl TileRange {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Total number of tiles in the range.
    pub fn len(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the tiles in row-major order (north to south, west to east).
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (self.min_y..=self.max_y)
            .flat_map(move |y| (self.min_x..=self.max_x).map(move |x| Tile::new(x, y, self.zoom)))
    }
}

// =============================================================================
// Geographic Bounds
// =============================================================================

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    /// Creates validated bounds.
    ///
    /// Latitudes must lie in the Web Mercator range and `south <= north`,
    /// `west <= east`.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Result<Self, CoordError> {
        for lat in [south, north] {
            if !(MIN_LAT..=MAX_LAT).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        for lon in [west, east] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
        }
        if south > north {
            return Err(CoordError::InvalidBounds(format!(
                "south {} is north of {}",
                south, north
            )));
        }
        if west > east {
            return Err(CoordError::InvalidBounds(format!(
                "west {} is east of {}",
                west, east
            )));
        }
        Ok(Self {
            south,
            west,
            north,
            east,
        })
    }

    /// Bounds covering the inclusive tile rectangle spanned by `a` and `b`.
    ///
    /// Both tiles must share a zoom level.
    pub fn from_tile_range(a: Tile, b: Tile) -> Result<Self, CoordError> {
        if a.zoom != b.zoom {
            return Err(CoordError::InvalidBounds(format!(
                "tiles at different zoom levels ({} and {})",
                a.zoom, b.zoom
            )));
        }
        a.validate()?;
        b.validate()?;
        let nw = Tile::new(a.x.min(b.x), a.y.min(b.y), a.zoom);
        // One past the last tile
        let se = Tile::new(a.x.max(b.x) + 1, a.y.max(b.y) + 1, a.zoom);
        let (north, west) = super::tile_to_lat_lon(&nw);
        let (south, east) = super::tile_to_lat_lon(&se);
        Self::new(
            south.max(MIN_LAT),
            west,
            north.min(MAX_LAT),
            east.min(MAX_LON),
        )
    }

    /// Projected envelope of the bounds.
    pub fn to_envelope(&self) -> Envelope {
        let (x1, y1) = super::project(self.south, self.west);
        let (x2, y2) = super::project(self.north, self.east);
        Envelope::new(x1, y1, x2, y2)
    }

    /// Tiles at `zoom` covering the bounds.
    ///
    /// East and south edges that fall exactly on a tile boundary do not pull in
    /// the neighbouring tile.
    pub fn tile_range(&self, zoom: u8) -> Result<TileRange, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        const EPS: f64 = 1e-6;

        let last = (1u32 << zoom) - 1;
        let clamp = |v: f64| v.max(0.0).min(last as f64) as u32;

        let (west_x, north_y) = super::fractional_tile(self.north, self.west, zoom);
        let (east_x, south_y) = super::fractional_tile(self.south, self.east, zoom);

        let min_x = clamp((west_x + EPS).floor());
        let min_y = clamp((north_y + EPS).floor());
        let max_x = clamp((east_x - EPS).ceil() - 1.0).max(min_x);
        let max_y = clamp((south_y - EPS).ceil() - 1.0).max(min_y);

        Ok(TileRange {
            min_x,
            min_y,
            max_x,
            max_y,
            zoom,
        })
    }
}

impl fmt::Display for GeoBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.6}, {:.6}) - ({:.6}, {:.6})",
            self.south, self.west, self.north, self.east
        )
    }
}
