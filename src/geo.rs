// =============================================================================
// geo.rs — WHERE EXACTLY IS THE POTHOLE
// =============================================================================
//
// Three small tools:
//
// 1. A parser for the `"lat,lon"` strings citizens send us.
// 2. The haversine great-circle distance, in meters.
// 3. Geohash cell keys, used to serialize report creation for reports that
//    could possibly overlap. Two reports closer than a cell edge always land
//    in the same or adjacent cells, so locking a cell plus its eight
//    neighbours guarantees they contend for at least one common key. Near
//    the poles cells get too thin for that to hold, and no cells are handed
//    out at all.
// =============================================================================

use std::fmt;

use crate::error::ValidationError;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Default geohash length for creation locks. A length-4 cell is roughly
/// 39 km x 19.5 km at the equator, comfortably wider than the largest radius.
pub const DEFAULT_CELL_PRECISION: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether the pair is a real place on Earth. The parser does not
    /// check this; the intake validator does.
    pub fn is_on_earth(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    /// Canonical storage form, the same shape the parser accepts.
    pub fn to_location_string(&self) -> String {
        format!("{},{}", self.lat, self.lon)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Parse `"<lat>,<lon>"` with optional whitespace around either part.
///
/// Purely structural: latitude 200 parses fine. Anything that is not
/// exactly two comma-separated finite numbers is `InvalidLocationFormat`.
pub fn parse_location(raw: &str) -> Result<Coordinates, ValidationError> {
    let invalid = || ValidationError::InvalidLocationFormat(raw.to_string());

    let (lat_part, lon_part) = raw.split_once(',').ok_or_else(invalid)?;
    // "1,2,3" splits into "1" and "2,3"; the second half then fails to parse.
    let lat: f64 = lat_part.trim().parse().map_err(|_| invalid())?;
    let lon: f64 = lon_part.trim().parse().map_err(|_| invalid())?;

    if !lat.is_finite() || !lon.is_finite() {
        return Err(invalid());
    }

    Ok(Coordinates { lat, lon })
}

/// Great-circle distance in meters between two points.
///
/// Symmetric, zero for identical points, no side effects.
pub fn haversine_meters(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);

    // Rounding can push h a hair past 1.0 for antipodal points.
    2.0 * EARTH_RADIUS_METERS * h.min(1.0).sqrt().asin()
}

/// Past this latitude a length-4 cell is narrower than the 5 km maximum
/// radius, so two overlapping reports could sit two cells apart.
pub const POLAR_LAT_LIMIT: f64 = 82.0;

/// The geohash of `coords`, plus its eight neighbours, sorted.
///
/// Sorting gives every caller the same acquisition order, which is what
/// keeps the per-cell locks deadlock-free. Returns an empty list whenever
/// the nine cells would not cover every report that could overlap: off the
/// planet, beyond [`POLAR_LAT_LIMIT`], or when any neighbour is missing.
/// Callers then lock the whole district instead.
pub fn cell_neighbourhood(coords: Coordinates, precision: usize) -> Vec<String> {
    if coords.lat.abs() > POLAR_LAT_LIMIT {
        return Vec::new();
    }

    let center = match geohash::encode(
        geohash::Coord {
            x: coords.lon,
            y: coords.lat,
        },
        precision,
    ) {
        Ok(hash) => hash,
        Err(_) => return Vec::new(),
    };
    let Ok(n) = geohash::neighbors(&center) else {
        return Vec::new();
    };

    let mut cells = vec![center, n.n, n.ne, n.e, n.se, n.s, n.sw, n.w, n.nw];
    cells.sort();
    cells.dedup();
    if cells.len() < 9 {
        return Vec::new();
    }
    cells
}
