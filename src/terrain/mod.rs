use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use tracing::debug;

use crate::geo::{self, FEET_PER_METER, Site};
use crate::grid::Grid;

/// Default grid resolution in points per degree (3 arc-second data).
pub const DEFAULT_IPPD: usize = 1200;

/// High-resolution grid (1 arc-second data).
pub const HIGH_IPPD: usize = 3600;

const TILE_EXTENSION: &str = "bsdf";
const FOOTER_LEN: usize = 8;
const FORMAT_VERSION: u16 = 0;

#[derive(Debug, Error)]
pub enum TileError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: unsupported tile format version {version}", path.display())]
    Version { path: PathBuf, version: u16 },
    #[error("{}: {ippd} points per degree is not a supported resolution", path.display())]
    Resolution { path: PathBuf, ippd: u16 },
    #[error("{}: file is {found} bytes, expected {expected}", path.display())]
    Size {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}

/// Integer-degree bounding box of one tile. Longitudes are west-positive,
/// so `min_west` is the tile's *eastern* edge. `min_north` is the southern
/// edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileBounds {
    pub min_north: i32,
    pub max_north: i32,
    pub min_west: i32,
    pub max_west: i32,
}

impl TileBounds {
    /// Tile file stem, `"{minlat}:{maxlat}:{minlon}:{maxlon}"`.
    pub fn file_stem(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.min_north, self.max_north, self.min_west, self.max_west
        )
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_stem(), TILE_EXTENSION)
    }

    /// Affine projection of a geographic point into grid coordinates
    /// against this box's south/west edges. `None` when the point falls
    /// outside the box at the given resolution.
    pub fn cell(&self, lat: f64, lon: f64, ippd: usize) -> Option<(usize, usize)> {
        let ppd = ippd as f64;
        let mpi = (ippd - 1) as isize;

        let x = (ppd * (lat - self.min_north as f64)).round() as isize;
        let y = mpi - (ppd * geo::lon_diff(self.max_west as f64, lon)).round() as isize;

        if x < 0 || x > mpi || y < 0 || y > mpi {
            return None;
        }
        Some((x as usize, y as usize))
    }
}

/// One loaded elevation tile. Heights are 16-bit meters, row-major at
/// `ippd × ippd`. Immutable after load except through [`Tile::add_elevation`],
/// the injection seam used by clutter and user-defined-terrain loaders.
#[derive(Debug)]
pub struct Tile {
    pub bounds: TileBounds,
    pub ippd: usize,
    pub min_el: i16,
    pub max_el: i16,
    heights: RwLock<Grid<i16>>,
}

impl Tile {
    /// A synthetic all-zero tile, used for regions with no backing file
    /// (assumed to be open water).
    pub fn sea_level(bounds: TileBounds, ippd: usize) -> Self {
        Self {
            bounds,
            ippd,
            min_el: 0,
            max_el: 0,
            heights: RwLock::new(Grid::filled(ippd, 0)),
        }
    }

    /// Builds a tile from raw samples, deriving min/max elevation.
    /// Returns `None` if the sample count is not `ippd²`.
    pub fn from_heights(bounds: TileBounds, ippd: usize, samples: Vec<i16>) -> Option<Self> {
        let min_el = samples.iter().copied().min().unwrap_or(0);
        let max_el = samples.iter().copied().max().unwrap_or(0);
        let heights = Grid::from_vec(ippd, samples)?;
        Some(Self {
            bounds,
            ippd,
            min_el,
            max_el,
            heights: RwLock::new(heights),
        })
    }

    fn parse(bounds: TileBounds, path: &Path, bytes: &[u8]) -> Result<Self, TileError> {
        if bytes.len() < FOOTER_LEN {
            return Err(TileError::Size {
                path: path.to_owned(),
                expected: FOOTER_LEN,
                found: bytes.len(),
            });
        }

        let mut footer = &bytes[bytes.len() - FOOTER_LEN..];
        let ippd = footer.read_u16::<LittleEndian>().unwrap();
        let min_el = footer.read_i16::<LittleEndian>().unwrap();
        let max_el = footer.read_i16::<LittleEndian>().unwrap();
        let version = footer.read_u16::<LittleEndian>().unwrap();

        if version != FORMAT_VERSION {
            return Err(TileError::Version {
                path: path.to_owned(),
                version,
            });
        }
        if ippd as usize != DEFAULT_IPPD && ippd as usize != HIGH_IPPD {
            return Err(TileError::Resolution {
                path: path.to_owned(),
                ippd,
            });
        }

        let count = (ippd as usize) * (ippd as usize);
        let expected = count * 2 + FOOTER_LEN;
        if bytes.len() != expected {
            return Err(TileError::Size {
                path: path.to_owned(),
                expected,
                found: bytes.len(),
            });
        }

        let mut samples = vec![0i16; count];
        (&bytes[..count * 2])
            .read_i16_into::<LittleEndian>(&mut samples)
            .expect("length checked above");

        Ok(Self {
            bounds,
            ippd: ippd as usize,
            min_el,
            max_el,
            heights: RwLock::new(Grid::from_vec(ippd as usize, samples).unwrap()),
        })
    }

    /// Serializes this tile in the on-disk layout: `ippd²` little-endian
    /// i16 samples followed by the u16 ippd / i16 min / i16 max / u16
    /// version trailer.
    pub fn write_bsdf<W: Write>(&self, mut w: W) -> io::Result<()> {
        let heights = self.heights.read().unwrap();
        for &sample in heights.as_slice() {
            w.write_i16::<LittleEndian>(sample)?;
        }
        w.write_u16::<LittleEndian>(self.ippd as u16)?;
        w.write_i16::<LittleEndian>(self.min_el)?;
        w.write_i16::<LittleEndian>(self.max_el)?;
        w.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        Ok(())
    }

    pub fn cell(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        self.bounds.cell(lat, lon, self.ippd)
    }

    /// Height sample in meters at grid coordinates.
    pub fn sample(&self, x: usize, y: usize) -> Option<i16> {
        self.heights.read().unwrap().get(x, y)
    }

    /// Height sample in meters at a geographic point, if it falls inside
    /// this tile.
    pub fn sample_at(&self, lat: f64, lon: f64) -> Option<i16> {
        let (x, y) = self.cell(lat, lon)?;
        self.sample(x, y)
    }

    /// Copies out the full sample array (for renderers and tests).
    pub fn samples(&self) -> Vec<i16> {
        self.heights.read().unwrap().as_slice().to_vec()
    }

    /// Adds `height_m` to the cell containing the point, or to a square
    /// blot of half-width `size` cells when `size > 1`. Returns false if
    /// the point is outside this tile.
    fn add_elevation(&self, lat: f64, lon: f64, height_m: f64, size: i32) -> bool {
        let Some((cx, cy)) = self.cell(lat, lon) else {
            return false;
        };
        let delta = height_m.round() as i16;
        let mut heights = self.heights.write().unwrap();

        if size <= 1 {
            heights.update(cx, cy, |h| h.saturating_add(delta));
        } else {
            for dx in -size..=size {
                for dy in -size..=size {
                    let x = cx as isize + dx as isize;
                    let y = cy as isize + dy as isize;
                    if x >= 0 && y >= 0 {
                        heights.update(x as usize, y as usize, |h| h.saturating_add(delta));
                    }
                }
            }
        }
        true
    }
}

/// Running bounding box and elevation range of everything a request has
/// loaded; external renderers consume this together with the coverage
/// buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaExtent {
    pub min_north: f64,
    pub max_north: f64,
    pub min_west: f64,
    pub max_west: f64,
    pub min_elevation: i16,
    pub max_elevation: i16,
}

impl Default for AreaExtent {
    fn default() -> Self {
        Self {
            min_north: 90.0,
            max_north: -90.0,
            min_west: 360.0,
            max_west: -1.0,
            min_elevation: i16::MAX,
            max_elevation: i16::MIN,
        }
    }
}

impl AreaExtent {
    /// Folds a tile's box and elevation range into the extent. The
    /// westward comparisons are wrap-aware: boxes straddling the 0°/360°
    /// seam compare through the short way around.
    pub fn absorb(&mut self, tile: &Tile) {
        if tile.min_el < self.min_elevation {
            self.min_elevation = tile.min_el;
        }
        if tile.max_el > self.max_elevation {
            self.max_elevation = tile.max_el;
        }

        let max_north = tile.bounds.max_north as f64;
        let min_north = tile.bounds.min_north as f64;
        let max_west = tile.bounds.max_west as f64;
        let min_west = tile.bounds.min_west as f64;

        if self.max_north == -90.0 || max_north > self.max_north {
            self.max_north = max_north;
        }
        if self.min_north == 90.0 || min_north < self.min_north {
            self.min_north = min_north;
        }

        if self.max_west == -1.0 {
            self.max_west = max_west;
        } else if (max_west - self.max_west).abs() < 180.0 {
            if max_west > self.max_west {
                self.max_west = max_west;
            }
        } else if max_west < self.max_west {
            self.max_west = max_west;
        }

        if self.min_west == 360.0 {
            self.min_west = min_west;
        } else if (min_west - self.min_west).abs() < 180.0 {
            if min_west < self.min_west {
                self.min_west = min_west;
            }
        } else if min_west > self.min_west {
            self.min_west = min_west;
        }
    }
}

/// Process-wide collection of loaded tiles: read-mostly, populated
/// lazily and exactly once per bounding box, never evicted. Construct
/// one per serving process (or request batch) and hand an `Arc` of it
/// to everything that needs elevation data.
#[derive(Debug)]
pub struct TileStore {
    tiles: RwLock<Vec<Arc<Tile>>>,
    tile_dir: Option<PathBuf>,
    resolution: usize,
}

impl TileStore {
    /// A store that searches the working directory and then `tile_dir`
    /// for tile files, synthesizing sea level at [`DEFAULT_IPPD`] when
    /// neither has one.
    pub fn new(tile_dir: Option<PathBuf>) -> Self {
        Self::with_resolution(tile_dir, DEFAULT_IPPD)
    }

    /// As [`TileStore::new`], with an explicit resolution for
    /// synthesized tiles.
    pub fn with_resolution(tile_dir: Option<PathBuf>, resolution: usize) -> Self {
        Self {
            tiles: RwLock::new(Vec::new()),
            tile_dir,
            resolution,
        }
    }

    /// Points per degree used for synthesized tiles and for the sweep
    /// step size.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Returns the tile for the exact bounding box, loading or
    /// synthesizing it on first request. Concurrent callers for the same
    /// box all end up sharing one tile: the insert is double-checked
    /// under the write lock and losers discard their copy.
    pub fn get_or_load(&self, bounds: TileBounds) -> Result<Arc<Tile>, TileError> {
        {
            let tiles = self.tiles.read().unwrap();
            if let Some(tile) = tiles.iter().find(|t| t.bounds == bounds) {
                return Ok(Arc::clone(tile));
            }
        }

        let tile = match self.read_tile_file(bounds)? {
            Some((path, bytes)) => {
                debug!(path = %path.display(), "loading tile");
                Tile::parse(bounds, &path, &bytes)?
            }
            None => {
                debug!(name = %bounds.file_stem(), "no tile file, assuming sea level");
                Tile::sea_level(bounds, self.resolution)
            }
        };

        let mut tiles = self.tiles.write().unwrap();
        if let Some(existing) = tiles.iter().find(|t| t.bounds == bounds) {
            // Another thread loaded the same box while we were parsing.
            return Ok(Arc::clone(existing));
        }
        let tile = Arc::new(tile);
        tiles.push(Arc::clone(&tile));
        Ok(tile)
    }

    /// Tries the working directory, then the configured tile directory.
    /// Absence is not an error; any other I/O failure is.
    fn read_tile_file(&self, bounds: TileBounds) -> Result<Option<(PathBuf, Vec<u8>)>, TileError> {
        let name = bounds.file_name();
        let mut candidates = vec![PathBuf::from(&name)];
        if let Some(dir) = &self.tile_dir {
            candidates.push(dir.join(&name));
        }

        for path in candidates {
            match fs::read(&path) {
                Ok(bytes) => return Ok(Some((path, bytes))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(TileError::Io { path, source }),
            }
        }
        Ok(None)
    }

    /// Preloads every 1°×1° cell covering the scan box. Latitude bands
    /// and longitude columns are inclusive of both edges; longitude
    /// wraps through 0°/360°. A load failure on any cell aborts, since
    /// coverage over missing base terrain is meaningless.
    pub fn load_area(
        &self,
        min_lat: i32,
        max_lat: i32,
        min_lon: i32,
        max_lon: i32,
    ) -> Result<AreaExtent, TileError> {
        let mut extent = AreaExtent::default();
        let width = (max_lon - min_lon).rem_euclid(360);

        for band in min_lat..=max_lat {
            for step in 0..=width {
                let west = (min_lon + step).rem_euclid(360);
                let bounds = TileBounds {
                    min_north: band,
                    max_north: band + 1,
                    min_west: west,
                    max_west: west + 1,
                };
                let tile = self.get_or_load(bounds)?;
                extent.absorb(&tile);
            }
        }
        Ok(extent)
    }

    /// The already-loaded tile containing a point, if any.
    pub fn tile_at(&self, lat: f64, lon: f64) -> Option<Arc<Tile>> {
        let tiles = self.tiles.read().unwrap();
        tiles
            .iter()
            .find(|t| t.cell(lat, lon).is_some())
            .map(Arc::clone)
    }

    /// Ground elevation at a point in feet; 0.0 outside all loaded
    /// tiles.
    pub fn elevation_ft(&self, lat: f64, lon: f64) -> f64 {
        let tiles = self.tiles.read().unwrap();
        for tile in tiles.iter() {
            if let Some(sample) = tile.sample_at(lat, lon) {
                return f64::from(sample) * FEET_PER_METER;
            }
        }
        0.0
    }

    /// Elevation injection for clutter and user-defined terrain: adds
    /// `height_m` meters to the cell containing the point (a square blot
    /// of half-width `size` cells when `size > 1`). Returns false when
    /// the point is outside all loaded tiles.
    pub fn add_elevation(&self, lat: f64, lon: f64, height_m: f64, size: i32) -> bool {
        let tiles = self.tiles.read().unwrap();
        tiles
            .iter()
            .any(|t| t.add_elevation(lat, lon, height_m, size))
    }

    /// Angle of elevation from `source` to `destination` above the local
    /// horizontal, in degrees, using both sites' ground elevations.
    pub fn elevation_angle(&self, source: &Site, destination: &Site) -> f64 {
        let tx = self.elevation_ft(source.lat, source.lon) + source.alt;
        let rx = self.elevation_ft(destination.lat, destination.lon) + destination.alt;
        geo::elevation_angle_from(tx, rx, geo::distance(source, destination))
    }

    /// Snapshot of the loaded tiles, for renderers.
    pub fn tiles(&self) -> Vec<Arc<Tile>> {
        self.tiles.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> TileBounds {
        TileBounds {
            min_north: 40,
            max_north: 41,
            min_west: 74,
            max_west: 75,
        }
    }

    #[test]
    fn bsdf_round_trip() {
        let ippd = DEFAULT_IPPD;
        let samples: Vec<i16> = (0..ippd * ippd).map(|i| (i % 997) as i16 - 120).collect();
        let tile = Tile::from_heights(bounds(), ippd, samples.clone()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(bounds().file_name());
        let mut file = fs::File::create(&path).unwrap();
        tile.write_bsdf(&mut file).unwrap();

        let store = TileStore::new(Some(dir.path().to_owned()));
        let loaded = store.get_or_load(bounds()).unwrap();
        assert_eq!(loaded.ippd, ippd);
        assert_eq!(loaded.min_el, tile.min_el);
        assert_eq!(loaded.max_el, tile.max_el);
        assert_eq!(loaded.samples(), samples);
    }

    #[test]
    fn bad_version_is_rejected() {
        let ippd = DEFAULT_IPPD;
        let tile = Tile::sea_level(bounds(), ippd);

        let mut bytes = Vec::new();
        tile.write_bsdf(&mut bytes).unwrap();
        let len = bytes.len();
        bytes[len - 2] = 9; // corrupt the version word

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(bounds().file_name());
        fs::write(&path, &bytes).unwrap();

        let store = TileStore::new(Some(dir.path().to_owned()));
        match store.get_or_load(bounds()) {
            Err(TileError::Version { version, .. }) => assert_eq!(version, 9),
            other => panic!("expected version error, got {other:?}"),
        }
    }

    #[test]
    fn cell_projection_hits_edges() {
        let tile = Tile::sea_level(bounds(), DEFAULT_IPPD);
        // South-west corner: row 0, and column mpi since columns run
        // eastward from max_west.
        assert_eq!(tile.cell(40.0, 75.0), Some((0, 1199)));
        assert_eq!(tile.cell(40.5, 74.5), Some((600, 599)));
        // The northern edge belongs to the neighboring tile.
        assert_eq!(tile.cell(41.0, 74.5), None);
        assert_eq!(tile.cell(41.5, 74.5), None);
    }

    #[test]
    fn add_elevation_blots_a_square() {
        let store = TileStore::with_resolution(None, DEFAULT_IPPD);
        store.get_or_load(bounds()).unwrap();

        assert!(store.add_elevation(40.5, 74.5, 30.0, 2));
        let tile = store.tile_at(40.5, 74.5).unwrap();
        let (cx, cy) = tile.cell(40.5, 74.5).unwrap();
        assert_eq!(tile.sample(cx, cy), Some(30));
        assert_eq!(tile.sample(cx + 2, cy - 2), Some(30));
        assert_eq!(tile.sample(cx + 3, cy), Some(0));

        // Point outside every loaded tile.
        assert!(!store.add_elevation(10.0, 10.0, 30.0, 1));
    }
}
