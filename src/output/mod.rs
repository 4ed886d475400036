//! Per-tile coverage accumulation buffers.
//!
//! Every tile touched by a sweep gets a pair of byte grids: a `mask`
//! recording visibility, overlay and evaluation-marker bits, and a
//! `signal` holding the encoded loss/strength/power value. Renderers
//! consume these together with the tile extent.
//!
//! Mask layout: bit 0 and bits 3..7 carry per-pass visibility and
//! evaluation markers (the pass marker rotates 1, 8, 16, 32 so up to
//! four transmitters can share one mask); bit 1 (0x02) flags a text
//! overlay and bit 2 (0x04) a boundary overlay.

use crate::grid::Grid;
use crate::io::SignalMode;
use crate::terrain::{TileBounds, TileStore};

/// Text-overlay bit (site labels burned into the mask).
pub const TEXT_OVERLAY: u8 = 0x02;
/// Boundary-overlay bit (cartographic outlines).
pub const BOUNDARY_OVERLAY: u8 = 0x04;

const OVERLAY_BITS: u8 = 0x07;
const MARKER_BITS: u8 = 0xF8;

/// How a shard's mask bytes fold into the destination during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskMerge {
    /// OR every bit. Visibility passes accumulate their markers, so a
    /// cell seen from two transmitters keeps both bits.
    Union,
    /// OR the overlay bits, replace the evaluation-marker bits wherever
    /// the shard stamped any. Model passes overwrite the previous
    /// pass's marker rather than accumulating, so a stored byte always
    /// reads as exactly one pass.
    ReplaceMarkers,
}

#[derive(Debug, Clone)]
struct CellBuffers {
    mask: Grid<u8>,
    signal: Grid<u8>,
}

#[derive(Debug, Clone)]
struct TileSlot {
    bounds: TileBounds,
    ippd: usize,
    cells: Option<CellBuffers>,
}

impl TileSlot {
    fn buffers(&mut self) -> &mut CellBuffers {
        self.cells.get_or_insert_with(|| CellBuffers {
            mask: Grid::filled(self.ippd, 0),
            signal: Grid::filled(self.ippd, 0),
        })
    }
}

/// A touched tile's buffers, exposed read-only for renderers.
#[derive(Debug, Clone, Copy)]
pub struct TileBuffers<'a> {
    pub bounds: TileBounds,
    pub ippd: usize,
    pub mask: &'a Grid<u8>,
    pub signal: &'a Grid<u8>,
}

/// Mask and signal accumulation over the tiles a store has loaded.
///
/// Buffers are allocated lazily per tile on first write, so a sweep
/// that never reaches a tile costs nothing there. One map per sector
/// worker, merged after the pass; the hold rules make the merge
/// order-independent per cell.
#[derive(Debug, Clone)]
pub struct CoverageMap {
    slots: Vec<TileSlot>,
}

impl CoverageMap {
    /// Snapshots the store's loaded tiles as empty slots.
    pub fn new(store: &TileStore) -> Self {
        let slots = store
            .tiles()
            .iter()
            .map(|t| TileSlot {
                bounds: t.bounds,
                ippd: t.ippd,
                cells: None,
            })
            .collect();
        Self { slots }
    }

    fn locate(&self, lat: f64, lon: f64) -> Option<(usize, (usize, usize))> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, s)| s.bounds.cell(lat, lon, s.ippd).map(|xy| (i, xy)))
    }

    pub fn mask_at(&self, lat: f64, lon: f64) -> u8 {
        let Some((i, (x, y))) = self.locate(lat, lon) else {
            return 0;
        };
        self.slots[i]
            .cells
            .as_ref()
            .and_then(|c| c.mask.get(x, y))
            .unwrap_or(0)
    }

    pub fn signal_at(&self, lat: f64, lon: f64) -> u8 {
        let Some((i, (x, y))) = self.locate(lat, lon) else {
            return 0;
        };
        self.slots[i]
            .cells
            .as_ref()
            .and_then(|c| c.signal.get(x, y))
            .unwrap_or(0)
    }

    /// ORs bits into the mask at a point. No-op outside every slot.
    pub fn or_mask(&mut self, lat: f64, lon: f64, bits: u8) {
        if let Some((i, (x, y))) = self.locate(lat, lon) {
            self.slots[i].buffers().mask.update(x, y, |m| m | bits);
        }
    }

    /// True when the cell has not yet been evaluated under this pass
    /// marker. The comparison runs in 16-bit: the marker 32 shifts to
    /// 256, which no stored byte matches, so a fourth pass re-evaluates
    /// everywhere rather than skipping.
    pub fn needs_evaluation(&self, lat: f64, lon: f64, marker: u8) -> bool {
        (u16::from(self.mask_at(lat, lon)) & u16::from(MARKER_BITS)) != (u16::from(marker) << 3)
    }

    /// Stamps the pass marker into the cell's upper mask bits, keeping
    /// the visibility/overlay bits. The shift truncates to a byte, so
    /// marker 32 stamps zero (see [`CoverageMap::needs_evaluation`]).
    pub fn mark_evaluated(&mut self, lat: f64, lon: f64, marker: u8) {
        if let Some((i, (x, y))) = self.locate(lat, lon) {
            self.slots[i].buffers().mask.update(x, y, |m| {
                (m & OVERLAY_BITS) | ((u16::from(marker) << 3) as u8)
            });
        }
    }

    /// Accumulates an encoded signal byte under the mode's hold rule:
    /// lower nonzero wins for path loss, higher wins otherwise.
    pub fn hold_signal(&mut self, lat: f64, lon: f64, value: u8, mode: SignalMode) {
        if let Some((i, (x, y))) = self.locate(lat, lon) {
            self.slots[i]
                .buffers()
                .signal
                .update(x, y, |old| hold(old, value, mode));
        }
    }

    /// Folds a sector shard into this map: masks fold under the given
    /// rule, signals follow the mode's hold rule. A zero signal byte in
    /// the shard means the cell was never written and leaves the
    /// destination alone.
    pub fn merge(&mut self, shard: &CoverageMap, mode: SignalMode, masks: MaskMerge) {
        for other in &shard.slots {
            let Some(cells) = &other.cells else { continue };

            let idx = match self.slots.iter().position(|s| s.bounds == other.bounds) {
                Some(idx) => idx,
                None => {
                    self.slots.push(TileSlot {
                        bounds: other.bounds,
                        ippd: other.ippd,
                        cells: None,
                    });
                    self.slots.len() - 1
                }
            };

            let mine = self.slots[idx].buffers();
            let mask = mine.mask.as_mut_slice();
            let signal = mine.signal.as_mut_slice();
            for (m, &o) in mask.iter_mut().zip(cells.mask.as_slice()) {
                *m = match masks {
                    MaskMerge::Union => *m | o,
                    MaskMerge::ReplaceMarkers => {
                        let marker = if o & MARKER_BITS != 0 { o } else { *m } & MARKER_BITS;
                        ((*m | o) & OVERLAY_BITS) | marker
                    }
                };
            }
            for (s, &o) in signal.iter_mut().zip(cells.signal.as_slice()) {
                *s = hold(*s, o, mode);
            }
        }
    }

    /// Read-only iteration over the tiles a sweep actually wrote to.
    pub fn touched(&self) -> impl Iterator<Item = TileBuffers<'_>> {
        self.slots.iter().filter_map(|s| {
            s.cells.as_ref().map(|c| TileBuffers {
                bounds: s.bounds,
                ippd: s.ippd,
                mask: &c.mask,
                signal: &c.signal,
            })
        })
    }
}

fn hold(old: u8, new: u8, mode: SignalMode) -> u8 {
    match mode {
        SignalMode::PathLoss => {
            // Zero is "never measured", not a zero-dB reading.
            if new == 0 {
                old
            } else if old != 0 && old < new {
                old
            } else {
                new
            }
        }
        SignalMode::FieldStrength | SignalMode::ReceivedPower => old.max(new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::TileStore;

    fn map() -> CoverageMap {
        let store = TileStore::with_resolution(None, 60);
        store.load_area(40, 40, 74, 74).unwrap();
        CoverageMap::new(&store)
    }

    #[test]
    fn loss_mode_keeps_the_lower_value() {
        let mut map = map();
        map.hold_signal(40.5, 74.5, 120, SignalMode::PathLoss);
        map.hold_signal(40.5, 74.5, 90, SignalMode::PathLoss);
        assert_eq!(map.signal_at(40.5, 74.5), 90);

        // A later, worse reading does not displace it.
        map.hold_signal(40.5, 74.5, 120, SignalMode::PathLoss);
        assert_eq!(map.signal_at(40.5, 74.5), 90);
    }

    #[test]
    fn power_mode_keeps_the_higher_value() {
        let mut map = map();
        map.hold_signal(40.5, 74.5, 120, SignalMode::ReceivedPower);
        map.hold_signal(40.5, 74.5, 90, SignalMode::ReceivedPower);
        assert_eq!(map.signal_at(40.5, 74.5), 120);
    }

    #[test]
    fn marker_dedup_rotates_and_wraps() {
        let mut map = map();
        assert!(map.needs_evaluation(40.5, 74.5, 1));
        map.mark_evaluated(40.5, 74.5, 1);
        assert!(!map.needs_evaluation(40.5, 74.5, 1));
        // A different pass marker still needs evaluation.
        assert!(map.needs_evaluation(40.5, 74.5, 8));

        // Marker 32 shifts past the byte, so its cells never read as
        // evaluated even after stamping.
        map.mark_evaluated(40.5, 74.5, 32);
        assert!(map.needs_evaluation(40.5, 74.5, 32));
    }

    #[test]
    fn marker_preserves_overlay_bits() {
        let mut map = map();
        map.or_mask(40.5, 74.5, TEXT_OVERLAY | BOUNDARY_OVERLAY);
        map.mark_evaluated(40.5, 74.5, 8);
        let mask = map.mask_at(40.5, 74.5);
        assert_eq!(mask & TEXT_OVERLAY, TEXT_OVERLAY);
        assert_eq!(mask & BOUNDARY_OVERLAY, BOUNDARY_OVERLAY);
        assert_eq!(u16::from(mask) & 0xF8, 8 << 3);
    }

    #[test]
    fn merge_matches_interleaved_writes() {
        let store = TileStore::with_resolution(None, 60);
        store.load_area(40, 40, 74, 74).unwrap();

        let mut combined = CoverageMap::new(&store);
        combined.hold_signal(40.2, 74.2, 120, SignalMode::PathLoss);
        combined.or_mask(40.2, 74.2, 1);
        combined.hold_signal(40.2, 74.2, 90, SignalMode::PathLoss);
        combined.or_mask(40.8, 74.8, 8);

        let mut a = CoverageMap::new(&store);
        a.hold_signal(40.2, 74.2, 120, SignalMode::PathLoss);
        a.or_mask(40.2, 74.2, 1);
        let mut b = CoverageMap::new(&store);
        b.hold_signal(40.2, 74.2, 90, SignalMode::PathLoss);
        b.or_mask(40.8, 74.8, 8);

        let mut merged = CoverageMap::new(&store);
        merged.merge(&a, SignalMode::PathLoss, MaskMerge::Union);
        merged.merge(&b, SignalMode::PathLoss, MaskMerge::Union);

        assert_eq!(merged.signal_at(40.2, 74.2), combined.signal_at(40.2, 74.2));
        assert_eq!(merged.mask_at(40.2, 74.2), combined.mask_at(40.2, 74.2));
        assert_eq!(merged.mask_at(40.8, 74.8), combined.mask_at(40.8, 74.8));
        assert_eq!(merged.touched().count(), 1);
    }

    #[test]
    fn merge_keeps_loss_against_untouched_shards() {
        let store = TileStore::with_resolution(None, 60);
        store.load_area(40, 40, 74, 74).unwrap();

        // Shard a measured one cell; shard b allocated the same tile but
        // only wrote elsewhere. Folding b in must not wipe a's reading.
        let mut a = CoverageMap::new(&store);
        a.hold_signal(40.2, 74.2, 142, SignalMode::PathLoss);
        let mut b = CoverageMap::new(&store);
        b.hold_signal(40.8, 74.8, 130, SignalMode::PathLoss);

        let mut merged = CoverageMap::new(&store);
        merged.merge(&a, SignalMode::PathLoss, MaskMerge::ReplaceMarkers);
        merged.merge(&b, SignalMode::PathLoss, MaskMerge::ReplaceMarkers);

        assert_eq!(merged.signal_at(40.2, 74.2), 142);
        assert_eq!(merged.signal_at(40.8, 74.8), 130);
    }

    #[test]
    fn marker_replacement_keeps_one_pass_per_byte() {
        let store = TileStore::with_resolution(None, 60);
        store.load_area(40, 40, 74, 74).unwrap();

        // First pass stamped the cell and burned in an overlay.
        let mut map = CoverageMap::new(&store);
        map.mark_evaluated(40.5, 74.5, 1);
        map.or_mask(40.5, 74.5, TEXT_OVERLAY);

        // Second pass re-evaluates the same cell under the next marker
        // and leaves a neighboring cell alone.
        let mut shard = CoverageMap::new(&store);
        shard.mark_evaluated(40.5, 74.5, 8);
        map.merge(&shard, SignalMode::PathLoss, MaskMerge::ReplaceMarkers);

        let mask = map.mask_at(40.5, 74.5);
        // The stored marker is the second pass's stamp alone, never an
        // OR of two stamps no single pass would write.
        assert_eq!(mask & MARKER_BITS, 8 << 3);
        assert_eq!(mask & TEXT_OVERLAY, TEXT_OVERLAY);

        // Cells the shard never stamped keep the earlier pass's marker.
        let mut rest = CoverageMap::new(&store);
        rest.mark_evaluated(40.2, 74.2, 1);
        map.merge(&rest, SignalMode::PathLoss, MaskMerge::ReplaceMarkers);
        assert_eq!(map.mask_at(40.5, 74.5) & MARKER_BITS, 8 << 3);
        assert_eq!(map.mask_at(40.2, 74.2) & MARKER_BITS, 1 << 3);
    }
}
