//! Solid heightfield: per-column lists of solid spans
//!
//! The rasterizer fills it, the span filters clean it up and the compact
//! heightfield is built from what remains. Columns keep their spans sorted
//! bottom-up and never overlapping.

use crate::{dir_offset_x, dir_offset_z, NULL_AREA};
use glam::Vec3;
use recast_common::{Bounds, Error, Result};

/// Largest representable span height in voxels
pub const SPAN_MAX_HEIGHT: u16 = (1 << 13) - 1;

/// Clearance above the topmost span of a column
const OPEN_HEIGHT: i32 = 0xffff;

/// A solid interval of a heightfield column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Span {
    /// Bottom of the span (voxels)
    pub smin: u16,
    /// Top of the span (voxels). This is the walkable surface.
    pub smax: u16,
    pub area: u8,
}

/// A span detached from its heightfield, tagged with its column.
///
/// Used to replay previously rasterized geometry into a tile without touching
/// the triangles again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanCache {
    pub x: u16,
    pub z: u16,
    pub smin: u16,
    pub smax: u16,
    pub area: u8,
}

/// Dynamic heightfield representing obstructed space
#[derive(Debug, Clone)]
pub struct Heightfield {
    pub width: i32,
    pub height: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// Cell size on the xz plane
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::Recast(format!(
                "invalid heightfield size {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); (width * height) as usize],
        })
    }

    /// Clears every column, keeping allocations for reuse
    pub fn reset(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        for column in &mut self.columns {
            column.clear();
        }
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    /// Spans of column (x, z), bottom-up
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        &self.columns[self.column_index(x, z)]
    }

    pub fn column_mut(&mut self, x: i32, z: i32) -> &mut Vec<Span> {
        let idx = self.column_index(x, z);
        &mut self.columns[idx]
    }

    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(Vec::is_empty)
    }

    /// Adds a span to column (x, z), merging it with every span it touches.
    ///
    /// When the tops of two merged spans are within `flag_merge_threshold`
    /// the higher area id wins.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return Err(Error::Recast(format!(
                "span column ({}, {}) outside heightfield",
                x, z
            )));
        }
        if smin > smax {
            return Err(Error::Recast(format!(
                "inverted span {}..{} at ({}, {})",
                smin, smax, x, z
            )));
        }

        let column = self.column_mut(x, z);
        let mut new_span = Span { smin, smax, area };
        let mut i = 0;
        while i < column.len() {
            let cur = column[i];
            if cur.smin > new_span.smax {
                break;
            }
            if cur.smax < new_span.smin {
                i += 1;
                continue;
            }
            new_span.smin = new_span.smin.min(cur.smin);
            new_span.smax = new_span.smax.max(cur.smax);
            if (new_span.smax as i32 - cur.smax as i32).abs() <= flag_merge_threshold {
                new_span.area = new_span.area.max(cur.area);
            }
            column.remove(i);
        }
        column.insert(i, new_span);
        Ok(())
    }

    /// Lets walkable area spill onto obstacles low enough to step over (curbs, stairs)
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous_walkable = false;
            let mut previous_area = NULL_AREA;
            let mut previous_smax = 0i32;
            for span in column.iter_mut() {
                let walkable = span.area != NULL_AREA;
                if !walkable
                    && previous_walkable
                    && (span.smax as i32 - previous_smax).abs() <= walkable_climb
                {
                    span.area = previous_area;
                }
                previous_walkable = walkable;
                previous_area = span.area;
                previous_smax = span.smax as i32;
            }
        }
    }

    /// Removes walkable area from spans next to a drop deeper than `walkable_climb`,
    /// and from spans on terrain too steep to cross even though each cell is walkable.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        let mut ledges = Vec::new();

        for z in 0..self.height {
            for x in 0..self.width {
                let column = self.column(x, z);
                for (si, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bot = span.smax as i32;
                    let top = column
                        .get(si + 1)
                        .map_or(OPEN_HEIGHT, |next| next.smin as i32);

                    let mut min_height = OPEN_HEIGHT;
                    let mut accessible_min = bot;
                    let mut accessible_max = bot;

                    for dir in 0..4 {
                        let nx = x + dir_offset_x(dir);
                        let nz = z + dir_offset_z(dir);
                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            min_height = min_height.min(-walkable_climb - bot);
                            continue;
                        }

                        let neighbour = self.column(nx, nz);
                        // Gap between the floor and the first neighbour span
                        let nbot = -walkable_climb;
                        let ntop = neighbour.first().map_or(OPEN_HEIGHT, |n| n.smin as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            min_height = min_height.min(nbot - bot);
                        }

                        for (ni, ns) in neighbour.iter().enumerate() {
                            let nbot = ns.smax as i32;
                            let ntop = neighbour
                                .get(ni + 1)
                                .map_or(OPEN_HEIGHT, |n| n.smin as i32);
                            if top.min(ntop) - bot.max(nbot) > walkable_height {
                                min_height = min_height.min(nbot - bot);
                                if (nbot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(nbot);
                                    accessible_max = accessible_max.max(nbot);
                                }
                            }
                        }
                    }

                    if min_height < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        ledges.push((self.column_index(x, z), si));
                    }
                }
            }
        }

        for (ci, si) in ledges {
            self.columns[ci][si].area = NULL_AREA;
        }
    }

    /// Removes walkable area from spans without enough clearance above them
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for column in &mut self.columns {
            let n = column.len();
            for i in 0..n {
                let bot = column[i].smax as i32;
                let top = if i + 1 < n {
                    column[i + 1].smin as i32
                } else {
                    OPEN_HEIGHT
                };
                if top - bot <= walkable_height {
                    column[i].area = NULL_AREA;
                }
            }
        }
    }

    /// Clears the area of walkable spans that touch none of `bounds`.
    ///
    /// A span is kept when either corner of its voxel box lies inside a box.
    /// Returns the number of spans that lost their area.
    pub fn null_spans_outside(&mut self, bounds: &[Bounds]) -> usize {
        let mut cleared = 0;
        for z in 0..self.height {
            for x in 0..self.width {
                let x0 = self.bmin.x + x as f32 * self.cs;
                let z0 = self.bmin.z + z as f32 * self.cs;
                let (bmin_y, ch, cs) = (self.bmin.y, self.ch, self.cs);
                let idx = self.column_index(x, z);
                for span in self.columns[idx].iter_mut() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let lo = Vec3::new(x0, bmin_y + span.smin as f32 * ch, z0);
                    let hi = Vec3::new(x0 + cs, bmin_y + span.smax as f32 * ch, z0 + cs);
                    let inside = bounds
                        .iter()
                        .any(|b| b.contains_point(lo) || b.contains_point(hi));
                    if !inside {
                        span.area = NULL_AREA;
                        cleared += 1;
                    }
                }
            }
        }
        cleared
    }

    /// Copies every span out of the heightfield, row by row
    pub fn cache_spans(&self) -> Vec<SpanCache> {
        let mut out = Vec::with_capacity(self.span_count());
        for z in 0..self.height {
            for x in 0..self.width {
                for span in self.column(x, z) {
                    out.push(SpanCache {
                        x: x as u16,
                        z: z as u16,
                        smin: span.smin,
                        smax: span.smax,
                        area: span.area,
                    });
                }
            }
        }
        out
    }

    /// Replays cached spans. Spans outside the grid are skipped.
    pub fn add_spans(&mut self, spans: &[SpanCache], flag_merge_threshold: i32) -> Result<()> {
        for span in spans {
            let (x, z) = (span.x as i32, span.z as i32);
            if x >= self.width || z >= self.height {
                continue;
            }
            self.add_span(x, z, span.smin, span.smax, span.area, flag_merge_threshold)?;
        }
        Ok(())
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.bmin, self.bmax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WALKABLE_AREA;

    fn field(w: i32, h: i32) -> Heightfield {
        Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 10.0, h as f32), 1.0, 0.5)
            .unwrap()
    }

    #[test]
    fn test_add_span_merges_overlaps() {
        let mut hf = field(2, 2);
        hf.add_span(0, 0, 0, 5, 1, 1).unwrap();
        hf.add_span(0, 0, 10, 12, 1, 1).unwrap();
        hf.add_span(0, 0, 4, 11, 2, 1).unwrap();

        let col = hf.column(0, 0);
        assert_eq!(col.len(), 1);
        assert_eq!(col[0].smin, 0);
        assert_eq!(col[0].smax, 12);
        // merged top matches the 10..12 span, so the higher area wins
        assert_eq!(col[0].area, 2);
    }

    #[test]
    fn test_add_span_keeps_order() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 20, 22, 1, 0).unwrap();
        hf.add_span(0, 0, 0, 2, 1, 0).unwrap();
        hf.add_span(0, 0, 10, 12, 1, 0).unwrap();
        let tops: Vec<u16> = hf.column(0, 0).iter().map(|s| s.smax).collect();
        assert_eq!(tops, vec![2, 12, 22]);
        assert!(hf.add_span(1, 0, 0, 1, 1, 0).is_err());
    }

    #[test]
    fn test_low_height_filter() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 0).unwrap();
        hf.add_span(0, 0, 5, 6, WALKABLE_AREA, 0).unwrap();
        hf.filter_walkable_low_height_spans(4);
        let col = hf.column(0, 0);
        assert_eq!(col[0].area, NULL_AREA);
        assert_eq!(col[1].area, WALKABLE_AREA);
    }

    #[test]
    fn test_low_hanging_obstacle_filter() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 0).unwrap();
        hf.add_span(0, 0, 3, 4, NULL_AREA, 0).unwrap();
        hf.add_span(0, 0, 10, 20, NULL_AREA, 0).unwrap();
        hf.filter_low_hanging_walkable_obstacles(2);
        let col = hf.column(0, 0);
        assert_eq!(col[1].area, WALKABLE_AREA);
        assert_eq!(col[2].area, NULL_AREA);
    }

    #[test]
    fn test_ledge_filter_marks_tile_edges() {
        let mut hf = field(3, 3);
        for z in 0..3 {
            for x in 0..3 {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 0).unwrap();
            }
        }
        hf.filter_ledge_spans(4, 1);
        // only the centre column has walkable neighbours on all sides
        assert_eq!(hf.column(1, 1)[0].area, WALKABLE_AREA);
        assert_eq!(hf.column(0, 1)[0].area, NULL_AREA);
    }

    #[test]
    fn test_span_cache_roundtrip() {
        let mut hf = field(3, 2);
        hf.add_span(2, 1, 3, 7, WALKABLE_AREA, 0).unwrap();
        hf.add_span(0, 0, 1, 2, 5, 0).unwrap();
        let cached = hf.cache_spans();
        assert_eq!(cached.len(), 2);

        let mut other = field(3, 2);
        other.add_spans(&cached, 0).unwrap();
        assert_eq!(other.column(2, 1), hf.column(2, 1));
        assert_eq!(other.column(0, 0), hf.column(0, 0));
    }

    #[test]
    fn test_null_spans_outside_bounds() {
        let mut hf = field(4, 1);
        for x in 0..4 {
            hf.add_span(x, 0, 0, 2, WALKABLE_AREA, 0).unwrap();
        }
        let inclusion = [Bounds::new(Vec3::new(-0.5, -1.0, -1.0), Vec3::new(1.5, 5.0, 2.0))];
        let cleared = hf.null_spans_outside(&inclusion);
        assert_eq!(cleared, 2);
        assert_eq!(hf.column(0, 0)[0].area, WALKABLE_AREA);
        assert_eq!(hf.column(1, 0)[0].area, WALKABLE_AREA);
        assert_eq!(hf.column(2, 0)[0].area, NULL_AREA);
    }
}
