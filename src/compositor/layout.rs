//! Window placement policies

use crate::compositor::Rect;

/// How new toplevels are placed on an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LayoutMode {
    /// Free-floating windows, each offset from the previous one
    #[default]
    Cascade,
    /// Side-by-side columns filling the output
    Tile,
}

/// Offset between successive cascaded windows
pub const CASCADE_STEP: i32 = 50;

/// Spacing parameters for the tiling layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileParams {
    /// Space between neighbouring tiles
    pub gap: i32,
    /// Space between tiles and the output edge
    pub padding: i32,
    /// Smallest tile edge
    pub min_size: i32,
}

impl Default for TileParams {
    fn default() -> Self {
        Self {
            gap: 10,
            padding: 10,
            min_size: 100,
        }
    }
}

/// Position of the `index`-th cascaded window inside `area`
///
/// The cascade wraps back to the corner before a window would start in the
/// lower half of the area.
pub fn cascade_position(area: Rect, index: usize) -> (i32, i32) {
    let span = (area.width.min(area.height) / 2).max(CASCADE_STEP);
    let steps = (span / CASCADE_STEP) as usize;
    let offset = (index % steps) as i32 * CASCADE_STEP;
    (area.x + offset, area.y + offset)
}

/// Split `area` into `count` equal columns
pub fn tile(area: Rect, count: usize, params: TileParams) -> Vec<Rect> {
    if count == 0 {
        return Vec::new();
    }
    let n = count as i32;
    let available_w = area.width - params.padding * 2;
    let available_h = area.height - params.padding * 2;
    let tile_w = ((available_w - params.gap * (n - 1)) / n).max(params.min_size);
    let tile_h = available_h.max(params.min_size);

    let mut x = area.x + params.padding;
    let y = area.y + params.padding;
    (0..count)
        .map(|_| {
            let rect = Rect::new(x, y, tile_w, tile_h);
            x += tile_w + params.gap;
            rect
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_steps_and_wraps() {
        let area = Rect::new(0, 0, 800, 600);
        assert_eq!(cascade_position(area, 0), (0, 0));
        assert_eq!(cascade_position(area, 1), (50, 50));
        assert_eq!(cascade_position(area, 5), (250, 250));
        // 300 / 50 = 6 steps before wrapping
        assert_eq!(cascade_position(area, 6), (0, 0));
    }

    #[test]
    fn test_cascade_respects_origin() {
        let area = Rect::new(1280, 0, 800, 600);
        assert_eq!(cascade_position(area, 1), (1330, 50));
    }

    #[test]
    fn test_tile_single() {
        let tiles = tile(Rect::new(0, 0, 800, 600), 1, TileParams::default());
        assert_eq!(tiles, vec![Rect::new(10, 10, 780, 580)]);
    }

    #[test]
    fn test_tile_two_columns() {
        let tiles = tile(Rect::new(0, 0, 800, 600), 2, TileParams::default());
        assert_eq!(tiles[0], Rect::new(10, 10, 385, 580));
        assert_eq!(tiles[1], Rect::new(405, 10, 385, 580));
    }

    #[test]
    fn test_tile_min_size() {
        let tiles = tile(Rect::new(0, 0, 300, 100), 4, TileParams::default());
        assert!(tiles.iter().all(|t| t.width == 100 && t.height == 100));
    }
}
