//! Rectangles and damage accumulation

/// An axis-aligned rectangle in integer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// Overlapping area of two rectangles, if any
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 > x1 && y2 > y1 {
            Some(Rect::from_edges(x1, y1, x2, y2))
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rect::from_edges(x1, y1, x2, y2)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// Scale every edge, rounding outwards so the result covers the input
    pub fn scale_out(&self, factor: f64) -> Rect {
        let x1 = (self.x as f64 * factor).floor() as i32;
        let y1 = (self.y as f64 * factor).floor() as i32;
        let x2 = (self.right() as f64 * factor).ceil() as i32;
        let y2 = (self.bottom() as f64 * factor).ceil() as i32;
        Rect::from_edges(x1, y1, x2, y2)
    }

    /// Rectangle between two corners; sizes past `i32::MAX` are clamped
    pub fn from_edges(x1: i32, y1: i32, x2: i32, y2: i32) -> Rect {
        Rect::new(x1, y1, span(x1, x2), span(y1, y2))
    }
}

fn span(start: i32, end: i32) -> i32 {
    (end as i64 - start as i64).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Above this many rectangles a region collapses into its bounding box
const MAX_DAMAGE_RECTS: usize = 32;

/// A set of damaged rectangles
///
/// Rectangles are kept as submitted (minus empties and exact duplicates);
/// overlapping entries are fine since consumers only ever repaint them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DamageRegion {
    rects: Vec<Rect>,
}

impl DamageRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        if self.rects.iter().any(|r| r.intersection(&rect) == Some(rect)) {
            return;
        }
        self.rects.retain(|r| rect.intersection(r) != Some(*r));
        self.rects.push(rect);
        if self.rects.len() > MAX_DAMAGE_RECTS {
            let bounds = self.bounds();
            self.rects.clear();
            if let Some(bounds) = bounds {
                self.rects.push(bounds);
            }
        }
    }

    pub fn merge(&mut self, other: &DamageRegion) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn bounds(&self) -> Option<Rect> {
        let mut iter = self.rects.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, r| acc.union(r)))
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.intersects(rect))
    }

    /// Clip every rectangle to `bounds`, dropping those outside
    pub fn clip(&self, bounds: &Rect) -> DamageRegion {
        let mut out = DamageRegion::new();
        for rect in &self.rects {
            if let Some(r) = rect.intersection(bounds) {
                out.add(r);
            }
        }
        out
    }

    pub fn translate(&self, dx: i32, dy: i32) -> DamageRegion {
        DamageRegion {
            rects: self.rects.iter().map(|r| r.translate(dx, dy)).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn take(&mut self) -> DamageRegion {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 100, 100);
        assert_eq!(a.intersection(&b), Some(Rect::new(50, 50, 50, 50)));

        let c = Rect::new(100, 0, 10, 10);
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn test_rect_union() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 5, 10, 10);
        assert_eq!(a.union(&b), Rect::new(0, 0, 30, 15));
        assert_eq!(Rect::default().union(&b), b);
    }

    #[test]
    fn test_scale_out_covers_input() {
        let r = Rect::new(1, 1, 3, 3).scale_out(1.5);
        assert_eq!(r, Rect::new(1, 1, 5, 5));
    }

    #[test]
    fn test_damage_drops_contained() {
        let mut damage = DamageRegion::new();
        damage.add(Rect::new(0, 0, 100, 100));
        damage.add(Rect::new(10, 10, 5, 5));
        assert_eq!(damage.rects().len(), 1);

        damage.add(Rect::new(-10, -10, 200, 200));
        assert_eq!(damage.rects(), &[Rect::new(-10, -10, 200, 200)]);
    }

    #[test]
    fn test_damage_ignores_empty() {
        let mut damage = DamageRegion::new();
        damage.add(Rect::new(0, 0, 0, 10));
        assert!(damage.is_empty());
    }

    #[test]
    fn test_damage_collapses_when_fragmented() {
        let mut damage = DamageRegion::new();
        for i in 0..=MAX_DAMAGE_RECTS as i32 {
            damage.add(Rect::new(i * 10, 0, 5, 5));
        }
        assert_eq!(damage.rects().len(), 1);
        assert_eq!(damage.bounds(), Some(Rect::new(0, 0, 325, 5)));

        // the collapsed box absorbs later damage inside it
        damage.add(Rect::new(100, 0, 5, 5));
        assert_eq!(damage.rects().len(), 1);
    }

    #[test]
    fn test_extreme_coordinates_do_not_overflow() {
        let mut damage = DamageRegion::new();
        damage.add(Rect::new(i32::MIN, 0, 1, 1));
        damage.add(Rect::new(i32::MAX - 2, 0, 1, 1));
        for i in 0..MAX_DAMAGE_RECTS as i32 - 1 {
            damage.add(Rect::new(i * 10, 0, 5, 5));
        }
        let bounds = damage.bounds().unwrap();
        assert_eq!(damage.rects().len(), 1);
        assert_eq!(bounds.x, i32::MIN);
        assert_eq!(bounds.width, i32::MAX);
        assert!(!bounds.is_empty());

        let scaled = Rect::new(-2_000_000_000, 0, 2_100_000_000, 10).scale_out(2.0);
        assert_eq!(scaled.x, i32::MIN);
        assert_eq!(scaled.width, i32::MAX);

        let wide = Rect::new(-2_000_000_000, 0, i32::MAX, 10);
        let other = Rect::new(0, 0, i32::MAX, 10);
        let overlap = wide.intersection(&other).unwrap();
        assert_eq!(overlap.x, 0);
        assert!(overlap.width > 0);
    }

    #[test]
    fn test_damage_clip() {
        let damage = DamageRegion::from_rect(Rect::new(-50, -50, 100, 100));
        let clipped = damage.clip(&Rect::new(0, 0, 640, 480));
        assert_eq!(clipped.rects(), &[Rect::new(0, 0, 50, 50)]);
    }
}
