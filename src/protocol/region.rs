//! wl_region contents

use crate::compositor::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionOp {
    Add,
    Subtract,
}

/// A region for defining input or opaque areas
///
/// Operations are replayed in order, so a later add can re-include part of
/// an earlier subtraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    ops: Vec<(RegionOp, Rect)>,
}

impl Region {
    /// Create a new empty region
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rectangle to the region
    pub fn add(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.push(RegionOp::Add, Rect::new(x, y, width, height));
    }

    /// Subtract a rectangle from the region
    pub fn subtract(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.push(RegionOp::Subtract, Rect::new(x, y, width, height));
    }

    fn push(&mut self, op: RegionOp, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        if op == RegionOp::Subtract && self.ops.is_empty() {
            return;
        }
        self.ops.push((op, rect));
    }

    /// Check if a point is inside the region
    pub fn contains(&self, px: i32, py: i32) -> bool {
        self.ops
            .iter()
            .rev()
            .find(|(_, rect)| rect.contains(px, py))
            .is_some_and(|(op, _)| *op == RegionOp::Add)
    }

    /// Check if the region is empty
    pub fn is_empty(&self) -> bool {
        !self.ops.iter().any(|(op, _)| *op == RegionOp::Add)
    }

    /// Smallest rectangle covering every added area
    pub fn bounds(&self) -> Option<Rect> {
        self.ops
            .iter()
            .filter(|(op, _)| *op == RegionOp::Add)
            .map(|(_, rect)| *rect)
            .reduce(|a, b| a.union(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_contains() {
        let mut region = Region::new();
        region.add(0, 0, 100, 100);
        assert!(region.contains(50, 50));
        assert!(!region.contains(150, 150));
        assert!(!region.contains(100, 0));
    }

    #[test]
    fn test_region_subtract() {
        let mut region = Region::new();
        region.add(0, 0, 100, 100);
        region.subtract(25, 25, 50, 50);
        assert!(region.contains(10, 10));
        assert!(!region.contains(50, 50));

        region.add(40, 40, 5, 5);
        assert!(region.contains(42, 42));
    }

    #[test]
    fn test_empty_region() {
        let mut region = Region::new();
        region.subtract(0, 0, 10, 10);
        region.add(0, 0, 0, 10);
        assert!(region.is_empty());
        assert_eq!(region.bounds(), None);

        region.add(5, 5, 10, 10);
        region.add(20, 0, 1, 1);
        assert_eq!(region.bounds(), Some(Rect::new(5, 0, 16, 15)));
    }
}
