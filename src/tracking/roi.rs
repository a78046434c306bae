//! Region-of-interest rectangles and their frame-space helpers.

use nalgebra::Point2;

/// Axis-aligned integer rectangle, `(x, y)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Roi {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole frame.
    pub fn full_frame(cols: u32, rows: u32) -> Self {
        Self::new(0, 0, cols as i32, rows as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn center(&self) -> Point2<f32> {
        Point2::new(
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }

    /// Clamp into a `cols x rows` frame: the origin is pulled inside the frame
    /// and the extent is cut to what remains.
    pub fn clamp_to(&mut self, cols: u32, rows: u32) {
        let (cols, rows) = (cols as i32, rows as i32);
        let x = self.x.clamp(0, (cols - 1).max(0));
        let y = self.y.clamp(0, (rows - 1).max(0));

        self.x = x;
        self.y = y;
        self.width = self.width.clamp(0, cols - x);
        self.height = self.height.clamp(0, rows - y);
    }

    /// Grow by `amount` pixels in each dimension, keeping the centre.
    pub fn grow(&mut self, amount: i32) {
        let half = amount / 2;
        self.x -= half;
        self.y -= half;
        self.width += amount;
        self.height += amount;
    }

    /// Square window of `size` pixels centred on `center`.
    pub fn centered_on(center: &Point2<f32>, size: i32) -> Self {
        let half = size / 2;
        Self::new(
            center.x.round() as i32 - half,
            center.y.round() as i32 - half,
            size,
            size,
        )
    }

    /// Convert a point local to this ROI to frame coordinates.
    pub fn point_to_global(&self, p: &Point2<f32>) -> Point2<f32> {
        Point2::new(p.x + self.x as f32, p.y + self.y as f32)
    }

    /// Convert a rectangle local to this ROI to frame coordinates.
    pub fn rect_to_global(&self, rect: &Roi) -> Roi {
        Roi::new(rect.x + self.x, rect.y + self.y, rect.width, rect.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_inside(roi: &Roi, cols: u32, rows: u32) {
        assert!(roi.x >= 0 && roi.y >= 0, "{roi:?}");
        assert!(roi.width >= 0 && roi.height >= 0, "{roi:?}");
        assert!(roi.x + roi.width <= cols as i32, "{roi:?}");
        assert!(roi.y + roi.height <= rows as i32, "{roi:?}");
    }

    #[test]
    fn test_clamp_always_inside_frame() {
        let (cols, rows) = (640, 480);
        for x in (-700..=900).step_by(37) {
            for y in (-500..=700).step_by(41) {
                for w in (-50..=1000).step_by(73) {
                    for h in (-50..=1000).step_by(79) {
                        let mut roi = Roi::new(x, y, w, h);
                        roi.clamp_to(cols, rows);
                        assert_inside(&roi, cols, rows);
                    }
                }
            }
        }
    }

    #[test]
    fn test_clamp_keeps_inner_roi() {
        let mut roi = Roi::new(100, 50, 240, 240);
        roi.clamp_to(640, 480);
        assert_eq!(roi, Roi::new(100, 50, 240, 240));
    }

    #[test]
    fn test_clamp_cuts_at_edges() {
        let mut roi = Roi::new(-30, 400, 240, 240);
        roi.clamp_to(640, 480);
        assert_eq!(roi, Roi::new(0, 400, 240, 80));
    }

    #[test]
    fn test_grow_is_symmetric() {
        let mut roi = Roi::new(100, 100, 240, 240);
        let before = roi.center();
        roi.grow(100);
        assert_eq!(roi, Roi::new(50, 50, 340, 340));
        assert_eq!(roi.center(), before);
    }

    #[test]
    fn test_centered_window() {
        let roi = Roi::centered_on(&Point2::new(300.4, 199.6), 240);
        assert_eq!(roi, Roi::new(180, 80, 240, 240));
    }

    #[test]
    fn test_local_to_global() {
        let roi = Roi::new(10, 20, 50, 50);
        assert_eq!(roi.point_to_global(&Point2::new(1.5, 2.5)), Point2::new(11.5, 22.5));
        assert_eq!(roi.rect_to_global(&Roi::new(1, 2, 3, 4)), Roi::new(11, 22, 3, 4));
    }
}
