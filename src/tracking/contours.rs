//! Outer contour extraction and shape measures over binary images.
//!
//! Every 8-connected foreground component yields one contour: its outer
//! boundary, traced clockwise with Moore-neighbour tracing from the component's
//! first pixel in raster order.

use std::collections::VecDeque;

use image::GrayImage;
use nalgebra::Point2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::roi::Roi;

/// Clockwise in image coordinates (y down), starting east.
const DIRS_8: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

const WEST: usize = 4;

/// Seed for the enclosing-circle shuffle, so detections are reproducible.
const CIRCLE_SEED: u64 = 0x7a75_7275;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<(i32, i32)>,
}

struct BinaryView<'a> {
    data: &'a [u8],
    w: i32,
    h: i32,
}

impl BinaryView<'_> {
    fn is_foreground(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.w && y < self.h && self.data[(y * self.w + x) as usize] > 0
    }
}

/// Find the outer contour of every 8-connected foreground component.
pub fn find_contours(binary: &GrayImage) -> Vec<Contour> {
    let view = BinaryView {
        data: binary.as_raw(),
        w: binary.width() as i32,
        h: binary.height() as i32,
    };
    let mut labelled = vec![false; (view.w * view.h) as usize];
    let mut contours = Vec::new();

    for y in 0..view.h {
        for x in 0..view.w {
            let idx = (y * view.w + x) as usize;
            if labelled[idx] || !view.is_foreground(x, y) {
                continue;
            }
            flood_component(&view, &mut labelled, x, y);
            contours.push(Contour {
                points: trace_boundary(&view, x, y),
            });
        }
    }

    contours
}

fn flood_component(view: &BinaryView, labelled: &mut [bool], sx: i32, sy: i32) {
    let mut queue = VecDeque::from([(sx, sy)]);
    labelled[(sy * view.w + sx) as usize] = true;

    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in DIRS_8 {
            let (nx, ny) = (x + dx, y + dy);
            if !view.is_foreground(nx, ny) {
                continue;
            }
            let nidx = (ny * view.w + nx) as usize;
            if !labelled[nidx] {
                labelled[nidx] = true;
                queue.push_back((nx, ny));
            }
        }
    }
}

/// Moore-neighbour tracing with Jacob's stopping criterion.
///
/// `(sx, sy)` must be the raster-first pixel of its component, so its west
/// neighbour is background.
fn trace_boundary(view: &BinaryView, sx: i32, sy: i32) -> Vec<(i32, i32)> {
    let start = (sx, sy);
    let mut contour = vec![start];
    let mut current = start;
    let mut backtrack = WEST;
    let mut first_step: Option<(i32, i32)> = None;
    let max_steps = (view.w as usize * view.h as usize).saturating_mul(4).max(16);

    for _ in 0..max_steps {
        let next = (1..=8).find_map(|step| {
            let k = (backtrack + step) % 8;
            let (nx, ny) = (current.0 + DIRS_8[k].0, current.1 + DIRS_8[k].1);
            view.is_foreground(nx, ny).then_some((k, (nx, ny)))
        });

        // Isolated pixel
        let Some((k, next)) = next else { break };

        if current == start {
            match first_step {
                None => first_step = Some(next),
                Some(first) if first == next => break,
                Some(_) => {}
            }
        }

        // The last background neighbour examined, seen from `next`
        backtrack = if k % 2 == 0 { (k + 6) % 8 } else { (k + 5) % 8 };
        current = next;
        contour.push(current);
    }

    if contour.len() > 1 && contour.last() == Some(&start) {
        contour.pop();
    }
    contour
}

/// Polygon area of the ordered contour points (shoelace).
pub fn contour_area(contour: &Contour) -> f64 {
    let n = contour.points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: i64 = (0..n)
        .map(|i| {
            let (x0, y0) = contour.points[i];
            let (x1, y1) = contour.points[(i + 1) % n];
            x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64
        })
        .sum();
    twice.abs() as f64 / 2.0
}

/// Smallest upright rectangle containing every contour pixel.
pub fn bounding_rect(contour: &Contour) -> Roi {
    let Some(&(x0, y0)) = contour.points.first() else {
        return Roi::default();
    };
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
    for &(x, y) in &contour.points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Roi::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point2<f64>,
    pub radius: f64,
}

impl Circle {
    fn contains(&self, p: &Point2<f64>) -> bool {
        (p - self.center).norm() <= self.radius * (1.0 + 1e-9) + 1e-9
    }

    fn from_two(a: &Point2<f64>, b: &Point2<f64>) -> Self {
        let center = nalgebra::center(a, b);
        Self {
            center,
            radius: (a - center).norm(),
        }
    }

    fn from_three(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> Self {
        let (bx, by) = (b.x - a.x, b.y - a.y);
        let (cx, cy) = (c.x - a.x, c.y - a.y);
        let d = 2.0 * (bx * cy - by * cx);
        if d.abs() < 1e-12 {
            // Collinear: the widest pair spans the others
            let candidates = [Self::from_two(a, b), Self::from_two(a, c), Self::from_two(b, c)];
            return candidates
                .into_iter()
                .fold(Self::from_two(a, b), |best, c| if c.radius > best.radius { c } else { best });
        }
        let b2 = bx * bx + by * by;
        let c2 = cx * cx + cy * cy;
        let ux = (cy * b2 - by * c2) / d;
        let uy = (bx * c2 - cx * b2) / d;
        Self {
            center: Point2::new(a.x + ux, a.y + uy),
            radius: (ux * ux + uy * uy).sqrt(),
        }
    }
}

/// Minimum enclosing circle (Welzl, iterative form) of the contour points.
pub fn min_enclosing_circle(contour: &Contour) -> Circle {
    let mut pts: Vec<Point2<f64>> = contour
        .points
        .iter()
        .map(|&(x, y)| Point2::new(x as f64, y as f64))
        .collect();

    match pts.len() {
        0 => {
            return Circle {
                center: Point2::origin(),
                radius: 0.0,
            };
        }
        1 => {
            return Circle {
                center: pts[0],
                radius: 0.0,
            };
        }
        _ => {}
    }

    pts.shuffle(&mut StdRng::seed_from_u64(CIRCLE_SEED));

    let mut circle = Circle::from_two(&pts[0], &pts[1]);
    for i in 2..pts.len() {
        if circle.contains(&pts[i]) {
            continue;
        }
        circle = Circle::from_two(&pts[0], &pts[i]);
        for j in 1..i {
            if circle.contains(&pts[j]) {
                continue;
            }
            circle = Circle::from_two(&pts[i], &pts[j]);
            for k in 0..j {
                if !circle.contains(&pts[k]) {
                    circle = Circle::from_three(&pts[i], &pts[j], &pts[k]);
                }
            }
        }
    }
    circle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    fn disk(w: u32, h: u32, cx: i32, cy: i32, r: i32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let (dx, dy) = (x as i32 - cx, y as i32 - cy);
            Luma([if dx * dx + dy * dy <= r * r { 255 } else { 0 }])
        })
    }

    #[test]
    fn test_square_contour() {
        let mut img = GrayImage::new(10, 10);
        for y in 2..6 {
            for x in 3..7 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let contours = find_contours(&img);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        // 4x4 block has 12 boundary pixels, area between pixel centres is 3x3
        assert_eq!(c.points.len(), 12);
        assert_eq!(c.points[0], (3, 2));
        assert_relative_eq!(contour_area(c), 9.0);
        assert_eq!(bounding_rect(c), Roi::new(3, 2, 4, 4));
    }

    #[test]
    fn test_separate_components() {
        let mut img = disk(60, 40, 12, 12, 6);
        for (x, y, p) in disk(60, 40, 45, 25, 8).enumerate_pixels() {
            if p[0] > 0 {
                img.put_pixel(x, y, *p);
            }
        }
        img.put_pixel(30, 38, Luma([255]));

        let contours = find_contours(&img);
        assert_eq!(contours.len(), 3);
        let areas: Vec<f64> = contours.iter().map(contour_area).collect();
        assert!(areas[0] > 80.0 && areas[0] < 120.0, "{areas:?}");
        assert!(areas[1] > 160.0 && areas[1] < 210.0, "{areas:?}");
        assert_eq!(areas[2], 0.0);
    }

    #[test]
    fn test_disk_enclosing_circle() {
        let img = disk(100, 100, 50, 40, 20);
        let contours = find_contours(&img);
        assert_eq!(contours.len(), 1);
        let circle = min_enclosing_circle(&contours[0]);
        assert_relative_eq!(circle.center.x, 50.0, epsilon = 1e-6);
        assert_relative_eq!(circle.center.y, 40.0, epsilon = 1e-6);
        assert_relative_eq!(circle.radius, 20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_enclosing_circle_contains_all_points() {
        let contour = Contour {
            points: vec![(0, 0), (10, 1), (3, 7), (5, 5), (-2, 4), (8, -3)],
        };
        let circle = min_enclosing_circle(&contour);
        for &(x, y) in &contour.points {
            let d = (Point2::new(x as f64, y as f64) - circle.center).norm();
            assert!(d <= circle.radius + 1e-6);
        }
    }

    #[test]
    fn test_single_pixel_contour() {
        let mut img = GrayImage::new(5, 5);
        img.put_pixel(2, 2, Luma([255]));
        let contours = find_contours(&img);
        assert_eq!(contours[0].points, vec![(2, 2)]);
        assert_eq!(min_enclosing_circle(&contours[0]).radius, 0.0);
    }
}
