//! Label placement for one scatter panel.
//!
//! Labels start just above and to the right of their point and are then relaxed
//! for a bounded number of iterations: overlapping labels push each other apart
//! along the axis of least overlap, labels covering a plotted marker are pushed
//! off it, and a weak spring pulls each label back toward its starting spot.
//! Everything works in pixel coordinates with y growing downwards.

use serde::Serialize;
use tracing::debug;

/// Gap between a point and the lower left corner of its label.
pub static ANCHOR_OFFSET: f64 = 4.0;
/// Extra separation added to every push so boxes do not end up touching.
static PUSH_PADDING: f64 = 2.0;
/// Fraction of the distance back to the start position applied each iteration.
static SPRING: f64 = 0.05;

/// Axis-aligned rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.x0 += dx;
        self.x1 += dx;
        self.y0 += dy;
        self.y1 += dy;
    }

    /// Overlap extent along x and y; both positive only when the rectangles intersect.
    fn overlap(&self, other: &Rect) -> (f64, f64) {
        (
            self.x1.min(other.x1) - self.x0.max(other.x0),
            self.y1.min(other.y1) - self.y0.max(other.y0),
        )
    }

    pub fn intersection_area(&self, other: &Rect) -> f64 {
        let (ox, oy) = self.overlap(other);
        if ox > 0.0 && oy > 0.0 { ox * oy } else { 0.0 }
    }

    /// Closest point of the rectangle to `p`.
    pub fn nearest_point(&self, p: (f64, f64)) -> (f64, f64) {
        (p.0.clamp(self.x0, self.x1), p.1.clamp(self.y0, self.y1))
    }

    /// Shift (never resize) so the rectangle lies inside `bounds` where it fits.
    fn clamp_into(&mut self, bounds: &Rect) {
        let dx = if self.width() >= bounds.width() || self.x0 < bounds.x0 {
            bounds.x0 - self.x0
        } else if self.x1 > bounds.x1 {
            bounds.x1 - self.x1
        } else {
            0.0
        };
        let dy = if self.height() >= bounds.height() || self.y0 < bounds.y0 {
            bounds.y0 - self.y0
        } else if self.y1 > bounds.y1 {
            bounds.y1 - self.y1
        } else {
            0.0
        };
        self.translate(dx, dy);
    }
}

/// A label to place: the point it annotates and the size of its text box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelBox {
    pub anchor: (f64, f64),
    pub width: f64,
    pub height: f64,
}

impl LabelBox {
    pub fn new(anchor: (f64, f64), width: f64, height: f64) -> Self {
        Self {
            anchor,
            width,
            height,
        }
    }

    /// Starting rectangle: up and to the right of the anchor.
    pub fn home(&self) -> Rect {
        let x0 = self.anchor.0 + ANCHOR_OFFSET;
        let y1 = self.anchor.1 - ANCHOR_OFFSET;
        Rect::new(x0, y1 - self.height, x0 + self.width, y1)
    }
}

/// A plotted marker that labels should not cover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub center: (f64, f64),
    pub radius: f64,
}

impl Obstacle {
    fn hits(&self, rect: &Rect) -> bool {
        let (nx, ny) = rect.nearest_point(self.center);
        let (dx, dy) = (nx - self.center.0, ny - self.center.1);
        dx * dx + dy * dy < self.radius * self.radius
    }

    fn bounds(&self) -> Rect {
        Rect::new(
            self.center.0 - self.radius,
            self.center.1 - self.radius,
            self.center.0 + self.radius,
            self.center.1 + self.radius,
        )
    }
}

/// Final label rectangles plus how the relaxation went.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutResult {
    /// One rectangle per input label, in input order.
    pub boxes: Vec<Rect>,
    /// Iterations actually run.
    pub iterations: usize,
    /// Summed pairwise intersection area of the final label boxes.
    pub overlap_area: f64,
}

impl LayoutResult {
    /// Whether label `i` ended up far enough from its start to need a leader line.
    pub fn moved(&self, labels: &[LabelBox], i: usize) -> bool {
        let (Some(rect), Some(label)) = (self.boxes.get(i), labels.get(i)) else {
            return false;
        };
        let home = label.home();
        (rect.x0 - home.x0).abs() + (rect.y0 - home.y0).abs() > 2.0 * ANCHOR_OFFSET
    }
}

/// Push direction for two coinciding centers: the earlier item goes negative.
fn direction(a: f64, b: f64) -> f64 {
    if a > b { 1.0 } else { -1.0 }
}

fn pairwise_overlap(boxes: &[Rect]) -> f64 {
    let mut area = 0.0;
    for i in 0..boxes.len() {
        for j in i + 1..boxes.len() {
            area += boxes[i].intersection_area(&boxes[j]);
        }
    }
    area
}

/// Relax label positions for at most `max_iterations` rounds inside `canvas`.
#[tracing::instrument(name = "Placing labels", level = "debug", skip_all)]
pub fn place_labels(
    labels: &[LabelBox],
    obstacles: &[Obstacle],
    canvas: Rect,
    max_iterations: usize,
) -> LayoutResult {
    let homes: Vec<Rect> = labels
        .iter()
        .map(|l| {
            let mut home = l.home();
            home.clamp_into(&canvas);
            home
        })
        .collect();
    let mut boxes = homes.clone();
    let mut iterations = 0;

    if labels.len() > 1 || !obstacles.is_empty() {
        for _ in 0..max_iterations {
            let mut shifts = vec![(0.0_f64, 0.0_f64); boxes.len()];
            let mut collided = false;

            for i in 0..boxes.len() {
                for j in i + 1..boxes.len() {
                    let (ox, oy) = boxes[i].overlap(&boxes[j]);
                    if ox <= 0.0 || oy <= 0.0 {
                        continue;
                    }
                    collided = true;
                    let (ci, cj) = (boxes[i].center(), boxes[j].center());
                    if ox < oy {
                        let push = ox / 2.0 + PUSH_PADDING;
                        let dir = direction(ci.0, cj.0);
                        shifts[i].0 += dir * push;
                        shifts[j].0 -= dir * push;
                    } else {
                        let push = oy / 2.0 + PUSH_PADDING;
                        let dir = direction(ci.1, cj.1);
                        shifts[i].1 += dir * push;
                        shifts[j].1 -= dir * push;
                    }
                }
            }

            for (i, rect) in boxes.iter().enumerate() {
                for obstacle in obstacles.iter().filter(|o| o.hits(rect)) {
                    collided = true;
                    let (ox, oy) = rect.overlap(&obstacle.bounds());
                    let c = rect.center();
                    if ox < oy {
                        shifts[i].0 += direction(c.0, obstacle.center.0) * (ox + PUSH_PADDING);
                    } else {
                        shifts[i].1 += direction(c.1, obstacle.center.1) * (oy + PUSH_PADDING);
                    }
                }
            }

            if !collided {
                break;
            }
            iterations += 1;

            for ((rect, home), (dx, dy)) in boxes.iter_mut().zip(&homes).zip(shifts) {
                let spring_x = (home.x0 - rect.x0) * SPRING;
                let spring_y = (home.y0 - rect.y0) * SPRING;
                rect.translate(dx + spring_x, dy + spring_y);
                rect.clamp_into(&canvas);
            }
        }
    }

    let overlap_area = pairwise_overlap(&boxes);
    debug!(
        "Placed {} labels in {} iterations, remaining overlap {:.1}px²",
        boxes.len(),
        iterations,
        overlap_area
    );
    LayoutResult {
        boxes,
        iterations,
        overlap_area,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> Rect {
        Rect::new(0.0, 0.0, 1000.0, 800.0)
    }

    #[test]
    fn no_labels_is_a_no_op() {
        let result = place_labels(&[], &[], canvas(), 200);
        assert!(result.boxes.is_empty());
        assert_eq!(result.iterations, 0);
        assert_eq!(result.overlap_area, 0.0);
    }

    #[test]
    fn single_label_stays_home() {
        let label = LabelBox::new((100.0, 100.0), 80.0, 12.0);
        let result = place_labels(&[label], &[], canvas(), 200);
        assert_eq!(result.boxes, vec![label.home()]);
        assert_eq!(result.iterations, 0);
        assert!(!result.moved(&[label], 0));
    }

    #[test]
    fn coinciding_labels_are_separated() {
        let labels = [
            LabelBox::new((400.0, 400.0), 120.0, 14.0),
            LabelBox::new((400.0, 400.0), 120.0, 14.0),
        ];
        let result = place_labels(&labels, &[], canvas(), 200);
        assert_eq!(result.overlap_area, 0.0);
        assert!(result.iterations >= 1);
        // pushed along y, the axis of least overlap
        assert_eq!(result.boxes[0].x0, result.boxes[1].x0);
        assert!(result.boxes[0].y1 <= result.boxes[1].y0);
    }

    #[test]
    fn labels_move_off_markers() {
        let label = LabelBox::new((200.0, 200.0), 60.0, 12.0);
        let marker = Obstacle {
            center: (230.0, 190.0),
            radius: 8.0,
        };
        assert!(marker.hits(&label.home()));
        let result = place_labels(&[label], &[marker], canvas(), 200);
        assert!(!marker.hits(&result.boxes[0]));
    }

    #[test]
    fn labels_stay_inside_the_canvas() {
        let labels = [
            LabelBox::new((990.0, 5.0), 150.0, 14.0),
            LabelBox::new((995.0, 8.0), 150.0, 14.0),
        ];
        let result = place_labels(&labels, &[], canvas(), 200);
        let bounds = canvas();
        for rect in &result.boxes {
            assert!(rect.x0 >= bounds.x0 && rect.x1 <= bounds.x1, "{rect:?}");
            assert!(rect.y0 >= bounds.y0 && rect.y1 <= bounds.y1, "{rect:?}");
        }
    }

    #[test]
    fn crowded_labels_terminate_within_budget() {
        let labels: Vec<LabelBox> = (0..20)
            .map(|i| LabelBox::new((500.0 + i as f64, 400.0), 200.0, 14.0))
            .collect();
        let budget = 50;
        let crowded = place_labels(&labels, &[], canvas(), budget);
        assert!(crowded.iterations <= budget);
        let before = pairwise_overlap(&labels.iter().map(LabelBox::home).collect::<Vec<_>>());
        assert!(crowded.overlap_area < before);
    }

    #[test]
    fn rect_helpers() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 20.0, 20.0);
        assert_eq!(a.intersection_area(&b), 25.0);
        assert_eq!(a.nearest_point((15.0, -3.0)), (10.0, 0.0));
        let mut c = Rect::new(-5.0, 2.0, 5.0, 4.0);
        c.clamp_into(&a);
        assert_eq!(c, Rect::new(0.0, 2.0, 10.0, 4.0));
    }
}
