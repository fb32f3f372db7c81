//! Planar polygon area and convex clipping for footprint overlap.

use nalgebra::Point2;

/// Signed shoelace area; positive for counter-clockwise vertex order.
pub fn signed_area(poly: &[Point2<f64>]) -> f64 {
    if poly.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

pub fn area(poly: &[Point2<f64>]) -> f64 {
    signed_area(poly).abs()
}

/// Copy of `poly` in counter-clockwise order.
pub fn counter_clockwise(poly: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut out = poly.to_vec();
    if signed_area(&out) < 0.0 {
        out.reverse();
    }
    out
}

/// Sutherland–Hodgman clipping of `subject` against the convex polygon
/// `clip`. Either winding order is accepted.
pub fn clip_convex(subject: &[Point2<f64>], clip: &[Point2<f64>]) -> Vec<Point2<f64>> {
    if subject.len() < 3 || clip.len() < 3 {
        return Vec::new();
    }
    let clip = counter_clockwise(clip);
    let mut output = counter_clockwise(subject);

    for i in 0..clip.len() {
        if output.is_empty() {
            break;
        }
        let a = clip[i];
        let b = clip[(i + 1) % clip.len()];
        let input = std::mem::take(&mut output);

        for j in 0..input.len() {
            let current = input[j];
            let previous = input[(j + input.len() - 1) % input.len()];
            let cur_in = is_left(&a, &b, &current) >= 0.0;
            let prev_in = is_left(&a, &b, &previous) >= 0.0;

            if cur_in {
                if !prev_in {
                    if let Some(p) = line_intersection(&previous, &current, &a, &b) {
                        output.push(p);
                    }
                }
                output.push(current);
            } else if prev_in {
                if let Some(p) = line_intersection(&previous, &current, &a, &b) {
                    output.push(p);
                }
            }
        }
    }
    output
}

/// Area of `subject ∩ clip` (clip must be convex).
pub fn intersection_area(subject: &[Point2<f64>], clip: &[Point2<f64>]) -> f64 {
    area(&clip_convex(subject, clip))
}

pub fn centroid(poly: &[Point2<f64>]) -> Option<Point2<f64>> {
    if poly.is_empty() {
        return None;
    }
    let a = signed_area(poly);
    if a.abs() < 1e-12 {
        // Degenerate: fall back to the vertex mean.
        let n = poly.len() as f64;
        return Some(Point2::new(
            poly.iter().map(|p| p.x).sum::<f64>() / n,
            poly.iter().map(|p| p.y).sum::<f64>() / n,
        ));
    }
    let (mut cx, mut cy) = (0.0, 0.0);
    for i in 0..poly.len() {
        let p = poly[i];
        let q = poly[(i + 1) % poly.len()];
        let cross = p.x * q.y - q.x * p.y;
        cx += (p.x + q.x) * cross;
        cy += (p.y + q.y) * cross;
    }
    Some(Point2::new(cx / (6.0 * a), cy / (6.0 * a)))
}

fn is_left(a: &Point2<f64>, b: &Point2<f64>, p: &Point2<f64>) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn line_intersection(
    p1: &Point2<f64>,
    p2: &Point2<f64>,
    a: &Point2<f64>,
    b: &Point2<f64>,
) -> Option<Point2<f64>> {
    let d1 = p2 - p1;
    let d2 = b - a;
    let denom = d1.x * d2.y - d1.y * d2.x;
    if denom.abs() < 1e-15 {
        return None;
    }
    let t = ((a.x - p1.x) * d2.y - (a.y - p1.y) * d2.x) / denom;
    Some(p1 + d1 * t)
}
