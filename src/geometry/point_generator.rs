//! Integer lattice point generators.
//!
//! Produces point sets shaped as hypercubes or hyperspheres centred at the
//! origin, optionally reduced to primitive vectors (coordinate gcd of 1),
//! plus the shell expansion used to search outward for start points.
//!
//! # Primitive reduction
//!
//! Every point is divided by the gcd of its coordinates. The origin has
//! gcd 0 and is left unchanged, so primitive sets still contain it.
//!
//! # Sphere sizing
//!
//! The number of primitive vectors in a `d`-ball of radius `R` is
//! asymptotically `V_d(R) / ζ(d)` where `V_d(R) = π^{d/2} R^d / Γ(d/2 + 1)`.
//! [`calc_sphere_radius`] inverts that to size trajectory sets from a
//! desired sample count.

use std::collections::BTreeSet;
use std::f64::consts::PI;

use num_integer::Integer;
use rand::Rng;
use statrs::function::gamma::gamma;

use super::position::Point;
use crate::config::Shape;

/// How many rejected draws per requested point before falling back to
/// exact enumeration.
const REJECTION_BUDGET: usize = 256;

/// How a shape's point set is produced.
pub enum Sampling<'a, R: Rng + ?Sized> {
    /// Every lattice point of the shape.
    Full,
    /// `n` distinct points drawn uniformly from the shape's point set.
    Random { n: usize, rng: &'a mut R },
}

/// All integer points of `[-edge, edge]^dim`, optionally reduced to primitive.
pub fn generate_cube(edge: i64, dim: usize, primitive: bool) -> BTreeSet<Point> {
    let edge = edge.max(0);
    let mut points = BTreeSet::new();
    for_each_in_box(edge, dim, |p| {
        let p = if primitive { to_primitive(p) } else { p.to_vec() };
        points.insert(p);
    });
    points
}

/// Cube points with Euclidean norm `<= radius`.
pub fn generate_sphere(radius: i64, dim: usize, primitive: bool) -> BTreeSet<Point> {
    limit_by_norm(generate_cube(radius, dim, primitive), radius as f64)
}

/// Generate a point set for `shape` of the given side/radius `length`.
pub fn generate_via_shape<R: Rng + ?Sized>(
    length: i64,
    dim: usize,
    shape: Shape,
    primitive: bool,
    sampling: Sampling<'_, R>,
) -> BTreeSet<Point> {
    match (shape, sampling) {
        (Shape::Cube, Sampling::Full) => generate_cube(length, dim, primitive),
        (Shape::Sphere, Sampling::Full) => generate_sphere(length, dim, primitive),
        (shape, Sampling::Random { n, rng }) => generate_random(n, length, dim, shape, primitive, rng),
    }
}

/// Uniformly sample `n` distinct points of a shape's point set.
///
/// Uses rejection sampling from the bounding cube. A request at least as
/// large as the bounding cube, or one that exhausts the rejection budget
/// (very sparse shapes), falls back to enumerating the shape and choosing
/// `n` members without replacement.
pub fn generate_random<R: Rng + ?Sized>(
    n: usize,
    length: i64,
    dim: usize,
    shape: Shape,
    primitive: bool,
    rng: &mut R,
) -> BTreeSet<Point> {
    let length = length.max(0);
    let side = (2 * length + 1) as f64;
    let box_size = side.powi(dim as i32);
    if n == 0 {
        return BTreeSet::new();
    }
    if (n as f64) >= box_size {
        return generate_via_shape(length, dim, shape, primitive, Sampling::<R>::Full);
    }

    let accepts = |p: &[i64]| -> bool {
        let in_shape = match shape {
            Shape::Cube => true,
            Shape::Sphere => norm(p) <= length as f64,
        };
        in_shape && (!primitive || is_primitive_or_origin(p))
    };

    let mut chosen = BTreeSet::new();
    let budget = n.saturating_mul(REJECTION_BUDGET);
    let mut attempts = 0usize;
    while chosen.len() < n && attempts < budget {
        attempts += 1;
        let p: Point = (0..dim).map(|_| rng.gen_range(-length..=length)).collect();
        if accepts(&p) {
            chosen.insert(p);
        }
    }
    if chosen.len() == n {
        return chosen;
    }

    let all: Vec<Point> = generate_via_shape(length, dim, shape, primitive, Sampling::<R>::Full)
        .into_iter()
        .collect();
    if n >= all.len() {
        return all.into_iter().collect();
    }
    rand::seq::index::sample(rng, all.len(), n)
        .into_iter()
        .map(|i| all[i].clone())
        .collect()
}

/// Expand a point set by adding every offset in `{-f..f}^dim` (or `{0..f}^dim`
/// when unsigned) to each point.
///
/// Returns `(new_points, all_points)` where `new_points` excludes the input.
pub fn expand_set(
    points: &BTreeSet<Point>,
    expansion_factor: i64,
    signed_expansion: bool,
    norm_limit: Option<f64>,
    primitive: bool,
) -> (BTreeSet<Point>, BTreeSet<Point>) {
    let mut new_set = BTreeSet::new();
    let dim = match points.iter().next() {
        Some(p) => p.len(),
        None => return (new_set, BTreeSet::new()),
    };

    let low = if signed_expansion { -expansion_factor } else { 0 };
    let mut offsets: Vec<Point> = Vec::new();
    for_each_in_range(low, expansion_factor, dim, |o| offsets.push(o.to_vec()));

    for point in points {
        for offset in &offsets {
            let mut p: Point = point.iter().zip(offset).map(|(a, b)| a + b).collect();
            if primitive {
                p = to_primitive(&p);
            }
            if let Some(limit) = norm_limit {
                if norm(&p) > limit {
                    continue;
                }
            }
            if !points.contains(&p) {
                new_set.insert(p);
            }
        }
    }

    let total = points.union(&new_set).cloned().collect();
    (new_set, total)
}

/// Keep points whose Euclidean norm is at most `max_norm`.
pub fn limit_by_norm(points: BTreeSet<Point>, max_norm: f64) -> BTreeSet<Point> {
    points.into_iter().filter(|p| norm(p) <= max_norm).collect()
}

/// Divide a point by the gcd of its coordinates. The origin is unchanged.
pub fn to_primitive(p: &[i64]) -> Point {
    let g = p.iter().fold(0i64, |acc, &c| acc.gcd(&c));
    if g == 0 {
        return p.to_vec();
    }
    p.iter().map(|&c| c / g).collect()
}

/// Whether the coordinate gcd is exactly 1.
pub fn is_primitive(p: &[i64]) -> bool {
    p.iter().fold(0i64, |acc, &c| acc.gcd(&c)) == 1
}

fn is_primitive_or_origin(p: &[i64]) -> bool {
    let g = p.iter().fold(0i64, |acc, &c| acc.gcd(&c));
    g == 0 || g == 1
}

/// Euclidean norm of an integer point.
pub fn norm(p: &[i64]) -> f64 {
    p.iter().map(|&c| (c as f64) * (c as f64)).sum::<f64>().sqrt()
}

/// Smallest integer radius whose ball is expected to hold `n` primitive
/// vectors in dimension `dim`.
///
/// In one dimension only `±1` are primitive, so any radius `>= 1` is as good
/// as it gets.
pub fn calc_sphere_radius(n: u64, dim: usize) -> i64 {
    if n == 0 || dim == 0 {
        return 0;
    }
    if dim == 1 {
        return 1;
    }
    let d = dim as f64;
    let r = ((n as f64) * gamma(d / 2.0 + 1.0) * riemann_zeta(d)).powf(1.0 / d) / PI.sqrt();
    r.ceil() as i64
}

/// Expected number of primitive vectors in a ball of radius `radius`.
pub fn count_primitive_in_sphere(radius: i64, dim: usize) -> u64 {
    if radius <= 0 || dim == 0 {
        return 0;
    }
    if dim == 1 {
        return 2;
    }
    let d = dim as f64;
    let volume = PI.powf(d / 2.0) * (radius as f64).powf(d) / gamma(d / 2.0 + 1.0);
    (volume / riemann_zeta(d)).ceil() as u64
}

/// Riemann zeta for real `s > 1` via Euler–Maclaurin summation.
pub fn riemann_zeta(s: f64) -> f64 {
    if s <= 1.0 {
        return f64::INFINITY;
    }
    const N: usize = 16;
    let n = N as f64;
    let head: f64 = (1..N).map(|k| (k as f64).powf(-s)).sum();
    let tail = n.powf(1.0 - s) / (s - 1.0) + 0.5 * n.powf(-s) + s * n.powf(-s - 1.0) / 12.0
        - s * (s + 1.0) * (s + 2.0) * n.powf(-s - 3.0) / 720.0;
    head + tail
}

fn for_each_in_box<F: FnMut(&[i64])>(edge: i64, dim: usize, f: F) {
    for_each_in_range(-edge, edge, dim, f)
}

/// Odometer over `[low, high]^dim`.
fn for_each_in_range<F: FnMut(&[i64])>(low: i64, high: i64, dim: usize, mut f: F) {
    if high < low {
        return;
    }
    let mut current = vec![low; dim];
    loop {
        f(&current);
        let mut i = 0;
        loop {
            if i == dim {
                return;
            }
            if current[i] < high {
                current[i] += 1;
                break;
            }
            current[i] = low;
            i += 1;
        }
    }
}
