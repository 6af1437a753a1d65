//! Exact lattice geometry
//!
//! Positions, singular hyperplanes, lattice point generators and the
//! strict-system feasibility test used to enumerate arrangement cells.

pub mod feasibility;
pub mod plane;
pub mod point_generator;
pub mod position;

pub use feasibility::{check_strict_system, is_strictly_feasible, Feasibility, StrictInequality};
pub use plane::{AffineForm, Hyperplane};
pub use point_generator::{
    calc_sphere_radius, count_primitive_in_sphere, expand_set, generate_cube, generate_random,
    generate_sphere, generate_via_shape, limit_by_norm, to_primitive, Sampling,
};
pub use position::{Point, Position};
