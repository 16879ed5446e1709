//! Trilateration Calculator.
//!
//! Sensor 1 sits at the origin, sensor 2 on the +X axis at distance `a`, and
//! sensor 3 in the XY plane at `(c, b)`.  Given the three (offset-corrected)
//! distances to the tracked point:
//!
//! ```text
//! x  = (a² + d1² − d2²) / (2a)
//! y  = (d1² + c² + b² − d3² − 2·c·x) / (2b)
//! z² = d1² − x² − y²
//! ```
//!
//! The tracked point is assumed to lie in the positive octant; anything else
//! is a measurement or geometry failure and is rejected.
//!
//! # Example
//!
//! ```rust
//! use rangefuse_engine::trilateration::{AnchorGeometry, compute_instant};
//!
//! let anchors = AnchorGeometry { a: 100.0, c: 50.0, b: 100.0 };
//! let point = compute_instant([90.0, 80.0, 100.0], 30.0, &anchors).unwrap();
//! assert_eq!((point.x, point.y, point.z), (61.5, 19.25, 101.23));
//! ```

use rangefuse_types::{Coordinate, FuseError};

/// Slack allowed on a negative `z²` before the triple is declared infeasible.
pub const Z_SQUARED_TOLERANCE: f64 = 1e-9;

// ────────────────────────────────────────────────────────────────────────────
// Anchor geometry
// ────────────────────────────────────────────────────────────────────────────

/// Relative placement of the three sensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorGeometry {
    /// Sensor 2 baseline along +X.
    pub a: f64,
    /// Sensor 3 X component.
    pub c: f64,
    /// Sensor 3 Y component.
    pub b: f64,
}

impl AnchorGeometry {
    /// Reject geometry that would divide by zero or poison every result.
    pub fn validate(&self) -> Result<(), FuseError> {
        if !(self.a.is_finite() && self.b.is_finite() && self.c.is_finite()) {
            return Err(FuseError::InvalidConfig(format!(
                "anchor values must be finite numbers (a={}, c={}, b={})",
                self.a, self.c, self.b
            )));
        }
        if self.a == 0.0 {
            return Err(FuseError::InvalidConfig("anchor a must not be 0".to_string()));
        }
        if self.b == 0.0 {
            return Err(FuseError::InvalidConfig("anchor b must not be 0".to_string()));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rejection
// ────────────────────────────────────────────────────────────────────────────

/// Why a calculation attempt produced no point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// `z²` fell below `-Z_SQUARED_TOLERANCE`: the spheres do not intersect.
    Infeasible { z_squared: f64 },
    /// At least one coordinate was not strictly positive.
    NonPositive { x: f64, y: f64, z: f64 },
    /// A calculation was attempted without all three distances present.
    IncompleteTriple,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Infeasible { z_squared } => {
                write!(f, "infeasible geometry (z^2 = {z_squared:.4} < 0)")
            }
            Rejection::NonPositive { x, y, z } => {
                write!(f, "non-positive coordinate (x={x:.2}, y={y:.2}, z={z:.2})")
            }
            Rejection::IncompleteTriple => write!(f, "distance triple incomplete"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Calculation
// ────────────────────────────────────────────────────────────────────────────

/// Compute one instant position from raw distances `[d1, d2, d3]`.
///
/// `offset` is added to every distance before the geometry is evaluated.
/// The accepted point is rounded to two decimals; a coordinate that rounds
/// to zero is rejected as non-positive so stored points stay strictly inside
/// the positive octant.
///
/// `anchors` must already have passed [`AnchorGeometry::validate`].
pub fn compute_instant(
    raw: [f64; 3],
    offset: f64,
    anchors: &AnchorGeometry,
) -> Result<Coordinate, Rejection> {
    let [d1, d2, d3] = raw.map(|d| d + offset);
    let AnchorGeometry { a, c, b } = *anchors;

    let x = (a * a + d1 * d1 - d2 * d2) / (2.0 * a);
    let y = (d1 * d1 + c * c + b * b - d3 * d3 - 2.0 * c * x) / (2.0 * b);
    let z_squared = d1 * d1 - x * x - y * y;

    if z_squared.is_nan() || z_squared < -Z_SQUARED_TOLERANCE {
        return Err(Rejection::Infeasible { z_squared });
    }
    let z = z_squared.max(0.0).sqrt();

    if !(x > 0.0 && y > 0.0 && z > 0.0) {
        return Err(Rejection::NonPositive { x, y, z });
    }

    let point = Coordinate::new(x, y, z).rounded();
    if !(point.x > 0.0 && point.y > 0.0 && point.z > 0.0) {
        return Err(Rejection::NonPositive { x, y, z });
    }
    Ok(point)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
