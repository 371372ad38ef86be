//! Triangle primitives: closest-point queries, areas, normals.
//!
//! The closest-point routine is the workhorse of both the exact distance
//! kernel and the ICP refinement loop, so it is written as a branchy
//! Voronoi-region walk rather than a solver call.

use nalgebra::Vector3;

/// Closest point on the closed triangle `(v0, v1, v2)` to `p`.
///
/// Classifies `p` against the Voronoi regions of the three vertices, the
/// three edges, and the face interior, then projects accordingly. Always
/// succeeds; degenerate (zero-area) triangles collapse to their edges.
pub fn closest_point_on_triangle(
    v0: &Vector3<f64>,
    v1: &Vector3<f64>,
    v2: &Vector3<f64>,
    p: &Vector3<f64>,
) -> Vector3<f64> {
    let ab = v1 - v0;
    let ac = v2 - v0;
    let ap = p - v0;

    // Vertex region v0
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *v0;
    }

    // Vertex region v1
    let bp = p - v1;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *v1;
    }

    // Edge region v0-v1
    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return v0 + ab * v;
    }

    // Vertex region v2
    let cp = p - v2;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *v2;
    }

    // Edge region v0-v2
    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return v0 + ac * w;
    }

    // Edge region v1-v2
    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return v1 + (v2 - v1) * w;
    }

    // Face interior
    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    v0 + ab * v + ac * w
}

/// Area of the triangle `(v0, v1, v2)`.
pub fn triangle_area(v0: &Vector3<f64>, v1: &Vector3<f64>, v2: &Vector3<f64>) -> f64 {
    (v1 - v0).cross(&(v2 - v0)).norm() / 2.0
}

/// Outward face normal `((v2 - v0) × (v1 - v0)) / ‖·‖`.
///
/// The winding matches the mesh convention used by the distance kernel;
/// a degenerate triangle yields a zero vector.
pub fn triangle_normal(v0: &Vector3<f64>, v1: &Vector3<f64>, v2: &Vector3<f64>) -> Vector3<f64> {
    let n = (v2 - v0).cross(&(v1 - v0));
    let norm = n.norm();
    if norm > 0.0 {
        n / norm
    } else {
        Vector3::zeros()
    }
}
