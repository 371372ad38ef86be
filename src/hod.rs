//! Histogram-of-distances point descriptors.
//!
//! Each point is described by a normalized histogram of the distances to
//! its neighbors within a cutoff radius. The sampled-model-point
//! formulation compares scene and model descriptors with an L1 penalty to
//! bias the correspondence search toward locally-similar regions.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::{DMatrix, Matrix3xX};

/// Bucket size tuned like the voxel search tree; descriptor clouds are
/// small, so this mostly avoids degenerate splits on planar data.
const BUCKET_SIZE: usize = 256;

/// Per-point histogram-of-distances descriptors.
///
/// Returns a `bins × N` matrix; column i is the histogram of distances from
/// point i to every neighbor closer than `max_dist`, normalized to sum to
/// one (all-zero when the point has no neighbors in range).
pub fn hod_descriptors(points: &Matrix3xX<f64>, bins: usize, max_dist: f64) -> DMatrix<f64> {
    let n = points.ncols();
    let mut descriptors = DMatrix::zeros(bins, n);
    if n == 0 || bins == 0 || max_dist <= 0.0 {
        return descriptors;
    }

    let entries: Vec<[f64; 3]> = (0..n)
        .map(|i| [points[(0, i)], points[(1, i)], points[(2, i)]])
        .collect();
    let tree: ImmutableKdTree<f64, u64, 3, BUCKET_SIZE> = (&*entries).into();

    let bin_width = max_dist / bins as f64;
    for i in 0..n {
        let neighbors = tree.within::<SquaredEuclidean>(&entries[i], max_dist * max_dist);
        let mut count = 0usize;
        for nn in &neighbors {
            if nn.item as usize == i {
                continue;
            }
            let dist = nn.distance.sqrt();
            let bin = ((dist / bin_width) as usize).min(bins - 1);
            descriptors[(bin, i)] += 1.0;
            count += 1;
        }
        if count > 0 {
            let inv = 1.0 / count as f64;
            for b in 0..bins {
                descriptors[(b, i)] *= inv;
            }
        }
    }
    descriptors
}
