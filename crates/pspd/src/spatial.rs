//! Nearest-neighbor and radius queries over fixed point sets.
//!
//! The scan queries two independent indices: one over the point cloud and,
//! when a mesh is supplied, one over its vertices. Both are built once per
//! scan and are read-only afterwards, so concurrent queries from the
//! parallel per-point loop need no synchronization.

use kiddo::SquaredEuclidean;
use nalgebra::Point3;

/// A KD-tree index over an immutable point set.
#[derive(Debug)]
pub struct SpatialIndex {
    tree: kiddo::KdTree<f64, 3>,
    len: usize,
}

impl SpatialIndex {
    /// Build an index over the given points.
    ///
    /// Duplicate coordinates are allowed; each point keeps its own index.
    pub fn build(points: &[Point3<f64>]) -> Self {
        let mut tree = kiddo::KdTree::new();
        for (i, p) in points.iter().enumerate() {
            tree.add(&[p.x, p.y, p.z], i as u64);
        }
        Self {
            tree,
            len: points.len(),
        }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the index holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Indices of all points within `radius` of `center`, closest first.
    ///
    /// An empty result is valid: a query far from the cloud finds nothing.
    pub fn radius_query(&self, center: &Point3<f64>, radius: f64) -> Vec<usize> {
        self.tree
            .within::<SquaredEuclidean>(&[center.x, center.y, center.z], radius * radius)
            .iter()
            .map(|n| n.item as usize)
            .collect()
    }

    /// Indices of the `k` nearest points to `center`, closest first.
    ///
    /// Returns fewer than `k` indices when the set is smaller than `k`.
    /// Distance ties are broken by tree order; callers must not rely on a
    /// specific tie order.
    pub fn k_query(&self, center: &Point3<f64>, k: usize) -> Vec<usize> {
        self.tree
            .nearest_n::<SquaredEuclidean>(&[center.x, center.y, center.z], k)
            .iter()
            .map(|n| n.item as usize)
            .collect()
    }
}
