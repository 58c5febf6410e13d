use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimension of a signal feature vector.
pub const FEATURE_DIM: usize = 11;

/// Fixed-length numeric description of a signal and its outcome.
pub type FeatureVector = [f64; FEATURE_DIM];

/// A stored cluster from the latest k-means build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAssignment {
    pub cluster_id: u32,
    /// Model that produced this cluster.
    pub model_id: String,
    pub centroid: Vec<f64>,
    pub member_count: u32,
    /// Members whose reference-horizon return is positive.
    pub success_count: u32,
    /// Null when the cluster has no members.
    pub success_rate: Option<f64>,
    pub last_built_at: DateTime<Utc>,
}

impl ClusterAssignment {
    /// Success rate from counts, null for empty clusters.
    pub fn rate(success_count: u32, member_count: u32) -> Option<f64> {
        if member_count == 0 {
            None
        } else {
            Some(success_count as f64 / member_count as f64)
        }
    }
}

/// Output of a k-means fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModel {
    /// Hex digest of seed, k and centroid values.
    pub model_id: String,
    /// Effective cluster count after degenerate-input reduction.
    pub k: usize,
    pub seed: u64,
    pub centroids: Vec<FeatureVector>,
    /// Cluster index for each fitted vector, in input order.
    pub assignments: Vec<usize>,
    pub iterations: usize,
    pub converged: bool,
    pub built_at: DateTime<Utc>,
}

impl ClusterModel {
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// Number of fitted vectors assigned to each cluster.
    pub fn member_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.k];
        for &a in &self.assignments {
            if let Some(c) = counts.get_mut(a) {
                *c += 1;
            }
        }
        counts
    }
}
