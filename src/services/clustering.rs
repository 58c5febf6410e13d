//! Signal pattern clustering.
//!
//! Every resolved signal is described by an 11-dimensional feature vector
//! (move timing, direction, indicator category, time of day and week,
//! strength). A seeded k-means++ fit groups the vectors and each cluster gets
//! an empirical success rate from the returns of its members.

use crate::config::ClusterConfig;
use crate::services::jobs::CancelFlag;
use crate::services::sqlite_store::{HistoryQuery, SqliteStore};
use crate::types::{
    ClusterAssignment, ClusterModel, FeatureVector, Horizon, Outcome, Signal, FEATURE_DIM,
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::f64::consts::PI;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Cluster store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Cluster rebuild cancelled")]
    Cancelled,

    #[error("Stored centroid has {0} dimensions, expected {FEATURE_DIM}")]
    Dimension(usize),
}

/// Describe a signal and its outcome as a feature vector.
pub fn feature_vector(
    signal: &Signal,
    outcome: &Outcome,
    reference: Horizon,
    move_threshold_pct: f64,
) -> FeatureVector {
    let mut v = [0.0; FEATURE_DIM];

    // How soon the move happened: first horizon past the threshold.
    v[0] = Horizon::ALL
        .iter()
        .find(|h| {
            outcome
                .return_pct(**h)
                .is_some_and(|r| r.abs() >= move_threshold_pct)
        })
        .map(|h| h.index() as f64 / 4.0)
        .unwrap_or(1.0);

    v[1] = match outcome.return_pct(reference) {
        Some(r) if r > move_threshold_pct => 1.0,
        Some(r) if r < -move_threshold_pct => -1.0,
        _ => 0.0,
    };

    v[2 + signal.category().index()] = 1.0;

    let angle = 2.0 * PI * signal.triggered_at.hour() as f64 / 24.0;
    v[7] = angle.sin();
    v[8] = angle.cos();
    v[9] = signal.triggered_at.weekday().num_days_from_monday() as f64 / 6.0;
    v[10] = signal.strength.clamp(0.0, 1.0);

    v
}

fn squared_distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index of the nearest centroid; ties go to the lowest index.
fn nearest(vector: &FeatureVector, centroids: &[FeatureVector]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(vector, centroid);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}

fn distinct_count(vectors: &[FeatureVector]) -> usize {
    vectors
        .iter()
        .map(|v| v.map(f64::to_bits))
        .collect::<HashSet<_>>()
        .len()
}

fn model_id(seed: u64, centroids: &[FeatureVector]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update((centroids.len() as u64).to_le_bytes());
    for centroid in centroids {
        for value in centroid {
            hasher.update(value.to_bits().to_le_bytes());
        }
    }
    hex::encode(&hasher.finalize()[..8])
}

/// k-means++ initialization driven by a seeded RNG.
fn init_centroids(vectors: &[FeatureVector], k: usize, rng: &mut StdRng) -> Vec<FeatureVector> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(vectors[rng.gen_range(0..vectors.len())]);

    while centroids.len() < k {
        let distances: Vec<f64> = vectors
            .iter()
            .map(|v| {
                centroids
                    .iter()
                    .map(|c| squared_distance(v, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();

        let total: f64 = distances.iter().sum();
        if total <= 0.0 {
            break;
        }

        let threshold = rng.gen::<f64>() * total;
        let mut cumsum = 0.0;
        // Points already chosen have zero weight and are never picked again.
        let mut chosen = None;
        for (i, &d) in distances.iter().enumerate() {
            if d <= 0.0 {
                continue;
            }
            cumsum += d;
            chosen = Some(i);
            if cumsum >= threshold {
                break;
            }
        }
        match chosen {
            Some(i) => centroids.push(vectors[i]),
            None => break,
        }
    }

    centroids
}

/// Fit k-means to `vectors`.
///
/// Deterministic for identical inputs and seed. The effective k never exceeds
/// the number of distinct vectors; an empty input gives an empty model.
pub fn fit(
    vectors: &[FeatureVector],
    k: usize,
    max_iter: usize,
    tolerance: f64,
    seed: u64,
    built_at: DateTime<Utc>,
) -> ClusterModel {
    let k = k.min(distinct_count(vectors));
    if k == 0 {
        return ClusterModel {
            model_id: model_id(seed, &[]),
            k: 0,
            seed,
            centroids: Vec::new(),
            assignments: Vec::new(),
            iterations: 0,
            converged: true,
            built_at,
        };
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = init_centroids(vectors, k, &mut rng);
    let k = centroids.len();

    let mut assignments = vec![0usize; vectors.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iter {
        iterations += 1;

        for (i, v) in vectors.iter().enumerate() {
            assignments[i] = nearest(v, &centroids).unwrap_or(0);
        }

        let mut sums = vec![[0.0; FEATURE_DIM]; k];
        let mut counts = vec![0usize; k];
        for (v, &a) in vectors.iter().zip(assignments.iter()) {
            counts[a] += 1;
            for (s, x) in sums[a].iter_mut().zip(v.iter()) {
                *s += x;
            }
        }

        let mut max_shift = 0.0f64;
        for (j, centroid) in centroids.iter_mut().enumerate() {
            // Empty clusters keep their centroid.
            if counts[j] == 0 {
                continue;
            }
            let mut updated = sums[j];
            for x in updated.iter_mut() {
                *x /= counts[j] as f64;
            }
            max_shift = max_shift.max(squared_distance(centroid, &updated).sqrt());
            *centroid = updated;
        }

        if max_shift <= tolerance {
            converged = true;
            break;
        }
    }

    for (i, v) in vectors.iter().enumerate() {
        assignments[i] = nearest(v, &centroids).unwrap_or(0);
    }

    debug!(
        "k-means fit: {} vectors, k={}, {} iterations, converged={}",
        vectors.len(),
        k,
        iterations,
        converged
    );

    ClusterModel {
        model_id: model_id(seed, &centroids),
        k,
        seed,
        centroids,
        assignments,
        iterations,
        converged,
        built_at,
    }
}

/// Cluster of the nearest centroid, or `None` for an empty model.
pub fn assign(vector: &FeatureVector, model: &ClusterModel) -> Option<u32> {
    nearest(vector, &model.centroids).map(|i| i as u32)
}

/// Builds and serves signal pattern clusters.
pub struct PatternClusterer {
    store: Arc<SqliteStore>,
    config: ClusterConfig,
}

impl PatternClusterer {
    pub fn new(store: Arc<SqliteStore>, config: ClusterConfig) -> Self {
        Self { store, config }
    }

    pub fn build_feature_vector(&self, signal: &Signal, outcome: &Outcome) -> FeatureVector {
        feature_vector(
            signal,
            outcome,
            self.config.reference_horizon,
            self.config.move_threshold_pct,
        )
    }

    /// Fit with the configured iteration cap and tolerance.
    pub fn fit(&self, vectors: &[FeatureVector], k: usize, seed: u64) -> ClusterModel {
        fit(
            vectors,
            k,
            self.config.max_iter,
            self.config.tolerance,
            seed,
            Utc::now(),
        )
    }

    /// Refit on resolved history and replace the stored clusters.
    ///
    /// Empty `signal_types` means every type. When no signal qualifies the
    /// stored clusters are left in place.
    pub fn rebuild(
        &self,
        signal_types: &[String],
        since: Option<DateTime<Utc>>,
        cancel: &CancelFlag,
    ) -> Result<Vec<ClusterAssignment>, ClusterError> {
        let reference = self.config.reference_horizon;
        let history = self.store.resolved_history(&HistoryQuery {
            signal_types: signal_types.to_vec(),
            start: since,
            end: None,
            include_partial: true,
            resolved_horizon: Some(reference),
        })?;

        if cancel.is_cancelled() {
            return Err(ClusterError::Cancelled);
        }
        if history.is_empty() {
            warn!("No resolved signals to cluster; keeping current clusters");
            return Ok(Vec::new());
        }

        let vectors: Vec<FeatureVector> = history
            .iter()
            .map(|(signal, outcome)| self.build_feature_vector(signal, outcome))
            .collect();

        let model = self.fit(&vectors, self.config.kmeans_k, self.config.kmeans_seed);

        if cancel.is_cancelled() {
            return Err(ClusterError::Cancelled);
        }

        let mut members = vec![0u32; model.k];
        let mut successes = vec![0u32; model.k];
        let mut labels = Vec::with_capacity(history.len());
        for ((signal, outcome), &cluster) in history.iter().zip(model.assignments.iter()) {
            members[cluster] += 1;
            if outcome.return_pct(reference).is_some_and(|r| r > 0.0) {
                successes[cluster] += 1;
            }
            labels.push((signal.id.clone(), cluster as u32));
        }

        let clusters: Vec<ClusterAssignment> = model
            .centroids
            .iter()
            .enumerate()
            .map(|(j, centroid)| ClusterAssignment {
                cluster_id: j as u32,
                model_id: model.model_id.clone(),
                centroid: centroid.to_vec(),
                member_count: members[j],
                success_count: successes[j],
                success_rate: ClusterAssignment::rate(successes[j], members[j]),
                last_built_at: model.built_at,
            })
            .collect();

        self.store.replace_clusters(&clusters, &labels)?;
        info!(
            "Rebuilt {} clusters from {} signals (model {})",
            clusters.len(),
            vectors.len(),
            model.model_id
        );
        Ok(clusters)
    }

    pub fn get_clusters(&self) -> Result<Vec<ClusterAssignment>, ClusterError> {
        Ok(self.store.list_clusters()?)
    }

    /// Assign a signal to the stored model without moving any centroid.
    ///
    /// The label and cluster counts are only written once the reference
    /// horizon has a return.
    pub fn label_signal(
        &self,
        signal: &Signal,
        outcome: &Outcome,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, ClusterError> {
        let clusters = self.store.list_clusters()?;
        if clusters.is_empty() {
            return Ok(None);
        }

        let centroids = clusters
            .iter()
            .map(|c| {
                <FeatureVector>::try_from(c.centroid.as_slice())
                    .map_err(|_| ClusterError::Dimension(c.centroid.len()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let vector = self.build_feature_vector(signal, outcome);
        let Some(index) = nearest(&vector, &centroids) else {
            return Ok(None);
        };
        let cluster = &clusters[index];

        if let Some(ret) = outcome.return_pct(self.config.reference_horizon) {
            self.store.record_cluster_label(
                &signal.id,
                cluster.cluster_id,
                &cluster.model_id,
                ret > 0.0,
                now,
            )?;
        }
        Ok(Some(cluster.cluster_id))
    }
}
