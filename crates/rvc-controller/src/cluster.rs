//! Build cluster distribution
//!
//! Spreads jobs whose template targets one of a declared set of clusters
//! across that whole set. Templates outside every set keep their own cluster.

use crate::config::{BuildClusterDistributionConfig, WeightedCluster};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Policy choosing a build cluster for the next job
pub trait BuildClusterDistribution: Send + Sync {
    /// Cluster belongs to this distribution
    fn contains(&self, cluster: &str) -> bool;

    /// Cluster for the next job
    fn get(&self) -> String;
}

/// Each cluster in turn
#[derive(Debug)]
pub struct RoundRobinClusterDistribution {
    clusters: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobinClusterDistribution {
    /// Create over `clusters` (must be non-empty)
    #[must_use]
    pub fn new(clusters: Vec<String>) -> Self {
        Self {
            clusters,
            next: AtomicUsize::new(0),
        }
    }
}

impl BuildClusterDistribution for RoundRobinClusterDistribution {
    fn contains(&self, cluster: &str) -> bool {
        self.clusters.iter().any(|c| c == cluster)
    }

    fn get(&self) -> String {
        if self.clusters.is_empty() {
            return String::new();
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clusters.len();
        self.clusters[index].clone()
    }
}

/// Smooth weighted round robin
///
/// Over any window of `sum(weights)` picks, each cluster is chosen exactly
/// `weight` times, interleaved rather than in bursts.
#[derive(Debug)]
pub struct WeightedClusterDistribution {
    clusters: Vec<WeightedCluster>,
    current: Mutex<Vec<i64>>,
}

impl WeightedClusterDistribution {
    /// Create over `clusters` (must be non-empty with positive weights)
    #[must_use]
    pub fn new(clusters: Vec<WeightedCluster>) -> Self {
        let current = vec![0; clusters.len()];
        Self {
            clusters,
            current: Mutex::new(current),
        }
    }
}

impl BuildClusterDistribution for WeightedClusterDistribution {
    fn contains(&self, cluster: &str) -> bool {
        self.clusters.iter().any(|c| c.name == cluster)
    }

    fn get(&self) -> String {
        let mut current = self.current.lock();
        let total: i64 = self.clusters.iter().map(|c| i64::from(c.weight)).sum();
        let mut best: Option<usize> = None;
        for (i, cluster) in self.clusters.iter().enumerate() {
            current[i] += i64::from(cluster.weight);
            if best.map_or(true, |b| current[i] > current[b]) {
                best = Some(i);
            }
        }
        match best {
            Some(b) => {
                current[b] -= total;
                self.clusters[b].name.clone()
            }
            None => String::new(),
        }
    }
}

/// Build the configured distribution
#[must_use]
pub fn from_config(config: &BuildClusterDistributionConfig) -> Arc<dyn BuildClusterDistribution> {
    match config {
        BuildClusterDistributionConfig::RoundRobin { clusters } => {
            Arc::new(RoundRobinClusterDistribution::new(clusters.clone()))
        }
        BuildClusterDistributionConfig::Weighted { clusters } => {
            Arc::new(WeightedClusterDistribution::new(clusters.clone()))
        }
    }
}
