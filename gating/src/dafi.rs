//! Cluster-centroid (DAFi) gating.
//!
//! Parent-included events are clustered with Lloyd's algorithm over the gate's
//! dimensions and clustering parameters, each normalized to `[0, 1]` by its best
//! range. Each iteration assigns events to their nearest centroid and then moves every
//! centroid to the mean of its members; events keep the last assignment and the
//! centroids after the last move are the ones classified. Centroids are classified
//! against the gate's region in native units and every event takes the classification
//! of its cluster.
//!
//! Seeding uses one generator per parameter so a gate's clusters depend only on the
//! parameters it uses. Assignment is parallel over events and reduction is parallel
//! over parameters with a fixed summation order, so results do not depend on the
//! number of threads.

use crate::config::DafiConfig;
use crate::error::{GatingError, Result};
use crate::manual::Region;
use flow_events::{EventTable, EventValue, ParameterInfo};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Assignment of events that their parent excludes (or that cannot be placed)
pub(crate) const NO_CLUSTER: usize = usize::MAX;

/// Affine map between a parameter's best range and `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scale {
    min: f64,
    span: f64,
}

impl Scale {
    fn of(info: &ParameterInfo) -> Self {
        let min = info.best_min();
        let span = info.best_max() - min;
        Self {
            min,
            span: if span == 0.0 || !span.is_finite() { 1.0 } else { span },
        }
    }

    #[inline]
    fn normalize(&self, value: f64) -> f64 {
        (value - self.min) / self.span
    }

    #[inline]
    fn denormalize(&self, value: f64) -> f64 {
        value * self.span + self.min
    }
}

/// Inputs for clustering one gate
pub(crate) struct ClusterGating<'a, T> {
    pub region: &'a Region<T>,
    /// Number of leading table columns that are gate dimensions
    pub dimensions: usize,
    pub table: &'a EventTable,
    /// One seed per table column
    pub seeds: &'a [u64],
    pub parent: Option<&'a [u8]>,
    pub config: &'a DafiConfig,
    pub cancel: Option<&'a AtomicBool>,
}

impl<T: EventValue> ClusterGating<'_, T> {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Cluster, classify the centroids, and return one flag per event
    /// # Errors
    /// Returns `GatingError::Cancelled` if the cancellation flag is raised between
    /// iterations
    pub fn run(&self) -> Result<Vec<u8>> {
        let events = self.table.number_of_events();
        if events == 0 {
            return Ok(Vec::new());
        }
        let columns = self.table.typed_columns::<T>().ok_or_else(|| {
            GatingError::invalid_argument(format!("gate table is not stored as {}", T::WIDTH))
        })?;
        if self.seeds.len() != columns.len() {
            return Err(GatingError::invalid_argument(format!(
                "{} seeds for {} clustering parameters",
                self.seeds.len(),
                columns.len()
            )));
        }

        let scales: Vec<Scale> = self.table.parameters().iter().map(Scale::of).collect();
        let normalized: Vec<Vec<f64>> = columns
            .par_iter()
            .zip(scales.par_iter())
            .map(|(column, scale)| column.iter().map(|v| scale.normalize(v.to_f64())).collect())
            .collect();

        let mut centroids = seed_centroids(&normalized, self.seeds, self.config.cluster_count);
        let mut assignments = vec![NO_CLUSTER; events];
        for _ in 0..self.config.iterations {
            if self.is_cancelled() {
                return Err(GatingError::Cancelled);
            }
            assign(&normalized, &centroids, self.parent, &mut assignments);
            update(&normalized, &assignments, &mut centroids);
        }

        let included = self.classify(&centroids, &scales);
        debug!(
            "Clustered {events} events into {} clusters, {} inside the gate",
            self.config.cluster_count,
            included.iter().filter(|&&inside| inside).count()
        );
        Ok(assignments
            .par_iter()
            .map(|&cluster| u8::from(cluster != NO_CLUSTER && included[cluster]))
            .collect())
    }

    /// Un-normalize each centroid along the gate dimensions and test it
    fn classify(&self, centroids: &[Vec<f64>], scales: &[Scale]) -> Vec<bool> {
        (0..self.config.cluster_count)
            .map(|cluster| {
                let point: Vec<T> = centroids
                    .iter()
                    .zip(scales)
                    .take(self.dimensions)
                    .map(|(centroid, scale)| T::from_f64(scale.denormalize(centroid[cluster])))
                    .collect();
                self.region.contains(&point)
            })
            .collect()
    }
}

/// Per parameter, a fresh generator picks `k` events whose values seed that coordinate.
/// Laid out parameter-major: `centroids[parameter][cluster]`.
///
/// Indices are drawn over every event, parent-excluded ones included, so the draws do
/// not depend on the parent. A centroid seeded from a NaN value never gains members and
/// keeps classifying as excluded.
fn seed_centroids(normalized: &[Vec<f64>], seeds: &[u64], k: usize) -> Vec<Vec<f64>> {
    normalized
        .iter()
        .zip(seeds)
        .map(|(values, &seed)| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..k).map(|_| values[rng.random_range(0..values.len())]).collect()
        })
        .collect()
}

/// Nearest centroid by squared distance, lowest index on ties
fn assign(normalized: &[Vec<f64>], centroids: &[Vec<f64>], parent: Option<&[u8]>, assignments: &mut [usize]) {
    let k = centroids.first().map_or(0, Vec::len);
    assignments.par_iter_mut().enumerate().for_each(|(event, assignment)| {
        if parent.is_some_and(|flags| flags[event] == 0) {
            *assignment = NO_CLUSTER;
            return;
        }
        let mut best = NO_CLUSTER;
        let mut best_distance = f64::INFINITY;
        for cluster in 0..k {
            let distance: f64 = normalized
                .iter()
                .zip(centroids)
                .map(|(values, centroid)| {
                    let delta = values[event] - centroid[cluster];
                    delta * delta
                })
                .sum();
            if distance < best_distance {
                best = cluster;
                best_distance = distance;
            }
        }
        *assignment = best;
    });
}

/// Move each centroid to the mean of its members; empty clusters stay put
fn update(normalized: &[Vec<f64>], assignments: &[usize], centroids: &mut [Vec<f64>]) {
    let k = centroids.first().map_or(0, Vec::len);
    let mut counts = vec![0usize; k];
    for &cluster in assignments {
        if cluster != NO_CLUSTER {
            counts[cluster] += 1;
        }
    }

    centroids
        .par_iter_mut()
        .zip(normalized.par_iter())
        .for_each(|(centroid, values)| {
            let mut sums = vec![0.0f64; k];
            for (&cluster, &value) in assignments.iter().zip(values) {
                if cluster != NO_CLUSTER {
                    sums[cluster] += value;
                }
            }
            for ((coordinate, sum), &count) in centroid.iter_mut().zip(sums).zip(&counts) {
                if count > 0 {
                    *coordinate = sum / count as f64;
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use flow_gates::{Gate, GateDimension, RectangleBound};

    fn table(x: Vec<f64>, y: Vec<f64>) -> EventTable {
        EventTable::from_columns(["X", "Y"], vec![x, y]).unwrap()
    }

    fn rectangle(x: (f64, f64), y: (f64, f64)) -> Region<f64> {
        let gate = Gate::rectangle(
            vec![GateDimension::new("X"), GateDimension::new("Y")],
            vec![
                RectangleBound::new(Some(x.0), Some(x.1)),
                RectangleBound::new(Some(y.0), Some(y.1)),
            ],
        )
        .unwrap();
        Region::from_gate(&gate).unwrap()
    }

    #[test]
    fn test_zero_span_normalizes_with_unit_span() {
        let mut info = ParameterInfo::new("X");
        info.data_min = 3.0;
        info.data_max = 3.0;
        let scale = Scale::of(&info);
        assert_relative_eq!(scale.span, 1.0);
        assert_relative_eq!(scale.normalize(3.0), 0.0);
        assert_relative_eq!(scale.denormalize(0.5), 3.5);
    }

    #[test]
    fn test_specified_range_is_preferred() {
        let info = ParameterInfo::new("X").with_specified_range(Some(0.0), Some(1024.0));
        let scale = Scale::of(&info);
        assert_relative_eq!(scale.normalize(512.0), 0.5);
    }

    #[test]
    fn test_single_cluster_follows_the_mean() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![5.0, 4.0, 3.0, 2.0, 1.0];
        let table = table(x, y);
        let config = DafiConfig {
            cluster_count: 1,
            iterations: 3,
            seed: 1,
        };

        // the mean (3, 3) is inside even though most events are not
        let region = rectangle((2.5, 3.5), (2.5, 3.5));
        let flags = ClusterGating {
            region: &region,
            dimensions: 2,
            table: &table,
            seeds: &[11, 12],
            parent: None,
            config: &config,
            cancel: None,
        }
        .run()
        .unwrap();
        assert_eq!(flags, vec![1, 1, 1, 1, 1]);

        let region = rectangle((3.5, 10.0), (0.0, 10.0));
        let parent = [1u8, 1, 1, 1, 0];
        let flags = ClusterGating {
            region: &region,
            dimensions: 2,
            table: &table,
            seeds: &[11, 12],
            parent: Some(&parent),
            config: &config,
            cancel: None,
        }
        .run()
        .unwrap();
        assert_eq!(flags, vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_two_populations_separate() {
        let mut x = vec![1.0; 50];
        x.extend(vec![9.0; 50]);
        let mut y = vec![1.0; 50];
        y.extend(vec![9.0; 50]);
        let table = table(x, y);
        let config = DafiConfig {
            cluster_count: 16,
            iterations: 5,
            seed: 1,
        };
        let region = rectangle((5.0, 10.0), (5.0, 10.0));
        let flags = ClusterGating {
            region: &region,
            dimensions: 2,
            table: &table,
            seeds: &[1, 2],
            parent: None,
            config: &config,
            cancel: None,
        }
        .run()
        .unwrap();
        assert!(flags[..50].iter().all(|&f| f == 0));
        assert!(flags[50..].iter().all(|&f| f == 1));
    }

    #[test]
    fn test_iteration_assigns_before_moving_centroids() {
        let x: Vec<f64> = (0..=40).map(f64::from).collect();
        let table = table(x.clone(), vec![0.0; x.len()]);
        let config = DafiConfig {
            cluster_count: 3,
            iterations: 1,
            seed: 1,
        };
        let region = rectangle((-0.5, 19.25), (-1.0, 1.0));
        let scales: Vec<Scale> = table.parameters().iter().map(Scale::of).collect();
        let normalized = vec![
            x.iter().map(|&v| scales[0].normalize(v)).collect::<Vec<_>>(),
            vec![scales[1].normalize(0.0); x.len()],
        ];

        for seed in 0..20u64 {
            let seeds = [seed, seed + 100];
            let mut centroids = seed_centroids(&normalized, &seeds, 3);
            let mut assignments = vec![NO_CLUSTER; x.len()];
            assign(&normalized, &centroids, None, &mut assignments);
            update(&normalized, &assignments, &mut centroids);
            let inside: Vec<bool> = centroids[0]
                .iter()
                .map(|&c| (-0.5..=19.25).contains(&scales[0].denormalize(c)))
                .collect();
            let expected: Vec<u8> = assignments.iter().map(|&c| u8::from(inside[c])).collect();

            let flags = ClusterGating {
                region: &region,
                dimensions: 2,
                table: &table,
                seeds: &seeds,
                parent: None,
                config: &config,
                cancel: None,
            }
            .run()
            .unwrap();
            assert_eq!(flags, expected, "seed {seed}");
        }
    }

    #[test]
    fn test_nan_centroid_gains_no_members() {
        let normalized = vec![vec![f64::NAN, 0.2, 0.4, 0.6, 0.8]];
        let mut centroids = vec![vec![f64::NAN, 0.5]];
        let mut assignments = vec![NO_CLUSTER; 5];
        assign(&normalized, &centroids, None, &mut assignments);
        assert_eq!(assignments, vec![NO_CLUSTER, 1, 1, 1, 1]);
        update(&normalized, &assignments, &mut centroids);
        assert!(centroids[0][0].is_nan());
        assert_relative_eq!(centroids[0][1], 0.5);
    }

    #[test]
    fn test_cancelled_between_iterations() {
        let table = table(vec![1.0, 2.0], vec![1.0, 2.0]);
        let config = DafiConfig::default();
        let region = rectangle((0.0, 10.0), (0.0, 10.0));
        let cancel = AtomicBool::new(true);
        let result = ClusterGating {
            region: &region,
            dimensions: 2,
            table: &table,
            seeds: &[1, 2],
            parent: None,
            config: &config,
            cancel: Some(&cancel),
        }
        .run();
        assert!(matches!(result, Err(GatingError::Cancelled)));
    }

    #[test]
    fn test_reduction_keeps_empty_clusters() {
        let normalized = vec![vec![0.0, 0.2, 1.0]];
        let mut centroids = vec![vec![0.1, 0.5, 0.9]];
        let assignments = vec![0, 0, NO_CLUSTER];
        update(&normalized, &assignments, &mut centroids);
        assert_relative_eq!(centroids[0][0], 0.1);
        assert_relative_eq!(centroids[0][1], 0.5);
        assert_relative_eq!(centroids[0][2], 0.9);
    }

    #[test]
    fn test_ties_go_to_lowest_index() {
        let normalized = vec![vec![0.5]];
        let centroids = vec![vec![0.25, 0.75]];
        let mut assignments = vec![NO_CLUSTER];
        assign(&normalized, &centroids, None, &mut assignments);
        assert_eq!(assignments, vec![0]);
    }
}
