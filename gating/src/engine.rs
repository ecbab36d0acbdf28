use crate::cache::GatingCache;
use crate::config::DafiConfig;
use crate::dafi::ClusterGating;
use crate::error::{GatingError, Result};
use crate::manual::{Region, gate_events};
use crate::state::GateState;
use flow_events::{EventValue, NumericWidth};
use flow_gates::{GateId, GatingMethod};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Computes the gate states of a [`GatingCache`] in parent-before-child order.
///
/// The engine borrows the cache mutably for its whole life and writes only the state of
/// the gate being computed. Clustering seeds are derived once per *source parameter*
/// from the master seed, so editing the gate trees never changes another gate's
/// clusters.
///
/// # Example
///
/// ```rust
/// use flow_events::EventTable;
/// use flow_gates::{Gate, GateDimension, GateTrees, RectangleBound};
/// use flow_gating::{GatingCache, GatingEngine};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let events = EventTable::from_columns(["X"], vec![vec![0.0f32, 5.0, 10.0, 15.0, 20.0]])?;
/// let mut trees = GateTrees::new();
/// let root = trees.add_root_gate(Gate::rectangle(
///     vec![GateDimension::new("X")],
///     vec![RectangleBound::new(Some(4.0), Some(16.0))],
/// )?)?;
///
/// let mut cache = GatingCache::new(events, trees)?;
/// GatingEngine::new(&mut cache)?.gate_all()?;
/// assert_eq!(cache.state(root).unwrap().flags(), &[0, 1, 1, 1, 0]);
/// # Ok(())
/// # }
/// ```
pub struct GatingEngine<'a> {
    cache: &'a mut GatingCache,
    config: DafiConfig,
    seeds: Vec<u64>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> GatingEngine<'a> {
    /// Engine with the configuration the cache was gated with, or the default one
    /// # Errors
    /// Returns `GatingError::InvalidArgument` unless the cache holds exactly one gate tree
    /// made only of rectangle and polygon gates
    pub fn new(cache: &'a mut GatingCache) -> Result<Self> {
        let config = cache.clustering_config().cloned().unwrap_or_default();
        Self::with_config(cache, config)
    }

    /// # Errors
    /// As [`new`](Self::new), if the configuration is invalid, and if gates are already
    /// applied with a different configuration
    pub fn with_config(cache: &'a mut GatingCache, config: DafiConfig) -> Result<Self> {
        config.validate()?;
        if let Some(recorded) = cache.clustering_config().filter(|_| cache.is_any_applied()) {
            if *recorded != config {
                return Err(GatingError::invalid_argument(format!(
                    "cache was gated with {recorded:?}; reset it before gating with {config:?}"
                )));
            }
        }
        validate_trees(cache)?;
        let seeds = derive_seeds(config.seed, cache.source().number_of_parameters());
        Ok(Self {
            cache,
            config,
            seeds,
            cancel: None,
        })
    }

    pub fn cache(&self) -> &GatingCache {
        &*self.cache
    }

    pub fn config(&self) -> &DafiConfig {
        &self.config
    }

    /// One seed per source parameter, in table order
    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    pub fn parameter_seed(&self, name: &str) -> Option<u64> {
        self.cache
            .source()
            .find_parameter(name)
            .and_then(|index| self.seeds.get(index).copied())
    }

    /// Replace the clustering configuration, re-deriving seeds when the master seed changes
    /// # Errors
    /// Returns `GatingError::InvalidArgument` once any gate has been applied, or if the
    /// configuration is invalid
    pub fn set_config(&mut self, config: DafiConfig) -> Result<()> {
        if self.cache.is_any_applied() {
            return Err(GatingError::invalid_argument(
                "clustering configuration cannot change after gating has started",
            ));
        }
        config.validate()?;
        if config.seed != self.config.seed {
            self.seeds = derive_seeds(config.seed, self.seeds.len());
        }
        self.config = config;
        Ok(())
    }

    /// # Errors
    /// See [`set_config`](Self::set_config)
    pub fn set_cluster_count(&mut self, cluster_count: usize) -> Result<()> {
        self.set_config(DafiConfig {
            cluster_count,
            ..self.config.clone()
        })
    }

    /// # Errors
    /// See [`set_config`](Self::set_config)
    pub fn set_iterations(&mut self, iterations: usize) -> Result<()> {
        self.set_config(DafiConfig {
            iterations,
            ..self.config.clone()
        })
    }

    /// # Errors
    /// See [`set_config`](Self::set_config)
    pub fn set_seed(&mut self, seed: u64) -> Result<()> {
        self.set_config(DafiConfig {
            seed,
            ..self.config.clone()
        })
    }

    /// Install a flag that stops the run before the next gate or clustering iteration
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Mark every gate unapplied so the next run recomputes everything
    pub fn reset(&mut self) {
        self.cache.reset();
    }

    /// Compute every gate, parents before children
    /// # Errors
    /// Returns the first error raised by [`gate`](Self::gate)
    pub fn gate_all(&mut self) -> Result<()> {
        self.gate_all_with_progress(|_, _, _| {})
    }

    /// As [`gate_all`](Self::gate_all), calling `progress(gate, done, total)` after each gate
    /// # Errors
    /// Returns the first error raised by [`gate`](Self::gate)
    pub fn gate_all_with_progress<F>(&mut self, mut progress: F) -> Result<()>
    where
        F: FnMut(GateId, usize, usize),
    {
        let order = self.cache.trees().find_descendant_gates();
        let total = order.len();
        info!(
            "Gating {} events through {total} gates (K = {}, {} iterations, seed {})",
            self.cache.number_of_events(),
            self.config.cluster_count,
            self.config.iterations,
            self.config.seed
        );
        for (done, id) in order.into_iter().enumerate() {
            self.gate(id)?;
            progress(id, done + 1, total);
        }
        Ok(())
    }

    /// Compute one gate. Gating an applied gate does nothing.
    /// # Errors
    /// Returns `GatingError::InvalidArgument` if the gate's parent has not been applied,
    /// `GatingError::Cancelled` if the cancellation flag is raised, or a hierarchy error
    /// for an unknown gate
    pub fn gate(&mut self, id: GateId) -> Result<()> {
        let trees = self.cache.trees();
        let gate = trees.require_gate(id)?;
        if let Some(parent) = trees.parent(id) {
            if !self.cache.state(parent).is_some_and(GateState::is_applied) {
                return Err(GatingError::invalid_argument(format!(
                    "gate {id} '{}' cannot be gated before its parent {parent}",
                    gate.label()
                )));
            }
        }
        let state = self.state(id)?;
        if state.is_applied() {
            debug!("Gate {id} is already applied");
            return Ok(());
        }
        if self.is_cancelled() {
            warn!("Gating cancelled before gate {id}");
            return Err(GatingError::Cancelled);
        }

        let flags = match state.table().width() {
            NumericWidth::Float => self.compute::<f32>(id)?,
            NumericWidth::Double => self.compute::<f64>(id)?,
        };
        let state = self
            .cache
            .state_mut(id)
            .ok_or_else(|| GatingError::invalid_argument(format!("gate {id} has no state")))?;
        state.apply(flags);
        debug!(
            "Gate {id}: {} of {} events included",
            state.included_count(),
            state.flags().len()
        );
        self.cache.record_config(&self.config);
        Ok(())
    }

    fn state(&self, id: GateId) -> Result<&GateState> {
        self.cache
            .state(id)
            .ok_or_else(|| GatingError::invalid_argument(format!("gate {id} has no state")))
    }

    fn compute<T: EventValue>(&self, id: GateId) -> Result<Vec<u8>> {
        let cache = &*self.cache;
        let events = cache.number_of_events();
        if events == 0 {
            return Ok(Vec::new());
        }
        let gate = cache.trees().require_gate(id)?;
        let table = self.state(id)?.table();
        let parent = cache
            .trees()
            .parent(id)
            .and_then(|p| cache.state(p))
            .map(GateState::flags);
        let region = Region::<T>::from_gate(gate)?;

        match gate.method {
            GatingMethod::EventValue => {
                let columns = table.typed_columns::<T>().ok_or_else(|| {
                    GatingError::invalid_argument(format!("gate {id} table is not stored as {}", T::WIDTH))
                })?;
                Ok(gate_events(&region, columns, events, parent))
            }
            GatingMethod::ClusterCentroid => {
                let seeds = gate
                    .all_parameters()
                    .map(|dimension| {
                        self.parameter_seed(&dimension.parameter).ok_or_else(|| {
                            GatingError::from(flow_events::EventError::ParameterNotFound(
                                dimension.parameter.to_string(),
                            ))
                        })
                    })
                    .collect::<Result<Vec<u64>>>()?;
                ClusterGating {
                    region: &region,
                    dimensions: gate.dimensions.len(),
                    table,
                    seeds: &seeds,
                    parent,
                    config: &self.config,
                    cancel: self.cancel.as_deref(),
                }
                .run()
            }
        }
    }
}

/// One seed per source parameter drawn from a generator seeded with `master`
fn derive_seeds(master: u64, parameters: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(master);
    (0..parameters).map(|_| rng.next_u64()).collect()
}

fn validate_trees(cache: &GatingCache) -> Result<()> {
    let trees = cache.trees();
    if trees.roots().len() != 1 {
        return Err(GatingError::invalid_argument(format!(
            "gating needs exactly one root gate, found {}",
            trees.roots().len()
        )));
    }
    for (id, gate) in trees.iter() {
        if !gate.shape.is_supported() {
            return Err(GatingError::invalid_argument(format!(
                "gate {id} '{}' is a {} gate, which cannot be evaluated",
                gate.label(),
                gate.shape.kind()
            )));
        }
    }
    Ok(())
}
