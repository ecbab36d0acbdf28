use crate::config::DafiConfig;
use crate::error::{GatingError, Result};
use crate::state::GateState;
use flow_events::{ColumnSelection, EventTable};
use flow_gates::{Gate, GateId, GateTrees};
use tracing::{debug, info};

/// One source event table, the gate trees that classify it, and one [`GateState`]
/// per gate, kept consistent with each other.
///
/// States are indexed by [`GateId`]. The engine borrows the cache mutably and writes
/// only the states of the gates it computes. Once a gate is applied the cache also
/// records the clustering configuration it was gated with, and keeps it until reset.
#[derive(Debug, Clone, PartialEq)]
pub struct GatingCache {
    source: EventTable,
    trees: GateTrees,
    states: Vec<GateState>,
    config: Option<DafiConfig>,
}

impl GatingCache {
    /// Bind a source table to gate trees, deriving each gate's transformed table
    /// # Errors
    /// Returns an error if a gate names a parameter the source table does not have
    pub fn new(source: EventTable, trees: GateTrees) -> Result<Self> {
        let states = trees
            .iter()
            .map(|(id, gate)| {
                let table = gate_table(&source, &trees, gate)
                    .map_err(|e| e.with_gate(id, gate))?;
                Ok(GateState::new(table, source.number_of_events()))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Built gating cache: {} events, {} parameters, {} gates",
            source.number_of_events(),
            source.number_of_parameters(),
            states.len()
        );
        Ok(Self {
            source,
            trees,
            states,
            config: None,
        })
    }

    /// Reassemble a cache from stored parts, checking they still agree
    pub(crate) fn from_parts(
        source: EventTable,
        trees: GateTrees,
        states: Vec<GateState>,
        config: Option<DafiConfig>,
    ) -> Result<Self> {
        if states.len() != trees.number_of_gates() {
            return Err(GatingError::format(format!(
                "{} gate states for {} gates",
                states.len(),
                trees.number_of_gates()
            )));
        }
        let events = source.number_of_events();
        for ((id, gate), state) in trees.iter().zip(&states) {
            if state.flags().len() != events {
                return Err(GatingError::format(format!(
                    "gate {id} has {} flags for {events} events",
                    state.flags().len()
                )));
            }
            let expected = gate.all_parameters().map(|d| &*d.parameter);
            if !expected.eq(state.table().parameter_names()) {
                return Err(GatingError::format(format!(
                    "gate {id} table does not match the gate's parameters"
                )));
            }
        }
        if config.is_none() && states.iter().any(GateState::is_applied) {
            return Err(GatingError::format(
                "applied gates without a recorded clustering configuration",
            ));
        }
        debug!("Reassembled gating cache with {} gates", states.len());
        Ok(Self {
            source,
            trees,
            states,
            config,
        })
    }

    pub fn source(&self) -> &EventTable {
        &self.source
    }

    pub fn trees(&self) -> &GateTrees {
        &self.trees
    }

    pub fn state(&self, id: GateId) -> Option<&GateState> {
        self.states.get(id.index())
    }

    pub(crate) fn state_mut(&mut self, id: GateId) -> Option<&mut GateState> {
        self.states.get_mut(id.index())
    }

    /// States in [`GateId`] order
    pub fn states(&self) -> &[GateState] {
        &self.states
    }

    pub fn number_of_events(&self) -> usize {
        self.source.number_of_events()
    }

    pub fn is_any_applied(&self) -> bool {
        self.states.iter().any(GateState::is_applied)
    }

    /// Configuration the applied gates were computed with; `None` until a gate is applied
    pub fn clustering_config(&self) -> Option<&DafiConfig> {
        self.config.as_ref()
    }

    pub(crate) fn record_config(&mut self, config: &DafiConfig) {
        if self.config.as_ref() != Some(config) {
            self.config = Some(config.clone());
        }
    }

    /// Mark every gate unapplied and include every event again
    pub fn reset(&mut self) {
        self.states.iter_mut().for_each(GateState::reset);
        self.config = None;
    }
}

/// The gate's dimensions then its clustering parameters, each through its transform
fn gate_table(source: &EventTable, trees: &GateTrees, gate: &Gate) -> Result<EventTable> {
    let selections = gate
        .all_parameters()
        .map(|dimension| {
            Ok(ColumnSelection {
                parameter: source.require_parameter(&dimension.parameter)?,
                transform: dimension.transform.and_then(|t| trees.transform(t)),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if selections.is_empty() {
        return Ok(EventTable::new(source.width(), source.number_of_events()));
    }
    Ok(source.select_transformed(&selections)?)
}

impl GatingError {
    fn with_gate(self, id: GateId, gate: &Gate) -> Self {
        match self {
            Self::Event(err) => Self::invalid_argument(format!("gate {id} '{}': {err}", gate.label())),
            other => other,
        }
    }
}
