use flow_events::EventTable;

/// Derived data for one gate: its transformed parameter table, one inclusion flag per
/// source event, and whether the gate has been computed.
///
/// Flags start at 1 and are only rewritten by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GateState {
    table: EventTable,
    flags: Vec<u8>,
    applied: bool,
}

impl GateState {
    pub(crate) fn new(table: EventTable, number_of_events: usize) -> Self {
        Self {
            table,
            flags: vec![1; number_of_events],
            applied: false,
        }
    }

    pub(crate) fn from_parts(table: EventTable, flags: Vec<u8>, applied: bool) -> Self {
        Self { table, flags, applied }
    }

    /// The gate's dimensions followed by its clustering parameters, transformed
    pub fn table(&self) -> &EventTable {
        &self.table
    }

    /// One byte per source event: 1 = included, 0 = excluded
    pub fn flags(&self) -> &[u8] {
        &self.flags
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn is_included(&self, event: usize) -> bool {
        self.flags.get(event).is_some_and(|&f| f != 0)
    }

    /// Number of included events
    pub fn included_count(&self) -> usize {
        bytecount::count(&self.flags, 1)
    }

    pub(crate) fn apply(&mut self, flags: Vec<u8>) {
        self.flags = flags;
        self.applied = true;
    }

    pub(crate) fn reset(&mut self) {
        self.flags.fill(1);
        self.applied = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_events::NumericWidth;

    #[test]
    fn test_new_state_includes_everything() {
        let state = GateState::new(EventTable::new(NumericWidth::Float, 4), 4);
        assert_eq!(state.flags(), &[1, 1, 1, 1]);
        assert!(!state.is_applied());
        assert_eq!(state.included_count(), 4);
    }

    #[test]
    fn test_apply_and_reset() {
        let mut state = GateState::new(EventTable::new(NumericWidth::Double, 3), 3);
        state.apply(vec![0, 1, 0]);
        assert!(state.is_applied());
        assert!(state.is_included(1));
        assert!(!state.is_included(2));
        assert!(!state.is_included(7));
        assert_eq!(state.included_count(), 1);

        state.reset();
        assert!(!state.is_applied());
        assert_eq!(state.included_count(), 3);
    }
}
