// =============================================================================
// Station Tracker - Gate for DX callsign lookups
// =============================================================================
//
// WSJT-X broadcasts STATUS at a steady rate whether or not anything changed.
// The tracker remembers the last DX call it saw so the lookup service is
// only hit once per change of the selected station.
//
// Owned by the receive worker; nothing else mutates it.

/// Remembers the last DX call observed in a STATUS message.
#[derive(Debug, Default)]
pub struct StationTracker {
    last_dx_call: Option<String>,
}

impl StationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `dx_call` as the latest value and report whether it is a change
    /// worth looking up.
    ///
    /// The stored value is replaced on every call, absent included, so a call
    /// that comes back after an absent one triggers again. Comparison is exact
    /// and case-sensitive.
    pub fn should_lookup(&mut self, dx_call: Option<&str>) -> bool {
        let changed = match dx_call {
            Some(call) => self.last_dx_call.as_deref() != Some(call),
            None => false,
        };

        if changed {
            log::debug!("DX call changed: {:?} -> {:?}", self.last_dx_call, dx_call);
        }
        self.last_dx_call = dx_call.map(str::to_string);
        changed
    }
}
