use std::collections::HashSet;

/// Trace ids known to originate from the observing session.
///
/// Once any id has been marked, every other id counts as remote. Before that
/// nothing is known and [`LocalTraces::is_local`] answers `None`.
#[derive(Debug, Clone, Default)]
pub struct LocalTraces {
    ids: HashSet<String>,
}

impl LocalTraces {
    pub fn track(&mut self, trace_id: impl Into<String>) {
        self.ids.insert(trace_id.into());
    }

    pub fn is_local(&self, trace_id: &str) -> Option<bool> {
        if self.ids.is_empty() {
            None
        } else {
            Some(self.ids.contains(trace_id))
        }
    }
}
