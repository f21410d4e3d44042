use std::collections::HashMap;

use crate::agents::fan_out::AllTerminated;
use crate::agents::{AgentRole, Delta};

/// Final text per fan-out agent. Only obtainable once every task has reached
/// a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedResult {
    texts: HashMap<AgentRole, String>,
}

impl AggregatedResult {
    /// Text of `role`, or the empty string when it failed or never ran.
    pub fn text(&self, role: AgentRole) -> &str {
        self.texts.get(&role).map(String::as_str).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.texts.values().all(|text| text.is_empty())
    }
}

#[derive(Debug, Default)]
struct Entry {
    text: String,
    sealed: bool,
}

/// Concatenates deltas per agent in arrival order.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    entries: HashMap<AgentRole, Entry>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, delta: &Delta) {
        let entry = self.entries.entry(delta.agent).or_default();
        if entry.sealed {
            log::debug!("Ignoring delta for sealed agent {}", delta.agent);
            return;
        }
        entry.text.push_str(&delta.text);
        if delta.is_final {
            entry.sealed = true;
        }
    }

    /// Records a failed task: its contribution becomes the empty string.
    pub fn fail(&mut self, role: AgentRole) {
        let entry = self.entries.entry(role).or_default();
        entry.text.clear();
        entry.sealed = true;
    }

    pub fn finalize(self, _barrier: AllTerminated) -> AggregatedResult {
        let texts = self
            .entries
            .into_iter()
            .filter(|(_, entry)| entry.sealed)
            .map(|(role, entry)| (role, entry.text))
            .collect();
        AggregatedResult { texts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fan_out::DoneTracker;

    fn barrier(roles: &[AgentRole]) -> AllTerminated {
        let mut tracker = DoneTracker::new(roles.iter().copied());
        for role in roles {
            tracker.mark_done(*role);
        }
        tracker.barrier().unwrap()
    }

    #[test]
    fn test_concatenates_in_arrival_order() {
        let mut aggregator = ResultAggregator::new();
        aggregator.observe(&Delta::partial(AgentRole::CriticalAnalyst, "Risk: "));
        aggregator.observe(&Delta::partial(AgentRole::PositiveAdvocate, "Benefit: "));
        aggregator.observe(&Delta::partial(AgentRole::CriticalAnalyst, "coupling issues"));
        aggregator.observe(&Delta::partial(AgentRole::PositiveAdvocate, "scalability"));
        aggregator.observe(&Delta::terminal(AgentRole::CriticalAnalyst));
        aggregator.observe(&Delta::terminal(AgentRole::PositiveAdvocate));

        let result = aggregator.finalize(barrier(&AgentRole::FAN_OUT));
        assert_eq!(result.text(AgentRole::CriticalAnalyst), "Risk: coupling issues");
        assert_eq!(result.text(AgentRole::PositiveAdvocate), "Benefit: scalability");
    }

    #[test]
    fn test_unsealed_agent_is_not_populated() {
        let mut aggregator = ResultAggregator::new();
        aggregator.observe(&Delta::partial(AgentRole::CriticalAnalyst, "half"));

        let result = aggregator.finalize(barrier(&[AgentRole::CriticalAnalyst]));
        assert!(!result.texts.contains_key(&AgentRole::CriticalAnalyst));
        assert_eq!(result.text(AgentRole::CriticalAnalyst), "");
    }

    #[test]
    fn test_failed_agent_contributes_empty_string() {
        let mut aggregator = ResultAggregator::new();
        aggregator.observe(&Delta::partial(AgentRole::PositiveAdvocate, "partial text"));
        aggregator.fail(AgentRole::PositiveAdvocate);
        aggregator.observe(&Delta::partial(AgentRole::PositiveAdvocate, "late"));

        let result = aggregator.finalize(barrier(&[AgentRole::PositiveAdvocate]));
        assert!(result.texts.contains_key(&AgentRole::PositiveAdvocate));
        assert_eq!(result.text(AgentRole::PositiveAdvocate), "");
        assert!(result.is_empty());
    }
}
