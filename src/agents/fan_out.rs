use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::agents::{AgentRole, AgentTask, AggregatedResult, Delta, ResultAggregator};
use crate::error::{AgentError, OrchestrationError};

const DEFAULT_BUFFER: usize = 100;

// ============================================================================
// Completion barrier
// ============================================================================

/// Proof that every fan-out task has reached a terminal state.
#[derive(Debug)]
pub struct AllTerminated {
    _private: (),
}

/// Per-task done flags.
#[derive(Debug)]
pub struct DoneTracker {
    flags: HashMap<AgentRole, bool>,
}

impl DoneTracker {
    pub fn new(roles: impl IntoIterator<Item = AgentRole>) -> Self {
        Self {
            flags: roles.into_iter().map(|role| (role, false)).collect(),
        }
    }

    pub fn is_done(&self, role: AgentRole) -> bool {
        self.flags.get(&role).copied().unwrap_or(true)
    }

    /// Returns false if the role was already done or is not tracked.
    pub fn mark_done(&mut self, role: AgentRole) -> bool {
        match self.flags.get_mut(&role) {
            Some(flag) if !*flag => {
                *flag = true;
                true
            }
            _ => false,
        }
    }

    pub fn all_done(&self) -> bool {
        self.flags.values().all(|done| *done)
    }

    pub fn pending(&self) -> Vec<AgentRole> {
        let mut pending: Vec<_> = self
            .flags
            .iter()
            .filter(|(_, done)| !**done)
            .map(|(role, _)| *role)
            .collect();
        pending.sort();
        pending
    }

    pub fn barrier(&self) -> Option<AllTerminated> {
        self.all_done().then_some(AllTerminated { _private: () })
    }
}

// ============================================================================
// Fan-out runner
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub agent: AgentRole,
    pub error: AgentError,
}

#[derive(Debug)]
pub enum FanOutEvent {
    Delta(Delta),
    /// Emitted once, last, after every task is terminal.
    AgentsComplete {
        results: AggregatedResult,
        failures: Vec<TaskFailure>,
    },
}

enum TaskMessage {
    Text { agent: AgentRole, text: String },
    Finished(AgentRole),
    Failed(AgentRole, AgentError),
}

/// Runs agent tasks concurrently and merges their output into one stream.
///
/// Each task is a producer on a shared channel; the returned stream is the
/// only consumer. Dropping the stream aborts every task still running.
#[derive(Debug, Clone)]
pub struct FanOutRunner {
    buffer: usize,
}

impl Default for FanOutRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FanOutRunner {
    pub fn new() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn run(
        &self,
        tasks: Vec<AgentTask>,
    ) -> Result<BoxStream<'static, FanOutEvent>, OrchestrationError> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.role()) {
                return Err(OrchestrationError::DuplicateAgent(task.role()));
            }
        }

        let buffer = self.buffer;
        Ok(Box::pin(async_stream::stream! {
            let (tx, mut rx) = mpsc::channel(buffer);
            let mut tracker = DoneTracker::new(tasks.iter().map(AgentTask::role));
            let mut running = JoinSet::new();

            for task in tasks {
                running.spawn(drive(task, tx.clone()));
            }
            drop(tx);

            let mut aggregator = ResultAggregator::new();
            let mut failures = Vec::new();

            while !tracker.all_done() {
                let Some(message) = rx.recv().await else {
                    break;
                };

                match message {
                    TaskMessage::Text { agent, text } => {
                        if tracker.is_done(agent) {
                            log::warn!("Dropping delta from finished agent {}", agent);
                            continue;
                        }
                        let delta = Delta::partial(agent, text);
                        aggregator.observe(&delta);
                        yield FanOutEvent::Delta(delta);
                    }
                    TaskMessage::Finished(agent) => {
                        if tracker.mark_done(agent) {
                            log::debug!("Agent {} finished", agent);
                            aggregator.observe(&Delta::terminal(agent));
                        }
                    }
                    TaskMessage::Failed(agent, error) => {
                        if tracker.mark_done(agent) {
                            log::warn!("Agent {} failed, continuing without it: {}", agent, error);
                            aggregator.fail(agent);
                            failures.push(TaskFailure { agent, error });
                        }
                    }
                }
            }

            // Producers that vanished without a terminal message panicked.
            for agent in tracker.pending() {
                log::error!("Agent {} ended without a terminal state", agent);
                tracker.mark_done(agent);
                aggregator.fail(agent);
                failures.push(TaskFailure {
                    agent,
                    error: AgentError::Aborted("task ended unexpectedly".to_string()),
                });
            }

            if let Some(barrier) = tracker.barrier() {
                let results = aggregator.finalize(barrier);
                yield FanOutEvent::AgentsComplete { results, failures };
            }
        }))
    }
}

async fn drive(task: AgentTask, tx: mpsc::Sender<TaskMessage>) {
    let agent = task.role();
    let mut stream = task.into_stream();

    while let Some(item) = stream.next().await {
        match item {
            Ok(text) => {
                if tx.send(TaskMessage::Text { agent, text }).await.is_err() {
                    // Consumer gone, stop generating.
                    return;
                }
            }
            Err(error) => {
                let _ = tx.send(TaskMessage::Failed(agent, error)).await;
                return;
            }
        }
    }

    let _ = tx.send(TaskMessage::Finished(agent)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{ScriptedBackend, Step};
    use std::sync::Arc;
    use std::time::Duration;

    fn task(backend: &Arc<ScriptedBackend>, role: AgentRole) -> AgentTask {
        AgentTask::new(backend.clone(), role, "m", "prompt", Duration::from_secs(5))
    }

    fn fan_out_tasks(backend: &Arc<ScriptedBackend>) -> Vec<AgentTask> {
        AgentRole::FAN_OUT.iter().map(|role| task(backend, *role)).collect()
    }

    #[test]
    fn test_tracker_barrier_requires_all() {
        let mut tracker = DoneTracker::new(AgentRole::FAN_OUT);
        assert!(tracker.barrier().is_none());
        assert!(tracker.mark_done(AgentRole::CriticalAnalyst));
        assert!(!tracker.mark_done(AgentRole::CriticalAnalyst));
        assert_eq!(tracker.pending(), vec![AgentRole::PositiveAdvocate]);
        assert!(tracker.barrier().is_none());
        tracker.mark_done(AgentRole::PositiveAdvocate);
        assert!(tracker.barrier().is_some());
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        let tasks = vec![
            task(&backend, AgentRole::CriticalAnalyst),
            task(&backend, AgentRole::CriticalAnalyst),
        ];
        let err = FanOutRunner::new().run(tasks).err().unwrap();
        assert_eq!(err, OrchestrationError::DuplicateAgent(AgentRole::CriticalAnalyst));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_completion_is_last_and_single() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .script(
                    AgentRole::CriticalAnalyst,
                    vec![Step::text("Risk: "), Step::sleep_ms(10), Step::text("coupling issues")],
                )
                .script(
                    AgentRole::PositiveAdvocate,
                    vec![Step::text("Benefit: "), Step::text("scalability")],
                ),
        );

        let events: Vec<_> = FanOutRunner::new()
            .run(fan_out_tasks(&backend))
            .unwrap()
            .collect()
            .await;

        let completions = events
            .iter()
            .filter(|e| matches!(e, FanOutEvent::AgentsComplete { .. }))
            .count();
        assert_eq!(completions, 1);

        let Some(FanOutEvent::AgentsComplete { results, failures }) = events.last() else {
            panic!("AgentsComplete must be the last event");
        };
        assert!(failures.is_empty());
        assert_eq!(results.text(AgentRole::CriticalAnalyst), "Risk: coupling issues");
        assert_eq!(results.text(AgentRole::PositiveAdvocate), "Benefit: scalability");

        // Aggregated text equals the ordered concatenation of forwarded deltas.
        for role in AgentRole::FAN_OUT {
            let forwarded: String = events
                .iter()
                .filter_map(|e| match e {
                    FanOutEvent::Delta(d) if d.agent == role => Some(d.text.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(forwarded, results.text(role));
        }
    }

    #[tokio::test]
    async fn test_fast_agent_is_not_blocked_by_slow_agent() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .script(AgentRole::CriticalAnalyst, vec![Step::sleep_ms(200), Step::text("slow")])
                .script(AgentRole::PositiveAdvocate, vec![Step::text("fast")]),
        );

        let mut stream = FanOutRunner::new().run(fan_out_tasks(&backend)).unwrap();
        let first = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("fast agent output should arrive before the slow agent finishes");

        match first {
            Some(FanOutEvent::Delta(delta)) => {
                assert_eq!(delta.agent, AgentRole::PositiveAdvocate);
                assert_eq!(delta.text, "fast");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_recorded() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .script(
                    AgentRole::CriticalAnalyst,
                    vec![Step::text("half an answer"), Step::fail("model crashed")],
                )
                .script(AgentRole::PositiveAdvocate, vec![Step::text("fine")]),
        );

        let events: Vec<_> = FanOutRunner::new()
            .run(fan_out_tasks(&backend))
            .unwrap()
            .collect()
            .await;

        let Some(FanOutEvent::AgentsComplete { results, failures }) = events.last() else {
            panic!("AgentsComplete must be the last event");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].agent, AgentRole::CriticalAnalyst);
        assert_eq!(results.text(AgentRole::CriticalAnalyst), "");
        assert_eq!(results.text(AgentRole::PositiveAdvocate), "fine");
    }

    #[tokio::test]
    async fn test_all_failed_still_completes() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .script(AgentRole::CriticalAnalyst, vec![Step::unavailable()])
                .script(AgentRole::PositiveAdvocate, vec![Step::unavailable()]),
        );

        let events: Vec<_> = FanOutRunner::new()
            .run(fan_out_tasks(&backend))
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        let FanOutEvent::AgentsComplete { results, failures } = &events[0] else {
            panic!("expected AgentsComplete");
        };
        assert_eq!(failures.len(), 2);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_task_is_recorded_as_aborted() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .script(AgentRole::CriticalAnalyst, vec![Step::text("x"), Step::Panic])
                .script(AgentRole::PositiveAdvocate, vec![Step::text("x"), Step::text("y")]),
        );

        let events: Vec<_> = FanOutRunner::new()
            .run(fan_out_tasks(&backend))
            .unwrap()
            .collect()
            .await;

        let Some(FanOutEvent::AgentsComplete { results, failures }) = events.last() else {
            panic!("AgentsComplete must be the last event");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].agent, AgentRole::CriticalAnalyst);
        assert!(matches!(failures[0].error, AgentError::Aborted(_)));
        assert_eq!(results.text(AgentRole::CriticalAnalyst), "");
        assert_eq!(results.text(AgentRole::PositiveAdvocate), "xy");
    }

    #[tokio::test]
    async fn test_empty_fan_out_completes_immediately() {
        let events: Vec<_> = FanOutRunner::new().run(Vec::new()).unwrap().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], FanOutEvent::AgentsComplete { .. }));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_tasks() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .script(AgentRole::CriticalAnalyst, vec![Step::text("first"), Step::Hang])
                .script(AgentRole::PositiveAdvocate, vec![Step::Hang]),
        );

        let mut stream = FanOutRunner::new().run(fan_out_tasks(&backend)).unwrap();
        assert!(matches!(stream.next().await, Some(FanOutEvent::Delta(_))));
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.dropped_streams(), 2);
    }
}
