//! Explicit transition table for one domain's pipeline.

use edgeship_model::{DomainStatus, Phase};

/// Inputs that move a domain through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Start,
    PhaseSucceeded,
    PhaseFailed,
    /// The domain never entered its pipeline (upstream failure, cancel).
    Abort,
    /// Every compensating action completed.
    RollbackFinished,
}

/// `(phase, status)` a domain sits in.
pub type MachineState = (Phase, DomainStatus);

/// Next state for `event`, or `None` when the table has no such edge.
pub fn transition(
    (phase, status): MachineState,
    event: PipelineEvent,
) -> Option<MachineState> {
    use DomainStatus::*;
    use PipelineEvent::*;

    match (status, event) {
        (Pending, Start) if phase == Phase::Validation => {
            Some((Phase::Validation, InProgress))
        }
        (Pending, Abort) => Some((phase, Failed)),
        (InProgress, PhaseSucceeded) if !phase.is_terminal() => {
            match phase.next() {
                Some(Phase::Completed) => Some((Phase::Completed, Completed)),
                Some(next) => Some((next, InProgress)),
                None => None,
            }
        }
        (InProgress, PhaseFailed) if !phase.is_terminal() => {
            Some((phase, Failed))
        }
        (Failed, RollbackFinished) => Some((phase, RolledBack)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_every_phase_in_order() {
        let mut state = transition(
            (Phase::Validation, DomainStatus::Pending),
            PipelineEvent::Start,
        )
        .unwrap();
        let mut visited = vec![state.0];
        while state.1 == DomainStatus::InProgress {
            state = transition(state, PipelineEvent::PhaseSucceeded).unwrap();
            visited.push(state.0);
        }
        assert_eq!(visited, Phase::ALL.to_vec());
        assert_eq!(state, (Phase::Completed, DomainStatus::Completed));
    }

    #[test]
    fn failure_keeps_phase_and_allows_rollback() {
        let failed = transition(
            (Phase::Deployment, DomainStatus::InProgress),
            PipelineEvent::PhaseFailed,
        )
        .unwrap();
        assert_eq!(failed, (Phase::Deployment, DomainStatus::Failed));
        assert_eq!(
            transition(failed, PipelineEvent::RollbackFinished),
            Some((Phase::Deployment, DomainStatus::RolledBack))
        );
        assert_eq!(transition(failed, PipelineEvent::PhaseSucceeded), None);
    }

    #[test]
    fn terminal_states_have_no_outgoing_phase_edges() {
        let done = (Phase::Completed, DomainStatus::Completed);
        assert_eq!(transition(done, PipelineEvent::PhaseFailed), None);
        assert_eq!(transition(done, PipelineEvent::Start), None);
        let rolled = (Phase::Secrets, DomainStatus::RolledBack);
        assert_eq!(transition(rolled, PipelineEvent::RollbackFinished), None);
    }

    #[test]
    fn abort_only_applies_before_start() {
        assert_eq!(
            transition(
                (Phase::Validation, DomainStatus::Pending),
                PipelineEvent::Abort
            ),
            Some((Phase::Validation, DomainStatus::Failed))
        );
        assert_eq!(
            transition(
                (Phase::Database, DomainStatus::InProgress),
                PipelineEvent::Abort
            ),
            None
        );
    }
}
