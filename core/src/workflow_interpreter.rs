//! Phase selection algorithm (C2): given a workflow graph, the issue's
//! current phase and status map, pick the next phase. Detects stalls when
//! the same phase keeps re-selecting itself without any status mutation.
use crate::errors::{WorkflowError, WorkflowResult};
use crate::issue::Issue;
use crate::predicate::evaluate;
use crate::workflow::{PhaseDef, Transition, WorkflowDef};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// How many consecutive self-loops on the same phase, with an unchanged
/// status snapshot, constitute a stall. A self-loop that mutates status is
/// progress, not a stall, and resets the counter.
const STALL_THRESHOLD: u32 = 3;

/// Tracks iteration count and stall detection across a single run's
/// lifetime. Constructed once per run and fed each phase selection.
#[derive(Debug, Default)]
pub struct InterpreterState {
    iterations: u32,
    last_phase_snapshot: Option<(String, u64)>,
    consecutive_self_loops: u32,
}

impl InterpreterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

/// Hash the status map so repeated visits to the same phase can be told
/// apart from genuine progress without keeping the whole history around.
fn status_snapshot_hash(issue: &Issue) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (key, value) in &issue.status {
        key.hash(&mut hasher);
        value.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

/// Select the next phase for `issue` given `workflow`, advancing
/// `state`'s iteration and stall bookkeeping. Returns the chosen phase's
/// name, or a [`WorkflowError`] if the run must stop.
pub fn next_phase(
    workflow: &WorkflowDef,
    issue: &Issue,
    state: &mut InterpreterState,
    max_iterations: u32,
) -> WorkflowResult<String> {
    state.iterations += 1;
    if state.iterations > max_iterations {
        return Err(WorkflowError::MaxIterations(max_iterations));
    }

    let phase = workflow
        .phase(&issue.phase)
        .ok_or_else(|| WorkflowError::UnknownPhase(issue.phase.clone()))?;

    let next = select_transition(phase, issue)?;

    let snapshot = (issue.phase.clone(), status_snapshot_hash(issue));
    if next == issue.phase && state.last_phase_snapshot.as_ref() == Some(&snapshot) {
        state.consecutive_self_loops += 1;
        if state.consecutive_self_loops >= STALL_THRESHOLD {
            return Err(WorkflowError::Stalled {
                phase: issue.phase.clone(),
                consecutive_self_loops: state.consecutive_self_loops,
            });
        }
    } else {
        state.consecutive_self_loops = 0;
    }
    state.last_phase_snapshot = Some(snapshot);

    Ok(next)
}

/// First transition whose predicate matches wins; `auto` transitions
/// (including bare `when`-less ones) always match. No match means the
/// phase re-enters itself; `next_phase`'s stall detection is what catches a
/// status that never mutates, not this function.
fn select_transition(phase: &PhaseDef, issue: &Issue) -> WorkflowResult<String> {
    for transition in &phase.transitions {
        if transition_matches(transition, issue)? {
            return Ok(transition.to.clone());
        }
    }
    Ok(phase.name.clone())
}

fn transition_matches(transition: &Transition, issue: &Issue) -> WorkflowResult<bool> {
    if transition.is_auto() {
        return Ok(true);
    }
    let predicate = transition.when.as_deref().unwrap_or_default();
    evaluate(predicate, |field| issue.status_field(field).cloned())
        .map_err(|e| WorkflowError::PredicateError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{IssueProvider, RepoCoordinate, StatusMap};
    use crate::workflow::{PhaseType, PhaseDef};
    use serde_json::json;
    use std::collections::HashMap;

    fn issue(phase: &str, status: StatusMap) -> Issue {
        Issue {
            repo: RepoCoordinate { owner: "acme".into(), repo: "widgets".into() },
            issue: 1,
            title: "t".into(),
            provider: IssueProvider::Github,
            branch: "issue/1".into(),
            workflow: "default".into(),
            phase: phase.into(),
            status,
            schema_version: 1,
        }
    }

    fn phase_def(name: &str, phase_type: PhaseType, transitions: Vec<Transition>) -> PhaseDef {
        PhaseDef {
            name: name.into(),
            phase_type,
            prompt: String::new(),
            mcp_profile: None,
            mcp_enforcement: None,
            permission_mode: None,
            transitions,
            fan_out: false,
            max_wallclock_secs: None,
            inactivity_timeout_secs: None,
        }
    }

    fn two_phase_workflow() -> WorkflowDef {
        let mut phases = HashMap::new();
        phases.insert(
            "design".to_string(),
            phase_def(
                "design",
                PhaseType::Execute,
                vec![
                    Transition { to: "implement".into(), when: Some("status.designApproved == true".into()), auto: false },
                    Transition { to: "design".into(), when: None, auto: true },
                ],
            ),
        );
        phases.insert("implement".to_string(), phase_def("implement", PhaseType::Terminal, vec![]));
        WorkflowDef { name: "fixture".into(), version: "1".into(), start: "design".into(), phases }
    }

    #[test]
    fn advances_on_matching_predicate() {
        let workflow = two_phase_workflow();
        let mut status = StatusMap::new();
        status.insert("designApproved".into(), json!(true));
        let issue = issue("design", status);
        let mut state = InterpreterState::new();
        let next = next_phase(&workflow, &issue, &mut state, 100).unwrap();
        assert_eq!(next, "implement");
    }

    #[test]
    fn self_loops_while_predicate_unmet() {
        let workflow = two_phase_workflow();
        let issue = issue("design", StatusMap::new());
        let mut state = InterpreterState::new();
        let next = next_phase(&workflow, &issue, &mut state, 100).unwrap();
        assert_eq!(next, "design");
    }

    /// A phase with no `when`-less fallback transition at all: a missed
    /// predicate must still re-enter the phase rather than abort the run.
    fn workflow_with_no_fallback_transition() -> WorkflowDef {
        let mut phases = HashMap::new();
        phases.insert(
            "review".to_string(),
            phase_def(
                "review",
                PhaseType::Execute,
                vec![Transition { to: "merge".into(), when: Some("status.approved == true".into()), auto: false }],
            ),
        );
        phases.insert("merge".to_string(), phase_def("merge", PhaseType::Terminal, vec![]));
        WorkflowDef { name: "fixture".into(), version: "1".into(), start: "review".into(), phases }
    }

    #[test]
    fn unmatched_transition_self_loops_instead_of_erroring() {
        let workflow = workflow_with_no_fallback_transition();
        let issue = issue("review", StatusMap::new());
        let mut state = InterpreterState::new();
        let next = next_phase(&workflow, &issue, &mut state, 100).unwrap();
        assert_eq!(next, "review");
    }

    #[test]
    fn unmatched_transition_eventually_stalls() {
        let workflow = workflow_with_no_fallback_transition();
        let issue = issue("review", StatusMap::new());
        let mut state = InterpreterState::new();
        let mut last = Ok(String::new());
        for _ in 0..(STALL_THRESHOLD + 1) {
            last = next_phase(&workflow, &issue, &mut state, 100);
        }
        assert!(matches!(last, Err(WorkflowError::Stalled { .. })));
    }

    #[test]
    fn unchanged_self_loop_eventually_stalls() {
        let workflow = two_phase_workflow();
        let issue = issue("design", StatusMap::new());
        let mut state = InterpreterState::new();
        let mut last = Ok(String::new());
        for _ in 0..(STALL_THRESHOLD + 1) {
            last = next_phase(&workflow, &issue, &mut state, 100);
        }
        assert!(matches!(last, Err(WorkflowError::Stalled { .. })));
    }

    #[test]
    fn status_mutation_resets_stall_counter() {
        let workflow = two_phase_workflow();
        let mut state = InterpreterState::new();
        let unchanged = issue("design", StatusMap::new());
        next_phase(&workflow, &unchanged, &mut state, 100).unwrap();
        next_phase(&workflow, &unchanged, &mut state, 100).unwrap();

        let mut mutated_status = StatusMap::new();
        mutated_status.insert("note".into(), json!("progress"));
        let mutated = issue("design", mutated_status);
        next_phase(&workflow, &mutated, &mut state, 100).unwrap();
        next_phase(&workflow, &mutated, &mut state, 100).unwrap();
        let result = next_phase(&workflow, &mutated, &mut state, 100);
        assert!(result.is_ok());
    }

    #[test]
    fn exceeding_max_iterations_is_an_error() {
        let workflow = two_phase_workflow();
        let issue = issue("design", StatusMap::new());
        let mut state = InterpreterState::new();
        // max_iterations=1 allows exactly one selection; the phase here
        // self-loops without transitioning, so the second call is the one
        // that exceeds the budget.
        next_phase(&workflow, &issue, &mut state, 1).unwrap();
        let result = next_phase(&workflow, &issue, &mut state, 1);
        assert!(matches!(result, Err(WorkflowError::MaxIterations(1))));
    }

    #[test]
    fn unknown_phase_is_an_error() {
        let workflow = two_phase_workflow();
        let issue = issue("nonexistent", StatusMap::new());
        let mut state = InterpreterState::new();
        let result = next_phase(&workflow, &issue, &mut state, 100);
        assert!(matches!(result, Err(WorkflowError::UnknownPhase(_))));
    }
}
