//! Finite automata over grammar symbols.
//!
//! The same [`Automaton`] type holds both the raw NFAs produced while
//! compiling a rule body and the minimized DFAs that are stored in the
//! compiled grammar. Transitions are labelled with a [`SymbolId`], which
//! refers to a slot, a keyword token or a bracket of the owning rule, or with
//! [`SymbolId::EPSILON`].

mod determinize;

use std::collections::BTreeSet;

pub use self::determinize::determinize_minimize;

/// Identifier of a state within one automaton.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
)]
pub struct StateId(pub u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Transition label. Symbols are allocated per rule.
#[derive(
    Copy,
    Clone,
    Debug,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// The silent transition label.
    pub const EPSILON: SymbolId = SymbolId(u32::MAX);

    pub fn is_epsilon(self) -> bool {
        self == Self::EPSILON
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Transition {
    pub symbol: SymbolId,
    pub target: StateId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct State {
    pub transitions: Vec<Transition>,
    pub accepting: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Automaton {
    states: Vec<State>,
    start: StateId,
}

impl Automaton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the automaton with a single state that is both start and
    /// accepting, i.e. one that accepts only the empty sequence.
    pub fn empty() -> Self {
        let mut automaton = Self::new();
        automaton.set_start_state(StateId(0));
        automaton.mark_accepting_state(StateId(0));
        automaton
    }

    fn ensure_state(&mut self, state: StateId) {
        if self.states.len() <= state.index() {
            self.states.resize_with(state.index() + 1, State::default);
        }
    }

    pub fn set_start_state(&mut self, state: StateId) {
        self.ensure_state(state);
        self.start = state;
    }

    pub fn mark_accepting_state(&mut self, state: StateId) {
        self.ensure_state(state);
        self.states[state.index()].accepting = true;
    }

    pub fn add_transition(&mut self, from: StateId, to: StateId, symbol: SymbolId) {
        self.ensure_state(from.max(to));
        self.states[from.index()]
            .transitions
            .push(Transition { symbol, target: to });
    }

    pub fn start_state(&self) -> StateId {
        self.start
    }

    pub fn number_of_states(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, state: StateId) -> &State {
        &self.states[state.index()]
    }

    pub fn is_accepting(&self, state: StateId) -> bool {
        self.states
            .get(state.index())
            .map_or(false, |state| state.accepting)
    }

    pub fn transitions(&self, state: StateId) -> &[Transition] {
        self.states
            .get(state.index())
            .map_or(&[], |state| &state.transitions)
    }

    pub fn has_transition(&self, from: StateId, to: StateId, symbol: SymbolId) -> bool {
        self.transitions(from)
            .iter()
            .any(|transition| transition.symbol == symbol && transition.target == to)
    }

    pub fn number_of_transitions(&self) -> usize {
        self.states.iter().map(|state| state.transitions.len()).sum()
    }

    /// Whether any state has more than one transition on a symbol or any
    /// epsilon transition.
    pub fn is_deterministic(&self) -> bool {
        self.states.iter().all(|state| {
            let mut seen = BTreeSet::new();
            state
                .transitions
                .iter()
                .all(|transition| !transition.symbol.is_epsilon() && seen.insert(transition.symbol))
        })
    }

    /// States reachable from `states` through epsilon transitions, including
    /// `states` themselves.
    pub fn epsilon_closure(&self, states: impl IntoIterator<Item = StateId>) -> BTreeSet<StateId> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<StateId> = states.into_iter().collect();
        while let Some(state) = stack.pop() {
            if !closure.insert(state) {
                continue;
            }
            for transition in self.transitions(state) {
                if transition.symbol.is_epsilon() && !closure.contains(&transition.target) {
                    stack.push(transition.target);
                }
            }
        }
        closure
    }

    /// Runs the automaton over `input`. Works for NFAs and DFAs alike.
    pub fn accepts(&self, input: &[SymbolId]) -> bool {
        if self.states.is_empty() {
            return false;
        }
        let mut current = self.epsilon_closure([self.start]);
        for &symbol in input {
            let next = current
                .iter()
                .flat_map(|&state| self.transitions(state))
                .filter(|transition| transition.symbol == symbol)
                .map(|transition| transition.target)
                .collect::<Vec<_>>();
            if next.is_empty() {
                return false;
            }
            current = self.epsilon_closure(next);
        }
        current.iter().any(|&state| self.is_accepting(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SymbolId = SymbolId(0);
    const B: SymbolId = SymbolId(1);

    #[test]
    fn it_grows_states_on_demand() {
        let mut automaton = Automaton::new();
        automaton.set_start_state(StateId(0));
        automaton.mark_accepting_state(StateId(1));
        automaton.add_transition(StateId(4), StateId(2), A);

        assert_eq!(automaton.number_of_states(), 5);
        assert!(automaton.is_accepting(StateId(1)));
        assert!(!automaton.is_accepting(StateId(3)));
        assert!(!automaton.is_accepting(StateId(17)));
        assert!(automaton.has_transition(StateId(4), StateId(2), A));
    }

    #[test]
    fn it_follows_epsilon_transitions() {
        let mut automaton = Automaton::new();
        automaton.set_start_state(StateId(0));
        automaton.mark_accepting_state(StateId(1));
        automaton.add_transition(StateId(0), StateId(2), SymbolId::EPSILON);
        automaton.add_transition(StateId(2), StateId(3), A);
        automaton.add_transition(StateId(3), StateId(1), SymbolId::EPSILON);
        automaton.add_transition(StateId(3), StateId(2), SymbolId::EPSILON);

        assert!(!automaton.is_deterministic());
        assert!(!automaton.accepts(&[]));
        assert!(automaton.accepts(&[A]));
        assert!(automaton.accepts(&[A, A, A]));
        assert!(!automaton.accepts(&[A, B]));
    }

    #[test]
    fn it_accepts_empty_input_in_the_empty_automaton() {
        let automaton = Automaton::empty();
        assert_eq!(automaton.number_of_states(), 1);
        assert!(automaton.accepts(&[]));
        assert!(!automaton.accepts(&[A]));
        assert!(!Automaton::new().accepts(&[]));
    }
}
