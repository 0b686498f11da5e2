//! NFA to minimized DFA conversion.
//!
//! 1. Subset construction over epsilon closures.
//! 2. States that can't reach an accepting state are dropped.
//! 3. Equivalent states are merged by partition refinement.
//! 4. States are renumbered breadth-first from the start state, following
//!    transitions in symbol order, so that two automata for the same language
//!    come out identical.

use std::collections::{
    BTreeMap,
    BTreeSet,
    HashMap,
    VecDeque,
};

use itertools::Itertools;

use super::{
    Automaton,
    StateId,
    SymbolId,
};

#[derive(Clone, Debug, Default)]
struct DfaState {
    transitions: BTreeMap<SymbolId, usize>,
    accepting: bool,
}

/// Converts `nfa` into the minimal DFA accepting the same symbol sequences.
pub fn determinize_minimize(nfa: &Automaton) -> Automaton {
    let states = subset_construction(nfa);
    let states = remove_dead_states(states);
    let states = minimize(states);
    let dfa = canonicalize(&states);

    tracing::trace!(
        nfa_states = nfa.number_of_states(),
        dfa_states = dfa.number_of_states(),
        "determinized"
    );

    dfa
}

fn subset_construction(nfa: &Automaton) -> Vec<DfaState> {
    let mut states = Vec::new();
    let mut index: HashMap<BTreeSet<StateId>, usize> = HashMap::new();
    let mut worklist = VecDeque::new();

    let start = nfa.epsilon_closure([nfa.start_state()]);
    states.push(DfaState {
        transitions: BTreeMap::new(),
        accepting: start.iter().any(|&state| nfa.is_accepting(state)),
    });
    index.insert(start.clone(), 0);
    worklist.push_back(start);

    while let Some(set) = worklist.pop_front() {
        let from = index[&set];

        let mut moves: BTreeMap<SymbolId, Vec<StateId>> = BTreeMap::new();
        for &state in &set {
            for transition in nfa.transitions(state) {
                if !transition.symbol.is_epsilon() {
                    moves
                        .entry(transition.symbol)
                        .or_default()
                        .push(transition.target);
                }
            }
        }

        for (symbol, targets) in moves {
            let closure = nfa.epsilon_closure(targets);
            let to = match index.get(&closure) {
                Some(&to) => to,
                None => {
                    let to = states.len();
                    states.push(DfaState {
                        transitions: BTreeMap::new(),
                        accepting: closure.iter().any(|&state| nfa.is_accepting(state)),
                    });
                    index.insert(closure.clone(), to);
                    worklist.push_back(closure);
                    to
                }
            };
            states[from].transitions.insert(symbol, to);
        }
    }

    states
}

/// Drops every state from which no accepting state is reachable, except the
/// start state (index 0).
fn remove_dead_states(states: Vec<DfaState>) -> Vec<DfaState> {
    let mut predecessors = vec![Vec::new(); states.len()];
    for (from, state) in states.iter().enumerate() {
        for &to in state.transitions.values() {
            predecessors[to].push(from);
        }
    }

    let mut live = vec![false; states.len()];
    let mut stack = states
        .iter()
        .enumerate()
        .filter(|(_, state)| state.accepting)
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    while let Some(state) = stack.pop() {
        if std::mem::replace(&mut live[state], true) {
            continue;
        }
        stack.extend(predecessors[state].iter().filter(|&&p| !live[p]));
    }
    live[0] = true;

    let mut remap = vec![None; states.len()];
    for (new, old) in (0..states.len()).filter(|&old| live[old]).enumerate() {
        remap[old] = Some(new);
    }

    states
        .into_iter()
        .zip(live)
        .filter(|(_, live)| *live)
        .map(|(state, _)| {
            DfaState {
                transitions: state
                    .transitions
                    .into_iter()
                    .filter_map(|(symbol, to)| remap[to].map(|to| (symbol, to)))
                    .collect(),
                accepting: state.accepting,
            }
        })
        .collect()
}

/// Moore-style partition refinement. Starts from the accepting/non-accepting
/// split and refines by transition signature until the number of classes
/// stops growing.
fn minimize(states: Vec<DfaState>) -> Vec<DfaState> {
    let mut class_of: Vec<usize> = states.iter().map(|state| state.accepting as usize).collect();
    let mut number_of_classes = class_of.iter().unique().count();

    loop {
        let mut signatures: HashMap<(usize, Vec<(SymbolId, usize)>), usize> = HashMap::new();
        let refined = states
            .iter()
            .enumerate()
            .map(|(index, state)| {
                let signature = (
                    class_of[index],
                    state
                        .transitions
                        .iter()
                        .map(|(&symbol, &to)| (symbol, class_of[to]))
                        .collect(),
                );
                let next = signatures.len();
                *signatures.entry(signature).or_insert(next)
            })
            .collect::<Vec<_>>();

        let refined_classes = signatures.len();
        class_of = refined;
        if refined_classes == number_of_classes {
            break;
        }
        number_of_classes = refined_classes;
    }

    let mut merged: Vec<Option<DfaState>> = vec![None; number_of_classes];
    for (index, state) in states.iter().enumerate() {
        let class = class_of[index];
        if merged[class].is_none() {
            merged[class] = Some(DfaState {
                transitions: state
                    .transitions
                    .iter()
                    .map(|(&symbol, &to)| (symbol, class_of[to]))
                    .collect(),
                accepting: state.accepting,
            });
        }
    }

    // the start state has to stay at index 0.
    let start_class = class_of[0];
    let mut order = vec![start_class];
    order.extend((0..number_of_classes).filter(|&class| class != start_class));
    let mut position = vec![0; number_of_classes];
    for (new, &class) in order.iter().enumerate() {
        position[class] = new;
    }

    order
        .into_iter()
        .filter_map(|class| merged[class].take())
        .map(|state| {
            DfaState {
                transitions: state
                    .transitions
                    .into_iter()
                    .map(|(symbol, to)| (symbol, position[to]))
                    .collect(),
                accepting: state.accepting,
            }
        })
        .collect()
}

fn canonicalize(states: &[DfaState]) -> Automaton {
    let mut number = vec![None; states.len()];
    let mut order = Vec::with_capacity(states.len());
    let mut queue = VecDeque::from([0]);
    number[0] = Some(StateId(0));

    while let Some(state) = queue.pop_front() {
        order.push(state);
        for &to in states[state].transitions.values() {
            if number[to].is_none() {
                number[to] = Some(StateId((order.len() + queue.len()) as u32));
                queue.push_back(to);
            }
        }
    }

    let mut automaton = Automaton::new();
    automaton.set_start_state(StateId(0));
    for (from, &old) in order.iter().enumerate() {
        let from = StateId(from as u32);
        if states[old].accepting {
            automaton.mark_accepting_state(from);
        }
        for (&symbol, &to) in &states[old].transitions {
            if let Some(to) = number[to] {
                automaton.add_transition(from, to, symbol);
            }
        }
    }

    automaton
}
