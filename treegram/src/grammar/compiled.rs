//! The compiled grammar handed to code generators.
//!
//! A [`Grammar`] owns its [`Rule`]s. Rules refer to each other only through
//! [`RuleIndex`] handles stored in their [`Slot`]s, since references between
//! rules can be cyclic (inside guard brackets).

use super::{
    ast::{
        Associativity,
        Fixity,
        Literal,
    },
    Error,
    ErrorKind,
    SourceRange,
};
use crate::automaton::{
    Automaton,
    SymbolId,
};

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
pub struct RuleIndex(pub u32);

impl RuleIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, Default)]
pub struct Grammar {
    pub rules: Vec<Rule>,

    /// Always the first rule declared in the source.
    pub root: RuleIndex,
}

impl Grammar {
    /// Registers a new rule. Fails if there's already a rule named `name`.
    pub fn add_rule(&mut self, name: &str, name_range: SourceRange) -> Result<RuleIndex, Error> {
        if let Some(other) = self.find_rule(name) {
            return Err(Error::new(ErrorKind::DuplicateRule(name.to_owned()))
                .with_range(self.rule(other).name_range)
                .with_range(name_range));
        }

        let index = RuleIndex(self.rules.len() as u32);
        self.rules.push(Rule::new(name, name_range));
        tracing::trace!(%index, name, "added rule");
        Ok(index)
    }

    /// Registers a rule for a kind of token. Unlike [`Grammar::add_rule`],
    /// this silently does nothing if a rule with the same name already
    /// exists: a user may name their own rule `identifier`.
    pub fn add_token_rule(&mut self, name: &str) -> Option<RuleIndex> {
        if self.find_rule(name).is_some() {
            tracing::trace!(name, "token rule shadowed by user rule");
            return None;
        }

        let index = RuleIndex(self.rules.len() as u32);
        let mut rule = Rule::new(name, SourceRange::default());
        rule.is_token = true;
        self.rules.push(rule);
        Some(index)
    }

    pub fn find_rule(&self, name: &str) -> Option<RuleIndex> {
        self.rules
            .iter()
            .position(|rule| rule.name == name)
            .map(|index| RuleIndex(index as u32))
    }

    /// # Panics
    ///
    /// Panics if `index` doesn't belong to this grammar.
    pub fn rule(&self, index: RuleIndex) -> &Rule {
        &self.rules[index.index()]
    }

    pub(super) fn rule_mut(&mut self, index: RuleIndex) -> &mut Rule {
        &mut self.rules[index.index()]
    }

    pub fn root_rule(&self) -> &Rule {
        self.rule(self.root)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Rule {
    pub name: String,
    pub name_range: SourceRange,

    /// Rules for primitive tokens (`identifier`, `number`, `string`) have no
    /// body.
    pub is_token: bool,

    /// The automaton of a rule without choices.
    pub automaton: Automaton,
    pub choices: Vec<Choice>,
    pub operators: Vec<Operator>,
    pub brackets: Vec<Bracket>,
    pub slots: Vec<Slot>,
    pub keyword_tokens: Vec<Token>,

    /// Synthetic operand slots, see [`Rule::operand_slots`].
    pub left_slot: Option<usize>,
    pub right_slot: Option<usize>,
    pub operand_slot: Option<usize>,
}

impl Rule {
    fn new(name: &str, name_range: SourceRange) -> Self {
        Self {
            name: name.to_owned(),
            name_range,
            ..Default::default()
        }
    }

    /// Returns the slot named `name` referring to `rule`, adding it if
    /// necessary.
    ///
    /// `reason` completes the error message if `name` already refers to a
    /// different rule ("in the rule 'r', the name 'n' ...").
    pub fn add_slot(
        &mut self,
        symbols: &mut SymbolAllocator,
        name: &str,
        rule: RuleIndex,
        range: SourceRange,
        reason: &str,
        max_slots: usize,
    ) -> Result<usize, Error> {
        if let Some(index) = self.slots.iter().position(|slot| slot.name == name) {
            let slot = &self.slots[index];
            if slot.rule != rule {
                return Err(Error::new(ErrorKind::SlotConflict {
                    rule: self.name.clone(),
                    slot: name.to_owned(),
                    reason: reason.to_owned(),
                })
                .with_range(slot.range)
                .with_range(range));
            }
            return Ok(index);
        }

        if self.slots.len() >= max_slots {
            return Err(Error::new(ErrorKind::TooManySlots(max_slots))
                .with_range(self.name_range)
                .with_range(range));
        }

        self.slots.push(Slot {
            name: name.to_owned(),
            symbol: symbols.allocate(),
            rule,
            range,
        });
        Ok(self.slots.len() - 1)
    }

    /// Interns a keyword literal (quotes included) and returns its symbol.
    ///
    /// The empty literal is epsilon and isn't added as a token.
    pub fn add_keyword_token(
        &mut self,
        symbols: &mut SymbolAllocator,
        literal: Literal<'_>,
        range: SourceRange,
        role: TokenRole,
    ) -> Result<SymbolId, Error> {
        let Some(text) = literal.content() else {
            return Ok(SymbolId::EPSILON);
        };

        if let Some(token) = self.keyword_tokens.iter().find(|token| token.text == text) {
            if token.role != role {
                return Err(Error::new(ErrorKind::TokenRoleConflict {
                    token: text.to_owned(),
                    existing: token.role,
                    requested: role,
                })
                .with_range(token.range)
                .with_range(range));
            }
            return Ok(token.symbol);
        }

        let symbol = symbols.allocate();
        self.keyword_tokens.push(Token {
            text: text.to_owned(),
            role,
            symbol,
            range,
        });
        Ok(symbol)
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn keyword_token(&self, text: &str) -> Option<&Token> {
        self.keyword_tokens.iter().find(|token| token.text == text)
    }

    pub fn choice(&self, name: &str) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.name == name)
    }

    pub fn operator(&self, name: &str) -> Option<&Operator> {
        self.operators.iter().find(|operator| operator.name == name)
    }

    /// The synthetic slots operators of this rule take their operands from:
    /// either a `left`/`right` pair or a single `operand` slot.
    pub fn operand_slots(&self) -> OperandSlots {
        match (self.left_slot, self.right_slot, self.operand_slot) {
            (Some(left), Some(right), _) => OperandSlots::Binary { left, right },
            (_, _, Some(operand)) => OperandSlots::Unary { operand },
            _ => OperandSlots::None,
        }
    }

    /// Number of symbols allocated for this rule.
    pub fn number_of_symbols(&self) -> usize {
        self.slots.len() + self.keyword_tokens.len() + self.brackets.len()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandSlots {
    None,
    Unary { operand: usize },
    Binary { left: usize, right: usize },
}

#[derive(Clone, Debug)]
pub struct Choice {
    pub name: String,
    pub name_range: SourceRange,
    pub expr_range: SourceRange,
    pub automaton: Automaton,
}

#[derive(Clone, Debug)]
pub struct Operator {
    pub name: String,
    pub name_range: SourceRange,
    pub expr_range: SourceRange,
    pub fixity: Fixity,

    /// Only meaningful for infix operators.
    pub associativity: Option<Associativity>,

    /// Operators in earlier sections have higher precedence (bind tighter).
    /// The first section has precedence `-1`.
    pub precedence: i32,
    pub automaton: Automaton,
}

impl Operator {
    /// Infix operators take a left and right operand, unless they're flat.
    pub fn is_binary(&self) -> bool {
        self.fixity == Fixity::Infix && self.associativity != Some(Associativity::Flat)
    }
}

/// A `[ "begin" ... "end" ]` group, compiled into its own automaton.
#[derive(Clone, Debug)]
pub struct Bracket {
    pub automaton: Automaton,
    pub symbol: SymbolId,
    pub start_symbol: SymbolId,
    pub end_symbol: SymbolId,
    pub range: SourceRange,
}

/// A named reference from a rule to another rule or token.
#[derive(Clone, Debug)]
pub struct Slot {
    pub name: String,
    pub symbol: SymbolId,
    pub rule: RuleIndex,
    pub range: SourceRange,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub text: String,
    pub role: TokenRole,
    pub symbol: SymbolId,
    pub range: SourceRange,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum TokenRole {
    #[display(fmt = "normal")]
    Normal,
    #[display(fmt = "start")]
    Start,
    #[display(fmt = "end")]
    End,
}

impl TokenRole {
    pub fn with_article(&self) -> &'static str {
        match self {
            TokenRole::Normal => "a normal",
            TokenRole::Start => "a start",
            TokenRole::End => "an end",
        }
    }
}

/// Hands out the symbols of one rule. Slots, keyword tokens and brackets
/// share one counter.
#[derive(Debug, Default)]
pub struct SymbolAllocator {
    next: u32,
}

impl SymbolAllocator {
    pub fn allocate(&mut self) -> SymbolId {
        let symbol = SymbolId(self.next);
        self.next += 1;
        symbol
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const REASON: &str = "could refer to two different rules";

    fn range(start: usize) -> SourceRange {
        SourceRange::new(start, start + 1)
    }

    #[test]
    fn it_rejects_duplicate_rules() {
        let mut grammar = Grammar::default();
        grammar.add_rule("expr", range(0)).unwrap();

        let error = grammar.add_rule("expr", range(10)).unwrap_err();
        assert_eq!(error.kind, ErrorKind::DuplicateRule("expr".to_owned()));
        assert_eq!(error.ranges, vec![range(0), range(10)]);
    }

    #[test]
    fn it_skips_shadowed_token_rules() {
        let mut grammar = Grammar::default();
        grammar.add_rule("number", range(0)).unwrap();

        assert_eq!(grammar.add_token_rule("number"), None);
        assert_eq!(grammar.add_token_rule("string"), Some(RuleIndex(1)));
        assert!(!grammar.rule(RuleIndex(0)).is_token);
        assert!(grammar.rule(RuleIndex(1)).is_token);

        // a token rule still blocks a later user rule
        assert!(grammar.add_rule("string", range(5)).is_err());
    }

    #[test]
    fn it_reuses_slots_with_the_same_target() {
        let mut rule = Rule::new("expr", range(0));
        let mut symbols = SymbolAllocator::default();

        let first = rule
            .add_slot(&mut symbols, "value", RuleIndex(2), range(3), REASON, 8)
            .unwrap();
        let other = rule
            .add_slot(&mut symbols, "other", RuleIndex(2), range(5), REASON, 8)
            .unwrap();
        let again = rule
            .add_slot(&mut symbols, "value", RuleIndex(2), range(7), REASON, 8)
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(rule.slots.len(), 2);
        assert_eq!(rule.slots[first].range, range(3));
        assert_eq!(rule.slots[other].symbol, SymbolId(1));
    }

    #[test]
    fn it_rejects_slot_conflicts_in_either_order() {
        for (first, second) in [(RuleIndex(1), RuleIndex(2)), (RuleIndex(2), RuleIndex(1))] {
            let mut rule = Rule::new("expr", range(0));
            let mut symbols = SymbolAllocator::default();
            rule.add_slot(&mut symbols, "value", first, range(3), REASON, 8)
                .unwrap();

            let error = rule
                .add_slot(&mut symbols, "value", second, range(7), REASON, 8)
                .unwrap_err();
            assert_eq!(
                error.to_string(),
                "in the rule 'expr', the name 'value' could refer to two different rules"
            );
            assert_eq!(error.ranges, vec![range(3), range(7)]);
            assert_eq!(rule.slots.len(), 1);
        }
    }

    #[test]
    fn it_limits_the_number_of_slots() {
        let mut rule = Rule::new("expr", range(0));
        let mut symbols = SymbolAllocator::default();
        rule.add_slot(&mut symbols, "a", RuleIndex(1), range(1), REASON, 2)
            .unwrap();
        rule.add_slot(&mut symbols, "b", RuleIndex(1), range(2), REASON, 2)
            .unwrap();
        // reusing an existing slot is fine at the limit
        rule.add_slot(&mut symbols, "a", RuleIndex(1), range(3), REASON, 2)
            .unwrap();

        let error = rule
            .add_slot(&mut symbols, "c", RuleIndex(1), range(4), REASON, 2)
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::TooManySlots(2));
    }

    #[test]
    fn it_treats_empty_keywords_as_epsilon() {
        let mut rule = Rule::new("expr", range(0));
        let mut symbols = SymbolAllocator::default();

        for role in [TokenRole::Normal, TokenRole::Start, TokenRole::End] {
            let symbol = rule
                .add_keyword_token(&mut symbols, Literal("\"\""), range(1), role)
                .unwrap();
            assert_eq!(symbol, SymbolId::EPSILON);
        }
        assert!(rule.keyword_tokens.is_empty());
        assert_eq!(symbols.allocate(), SymbolId(0));
    }

    #[test]
    fn it_interns_keywords_by_content_and_role() {
        let mut rule = Rule::new("expr", range(0));
        let mut symbols = SymbolAllocator::default();

        let plus = rule
            .add_keyword_token(&mut symbols, Literal("\"+\""), range(1), TokenRole::Normal)
            .unwrap();
        let minus = rule
            .add_keyword_token(&mut symbols, Literal("'-'"), range(2), TokenRole::Normal)
            .unwrap();
        let plus_again = rule
            .add_keyword_token(&mut symbols, Literal("'+'"), range(3), TokenRole::Normal)
            .unwrap();

        assert_eq!(plus, plus_again);
        assert_ne!(plus, minus);
        assert_eq!(rule.keyword_token("+").unwrap().range, range(1));
        assert_eq!(rule.keyword_tokens.len(), 2);
    }

    #[test]
    fn it_rejects_keywords_with_two_roles() {
        let mut rule = Rule::new("expr", range(0));
        let mut symbols = SymbolAllocator::default();
        rule.add_keyword_token(&mut symbols, Literal("\"(\""), range(1), TokenRole::Start)
            .unwrap();

        let error = rule
            .add_keyword_token(&mut symbols, Literal("\"(\""), range(4), TokenRole::Normal)
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "token '(' can't be used as both a start and a normal keyword"
        );
        assert_eq!(error.ranges, vec![range(1), range(4)]);

        let error = rule
            .add_keyword_token(&mut symbols, Literal("\"(\""), range(6), TokenRole::End)
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "token '(' can't be used as both a start and an end keyword"
        );
    }

    #[test]
    fn it_shares_one_symbol_counter() {
        let mut rule = Rule::new("expr", range(0));
        let mut symbols = SymbolAllocator::default();

        let slot = rule
            .add_slot(&mut symbols, "value", RuleIndex(1), range(1), REASON, 8)
            .unwrap();
        let token = rule
            .add_keyword_token(&mut symbols, Literal("\"x\""), range(2), TokenRole::Normal)
            .unwrap();

        assert_eq!(rule.slots[slot].symbol, SymbolId(0));
        assert_eq!(token, SymbolId(1));
        assert_eq!(rule.number_of_symbols(), 2);
    }

    proptest! {
        #[test]
        fn find_rule_is_stable_across_insertions(
            names in prop::collection::hash_set("[a-z][a-z0-9_]{0,8}", 1..24)
        ) {
            let mut grammar = Grammar::default();
            let mut assigned = Vec::new();
            for name in &names {
                let index = grammar.add_rule(name, SourceRange::default()).unwrap();
                prop_assert_eq!(grammar.find_rule(name), Some(index));
                assigned.push((name, index));
            }
            for (name, index) in assigned {
                prop_assert_eq!(grammar.find_rule(name), Some(index));
            }
        }

        #[test]
        fn add_slot_is_idempotent(
            references in prop::collection::vec("[a-c]", 1..32)
        ) {
            // every name refers to a fixed rule, so no call can conflict
            let mut rule = Rule::new("expr", range(0));
            let mut symbols = SymbolAllocator::default();
            let target = |name: &str| RuleIndex(name.as_bytes()[0] as u32);

            let mut seen = std::collections::HashMap::new();
            for name in &references {
                let index = rule
                    .add_slot(&mut symbols, name, target(name), range(1), REASON, 8)
                    .unwrap();
                let before = rule.slots.len();
                let again = rule
                    .add_slot(&mut symbols, name, target(name), range(2), REASON, 8)
                    .unwrap();
                prop_assert_eq!(index, again);
                prop_assert_eq!(rule.slots.len(), before);
                prop_assert_eq!(*seen.entry(name.clone()).or_insert(index), index);
            }
        }

        #[test]
        fn add_slot_rejects_a_second_target(
            name in "[a-z]{1,6}",
            first in 0u32..16,
            second in 0u32..16,
        ) {
            prop_assume!(first != second);
            let mut rule = Rule::new("expr", range(0));
            let mut symbols = SymbolAllocator::default();
            rule.add_slot(&mut symbols, &name, RuleIndex(first), range(1), REASON, 8)
                .unwrap();

            let result = rule.add_slot(&mut symbols, &name, RuleIndex(second), range(2), REASON, 8);
            let is_conflict = matches!(
                result,
                Err(Error { kind: ErrorKind::SlotConflict { .. }, .. })
            );
            prop_assert!(is_conflict);
        }
    }
}
