//! Build pass: parse tree to compiled grammar.
//!
//! Every rule body, choice and operator is compiled into an NFA between a
//! pair of boundary states, which is then determinized and minimized. The
//! contents of `[ ]` brackets are compiled into their own automata; only
//! inside them may a rule refer to itself or to earlier rules.

use derivative::Derivative;

use super::{
    ast::{
        self,
        Body,
        Clause,
        Expr,
        ExprKind,
        Id,
        Literal,
        Operators,
        Production,
    },
    compiled::{
        Bracket,
        Choice,
        Grammar,
        Operator,
        Rule,
        RuleIndex,
        SymbolAllocator,
        TokenRole,
    },
    ClauseKind,
    Error,
    ErrorKind,
    SourceRange,
};
use crate::automaton::{
    determinize_minimize,
    Automaton,
    StateId,
    SymbolId,
};

pub const MAX_EXPRESSION_NESTING: usize = 3000;
pub const MAX_NUMBER_OF_CLAUSES: usize = 255;
pub const MAX_NUMBER_OF_SLOTS: usize = 255;

/// Rules for the kinds of tokens the generated lexer produces. They're added
/// after the user's rules, unless the user already defined a rule with the
/// same name.
const TOKEN_RULES: [&str; 3] = ["identifier", "number", "string"];

const SLOT_CONFLICT: &str = "could refer to two different rules";

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Expressions nested deeper than this are rejected.
    pub max_expression_nesting: usize,

    /// Maximum number of choices and operators in one rule.
    pub max_clauses_per_rule: usize,

    /// Maximum number of distinct references in one rule.
    pub max_slots_per_rule: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_expression_nesting: MAX_EXPRESSION_NESTING,
            max_clauses_per_rule: MAX_NUMBER_OF_CLAUSES,
            max_slots_per_rule: MAX_NUMBER_OF_SLOTS,
        }
    }
}

/// The states a sub-expression's automaton has to connect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Boundary {
    entry: StateId,
    exit: StateId,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Compiler<'source> {
    #[derivative(Debug = "ignore")]
    source: &'source str,
    options: CompileOptions,
    grammar: Grammar,

    /// The rule that is being compiled.
    rule_index: RuleIndex,
    symbols: SymbolAllocator,
    next_state: u32,
    bracket_nesting: usize,
    expression_nesting: usize,
}

impl<'source> Compiler<'source> {
    /// `source` is the text the parse tree was parsed from. It's only used to
    /// compute source ranges for diagnostics.
    pub fn new(source: &'source str, options: CompileOptions) -> Self {
        Self {
            source,
            options,
            grammar: Grammar::default(),
            rule_index: RuleIndex::default(),
            symbols: SymbolAllocator::default(),
            next_state: 0,
            bracket_nesting: 0,
            expression_nesting: 0,
        }
    }

    pub fn push_ast<'ast>(&mut self, grammar: &'ast ast::Grammar<'source>) -> Result<(), Error> {
        grammar.compile(self, ())
    }

    pub fn finish(self) -> Grammar {
        self.grammar
    }

    fn range(&self, text: &str) -> SourceRange {
        SourceRange::locate(self.source, text)
    }

    fn rule(&self) -> &Rule {
        self.grammar.rule(self.rule_index)
    }

    fn rule_mut(&mut self) -> &mut Rule {
        self.grammar.rule_mut(self.rule_index)
    }

    fn begin_rule(&mut self, index: RuleIndex) {
        self.rule_index = index;
        self.symbols = SymbolAllocator::default();
    }

    fn new_state(&mut self) -> StateId {
        let state = StateId(self.next_state);
        self.next_state += 1;
        state
    }

    /// Builds the raw NFA for `expr`, with state 0 as start and state 1 as
    /// the only accepting state.
    fn build_nfa(&mut self, expr: &Expr<'source>) -> Result<Automaton, Error> {
        let mut nfa = Automaton::new();
        let boundary = Boundary {
            entry: StateId(0),
            exit: StateId(1),
        };
        nfa.set_start_state(boundary.entry);
        nfa.mark_accepting_state(boundary.exit);

        // brackets build their automata while the outer one is still being
        // built.
        let saved_next_state = std::mem::replace(&mut self.next_state, 2);
        let result = expr.compile(self, (&mut nfa, boundary));
        self.next_state = saved_next_state;
        result?;

        Ok(nfa)
    }

    fn build_automaton(&mut self, expr: &Expr<'source>) -> Result<Automaton, Error> {
        let nfa = self.build_nfa(expr)?;
        Ok(determinize_minimize(&nfa))
    }

    /// Builds `expr` between two new states, which are connected to
    /// `outer` by epsilon transitions. Returns the new states.
    fn connect(
        &mut self,
        expr: &Expr<'source>,
        nfa: &mut Automaton,
        outer: Boundary,
    ) -> Result<Boundary, Error> {
        let inner = Boundary {
            entry: self.new_state(),
            exit: self.new_state(),
        };
        expr.compile(self, (&mut *nfa, inner))?;
        nfa.add_transition(outer.entry, inner.entry, SymbolId::EPSILON);
        nfa.add_transition(inner.exit, outer.exit, SymbolId::EPSILON);
        Ok(inner)
    }

    fn add_slot(
        &mut self,
        name: &str,
        rule: RuleIndex,
        range: SourceRange,
        reason: &str,
    ) -> Result<usize, Error> {
        let max_slots = self.options.max_slots_per_rule;
        self.grammar.rule_mut(self.rule_index).add_slot(
            &mut self.symbols,
            name,
            rule,
            range,
            reason,
            max_slots,
        )
    }

    fn add_keyword_token(
        &mut self,
        literal: Literal<'source>,
        role: TokenRole,
    ) -> Result<SymbolId, Error> {
        let range = self.range(literal.raw());
        self.grammar.rule_mut(self.rule_index).add_keyword_token(
            &mut self.symbols,
            literal,
            range,
            role,
        )
    }

    /// Resolves a reference to another rule and returns the symbol of its
    /// slot.
    fn add_reference(
        &mut self,
        expr: &Expr<'source>,
        rule: Id<'source>,
        rename: Option<Id<'source>>,
    ) -> Result<SymbolId, Error> {
        let ident_range = self.range(rule.as_str());
        let Some(target) = self.grammar.find_rule(rule.as_str())
        else {
            return Err(Error::new(ErrorKind::UnknownRule(rule.to_string())).with_range(ident_range));
        };

        if self.bracket_nesting == 0 && target <= self.rule_index {
            let current = self.rule().name.clone();
            let kind = if target == self.rule_index {
                ErrorKind::SelfReference(current)
            }
            else {
                ErrorKind::BackwardReference {
                    rule: current,
                    target: rule.to_string(),
                }
            };
            return Err(Error::new(kind)
                .with_range(self.grammar.rule(target).name_range)
                .with_range(ident_range));
        }

        let name = rename.unwrap_or(rule);
        let range = self.range(expr.text);
        let slot = self.add_slot(name.as_str(), target, range, SLOT_CONFLICT)?;
        Ok(self.rule().slots[slot].symbol)
    }

    /// Compiles the contents of a bracket into its own automaton and returns
    /// the bracket's symbol.
    fn add_bracket(
        &mut self,
        range: SourceRange,
        begin: Literal<'source>,
        end: Literal<'source>,
        expr: Option<&Expr<'source>>,
    ) -> Result<SymbolId, Error> {
        let index = self.rule().brackets.len();
        self.rule_mut().brackets.push(Bracket {
            automaton: Automaton::empty(),
            symbol: SymbolId::EPSILON,
            start_symbol: SymbolId::EPSILON,
            end_symbol: SymbolId::EPSILON,
            range,
        });

        if let Some(expr) = expr {
            self.bracket_nesting += 1;
            let automaton = self.build_automaton(expr)?;
            self.bracket_nesting -= 1;
            self.rule_mut().brackets[index].automaton = automaton;
        }

        let symbol = self.symbols.allocate();
        let start_symbol = self.add_keyword_token(begin, TokenRole::Start)?;
        let end_symbol = self.add_keyword_token(end, TokenRole::End)?;
        if start_symbol.is_epsilon() {
            return Err(Error::new(ErrorKind::EmptyBracketKeyword(TokenRole::Start))
                .with_range(self.range(begin.raw())));
        }
        if end_symbol.is_epsilon() {
            return Err(Error::new(ErrorKind::EmptyBracketKeyword(TokenRole::End))
                .with_range(self.range(end.raw())));
        }

        let bracket = &mut self.rule_mut().brackets[index];
        bracket.symbol = symbol;
        bracket.start_symbol = start_symbol;
        bracket.end_symbol = end_symbol;

        Ok(symbol)
    }

    /// Fails if the rule already has a choice or an operator named `name`.
    fn check_duplicate_clause(&self, name: Id<'source>) -> Result<(), Error> {
        let rule = self.rule();
        let existing = rule
            .choice(name.as_str())
            .map(|choice| (ClauseKind::Choice, choice.expr_range, choice.name_range))
            .or_else(|| {
                rule.operator(name.as_str()).map(|operator| {
                    (
                        ClauseKind::Operator,
                        operator.expr_range,
                        operator.name_range,
                    )
                })
            });

        match existing {
            Some((clause, expr_range, name_range)) => {
                Err(Error::new(ErrorKind::DuplicateClause {
                    clause,
                    name: name.to_string(),
                })
                .with_range(expr_range)
                .with_range(name_range)
                .with_range(self.range(name.as_str())))
            }
            None => Ok(()),
        }
    }

    fn add_choice(&mut self, clause: &Clause<'source>) -> Result<(), Error> {
        let max_clauses = self.options.max_clauses_per_rule;
        if self.rule().choices.len() >= max_clauses {
            return Err(
                Error::new(ErrorKind::TooManyChoices(max_clauses)).with_range(self.rule().name_range)
            );
        }
        self.check_duplicate_clause(clause.name)?;

        let automaton = self.build_automaton(&clause.expr)?;
        let choice = Choice {
            name: clause.name.to_string(),
            name_range: self.range(clause.name.as_str()),
            expr_range: self.range(clause.expr.text),
            automaton,
        };
        self.rule_mut().choices.push(choice);

        Ok(())
    }

    /// Adds the slots operators take their operands from. If any infix
    /// operator isn't flat, these are `left` and `right`, otherwise a single
    /// `operand`. Both refer to the rule itself.
    fn add_operand_slots(&mut self) -> Result<(), Error> {
        let rule = self.rule();
        let cited = rule
            .operators
            .iter()
            .find(|operator| operator.is_binary())
            .map(|operator| (true, operator))
            .or_else(|| rule.operators.first().map(|operator| (false, operator)));
        let Some((is_binary, operator)) = cited
        else {
            return Ok(());
        };

        let name = operator.name.clone();
        let range = operator.name_range;
        let index = self.rule_index;

        if is_binary {
            let left = self.add_slot(
                "left",
                index,
                range,
                &format!("is reserved for the left operand of operator '{name}'"),
            )?;
            let right = self.add_slot(
                "right",
                index,
                range,
                &format!("is reserved for the right operand of operator '{name}'"),
            )?;
            let rule = self.rule_mut();
            rule.left_slot = Some(left);
            rule.right_slot = Some(right);
        }
        else {
            let operand = self.add_slot(
                "operand",
                index,
                range,
                &format!("is reserved for the operand of operator '{name}'"),
            )?;
            self.rule_mut().operand_slot = Some(operand);
        }

        Ok(())
    }
}

trait Compile<'source> {
    type Context<'context>: 'context
    where
        Self: 'context;

    fn compile<'ast, 'context>(
        &'ast self,
        compiler: &mut Compiler<'source>,
        context: Self::Context<'context>,
    ) -> Result<(), Error>;
}

impl<'source> Compile<'source> for ast::Grammar<'source> {
    type Context<'context> = () where Self: 'context;

    fn compile<'ast, 'context>(
        &'ast self,
        compiler: &mut Compiler<'source>,
        _: (),
    ) -> Result<(), Error> {
        let _span = tracing::debug_span!("compile", rules = self.rules.len()).entered();

        if self.rules.is_empty() {
            return Err(Error::new(ErrorKind::EmptyGrammar));
        }

        // register all rules first, so that they can be referenced before
        // they're defined.
        for production in &self.rules {
            let range = compiler.range(production.name.as_str());
            compiler
                .grammar
                .add_rule(production.name.as_str(), range)?;
        }
        for name in TOKEN_RULES {
            compiler.grammar.add_token_rule(name);
        }

        for (index, production) in self.rules.iter().enumerate() {
            production.compile(compiler, RuleIndex(index as u32))?;
        }

        tracing::debug!(rules = compiler.grammar.rules.len(), "compiled grammar");

        Ok(())
    }
}

impl<'source> Compile<'source> for Production<'source> {
    type Context<'context> = RuleIndex where Self: 'context;

    fn compile<'ast, 'context>(
        &'ast self,
        compiler: &mut Compiler<'source>,
        index: RuleIndex,
    ) -> Result<(), Error> {
        let _span = tracing::debug_span!("rule", name = %self.name).entered();
        compiler.begin_rule(index);

        match &self.body {
            Body::Expr(expr) => {
                let automaton = compiler.build_automaton(expr)?;
                compiler.rule_mut().automaton = automaton;
            }
            Body::Choices { choices, operators } => {
                for choice in choices {
                    compiler.add_choice(choice)?;
                }

                // each section binds less tightly than the one before.
                let mut precedence = -1;
                for section in operators {
                    section.compile(compiler, precedence)?;
                    precedence -= 1;
                }

                compiler.add_operand_slots()?;
            }
        }

        let rule = compiler.rule();
        tracing::debug!(
            choices = rule.choices.len(),
            operators = rule.operators.len(),
            slots = rule.slots.len(),
            tokens = rule.keyword_tokens.len(),
            brackets = rule.brackets.len(),
            "compiled rule"
        );

        Ok(())
    }
}

impl<'source> Compile<'source> for Operators<'source> {
    type Context<'context> = i32 where Self: 'context;

    fn compile<'ast, 'context>(
        &'ast self,
        compiler: &mut Compiler<'source>,
        precedence: i32,
    ) -> Result<(), Error> {
        for clause in &self.operators {
            let max_clauses = compiler.options.max_clauses_per_rule;
            let rule = compiler.rule();
            if rule.choices.len() + rule.operators.len() >= max_clauses {
                return Err(Error::new(ErrorKind::TooManyClauses(max_clauses))
                    .with_range(rule.name_range));
            }
            compiler.check_duplicate_clause(clause.name)?;

            let automaton = compiler.build_automaton(&clause.expr)?;
            let operator = Operator {
                name: clause.name.to_string(),
                name_range: compiler.range(clause.name.as_str()),
                expr_range: compiler.range(clause.expr.text),
                fixity: self.fixity,
                associativity: self.associativity,
                precedence,
                automaton,
            };
            compiler.rule_mut().operators.push(operator);
        }

        Ok(())
    }
}

impl<'source> Compile<'source> for Expr<'source> {
    type Context<'context> = (&'context mut Automaton, Boundary) where Self: 'context;

    fn compile<'ast, 'context>(
        &'ast self,
        compiler: &mut Compiler<'source>,
        (nfa, boundary): (&'context mut Automaton, Boundary),
    ) -> Result<(), Error> {
        compiler.expression_nesting += 1;
        if compiler.expression_nesting > compiler.options.max_expression_nesting {
            return Err(Error::new(ErrorKind::NestedTooDeeply).with_range(compiler.range(self.text)));
        }

        match &self.kind {
            ExprKind::Choice(alternatives) => {
                for alternative in alternatives {
                    compiler.connect(alternative, nfa, boundary)?;
                }
            }
            ExprKind::Concatenation(terms) => {
                let mut last = compiler.new_state();
                nfa.add_transition(boundary.entry, last, SymbolId::EPSILON);
                for term in terms {
                    let next = compiler.new_state();
                    term.compile(
                        compiler,
                        (
                            &mut *nfa,
                            Boundary {
                                entry: last,
                                exit: next,
                            },
                        ),
                    )?;
                    last = next;
                }
                nfa.add_transition(last, boundary.exit, SymbolId::EPSILON);
            }
            ExprKind::Ident { rule, rename } => {
                let symbol = compiler.add_reference(self, *rule, *rename)?;
                nfa.add_transition(boundary.entry, boundary.exit, symbol);
            }
            ExprKind::Literal(literal) => {
                let symbol = compiler.add_keyword_token(*literal, TokenRole::Normal)?;
                nfa.add_transition(boundary.entry, boundary.exit, symbol);
            }
            ExprKind::Parens(inner) => {
                inner.compile(compiler, (nfa, boundary))?;
            }
            ExprKind::Bracketed { begin, end, expr } => {
                let range = compiler.range(self.text);
                let symbol = compiler.add_bracket(range, *begin, *end, expr.as_deref())?;
                nfa.add_transition(boundary.entry, boundary.exit, symbol);
            }
            ExprKind::ZeroOrMore(inner) => {
                let inner = compiler.connect(inner, nfa, boundary)?;
                nfa.add_transition(inner.exit, inner.entry, SymbolId::EPSILON);
                nfa.add_transition(boundary.entry, boundary.exit, SymbolId::EPSILON);
            }
            ExprKind::OneOrMore(inner) => {
                let inner = compiler.connect(inner, nfa, boundary)?;
                nfa.add_transition(inner.exit, inner.entry, SymbolId::EPSILON);
            }
            ExprKind::Optional(inner) => {
                compiler.connect(inner, nfa, boundary)?;
                nfa.add_transition(boundary.entry, boundary.exit, SymbolId::EPSILON);
            }
        }

        compiler.expression_nesting -= 1;
        Ok(())
    }
}
