pub mod ast;
pub mod compiled;
pub mod compiler;
pub mod diagnostic;
#[cfg(feature = "parser")]
mod parser;

#[cfg(feature = "parser")]
use std::path::Path;

pub use self::{
    compiled::{
        Bracket,
        Choice,
        Grammar,
        OperandSlots,
        Operator,
        Rule,
        RuleIndex,
        Slot,
        Token,
        TokenRole,
    },
    compiler::CompileOptions,
    diagnostic::{
        Report,
        SourceRange,
    },
};
use self::compiler::Compiler;

/// A compilation error and the source ranges it refers to.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,

    /// Empty ranges (items without a source location) are skipped when
    /// rendering a [`Report`].
    pub ranges: Vec<SourceRange>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            ranges: vec![],
        }
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.ranges.push(range);
        self
    }

    /// Renders this error with the source lines its ranges point at.
    pub fn report(&self, source: &str) -> String {
        diagnostic::report(self, source, None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("parse error:\n{0}")]
    Parse(String),

    #[error("a grammar needs at least one rule of the form 'rule_name = ...'")]
    EmptyGrammar,

    #[error("there are multiple rules named '{0}'")]
    DuplicateRule(String),

    #[error("there's already {} named '{name}'", .clause.with_article())]
    DuplicateClause { clause: ClauseKind, name: String },

    #[error("unknown rule or token '{0}'")]
    UnknownRule(String),

    #[error("outside of guard brackets [ ], the rule '{0}' cannot refer to itself")]
    SelfReference(String),

    #[error(
        "outside of guard brackets [ ], the rule '{rule}' cannot refer to the earlier rule '{target}'"
    )]
    BackwardReference { rule: String, target: String },

    #[error("in the rule '{rule}', the name '{slot}' {reason}")]
    SlotConflict {
        rule: String,
        slot: String,
        reason: String,
    },

    #[error(
        "token '{token}' can't be used as both {} and {} keyword",
        .existing.with_article(),
        .requested.with_article()
    )]
    TokenRoleConflict {
        token: String,
        existing: TokenRole,
        requested: TokenRole,
    },

    #[error("rules with more than {0} choice clauses are currently unsupported")]
    TooManyChoices(usize),

    #[error(
        "rules with more than {0} combined choice and operator clauses are currently unsupported"
    )]
    TooManyClauses(usize),

    #[error("rules with more than {0} references to other rules or tokens are currently unsupported")]
    TooManySlots(usize),

    #[error("operators are nested too deeply")]
    NestedTooDeeply,

    #[error("'' is not a valid {0} keyword")]
    EmptyBracketKeyword(TokenRole),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, derive_more::Display)]
pub enum ClauseKind {
    #[display(fmt = "choice")]
    Choice,
    #[display(fmt = "operator")]
    Operator,
}

impl ClauseKind {
    pub fn with_article(&self) -> &'static str {
        match self {
            ClauseKind::Choice => "a choice",
            ClauseKind::Operator => "an operator",
        }
    }
}

#[cfg(feature = "parser")]
pub fn parse(input: &str) -> Result<ast::Grammar<'_>, Error> {
    parser::check_nesting(input)?;

    match parser::parse_grammar_complete(input) {
        Ok((_, ast)) => Ok(ast),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(Error::new(ErrorKind::Parse(nom::error::convert_error(
                input, e,
            ))))
        }
        Err(nom::Err::Incomplete(_)) => unreachable!("complete parsers don't return Incomplete"),
    }
}

pub fn compile(ast: &ast::Grammar<'_>) -> Result<Grammar, Error> {
    compile_with_options(ast, &CompileOptions::default())
}

pub fn compile_with_options(
    ast: &ast::Grammar<'_>,
    options: &CompileOptions,
) -> Result<Grammar, Error> {
    let mut compiler = Compiler::new(ast.source, options.clone());
    compiler.push_ast(ast)?;
    Ok(compiler.finish())
}

/// Parses and compiles a grammar file. Errors are rendered against the file's
/// contents.
#[cfg(feature = "parser")]
pub fn compile_from_source(
    path: impl AsRef<Path>,
    options: &CompileOptions,
) -> Result<Grammar, crate::Error> {
    let path = path.as_ref();
    tracing::debug!("compiling grammar: {}", path.display());

    let source = std::fs::read_to_string(path)?;
    let origin = path.display().to_string();
    parse(&source)
        .and_then(|ast| compile_with_options(&ast, options))
        .map_err(|error| {
            let report = diagnostic::report(&error, &source, Some(&origin));
            crate::Error::Grammar { error, report }
        })
}
