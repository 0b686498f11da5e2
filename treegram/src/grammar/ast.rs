//! Parse tree of a grammar source.
//!
//! Nodes borrow their text from the source, which lets the compiler turn any
//! node back into a [`SourceRange`](super::SourceRange) for diagnostics.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grammar<'source> {
    pub source: &'source str,
    pub rules: Vec<Production<'source>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Production<'source> {
    pub name: Id<'source>,
    pub body: Body<'source>,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Hash,
    PartialEq,
    Eq,
    derive_more::Display,
    derive_more::From,
    derive_more::AsRef,
)]
pub struct Id<'source>(pub(super) &'source str);

impl<'source> Id<'source> {
    pub fn as_str(&self) -> &'source str {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body<'source> {
    /// `rule = expr`
    Expr(Expr<'source>),

    /// One or more named choices, optionally followed by operator sections.
    Choices {
        choices: Vec<Clause<'source>>,
        operators: Vec<Operators<'source>>,
    },
}

/// `name: expr`, used for both choices and operators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clause<'source> {
    pub name: Id<'source>,
    pub expr: Expr<'source>,
}

/// An `@infix left` (etc.) section and the operators declared in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operators<'source> {
    pub fixity: Fixity,
    pub associativity: Option<Associativity>,
    pub operators: Vec<Clause<'source>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Fixity {
    #[display(fmt = "prefix")]
    Prefix,
    #[display(fmt = "postfix")]
    Postfix,
    #[display(fmt = "infix")]
    Infix,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Associativity {
    #[display(fmt = "left")]
    Left,
    #[display(fmt = "right")]
    Right,
    #[display(fmt = "flat")]
    Flat,
    #[display(fmt = "nonassoc")]
    NonAssoc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expr<'source> {
    /// The source text this expression was parsed from.
    pub text: &'source str,
    pub kind: ExprKind<'source>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprKind<'source> {
    /// `a | b | c`
    Choice(Vec<Expr<'source>>),
    /// `a b c`
    Concatenation(Vec<Expr<'source>>),
    /// `rule` or `rule@slot`
    Ident {
        rule: Id<'source>,
        rename: Option<Id<'source>>,
    },
    Literal(Literal<'source>),
    /// `( expr )`
    Parens(Box<Expr<'source>>),
    /// `[ "begin" expr? "end" ]`
    Bracketed {
        begin: Literal<'source>,
        end: Literal<'source>,
        expr: Option<Box<Expr<'source>>>,
    },
    ZeroOrMore(Box<Expr<'source>>),
    OneOrMore(Box<Expr<'source>>),
    Optional(Box<Expr<'source>>),
}

/// A keyword literal, including its quotes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Literal<'source>(pub(super) &'source str);

impl<'source> Literal<'source> {
    pub fn raw(&self) -> &'source str {
        self.0
    }

    /// The literal without its quotes, or `None` for a literal shorter than
    /// its two delimiters.
    pub fn content(&self) -> Option<&'source str> {
        if self.0.len() <= 2 {
            return None;
        }
        self.0.get(1..self.0.len() - 1)
    }
}

impl<'source> Expr<'source> {
    pub fn new(text: &'source str, kind: ExprKind<'source>) -> Self {
        Self { text, kind }
    }

    /// Builds an expression node from borrowed text, e.g. for grammars
    /// constructed in code rather than parsed.
    pub fn ident(rule: &'source str) -> Self {
        Self::new(
            rule,
            ExprKind::Ident {
                rule: Id(rule),
                rename: None,
            },
        )
    }

    pub fn literal(raw: &'source str) -> Self {
        Self::new(raw, ExprKind::Literal(Literal(raw)))
    }
}

impl<'source> From<&'source str> for Literal<'source> {
    fn from(value: &'source str) -> Self {
        Literal(value)
    }
}
