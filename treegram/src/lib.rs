#![cfg_attr(docsrs, feature(doc_cfg))]

//! A compiler for tree grammars.
//!
//! A grammar is a list of rules. Each rule's body is compiled into a
//! minimized [deterministic automaton][automaton::Automaton] over the rule's
//! symbols: references to other rules ("slots"), keyword tokens and
//! bracketed groups. Rules with named choices and operator sections get one
//! automaton per choice and per operator. The compiled [`grammar::Grammar`]
//! is what a parser generator consumes.
//!
//! # Example
//!
//! ```
//! # use treegram::grammar::{parse, compile};
//! # fn main() -> Result<(), treegram::grammar::Error> {
//! let source = r#"
//!     expr =
//!       call: identifier ["(" expr* ")"]
//!       number: number
//! "#;
//! let ast = parse(source)?;
//! let grammar = compile(&ast)?;
//!
//! let expr = grammar.root_rule();
//! assert_eq!(expr.choices.len(), 2);
//! assert_eq!(expr.brackets.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! `expr` may refer to itself only because the reference is inside guard
//! brackets `[ ]`. Outside of them, a rule can only refer to rules that are
//! defined after it.
//!
//! # Features
//!
//!  - `parser` (default): parsing grammar source text, [`grammar::parse`]
//!    and [`grammar::compile_from_source`].

pub mod automaton;
pub mod grammar;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("grammar error\n{report}")]
    Grammar {
        #[source]
        error: crate::grammar::Error,

        /// The error rendered against the grammar source.
        report: String,
    },
}
