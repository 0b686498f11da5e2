use std::path::PathBuf;

use color_eyre::eyre::{
    bail,
    Error,
};
use structopt::StructOpt;
use treegram::{
    automaton::{
        Automaton,
        SymbolId,
    },
    grammar::{
        compile_from_source,
        CompileOptions,
        Grammar,
        Rule,
    },
};

#[derive(Debug, StructOpt)]
struct Limits {
    /// Maximum nesting depth of expressions.
    #[structopt(long, default_value = "3000")]
    max_expression_nesting: usize,

    /// Maximum number of choices and operators per rule.
    #[structopt(long, default_value = "255")]
    max_clauses: usize,

    /// Maximum number of distinct references per rule.
    #[structopt(long, default_value = "255")]
    max_slots: usize,
}

impl From<Limits> for CompileOptions {
    fn from(limits: Limits) -> Self {
        Self {
            max_expression_nesting: limits.max_expression_nesting,
            max_clauses_per_rule: limits.max_clauses,
            max_slots_per_rule: limits.max_slots,
        }
    }
}

#[derive(Debug, StructOpt)]
enum Args {
    /// Compiles a grammar and reports the first error, if any.
    Check {
        grammar: PathBuf,

        #[structopt(flatten)]
        limits: Limits,
    },
    /// Compiles a grammar and prints the automata of its rules.
    Dump {
        grammar: PathBuf,

        /// Only print this rule.
        #[structopt(short, long)]
        rule: Option<String>,

        #[structopt(flatten)]
        limits: Limits,
    },
}

impl Args {
    pub fn run(self) -> Result<(), Error> {
        match self {
            Self::Check { grammar, limits } => {
                let limits = CompileOptions::from(limits);
                tracing::debug!(?limits, "checking {}", grammar.display());
                let compiled = compile_from_source(&grammar, &limits)?;
                println!(
                    "{}: {} rules",
                    grammar.display(),
                    compiled.rules.iter().filter(|rule| !rule.is_token).count()
                );
            }
            Self::Dump {
                grammar,
                rule,
                limits,
            } => {
                let compiled = compile_from_source(&grammar, &CompileOptions::from(limits))?;
                match rule {
                    Some(name) => {
                        let Some(index) = compiled.find_rule(&name)
                        else {
                            bail!("no rule named '{name}'");
                        };
                        print_rule(&compiled, compiled.rule(index));
                    }
                    None => {
                        for rule in compiled.rules.iter().filter(|rule| !rule.is_token) {
                            print_rule(&compiled, rule);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn print_rule(grammar: &Grammar, rule: &Rule) {
    println!("rule {}", rule.name);

    for slot in &rule.slots {
        println!(
            "  slot {} = {} -> {}",
            slot.symbol,
            slot.name,
            grammar.rule(slot.rule).name
        );
    }
    for token in &rule.keyword_tokens {
        println!("  token {} = '{}' ({})", token.symbol, token.text, token.role);
    }

    if rule.choices.is_empty() && rule.operators.is_empty() {
        print_automaton(rule, &rule.automaton, "  ");
    }
    for choice in &rule.choices {
        println!("  choice {}", choice.name);
        print_automaton(rule, &choice.automaton, "    ");
    }
    for operator in &rule.operators {
        match operator.associativity {
            Some(associativity) => {
                println!(
                    "  operator {} ({} {}, precedence {})",
                    operator.name, operator.fixity, associativity, operator.precedence
                )
            }
            None => {
                println!(
                    "  operator {} ({}, precedence {})",
                    operator.name, operator.fixity, operator.precedence
                )
            }
        }
        print_automaton(rule, &operator.automaton, "    ");
    }
    for bracket in &rule.brackets {
        println!("  bracket {}", bracket.symbol);
        print_automaton(rule, &bracket.automaton, "    ");
    }

    println!();
}

fn print_automaton(rule: &Rule, automaton: &Automaton, indent: &str) {
    for (index, state) in automaton.states().iter().enumerate() {
        let marker = if state.accepting { "*" } else { "" };
        println!("{indent}{index}{marker}");
        for transition in &state.transitions {
            println!(
                "{indent}  {} -> {}",
                symbol_name(rule, transition.symbol),
                transition.target
            );
        }
    }
}

fn symbol_name(rule: &Rule, symbol: SymbolId) -> String {
    if symbol.is_epsilon() {
        "ε".to_owned()
    }
    else if let Some(slot) = rule.slots.iter().find(|slot| slot.symbol == symbol) {
        slot.name.clone()
    }
    else if let Some(token) = rule.keyword_tokens.iter().find(|token| token.symbol == symbol) {
        format!("'{}'", token.text)
    }
    else {
        format!("[{symbol}]")
    }
}

fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::from_args();
    args.run()?;

    Ok(())
}
