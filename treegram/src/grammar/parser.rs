use nom::{
    branch::alt,
    bytes::complete::{
        escaped,
        is_not,
        tag,
        take_while,
    },
    character::complete::{
        anychar,
        char,
        multispace0,
        none_of,
        one_of,
        satisfy,
    },
    combinator::{
        all_consuming,
        consumed,
        cut,
        map,
        not,
        opt,
        peek,
        recognize,
        value,
    },
    error::{
        context,
        VerboseError,
    },
    multi::{
        many0,
        many0_count,
        many1,
        separated_list1,
    },
    sequence::{
        delimited,
        pair,
        preceded,
        terminated,
        tuple,
    },
    IResult,
};

use super::{
    ast::{
        Associativity,
        Body,
        Clause,
        Expr,
        ExprKind,
        Fixity,
        Grammar,
        Id,
        Literal,
        Operators,
        Production,
    },
    Error,
    ErrorKind,
    SourceRange,
};

type Res<'a, U> = IResult<&'a str, U, VerboseError<&'a str>>;

/// Groups (parentheses and brackets) and stacked qualifiers can't be nested
/// deeper than this.
pub const MAX_GROUP_NESTING: usize = 256;

/// Rejects inputs that nest groups deeper than [`MAX_GROUP_NESTING`], before
/// the recursive descent parser sees them.
///
/// Runs of qualifiers (`x***`) count towards the depth too, since each one
/// wraps the expression once more.
pub(super) fn check_nesting(input: &str) -> Result<(), Error> {
    let mut depth = 0usize;
    let mut qualifiers = 0usize;
    let mut chars = input.char_indices();

    while let Some((offset, c)) = chars.next() {
        match c {
            '#' => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }
            '"' | '\'' => {
                let quote = c;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '\r' | '\n' => break,
                        c if c == quote => break,
                        _ => {}
                    }
                }
                qualifiers = 0;
                continue;
            }
            '(' | '[' => {
                depth += 1;
                qualifiers = 0;
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                qualifiers = 0;
            }
            '*' | '+' | '?' => qualifiers += 1,
            c if c.is_whitespace() => continue,
            _ => qualifiers = 0,
        }

        if depth + qualifiers > MAX_GROUP_NESTING {
            return Err(Error::new(ErrorKind::NestedTooDeeply)
                .with_range(SourceRange::new(offset, offset + c.len_utf8())));
        }
    }

    Ok(())
}

/// consumes a single comment
fn consume_comment(input: &str) -> Res<()> {
    value((), pair(char('#'), opt(is_not("\r\n"))))(input)
}

/// consumes whitespace and comments
fn consume_wsc<'a>(input: &'a str) -> Res<'a, ()> {
    value(
        (),
        terminated(
            many0_count(preceded(multispace0, consume_comment)),
            multispace0,
        ),
    )(input)
}

/// consumes all whitespace and comments before calling the parser `f`
fn wsc<'a, U>(f: impl FnMut(&'a str) -> Res<'a, U>) -> impl FnMut(&'a str) -> Res<'a, U> {
    preceded(consume_wsc, f)
}

/// like [`wsc`], but also returns the source text `f` consumed
fn spanned<'a, U>(
    f: impl FnMut(&'a str) -> Res<'a, U>,
) -> impl FnMut(&'a str) -> Res<'a, (&'a str, U)> {
    preceded(consume_wsc, consumed(f))
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// a keyword that isn't just the start of a longer identifier
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    terminated(tag(word), not(satisfy(is_ident_char)))
}

pub(super) fn parse_grammar_complete(input: &str) -> Res<'_, Grammar<'_>> {
    let (rest, rules) = context(
        "grammar",
        all_consuming(terminated(many0(parse_rule), consume_wsc)),
    )(input)?;

    Ok((
        rest,
        Grammar {
            source: input,
            rules,
        },
    ))
}

fn parse_rule<'a>(input: &'a str) -> Res<'a, Production<'a>> {
    context(
        "rule",
        map(
            pair(terminated(parse_id, wsc(char('='))), cut(parse_body)),
            |(name, body)| Production { name, body },
        ),
    )(input)
}

fn parse_body<'a>(input: &'a str) -> Res<'a, Body<'a>> {
    context(
        "body",
        alt((
            map(
                pair(many1(parse_clause), many0(parse_operators)),
                |(choices, operators)| Body::Choices { choices, operators },
            ),
            map(parse_expr, Body::Expr),
        )),
    )(input)
}

fn parse_clause<'a>(input: &'a str) -> Res<'a, Clause<'a>> {
    context(
        "clause",
        map(
            pair(terminated(parse_id, wsc(char(':'))), cut(parse_expr)),
            |(name, expr)| Clause { name, expr },
        ),
    )(input)
}

fn parse_operators<'a>(input: &'a str) -> Res<'a, Operators<'a>> {
    context(
        "operators",
        map(
            preceded(
                wsc(char('@')),
                cut(tuple((
                    parse_fixity,
                    opt(parse_associativity),
                    many1(parse_clause),
                ))),
            ),
            |(fixity, associativity, operators)| {
                Operators {
                    fixity,
                    associativity,
                    operators,
                }
            },
        ),
    )(input)
}

fn parse_fixity(input: &str) -> Res<Fixity> {
    context(
        "fixity",
        wsc(alt((
            value(Fixity::Prefix, keyword("prefix")),
            value(Fixity::Postfix, keyword("postfix")),
            value(Fixity::Infix, keyword("infix")),
        ))),
    )(input)
}

/// An associativity keyword, unless it's actually the name of the first
/// operator (`@infix left: ...`).
fn parse_associativity(input: &str) -> Res<Associativity> {
    context(
        "associativity",
        wsc(terminated(
            alt((
                value(Associativity::Left, keyword("left")),
                value(Associativity::Right, keyword("right")),
                value(Associativity::Flat, keyword("flat")),
                value(Associativity::NonAssoc, keyword("nonassoc")),
            )),
            peek(not(wsc(char(':')))),
        )),
    )(input)
}

fn parse_ident(input: &str) -> Res<&str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(input)
}

fn parse_id<'a>(input: &'a str) -> Res<'a, Id<'a>> {
    context("identifier", map(wsc(parse_ident), Id))(input)
}

fn parse_expr<'a>(input: &'a str) -> Res<'a, Expr<'a>> {
    context(
        "expression",
        map(
            spanned(separated_list1(wsc(char('|')), parse_concat)),
            |(text, alternatives)| {
                match <[Expr; 1]>::try_from(alternatives) {
                    Ok([expr]) => expr,
                    Err(alternatives) => Expr::new(text, ExprKind::Choice(alternatives)),
                }
            },
        ),
    )(input)
}

fn parse_concat<'a>(input: &'a str) -> Res<'a, Expr<'a>> {
    map(spanned(many1(parse_postfix)), |(text, terms)| {
        match <[Expr; 1]>::try_from(terms) {
            Ok([term]) => term,
            Err(terms) => Expr::new(text, ExprKind::Concatenation(terms)),
        }
    })(input)
}

fn parse_postfix<'a>(input: &'a str) -> Res<'a, Expr<'a>> {
    let (input, _) = consume_wsc(input)?;
    let begin = input;
    let (mut input, mut expr) = parse_atom(input)?;

    // qualifiers stack, `x*?` is an optional `x*`
    loop {
        match wsc(one_of("*+?"))(input) {
            Ok((rest, qualifier)) => {
                let text = &begin[..begin.len() - rest.len()];
                let inner = Box::new(expr);
                let kind = match qualifier {
                    '*' => ExprKind::ZeroOrMore(inner),
                    '+' => ExprKind::OneOrMore(inner),
                    '?' => ExprKind::Optional(inner),
                    _ => unreachable!(),
                };
                expr = Expr::new(text, kind);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }

    Ok((input, expr))
}

fn parse_atom<'a>(input: &'a str) -> Res<'a, Expr<'a>> {
    context(
        "term",
        alt((
            parse_bracketed,
            parse_parens,
            map(parse_term_literal, |literal| {
                Expr::new(literal.raw(), ExprKind::Literal(literal))
            }),
            parse_reference,
        )),
    )(input)
}

/// `rule` or `rule@slot`, but not the name of the next rule or clause.
fn parse_reference<'a>(input: &'a str) -> Res<'a, Expr<'a>> {
    context(
        "reference",
        map(
            spanned(terminated(
                pair(parse_ident, opt(preceded(char('@'), cut(parse_ident)))),
                peek(not(wsc(one_of("=:")))),
            )),
            |(text, (rule, rename))| {
                Expr::new(
                    text,
                    ExprKind::Ident {
                        rule: Id(rule),
                        rename: rename.map(Id),
                    },
                )
            },
        ),
    )(input)
}

fn parse_parens<'a>(input: &'a str) -> Res<'a, Expr<'a>> {
    map(
        spanned(delimited(
            char('('),
            cut(parse_expr),
            cut(wsc(char(')'))),
        )),
        |(text, expr)| Expr::new(text, ExprKind::Parens(Box::new(expr))),
    )(input)
}

fn parse_bracketed<'a>(input: &'a str) -> Res<'a, Expr<'a>> {
    context(
        "bracket",
        map(
            spanned(delimited(
                char('['),
                cut(tuple((parse_literal, opt(parse_expr), parse_literal))),
                cut(wsc(char(']'))),
            )),
            |(text, (begin, expr, end))| {
                Expr::new(
                    text,
                    ExprKind::Bracketed {
                        begin,
                        end,
                        expr: expr.map(Box::new),
                    },
                )
            },
        ),
    )(input)
}

/// A literal used as a term. A literal right before `]` is the end keyword of
/// the enclosing bracket.
fn parse_term_literal<'a>(input: &'a str) -> Res<'a, Literal<'a>> {
    terminated(parse_literal, peek(not(wsc(char(']')))))(input)
}

/// A quoted literal, with its quotes. Escapes are kept as written.
fn parse_literal<'a>(input: &'a str) -> Res<'a, Literal<'a>> {
    context(
        "literal",
        wsc(map(
            recognize(alt((
                preceded(
                    char('"'),
                    cut(pair(
                        opt(escaped(none_of("\\\"\r\n"), '\\', anychar)),
                        char('"'),
                    )),
                ),
                preceded(
                    char('\''),
                    cut(pair(
                        opt(escaped(none_of("\\'\r\n"), '\\', anychar)),
                        char('\''),
                    )),
                ),
            ))),
            Literal,
        )),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Grammar {
        parse_grammar_complete(input).unwrap().1
    }

    fn simple_body<'a>(grammar: &'a Grammar, rule: usize) -> &'a Expr<'a> {
        match &grammar.rules[rule].body {
            Body::Expr(expr) => expr,
            body => panic!("expected a simple body: {body:?}"),
        }
    }

    #[test]
    fn it_parses_literals() {
        assert_eq!(parse_literal("\"+\"").unwrap().1, Literal("\"+\""));
        assert_eq!(parse_literal("  '-'").unwrap().1, Literal("'-'"));
        assert_eq!(parse_literal("\"\"").unwrap().1, Literal("\"\""));
        assert_eq!(parse_literal(r#""a\"b""#).unwrap().1, Literal(r#""a\"b""#));
        assert!(parse_literal("\"unterminated").is_err());
    }

    #[test]
    fn it_parses_a_concatenation() {
        let grammar = parse("rule = \"a\" \"b\"");
        assert_eq!(grammar.rules.len(), 1);
        assert_eq!(grammar.rules[0].name, Id("rule"));

        let body = simple_body(&grammar, 0);
        assert_eq!(body.text, "\"a\" \"b\"");
        assert_eq!(
            body.kind,
            ExprKind::Concatenation(vec![Expr::literal("\"a\""), Expr::literal("\"b\"")])
        );
    }

    #[test]
    fn it_parses_choices_between_concatenations() {
        let grammar = parse("rule = a b | c");
        let body = simple_body(&grammar, 0);
        let ExprKind::Choice(alternatives) = &body.kind
        else {
            panic!("expected a choice: {body:?}");
        };
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[0].text, "a b");
        assert_eq!(alternatives[1], Expr::ident("c"));
    }

    #[test]
    fn it_parses_renames() {
        let grammar = parse("rule = expr@lhs \"=\" expr@rhs");
        let body = simple_body(&grammar, 0);
        let ExprKind::Concatenation(terms) = &body.kind
        else {
            panic!("expected a concatenation: {body:?}");
        };
        assert_eq!(terms[0].text, "expr@lhs");
        assert_eq!(
            terms[2].kind,
            ExprKind::Ident {
                rule: Id("expr"),
                rename: Some(Id("rhs")),
            }
        );
    }

    #[test]
    fn it_stacks_qualifiers() {
        let grammar = parse("rule = x * ?");
        let body = simple_body(&grammar, 0);
        assert_eq!(body.text, "x * ?");
        let ExprKind::Optional(inner) = &body.kind
        else {
            panic!("expected an optional: {body:?}");
        };
        assert_eq!(inner.text, "x *");
        assert_eq!(inner.kind, ExprKind::ZeroOrMore(Box::new(Expr::ident("x"))));
    }

    #[test]
    fn it_parses_brackets() {
        let grammar = parse("list = [\"(\" list* \")\"]\nempty = [\"{\" \"}\"]");

        let body = simple_body(&grammar, 0);
        let ExprKind::Bracketed { begin, end, expr } = &body.kind
        else {
            panic!("expected a bracket: {body:?}");
        };
        assert_eq!(begin.content(), Some("("));
        assert_eq!(end.content(), Some(")"));
        assert_eq!(expr.as_ref().unwrap().text, "list*");

        let body = simple_body(&grammar, 1);
        assert_eq!(
            body.kind,
            ExprKind::Bracketed {
                begin: Literal("\"{\""),
                end: Literal("\"}\""),
                expr: None,
            }
        );
    }

    #[test]
    fn it_ends_an_expression_before_the_next_rule() {
        let grammar = parse("a = b c\nb = \"x\"\nc = \"y\"");
        assert_eq!(grammar.rules.len(), 3);
        assert_eq!(simple_body(&grammar, 0).text, "b c");
        assert_eq!(grammar.rules[2].name, Id("c"));
    }

    #[test]
    fn it_parses_choices_and_operators() {
        let grammar = parse(
            r#"
            expr =
              number: number
              parens: "(" expr ")"
            @prefix
              negate: "-"
            @infix left
              times: "*"
              divide: "/"
            @infix left: "<<"
            "#,
        );

        let Body::Choices { choices, operators } = &grammar.rules[0].body
        else {
            panic!("expected choices");
        };
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[1].name, Id("parens"));
        assert_eq!(choices[1].expr.text, "\"(\" expr \")\"");

        assert_eq!(operators.len(), 3);
        assert_eq!(operators[0].fixity, Fixity::Prefix);
        assert_eq!(operators[0].associativity, None);
        assert_eq!(operators[1].associativity, Some(Associativity::Left));
        assert_eq!(operators[1].operators.len(), 2);

        // `left` followed by a colon names an operator
        assert_eq!(operators[2].fixity, Fixity::Infix);
        assert_eq!(operators[2].associativity, None);
        assert_eq!(operators[2].operators[0].name, Id("left"));
    }

    #[test]
    fn it_skips_comments() {
        let grammar = parse("# a comment\nrule = a # another one\n  b\n#");
        assert_eq!(simple_body(&grammar, 0).text, "a # another one\n  b");
    }

    #[test]
    fn it_parses_an_empty_grammar() {
        assert!(parse("  # nothing here\n").rules.is_empty());
    }

    #[test]
    fn it_fails_for_trailing_garbage() {
        assert!(parse_grammar_complete("rule = a )").is_err());
        assert!(parse_grammar_complete("rule = ").is_err());
        assert!(parse_grammar_complete("rule = [\"(\" a").is_err());
    }

    #[test]
    fn it_limits_group_nesting() {
        let ok = format!("rule = {}a{}", "(".repeat(32), ")".repeat(32));
        check_nesting(&ok).unwrap();
        parse_grammar_complete(&ok).unwrap();

        let source = format!("rule = {}a", "(".repeat(MAX_GROUP_NESTING + 1));
        let error = check_nesting(&source).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NestedTooDeeply);
        let offset = 7 + MAX_GROUP_NESTING;
        assert_eq!(error.ranges, vec![SourceRange::new(offset, offset + 1)]);
    }

    #[test]
    fn it_counts_stacked_qualifiers_as_nesting() {
        let source = format!("rule = a{}", "* ".repeat(MAX_GROUP_NESTING + 1));
        let error = check_nesting(&source).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NestedTooDeeply);

        // qualifiers after separate terms don't add up
        check_nesting(&format!("rule = {}", "a* ".repeat(MAX_GROUP_NESTING + 1))).unwrap();
    }

    #[test]
    fn it_ignores_groups_in_literals_and_comments() {
        let source = format!(
            "rule = \"{}\" # {}\n'\\'{}'",
            "(".repeat(300),
            "[".repeat(300),
            "(".repeat(300),
        );
        check_nesting(&source).unwrap();
    }
}
