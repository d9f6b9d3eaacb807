//! # Minimal Expression Grammar
//!
//! Parser for the expression language of the `minimal` datamodel.
//!
//! ## Grammar
//!
//! ```text
//! expr       := or
//! or         := and ("||" and)*
//! and        := equality ("&&" equality)*
//! equality   := comparison (("===" | "!==" | "==" | "!=") comparison)*
//! comparison := additive (("<=" | ">=" | "<" | ">") additive)*
//! additive   := term (("+" | "-") term)*
//! term       := unary (("*" | "/" | "%") unary)*
//! unary      := ("!" | "-") unary | postfix
//! postfix    := primary ("." ident | "[" expr "]")*
//! primary    := number | string | "true" | "false" | "null"
//!             | "[" (expr ("," expr)*)? "]" | ident "(" args ")" | ident | "(" expr ")"
//! script     := statement (";" statement)* ";"?
//! statement  := location "=" expr | expr
//! location   := ident ("." ident)*
//! ```
//!
//! Strings are single or double quoted without escape sequences.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, not, opt, recognize},
    error::{context, convert_error, VerboseError},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish, IResult,
};
use serde_json::Value;

use super::{EvalError, EvalResult};

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Assignable path such as `a.b.c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub root: String,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign(Location, Expr),
    Expr(Expr),
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> ParserResult<'a, O>
where
    F: FnMut(&'a str) -> ParserResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> ParserResult<&str> {
    context(
        "identifier",
        recognize(pair(
            alt((alpha1, tag("_"), tag("$"))),
            many0(alt((alphanumeric1, tag("_"), tag("$")))),
        )),
    )(input)
}

fn number(input: &str) -> ParserResult<Expr> {
    context(
        "number",
        map_res(
            recognize(pair(digit1, opt(pair(char('.'), digit1)))),
            |s: &str| -> Result<Expr, std::num::ParseFloatError> {
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(Expr::Literal(Value::from(i)));
                }
                s.parse::<f64>().map(|f| Expr::Literal(Value::from(f)))
            },
        ),
    )(input)
}

fn single_quoted(input: &str) -> ParserResult<&str> {
    delimited(char('\''), take_while(|c: char| c != '\''), char('\''))(input)
}

fn double_quoted(input: &str) -> ParserResult<&str> {
    delimited(char('"'), take_while(|c: char| c != '"'), char('"'))(input)
}

fn string(input: &str) -> ParserResult<Expr> {
    context(
        "string",
        map(alt((single_quoted, double_quoted)), |s: &str| {
            Expr::Literal(Value::String(s.to_string()))
        }),
    )(input)
}

fn array(input: &str) -> ParserResult<Expr> {
    context(
        "array",
        map(
            delimited(
                char('['),
                separated_list0(char(','), ws(expression)),
                preceded(multispace0, char(']')),
            ),
            Expr::Array,
        ),
    )(input)
}

fn word(input: &str) -> ParserResult<Expr> {
    let (rest, name) = identifier(input)?;
    let (after, args) = opt(preceded(
        multispace0,
        delimited(
            char('('),
            separated_list0(char(','), ws(expression)),
            preceded(multispace0, char(')')),
        ),
    ))(rest)?;
    let expr = match (name, args) {
        (_, Some(args)) => Expr::Call(name.to_string(), args),
        ("true", None) => Expr::Literal(Value::Bool(true)),
        ("false", None) => Expr::Literal(Value::Bool(false)),
        ("null", None) => Expr::Literal(Value::Null),
        (_, None) => Expr::Var(name.to_string()),
    };
    Ok((after, expr))
}

fn primary(input: &str) -> ParserResult<Expr> {
    context(
        "primary",
        preceded(
            multispace0,
            alt((
                number,
                string,
                array,
                word,
                delimited(char('('), ws(expression), char(')')),
            )),
        ),
    )(input)
}

enum Accessor {
    Field(String),
    Index(Expr),
}

fn postfix(input: &str) -> ParserResult<Expr> {
    let (input, base) = primary(input)?;
    let accessor = alt((
        map(preceded(ws(char('.')), identifier), |f: &str| {
            Accessor::Field(f.to_string())
        }),
        map(
            preceded(
                multispace0,
                delimited(char('['), ws(expression), char(']')),
            ),
            Accessor::Index,
        ),
    ));
    let (input, accessors) = many0(accessor)(input)?;
    let expr = accessors.into_iter().fold(base, |acc, a| match a {
        Accessor::Field(f) => Expr::Member(Box::new(acc), f),
        Accessor::Index(i) => Expr::Index(Box::new(acc), Box::new(i)),
    });
    Ok((input, expr))
}

fn not_expr(input: &str) -> ParserResult<Expr> {
    map(preceded(pair(multispace0, char('!')), unary), |e| {
        Expr::Unary(UnaryOp::Not, Box::new(e))
    })(input)
}

fn neg_expr(input: &str) -> ParserResult<Expr> {
    map(preceded(pair(multispace0, char('-')), unary), |e| {
        Expr::Unary(UnaryOp::Neg, Box::new(e))
    })(input)
}

fn unary(input: &str) -> ParserResult<Expr> {
    context("unary", alt((not_expr, neg_expr, postfix)))(input)
}

/// Left-associative chain of `operand`s joined by one of `ops`.
/// Operators sharing a prefix must be listed longest first.
fn fold_binary<'a>(
    input: &'a str,
    operand: fn(&'a str) -> ParserResult<'a, Expr>,
    ops: &[(&'static str, BinaryOp)],
) -> ParserResult<'a, Expr> {
    let (mut input, mut lhs) = operand(input)?;
    'chain: loop {
        let rest = input.trim_start();
        for (symbol, op) in ops {
            if let Some(after) = rest.strip_prefix(*symbol) {
                let (after, rhs) = operand(after)?;
                lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                input = after;
                continue 'chain;
            }
        }
        return Ok((input, lhs));
    }
}

fn term(input: &str) -> ParserResult<Expr> {
    fold_binary(
        input,
        unary,
        &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
    )
}

fn additive(input: &str) -> ParserResult<Expr> {
    fold_binary(input, term, &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)])
}

fn comparison(input: &str) -> ParserResult<Expr> {
    fold_binary(
        input,
        additive,
        &[
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
        ],
    )
}

fn equality(input: &str) -> ParserResult<Expr> {
    fold_binary(
        input,
        comparison,
        &[
            ("===", BinaryOp::Eq),
            ("!==", BinaryOp::Ne),
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::Ne),
        ],
    )
}

fn and(input: &str) -> ParserResult<Expr> {
    fold_binary(input, equality, &[("&&", BinaryOp::And)])
}

pub fn expression(input: &str) -> ParserResult<Expr> {
    fold_binary(input, and, &[("||", BinaryOp::Or)])
}

fn location(input: &str) -> ParserResult<Location> {
    context(
        "location",
        map(
            pair(
                preceded(multispace0, identifier),
                many0(preceded(ws(char('.')), identifier)),
            ),
            |(root, path): (&str, Vec<&str>)| Location {
                root: root.to_string(),
                path: path.into_iter().map(str::to_string).collect(),
            },
        ),
    )(input)
}

fn assignment(input: &str) -> ParserResult<Statement> {
    context(
        "assignment",
        map(
            tuple((location, ws(terminated(char('='), not(char('=')))), expression)),
            |(loc, _, value)| Statement::Assign(loc, value),
        ),
    )(input)
}

fn statement(input: &str) -> ParserResult<Statement> {
    alt((assignment, map(expression, Statement::Expr)))(input)
}

fn complete<'a, O>(
    source: &'a str,
    parser: impl FnMut(&'a str) -> ParserResult<'a, O>,
) -> EvalResult<O> {
    all_consuming(ws(parser))(source)
        .finish()
        .map(|(_, out)| out)
        .map_err(|e| EvalError::Parse {
            expr: source.to_string(),
            message: convert_error(source, e),
        })
}

pub fn parse_expression(source: &str) -> EvalResult<Expr> {
    complete(source, expression)
}

pub fn parse_location(source: &str) -> EvalResult<Location> {
    complete(source, location).map_err(|_| EvalError::InvalidLocation(source.to_string()))
}

pub fn parse_script(source: &str) -> EvalResult<Vec<Statement>> {
    complete(
        source,
        terminated(
            separated_list0(ws(char(';')), statement),
            opt(ws(char(';'))),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn lit(v: Value) -> Box<Expr> {
        Box::new(Expr::Literal(v))
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse_expression("x + 1 * 2").unwrap(),
            Expr::Binary(
                BinaryOp::Add,
                var("x"),
                Box::new(Expr::Binary(BinaryOp::Mul, lit(json!(1)), lit(json!(2))))
            )
        );
        assert_eq!(
            parse_expression("a < 1 && !b").unwrap(),
            Expr::Binary(
                BinaryOp::And,
                Box::new(Expr::Binary(BinaryOp::Lt, var("a"), lit(json!(1)))),
                Box::new(Expr::Unary(UnaryOp::Not, var("b")))
            )
        );
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(
            parse_expression("a <= b").unwrap(),
            Expr::Binary(BinaryOp::Le, var("a"), var("b"))
        );
        assert_eq!(
            parse_expression("a != b").unwrap(),
            Expr::Binary(BinaryOp::Ne, var("a"), var("b"))
        );
    }

    #[test]
    fn test_postfix_and_calls() {
        assert_eq!(
            parse_expression("_event.data[0]").unwrap(),
            Expr::Index(
                Box::new(Expr::Member(var("_event"), "data".to_string())),
                lit(json!(0))
            )
        );
        assert_eq!(
            parse_expression("In('s1')").unwrap(),
            Expr::Call("In".to_string(), vec![Expr::Literal(json!("s1"))])
        );
        assert_eq!(
            parse_expression("[1, 'a', null]").unwrap(),
            Expr::Array(vec![
                Expr::Literal(json!(1)),
                Expr::Literal(json!("a")),
                Expr::Literal(Value::Null)
            ])
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_expression("42").unwrap(), Expr::Literal(json!(42)));
        assert_eq!(parse_expression("2.5").unwrap(), Expr::Literal(json!(2.5)));
    }

    #[test]
    fn test_script_statements() {
        let script = parse_script("x = x + 1; y.z = 'a';").unwrap();
        assert_eq!(script.len(), 2);
        assert!(matches!(&script[0], Statement::Assign(loc, _) if loc.root == "x"));
        assert!(matches!(
            &script[1],
            Statement::Assign(loc, _) if loc.path == vec!["z".to_string()]
        ));
        assert!(matches!(
            parse_script("x == 1").unwrap()[0],
            Statement::Expr(_)
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_expression("1 +"), Err(EvalError::Parse { .. })));
        assert!(matches!(parse_expression("(a"), Err(EvalError::Parse { .. })));
        assert!(matches!(
            parse_location("a.1"),
            Err(EvalError::InvalidLocation(_))
        ));
    }
}
