//! Embedded expression evaluation.
//!
//! Effects may contain `{...}` fragments. The engine never interprets them
//! itself: it hands the raw source plus the firing rule's bindings to a
//! [`HostEvaluator`] and stores whatever [`HostValue`] comes back.
//!
//! [`ExprEvaluator`] is the bundled adapter. It understands a deliberately
//! small grammar:
//!
//! ```text
//! ternary    := or ( "?" ternary ":" ternary )?
//! or         := and ( "||" and )*
//! and        := equality ( "&&" equality )*
//! equality   := compare ( ("==" | "!=" | "===" | "!==") compare )*
//! compare    := additive ( ("<" | "<=" | ">" | ">=") additive )*
//! additive   := term ( ("+" | "-") term )*
//! term       := unary ( ("*" | "/" | "%") unary )*
//! unary      := ("-" | "!") unary | primary
//! primary    := number | string | true | false | null | $name | name | "(" ternary ")"
//! ```
//!
//! Stack literals are text; text that parses as a finite number takes part in
//! arithmetic as that number, so `{$n * 32}` with `$n` bound to `"5"` yields
//! `160`. `+` concatenates as soon as either side is non-numeric text.

#[path = "eval/lexer.rs"]
mod lexer;

use crate::{Bindings, Symbol};
use lexer::Tok;
use std::fmt;
use thiserror::Error;

/// Opaque result of evaluating an embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Number(n) if n.is_nan() => f.write_str("NaN"),
            HostValue::Number(n) if n.is_infinite() => f.write_str(if *n > 0.0 { "Infinity" } else { "-Infinity" }),
            // whole number: print without decimal point
            HostValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            HostValue::Number(n) => write!(f, "{n}"),
            HostValue::Text(s) => f.write_str(s),
            HostValue::Bool(b) => write!(f, "{b}"),
            HostValue::Null => f.write_str("null"),
        }
    }
}

impl HostValue {
    /// Numeric view used by arithmetic: numbers, and text that parses as one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            HostValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite() && !s.trim().is_empty()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            HostValue::Number(n) => *n != 0.0 && !n.is_nan(),
            HostValue::Text(s) => !s.is_empty(),
            HostValue::Bool(b) => *b,
            HostValue::Null => false,
        }
    }
}

/// Failure reported by an evaluator. The engine wraps it with the offending
/// stack and source in [`crate::GranaryError::Evaluation`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown name `{0}`")]
    UnknownName(String),

    #[error("type error: {0}")]
    Type(String),

    /// Free-form failure from a custom evaluator.
    #[error("{0}")]
    Host(String),
}

/// Capability the engine calls to resolve `{...}` effect symbols.
///
/// `source` is exactly the balanced text between the braces. `bindings` holds
/// the variables bound by the causes of the rule being applied.
pub trait HostEvaluator {
    fn evaluate(&self, source: &str, bindings: &Bindings) -> Result<HostValue, EvalError>;
}

impl<F> HostEvaluator for F
where
    F: Fn(&str, &Bindings) -> Result<HostValue, EvalError>,
{
    fn evaluate(&self, source: &str, bindings: &Bindings) -> Result<HostValue, EvalError> {
        self(source, bindings)
    }
}

/// The bundled restricted arithmetic/string evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl HostEvaluator for ExprEvaluator {
    fn evaluate(&self, source: &str, bindings: &Bindings) -> Result<HostValue, EvalError> {
        let tokens = lexer::tokenize(source)?;
        let mut parser = ExprParser { tokens: &tokens, pos: 0 };
        let expr = parser.ternary()?;
        if let Some(tok) = parser.peek() {
            return Err(EvalError::Syntax { offset: parser.pos, message: format!("unexpected token {tok:?}") });
        }
        expr.eval(bindings)
    }
}

// --- AST --------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone)]
enum Expr {
    Value(HostValue),
    Name(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Index-based recursive descent over the token list.
///
/// `pos` counts tokens, so syntax errors report a token index rather than a
/// byte offset once tokenizing has succeeded.
struct ExprParser<'a> {
    tokens: &'a [Tok],
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&'a Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'a Tok, EvalError> {
        let tok = self.tokens.get(self.pos).ok_or(EvalError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_any(&mut self, ops: &[(&str, BinOp)]) -> Option<BinOp> {
        let Some(Tok::Op(o)) = self.peek() else {
            return None;
        };
        let found = ops.iter().find(|(sym, _)| sym == o).map(|(_, op)| *op)?;
        self.pos += 1;
        Some(found)
    }

    fn expect(&mut self, op: &str) -> Result<(), EvalError> {
        if self.eat(op) {
            Ok(())
        } else {
            match self.peek() {
                Some(tok) => {
                    Err(EvalError::Syntax { offset: self.pos, message: format!("expected '{op}', found {tok:?}") })
                }
                None => Err(EvalError::UnexpectedEnd),
            }
        }
    }

    fn ternary(&mut self) -> Result<Expr, EvalError> {
        let cond = self.or()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.ternary()?;
        self.expect(":")?;
        let otherwise = self.ternary()?;
        Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.and()?;
        while self.eat("||") {
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.binary_level(0)?;
        while self.eat("&&") {
            lhs = Expr::And(Box::new(lhs), Box::new(self.binary_level(0)?));
        }
        Ok(lhs)
    }

    /// Left-associative binary levels, loosest first.
    fn binary_level(&mut self, level: usize) -> Result<Expr, EvalError> {
        const LEVELS: &[&[(&str, BinOp)]] = &[
            &[("===", BinOp::StrictEq), ("!==", BinOp::StrictNe), ("==", BinOp::LooseEq), ("!=", BinOp::LooseNe)],
            &[("<=", BinOp::Le), (">=", BinOp::Ge), ("<", BinOp::Lt), (">", BinOp::Gt)],
            &[("+", BinOp::Add), ("-", BinOp::Sub)],
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
        ];
        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };
        let mut lhs = self.binary_level(level + 1)?;
        while let Some(op) = self.eat_any(ops) {
            let rhs = self.binary_level(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let offset = self.pos;
        match self.next()? {
            Tok::Num(n) => Ok(Expr::Value(HostValue::Number(*n))),
            Tok::Str(s) => Ok(Expr::Value(HostValue::Text(s.clone()))),
            Tok::Ident(name) if name == "true" => Ok(Expr::Value(HostValue::Bool(true))),
            Tok::Ident(name) if name == "false" => Ok(Expr::Value(HostValue::Bool(false))),
            Tok::Ident(name) if name == "null" => Ok(Expr::Value(HostValue::Null)),
            Tok::Var(name) | Tok::Ident(name) => Ok(Expr::Name(name.clone())),
            Tok::Op("(") => {
                let inner = self.ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Op(op) => Err(EvalError::Syntax { offset, message: format!("unexpected operator '{op}'") }),
        }
    }
}

impl Expr {
    fn eval(&self, bindings: &Bindings) -> Result<HostValue, EvalError> {
        match self {
            Expr::Value(v) => Ok(v.clone()),
            Expr::Name(name) => match bindings.get(name) {
                Some(Symbol::Literal(text)) => Ok(HostValue::Text(text.clone())),
                Some(Symbol::Host(value)) => Ok(value.clone()),
                // bindings only ever hold stack values
                Some(other) => Err(EvalError::Type(format!("`{name}` is bound to non-value {other}"))),
                None => Err(EvalError::UnknownName(name.clone())),
            },
            Expr::Neg(inner) => {
                let v = inner.eval(bindings)?;
                Ok(HostValue::Number(-numeric(&v, "-")?))
            }
            Expr::Not(inner) => Ok(HostValue::Bool(!inner.eval(bindings)?.truthy())),
            Expr::And(lhs, rhs) => {
                let l = lhs.eval(bindings)?;
                if l.truthy() { rhs.eval(bindings) } else { Ok(l) }
            }
            Expr::Or(lhs, rhs) => {
                let l = lhs.eval(bindings)?;
                if l.truthy() { Ok(l) } else { rhs.eval(bindings) }
            }
            Expr::Cond(cond, then, otherwise) => {
                if cond.eval(bindings)?.truthy() {
                    then.eval(bindings)
                } else {
                    otherwise.eval(bindings)
                }
            }
            Expr::Binary(op, lhs, rhs) => apply(*op, lhs.eval(bindings)?, rhs.eval(bindings)?),
        }
    }
}

fn numeric(v: &HostValue, op: &str) -> Result<f64, EvalError> {
    v.as_number().ok_or_else(|| EvalError::Type(format!("operand '{v}' of '{op}' is not a number")))
}

fn apply(op: BinOp, l: HostValue, r: HostValue) -> Result<HostValue, EvalError> {
    let both_numeric = l.as_number().zip(r.as_number());
    let value = match op {
        BinOp::Add => match both_numeric {
            Some((a, b)) => HostValue::Number(a + b),
            None => HostValue::Text(format!("{l}{r}")),
        },
        BinOp::Sub => HostValue::Number(numeric(&l, "-")? - numeric(&r, "-")?),
        BinOp::Mul => HostValue::Number(numeric(&l, "*")? * numeric(&r, "*")?),
        BinOp::Div => HostValue::Number(numeric(&l, "/")? / numeric(&r, "/")?),
        BinOp::Rem => HostValue::Number(numeric(&l, "%")? % numeric(&r, "%")?),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match both_numeric {
                Some((a, b)) => a.partial_cmp(&b),
                None => Some(l.to_string().cmp(&r.to_string())),
            };
            let holds = ordering.is_some_and(|o| match op {
                BinOp::Lt => o.is_lt(),
                BinOp::Le => o.is_le(),
                BinOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            });
            HostValue::Bool(holds)
        }
        BinOp::LooseEq | BinOp::LooseNe => {
            let equal = match both_numeric {
                Some((a, b)) => a == b,
                None => l.to_string() == r.to_string(),
            };
            HostValue::Bool(equal == (op == BinOp::LooseEq))
        }
        BinOp::StrictEq => HostValue::Bool(l == r),
        BinOp::StrictNe => HostValue::Bool(l != r),
    };
    Ok(value)
}
