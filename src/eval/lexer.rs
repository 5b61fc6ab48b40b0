//! Tokenizer for the bundled expression grammar.
//!
//! A single anchored regex classifies the next token; string bodies are then
//! unescaped by hand since the regex only has to find where they end.

use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Num(f64),
    Str(String),
    /// `$name`, without the sigil.
    Var(String),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] =
    &["===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!", "?", ":", "(", ")"];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Tok>, EvalError> {
    let token_re = regex!(
        r#"^(?s)(?:(?P<ws>\s+)|(?P<num>(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)|(?P<str>"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`(?:[^`\\]|\\.)*`)|\$(?P<var>[A-Za-z_][A-Za-z0-9_]*)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)|(?P<op>===|!==|==|!=|<=|>=|&&|\|\||[-+*/%<>!?:()]))"#
    );

    let mut tokens = Vec::new();
    let mut offset = 0;
    while offset < source.len() {
        let rest = &source[offset..];
        let Some(caps) = token_re.captures(rest) else {
            let found = rest.chars().next().unwrap_or_default();
            return Err(EvalError::Syntax { offset, message: format!("unexpected character '{found}'") });
        };
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();

        if caps.name("ws").is_some() {
            // skip
        } else if let Some(m) = caps.name("num") {
            let value = m
                .as_str()
                .parse::<f64>()
                .map_err(|_| EvalError::Syntax { offset, message: format!("bad number '{}'", m.as_str()) })?;
            tokens.push(Tok::Num(value));
        } else if let Some(m) = caps.name("str") {
            tokens.push(Tok::Str(unescape(m.as_str())));
        } else if let Some(m) = caps.name("var") {
            tokens.push(Tok::Var(m.as_str().to_string()));
        } else if let Some(m) = caps.name("ident") {
            tokens.push(Tok::Ident(m.as_str().to_string()));
        } else if let Some(m) = caps.name("op") {
            let op = OPERATORS.iter().find(|op| **op == m.as_str()).copied().unwrap_or("?");
            tokens.push(Tok::Op(op));
        }

        if whole.is_empty() {
            return Err(EvalError::Syntax { offset, message: "empty token".to_string() });
        }
        offset += whole.len();
    }
    Ok(tokens)
}

/// Strip the surrounding quotes and resolve backslash escapes.
fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_arithmetic_with_variables() {
        let toks = tokenize("$n * 32").unwrap();
        assert_eq!(toks, vec![Tok::Var("n".into()), Tok::Op("*"), Tok::Num(32.0)]);
    }

    #[test]
    fn longest_operator_wins() {
        let toks = tokenize("a === b !== c <= d").unwrap();
        assert_eq!(toks[1], Tok::Op("==="));
        assert_eq!(toks[3], Tok::Op("!=="));
        assert_eq!(toks[5], Tok::Op("<="));
    }

    #[test]
    fn strings_keep_escaped_quotes() {
        let toks = tokenize(r#""say \"hi\"" + 'it\'s' + `tick`"#).unwrap();
        assert_eq!(toks[0], Tok::Str("say \"hi\"".into()));
        assert_eq!(toks[2], Tok::Str("it's".into()));
        assert_eq!(toks[4], Tok::Str("tick".into()));
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = tokenize("1 # 2").unwrap_err();
        assert!(matches!(err, EvalError::Syntax { offset: 2, .. }));
    }
}
