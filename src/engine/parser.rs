//! Source text -> [`Program`].
//!
//! The grammar has no reserved punctuation. The text announces its outer
//! delimiter once and every side announces its own inner delimiter:
//!
//! ```text
//!  |:dolphin: $food :porpoise: $food| :answer: gotchya |:answer: $x| :done: $x
//!  ^ outer delimiter (first non-whitespace char of the text)
//!   ^ inner delimiter (first non-whitespace char of a side)
//!    ^^^^^^^ stack name, closed by the inner delimiter
//!            ^^^^^^ symbols, up to the next inner/outer delimiter
//!                                    ^ outer again: causes -> effects
//!                                                      ^ outer again: rule ends,
//!                                                        next rule's causes begin
//! ```
//!
//! The outer delimiter alternates between causes and effects for the rest of
//! the text, so `||:a: x` is a causeless rule and a trailing delimiter only
//! opens an empty rule, which is dropped. Symbols are split on whitespace, except:
//!
//! - `[multi word]` is one literal, read verbatim up to the first `]`.
//! - `{expr}` is raw expression source. Nesting of `"`, `'`, `` ` ``, `(`, `{`
//!   and `[` is tracked (quotes only close themselves) and a backslash escapes
//!   the next character, so `{ "}" }` is a single expression.
//! - `$name` becomes a variable. This is decided when the pattern is
//!   finished, not while scanning.
//! - A trailing `?` on the last symbol of a cause marks the pattern `keep`.
//!
//! There is no rejection path: truncated input is finalized best-effort and
//! delimiters with nothing between them produce no rule.

use crate::{Pattern, Program, Rule, Symbol};

/// Which half of a rule is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Causes,
    Effects,
}

/// Scanner position inside one side of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    /// Between the inner delimiters: accumulating the stack name.
    Name,
    /// After the name: whitespace-separated symbols.
    Symbols,
    /// Inside `[...]`.
    Bracket,
    /// Inside `{...}`. `closers` holds the expected closing characters of open
    /// nested pairs; `escaped` is set right after a backslash.
    Expression { closers: Vec<char>, escaped: bool },
}

/// Symbol text collected for the pattern being built. Classification into
/// `Literal`/`Variable` is deferred until the pattern is finished so the
/// `keep` marker can be stripped first.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RawToken {
    Text(String),
    Expression(String),
}

#[derive(Debug, Default)]
struct PatternBuilder {
    stack: String,
    tokens: Vec<RawToken>,
}

/// Character-at-a-time rule scanner.
#[derive(Debug)]
struct Scanner {
    rules: Vec<Rule>,
    outer: Option<char>,
    inner: Option<char>,
    side: Side,
    mode: Mode,
    rule: Rule,
    /// Set once any pattern was finished for `rule`; rules without one are dropped.
    touched: bool,
    pattern: Option<PatternBuilder>,
    /// `Some` while a symbol is in progress, even an empty `[]`.
    token: Option<String>,
}

impl Scanner {
    fn new() -> Self {
        Scanner {
            rules: Vec::new(),
            outer: None,
            inner: None,
            side: Side::Causes,
            mode: Mode::Name,
            rule: Rule::default(),
            touched: false,
            pattern: None,
            token: None,
        }
    }

    fn feed(&mut self, c: char) {
        // Bracketed literals and expressions swallow delimiters.
        match &mut self.mode {
            Mode::Bracket => {
                if c == ']' {
                    self.finish_token();
                    self.mode = Mode::Symbols;
                } else {
                    self.token.get_or_insert_with(String::new).push(c);
                }
                return;
            }
            Mode::Expression { closers, escaped } => {
                let text = self.token.get_or_insert_with(String::new);
                if *escaped {
                    *escaped = false;
                    text.push(c);
                    return;
                }
                if c == '\\' {
                    *escaped = true;
                    text.push(c);
                    return;
                }
                if closers.is_empty() && c == '}' {
                    self.finish_expression();
                    return;
                }
                track_nesting(closers, c);
                text.push(c);
                return;
            }
            Mode::Name | Mode::Symbols => {}
        }

        let Some(outer) = self.outer else {
            if !c.is_whitespace() {
                self.open_rule(c);
            }
            return;
        };
        if c == outer {
            self.advance_side();
            return;
        }

        let Some(inner) = self.inner else {
            if !c.is_whitespace() {
                self.inner = Some(c);
                self.begin_pattern();
            }
            return;
        };
        if c == inner {
            match self.mode {
                Mode::Name => self.mode = Mode::Symbols,
                _ => {
                    self.finish_pattern();
                    self.begin_pattern();
                }
            }
            return;
        }

        match self.mode {
            Mode::Name => {
                if let Some(pattern) = self.pattern.as_mut() {
                    pattern.stack.push(c);
                }
            }
            _ if c.is_whitespace() => self.finish_token(),
            _ if self.token.is_none() && c == '[' => {
                self.token = Some(String::new());
                self.mode = Mode::Bracket;
            }
            _ if self.token.is_none() && c == '{' => {
                self.token = Some(String::new());
                self.mode = Mode::Expression { closers: Vec::new(), escaped: false };
            }
            _ => self.token.get_or_insert_with(String::new).push(c),
        }
    }

    fn open_rule(&mut self, delimiter: char) {
        self.outer = Some(delimiter);
        self.inner = None;
        self.side = Side::Causes;
        self.rule = Rule::default();
        self.touched = false;
    }

    /// An outer delimiter: causes -> effects, or the end of one rule and the
    /// causes of the next.
    fn advance_side(&mut self) {
        self.finish_pattern();
        self.inner = None;
        match self.side {
            Side::Causes => self.side = Side::Effects,
            Side::Effects => {
                self.finish_rule();
                self.side = Side::Causes;
            }
        }
    }

    fn begin_pattern(&mut self) {
        self.pattern = Some(PatternBuilder::default());
        self.mode = Mode::Name;
    }

    fn finish_token(&mut self) {
        let Some(text) = self.token.take() else {
            return;
        };
        if let Some(pattern) = self.pattern.as_mut() {
            pattern.tokens.push(RawToken::Text(text));
        }
    }

    fn finish_expression(&mut self) {
        let source = self.token.take().unwrap_or_default();
        if let Some(pattern) = self.pattern.as_mut() {
            pattern.tokens.push(RawToken::Expression(source));
        }
        self.mode = Mode::Symbols;
    }

    fn finish_pattern(&mut self) {
        if matches!(self.mode, Mode::Expression { .. }) {
            self.finish_expression();
        } else {
            self.finish_token();
        }
        let Some(builder) = self.pattern.take() else {
            return;
        };
        let pattern = build_pattern(builder, self.side);
        match self.side {
            Side::Causes => self.rule.causes.push(pattern),
            Side::Effects => self.rule.effects.push(pattern),
        }
        self.touched = true;
        self.mode = Mode::Name;
    }

    fn finish_rule(&mut self) {
        let rule = std::mem::take(&mut self.rule);
        if self.touched {
            self.rules.push(rule);
        }
        self.touched = false;
    }

    fn finish(mut self) -> Program {
        if self.outer.is_some() {
            self.finish_pattern();
            self.finish_rule();
        }
        Program::new(self.rules)
    }
}

/// Update the open-pair stack for one unescaped expression character.
///
/// Inside a quote only the matching quote matters; elsewhere a closer pops and
/// an opener pushes its partner.
fn track_nesting(closers: &mut Vec<char>, c: char) {
    if let Some(&top) = closers.last() {
        if matches!(top, '"' | '\'' | '`') {
            if c == top {
                closers.pop();
            }
            return;
        }
        if c == top {
            closers.pop();
            return;
        }
    }
    let closer = match c {
        '"' => '"',
        '\'' => '\'',
        '`' => '`',
        '(' => ')',
        '{' => '}',
        '[' => ']',
        _ => return,
    };
    closers.push(closer);
}

fn build_pattern(builder: PatternBuilder, side: Side) -> Pattern {
    let PatternBuilder { stack, mut tokens } = builder;
    if tokens.is_empty() {
        tokens.push(RawToken::Text(String::new()));
    }

    let mut keep = false;
    if side == Side::Causes {
        if let Some(RawToken::Text(last)) = tokens.last_mut() {
            if last.ends_with('?') {
                last.pop();
                keep = true;
            }
        }
    }

    let symbols = tokens
        .into_iter()
        .map(|token| match token {
            RawToken::Expression(source) => Symbol::Expression(source),
            RawToken::Text(text) => match text.strip_prefix('$') {
                Some(name) => Symbol::Variable(name.to_string()),
                None => Symbol::Literal(text),
            },
        })
        .collect();

    Pattern { stack, symbols, keep }
}

/// Parse `text` into a program. Never fails.
pub(crate) fn parse_program(text: &str) -> Program {
    let mut scanner = Scanner::new();
    for c in text.chars() {
        scanner.feed(c);
    }
    let program = scanner.finish();
    tracing::debug!(rules = program.rules.len(), bytes = text.len(), "parsed program");
    program
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lit(s: &str) -> Symbol {
        Symbol::Literal(s.to_string())
    }

    fn var(s: &str) -> Symbol {
        Symbol::Variable(s.to_string())
    }

    #[test]
    fn parses_causes_and_effects() {
        let program = parse_program("|:match me:| :place: apple|");
        assert_eq!(
            program.rules,
            vec![Rule {
                causes: vec![Pattern::new("match me", vec![lit("")])],
                effects: vec![Pattern::new("place", vec![lit("apple")])],
            }]
        );
    }

    #[test]
    fn empty_causes_make_an_initializer() {
        let program = parse_program("||:match me:|");
        assert_eq!(program.rules.len(), 1);
        assert!(program.rules[0].is_initializer());
        assert_eq!(program.rules[0].effects, vec![Pattern::new("match me", vec![lit("")])]);
    }

    #[test]
    fn repeated_name_segments_declare_several_patterns() {
        let program = parse_program("|:dolphin: $food :porpoise: $food| :answer: gotchya|");
        let rule = &program.rules[0];
        assert_eq!(
            rule.causes,
            vec![Pattern::new("dolphin", vec![var("food")]), Pattern::new("porpoise", vec![var("food")])]
        );
        assert_eq!(rule.effects, vec![Pattern::new("answer", vec![lit("gotchya")])]);
    }

    #[test]
    fn outer_delimiter_is_shared_and_inner_ones_are_per_side() {
        let program = parse_program("# .a. x # /b/ y ## ,c, z");
        assert_eq!(program.rules.len(), 2);
        assert_eq!(program.rules[0].causes, vec![Pattern::new("a", vec![lit("x")])]);
        assert_eq!(program.rules[0].effects, vec![Pattern::new("b", vec![lit("y")])]);
        assert!(program.rules[1].is_initializer());
        assert_eq!(program.rules[1].effects, vec![Pattern::new("c", vec![lit("z")])]);
    }

    #[test]
    fn effects_delimiter_chains_into_the_next_rule() {
        let program = parse_program("|:match me:| :place: apple\n||:match me:");
        assert_eq!(
            program.rules,
            vec![
                Rule {
                    causes: vec![Pattern::new("match me", vec![lit("")])],
                    effects: vec![Pattern::new("place", vec![lit("apple")])],
                },
                Rule { causes: Vec::new(), effects: vec![Pattern::new("match me", vec![lit("")])] },
            ]
        );
    }

    #[test]
    fn trailing_delimiter_adds_no_rule() {
        assert_eq!(parse_program("|:a: x| :b: y|").rules, parse_program("|:a: x| :b: y").rules);
        assert_eq!(parse_program("||:a: x ||:b: y|").rules.len(), 2);
    }

    #[test]
    fn brackets_hold_multi_word_literals() {
        let program = parse_program("||:greeting: [hello there] world []|");
        assert_eq!(program.rules[0].effects[0].symbols, vec![lit("hello there"), lit("world"), lit("")]);
    }

    #[test]
    fn brackets_swallow_delimiters() {
        let program = parse_program("||:s: [a|b:c]|");
        assert_eq!(program.rules[0].effects[0].symbols, vec![lit("a|b:c")]);
    }

    #[test]
    fn bracket_inside_a_word_is_plain_text() {
        let program = parse_program("||:s: a[b c]|");
        assert_eq!(program.rules[0].effects[0].symbols, vec![lit("a[b"), lit("c]")]);
    }

    #[test]
    fn expressions_track_nesting_and_escapes() {
        let program = parse_program(r#"||:out: {f({a: "}"})} {'\'}'} {\}}|"#);
        assert_eq!(
            program.rules[0].effects[0].symbols,
            vec![
                Symbol::Expression(r#"f({a: "}"})"#.to_string()),
                Symbol::Expression(r#"'\'}'"#.to_string()),
                Symbol::Expression(r#"\}"#.to_string()),
            ]
        );
    }

    #[test]
    fn expression_swallows_delimiters() {
        let program = parse_program("||:unswers: {$n | 1 : 2}|");
        assert_eq!(program.rules[0].effects[0].symbols, vec![Symbol::Expression("$n | 1 : 2".to_string())]);
    }

    #[test]
    fn trailing_question_mark_keeps_a_cause() {
        let program = parse_program("|:flag: on? :x: $v| :flag: off?|");
        let rule = &program.rules[0];
        assert!(rule.causes[0].keep);
        assert_eq!(rule.causes[0].symbols, vec![lit("on")]);
        assert!(!rule.causes[1].keep);
        // no effect on the effect side
        assert!(!rule.effects[0].keep);
        assert_eq!(rule.effects[0].symbols, vec![lit("off?")]);
    }

    #[test]
    fn keep_marker_is_stripped_before_variable_detection() {
        let program = parse_program("|:x: $v?| :y: $v|");
        assert!(program.rules[0].causes[0].keep);
        assert_eq!(program.rules[0].causes[0].symbols, vec![var("v")]);
    }

    #[test]
    fn bare_keep_marker_leaves_an_empty_literal() {
        let program = parse_program("|:tick: ?| :tock:|");
        assert!(program.rules[0].causes[0].keep);
        assert_eq!(program.rules[0].causes[0].symbols, vec![lit("")]);
    }

    #[test]
    fn adjacent_delimiters_create_no_rules() {
        assert!(parse_program("|||").rules.is_empty());
        assert!(parse_program("||| |||").rules.is_empty());
        assert!(parse_program("   \n\t").rules.is_empty());
        assert!(parse_program("").rules.is_empty());
    }

    #[test]
    fn truncated_input_is_finalized_best_effort() {
        let program = parse_program("|:a: x| :b: [unterminated");
        assert_eq!(program.rules.len(), 1);
        assert_eq!(program.rules[0].effects[0].symbols, vec![lit("unterminated")]);

        let program = parse_program("||:c: {1 + (2");
        assert_eq!(program.rules[0].effects[0].symbols, vec![Symbol::Expression("1 + (2".to_string())]);

        let program = parse_program("|:only causes: here");
        assert_eq!(program.rules[0].causes, vec![Pattern::new("only causes", vec![lit("here")])]);
        assert!(program.rules[0].effects.is_empty());
    }

    #[test]
    fn unterminated_name_still_yields_a_pattern() {
        let program = parse_program("||:half|");
        assert_eq!(program.rules[0].effects, vec![Pattern::new("half", vec![lit("")])]);
    }

    #[test]
    fn whitespace_runs_do_not_create_symbols() {
        let program = parse_program("||:s:   a \n\t b   |");
        assert_eq!(program.rules[0].effects[0].symbols, vec![lit("a"), lit("b")]);
    }
}
