//! SIGMA condition expression parsing.
//!
//! Tokenizes and parses a rule's `condition:` string into a [`ConditionAst`]
//! consumed by the DAG builder. The grammar, lowest precedence first:
//!
//! ```text
//! or_expr  := and_expr ('or' and_expr)*
//! and_expr := not_expr ('and' not_expr)*
//! not_expr := 'not' primary | primary
//! primary  := identifier
//!           | '(' or_expr ')'
//!           | number 'of' ('them' | pattern)
//!           | 'all' 'of' ('them' | pattern)
//! ```
//!
//! Selection-name patterns use glob semantics: `*` matches any run of
//! characters, `?` exactly one.

use crate::error::{Result, SigmaError};
use crate::ir::PrimitiveId;
use std::collections::HashMap;
use std::fmt;

/// Tokens of a SIGMA condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    And,
    Or,
    Not,
    LeftParen,
    RightParen,
    Of,
    Them,
    All,
    Number(u32),
    Wildcard(String),
}

/// A token paired with its byte offset in the condition string.
pub type SpannedToken = (Token, usize);

/// Abstract syntax tree of a parsed condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionAst {
    Identifier(String),
    And(Box<ConditionAst>, Box<ConditionAst>),
    Or(Box<ConditionAst>, Box<ConditionAst>),
    Not(Box<ConditionAst>),
    OneOfThem,
    AllOfThem,
    OneOfPattern(String),
    AllOfPattern(String),
    CountOfPattern(u32, String),
}

impl ConditionAst {
    /// Whether this node prints as a single primary (no parentheses needed
    /// when nested).
    fn is_primary(&self) -> bool {
        !matches!(
            self,
            ConditionAst::And(..) | ConditionAst::Or(..) | ConditionAst::Not(..)
        )
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_primary() {
            write!(f, "{self}")
        } else {
            write!(f, "({self})")
        }
    }
}

impl fmt::Display for ConditionAst {
    /// Prints a canonical form that re-parses to an identical AST: compound
    /// operands are always parenthesized.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionAst::Identifier(name) => write!(f, "{name}"),
            ConditionAst::And(l, r) => {
                l.fmt_operand(f)?;
                write!(f, " and ")?;
                r.fmt_operand(f)
            }
            ConditionAst::Or(l, r) => {
                l.fmt_operand(f)?;
                write!(f, " or ")?;
                r.fmt_operand(f)
            }
            ConditionAst::Not(x) => {
                write!(f, "not ")?;
                x.fmt_operand(f)
            }
            ConditionAst::OneOfThem => write!(f, "1 of them"),
            ConditionAst::AllOfThem => write!(f, "all of them"),
            ConditionAst::OneOfPattern(pattern) => write!(f, "1 of {pattern}"),
            ConditionAst::AllOfPattern(pattern) => write!(f, "all of {pattern}"),
            ConditionAst::CountOfPattern(count, pattern) => write!(f, "{count} of {pattern}"),
        }
    }
}

/// Tokenize a condition string, recording the byte offset of each token.
pub fn tokenize_condition(condition: &str) -> Result<Vec<SpannedToken>> {
    let mut tokens = Vec::new();
    let bytes = condition.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos] as char;
        match ch {
            ' ' | '\t' | '\r' | '\n' => pos += 1,
            '(' => {
                tokens.push((Token::LeftParen, pos));
                pos += 1;
            }
            ')' => {
                tokens.push((Token::RightParen, pos));
                pos += 1;
            }
            '0'..='9' => {
                let start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                let text = &condition[start..pos];
                let number = text.parse::<u32>().map_err(|_| {
                    SigmaError::CompilationError(format!(
                        "Invalid number '{text}' at position {start}"
                    ))
                })?;
                tokens.push((Token::Number(number), start));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = pos;
                while pos < bytes.len() {
                    let c = bytes[pos] as char;
                    if c.is_ascii_alphanumeric() || c == '_' || c == '*' || c == '?' {
                        pos += 1;
                    } else {
                        break;
                    }
                }
                let word = &condition[start..pos];
                let token = match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "of" => Token::Of,
                    "them" => Token::Them,
                    "all" => Token::All,
                    _ if word.contains('*') || word.contains('?') => {
                        Token::Wildcard(word.to_string())
                    }
                    _ => Token::Identifier(word.to_string()),
                };
                tokens.push((token, start));
            }
            other => {
                return Err(SigmaError::CompilationError(format!(
                    "Unexpected character '{other}' at position {pos}"
                )));
            }
        }
    }

    Ok(tokens)
}

/// Recursive descent parser over a spanned token stream.
struct ConditionParser<'a> {
    tokens: &'a [SpannedToken],
    position: usize,
    selections: &'a HashMap<String, Vec<PrimitiveId>>,
}

impl<'a> ConditionParser<'a> {
    fn new(tokens: &'a [SpannedToken], selections: &'a HashMap<String, Vec<PrimitiveId>>) -> Self {
        Self {
            tokens,
            position: 0,
            selections,
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(token, _)| token)
    }

    /// Byte offset of the current token, or of the end of input.
    fn offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(0, |(_, pos)| *pos)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn parse_or(&mut self) -> Result<ConditionAst> {
        let mut left = self.parse_and()?;
        while let Some(Token::Or) = self.current() {
            self.advance();
            let right = self.parse_and()?;
            left = ConditionAst::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ConditionAst> {
        let mut left = self.parse_not()?;
        while let Some(Token::And) = self.current() {
            self.advance();
            let right = self.parse_not()?;
            left = ConditionAst::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<ConditionAst> {
        if let Some(Token::Not) = self.current() {
            self.advance();
            let operand = self.parse_primary()?;
            Ok(ConditionAst::Not(Box::new(operand)))
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Result<ConditionAst> {
        match self.current().cloned() {
            Some(Token::LeftParen) => {
                let open_at = self.offset();
                self.advance();
                let expr = self.parse_or()?;
                match self.current() {
                    Some(Token::RightParen) => {
                        self.advance();
                        Ok(expr)
                    }
                    _ => Err(SigmaError::CompilationError(format!(
                        "Unbalanced parenthesis opened at position {open_at}"
                    ))),
                }
            }
            Some(Token::Identifier(name)) => {
                let at = self.offset();
                self.advance();
                if self.selections.contains_key(&name) {
                    Ok(ConditionAst::Identifier(name))
                } else {
                    Err(SigmaError::CompilationError(format!(
                        "Unknown selection identifier '{name}' at position {at}"
                    )))
                }
            }
            Some(Token::Number(count)) => {
                self.advance();
                self.expect_of()?;
                match self.current().cloned() {
                    Some(Token::Them) => {
                        self.advance();
                        if count == 1 {
                            Ok(ConditionAst::OneOfThem)
                        } else {
                            Err(SigmaError::CompilationError(format!(
                                "Only '1 of them' or 'all of them' are supported, got '{count} of them'"
                            )))
                        }
                    }
                    Some(Token::Wildcard(pattern)) => {
                        self.advance();
                        match count {
                            0 => Err(SigmaError::InvalidThreshold(format!(
                                "0 of {pattern}"
                            ))),
                            1 => Ok(ConditionAst::OneOfPattern(pattern)),
                            n => Ok(ConditionAst::CountOfPattern(n, pattern)),
                        }
                    }
                    _ => Err(SigmaError::CompilationError(format!(
                        "Expected 'them' or a selection pattern after 'of' at position {}",
                        self.offset()
                    ))),
                }
            }
            Some(Token::All) => {
                self.advance();
                self.expect_of()?;
                match self.current().cloned() {
                    Some(Token::Them) => {
                        self.advance();
                        Ok(ConditionAst::AllOfThem)
                    }
                    Some(Token::Wildcard(pattern)) => {
                        self.advance();
                        Ok(ConditionAst::AllOfPattern(pattern))
                    }
                    _ => Err(SigmaError::CompilationError(format!(
                        "Expected 'them' or a selection pattern after 'of' at position {}",
                        self.offset()
                    ))),
                }
            }
            Some(other) => Err(SigmaError::CompilationError(format!(
                "Unexpected token {:?} at position {}",
                other,
                self.offset()
            ))),
            None => Err(SigmaError::CompilationError(
                "Unexpected end of condition".to_string(),
            )),
        }
    }

    fn expect_of(&mut self) -> Result<()> {
        match self.current() {
            Some(Token::Of) => {
                self.advance();
                Ok(())
            }
            _ => Err(SigmaError::CompilationError(format!(
                "Expected 'of' at position {}",
                self.offset()
            ))),
        }
    }
}

/// Parse a token stream into an AST, rejecting trailing tokens.
pub fn parse_tokens(
    tokens: &[SpannedToken],
    selections: &HashMap<String, Vec<PrimitiveId>>,
) -> Result<ConditionAst> {
    if tokens.is_empty() {
        return Err(SigmaError::CompilationError("Empty condition".to_string()));
    }

    let mut parser = ConditionParser::new(tokens, selections);
    let ast = parser.parse_or()?;

    if parser.position < tokens.len() {
        let (token, pos) = &tokens[parser.position];
        return Err(SigmaError::CompilationError(format!(
            "Trailing token {token:?} at position {pos}"
        )));
    }

    Ok(ast)
}

/// Tokenize and parse a condition string in one step.
pub fn parse_condition(
    condition: &str,
    selections: &HashMap<String, Vec<PrimitiveId>>,
) -> Result<ConditionAst> {
    let tokens = tokenize_condition(condition)?;
    parse_tokens(&tokens, selections)
}

/// Glob match for selection-name patterns: `*` matches any run of
/// characters, `?` exactly one. Iterative two-pointer matcher with
/// backtracking over the last `*`.
pub fn selection_matches_pattern(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = name.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selections(names: &[&str]) -> HashMap<String, Vec<PrimitiveId>> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), vec![i as PrimitiveId]))
            .collect()
    }

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize_condition("selection and not filter").unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Identifier("selection".to_string()),
                Token::And,
                Token::Not,
                Token::Identifier("filter".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_positions() {
        let tokens = tokenize_condition("a or b").unwrap();
        assert_eq!(tokens[0].1, 0);
        assert_eq!(tokens[1].1, 2);
        assert_eq!(tokens[2].1, 5);
    }

    #[test]
    fn test_tokenize_wildcard_and_number() {
        let tokens = tokenize_condition("2 of selection_*").unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Number(2),
                Token::Of,
                Token::Wildcard("selection_*".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_rejects_bad_character() {
        let err = tokenize_condition("sel & other").unwrap_err();
        match err {
            SigmaError::CompilationError(msg) => {
                assert!(msg.contains('&'));
                assert!(msg.contains("position 4"));
            }
            other => panic!("expected CompilationError, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let sel = selections(&["a", "b", "c"]);
        // 'and' binds tighter than 'or'
        let ast = parse_condition("a or b and c", &sel).unwrap();
        assert_eq!(
            ast,
            ConditionAst::Or(
                Box::new(ConditionAst::Identifier("a".to_string())),
                Box::new(ConditionAst::And(
                    Box::new(ConditionAst::Identifier("b".to_string())),
                    Box::new(ConditionAst::Identifier("c".to_string())),
                )),
            )
        );
    }

    #[test]
    fn test_parse_parentheses_override_precedence() {
        let sel = selections(&["a", "b", "c"]);
        let ast = parse_condition("(a or b) and c", &sel).unwrap();
        assert_eq!(
            ast,
            ConditionAst::And(
                Box::new(ConditionAst::Or(
                    Box::new(ConditionAst::Identifier("a".to_string())),
                    Box::new(ConditionAst::Identifier("b".to_string())),
                )),
                Box::new(ConditionAst::Identifier("c".to_string())),
            )
        );
    }

    #[test]
    fn test_parse_not_binds_to_primary() {
        let sel = selections(&["a", "b"]);
        let ast = parse_condition("not a and b", &sel).unwrap();
        assert_eq!(
            ast,
            ConditionAst::And(
                Box::new(ConditionAst::Not(Box::new(ConditionAst::Identifier(
                    "a".to_string()
                )))),
                Box::new(ConditionAst::Identifier("b".to_string())),
            )
        );
    }

    #[test]
    fn test_parse_quantifiers() {
        let sel = selections(&["s1", "s2"]);
        assert_eq!(
            parse_condition("1 of them", &sel).unwrap(),
            ConditionAst::OneOfThem
        );
        assert_eq!(
            parse_condition("all of them", &sel).unwrap(),
            ConditionAst::AllOfThem
        );
        assert_eq!(
            parse_condition("1 of s*", &sel).unwrap(),
            ConditionAst::OneOfPattern("s*".to_string())
        );
        assert_eq!(
            parse_condition("all of s*", &sel).unwrap(),
            ConditionAst::AllOfPattern("s*".to_string())
        );
        assert_eq!(
            parse_condition("2 of s*", &sel).unwrap(),
            ConditionAst::CountOfPattern(2, "s*".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_n_of_them() {
        let sel = selections(&["s1", "s2"]);
        assert!(parse_condition("2 of them", &sel).is_err());
        assert!(matches!(
            parse_condition("0 of s*", &sel),
            Err(SigmaError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_parse_unknown_identifier() {
        let sel = selections(&["a"]);
        let err = parse_condition("missing", &sel).unwrap_err();
        match err {
            SigmaError::CompilationError(msg) => assert!(msg.contains("missing")),
            other => panic!("expected CompilationError, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_cases() {
        let sel = selections(&["a", "b"]);
        // Empty input
        assert!(parse_condition("", &sel).is_err());
        assert!(parse_condition("   ", &sel).is_err());
        // Unbalanced parentheses
        assert!(parse_condition("(a or b", &sel).is_err());
        // Trailing tokens
        let err = parse_condition("a b", &sel).unwrap_err();
        match err {
            SigmaError::CompilationError(msg) => assert!(msg.contains("Trailing")),
            other => panic!("expected CompilationError, got {other:?}"),
        }
        // Dangling operators
        assert!(parse_condition("a and", &sel).is_err());
        assert!(parse_condition("not", &sel).is_err());
        assert!(parse_condition("2 of", &sel).is_err());
        assert!(parse_condition("all b", &sel).is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let sel = selections(&["a", "b", "c", "s1", "s2"]);
        let cases = [
            "a",
            "a and b",
            "a or b and c",
            "(a or b) and c",
            "not a",
            "not (a and b)",
            "a and not b or c",
            "1 of them",
            "all of them",
            "1 of s*",
            "all of s?",
            "3 of s*",
            "a and (1 of s*) or not (b and c)",
        ];
        for condition in cases {
            let ast = parse_condition(condition, &sel).unwrap();
            let printed = ast.to_string();
            let reparsed = parse_condition(&printed, &sel).unwrap();
            assert_eq!(ast, reparsed, "round trip failed for '{condition}' -> '{printed}'");
        }
    }

    #[test]
    fn test_selection_glob() {
        assert!(selection_matches_pattern("sel*", "selection"));
        assert!(selection_matches_pattern("*", "anything"));
        assert!(selection_matches_pattern("s?l", "sel"));
        assert!(selection_matches_pattern("*tion", "selection"));
        assert!(selection_matches_pattern("s*n", "selection"));
        assert!(!selection_matches_pattern("s?l", "seal"));
        assert!(!selection_matches_pattern("sel", "selection"));
        assert!(!selection_matches_pattern("sel*x", "selection"));
        assert!(selection_matches_pattern("a*b*c", "aXXbYYc"));
        assert!(!selection_matches_pattern("a*b*c", "aXXcYYb"));
    }
}
