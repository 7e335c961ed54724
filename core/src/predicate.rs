//! Transition predicate evaluator.
//!
//! Restricted expression grammar for workflow transition `when:` clauses
//! (spec.md §4): `status.<field>` path lookups, `==` equality, `&&`/`||`
//! boolean combinators, and boolean/string/null literals. No arithmetic,
//! no `!=`/ordering operators, no user-defined variables beyond `status.*` —
//! deliberately narrower than a general expression language since a
//! transition predicate only ever asks "did the agent set this status field
//! to this value."
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PredicateError {
    #[error("parse error at position {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("empty predicate")]
    Empty,
}

pub type PredicateResult<T> = Result<T, PredicateError>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    StatusPath(String),
    StringLit(String),
    BoolLit(bool),
    NullLit,
    Eq,
    And,
    Or,
    LParen,
    RParen,
    Eof,
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            input,
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> PredicateResult<Token> {
        self.skip_whitespace();
        let (pos, ch) = match self.chars.next() {
            Some(pair) => pair,
            None => return Ok(Token::Eof),
        };
        match ch {
            '(' => Ok(Token::LParen),
            ')' => Ok(Token::RParen),
            '=' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Token::Eq)
                } else {
                    Err(PredicateError::Parse {
                        position: pos,
                        message: "expected '==' for equality".into(),
                    })
                }
            }
            '&' => {
                if self.peek_char() == Some('&') {
                    self.chars.next();
                    Ok(Token::And)
                } else {
                    Err(PredicateError::Parse {
                        position: pos,
                        message: "expected '&&'".into(),
                    })
                }
            }
            '|' => {
                if self.peek_char() == Some('|') {
                    self.chars.next();
                    Ok(Token::Or)
                } else {
                    Err(PredicateError::Parse {
                        position: pos,
                        message: "expected '||'".into(),
                    })
                }
            }
            '"' => self.read_string(),
            'a'..='z' | 'A'..='Z' | '_' => Ok(self.read_ident(pos, ch)),
            other => Err(PredicateError::Parse {
                position: pos,
                message: format!("unexpected character '{}'", other),
            }),
        }
    }

    fn read_string(&mut self) -> PredicateResult<Token> {
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(Token::StringLit(s)),
                Some((_, c)) => s.push(c),
                None => {
                    return Err(PredicateError::Parse {
                        position: self.input.len(),
                        message: "unterminated string".into(),
                    })
                }
            }
        }
    }

    fn read_ident(&mut self, _start: usize, first: char) -> Token {
        let mut s = String::new();
        s.push(first);
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match s.as_str() {
            "true" => Token::BoolLit(true),
            "false" => Token::BoolLit(false),
            "null" => Token::NullLit,
            _ => Token::StatusPath(s),
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Eq(String, Value),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Group(Box<Expr>),
}

struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> PredicateResult<Self> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self { tokenizer, current })
    }

    fn advance(&mut self) -> PredicateResult<()> {
        self.current = self.tokenizer.next_token()?;
        Ok(())
    }

    fn parse(&mut self) -> PredicateResult<Expr> {
        if self.current == Token::Eof {
            return Err(PredicateError::Empty);
        }
        let expr = self.parse_or()?;
        if self.current != Token::Eof {
            return Err(PredicateError::Parse {
                position: 0,
                message: "trailing input after expression".into(),
            });
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> PredicateResult<Expr> {
        let mut left = self.parse_and()?;
        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PredicateResult<Expr> {
        let mut left = self.parse_atom()?;
        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_atom()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_atom(&mut self) -> PredicateResult<Expr> {
        match self.current.clone() {
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_or()?;
                if self.current != Token::RParen {
                    return Err(PredicateError::Parse {
                        position: 0,
                        message: "expected ')'".into(),
                    });
                }
                self.advance()?;
                Ok(Expr::Group(Box::new(inner)))
            }
            Token::StatusPath(path) => {
                self.advance()?;
                if self.current != Token::Eq {
                    return Err(PredicateError::Parse {
                        position: 0,
                        message: format!("expected '==' after '{}'", path),
                    });
                }
                self.advance()?;
                let literal = self.parse_literal()?;
                Ok(Expr::Eq(path, literal))
            }
            other => Err(PredicateError::Parse {
                position: 0,
                message: format!("unexpected token: {:?}", other),
            }),
        }
    }

    fn parse_literal(&mut self) -> PredicateResult<Value> {
        let value = match self.current.clone() {
            Token::StringLit(s) => Value::String(s),
            Token::BoolLit(b) => Value::Bool(b),
            Token::NullLit => Value::Null,
            other => {
                return Err(PredicateError::Parse {
                    position: 0,
                    message: format!("expected a literal, found {:?}", other),
                })
            }
        };
        self.advance()?;
        Ok(value)
    }
}

/// Evaluate a transition predicate against an issue's status map.
///
/// `field` lookups use [`crate::issue::Issue::status_field`] via the
/// `lookup` closure so this module stays decoupled from `issue::Issue`.
pub fn evaluate<F>(predicate: &str, lookup: F) -> PredicateResult<bool>
where
    F: Fn(&str) -> Option<Value>,
{
    let mut parser = Parser::new(predicate)?;
    let expr = parser.parse()?;
    Ok(eval_expr(&expr, &lookup))
}

fn eval_expr<F>(expr: &Expr, lookup: &F) -> bool
where
    F: Fn(&str) -> Option<Value>,
{
    match expr {
        Expr::Eq(path, literal) => {
            let field = path.strip_prefix("status.").unwrap_or(path);
            lookup(field).as_ref() == Some(literal)
        }
        Expr::And(l, r) => eval_expr(l, lookup) && eval_expr(r, lookup),
        Expr::Or(l, r) => eval_expr(l, lookup) || eval_expr(r, lookup),
        Expr::Group(inner) => eval_expr(inner, lookup),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn status(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn simple_equality() {
        let status = status(&[("designApproved", json!(true))]);
        let result = evaluate("status.designApproved == true", |f| status.get(f).cloned());
        assert_eq!(result.unwrap(), true);
    }

    #[test]
    fn and_both_sides_required() {
        let status = status(&[("a", json!(true)), ("b", json!(false))]);
        let result = evaluate(
            "status.a == true && status.b == true",
            |f| status.get(f).cloned(),
        );
        assert_eq!(result.unwrap(), false);
    }

    #[test]
    fn or_short_circuits_to_true() {
        let status = status(&[("a", json!(true)), ("b", json!(false))]);
        let result = evaluate(
            "status.a == true || status.b == true",
            |f| status.get(f).cloned(),
        );
        assert_eq!(result.unwrap(), true);
    }

    #[test]
    fn missing_field_is_never_equal() {
        let status = status(&[]);
        let result = evaluate("status.missing == true", |f| status.get(f).cloned());
        assert_eq!(result.unwrap(), false);
    }

    #[test]
    fn string_literal_comparison() {
        let status = status(&[("currentTaskId", json!("T7"))]);
        let result = evaluate(
            "status.currentTaskId == \"T7\"",
            |f| status.get(f).cloned(),
        );
        assert_eq!(result.unwrap(), true);
    }

    #[test]
    fn null_literal_matches_explicit_null() {
        let status = status(&[("cleared", Value::Null)]);
        let result = evaluate("status.cleared == null", |f| status.get(f).cloned());
        assert_eq!(result.unwrap(), true);
    }

    #[test]
    fn grouped_expression_respects_precedence() {
        let status = status(&[("a", json!(false)), ("b", json!(true)), ("c", json!(true))]);
        let result = evaluate(
            "status.a == true || (status.b == true && status.c == true)",
            |f| status.get(f).cloned(),
        );
        assert_eq!(result.unwrap(), true);
    }

    #[test]
    fn arithmetic_is_rejected() {
        let result = evaluate("1 + 1 == 2", |_| None);
        assert!(result.is_err());
    }

    #[test]
    fn empty_predicate_is_an_error() {
        let result = evaluate("", |_| None);
        assert!(matches!(result, Err(PredicateError::Empty)));
    }
}
