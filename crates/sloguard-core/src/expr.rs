//! Infix expression parser for composite metrics.
//!
//! Compiles metric-math strings such as `100*(m4+m5)/(m1+m2+m3)` into an
//! [`Expr`] tree. Identifiers are resolved by the caller, so the same parser
//! serves config loading and ad-hoc queries.
//!
//! Grammar (usual precedence, left associative):
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := NUMBER | IDENT | '(' expr ')' | '-' factor
//! ```

use thiserror::Error;

use crate::types::{Expr, Operator};

/// A syntax or resolution error at a byte offset of the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at offset {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(Operator),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push((i, Token::Op(Operator::Add)));
                i += 1;
            }
            '-' => {
                tokens.push((i, Token::Op(Operator::Sub)));
                i += 1;
            }
            '*' => {
                tokens.push((i, Token::Op(Operator::Mul)));
                i += 1;
            }
            '/' => {
                tokens.push((i, Token::Op(Operator::Div)));
                i += 1;
            }
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < bytes.len() && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let text = &input[start..i];
                let value = text.parse::<f64>().map_err(|_| ParseError {
                    position: start,
                    message: format!("invalid number {text:?}"),
                })?;
                tokens.push((start, Token::Number(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(input[start..i].to_string())));
            }
            other => {
                return Err(ParseError {
                    position: i,
                    message: format!("unexpected character {other:?}"),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a, F> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    resolve: &'a F,
}

impl<F> Parser<'_, F>
where
    F: Fn(&str) -> Option<Expr>,
{
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            position: self.offset(),
            message: message.into(),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ (Operator::Add | Operator::Sub))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.factor()?;
        while let Some(Token::Op(op @ (Operator::Mul | Operator::Div))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let position = self.offset();
        let token = match self.tokens.get(self.pos) {
            Some((_, t)) => t.clone(),
            None => return Err(self.error("unexpected end of expression")),
        };
        self.pos += 1;

        match token {
            Token::Number(v) => Ok(Expr::Constant(v)),
            Token::Ident(name) => (self.resolve)(&name).ok_or(ParseError {
                position,
                message: format!("unknown operand {name:?}"),
            }),
            Token::LParen => {
                let inner = self.expr()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error("expected ')'")),
                }
            }
            Token::Op(Operator::Sub) => {
                let operand = self.factor()?;
                Ok(Expr::binary(Operator::Sub, Expr::Constant(0.0), operand))
            }
            Token::Op(op) => Err(ParseError {
                position,
                message: format!("unexpected operator '{}'", op.symbol()),
            }),
            Token::RParen => Err(ParseError {
                position,
                message: "unexpected ')'".to_string(),
            }),
        }
    }
}

/// Parse `input` into an expression tree, resolving identifiers with
/// `resolve`.
pub fn parse_expression<F>(input: &str, resolve: F) -> Result<Expr, ParseError>
where
    F: Fn(&str) -> Option<Expr>,
{
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        resolve: &resolve,
    };
    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SeriesRef, SeriesSelector, Statistic};

    fn series(name: &str) -> Expr {
        Expr::Series(SeriesRef::new(SeriesSelector::new(name), Statistic::Sum))
    }

    fn resolver(id: &str) -> Option<Expr> {
        id.starts_with('m').then(|| series(id))
    }

    #[test]
    fn multiplication_binds_tighter() {
        let e = parse_expression("1 + 2 * 3", |_| None).unwrap();
        assert_eq!(
            e,
            Expr::binary(
                Operator::Add,
                Expr::Constant(1.0),
                Expr::binary(Operator::Mul, Expr::Constant(2.0), Expr::Constant(3.0)),
            )
        );
    }

    #[test]
    fn same_precedence_is_left_associative() {
        let e = parse_expression("8 / 4 / 2", |_| None).unwrap();
        assert_eq!(
            e,
            Expr::binary(
                Operator::Div,
                Expr::binary(Operator::Div, Expr::Constant(8.0), Expr::Constant(4.0)),
                Expr::Constant(2.0),
            )
        );
    }

    #[test]
    fn error_rate_expression() {
        let e = parse_expression("100*(m4+m5)/(m1+m2+m3)", resolver).unwrap();
        let numerator = Expr::binary(
            Operator::Mul,
            Expr::Constant(100.0),
            Expr::binary(Operator::Add, series("m4"), series("m5")),
        );
        let denominator = Expr::binary(
            Operator::Add,
            Expr::binary(Operator::Add, series("m1"), series("m2")),
            series("m3"),
        );
        assert_eq!(e, Expr::binary(Operator::Div, numerator, denominator));
    }

    #[test]
    fn unary_minus() {
        let e = parse_expression("-m1", resolver).unwrap();
        assert_eq!(
            e,
            Expr::binary(Operator::Sub, Expr::Constant(0.0), series("m1"))
        );
    }

    #[test]
    fn unknown_identifier_reports_position() {
        let err = parse_expression("m1 + x9", resolver).unwrap_err();
        assert_eq!(err.position, 5);
        assert!(err.message.contains("x9"));
    }

    #[test]
    fn unbalanced_parenthesis() {
        assert!(parse_expression("(m1 + m2", resolver).is_err());
        assert!(parse_expression("m1 + m2)", resolver).is_err());
    }

    #[test]
    fn dangling_operator() {
        let err = parse_expression("m1 *", resolver).unwrap_err();
        assert_eq!(err.position, 4);
    }

    #[test]
    fn bad_character() {
        let err = parse_expression("m1 % m2", resolver).unwrap_err();
        assert_eq!(err.position, 3);
    }
}
