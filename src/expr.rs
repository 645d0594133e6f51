//! Lexer and recursive-descent parser for the default expression language.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparisons (`==`, `!=`,
//! `<`, `<=`, `>`, `>=`, `in`, `not in`), `+ -`, `* / %`, unary `-`, then
//! postfix `.attr` and `[index]`.

use crate::ast::*;
use crate::eval::EvalError;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    And,
    Or,
    Not,
    In,
    True,
    False,
    None,

    // Symbols
    EqEq,     // ==
    NotEq,    // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    Dot,      // .
    LBracket, // [
    RBracket, // ]
    LParen,   // (
    RParen,   // )

    // Data
    Ident(String),
    StringLit(String),
    Int(i64),
    Float(f64),
}

pub struct Lexer<'a> {
    input: &'a str,
    cursor: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, cursor: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    pub fn tokenize(mut self) -> Result<VecDeque<Token>, EvalError> {
        let mut tokens = VecDeque::new();
        while let Some(token) = self.next_token()? {
            tokens.push_back(token);
        }
        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, EvalError> {
        let rest = self.remaining();
        let trimmed = rest.trim_start();
        self.advance(rest.len() - trimmed.len());

        let rest = self.remaining();
        let first = match rest.chars().next() {
            Some(c) => c,
            None => return Ok(None),
        };

        const SYMBOLS: &[(&str, Token)] = &[
            ("==", Token::EqEq),
            ("!=", Token::NotEq),
            ("<=", Token::Le),
            (">=", Token::Ge),
            ("&&", Token::And),
            ("||", Token::Or),
            ("<", Token::Lt),
            (">", Token::Gt),
            ("!", Token::Not),
            ("+", Token::Plus),
            ("-", Token::Minus),
            ("*", Token::Star),
            ("/", Token::Slash),
            ("%", Token::Percent),
            (".", Token::Dot),
            ("[", Token::LBracket),
            ("]", Token::RBracket),
            ("(", Token::LParen),
            (")", Token::RParen),
        ];
        for (symbol, token) in SYMBOLS {
            if rest.starts_with(symbol) {
                self.advance(symbol.len());
                return Ok(Some(token.clone()));
            }
        }

        // Strings
        if first == '\'' || first == '"' {
            let quote = first;
            let mut s = String::new();
            let mut chars = rest.char_indices().skip(1);
            while let Some((idx, c)) = chars.next() {
                if c == quote {
                    self.advance(idx + c.len_utf8());
                    return Ok(Some(Token::StringLit(s)));
                }
                if c == '\\' {
                    match chars.next() {
                        Some((_, 'n')) => s.push('\n'),
                        Some((_, 't')) => s.push('\t'),
                        Some((_, esc)) => s.push(esc),
                        None => break,
                    }
                } else {
                    s.push(c);
                }
            }
            return Err(EvalError::Lex {
                position: self.cursor,
                message: "unterminated string literal".to_string(),
            });
        }

        // Numbers
        if first.is_ascii_digit() {
            let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
            let after = &rest[int_len..];
            let start = self.cursor;
            let is_float = after.starts_with('.')
                && after[1..].bytes().next().is_some_and(|b| b.is_ascii_digit());
            if is_float {
                let frac_len = after[1..].bytes().take_while(u8::is_ascii_digit).count();
                let text = &rest[..int_len + 1 + frac_len];
                self.advance(text.len());
                return text.parse().map(|f| Some(Token::Float(f))).map_err(|_| EvalError::Lex {
                    position: start,
                    message: format!("invalid number `{text}`"),
                });
            }
            let text = &rest[..int_len];
            self.advance(text.len());
            return text.parse().map(|i| Some(Token::Int(i))).map_err(|_| EvalError::Lex {
                position: start,
                message: format!("integer `{text}` out of range"),
            });
        }

        // Identifiers / Keywords
        if first.is_alphabetic() || first == '_' {
            let len: usize = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum();
            let ident = &rest[..len];
            self.advance(len);

            return Ok(Some(match ident {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "in" => Token::In,
                "true" | "True" => Token::True,
                "false" | "False" => Token::False,
                "none" | "None" | "null" => Token::None,
                _ => Token::Ident(ident.to_string()),
            }));
        }

        Err(EvalError::Lex {
            position: self.cursor,
            message: format!("unexpected character `{first}`"),
        })
    }
}

/// Parse a complete expression; trailing tokens are an error.
pub fn parse_expr(source: &str) -> Result<Expr, EvalError> {
    let mut parser = Parser::new(source)?;
    let expr = parser.parse_expr()?;
    match parser.consume() {
        None => Ok(expr),
        Some(t) => Err(parser.error(format!("unexpected {:?} after expression", t))),
    }
}

pub struct Parser<'a> {
    source: &'a str,
    buffer: VecDeque<Token>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, EvalError> {
        Ok(Self {
            source,
            buffer: Lexer::new(source).tokenize()?,
        })
    }

    fn peek(&self, n: usize) -> Option<&Token> {
        self.buffer.get(n)
    }

    fn consume(&mut self) -> Option<Token> {
        self.buffer.pop_front()
    }

    fn expect(&mut self, token: Token) -> Result<(), EvalError> {
        match self.consume() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(self.error(format!("expected {:?}, got {:?}", token, t))),
            None => Err(self.error(format!("expected {:?}, got end of expression", token))),
        }
    }

    fn error(&self, message: String) -> EvalError {
        EvalError::Syntax {
            expression: self.source.to_string(),
            message,
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while let Some(Token::Or) = self.peek(0) {
            self.consume();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_not()?;
        while let Some(Token::And) = self.peek(0) {
            self.consume();
            let rhs = self.parse_not()?;
            lhs = Expr::BinOp(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if let Some(Token::Not) = self.peek(0) {
            self.consume();
            let operand = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_add()?;
        loop {
            let (op, negate) = match (self.peek(0), self.peek(1)) {
                (Some(Token::EqEq), _) => (BinOp::Eq, false),
                (Some(Token::NotEq), _) => (BinOp::Ne, false),
                (Some(Token::Lt), _) => (BinOp::Lt, false),
                (Some(Token::Le), _) => (BinOp::Le, false),
                (Some(Token::Gt), _) => (BinOp::Gt, false),
                (Some(Token::Ge), _) => (BinOp::Ge, false),
                (Some(Token::In), _) => (BinOp::In, false),
                (Some(Token::Not), Some(Token::In)) => {
                    self.consume(); // not
                    (BinOp::In, true)
                }
                _ => break,
            };
            self.consume();
            let rhs = self.parse_add()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
            if negate {
                lhs = Expr::Unary(UnaryOp::Not, Box::new(lhs));
            }
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek(0) {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.consume();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek(0) {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.consume();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if let Some(Token::Minus) = self.peek(0) {
            self.consume();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let mut expr = match self.consume() {
            Some(Token::StringLit(s)) => Expr::StringLit(s),
            Some(Token::Int(i)) => Expr::IntLit(i),
            Some(Token::Float(f)) => Expr::FloatLit(f),
            Some(Token::True) => Expr::BoolLit(true),
            Some(Token::False) => Expr::BoolLit(false),
            Some(Token::None) => Expr::Null,
            Some(Token::Ident(s)) => Expr::Var(s),
            Some(Token::LParen) => {
                let e = self.parse_expr()?;
                self.expect(Token::RParen)?;
                e
            }
            Some(t) => return Err(self.error(format!("expected expression, got {:?}", t))),
            None => return Err(self.error("expected expression, got end of expression".into())),
        };

        // Handle suffixes: .attr, ['key']
        loop {
            match self.peek(0) {
                Some(Token::Dot) => {
                    self.consume(); // .
                    match self.consume() {
                        Some(Token::Ident(attr)) => {
                            expr = Expr::Attribute(Box::new(expr), attr);
                        }
                        t => {
                            return Err(
                                self.error(format!("expected identifier after dot, got {:?}", t))
                            )
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.consume(); // [
                    let idx = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                _ => break,
            }
        }

        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    #[test]
    fn lexes_symbols_numbers_and_strings() {
        let tokens = Lexer::new("a.b[0] >= 1.5 && 'x\\n'").tokenize().unwrap();
        assert_eq!(
            Vec::from(tokens),
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::LBracket,
                Token::Int(0),
                Token::RBracket,
                Token::Ge,
                Token::Float(1.5),
                Token::And,
                Token::StringLit("x\n".into()),
            ]
        );
    }

    #[test]
    fn out_of_range_integer_points_at_the_literal() {
        assert_eq!(
            parse_expr("x + 99999999999999999999"),
            Err(EvalError::Lex {
                position: 4,
                message: "integer `99999999999999999999` out of range".into(),
            })
        );
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        assert!(matches!(parse_expr("'abc"), Err(EvalError::Lex { .. })));
    }

    #[test]
    fn unicode_identifiers_and_strings() {
        assert_eq!(parse_expr("名前").unwrap(), Expr::Var("名前".into()));
        assert_eq!(parse_expr("'🌍'").unwrap(), Expr::StringLit("🌍".into()));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_expr("a or b and c").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp(
                var("a"),
                BinOp::Or,
                Box::new(Expr::BinOp(var("b"), BinOp::And, var("c")))
            )
        );
    }

    #[test]
    fn not_in_wraps_membership_test() {
        let expr = parse_expr("x not in items").unwrap();
        assert_eq!(
            expr,
            Expr::Unary(
                UnaryOp::Not,
                Box::new(Expr::BinOp(var("x"), BinOp::In, var("items")))
            )
        );
    }

    #[test]
    fn postfix_chains_left_to_right() {
        let expr = parse_expr("message['role'].name").unwrap();
        assert_eq!(
            expr,
            Expr::Attribute(
                Box::new(Expr::Index(var("message"), Box::new(Expr::StringLit("role".into())))),
                "name".into()
            )
        );
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = parse_expr("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp(
                Box::new(Expr::IntLit(1)),
                BinOp::Add,
                Box::new(Expr::BinOp(
                    Box::new(Expr::IntLit(2)),
                    BinOp::Mul,
                    Box::new(Expr::IntLit(3))
                ))
            )
        );
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(matches!(parse_expr("a b"), Err(EvalError::Syntax { .. })));
        assert!(matches!(parse_expr(""), Err(EvalError::Syntax { .. })));
        assert!(matches!(parse_expr("(a"), Err(EvalError::Syntax { .. })));
    }
}
