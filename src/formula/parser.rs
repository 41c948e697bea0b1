//! Recursive-descent parser for Tableau calculations
//!
//! Precedence, lowest first: `OR`, `AND`, `NOT`, comparisons, `+ - &`, `* / %`, unary minus,
//! `^`, primaries.

use super::ast::{BinaryOp, Expr, LodKind, UnaryOp};
use super::error::{FormulaError, FormulaResult};
use super::lexer::{Lexer, Spanned, Token};

/// Parse a Tableau formula into an expression tree
pub fn parse_formula(input: &str) -> FormulaResult<Expr> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    if parser.peek() == &Token::Eof {
        return Err(FormulaError::new(0, "empty formula"));
    }
    let expr = parser.parse_expr()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected token {:?} after expression", other))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn error(&self, message: impl Into<String>) -> FormulaError {
        FormulaError::new(self.offset(), message)
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> FormulaResult<()> {
        if self.peek() == &expected {
            self.next();
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", expected, self.peek())))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Identifier(id) if id.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> FormulaResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {:?}", keyword, self.peek())))
        }
    }

    fn parse_expr(&mut self) -> FormulaResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> FormulaResult<Expr> {
        if self.eat_keyword("NOT") {
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Equals => BinaryOp::Equals,
                Token::NotEquals => BinaryOp::NotEquals,
                Token::Less => BinaryOp::Less,
                Token::LessEquals => BinaryOp::LessEquals,
                Token::Greater => BinaryOp::Greater,
                Token::GreaterEquals => BinaryOp::GreaterEquals,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                Token::Ampersand => BinaryOp::Concat,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                Token::Percent => BinaryOp::Modulo,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> FormulaResult<Expr> {
        match self.peek() {
            Token::Minus => {
                self.next();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Negate,
                    expr: Box::new(expr),
                })
            }
            Token::Plus => {
                self.next();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> FormulaResult<Expr> {
        let base = self.parse_primary()?;
        if self.peek() == &Token::Caret {
            self.next();
            let exponent = self.parse_unary()?;
            return Ok(binary(BinaryOp::Power, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> FormulaResult<Expr> {
        match self.next() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::String(s) => Ok(Expr::Text(s)),
            Token::Date(d) => Ok(Expr::Date(d)),
            Token::Reference { qualifier, name } => Ok(Expr::Reference { qualifier, name }),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Group(Box::new(inner)))
            }
            Token::LBrace => self.parse_lod(),
            Token::Identifier(id) => self.parse_identifier(id),
            other => {
                // step back so the error points at the offending token
                if other != Token::Eof {
                    self.pos -= 1;
                }
                Err(self.error(format!("unexpected token {:?}", other)))
            }
        }
    }

    fn parse_identifier(&mut self, id: String) -> FormulaResult<Expr> {
        match id.to_uppercase().as_str() {
            "TRUE" => return Ok(Expr::Boolean(true)),
            "FALSE" => return Ok(Expr::Boolean(false)),
            "NULL" => return Ok(Expr::Null),
            "IF" => return self.parse_if(),
            "CASE" => return self.parse_case(),
            _ => {}
        }

        if self.peek() == &Token::LParen {
            self.next();
            let mut args = Vec::new();
            if self.peek() != &Token::RParen {
                loop {
                    args.push(self.parse_expr()?);
                    if self.peek() == &Token::Comma {
                        self.next();
                    } else {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::call(id, args));
        }

        // bare single-word field names are accepted without brackets
        Ok(Expr::reference(id))
    }

    /// `IF c THEN a [ELSEIF c THEN b]* [ELSE d] END`, after `IF`
    fn parse_if(&mut self) -> FormulaResult<Expr> {
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        self.expect_keyword("THEN")?;
        let value = self.parse_expr()?;
        branches.push((cond, value));

        let mut otherwise = None;
        loop {
            if self.eat_keyword("ELSEIF") {
                let cond = self.parse_expr()?;
                self.expect_keyword("THEN")?;
                let value = self.parse_expr()?;
                branches.push((cond, value));
            } else if self.eat_keyword("ELSE") {
                otherwise = Some(Box::new(self.parse_expr()?));
                self.expect_keyword("END")?;
                break;
            } else {
                self.expect_keyword("END")?;
                break;
            }
        }

        Ok(Expr::If {
            branches,
            otherwise,
        })
    }

    /// `CASE e WHEN v THEN r [WHEN v THEN r]* [ELSE d] END`, after `CASE`
    fn parse_case(&mut self) -> FormulaResult<Expr> {
        let subject = self.parse_expr()?;
        let mut arms = Vec::new();
        while self.eat_keyword("WHEN") {
            let when = self.parse_expr()?;
            self.expect_keyword("THEN")?;
            let then = self.parse_expr()?;
            arms.push((when, then));
        }
        if arms.is_empty() {
            return Err(self.error("CASE requires at least one WHEN"));
        }
        let otherwise = if self.eat_keyword("ELSE") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_keyword("END")?;
        Ok(Expr::Case {
            subject: Box::new(subject),
            arms,
            otherwise,
        })
    }

    /// `{FIXED d1, d2 : expr}`, `{INCLUDE ...}`, `{EXCLUDE ...}` or `{expr}`, after `{`
    fn parse_lod(&mut self) -> FormulaResult<Expr> {
        let kind = match self.peek() {
            Token::Identifier(id) if id.eq_ignore_ascii_case("FIXED") => Some(LodKind::Fixed),
            Token::Identifier(id) if id.eq_ignore_ascii_case("INCLUDE") => Some(LodKind::Include),
            Token::Identifier(id) if id.eq_ignore_ascii_case("EXCLUDE") => Some(LodKind::Exclude),
            _ => None,
        };

        // `{FIXED(...)}` would be a function call named FIXED, which does not exist
        let Some(kind) = kind.filter(|_| self.peek_nth(1) != &Token::LParen) else {
            let body = self.parse_expr()?;
            self.expect(Token::RBrace)?;
            return Ok(Expr::Lod {
                kind: LodKind::Fixed,
                dimensions: Vec::new(),
                body: Box::new(body),
            });
        };
        self.next();

        let mut dimensions = Vec::new();
        if self.peek() != &Token::Colon {
            loop {
                dimensions.push(self.parse_expr()?);
                if self.peek() == &Token::Comma {
                    self.next();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::Colon)?;
        let body = self.parse_expr()?;
        self.expect(Token::RBrace)?;

        Ok(Expr::Lod {
            kind,
            dimensions,
            body: Box::new(body),
        })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(name: &str) -> Expr {
        Expr::reference(name)
    }

    #[test]
    fn test_parse_ratio_of_sums() {
        let expr = parse_formula("SUM([Profit])/SUM([Sales])").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Divide,
                Expr::call("SUM", vec![r("Profit")]),
                Expr::call("SUM", vec![r("Sales")]),
            )
        );
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_formula("[A] + [B] * [C] > 10 AND NOT [D]").unwrap();
        let expected = binary(
            BinaryOp::And,
            binary(
                BinaryOp::Greater,
                binary(
                    BinaryOp::Add,
                    r("A"),
                    binary(BinaryOp::Multiply, r("B"), r("C")),
                ),
                Expr::Number("10".to_string()),
            ),
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(r("D")),
            },
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parse_if_elseif_else() {
        let expr =
            parse_formula("IF [Sales] > 100 THEN 'High' ELSEIF [Sales] > 10 THEN 'Mid' ELSE 'Low' END")
                .unwrap();
        match expr {
            Expr::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.as_deref(), Some(&Expr::Text("Low".to_string())));
            }
            other => panic!("expected IF, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_case_lowercase_keywords() {
        let expr =
            parse_formula("case [Region] when 'East' then 1 when 'West' then 2 end").unwrap();
        match expr {
            Expr::Case {
                arms, otherwise, ..
            } => {
                assert_eq!(arms.len(), 2);
                assert!(otherwise.is_none());
            }
            other => panic!("expected CASE, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_fixed_lod() {
        let expr = parse_formula("{FIXED [Customer], [Region] : SUM([Sales])}").unwrap();
        assert_eq!(
            expr,
            Expr::Lod {
                kind: LodKind::Fixed,
                dimensions: vec![r("Customer"), r("Region")],
                body: Box::new(Expr::call("SUM", vec![r("Sales")])),
            }
        );
    }

    #[test]
    fn test_parse_table_scoped_lod() {
        let expr = parse_formula("{ MAX([Order Date]) }").unwrap();
        assert!(matches!(
            expr,
            Expr::Lod {
                kind: LodKind::Fixed,
                ref dimensions,
                ..
            } if dimensions.is_empty()
        ));
    }

    #[test]
    fn test_parse_power_is_right_associative() {
        let expr = parse_formula("2 ^ 3 ^ 2").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Power,
                Expr::Number("2".into()),
                binary(
                    BinaryOp::Power,
                    Expr::Number("3".into()),
                    Expr::Number("2".into())
                ),
            )
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_formula("").is_err());
        assert!(parse_formula("SUM([Sales]").is_err());
        assert!(parse_formula("IF [A] THEN 1").is_err());
        assert!(parse_formula("[A] +").is_err());
        assert!(parse_formula("CASE [A] END").is_err());

        let err = parse_formula("[A] [B]").unwrap_err();
        assert_eq!(err.offset, 4);
    }
}
