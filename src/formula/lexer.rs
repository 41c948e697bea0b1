//! Tokenizer for the Tableau calculation language

use super::error::{FormulaError, FormulaResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// `[Name]` or `[Qualifier].[Name]`
    Reference {
        qualifier: Option<String>,
        name: String,
    },
    Identifier(String),
    /// Numeric literal, kept as written
    Number(String),
    String(String),
    /// Contents of a `#...#` date literal
    Date(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Ampersand,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Eof,
}

/// A token with the byte offset where it starts
#[derive(Clone, Debug, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> &'a str
    where
        F: FnMut(char) -> bool,
    {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn skip_trivia(&mut self) {
        loop {
            self.consume_while(char::is_whitespace);
            if self.peek() == Some('/') && self.peek_second() == Some('/') {
                self.consume_while(|c| c != '\n');
                continue;
            }
            if self.peek() == Some('/') && self.peek_second() == Some('*') {
                self.bump();
                self.bump();
                while let Some(ch) = self.bump() {
                    if ch == '*' && self.peek() == Some('/') {
                        self.bump();
                        break;
                    }
                }
                continue;
            }
            break;
        }
    }

    /// Tokenize the whole input
    pub(crate) fn tokenize(mut self) -> FormulaResult<Vec<Spanned>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let offset = self.pos;
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(Spanned { token, offset });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> FormulaResult<Token> {
        let offset = self.pos;
        let Some(ch) = self.bump() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            '[' => {
                let first = self.bracket_body(offset)?;
                // `[Parameters].[Top N]` style qualification
                if self.peek() == Some('.') && self.peek_second() == Some('[') {
                    self.bump();
                    let inner = self.pos;
                    self.bump();
                    let name = self.bracket_body(inner)?;
                    Token::Reference {
                        qualifier: Some(first),
                        name,
                    }
                } else {
                    Token::Reference {
                        qualifier: None,
                        name: first,
                    }
                }
            }
            '"' | '\'' => Token::String(self.string_body(ch, offset)?),
            '#' => {
                let body = self.consume_while(|c| c != '#').to_string();
                if self.bump() != Some('#') {
                    return Err(FormulaError::new(offset, "unterminated date literal"));
                }
                Token::Date(body.trim().to_string())
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '&' => {
                // `&&` is accepted as a synonym of AND
                if self.peek() == Some('&') {
                    self.bump();
                    Token::Identifier("AND".to_string())
                } else {
                    Token::Ampersand
                }
            }
            '|' if self.peek() == Some('|') => {
                self.bump();
                Token::Identifier("OR".to_string())
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                }
                Token::Equals
            }
            '!' if self.peek() == Some('=') => {
                self.bump();
                Token::NotEquals
            }
            '<' => match self.peek() {
                Some('=') => {
                    self.bump();
                    Token::LessEquals
                }
                Some('>') => {
                    self.bump();
                    Token::NotEquals
                }
                _ => Token::Less,
            },
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::GreaterEquals
                } else {
                    Token::Greater
                }
            }
            c if c.is_ascii_digit() || (c == '.' && self.peek().is_some_and(|n| n.is_ascii_digit())) => {
                let start = offset;
                self.consume_while(|c| c.is_ascii_digit() || c == '.');
                if matches!(self.peek(), Some('e' | 'E')) {
                    let exponent_follows = match self.peek_second() {
                        Some(d) if d.is_ascii_digit() => true,
                        Some('+' | '-') => true,
                        _ => false,
                    };
                    if exponent_follows {
                        self.bump();
                        if matches!(self.peek(), Some('+' | '-')) {
                            self.bump();
                        }
                        self.consume_while(|c| c.is_ascii_digit());
                    }
                }
                Token::Number(self.input[start..self.pos].to_string())
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = offset;
                self.consume_while(|c| c.is_alphanumeric() || c == '_');
                Token::Identifier(self.input[start..self.pos].to_string())
            }
            other => {
                return Err(FormulaError::new(
                    offset,
                    format!("unexpected character '{}'", other),
                ));
            }
        };
        Ok(token)
    }

    /// Body of a bracketed name, after the opening `[`. `]]` escapes a literal `]`.
    fn bracket_body(&mut self, offset: usize) -> FormulaResult<String> {
        let mut name = String::new();
        loop {
            match self.bump() {
                Some(']') => {
                    if self.peek() == Some(']') {
                        self.bump();
                        name.push(']');
                    } else {
                        return Ok(name);
                    }
                }
                Some(c) => name.push(c),
                None => return Err(FormulaError::new(offset, "unterminated field reference")),
            }
        }
    }

    /// Body of a quoted string, after the opening quote. A doubled quote or a backslash
    /// escapes the quote character.
    fn string_body(&mut self, quote: char, offset: usize) -> FormulaResult<String> {
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('\\') if self.peek() == Some(quote) => {
                    self.bump();
                    text.push(quote);
                }
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        text.push(quote);
                    } else {
                        return Ok(text);
                    }
                }
                Some(c) => text.push(c),
                None => return Err(FormulaError::new(offset, "unterminated string literal")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_lex_reference_and_operators() {
        assert_eq!(
            tokens("SUM([Profit]) / [Sales]"),
            vec![
                Token::Identifier("SUM".to_string()),
                Token::LParen,
                Token::Reference {
                    qualifier: None,
                    name: "Profit".to_string()
                },
                Token::RParen,
                Token::Slash,
                Token::Reference {
                    qualifier: None,
                    name: "Sales".to_string()
                },
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_qualified_reference() {
        assert_eq!(
            tokens("[Parameters].[Top N]")[0],
            Token::Reference {
                qualifier: Some("Parameters".to_string()),
                name: "Top N".to_string()
            }
        );
    }

    #[test]
    fn test_lex_escaped_bracket_and_quotes() {
        assert_eq!(
            tokens("[Sales [USD]]]")[0],
            Token::Reference {
                qualifier: None,
                name: "Sales [USD]".to_string()
            }
        );
        assert_eq!(tokens("'it''s'")[0], Token::String("it's".to_string()));
        assert_eq!(tokens(r#""say ""hi""""#)[0], Token::String(r#"say "hi""#.to_string()));
    }

    #[test]
    fn test_lex_comparison_variants() {
        assert_eq!(
            tokens("a == b != c <> d <= e >= f"),
            vec![
                Token::Identifier("a".to_string()),
                Token::Equals,
                Token::Identifier("b".to_string()),
                Token::NotEquals,
                Token::Identifier("c".to_string()),
                Token::NotEquals,
                Token::Identifier("d".to_string()),
                Token::LessEquals,
                Token::Identifier("e".to_string()),
                Token::GreaterEquals,
                Token::Identifier("f".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_skips_comments() {
        let toks = tokens("// leading comment\n[A] /* inline */ + 1");
        assert_eq!(toks.len(), 4);
        assert_eq!(toks[2], Token::Number("1".to_string()));
    }

    #[test]
    fn test_lex_date_and_numbers() {
        assert_eq!(
            tokens("#2024-01-31# 1.5e3 .25"),
            vec![
                Token::Date("2024-01-31".to_string()),
                Token::Number("1.5e3".to_string()),
                Token::Number(".25".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_errors_carry_offset() {
        let err = Lexer::new("[Sales] + [Open").tokenize().unwrap_err();
        assert_eq!(err.offset, 10);

        let err = Lexer::new("1 @ 2").tokenize().unwrap_err();
        assert_eq!(err.offset, 2);
    }
}
