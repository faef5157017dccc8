use std::fmt;

use super::ParseError;

/// Source position of a token, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    /// Any single punctuation character. Multi-character operators are
    /// recognised by the parser from adjacent spans so that `>>` can close two
    /// template lists.
    Punct(char),
    /// `->`
    Arrow,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "`{name}`"),
            Token::Int(v) => write!(f, "`{v}`"),
            Token::Float(v) => write!(f, "`{v}`"),
            Token::Punct(c) => write!(f, "`{c}`"),
            Token::Arrow => f.write_str("`->`"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    /// Tokenizes the whole source. The returned vector always ends with
    /// [`Token::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn peek_second(&self) -> Option<char> {
        let mut it = self.chars.clone();
        it.next();
        it.next().map(|(_, c)| c)
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map(|&(i, _)| i).unwrap_or(self.source.len())
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    self.bump();
                    let mut depth = 1usize;
                    while depth > 0 {
                        match self.bump() {
                            Some((_, '*')) if self.peek_char() == Some('/') => {
                                self.bump();
                                depth -= 1;
                            }
                            Some((_, '/')) if self.peek_char() == Some('*') => {
                                self.bump();
                                depth += 1;
                            }
                            Some(_) => {}
                            None => {
                                return Err(ParseError::new(
                                    "unterminated block comment",
                                    Span {
                                        line,
                                        column,
                                        ..Span::default()
                                    },
                                ))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned, ParseError> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let start = self.offset();
        let token = match self.peek_char() {
            None => Token::Eof,
            Some(c) if c.is_alphabetic() || c == '_' => {
                while matches!(self.peek_char(), Some(c) if c.is_alphanumeric() || c == '_') {
                    self.bump();
                }
                Token::Ident(self.source[start..self.offset()].to_string())
            }
            Some(c) if c.is_ascii_digit() => self.number(start, line, column)?,
            Some('.') if matches!(self.peek_second(), Some(d) if d.is_ascii_digit()) => {
                self.number(start, line, column)?
            }
            Some('-') if self.peek_second() == Some('>') => {
                self.bump();
                self.bump();
                Token::Arrow
            }
            Some(c) => {
                self.bump();
                Token::Punct(c)
            }
        };
        let end = self.offset();
        Ok(Spanned {
            token,
            span: Span {
                line,
                column,
                start,
                end,
            },
        })
    }

    fn number(&mut self, start: usize, line: u32, column: u32) -> Result<Token, ParseError> {
        let span = Span {
            line,
            column,
            start,
            end: start,
        };
        if self.peek_char() == Some('0') && matches!(self.peek_second(), Some('x' | 'X')) {
            self.bump();
            self.bump();
            return self.hex_number(span);
        }

        let mut is_float = false;
        while let Some(c) = self.peek_char() {
            match c {
                '0'..='9' => {}
                // `a[0].x` is a member access, not `0.`
                '.' if matches!(self.peek_second(), Some(n) if n.is_alphabetic() || n == '_') => {
                    break
                }
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek_char(), Some('+' | '-')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }
        let text = &self.source[start..self.offset()];
        match self.peek_char() {
            Some('f' | 'h') => {
                self.bump();
                is_float = true;
            }
            _ if !is_float => {
                self.int_suffix();
            }
            _ => {}
        }
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| ParseError::new(format!("invalid float literal `{text}`"), span))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| ParseError::new(format!("invalid integer literal `{text}`"), span))
        }
    }

    /// Hex integers (`0xff`) and hex floats (`0x1.8p1`, `0x1p4`, `0x.8`).
    fn hex_number(&mut self, span: Span) -> Result<Token, ParseError> {
        let source = self.source;
        let int_start = self.offset();
        self.hex_digits();
        let int_digits = &source[int_start..self.offset()];

        let member = |c: char| c == '_' || (c.is_alphabetic() && !c.is_ascii_hexdigit());
        let mut fraction = None;
        if self.peek_char() == Some('.') && !self.peek_second().is_some_and(member) {
            self.bump();
            let start = self.offset();
            self.hex_digits();
            fraction = Some(&source[start..self.offset()]);
        }
        let mut exponent = None;
        if matches!(self.peek_char(), Some('p' | 'P')) {
            self.bump();
            let start = self.offset();
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.bump();
            }
            while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
            exponent = Some(&source[start..self.offset()]);
            if matches!(self.peek_char(), Some('f' | 'h')) {
                self.bump();
            }
        }
        let text = &source[span.start..self.offset()];

        if fraction.is_none() && exponent.is_none() {
            let value = i64::from_str_radix(int_digits, 16)
                .map_err(|_| ParseError::new(format!("invalid hex literal `{text}`"), span))?;
            self.int_suffix();
            return Ok(Token::Int(value));
        }

        let invalid = || ParseError::new(format!("invalid hex float literal `{text}`"), span);
        let fraction = fraction.unwrap_or("");
        if int_digits.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let mut mantissa = 0.0f64;
        for c in int_digits.chars().chain(fraction.chars()) {
            mantissa = mantissa * 16.0 + f64::from(c.to_digit(16).ok_or_else(invalid)?);
        }
        let exponent: i32 = match exponent {
            Some(e) => e.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let shift = i32::try_from(fraction.len()).map_err(|_| invalid())?.saturating_mul(4);
        Ok(Token::Float(mantissa * 2f64.powi(exponent.saturating_sub(shift))))
    }

    fn hex_digits(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_ascii_hexdigit()) {
            self.bump();
        }
    }

    fn int_suffix(&mut self) {
        if matches!(self.peek_char(), Some('u' | 'i')) {
            self.bump();
        }
    }
}
