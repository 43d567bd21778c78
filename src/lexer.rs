use super::token::{Token, TokenType};

/// Turns source text into tokens on demand. Holds no token buffer; the
/// compiler calls `next_token` one at a time, Pratt-parser style.
pub struct Lexer {
    source: Vec<char>,
    start: usize,
    current: usize,
    line: usize,
    line_start: usize,
}

const KEYWORDS: &[(&str, TokenType)] = &[
    ("debug", TokenType::Debug),
    ("false", TokenType::False),
    ("let", TokenType::Let),
    ("true", TokenType::True),
];

impl Lexer {
    /// Callers are expected to have already stripped a leading BOM (the
    /// embedding API's `interpret` does this once, up front).
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            start: 0,
            current: 0,
            line: 1,
            line_start: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.source.get(self.current + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.current += 1;
        Some(c)
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn lexeme(&self) -> String {
        self.source[self.start..self.current].iter().collect()
    }

    fn col(&self) -> usize {
        self.start - self.line_start + 1
    }

    fn make(&self, typ: TokenType) -> Token {
        Token::new(typ, self.lexeme(), self.line, self.col())
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn identifier(&mut self) -> Token {
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        let lexeme = self.lexeme();
        let typ = KEYWORDS
            .iter()
            .find(|(kw, _)| *kw == lexeme)
            .map(|(_, typ)| *typ)
            .unwrap_or(TokenType::Ident);
        self.make(typ)
    }

    fn number(&mut self) -> Token {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        self.make(TokenType::Number)
    }

    fn string(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if c == '"' {
                let token = self.make_string_token();
                self.advance();
                return token;
            }
            if c == '\n' {
                break;
            }
            self.advance();
        }
        // Either EOF or a bare newline was hit before the closing quote.
        self.make(TokenType::Error)
    }

    /// Builds the String token using the current `[start+1, current)` span
    /// (quotes excluded) before the closing `"` is consumed.
    fn make_string_token(&self) -> Token {
        let inner: String = self.source[self.start + 1..self.current].iter().collect();
        Token::new(TokenType::String, inner, self.line, self.col())
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        self.start = self.current;

        let c = match self.advance() {
            Some(c) => c,
            None => return self.make(TokenType::Eof),
        };

        if c == '\n' {
            let token = self.make(TokenType::NewLine);
            self.line += 1;
            self.line_start = self.current;
            return token;
        }

        if c.is_alphabetic() || c == '_' {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            '"' => self.string(),
            '(' => self.make(TokenType::LParen),
            ')' => self.make(TokenType::RParen),
            '{' => self.make(TokenType::LBrace),
            '}' => self.make(TokenType::RBrace),
            '+' => self.make(TokenType::Plus),
            '-' => self.make(TokenType::Minus),
            '*' => self.make(TokenType::Multiply),
            '/' => self.make(TokenType::Divide),
            '!' => {
                if self.matches('=') {
                    self.make(TokenType::Neq)
                } else {
                    self.make(TokenType::Not)
                }
            }
            '=' => {
                if self.matches('=') {
                    self.make(TokenType::Eq)
                } else {
                    self.make(TokenType::Assign)
                }
            }
            '<' => {
                if self.matches('=') {
                    self.make(TokenType::Lte)
                } else {
                    self.make(TokenType::Lt)
                }
            }
            '>' => {
                if self.matches('=') {
                    self.make(TokenType::Gte)
                } else {
                    self.make(TokenType::Gt)
                }
            }
            _ => self.make(TokenType::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(source: &str) -> Vec<TokenType> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.typ == TokenType::Eof;
            out.push(token.typ);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn skips_whitespace_and_comments() {
        assert_eq!(
            types("  1 + 2 // trailing\n"),
            vec![
                TokenType::Number,
                TokenType::Plus,
                TokenType::Number,
                TokenType::NewLine,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            types("== != <= >= ="),
            vec![
                TokenType::Eq,
                TokenType::Neq,
                TokenType::Lte,
                TokenType::Gte,
                TokenType::Assign,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            types("let x true false debug y"),
            vec![
                TokenType::Let,
                TokenType::Ident,
                TokenType::True,
                TokenType::False,
                TokenType::Debug,
                TokenType::Ident,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn string_literal_excludes_quotes() {
        let mut lexer = Lexer::new("\"abc\"");
        let token = lexer.next_token();
        assert_eq!(token.typ, TokenType::String);
        assert_eq!(token.lexeme, "abc");
    }

    #[test]
    fn unterminated_string_is_an_error_not_an_infinite_loop() {
        assert_eq!(types("\"abc"), vec![TokenType::Error, TokenType::Eof]);
        assert_eq!(
            types("\"abc\nlet"),
            vec![TokenType::Error, TokenType::NewLine, TokenType::Let, TokenType::Eof]
        );
    }

    #[test]
    fn unknown_character_is_an_error() {
        assert_eq!(types("@"), vec![TokenType::Error, TokenType::Eof]);
    }
}
