//! IDL tokenizer.
//!
//! Produces identifiers (dotted references kept whole), integer and string
//! literals and single-character symbols, each tagged with its 1-based line
//! and column. Line (`//`) and block (`/* */`) comments are dropped.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword; may contain dots (`google.protobuf.Empty`) and
    /// a leading dot for fully-qualified references.
    Ident(String),
    /// Numeric literal as written (decimal, hex, octal or float).
    Number(String),
    /// String literal with quotes removed and escapes left as written.
    Str(String),
    Symbol(char),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "identifier '{}'", s),
            TokenKind::Number(s) => write!(f, "number '{}'", s),
            TokenKind::Str(s) => write!(f, "string \"{}\"", s),
            TokenKind::Symbol(c) => write!(f, "'{}'", c),
            TokenKind::Eof => f.write_str("end of file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn is_ident(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(s) if s == word)
    }

    pub fn is_symbol(&self, c: char) -> bool {
        self.kind == TokenKind::Symbol(c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub reason: String,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next()
    }

    fn error(&self, line: usize, column: usize, reason: impl Into<String>) -> LexError {
        LexError {
            line,
            column,
            reason: reason.into(),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(c) = self.bump() {
                        if c == '*' && self.peek() == Some('/') {
                            self.bump();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(self.error(line, column, "unterminated block comment"));
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let token = |kind| Token { kind, line, column };

        let Some(c) = self.peek() else {
            return Ok(token(TokenKind::Eof));
        };

        if c.is_ascii_alphabetic() || c == '_' || (c == '.' && self.peek_second().is_some_and(is_ident_start)) {
            let mut ident = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                    ident.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return Ok(token(TokenKind::Ident(ident)));
        }

        if c.is_ascii_digit() {
            let mut number = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '.' {
                    number.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return Ok(token(TokenKind::Number(number)));
        }

        if c == '"' || c == '\'' {
            let quote = c;
            self.bump();
            let mut value = String::new();
            loop {
                match self.bump() {
                    Some('\\') => {
                        value.push('\\');
                        if let Some(escaped) = self.bump() {
                            value.push(escaped);
                        }
                    }
                    Some(c) if c == quote => break,
                    Some('\n') | None => {
                        return Err(self.error(line, column, "unterminated string literal"));
                    }
                    Some(c) => value.push(c),
                }
            }
            return Ok(token(TokenKind::Str(value)));
        }

        if "{}()[]<>;=,-+:".contains(c) {
            self.bump();
            return Ok(token(TokenKind::Symbol(c)));
        }

        Err(self.error(line, column, format!("unexpected character '{}'", c)))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Tokenizes `source`. The returned vector always ends with an
/// [`TokenKind::Eof`] token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_rpc_line() {
        let tokens = kinds("rpc Upload(stream pkg.FileRequest) returns (FileReply);");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("rpc".into()),
                TokenKind::Ident("Upload".into()),
                TokenKind::Symbol('('),
                TokenKind::Ident("stream".into()),
                TokenKind::Ident("pkg.FileRequest".into()),
                TokenKind::Symbol(')'),
                TokenKind::Ident("returns".into()),
                TokenKind::Symbol('('),
                TokenKind::Ident("FileReply".into()),
                TokenKind::Symbol(')'),
                TokenKind::Symbol(';'),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = kinds("// header\nmessage /* inline */ A {}\n");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("message".into()),
                TokenKind::Ident("A".into()),
                TokenKind::Symbol('{'),
                TokenKind::Symbol('}'),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("syntax = \"proto3\";\n  package a.b;").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!(tokens[2].kind, TokenKind::Str("proto3".into()));
        let package = &tokens[4];
        assert!(package.is_ident("package"));
        assert_eq!((package.line, package.column), (2, 3));
    }

    #[test]
    fn test_leading_dot_reference() {
        assert_eq!(
            kinds(".google.protobuf.Empty")[0],
            TokenKind::Ident(".google.protobuf.Empty".into())
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("import \"a.proto;\n").unwrap_err();
        assert_eq!((err.line, err.column), (1, 8));
        assert!(err.reason.contains("unterminated string"));
    }

    #[test]
    fn test_unterminated_comment() {
        let err = tokenize("message A {} /* never closed").unwrap_err();
        assert!(err.reason.contains("block comment"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("message A { int32 x = 1; } @").unwrap_err();
        assert!(err.reason.contains("'@'"));
    }
}
