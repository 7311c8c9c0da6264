//! Recursive-descent parser for the IDL subset used by the backend services.
//!
//! One call to [`parse_file`] produces a [`FileDescriptor`] plus every
//! diagnostic found on the way. A malformed statement is reported and skipped
//! up to the next `;` or the closing brace of the body it sits in, so one bad
//! line inside a service does not lose the service.

use crate::descriptor::{
    bare_type_name, EnumDescriptor, FieldDescriptor, FieldLabel, FieldType, FileDescriptor, MessageDescriptor,
    MethodDescriptor, ScalarType, ServiceDescriptor,
};
use crate::error::SchemaParseError;
use crate::lexer::{tokenize, Token, TokenKind};
use std::path::{Path, PathBuf};

type ParseResult<T> = Result<T, SchemaParseError>;

/// Output of parsing a single file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file: FileDescriptor,
    /// Recovered errors; the descriptor above is still usable.
    pub errors: Vec<SchemaParseError>,
}

/// Parses `source` as the contents of `path`.
///
/// A tokenizer error is returned as `Err` because nothing after it can be
/// trusted; syntax errors are recovered from and returned in
/// [`ParsedFile::errors`].
pub fn parse_file(path: &Path, source: &str) -> Result<ParsedFile, SchemaParseError> {
    let tokens = tokenize(source).map_err(|e| SchemaParseError::at(path, e.line, e.column, e.reason))?;

    let mut parser = Parser {
        tokens,
        pos: 0,
        path: path.to_path_buf(),
        errors: Vec::new(),
        file: FileDescriptor {
            path: path.to_path_buf(),
            syntax: None,
            package: None,
            imports: Vec::new(),
            services: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
        },
    };
    parser.parse_top_level();

    let mut file = parser.file;
    let message_types = file.message_types();
    for service in &mut file.services {
        service.message_types = message_types.clone();
        service.package = file.package.clone();
    }

    Ok(ParsedFile {
        file,
        errors: parser.errors,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    path: PathBuf,
    errors: Vec<SchemaParseError>,
    file: FileDescriptor,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize() always ends the stream with Eof and advance() never
        // moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn error_at(&self, token: &Token, reason: impl Into<String>) -> SchemaParseError {
        SchemaParseError::at(&self.path, token.line, token.column, reason)
    }

    fn unexpected(&self, expected: &str) -> SchemaParseError {
        let token = self.peek();
        self.error_at(token, format!("expected {}, found {}", expected, token.kind))
    }

    fn expect_symbol(&mut self, c: char) -> ParseResult<()> {
        if self.peek().is_symbol(c) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", c)))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> ParseResult<()> {
        if self.peek().is_ident(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", word)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_string(&mut self, what: &str) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Str(value) => {
                let value = value.clone();
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_integer(&mut self, what: &str) -> ParseResult<i64> {
        let negative = if self.peek().is_symbol('-') {
            self.advance();
            true
        } else {
            false
        };
        let token = self.peek().clone();
        let TokenKind::Number(text) = &token.kind else {
            return Err(self.unexpected(what));
        };
        let value = parse_integer(text).ok_or_else(|| self.error_at(&token, format!("invalid {} '{}'", what, text)))?;
        self.advance();
        Ok(if negative { -value } else { value })
    }

    fn record(&mut self, err: SchemaParseError) {
        self.errors.push(err);
    }

    /// Skips the rest of the current statement: up to and including the next
    /// `;` at depth zero, through a balanced `{ ... }` block, or up to (not
    /// including) a `}` that closes the enclosing body.
    fn skip_statement(&mut self) {
        let mut depth = 0usize;
        loop {
            let token = self.peek();
            if token.kind == TokenKind::Eof {
                return;
            }
            if token.is_symbol('{') {
                depth += 1;
            } else if token.is_symbol('}') {
                if depth == 0 {
                    return;
                }
                depth -= 1;
                if depth == 0 {
                    self.advance();
                    return;
                }
            } else if token.is_symbol(';') && depth == 0 {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    /// Skips a bracketed option list such as `[deprecated = true]`.
    fn skip_field_options(&mut self) -> ParseResult<()> {
        if !self.peek().is_symbol('[') {
            return Ok(());
        }
        let open = self.advance();
        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::Symbol(']') => return Ok(()),
                TokenKind::Eof => return Err(self.error_at(&open, "unterminated option list")),
                _ => {}
            }
        }
    }

    fn parse_top_level(&mut self) {
        while !self.at_eof() {
            let token = self.peek().clone();
            let result = match &token.kind {
                TokenKind::Ident(word) => match word.as_str() {
                    "syntax" => self.parse_syntax(),
                    "package" => self.parse_package(),
                    "import" => self.parse_import(),
                    "option" | "extend" => {
                        self.skip_statement();
                        Ok(())
                    }
                    "message" => self.parse_message(None),
                    "enum" => self.parse_enum(None),
                    "service" => self.parse_service(),
                    other => Err(self.error_at(&token, format!("unexpected '{}' at top level", other))),
                },
                TokenKind::Symbol(';') => {
                    self.advance();
                    Ok(())
                }
                _ => Err(self.error_at(&token, format!("unexpected {} at top level", token.kind))),
            };

            if let Err(err) = result {
                self.record(err);
                self.skip_statement();
                // A stray closing brace at top level would stall skip_statement.
                if self.peek().is_symbol('}') {
                    self.advance();
                }
            }
        }
    }

    fn parse_syntax(&mut self) -> ParseResult<()> {
        self.expect_keyword("syntax")?;
        self.expect_symbol('=')?;
        let syntax = self.expect_string("syntax string")?;
        self.expect_symbol(';')?;
        self.file.syntax = Some(syntax);
        Ok(())
    }

    fn parse_package(&mut self) -> ParseResult<()> {
        self.expect_keyword("package")?;
        let package = self.expect_ident("package name")?;
        self.expect_symbol(';')?;
        self.file.package = Some(package.trim_start_matches('.').to_string());
        Ok(())
    }

    fn parse_import(&mut self) -> ParseResult<()> {
        self.expect_keyword("import")?;
        if self.peek().is_ident("public") || self.peek().is_ident("weak") {
            self.advance();
        }
        let import = self.expect_string("import path")?;
        self.expect_symbol(';')?;
        self.file.imports.push(import);
        Ok(())
    }

    fn parse_message(&mut self, parent: Option<&str>) -> ParseResult<()> {
        self.expect_keyword("message")?;
        let name = self.expect_ident("message name")?;
        let full_name = match parent {
            Some(parent) => format!("{}.{}", parent, name),
            None => name.clone(),
        };
        let open = self.peek().clone();
        self.expect_symbol('{')?;

        // Reserve the slot so outer messages precede their nested ones.
        let index = self.file.messages.len();
        self.file.messages.push(MessageDescriptor {
            name: bare_type_name(&name).to_string(),
            full_name: full_name.clone(),
            fields: Vec::new(),
        });

        let mut fields = Vec::new();
        loop {
            let token = self.peek().clone();
            if token.is_symbol('}') {
                self.advance();
                break;
            }
            if token.kind == TokenKind::Eof {
                self.record(self.error_at(&open, format!("unterminated message '{}'", name)));
                break;
            }

            let result = if token.is_ident("message") && matches!(self.peek_nth(1).kind, TokenKind::Ident(_)) {
                self.parse_message(Some(&full_name))
            } else if token.is_ident("enum") && matches!(self.peek_nth(1).kind, TokenKind::Ident(_)) {
                self.parse_enum(Some(&full_name))
            } else if token.is_ident("oneof") && matches!(self.peek_nth(2).kind, TokenKind::Symbol('{')) {
                self.parse_oneof(&mut fields)
            } else if ["option", "reserved", "extensions", "extend"]
                .iter()
                .any(|kw| token.is_ident(kw))
            {
                self.skip_statement();
                Ok(())
            } else if token.is_symbol(';') {
                self.advance();
                Ok(())
            } else {
                self.parse_field(None).map(|field| fields.push(field))
            };

            if let Err(err) = result {
                self.record(err);
                self.skip_statement();
            }
        }

        self.file.messages[index].fields = fields;
        Ok(())
    }

    fn parse_oneof(&mut self, fields: &mut Vec<FieldDescriptor>) -> ParseResult<()> {
        self.expect_keyword("oneof")?;
        let name = self.expect_ident("oneof name")?;
        let open = self.peek().clone();
        self.expect_symbol('{')?;
        loop {
            let token = self.peek().clone();
            if token.is_symbol('}') {
                self.advance();
                return Ok(());
            }
            if token.kind == TokenKind::Eof {
                return Err(self.error_at(&open, format!("unterminated oneof '{}'", name)));
            }
            if token.is_ident("option") {
                self.skip_statement();
                continue;
            }
            match self.parse_field(Some(&name)) {
                Ok(field) => fields.push(field),
                Err(err) => {
                    self.record(err);
                    self.skip_statement();
                }
            }
        }
    }

    fn parse_field(&mut self, oneof: Option<&str>) -> ParseResult<FieldDescriptor> {
        let label = match &self.peek().kind {
            TokenKind::Ident(word) if word == "repeated" => Some(FieldLabel::Repeated),
            TokenKind::Ident(word) if word == "optional" => Some(FieldLabel::Optional),
            TokenKind::Ident(word) if word == "required" => Some(FieldLabel::Singular),
            _ => None,
        };
        if label.is_some() {
            self.advance();
        }
        let label = label.unwrap_or(FieldLabel::Singular);

        let field_type = self.parse_field_type()?;
        let name = self.expect_ident("field name")?;
        self.expect_symbol('=')?;
        let number_token = self.peek().clone();
        let number = self.expect_integer("field number")?;
        let number = u32::try_from(number)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| self.error_at(&number_token, format!("field number {} out of range", number)))?;
        self.skip_field_options()?;
        self.expect_symbol(';')?;

        Ok(FieldDescriptor {
            name,
            number,
            label,
            field_type,
            oneof: oneof.map(str::to_string),
        })
    }

    fn parse_field_type(&mut self) -> ParseResult<FieldType> {
        if self.peek().is_ident("map") && self.peek_nth(1).is_symbol('<') {
            self.advance();
            self.advance();
            let key_token = self.peek().clone();
            let key_name = self.expect_ident("map key type")?;
            let key = ScalarType::from_keyword(&key_name)
                .filter(|k| *k != ScalarType::Bytes && *k != ScalarType::Double && *k != ScalarType::Float)
                .ok_or_else(|| self.error_at(&key_token, format!("invalid map key type '{}'", key_name)))?;
            self.expect_symbol(',')?;
            let value = self.parse_named_type()?;
            self.expect_symbol('>')?;
            return Ok(FieldType::Map {
                key,
                value: Box::new(value),
            });
        }
        self.parse_named_type()
    }

    fn parse_named_type(&mut self) -> ParseResult<FieldType> {
        let name = self.expect_ident("field type")?;
        Ok(match ScalarType::from_keyword(&name) {
            Some(scalar) => FieldType::Scalar(scalar),
            None => FieldType::Message(bare_type_name(&name).to_string()),
        })
    }

    fn parse_enum(&mut self, parent: Option<&str>) -> ParseResult<()> {
        self.expect_keyword("enum")?;
        let name = self.expect_ident("enum name")?;
        let open = self.peek().clone();
        self.expect_symbol('{')?;

        let mut values = Vec::new();
        loop {
            let token = self.peek().clone();
            if token.is_symbol('}') {
                self.advance();
                break;
            }
            if token.kind == TokenKind::Eof {
                self.record(self.error_at(&open, format!("unterminated enum '{}'", name)));
                break;
            }
            if token.is_ident("option") || token.is_ident("reserved") {
                self.skip_statement();
                continue;
            }
            if token.is_symbol(';') {
                self.advance();
                continue;
            }

            match self.parse_enum_value() {
                Ok(value) => values.push(value),
                Err(err) => {
                    self.record(err);
                    self.skip_statement();
                }
            }
        }

        self.file.enums.push(EnumDescriptor {
            full_name: match parent {
                Some(parent) => format!("{}.{}", parent, name),
                None => name.clone(),
            },
            name,
            values,
        });
        Ok(())
    }

    fn parse_enum_value(&mut self) -> ParseResult<(String, i32)> {
        let name = self.expect_ident("enum value name")?;
        self.expect_symbol('=')?;
        let number_token = self.peek().clone();
        let number = self.expect_integer("enum value")?;
        let number = i32::try_from(number)
            .map_err(|_| self.error_at(&number_token, format!("enum value {} out of range", number)))?;
        self.skip_field_options()?;
        self.expect_symbol(';')?;
        Ok((name, number))
    }

    fn parse_service(&mut self) -> ParseResult<()> {
        self.expect_keyword("service")?;
        let name = self.expect_ident("service name")?;
        let open = self.peek().clone();
        self.expect_symbol('{')?;

        let mut methods: Vec<MethodDescriptor> = Vec::new();
        loop {
            let token = self.peek().clone();
            if token.is_symbol('}') {
                self.advance();
                break;
            }
            if token.kind == TokenKind::Eof {
                self.record(self.error_at(&open, format!("unterminated service '{}'", name)));
                break;
            }
            if token.is_ident("option") {
                self.skip_statement();
                continue;
            }
            if token.is_symbol(';') {
                self.advance();
                continue;
            }

            let result = if token.is_ident("rpc") {
                self.parse_rpc()
            } else {
                Err(self.error_at(&token, format!("expected 'rpc', found {}", token.kind)))
            };

            match result {
                Ok(method) if methods.iter().any(|m| m.name == method.name) => {
                    self.record(self.error_at(
                        &token,
                        format!("duplicate method '{}' in service '{}'", method.name, name),
                    ));
                }
                Ok(method) => methods.push(method),
                Err(err) => {
                    self.record(err);
                    self.skip_statement();
                }
            }
        }

        self.file.services.push(ServiceDescriptor {
            name,
            file: self.path.clone(),
            package: None,
            methods,
            message_types: Default::default(),
        });
        Ok(())
    }

    fn parse_rpc(&mut self) -> ParseResult<MethodDescriptor> {
        self.expect_keyword("rpc")?;
        let name = self.expect_ident("method name")?;
        let (client_streaming, request_type) = self.parse_rpc_type()?;
        self.expect_keyword("returns")?;
        let (server_streaming, response_type) = self.parse_rpc_type()?;

        if self.peek().is_symbol('{') {
            let open = self.advance();
            let mut depth = 1usize;
            while depth > 0 {
                let token = self.advance();
                match token.kind {
                    TokenKind::Symbol('{') => depth += 1,
                    TokenKind::Symbol('}') => depth -= 1,
                    TokenKind::Eof => return Err(self.error_at(&open, "unterminated rpc option body")),
                    _ => {}
                }
            }
            if self.peek().is_symbol(';') {
                self.advance();
            }
        } else {
            self.expect_symbol(';')?;
        }

        Ok(MethodDescriptor {
            name,
            request_type,
            response_type,
            client_streaming,
            server_streaming,
        })
    }

    /// Parses `( [stream] Type )`, returning the streaming flag and the bare
    /// type name.
    fn parse_rpc_type(&mut self) -> ParseResult<(bool, String)> {
        self.expect_symbol('(')?;
        let streaming = self.peek().is_ident("stream") && matches!(self.peek_nth(1).kind, TokenKind::Ident(_));
        if streaming {
            self.advance();
        }
        let type_name = self.expect_ident("message type")?;
        self.expect_symbol(')')?;
        Ok((streaming, bare_type_name(&type_name).to_string()))
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        i64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}
