use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    While,
    For,
    Let,
    Class,
    New,
    In,
    Parallel,
    Schedule,
    Every,
    After,
}

impl Keyword {
    pub fn lexeme(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::For => "for",
            Keyword::Let => "let",
            Keyword::Class => "class",
            Keyword::New => "new",
            Keyword::In => "in",
            Keyword::Parallel => "parallel",
            Keyword::Schedule => "schedule",
            Keyword::Every => "every",
            Keyword::After => "after",
        }
    }
}

// `function` and `return` are absent here; the parser recognizes those
// identifiers by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    Str,
    Null,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semicolon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    Bang,
    BangEqual,
    FatArrow,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
    pub line: u32,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    line: u32,
    peeked: Option<(usize, char)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            line: 1,
            peeked: None,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some(pair) = self.peeked.take() {
            Some(pair)
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
            }
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((idx, ch)) = self.peek() {
            if ch == expected {
                self.peeked = None;
                self.current = idx + ch.len_utf8();
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            let mut progressed = false;
            while let Some((_, ch)) = self.peek() {
                if ch.is_whitespace() {
                    self.bump();
                    progressed = true;
                } else {
                    break;
                }
            }
            if let Some((_, '#')) = self.peek() {
                while let Some((_, ch)) = self.peek() {
                    if ch == '\n' {
                        break;
                    }
                    self.bump();
                }
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    fn identifier_or_keyword(&mut self, start: usize, line: u32) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.current;
        let lexeme = self.source[start..end].to_string();
        let kind = match lexeme.as_str() {
            "null" => TokenKind::Null,
            other => keyword_for(other).unwrap_or(TokenKind::Identifier),
        };
        Token {
            kind,
            lexeme,
            span: SourceSpan { start, end },
            line,
        }
    }

    fn number_literal(&mut self, start: usize, line: u32) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.current;
        Token {
            kind: TokenKind::Number,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
            line,
        }
    }

    fn string_literal(&mut self, start: usize, line: u32) -> Result<Token, Diagnostic> {
        while let Some((idx, ch)) = self.bump() {
            if ch == '"' {
                let end = idx + 1;
                return Ok(Token {
                    kind: TokenKind::Str,
                    lexeme: self.source[start..end].to_string(),
                    span: SourceSpan { start, end },
                    line,
                });
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lex, "unterminated string literal")
                .with_span(SourceSpan {
                    start,
                    end: self.current,
                })
                .with_line(line),
        )
    }

    fn simple_token(&mut self, start: usize, line: u32, kind: TokenKind) -> Token {
        let end = self.current;
        Token {
            kind,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
            line,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let line = self.line;
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: SourceSpan {
                            start: self.current,
                            end: self.current,
                        },
                        line,
                    });
                    break;
                }
            };

            let token = match ch {
                'a'..='z' | 'A'..='Z' => self.identifier_or_keyword(start, line),
                '0'..='9' => self.number_literal(start, line),
                '"' => self.string_literal(start, line)?,
                '(' => self.simple_token(start, line, TokenKind::LParen),
                ')' => self.simple_token(start, line, TokenKind::RParen),
                '{' => self.simple_token(start, line, TokenKind::LBrace),
                '}' => self.simple_token(start, line, TokenKind::RBrace),
                '[' => self.simple_token(start, line, TokenKind::LBracket),
                ']' => self.simple_token(start, line, TokenKind::RBracket),
                ',' => self.simple_token(start, line, TokenKind::Comma),
                '.' => self.simple_token(start, line, TokenKind::Dot),
                ';' => self.simple_token(start, line, TokenKind::Semicolon),
                '+' => self.simple_token(start, line, TokenKind::Plus),
                '-' => self.simple_token(start, line, TokenKind::Minus),
                '*' => self.simple_token(start, line, TokenKind::Star),
                '/' => self.simple_token(start, line, TokenKind::Slash),
                '=' => {
                    if self.match_next('=') {
                        self.simple_token(start, line, TokenKind::EqualEqual)
                    } else if self.match_next('>') {
                        self.simple_token(start, line, TokenKind::FatArrow)
                    } else {
                        self.simple_token(start, line, TokenKind::Assign)
                    }
                }
                '!' => {
                    if self.match_next('=') {
                        self.simple_token(start, line, TokenKind::BangEqual)
                    } else {
                        self.simple_token(start, line, TokenKind::Bang)
                    }
                }
                '<' => {
                    if self.match_next('=') {
                        self.simple_token(start, line, TokenKind::LessEqual)
                    } else {
                        self.simple_token(start, line, TokenKind::Less)
                    }
                }
                '>' => {
                    if self.match_next('=') {
                        self.simple_token(start, line, TokenKind::GreaterEqual)
                    } else {
                        self.simple_token(start, line, TokenKind::Greater)
                    }
                }
                other => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Lex,
                        format!("invalid character `{other}`"),
                    )
                    .with_span(SourceSpan {
                        start,
                        end: self.current,
                    })
                    .with_line(line));
                }
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, Diagnostic> {
    Lexer::new(source).tokenize()
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "if" => Kw::If,
        "else" => Kw::Else,
        "while" => Kw::While,
        "for" => Kw::For,
        "let" => Kw::Let,
        "class" => Kw::Class,
        "new" => Kw::New,
        "in" => Kw::In,
        "parallel" => Kw::Parallel,
        "schedule" => Kw::Schedule,
        "every" => Kw::Every,
        "after" => Kw::After,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}
