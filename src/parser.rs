use crate::{
    ast::{
        BinaryOp, Block, Expr, ExprKind, FunctionDecl, Literal, Program, ScheduleKind, Stmt,
        StmtKind,
    },
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

pub fn parse_source(source: &str) -> Result<Program, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    parse(tokens)
}

pub fn parse(tokens: Vec<Token>) -> Result<Program, Diagnostic> {
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut body = Vec::new();
        while !self.check(TokenKind::Eof) {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        if let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Keyword(Keyword::Class) => return self.parse_class(),
                TokenKind::Keyword(Keyword::Let) => return self.parse_let(),
                TokenKind::Keyword(Keyword::If) => return self.parse_if(),
                TokenKind::Keyword(Keyword::While) => return self.parse_while(),
                TokenKind::Keyword(Keyword::For) => return self.parse_for(),
                TokenKind::Keyword(Keyword::Parallel) => return self.parse_parallel(),
                TokenKind::Keyword(Keyword::Schedule) => return self.parse_schedule(),
                TokenKind::Identifier if token.lexeme == "function" => {
                    return self.parse_function_statement();
                }
                TokenKind::Identifier if token.lexeme == "return" => {
                    return self.parse_return();
                }
                TokenKind::Identifier => {
                    if let Some(next) = self.peek_next() {
                        if next.kind == TokenKind::Assign {
                            return self.parse_assignment();
                        }
                        if next.kind == TokenKind::LParen {
                            return self.parse_call_statement();
                        }
                    }
                }
                _ => {}
            }
        }
        self.parse_expression_statement()
    }

    fn parse_let(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Let)?;
        let name = self.consume_identifier("expected variable name after `let`")?;
        self.consume(TokenKind::Assign, "expected `=` in let statement")?;
        let value = self.parse_expression()?;
        let end = self
            .consume(TokenKind::Semicolon, "expected `;` after let statement")?
            .span
            .end;
        Ok(Stmt {
            span: SourceSpan::new(start.span.start, end),
            line: start.line,
            kind: StmtKind::Let {
                name: name.lexeme,
                value,
            },
        })
    }

    fn parse_assignment(&mut self) -> Result<Stmt, Diagnostic> {
        let name = self.consume_identifier("expected assignment target")?;
        self.consume(TokenKind::Assign, "expected `=` in assignment")?;
        let value = self.parse_expression()?;
        let end = self
            .consume(TokenKind::Semicolon, "expected `;` after assignment")?
            .span
            .end;
        Ok(Stmt {
            span: SourceSpan::new(name.span.start, end),
            line: name.line,
            kind: StmtKind::Assign {
                name: name.lexeme,
                value,
            },
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::If)?;
        self.consume(TokenKind::LParen, "expected `(` after `if`")?;
        let condition = self.parse_expression()?;
        self.consume(TokenKind::RParen, "expected `)` after if condition")?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        let end = self.previous().span.end;
        Ok(Stmt {
            span: SourceSpan::new(start.span.start, end),
            line: start.line,
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?;
        self.consume(TokenKind::LParen, "expected `(` after `while`")?;
        let condition = self.parse_expression()?;
        self.consume(TokenKind::RParen, "expected `)` after while condition")?;
        let body = self.parse_block()?;
        let end = self.previous().span.end;
        Ok(Stmt {
            span: SourceSpan::new(start.span.start, end),
            line: start.line,
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::For)?;
        self.consume(TokenKind::LParen, "expected `(` after `for`")?;
        let binding = self.consume_identifier("expected loop variable")?;
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        self.consume(TokenKind::RParen, "expected `)` after for clause")?;
        let body = self.parse_block()?;
        let end = self.previous().span.end;
        Ok(Stmt {
            span: SourceSpan::new(start.span.start, end),
            line: start.line,
            kind: StmtKind::For {
                binding: binding.lexeme,
                iterable,
                body,
            },
        })
    }

    fn parse_parallel(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Parallel)?;
        let body = self.parse_block()?;
        let end = self.previous().span.end;
        Ok(Stmt {
            span: SourceSpan::new(start.span.start, end),
            line: start.line,
            kind: StmtKind::Parallel { body },
        })
    }

    fn parse_schedule(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Schedule)?;
        let body = self.parse_block()?;
        let kind = if self.matches_keyword(Keyword::Every) {
            ScheduleKind::Recurring
        } else if self.matches_keyword(Keyword::After) {
            ScheduleKind::Delayed
        } else {
            return Err(self.error_here(
                "expected `every` or `after` timing clause after schedule block",
            ));
        };
        let interval = self.parse_expression()?;
        let _ = self.matches(TokenKind::Semicolon);
        let end = self.previous().span.end;
        Ok(Stmt {
            span: SourceSpan::new(start.span.start, end),
            line: start.line,
            kind: StmtKind::Schedule {
                body,
                interval,
                kind,
            },
        })
    }

    fn parse_function_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let start_line = self.peek().map(|t| t.line).unwrap_or(0);
        let start_span = self.peek().map(|t| t.span.start).unwrap_or(0);
        let decl = self.parse_function_decl(true)?;
        let end = self.previous().span.end;
        Ok(Stmt {
            span: SourceSpan::new(start_span, end),
            line: start_line,
            kind: StmtKind::Function(decl),
        })
    }

    // Also used for class methods, which skip the leading `function`.
    fn parse_function_decl(&mut self, consume_function: bool) -> Result<FunctionDecl, Diagnostic> {
        if consume_function {
            let keyword = self.consume_identifier("expected `function`")?;
            if keyword.lexeme != "function" {
                return Err(self.error_at(&keyword, "expected `function`"));
            }
        }
        let name = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let params = self.parse_parameter_list()?;
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name: name.lexeme,
            params,
            body,
            line: name.line,
        })
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<String>, Diagnostic> {
        let mut params = Vec::new();
        if self.check(TokenKind::Identifier) {
            params.push(self.advance().lexeme);
            while self.matches(TokenKind::Comma) {
                let param = self.consume_identifier("expected parameter name after `,`")?;
                params.push(param.lexeme);
            }
        }
        Ok(params)
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.consume_identifier("expected `return`")?;
        let value = self.parse_expression()?;
        let end = self
            .consume(TokenKind::Semicolon, "expected `;` after return value")?
            .span
            .end;
        Ok(Stmt {
            span: SourceSpan::new(keyword.span.start, end),
            line: keyword.line,
            kind: StmtKind::Return(value),
        })
    }

    fn parse_class(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Class)?;
        let name = self.consume_identifier("expected class name")?;
        self.consume(TokenKind::LBrace, "expected `{` after class name")?;
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Eof) {
                return Err(Diagnostic::new(
                    DiagnosticKind::Parse,
                    format!("unterminated class body for `{}`", name.lexeme),
                )
                .with_line(start.line));
            }
            methods.push(self.parse_function_decl(false)?);
        }
        let end = self
            .consume(TokenKind::RBrace, "expected `}` after class body")?
            .span
            .end;
        Ok(Stmt {
            span: SourceSpan::new(start.span.start, end),
            line: start.line,
            kind: StmtKind::Class {
                name: name.lexeme,
                methods,
            },
        })
    }

    fn parse_call_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let name = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let args = self.parse_argument_list()?;
        self.consume(TokenKind::RParen, "expected `)` after arguments")?;
        let end = self
            .consume(TokenKind::Semicolon, "expected `;` after call statement")?
            .span
            .end;
        let span = SourceSpan::new(name.span.start, end);
        let line = name.line;
        Ok(Stmt {
            span,
            line,
            kind: StmtKind::Expr(Expr {
                kind: ExprKind::Call {
                    name: name.lexeme,
                    args,
                },
                span,
                line,
            }),
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.parse_expression()?;
        let _ = self.matches(TokenKind::Semicolon);
        Ok(Stmt {
            span: expr.span,
            line: expr.line,
            kind: StmtKind::Expr(expr),
        })
    }

    fn parse_block(&mut self) -> Result<Block, Diagnostic> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let mut statements = Vec::new();
        loop {
            if self.check(TokenKind::RBrace) {
                break;
            }
            if self.check(TokenKind::Eof) {
                return Err(Diagnostic::new(
                    DiagnosticKind::Parse,
                    "unterminated block: missing closing `}`",
                )
                .with_span(lbrace.span)
                .with_line(lbrace.line));
            }
            statements.push(self.parse_statement()?);
        }
        self.consume(TokenKind::RBrace, "expected `}` to close block")?;
        Ok(Block { statements })
    }

    // All binary operators share one precedence level; the right operand
    // re-enters the full expression parser, so chains right-associate.
    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        let left = self.parse_postfix()?;
        if let Some(op) = self.peek_binary_op() {
            self.advance();
            let right = self.parse_expression()?;
            let span = SourceSpan::new(left.span.start, right.span.end);
            let line = left.line;
            return Ok(Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
                line,
            });
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek()?.kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Less => BinaryOp::Less,
            TokenKind::Greater => BinaryOp::Greater,
            TokenKind::LessEqual => BinaryOp::LessEqual,
            TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
            TokenKind::EqualEqual => BinaryOp::Equal,
            TokenKind::BangEqual => BinaryOp::NotEqual,
            _ => return None,
        };
        Some(op)
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        while self.matches(TokenKind::Dot) {
            let member = self.consume_identifier("expected member name after `.`")?;
            if self.matches(TokenKind::LParen) {
                let args = self.parse_argument_list()?;
                let rparen = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                let span = SourceSpan::new(expr.span.start, rparen.span.end);
                let line = expr.line;
                expr = Expr {
                    kind: ExprKind::MethodCall {
                        target: Box::new(expr),
                        method: member.lexeme,
                        args,
                    },
                    span,
                    line,
                };
            } else {
                let span = SourceSpan::new(expr.span.start, member.span.end);
                let line = expr.line;
                expr = Expr {
                    kind: ExprKind::MemberAccess {
                        target: Box::new(expr),
                        member: member.lexeme,
                    },
                    span,
                    line,
                };
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error_eof("unexpected end of expression")),
        };
        match token.kind {
            TokenKind::Number => {
                self.advance();
                let value: i64 = token.lexeme.parse().map_err(|_| {
                    Diagnostic::new(
                        DiagnosticKind::Parse,
                        format!("number literal `{}` is out of range", token.lexeme),
                    )
                    .with_span(token.span)
                    .with_line(token.line)
                })?;
                Ok(Expr {
                    kind: ExprKind::Literal(Literal::Number(value)),
                    span: token.span,
                    line: token.line,
                })
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Literal(Literal::Str(token.lexeme)),
                    span: token.span,
                    line: token.line,
                })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Null,
                    span: token.span,
                    line: token.line,
                })
            }
            TokenKind::Keyword(Keyword::New) => {
                self.advance();
                let class_name = self.consume_identifier("expected class name after `new`")?;
                self.consume(TokenKind::LParen, "expected `(` after class name")?;
                let rparen = self.consume(
                    TokenKind::RParen,
                    "constructor argument list must be empty",
                )?;
                Ok(Expr {
                    kind: ExprKind::New {
                        class_name: class_name.lexeme,
                    },
                    span: SourceSpan::new(token.span.start, rparen.span.end),
                    line: token.line,
                })
            }
            TokenKind::Identifier => {
                self.advance();
                if self.matches(TokenKind::LParen) {
                    let args = self.parse_argument_list()?;
                    let rparen = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                    Ok(Expr {
                        kind: ExprKind::Call {
                            name: token.lexeme,
                            args,
                        },
                        span: SourceSpan::new(token.span.start, rparen.span.end),
                        line: token.line,
                    })
                } else {
                    Ok(Expr {
                        kind: ExprKind::Identifier(token.lexeme),
                        span: token.span,
                        line: token.line,
                    })
                }
            }
            TokenKind::LParen => {
                if self.lambda_ahead() {
                    self.parse_lambda()
                } else {
                    self.advance();
                    let inner = self.parse_expression()?;
                    self.consume(TokenKind::RParen, "expected `)` after expression")?;
                    Ok(inner)
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let rbracket =
                    self.consume(TokenKind::RBracket, "expected `]` after list literal")?;
                Ok(Expr {
                    kind: ExprKind::List(elements),
                    span: SourceSpan::new(token.span.start, rbracket.span.end),
                    line: token.line,
                })
            }
            _ => Err(self.error_at(&token, "unexpected token in expression")),
        }
    }

    // Distinguishes `(params) => expr` from a parenthesised expression.
    fn lambda_ahead(&self) -> bool {
        let mut idx = self.current + 1;
        loop {
            match self.tokens.get(idx).map(|t| t.kind) {
                Some(TokenKind::RParen) => {
                    return matches!(
                        self.tokens.get(idx + 1).map(|t| t.kind),
                        Some(TokenKind::FatArrow)
                    );
                }
                Some(TokenKind::Identifier) => match self.tokens.get(idx + 1).map(|t| t.kind) {
                    Some(TokenKind::Comma) => idx += 2,
                    Some(TokenKind::RParen) => idx += 1,
                    _ => return false,
                },
                _ => return false,
            }
        }
    }

    fn parse_lambda(&mut self) -> Result<Expr, Diagnostic> {
        let lparen = self.consume(TokenKind::LParen, "expected `(` to start lambda")?;
        let params = self.parse_parameter_list()?;
        self.consume(TokenKind::RParen, "expected `)` after lambda parameters")?;
        self.consume(TokenKind::FatArrow, "expected `=>` after lambda parameters")?;
        let body = self.parse_expression()?;
        let span = SourceSpan::new(lparen.span.start, body.span.end);
        Ok(Expr {
            kind: ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            span,
            line: lparen.line,
        })
    }

    fn parse_argument_list(&mut self) -> Result<Vec<Expr>, Diagnostic> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(args)
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check(TokenKind::Keyword(keyword)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .cloned()
                .map(|tok| self.error_at(&tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        self.consume(
            TokenKind::Keyword(keyword),
            &format!("expected keyword `{}`", keyword.lexeme()),
        )
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().map(|token| token.kind == kind).unwrap_or(false)
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| t.kind), Some(TokenKind::Eof) | None)
    }

    fn error_at(&self, token: &Token, message: &str) -> Diagnostic {
        let detail = if token.lexeme.is_empty() {
            format!("{message}, found {:?}", token.kind)
        } else {
            format!("{message}, found {:?} `{}`", token.kind, token.lexeme)
        };
        Diagnostic::new(DiagnosticKind::Parse, detail)
            .with_span(token.span)
            .with_line(token.line)
    }

    fn error_here(&self, message: &str) -> Diagnostic {
        self.peek()
            .cloned()
            .map(|tok| self.error_at(&tok, message))
            .unwrap_or_else(|| self.error_eof(message))
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parse, format!("{message}, found end of input"))
    }
}
