//! Parser for loop heads and binding expressions
//!
//! Recursive descent over the token stream produced by [`Lexer`].

use crate::ast::*;
use crate::error::LoopError;
use crate::lexer::{Lexer, Span, Token, TokenKind};
use crate::value::JsString;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
    next_id: u32,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            previous: Token::eof(0, 1, 1),
            next_id: 0,
        }
    }

    /// Number of expression ids handed out so far
    pub fn node_count(&self) -> u32 {
        self.next_id
    }

    /// Parse a complete loop head: `<pattern> of <expression>`
    pub fn parse_head(&mut self) -> Result<HeadClause, LoopError> {
        let start = self.current.span;

        let kind = match self.current.kind {
            TokenKind::Let => Some(VariableKind::Let),
            TokenKind::Const => Some(VariableKind::Const),
            TokenKind::Var => Some(VariableKind::Var),
            _ => None,
        };
        if kind.is_some() {
            self.advance();
        }

        let pattern = self.parse_pattern()?;
        self.require_token(&TokenKind::Of)?;
        let source = self.parse_expression()?;
        self.expect_end()?;

        Ok(HeadClause {
            kind,
            pattern,
            source,
            span: self.span_from(start),
        })
    }

    /// Parse a standalone expression (e.g. the text of a bound element)
    pub fn parse_standalone_expression(&mut self) -> Result<Expression, LoopError> {
        let expression = self.parse_expression()?;
        self.expect_end()?;
        Ok(expression)
    }

    // ============ PATTERNS ============

    fn parse_pattern(&mut self) -> Result<Pattern, LoopError> {
        match &self.current.kind {
            TokenKind::LBracket => self.parse_array_pattern(),
            TokenKind::LBrace => self.parse_object_pattern(),
            TokenKind::Identifier(_) => Ok(Pattern::Identifier(self.parse_identifier()?)),
            _ => Err(self.unexpected("binding pattern")),
        }
    }

    fn parse_array_pattern(&mut self) -> Result<Pattern, LoopError> {
        self.require_token(&TokenKind::LBracket)?;
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RBracket) {
            if self.check(&TokenKind::Comma) {
                self.advance();
                elements.push(None);
                continue;
            }
            elements.push(Some(self.parse_pattern()?));
            if !self.check(&TokenKind::RBracket) {
                self.require_token(&TokenKind::Comma)?;
            }
        }
        self.require_token(&TokenKind::RBracket)?;
        Ok(Pattern::Array(elements))
    }

    fn parse_object_pattern(&mut self) -> Result<Pattern, LoopError> {
        self.require_token(&TokenKind::LBrace)?;
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = self.parse_identifier()?;
            let value = if self.check(&TokenKind::Colon) {
                self.advance();
                self.parse_pattern()?
            } else {
                Pattern::Identifier(key.clone())
            };
            properties.push(ObjectPatternProperty { key, value });
            if !self.check(&TokenKind::RBrace) {
                self.require_token(&TokenKind::Comma)?;
            }
        }
        self.require_token(&TokenKind::RBrace)?;
        Ok(Pattern::Object(properties))
    }

    fn parse_identifier(&mut self) -> Result<Identifier, LoopError> {
        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                let span = self.current.span;
                self.advance();
                Ok(Identifier { name, span })
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    // ============ EXPRESSIONS ============

    fn parse_expression(&mut self) -> Result<Expression, LoopError> {
        self.parse_unary()
    }

    fn parse_unary(&mut self) -> Result<Expression, LoopError> {
        if self.check(&TokenKind::Bang) {
            let start = self.current.span;
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(self.node(ExpressionKind::Not(Box::new(operand)), start));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, LoopError> {
        let start = self.current.span;
        let mut expression = self.parse_primary()?;
        loop {
            match &self.current.kind {
                TokenKind::Dot => {
                    self.advance();
                    let property = self.parse_identifier()?;
                    expression = self.node(
                        ExpressionKind::Member {
                            object: Box::new(expression),
                            property: MemberProperty::Identifier(property.name),
                        },
                        start,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expression()?;
                    self.require_token(&TokenKind::RBracket)?;
                    expression = self.node(
                        ExpressionKind::Member {
                            object: Box::new(expression),
                            property: MemberProperty::Computed(Box::new(key)),
                        },
                        start,
                    );
                }
                TokenKind::LParen => {
                    let arguments = self.parse_arguments()?;
                    expression = self.node(
                        ExpressionKind::Call {
                            callee: Box::new(expression),
                            arguments,
                        },
                        start,
                    );
                }
                _ => return Ok(expression),
            }
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expression>, LoopError> {
        self.require_token(&TokenKind::LParen)?;
        let arguments = self.parse_list(&TokenKind::RParen)?;
        self.require_token(&TokenKind::RParen)?;
        Ok(arguments)
    }

    fn parse_list(&mut self, close: &TokenKind) -> Result<Vec<Expression>, LoopError> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_expression()?);
            if !self.check(close) {
                self.require_token(&TokenKind::Comma)?;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expression, LoopError> {
        let start = self.current.span;
        let kind = match self.current.kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                ExpressionKind::Literal(LiteralValue::Number(n))
            }
            TokenKind::String(s) => {
                if self.lexer.hit_unterminated_string() {
                    return Err(LoopError::syntax_error(
                        "Unterminated string literal",
                        start.line,
                        start.column,
                    ));
                }
                self.advance();
                ExpressionKind::Literal(LiteralValue::String(s))
            }
            TokenKind::True => {
                self.advance();
                ExpressionKind::Literal(LiteralValue::Boolean(true))
            }
            TokenKind::False => {
                self.advance();
                ExpressionKind::Literal(LiteralValue::Boolean(false))
            }
            TokenKind::Null => {
                self.advance();
                ExpressionKind::Literal(LiteralValue::Null)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                ExpressionKind::Identifier(name)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.require_token(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                let elements = self.parse_list(&TokenKind::RBracket)?;
                self.require_token(&TokenKind::RBracket)?;
                ExpressionKind::Array(elements)
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(self.node(kind, start))
    }

    // ============ HELPERS ============

    fn node(&mut self, kind: ExpressionKind, start: Span) -> Expression {
        let id = ExprId(self.next_id);
        self.next_id += 1;
        Expression {
            id,
            kind,
            span: self.span_from(start),
        }
    }

    fn advance(&mut self) {
        let next = self.lexer.next_token();
        self.previous = std::mem::replace(&mut self.current, next);
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn require_token(&mut self, kind: &TokenKind) -> Result<(), LoopError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("{:?}", kind)))
        }
    }

    fn expect_end(&self) -> Result<(), LoopError> {
        if self.check(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn span_from(&self, start: Span) -> Span {
        Span::new(
            start.start,
            self.previous.span.end.max(start.end),
            start.line,
            start.column,
        )
    }

    fn unexpected(&self, expected: &str) -> LoopError {
        let found = match &self.current.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Identifier(name) => format!("'{}'", name),
            TokenKind::Invalid(c) => format!("invalid character '{}'", c),
            other => format!("{:?}", other),
        };
        LoopError::syntax_error(
            format!("Expected {}, found {}", expected, found),
            self.current.span.line,
            self.current.span.column,
        )
    }
}

/// Compile a loop-head attribute into a script
pub fn compile_loop(head_source: &str) -> Result<LoopScript, LoopError> {
    let mut parser = Parser::new(head_source);
    let head = parser.parse_head()?;
    Ok(LoopScript {
        head_source: head_source.to_string(),
        loop_source: format!("for ({}) callcc(evaluateBody);", head_source),
        head,
        node_count: parser.node_count(),
    })
}

/// Compile a standalone expression
pub fn compile_expression(source: &str) -> Result<Expression, LoopError> {
    Parser::new(source).parse_standalone_expression()
}

/// Helper used by tests and diagnostics to name an identifier expression
pub fn identifier_name(expression: &Expression) -> Option<&JsString> {
    match &expression.kind {
        ExpressionKind::Identifier(name) => Some(name),
        _ => None,
    }
}
