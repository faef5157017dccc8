use super::ast::*;
use super::lexer::{Span, Spanned, Token};
use super::ParseError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    /// Inside `<...>`: `>` closes the list, so shifts are not operators.
    Template,
    Free,
}

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn module(mut self) -> Result<Module, ParseError> {
        let mut module = Module::default();
        loop {
            let directive = matches!(
                self.peek(),
                Token::Ident(word)
                    if matches!(word.as_str(), "enable" | "requires" | "diagnostic" | "const_assert")
            );
            match self.peek() {
                Token::Eof => return Ok(module),
                Token::Punct(';') => self.advance(),
                _ if directive => self.skip_statement()?,
                _ => {
                    let decl = self.global_decl()?;
                    module.decls.push(decl);
                }
            }
        }
    }

    fn global_decl(&mut self) -> Result<Decl, ParseError> {
        let attributes = self.attributes()?;
        let span = self.span();
        let keyword = self.ident()?;
        match keyword.as_str() {
            "struct" => self.struct_decl(span).map(Decl::Struct),
            "alias" => self.alias_decl(span).map(Decl::Alias),
            "const" | "override" => self
                .const_decl(attributes, keyword == "override", span)
                .map(Decl::Const),
            "var" => self.var_decl(attributes, span).map(Decl::Var),
            "fn" => self.function(attributes, span).map(Decl::Function),
            other => Err(ParseError::new(
                format!("expected a module-scope declaration, found `{other}`"),
                span,
            )),
        }
    }

    fn struct_decl(&mut self, span: Span) -> Result<StructDecl, ParseError> {
        let name = self.ident()?;
        self.expect('{')?;
        let mut members = Vec::new();
        while !self.eat('}') {
            let attributes = self.attributes()?;
            let member_span = self.span();
            let member_name = self.ident()?;
            self.expect(':')?;
            let ty = self.type_expr()?;
            members.push(StructMember {
                attributes,
                name: member_name,
                ty,
                span: member_span,
            });
            if !self.eat(',') && !self.eat(';') {
                self.expect('}')?;
                break;
            }
        }
        self.eat(';');
        Ok(StructDecl {
            name,
            members,
            span,
        })
    }

    fn alias_decl(&mut self, span: Span) -> Result<AliasDecl, ParseError> {
        let name = self.ident()?;
        self.expect('=')?;
        let ty = self.type_expr()?;
        self.expect(';')?;
        Ok(AliasDecl { name, ty, span })
    }

    fn const_decl(
        &mut self,
        attributes: Vec<Attribute>,
        is_override: bool,
        span: Span,
    ) -> Result<ConstDecl, ParseError> {
        let name = self.ident()?;
        let ty = if self.eat(':') {
            Some(self.type_expr()?)
        } else {
            None
        };
        let init = if self.eat('=') {
            let tokens = self.collect_until_semicolon()?;
            Self::constant_expr(tokens)
        } else {
            self.expect(';')?;
            None
        };
        Ok(ConstDecl {
            attributes,
            name,
            ty,
            init,
            is_override,
            span,
        })
    }

    /// Parses an initializer in isolation. Anything beyond the constant
    /// expression subset yields `None` rather than an error, since only array
    /// counts and attribute arguments ever need the value.
    fn constant_expr(mut tokens: Vec<Spanned>) -> Option<Expr> {
        let eof_span = tokens.last().map(|t| t.span).unwrap_or_default();
        tokens.push(Spanned {
            token: Token::Eof,
            span: eof_span,
        });
        let mut sub = Parser::new(tokens);
        let expr = sub.expr(Context::Free).ok()?;
        (sub.peek() == &Token::Eof).then_some(expr)
    }

    fn var_decl(&mut self, attributes: Vec<Attribute>, span: Span) -> Result<GlobalVar, ParseError> {
        let mut qualifiers = Vec::new();
        if self.eat('<') {
            loop {
                qualifiers.push(self.ident()?);
                if !self.eat(',') {
                    break;
                }
                if self.peek() == &Token::Punct('>') {
                    break;
                }
            }
            self.expect('>')?;
        }
        let name = self.ident()?;
        let ty = if self.eat(':') {
            Some(self.type_expr()?)
        } else {
            None
        };
        if self.eat('=') {
            self.collect_until_semicolon()?;
        } else {
            self.expect(';')?;
        }
        Ok(GlobalVar {
            attributes,
            name,
            qualifiers,
            ty,
            span,
        })
    }

    fn function(&mut self, attributes: Vec<Attribute>, span: Span) -> Result<Function, ParseError> {
        let name = self.ident()?;
        self.expect('(')?;
        let mut params = Vec::new();
        while !self.eat(')') {
            let param_attributes = self.attributes()?;
            let param_span = self.span();
            let param_name = self.ident()?;
            self.expect(':')?;
            let ty = self.type_expr()?;
            params.push(Param {
                attributes: param_attributes,
                name: param_name,
                ty,
                span: param_span,
            });
            if !self.eat(',') {
                self.expect(')')?;
                break;
            }
        }
        let (return_attributes, return_type) = if self.peek() == &Token::Arrow {
            self.advance();
            let attrs = self.attributes()?;
            (attrs, Some(self.type_expr()?))
        } else {
            (Vec::new(), None)
        };
        self.skip_block()?;
        Ok(Function {
            attributes,
            name,
            params,
            return_attributes,
            return_type,
            span,
        })
    }

    fn attributes(&mut self) -> Result<Vec<Attribute>, ParseError> {
        let mut attrs = Vec::new();
        while self.peek() == &Token::Punct('@') {
            let span = self.span();
            self.advance();
            let name = self.ident()?;
            let mut args = Vec::new();
            if self.eat('(') {
                while !self.eat(')') {
                    args.push(self.expr(Context::Free)?);
                    if !self.eat(',') {
                        self.expect(')')?;
                        break;
                    }
                }
            }
            attrs.push(Attribute { name, args, span });
        }
        Ok(attrs)
    }

    pub(crate) fn type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let span = self.span();
        let name = self.ident()?;
        let mut args = Vec::new();
        if self.eat('<') {
            loop {
                args.push(self.template_arg()?);
                if !self.eat(',') {
                    break;
                }
                if self.peek() == &Token::Punct('>') {
                    break;
                }
            }
            self.expect('>')?;
        }
        Ok(TypeExpr { name, args, span })
    }

    fn template_arg(&mut self) -> Result<TemplateArg, ParseError> {
        if !matches!(self.peek(), Token::Ident(_)) {
            return self.expr(Context::Template).map(TemplateArg::Expr);
        }
        let ty = self.type_expr()?;
        if self.peek() == &Token::Punct('(') {
            let args = self.call_args()?;
            let call = Expr::Call { callee: ty, args };
            return self.binary_rest(call, 0, Context::Template).map(TemplateArg::Expr);
        }
        if ty.args.is_empty() && self.binary_op(0, Context::Template).is_some() {
            let lhs = Expr::Ident(ty.name);
            return self.binary_rest(lhs, 0, Context::Template).map(TemplateArg::Expr);
        }
        Ok(TemplateArg::Type(ty))
    }

    fn expr(&mut self, ctx: Context) -> Result<Expr, ParseError> {
        self.binary(0, ctx)
    }

    const LEVELS: usize = 4;

    fn binary(&mut self, level: usize, ctx: Context) -> Result<Expr, ParseError> {
        if level == Self::LEVELS {
            return self.unary(ctx);
        }
        let lhs = self.binary(level + 1, ctx)?;
        self.binary_rest_at(lhs, level, ctx)
    }

    /// Continues a binary expression whose leftmost operand is already parsed,
    /// starting at the loosest precedence `level`.
    fn binary_rest(&mut self, lhs: Expr, level: usize, ctx: Context) -> Result<Expr, ParseError> {
        let mut lhs = lhs;
        for l in (level..Self::LEVELS).rev() {
            lhs = self.binary_rest_at(lhs, l, ctx)?;
        }
        Ok(lhs)
    }

    fn binary_rest_at(&mut self, mut lhs: Expr, level: usize, ctx: Context) -> Result<Expr, ParseError> {
        while let Some((op, width)) = self.binary_op(level, ctx) {
            for _ in 0..width {
                self.advance();
            }
            let rhs = self.binary(level + 1, ctx)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    /// Returns the operator at the cursor if it binds at `level`, together
    /// with the number of tokens it spans.
    fn binary_op(&self, level: usize, ctx: Context) -> Option<(BinaryOp, usize)> {
        let c = match self.peek() {
            Token::Punct(c) => *c,
            _ => return None,
        };
        let doubled = self.adjacent_punct(c);
        match (level, c) {
            (0, '|') if !doubled => Some((BinaryOp::Or, 1)),
            (0, '&') if !doubled => Some((BinaryOp::And, 1)),
            (0, '^') => Some((BinaryOp::Xor, 1)),
            (1, '<') if doubled && ctx == Context::Free => Some((BinaryOp::Shl, 2)),
            (1, '>') if doubled && ctx == Context::Free => Some((BinaryOp::Shr, 2)),
            (2, '+') => Some((BinaryOp::Add, 1)),
            (2, '-') => Some((BinaryOp::Sub, 1)),
            (3, '*') => Some((BinaryOp::Mul, 1)),
            (3, '/') => Some((BinaryOp::Div, 1)),
            (3, '%') => Some((BinaryOp::Rem, 1)),
            _ => None,
        }
    }

    fn adjacent_punct(&self, c: char) -> bool {
        match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some(a), Some(b)) => b.token == Token::Punct(c) && a.span.end == b.span.start,
            _ => false,
        }
    }

    fn unary(&mut self, ctx: Context) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Punct(op @ ('-' | '!' | '~')) => {
                let op = *op;
                self.advance();
                let operand = self.unary(ctx)?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.peek().clone() {
            Token::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            Token::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            Token::Punct('(') => {
                self.advance();
                let inner = self.expr(Context::Free)?;
                self.expect(')')?;
                Ok(inner)
            }
            Token::Ident(name) if name == "true" || name == "false" => {
                self.advance();
                Ok(Expr::Bool(name == "true"))
            }
            Token::Ident(_) => {
                let callee = self.type_expr()?;
                if self.peek() == &Token::Punct('(') {
                    let args = self.call_args()?;
                    Ok(Expr::Call { callee, args })
                } else if callee.args.is_empty() {
                    Ok(Expr::Ident(callee.name))
                } else {
                    Err(ParseError::new(
                        format!("expected `(` after `{}<...>`", callee.name),
                        span,
                    ))
                }
            }
            other => Err(ParseError::new(
                format!("expected an expression, found {other}"),
                span,
            )),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect('(')?;
        let mut args = Vec::new();
        while !self.eat(')') {
            args.push(self.expr(Context::Free)?);
            if !self.eat(',') {
                self.expect(')')?;
                break;
            }
        }
        Ok(args)
    }

    fn skip_statement(&mut self) -> Result<(), ParseError> {
        self.collect_until_semicolon().map(|_| ())
    }

    /// Consumes tokens up to and including the next `;` at nesting depth zero
    /// and returns them without the terminator.
    fn collect_until_semicolon(&mut self) -> Result<Vec<Spanned>, ParseError> {
        let start_span = self.span();
        let mut depth = 0i32;
        let mut collected = Vec::new();
        loop {
            let spanned = self.tokens[self.pos].clone();
            match spanned.token {
                Token::Eof => {
                    return Err(ParseError::new("expected `;` before end of input", start_span))
                }
                Token::Punct('(' | '[' | '{') => depth += 1,
                Token::Punct(')' | ']' | '}') => depth -= 1,
                Token::Punct(';') if depth <= 0 => {
                    self.advance();
                    return Ok(collected);
                }
                _ => {}
            }
            collected.push(spanned);
            self.advance();
        }
    }

    fn skip_block(&mut self) -> Result<(), ParseError> {
        let open = self.span();
        self.expect('{')?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.peek() {
                Token::Punct('{') => depth += 1,
                Token::Punct('}') => depth -= 1,
                Token::Eof => {
                    return Err(ParseError::new("unclosed function body", open));
                }
                _ => {}
            }
            self.advance();
        }
        Ok(())
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == &Token::Punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("expected `{c}`, found {}", self.peek()),
                self.span(),
            ))
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(ParseError::new(
                format!("expected an identifier, found {other}"),
                self.span(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::wgsl::parse;
    use crate::wgsl::ast::*;

    #[test]
    fn parses_struct_with_attributes() {
        let module = parse(
            "struct Particle { @align(16) pos: vec2<f32>, @size(8) vel: vec2f, }",
        )
        .unwrap();
        let s = module.structs().next().unwrap();
        assert_eq!(s.name, "Particle");
        assert_eq!(s.members.len(), 2);
        assert!(s.members[0].has_attribute("align"));
        assert_eq!(s.members[0].ty.name, "vec2");
        assert_eq!(s.members[1].attribute("size").unwrap().args, vec![Expr::Int(8)]);
    }

    #[test]
    fn parses_nested_templates_and_const_counts() {
        let module = parse(
            "const N = 4u * 2;\n\
             @group(0) @binding(1) var<storage, read_write> grid: array<array<u32, N>, 2>;",
        )
        .unwrap();
        let c = module.consts().next().unwrap();
        assert!(matches!(c.init, Some(Expr::Binary { op: BinaryOp::Mul, .. })));
        let v = module.vars().next().unwrap();
        assert_eq!(v.qualifiers, vec!["storage", "read_write"]);
        let ty = v.ty.as_ref().unwrap();
        assert_eq!(ty.name, "array");
        match &ty.args[0] {
            TemplateArg::Type(inner) => {
                assert_eq!(inner.name, "array");
                assert!(matches!(&inner.args[1], TemplateArg::Type(t) if t.name == "N"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn template_count_expression() {
        let module = parse("var<private> a: array<f32, N + 1>;").unwrap();
        let ty = module.vars().next().unwrap().ty.clone().unwrap();
        assert!(matches!(
            &ty.args[1],
            TemplateArg::Expr(Expr::Binary { op: BinaryOp::Add, .. })
        ));
    }

    #[test]
    fn skips_function_bodies_and_reads_stage_attributes() {
        let module = parse(
            r#"
enable f16;
@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3u) {
    let x = array<u32, 2>(1u, 2u);
    if (x[0] >> 1u > 0u) { return; }
}
@vertex fn vs(@location(0) p: vec2f) -> @builtin(position) vec4f { return vec4f(p, 0.0, 1.0); }
"#,
        )
        .unwrap();
        let fns: Vec<_> = module.functions().collect();
        assert_eq!(fns.len(), 2);
        assert!(fns[0].has_attribute("compute"));
        assert_eq!(fns[0].attribute("workgroup_size").unwrap().args.len(), 3);
        assert_eq!(fns[0].params[0].ty.name, "vec3u");
        assert!(fns[1].return_attributes[0].name == "builtin");
        assert_eq!(fns[1].return_type.as_ref().unwrap().name, "vec4f");
    }

    #[test]
    fn unsupported_initializer_is_kept_as_unknown() {
        let module = parse("const flag = select(1, 2, 3 < 4);").unwrap();
        assert_eq!(module.consts().next().unwrap().init, None);
    }

    #[test]
    fn reports_position_of_syntax_errors() {
        let err = parse("struct A {\n  a f32,\n}").unwrap_err();
        assert_eq!(err.span.line, 2);
        assert!(err.message.contains("expected `:`"));
    }
}
