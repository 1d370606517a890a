use crate::diagnostics::{Diagnostic, Span};
use crate::lexer::{lex, Token, TokenKind};
use crate::surface::ast::*;

/// Parse a whole source file. Lexer and parser diagnostics share the
/// `QSOL1001` family; the first hard parse error aborts the parse.
pub fn parse_program(text: &str, file: &str) -> Result<Program, Vec<Diagnostic>> {
    let (tokens, lex_diags) = lex(text, file);
    if lex_diags.iter().any(Diagnostic::is_error) {
        return Err(lex_diags);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        file: file.to_string(),
        text_len: text.len(),
    };
    match parser.program() {
        Ok(program) => Ok(program),
        Err(diag) => Err(vec![diag]),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: String,
    text_len: usize,
}

type ParseResult<T> = Result<T, Diagnostic>;

impl Parser {
    fn program(&mut self) -> ParseResult<Program> {
        let start = self.here();
        let mut items = Vec::new();
        while !self.at_end() {
            items.push(self.top_item()?);
        }
        let span = match (items.first(), items.last()) {
            (Some(first), Some(last)) => top_span(first).to(top_span(last)),
            _ => start,
        };
        Ok(Program { items, span })
    }

    fn top_item(&mut self) -> ParseResult<TopItem> {
        match self.peek_ident() {
            Some("use") => self.use_stmt().map(TopItem::Use),
            Some("unknown") => self.unknown_def().map(TopItem::Unknown),
            Some("predicate") => self.macro_def(true).map(TopItem::Predicate),
            Some("function") => self.macro_def(false).map(TopItem::Function),
            Some("problem") => self.problem().map(TopItem::Problem),
            _ => Err(self.unexpected("`use`, `unknown`, `predicate`, `function`, or `problem`")),
        }
    }

    fn use_stmt(&mut self) -> ParseResult<UseStmt> {
        let start = self.bump_keyword("use")?;
        let mut parts = vec![self.name()?.name];
        while self.eat_symbol(".") {
            parts.push(self.name()?.name);
        }
        let end = self.expect_symbol(";")?;
        Ok(UseStmt {
            module: parts.join("."),
            span: start.to(&end),
        })
    }

    fn problem(&mut self) -> ParseResult<ProblemDef> {
        let start = self.bump_keyword("problem")?;
        let name = self.name()?;
        self.expect_symbol("{")?;
        let mut stmts = Vec::new();
        while !self.check_symbol("}") {
            stmts.push(self.problem_stmt()?);
        }
        let end = self.expect_symbol("}")?;
        Ok(ProblemDef {
            name,
            stmts,
            span: start.to(&end),
        })
    }

    fn problem_stmt(&mut self) -> ParseResult<ProblemStmt> {
        match self.peek_ident() {
            Some("set") => {
                let start = self.bump_keyword("set")?;
                let name = self.name()?;
                let end = self.expect_symbol(";")?;
                Ok(ProblemStmt::Set(SetDecl {
                    name,
                    span: start.to(&end),
                }))
            }
            Some("param") => self.param_decl().map(ProblemStmt::Param),
            Some("find") => {
                let start = self.bump_keyword("find")?;
                let name = self.name()?;
                self.expect_symbol(":")?;
                let unknown_type = self.unknown_type()?;
                let end = self.expect_symbol(";")?;
                Ok(ProblemStmt::Find(FindDecl {
                    name,
                    unknown_type,
                    span: start.to(&end),
                }))
            }
            Some("must") | Some("should") | Some("nice") => {
                self.constraint().map(ProblemStmt::Constraint)
            }
            Some("minimize") | Some("maximize") => {
                let kind = if self.peek_ident() == Some("minimize") {
                    ObjectiveKind::Minimize
                } else {
                    ObjectiveKind::Maximize
                };
                let start = self.bump()?.span;
                let expr = self.expr()?;
                let end = self.expect_symbol(";")?;
                Ok(ProblemStmt::Objective(Objective {
                    kind,
                    expr,
                    span: start.to(&end),
                }))
            }
            _ => Err(self.unexpected(
                "`set`, `param`, `find`, `must`, `should`, `nice`, `minimize`, or `maximize`",
            )),
        }
    }

    fn param_decl(&mut self) -> ParseResult<ParamDecl> {
        let start = self.bump_keyword("param")?;
        let name = self.name()?;
        let mut indices = Vec::new();
        if self.eat_symbol("[") {
            indices.push(self.name()?);
            while self.eat_symbol(",") {
                indices.push(self.name()?);
            }
            self.expect_symbol("]")?;
        }
        self.expect_symbol(":")?;
        let value_type = self.param_value_type()?;
        let default = if self.eat_symbol("=") {
            Some(self.literal()?)
        } else {
            None
        };
        let end = self.expect_symbol(";")?;
        Ok(ParamDecl {
            name,
            indices,
            value_type,
            default,
            span: start.to(&end),
        })
    }

    fn param_value_type(&mut self) -> ParseResult<ParamValueType> {
        let token = self.bump()?;
        let span = token.span.clone();
        match (token.kind, token.text.as_str()) {
            (TokenKind::Ident, "Bool") => Ok(ParamValueType::Bool { span }),
            (TokenKind::Ident, "Real") => Ok(ParamValueType::Real { span }),
            (TokenKind::Ident, "Int") => {
                self.expect_symbol("[")?;
                let lo = self.signed_int()?;
                self.expect_symbol("..")?;
                let hi = self.signed_int()?;
                let end = self.expect_symbol("]")?;
                Ok(ParamValueType::Int {
                    lo,
                    hi,
                    span: span.to(&end),
                })
            }
            (TokenKind::Ident, "Elem") => {
                self.expect_symbol("(")?;
                let set = self.name()?;
                let end = self.expect_symbol(")")?;
                Ok(ParamValueType::Elem {
                    set,
                    span: span.to(&end),
                })
            }
            _ => Err(self.unexpected_at("`Bool`, `Real`, `Int[lo..hi]`, or `Elem(Set)`", span)),
        }
    }

    fn signed_int(&mut self) -> ParseResult<i64> {
        let negative = self.eat_symbol("-");
        let token = self.bump()?;
        if token.kind != TokenKind::Number {
            return Err(self.unexpected_at("an integer", token.span));
        }
        let value: i64 = token
            .text
            .parse::<f64>()
            .map(|v| v as i64)
            .map_err(|_| self.unexpected_at("an integer", token.span.clone()))?;
        Ok(if negative { -value } else { value })
    }

    fn literal(&mut self) -> ParseResult<Literal> {
        if self.check_symbol("-") {
            let start = self.bump()?.span;
            let token = self.bump()?;
            if token.kind != TokenKind::Number {
                return Err(self.unexpected_at("a number after `-`", token.span));
            }
            let value: f64 = token.text.parse().unwrap_or(0.0);
            return Ok(Literal {
                value: LitValue::Number(-value),
                span: start.to(&token.span),
            });
        }
        let token = self.bump()?;
        let span = token.span.clone();
        match token.kind {
            TokenKind::Number => Ok(Literal {
                value: LitValue::Number(token.text.parse().unwrap_or(0.0)),
                span,
            }),
            TokenKind::Str => Ok(Literal {
                value: LitValue::Str(token.text),
                span,
            }),
            TokenKind::Ident if token.text == "true" => Ok(Literal {
                value: LitValue::Bool(true),
                span,
            }),
            TokenKind::Ident if token.text == "false" => Ok(Literal {
                value: LitValue::Bool(false),
                span,
            }),
            _ => Err(self.unexpected_at("a literal", span)),
        }
    }

    fn unknown_type(&mut self) -> ParseResult<UnknownTypeRef> {
        let name = self.name()?;
        let mut args = Vec::new();
        let mut end = name.span.clone();
        if self.eat_symbol("(") {
            args.push(self.name()?.name);
            // `Mapping(A -> B)` and user unknowns `U(A, B)` both reach here.
            while self.eat_symbol("->") || self.eat_symbol(",") {
                args.push(self.name()?.name);
            }
            end = self.expect_symbol(")")?;
        }
        Ok(UnknownTypeRef {
            kind: name.name,
            args,
            span: name.span.to(&end),
        })
    }

    fn constraint(&mut self) -> ParseResult<Constraint> {
        let kind = match self.peek_ident() {
            Some("must") => ConstraintKind::Must,
            Some("should") => ConstraintKind::Should,
            _ => ConstraintKind::Nice,
        };
        let start = self.bump()?.span;
        let expr = self.expr()?;
        let guard = if self.eat_keyword("if") {
            Some(self.expr()?)
        } else {
            None
        };
        let end = self.expect_symbol(";")?;
        Ok(Constraint {
            kind,
            expr,
            guard,
            span: start.to(&end),
        })
    }

    fn unknown_def(&mut self) -> ParseResult<UnknownDef> {
        let start = self.bump_keyword("unknown")?;
        let name = self.name()?;
        let mut formals = Vec::new();
        if self.eat_symbol("(") {
            formals.push(self.name()?);
            while self.eat_symbol(",") {
                formals.push(self.name()?);
            }
            self.expect_symbol(")")?;
        }
        self.expect_symbol("{")?;
        let mut rep = Vec::new();
        let mut laws = Vec::new();
        let mut view = Vec::new();
        while !self.check_symbol("}") {
            match self.peek_ident() {
                Some("rep") => {
                    self.bump()?;
                    self.expect_symbol("{")?;
                    while !self.check_symbol("}") {
                        let member = self.name()?;
                        self.expect_symbol(":")?;
                        let unknown_type = self.unknown_type()?;
                        let end = self.expect_symbol(";")?;
                        rep.push(RepDecl {
                            span: member.span.to(&end),
                            name: member,
                            unknown_type,
                        });
                    }
                    self.expect_symbol("}")?;
                }
                Some("laws") => {
                    self.bump()?;
                    self.expect_symbol("{")?;
                    while !self.check_symbol("}") {
                        laws.push(self.constraint()?);
                    }
                    self.expect_symbol("}")?;
                }
                Some("view") => {
                    self.bump()?;
                    self.expect_symbol("{")?;
                    while !self.check_symbol("}") {
                        match self.peek_ident() {
                            Some("predicate") => view.push(self.macro_def(true)?),
                            Some("function") => view.push(self.macro_def(false)?),
                            _ => return Err(self.unexpected("`predicate` or `function`")),
                        }
                    }
                    self.expect_symbol("}")?;
                }
                _ => return Err(self.unexpected("`rep`, `laws`, or `view`")),
            }
        }
        let end = self.expect_symbol("}")?;
        Ok(UnknownDef {
            name,
            formals,
            rep,
            laws,
            view,
            span: start.to(&end),
        })
    }

    fn macro_def(&mut self, is_predicate: bool) -> ParseResult<MacroDef> {
        let keyword = if is_predicate { "predicate" } else { "function" };
        let start = self.bump_keyword(keyword)?;
        let name = self.name()?;
        self.expect_symbol("(")?;
        let mut formals = Vec::new();
        if !self.check_symbol(")") {
            formals.push(self.macro_formal()?);
            while self.eat_symbol(",") {
                formals.push(self.macro_formal()?);
            }
        }
        self.expect_symbol(")")?;
        self.expect_symbol("=")?;
        let body = self.expr()?;
        let end = self.expect_symbol(";")?;
        Ok(MacroDef {
            name,
            formals,
            body,
            is_predicate,
            span: start.to(&end),
        })
    }

    fn macro_formal(&mut self) -> ParseResult<MacroFormal> {
        let name = self.name()?;
        // `x in A` is sugar for `x : Elem(A)`.
        if self.eat_keyword("in") {
            let set = self.name()?;
            return Ok(MacroFormal {
                span: name.span.to(&set.span),
                name,
                kind: FormalKind::Elem(set.name),
            });
        }
        self.expect_symbol(":")?;
        let token = self.bump()?;
        let span = token.span.clone();
        let kind = match (token.kind, token.text.as_str()) {
            (TokenKind::Ident, "Bool") => FormalKind::Bool,
            (TokenKind::Ident, "Real") => FormalKind::Real,
            (TokenKind::Ident, "Elem") => {
                self.expect_symbol("(")?;
                let set = self.name()?;
                self.expect_symbol(")")?;
                FormalKind::Elem(set.name)
            }
            (TokenKind::Ident, "Comp") => {
                self.expect_symbol("(")?;
                let inner = self.name()?;
                self.expect_symbol(")")?;
                match inner.name.as_str() {
                    "Bool" => FormalKind::CompBool,
                    "Real" => FormalKind::CompReal,
                    _ => {
                        return Err(self.unexpected_at("`Comp(Bool)` or `Comp(Real)`", inner.span))
                    }
                }
            }
            _ => {
                return Err(
                    self.unexpected_at("`Bool`, `Real`, `Elem(Set)`, or `Comp(...)`", span)
                )
            }
        };
        let end = self.prev_span();
        Ok(MacroFormal {
            span: name.span.to(&end),
            name,
            kind,
        })
    }

    // --- expressions -----------------------------------------------------

    fn expr(&mut self) -> ParseResult<Expr> {
        self.implies_expr()
    }

    fn implies_expr(&mut self) -> ParseResult<Expr> {
        let left = self.or_expr()?;
        if self.eat_symbol("=>") {
            let right = self.implies_expr()?;
            let span = left.span().to(right.span());
            return Ok(Expr::Binary {
                op: BinaryOp::Implies,
                left: Box::new(left),
                right: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let right = self.and_expr()?;
            let span = left.span().to(right.span());
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.compare_expr()?;
        while self.eat_keyword("and") {
            let right = self.compare_expr()?;
            let span = left.span().to(right.span());
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn compare_expr(&mut self) -> ParseResult<Expr> {
        let left = self.additive_expr()?;
        let op = if self.eat_symbol("=") {
            Some(CompareOp::Eq)
        } else if self.eat_symbol("!=") {
            Some(CompareOp::Ne)
        } else if self.eat_symbol("<=") {
            Some(CompareOp::Le)
        } else if self.eat_symbol(">=") {
            Some(CompareOp::Ge)
        } else if self.eat_symbol("<") {
            Some(CompareOp::Lt)
        } else if self.eat_symbol(">") {
            Some(CompareOp::Gt)
        } else {
            None
        };
        let Some(op) = op else { return Ok(left) };
        let right = self.additive_expr()?;
        let span = left.span().to(right.span());
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span,
        })
    }

    fn additive_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.multiplicative_expr()?;
        loop {
            let op = if self.check_symbol("+") {
                BinaryOp::Add
            } else if self.check_symbol("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            self.bump()?;
            let right = self.multiplicative_expr()?;
            let span = left.span().to(right.span());
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn multiplicative_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary_expr()?;
        loop {
            let op = if self.check_symbol("*") {
                BinaryOp::Mul
            } else if self.check_symbol("/") {
                BinaryOp::Div
            } else {
                break;
            };
            self.bump()?;
            let right = self.unary_expr()?;
            let span = left.span().to(right.span());
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> ParseResult<Expr> {
        if self.peek_ident() == Some("not") {
            let start = self.bump()?.span;
            let expr = self.unary_expr()?;
            let span = start.to(expr.span());
            return Ok(Expr::Not {
                expr: Box::new(expr),
                span,
            });
        }
        if self.check_symbol("-") {
            let start = self.bump()?.span;
            let expr = self.unary_expr()?;
            let span = start.to(expr.span());
            return Ok(Expr::Neg {
                expr: Box::new(expr),
                span,
            });
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary_expr()?;
        while self.check_symbol(".") && self.peek_kind_at(1) == Some(TokenKind::Ident) {
            self.bump()?;
            let method = self.name()?;
            self.expect_symbol("(")?;
            let mut args = Vec::new();
            if !self.check_symbol(")") {
                args.push(self.expr()?);
                while self.eat_symbol(",") {
                    args.push(self.expr()?);
                }
            }
            let end = self.expect_symbol(")")?;
            let span = expr.span().to(&end);
            expr = Expr::MethodCall {
                target: Box::new(expr),
                name: method,
                args,
                span,
            };
        }
        Ok(expr)
    }

    fn primary_expr(&mut self) -> ParseResult<Expr> {
        match self.peek_ident() {
            Some("if") => return self.if_expr(),
            Some("forall") | Some("exists") => return self.quantifier(),
            Some("sum") | Some("count") | Some("any") | Some("all")
                if self.peek_symbol_at(1, "(") =>
            {
                return self.aggregate()
            }
            Some("true") | Some("false") => {
                let token = self.bump()?;
                return Ok(Expr::BoolLit {
                    value: token.text == "true",
                    span: token.span,
                });
            }
            _ => {}
        }

        let token = self.peek().cloned();
        let Some(token) = token else {
            return Err(self.unexpected("an expression"));
        };
        match token.kind {
            TokenKind::Number => {
                self.bump()?;
                Ok(Expr::NumLit {
                    value: token.text.parse().unwrap_or(0.0),
                    span: token.span,
                })
            }
            TokenKind::Str => {
                self.bump()?;
                Ok(Expr::StrLit {
                    value: token.text,
                    span: token.span,
                })
            }
            TokenKind::Symbol if token.text == "(" => {
                self.bump()?;
                let inner = self.expr()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            TokenKind::Ident => {
                let name = self.name()?;
                if self.check_symbol("(") {
                    self.bump()?;
                    let mut args = Vec::new();
                    if !self.check_symbol(")") {
                        args.push(self.call_arg()?);
                        while self.eat_symbol(",") {
                            args.push(self.call_arg()?);
                        }
                    }
                    let end = self.expect_symbol(")")?;
                    let span = name.span.to(&end);
                    return Ok(Expr::Call {
                        name,
                        args,
                        style: CallStyle::Paren,
                        span,
                    });
                }
                if self.check_symbol("[") {
                    self.bump()?;
                    let mut args = Vec::new();
                    if !self.check_symbol("]") {
                        args.push(self.expr()?);
                        while self.eat_symbol(",") {
                            args.push(self.expr()?);
                        }
                    }
                    let end = self.expect_symbol("]")?;
                    let span = name.span.to(&end);
                    return Ok(Expr::Call {
                        name,
                        args,
                        style: CallStyle::Bracket,
                        span,
                    });
                }
                Ok(Expr::Name(name))
            }
            _ => Err(self.unexpected_at("an expression", token.span)),
        }
    }

    /// A call argument is an expression, or a comprehension-shaped tree
    /// (`expr for x in S [where c] [else e]`) destined for a `Comp(_)`
    /// macro formal.
    fn call_arg(&mut self) -> ParseResult<Expr> {
        let term = self.expr()?;
        if !self.eat_keyword("for") {
            return Ok(term);
        }
        let var = self.name()?;
        self.expect_keyword("in")?;
        let domain = self.name()?;
        let (where_clause, else_clause) = self.comp_tail()?;
        let end = self.prev_span();
        let span = term.span().to(&end);
        Ok(Expr::Aggregate {
            kind: AggKind::Any,
            comp: Comprehension {
                term: Box::new(term),
                var,
                domain,
                where_clause,
                else_clause,
                span: span.clone(),
            },
            from_comp_arg: true,
            span,
        })
    }

    fn if_expr(&mut self) -> ParseResult<Expr> {
        let start = self.bump_keyword("if")?;
        let cond = self.expr()?;
        self.expect_keyword("then")?;
        let then_branch = self.expr()?;
        self.expect_keyword("else")?;
        let else_branch = self.expr()?;
        let span = start.to(else_branch.span());
        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
            span,
        })
    }

    fn quantifier(&mut self) -> ParseResult<Expr> {
        let kind = if self.peek_ident() == Some("forall") {
            QuantKind::Forall
        } else {
            QuantKind::Exists
        };
        let start = self.bump()?.span;
        let var = self.name()?;
        self.expect_keyword("in")?;
        let domain = self.name()?;
        self.expect_symbol(":")?;
        let body = self.expr()?;
        let span = start.to(body.span());
        Ok(Expr::Quantifier {
            kind,
            var,
            domain,
            body: Box::new(body),
            span,
        })
    }

    fn aggregate(&mut self) -> ParseResult<Expr> {
        let kind = match self.peek_ident() {
            Some("sum") => AggKind::Sum,
            Some("count") => AggKind::Count,
            Some("any") => AggKind::Any,
            _ => AggKind::All,
        };
        let start = self.bump()?.span;
        self.expect_symbol("(")?;

        if kind == AggKind::Count {
            return self.count_body(start);
        }

        let term = self.expr()?;
        if self.check_symbol(")") {
            // `sum(xs)` over a comprehension formal.
            if let Expr::Name(arg) = term {
                let end = self.expect_symbol(")")?;
                return Ok(Expr::AggregateRef {
                    kind,
                    arg,
                    span: start.to(&end),
                });
            }
            return Err(self.unexpected("`for` in aggregate comprehension"));
        }
        self.expect_keyword("for")?;
        let var = self.name()?;
        self.expect_keyword("in")?;
        let domain = self.name()?;
        let (where_clause, else_clause) = self.comp_tail()?;
        let end = self.expect_symbol(")")?;
        let span = start.to(&end);
        Ok(Expr::Aggregate {
            kind,
            comp: Comprehension {
                term: Box::new(term),
                var,
                domain,
                where_clause,
                else_clause,
                span: span.clone(),
            },
            from_comp_arg: false,
            span,
        })
    }

    /// `count(x in X [where c])` and `count(x for x in X [where c])`; the
    /// counted name and the binder must agree (enforced in sema).
    fn count_body(&mut self, start: Span) -> ParseResult<Expr> {
        let var_ref = self.name()?;
        if self.check_symbol(")") {
            let end = self.expect_symbol(")")?;
            return Ok(Expr::AggregateRef {
                kind: AggKind::Count,
                arg: var_ref,
                span: start.to(&end),
            });
        }
        let var = if self.eat_keyword("for") {
            let binder = self.name()?;
            self.expect_keyword("in")?;
            binder
        } else {
            self.expect_keyword("in")?;
            var_ref.clone()
        };
        let domain = self.name()?;
        let (where_clause, else_clause) = self.comp_tail()?;
        let end = self.expect_symbol(")")?;
        let span = start.to(&end);
        Ok(Expr::Aggregate {
            kind: AggKind::Count,
            comp: Comprehension {
                term: Box::new(Expr::Name(var_ref)),
                var,
                domain,
                where_clause,
                else_clause,
                span: span.clone(),
            },
            from_comp_arg: false,
            span,
        })
    }

    fn comp_tail(&mut self) -> ParseResult<(Option<Box<Expr>>, Option<Box<Expr>>)> {
        let mut where_clause = None;
        let mut else_clause = None;
        if self.eat_keyword("where") {
            where_clause = Some(Box::new(self.expr()?));
        }
        if self.eat_keyword("else") {
            else_clause = Some(Box::new(self.expr()?));
        }
        Ok((where_clause, else_clause))
    }

    // --- token plumbing --------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Ident => Some(token.text.as_str()),
            _ => None,
        }
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| t.kind)
    }

    fn peek_symbol_at(&self, offset: usize, symbol: &str) -> bool {
        matches!(
            self.tokens.get(self.pos + offset),
            Some(token) if token.kind == TokenKind::Symbol && token.text == symbol
        )
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn bump(&mut self) -> ParseResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.unexpected("more input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn bump_keyword(&mut self, keyword: &str) -> ParseResult<Span> {
        if self.peek_ident() == Some(keyword) {
            Ok(self.bump()?.span)
        } else {
            Err(self.unexpected(&format!("`{keyword}`")))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_ident() == Some(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<Span> {
        self.bump_keyword(keyword)
    }

    fn check_symbol(&self, symbol: &str) -> bool {
        matches!(
            self.peek(),
            Some(token) if token.kind == TokenKind::Symbol && token.text == symbol
        )
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.check_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> ParseResult<Span> {
        if self.check_symbol(symbol) {
            Ok(self.bump()?.span)
        } else {
            Err(self.unexpected(&format!("`{symbol}`")))
        }
    }

    fn name(&mut self) -> ParseResult<SpannedName> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Ident => {
                let token = self.bump()?;
                Ok(SpannedName {
                    name: token.text,
                    span: token.span,
                })
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            return self.here();
        }
        self.tokens[self.pos - 1].span.clone()
    }

    fn here(&self) -> Span {
        match self.peek() {
            Some(token) => token.span.clone(),
            None => Span::point(&self.file, self.text_len, 1, 1),
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        self.unexpected_at(expected, self.here())
    }

    fn unexpected_at(&self, expected: &str, span: Span) -> Diagnostic {
        let found = match self.peek() {
            Some(token) => format!("`{}`", token.text),
            None => "end of input".to_string(),
        };
        Diagnostic::error("QSOL1001", "parse error", span)
            .with_note(format!("expected {expected}, found {found}"))
    }
}

fn top_span(item: &TopItem) -> &Span {
    match item {
        TopItem::Use(stmt) => &stmt.span,
        TopItem::Unknown(def) => &def.span,
        TopItem::Predicate(def) | TopItem::Function(def) => &def.span,
        TopItem::Problem(def) => &def.span,
    }
}
