use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::ast::types::Ty;
use crate::ast::{
    BinOp, DynamicOrdering, Expr, Param, QueryLambda, Token, TokenKind, TyKind, UnOp,
};
use crate::errors::ParseError;
use crate::functions::{
    map_function, resolve_aggregate, resolve_method, AggregateMatch, BuiltinFn, MappedFunction,
    MappedKind, MethodMatch,
};
use crate::lexer::Lexer;
use crate::schema::Schema;
use crate::signatures::{self, find_best, promote_expression, Resolution, Signature};
use crate::value::Value;

/// Uniform bound on expression nesting. The recursive-descent parser
/// recurses with nesting depth, so adversarial input is cut off here
/// instead of exhausting the stack.
pub const MAX_DEPTH: usize = 64;

/// Caller-supplied hook consulted for identifiers the schema does not
/// know; it may synthesize a member expression for them.
pub trait QueryResolver {
    fn resolve_member(&self, instance_ty: &Ty, name: &str, instance: &Arc<Expr>) -> Option<Expr>;
}

/// Builds a single-parameter predicate lambda over the schema's row type.
/// The body must type as boolean.
pub fn parse_predicate(
    schema: &Arc<Schema>,
    text: &str,
    resolver: Option<&dyn QueryResolver>,
) -> Result<QueryLambda, ParseError> {
    parse_lambda(schema, text, Some(&Ty::new(TyKind::Bool)), resolver)
}

/// Builds a single-parameter lambda over the schema's row type, promoting
/// the body to `result_ty` when one is required.
pub fn parse_lambda(
    schema: &Arc<Schema>,
    text: &str,
    result_ty: Option<&Ty>,
    resolver: Option<&dyn QueryResolver>,
) -> Result<QueryLambda, ParseError> {
    let param = Param::unnamed(schema.ty());
    let mut parser = Parser::with_parameters(text, std::slice::from_ref(&param), resolver)?;
    let body = parser.parse(result_ty)?;
    Ok(QueryLambda {
        param,
        body: Arc::new(body),
    })
}

/// Parses a comma-separated `$orderby` expression into ordering terms, all
/// selecting over one shared row parameter.
pub fn parse_orderings(
    schema: &Arc<Schema>,
    text: &str,
    resolver: Option<&dyn QueryResolver>,
) -> Result<(Arc<Param>, Vec<DynamicOrdering>), ParseError> {
    let param = Param::unnamed(schema.ty());
    let mut parser = Parser::with_parameters(text, std::slice::from_ref(&param), resolver)?;
    let orderings = parser.parse_ordering_list()?;
    Ok((param, orderings))
}

/// Recursive-descent parser producing typed expression trees.
///
/// Type promotion and overload resolution run while parsing: every binary
/// operator resolves its operands against the operator family's signature
/// table before the node is built.
pub struct Parser<'a> {
    lexer: Lexer,
    token: Token,
    it: Option<Arc<Param>>,
    symbols: HashMap<String, Arc<Expr>>,
    resolver: Option<&'a dyn QueryResolver>,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn with_parameters(
        text: &str,
        parameters: &[Arc<Param>],
        resolver: Option<&'a dyn QueryResolver>,
    ) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(text);
        let token = lexer.next_token()?;
        let mut parser = Parser {
            lexer,
            token,
            it: None,
            symbols: HashMap::new(),
            resolver,
            depth: 0,
        };
        for param in parameters {
            if !param.name.is_empty() {
                let key = param.name.to_ascii_lowercase();
                if parser.symbols.contains_key(&key) {
                    return Err(ParseError::semantic(
                        format!("The identifier '{}' was defined more than once", param.name),
                        0,
                    ));
                }
                parser
                    .symbols
                    .insert(key, Arc::new(Expr::Parameter(param.clone())));
            }
        }
        if parameters.len() == 1 && parameters[0].name.is_empty() {
            parser.it = Some(parameters[0].clone());
        }
        Ok(parser)
    }

    /// Parses the whole input as one expression, optionally promoting it to
    /// a required result type.
    pub fn parse(&mut self, result_ty: Option<&Ty>) -> Result<Expr, ParseError> {
        let pos = self.token.position;
        let mut expr = self.parse_expression()?;
        if let Some(target) = result_ty {
            expr = promote_expression(&expr, target, true).ok_or_else(|| {
                ParseError::semantic(format!("Expression of type '{}' expected", target.name()), pos)
            })?;
        }
        self.validate_end()?;
        Ok(expr)
    }

    /// Parses `selector [asc|ascending|desc|descending] (, ...)*` to the
    /// end of input.
    pub fn parse_ordering_list(&mut self) -> Result<Vec<DynamicOrdering>, ParseError> {
        let mut orderings = Vec::new();
        loop {
            let selector = self.parse_expression()?;
            let mut ascending = true;
            if self.token.identifier_is("asc") || self.token.identifier_is("ascending") {
                self.advance()?;
            } else if self.token.identifier_is("desc") || self.token.identifier_is("descending") {
                self.advance()?;
                ascending = false;
            }
            orderings.push(DynamicOrdering {
                selector: Arc::new(selector),
                ascending,
            });
            if self.token.kind != TokenKind::Comma {
                break;
            }
            self.advance()?;
        }
        self.validate_end()?;
        Ok(orderings)
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.token = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<(), ParseError> {
        if self.token.kind != kind {
            return Err(self.syntax(message));
        }
        self.advance()
    }

    fn validate_end(&mut self) -> Result<(), ParseError> {
        if self.token.kind != TokenKind::End {
            return Err(self.syntax("Syntax error"));
        }
        Ok(())
    }

    fn syntax(&self, message: impl Into<String>) -> ParseError {
        ParseError::syntax(message, self.token.position)
    }

    fn semantic(&self, message: impl Into<String>) -> ParseError {
        ParseError::semantic(message, self.token.position)
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.syntax("Expression is too deeply nested"));
        }
        self.depth += 1;
        let result = self.parse_conditional();
        self.depth -= 1;
        result
    }

    /// `test ? if_true : if_false`, right-associative.
    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let pos = self.token.position;
        let test = self.parse_logical_or()?;
        if self.token.kind != TokenKind::Question {
            return Ok(test);
        }
        self.advance()?;
        let if_true = self.parse_expression()?;
        self.expect(TokenKind::Colon, "':' expected")?;
        let if_false = self.parse_expression()?;
        self.generate_conditional(test, if_true, if_false, pos)
    }

    fn generate_conditional(
        &self,
        test: Expr,
        if_true: Expr,
        if_false: Expr,
        pos: usize,
    ) -> Result<Expr, ParseError> {
        let test = promote_expression(&test, &Ty::new(TyKind::Bool), true).ok_or_else(|| {
            ParseError::semantic("The first expression must be of type 'bool'", pos)
        })?;
        let (if_true, if_false) = if if_true.ty() == if_false.ty() {
            (if_true, if_false)
        } else {
            let true_as_false = if !if_false.is_null_constant() {
                promote_expression(&if_true, if_false.ty(), true)
            } else {
                None
            };
            let false_as_true = if !if_true.is_null_constant() {
                promote_expression(&if_false, if_true.ty(), true)
            } else {
                None
            };
            match (true_as_false, false_as_true) {
                (Some(promoted), None) => (promoted, if_false),
                (None, Some(promoted)) => (if_true, promoted),
                (Some(_), Some(_)) => {
                    return Err(ParseError::semantic(
                        format!(
                            "Both of the types '{}' and '{}' convert to the other",
                            if_true.ty().name(),
                            if_false.ty().name()
                        ),
                        pos,
                    ));
                }
                (None, None) => {
                    return Err(ParseError::semantic(
                        format!(
                            "Neither of the types '{}' and '{}' converts to the other",
                            if_true.ty().name(),
                            if_false.ty().name()
                        ),
                        pos,
                    ));
                }
            }
        };
        let ty = if_true.ty().clone();
        Ok(Expr::Conditional {
            test: Arc::new(test),
            if_true: Arc::new(if_true),
            if_false: Arc::new(if_false),
            ty,
        })
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_logical_and()?;
        while self.token.kind == TokenKind::DoubleBar || self.token.identifier_is("or") {
            let op = self.token.clone();
            self.advance()?;
            let right = self.parse_logical_and()?;
            let (left_p, right_p) =
                self.check_and_promote_operands(&[signatures::LOGICAL], &op, left, right)?;
            let ty = left_p.ty().clone();
            left = Expr::Binary {
                op: BinOp::Or,
                left: Arc::new(left_p),
                right: Arc::new(right_p),
                ty,
            };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.token.kind == TokenKind::DoubleAmp || self.token.identifier_is("and") {
            let op = self.token.clone();
            self.advance()?;
            let right = self.parse_comparison()?;
            let (left_p, right_p) =
                self.check_and_promote_operands(&[signatures::LOGICAL], &op, left, right)?;
            let ty = left_p.ty().clone();
            left = Expr::Binary {
                op: BinOp::And,
                left: Arc::new(left_p),
                right: Arc::new(right_p),
                ty,
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let mut left = self.parse_additive()?;
        while matches!(
            self.token.kind,
            Equal
                | DoubleEqual
                | ExclamationEqual
                | LessGreater
                | LessThan
                | LessThanEqual
                | GreaterThan
                | GreaterThanEqual
        ) {
            let op = self.token.clone();
            self.advance()?;
            let right = self.parse_additive()?;
            let is_equality = matches!(op.kind, Equal | DoubleEqual | ExclamationEqual | LessGreater);

            let (left_p, right_p) = if is_equality
                && left.ty().is_reference()
                && right.ty().is_reference()
            {
                // Reference equality: same kind, or a null literal promoted
                // to the other side's type.
                if left.ty() == right.ty() {
                    (left, right)
                } else if let Some(promoted) = promote_expression(&right, left.ty(), false) {
                    (left, promoted)
                } else if let Some(promoted) = promote_expression(&left, right.ty(), false) {
                    (promoted, right)
                } else {
                    return Err(self.incompatible_operands(&op, &left, &right));
                }
            } else if left.ty().is_enum() || right.ty().is_enum() {
                // A literal on the other side promotes into the enum type
                // first (by member name or underlying value), then both
                // sides convert to the underlying numeric type.
                let mut left = left;
                let mut right = right;
                if left.ty().is_enum() && !right.ty().is_enum() {
                    if let Some(promoted) = promote_expression(&right, left.ty(), false) {
                        right = promoted;
                    }
                } else if right.ty().is_enum() && !left.ty().is_enum() {
                    if let Some(promoted) = promote_expression(&left, right.ty(), false) {
                        left = promoted;
                    }
                }
                let converted_left = convert_enum_expression(left, &right);
                let converted_right = convert_enum_expression(right, &converted_left);
                let tables = if is_equality {
                    signatures::EQUALITY
                } else {
                    signatures::RELATIONAL
                };
                self.check_and_promote_operands(tables, &op, converted_left, converted_right)?
            } else {
                let tables = if is_equality {
                    signatures::EQUALITY
                } else {
                    signatures::RELATIONAL
                };
                self.check_and_promote_operands(tables, &op, left, right)?
            };

            let bin_op = match op.kind {
                Equal | DoubleEqual => BinOp::Equal,
                ExclamationEqual | LessGreater => BinOp::NotEqual,
                LessThan => BinOp::LessThan,
                LessThanEqual => BinOp::LessEqual,
                GreaterThan => BinOp::GreaterThan,
                _ => BinOp::GreaterEqual,
            };
            left = generate_comparison(bin_op, left_p, right_p);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        while matches!(
            self.token.kind,
            TokenKind::Plus | TokenKind::Minus | TokenKind::Amp
        ) {
            let op = self.token.clone();
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = match op.kind {
                TokenKind::Plus if left.ty().is_string() || right.ty().is_string() => {
                    generate_concat(left, right)
                }
                TokenKind::Plus => {
                    let (l, r) =
                        self.check_and_promote_operands(signatures::ADD, &op, left, right)?;
                    let ty = l.ty().clone();
                    Expr::Binary {
                        op: BinOp::Add,
                        left: Arc::new(l),
                        right: Arc::new(r),
                        ty,
                    }
                }
                TokenKind::Minus => {
                    let (l, r) =
                        self.check_and_promote_operands(signatures::SUBTRACT, &op, left, right)?;
                    let ty = subtract_result_ty(&l, &r);
                    Expr::Binary {
                        op: BinOp::Subtract,
                        left: Arc::new(l),
                        right: Arc::new(r),
                        ty,
                    }
                }
                _ => generate_concat(left, right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while matches!(
            self.token.kind,
            TokenKind::Asterisk | TokenKind::Slash | TokenKind::Percent
        ) || self.token.identifier_is("mod")
        {
            let op = self.token.clone();
            self.advance()?;
            let right = self.parse_unary()?;
            let (l, r) =
                self.check_and_promote_operands(signatures::MULTIPLICATIVE, &op, left, right)?;
            let bin_op = match op.kind {
                TokenKind::Asterisk => BinOp::Multiply,
                TokenKind::Slash => BinOp::Divide,
                _ => BinOp::Modulo,
            };
            let ty = l.ty().clone();
            left = Expr::Binary {
                op: bin_op,
                left: Arc::new(l),
                right: Arc::new(r),
                ty,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let is_not =
            self.token.kind == TokenKind::Exclamation || self.token.identifier_is("not");
        if self.token.kind != TokenKind::Minus && !is_not {
            return self.parse_primary();
        }
        let op = self.token.clone();
        self.advance()?;
        // A minus directly before a numeric literal folds into it.
        if op.kind == TokenKind::Minus
            && matches!(
                self.token.kind,
                TokenKind::IntegerLiteral | TokenKind::RealLiteral
            )
        {
            self.token.text = format!("-{}", self.token.text);
            self.token.position = op.position;
            return self.parse_primary();
        }
        let expr = self.parse_unary()?;
        if op.kind == TokenKind::Minus {
            let promoted = self.check_and_promote_operand(signatures::NEGATION, &op, expr)?;
            let ty = promoted.ty().clone();
            Ok(Expr::Unary {
                op: UnOp::Negate,
                operand: Arc::new(promoted),
                ty,
            })
        } else {
            let promoted = self.check_and_promote_operand(signatures::NOT, &op, expr)?;
            let ty = promoted.ty().clone();
            Ok(Expr::Unary {
                op: UnOp::Not,
                operand: Arc::new(promoted),
                ty,
            })
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_start()?;
        loop {
            if self.token.kind == TokenKind::Dot {
                self.advance()?;
                expr = self.parse_member_access(expr)?;
            } else if self.token.kind == TokenKind::OpenBracket {
                expr = self.parse_element_access(expr)?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary_start(&mut self) -> Result<Expr, ParseError> {
        match self.token.kind {
            TokenKind::Identifier => self.parse_identifier(),
            TokenKind::StringLiteral => self.parse_string_literal(),
            TokenKind::IntegerLiteral => self.parse_integer_literal(),
            TokenKind::RealLiteral => self.parse_real_literal(),
            TokenKind::OpenParen => self.parse_paren_expression(),
            _ => Err(self.syntax("Expression expected")),
        }
    }

    /// Identifier resolution order: registered symbols, keyword literals
    /// and type-construction keywords, the mapped-function table, implicit
    /// row-parameter members, then the external resolver hook.
    fn parse_identifier(&mut self) -> Result<Expr, ParseError> {
        let lower = self.token.text.to_ascii_lowercase();
        if let Some(symbol) = self.symbols.get(&lower) {
            let expr = symbol.as_ref().clone();
            self.advance()?;
            return Ok(expr);
        }
        match lower.as_str() {
            "true" | "false" => {
                let value = lower == "true";
                self.advance()?;
                return Ok(Expr::constant(Value::Bool(value), Ty::new(TyKind::Bool)));
            }
            "null" => {
                self.advance()?;
                return Ok(Expr::constant(Value::Null, Ty::new(TyKind::Null)));
            }
            "binary" | "x" | "time" | "datetime" | "datetimeoffset" | "guid" => {
                return self.parse_type_construction();
            }
            _ => {}
        }
        if let Some(mapped) = map_function(&self.token.text) {
            return self.parse_mapped_function(mapped);
        }
        if let Some(it) = self.it.clone() {
            return self.parse_member_access(Expr::Parameter(it));
        }
        Err(self.semantic(format!("Unknown identifier '{}'", self.token.text)))
    }

    /// Member access where the member name is the current token. Method
    /// syntax resolves only against the sequence aggregate table; plain
    /// names resolve against the instance schema, then the resolver hook.
    fn parse_member_access(&mut self, instance: Expr) -> Result<Expr, ParseError> {
        let pos = self.token.position;
        if self.token.kind != TokenKind::Identifier {
            return Err(self.syntax("Identifier expected"));
        }
        let name = self.token.text.clone();
        self.advance()?;

        if self.token.kind == TokenKind::OpenParen {
            return match instance.ty().kind.clone() {
                TyKind::Sequence(element) => self.parse_aggregate(instance, &element, &name, pos),
                _ => Err(ParseError::semantic(
                    format!("Unknown identifier '{}'", name),
                    pos,
                )),
            };
        }

        let found = match &instance.ty().kind {
            TyKind::Record(schema) => schema
                .field(&name)
                .map(|(index, field)| (index, field.name.clone(), field.ty.clone())),
            _ => None,
        };
        if let Some((index, field_name, ty)) = found {
            return Ok(Expr::Field {
                instance: Arc::new(instance),
                name: field_name,
                index,
                ty,
            });
        }
        let instance = Arc::new(instance);
        if let Some(resolver) = self.resolver {
            if let Some(resolved) = resolver.resolve_member(instance.ty(), &name, &instance) {
                return Ok(resolved);
            }
        }
        Err(ParseError::semantic(
            format!(
                "No property or field '{}' exists in type '{}'",
                name,
                instance.ty().name()
            ),
            pos,
        ))
    }

    /// Aggregate call over a sequence member. The argument expression, if
    /// any, parses with the implicit parameter rebound to the sequence's
    /// element type and becomes a per-element sub-lambda.
    fn parse_aggregate(
        &mut self,
        instance: Expr,
        element: &Ty,
        name: &str,
        pos: usize,
    ) -> Result<Expr, ParseError> {
        let outer = self.it.take();
        let element_param = Param::unnamed(element.clone());
        self.it = Some(element_param.clone());
        let args = self.parse_argument_list();
        self.it = outer;
        let args = args?;

        match resolve_aggregate(name, &args, element) {
            AggregateMatch::Unique { op, arg, ret } => Ok(Expr::Aggregate {
                source: Arc::new(instance),
                op,
                selector: arg.map(|body| QueryLambda {
                    param: element_param,
                    body: Arc::new(body),
                }),
                ty: ret,
            }),
            _ => Err(ParseError::semantic(
                format!("No applicable aggregate method '{}' exists", name),
                pos,
            )),
        }
    }

    fn parse_argument_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(TokenKind::OpenParen, "'(' expected")?;
        let args = if self.token.kind == TokenKind::CloseParen {
            Vec::new()
        } else {
            self.parse_arguments()?
        };
        self.expect(TokenKind::CloseParen, "')' or ',' expected")?;
        Ok(args)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        loop {
            args.push(self.parse_expression()?);
            if self.token.kind != TokenKind::Comma {
                break;
            }
            self.advance()?;
        }
        Ok(args)
    }

    /// Rank-1 element access by integer index over sequences and binary
    /// values.
    fn parse_element_access(&mut self, instance: Expr) -> Result<Expr, ParseError> {
        let pos = self.token.position;
        self.expect(TokenKind::OpenBracket, "'[' expected")?;
        let args = self.parse_arguments()?;
        self.expect(TokenKind::CloseBracket, "']' or ',' expected")?;

        let element_ty = match &instance.ty().kind {
            TyKind::Sequence(element) => element.as_ref().clone(),
            TyKind::Binary => Ty::new(TyKind::UInt8),
            _ => {
                return Err(ParseError::semantic(
                    format!("No applicable indexer exists in type '{}'", instance.ty().name()),
                    pos,
                ));
            }
        };
        if args.len() != 1 {
            return Err(ParseError::semantic(
                "Indexing takes exactly one argument",
                pos,
            ));
        }
        let index = promote_expression(&args[0], &Ty::new(TyKind::Int32), true)
            .ok_or_else(|| ParseError::semantic("Array index must be an integer expression", pos))?;
        Ok(Expr::Index {
            instance: Arc::new(instance),
            index: Arc::new(index),
            ty: element_ty,
        })
    }

    /// A call through the mapped-function table: `startswith(Name, 'J')`,
    /// `year(BirthDate)`, `round(Total)`.
    fn parse_mapped_function(
        &mut self,
        mapped: &'static MappedFunction,
    ) -> Result<Expr, ParseError> {
        let pos = self.token.position;
        self.advance()?;
        if self.token.kind != TokenKind::OpenParen {
            return Err(self.syntax("'(' expected"));
        }
        let mut args = self.parse_argument_list()?;
        if mapped.swap_args && args.len() == 2 {
            args.swap(0, 1);
        }

        let no_applicable = |ty_name: &str| {
            ParseError::semantic(
                format!(
                    "No applicable method '{}' exists in type '{}'",
                    mapped.name, ty_name
                ),
                pos,
            )
        };

        match &mapped.kind {
            MappedKind::Property(function, ret) => {
                if args.len() != 1 {
                    return Err(no_applicable(mapped.target.name()));
                }
                let instance = args.remove(0);
                self.check_receiver(mapped, &instance, pos)?;
                let ty = Ty {
                    kind: ret.ty_kind(),
                    nullable: instance.ty().nullable,
                };
                Ok(Expr::Call {
                    function: *function,
                    instance: Some(Arc::new(instance)),
                    args: Vec::new(),
                    ty,
                })
            }
            MappedKind::Method(overloads) => {
                if args.is_empty() {
                    return Err(no_applicable(mapped.target.name()));
                }
                let instance = args.remove(0);
                self.check_receiver(mapped, &instance, pos)?;
                match resolve_method(overloads, &args) {
                    MethodMatch::Unique { sig, args } => {
                        let ty = Ty {
                            kind: sig.ret.ty_kind(),
                            nullable: instance.ty().nullable,
                        };
                        Ok(Expr::Call {
                            function: sig.function,
                            instance: Some(Arc::new(instance)),
                            args: args.into_iter().map(Arc::new).collect(),
                            ty,
                        })
                    }
                    MethodMatch::Ambiguous => Err(ParseError::semantic(
                        format!(
                            "Ambiguous invocation of method '{}' in type '{}'",
                            mapped.name,
                            mapped.target.name()
                        ),
                        pos,
                    )),
                    MethodMatch::None => Err(no_applicable(instance.ty().name().as_str())),
                }
            }
            MappedKind::Static(overloads) => match resolve_method(overloads, &args) {
                MethodMatch::Unique { sig, args } => Ok(Expr::Call {
                    function: sig.function,
                    instance: None,
                    args: args.into_iter().map(Arc::new).collect(),
                    ty: Ty::new(sig.ret.ty_kind()),
                }),
                MethodMatch::Ambiguous => Err(ParseError::semantic(
                    format!(
                        "Ambiguous invocation of method '{}' in type '{}'",
                        mapped.name,
                        mapped.target.name()
                    ),
                    pos,
                )),
                MethodMatch::None => Err(no_applicable(mapped.target.name())),
            },
        }
    }

    fn check_receiver(
        &self,
        mapped: &MappedFunction,
        instance: &Expr,
        pos: usize,
    ) -> Result<(), ParseError> {
        if mapped.target.matches(instance.ty()) {
            Ok(())
        } else {
            Err(ParseError::semantic(
                format!(
                    "No applicable method '{}' exists in type '{}'",
                    mapped.name,
                    instance.ty().name()
                ),
                pos,
            ))
        }
    }

    /// Keyword-typed literal: `guid'...'`, `datetime'...'`, `time'...'`,
    /// `datetimeoffset'...'`, `binary'hex'`/`X'hex'`.
    fn parse_type_construction(&mut self) -> Result<Expr, ParseError> {
        let keyword = self.token.text.to_ascii_lowercase();
        let keyword_pos = self.token.position;
        self.advance()?;
        if self.token.kind != TokenKind::StringLiteral {
            return Err(ParseError::syntax(
                format!("Invalid '{}' type creation expression", keyword),
                keyword_pos,
            ));
        }
        let payload = self.token.text.clone();
        let payload_pos = self.token.position;
        self.advance()?;

        let wrap = |message: String| ParseError::syntax(message, payload_pos);
        let (value, kind) = match keyword.as_str() {
            "guid" => {
                let guid = Uuid::parse_str(&payload).map_err(|e| wrap(e.to_string()))?;
                (Value::Guid(guid), TyKind::Guid)
            }
            "datetime" => {
                let dt = parse_datetime_text(&payload).map_err(wrap)?;
                (Value::DateTime(dt), TyKind::DateTime)
            }
            "datetimeoffset" => {
                let dto = DateTime::parse_from_rfc3339(&payload)
                    .map_err(|e| wrap(e.to_string()))?;
                (Value::DateTimeOffset(dto), TyKind::DateTimeOffset)
            }
            "time" => {
                let duration = parse_duration_text(&payload).map_err(wrap)?;
                (Value::Duration(duration), TyKind::Duration)
            }
            // "binary" or "X"
            _ => {
                let bytes = parse_hex_text(&payload).map_err(wrap)?;
                (Value::Binary(bytes), TyKind::Binary)
            }
        };
        Ok(Expr::constant(value, Ty::new(kind)))
    }

    fn parse_string_literal(&mut self) -> Result<Expr, ParseError> {
        let text = self.token.text.clone();
        self.advance()?;
        Ok(Expr::Constant {
            value: Value::String(text.clone()),
            ty: Ty::new(TyKind::String),
            text: Some(text),
        })
    }

    /// Integer literals type as the narrowest of int, uint, long, ulong
    /// that holds the value; the `L` suffix forces long.
    fn parse_integer_literal(&mut self) -> Result<Expr, ParseError> {
        let raw = self.token.text.clone();
        let pos = self.token.position;
        let invalid =
            || ParseError::syntax(format!("Invalid integer literal '{}'", raw), pos);
        let (digits, long_suffix) = match raw.strip_suffix(['L', 'l']) {
            Some(d) => (d.to_string(), true),
            None => (raw.clone(), false),
        };

        let (value, ty) = if digits.starts_with('-') {
            let n: i64 = digits.parse().map_err(|_| invalid())?;
            if long_suffix || n < i64::from(i32::MIN) {
                (Value::Int64(n), TyKind::Int64)
            } else {
                (Value::Int32(n as i32), TyKind::Int32)
            }
        } else {
            let n: u64 = digits.parse().map_err(|_| invalid())?;
            if long_suffix {
                let n = i64::try_from(n).map_err(|_| invalid())?;
                (Value::Int64(n), TyKind::Int64)
            } else if n <= i32::MAX as u64 {
                (Value::Int32(n as i32), TyKind::Int32)
            } else if n <= u32::MAX as u64 {
                (Value::UInt32(n as u32), TyKind::UInt32)
            } else if n <= i64::MAX as u64 {
                (Value::Int64(n as i64), TyKind::Int64)
            } else {
                (Value::UInt64(n), TyKind::UInt64)
            }
        };
        self.advance()?;
        Ok(Expr::Constant {
            value,
            ty: Ty::new(ty),
            text: Some(digits),
        })
    }

    /// Real literals default to double; `F` selects float and `M` decimal.
    fn parse_real_literal(&mut self) -> Result<Expr, ParseError> {
        let raw = self.token.text.clone();
        let pos = self.token.position;
        let invalid = || ParseError::syntax(format!("Invalid real literal '{}'", raw), pos);
        let (digits, suffix) = match raw.strip_suffix(['F', 'M', 'D']) {
            Some(d) => (d.to_string(), raw.chars().last()),
            None => (raw.clone(), None),
        };
        let (value, kind) = match suffix {
            Some('F') => (
                Value::Float32(digits.parse().map_err(|_| invalid())?),
                TyKind::Float32,
            ),
            Some('M') => (
                Value::Decimal(digits.parse().map_err(|_| invalid())?),
                TyKind::Decimal,
            ),
            _ => (
                Value::Float64(digits.parse().map_err(|_| invalid())?),
                TyKind::Float64,
            ),
        };
        self.advance()?;
        Ok(Expr::Constant {
            value,
            ty: Ty::new(kind),
            text: Some(digits),
        })
    }

    fn parse_paren_expression(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenKind::OpenParen, "'(' expected")?;
        let expr = self.parse_expression()?;
        self.expect(TokenKind::CloseParen, "')' or operator expected")?;
        Ok(expr)
    }

    fn check_and_promote_operands(
        &self,
        tables: &[&[Signature]],
        op: &Token,
        left: Expr,
        right: Expr,
    ) -> Result<(Expr, Expr), ParseError> {
        match find_best(tables, &[left.clone(), right.clone()]) {
            Resolution::Unique(mut promoted) => {
                let right = promoted.pop().unwrap_or(right);
                let left = promoted.pop().unwrap_or(left);
                Ok((left, right))
            }
            Resolution::Ambiguous => Err(ParseError::semantic(
                format!(
                    "Operator '{}' is ambiguous for operand types '{}' and '{}'",
                    op.text,
                    left.ty().name(),
                    right.ty().name()
                ),
                op.position,
            )),
            Resolution::None => Err(self.incompatible_operands(op, &left, &right)),
        }
    }

    fn check_and_promote_operand(
        &self,
        table: &'static [Signature],
        op: &Token,
        operand: Expr,
    ) -> Result<Expr, ParseError> {
        match find_best(&[table], &[operand.clone()]) {
            Resolution::Unique(mut promoted) => Ok(promoted.pop().unwrap_or(operand)),
            _ => Err(ParseError::semantic(
                format!(
                    "Operator '{}' incompatible with operand type '{}'",
                    op.text,
                    operand.ty().name()
                ),
                op.position,
            )),
        }
    }

    fn incompatible_operands(&self, op: &Token, left: &Expr, right: &Expr) -> ParseError {
        ParseError::semantic(
            format!(
                "Operator '{}' incompatible with operand types '{}' and '{}'",
                op.text,
                left.ty().name(),
                right.ty().name()
            ),
            op.position,
        )
    }
}

/// Relational operators on strings lower to an ordinal compare-then-test
/// against zero; everything else compares directly.
fn generate_comparison(op: BinOp, left: Expr, right: Expr) -> Expr {
    let relational = matches!(
        op,
        BinOp::LessThan | BinOp::LessEqual | BinOp::GreaterThan | BinOp::GreaterEqual
    );
    let boolean = Ty::new(TyKind::Bool);
    if relational && left.ty().is_string() {
        let compare = Expr::Call {
            function: BuiltinFn::Compare,
            instance: None,
            args: vec![Arc::new(left), Arc::new(right)],
            ty: Ty::new(TyKind::Int32),
        };
        let zero = Expr::constant(Value::Int32(0), Ty::new(TyKind::Int32));
        return Expr::Binary {
            op,
            left: Arc::new(compare),
            right: Arc::new(zero),
            ty: boolean,
        };
    }
    Expr::Binary {
        op,
        left: Arc::new(left),
        right: Arc::new(right),
        ty: boolean,
    }
}

/// The `&` operator and `+` with a string operand: concatenation boxing
/// non-string operands to their text form.
fn generate_concat(left: Expr, right: Expr) -> Expr {
    Expr::Call {
        function: BuiltinFn::ConcatValues,
        instance: None,
        args: vec![Arc::new(left), Arc::new(right)],
        ty: Ty::new(TyKind::String),
    }
}

/// An enum operand converts to its underlying integral type before
/// promotion; the conversion is nullable when the operand is nullable or
/// the other side is a null literal.
fn convert_enum_expression(expr: Expr, other: &Expr) -> Expr {
    if !expr.ty().is_enum() {
        return expr;
    }
    let mut target = expr.ty().enum_underlying();
    if other.is_null_constant() {
        target = target.as_nullable();
    }
    Expr::Convert {
        operand: Arc::new(expr),
        ty: target,
    }
}

/// `sub` over two instants yields a duration; every other subtraction
/// keeps the promoted operand type.
fn subtract_result_ty(left: &Expr, right: &Expr) -> Ty {
    match (&left.ty().kind, &right.ty().kind) {
        (TyKind::DateTime, TyKind::DateTime)
        | (TyKind::DateTimeOffset, TyKind::DateTimeOffset) => Ty {
            kind: TyKind::Duration,
            nullable: left.ty().nullable || right.ty().nullable,
        },
        _ => left.ty().clone(),
    }
}

/// Accepts the common ISO-ish spellings a `datetime'...'` payload uses.
fn parse_datetime_text(text: &str) -> Result<NaiveDateTime, String> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    Err(format!("The string '{}' was not recognized as a valid datetime", text))
}

/// `[-][d.]hh:mm:ss[.fraction]`.
fn parse_duration_text(text: &str) -> Result<Duration, String> {
    let error = || format!("The string '{}' was not recognized as a valid time", text);
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (days, clock) = match rest.split_once('.') {
        Some((d, c)) if c.contains(':') => (d.parse::<i64>().map_err(|_| error())?, c),
        _ => (0, rest),
    };
    let mut parts = clock.split(':');
    let hours: i64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(error)?;
    let minutes: i64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(error)?;
    let (seconds, millis) = match parts.next() {
        None => (0, 0),
        Some(sec) => match sec.split_once('.') {
            None => (sec.parse::<i64>().map_err(|_| error())?, 0),
            Some((whole, frac)) => {
                let seconds = whole.parse::<i64>().map_err(|_| error())?;
                let scaled = format!("{:0<3}", frac);
                let millis = scaled[..3].parse::<i64>().map_err(|_| error())?;
                (seconds, millis)
            }
        },
    };
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return Err(error());
    }
    let mut duration = Duration::days(days)
        + Duration::hours(hours)
        + Duration::minutes(minutes)
        + Duration::seconds(seconds)
        + Duration::milliseconds(millis);
    if negative {
        duration = -duration;
    }
    Ok(duration)
}

/// Hex-pair decoding for `binary'...'` payloads.
fn parse_hex_text(text: &str) -> Result<Vec<u8>, String> {
    if text.len() % 2 != 0 {
        return Err("Invalid hex literal".to_string());
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| "Invalid hex literal".to_string())
        })
        .collect()
}
