use super::ast::*;
use super::lexer::{Token, lexer};
use crate::diag::Diag;
use chumsky::{input::ValueInput, pratt::*, prelude::*};

type Extra<'tokens, 'src> = extra::Err<ParseError<'tokens, Token<'src>>>;

fn identifier<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Spanned<&'src str>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    select! { Token::Identifier(identifier) => identifier }.map_with(|identifier, extra| Spanned {
        node: identifier,
        span: extra.span(),
    })
}

/// `a`, `a.b.c`
fn dotted<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Vec<&'src str>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    let identifier = select! { Token::Identifier(identifier) => identifier };
    identifier
        .then(just(Token::Dot).ignore_then(identifier).repeated().collect::<Vec<_>>())
        .map(|(first, rest)| {
            let mut parts = vec![first];
            parts.extend(rest);
            parts
        })
}

fn type_expr<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Spanned<TypeExpr<'src>>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    choice((
        just(Token::IntType).to(TypeExpr::Int),
        just(Token::BooleanType).to(TypeExpr::Boolean),
        just(Token::Void).to(TypeExpr::Void),
        dotted().map(TypeExpr::Named),
    ))
    .map_with(|ty, extra| Spanned {
        node: ty,
        span: extra.span(),
    })
}

fn modifiers<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Vec<Spanned<&'src str>>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    select! { Token::Modifier(modifier) => modifier }
        .map_with(|modifier, extra| Spanned {
            node: modifier,
            span: extra.span(),
        })
        .repeated()
        .collect()
}

pub fn expression<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Spanned<Expression<'src>>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    recursive(|expression| {
        let arguments = expression
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose));

        let int = select! { Token::Int(digits) => digits }.try_map(|digits: &str, span| {
            digits
                .parse::<i32>()
                .map(Expression::Int)
                .map_err(|_| ParseError::custom(span, "integer number too large"))
        });

        let literal = select! {
            Token::Str(text) => Expression::Str(text),
            Token::True => Expression::Bool(true),
            Token::False => Expression::Bool(false),
            Token::Null => Expression::Null,
            Token::This => Expression::This,
        };

        let new = just(Token::New)
            .ignore_then(type_expr())
            .then(arguments.clone())
            .map(|(class, arguments)| Expression::New { class, arguments });

        let name_or_call = identifier()
            .then(arguments.clone().or_not())
            .map(|(name, arguments)| match arguments {
                Some(arguments) => Expression::Call {
                    target: None,
                    name,
                    arguments,
                },
                None => Expression::Name(name.node),
            });

        let nested = expression
            .clone()
            .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose));

        let atom = choice((int, literal, new, name_or_call))
            .map_with(|expression, extra| Spanned {
                node: expression,
                span: extra.span(),
            })
            .or(nested);

        let member = just(Token::Dot).ignore_then(identifier()).then(arguments.or_not());

        let postfix = atom.foldl_with(member.repeated(), |target, (name, arguments), extra| {
            let target = Box::new(target);
            let node = match arguments {
                Some(arguments) => Expression::Call {
                    target: Some(target),
                    name,
                    arguments,
                },
                None => Expression::Field { target, name },
            };
            Spanned {
                node,
                span: extra.span(),
            }
        });

        let operator = choice((
            just(Token::Or).to(BinaryOp::Or),
            just(Token::And).to(BinaryOp::And),
            just(Token::Equal).to(BinaryOp::Equal),
            just(Token::NotEqual).to(BinaryOp::NotEqual),
            just(Token::LessOrEqual).to(BinaryOp::LessOrEqual),
            just(Token::Less).to(BinaryOp::Less),
            just(Token::GreaterOrEqual).to(BinaryOp::GreaterOrEqual),
            just(Token::Greater).to(BinaryOp::Greater),
            just(Token::Plus).to(BinaryOp::Add),
            just(Token::Minus).to(BinaryOp::Subtract),
            just(Token::Asterisk).to(BinaryOp::Multiply),
            just(Token::Slash).to(BinaryOp::Divide),
            just(Token::Percent).to(BinaryOp::Remainder),
        ));
        let level = |ops: &'static [BinaryOp]| {
            operator.clone().try_map(move |op, span| {
                if ops.contains(&op) {
                    Ok(op)
                } else {
                    Err(ParseError::custom(span, "unexpected operator"))
                }
            })
        };

        postfix.pratt((
            infix(right(1), just(Token::Assign), |target, _, value, extra| Spanned {
                node: Expression::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                },
                span: extra.span(),
            }),
            infix(left(2), level(&[BinaryOp::Or]), |lhs, op, rhs, extra| binary(lhs, op, rhs, extra.span())),
            infix(left(3), level(&[BinaryOp::And]), |lhs, op, rhs, extra| binary(lhs, op, rhs, extra.span())),
            infix(left(4), level(&[BinaryOp::Equal, BinaryOp::NotEqual]), |lhs, op, rhs, extra| binary(lhs, op, rhs, extra.span())),
            infix(
                left(5),
                level(&[BinaryOp::Less, BinaryOp::LessOrEqual, BinaryOp::Greater, BinaryOp::GreaterOrEqual]),
                |lhs, op, rhs, extra| binary(lhs, op, rhs, extra.span()),
            ),
            infix(left(6), level(&[BinaryOp::Add, BinaryOp::Subtract]), |lhs, op, rhs, extra| binary(lhs, op, rhs, extra.span())),
            infix(left(7), level(&[BinaryOp::Multiply, BinaryOp::Divide, BinaryOp::Remainder]), |lhs, op, rhs, extra| binary(lhs, op, rhs, extra.span())),
            prefix(8, just(Token::Minus).to(UnaryOp::Negate), |op, operand, extra| Spanned {
                node: Expression::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span: extra.span(),
            }),
            prefix(8, just(Token::Not).to(UnaryOp::Not), |op, operand, extra| Spanned {
                node: Expression::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span: extra.span(),
            }),
        ))
    })
}

fn binary<'src>(lhs: Spanned<Expression<'src>>, op: BinaryOp, rhs: Spanned<Expression<'src>>, span: Span) -> Spanned<Expression<'src>> {
    Spanned {
        node: Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}

/// `T name [= init]` without the terminating semicolon.
fn declarator<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Field<'src>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    modifiers()
        .then(type_expr())
        .then(identifier())
        .then(just(Token::Assign).ignore_then(expression()).or_not())
        .map(|(((modifiers, ty), name), init)| Field {
            modifiers,
            ty,
            name,
            init,
        })
}

pub fn statement<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Spanned<Statement<'src>>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    recursive(|statement| {
        let semicolon = just(Token::Semicolon);
        let condition = expression().delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose));

        let local = type_expr()
            .then(identifier())
            .then(just(Token::Assign).ignore_then(expression()).or_not())
            .then_ignore(semicolon.clone())
            .map(|((ty, name), init)| Statement::Local { ty, name, init });

        let return_ = just(Token::Return)
            .ignore_then(expression().or_not())
            .then_ignore(semicolon.clone())
            .map(Statement::Return);

        let if_ = just(Token::If)
            .ignore_then(condition.clone())
            .then(statement.clone())
            .then(just(Token::Else).ignore_then(statement.clone()).or_not())
            .map(|((condition, then), otherwise)| Statement::If {
                condition,
                then: Box::new(then),
                otherwise: otherwise.map(Box::new),
            });

        let while_ = just(Token::While)
            .ignore_then(condition)
            .then(statement.clone())
            .map(|(condition, body)| Statement::While {
                condition,
                body: Box::new(body),
            });

        let throw = just(Token::Throw)
            .ignore_then(expression())
            .then_ignore(semicolon.clone())
            .map(Statement::Throw);

        let block = statement
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BracketCurlyOpen), just(Token::BracketCurlyClose))
            .map(Statement::Block);

        let empty = semicolon.clone().to(Statement::Empty);

        let expression_statement = expression().then_ignore(semicolon).map(Statement::Expression);

        choice((local, return_, if_, while_, throw, block, empty, expression_statement)).map_with(|statement, extra| {
            Spanned {
                node: statement,
                span: extra.span(),
            }
        })
    })
}

fn block<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Spanned<Vec<Spanned<Statement<'src>>>>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    statement()
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::BracketCurlyOpen), just(Token::BracketCurlyClose))
        .map_with(|statements, extra| Spanned {
            node: statements,
            span: extra.span(),
        })
}

fn method<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Method<'src>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    let type_parameters = identifier()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::Less), just(Token::Greater))
        .or_not()
        .map(Option::unwrap_or_default);

    let signature = type_parameters
        .then(type_expr())
        .then(identifier())
        .then(parameters())
        .then(throws())
        .map_with(|signature, extra| (signature, extra.span()));

    let body = block().map(Some).or(just(Token::Semicolon).to(None));

    modifiers().then(signature).then(body).map(
        |((modifiers, (((((type_parameters, return_type), name), parameters), throws), signature)), body)| Method {
            modifiers,
            type_parameters,
            return_type: Some(return_type),
            name,
            parameters,
            throws,
            signature,
            body,
        },
    )
}

fn parameters<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Vec<Parameter<'src>>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    type_expr()
        .then(identifier())
        .map(|(ty, name)| Parameter { ty, name })
        .separated_by(just(Token::Comma))
        .collect()
        .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose))
}

fn throws<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Vec<Spanned<TypeExpr<'src>>>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    just(Token::Throws)
        .ignore_then(type_expr().separated_by(just(Token::Comma)).at_least(1).collect())
        .or_not()
        .map(Option::unwrap_or_default)
}

fn constructor<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Method<'src>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    let signature = identifier()
        .then(parameters())
        .then(throws())
        .map_with(|signature, extra| (signature, extra.span()));

    modifiers()
        .then(signature)
        .then(block())
        .map(|((modifiers, (((name, parameters), throws), signature)), body)| Method {
            modifiers,
            type_parameters: Vec::new(),
            return_type: None,
            name,
            parameters,
            throws,
            signature,
            body: Some(body),
        })
}

fn class<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Class<'src>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    recursive(|class| {
        let field = declarator().then_ignore(just(Token::Semicolon));

        let member = choice((
            class.map(Member::Class),
            method().map(Member::Method),
            constructor().map(Member::Method),
            field.map(Member::Field),
        ))
        .map_with(|member, extra| Spanned {
            node: member,
            span: extra.span(),
        });

        let header = modifiers()
            .then_ignore(just(Token::Class))
            .then(identifier())
            .then_ignore(just(Token::BracketCurlyOpen))
            .map_with(|header, extra| (header, extra.span()));

        header
            .then(member.repeated().collect::<Vec<_>>())
            .then(just(Token::BracketCurlyClose).map_with(|_, extra| extra.span()))
            .map(|((((modifiers, name), header), members), close)| Class {
                modifiers,
                name,
                header,
                members,
                close,
            })
    })
}

fn import<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Spanned<Import<'src>>, Extra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    just(Token::Import)
        .ignore_then(just(Token::Modifier("static")).or_not().map(|is_static| is_static.is_some()))
        .then(dotted())
        .then(just(Token::Dot).then(just(Token::Asterisk)).or_not().map(|star| star.is_some()))
        .then_ignore(just(Token::Semicolon))
        .map_with(|((is_static, path), on_demand), extra| Spanned {
            node: Import {
                is_static,
                path,
                on_demand,
            },
            span: extra.span(),
        })
}

pub fn compilation_unit<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, CompilationUnit<'src>, Extra<'tokens, 'src>>
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    let package = just(Token::Package).ignore_then(dotted()).then_ignore(just(Token::Semicolon));
    let class = class().map_with(|class, extra| Spanned {
        node: class,
        span: extra.span(),
    });

    package
        .or_not()
        .then(import().repeated().collect::<Vec<_>>())
        .then(class.repeated().collect::<Vec<_>>())
        .then_ignore(end())
        .map(|((package, imports), classes)| CompilationUnit {
            package,
            imports,
            classes,
        })
}

pub fn fragment<'tokens, 'src: 'tokens, I>() -> impl Parser<'tokens, I, Fragment<'src>, Extra<'tokens, 'src>>
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    let spanned_class = class().map_with(|class, extra| Spanned {
        node: class,
        span: extra.span(),
    });
    let spanned_method = method().map_with(|method, extra| Spanned {
        node: method,
        span: extra.span(),
    });
    // The semicolon is optional at the top level.
    let var = declarator()
        .then_ignore(just(Token::Semicolon).or_not())
        .map_with(|field, extra| Spanned {
            node: field,
            span: extra.span(),
        });

    choice((
        import().then_ignore(end()).map(Fragment::Import),
        spanned_class.then_ignore(end()).map(Fragment::Class),
        spanned_method.then_ignore(end()).map(Fragment::Method),
        var.then_ignore(end()).map(Fragment::Var),
        expression()
            .then_ignore(just(Token::Semicolon).or_not())
            .then_ignore(end())
            .map(Fragment::Expression),
        statement().then_ignore(end()).map(Fragment::Statement),
    ))
}

fn lex(source: &str) -> Result<Vec<Spanned<Token<'_>>>, Vec<Diag>> {
    let (tokens, errors) = lexer().parse(source).into_output_errors();
    if !errors.is_empty() {
        return Err(errors
            .into_iter()
            .map(|error| Diag::syntax(error.to_string(), error.span().into_range()))
            .collect());
    }
    let mut tokens = tokens.unwrap_or_default();
    tokens.retain(|token| !matches!(token.node, Token::Comment(_)));
    Ok(tokens)
}

fn syntax_errors(errors: Vec<ParseError<'_, Token<'_>>>) -> Vec<Diag> {
    errors
        .into_iter()
        .map(|error| Diag::syntax(error.to_string(), error.span().into_range()))
        .collect()
}

pub fn parse_fragment(source: &str) -> Result<Fragment<'_>, Vec<Diag>> {
    let tokens = lex(source)?;
    let end: Span = (source.len()..source.len()).into();
    let (fragment, errors) = fragment()
        .parse(tokens.as_slice().map(end, |Spanned { node, span }| (node, span)))
        .into_output_errors();
    match fragment {
        Some(fragment) if errors.is_empty() => Ok(fragment),
        _ if errors.is_empty() => Err(vec![Diag::syntax("unexpected input", 0..source.len())]),
        _ => Err(syntax_errors(errors)),
    }
}

pub fn parse_unit(source: &str) -> Result<CompilationUnit<'_>, Vec<Diag>> {
    let tokens = lex(source)?;
    let end: Span = (source.len()..source.len()).into();
    let (unit, errors) = compilation_unit()
        .parse(tokens.as_slice().map(end, |Spanned { node, span }| (node, span)))
        .into_output_errors();
    match unit {
        Some(unit) if errors.is_empty() => Ok(unit),
        _ if errors.is_empty() => Err(vec![Diag::syntax("unexpected input", 0..source.len())]),
        _ => Err(syntax_errors(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_are_told_apart() {
        assert!(matches!(parse_fragment("import static java.lang.Math.*;"), Ok(Fragment::Import(import)) if import.node.is_static && import.node.on_demand));
        assert!(matches!(parse_fragment("class Foo { int x; }"), Ok(Fragment::Class(_))));
        assert!(matches!(parse_fragment("int f(int a) { return a; }"), Ok(Fragment::Method(_))));
        assert!(matches!(parse_fragment("int x = 5"), Ok(Fragment::Var(_))));
        assert!(matches!(parse_fragment("String s;"), Ok(Fragment::Var(_))));
        assert!(matches!(parse_fragment("x = 5"), Ok(Fragment::Expression(_))));
        assert!(matches!(parse_fragment("f(1);"), Ok(Fragment::Expression(_))));
        assert!(matches!(parse_fragment("if (x) y = 1; else y = 2;"), Ok(Fragment::Statement(_))));
        assert!(parse_fragment("int = ;").is_err());
    }

    #[test]
    fn method_signature_span_skips_modifiers() {
        let source = "public static <T> void show(T value) throws Exception { }";
        let Ok(Fragment::Method(method)) = parse_fragment(source) else {
            panic!("not a method");
        };
        assert_eq!(&source[method.node.signature.into_range()], "<T> void show(T value) throws Exception");
        assert_eq!(method.node.modifiers.len(), 2);
        assert_eq!(method.node.type_parameters[0].node, "T");
        assert_eq!(method.node.name.node, "show");
        assert_eq!(method.node.parameters.len(), 1);
        assert_eq!(method.node.throws.len(), 1);
        assert!(method.node.body.is_some());
    }

    #[test]
    fn precedence_and_postfix_chains() {
        let Ok(Fragment::Expression(expression)) = parse_fragment("a = 1 + 2 * b.c(3).d") else {
            panic!("not an expression");
        };
        let Expression::Assign { value, .. } = expression.node else {
            panic!("not an assignment");
        };
        let Expression::Binary { op: BinaryOp::Add, rhs, .. } = value.node else {
            panic!("not an addition");
        };
        let Expression::Binary { op: BinaryOp::Multiply, rhs, .. } = rhs.node else {
            panic!("not a multiplication");
        };
        assert!(matches!(rhs.node, Expression::Field { ref name, .. } if name.node == "d"));
    }

    #[test]
    fn compilation_unit_with_nested_class() {
        let source = "package REPL;\nimport static REPL.$Rivet$1.f;\nclass $Rivet$2 {\npublic static class Foo {\nint x;\nFoo(int x) { this.x = x; }\nclass Bar { }\n}\n}\n";
        let unit = parse_unit(source).unwrap();
        assert_eq!(unit.package, Some(vec!["REPL"]));
        assert_eq!(unit.imports[0].node.name(), "REPL.$Rivet$1.f");
        let Member::Class(foo) = &unit.classes[0].node.members[0].node else {
            panic!("not a class");
        };
        assert_eq!(foo.members.len(), 3);
        assert!(matches!(&foo.members[1].node, Member::Method(constructor) if constructor.return_type.is_none()));
        assert_eq!(&source[foo.header.into_range()], "public static class Foo {");
    }
}
