use super::{ParseError, Spanned};
use chumsky::prelude::*;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token<'code> {
    BracketRoundOpen,
    BracketRoundClose,
    BracketCurlyOpen,
    BracketCurlyClose,
    Comment(&'code str),
    Int(&'code str),
    Str(&'code str),
    Identifier(&'code str),
    /// `public`, `static`, `abstract`... Checked by the classifier, not the grammar.
    Modifier(&'code str),
    Semicolon,
    Comma,
    Dot,
    Assign,
    Equal,
    NotEqual,
    LessOrEqual,
    Less,
    GreaterOrEqual,
    Greater,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Package,
    Import,
    Class,
    Void,
    IntType,
    BooleanType,
    True,
    False,
    Null,
    This,
    New,
    Return,
    If,
    Else,
    While,
    Throw,
    Throws,
}

impl<'code> Token<'code> {
    pub fn into_cow_str(self) -> Cow<'code, str> {
        match self {
            Self::BracketRoundOpen => "(".into(),
            Self::BracketRoundClose => ")".into(),
            Self::BracketCurlyOpen => "{".into(),
            Self::BracketCurlyClose => "}".into(),
            Self::Comment(comment) => comment.into(),
            Self::Int(digits) => digits.into(),
            Self::Str(text) => format!("\"{text}\"").into(),
            Self::Identifier(identifier) => identifier.into(),
            Self::Modifier(modifier) => modifier.into(),
            Self::Semicolon => ";".into(),
            Self::Comma => ",".into(),
            Self::Dot => ".".into(),
            Self::Assign => "=".into(),
            Self::Equal => "==".into(),
            Self::NotEqual => "!=".into(),
            Self::LessOrEqual => "<=".into(),
            Self::Less => "<".into(),
            Self::GreaterOrEqual => ">=".into(),
            Self::Greater => ">".into(),
            Self::And => "&&".into(),
            Self::Or => "||".into(),
            Self::Not => "!".into(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Asterisk => "*".into(),
            Self::Slash => "/".into(),
            Self::Percent => "%".into(),
            Self::Package => "package".into(),
            Self::Import => "import".into(),
            Self::Class => "class".into(),
            Self::Void => "void".into(),
            Self::IntType => "int".into(),
            Self::BooleanType => "boolean".into(),
            Self::True => "true".into(),
            Self::False => "false".into(),
            Self::Null => "null".into(),
            Self::This => "this".into(),
            Self::New => "new".into(),
            Self::Return => "return".into(),
            Self::If => "if".into(),
            Self::Else => "else".into(),
            Self::While => "while".into(),
            Self::Throw => "throw".into(),
            Self::Throws => "throws".into(),
        }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.into_cow_str())
    }
}

fn keyword_or_identifier(word: &str) -> Token<'_> {
    match word {
        "package" => Token::Package,
        "import" => Token::Import,
        "class" => Token::Class,
        "void" => Token::Void,
        "int" => Token::IntType,
        "boolean" => Token::BooleanType,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "this" => Token::This,
        "new" => Token::New,
        "return" => Token::Return,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "throw" => Token::Throw,
        "throws" => Token::Throws,
        "public" | "protected" | "private" | "static" | "final" | "abstract" | "native" | "synchronized" => {
            Token::Modifier(word)
        }
        _ => Token::Identifier(word),
    }
}

pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<Spanned<Token<'code>>>, extra::Err<ParseError<'code, char>>> {
    let bracket = choice((
        just('(').to(Token::BracketRoundOpen),
        just(')').to(Token::BracketRoundClose),
        just('{').to(Token::BracketCurlyOpen),
        just('}').to(Token::BracketCurlyClose),
    ));

    let operator = choice((
        just("==").to(Token::Equal),
        just("!=").to(Token::NotEqual),
        just("<=").to(Token::LessOrEqual),
        just(">=").to(Token::GreaterOrEqual),
        just("&&").to(Token::And),
        just("||").to(Token::Or),
        just('<').to(Token::Less),
        just('>').to(Token::Greater),
        just('=').to(Token::Assign),
        just('!').to(Token::Not),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Asterisk),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
    ));

    let punctuation = choice((
        just(';').to(Token::Semicolon),
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
    ));

    let line_comment = just("//")
        .then(any().and_is(text::newline().not()).repeated())
        .to_slice()
        .map(Token::Comment);

    let block_comment = just("/*")
        .then(any().and_is(just("*/").not()).repeated())
        .then(just("*/"))
        .to_slice()
        .map(Token::Comment);

    let int = text::int(10).to_slice().map(Token::Int);

    let escape = just('\\').then(any()).ignored();
    let string = just('"')
        .ignore_then(none_of("\\\"\n").ignored().or(escape).repeated().to_slice())
        .then_ignore(just('"'))
        .map(Token::Str);

    let word = any()
        .filter(|character: &char| character.is_ascii_alphabetic() || *character == '_' || *character == '$')
        .then(
            any()
                .filter(|character: &char| character.is_ascii_alphanumeric() || *character == '_' || *character == '$')
                .repeated(),
        )
        .to_slice()
        .map(keyword_or_identifier);

    let token = choice((line_comment, block_comment, bracket, int, string, word, operator, punctuation));

    token
        .map_with(|token, extra| Spanned {
            node: token,
            span: extra.span(),
        })
        .padded()
        .recover_with(skip_then_retry_until(any().ignored(), end()))
        .repeated()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token<'_>> {
        let result = lexer().parse(source);
        result.output().unwrap().iter().map(|token| token.node).collect()
    }

    #[test]
    fn identifiers_may_contain_dollar() {
        assert_eq!(
            tokens("REPL.$Rivet$3 do_it$"),
            vec![
                Token::Identifier("REPL"),
                Token::Dot,
                Token::Identifier("$Rivet$3"),
                Token::Identifier("do_it$"),
            ]
        );
    }

    #[test]
    fn keywords_modifiers_and_operators() {
        assert_eq!(
            tokens("public static int x = a <= b && !c;"),
            vec![
                Token::Modifier("public"),
                Token::Modifier("static"),
                Token::IntType,
                Token::Identifier("x"),
                Token::Assign,
                Token::Identifier("a"),
                Token::LessOrEqual,
                Token::Identifier("b"),
                Token::And,
                Token::Not,
                Token::Identifier("c"),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn comments_and_strings() {
        assert_eq!(
            tokens("\"a \\\"b\\\"\" // rest\n/* block */ 42"),
            vec![
                Token::Str("a \\\"b\\\""),
                Token::Comment("// rest"),
                Token::Comment("/* block */"),
                Token::Int("42"),
            ]
        );
    }
}
