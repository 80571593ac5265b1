//! A tiny expression reader for `eval`
//!
//! Understands literals (integers, floats, strings, symbols, `true`,
//! `false`, `nothing`), global names, tuples `(a, b)`, vectors `[a, b]`
//! and calls `f(a, b)` including operator calls such as `+(1, 2)`.
//!
//! [`Token`] is a `logos` lexer; the parser is recursive descent over its
//! token stream.

use std::ops::Range;

use dualheap_ffi::ManagedException;
use logos::Logos;
use smol_str::SmolStr;

use crate::builtins::exception;
use crate::value::{ElemType, Value};

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(SmolStr),
    Call(SmolStr, Vec<Expr>),
    Tuple(Vec<Expr>),
    Vector(Vec<Expr>),
}

impl Expr {
    /// Evaluate with `resolve` for global names and `invoke` for calls
    pub fn evaluate(
        &self,
        resolve: &dyn Fn(&str) -> Result<Value, ManagedException>,
        invoke: &dyn Fn(&Value, &[Value]) -> Result<Value, ManagedException>,
    ) -> Result<Value, ManagedException> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => resolve(name),
            Expr::Call(name, args) => {
                let func = resolve(name)?;
                let args = args
                    .iter()
                    .map(|a| a.evaluate(resolve, invoke))
                    .collect::<Result<Vec<_>, _>>()?;
                invoke(&func, &args)
            }
            Expr::Tuple(items) => Ok(Value::Tuple(
                items
                    .iter()
                    .map(|a| a.evaluate(resolve, invoke))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Expr::Vector(items) => {
                let data = items
                    .iter()
                    .map(|a| a.evaluate(resolve, invoke))
                    .collect::<Result<Vec<_>, _>>()?;
                let elem = ElemType::infer(&data);
                Ok(Value::array(elem, vec![data.len()], data))
            }
        }
    }
}

/// Lexical tokens of the expression language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    /// Integer or float literal, sign and digit separators included
    #[regex(r"-?[0-9][0-9_]*(?:\.[0-9][0-9_]*)?(?:[eE][+-]?[0-9]+)?", |lex| SmolStr::new(lex.slice()))]
    Number(SmolStr),

    /// String literal, already unescaped
    #[regex(r#""(?:[^"\\]|\\.)*""#, unescape)]
    Str(String),

    #[regex(r":[\p{L}_][\p{L}\p{N}_!]*", |lex| SmolStr::new(&lex.slice()[1..]))]
    Symbol(SmolStr),

    /// Names, including `true`, `false` and `nothing`
    #[regex(r"[\p{L}_][\p{L}\p{N}_!]*", |lex| SmolStr::new(lex.slice()))]
    Ident(SmolStr),

    /// Operator function names such as `+` or `!=`
    #[regex(r"[-+*/%^<>=!|&~]+", |lex| SmolStr::new(lex.slice()))]
    Operator(SmolStr),
}

fn unescape(lex: &mut logos::Lexer<Token>) -> String {
    let slice = lex.slice();
    let body = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn parse_error(message: &str, pos: usize) -> ManagedException {
    exception("ParseError", format!("{} at position {}", message, pos))
}

/// Split `code` into tokens with their byte offsets
pub fn tokenize(code: &str) -> Result<Vec<(Token, Range<usize>)>, ManagedException> {
    let mut lexer = Token::lexer(code);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        let span = lexer.span();
        match token {
            Ok(token) => tokens.push((token, span)),
            Err(()) => return Err(parse_error("unexpected character", span.start)),
        }
    }
    Ok(tokens)
}

/// Parse a complete expression
pub fn parse(code: &str) -> Result<Expr, ManagedException> {
    let mut parser = Parser {
        tokens: tokenize(code)?,
        pos: 0,
        end: code.len(),
    };
    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("extra token after end of expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn error(&self, message: &str) -> ManagedException {
        let at = self
            .tokens
            .get(self.pos)
            .map_or(self.end, |(_, span)| span.start);
        parse_error(message, at)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<Expr, ManagedException> {
        let Some(token) = self.bump() else {
            return Err(self.error("unexpected end of input"));
        };
        match token {
            Token::Number(text) => self.number(&text),
            Token::Str(text) => Ok(Expr::Literal(Value::str(text))),
            Token::Symbol(name) => Ok(Expr::Literal(Value::Symbol(name))),
            Token::LParen => {
                let (mut items, trailing_comma) = self.list(&Token::RParen)?;
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Expr::Tuple(items))
                }
            }
            Token::LBracket => {
                let (items, _) = self.list(&Token::RBracket)?;
                Ok(Expr::Vector(items))
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "nothing" => Ok(Expr::Literal(Value::Nothing)),
                _ => self.maybe_call(name),
            },
            Token::Operator(name) => self.maybe_call(name),
            Token::RParen | Token::RBracket | Token::Comma => {
                self.pos -= 1;
                Err(self.error("unexpected token"))
            }
        }
    }

    fn maybe_call(&mut self, name: SmolStr) -> Result<Expr, ManagedException> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let (args, _) = self.list(&Token::RParen)?;
            Ok(Expr::Call(name, args))
        } else {
            Ok(Expr::Name(name))
        }
    }

    /// Comma-separated expressions up to `close`; also reports whether the
    /// last item was followed by a comma
    fn list(&mut self, close: &Token) -> Result<(Vec<Expr>, bool), ManagedException> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok((items, trailing_comma));
            }
            items.push(self.expr()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.pos += 1;
                    trailing_comma = true;
                }
                Some(token) if token == close => trailing_comma = false,
                _ => {
                    let expected = if *close == Token::RParen { ')' } else { ']' };
                    return Err(self.error(&format!("expected '{}'", expected)));
                }
            }
        }
    }

    fn number(&self, text: &str) -> Result<Expr, ManagedException> {
        let text = text.replace('_', "");
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Expr::Literal(Value::Int(i)));
        }
        if let Ok(i) = text.parse::<i128>() {
            return Ok(Expr::Literal(Value::BigInt(i)));
        }
        text.parse::<f64>()
            .map(|f| Expr::Literal(Value::Float(f)))
            .map_err(|_| self.error(&format!("invalid numeric literal \"{}\"", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_literals() {
        assert_eq!(parse("5").unwrap(), Expr::Literal(Value::Int(5)));
        assert_eq!(parse("-2.5").unwrap(), Expr::Literal(Value::Float(-2.5)));
        assert_eq!(parse("1e3").unwrap(), Expr::Literal(Value::Float(1000.0)));
        assert_eq!(
            parse("170141183460469231731687303715884105727").unwrap(),
            Expr::Literal(Value::BigInt(i128::MAX))
        );
        assert_eq!(parse("\"a\\\"b\"").unwrap(), Expr::Literal(Value::str("a\"b")));
        assert_eq!(parse(":sym").unwrap(), Expr::Literal(Value::Symbol("sym".into())));
        assert_eq!(parse(" nothing ").unwrap(), Expr::Literal(Value::Nothing));
    }

    #[test]
    fn test_calls_and_tuples() {
        assert_eq!(
            parse("+(1, x)").unwrap(),
            Expr::Call(
                "+".into(),
                vec![Expr::Literal(Value::Int(1)), Expr::Name("x".into())]
            )
        );
        assert_eq!(parse("(1,)").unwrap(), Expr::Tuple(vec![Expr::Literal(Value::Int(1))]));
        assert_eq!(parse("(1)").unwrap(), Expr::Literal(Value::Int(1)));
        assert_eq!(parse("()").unwrap(), Expr::Tuple(vec![]));
        assert_eq!(
            parse("setindex!(d, 1, 2)").unwrap(),
            Expr::Call(
                "setindex!".into(),
                vec![
                    Expr::Name("d".into()),
                    Expr::Literal(Value::Int(1)),
                    Expr::Literal(Value::Int(2))
                ]
            )
        );
    }

    #[test]
    fn test_tokens() {
        let tokens: Vec<Token> = tokenize("f(-1, π, :s, \"x\") != 2.5e1")
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("f".into()),
                Token::LParen,
                Token::Number("-1".into()),
                Token::Comma,
                Token::Ident("π".into()),
                Token::Comma,
                Token::Symbol("s".into()),
                Token::Comma,
                Token::Str("x".into()),
                Token::RParen,
                Token::Operator("!=".into()),
                Token::Number("2.5e1".into()),
            ]
        );
    }

    #[test]
    fn test_operator_call_before_parenthesis() {
        assert_eq!(
            parse("-(3)").unwrap(),
            Expr::Call("-".into(), vec![Expr::Literal(Value::Int(3))])
        );
        assert_eq!(parse("1_000").unwrap(), Expr::Literal(Value::Int(1000)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("(1, 2").unwrap_err().exception, "ParseError");
        assert_eq!(parse("1 2").unwrap_err().exception, "ParseError");
        assert_eq!(parse("\"open").unwrap_err().exception, "ParseError");
        assert_eq!(parse(")").unwrap_err().exception, "ParseError");
        assert_eq!(parse("").unwrap_err().exception, "ParseError");
    }
}
