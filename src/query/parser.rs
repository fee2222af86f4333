//! Recursive-descent parser producing the predicate AST.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! program     := "return"? expr ";"? EOF
//! expr        := or ("?" expr ":" expr)?
//! or          := and ("||" and)*
//! and         := equality ("&&" equality)*
//! equality    := relational (("==" | "===" | "!=" | "!==") relational)*
//! relational  := additive (("<" | "<=" | ">" | ">=") additive)*
//! additive    := term (("+" | "-") term)*
//! term        := unary (("*" | "/" | "%") unary)*
//! unary       := ("!" | "-") unary | postfix
//! postfix     := primary ("." ident call? | "[" expr "]")*
//! primary     := number | string | "true" | "false" | "null" | "undefined"
//!              | "obj" | "(" expr ")" | "[" (expr ("," expr)*)? "]"
//! ```
//!
//! Nesting is capped at [`MAX_DEPTH`] levels. Every nested expression and
//! every operator in a chain counts as one level, which bounds both parser
//! recursion and the height of the tree the evaluator walks.

use serde_json::Value;

use super::QueryError;
use super::lexer::{Punct, Spanned, Token};

/// Name of the implicit parameter bound to the object under test.
pub const PARAM: &str = "obj";

/// Deepest nesting a predicate may use.
pub const MAX_DEPTH: usize = 128;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Param,
    Array(Vec<Expr>),
    Member {
        object: Box<Expr>,
        property: Box<Expr>,
    },
    Call {
        receiver: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Includes,
    StartsWith,
    EndsWith,
    ToLowerCase,
    ToUpperCase,
    Trim,
}

impl Method {
    fn from_name(name: &str) -> Option<(Self, usize)> {
        Some(match name {
            "includes" => (Self::Includes, 1),
            "startsWith" => (Self::StartsWith, 1),
            "endsWith" => (Self::EndsWith, 1),
            "toLowerCase" => (Self::ToLowerCase, 0),
            "toUpperCase" => (Self::ToUpperCase, 0),
            "trim" => (Self::Trim, 0),
            _ => return None,
        })
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

/// Parse a full predicate program.
pub fn parse(tokens: Vec<Spanned>) -> Result<Expr, QueryError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    if matches!(parser.peek(), Token::Ident(name) if name == "return") {
        parser.pos += 1;
    }
    let expr = parser.expr()?;
    parser.eat(Punct::Semi);
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected {} after expression", describe(other)))),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("`{name}`"),
        Token::Number(n) => format!("number {n}"),
        Token::Str(s) => format!("string {s:?}"),
        Token::Punct(p) => format!("{p:?}"),
        Token::Eof => "end of input".to_owned(),
    }
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map_or(&Token::Eof, |spanned| &spanned.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |spanned| spanned.offset)
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn eat(&mut self, punct: Punct) -> bool {
        if *self.peek() == Token::Punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: Punct, what: &str) -> Result<(), QueryError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {}", describe(self.peek()))))
        }
    }

    /// Enter one more nesting level.
    fn descend(&mut self) -> Result<(), QueryError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!(
                "expression nests deeper than {MAX_DEPTH} levels"
            )));
        }
        Ok(())
    }

    /// Run `parse` one level deeper. Errors abort the whole parse, so the
    /// level is only given back on success.
    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Expr, QueryError>,
    ) -> Result<Expr, QueryError> {
        self.descend()?;
        let expr = parse(self)?;
        self.depth -= 1;
        Ok(expr)
    }

    fn expr(&mut self) -> Result<Expr, QueryError> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, QueryError> {
        let test = self.or()?;
        if !self.eat(Punct::Question) {
            return Ok(test);
        }
        let then = self.expr()?;
        self.expect(Punct::Colon, "`:`")?;
        let otherwise = self.expr()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or(&mut self) -> Result<Expr, QueryError> {
        let start = self.depth;
        let mut lhs = self.and()?;
        while self.eat(Punct::OrOr) {
            self.descend()?;
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = start;
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, QueryError> {
        let start = self.depth;
        let mut lhs = self.equality()?;
        while self.eat(Punct::AndAnd) {
            self.descend()?;
            let rhs = self.equality()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = start;
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        ops: &[(Punct, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, QueryError>,
    ) -> Result<Expr, QueryError> {
        let start = self.depth;
        let mut lhs = next(self)?;
        'outer: loop {
            for &(punct, op) in ops {
                if self.eat(punct) {
                    self.descend()?;
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            self.depth = start;
            return Ok(lhs);
        }
    }

    fn equality(&mut self) -> Result<Expr, QueryError> {
        self.binary_level(
            &[
                (Punct::EqEq, BinaryOp::Eq),
                (Punct::EqEqEq, BinaryOp::Eq),
                (Punct::NotEq, BinaryOp::Ne),
                (Punct::NotEqEq, BinaryOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, QueryError> {
        self.binary_level(
            &[
                (Punct::Lt, BinaryOp::Lt),
                (Punct::Le, BinaryOp::Le),
                (Punct::Gt, BinaryOp::Gt),
                (Punct::Ge, BinaryOp::Ge),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, QueryError> {
        self.binary_level(
            &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, QueryError> {
        self.binary_level(
            &[
                (Punct::Star, BinaryOp::Mul),
                (Punct::Slash, BinaryOp::Div),
                (Punct::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, QueryError> {
        if self.eat(Punct::Bang) {
            return Ok(Expr::Not(Box::new(self.nested(Self::unary)?)));
        }
        if self.eat(Punct::Minus) {
            return Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, QueryError> {
        let start = self.depth;
        let mut expr = self.primary()?;
        loop {
            if self.eat(Punct::Dot) {
                self.descend()?;
                let name = match self.bump() {
                    Token::Ident(name) => name,
                    other => {
                        self.pos -= 1;
                        return Err(self.error(format!(
                            "expected property name after `.`, found {}",
                            describe(&other)
                        )));
                    }
                };
                if *self.peek() == Token::Punct(Punct::LParen) {
                    expr = self.call(expr, &name)?;
                } else {
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(Expr::Literal(Value::String(name))),
                    };
                }
            } else if self.eat(Punct::LBracket) {
                self.descend()?;
                let property = self.expr()?;
                self.expect(Punct::RBracket, "`]`")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Box::new(property),
                };
            } else {
                self.depth = start;
                return Ok(expr);
            }
        }
    }

    fn call(&mut self, receiver: Expr, name: &str) -> Result<Expr, QueryError> {
        let (method, arity) = Method::from_name(name)
            .ok_or_else(|| self.error(format!("unsupported method `{name}`")))?;
        self.expect(Punct::LParen, "`(`")?;
        let args = self.list(Punct::RParen)?;
        if args.len() != arity {
            return Err(self.error(format!(
                "`{name}` takes {arity} argument(s), got {}",
                args.len()
            )));
        }
        Ok(Expr::Call {
            receiver: Box::new(receiver),
            method,
            args,
        })
    }

    fn list(&mut self, close: Punct) -> Result<Vec<Expr>, QueryError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(Punct::Comma, "`,`")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, QueryError> {
        let offset = self.offset();
        match self.bump() {
            Token::Number(n) => Ok(Expr::Literal(number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                PARAM => Ok(Expr::Param),
                _ => Err(QueryError::Syntax {
                    offset,
                    message: format!("unknown identifier `{name}`; only `{PARAM}` is in scope"),
                }),
            },
            Token::Punct(Punct::LParen) => {
                let expr = self.expr()?;
                self.expect(Punct::RParen, "`)`")?;
                Ok(expr)
            }
            Token::Punct(Punct::LBracket) => Ok(Expr::Array(self.list(Punct::RBracket)?)),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected a value, found {}", describe(&other))))
            }
        }
    }
}

/// JSON number for `n`: integral values become integers so they compare
/// and print the way object data does. Non-finite values become null.
#[allow(clippy::cast_possible_truncation)]
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_str(source: &str) -> Result<Expr, QueryError> {
        parse(tokenize(source)?)
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_str("obj.a || obj.b && obj.c").unwrap();
        assert!(matches!(expr, Expr::Or(_, ref rhs) if matches!(**rhs, Expr::And(..))));
    }

    #[test]
    fn return_and_semicolon_are_optional() {
        assert_eq!(
            parse_str("return obj.x === 1;").unwrap(),
            parse_str("obj.x === 1").unwrap()
        );
    }

    #[test]
    fn member_chains_and_calls() {
        let expr = parse_str("obj['tags'].includes('x')").unwrap();
        let Expr::Call { method, args, .. } = expr else {
            panic!("expected call");
        };
        assert_eq!(method, Method::Includes);
        assert_eq!(args, vec![Expr::Literal(Value::String("x".into()))]);
    }

    #[test]
    fn rejects_foreign_identifiers_and_methods() {
        let err = parse_str("window.x").unwrap_err();
        assert!(matches!(err, QueryError::Syntax { offset: 0, .. }));
        assert!(err.to_string().contains("window"));
        assert!(parse_str("obj.x.map(1)").is_err());
        assert!(parse_str("obj.x.includes()").is_err());
        assert!(parse_str("obj.x obj.y").is_err());
        assert!(parse_str("").is_err());
    }

    #[test]
    fn nesting_is_capped() {
        let deep_not = format!("{}true", "!".repeat(200_000));
        let err = parse_str(&deep_not).unwrap_err();
        assert!(matches!(err, QueryError::Syntax { .. }));
        assert!(err.to_string().contains("nests deeper"));

        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(parse_str(&parens), Err(QueryError::Syntax { .. })));

        let chain = vec!["1"; 100_000].join(" + ");
        assert!(matches!(parse_str(&chain), Err(QueryError::Syntax { .. })));

        let members = format!("obj{}", ".a".repeat(100_000));
        assert!(matches!(parse_str(&members), Err(QueryError::Syntax { .. })));
    }

    #[test]
    fn moderate_nesting_still_parses() {
        let depth = MAX_DEPTH / 4;
        let source = format!("{}obj.x == 1{}", "(".repeat(depth), ")".repeat(depth));
        assert!(parse_str(&source).is_ok());
        assert!(parse_str(&format!("{}true", "!".repeat(depth))).is_ok());
        assert!(parse_str(&vec!["obj.x == 1"; depth].join(" || ")).is_ok());
    }

    #[test]
    fn numbers_normalize_to_integers() {
        assert_eq!(number(3.0), Value::from(3));
        assert_eq!(number(0.5), serde_json::json!(0.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }
}
