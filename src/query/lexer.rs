//! Tokenizer for predicate expressions.

use super::QueryError;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(Punct),
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Punct {
    Dot,
    Comma,
    Semi,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Question,
    Colon,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn syntax(offset: usize, message: impl Into<String>) -> QueryError {
    QueryError::Syntax {
        offset,
        message: message.into(),
    }
}

/// Tokenize `source`. The result always ends with [`Token::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, QueryError> {
    let mut out = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push(Spanned {
                token: Token::Ident(ident),
                offset,
            });
            continue;
        }

        if c.is_ascii_digit() {
            let mut end = offset;
            let mut seen_exponent = false;
            let mut prev = c;
            while let Some(&(i, c)) = chars.peek() {
                let sign_after_exponent = (c == '+' || c == '-') && matches!(prev, 'e' | 'E');
                if c.is_ascii_digit()
                    || c == '.'
                    || sign_after_exponent
                    || ((c == 'e' || c == 'E') && !seen_exponent)
                {
                    seen_exponent |= c == 'e' || c == 'E';
                    end = i + c.len_utf8();
                    prev = c;
                    chars.next();
                } else {
                    break;
                }
            }
            let text = &source[offset..end];
            let value = text
                .parse::<f64>()
                .map_err(|_| syntax(offset, format!("malformed number `{text}`")))?;
            out.push(Spanned {
                token: Token::Number(value),
                offset,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((i, c2)) = chars.next() {
                match c2 {
                    _ if c2 == c => {
                        closed = true;
                        break;
                    }
                    '\\' => {
                        let Some((_, escaped)) = chars.next() else {
                            break;
                        };
                        match escaped {
                            'n' => value.push('\n'),
                            't' => value.push('\t'),
                            'r' => value.push('\r'),
                            '0' => value.push('\0'),
                            'u' => {
                                let hex: String = (0..4).filter_map(|_| chars.next()).map(|(_, h)| h).collect();
                                let ch = u32::from_str_radix(&hex, 16)
                                    .ok()
                                    .and_then(char::from_u32)
                                    .ok_or_else(|| syntax(i, format!("bad unicode escape `\\u{hex}`")))?;
                                value.push(ch);
                            }
                            other => value.push(other),
                        }
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(syntax(offset, "unterminated string"));
            }
            out.push(Spanned {
                token: Token::Str(value),
                offset,
            });
            continue;
        }

        chars.next();
        let next = chars.peek().map(|&(_, c)| c);
        let next2 = {
            let mut look = chars.clone();
            look.next();
            look.peek().map(|&(_, c)| c)
        };
        let (punct, extra) = match (c, next, next2) {
            ('=', Some('='), Some('=')) => (Punct::EqEqEq, 2),
            ('=', Some('='), _) => (Punct::EqEq, 1),
            ('!', Some('='), Some('=')) => (Punct::NotEqEq, 2),
            ('!', Some('='), _) => (Punct::NotEq, 1),
            ('!', ..) => (Punct::Bang, 0),
            ('&', Some('&'), _) => (Punct::AndAnd, 1),
            ('|', Some('|'), _) => (Punct::OrOr, 1),
            ('<', Some('='), _) => (Punct::Le, 1),
            ('<', ..) => (Punct::Lt, 0),
            ('>', Some('='), _) => (Punct::Ge, 1),
            ('>', ..) => (Punct::Gt, 0),
            ('.', ..) => (Punct::Dot, 0),
            (',', ..) => (Punct::Comma, 0),
            (';', ..) => (Punct::Semi, 0),
            ('(', ..) => (Punct::LParen, 0),
            (')', ..) => (Punct::RParen, 0),
            ('[', ..) => (Punct::LBracket, 0),
            (']', ..) => (Punct::RBracket, 0),
            ('+', ..) => (Punct::Plus, 0),
            ('-', ..) => (Punct::Minus, 0),
            ('*', ..) => (Punct::Star, 0),
            ('/', ..) => (Punct::Slash, 0),
            ('%', ..) => (Punct::Percent, 0),
            ('?', ..) => (Punct::Question, 0),
            (':', ..) => (Punct::Colon, 0),
            ('=', ..) => return Err(syntax(offset, "assignment is not allowed; use `===`")),
            _ => return Err(syntax(offset, format!("unexpected character `{c}`"))),
        };
        for _ in 0..extra {
            chars.next();
        }
        out.push(Spanned {
            token: Token::Punct(punct),
            offset,
        });
    }

    out.push(Spanned {
        token: Token::Eof,
        offset: source.len(),
    });
    Ok(out)
}
