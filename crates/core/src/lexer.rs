use crate::error::FormulaError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords; keywords are distinguished in the parser
    Word(String),
    /// Quoted string literal (content without quotes, escapes resolved)
    Str(String),
    /// Numeric literal, kept as text to preserve exact representation
    Number(String),
    LParen,
    RParen,
    Comma,
    // Arithmetic operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    // Comparison operators
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // End of input
    Eof,
}

impl Token {
    /// Source-like rendering for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{}'", w),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Number(n) => format!("number {}", n),
            Token::LParen => "'('".to_owned(),
            Token::RParen => "')'".to_owned(),
            Token::Comma => "','".to_owned(),
            Token::Plus => "'+'".to_owned(),
            Token::Minus => "'-'".to_owned(),
            Token::Star => "'*'".to_owned(),
            Token::Slash => "'/'".to_owned(),
            Token::Caret => "'^'".to_owned(),
            Token::Eq => "'='".to_owned(),
            Token::Neq => "'!='".to_owned(),
            Token::Lt => "'<'".to_owned(),
            Token::Lte => "'<='".to_owned(),
            Token::Gt => "'>'".to_owned(),
            Token::Gte => "'>='".to_owned(),
            Token::Eof => "end of expression".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    /// 0-based character offset of the token's first character.
    pub pos: usize,
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split formula text into tokens.
///
/// Words are maximal runs of identifier characters, so a keyword can never
/// match inside a longer identifier (`ANDREW` is one word). Operator symbols
/// are recognized wherever they appear, so `100/5` is three tokens.
pub fn lex(src: &str) -> Result<Vec<Spanned>, FormulaError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;

        // String literal; only \" and \\ are escapes
        if c == '"' {
            pos += 1;
            let mut s = String::new();
            loop {
                if pos >= chars.len() {
                    return Err(FormulaError::syntax(start, "unterminated string literal"));
                }
                let sc = chars[pos];
                if sc == '"' {
                    pos += 1;
                    break;
                }
                if sc == '\\' {
                    match chars.get(pos + 1) {
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        Some(other) => {
                            return Err(FormulaError::syntax(
                                pos,
                                format!("unsupported escape '\\{}' in string", other),
                            ))
                        }
                        None => {
                            return Err(FormulaError::syntax(start, "unterminated string literal"))
                        }
                    }
                    pos += 2;
                    continue;
                }
                s.push(sc);
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Str(s),
                pos: start,
            });
            continue;
        }

        // Number: digits with an optional fractional part
        if c.is_ascii_digit() {
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos < chars.len()
                && chars[pos] == '.'
                && pos + 1 < chars.len()
                && chars[pos + 1].is_ascii_digit()
            {
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            if pos < chars.len() && is_word_start(chars[pos]) {
                return Err(FormulaError::syntax(
                    pos,
                    format!("unexpected '{}' after number", chars[pos]),
                ));
            }
            tokens.push(Spanned {
                token: Token::Number(chars[start..pos].iter().collect()),
                pos: start,
            });
            continue;
        }

        if is_word_start(c) {
            while pos < chars.len() && is_word_char(chars[pos]) {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Word(chars[start..pos].iter().collect()),
                pos: start,
            });
            continue;
        }

        let next = chars.get(pos + 1).copied();
        let (token, width) = match (c, next) {
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('^', _) => (Token::Caret, 1),
            ('=', _) => (Token::Eq, 1),
            ('!', Some('=')) => (Token::Neq, 2),
            ('<', Some('=')) => (Token::Lte, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', Some('=')) => (Token::Gte, 2),
            ('>', _) => (Token::Gt, 1),
            _ => {
                return Err(FormulaError::syntax(
                    pos,
                    format!("unexpected character '{}'", c),
                ))
            }
        };
        tokens.push(Spanned { token, pos: start });
        pos += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}
