//! Recursive-descent parser from formula text to [`Expr`].
//!
//! Parsing either yields a complete tree or an error; there is no partial
//! result. Identifier casing decides what a name means:
//!
//! - `ALL_CAPS(` is a function call (the function must be registered)
//! - `CamelCase` or a single upper-case letter is a component reference
//! - `lower_case` is a group reference (`group2`, `pension_group`, `base`)
//!
//! Anything else is a syntax error.
//!
//! `AND OR NOT IF THEN ELSE TRUE FALSE` are keywords when written all
//! upper-case or all lower-case. Other spellings are ordinary identifiers,
//! so `If` or `Else` are CamelCase component names.

use std::collections::BTreeSet;

use crate::ast::{Expr, GroupSelector, Reference};
use crate::error::FormulaError;
use crate::functions::FunctionRegistry;
use crate::lexer::{self, Spanned, Token};

mod expressions;

/// What the parser binds names against.
#[derive(Clone, Copy)]
pub struct ParseOptions<'a> {
    /// When non-empty, every CamelCase reference must be in this set.
    /// When empty, only syntax is checked.
    pub known_components: &'a BTreeSet<String>,
    pub functions: &'a FunctionRegistry,
}

/// Parse `src` with component binding as described by `options`.
pub fn parse(src: &str, options: &ParseOptions<'_>) -> Result<Expr, FormulaError> {
    let tokens = lexer::lex(src)?;
    let mut parser = Parser::new(&tokens, options);
    let expr = parser.parse_expr()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.err(format!(
            "unexpected {} after end of expression",
            parser.peek().describe()
        )));
    }
    Ok(expr)
}

/// Syntax-only parse: any CamelCase component name is accepted.
pub fn parse_syntax(src: &str, functions: &FunctionRegistry) -> Result<Expr, FormulaError> {
    let none = BTreeSet::new();
    parse(
        src,
        &ParseOptions {
            known_components: &none,
            functions,
        },
    )
}

// ──────────────────────────────────────────────
// Identifier classification
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Casing {
    /// Upper-case letters, digits and underscores only.
    Upper,
    /// Starts upper-case and has a lower-case letter later.
    Camel,
    /// No upper-case letters at all.
    Lower,
    Mixed,
}

fn casing(word: &str) -> Casing {
    let first = word.chars().next().unwrap_or('_');
    let has_upper = word.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = word.chars().any(|c| c.is_ascii_lowercase());
    if first.is_ascii_uppercase() {
        if has_lower {
            Casing::Camel
        } else {
            Casing::Upper
        }
    } else if !has_upper {
        Casing::Lower
    } else {
        Casing::Mixed
    }
}

const KEYWORDS: &[&str] = &["AND", "OR", "NOT", "IF", "THEN", "ELSE", "TRUE", "FALSE"];

fn keyword(word: &str) -> Option<&'static str> {
    let single_case = word == word.to_ascii_uppercase() || word == word.to_ascii_lowercase();
    if !single_case {
        return None;
    }
    KEYWORDS
        .iter()
        .copied()
        .find(|k| k.eq_ignore_ascii_case(word))
}

/// Classify a lower-case identifier as a group reference.
fn group_reference(word: &str) -> Result<Reference, String> {
    if let Some(digits) = word.strip_prefix("group") {
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            let n: usize = digits
                .parse()
                .map_err(|_| format!("group number in '{}' is too large", word))?;
            if n == 0 {
                return Err(format!("'{}': group numbers start at 1", word));
            }
            return Ok(Reference::Group(GroupSelector::Index(n)));
        }
    }
    if let Some(flag) = word.strip_suffix("_group") {
        if !flag.is_empty() {
            return Ok(Reference::ToggleGroup(flag.to_owned()));
        }
    }
    Ok(Reference::Group(GroupSelector::Named(word.to_owned())))
}

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    options: &'a ParseOptions<'a>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], options: &'a ParseOptions<'a>) -> Self {
        Parser {
            tokens,
            pos: 0,
            options,
        }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn peek_next(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].token
    }

    fn cur_pos(&self) -> usize {
        self.cur().pos
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn err(&self, msg: impl Into<String>) -> FormulaError {
        FormulaError::syntax(self.cur_pos(), msg)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Word(w) if keyword(w) == Some(kw))
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), FormulaError> {
        if self.is_keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {}, got {}", kw, self.peek().describe())))
        }
    }

    fn expect_rparen(&mut self) -> Result<(), FormulaError> {
        if self.peek() == &Token::RParen {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected ')', got {}", self.peek().describe())))
        }
    }

    /// Resolve a non-keyword identifier that is not followed by `(`.
    fn reference(&self, word: &str) -> Result<Expr, FormulaError> {
        match casing(word) {
            Casing::Camel => self.component(word),
            Casing::Upper if word.len() == 1 => self.component(word),
            Casing::Upper if self.options.functions.contains(word) => Err(self.err(format!(
                "function {} must be called with parentheses",
                word
            ))),
            Casing::Upper => Err(self.err(format!(
                "upper-case name '{}' is reserved for functions; components are CamelCase",
                word
            ))),
            Casing::Lower => group_reference(word)
                .map(Expr::Ref)
                .map_err(|msg| self.err(msg)),
            Casing::Mixed => Err(self.err(format!(
                "identifier '{}' must be CamelCase (component), ALL_CAPS (function) \
                 or lower-case (group)",
                word
            ))),
        }
    }

    fn component(&self, word: &str) -> Result<Expr, FormulaError> {
        let known = self.options.known_components;
        if !known.is_empty() && !known.contains(word) {
            return Err(FormulaError::name(
                word,
                format!("unknown component '{}'", word),
            ));
        }
        Ok(Expr::Ref(Reference::Component(word.to_owned())))
    }
}
