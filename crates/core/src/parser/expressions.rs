use super::{keyword, Parser};
use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::FormulaError;
use crate::lexer::Token;
use crate::numeric;

impl<'a> Parser<'a> {
    // -- Binary levels, lowest precedence first -----------------

    pub(super) fn parse_expr(&mut self) -> Result<Expr, FormulaError> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_and_expr()?;
        while self.is_keyword("OR") {
            self.advance();
            let right = self.parse_and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_comparison()?;
        while self.is_keyword("AND") {
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Neq => BinaryOp::Neq,
                Token::Lt => BinaryOp::Lt,
                Token::Lte => BinaryOp::Lte,
                Token::Gt => BinaryOp::Gt,
                Token::Gte => BinaryOp::Gte,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_power()?;
            left = binary(op, left, right);
        }
    }

    /// Right-associative: `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`.
    fn parse_power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.parse_unary()?;
        if self.peek() == &Token::Caret {
            self.advance();
            let exponent = self.parse_power()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        if self.is_keyword("NOT") {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        if self.peek() == &Token::Minus {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    // -- Primary forms -------------------------------------------

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek().clone() {
            Token::Number(text) => {
                let d = numeric::parse_decimal(&text)
                    .ok_or_else(|| self.err(format!("number {} is out of range", text)))?;
                self.advance();
                Ok(Expr::Number(d))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            Token::LParen => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(e)
            }
            Token::Word(w) => self.parse_word(&w),
            other => Err(self.err(format!("expected a value, got {}", other.describe()))),
        }
    }

    fn parse_word(&mut self, word: &str) -> Result<Expr, FormulaError> {
        let followed_by_paren = self.peek_next() == &Token::LParen;
        match keyword(word) {
            Some("TRUE") => {
                self.advance();
                return Ok(Expr::Boolean(true));
            }
            Some("FALSE") => {
                self.advance();
                return Ok(Expr::Boolean(false));
            }
            Some("IF") if !followed_by_paren => return self.parse_if_then_else(),
            Some("IF") => {}
            Some(kw) => return Err(self.err(format!("unexpected keyword {}", kw))),
            None => {}
        }

        if followed_by_paren {
            return self.parse_call(word);
        }
        let expr = self.reference(word)?;
        self.advance();
        Ok(expr)
    }

    /// `IF cond THEN a ELSE b` is sugar for `IF(cond, a, b)`.
    fn parse_if_then_else(&mut self) -> Result<Expr, FormulaError> {
        let start = self.cur_pos();
        self.advance();
        let cond = self.parse_expr()?;
        self.expect_keyword("THEN")?;
        let then_branch = self.parse_expr()?;
        self.expect_keyword("ELSE")?;
        let else_branch = self.parse_expr()?;
        self.finish_call(start, "IF", vec![cond, then_branch, else_branch])
    }

    fn parse_call(&mut self, word: &str) -> Result<Expr, FormulaError> {
        let start = self.cur_pos();
        if super::casing(word) != super::Casing::Upper {
            return Err(self.err(format!(
                "function names are upper-case: '{}' cannot be called",
                word
            )));
        }
        self.advance(); // name
        self.advance(); // '('
        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                args.push(self.parse_expr()?);
                if self.peek() == &Token::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect_rparen()?;
        self.finish_call(start, word, args)
    }

    fn finish_call(
        &self,
        start: usize,
        word: &str,
        args: Vec<Expr>,
    ) -> Result<Expr, FormulaError> {
        let def = self.options.functions.get(word).ok_or_else(|| {
            FormulaError::name(word, format!("unknown function '{}'", word))
        })?;
        if !def.arity.accepts(args.len()) {
            return Err(FormulaError::syntax(
                start,
                format!("{} expects {}, got {}", def.name, def.arity, args.len()),
            ));
        }
        Ok(Expr::Call {
            name: def.name.clone(),
            args,
        })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
