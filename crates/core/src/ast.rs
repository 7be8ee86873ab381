//! Expression tree produced by the parser.
//!
//! Nodes are immutable and own their children. Evaluation reads from a
//! [`Scope`] and never writes to the tree.

use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;

use crate::error::FormulaError;
use crate::functions::CallContext;
use crate::numeric;
use crate::scope::Scope;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }

    fn apply(self, left: &Value, right: &Value) -> Result<Value, FormulaError> {
        match self {
            BinaryOp::Or => left.or(right),
            BinaryOp::And => left.and(right),
            BinaryOp::Eq => Ok(Value::Boolean(left.loose_eq(right))),
            BinaryOp::Neq => Ok(Value::Boolean(!left.loose_eq(right))),
            BinaryOp::Lt => left.lt(right),
            BinaryOp::Lte => left.lte(right),
            BinaryOp::Gt => left.gt(right),
            BinaryOp::Gte => left.gte(right),
            BinaryOp::Add => left.add(right),
            BinaryOp::Sub => left.sub(right),
            BinaryOp::Mul => left.mul(right),
            BinaryOp::Div => left.div(right),
            BinaryOp::Pow => left.pow(right),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// How a lower-case group reference selects its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupSelector {
    /// `group1`, `group2`, ... (1-based)
    Index(usize),
    /// The declared group name, lower-cased.
    Named(String),
}

/// A name in an expression, classified once at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    /// A CamelCase component: a raw input or another rule's output.
    Component(String),
    /// Cumulative sum of a group tier.
    Group(GroupSelector),
    /// `<flag>_group`: sum of all components carrying `flag`.
    ToggleGroup(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Component(name) => write!(f, "{}", name),
            Reference::Group(GroupSelector::Index(n)) => write!(f, "group{}", n),
            Reference::Group(GroupSelector::Named(name)) => write!(f, "{}", name),
            Reference::ToggleGroup(flag) => write!(f, "{}_group", flag),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Decimal),
    Boolean(bool),
    String(String),
    Ref(Reference),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `name` is the canonical upper-case function name.
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Evaluate against a scope.
    ///
    /// Unknown component references read as zero. Function arguments are
    /// all evaluated before the call, including both branches of `IF`, so a
    /// table lookup in the branch that is not taken still runs.
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Value, FormulaError> {
        match self {
            Expr::Number(d) => Ok(Value::Number(*d)),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Ref(reference) => Ok(scope.env.resolve(reference)?.unwrap_or_else(Value::zero)),
            Expr::Binary { op, left, right } => {
                let l = left.evaluate(scope)?;
                let r = right.evaluate(scope)?;
                op.apply(&l, &r)
            }
            Expr::Unary { op, operand } => {
                let v = operand.evaluate(scope)?;
                match op {
                    UnaryOp::Not => v.not(),
                    UnaryOp::Neg => v.neg(),
                }
            }
            Expr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let ctx = CallContext {
                    tables: scope.tables,
                };
                scope.functions.call(name, &values, &ctx)
            }
        }
    }

    /// Visit every reference in source order (duplicates included).
    pub fn walk_references<'e>(&'e self, visit: &mut dyn FnMut(&'e Reference)) {
        match self {
            Expr::Ref(r) => visit(r),
            Expr::Binary { left, right, .. } => {
                left.walk_references(visit);
                right.walk_references(visit);
            }
            Expr::Unary { operand, .. } => operand.walk_references(visit),
            Expr::Call { args, .. } => {
                for a in args {
                    a.walk_references(visit);
                }
            }
            Expr::Number(_) | Expr::Boolean(_) | Expr::String(_) => {}
        }
    }

    /// Distinct references, sorted.
    pub fn references(&self) -> BTreeSet<Reference> {
        let mut out = BTreeSet::new();
        self.walk_references(&mut |r| {
            out.insert(r.clone());
        });
        out
    }

    /// Distinct CamelCase component names, sorted.
    pub fn component_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk_references(&mut |r| {
            if let Reference::Component(name) = r {
                out.insert(name.clone());
            }
        });
        out
    }

    /// True when any call in the tree targets `function` (upper-case).
    pub fn calls(&self, function: &str) -> bool {
        match self {
            Expr::Call { name, args } => name == function || args.iter().any(|a| a.calls(function)),
            Expr::Binary { left, right, .. } => left.calls(function) || right.calls(function),
            Expr::Unary { operand, .. } => operand.calls(function),
            Expr::Number(_) | Expr::Boolean(_) | Expr::String(_) | Expr::Ref(_) => false,
        }
    }
}

/// Fully parenthesized rendering; shows exactly how precedence resolved.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(d) => write!(f, "{}", numeric::normalize(*d)),
            Expr::Boolean(true) => write!(f, "TRUE"),
            Expr::Boolean(false) => write!(f, "FALSE"),
            Expr::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Expr::Ref(r) => write!(f, "{}", r),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => write!(f, "(NOT {})", operand),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => write!(f, "(-{})", operand),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}
