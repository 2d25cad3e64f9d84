//! Predicate expression trees.
//!
//! Predicates are explicit tagged trees built by free functions (`eq`,
//! `and_`, ...) or by the chainable methods on [`Expr`]. The query builder
//! walks the tree for join inference before compiling it; compilation
//! pushes bound parameters and emits `$n` placeholders.

use orchard_core::{Value, quote_ident};

/// A SQL expression usable in WHERE and SET clauses.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        table: Option<String>,
        name: String,
    },

    /// Literal value, bound as a parameter
    Literal(Value),

    /// Binary operation
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Unary operation
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// Function call
    Function { name: String, args: Vec<Expr> },

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// BETWEEN expression
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// IS DISTINCT FROM / IS NOT DISTINCT FROM (NULL-safe comparison)
    IsDistinctFrom {
        left: Box<Expr>,
        right: Box<Expr>,
        negated: bool,
    },

    /// LIKE / ILIKE pattern and negations
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
        case_insensitive: bool,
    },

    /// Raw SQL fragment (escape hatch)
    Raw(String),

    /// Parenthesized expression
    Paren(Box<Expr>),

    /// COUNT(*)
    CountStar,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// Logical AND
    And,
    /// Logical OR
    Or,
    /// Regex match (~)
    Regex,
    /// Negated regex match (!~)
    NotRegex,
}

impl BinaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Regex => "~",
            BinaryOp::NotRegex => "!~",
        }
    }

    /// Whether this is a plain comparison (inspected by join inference).
    pub const fn is_comparison(self) -> bool {
        !matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Not => "NOT",
            UnaryOp::Neg => "-",
        }
    }
}

impl Expr {
    // ==================== Constructors ====================

    /// Create a column reference expression.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a NULL literal.
    pub fn null() -> Self {
        Expr::Literal(Value::Null)
    }

    /// Create a raw SQL expression (escape hatch).
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    // ==================== Comparison ====================

    /// Equal to (=)
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// Not equal to (<>)
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    /// Less than (<)
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    /// Less than or equal to (<=)
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    /// Greater than (>)
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    /// Greater than or equal to (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    /// Regex match (~)
    pub fn regex(self, pattern: impl Into<String>) -> Self {
        self.binary(BinaryOp::Regex, Expr::Literal(Value::Text(pattern.into())))
    }

    /// Negated regex match (!~)
    pub fn not_regex(self, pattern: impl Into<String>) -> Self {
        self.binary(
            BinaryOp::NotRegex,
            Expr::Literal(Value::Text(pattern.into())),
        )
    }

    // ==================== Logical ====================

    /// Logical AND
    pub fn and(self, other: Expr) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// Logical OR; both sides are parenthesized to keep precedence explicit.
    pub fn or(self, other: Expr) -> Self {
        Expr::Binary {
            left: Box::new(Expr::Paren(Box::new(self))),
            op: BinaryOp::Or,
            right: Box::new(Expr::Paren(Box::new(other))),
        }
    }

    /// Logical NOT
    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(Expr::Paren(Box::new(self))),
        }
    }

    // ==================== Null checks ====================

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// NULL-safe equality: IS NOT DISTINCT FROM
    pub fn is(self, other: impl Into<Expr>) -> Self {
        Expr::IsDistinctFrom {
            left: Box::new(self),
            right: Box::new(other.into()),
            negated: true,
        }
    }

    /// NULL-safe inequality: IS DISTINCT FROM
    pub fn is_not(self, other: impl Into<Expr>) -> Self {
        Expr::IsDistinctFrom {
            left: Box::new(self),
            right: Box::new(other.into()),
            negated: false,
        }
    }

    // ==================== Pattern matching ====================

    pub fn like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_insensitive: false,
        }
    }

    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: true,
            case_insensitive: false,
        }
    }

    pub fn ilike(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_insensitive: true,
        }
    }

    pub fn not_ilike(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: true,
            case_insensitive: true,
        }
    }

    pub fn starts_with(self, prefix: &str) -> Self {
        self.like(format!("{}%", escape_like(prefix)))
    }

    pub fn ends_with(self, suffix: &str) -> Self {
        self.like(format!("%{}", escape_like(suffix)))
    }

    pub fn contains(self, needle: &str) -> Self {
        self.like(format!("%{}%", escape_like(needle)))
    }

    // ==================== IN / BETWEEN ====================

    pub fn in_values(self, values: Vec<Expr>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values,
            negated: false,
        }
    }

    pub fn not_in_values(self, values: Vec<Expr>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values,
            negated: true,
        }
    }

    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }
    }

    pub fn not_between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: true,
        }
    }

    // ==================== Functions ====================

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn coalesce(args: Vec<Expr>) -> Self {
        Expr::func("COALESCE", args)
    }

    // ==================== SQL generation ====================

    /// Build SQL, pushing bound parameters into `params`. Placeholders are
    /// numbered `offset + position`.
    pub fn build(&self, params: &mut Vec<Value>, offset: usize) -> String {
        match self {
            Expr::Column { table, name } => {
                if let Some(t) = table {
                    format!("{}.{}", quote_ident(t), quote_ident(name))
                } else {
                    quote_ident(name)
                }
            }

            Expr::Literal(value) => {
                if matches!(value, Value::Default) {
                    "DEFAULT".to_string()
                } else {
                    params.push(value.clone());
                    format!("${}", offset + params.len())
                }
            }

            Expr::Binary { left, op, right } => {
                let left_sql = left.build(params, offset);
                let right_sql = right.build(params, offset);
                format!("{left_sql} {} {right_sql}", op.as_str())
            }

            Expr::Unary { op, expr } => {
                let expr_sql = expr.build(params, offset);
                match op {
                    UnaryOp::Not => format!("NOT {expr_sql}"),
                    UnaryOp::Neg => format!("-{expr_sql}"),
                }
            }

            Expr::Function { name, args } => {
                let arg_sqls: Vec<_> = args.iter().map(|a| a.build(params, offset)).collect();
                format!("{name}({})", arg_sqls.join(", "))
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                let expr_sql = expr.build(params, offset);
                let value_sqls: Vec<_> = values.iter().map(|v| v.build(params, offset)).collect();
                let not_str = if *negated { "NOT " } else { "" };
                format!("{expr_sql} {not_str}IN ({})", value_sqls.join(", "))
            }

            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let expr_sql = expr.build(params, offset);
                let low_sql = low.build(params, offset);
                let high_sql = high.build(params, offset);
                let not_str = if *negated { "NOT " } else { "" };
                format!("{expr_sql} {not_str}BETWEEN {low_sql} AND {high_sql}")
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build(params, offset);
                let not_str = if *negated { " NOT" } else { "" };
                format!("{expr_sql} IS{not_str} NULL")
            }

            Expr::IsDistinctFrom {
                left,
                right,
                negated,
            } => {
                let left_sql = left.build(params, offset);
                let right_sql = right.build(params, offset);
                let not_str = if *negated { " NOT" } else { "" };
                format!("{left_sql} IS{not_str} DISTINCT FROM {right_sql}")
            }

            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let expr_sql = expr.build(params, offset);
                params.push(Value::Text(pattern.clone()));
                let param = format!("${}", offset + params.len());
                let not_str = if *negated { "NOT " } else { "" };
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                format!("{expr_sql} {not_str}{op} {param}")
            }

            Expr::Raw(sql) => sql.clone(),

            Expr::Paren(expr) => {
                let expr_sql = expr.build(params, offset);
                format!("({expr_sql})")
            }

            Expr::CountStar => "COUNT(*)".to_string(),
        }
    }
}

fn escape_like(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// ==================== Free-function builders ====================

pub fn eq(left: Expr, right: impl Into<Expr>) -> Expr {
    left.eq(right)
}

pub fn ne(left: Expr, right: impl Into<Expr>) -> Expr {
    left.ne(right)
}

pub fn lt(left: Expr, right: impl Into<Expr>) -> Expr {
    left.lt(right)
}

pub fn le(left: Expr, right: impl Into<Expr>) -> Expr {
    left.le(right)
}

pub fn gt(left: Expr, right: impl Into<Expr>) -> Expr {
    left.gt(right)
}

pub fn ge(left: Expr, right: impl Into<Expr>) -> Expr {
    left.ge(right)
}

pub fn and_(left: Expr, right: Expr) -> Expr {
    left.and(right)
}

pub fn or_(left: Expr, right: Expr) -> Expr {
    left.or(right)
}

pub fn not_(expr: Expr) -> Expr {
    expr.not()
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

impl From<i16> for Expr {
    fn from(n: i16) -> Self {
        Expr::Literal(Value::SmallInt(n))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::BigInt(n))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Literal(Value::Double(n))
    }
}
