//! Filter and default-value expressions
//!
//! A small SQL-like language evaluated against features with three-valued
//! logic:
//!
//! ```text
//! "pk" > 2 AND lower(name) LIKE 'app%'
//! cnt BETWEEN 100 AND 300 OR name IS NULL
//! coalesce(name2, 'none') || '-' || num_char
//! ```
//!
//! Precedence, loosest first: `OR`, `AND`, `NOT`, comparisons (`= <> !=
//! < <= > >= IS IN LIKE ILIKE BETWEEN`), `||`, `+ -`, `* /`, unary minus.

use geostrata_core::predicate::like_match;
use geostrata_core::{Error, Feature, Result, Value};
use std::cmp::Ordering;
use std::fmt;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `||`
    Concat,
    /// `=`
    Eq,
    /// `<>` or `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `AND`
    And,
    /// `OR`
    Or,
}

impl BinaryOp {
    /// True for the six comparison operators
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Concat => "||",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant
    Literal(Value),
    /// Field reference
    Column(String),
    /// Arithmetic negation
    Neg(Box<Expr>),
    /// Logical negation
    Not(Box<Expr>),
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// `expr IS [NOT] NULL`
    IsNull {
        /// Tested expression
        expr: Box<Expr>,
        /// `IS NOT NULL`
        negated: bool,
    },
    /// `expr [NOT] IN (list)`
    In {
        /// Tested expression
        expr: Box<Expr>,
        /// Candidates
        list: Vec<Expr>,
        /// `NOT IN`
        negated: bool,
    },
    /// `expr [NOT] LIKE|ILIKE pattern`
    Like {
        /// Tested expression
        expr: Box<Expr>,
        /// Pattern expression
        pattern: Box<Expr>,
        /// `ILIKE`
        case_insensitive: bool,
        /// `NOT LIKE`
        negated: bool,
    },
    /// `expr [NOT] BETWEEN low AND high`
    Between {
        /// Tested expression
        expr: Box<Expr>,
        /// Lower bound (inclusive)
        low: Box<Expr>,
        /// Upper bound (inclusive)
        high: Box<Expr>,
        /// `NOT BETWEEN`
        negated: bool,
    },
    /// Function call
    Function {
        /// Lower-case function name
        name: String,
        /// Arguments
        args: Vec<Expr>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Expr::Literal(Value::Null) | Expr::Literal(Value::Unset) => write!(f, "NULL"),
            Expr::Literal(Value::Bool(b)) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Column(c) => write!(f, "\"{}\"", c.replace('"', "\"\"")),
            Expr::Neg(e) => write!(f, "-({})", e),
            Expr::Not(e) => write!(f, "NOT ({})", e),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::IsNull { expr, negated } => {
                write!(f, "({} IS {}NULL)", expr, if *negated { "NOT " } else { "" })
            }
            Expr::In { expr, list, negated } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(f, "({} {}IN ({}))", expr, if *negated { "NOT " } else { "" }, items.join(", "))
            }
            Expr::Like {
                expr,
                pattern,
                case_insensitive,
                negated,
            } => write!(
                f,
                "({} {}{} {})",
                expr,
                if *negated { "NOT " } else { "" },
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                pattern
            ),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "({} {}BETWEEN {} AND {})",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expr::Function { name, args } => {
                let items: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{}({})", name, items.join(", "))
            }
        }
    }
}

/// Parsed expression with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    root: Expr,
}

impl Expression {
    /// Parse expression text
    ///
    /// # Errors
    ///
    /// `Parse` with the offending position for malformed input.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::parse(format!(
                "unexpected {:?} in expression '{}'",
                parser.tokens[parser.pos], text
            )));
        }
        Ok(Expression {
            text: text.to_string(),
            root,
        })
    }

    /// Source text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Expression tree
    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Field names referenced anywhere in the expression
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_columns(&self.root, &mut out);
        out
    }

    /// Evaluate against a feature
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown fields, `InvalidOperation` for type errors
    /// and unknown functions.
    pub fn evaluate(&self, feature: &Feature) -> Result<Value> {
        eval(&self.root, feature)
    }

    /// Evaluate as a filter; NULL counts as false
    pub fn matches(&self, feature: &Feature) -> Result<bool> {
        Ok(truth(&self.evaluate(feature)?)?.unwrap_or(false))
    }
}

fn collect_columns(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Column(c) => {
            if !out.contains(c) {
                out.push(c.clone());
            }
        }
        Expr::Neg(e) | Expr::Not(e) | Expr::IsNull { expr: e, .. } => collect_columns(e, out),
        Expr::Binary { left, right, .. } => {
            collect_columns(left, out);
            collect_columns(right, out);
        }
        Expr::In { expr, list, .. } => {
            collect_columns(expr, out);
            list.iter().for_each(|e| collect_columns(e, out));
        }
        Expr::Like { expr, pattern, .. } => {
            collect_columns(expr, out);
            collect_columns(pattern, out);
        }
        Expr::Between { expr, low, high, .. } => {
            collect_columns(expr, out);
            collect_columns(low, out);
            collect_columns(high, out);
        }
        Expr::Function { args, .. } => args.iter().for_each(|e| collect_columns(e, out)),
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    QuotedIdent(String),
    Symbol(&'static str),
    LParen,
    RParen,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let (s, next) = read_quoted(&chars, i, c)?;
                tokens.push(if c == '\'' { Token::Str(s) } else { Token::QuotedIdent(s) });
                i = next;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                let mut float = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    float |= chars[i] == '.';
                    i += 1;
                }
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    float = true;
                    i += 1;
                    if i < chars.len() && matches!(chars[i], '+' | '-') {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let s: String = chars[start..i].iter().collect();
                let bad = || Error::parse(format!("invalid number '{}' at {}", s, start));
                tokens.push(if float {
                    Token::Float(s.parse().map_err(|_| bad())?)
                } else {
                    match s.parse::<i64>() {
                        Ok(v) => Token::Int(v),
                        Err(_) => Token::Float(s.parse().map_err(|_| bad())?),
                    }
                });
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let symbol = match two.as_str() {
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    "<>" => Some("<>"),
                    "!=" => Some("<>"),
                    "||" => Some("||"),
                    _ => None,
                };
                if let Some(s) = symbol {
                    tokens.push(Token::Symbol(s));
                    i += 2;
                    continue;
                }
                let symbol = match c {
                    '=' => "=",
                    '<' => "<",
                    '>' => ">",
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    _ => return Err(Error::parse(format!("unexpected character '{}' at {}", c, i))),
                };
                tokens.push(Token::Symbol(symbol));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// Quoted string or identifier; the quote is escaped by doubling it
fn read_quoted(chars: &[char], start: usize, quote: char) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return Ok((out, i + 1));
        }
        out.push(chars[i]);
        i += 1;
    }
    Err(Error::parse(format!("unterminated quote starting at {}", start)))
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        self.peek_keyword_at(0, kw)
    }

    fn peek_keyword_at(&self, offset: usize, kw: &str) -> bool {
        matches!(self.tokens.get(self.pos + offset), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_symbol(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(Error::parse(format!("expected {:?}, found {:?}", token, other))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_concat()?;

        let op = match self.peek() {
            Some(Token::Symbol("=")) => Some(BinaryOp::Eq),
            Some(Token::Symbol("<>")) => Some(BinaryOp::Ne),
            Some(Token::Symbol("<")) => Some(BinaryOp::Lt),
            Some(Token::Symbol("<=")) => Some(BinaryOp::Le),
            Some(Token::Symbol(">")) => Some(BinaryOp::Gt),
            Some(Token::Symbol(">=")) => Some(BinaryOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.parse_concat()?;
            return Ok(binary(op, left, right));
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err(Error::parse("expected NULL after IS"));
            }
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = if self.peek_keyword("NOT")
            && (self.peek_keyword_at(1, "IN")
                || self.peek_keyword_at(1, "LIKE")
                || self.peek_keyword_at(1, "ILIKE")
                || self.peek_keyword_at(1, "BETWEEN"))
        {
            self.pos += 1;
            true
        } else {
            false
        };

        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let mut list = vec![self.parse_or()?];
            while matches!(self.peek(), Some(Token::Comma)) {
                self.pos += 1;
                list.push(self.parse_or()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::In {
                expr: Box::new(left),
                list,
                negated,
            });
        }
        for (kw, case_insensitive) in [("LIKE", false), ("ILIKE", true)] {
            if self.eat_keyword(kw) {
                let pattern = self.parse_concat()?;
                return Ok(Expr::Like {
                    expr: Box::new(left),
                    pattern: Box::new(pattern),
                    case_insensitive,
                    negated,
                });
            }
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.parse_concat()?;
            if !self.eat_keyword("AND") {
                return Err(Error::parse("expected AND in BETWEEN"));
            }
            let high = self.parse_concat()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        while self.eat_symbol("||") {
            let right = self.parse_additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Mul
            } else if self.eat_symbol("/") {
                BinaryOp::Div
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_symbol("-") {
            return Ok(match self.parse_unary()? {
                Expr::Literal(Value::Int(v)) => Expr::Literal(Value::Int(-v)),
                Expr::Literal(Value::LongLong(v)) => Expr::Literal(int_value(-(v as i128))),
                Expr::Literal(Value::Double(v)) => Expr::Literal(Value::Double(-v)),
                other => Expr::Neg(Box::new(other)),
            });
        }
        if self.eat_symbol("+") {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Expr::Literal(int_value(v as i128))),
            Some(Token::Float(v)) => Ok(Expr::Literal(Value::Double(v))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::QuotedIdent(s)) => Ok(Expr::Column(s)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => {
                let upper = word.to_ascii_uppercase();
                match upper.as_str() {
                    "NULL" => return Ok(Expr::Literal(Value::Null)),
                    "TRUE" => return Ok(Expr::Literal(Value::Bool(true))),
                    "FALSE" => return Ok(Expr::Literal(Value::Bool(false))),
                    "AND" | "OR" | "NOT" | "IS" | "IN" | "LIKE" | "ILIKE" | "BETWEEN" => {
                        return Err(Error::parse(format!("unexpected keyword {}", upper)))
                    }
                    _ => {}
                }
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        args.push(self.parse_or()?);
                        while matches!(self.peek(), Some(Token::Comma)) {
                            self.pos += 1;
                            args.push(self.parse_or()?);
                        }
                    }
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Function {
                        name: word.to_ascii_lowercase(),
                        args,
                    });
                }
                Ok(Expr::Column(word))
            }
            other => Err(Error::parse(format!("unexpected {:?}", other))),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn int_value(v: i128) -> Value {
    match i32::try_from(v) {
        Ok(i) => Value::Int(i),
        Err(_) => match i64::try_from(v) {
            Ok(l) => Value::LongLong(l),
            Err(_) => Value::Double(v as f64),
        },
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Three-valued truth of a value: `None` is NULL
fn truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null | Value::Unset => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Int(_) | Value::LongLong(_) | Value::Double(_) => Ok(value.as_f64().map(|v| v != 0.0)),
        other => Err(Error::invalid_operation(format!(
            "cannot use {} as a boolean",
            other.type_name()
        ))),
    }
}

fn tri(b: Option<bool>) -> Value {
    b.map_or(Value::Null, Value::Bool)
}

fn eval(expr: &Expr, feature: &Feature) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column(name) => {
            let fields = feature.fields();
            let index = fields
                .lookup_field(name)
                .ok_or_else(|| Error::not_found(format!("field \"{}\" not found", name)))?;
            Ok(match feature.attribute(index) {
                Some(Value::Unset) | None => Value::Null,
                Some(v) => v.clone(),
            })
        }
        Expr::Neg(e) => match eval(e, feature)? {
            Value::Null | Value::Unset => Ok(Value::Null),
            Value::Int(v) => Ok(int_value(-(v as i128))),
            Value::LongLong(v) => Ok(int_value(-(v as i128))),
            Value::Double(v) => Ok(Value::Double(-v)),
            other => Err(Error::invalid_operation(format!("cannot negate {}", other.type_name()))),
        },
        Expr::Not(e) => Ok(tri(truth(&eval(e, feature)?)?.map(|b| !b))),
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = truth(&eval(left, feature)?)?;
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let r = truth(&eval(right, feature)?)?;
                Ok(match (l, r) {
                    (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                })
            }
            BinaryOp::Or => {
                let l = truth(&eval(left, feature)?)?;
                if l == Some(true) {
                    return Ok(Value::Bool(true));
                }
                let r = truth(&eval(right, feature)?)?;
                Ok(match (l, r) {
                    (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                })
            }
            _ => {
                let l = eval(left, feature)?;
                let r = eval(right, feature)?;
                binary_value(*op, &l, &r)
            }
        },
        Expr::IsNull { expr, negated } => {
            let v = eval(expr, feature)?;
            Ok(Value::Bool(v.is_empty() != *negated))
        }
        Expr::In { expr, list, negated } => {
            let v = eval(expr, feature)?;
            if v.is_empty() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for candidate in list {
                let c = eval(candidate, feature)?;
                match compare_values(&v, &c) {
                    _ if c.is_empty() => saw_null = true,
                    Some(Ordering::Equal) => return Ok(Value::Bool(!negated)),
                    _ => {}
                }
            }
            Ok(if saw_null { Value::Null } else { Value::Bool(*negated) })
        }
        Expr::Like {
            expr,
            pattern,
            case_insensitive,
            negated,
        } => {
            let v = eval(expr, feature)?;
            let p = eval(pattern, feature)?;
            if v.is_empty() || p.is_empty() {
                return Ok(Value::Null);
            }
            let matched = like_match(&v.to_string(), &p.to_string(), *case_insensitive);
            Ok(Value::Bool(matched != *negated))
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let v = eval(expr, feature)?;
            let ge = binary_value(BinaryOp::Ge, &v, &eval(low, feature)?)?;
            let le = binary_value(BinaryOp::Le, &v, &eval(high, feature)?)?;
            let inside = match (truth(&ge)?, truth(&le)?) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            Ok(tri(inside.map(|b| b != *negated)))
        }
        Expr::Function { name, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, feature))
                .collect::<Result<Vec<_>>>()?;
            call_function(name, &values)
        }
    }
}

/// Compare two values, coercing numeric and temporal text when the other
/// side needs it
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let Some(ord) = a.compare(b) {
        return Some(ord);
    }
    match (a, b) {
        (Value::String(s), other) if other.as_f64().is_some() && !matches!(other, Value::Bool(_)) => {
            s.trim().parse::<f64>().ok()?.partial_cmp(&other.as_f64()?)
        }
        (other, Value::String(_)) if other.as_f64().is_some() && !matches!(other, Value::Bool(_)) => {
            compare_values(b, a).map(Ordering::reverse)
        }
        (Value::String(s), Value::Date(_)) => Value::Date(chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()?).compare(b),
        (Value::String(s), Value::Time(_)) => {
            Value::Time(chrono::NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok()?).compare(b)
        }
        (Value::String(s), Value::DateTime(_)) => Value::DateTime(
            chrono::NaiveDateTime::parse_from_str(&s.trim().replacen('T', " ", 1), "%Y-%m-%d %H:%M:%S%.f").ok()?,
        )
        .compare(b),
        (Value::Date(_) | Value::Time(_) | Value::DateTime(_), Value::String(_)) => {
            compare_values(b, a).map(Ordering::reverse)
        }
        _ => None,
    }
}

fn binary_value(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    if l.is_empty() || r.is_empty() {
        return Ok(Value::Null);
    }
    if op.is_comparison() {
        let ord = compare_values(l, r).ok_or_else(|| {
            Error::invalid_operation(format!("cannot compare {} with {}", l.type_name(), r.type_name()))
        })?;
        let result = match op {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::Ne => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::Le => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        };
        return Ok(Value::Bool(result));
    }
    if op == BinaryOp::Concat {
        return Ok(Value::String(format!("{}{}", l, r)));
    }
    if let (Value::String(a), Value::String(b), BinaryOp::Add) = (l, r, op) {
        return Ok(Value::String(format!("{}{}", a, b)));
    }

    let integral = |v: &Value| matches!(v, Value::Int(_) | Value::LongLong(_));
    let type_error = || {
        Error::invalid_operation(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ))
    };
    if integral(l) && integral(r) && op != BinaryOp::Div {
        let (a, b) = (l.as_i64().ok_or_else(type_error)? as i128, r.as_i64().ok_or_else(type_error)? as i128);
        let v = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            _ => a * b,
        };
        return Ok(int_value(v));
    }
    let a = numeric(l).ok_or_else(type_error)?;
    let b = numeric(r).ok_or_else(type_error)?;
    Ok(match op {
        BinaryOp::Add => Value::Double(a + b),
        BinaryOp::Sub => Value::Double(a - b),
        BinaryOp::Mul => Value::Double(a * b),
        _ if b == 0.0 => Value::Null,
        _ => Value::Double(a / b),
    })
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Bool(_) => None,
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

fn call_function(name: &str, args: &[Value]) -> Result<Value> {
    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::invalid_operation(format!(
                "{}() takes {} argument(s), got {}",
                name,
                n,
                args.len()
            )))
        }
    };
    match name {
        "lower" | "upper" | "length" => {
            arity(1)?;
            if args[0].is_empty() {
                return Ok(Value::Null);
            }
            let s = args[0].to_string();
            Ok(match name {
                "lower" => Value::String(s.to_lowercase()),
                "upper" => Value::String(s.to_uppercase()),
                _ => Value::Int(s.chars().count() as i32),
            })
        }
        "coalesce" => Ok(args.iter().find(|v| !v.is_empty()).cloned().unwrap_or(Value::Null)),
        "abs" => {
            arity(1)?;
            match &args[0] {
                Value::Int(v) => Ok(int_value((*v as i128).abs())),
                Value::LongLong(v) => Ok(int_value((*v as i128).abs())),
                Value::Double(v) => Ok(Value::Double(v.abs())),
                v if v.is_empty() => Ok(Value::Null),
                other => Err(Error::invalid_operation(format!("abs() of {}", other.type_name()))),
            }
        }
        "round" => {
            if args.is_empty() || args.len() > 2 {
                return Err(Error::invalid_operation("round() takes 1 or 2 arguments"));
            }
            if args.iter().any(Value::is_empty) {
                return Ok(Value::Null);
            }
            let v = numeric(&args[0])
                .ok_or_else(|| Error::invalid_operation(format!("round() of {}", args[0].type_name())))?;
            match args.get(1) {
                None => Ok(int_value(v.round() as i128)),
                Some(places) => {
                    let places = places
                        .as_i64()
                        .ok_or_else(|| Error::invalid_operation("round() places must be an integer"))?;
                    let factor = 10f64.powi(places as i32);
                    Ok(Value::Double((v * factor).round() / factor))
                }
            }
        }
        other => Err(Error::invalid_operation(format!("unknown function {}()", other))),
    }
}
