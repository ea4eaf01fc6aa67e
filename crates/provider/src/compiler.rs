//! Expression → store predicate compiler
//!
//! Only the subset whose store evaluation is known to agree with client
//! evaluation is translated: field-versus-literal comparisons of matching
//! types, `IN` lists, `LIKE`/`ILIKE` on text fields, `IS NULL` and the
//! boolean connectives over those. Anything else stays on the client.
//!
//! A conjunction may compile partially: the translated terms narrow the
//! store scan and the whole expression is re-checked on every returned
//! feature.

use crate::expression::{BinaryOp, Expr, Expression};
use geostrata_core::{CompareOp, Field, FieldType, Fields, Literal, Predicate, Value};

/// Outcome of compiling an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Compiled {
    /// The predicate is exactly the expression
    Complete(Predicate),
    /// The predicate selects a superset; re-check on the client
    Partial(Predicate),
    /// Nothing could be translated
    None,
}

impl Compiled {
    /// Predicate to push to the store, if any
    pub fn predicate(&self) -> Option<&Predicate> {
        match self {
            Compiled::Complete(p) | Compiled::Partial(p) => Some(p),
            Compiled::None => None,
        }
    }

    /// True when the client must still evaluate the expression
    pub fn needs_client_check(&self) -> bool {
        !matches!(self, Compiled::Complete(_))
    }
}

/// Compile an expression against a field list
pub fn compile(expression: &Expression, fields: &Fields) -> Compiled {
    compile_expr(expression.root(), fields)
}

fn compile_expr(expr: &Expr, fields: &Fields) -> Compiled {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let mut terms = Vec::new();
            let mut complete = true;
            for side in [left, right] {
                match compile_expr(side, fields) {
                    Compiled::Complete(p) => terms.push(p),
                    Compiled::Partial(p) => {
                        complete = false;
                        terms.push(p);
                    }
                    Compiled::None => complete = false,
                }
            }
            match (terms.is_empty(), complete) {
                (true, _) => Compiled::None,
                (false, true) => Compiled::Complete(Predicate::and(terms)),
                (false, false) => Compiled::Partial(Predicate::and(terms)),
            }
        }
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => match (compile_expr(left, fields), compile_expr(right, fields)) {
            (Compiled::Complete(a), Compiled::Complete(b)) => Compiled::Complete(or(a, b)),
            (Compiled::None, _) | (_, Compiled::None) => Compiled::None,
            (a, b) => match (a.predicate(), b.predicate()) {
                (Some(a), Some(b)) => Compiled::Partial(or(a.clone(), b.clone())),
                _ => Compiled::None,
            },
        },
        Expr::Not(inner) => match compile_expr(inner, fields) {
            Compiled::Complete(p) => Compiled::Complete(Predicate::Not(Box::new(p))),
            _ => Compiled::None,
        },
        _ => match compile_leaf(expr, fields) {
            Some(p) => Compiled::Complete(p),
            None => Compiled::None,
        },
    }
}

fn or(a: Predicate, b: Predicate) -> Predicate {
    let mut terms = Vec::new();
    for p in [a, b] {
        match p {
            Predicate::Or(inner) => terms.extend(inner),
            other => terms.push(other),
        }
    }
    Predicate::Or(terms)
}

fn compile_leaf(expr: &Expr, fields: &Fields) -> Option<Predicate> {
    match expr {
        Expr::Binary { op, left, right } if op.is_comparison() => {
            let op = compare_op(*op)?;
            match (left.as_ref(), right.as_ref()) {
                (Expr::Column(c), Expr::Literal(v)) => {
                    let field = field(fields, c)?;
                    Some(Predicate::Compare {
                        column: field.name.clone(),
                        op,
                        literal: literal_for(field, v)?,
                    })
                }
                (Expr::Literal(v), Expr::Column(c)) => {
                    let field = field(fields, c)?;
                    Some(Predicate::Compare {
                        column: field.name.clone(),
                        op: op.flipped(),
                        literal: literal_for(field, v)?,
                    })
                }
                _ => None,
            }
        }
        Expr::IsNull { expr, negated } => match expr.as_ref() {
            Expr::Column(c) => Some(Predicate::IsNull {
                column: field(fields, c)?.name.clone(),
                negated: *negated,
            }),
            _ => None,
        },
        Expr::In { expr, list, negated } => {
            let field = match expr.as_ref() {
                Expr::Column(c) => field(fields, c)?,
                _ => return None,
            };
            let values = list
                .iter()
                .map(|e| match e {
                    Expr::Literal(v) => literal_for(field, v),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()?;
            Some(Predicate::In {
                column: field.name.clone(),
                values,
                negated: *negated,
            })
        }
        Expr::Like {
            expr,
            pattern,
            case_insensitive,
            negated,
        } => match (expr.as_ref(), pattern.as_ref()) {
            (Expr::Column(c), Expr::Literal(Value::String(p))) => {
                let field = field(fields, c)?;
                if !plain_text(field) {
                    return None;
                }
                Some(Predicate::Like {
                    column: field.name.clone(),
                    pattern: p.clone(),
                    case_insensitive: *case_insensitive,
                    negated: *negated,
                })
            }
            _ => None,
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let ge = compile_leaf(
                &Expr::Binary {
                    op: BinaryOp::Ge,
                    left: expr.clone(),
                    right: low.clone(),
                },
                fields,
            )?;
            let le = compile_leaf(
                &Expr::Binary {
                    op: BinaryOp::Le,
                    left: expr.clone(),
                    right: high.clone(),
                },
                fields,
            )?;
            let both = Predicate::and(vec![ge, le]);
            Some(if *negated { Predicate::Not(Box::new(both)) } else { both })
        }
        Expr::Column(c) => {
            let field = field(fields, c)?;
            (field.field_type == FieldType::Bool).then(|| Predicate::eq(field.name.clone(), Literal::Bool(true)))
        }
        _ => None,
    }
}

fn field<'a>(fields: &'a Fields, name: &str) -> Option<&'a Field> {
    fields.lookup_field(name).and_then(|i| fields.at(i as i64))
}

fn compare_op(op: BinaryOp) -> Option<CompareOp> {
    Some(match op {
        BinaryOp::Eq => CompareOp::Eq,
        BinaryOp::Ne => CompareOp::Ne,
        BinaryOp::Lt => CompareOp::Lt,
        BinaryOp::Le => CompareOp::Le,
        BinaryOp::Gt => CompareOp::Gt,
        BinaryOp::Ge => CompareOp::Ge,
        _ => return None,
    })
}

/// Text types the store compares exactly like the client does
fn plain_text(field: &Field) -> bool {
    field.field_type == FieldType::String && matches!(field.type_name.as_str(), "text" | "varchar")
}

/// Literal for a field-versus-value comparison, `None` when the types do
/// not match
fn literal_for(field: &Field, value: &Value) -> Option<Literal> {
    match (field.field_type, value) {
        (FieldType::Int | FieldType::LongLong | FieldType::Double, Value::Int(v)) => Some(Literal::Int(*v as i64)),
        (FieldType::Int | FieldType::LongLong | FieldType::Double, Value::LongLong(v)) => Some(Literal::Int(*v)),
        (FieldType::Int | FieldType::LongLong | FieldType::Double, Value::Double(v)) => Some(Literal::Float(*v)),
        (FieldType::String, Value::String(s)) if plain_text(field) => Some(Literal::Text(s.clone())),
        (FieldType::Bool, Value::Bool(b)) => Some(Literal::Bool(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Fields {
        Fields::from_vec(vec![
            Field::new("pk", FieldType::Int, "int4"),
            Field::new("cnt", FieldType::Int, "int4"),
            Field::new("name", FieldType::String, "text"),
            Field::new("code", FieldType::String, "bpchar").with_length(3, -1),
            Field::new("flag", FieldType::Bool, "bool"),
            Field::new("dt", FieldType::Date, "date"),
        ])
    }

    fn compiled(text: &str) -> Compiled {
        compile(&Expression::parse(text).unwrap(), &fields())
    }

    #[test]
    fn test_simple_comparison_is_complete() {
        assert_eq!(
            compiled("cnt > 100"),
            Compiled::Complete(Predicate::Compare {
                column: "cnt".into(),
                op: CompareOp::Gt,
                literal: Literal::Int(100),
            })
        );
        assert_eq!(
            compiled("100 < \"CNT\""),
            Compiled::Complete(Predicate::Compare {
                column: "cnt".into(),
                op: CompareOp::Gt,
                literal: Literal::Int(100),
            })
        );
    }

    #[test]
    fn test_connectives() {
        let c = compiled("pk IN (1, 2) OR name LIKE 'A%'");
        assert!(matches!(c, Compiled::Complete(Predicate::Or(ref terms)) if terms.len() == 2));
        let c = compiled("NOT (name IS NULL) AND flag");
        assert!(matches!(c, Compiled::Complete(_)));
        assert!(matches!(compiled("cnt BETWEEN 1 AND 5"), Compiled::Complete(_)));
    }

    #[test]
    fn test_partial_conjunction() {
        let c = compiled("cnt > 100 AND lower(name) = 'apple'");
        assert_eq!(
            c,
            Compiled::Partial(Predicate::and(vec![Predicate::Compare {
                column: "cnt".into(),
                op: CompareOp::Gt,
                literal: Literal::Int(100),
            }]))
        );
        assert!(c.needs_client_check());
    }

    #[test]
    fn test_uncompilable_expressions() {
        assert_eq!(compiled("lower(name) = 'apple'"), Compiled::None);
        assert_eq!(compiled("cnt = 'x'"), Compiled::None);
        assert_eq!(compiled("code = 'abc'"), Compiled::None);
        assert_eq!(compiled("dt > '2020-01-01'"), Compiled::None);
        assert_eq!(compiled("cnt > 1 OR lower(name) = 'a'"), Compiled::None);
        assert_eq!(compiled("NOT (cnt > 1 AND lower(name) = 'a')"), Compiled::None);
        assert_eq!(compiled("missing = 1"), Compiled::None);
        assert_eq!(compiled("cnt = NULL"), Compiled::None);
    }
}
