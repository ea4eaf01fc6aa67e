//! Predicate evaluation over stored rows (SQL three-valued logic)

use crate::column_type::ColumnType;
use geostrata_core::geometry::Geometry;
use geostrata_core::predicate::{like_match, Predicate};
use geostrata_core::{Datum, Error, Result};
use std::cmp::Ordering;

/// Column layout a predicate is evaluated against
pub struct RowLayout<'a> {
    columns: Vec<(&'a str, &'a ColumnType)>,
}

impl<'a> RowLayout<'a> {
    /// Layout from (name, type) pairs in row order
    pub fn new(columns: Vec<(&'a str, &'a ColumnType)>) -> Self {
        Self { columns }
    }

    fn column(&self, name: &str) -> Result<(usize, &'a ColumnType)> {
        self.columns
            .iter()
            .position(|(n, _)| *n == name)
            .map(|i| (i, self.columns[i].1))
            .ok_or_else(|| Error::not_found(format!("column \"{}\" does not exist", name)))
    }

    /// True when the predicate holds (unknown counts as false)
    pub fn matches(&self, predicate: &Predicate, row: &[Datum]) -> Result<bool> {
        Ok(self.eval(predicate, row)? == Some(true))
    }

    fn datum<'r>(&self, name: &str, row: &'r [Datum]) -> Result<(Option<&'r str>, &'a ColumnType)> {
        let (idx, ty) = self.column(name)?;
        Ok((row.get(idx).and_then(|d| d.as_deref()), ty))
    }

    /// Evaluate to `Some(bool)` or `None` for unknown
    pub fn eval(&self, predicate: &Predicate, row: &[Datum]) -> Result<Option<bool>> {
        match predicate {
            Predicate::Compare {
                column,
                op,
                literal,
            } => {
                let (datum, ty) = self.datum(column, row)?;
                let Some(datum) = datum else {
                    return Ok(None);
                };
                let ord = ty.compare_literal(datum, literal).ok_or_else(|| {
                    Error::invalid_operation(format!(
                        "cannot compare column \"{}\" of type {} with {}",
                        column,
                        ty.formatted(),
                        literal
                    ))
                })?;
                Ok(Some(op.test(ord)))
            }
            Predicate::IsNull { column, negated } => {
                let (datum, _) = self.datum(column, row)?;
                Ok(Some(datum.is_none() != *negated))
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                let (datum, ty) = self.datum(column, row)?;
                let Some(datum) = datum else {
                    return Ok(None);
                };
                let found = values
                    .iter()
                    .any(|v| ty.compare_literal(datum, v) == Some(Ordering::Equal));
                Ok(Some(found != *negated))
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
                negated,
            } => {
                let (datum, _) = self.datum(column, row)?;
                Ok(datum.map(|d| like_match(d, pattern, *case_insensitive) != *negated))
            }
            Predicate::And(terms) => {
                let mut unknown = false;
                for term in terms {
                    match self.eval(term, row)? {
                        Some(false) => return Ok(Some(false)),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                Ok(if unknown { None } else { Some(true) })
            }
            Predicate::Or(terms) => {
                let mut unknown = false;
                for term in terms {
                    match self.eval(term, row)? {
                        Some(true) => return Ok(Some(true)),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                Ok(if unknown { None } else { Some(false) })
            }
            Predicate::Not(inner) => Ok(self.eval(inner, row)?.map(|b| !b)),
            Predicate::BboxIntersects { column, rect } => {
                let (datum, _) = self.datum(column, row)?;
                let Some(datum) = datum else {
                    return Ok(None);
                };
                let geometry = Geometry::from_hex_ewkb(datum)?;
                Ok(Some(
                    geometry
                        .envelope()
                        .map_or(false, |env| env.intersects(rect)),
                ))
            }
        }
    }
}
