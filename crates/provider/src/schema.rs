//! Schema and constraint introspection
//!
//! Store-side constraints and default clauses of a source's fields. Field
//! indexes are signed here so callers can probe out-of-range positions;
//! those simply report no constraints and no default.

use crate::codec;
use crate::config::DefaultsMode;
use crate::source::FeatureSource;
use geostrata_core::{Constraint, ConstraintOrigin, FieldConstraints, Result, Value};
use tracing::debug;

impl FeatureSource {
    /// Defaults mode the connection was configured with
    pub fn configured_defaults_mode(&self) -> DefaultsMode {
        self.connection().config().defaults_mode().unwrap_or_default()
    }

    /// Store constraints of a field; empty for an invalid source or an
    /// index out of range
    pub fn field_constraints(&self, index: i64) -> FieldConstraints {
        self.fields()
            .at(index)
            .map(|f| f.constraints.clone())
            .unwrap_or_default()
    }

    /// Where a field's constraint comes from, if the field has it
    pub fn field_constraint_origin(&self, index: i64, constraint: Constraint) -> Option<ConstraintOrigin> {
        self.field_constraints(index).origin(constraint)
    }

    /// Default clause text of a field as the store declares it
    ///
    /// Only exposed under `Defer`: under `Evaluate` the client never sees
    /// clause text, only evaluated values.
    pub fn default_value_clause(&self, index: i64, mode: DefaultsMode) -> Option<String> {
        if mode == DefaultsMode::Evaluate {
            return None;
        }
        self.declared_default(index)
    }

    /// Evaluated default of a field
    ///
    /// Under `Evaluate` the store evaluates the clause now; a sequence
    /// default consumes a value. Under `Defer`, and for fields without a
    /// default, the result is `Null`.
    ///
    /// # Errors
    ///
    /// `InvalidSource` for an invalid source, or the store's evaluation
    /// error.
    pub fn default_value(&self, index: i64, mode: DefaultsMode) -> Result<Value> {
        let state = self.state()?;
        if mode == DefaultsMode::Defer || self.declared_default(index).is_none() {
            return Ok(Value::Null);
        }
        let layout = state.layout();
        let (Some(field), Some(column)) = (
            layout.fields.at(index),
            usize::try_from(index).ok().and_then(|i| layout.column_name(i)),
        ) else {
            return Ok(Value::Null);
        };
        let datum = self.connection().storage().evaluate_default(&state.relation, column)?;
        debug!(
            target: "geostrata::provider",
            relation = %state.relation,
            column,
            value = ?datum,
            "Default evaluated"
        );
        codec::decode(field, &datum)
    }

    /// True when a value must not be checked against `constraint` on the
    /// client because the store will supply the real value
    ///
    /// Under `Evaluate` every field with a default is skipped. Under `Defer`
    /// only the exact clause text, used as a placeholder, is skipped.
    ///
    /// The answer is the same for every `Constraint`: the value the store
    /// supplies replaces `value` before not-null or unique is enforced.
    pub fn skip_constraint_check(&self, index: i64, _constraint: Constraint, value: &Value, mode: DefaultsMode) -> bool {
        let Some(clause) = self.declared_default(index) else {
            return false;
        };
        match mode {
            DefaultsMode::Evaluate => true,
            DefaultsMode::Defer => matches!(value, Value::String(s) if *s == clause),
        }
    }

    fn declared_default(&self, index: i64) -> Option<String> {
        let state = self.state().ok()?;
        let layout = state.layout();
        let column = *layout.columns.get(usize::try_from(index).ok()?)?;
        layout.info.columns.get(column)?.default_expr.clone()
    }
}
