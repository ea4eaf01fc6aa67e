//! Feature requests

use crate::expression::Expression;
use geostrata_core::{FeatureId, Fields, Rect, Result};
use std::collections::BTreeSet;

/// Which features a request selects
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestFilter {
    /// Every feature
    #[default]
    None,
    /// One feature id
    Fid(FeatureId),
    /// A set of feature ids
    Fids(BTreeSet<FeatureId>),
    /// Features for which the expression is true
    Expression(Expression),
}

/// Options for `FeatureSource::get_features`
///
/// # Example
///
/// ```ignore
/// let request = FeatureRequest::new()
///     .with_filter_expression("\"cnt\" > 100")?
///     .with_subset(vec![0, 2])
///     .no_geometry()
///     .with_limit(10);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureRequest {
    filter: RequestFilter,
    rect: Option<Rect>,
    subset: Option<Vec<usize>>,
    no_geometry: bool,
    limit: Option<usize>,
    compile: Option<bool>,
}

impl FeatureRequest {
    /// Request every feature with every attribute and geometry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: select a single feature
    pub fn with_fid(mut self, fid: FeatureId) -> Self {
        self.filter = RequestFilter::Fid(fid);
        self
    }

    /// Builder: select a set of features
    pub fn with_fids(mut self, fids: impl IntoIterator<Item = FeatureId>) -> Self {
        self.filter = RequestFilter::Fids(fids.into_iter().collect());
        self
    }

    /// Builder: filter by an expression
    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.filter = RequestFilter::Expression(expression);
        self
    }

    /// Builder: parse and filter by an expression
    ///
    /// # Errors
    ///
    /// `Parse` for malformed expressions.
    pub fn with_filter_expression(self, text: &str) -> Result<Self> {
        Ok(self.with_expression(Expression::parse(text)?))
    }

    /// Builder: only features whose geometry envelope intersects `rect`
    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = Some(rect);
        self
    }

    /// Builder: fetch only these attribute indexes; the rest stay unset
    pub fn with_subset(mut self, indexes: Vec<usize>) -> Self {
        self.subset = Some(indexes);
        self
    }

    /// Builder: subset by field names; unknown names are ignored
    pub fn with_subset_names(self, names: &[&str], fields: &Fields) -> Self {
        let indexes = names.iter().filter_map(|n| fields.lookup_field(n)).collect();
        self.with_subset(indexes)
    }

    /// Builder: skip geometry decoding
    pub fn no_geometry(mut self) -> Self {
        self.no_geometry = true;
        self
    }

    /// Builder: stop after `limit` features
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder: force expression compilation on or off for this request
    pub fn with_compile(mut self, compile: bool) -> Self {
        self.compile = Some(compile);
        self
    }

    /// Feature selection
    pub fn filter(&self) -> &RequestFilter {
        &self.filter
    }

    /// Rectangle filter
    pub fn rect(&self) -> Option<&Rect> {
        self.rect.as_ref()
    }

    /// Attribute subset
    pub fn subset(&self) -> Option<&[usize]> {
        self.subset.as_deref()
    }

    /// True when geometry is not wanted
    pub fn skips_geometry(&self) -> bool {
        self.no_geometry
    }

    /// Maximum number of features
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Per-request compile override
    pub fn compile(&self) -> Option<bool> {
        self.compile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geostrata_core::{Field, FieldType};

    #[test]
    fn test_builder() {
        let fields = Fields::from_vec(vec![
            Field::new("pk", FieldType::Int, "int4"),
            Field::new("name", FieldType::String, "text"),
        ]);
        let request = FeatureRequest::new()
            .with_filter_expression("pk > 1")
            .unwrap()
            .with_subset_names(&["NAME", "nope"], &fields)
            .no_geometry()
            .with_limit(3)
            .with_compile(false);
        assert!(matches!(request.filter(), RequestFilter::Expression(_)));
        assert_eq!(request.subset(), Some(&[1usize][..]));
        assert!(request.skips_geometry());
        assert_eq!(request.limit(), Some(3));
        assert_eq!(request.compile(), Some(false));
        assert!(request.rect().is_none());
    }

    #[test]
    fn test_fid_filters() {
        let request = FeatureRequest::new().with_fids([FeatureId(3), FeatureId(1), FeatureId(3)]);
        match request.filter() {
            RequestFilter::Fids(set) => assert_eq!(set.len(), 2),
            other => panic!("unexpected filter {:?}", other),
        }
        assert!(FeatureRequest::new().with_filter_expression("pk >").is_err());
    }
}
