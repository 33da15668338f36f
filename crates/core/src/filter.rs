//! Query filters
//!
//! A `Filter` is an immutable predicate: a selector, an operator, one or two
//! comparison values and an equal-inclusive flag. A filter only applies to an
//! index declared over the same selector.
//!
//! ```
//! use cellar_core::Filter;
//!
//! let adults = Filter::greater("age", 17);
//! let exactly = Filter::equal("name", "alice");
//! let range = Filter::between("age", 10, 40).or_equal();
//! # let _ = (adults, exactly, range);
//! ```

use serde::{Deserialize, Serialize};

use crate::selector::Selector;
use crate::value::Value;

/// Comparison operator of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Exact match
    Equal,
    /// Strictly greater, or greater-or-equal with the equal flag
    Greater,
    /// Strictly less, or less-or-equal with the equal flag
    Less,
    /// Between two bounds, bounds included with the equal flag
    Between,
    /// Any record carrying the field
    Exists,
}

/// Immutable query predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    selector: Selector,
    op: FilterOp,
    values: Vec<Value>,
    equal: bool,
}

impl Filter {
    fn build(selector: impl Into<Selector>, op: FilterOp, values: Vec<Value>) -> Self {
        Filter {
            selector: selector.into(),
            op,
            values,
            equal: false,
        }
    }

    /// Records whose field equals `value`
    pub fn equal(selector: impl Into<Selector>, value: impl Into<Value>) -> Self {
        let mut filter = Self::build(selector, FilterOp::Equal, vec![value.into()]);
        filter.equal = true;
        filter
    }

    /// Records whose field is greater than `value`
    pub fn greater(selector: impl Into<Selector>, value: impl Into<Value>) -> Self {
        Self::build(selector, FilterOp::Greater, vec![value.into()])
    }

    /// Records whose field is less than `value`
    pub fn less(selector: impl Into<Selector>, value: impl Into<Value>) -> Self {
        Self::build(selector, FilterOp::Less, vec![value.into()])
    }

    /// Records whose field lies between `low` and `high`.
    ///
    /// The bounds are swapped if given in the wrong order at scan time.
    pub fn between(
        selector: impl Into<Selector>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self::build(selector, FilterOp::Between, vec![low.into(), high.into()])
    }

    /// Records that carry a non-zero value for the field
    pub fn exists(selector: impl Into<Selector>) -> Self {
        let mut filter = Self::build(selector, FilterOp::Exists, Vec::new());
        filter.equal = true;
        filter
    }

    /// Include the boundary values
    pub fn or_equal(mut self) -> Self {
        self.equal = true;
        self
    }

    /// Selector this filter applies to
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Operator
    pub fn op(&self) -> FilterOp {
        self.op
    }

    /// Comparison values (none for `Exists`, two for `Between`)
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Whether boundary values are included
    pub fn is_equal_inclusive(&self) -> bool {
        self.equal
    }
}
