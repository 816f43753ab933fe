//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use kvorm_codec::Value;
use proptest::prelude::*;

/// Strategy for generating valid bare type names.
pub fn type_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for generating valid field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating explicit entity ids, numeric or not.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (1u64..10_000).prop_map(|n| n.to_string()),
        prop::string::string_regex("[a-z][a-z0-9-]{0,11}").expect("Invalid regex"),
    ]
}

/// Strategy for generating storable scalar values. Floats are always finite.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[ -~]{0,24}".prop_map(Value::String),
    ]
}

/// One step of a random relationship workload over a pool of entities.
///
/// Indices refer to positions in the pool and are reduced modulo its size.
#[derive(Debug, Clone)]
pub enum LinkOperation {
    /// Link `from` to `to`.
    Link {
        /// Subject index.
        from: usize,
        /// Partner index.
        to: usize,
    },
    /// Unlink `to` from `from`.
    Unlink {
        /// Subject index.
        from: usize,
        /// Partner index.
        to: usize,
    },
    /// Clear every link of `from`.
    Clear {
        /// Subject index.
        from: usize,
    },
    /// Delete the entity at `index`.
    Delete {
        /// Entity index.
        index: usize,
    },
}

/// Strategy for generating relationship operations.
pub fn link_operation_strategy() -> impl Strategy<Value = LinkOperation> {
    prop_oneof![
        5 => (any::<usize>(), any::<usize>())
            .prop_map(|(from, to)| LinkOperation::Link { from, to }),
        2 => (any::<usize>(), any::<usize>())
            .prop_map(|(from, to)| LinkOperation::Unlink { from, to }),
        1 => any::<usize>().prop_map(|from| LinkOperation::Clear { from }),
        1 => any::<usize>().prop_map(|index| LinkOperation::Delete { index }),
    ]
}

/// Strategy for generating a sequence of relationship operations.
pub fn link_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<LinkOperation>> {
    prop::collection::vec(link_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
