//! Error types for the forwarding tables.

use thiserror::Error;

/// Errors returned by NDT, FIB, strategy table and PCCT operations.
///
/// None of these leave a table partially modified: validation happens
/// before the first mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// Bad construction parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The table reached its configured capacity.
    #[error("table full")]
    Full,

    /// Insert without any nexthop.
    #[error("no nexthop")]
    NoNexthop,

    /// Insert with more nexthops than the configured limit.
    #[error("too many nexthops: {count} > {max}")]
    TooManyNexthops { count: usize, max: usize },

    /// Entry name exceeds the configured component limit.
    #[error("name too long: {len} components > {max}")]
    NameTooLong { len: usize, max: usize },

    /// Insert without a strategy.
    #[error("no strategy attached")]
    NoStrategy,

    /// Erase or lookup of an entry that does not exist.
    #[error("entry not found")]
    NotFound,

    /// Unload of a strategy that is still referenced.
    #[error("strategy {id} is referenced {refcnt} times")]
    StrategyInUse { id: u32, refcnt: usize },

    /// The strategy runtime rejected a program image.
    #[error("strategy load failed: {0}")]
    StrategyLoad(String),
}
