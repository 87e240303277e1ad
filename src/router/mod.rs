//! # Route Table
//!
//! Hierarchical method/path routing with parametric, exclusive, and
//! aspect-bearing routes.
//!
//! Each HTTP method owns an independent trie of [`core::RouteLayer`]s
//! keyed by literal path segment; a `{name}` segment occupies the
//! layer's single parametric slot. Matching prefers literal children,
//! falls back to the parametric slot (capturing the raw segment), and an
//! *exclusive* layer terminates descent outright so its handler serves
//! everything below its prefix.
//!
//! Routing never fails: a miss yields the table's default handler with
//! default limits and the global aspects only.

mod core;
mod template;

pub use self::core::{ParamVec, RouteResult, RouteTable};
