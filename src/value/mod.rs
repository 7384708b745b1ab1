//! Generic value tree helpers
//!
//! State, runtime metadata and parameters are all `serde_json::Value` trees.
//! This module holds the path accessors used to read and write nested fields
//! and the loose coercions used by conditions and comparisons.

// Dotted/bracketed path parsing plus get/set/delete/merge at a path
pub mod path;

// Truthiness, numeric coercion, structural equality and display strings
pub mod coerce;

pub use coerce::{deep_equal, is_truthy, to_display_string, to_number};
pub use path::{
    deep_merge, delete_path, get_path, get_path_mut, get_segments, merge_at_path, parse_path,
    set_path, PathSegment, MAX_ARRAY_INDEX,
};
