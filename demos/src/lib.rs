//! Vision decoder demos
//!
//! ## Available Binaries
//!
//! - `decoder-summary`: Build a decoder from JSON configs and print the
//!   feature maps it produces for dummy backbone features.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin decoder-summary -- --input-specs specs.json --config model.json
//!
//! # Override the decoder type of the config
//! cargo run --bin decoder-summary -- --input-specs specs.json --decoder nasfpn
//! ```

pub mod backend;
pub mod summary;

pub use backend::{init_demo, DemoBackend};
pub use summary::{dummy_features, parse_input_specs, summarize, LevelSummary};
