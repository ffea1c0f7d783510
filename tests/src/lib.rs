//! # Musa Test Suite
//!
//! Cross-crate flows that need more than one component running at once.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── bootstrap_flow.rs   # identity → host → DHT bootstrap → shutdown
//!     └── telemetry_flow.rs   # providers → routing metrics → scrape endpoint
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p musa-tests
//! cargo test -p musa-tests integration::bootstrap_flow
//! ```

pub mod integration;
