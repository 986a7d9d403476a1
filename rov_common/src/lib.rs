//! ROV Common Library
//!
//! Shared constants, configuration loading and wire types for the ROV
//! control-plane crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Numeric defaults and well-known addresses
//! - [`config`] - Configuration loading traits and types
//! - [`mode`] - Operating modes, stream channels, activation table
//! - [`message`] - Inbound command and outbound drive packet formats
//! - [`lifecycle`] - Worker roles and shutdown ordering
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use rov_common::mode::{activation, StreamChannel};
//!
//! let live = activation(2);
//! assert!(live.is_active(StreamChannel::Down));
//! assert!(!live.is_active(StreamChannel::StereoLeft));
//! ```

pub mod config;
pub mod consts;
pub mod lifecycle;
pub mod message;
pub mod mode;
pub mod prelude;
