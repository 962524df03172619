//! Forward Cloudflare zone analytics counters to Graphite.
//!
//! This library supports the cfgraphite binary found elsewhere in this
//! project. The program polls the Cloudflare zone-analytics dashboard API on
//! a fixed interval, selects the aggregation periods it has not yet seen and
//! flattens their counters into Graphite plaintext samples. A watermark of
//! the last forwarded period end keeps already-delivered points from being
//! sent twice.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod fetcher;
pub mod forwarder;
pub mod poller;
pub mod sink;
