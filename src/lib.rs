//! # Luna OVA driver
//!
//! Host-side driver for the Luna optical vector analyzer. The instrument speaks an
//! SCPI-like ASCII protocol over TCP: newline-terminated commands, single-line responses,
//! no ready signal. This crate wraps that in a blocking [`Session`] that configures the
//! instrument, runs scans, and returns typed measurement data.
//!
//! ## Crate Structure
//!
//! Layers, from the wire up:
//!
//! - **`transport`**: the [`transport::Transport`] byte-stream trait, the TCP implementation,
//!   and a scripted in-memory device for tests.
//! - **`codec`**: newline framing of commands and reassembly of responses.
//! - **`query`**: the send / settle / read primitive every operation goes through.
//! - **`scan`**: the scan trigger and bounded completion polling.
//! - **`array`**: decoding of `\r`-delimited numeric array responses.
//! - **`session`**: connection lifecycle and the typed instrument surface.
//!
//! Supporting modules:
//!
//! - **`commands`**: the OVA command strings.
//! - **`measurement`**: axes, channels and measurement result types.
//! - **`config`**: layered TOML plus environment configuration.
//! - **`error`**: the [`OvaError`] enum shared by every layer.
//! - **`logging`**: `tracing` subscriber setup.

pub mod array;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod query;
pub mod scan;
pub mod session;
pub mod transport;

pub use config::OvaConfig;
pub use error::{OvaError, OvaResult};
pub use measurement::{AveragingStatus, Axis, Channel, FullMeasurement, Measurement, Quantity};
pub use session::{ConnectionState, Session};
