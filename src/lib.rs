//! Impact-hammer capture analysis.
//!
//! Binary captures from the Teensy logger are decoded into channel traces,
//! then analysed for sampling rate, spectra and impacts. The serial SD-card
//! client in [`transport`] fetches captures from the device.

pub mod analysis;
pub mod batch;
pub mod config;
pub mod report;
pub mod synth;
pub mod transport;
