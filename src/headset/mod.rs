//! Headset engine boundary and protocol tables.
//!
//! This module contains the vendor engine interface consumed by the session,
//! the sensor/channel tables of the 14-channel headset, and an emulated engine.

pub mod binding;
pub mod emulator;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;
