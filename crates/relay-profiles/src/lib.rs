//! `relay-profiles` – device profiles and binary decoders.
//!
//! A [`DeviceProfile`] binds a peripheral's GATT layout (service,
//! characteristics, control endpoint, start sequence, keep-alive) to the
//! [`Decoder`] that turns its raw notifications into [`Payload`]s.
//!
//! # Modules
//!
//! - [`decoder`] – the [`Decoder`] trait and the tagged [`DecoderKind`]
//!   dispatcher.
//! - [`decoders`] – pure wire-format decoders (UART text, 12-bit EEG, IMU,
//!   Athena mixed stream, BLE heart rate).
//! - [`profile`] – the immutable [`DeviceProfile`] descriptor.
//! - [`registry`] – the [`ProfileRegistry`] keyed lookup table.
//! - [`builtin`] – profiles shipped with the relay.
//! - [`definition`] – profiles declared as data in the config file.
//! - [`smoothing`] – caller-invoked smoothing helpers.
//!
//! [`Payload`]: relay_types::Payload

pub mod builtin;
pub mod decoder;
pub mod decoders;
pub mod definition;
pub mod profile;
pub mod registry;
pub mod smoothing;

pub use decoder::{Decoded, Decoder, DecoderKind, ImuAxis};
pub use definition::ProfileDefinition;
pub use profile::{Characteristics, CommandStep, DeviceProfile, KeepAlive};
pub use registry::ProfileRegistry;
