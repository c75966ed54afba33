//! Pure wire-format decoders.
//!
//! Each submodule exposes a typed `decode*` function returning `Option`
//! (`None` = incomplete) plus a conversion into a [`Payload`] record of the
//! shape `{ "type": ..., "data": { ... } }` that downstream consumers and
//! the OSC flattener understand.
//!
//! [`Payload`]: relay_types::Payload

pub mod athena;
pub mod eeg;
pub mod heart_rate;
pub mod imu;
pub mod uart;
