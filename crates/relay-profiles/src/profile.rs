//! [`DeviceProfile`] – immutable descriptor of one device family.
//!
//! Adding hardware support means building one of these and registering it;
//! the connection manager never special-cases a device.

use std::sync::Arc;
use std::time::Duration;

use relay_types::ScanFilter;
use uuid::Uuid;

use crate::decoder::{Decoded, Decoder};

/// One command of a start sequence: write `bytes`, then wait `wait` before
/// the next step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub bytes: Vec<u8>,
    pub wait: Duration,
}

impl CommandStep {
    pub fn new(bytes: impl Into<Vec<u8>>, wait: Duration) -> Self {
        Self {
            bytes: bytes.into(),
            wait,
        }
    }
}

/// Periodic keep-alive on the control characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlive {
    /// Bytes to write each tick; `None` performs a passive read instead.
    pub command: Option<Vec<u8>>,
    pub interval: Duration,
}

/// Where a profile's data arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Characteristics {
    /// One untagged notification characteristic.
    Single(Uuid),
    /// Channel tag → characteristic, in subscription order.
    Channels(Vec<(String, Uuid)>),
}

impl Characteristics {
    /// `(channel tag, characteristic)` pairs in subscription order.
    pub fn entries(&self) -> Vec<(Option<&str>, Uuid)> {
        match self {
            Characteristics::Single(uuid) => vec![(None, *uuid)],
            Characteristics::Channels(list) => list
                .iter()
                .map(|(tag, uuid)| (Some(tag.as_str()), *uuid))
                .collect(),
        }
    }

    /// Channel tag of `uuid`, or `None` when the profile does not declare it.
    pub fn channel_of(&self, uuid: Uuid) -> Option<Option<&str>> {
        self.entries()
            .into_iter()
            .find(|(_, u)| *u == uuid)
            .map(|(tag, _)| tag)
    }
}

/// Binds a device's GATT layout and handshake to its decoder.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: String,
    pub service: Uuid,
    pub characteristics: Characteristics,
    /// Target of `send`, start-sequence writes and keep-alives.
    pub control: Option<Uuid>,
    pub start_sequence: Vec<CommandStep>,
    pub keep_alive: Option<KeepAlive>,
    /// Advertised name prefix used when scanning.
    pub name_prefix: Option<String>,
    decoder: Arc<dyn Decoder>,
}

impl DeviceProfile {
    pub fn new(
        name: impl Into<String>,
        service: Uuid,
        characteristics: Characteristics,
        decoder: impl Decoder + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            service,
            characteristics,
            control: None,
            start_sequence: Vec::new(),
            keep_alive: None,
            name_prefix: None,
            decoder: Arc::new(decoder),
        }
    }

    #[must_use]
    pub fn with_control(mut self, control: Uuid) -> Self {
        self.control = Some(control);
        self
    }

    #[must_use]
    pub fn with_start_sequence(mut self, steps: Vec<CommandStep>) -> Self {
        self.start_sequence = steps;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Run the profile's decoder.
    pub fn decode(&self, bytes: &[u8], channel: Option<&str>) -> Decoded {
        self.decoder.decode(bytes, channel)
    }

    /// Scan filter matching this profile's advertised service and name.
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            name_prefix: self.name_prefix.clone(),
            services: vec![self.service],
        }
    }
}
