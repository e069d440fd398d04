//! # Heart Rate Measurement Module
//!
//! Decodes the Bluetooth SIG "Heart Rate Measurement" characteristic (0x2A37).
//!
//! ## Payload Layout
//! ```text
//! byte 0        flags
//!   bit 0       heart rate format (0 = u8, 1 = u16 little-endian)
//!   bits 1-2    sensor contact status (not decoded)
//!   bit 3       energy expended present
//!   bit 4       RR intervals present (not decoded)
//! byte 1[..2]   heart rate value
//! next 2 bytes  energy expended in kJ, only if bit 3 is set
//! remaining     RR intervals, left unparsed
//! ```
//!
//! Decoding is a pure function of the input bytes. It is safe to call from
//! whatever thread the Bluetooth stack delivers notifications on.

use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use std::fmt;

pub const HEART_RATE_VALUE_FORMAT_UINT16: u8 = 0x01;
pub const SENSOR_CONTACT_NOT_SUPPORTED: u8 = 0x02;
pub const SENSOR_CONTACT_SUPPORTED_NOT_DETECTED: u8 = 0x04;
pub const SENSOR_CONTACT_SUPPORTED_DETECTED: u8 = 0x06;
pub const ENERGY_EXPENDED_FIELD_PRESENT: u8 = 0x08;
pub const RR_INTERVAL_FIELD_PRESENT: u8 = 0x10;

/// A single decoded notification.
///
/// `expended_energy` is only meaningful when `has_expended_energy` is set;
/// use [`HeartRateMeasurement::energy_expended`] to get it as an `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    heart_rate_value: u16,
    has_expended_energy: bool,
    expended_energy: u16,
    timestamp: DateTime<Utc>,
}

impl HeartRateMeasurement {
    pub fn new(
        heart_rate_value: u16,
        has_expended_energy: bool,
        expended_energy: u16,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            heart_rate_value,
            has_expended_energy,
            expended_energy,
            timestamp,
        }
    }

    /// Beats per minute
    pub fn heart_rate_value(&self) -> u16 {
        self.heart_rate_value
    }

    pub fn has_expended_energy(&self) -> bool {
        self.has_expended_energy
    }

    /// Raw energy field in kilojoules, 0 when absent
    pub fn expended_energy(&self) -> u16 {
        self.expended_energy
    }

    pub fn energy_expended(&self) -> Option<u16> {
        self.has_expended_energy.then_some(self.expended_energy)
    }

    /// Receipt time as supplied by the caller of [`decode`]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for HeartRateMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bpm @ {}", self.heart_rate_value, self.timestamp)
    }
}

/// Decode a raw Heart Rate Measurement payload.
///
/// Every read is bounds-checked; a buffer shorter than its flags declare
/// yields [`DecodeError::MalformedPayload`]. A lone 8-bit flags byte with no
/// energy field decodes to a heart rate of 0.
pub fn decode(payload: &[u8], timestamp: DateTime<Utc>) -> Result<HeartRateMeasurement, DecodeError> {
    let flags = *payload.first().ok_or(DecodeError::MalformedPayload {
        required: 1,
        actual: 0,
    })?;

    let is_uint16 = flags & HEART_RATE_VALUE_FORMAT_UINT16 != 0;
    let has_expended_energy = flags & ENERGY_EXPENDED_FIELD_PRESENT != 0;

    let hr_width = if is_uint16 { 2 } else { 1 };
    let energy_width = if has_expended_energy { 2 } else { 0 };
    let required = 1 + hr_width + energy_width;

    // [flags] on its own is accepted as an 8-bit reading of 0
    let bare_flags = payload.len() == 1 && !is_uint16 && !has_expended_energy;
    if payload.len() < required && !bare_flags {
        return Err(DecodeError::MalformedPayload {
            required,
            actual: payload.len(),
        });
    }

    let mut offset = 1;

    let heart_rate_value = if is_uint16 {
        u16::from_le_bytes([payload[offset], payload[offset + 1]])
    } else {
        payload.get(offset).copied().map(u16::from).unwrap_or(0)
    };
    offset += hr_width;

    let expended_energy = if has_expended_energy {
        u16::from_le_bytes([payload[offset], payload[offset + 1]])
    } else {
        0
    };

    Ok(HeartRateMeasurement::new(
        heart_rate_value,
        has_expended_energy,
        expended_energy,
        timestamp,
    ))
}
