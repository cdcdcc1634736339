//! Fixed-point (Q-format) conversion.
//!
//! A [`QFormat`] names a binary fraction by its integer and fraction bit
//! counts. For signed formats the sign bit is counted among the integer bits,
//! so Q14.18 and UQ14.18 are both 32 bits wide. Encoding saturates at the
//! format's limits instead of wrapping.
//!
//! Supported widths are 1 to 32 bits; see [`QFormat::is_supported`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Fixed-point layout of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QFormat {
    pub signed: bool,
    pub int_bits: u8,
    pub frac_bits: u8,
}

/// Speed / current setpoint
pub const Q14_18: QFormat = QFormat::signed(14, 18);
/// Torque setpoint
pub const Q10_22: QFormat = QFormat::signed(10, 22);
/// Telemetry speed (RPM)
pub const Q24_8: QFormat = QFormat::signed(24, 8);
/// Telemetry current (mA)
pub const Q20_12: QFormat = QFormat::signed(20, 12);
/// Telemetry current target (mA)
pub const Q14_2: QFormat = QFormat::signed(14, 2);
/// Voltage / current monitors
pub const UQ16_16: QFormat = QFormat::unsigned(16, 16);
/// Overspeed fault threshold (RPM)
pub const UQ24_8: QFormat = QFormat::unsigned(24, 8);
/// Active speed limit (RPM)
pub const UQ14_18: QFormat = QFormat::unsigned(14, 18);
/// Uptime (seconds)
pub const Q30_2: QFormat = QFormat::signed(30, 2);

impl QFormat {
    pub const fn signed(int_bits: u8, frac_bits: u8) -> Self {
        Self {
            signed: true,
            int_bits,
            frac_bits,
        }
    }

    pub const fn unsigned(int_bits: u8, frac_bits: u8) -> Self {
        Self {
            signed: false,
            int_bits,
            frac_bits,
        }
    }

    /// Total width in bits.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.int_bits as u32 + self.frac_bits as u32
    }

    /// Whether the width fits the 32-bit codec.
    ///
    /// Other widths never panic but encode to zero and decode as if clamped
    /// into range; [`Registry::register`](crate::telemetry::Registry::register)
    /// rejects them.
    #[inline]
    pub const fn is_supported(&self) -> bool {
        let bits = self.bits();
        bits >= 1 && bits <= 32
    }

    #[inline]
    fn width(&self) -> u32 {
        self.bits().clamp(1, 32)
    }

    /// Width on the wire in bytes.
    #[inline]
    pub const fn byte_len(&self) -> usize {
        (self.bits() as usize + 7) / 8
    }

    /// Value of one LSB.
    #[inline]
    pub fn resolution(&self) -> f64 {
        1.0 / self.scale()
    }

    #[inline]
    fn scale(&self) -> f64 {
        (self.frac_bits as f64).exp2()
    }

    fn raw_min(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.width() - 1))
        } else {
            0
        }
    }

    fn raw_max(&self) -> i64 {
        if self.signed {
            (1i64 << (self.width() - 1)) - 1
        } else {
            (1i64 << self.width()) - 1
        }
    }

    fn mask(&self) -> u64 {
        (1u64 << self.width()) - 1
    }

    /// Smallest representable value.
    pub fn min(&self) -> f64 {
        self.raw_min() as f64 / self.scale()
    }

    /// Largest representable value.
    pub fn max(&self) -> f64 {
        self.raw_max() as f64 / self.scale()
    }

    /// Encode `value` into the low [`bits`](Self::bits) of the result.
    ///
    /// Out-of-range input saturates (and is logged); fractions below one LSB
    /// truncate toward zero. NaN encodes as zero.
    pub fn encode(&self, value: f64) -> u32 {
        if !self.is_supported() {
            tracing::warn!(format = %self, "unsupported fixed-point width, encoding zero");
            return 0;
        }
        if value.is_nan() {
            tracing::warn!(format = %self, "NaN fixed-point input, encoding zero");
            return 0;
        }

        let scaled = (value * self.scale()).trunc();
        let raw = if scaled < self.raw_min() as f64 {
            tracing::warn!(format = %self, value, min = self.min(), "fixed-point input saturated");
            self.raw_min()
        } else if scaled > self.raw_max() as f64 {
            tracing::warn!(format = %self, value, max = self.max(), "fixed-point input saturated");
            self.raw_max()
        } else {
            scaled as i64
        };

        (raw as u64 & self.mask()) as u32
    }

    /// Decode the low [`bits`](Self::bits) of `raw`.
    pub fn decode(&self, raw: u32) -> f64 {
        let raw = raw as u64 & self.mask();
        let value = if self.signed && (raw >> (self.width() - 1)) & 1 == 1 {
            raw as i64 - (1i64 << self.width())
        } else {
            raw as i64
        };
        value as f64 / self.scale()
    }

    /// Encode as little-endian bytes of [`byte_len`](Self::byte_len) width.
    pub fn encode_le(&self, value: f64) -> Vec<u8> {
        self.encode(value).to_le_bytes()[..self.byte_len().min(4)].to_vec()
    }

    /// Decode from little-endian bytes; `None` if `bytes` is too short or the
    /// width is unsupported.
    pub fn decode_le(&self, bytes: &[u8]) -> Option<f64> {
        if !self.is_supported() {
            return None;
        }
        let width = self.byte_len();
        let src = bytes.get(..width)?;
        let mut buf = [0u8; 4];
        buf[..width].copy_from_slice(src);
        Some(self.decode(u32::from_le_bytes(buf)))
    }
}

impl Display for QFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let prefix = if self.signed { "Q" } else { "UQ" };
        write!(f, "{}{}.{}", prefix, self.int_bits, self.frac_bits)
    }
}
