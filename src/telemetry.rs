//! Telemetry block registry.
//!
//! Each block is a fixed-length little-endian layout. A [`BlockSpec`] lists
//! its fields in offset order; decoding reads each field at its offset and
//! never touches the input buffer. The standard blocks are registered once
//! in a process-wide [`registry()`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::{NspError, Result};
use crate::fixed_point::{QFormat, Q14_2, Q20_12, Q24_8, Q30_2, UQ16_16};
use crate::types::FieldValue;

/// Telemetry block identifiers requested with APP_TELEMETRY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum TelemetryBlock {
    Standard = 0x00,
    Temperatures = 0x01,
    Voltages = 0x02,
    Currents = 0x03,
    DiagnosticsGeneral = 0x04,
}

impl TelemetryBlock {
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STANDARD" => Some(TelemetryBlock::Standard),
            "TEMPERATURES" | "TEMP" => Some(TelemetryBlock::Temperatures),
            "VOLTAGES" | "VOLT" => Some(TelemetryBlock::Voltages),
            "CURRENTS" | "CURR" => Some(TelemetryBlock::Currents),
            "DIAGNOSTICS" | "DIAG" | "DIAGNOSTICS_GENERAL" => {
                Some(TelemetryBlock::DiagnosticsGeneral)
            }
            _ => None,
        }
    }
}

impl From<TelemetryBlock> for u8 {
    fn from(block: TelemetryBlock) -> u8 {
        block.id()
    }
}

/// How one field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    I16,
    I32,
    Fixed(QFormat),
}

impl FieldKind {
    pub fn size(&self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16 | FieldKind::I16 => 2,
            FieldKind::U32 | FieldKind::I32 => 4,
            FieldKind::Fixed(format) => format.byte_len(),
        }
    }

    /// Decode from exactly [`size`](Self::size) bytes.
    fn decode(&self, bytes: &[u8]) -> FieldValue {
        let mut buf = [0u8; 4];
        buf[..bytes.len()].copy_from_slice(bytes);
        let word = u32::from_le_bytes(buf);

        match self {
            FieldKind::U8 | FieldKind::U16 | FieldKind::U32 => FieldValue::Unsigned(word as u64),
            FieldKind::I16 => FieldValue::Signed(word as u16 as i16 as i64),
            FieldKind::I32 => FieldValue::Signed(word as i32 as i64),
            FieldKind::Fixed(format) => FieldValue::Real(format.decode(word)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, offset: usize, kind: FieldKind) -> Self {
        Self { name, offset, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpec {
    pub id: u8,
    pub name: &'static str,
    pub length: usize,
    pub fields: Vec<FieldSpec>,
}

/// Decoded block: field values in layout order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub block: u8,
    pub name: &'static str,
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl TelemetryRecord {
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
    }

    pub fn unsigned(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.as_u64())
    }

    pub fn signed(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.as_i64())
    }

    pub fn real(&self, name: &str) -> Option<f64> {
        self.get(name).map(|v| v.as_f64())
    }
}

/// Block layouts keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    blocks: BTreeMap<u8, BlockSpec>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the five device-defined blocks.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for (id, name, length, fields) in standard_blocks() {
            // the static layouts are checked by tests
            if let Err(e) = registry.register(id, name, length, fields) {
                tracing::error!(error = %e, "invalid built-in telemetry layout");
            }
        }
        registry
    }

    /// Add a block. Fields must lie within `length`, fixed-point fields must
    /// be 1 to 32 bits wide and ids must be unique.
    pub fn register(
        &mut self,
        id: u8,
        name: &'static str,
        length: usize,
        fields: Vec<FieldSpec>,
    ) -> Result<()> {
        if self.blocks.contains_key(&id) {
            return Err(NspError::DuplicateBlock(id));
        }
        for field in &fields {
            if let FieldKind::Fixed(format) = field.kind {
                if !format.is_supported() {
                    return Err(NspError::UnsupportedFormat {
                        name: field.name,
                        format,
                    });
                }
            }
        }
        if let Some(field) = fields.iter().find(|f| f.offset + f.kind.size() > length) {
            return Err(NspError::InvalidField {
                name: field.name,
                offset: field.offset,
                length,
            });
        }

        self.blocks.insert(
            id,
            BlockSpec {
                id,
                name,
                length,
                fields,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: u8) -> Option<&BlockSpec> {
        self.blocks.get(&id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockSpec> {
        self.blocks.values()
    }

    /// Decode `bytes` as block `id`. Trailing bytes past the layout are ignored.
    pub fn decode(&self, id: u8, bytes: &[u8]) -> Result<TelemetryRecord> {
        let spec = self.blocks.get(&id).ok_or(NspError::UnknownBlock(id))?;
        if bytes.len() < spec.length {
            return Err(NspError::Length {
                block: id,
                expected: spec.length,
                actual: bytes.len(),
            });
        }

        let fields = spec
            .fields
            .iter()
            .map(|f| {
                let raw = &bytes[f.offset..f.offset + f.kind.size()];
                (f.name, f.kind.decode(raw))
            })
            .collect();

        Ok(TelemetryRecord {
            block: id,
            name: spec.name,
            fields,
        })
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::standard);

/// Process-wide registry of the standard blocks, built on first use.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

fn standard_blocks() -> Vec<(u8, &'static str, usize, Vec<FieldSpec>)> {
    use FieldKind::*;

    vec![
        (
            TelemetryBlock::Standard.id(),
            "STANDARD",
            25,
            vec![
                FieldSpec::new("status", 0, U32),
                FieldSpec::new("fault", 4, U32),
                FieldSpec::new("control_mode", 8, U8),
                FieldSpec::new("setpoint", 9, I32),
                FieldSpec::new("duty_cycle", 13, I16),
                FieldSpec::new("current_target", 15, Fixed(Q14_2)),
                FieldSpec::new("current", 17, Fixed(Q20_12)),
                FieldSpec::new("speed", 21, Fixed(Q24_8)),
            ],
        ),
        (
            TelemetryBlock::Temperatures.id(),
            "TEMPERATURES",
            8,
            vec![
                FieldSpec::new("temp_dcdc_raw", 0, U16),
                FieldSpec::new("temp_enclosure_raw", 2, U16),
                FieldSpec::new("temp_driver_raw", 4, U16),
                FieldSpec::new("temp_motor_raw", 6, U16),
            ],
        ),
        (
            TelemetryBlock::Voltages.id(),
            "VOLTAGES",
            24,
            vec![
                FieldSpec::new("vmon_1v5_v", 0, Fixed(UQ16_16)),
                FieldSpec::new("vmon_3v3_v", 4, Fixed(UQ16_16)),
                FieldSpec::new("vmon_5v_v", 8, Fixed(UQ16_16)),
                FieldSpec::new("vmon_12v_v", 12, Fixed(UQ16_16)),
                FieldSpec::new("vmon_30v_v", 16, Fixed(UQ16_16)),
                FieldSpec::new("vmon_2v5_v", 20, Fixed(UQ16_16)),
            ],
        ),
        (
            TelemetryBlock::Currents.id(),
            "CURRENTS",
            24,
            vec![
                FieldSpec::new("imon_1v5_ma", 0, Fixed(UQ16_16)),
                FieldSpec::new("imon_3v3_ma", 4, Fixed(UQ16_16)),
                FieldSpec::new("imon_5v_analog_ma", 8, Fixed(UQ16_16)),
                FieldSpec::new("imon_5v_digital_ma", 12, Fixed(UQ16_16)),
                FieldSpec::new("imon_12v_ma", 16, Fixed(UQ16_16)),
                FieldSpec::new("imon_30v_a", 20, Fixed(UQ16_16)),
            ],
        ),
        (
            TelemetryBlock::DiagnosticsGeneral.id(),
            "DIAGNOSTICS_GENERAL",
            20,
            vec![
                FieldSpec::new("uptime_s", 0, Fixed(Q30_2)),
                FieldSpec::new("rev_count", 4, U32),
                FieldSpec::new("hall_bad_trans_count", 8, U32),
                FieldSpec::new("drive_fault_count", 12, U32),
                FieldSpec::new("over_temp_count", 16, U32),
            ],
        ),
    ]
}
