//! Typed device operations built on [`Session::transact`].
//!
//! Every operation addresses the configured device
//! ([`SessionConfig::device_address`](crate::SessionConfig)). Multi-byte
//! values travel little-endian.

use crate::constants::memory;
use crate::error::{NspError, Result};
use crate::fixed_point::{Q10_22, Q14_18, UQ14_18, UQ24_8};
use crate::packet::Command;
use crate::protocol::Session;
use crate::telemetry::{registry, TelemetryRecord};
use crate::types::ControlMode;

/// APP_COMMAND payload: mode byte followed by the encoded setpoint.
///
/// Current and speed setpoints use Q14.18, torque uses Q10.22 and PWM is a
/// raw signed 32-bit value. IDLE always sends zero.
pub fn app_command_payload(mode: ControlMode, setpoint: f64) -> [u8; 5] {
    let word = match mode {
        ControlMode::Idle => 0,
        ControlMode::Current | ControlMode::Speed => Q14_18.encode(setpoint),
        ControlMode::Torque => Q10_22.encode(setpoint),
        ControlMode::Pwm => {
            if setpoint > i32::MAX as f64 || setpoint < i32::MIN as f64 {
                tracing::warn!(setpoint, "PWM setpoint saturated");
            }
            // `as` saturates and maps NaN to zero
            setpoint as i32 as u32
        }
    };

    let mut payload = [0u8; 5];
    payload[0] = mode.code();
    payload[1..].copy_from_slice(&word.to_le_bytes());
    payload
}

/// POKE payload: address followed by the value.
pub fn poke_payload(address: u8, value: u32) -> [u8; 5] {
    let mut payload = [0u8; 5];
    payload[0] = address;
    payload[1..].copy_from_slice(&value.to_le_bytes());
    payload
}

impl Session {
    /// Check that the device answers
    pub fn ping(&mut self) -> Result<()> {
        self.transact(Command::Ping, &[])?;
        Ok(())
    }

    /// Read a 32-bit word from device memory
    pub fn peek(&mut self, address: u8) -> Result<u32> {
        let transaction = self.transact(Command::Peek, &[address])?;
        let payload = transaction.payload();
        let word: [u8; 4] = payload
            .try_into()
            .map_err(|_| NspError::UnexpectedReply {
                command: Command::Peek,
                payload: payload.to_vec(),
            })?;
        Ok(u32::from_le_bytes(word))
    }

    /// Write a 32-bit word to device memory
    pub fn poke(&mut self, address: u8, value: u32) -> Result<()> {
        self.transact(Command::Poke, &poke_payload(address, value))?;
        Ok(())
    }

    /// Set the control mode and its setpoint
    pub fn app_command(&mut self, mode: ControlMode, setpoint: f64) -> Result<()> {
        tracing::debug!(?mode, setpoint, "app command");
        self.transact(Command::AppCommand, &app_command_payload(mode, setpoint))?;
        Ok(())
    }

    /// Request a telemetry block and return its undecoded payload
    pub fn app_telemetry_raw(&mut self, block: impl Into<u8>) -> Result<Vec<u8>> {
        let transaction = self.transact(Command::AppTelemetry, &[block.into()])?;
        Ok(transaction.payload().to_vec())
    }

    /// Request a telemetry block and decode it through the standard registry
    pub fn app_telemetry(&mut self, block: impl Into<u8>) -> Result<TelemetryRecord> {
        let id = block.into();
        let payload = self.app_telemetry_raw(id)?;
        registry().decode(id, &payload)
    }

    /// Clear latched faults selected by `mask`
    pub fn clear_fault(&mut self, mask: u32) -> Result<()> {
        self.transact(Command::ClearFault, &mask.to_le_bytes())?;
        Ok(())
    }

    /// Enable or disable protections; a set bit disables that protection
    pub fn configure_protection(&mut self, mask: u32) -> Result<()> {
        self.transact(Command::ConfigureProtection, &mask.to_le_bytes())?;
        Ok(())
    }

    /// Trip the latching current limiter, removing motor power
    pub fn trip_lcl(&mut self) -> Result<()> {
        self.transact(Command::TripLcl, &[])?;
        Ok(())
    }

    pub fn serial_number(&mut self) -> Result<u32> {
        self.peek(memory::SERIAL_NUMBER)
    }

    /// Overspeed fault threshold in RPM
    pub fn overspeed_fault_threshold(&mut self) -> Result<f64> {
        Ok(UQ24_8.decode(self.peek(memory::OVERSPEED_FAULT_THRESHOLD)?))
    }

    pub fn set_overspeed_fault_threshold(&mut self, rpm: f64) -> Result<()> {
        self.poke(memory::OVERSPEED_FAULT_THRESHOLD, UQ24_8.encode(rpm))
    }

    /// Active speed limit in RPM
    pub fn active_speed_limit(&mut self) -> Result<f64> {
        Ok(UQ14_18.decode(self.peek(memory::ACTIVE_SPEED_LIMIT)?))
    }

    pub fn set_active_speed_limit(&mut self, rpm: f64) -> Result<()> {
        self.poke(memory::ACTIVE_SPEED_LIMIT, UQ14_18.encode(rpm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_and_speed_use_q14_18() {
        assert_eq!(
            app_command_payload(ControlMode::Speed, 1500.0),
            [0x02, 0x00, 0x00, 0x70, 0x17]
        );
        assert_eq!(
            app_command_payload(ControlMode::Speed, -1500.0),
            [0x02, 0x00, 0x00, 0x90, 0xE8]
        );
        assert_eq!(
            app_command_payload(ControlMode::Current, 1500.0)[1..],
            [0x00, 0x00, 0x70, 0x17]
        );
    }

    #[test]
    fn torque_uses_q10_22() {
        assert_eq!(
            app_command_payload(ControlMode::Torque, 50.0),
            [0x04, 0x00, 0x00, 0x80, 0x0C]
        );
    }

    #[test]
    fn pwm_is_raw_passthrough() {
        assert_eq!(
            app_command_payload(ControlMode::Pwm, -1.0),
            [0x08, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            app_command_payload(ControlMode::Pwm, 1e12)[1..],
            i32::MAX.to_le_bytes()
        );
    }

    #[test]
    fn idle_forces_zero_setpoint() {
        assert_eq!(app_command_payload(ControlMode::Idle, 1234.5), [0; 5]);
    }

    #[test]
    fn poke_layout() {
        assert_eq!(
            poke_payload(0x07, 0xDEADBEEF),
            [0x07, 0xEF, 0xBE, 0xAD, 0xDE]
        );
    }
}
