//! Protocol constants for NSP communication.
//!
//! This module defines the constants used on the RS-485 bus, including SLIP
//! framing bytes, addressing, timing defaults and the bit assignments used by
//! the device's status, fault and protection registers.

/// SLIP frame delimiter
pub const END: u8 = 0xC0;

/// SLIP escape byte
pub const ESC: u8 = 0xDB;

/// Escaped form of [`END`] (follows [`ESC`])
pub const ESC_END: u8 = 0xDC;

/// Escaped form of [`ESC`] (follows [`ESC`])
pub const ESC_ESC: u8 = 0xDD;

/// Highest addressable device on the bus (addresses are set by ADDR0-ADDR2 pins)
pub const MAX_DEVICE_ADDRESS: u8 = 0x07;

/// Destination address heard by every device; never answered
pub const BROADCAST: u8 = 0xFF;

/// Address the host uses as packet source
pub const DEFAULT_HOST_ADDRESS: u8 = 0x11;

/// Device address used when none is configured
pub const DEFAULT_DEVICE_ADDRESS: u8 = 0x07;

/// Protocol-wide payload cap in bytes
pub const MAX_PAYLOAD: usize = 32;

/// Destination, source and control bytes
pub const HEADER_LEN: usize = 3;

/// Trailing CRC bytes
pub const CRC_LEN: usize = 2;

/// Smallest valid packet: header plus CRC, no payload
pub const MIN_PACKET: usize = HEADER_LEN + CRC_LEN;

/// Largest valid packet: header, full payload and CRC
pub const MAX_PACKET: usize = HEADER_LEN + MAX_PAYLOAD + CRC_LEN;

/// Control byte: request/reply flag (1 = request)
pub const POLL_BIT: u8 = 0x80;

/// Control byte: sequence bit
pub const SEQ_BIT: u8 = 0x40;

/// Control byte: acknowledge flag, set by the device in accepted replies
pub const ACK_BIT: u8 = 0x20;

/// Control byte: command code field
pub const CMD_MASK: u8 = 0x1F;

/// Bus baud rate (455.6-465.7 kbps tolerated by the device)
pub const BAUD_RATE: u32 = 460_800;

/// Reply timeout in milliseconds
pub const TIMEOUT_MS: u64 = 10;

/// Retransmissions after the first attempt
pub const RETRIES: u32 = 2;

/// Consecutive failures on one link before switching to the alternate
pub const FAILOVER_THRESHOLD: u32 = 3;

/// Longest single blocking read while waiting for a reply
pub const POLL_SLICE_MS: u64 = 2;

/// Addressable memory locations used with PEEK/POKE.
pub mod memory {
    /// Device serial number (read-only)
    pub const SERIAL_NUMBER: u8 = 0x00;

    /// Overspeed fault threshold, UQ24.8 RPM
    pub const OVERSPEED_FAULT_THRESHOLD: u8 = 0x06;

    /// Active speed limit, UQ14.18 RPM
    pub const ACTIVE_SPEED_LIMIT: u8 = 0x07;
}

/// Bits accepted by CONFIGURE_PROTECTION.
pub mod protection {
    pub const OVERSPEED_FAULT: u32 = 1 << 0;
    pub const OVERSPEED_LIMIT: u32 = 1 << 1;
    pub const OVERCURRENT_LIMIT: u32 = 1 << 2;
    pub const EDAC_SCRUB: u32 = 1 << 3;
    pub const BRAKING_OVERVOLTAGE_LOAD: u32 = 1 << 4;

    pub const ALL: u32 = OVERSPEED_FAULT
        | OVERSPEED_LIMIT
        | OVERCURRENT_LIMIT
        | EDAC_SCRUB
        | BRAKING_OVERVOLTAGE_LOAD;
}

/// Bits of the fault word reported in STANDARD telemetry and cleared by CLEAR_FAULT.
pub mod fault {
    pub const MOTOR_DRIVE_FAULT: u32 = 0x001;
    pub const MOTOR_DRIVE_OTW: u32 = 0x002;
    pub const HALL_INVALID_STATE: u32 = 0x004;
    pub const HALL_INVALID_TRANS: u32 = 0x008;
    pub const OVERVOLTAGE: u32 = 0x010;
    pub const OVERSPEED_FAULT: u32 = 0x020;
    pub const OVERSPEED_LIMITED: u32 = 0x040;
    pub const OVERPOWER_LIMITED: u32 = 0x080;
    pub const CURRENT_LIMITED: u32 = 0x100;

    /// Mask clearing every latched fault
    pub const ALL: u32 = 0xFFFF_FFFF;
}

/// Bits of the status word reflecting disabled protections.
pub mod status {
    pub const OVERSPEED_FAULT_DISABLED: u32 = 0x02_0000;
    pub const OVERSPEED_LIMIT_DISABLED: u32 = 0x04_0000;
    pub const OVERCURRENT_DISABLED: u32 = 0x08_0000;
    pub const EDAC_SCRUB_DISABLED: u32 = 0x10_0000;
    pub const BRAKING_LOAD_DISABLED: u32 = 0x20_0000;
}
