//! Common Utilities
//!
//! Unit conversions used by the allocator and the hub

use std::time::Duration;
use tracing::trace;

/// Bits in one kbit
pub const BITS_IN_KBIT: f64 = 1000.0;

/// Bits in one byte
pub const BITS_PER_BYTE: f64 = 8.0;

/// Bytes in one kbyte
pub const BYTES_IN_KBYTE: u32 = 1000;

/// Convert a value in dB to linear scale
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear value to dB
pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// Bytes carried by a rate in kbps during a duration, rounded down
pub fn kbps_to_bytes(rate_kbps: u32, duration: Duration) -> u32 {
    let bytes = BITS_IN_KBIT * rate_kbps as f64 * duration.as_secs_f64() / BITS_PER_BYTE;
    trace!("{} kbps over {:?} is {} bytes", rate_kbps, duration, bytes);
    bytes as u32
}

/// Rate in kbps needed to carry the given bytes during a duration
pub fn bytes_to_kbps(bytes: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    bytes as f64 * BITS_PER_BYTE / seconds / BITS_IN_KBIT
}

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conversions() {
        assert!((db_to_linear(10.0) - 10.0).abs() < 1e-9);
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-12);
        assert!((linear_to_db(100.0) - 20.0).abs() < 1e-9);
        assert!((linear_to_db(db_to_linear(63.5)) - 63.5).abs() < 1e-9);
    }

    #[test]
    fn test_kbps_to_bytes() {
        // 50 kbps over 100 ms is 5000 bits
        assert_eq!(kbps_to_bytes(50, Duration::from_millis(100)), 625);
        assert_eq!(kbps_to_bytes(0, Duration::from_millis(100)), 0);
    }

    #[test]
    fn test_bytes_to_kbps() {
        assert!((bytes_to_kbps(625, Duration::from_millis(100)) - 50.0).abs() < 1e-9);
        assert_eq!(bytes_to_kbps(100, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }
}
