//! Common Types for the DVB-RCS2 Return Link
//!
//! Defines fundamental types shared by the allocator, the transport and the hub

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;

/// Short burst length in symbols
pub const SHORT_BURST_LENGTH: u32 = 536;

/// Long burst length in symbols
pub const LONG_BURST_LENGTH: u32 = 1616;

/// Highest time slot id representable in a TBTP
pub const MAX_TIME_SLOT_ID: u16 = 2047;

/// Maximum number of DA services (reservation categories) per terminal
pub const MAX_DA_SERVICES: usize = 4;

/// Terminal MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TerminalAddress(pub [u8; 6]);

impl TerminalAddress {
    /// Create an address from raw octets
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Build a locally administered address from a sequence number
    pub fn from_index(index: u32) -> Self {
        let b = index.to_be_bytes();
        Self([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    /// Get the raw octets
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for TerminalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl std::str::FromStr for TerminalAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(format!("Invalid terminal address: {}", s));
        }
        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("Invalid terminal address: {}", s))?;
        }
        Ok(Self(octets))
    }
}

/// Beam identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BeamId(pub u32);

/// Gateway identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GatewayId(pub u32);

impl fmt::Display for BeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capacity category level used by the allocation fallback ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum CcLevel {
    /// CRA only
    Cra = 0,
    /// CRA and minimum RBDC
    CraMinRbdc = 1,
    /// CRA and RBDC
    CraRbdc = 2,
    /// CRA, RBDC and VBDC
    CraRbdcVbdc = 3,
}

impl CcLevel {
    /// Levels in the order allocation attempts them
    pub const LADDER: [CcLevel; 4] = [
        CcLevel::CraRbdcVbdc,
        CcLevel::CraRbdc,
        CcLevel::CraMinRbdc,
        CcLevel::Cra,
    ];
}

/// Superframe configuration type, selecting the allocation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum ConfigType {
    /// Fixed default waveform, fixed slot layout
    Type0 = 0,
    /// ACM with a fixed burst length
    Type1 = 1,
    /// ACM with variable burst lengths
    Type2 = 2,
    /// Bandwidth subdivision with dynamic carrier selection
    Type3 = 3,
    /// Single random access frame for logon
    Type4 = 4,
}

impl ConfigType {
    /// Whether slot waveforms follow the terminal C/N0
    pub fn uses_acm(&self) -> bool {
        !matches!(self, ConfigType::Type0)
    }

    /// Whether several burst lengths may be used in one frame
    pub fn uses_variable_burst_length(&self) -> bool {
        matches!(self, ConfigType::Type2 | ConfigType::Type3)
    }
}

/// Time slot usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotType {
    /// Control (signalling) slot
    Control,
    /// Traffic slot
    Traffic,
    /// Either control or traffic
    ControlOrTraffic,
}

/// Burst lengths enabled in the waveform configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstLengthConfig {
    /// Short bursts only
    Short,
    /// Long bursts only
    Long,
    /// Both short and long bursts
    ShortAndLong,
}

impl BurstLengthConfig {
    /// Burst lengths in symbols, shortest first
    pub fn lengths(&self) -> Vec<u32> {
        match self {
            BurstLengthConfig::Short => vec![SHORT_BURST_LENGTH],
            BurstLengthConfig::Long => vec![LONG_BURST_LENGTH],
            BurstLengthConfig::ShortAndLong => vec![SHORT_BURST_LENGTH, LONG_BURST_LENGTH],
        }
    }
}

/// Category of a capacity request item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityCategory {
    /// Rate based dynamic capacity, kbps
    Rbdc,
    /// Volume based dynamic capacity, bytes added to the backlog
    Vbdc,
    /// Absolute volume based dynamic capacity, bytes replacing the backlog
    Avbdc,
}

/// One item of a terminal capacity request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRequestItem {
    /// Reservation category index
    pub rc_index: u8,
    /// Request category
    pub category: CapacityCategory,
    /// Requested value, kbps for RBDC and bytes otherwise
    pub value: u32,
}

/// Handling of pending capacity requests on handover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverStrategy {
    /// Always drop pending requests
    AlwaysClear,
    /// Drop pending requests only when the gateway changes
    ClearIfDifferentGateway,
}

/// C/N0 estimation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CnoEstimationMode {
    /// Last received sample
    Last,
    /// Minimum over the window
    Minimum,
    /// Average over the window
    Average,
}

/// Return link modulation and coding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modcod {
    Bpsk1To3,
    Qpsk1To3,
    Qpsk1To2,
    Qpsk2To3,
    Qpsk3To4,
    Qpsk5To6,
    Psk8_2To3,
    Psk8_3To4,
    Psk8_5To6,
    Qam16_3To4,
    Qam16_5To6,
}

impl Modcod {
    /// Resolve a MODCOD from modulated bits and a coding rate fraction
    pub fn from_parts(modulated_bits: u32, numerator: u32, denominator: u32) -> Option<Self> {
        let modcod = match (modulated_bits, numerator, denominator) {
            (1, 1, 3) => Modcod::Bpsk1To3,
            (2, 1, 3) => Modcod::Qpsk1To3,
            (2, 1, 2) => Modcod::Qpsk1To2,
            (2, 2, 3) => Modcod::Qpsk2To3,
            (2, 3, 4) => Modcod::Qpsk3To4,
            (2, 5, 6) => Modcod::Qpsk5To6,
            (3, 2, 3) => Modcod::Psk8_2To3,
            (3, 3, 4) => Modcod::Psk8_3To4,
            (3, 5, 6) => Modcod::Psk8_5To6,
            (4, 3, 4) => Modcod::Qam16_3To4,
            (4, 5, 6) => Modcod::Qam16_5To6,
            _ => return None,
        };
        Some(modcod)
    }

    /// Name used in link result tables
    pub fn name(&self) -> &'static str {
        match self {
            Modcod::Bpsk1To3 => "BPSK_1_TO_3",
            Modcod::Qpsk1To3 => "QPSK_1_TO_3",
            Modcod::Qpsk1To2 => "QPSK_1_TO_2",
            Modcod::Qpsk2To3 => "QPSK_2_TO_3",
            Modcod::Qpsk3To4 => "QPSK_3_TO_4",
            Modcod::Qpsk5To6 => "QPSK_5_TO_6",
            Modcod::Psk8_2To3 => "8PSK_2_TO_3",
            Modcod::Psk8_3To4 => "8PSK_3_TO_4",
            Modcod::Psk8_5To6 => "8PSK_5_TO_6",
            Modcod::Qam16_3To4 => "16QAM_3_TO_4",
            Modcod::Qam16_5To6 => "16QAM_5_TO_6",
        }
    }

    /// Look a MODCOD up by table name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }

    /// Every supported MODCOD
    pub const ALL: [Modcod; 11] = [
        Modcod::Bpsk1To3,
        Modcod::Qpsk1To3,
        Modcod::Qpsk1To2,
        Modcod::Qpsk2To3,
        Modcod::Qpsk3To4,
        Modcod::Qpsk5To6,
        Modcod::Psk8_2To3,
        Modcod::Psk8_3To4,
        Modcod::Psk8_5To6,
        Modcod::Qam16_3To4,
        Modcod::Qam16_5To6,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_terminal_address_display_and_parse() {
        let addr = TerminalAddress::from_index(258);
        assert_eq!(addr.to_string(), "02:00:00:00:01:02");

        let parsed: TerminalAddress = "02:00:00:00:01:02".parse().unwrap();
        assert_eq!(parsed, addr);
        assert!("02:00:00".parse::<TerminalAddress>().is_err());
    }

    #[test]
    fn test_cc_level_ladder_is_descending() {
        assert_eq!(CcLevel::LADDER[0], CcLevel::CraRbdcVbdc);
        assert!(CcLevel::LADDER.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(CcLevel::from_u8(1), Some(CcLevel::CraMinRbdc));
    }

    #[test]
    fn test_config_type_policies() {
        assert_eq!(ConfigType::from_u8(3), Some(ConfigType::Type3));
        assert!(ConfigType::from_u8(5).is_none());
        assert!(!ConfigType::Type0.uses_acm());
        assert!(ConfigType::Type2.uses_variable_burst_length());
        assert!(!ConfigType::Type1.uses_variable_burst_length());
    }

    #[test]
    fn test_modcod_lookup() {
        assert_eq!(Modcod::from_parts(2, 1, 3), Some(Modcod::Qpsk1To3));
        assert_eq!(Modcod::from_parts(4, 5, 6), Some(Modcod::Qam16_5To6));
        assert_eq!(Modcod::from_parts(3, 1, 2), None);
        assert_eq!(Modcod::from_name("8PSK_3_TO_4"), Some(Modcod::Psk8_3To4));
    }
}
