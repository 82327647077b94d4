//! Physical Layer (PHY) Submodules
//!
//! Return link burst waveforms, carrier and time slot geometry of the
//! frames and the superframe layouts built from them.

pub mod frame_structure;
pub mod superframe;
pub mod waveform;

// Re-export commonly used types
pub use frame_structure::{BtuConf, CarrierBandwidthType, FrameConf, FrameConfParams, TimeSlotConf};
pub use superframe::{FrameSpec, RaChannel, SuperframeConf, SuperframeParams};
pub use waveform::{
    BlerCurveLinkResults, LinkResults, StaticLinkResults, Waveform, WaveformCatalog, WaveformCatalogConfig,
    WaveformSelection,
};
