//! Konfigurasi segment dan perilaku consumer

use std::env;
use std::str::FromStr;

use crate::core::{FragmentHeader, FRAGMENTS_OFFSET};
use crate::error::SegmentError;
use crate::trace::warn;

/// Ukuran maksimum segment: byte offset harus muat di 32 bit bawah
/// [`RelativeOffset`](crate::core::RelativeOffset).
pub const MAX_SEGMENT_SIZE: usize = 1 << 32;

/// Bentuk segment milik satu rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Total ukuran segment dalam bytes (header + fifo + fragments)
    pub size: usize,
    /// Ukuran satu fragment slot, termasuk `FragmentHeader`
    pub fragment_size: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            size: 1024 * 1024,
            fragment_size: 256,
        }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> Result<(), SegmentError> {
        let header = std::mem::size_of::<FragmentHeader>();
        let align = std::mem::align_of::<FragmentHeader>();

        if self.fragment_size < header {
            return Err(SegmentError::InvalidConfig(
                "fragment_size smaller than the fragment header",
            ));
        }
        if self.fragment_size % align != 0 {
            return Err(SegmentError::InvalidConfig(
                "fragment_size must keep fragment headers aligned",
            ));
        }
        if self.size > MAX_SEGMENT_SIZE {
            return Err(SegmentError::InvalidConfig(
                "segment larger than a relative offset can address",
            ));
        }
        if self.size < FRAGMENTS_OFFSET + self.fragment_size {
            return Err(SegmentError::InvalidConfig(
                "segment too small to hold a single fragment",
            ));
        }
        Ok(())
    }

    /// Jumlah fragment slot yang muat setelah header dan fifo.
    pub fn fragment_count(&self) -> usize {
        self.size.saturating_sub(FRAGMENTS_OFFSET) / self.fragment_size.max(1)
    }
}

/// Cara consumer menunggu producer yang sedang menyambung `next`.
///
/// Kedua mode tidak membatasi lamanya tunggu; producer yang mati di tengah
/// `write` akan membuat consumer berputar selamanya.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpinPolicy {
    /// Tight spin dengan CPU relax hint
    #[default]
    Busy,
    /// Exponential backoff, lalu yield ke scheduler
    Backoff,
}

impl FromStr for SpinPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "busy" => Ok(Self::Busy),
            "backoff" => Ok(Self::Backoff),
            other => Err(format!("unknown spin policy `{other}` (expected busy|backoff)")),
        }
    }
}

/// Konfigurasi sisi consumer, lokal per proses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoConfig {
    pub spin: SpinPolicy,
}

impl FifoConfig {
    /// Env variable yang dibaca oleh [`FifoConfig::from_env`].
    pub const SPIN_ENV: &'static str = "SHM_FIFO_SPIN";

    /// Baca `SHM_FIFO_SPIN=busy|backoff`; nilai tidak dikenal jatuh ke default.
    pub fn from_env() -> Self {
        let spin = match env::var(Self::SPIN_ENV) {
            Ok(value) => value.parse().unwrap_or_else(|err: String| {
                warn!(%err, "ignoring {}", Self::SPIN_ENV);
                SpinPolicy::default()
            }),
            Err(_) => SpinPolicy::default(),
        };
        Self { spin }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SegmentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.fragment_count(),
            (1024 * 1024 - FRAGMENTS_OFFSET) / 256
        );
    }

    #[test]
    fn test_rejects_bad_fragment_size() {
        let tiny = SegmentConfig {
            size: 4096,
            fragment_size: 8,
        };
        assert!(matches!(
            tiny.validate(),
            Err(SegmentError::InvalidConfig(_))
        ));

        let unaligned = SegmentConfig {
            size: 4096,
            fragment_size: 100,
        };
        assert!(unaligned.validate().is_err());
    }

    #[test]
    fn test_rejects_segment_without_room() {
        let config = SegmentConfig {
            size: FRAGMENTS_OFFSET,
            fragment_size: 64,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_segment_beyond_offset_range() {
        let config = SegmentConfig {
            size: MAX_SEGMENT_SIZE + 64,
            fragment_size: 64,
        };
        assert!(matches!(
            config.validate(),
            Err(SegmentError::InvalidConfig(_))
        ));

        let largest = SegmentConfig {
            size: MAX_SEGMENT_SIZE,
            fragment_size: 64,
        };
        assert!(largest.validate().is_ok());
    }

    #[test]
    fn test_fifo_config_from_env() {
        // Satu-satunya test yang menyentuh SHM_FIFO_SPIN
        env::set_var(FifoConfig::SPIN_ENV, "backoff");
        assert_eq!(FifoConfig::from_env().spin, SpinPolicy::Backoff);

        env::set_var(FifoConfig::SPIN_ENV, "yield");
        assert_eq!(FifoConfig::from_env().spin, SpinPolicy::Busy);

        env::remove_var(FifoConfig::SPIN_ENV);
        assert_eq!(FifoConfig::from_env(), FifoConfig::default());
    }

    #[test]
    fn test_spin_policy_parse() {
        assert_eq!("busy".parse::<SpinPolicy>(), Ok(SpinPolicy::Busy));
        assert_eq!("Backoff".parse::<SpinPolicy>(), Ok(SpinPolicy::Backoff));
        assert!("yield".parse::<SpinPolicy>().is_err());
    }
}
