use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimpleNtp {
    pub seconds: u32,
    pub fraction: u32,
}

impl SimpleNtp {
    /// The middle 32 bits, the form report blocks carry as LSR.
    pub fn middle_32_bits(&self) -> u32 {
        ((self.seconds & 0xFFFF) << 16) | ((self.fraction >> 16) & 0xFFFF)
    }
}

impl From<u64> for SimpleNtp {
    fn from(value: u64) -> Self {
        Self {
            seconds: (value >> 32) as u32,
            fraction: (value & 0xFFFF_FFFF) as u32,
        }
    }
}

impl From<SimpleNtp> for u64 {
    fn from(value: SimpleNtp) -> Self {
        ((value.seconds as u64) << 32) | (value.fraction as u64)
    }
}

impl From<SystemTime> for SimpleNtp {
    fn from(value: SystemTime) -> Self {
        let since_epoch = value
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            seconds: (since_epoch.as_secs() + NTP_UNIX_OFFSET) as u32,
            fraction: ((since_epoch.subsec_nanos() as u64) << 32).div_euclid(1_000_000_000)
                as u32,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimpleShortNtp {
    pub seconds: u16,
    pub fraction: u16,
}

impl From<u32> for SimpleShortNtp {
    fn from(value: u32) -> Self {
        Self {
            seconds: ((value >> 16) & 0xFFFF) as u16,
            fraction: (value & 0xFFFF) as u16,
        }
    }
}

impl From<SimpleShortNtp> for u32 {
    fn from(value: SimpleShortNtp) -> Self {
        ((value.seconds as u32) << 16) | (value.fraction as u32)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn u64_round_trip() {
        let ntp: SimpleNtp = 0x0123_4567_89AB_CDEF_u64.into();
        assert_eq!(ntp.seconds, 0x0123_4567);
        assert_eq!(ntp.fraction, 0x89AB_CDEF);
        assert_eq!(u64::from(ntp), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn middle_bits() {
        let ntp: SimpleNtp = 0x0123_4567_89AB_CDEF_u64.into();
        assert_eq!(ntp.middle_32_bits(), 0x4567_89AB);
    }

    #[test]
    fn from_system_time_is_past_ntp_era() {
        let ntp: SimpleNtp = SystemTime::now().into();
        assert!(ntp.seconds as u64 > NTP_UNIX_OFFSET);
    }
}
