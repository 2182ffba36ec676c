pub use murmur_transport::NodeUuid;

/// Default beacon broadcast interval.
pub const BEACON_INTERVAL_MS: u64 = 1_000;

/// A silent peer is pinged once after this long without traffic.
pub const EVASIVE_MS: u64 = 5_000;

/// A silent peer is expired (EXIT) after this long without traffic.
pub const EXPIRY_MS: u64 = 30_000;

/// Maximum size of one frame on a reliable channel.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        // Sanity: we are past 2020.
        assert!(a > 1_577_836_800_000);
    }

    #[test]
    fn evasive_precedes_expiry() {
        assert!(EVASIVE_MS < EXPIRY_MS);
    }
}
