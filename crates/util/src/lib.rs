use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Seconds since UNIX epoch
pub type UnixSecs = i64;

pub fn unix_secs() -> UnixSecs {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs().min(i64::MAX as u64) as i64,
        Err(_) => 0, // clock went backwards; clamp
    }
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_secs_is_monotonic_enough() {
        let t1 = unix_secs();
        let t2 = unix_secs();
        assert!(t2 >= t1, "unix_secs went backwards");
    }

    #[test]
    fn unix_secs_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(unix_secs() > 1_577_836_800);
    }
}
