use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// calculate how many seconds passed since `1970-1-1 00:00:00`,named as [UNIX_EPOCH],
/// truncated to the 32 bits an ext2 timestamp holds
pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or_default()
}

/// turn an on-disk timestamp back into a [SystemTime]
pub fn to_system_time(seconds: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds as u64)
}
