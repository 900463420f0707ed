// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Gets the unix timestamp as a duration
#[allow(clippy::expect_used)]
pub fn unix_timestamp() -> std::time::Duration {
    let now = std::time::SystemTime::now();

    now.duration_since(std::time::SystemTime::UNIX_EPOCH)
        .expect("time went backwards")
}

/// Gets the unix timestamp in milliseconds.
///
/// Used for revision timestamps and announce records.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn unix_timestamp_millis() -> i64 {
    unix_timestamp().as_millis() as i64
}
