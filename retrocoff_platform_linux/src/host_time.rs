// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host wall-clock and file times broken down in the local time zone

use std::time::{SystemTime, UNIX_EPOCH};

use retrocoff_shim::syscalls::dos::CivilTime;

/// Break `seconds` since the epoch down into local civil time.
pub fn civil_from_unix(seconds: i64) -> CivilTime {
    let time = to_time_t(seconds);

    // SAFETY: all-zero bytes are a valid `tm`.
    let mut tm: libc::tm = unsafe { core::mem::zeroed() };
    // SAFETY: both pointers refer to live locals for the duration of the
    // call; localtime_r is reentrant.
    if unsafe { libc::localtime_r(&raw const time, &raw mut tm) }.is_null() {
        return CivilTime::default();
    }

    let field = |value: libc::c_int| u32::try_from(value).unwrap_or(0);
    CivilTime {
        year: field(tm.tm_year + 1900),
        month: field(tm.tm_mon + 1),
        day: field(tm.tm_mday),
        hour: field(tm.tm_hour),
        minute: field(tm.tm_min),
        second: field(tm.tm_sec),
    }
}

/// `time_t` is 32 bits wide on 32-bit x86 Linux; times outside it saturate.
#[cfg(target_pointer_width = "64")]
fn to_time_t(seconds: i64) -> libc::time_t {
    seconds
}

#[cfg(not(target_pointer_width = "64"))]
fn to_time_t(seconds: i64) -> libc::time_t {
    libc::time_t::try_from(seconds).unwrap_or(if seconds < 0 {
        libc::time_t::MIN
    } else {
        libc::time_t::MAX
    })
}

/// Local civil time of a `SystemTime`
pub fn civil_from_system(time: SystemTime) -> CivilTime {
    let seconds = match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    };
    civil_from_unix(seconds)
}

/// Current local time
pub fn now() -> CivilTime {
    civil_from_system(SystemTime::now())
}
