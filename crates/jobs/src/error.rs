// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// Fallible boundaries of the job runtime. Internal scheduler invariants
/// (a job already executing, a runner index out of range) are bugs and
/// stay `debug_assert!`/`panic!`, not variants here.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no runner matches affinity mask {0:#x}")]
    NoEligibleRunner(u64),
    #[error("timer {0} was not found (already fired or already canceled)")]
    UnknownTimer(u64),
    #[error("disk load queue is full ({in_flight}/{limit} in flight)")]
    AsyncQueueFull { in_flight: usize, limit: usize },
    #[error("invalid job manager config")]
    InvalidConfig(#[from] serde_json::Error),
}
