//! Clock sources for `clock_res_get` and `clock_time_get`.

use crate::errno::{Errno, Result};
use crate::types::{ClockId, Timestamp};
use std::io;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A clock hook: returns the current reading in nanoseconds.
pub type ClockFn = Box<dyn Fn() -> io::Result<Timestamp> + Send + Sync>;

/// The realtime and monotonic clock sources of a provider, each with the
/// precision it declares through `clock_res_get`. A clock left unset makes
/// reads of that clock fail with `ENOTSUP`; precisions are reported
/// verbatim either way. CPU-time clocks are never supported.
#[derive(Default)]
pub struct WasiClocks {
    pub realtime: Option<ClockFn>,
    pub realtime_precision: Timestamp,
    pub monotonic: Option<ClockFn>,
    pub monotonic_precision: Timestamp,
}

impl WasiClocks {
    /// Clocks backed by the operating system: wall-clock time since the
    /// Unix epoch with microsecond declared precision, and a monotonic
    /// reading anchored at construction with nanosecond declared precision.
    pub fn system() -> WasiClocks {
        let origin = Instant::now();
        WasiClocks {
            realtime: Some(Box::new(|| {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(io::Error::other)?;
                Ok(now.as_nanos() as Timestamp)
            })),
            realtime_precision: 1_000,
            monotonic: Some(Box::new(move || {
                Ok(origin.elapsed().as_nanos() as Timestamp)
            })),
            monotonic_precision: 1,
        }
    }

    pub fn res_get(&self, id: ClockId) -> Result<Timestamp> {
        match id {
            ClockId::Realtime => Ok(self.realtime_precision),
            ClockId::Monotonic => Ok(self.monotonic_precision),
            ClockId::ProcessCputime | ClockId::ThreadCputime => Err(Errno::Notsup),
        }
    }

    pub fn time_get(&self, id: ClockId) -> Result<Timestamp> {
        let clock = match id {
            ClockId::Realtime => &self.realtime,
            ClockId::Monotonic => &self.monotonic,
            ClockId::ProcessCputime | ClockId::ThreadCputime => return Err(Errno::Notsup),
        };
        match clock {
            Some(now) => now().map_err(Errno::from),
            None => Err(Errno::Notsup),
        }
    }
}
