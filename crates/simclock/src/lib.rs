//! Discrete simulation time and per-host random number streams.
//!
//! Simulation time is a signed count of days. Durations and absolute times
//! share one value type, [`SimTime`]; time steps (one or five days) are a
//! property of the [`SimClock`], not of the time values themselves.
//!
//! Two reserved values mark "always in the past" and "always in the future".
//! Arithmetic involving them saturates instead of overflowing, so that for
//! every reachable time `x`, `never() + x < zero()` and `x < future()`.

pub mod rng;

pub use rng::{LocalRng, MasterRng};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("unsupported step interval: {0} days (must be 1 or 5)")]
    BadInterval(i32),

    #[error("maximum human age must be positive, got {0} days")]
    BadMaxAge(i32),
}

pub type Result<T> = std::result::Result<T, ClockError>;

/// Days per simulated year. Leap years are not modelled.
pub const DAYS_IN_YEAR: i32 = 365;

const NEVER_RAW: i32 = -0x3FFF_FFFF;
const FUTURE_RAW: i32 = 0x3FFF_FFFF;

/// A point in, or duration of, simulation time, in whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(i32);

impl SimTime {
    /// Duration zero.
    pub const fn zero() -> Self {
        SimTime(0)
    }

    /// One day.
    pub const fn one_day() -> Self {
        SimTime(1)
    }

    /// One year (365 days).
    pub const fn one_year() -> Self {
        SimTime(DAYS_IN_YEAR)
    }

    /// A time point always in the past: `never() + x < zero()` for every
    /// reachable `x`, without overflow.
    pub const fn never() -> Self {
        SimTime(NEVER_RAW)
    }

    /// A time point always in the future: `x < future()` and `x + future()`
    /// does not overflow, for every reachable `x`.
    pub const fn future() -> Self {
        SimTime(FUTURE_RAW)
    }

    pub const fn from_days(days: i32) -> Self {
        SimTime(days)
    }

    /// Convert from a whole number of years.
    pub const fn from_years_i(years: i32) -> Self {
        SimTime(DAYS_IN_YEAR * years)
    }

    pub fn is_never(self) -> bool {
        self.0 <= NEVER_RAW
    }

    pub fn is_future(self) -> bool {
        self.0 >= FUTURE_RAW
    }

    /// Raw day count. Same value as checkpointed.
    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn in_days(self) -> i32 {
        self.0
    }

    pub fn in_years(self) -> f64 {
        f64::from(self.0) * (1.0 / DAYS_IN_YEAR as f64)
    }

    /// Whole time steps of length `interval` days (rounding down).
    pub fn in_steps(self, interval: i32) -> i32 {
        self.0 / interval
    }

    /// Scale by an integer.
    pub fn scaled(self, scalar: i32) -> Self {
        SimTime(clamp_raw(i64::from(self.0) * i64::from(scalar)))
    }

    /// Scale by a double, rounding to nearest day.
    pub fn scaled_f(self, scalar: f64) -> Self {
        SimTime(clamp_raw((f64::from(self.0) * scalar + 0.5).floor() as i64))
    }
}

// Saturate into the open interval (never, future); the sentinels are
// absorbing under arithmetic.
fn clamp_raw(raw: i64) -> i32 {
    raw.clamp(i64::from(NEVER_RAW), i64::from(FUTURE_RAW)) as i32
}

impl std::ops::Add for SimTime {
    type Output = SimTime;
    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(clamp_raw(i64::from(self.0) + i64::from(rhs.0)))
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;
    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(clamp_raw(i64::from(self.0) - i64::from(rhs.0)))
    }
}

impl std::ops::Neg for SimTime {
    type Output = SimTime;
    fn neg(self) -> SimTime {
        SimTime(clamp_raw(-i64::from(self.0)))
    }
}

impl std::ops::AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        *self = *self + rhs;
    }
}

/// True modulus over day counts: the result is in `[0, rhs)` and
/// `lhs - mod_nn(lhs, rhs)` is divisible by `rhs`, for any sign of `lhs`.
pub fn mod_nn(lhs: SimTime, rhs: SimTime) -> SimTime {
    SimTime(mod_nn_i(lhs.0, rhs.0))
}

/// Integer form of [`mod_nn`]. `b` must be positive.
pub fn mod_nn_i(a: i32, b: i32) -> i32 {
    debug_assert!(b > 0);
    let r = a % b;
    if r >= 0 {
        r
    } else {
        r + b
    }
}

/// The simulation step clock.
///
/// During a step update the clock exposes distinct times at the start
/// ([`SimClock::ts0`]) and end ([`SimClock::ts1`]) of the step; outside
/// updates they coincide and [`SimClock::now`] is the one to use. The
/// `start_update`/`end_update` pair forms the step barrier: no host may see
/// another host's updated state until both are past `end_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    interval: i32,
    steps_per_year: i32,
    years_per_step: f64,
    max_human_age: SimTime,
    time0: SimTime,
    time1: SimTime,
    in_update: bool,
}

impl SimClock {
    /// Create a clock with the given step interval in days (1 or 5) and
    /// maximum human age.
    pub fn new(interval_days: i32, max_human_age: SimTime) -> Result<Self> {
        if interval_days != 1 && interval_days != 5 {
            return Err(ClockError::BadInterval(interval_days));
        }
        if max_human_age <= SimTime::zero() {
            return Err(ClockError::BadMaxAge(max_human_age.in_days()));
        }
        Ok(SimClock {
            interval: interval_days,
            steps_per_year: DAYS_IN_YEAR / interval_days,
            years_per_step: f64::from(interval_days) / DAYS_IN_YEAR as f64,
            max_human_age,
            time0: SimTime::zero(),
            time1: SimTime::zero(),
            in_update: false,
        })
    }

    /// One time step as a duration.
    pub fn one_step(&self) -> SimTime {
        SimTime::from_days(self.interval)
    }

    pub fn interval(&self) -> i32 {
        self.interval
    }

    pub fn steps_per_year(&self) -> i32 {
        self.steps_per_year
    }

    pub fn years_per_step(&self) -> f64 {
        self.years_per_step
    }

    pub fn max_human_age(&self) -> SimTime {
        self.max_human_age
    }

    /// Time at the beginning of the step update. Only valid during updates.
    pub fn ts0(&self) -> SimTime {
        assert!(self.in_update, "ts0 used outside of a step update");
        self.time0
    }

    /// Time at the end of the step update. Only valid during updates.
    pub fn ts1(&self) -> SimTime {
        assert!(self.in_update, "ts1 used outside of a step update");
        self.time1
    }

    /// Time between updates (monitoring, deployment). Panics mid-update.
    pub fn now(&self) -> SimTime {
        assert!(!self.in_update, "now used during a step update");
        self.time0
    }

    /// During updates this is `ts0`; between updates it is `now`.
    pub fn now_or_ts0(&self) -> SimTime {
        self.time0
    }

    /// During updates this is `ts1`; between updates it is `now`.
    pub fn now_or_ts1(&self) -> SimTime {
        self.time1
    }

    /// Enter the update phase: `ts1` moves one step ahead of `ts0`.
    pub fn start_update(&mut self) {
        assert!(!self.in_update);
        self.time1 = self.time0 + self.one_step();
        self.in_update = true;
    }

    /// Leave the update phase: `ts0` catches up with `ts1`.
    pub fn end_update(&mut self) {
        assert!(self.in_update);
        self.time0 = self.time1;
        self.in_update = false;
    }

    /// Convert a step count to a duration.
    pub fn from_steps(&self, steps: i32) -> SimTime {
        SimTime::from_days(self.interval * steps)
    }

    /// Convert from years, rounding to the nearest step.
    pub fn from_years_n(&self, years: f64) -> SimTime {
        self.round_to_step_from_days(DAYS_IN_YEAR as f64 * years)
    }

    /// Convert from years, rounding down to the step below.
    pub fn from_years_d(&self, years: f64) -> SimTime {
        self.from_steps((self.steps_per_year as f64 * years).floor() as i32)
    }

    /// Round a day count to the nearest whole step.
    pub fn round_to_step_from_days(&self, days: f64) -> SimTime {
        self.from_steps((days / f64::from(self.interval) + 0.5).floor() as i32)
    }

    /// A time in steps, modulo a positive step count.
    pub fn modulo_steps(&self, t: SimTime, denominator: i32) -> i32 {
        mod_nn_i(t.in_days() / self.interval, denominator)
    }

    /// A time in steps, modulo the number of steps per year.
    pub fn modulo_year_steps(&self, t: SimTime) -> i32 {
        mod_nn_i(t.in_days() / self.interval, self.steps_per_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_laws() {
        let max_age = SimTime::from_years_i(90);
        // never() + x < 0 for every reachable x, including a full lifetime
        let far = SimTime::from_years_i(10_000);
        assert!(SimTime::never() + far < SimTime::zero());
        assert!(SimTime::never() + max_age < SimTime::zero());
        // x < future() and x + future() does not overflow
        assert!(far < SimTime::future());
        let sum = far + SimTime::future();
        assert!(sum.is_future());
        // sentinels are absorbing
        assert!((SimTime::never() - far).is_never());
        assert!(SimTime::never().is_never());
        assert!(!SimTime::zero().is_never());
    }

    #[test]
    fn mod_nn_laws() {
        for lhs in [-731, -365, -1, 0, 1, 4, 5, 17, 365, 9999] {
            for rhs in [1, 5, 7, 365] {
                let l = SimTime::from_days(lhs);
                let r = SimTime::from_days(rhs);
                let m = mod_nn(l, r);
                assert!(m >= SimTime::zero() && m < r, "mod_nn({lhs},{rhs}) = {m:?}");
                assert_eq!((lhs - m.in_days()) % rhs, 0);
            }
        }
    }

    #[test]
    fn conversions() {
        let t = SimTime::from_years_i(2);
        assert_eq!(t.in_days(), 730);
        assert!((t.in_years() - 2.0).abs() < 1e-12);
        assert_eq!(t.in_steps(5), 146);
        assert_eq!(SimTime::from_days(7).in_steps(5), 1);
    }

    #[test]
    fn clock_phases() {
        let mut clock = SimClock::new(5, SimTime::from_years_i(90)).unwrap();
        assert_eq!(clock.steps_per_year(), 73);
        assert_eq!(clock.now(), SimTime::zero());
        clock.start_update();
        assert_eq!(clock.ts0(), SimTime::zero());
        assert_eq!(clock.ts1(), SimTime::from_days(5));
        clock.end_update();
        assert_eq!(clock.now(), SimTime::from_days(5));
    }

    #[test]
    fn clock_rejects_bad_interval() {
        assert!(SimClock::new(3, SimTime::from_years_i(90)).is_err());
        assert!(SimClock::new(1, SimTime::from_years_i(90)).is_ok());
    }

    #[test]
    fn rounding() {
        let clock = SimClock::new(5, SimTime::from_years_i(90)).unwrap();
        assert_eq!(clock.round_to_step_from_days(7.0), SimTime::from_days(5));
        assert_eq!(clock.round_to_step_from_days(8.0), SimTime::from_days(10));
        assert_eq!(clock.from_years_n(83.2591).in_days() % 5, 0);
    }
}
