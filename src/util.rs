//! Utility functions shared by the load test and the noise generator.

use lazy_static::lazy_static;
use num_format::{Locale, ToFormattedString};
use regex::Regex;
use std::str::FromStr;
use std::sync::atomic::Ordering;

use crate::CANCELED;

lazy_static! {
    static ref TIMESPAN: Regex =
        Regex::new(r"^(?:(?P<hours>\d+)h)?(?:(?P<minutes>\d+)m)?(?:(?P<seconds>\d+)s)?$")
            .expect("failed to compile timespan regex");
}

/// Parse a string representing a time span and return the number of seconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", and "s", in that order, indicating
/// "hours", "minutes", and "seconds". Returns `None` if the string can't be
/// parsed.
///
/// # Example
/// ```rust
/// use pulse_loadtest::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), Some(3_723));
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45"), Some(45));
///
/// // Invalid value.
/// assert_eq!(util::parse_timespan("foo"), None);
/// ```
pub fn parse_timespan(time_str: &str) -> Option<usize> {
    let time_str = time_str.trim();
    // If an integer is passed in, assume it's seconds.
    if let Ok(t) = usize::from_str(time_str) {
        trace!("{} is integer: {} seconds", time_str, t);
        return Some(t);
    }

    // An empty string matches the regex but isn't a time span.
    if time_str.is_empty() {
        return None;
    }

    let time_matches = TIMESPAN.captures(time_str)?;
    let component = |name: &str| -> Option<usize> {
        match time_matches.name(name) {
            Some(value) => usize::from_str(value.as_str()).ok(),
            None => Some(0),
        }
    };
    let hours = component("hours")?;
    let minutes = component("minutes")?;
    let seconds = component("seconds")?;
    let total = hours
        .checked_mul(60 * 60)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    trace!(
        "{} hours {} minutes {} seconds: {} seconds",
        hours,
        minutes,
        seconds,
        total
    );
    Some(total)
}

/// Sleep for a specified duration, minus the time spent doing other things.
///
/// Returns a fresh drift timer to pass into the next call.
pub async fn sleep_minus_drift(
    duration: std::time::Duration,
    drift: tokio::time::Instant,
) -> tokio::time::Instant {
    match duration.checked_sub(drift.elapsed()) {
        Some(delay) if delay.as_nanos() > 0 => tokio::time::sleep(delay).await,
        _ => debug!("sleep_minus_drift: drift was greater than or equal to duration, not sleeping"),
    };
    tokio::time::Instant::now()
}

/// Return at most the first `max_chars` characters of a string.
///
/// Unlike slicing by byte offset this never splits a multi-byte character.
///
/// # Example
/// ```rust
/// use pulse_loadtest::util;
///
/// assert_eq!(util::truncate_chars("connection refused", 10), "connection");
/// assert_eq!(util::truncate_chars("héllo", 2), "hé");
/// assert_eq!(util::truncate_chars("short", 100), "short");
/// ```
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Round to 2 decimal places, used for every displayed statistic.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Format an integer with thousands separators.
pub fn format_number(number: usize) -> String {
    number.to_formatted_string(&Locale::en)
}

/// Returns true once ctrl-c has been caught.
pub(crate) fn canceled() -> bool {
    CANCELED.load(Ordering::SeqCst)
}

/// Install the ctrl-c handler. The first ctrl-c stops the running scenario
/// through the normal drain path, a second one exits immediately.
pub(crate) fn setup_ctrlc_handler() {
    CANCELED.store(false, Ordering::SeqCst);
    match ctrlc::set_handler(move || {
        if CANCELED.swap(true, Ordering::SeqCst) {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // The handler can only be installed once per process, which happens
            // when running multiple load tests from the same process.
            info!("reusing existing ctrl-c handler: {}", e);
        }
    }
}
