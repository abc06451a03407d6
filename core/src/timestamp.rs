use core::{cmp, fmt, str, str::FromStr, time::Duration};

/**
A point in time, stored as a [`Duration`] since the Unix epoch.

Timestamps display as RFC 3339 UTC text with up to nanosecond precision,
which is also the form the message renderer writes for time-valued
properties.
*/
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub fn new(unix_time: Duration) -> Self {
        Timestamp(unix_time)
    }

    pub fn as_unix_time(&self) -> Duration {
        self.0
    }

    pub fn duration_since(self, earlier: Self) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }

    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Timestamp)
    }

    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.0.checked_sub(duration).map(Timestamp)
    }

    pub fn to_system_time(&self) -> std::time::SystemTime {
        std::time::SystemTime::UNIX_EPOCH + self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_rfc3339(*self, f)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_rfc3339(*self, f)
    }
}

impl FromStr for Timestamp {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_rfc3339(s)
    }
}

/**
An error attempting to parse a [`Timestamp`] from text.
*/
#[derive(Debug)]
pub struct ParseTimestampError {}

impl fmt::Display for ParseTimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the input was not a valid RFC 3339 UTC timestamp")
    }
}

impl std::error::Error for ParseTimestampError {}

fn parse_rfc3339(fmt: &str) -> Result<Timestamp, ParseTimestampError> {
    // Accepts `YYYY-MM-DDTHH:MM:SS[.f{1,9}]Z`; offsets other than `Z` are
    // not valid here
    let b = fmt.as_bytes();

    if b.len() < 20 || b.len() > 30 || b[b.len() - 1] != b'Z' {
        return Err(ParseTimestampError {});
    }

    if b[4] != b'-' || b[7] != b'-' || (b[10] != b'T' && b[10] != b't') || b[13] != b':' || b[16] != b':'
    {
        return Err(ParseTimestampError {});
    }

    let years = digits(&fmt[0..4])?;
    let months = digits(&fmt[5..7])?;
    let days = digits(&fmt[8..10])?;
    let hours = digits(&fmt[11..13])?;
    let minutes = digits(&fmt[14..16])?;
    let seconds = digits(&fmt[17..19])?;

    if !(1..=12).contains(&months)
        || !(1..=31).contains(&days)
        || hours > 23
        || minutes > 59
        || seconds > 59
    {
        return Err(ParseTimestampError {});
    }

    let nanos = if b.len() > 20 {
        if b[19] != b'.' {
            return Err(ParseTimestampError {});
        }

        let subsecond = &fmt[20..fmt.len() - 1];
        if subsecond.is_empty() || subsecond.len() > 9 {
            return Err(ParseTimestampError {});
        }

        digits(subsecond)? as u32 * 10u32.pow(9 - subsecond.len() as u32)
    } else {
        0
    };

    let unix_days = days_from_civil(years, months as u32, days as u32);
    let unix_secs = unix_days * 86_400 + hours * 3_600 + minutes * 60 + seconds;

    let unix_secs = u64::try_from(unix_secs).map_err(|_| ParseTimestampError {})?;

    Ok(Timestamp::new(Duration::new(unix_secs, nanos)))
}

fn digits(s: &str) -> Result<i64, ParseTimestampError> {
    if s.bytes().any(|b| !b.is_ascii_digit()) {
        return Err(ParseTimestampError {});
    }

    s.parse().map_err(|_| ParseTimestampError {})
}

// Days since 1970-01-01 for a proleptic Gregorian civil date
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = i64::from(if m > 2 { m - 3 } else { m + 9 });
    let doy = (153 * mp + 2) / 5 + i64::from(d) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;

    era * 146_097 + doe - 719_468
}

fn fmt_rfc3339(ts: Timestamp, f: &mut fmt::Formatter) -> fmt::Result {
    /*
    Original implementation: https://github.com/tokio-rs/prost/blob/master/prost-types/src/datetime.rs

    Licensed under Apache 2.0
    */

    let dur = ts.0;
    let secs: i64 = dur.as_secs().try_into().map_err(|_| fmt::Error)?;
    let nanos = dur.subsec_nanos();

    // 2000-03-01 (mod 400 year, immediately after feb29
    const LEAPOCH: i64 = 946_684_800 + 86400 * (31 + 29);
    const DAYS_PER_400Y: i32 = 365 * 400 + 97;
    const DAYS_PER_100Y: i32 = 365 * 100 + 24;
    const DAYS_PER_4Y: i32 = 365 * 4 + 1;
    const DAYS_IN_MONTH: [u8; 12] = [31, 30, 31, 30, 31, 31, 30, 31, 30, 31, 31, 29];

    let mut days: i64 = (secs / 86_400) - (LEAPOCH / 86_400);
    let mut remsecs: i32 = (secs % 86_400) as i32;
    if remsecs < 0i32 {
        remsecs += 86_400;
        days -= 1
    }

    let mut qc_cycles: i32 = (days / i64::from(DAYS_PER_400Y)) as i32;
    let mut remdays: i32 = (days % i64::from(DAYS_PER_400Y)) as i32;
    if remdays < 0 {
        remdays += DAYS_PER_400Y;
        qc_cycles -= 1;
    }

    let mut c_cycles: i32 = remdays / DAYS_PER_100Y;
    if c_cycles == 4 {
        c_cycles -= 1;
    }
    remdays -= c_cycles * DAYS_PER_100Y;

    let mut q_cycles: i32 = remdays / DAYS_PER_4Y;
    if q_cycles == 25 {
        q_cycles -= 1;
    }
    remdays -= q_cycles * DAYS_PER_4Y;

    let mut remyears: i32 = remdays / 365;
    if remyears == 4 {
        remyears -= 1;
    }
    remdays -= remyears * 365;

    let mut years: i64 = i64::from(remyears)
        + 4 * i64::from(q_cycles)
        + 100 * i64::from(c_cycles)
        + 400 * i64::from(qc_cycles);

    let mut months: i32 = 0;
    while i32::from(DAYS_IN_MONTH[months as usize]) <= remdays {
        remdays -= i32::from(DAYS_IN_MONTH[months as usize]);
        months += 1
    }

    if months >= 10 {
        months -= 12;
        years += 1;
    }

    let years = years + 2000;
    let months = months + 3;
    let days = remdays + 1;
    let hours = remsecs / 3600;
    let minutes = remsecs / 60 % 60;
    let seconds = remsecs % 60;

    const BUF_INIT: [u8; 30] = *b"0000-00-00T00:00:00.000000000Z";

    let mut buf: [u8; 30] = BUF_INIT;
    buf[0] = b'0' + (years / 1000) as u8;
    buf[1] = b'0' + (years / 100 % 10) as u8;
    buf[2] = b'0' + (years / 10 % 10) as u8;
    buf[3] = b'0' + (years % 10) as u8;
    buf[5] = b'0' + (months / 10) as u8;
    buf[6] = b'0' + (months % 10) as u8;
    buf[8] = b'0' + (days / 10) as u8;
    buf[9] = b'0' + (days % 10) as u8;
    buf[11] = b'0' + (hours / 10) as u8;
    buf[12] = b'0' + (hours % 10) as u8;
    buf[14] = b'0' + (minutes / 10) as u8;
    buf[15] = b'0' + (minutes % 10) as u8;
    buf[17] = b'0' + (seconds / 10) as u8;
    buf[18] = b'0' + (seconds % 10) as u8;

    let i = match f.precision() {
        Some(0) => 19,
        precision => {
            let mut i = 20;
            let mut divisor = 100_000_000;
            let end = i + cmp::min(9, precision.unwrap_or(9));

            while i < end {
                buf[i] = b'0' + (nanos / divisor % 10) as u8;

                i += 1;
                divisor /= 10;
            }

            i
        }
    };

    buf[i] = b'Z';

    // we know our chars are all ascii
    f.write_str(str::from_utf8(&buf[..=i]).expect("Conversion to utf8 failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrip() {
        let ts = Timestamp::new(Duration::new(1691961703, 17532));

        let fmt = ts.to_string();

        let parsed: Timestamp = fmt.parse().unwrap();

        assert_eq!(ts, parsed, "{}", fmt);
    }

    #[test]
    fn timestamp_format() {
        let ts = Timestamp::new(Duration::new(1704164645, 0));

        assert_eq!("2024-01-02T03:04:05.000000000Z", ts.to_string());
        assert_eq!("2024-01-02T03:04:05Z", format!("{:.0}", ts));
    }

    #[test]
    fn timestamp_parse_rejects_invalid() {
        for case in [
            "",
            "2024-01-02",
            "2024-01-02T03:04:05",
            "2024-13-02T03:04:05Z",
            "2024-01-02 03:04:05Z",
            "2024-01-02T03:04:05+01:00",
        ] {
            assert!(case.parse::<Timestamp>().is_err(), "{}", case);
        }
    }

    #[test]
    fn timestamp_arithmetic() {
        let ts = Timestamp::new(Duration::from_secs(100));

        assert_eq!(
            Some(Timestamp::new(Duration::from_secs(40))),
            ts.checked_sub(Duration::from_secs(60))
        );
        assert_eq!(None, ts.checked_sub(Duration::from_secs(200)));
        assert_eq!(
            Some(Duration::from_secs(60)),
            ts.duration_since(Timestamp::new(Duration::from_secs(40)))
        );
    }
}
