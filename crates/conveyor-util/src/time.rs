use chrono::{DateTime, Local, TimeZone as _, Utc};

/// Source of wall-clock time for naming logs and stored requests.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that always reports the same instant.
pub struct FixedClock(DateTime<Local>);

impl FixedClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self(now)
    }

    /// A fixed clock at the given local time. Falls back to the epoch if the time is ambiguous or
    /// doesn't exist in the local time zone.
    pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        let now = Local
            .with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH.with_timezone(&Local));
        Self(now)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// `YYYY-MM-DD-HH-MM-SS-mmm`, which sorts the same lexically and chronologically.
pub fn timestamp(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d-%H-%M-%S-%3f").to_string()
}

/// `<stem>-<label>-<timestamp>.<extension>`, e.g. `Widget-BuildLog-2024-05-01-12-00-00-000.log`.
pub fn stamped_name(stem: &str, label: &str, extension: &str, at: DateTime<Local>) -> String {
    format!("{stem}-{label}-{}.{extension}", timestamp(at))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_format() {
        let clock = FixedClock::at(2024, 5, 1, 13, 4, 9);
        assert_eq!(timestamp(clock.now()), "2024-05-01-13-04-09-000");
    }

    #[test]
    fn stamped_name_format() {
        let clock = FixedClock::at(2024, 5, 1, 13, 4, 9);
        assert_eq!(
            stamped_name("Widget", "BuildLog", "log", clock.now()),
            "Widget-BuildLog-2024-05-01-13-04-09-000.log"
        );
    }

    #[test]
    fn milliseconds_are_kept() {
        let at = FixedClock::at(2024, 5, 1, 13, 4, 9).now() + chrono::Duration::milliseconds(42);
        assert_eq!(timestamp(at), "2024-05-01-13-04-09-042");
    }
}
