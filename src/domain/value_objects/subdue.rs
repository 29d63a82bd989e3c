use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Which gate a subdue window applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubdueAt {
    Handler,
    Publisher,
}

/// A time/weekday window during which scheduling or handling of a check is
/// suppressed.
///
/// `begin`/`end` are wall-clock times (`HH:MM` or `HH:MM:SS`); a window with
/// `end < begin` crosses midnight and covers both calendar segments.
/// `exceptions` punch holes back out of the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subdue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<SubdueAt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<Vec<TimeWindow>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub begin: String,
    pub end: String,
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn in_window(now: NaiveTime, begin: &str, end: &str) -> bool {
    let (Some(begin), Some(end)) = (parse_time(begin), parse_time(end)) else {
        return false;
    };
    if end < begin {
        // Crosses midnight: covered by either calendar segment.
        now >= begin || now <= end
    } else {
        now >= begin && now <= end
    }
}

impl Subdue {
    /// True when this subdue suppresses the given gate at `now`.
    #[must_use]
    pub fn is_active(&self, at: SubdueAt, now: NaiveDateTime) -> bool {
        let time = now.time();

        let mut subdued = match (&self.begin, &self.end) {
            (Some(begin), Some(end)) => in_window(time, begin, end),
            _ => false,
        };

        if let Some(days) = &self.days {
            let today = weekday_name(now.date().weekday());
            if days.iter().any(|day| day.eq_ignore_ascii_case(today)) {
                subdued = true;
            }
        }

        if subdued {
            if let Some(exceptions) = &self.exceptions {
                subdued = !exceptions
                    .iter()
                    .any(|window| in_window(time, &window.begin, &window.end));
            }
        }

        subdued && self.at.unwrap_or(SubdueAt::Handler) == at
    }
}
