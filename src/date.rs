use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt;

/// Bracket style of a timestamp. Active timestamps (`<...>`) show up in the
/// agenda, inactive ones (`[...]`) do not, `NoBracket` is used when rendering
/// the bare date inside another construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimestampType {
    Active,
    Inactive,
    NoBracket,
}

/// Which scheduling keyword (if any) a parsed date was attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateType {
    None,
    Scheduled,
    Deadline,
    Closed,
    ActiveTimestamp,
    InactiveTimestamp,
}

/// A repeater (`+1w`, `++1m`, `.+1d`) or warning (`-2d`) cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cookie {
    pub pre: String,
    pub num: u32,
    pub unit: char,
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.pre, self.num, self.unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayTime {
    pub hour: u32,
    pub minute: u32,
}

/// A parsed Org date: date components, optional time of day (and end of a
/// time range), bracket type and optional repeat/warn cookies. Components are
/// stored as parsed so rendering is exact and zero-padded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub time: Option<DayTime>,
    pub end_time: Option<DayTime>,
    pub timestamp_type: TimestampType,
    pub repeat: Option<Cookie>,
    pub warn: Option<Cookie>,
}

impl OrgDate {
    pub fn has_time(&self) -> bool {
        self.time.is_some()
    }

    /// Weekday computed from the date (Sakamoto's method), so a mistyped or
    /// missing day name in the input normalizes on output.
    pub fn weekday(&self) -> &'static str {
        const OFFSETS: [i32; 12] = [0, 3, 2, 5, 0, 3, 5, 1, 4, 6, 2, 4];
        let y = if self.month < 3 { self.year - 1 } else { self.year };
        let w = (y + y / 4 - y / 100 + y / 400
            + OFFSETS[(self.month - 1) as usize]
            + self.day as i32)
            .rem_euclid(7);
        ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"][w as usize]
    }

    fn brackets(&self) -> (&'static str, &'static str) {
        match self.timestamp_type {
            TimestampType::Active => ("<", ">"),
            TimestampType::Inactive => ("[", "]"),
            TimestampType::NoBracket => ("", ""),
        }
    }

    /// Renders the date part only, e.g. `<2004-12-25 Sat>`.
    pub fn to_date_string(&self) -> String {
        let (open, close) = self.brackets();
        format!(
            "{}{:04}-{:02}-{:02} {}{}",
            open,
            self.year,
            self.month,
            self.day,
            self.weekday(),
            close
        )
    }

    /// Renders the full timestamp with time of day, time range end and
    /// cookies, e.g. `<2004-12-25 Sat 10:00-11:30 +1w>`.
    pub fn to_full_string(&self) -> String {
        let (open, close) = self.brackets();
        let mut out = format!(
            "{}{:04}-{:02}-{:02} {}",
            open,
            self.year,
            self.month,
            self.day,
            self.weekday()
        );
        if let Some(time) = self.time {
            out.push_str(&format!(" {:02}:{:02}", time.hour, time.minute));
            if let Some(end) = self.end_time {
                out.push_str(&format!("-{:02}:{:02}", end.hour, end.minute));
            }
        }
        if let Some(repeat) = &self.repeat {
            out.push_str(&format!(" {repeat}"));
        }
        if let Some(warn) = &self.warn {
            out.push_str(&format!(" {warn}"));
        }
        out.push_str(close);
        out
    }
}

impl fmt::Display for OrgDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_full_string())
    }
}

/// Builds the timestamp pattern for one bracket type. Named groups carry the
/// date/time/cookie components; the "ignore" class lazily swallows day names
/// and other filler between components without crossing the closing bracket.
fn timestamp_pattern(brtype: TimestampType, cookies: bool) -> String {
    let (open, close, ignore) = match brtype {
        TimestampType::Active => ("<", ">", r"[^>+.:0-9-]"),
        TimestampType::Inactive => (r"\[", r"\]", r"[^\]+.:0-9-]"),
        TimestampType::NoBracket => ("", "", r"[\s\w]"),
    };
    let date_time = format!(
        r"(?P<year>\d{{4}}) *- *(?P<month>\d{{1,2}}) *- *(?P<day>\d{{1,2}})(({ignore}+?)(?P<hour>\d{{1,2}}) *: *(?P<min>\d{{2}})( *--? *(?P<end_hour>\d{{1,2}}) *: *(?P<end_min>\d{{2}}))?)?"
    );
    let cookie = if cookies && brtype != TimestampType::NoBracket {
        format!(
            r"(({ignore}*?)(?P<repeatpre> *[.+]{{1,2}})(?P<repeatnum> *\d+)(?P<repeatdwmy> *[dwmy]))?(({ignore}+?)(?P<warnpre> *-)(?P<warnnum> *\d+)(?P<warndwmy> *[dwmy]))?"
        )
    } else {
        String::new()
    };
    format!("{open}{date_time}{cookie}({ignore}*?){close}")
}

/// A compiled timestamp or scheduling-line recognizer.
#[derive(Debug, Clone)]
pub struct DateParser {
    re: Regex,
    ttype: TimestampType,
}

fn cap<'t>(caps: &Captures<'t>, name: &str) -> Option<&'t str> {
    caps.name(name)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

fn cookie_from(caps: &Captures<'_>, pre: &str, num: &str, unit: &str) -> Option<Cookie> {
    let pre = cap(caps, pre)?;
    let num = cap(caps, num)?.parse().ok().filter(|n| *n > 0).unwrap_or(1);
    let unit = cap(caps, unit)?.chars().next()?;
    Some(Cookie {
        pre: pre.to_string(),
        num,
        unit,
    })
}

impl DateParser {
    /// Recognizer for a `SCHEDULED:`/`DEADLINE:`/`CLOSED:` line. CLOSED
    /// stamps use inactive brackets, the other two are active.
    pub fn for_scheduling_keyword(keyword: &str) -> Self {
        let brtype = if keyword == "CLOSED" {
            TimestampType::Inactive
        } else {
            TimestampType::Active
        };
        let pattern = format!(
            r"^([^#]*){keyword}:\s+{}",
            timestamp_pattern(brtype, true)
        );
        DateParser {
            re: Regex::new(&pattern).expect("scheduling pattern must compile"),
            ttype: brtype,
        }
    }

    /// Recognizer for a bare timestamp, anchored at the start of its input
    /// (the inline parser hands it the remainder of the text).
    pub fn for_timestamp(brtype: TimestampType) -> Self {
        let pattern = format!("^{}", timestamp_pattern(brtype, true));
        DateParser {
            re: Regex::new(&pattern).expect("timestamp pattern must compile"),
            ttype: brtype,
        }
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.re.is_match(line)
    }

    /// Leading-noise capture length for a matched scheduling line (group 1),
    /// used as the token's indent level.
    pub fn leading_len(&self, line: &str) -> usize {
        self.re
            .captures(line)
            .and_then(|c| c.get(1))
            .map_or(0, |m| m.as_str().len())
    }

    /// Parses the input; returns the date and the byte length of the match.
    pub fn parse(&self, input: &str) -> Option<(OrgDate, usize)> {
        let caps = self.re.captures(input)?;
        let year = cap(&caps, "year")?.parse().ok()?;
        let month: u32 = cap(&caps, "month")?.parse().ok()?;
        let day: u32 = cap(&caps, "day")?.parse().ok()?;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }
        let time = match (cap(&caps, "hour"), cap(&caps, "min")) {
            (Some(h), Some(m)) => Some(DayTime {
                hour: h.parse().ok()?,
                minute: m.parse().ok()?,
            }),
            _ => None,
        };
        let end_time = match (cap(&caps, "end_hour"), cap(&caps, "end_min")) {
            (Some(h), Some(m)) => Some(DayTime {
                hour: h.parse().ok()?,
                minute: m.parse().ok()?,
            }),
            _ => None,
        };
        let date = OrgDate {
            year,
            month,
            day,
            time,
            end_time,
            timestamp_type: self.ttype,
            repeat: cookie_from(&caps, "repeatpre", "repeatnum", "repeatdwmy"),
            warn: cookie_from(&caps, "warnpre", "warnnum", "warndwmy"),
        };
        Some((date, caps.get(0).map_or(0, |m| m.len())))
    }
}

/// The full set of compiled date recognizers, built once and carried in the
/// configuration (no ambient pattern tables).
#[derive(Debug, Clone)]
pub struct DateMatchers {
    pub scheduled: DateParser,
    pub deadline: DateParser,
    pub closed: DateParser,
    pub active: DateParser,
    pub inactive: DateParser,
}

impl DateMatchers {
    pub fn new() -> Self {
        DateMatchers {
            scheduled: DateParser::for_scheduling_keyword("SCHEDULED"),
            deadline: DateParser::for_scheduling_keyword("DEADLINE"),
            closed: DateParser::for_scheduling_keyword("CLOSED"),
            active: DateParser::for_timestamp(TimestampType::Active),
            inactive: DateParser::for_timestamp(TimestampType::Inactive),
        }
    }

    /// Parses a scheduling line, trying SCHEDULED, DEADLINE and CLOSED in
    /// that order.
    pub fn parse_sdc(&self, line: &str) -> Option<(OrgDate, DateType)> {
        if let Some((d, _)) = self.scheduled.parse(line) {
            return Some((d, DateType::Scheduled));
        }
        if let Some((d, _)) = self.deadline.parse(line) {
            return Some((d, DateType::Deadline));
        }
        if let Some((d, _)) = self.closed.parse(line) {
            return Some((d, DateType::Closed));
        }
        None
    }

    /// Parses a bare timestamp at the start of `input`.
    pub fn parse_timestamp(&self, input: &str) -> Option<(OrgDate, DateType, usize)> {
        if let Some((d, len)) = self.active.parse(input) {
            return Some((d, DateType::ActiveTimestamp, len));
        }
        if let Some((d, len)) = self.inactive.parse(input) {
            return Some((d, DateType::InactiveTimestamp, len));
        }
        None
    }
}

impl Default for DateMatchers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_line_parses_and_renders() {
        let matchers = DateMatchers::new();
        let (date, _) = matchers
            .scheduled
            .parse("SCHEDULED: <2004-12-25 Sat>")
            .expect("scheduled line should parse");
        assert_eq!(date.to_date_string(), "<2004-12-25 Sat>");
        assert!(!date.has_time());
    }

    #[test]
    fn deadline_recognizer_rejects_scheduled_line() {
        let matchers = DateMatchers::new();
        assert!(matchers
            .deadline
            .parse("SCHEDULED: <2004-12-25 Sat>")
            .is_none());
        assert!(matchers
            .scheduled
            .parse("DEADLINE: <2004-12-25 Sat>")
            .is_none());
    }

    #[test]
    fn parse_sdc_classifies() {
        let matchers = DateMatchers::new();
        let (date, dt) = matchers.parse_sdc("SCHEDULED: <2004-12-25 Sat>").unwrap();
        assert_eq!(dt, DateType::Scheduled);
        assert_eq!(date.to_date_string(), "<2004-12-25 Sat>");

        let (date, dt) = matchers.parse_sdc("DEADLINE: <2004-02-29 Sun>").unwrap();
        assert_eq!(dt, DateType::Deadline);
        assert_eq!(date.to_date_string(), "<2004-02-29 Sun>");

        let (_, dt) = matchers
            .parse_sdc("CLOSED: [2019-03-05 Tue 08:35]")
            .unwrap();
        assert_eq!(dt, DateType::Closed);
    }

    #[test]
    fn single_digit_components_render_zero_padded() {
        let matchers = DateMatchers::new();
        let (date, _, _) = matchers.parse_timestamp("<2004-1-25 Sun>").unwrap();
        assert_eq!(date.to_date_string(), "<2004-01-25 Sun>");
    }

    #[test]
    fn weekday_is_computed_not_echoed() {
        let matchers = DateMatchers::new();
        // 2004-12-25 actually was a Saturday; lie about it in the input.
        let (date, _, _) = matchers.parse_timestamp("<2004-12-25 Mon>").unwrap();
        assert_eq!(date.weekday(), "Sat");
    }

    #[test]
    fn time_and_repeater_survive_a_round_trip() {
        let matchers = DateMatchers::new();
        let input = "<2009-10-17 Sat 14:30 +1w>";
        let (date, _, len) = matchers.parse_timestamp(input).unwrap();
        assert_eq!(len, input.len());
        assert_eq!(date.time, Some(DayTime { hour: 14, minute: 30 }));
        assert_eq!(
            date.repeat,
            Some(Cookie {
                pre: "+".to_string(),
                num: 1,
                unit: 'w'
            })
        );
        assert_eq!(date.to_full_string(), input);
    }

    #[test]
    fn time_ranges_and_warnings_round_trip() {
        let matchers = DateMatchers::new();
        let input = "<2005-10-01 Sat 12:30-13:45 +7m -3d>";
        let (date, _, _) = matchers.parse_timestamp(input).unwrap();
        assert_eq!(date.end_time, Some(DayTime { hour: 13, minute: 45 }));
        assert_eq!(date.warn.as_ref().unwrap().to_string(), "-3d");
        assert_eq!(date.to_full_string(), input);
    }

    #[test]
    fn date_only_repeater_round_trips() {
        let matchers = DateMatchers::new();
        let input = "<2004-12-25 Sat +1w>";
        let (date, _, _) = matchers.parse_timestamp(input).unwrap();
        assert_eq!(date.repeat.as_ref().unwrap().to_string(), "+1w");
        assert_eq!(date.to_full_string(), input);
    }

    #[test]
    fn inactive_timestamps_use_square_brackets() {
        let matchers = DateMatchers::new();
        let (date, dt, _) = matchers.parse_timestamp("[2019-03-05 Tue]").unwrap();
        assert_eq!(dt, DateType::InactiveTimestamp);
        assert_eq!(date.to_date_string(), "[2019-03-05 Tue]");
    }

    #[test]
    fn trailing_text_is_not_part_of_the_match() {
        let matchers = DateMatchers::new();
        let input = "<2004-12-25 Sat> and more";
        let (_, _, len) = matchers.parse_timestamp(input).unwrap();
        assert_eq!(len, "<2004-12-25 Sat>".len());
    }
}
