use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, PartialEq)]
pub struct ParsedTask {
    pub title: String,
    pub due: Option<NaiveDate>,
}

fn due_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(\S+)\s*").unwrap())
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn parse_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let raw = raw.trim().to_lowercase();
    match raw.as_str() {
        "today" => return Some(today),
        "tomorrow" => return Some(today + Duration::days(1)),
        _ => {}
    }
    if let Some(days) = raw.strip_prefix('+') {
        return days
            .parse::<i64>()
            .ok()
            .filter(|d| (0..=3650).contains(d))
            .map(|d| today + Duration::days(d));
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&raw, "%d/%m/%Y"))
        .ok()
}

/// Reads a due-date field. Empty means no due date.
pub fn parse_due_date(input: &str, today: NaiveDate) -> Result<Option<NaiveDate>> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    parse_date(input, today).map(Some).ok_or_else(|| {
        Error::Validation(format!(
            "Unrecognised date `{}` (use YYYY-MM-DD, DD/MM/YYYY, today, tomorrow or +N)",
            input.trim()
        ))
    })
}

/// Pulls an `@date` token out of a task title. The first valid token wins;
/// later valid ones are dropped, and `@words` that are not dates stay put.
pub fn parse_task_input(input: &str, today: NaiveDate) -> ParsedTask {
    let mut due = None;

    let title = due_token().replace_all(input, |caps: &regex::Captures| {
        match parse_date(&caps[1], today) {
            Some(date) => {
                if due.is_none() {
                    due = Some(date);
                }
                String::new()
            }
            None => caps[0].to_string(),
        }
    });

    let title = whitespace().replace_all(&title, " ").trim().to_string();

    ParsedTask { title, due }
}

/// A due date is stored at noon local time so it stays on the same calendar
/// day for any UTC offset.
pub fn due_at_noon<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Option<DateTime<Utc>> {
    let noon = date.and_hms_opt(12, 0, 0)?;
    tz.from_local_datetime(&noon)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_with_date_in_middle() {
        let input = "Update @2024-06-10 software documentation";
        let expected = ParsedTask {
            title: "Update software documentation".to_string(),
            due: Some(date(2024, 6, 10)),
        };
        assert_eq!(parse_task_input(input, today()), expected);
    }

    #[test]
    fn test_parse_with_extra_spaces_after_date() {
        let input = "Fix bugs @tomorrow    in the code";
        let expected = ParsedTask {
            title: "Fix bugs in the code".to_string(),
            due: Some(date(2024, 6, 2)),
        };
        assert_eq!(parse_task_input(input, today()), expected);
    }

    #[test]
    fn test_parse_with_multiple_spaces_between_words() {
        let input = "Write   tests @+3 for the   parser";
        let expected = ParsedTask {
            title: "Write tests for the parser".to_string(),
            due: Some(date(2024, 6, 4)),
        };
        assert_eq!(parse_task_input(input, today()), expected);
    }

    #[test]
    fn test_parse_with_brazilian_date_at_end() {
        let input = "Deploy to production   @15/07/2024   ";
        let expected = ParsedTask {
            title: "Deploy to production".to_string(),
            due: Some(date(2024, 7, 15)),
        };
        assert_eq!(parse_task_input(input, today()), expected);
    }

    #[test]
    fn test_parse_with_multiple_dates() {
        let input = "  @today  @tomorrow Organize    team building @2024-12-01 event ";
        let expected = ParsedTask {
            title: "Organize team building event".to_string(),
            due: Some(today()),
        };
        assert_eq!(parse_task_input(input, today()), expected);
    }

    #[test]
    fn test_parse_keeps_non_date_mentions() {
        let input = "Email @ana about the report";
        let expected = ParsedTask {
            title: "Email @ana about the report".to_string(),
            due: None,
        };
        assert_eq!(parse_task_input(input, today()), expected);
    }

    #[test]
    fn test_due_date_field() {
        assert_eq!(parse_due_date("  ", today()).unwrap(), None);
        assert_eq!(
            parse_due_date("2024-02-29", today()).unwrap(),
            Some(date(2024, 2, 29))
        );
        assert_eq!(parse_due_date("Today", today()).unwrap(), Some(today()));
        assert!(matches!(
            parse_due_date("2023-02-29", today()),
            Err(Error::Validation(_))
        ));
        assert!(parse_due_date("+x", today()).is_err());
    }

    #[test]
    fn test_noon_keeps_calendar_day() {
        let west = FixedOffset::west_opt(10 * 3600).unwrap();
        let at = due_at_noon(date(2024, 6, 10), &west).unwrap();
        assert_eq!(at.with_timezone(&west).date_naive(), date(2024, 6, 10));
        assert_eq!(at.to_rfc3339(), "2024-06-10T22:00:00+00:00");
    }
}
