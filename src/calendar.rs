use crate::models::Task;
use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;

pub type Week = [Option<NaiveDate>; 7];

pub fn local_date<Tz: TimeZone>(at: DateTime<Utc>, tz: &Tz) -> NaiveDate {
    at.with_timezone(tz).date_naive()
}

/// Local dates on which at least one task is due.
pub fn marked_dates<Tz: TimeZone>(tasks: &[Task], tz: &Tz) -> BTreeSet<NaiveDate> {
    tasks
        .iter()
        .filter_map(|task| task.do_at)
        .map(|at| local_date(at, tz))
        .collect()
}

pub fn tasks_on<Tz: TimeZone>(tasks: &[Task], date: NaiveDate, tz: &Tz) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| task.do_at.is_some_and(|at| local_date(at, tz) == date))
        .cloned()
        .collect()
}

/// Weeks covering the month of `date`, Monday first.
pub fn month_grid(date: NaiveDate) -> Vec<Week> {
    let Some(first) = date.with_day(1) else {
        return Vec::new();
    };
    let mut weeks = Vec::new();
    let mut week: Week = [None; 7];
    let mut slot = first.weekday().num_days_from_monday() as usize;
    let mut day = first;

    while day.month() == first.month() {
        week[slot] = Some(day);
        slot += 1;
        if slot == 7 {
            weeks.push(week);
            week = [None; 7];
            slot = 0;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    if slot > 0 {
        weeks.push(week);
    }
    weeks
}

/// Moves by whole months, clamping the day to the target month's length.
pub fn shift_month(date: NaiveDate, months: i32) -> NaiveDate {
    let shifted = if months >= 0 {
        date.checked_add_months(Months::new(months as u32))
    } else {
        date.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

pub fn long_date(date: NaiveDate) -> String {
    date.format("%A, %-d %B %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::tests::task;
    use crate::models::TaskStatus;
    use chrono::FixedOffset;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tasks() -> Vec<Task> {
        vec![
            task(1, "a", TaskStatus::Pending, Some("2024-06-03T09:00:00Z")),
            task(2, "b", TaskStatus::Completed, Some("2024-06-03T18:00:00Z")),
            task(3, "c", TaskStatus::Pending, None),
            task(4, "d", TaskStatus::Pending, Some("2024-06-20T23:30:00Z")),
        ]
    }

    #[test]
    fn test_marked_dates_dedupes() {
        let marked = marked_dates(&tasks(), &Utc);
        assert_eq!(
            marked.into_iter().collect::<Vec<_>>(),
            vec![date(2024, 6, 3), date(2024, 6, 20)]
        );
    }

    #[test]
    fn test_marked_dates_follow_timezone() {
        let east = FixedOffset::east_opt(3 * 3600).unwrap();
        assert!(marked_dates(&tasks(), &east).contains(&date(2024, 6, 21)));
    }

    #[test]
    fn test_tasks_on_date_skips_undated() {
        let on_third = tasks_on(&tasks(), date(2024, 6, 3), &Utc);
        let ids: Vec<i64> = on_third.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(tasks_on(&tasks(), date(2024, 6, 4), &Utc).is_empty());
    }

    #[test]
    fn test_month_grid_starts_on_monday() {
        // June 2024 starts on a Saturday and has 30 days
        let grid = month_grid(date(2024, 6, 17));
        assert_eq!(grid.len(), 5);
        assert_eq!(grid[0][5], Some(date(2024, 6, 1)));
        assert_eq!(grid[0][4], None);
        assert_eq!(grid[4][6], Some(date(2024, 6, 30)));
        let days = grid.iter().flatten().flatten().count();
        assert_eq!(days, 30);
    }

    #[test]
    fn test_shift_month_clamps_day() {
        assert_eq!(shift_month(date(2024, 1, 31), 1), date(2024, 2, 29));
        assert_eq!(shift_month(date(2024, 3, 31), -1), date(2024, 2, 29));
        assert_eq!(shift_month(date(2024, 12, 5), 1), date(2025, 1, 5));
    }

    #[test]
    fn test_long_date() {
        assert_eq!(long_date(date(2024, 6, 1)), "Saturday, 1 June 2024");
    }
}
