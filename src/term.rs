use chrono::{Datelike, NaiveDate};

/// Academic year containing `date`, e.g. "2025-2026". The year runs
/// August through July, so January–July belongs to the year that started
/// the previous August.
pub fn academic_year_for(date: NaiveDate) -> String {
    let year = date.year();
    if date.month() <= 7 {
        format!("{}-{}", year - 1, year)
    } else {
        format!("{}-{}", year, year + 1)
    }
}

/// Semester containing `date`: Fall (Aug–Dec), Spring (Jan–Apr),
/// Summer (May–Jul).
pub fn semester_for(date: NaiveDate) -> &'static str {
    match date.month() {
        8..=12 => "Fall",
        1..=4 => "Spring",
        5..=7 => "Summer",
        _ => "Fall",
    }
}

pub fn current_academic_year() -> String {
    academic_year_for(chrono::Local::now().date_naive())
}

pub fn current_semester() -> &'static str {
    semester_for(chrono::Local::now().date_naive())
}

pub const SEMESTERS: [&str; 4] = ["Fall", "Spring", "Summer", "Winter"];

pub fn valid_semester(s: &str) -> bool {
    SEMESTERS.contains(&s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[test]
    fn academic_year_rolls_over_in_august() {
        assert_eq!(academic_year_for(d(2025, 7, 31)), "2024-2025");
        assert_eq!(academic_year_for(d(2025, 8, 1)), "2025-2026");
        assert_eq!(academic_year_for(d(2026, 1, 15)), "2025-2026");
    }

    #[test]
    fn semester_boundaries() {
        assert_eq!(semester_for(d(2025, 9, 1)), "Fall");
        assert_eq!(semester_for(d(2025, 12, 31)), "Fall");
        assert_eq!(semester_for(d(2026, 1, 1)), "Spring");
        assert_eq!(semester_for(d(2026, 4, 30)), "Spring");
        assert_eq!(semester_for(d(2026, 5, 1)), "Summer");
        assert_eq!(semester_for(d(2026, 7, 31)), "Summer");
    }
}
