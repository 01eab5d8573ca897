//! Business-day-aware date-range resolution.
//!
//! All windows are computed in the tenant's civil timezone (a fixed UTC
//! offset; the deployment region has no daylight saving) and returned in UTC.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, Utc, Weekday};
use serde::Serialize;

/// Serde representation of weekday sets as English day names, the format the
/// upstream definition documents use.
pub mod weekday_names {
    use chrono::Weekday;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn name(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "Monday",
            Weekday::Tue => "Tuesday",
            Weekday::Wed => "Wednesday",
            Weekday::Thu => "Thursday",
            Weekday::Fri => "Friday",
            Weekday::Sat => "Saturday",
            Weekday::Sun => "Sunday",
        }
    }

    pub fn parse(raw: &str) -> Option<Weekday> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" => Some(Weekday::Mon),
            "tuesday" | "tue" => Some(Weekday::Tue),
            "wednesday" | "wed" => Some(Weekday::Wed),
            "thursday" | "thu" => Some(Weekday::Thu),
            "friday" | "fri" => Some(Weekday::Fri),
            "saturday" | "sat" => Some(Weekday::Sat),
            "sunday" | "sun" => Some(Weekday::Sun),
            _ => None,
        }
    }

    pub fn serialize<S>(days: &[Weekday], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(days.iter().map(|day| name(*day)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Weekday>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|value| {
                parse(value).ok_or_else(|| DeError::custom(format!("unknown weekday '{value}'")))
            })
            .collect()
    }
}

/// Errors raised while resolving an evaluation window.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDateFormat(String),
    #[error("unsupported evaluation filter '{0}'")]
    UnsupportedFilterKind(String),
}

/// Resolved UTC window, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvaluationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The evaluation range filters accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationFilter {
    ExplicitRange,
    PreviousBusinessDay,
    LastThreeBusinessDays,
    LastFiveBusinessDays,
    LastWeek,
    LastTwoWeeks,
    LastMonth,
    LastQuarter,
    LastSemester,
    LastYear,
}

impl EvaluationFilter {
    pub fn parse(name: &str) -> Result<Self, CalendarError> {
        match name {
            "rango_de_fechas" => Ok(Self::ExplicitRange),
            "dia_anterior" => Ok(Self::PreviousBusinessDay),
            "ultimos_3_dias_laborales" => Ok(Self::LastThreeBusinessDays),
            "ultimos_5_dias_laborales" => Ok(Self::LastFiveBusinessDays),
            "ultima_semana" => Ok(Self::LastWeek),
            "ultimas_2_semana" => Ok(Self::LastTwoWeeks),
            "ultimo_mes" => Ok(Self::LastMonth),
            "ultimo_trimestre" => Ok(Self::LastQuarter),
            "ultimo_semestre" => Ok(Self::LastSemester),
            "ultimo_anio" => Ok(Self::LastYear),
            other => Err(CalendarError::UnsupportedFilterKind(other.to_string())),
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::ExplicitRange => "rango_de_fechas",
            Self::PreviousBusinessDay => "dia_anterior",
            Self::LastThreeBusinessDays => "ultimos_3_dias_laborales",
            Self::LastFiveBusinessDays => "ultimos_5_dias_laborales",
            Self::LastWeek => "ultima_semana",
            Self::LastTwoWeeks => "ultimas_2_semana",
            Self::LastMonth => "ultimo_mes",
            Self::LastQuarter => "ultimo_trimestre",
            Self::LastSemester => "ultimo_semestre",
            Self::LastYear => "ultimo_anio",
        }
    }

    /// Calendar-relative filters whose snapshots may be served from the
    /// history store instead of recomputed.
    pub fn is_cacheable(self) -> bool {
        matches!(
            self,
            Self::LastMonth | Self::LastQuarter | Self::LastSemester | Self::LastYear
        )
    }

    fn business_days_back(self) -> Option<u32> {
        match self {
            Self::PreviousBusinessDay => Some(1),
            Self::LastThreeBusinessDays => Some(3),
            Self::LastFiveBusinessDays | Self::LastWeek => Some(5),
            Self::LastTwoWeeks => Some(10),
            _ => None,
        }
    }
}

/// Resolves the UTC window for a filter name.
///
/// Explicit ranges parse `YYYY-MM-DD` bounds as local midnight and local end
/// of day. Business-day filters walk backward from "now", skipping the
/// weekdays in `non_working_days`. Calendar filters use calendar arithmetic
/// anchored at "now".
pub fn resolve_range(
    filter_name: &str,
    explicit_start: Option<&str>,
    explicit_end: Option<&str>,
    non_working_days: &[Weekday],
    now: DateTime<Utc>,
    tz: FixedOffset,
) -> Result<EvaluationWindow, CalendarError> {
    let filter = EvaluationFilter::parse(filter_name)?;
    resolve_window(filter, explicit_start, explicit_end, non_working_days, now, tz)
}

/// [`resolve_range`] for an already-parsed filter.
pub fn resolve_window(
    filter: EvaluationFilter,
    explicit_start: Option<&str>,
    explicit_end: Option<&str>,
    non_working_days: &[Weekday],
    now: DateTime<Utc>,
    tz: FixedOffset,
) -> Result<EvaluationWindow, CalendarError> {
    let local_now = now.with_timezone(&tz).naive_local();
    let today = local_now.date();

    if filter == EvaluationFilter::ExplicitRange {
        let start = parse_local_date(explicit_start)?;
        let end = parse_local_date(explicit_end)?;
        return Ok(EvaluationWindow {
            start: local_day_start(start, tz),
            end: local_day_end(end, tz),
        });
    }

    if let Some(count) = filter.business_days_back() {
        let start_day = previous_business_day(today, count, non_working_days);
        return Ok(EvaluationWindow {
            start: local_day_start(start_day, tz),
            end: local_day_end(today, tz),
        });
    }

    let (start_day, end_day) = match filter {
        EvaluationFilter::LastMonth => {
            let first_of_current = first_of_month(today.year(), today.month());
            let start = first_of_current
                .checked_sub_months(Months::new(1))
                .expect("date within supported range");
            (start, first_of_current.pred_opt().expect("date within supported range"))
        }
        EvaluationFilter::LastQuarter => {
            let current_quarter = (today.month() as i32 - 1) / 3;
            let mut start_month = (current_quarter - 1) * 3 + 1;
            let mut start_year = today.year();
            if start_month <= 0 {
                start_month += 12;
                start_year -= 1;
            }
            let start = first_of_month(start_year, start_month as u32);
            let end = start
                .checked_add_months(Months::new(3))
                .expect("date within supported range")
                .pred_opt()
                .expect("date within supported range");
            (start, end)
        }
        EvaluationFilter::LastSemester => {
            if today.month() >= 7 {
                (first_of_month(today.year(), 1), ymd(today.year(), 6, 30))
            } else {
                (first_of_month(today.year() - 1, 7), ymd(today.year() - 1, 12, 31))
            }
        }
        EvaluationFilter::LastYear => {
            (first_of_month(today.year() - 1, 1), ymd(today.year() - 1, 12, 31))
        }
        _ => unreachable!("relative filters handled above"),
    };

    Ok(EvaluationWindow {
        start: local_day_start(start_day, tz),
        end: local_day_end(end_day, tz),
    })
}

/// Counts working and non-working calendar days in `[start, end]` inclusive,
/// classifying each day by whether its weekday is in `excluded`.
pub fn count_business_days(
    start: NaiveDate,
    end: NaiveDate,
    excluded: &[Weekday],
) -> (u32, u32) {
    let mut working = 0;
    let mut non_working = 0;
    let mut day = start;
    while day <= end {
        if excluded.contains(&day.weekday()) {
            non_working += 1;
        } else {
            working += 1;
        }
        day = day.succ_opt().expect("date within supported range");
    }
    (working, non_working)
}

/// Local calendar date of a UTC instant.
pub fn local_date_of(instant: DateTime<Utc>, tz: FixedOffset) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Full-day window (local midnight through local 23:59:59) for one date.
pub fn day_window(date: NaiveDate, tz: FixedOffset) -> EvaluationWindow {
    EvaluationWindow {
        start: local_day_start(date, tz),
        end: local_day_end(date, tz),
    }
}

fn parse_local_date(raw: Option<&str>) -> Result<NaiveDate, CalendarError> {
    let raw = raw.unwrap_or_default();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| CalendarError::InvalidDateFormat(raw.to_string()))
}

fn previous_business_day(from: NaiveDate, count: u32, excluded: &[Weekday]) -> NaiveDate {
    let mut day = from;
    let mut found = 0;
    while found < count {
        day = day.pred_opt().expect("date within supported range");
        if !excluded.contains(&day.weekday()) {
            found += 1;
        }
    }
    day
}

fn local_day_start(date: NaiveDate, tz: FixedOffset) -> DateTime<Utc> {
    local_to_utc(date.and_hms_opt(0, 0, 0).expect("midnight exists"), tz)
}

fn local_day_end(date: NaiveDate, tz: FixedOffset) -> DateTime<Utc> {
    local_to_utc(date.and_hms_opt(23, 59, 59).expect("end of day exists"), tz)
}

fn local_to_utc(local: chrono::NaiveDateTime, tz: FixedOffset) -> DateTime<Utc> {
    let utc_naive = local - Duration::seconds(i64::from(tz.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc_naive, Utc)
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    ymd(year, month, 1)
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("date within supported range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn guayaquil() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).expect("valid offset")
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().expect("valid instant")
    }

    #[test]
    fn explicit_range_converts_local_bounds_to_utc() {
        let window = resolve_range(
            "rango_de_fechas",
            Some("2025-01-01"),
            Some("2025-01-31"),
            &[],
            at(2025, 6, 1, 12),
            guayaquil(),
        )
        .expect("resolves");

        assert_eq!(window.start, at(2025, 1, 1, 5));
        assert_eq!(window.end.to_rfc3339(), "2025-02-01T04:59:59+00:00");
    }

    #[test]
    fn explicit_range_rejects_bad_dates() {
        let err = resolve_range(
            "rango_de_fechas",
            Some("01-01-2025"),
            Some("2025-01-31"),
            &[],
            at(2025, 6, 1, 12),
            guayaquil(),
        )
        .expect_err("must fail");
        assert!(matches!(err, CalendarError::InvalidDateFormat(_)));

        let err = resolve_range(
            "rango_de_fechas",
            None,
            Some("2025-01-31"),
            &[],
            at(2025, 6, 1, 12),
            guayaquil(),
        )
        .expect_err("missing start must fail");
        assert!(matches!(err, CalendarError::InvalidDateFormat(_)));
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let err = resolve_range("ultimo_siglo", None, None, &[], at(2025, 6, 1, 12), guayaquil())
            .expect_err("must fail");
        assert!(matches!(err, CalendarError::UnsupportedFilterKind(_)));
    }

    #[test]
    fn previous_business_day_skips_weekend() {
        // Monday 2025-03-10 local; the previous business day is Friday the 7th.
        let window = resolve_range(
            "dia_anterior",
            None,
            None,
            &[Weekday::Sat, Weekday::Sun],
            at(2025, 3, 10, 15),
            guayaquil(),
        )
        .expect("resolves");

        assert_eq!(local_date_of(window.start, guayaquil()), ymd(2025, 3, 7));
        assert_eq!(local_date_of(window.end, guayaquil()), ymd(2025, 3, 10));
    }

    #[test]
    fn last_two_weeks_walks_ten_business_days() {
        let window = resolve_range(
            "ultimas_2_semana",
            None,
            None,
            &[Weekday::Sat, Weekday::Sun],
            at(2025, 3, 14, 15), // Friday local
            guayaquil(),
        )
        .expect("resolves");

        assert_eq!(local_date_of(window.start, guayaquil()), ymd(2025, 2, 28));
    }

    #[test]
    fn last_month_is_previous_full_month() {
        let window = resolve_range("ultimo_mes", None, None, &[], at(2025, 2, 15, 12), guayaquil())
            .expect("resolves");
        assert_eq!(local_date_of(window.start, guayaquil()), ymd(2025, 1, 1));
        assert_eq!(local_date_of(window.end, guayaquil()), ymd(2025, 1, 31));
    }

    #[test]
    fn last_quarter_crosses_year_boundary() {
        let window =
            resolve_range("ultimo_trimestre", None, None, &[], at(2025, 2, 15, 12), guayaquil())
                .expect("resolves");
        assert_eq!(local_date_of(window.start, guayaquil()), ymd(2024, 10, 1));
        assert_eq!(local_date_of(window.end, guayaquil()), ymd(2024, 12, 31));
    }

    #[test]
    fn last_semester_splits_at_july() {
        let second_half =
            resolve_range("ultimo_semestre", None, None, &[], at(2025, 8, 1, 12), guayaquil())
                .expect("resolves");
        assert_eq!(local_date_of(second_half.start, guayaquil()), ymd(2025, 1, 1));
        assert_eq!(local_date_of(second_half.end, guayaquil()), ymd(2025, 6, 30));

        let first_half =
            resolve_range("ultimo_semestre", None, None, &[], at(2025, 3, 1, 12), guayaquil())
                .expect("resolves");
        assert_eq!(local_date_of(first_half.start, guayaquil()), ymd(2024, 7, 1));
        assert_eq!(local_date_of(first_half.end, guayaquil()), ymd(2024, 12, 31));
    }

    #[test]
    fn last_year_is_previous_calendar_year() {
        let window =
            resolve_range("ultimo_anio", None, None, &[], at(2025, 2, 15, 12), guayaquil())
                .expect("resolves");
        assert_eq!(local_date_of(window.start, guayaquil()), ymd(2024, 1, 1));
        assert_eq!(local_date_of(window.end, guayaquil()), ymd(2024, 12, 31));
    }

    #[test]
    fn january_2025_has_23_working_days() {
        let (working, non_working) = count_business_days(
            ymd(2025, 1, 1),
            ymd(2025, 1, 31),
            &[Weekday::Sat, Weekday::Sun],
        );
        assert_eq!(working, 23);
        assert_eq!(non_working, 8);
    }

    #[test]
    fn cacheable_filters_are_the_calendar_relative_ones() {
        for name in ["ultimo_mes", "ultimo_trimestre", "ultimo_semestre", "ultimo_anio"] {
            assert!(EvaluationFilter::parse(name).expect("known").is_cacheable());
        }
        for name in ["rango_de_fechas", "dia_anterior", "ultima_semana"] {
            assert!(!EvaluationFilter::parse(name).expect("known").is_cacheable());
        }
    }

    #[test]
    fn weekday_names_parse_both_forms() {
        assert_eq!(weekday_names::parse("Saturday"), Some(Weekday::Sat));
        assert_eq!(weekday_names::parse("sun"), Some(Weekday::Sun));
        assert_eq!(weekday_names::parse("feriado"), None);
        assert_eq!(weekday_names::name(Weekday::Wed), "Wednesday");
    }
}
