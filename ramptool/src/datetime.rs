use crate::error::{self, Error, Result};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use snafu::{ensure, OptionExt, ResultExt};

/// Parses a user-specified datetime, either in full RFC 3339 format, or a
/// shorthand like "in 7 days".
pub(crate) fn parse_datetime(input: &str) -> std::result::Result<DateTime<Utc>, Error> {
    // If the user gave an absolute date in a standard format, accept it.
    let try_dt: std::result::Result<DateTime<FixedOffset>, chrono::format::ParseError> =
        DateTime::parse_from_rfc3339(input);
    if let Ok(dt) = try_dt {
        return Ok(dt.into());
    }

    // Otherwise, pull apart a request like "in 5 days" to get an exact datetime.
    let mut parts: Vec<&str> = input.split_whitespace().collect();
    ensure!(
        parts.len() == 3,
        error::DateArgInvalidSnafu {
            input,
            msg: "expected RFC 3339, or something like 'in 7 days'",
        }
    );
    let unit_str = parts.pop().unwrap();
    let count_str = parts.pop().unwrap();
    let prefix_str = parts.pop().unwrap();

    ensure!(
        prefix_str == "in",
        error::DateArgInvalidSnafu {
            input,
            msg: "expected RFC 3339, or prefix 'in', something like 'in 7 days'",
        }
    );

    let count: u32 = count_str
        .parse()
        .context(error::DateArgCountSnafu { input })?;

    let duration = duration_for(input, count, unit_str)?;

    Ok(Utc::now() + duration)
}

fn duration_for(input: &str, count: u32, unit: &str) -> Result<TimeDelta> {
    match unit {
        "hour" | "hours" => {
            TimeDelta::try_hours(i64::from(count)).context(error::DateArgInvalidSnafu {
                input,
                msg: format!("unable to convert {count} to a number of hours"),
            })
        }
        "day" | "days" => {
            TimeDelta::try_days(i64::from(count)).context(error::DateArgInvalidSnafu {
                input,
                msg: format!("unable to convert {count} to a number of days"),
            })
        }
        "week" | "weeks" => {
            TimeDelta::try_weeks(i64::from(count)).context(error::DateArgInvalidSnafu {
                input,
                msg: format!("unable to convert {count} to a number of weeks"),
            })
        }
        _ => error::DateArgInvalidSnafu {
            input,
            msg: "date argument's unit must be hours/days/weeks",
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_datetime;
    use chrono::{Duration, Utc};

    #[test]
    fn rfc_3339_datetimes_parse() {
        let dt = parse_datetime("2040-01-02T03:04:05Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2040-01-02T03:04:05+00:00");
    }

    #[test]
    fn relative_datetimes_parse() {
        let dt = parse_datetime("in 7 days").unwrap();
        let distance = dt - Utc::now();
        assert!(distance > Duration::days(6) && distance <= Duration::days(7));
    }

    #[test]
    fn nonsense_is_rejected() {
        assert!(parse_datetime("soonish").is_err());
        assert!(parse_datetime("in 7 fortnights").is_err());
        assert!(parse_datetime("at 7 days").is_err());
    }
}
