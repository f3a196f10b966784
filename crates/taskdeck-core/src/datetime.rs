use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

fn relative_re()
-> Option<&'static Regex> {
  static RE: OnceLock<Option<Regex>> =
    OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(
      r"^\+(?P<num>\d+)(?P<unit>[dw])$"
    )
    .ok()
  })
  .as_ref()
}

/// Midnight of `date` in `tz`, as UTC.
pub fn start_of_day(
  date: NaiveDate,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {date}"
      )
    })?;

  match tz.from_local_datetime(&midnight)
  {
    | LocalResult::Single(local) => {
      Ok(local.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        %date,
        first = %first,
        second = %second,
        "ambiguous local midnight; using earliest"
      );
      Ok(first.min(second).with_timezone(&Utc))
    }
    // Midnight skipped by a DST jump; the day starts an hour later.
    | LocalResult::None => {
      let shifted =
        midnight + Duration::hours(1);
      tz.from_local_datetime(&shifted)
        .earliest()
        .map(|local| {
          local.with_timezone(&Utc)
        })
        .ok_or_else(|| {
          anyhow!(
            "{date} has no start in \
             {tz}"
          )
        })
    }
  }
}

/// Calendar date of `dt` in `tz`.
pub fn local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

/// Parses a due date typed at the
/// prompt. Accepted: `today`,
/// `tomorrow`, `yesterday`, weekday
/// names (next occurrence), `+Nd` /
/// `+Nw`, `YYYY-MM-DD` and full
/// RFC 3339 timestamps. Date-only
/// inputs resolve to local midnight.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_due_input(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  if token.is_empty() {
    return Err(anyhow!(
      "due date cannot be empty"
    ));
  }
  let lower =
    token.to_ascii_lowercase();
  let today = local_date(now, tz);

  let date = match lower.as_str() {
    | "today" => Some(today),
    | "tomorrow" => {
      today.succ_opt()
    }
    | "yesterday" => {
      today.pred_opt()
    }
    | other => {
      parse_weekday_name(other).map(
        |weekday| {
          next_weekday_date(
            today, weekday
          )
        }
      )
    }
  };
  if let Some(date) = date {
    return start_of_day(date, tz);
  }

  if let Some(caps) = relative_re()
    .and_then(|re| re.captures(&lower))
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "relative amount out of range"
      )?;
    let days = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => num.checked_mul(7),
      | _ => Some(num)
    };
    let date = days
      .and_then(Duration::try_days)
      .and_then(|offset| {
        today.checked_add_signed(offset)
      })
      .ok_or_else(|| {
        anyhow!(
          "relative date out of \
           range: {token}"
        )
      })?;
    return start_of_day(date, tz);
  }

  if let Ok(date) = NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  ) {
    return start_of_day(date, tz);
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  Err(anyhow!(
    "unrecognized date `{token}`; \
     try YYYY-MM-DD, today, \
     tomorrow, a weekday or +3d"
  ))
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}
