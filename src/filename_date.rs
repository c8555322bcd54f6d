//! Timestamps embedded in raster file names.
//!
//! The caller always names the scheme; nothing here guesses which convention a
//! file follows.

use crate::types::{AodError, SourceFile, Tier};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateScheme {
    /// NetCDF scene start token `sYYYYDDDHHMMSSf` (year, day-of-year, time).
    NetcdfStart,
    /// Imagery names with a `sYYYYMMDD` date token and a separate `HHMMUTC` token.
    ImageryDateTime,
    /// Day-tier exports ending in `_YYYYDDD`.
    OrdinalDate,
    /// Month-tier exports ending in `_YYYYMM`.
    YearMonth,
}

impl DateScheme {
    /// Scheme of the files a tier reads: raw inputs follow `day_inputs`,
    /// later tiers read the exports of the tier before.
    pub fn for_tier(tier: Tier, day_inputs: DateScheme) -> DateScheme {
        match tier {
            Tier::Day => day_inputs,
            Tier::Month => DateScheme::OrdinalDate,
            Tier::Year => DateScheme::YearMonth,
        }
    }

    pub fn extract(&self, path: &Path) -> Result<NaiveDateTime, AodError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| malformed(path, "file name is not valid UTF-8"))?;
        let tokens: Vec<&str> = stem.split('_').collect();

        match self {
            DateScheme::NetcdfStart => parse_start_token(path, &tokens),
            DateScheme::ImageryDateTime => parse_date_and_time_tokens(path, &tokens),
            DateScheme::OrdinalDate => parse_ordinal_suffix(path, &tokens),
            DateScheme::YearMonth => parse_year_month_suffix(path, &tokens),
        }
    }

    pub fn source_file(&self, path: &Path) -> Result<SourceFile, AodError> {
        Ok(SourceFile::new(path, self.extract(path)?))
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> AodError {
    AodError::MalformedFilename {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn number(path: &Path, digits: &str) -> Result<u32, AodError> {
    digits
        .parse()
        .map_err(|_| malformed(path, format!("`{}` is not a number", digits)))
}

fn ordinal_date(path: &Path, year: i32, day: u32) -> Result<NaiveDate, AodError> {
    NaiveDate::from_yo_opt(year, day)
        .ok_or_else(|| malformed(path, format!("day-of-year {} is not valid in {}", day, year)))
}

fn clock(path: &Path, hour: u32, minute: u32) -> Result<NaiveTime, AodError> {
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| malformed(path, format!("{:02}:{:02} is not a valid time", hour, minute)))
}

fn parse_start_token(path: &Path, tokens: &[&str]) -> Result<NaiveDateTime, AodError> {
    let token = tokens
        .iter()
        .find(|t| t.starts_with('s') && t[1..].starts_with(|c: char| c.is_ascii_digit()))
        .ok_or_else(|| malformed(path, "no sYYYYDDDHHMMSS start token"))?;
    let digits = &token[1..];
    if !all_digits(digits) || !(13..=14).contains(&digits.len()) {
        return Err(malformed(
            path,
            format!("start token `{}` is not sYYYYDDDHHMMSS[f]", token),
        ));
    }

    let year = number(path, &digits[0..4])? as i32;
    let day = number(path, &digits[4..7])?;
    let hour = number(path, &digits[7..9])?;
    let minute = number(path, &digits[9..11])?;
    let second = number(path, &digits[11..13])?;
    if second > 59 {
        return Err(malformed(path, format!("second {} out of range", second)));
    }

    Ok(ordinal_date(path, year, day)?.and_time(clock(path, hour, minute)?))
}

fn parse_date_and_time_tokens(path: &Path, tokens: &[&str]) -> Result<NaiveDateTime, AodError> {
    let date_token = tokens
        .iter()
        .map(|t| t.strip_prefix('s').unwrap_or(*t))
        .find(|t| t.len() == 8 && all_digits(t))
        .ok_or_else(|| malformed(path, "no YYYYMMDD date token"))?;
    let time_token = tokens
        .iter()
        .filter_map(|t| t.strip_suffix("UTC"))
        .next()
        .ok_or_else(|| malformed(path, "no HHMMUTC time token"))?;
    if time_token.len() != 4 || !all_digits(time_token) {
        return Err(malformed(
            path,
            format!("time token `{}UTC` is not HHMMUTC", time_token),
        ));
    }

    let date = NaiveDate::parse_from_str(date_token, "%Y%m%d")
        .map_err(|e| malformed(path, format!("date `{}`: {}", date_token, e)))?;
    let hour = number(path, &time_token[0..2])?;
    let minute = number(path, &time_token[2..4])?;

    Ok(date.and_time(clock(path, hour, minute)?))
}

fn last_numeric_token<'a>(
    path: &Path,
    tokens: &[&'a str],
    width: usize,
    what: &str,
) -> Result<&'a str, AodError> {
    match tokens.last() {
        Some(&t) if tokens.len() > 1 && t.len() == width && all_digits(t) => Ok(t),
        _ => Err(malformed(path, format!("name does not end in _{}", what))),
    }
}

fn parse_ordinal_suffix(path: &Path, tokens: &[&str]) -> Result<NaiveDateTime, AodError> {
    let token = last_numeric_token(path, tokens, 7, "YYYYDDD")?;
    let year = number(path, &token[0..4])? as i32;
    let day = number(path, &token[4..7])?;
    Ok(ordinal_date(path, year, day)?.and_time(NaiveTime::MIN))
}

fn parse_year_month_suffix(path: &Path, tokens: &[&str]) -> Result<NaiveDateTime, AodError> {
    let token = last_numeric_token(path, tokens, 6, "YYYYMM")?;
    let year = number(path, &token[0..4])? as i32;
    let month = number(path, &token[4..6])?;
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.and_time(NaiveTime::MIN))
        .ok_or_else(|| malformed(path, format!("month {} out of range", month)))
}
