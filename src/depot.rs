//! Archive retrieval from the GOES depot.
//!
//! Layout: `<root>/<sensor>/<level>/<domain>/<year>/<week>` where
//! `week = day_of_year / 7 + 1`, archives named with an `sYYYYJJJHHMM` start
//! token. Missing directories and empty days are advisory, never errors.

use crate::config::DepotConfig;
use crate::external::{Tar, ToolRunner};
use crate::types::AodError;
use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use std::path::{Path, PathBuf};

const LEVELS: [&str; 2] = ["l1b", "l2"];
const DOMAINS: [&str; 2] = ["fd", "conus"];

/// A date given as `YYYYMMDD` or day-of-year `YYYYJJJ`.
pub fn parse_date(text: &str) -> Result<NaiveDate, AodError> {
    let bad = || AodError::Config(format!("date `{}` is neither YYYYMMDD nor YYYYJJJ", text));
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    match text.len() {
        8 => NaiveDate::parse_from_str(text, "%Y%m%d").map_err(|_| bad()),
        7 => {
            let year: i32 = text[..4].parse().map_err(|_| bad())?;
            let day: u32 = text[4..].parse().map_err(|_| bad())?;
            NaiveDate::from_yo_opt(year, day).ok_or_else(bad)
        }
        _ => Err(bad()),
    }
}

/// Every calendar day from `start` up to but excluding `end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = start;
    while day < end {
        days.push(day);
        day += Duration::days(1);
    }
    days
}

/// `YYYYJJJ`, the form archive names carry.
pub fn julian(date: NaiveDate) -> String {
    format!("{}{:03}", date.year(), date.ordinal())
}

pub fn week_of(date: NaiveDate) -> u32 {
    date.ordinal() / 7 + 1
}

/// Time-of-day selector, in minutes after midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    At(u32),
    Between(u32, u32),
}

impl TimeFilter {
    /// `HH:MM`, integer `HHMM` (0 to 2400), or `HH:MM-HH:MM`.
    pub fn parse(text: &str) -> Result<TimeFilter, AodError> {
        if let Some((from, to)) = text.split_once('-') {
            let (from, to) = (clock_minutes(from, text)?, clock_minutes(to, text)?);
            if from > to {
                return Err(bad_time(text));
            }
            return Ok(TimeFilter::Between(from, to));
        }
        if text.contains(':') {
            return clock_minutes(text, text).map(TimeFilter::At);
        }
        let value: u32 = text.parse().map_err(|_| bad_time(text))?;
        if value > 2400 || value % 100 >= 60 {
            return Err(bad_time(text));
        }
        Ok(TimeFilter::At(value / 100 * 60 + value % 100))
    }

    pub fn matches(&self, minute: u32) -> bool {
        match *self {
            TimeFilter::At(at) => minute == at,
            TimeFilter::Between(from, to) => from <= minute && minute <= to,
        }
    }
}

fn bad_time(text: &str) -> AodError {
    AodError::Config(format!(
        "time `{}` is not HH:MM, HHMM or HH:MM-HH:MM",
        text
    ))
}

fn clock_minutes(part: &str, whole: &str) -> Result<u32, AodError> {
    let (h, m) = part.split_once(':').ok_or_else(|| bad_time(whole))?;
    if h.len() != 2 || m.len() != 2 {
        return Err(bad_time(whole));
    }
    let hour: u32 = h.parse().map_err(|_| bad_time(whole))?;
    let minute: u32 = m.parse().map_err(|_| bad_time(whole))?;
    if hour > 24 || minute >= 60 || (hour == 24 && minute > 0) {
        return Err(bad_time(whole));
    }
    Ok(hour * 60 + minute)
}

pub struct Depot {
    root: PathBuf,
    start: Regex,
}

impl Depot {
    /// Validates the sensor, level and domain selectors.
    pub fn from_config(config: &DepotConfig) -> Result<Self, AodError> {
        if config.sensor != "abi" {
            return Err(AodError::Config(format!("unknown sensor `{}`", config.sensor)));
        }
        if !LEVELS.contains(&config.level.as_str()) {
            return Err(AodError::Config(format!("unknown level `{}`", config.level)));
        }
        if !DOMAINS.contains(&config.domain.as_str()) {
            return Err(AodError::Config(format!("unknown domain `{}`", config.domain)));
        }
        let root = config
            .root
            .join(&config.sensor)
            .join(&config.level)
            .join(&config.domain);
        if !root.is_dir() {
            log::warn!("Depot directory {} does not exist", root.display());
        }
        Ok(Self {
            root,
            start: Regex::new(r"s\d{7}(\d{2})(\d{2})")?,
        })
    }

    pub fn week_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(date.year().to_string())
            .join(format!("{:02}", week_of(date)))
    }

    /// Start minute after midnight from an archive name.
    pub fn start_minute(&self, name: &str) -> Option<u32> {
        let caps = self.start.captures(name)?;
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        Some(hour * 60 + minute)
    }

    /// Archives for one day, sorted. `None` when the week directory is
    /// missing or holds nothing for that day.
    pub fn files_on(&self, date: NaiveDate) -> Option<Vec<PathBuf>> {
        let dir = self.week_dir(date);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot open {}: {}", dir.display(), e);
                return None;
            }
        };
        let token = format!("s{}", julian(date));
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| e.file_name().to_string_lossy().contains(&token))
            .map(|e| e.path())
            .collect();
        if files.is_empty() {
            log::warn!("No data on {} ({})", date, julian(date));
            return None;
        }
        files.sort();
        Some(files)
    }

    /// Archives of `date` starting between the earliest and latest of
    /// `minutes`. With more than two minutes requested, one archive per
    /// minute: the one starting nearest to it.
    pub fn files_in_window(&self, date: NaiveDate, minutes: &[u32]) -> Option<Vec<PathBuf>> {
        let first = *minutes.iter().min()?;
        let last = *minutes.iter().max()?;
        let in_window: Vec<(u32, PathBuf)> = self
            .files_on(date)?
            .into_iter()
            .filter_map(|path| {
                let minute = self.start_minute(&path.file_name()?.to_string_lossy())?;
                (first <= minute && minute <= last).then_some((minute, path))
            })
            .collect();
        if in_window.is_empty() {
            log::warn!(
                "No data on {} between {:02}:{:02} and {:02}:{:02}",
                date,
                first / 60,
                first % 60,
                last / 60,
                last % 60
            );
            return None;
        }
        if minutes.len() <= 2 {
            return Some(in_window.into_iter().map(|(_, p)| p).collect());
        }

        let nearest = minutes
            .iter()
            .filter_map(|&wanted| {
                in_window
                    .iter()
                    .min_by_key(|(minute, _)| minute.abs_diff(wanted))
                    .map(|(_, path)| path.clone())
            })
            .collect();
        Some(nearest)
    }

    /// Archives over several days, optionally narrowed by time filters. A
    /// file passes when any filter matches its start minute.
    pub fn find(&self, dates: &[NaiveDate], filters: &[TimeFilter]) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for &date in dates {
            let Some(files) = self.files_on(date) else {
                continue;
            };
            for path in files {
                if filters.is_empty() {
                    found.push(path);
                    continue;
                }
                let minute = path
                    .file_name()
                    .and_then(|n| self.start_minute(&n.to_string_lossy()));
                if minute.map_or(false, |m| filters.iter().any(|f| f.matches(m))) {
                    found.push(path);
                }
            }
        }
        found
    }
}

/// Extract the members of `archive` whose names match any of `products`
/// into `dest`. Returns how many were extracted.
pub async fn extract_products(
    runner: &ToolRunner,
    archive: &Path,
    products: &[Regex],
    dest: &Path,
) -> Result<usize, AodError> {
    if !archive.is_file() {
        return Err(AodError::Archive(format!(
            "{} is not a readable file",
            archive.display()
        )));
    }
    std::fs::create_dir_all(dest)?;

    let listing = runner.run(&Tar::list(archive)).await?;
    let members: Vec<String> = listing
        .stdout
        .lines()
        .filter(|name| !name.ends_with('/'))
        .filter(|name| products.iter().any(|p| p.is_match(name)))
        .map(str::to_string)
        .collect();
    if members.is_empty() {
        log::warn!("{}: no members match {:?}", archive.display(), products);
        return Ok(0);
    }

    runner.run(&Tar::extract(archive, &members, dest)).await?;
    log::info!(
        "{} files extracted from {} into {}",
        members.len(),
        archive.display(),
        dest.display()
    );
    Ok(members.len())
}
