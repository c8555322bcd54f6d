//! Partition time-sorted files into contiguous day or month buckets.

use crate::types::{AodError, Bucket, SourceFile};
use chrono::{Datelike, NaiveDate, NaiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Month,
}

impl Granularity {
    /// Calendar date a timestamp collapses to at this granularity.
    pub fn truncate(&self, timestamp: &NaiveDateTime) -> NaiveDate {
        let date = timestamp.date();
        match self {
            Granularity::Day => date,
            Granularity::Month => date.with_day(1).unwrap_or(date),
        }
    }

    /// Label used in output names: day-of-year `%j` or month `%m`.
    pub fn label(&self, truncated: &NaiveDate) -> String {
        match self {
            Granularity::Day => format!("{:03}", truncated.ordinal()),
            Granularity::Month => format!("{:02}", truncated.month()),
        }
    }
}

struct OpenBucket {
    truncated: NaiveDate,
    bucket: Bucket,
}

/// Group files in non-decreasing timestamp order into buckets, keeping
/// first-seen order. Consecutive files stay together while their truncated
/// dates match; the bucket still open after the last file is always flushed.
pub fn group_files(
    files: Vec<SourceFile>,
    granularity: Granularity,
) -> Result<Vec<Bucket>, AodError> {
    let mut closed: Vec<Bucket> = Vec::new();
    let mut open: Option<OpenBucket> = None;
    let mut previous: Option<NaiveDateTime> = None;

    for file in files {
        if previous.map_or(false, |p| file.timestamp < p) {
            return Err(AodError::UnsortedInput { path: file.path });
        }
        previous = Some(file.timestamp);

        let truncated = granularity.truncate(&file.timestamp);
        match open.as_mut() {
            Some(current) if current.truncated == truncated => current.bucket.members.push(file),
            _ => {
                if let Some(done) = open.take() {
                    closed.push(done.bucket);
                }
                open = Some(OpenBucket {
                    truncated,
                    bucket: Bucket {
                        key: granularity.label(&truncated),
                        members: vec![file],
                    },
                });
            }
        }
    }

    if let Some(done) = open {
        closed.push(done.bucket);
    }

    for bucket in &closed {
        log::debug!("Bucket {}: {} files", bucket.key, bucket.len());
    }

    Ok(closed)
}

/// The year tier aggregates everything it is given as one bucket.
pub fn single_bucket(files: Vec<SourceFile>, label: impl Into<String>) -> Vec<Bucket> {
    if files.is_empty() {
        return Vec::new();
    }
    vec![Bucket {
        key: label.into(),
        members: files,
    }]
}
