use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("failed to parse timestamp '{value}' with format '{format}': {source}")]
    ParseError {
        value: String,
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("timestamp '{0}' does not match any known layout")]
    NoLayout(String),
}

/// Layouts tried, in order, when a pattern does not declare a format.
const AUTO_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y/%m/%d %H:%M:%S",
    "%d/%b/%Y:%H:%M:%S",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TimestampFormat {
    Strptime(String),
    Iso8601,
    Epoch,
    EpochMs,
}

impl TimestampFormat {
    /// One of: strptime format string, 'iso8601', 'epoch', 'epoch_ms'
    pub fn from_name(format: &str) -> Self {
        match format {
            "iso8601" => TimestampFormat::Iso8601,
            "epoch" => TimestampFormat::Epoch,
            "epoch_ms" => TimestampFormat::EpochMs,
            other => TimestampFormat::Strptime(other.to_string()),
        }
    }

    pub fn parse(&self, value: &str) -> Result<DateTime<Utc>, TimestampError> {
        match self {
            TimestampFormat::Iso8601 => parse_iso8601(value),
            TimestampFormat::Epoch => parse_epoch(value),
            TimestampFormat::EpochMs => parse_epoch_ms(value),
            TimestampFormat::Strptime(fmt) => parse_strptime(value, fmt),
        }
    }
}

/// Best-effort parse of a timestamp whose layout is not known up front.
pub fn parse_auto(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    for layout in AUTO_LAYOUTS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(value, layout) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimestampError::NoLayout(value.to_string()))
}

fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    // Try parsing as RFC3339 (which handles ISO8601 with timezone)
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TimestampError::ParseError {
            value: value.to_string(),
            format: "iso8601".to_string(),
            source: Box::new(e),
        })
}

fn parse_epoch(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let seconds: i64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| TimestampError::ParseError {
            value: value.to_string(),
            format: "epoch".to_string(),
            source: Box::new(e),
        })?;

    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| out_of_range(value, "epoch"))
}

fn parse_epoch_ms(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let millis: i64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| TimestampError::ParseError {
            value: value.to_string(),
            format: "epoch_ms".to_string(),
            source: Box::new(e),
        })?;

    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| out_of_range(value, "epoch_ms"))
}

fn parse_strptime(value: &str, format: &str) -> Result<DateTime<Utc>, TimestampError> {
    if format.contains("%z") || format.contains("%Z") || format.contains("%:z") {
        DateTime::parse_from_str(value, format)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| TimestampError::ParseError {
                value: value.to_string(),
                format: format.to_string(),
                source: Box::new(e),
            })
    } else {
        // Naive layouts are interpreted as UTC
        NaiveDateTime::parse_from_str(value, format)
            .map(|ndt| Utc.from_utc_datetime(&ndt))
            .map_err(|e| TimestampError::ParseError {
                value: value.to_string(),
                format: format.to_string(),
                source: Box::new(e),
            })
    }
}

fn out_of_range(value: &str, format: &str) -> TimestampError {
    TimestampError::ParseError {
        value: value.to_string(),
        format: format.to_string(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "timestamp out of range",
        )),
    }
}
