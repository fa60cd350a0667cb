/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! ISO-8601 timestamps as they appear in metadata responses, `credential_process` output,
//! and the `AWS_CREDENTIAL_EXPIRATION` environment variable.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::SystemTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// Failure to format or parse a timestamp
#[derive(Debug)]
#[non_exhaustive]
pub enum DateTimeError {
    /// The timestamp cannot be represented (for example, a year past 9999)
    Format(time::error::Format),
    /// The input was not an RFC-3339 timestamp
    Parse(time::error::Parse),
}

impl Display for DateTimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DateTimeError::Format(_) => write!(f, "timestamp could not be formatted"),
            DateTimeError::Parse(_) => write!(f, "timestamp could not be parsed"),
        }
    }
}

impl Error for DateTimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DateTimeError::Format(err) => Some(err),
            DateTimeError::Parse(err) => Some(err),
        }
    }
}

/// Formats `time` as `YYYY-MM-DDTHH:MM:SSZ` in UTC, truncating sub-second precision.
pub fn fmt_iso8601(time: SystemTime) -> Result<String, DateTimeError> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    OffsetDateTime::from(time)
        .format(&format)
        .map_err(DateTimeError::Format)
}

/// Parses an RFC-3339 timestamp such as `2009-02-13T23:31:30Z`.
pub fn parse_iso8601(input: &str) -> Result<SystemTime, DateTimeError> {
    OffsetDateTime::parse(input, &Rfc3339)
        .map(SystemTime::from)
        .map_err(DateTimeError::Parse)
}
