/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Credential fields shared by both servers' response bodies.

use aws_vault_types::date_time::{fmt_iso8601, DateTimeError};
use aws_vault_types::Credentials;
use std::time::{Duration, SystemTime};

/// Expiration advertised for credentials that never expire, so that SDKs poll again
pub(crate) const NON_EXPIRING_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// The `Token` and `Expiration` fields, which SDKs require in every credentials body.
///
/// Long-lived keys have no token, so it is written as an empty string.
pub(crate) fn token_and_expiration(
    creds: &Credentials,
    now: SystemTime,
) -> Result<(&str, String), DateTimeError> {
    let expiration = creds.expiry().unwrap_or(now + NON_EXPIRING_POLL_INTERVAL);
    Ok((creds.session_token().unwrap_or(""), fmt_iso8601(expiration)?))
}
