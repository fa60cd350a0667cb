/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::middleware::generate_token;
use aws_vault_types::time::SharedTimeSource;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

/// TTLs a client may request for a metadata token, in seconds
pub(crate) const TOKEN_TTL_RANGE: RangeInclusive<u64> = 1..=21600;

const TOKEN_LENGTH: usize = 56;

/// Session tokens issued by `PUT /latest/api/token`
pub(crate) struct TokenStore {
    tokens: Mutex<HashMap<String, SystemTime>>,
    time_source: SharedTimeSource,
}

impl Debug for TokenStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let issued = self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("TokenStore")
            .field("issued", &issued)
            .field("time_source", &self.time_source)
            .finish()
    }
}

impl TokenStore {
    pub(crate) fn new(time_source: SharedTimeSource) -> Self {
        TokenStore {
            tokens: Mutex::new(HashMap::new()),
            time_source,
        }
    }

    /// Issues a token valid for `ttl`.
    pub(crate) fn issue(&self, ttl: Duration) -> String {
        let now = self.time_source.now();
        let token = generate_token(TOKEN_LENGTH);
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|_, expires_at| *expires_at > now);
        tokens.insert(token.clone(), now + ttl);
        token
    }

    /// Whether `token` was issued here and hasn't expired.
    pub(crate) fn is_valid(&self, token: &str) -> bool {
        let now = self.time_source.now();
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(tokens.get(token), Some(expires_at) if *expires_at > now)
    }
}
