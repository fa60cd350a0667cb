/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Error helpers.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Provides a `Display` impl for an `Error` that outputs the full error context
///
/// This utility follows the error cause/source chain and displays every error message
/// in the chain separated by ": ".
///
/// ```rust
/// use aws_vault_types::error::DisplayErrorContext;
/// use aws_vault_types::provider::CredentialsError;
///
/// let err = CredentialsError::provider_error("AccessDenied");
/// assert_eq!(
///     DisplayErrorContext(&err).to_string(),
///     "an error occurred while loading credentials: AccessDenied"
/// );
/// ```
#[derive(Debug)]
pub struct DisplayErrorContext<'a, E: Error + ?Sized>(pub &'a E);

impl<E: Error + ?Sized> Display for DisplayErrorContext<'_, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {}", err)?;
            source = err.source();
        }
        Ok(())
    }
}
