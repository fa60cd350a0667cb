/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use aws_vault_config::profile::ConfigurationError;
use aws_vault_server::ServerError;
use aws_vault_types::date_time::DateTimeError;
use aws_vault_types::provider::CredentialsError;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Error preparing a command to run with temporary credentials
#[derive(Debug)]
#[non_exhaustive]
pub enum ExecError {
    /// Flags that cannot be combined
    InvalidFlags(&'static str),

    /// The current process already runs inside an aws-vault session
    NestedSession,

    /// The profile configuration cannot produce credentials
    Configuration(ConfigurationError),

    /// Credentials could not be retrieved for the profile
    Credentials {
        /// Profile whose credentials were requested
        profile: String,
        /// Underlying failure
        source: CredentialsError,
    },

    /// A background credential server could not be started
    Server(ServerError),

    /// The credential expiration could not be formatted
    Timestamp(DateTimeError),

    /// Credentials could not be serialized for `credential_process`
    Serialize(serde_json::Error),
}

impl Display for ExecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::InvalidFlags(message) => f.write_str(message),
            ExecError::NestedSession => write!(
                f,
                "aws-vault sessions should be nested with care, unset AWS_VAULT to force"
            ),
            ExecError::Configuration(_) => write!(f, "Error getting temporary credentials"),
            ExecError::Credentials { profile, .. } => {
                write!(f, "Failed to get credentials for {}", profile)
            }
            ExecError::Server(_) => write!(f, "Failed to start credential server"),
            ExecError::Timestamp(_) => write!(f, "failed to format the credential expiration"),
            ExecError::Serialize(_) => write!(f, "failed to serialize credentials"),
        }
    }
}

impl Error for ExecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecError::InvalidFlags(_) | ExecError::NestedSession => None,
            ExecError::Configuration(err) => Some(err),
            ExecError::Credentials { source, .. } => Some(source),
            ExecError::Server(err) => Some(err),
            ExecError::Timestamp(err) => Some(err),
            ExecError::Serialize(err) => Some(err),
        }
    }
}

impl From<ConfigurationError> for ExecError {
    fn from(err: ConfigurationError) -> Self {
        ExecError::Configuration(err)
    }
}

impl From<ServerError> for ExecError {
    fn from(err: ServerError) -> Self {
        ExecError::Server(err)
    }
}

impl From<DateTimeError> for ExecError {
    fn from(err: DateTimeError) -> Self {
        ExecError::Timestamp(err)
    }
}
