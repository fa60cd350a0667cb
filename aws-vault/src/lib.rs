/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The `aws-vault exec` command.
//!
//! [`ExecArgs`] parses the command line, [`ExecCommandInput`] validates it and applies its
//! overrides to the profile configuration, and [`ExecCommandInput::prepare`] produces either
//! an [`ExecPlan`] for the child process or `credential_process` JSON.
//!
//! # Examples
//!
//! ```no_run
//! use aws_vault::{Environ, ExecArgs, ExecCommandInput, Prepared};
//! use aws_vault_config::resolver::SessionChainResolver;
//! use aws_vault_config::ResolvedProfileConfig;
//! use aws_vault_keyring::CredentialCache;
//! use clap::Parser;
//! # async fn example(
//! #     config: ResolvedProfileConfig,
//! #     cache: CredentialCache,
//! #     resolver: SessionChainResolver,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let input = ExecCommandInput::from(ExecArgs::parse());
//! match input.prepare(&config, cache, resolver, Environ::current()).await? {
//!     Prepared::Command(plan) => {
//!         let status = plan.command().status().await?;
//!         plan.shutdown().await?;
//!         std::process::exit(status.code().unwrap_or(1));
//!     }
//!     Prepared::CredentialProcess(json) => println!("{}", json),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod args;
pub mod environ;
mod error;
pub mod exec;

pub use args::ExecArgs;
pub use environ::Environ;
pub use error::ExecError;
pub use exec::{DeliveryMode, ExecCommandInput, ExecPlan, Prepared};
