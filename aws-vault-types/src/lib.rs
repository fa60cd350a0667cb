/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Shared types for aws-vault: temporary [`Credentials`], the [`ProvideCredentials`](provider::ProvideCredentials)
//! capability every delivery mode consumes, and an injectable [`TimeSource`](time::TimeSource).

#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod credentials;
pub mod date_time;
pub mod error;
pub mod provider;
pub mod time;

pub use credentials::Credentials;
