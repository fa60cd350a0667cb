/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Secret-store integration for aws-vault.
//!
//! Long-lived keys and cached session credentials both live in one encrypted
//! [`SecretStore`](store::SecretStore). This crate provides:
//! - [`CredentialCache`](cache::CredentialCache), which stores session credentials under a
//!   [`CacheKey`](cache::CacheKey) derived from the chain that produced them
//! - [`KeyringCredentialsProvider`](keyring_provider::KeyringCredentialsProvider), which reads a
//!   profile's long-lived keys

#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod cache;
pub mod keyring_provider;
pub mod store;

pub use cache::{CacheKey, CacheRecord, CredentialCache, RoleKey};
pub use keyring_provider::KeyringCredentialsProvider;
