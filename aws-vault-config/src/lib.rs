/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Profile chain resolution for aws-vault.
//!
//! A [`ResolvedProfileConfig`](profile::ResolvedProfileConfig) describes what credentials a
//! profile resolves to: which long-lived keys start the chain, whether an MFA-backed session
//! token is obtained first, and which roles are assumed after that.
//!
//! - [`SessionChainResolver`](resolver::SessionChainResolver) turns a configuration into fresh
//!   credentials through injected [`StsClient`](sts::StsClient) and
//!   [`SsoClient`](sts::SsoClient) implementations.
//! - [`TempCredentialsProvider`](provider::TempCredentialsProvider) puts the credential cache in
//!   front of the resolver and makes sure concurrent callers share a single refresh.
//!
//! # Examples
//!
//! ```no_run
//! use aws_vault_config::profile::{ChainHop, ResolvedProfileConfig};
//! use aws_vault_config::provider::TempCredentialsProvider;
//! use aws_vault_config::resolver::SessionChainResolver;
//! use aws_vault_keyring::store::SharedSecretStore;
//! use aws_vault_keyring::{CredentialCache, KeyringCredentialsProvider};
//! # async fn example(store: SharedSecretStore, sts: impl aws_vault_config::sts::StsClient + 'static) {
//! let config = ResolvedProfileConfig::builder("prod")
//!     .hop(ChainHop::new("prod").role_arn("arn:aws:iam::111122223333:role/Deploy"))
//!     .build();
//! let resolver = SessionChainResolver::builder()
//!     .base_credentials(KeyringCredentialsProvider::new("prod", store.clone()))
//!     .sts_client(sts)
//!     .build();
//! let provider = TempCredentialsProvider::builder(config, CredentialCache::new(store), resolver)
//!     .build()
//!     .expect("valid configuration");
//! let credentials = provider.retrieve().await;
//! # let _ = credentials;
//! # }
//! ```

#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod mfa;
pub mod profile;
pub mod provider;
pub mod resolver;
pub mod sts;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use profile::ResolvedProfileConfig;
pub use provider::TempCredentialsProvider;
