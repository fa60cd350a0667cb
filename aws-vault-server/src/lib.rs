/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Loopback metadata servers that hand temporary credentials to child processes.
//!
//! Unmodified SDKs pick credentials up from one of two servers:
//! - [`Ec2MetadataServer`] emulates the instance metadata service (IMDSv2, token-gated)
//! - [`EcsMetadataServer`] emulates the container credentials endpoint (bearer-token gated)
//!
//! Both only bind to loopback addresses, only answer loopback peers, and call the
//! underlying credentials provider on every credentials request. Starting either returns a
//! [`ServerHandle`] for graceful shutdown.

#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod body;
pub mod ec2;
pub mod ecs;
mod error;
mod handle;
mod middleware;

pub use ec2::Ec2MetadataServer;
pub use ecs::{EcsMetadataServer, FetchMode};
pub use error::ServerError;
pub use handle::{ServerHandle, ShutdownTrigger};
