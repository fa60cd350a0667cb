/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Preparing a child process that runs with temporary credentials.
//!
//! Credentials reach the child in one of four ways, chosen by [`DeliveryMode`]:
//! - copied into its environment (the default)
//! - served by a background [`Ec2MetadataServer`]
//! - served by a background [`EcsMetadataServer`]
//! - printed as `credential_process` JSON instead of running anything (`--json`)

use crate::environ::{Environ, AWS_VAULT};
use crate::error::ExecError;
use aws_vault_config::profile::ResolvedProfileConfig;
use aws_vault_config::resolver::ResolveCredentials;
use aws_vault_config::TempCredentialsProvider;
use aws_vault_keyring::CredentialCache;
use aws_vault_server::ec2::{self, Ec2MetadataServer};
use aws_vault_server::{EcsMetadataServer, FetchMode, ServerHandle};
use aws_vault_types::date_time::fmt_iso8601;
use aws_vault_types::Credentials;
use serde::Serialize;
use std::ffi::{OsStr, OsString};
use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;
use tracing::Instrument;

const TERMINAL_PROMPT: &str = "terminal";

/// Everything `aws-vault exec` was asked to do
#[derive(Clone, PartialEq, Eq)]
pub struct ExecCommandInput {
    /// Profile whose credentials the command runs with
    pub profile_name: String,
    /// Command to run. The default shell if unset
    pub command: Option<String>,
    /// Arguments of the command
    pub args: Vec<String>,
    /// Serve credentials from an EC2 metadata server
    pub start_ec2_server: bool,
    /// Serve credentials from an ECS credential server
    pub start_ecs_server: bool,
    /// Have the ECS server fetch credentials on the first request
    pub lazy: bool,
    /// Print `credential_process` JSON instead of running a command
    pub json_deprecated: bool,
    /// Overrides the session token and assume-role durations
    pub session_duration: Option<Duration>,
    /// Skip obtaining a session token
    pub no_session: bool,
    /// Print the SSO login link instead of opening a browser
    pub use_stdout: bool,
    /// Overrides the profile's region
    pub region: Option<String>,
    /// MFA code to use instead of prompting
    pub mfa_token: Option<String>,
    /// Prompt driver for MFA codes
    pub prompt: Option<String>,
    /// Where the EC2 metadata server listens
    pub ec2_server_addr: SocketAddr,
}

impl Debug for ExecCommandInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecCommandInput")
            .field("profile_name", &self.profile_name)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("start_ec2_server", &self.start_ec2_server)
            .field("start_ecs_server", &self.start_ecs_server)
            .field("lazy", &self.lazy)
            .field("json_deprecated", &self.json_deprecated)
            .field("session_duration", &self.session_duration)
            .field("no_session", &self.no_session)
            .field("use_stdout", &self.use_stdout)
            .field("region", &self.region)
            .field("mfa_token", &self.mfa_token.as_ref().map(|_| "** redacted **"))
            .field("prompt", &self.prompt)
            .field("ec2_server_addr", &self.ec2_server_addr)
            .finish()
    }
}

/// How credentials reach the child process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeliveryMode {
    /// `AWS_ACCESS_KEY_ID` and friends in the child's environment
    Environment,
    /// A background EC2 metadata server
    Ec2Server,
    /// A background ECS credential server
    EcsServer,
    /// `credential_process` JSON, no child process
    CredentialProcess,
}

impl ExecCommandInput {
    /// Creates the input for running the default shell under `profile_name`.
    pub fn new(profile_name: impl Into<String>) -> Self {
        ExecCommandInput {
            profile_name: profile_name.into(),
            command: None,
            args: Vec::new(),
            start_ec2_server: false,
            start_ecs_server: false,
            lazy: false,
            json_deprecated: false,
            session_duration: None,
            no_session: false,
            use_stdout: false,
            region: None,
            mfa_token: None,
            prompt: None,
            ec2_server_addr: ec2::DEFAULT_ADDR,
        }
    }

    /// Rejects flag combinations that cannot work together.
    pub fn validate(&self) -> Result<(), ExecError> {
        let terminal_prompt = self.prompt.as_deref() == Some(TERMINAL_PROMPT);
        let conflict = if self.start_ec2_server && self.start_ecs_server {
            Some("Can't use --ec2-server with --ecs-server")
        } else if self.start_ec2_server && self.json_deprecated {
            Some("Can't use --ec2-server with --json")
        } else if self.start_ec2_server && self.no_session {
            Some("Can't use --ec2-server with --no-session")
        } else if self.start_ecs_server && self.json_deprecated {
            Some("Can't use --ecs-server with --json")
        } else if self.start_ecs_server && self.no_session {
            Some("Can't use --ecs-server with --no-session")
        } else if self.start_ecs_server && terminal_prompt {
            Some("Can't use --prompt=terminal with --ecs-server. Specify a different prompt driver")
        } else if self.start_ec2_server && terminal_prompt {
            Some("Can't use --prompt=terminal with --ec2-server. Specify a different prompt driver")
        } else {
            None
        };
        match conflict {
            Some(message) => Err(ExecError::InvalidFlags(message)),
            None => Ok(()),
        }
    }

    /// Whether credentials are served by a background server.
    pub fn has_background_server(&self) -> bool {
        self.start_ec2_server || self.start_ecs_server
    }

    /// Returns how credentials will reach the child. Assumes [`validate`](Self::validate) passed.
    pub fn delivery_mode(&self) -> DeliveryMode {
        if self.json_deprecated {
            DeliveryMode::CredentialProcess
        } else if self.start_ec2_server {
            DeliveryMode::Ec2Server
        } else if self.start_ecs_server {
            DeliveryMode::EcsServer
        } else {
            DeliveryMode::Environment
        }
    }

    /// Applies the command line overrides to the profile's configuration.
    pub fn apply_overrides(&self, config: &ResolvedProfileConfig) -> ResolvedProfileConfig {
        let mut builder = config.to_builder();
        if let Some(region) = &self.region {
            builder = builder.region(region);
        }
        if let Some(mfa_token) = &self.mfa_token {
            builder = builder.mfa_token(mfa_token);
        }
        if let Some(duration) = self.session_duration {
            builder = builder
                .session_token_duration(duration)
                .assume_role_duration(duration);
        }
        if self.no_session {
            builder = builder.use_session_token(false);
        }
        if let Some(sso) = config.sso().filter(|_| self.use_stdout) {
            builder = builder.sso(sso.clone().with_stdout(true));
        }
        builder.build()
    }

    /// Builds the credentials provider for `config` and prepares the command.
    ///
    /// `env` is the environment the child inherits, usually [`Environ::current`]. Refuses to
    /// run inside another aws-vault session unless printing `credential_process` JSON.
    pub async fn prepare(
        &self,
        config: &ResolvedProfileConfig,
        cache: CredentialCache,
        resolver: impl ResolveCredentials + 'static,
        env: Environ,
    ) -> Result<Prepared, ExecError> {
        if !self.json_deprecated && env.is_set(AWS_VAULT) {
            return Err(ExecError::NestedSession);
        }
        self.validate()?;
        let provider =
            TempCredentialsProvider::builder(self.apply_overrides(config), cache, resolver)
                .build()?;
        self.deliver(provider, env).await
    }

    /// Prepares the command with credentials from `provider`.
    pub async fn deliver(
        &self,
        provider: TempCredentialsProvider,
        env: Environ,
    ) -> Result<Prepared, ExecError> {
        let mode = self.delivery_mode();
        let span = tracing::info_span!("exec", profile = %self.profile_name, mode = ?mode);
        async move {
            match mode {
                DeliveryMode::CredentialProcess => {
                    let creds = self.retrieve(&provider).await?;
                    credential_process_json(&creds).map(Prepared::CredentialProcess)
                }
                DeliveryMode::Environment => self.exec_environment(&provider, env).await,
                DeliveryMode::Ec2Server => self.exec_ec2_server(provider, env),
                DeliveryMode::EcsServer => self.exec_ecs_server(provider, env).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn retrieve(&self, provider: &TempCredentialsProvider) -> Result<Credentials, ExecError> {
        provider
            .retrieve()
            .await
            .map_err(|source| ExecError::Credentials {
                profile: self.profile_name.clone(),
                source,
            })
    }

    async fn exec_environment(
        &self,
        provider: &TempCredentialsProvider,
        mut env: Environ,
    ) -> Result<Prepared, ExecError> {
        let creds = self.retrieve(provider).await?;
        env.update_for_aws_vault(&self.profile_name, provider.config().region());

        tracing::info!("setting subprocess env: AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY");
        env.set("AWS_ACCESS_KEY_ID", creds.access_key_id());
        env.set("AWS_SECRET_ACCESS_KEY", creds.secret_access_key());
        if let Some(session_token) = creds.session_token() {
            tracing::info!("setting subprocess env: AWS_SESSION_TOKEN");
            env.set("AWS_SESSION_TOKEN", session_token);
        }
        if let Some(expiry) = creds.expiry() {
            tracing::info!("setting subprocess env: AWS_CREDENTIAL_EXPIRATION");
            env.set("AWS_CREDENTIAL_EXPIRATION", fmt_iso8601(expiry)?);
        }
        Ok(Prepared::Command(self.plan(env, None)))
    }

    fn exec_ec2_server(
        &self,
        provider: TempCredentialsProvider,
        mut env: Environ,
    ) -> Result<Prepared, ExecError> {
        tracing::info!("starting an EC2 credential server");
        let region = provider.config().region().map(str::to_string);
        let mut server = Ec2MetadataServer::builder(provider).addr(self.ec2_server_addr);
        if let Some(region) = &region {
            server = server.region(region);
        }
        let handle = server.build().start()?;

        env.update_for_aws_vault(&self.profile_name, region.as_deref());
        tracing::info!("setting subprocess env: AWS_EC2_METADATA_SERVICE_ENDPOINT");
        env.set(
            "AWS_EC2_METADATA_SERVICE_ENDPOINT",
            format!("{}/", handle.base_url()),
        );
        Ok(Prepared::Command(self.plan(env, Some(handle))))
    }

    async fn exec_ecs_server(
        &self,
        provider: TempCredentialsProvider,
        mut env: Environ,
    ) -> Result<Prepared, ExecError> {
        let region = provider.config().region().map(str::to_string);
        let fetch_mode = if self.lazy {
            FetchMode::Lazy
        } else {
            FetchMode::Eager
        };
        let server = EcsMetadataServer::builder(provider)
            .fetch_mode(fetch_mode)
            .build();
        let auth_token = server.auth_token().to_string();
        let handle = server.start().await?;

        tracing::info!("setting subprocess env: AWS_CONTAINER_CREDENTIALS_FULL_URI, AWS_CONTAINER_AUTHORIZATION_TOKEN");
        env.update_for_aws_vault(&self.profile_name, region.as_deref());
        env.set("AWS_CONTAINER_CREDENTIALS_FULL_URI", handle.base_url());
        env.set("AWS_CONTAINER_AUTHORIZATION_TOKEN", auth_token);
        tracing::info!("started an ECS credential server; the app's AWS SDK must support AWS_CONTAINER_CREDENTIALS_FULL_URI");
        Ok(Prepared::Command(self.plan(env, Some(handle))))
    }

    fn plan(&self, env: Environ, server: Option<ServerHandle>) -> ExecPlan {
        let (program, subshell) = match &self.command {
            Some(command) => (OsString::from(command), false),
            None => (default_shell(&env), true),
        };
        if subshell {
            tracing::info!(shell = ?program, "starting a subshell, use `exit` to exit the subshell");
        }
        ExecPlan {
            program,
            args: self.args.clone(),
            env,
            subshell,
            server,
        }
    }
}

/// `$SHELL` from `env`, or the platform's shell
pub fn default_shell(env: &Environ) -> OsString {
    match env.get("SHELL") {
        Some(shell) if !shell.is_empty() => shell.to_os_string(),
        _ if cfg!(windows) => OsString::from("cmd.exe"),
        _ => OsString::from("/bin/sh"),
    }
}

/// The outcome of preparing `aws-vault exec`
#[derive(Debug)]
pub enum Prepared {
    /// A command to run
    Command(ExecPlan),
    /// `credential_process` JSON to print
    CredentialProcess(String),
}

/// A child process ready to run with temporary credentials
///
/// Keeps the background credential server, if any, alive for as long as the plan lives.
#[derive(Debug)]
pub struct ExecPlan {
    program: OsString,
    args: Vec<String>,
    env: Environ,
    subshell: bool,
    server: Option<ServerHandle>,
}

impl ExecPlan {
    /// Returns the program to run.
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Returns the program's arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the complete environment of the child.
    pub fn env(&self) -> &Environ {
        &self.env
    }

    /// Whether the program is the default shell because no command was given.
    pub fn is_subshell(&self) -> bool {
        self.subshell
    }

    /// Returns the background credential server.
    pub fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }

    /// Returns the child's command with inherited standard streams and exactly
    /// [`env`](Self::env) as its environment.
    pub fn command(&self) -> tokio::process::Command {
        tracing::info!(program = ?self.program, args = ?self.args, "starting subprocess");
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .envs(self.env.iter())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }

    /// Stops the background credential server, if any.
    pub async fn shutdown(self) -> Result<(), ExecError> {
        match self.server {
            Some(server) => Ok(server.shutdown().await?),
            None => Ok(()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialProcessOutput<'a> {
    version: u8,
    access_key_id: &'a str,
    secret_access_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration: Option<String>,
}

/// Renders `creds` in the format `credential_process` expects.
pub fn credential_process_json(creds: &Credentials) -> Result<String, ExecError> {
    let output = CredentialProcessOutput {
        version: 1,
        access_key_id: creds.access_key_id(),
        secret_access_key: creds.secret_access_key(),
        session_token: creds.session_token(),
        expiration: creds.expiry().map(fmt_iso8601).transpose()?,
    };
    serde_json::to_string_pretty(&output).map_err(ExecError::Serialize)
}
