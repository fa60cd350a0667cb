/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Command line flags of `aws-vault exec`.

use crate::exec::ExecCommandInput;
use clap::Parser;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Execute a command with AWS credentials.
#[derive(Parser, Clone, Debug, PartialEq, Eq)]
#[clap(name = "exec")]
pub struct ExecArgs {
    /// Duration of the temporary or assume-role session. Defaults to 1h
    #[clap(long, short = 'd', parse(try_from_str = parse_duration))]
    pub duration: Option<Duration>,

    /// Skip creating STS session with GetSessionToken
    #[clap(long, short = 'n')]
    pub no_session: bool,

    /// The AWS region
    #[clap(long)]
    pub region: Option<String>,

    /// The MFA token to use
    #[clap(long, short = 't')]
    pub mfa_token: Option<String>,

    /// Output credentials in JSON that can be used by credential_process
    #[clap(long, short = 'j', hide = true)]
    pub json: bool,

    /// Run a ECS credential server in the background for credentials (the SDK or app must
    /// support AWS_CONTAINER_CREDENTIALS_FULL_URI)
    #[clap(long, short = 's', visible_alias = "server")]
    pub ecs_server: bool,

    /// Run a EC2 metadata server in the background for credentials
    #[clap(long)]
    pub ec2_server: bool,

    /// When using --ecs-server, lazily fetch credentials
    #[clap(long)]
    pub lazy: bool,

    /// Print the SSO link to the terminal without automatically opening the browser
    #[clap(long)]
    pub stdout: bool,

    /// Prompt driver to use for MFA codes
    #[clap(long)]
    pub prompt: Option<String>,

    /// Name of the profile
    pub profile: String,

    /// Command to execute, defaults to $SHELL
    pub cmd: Option<String>,

    /// Command arguments
    pub args: Vec<String>,
}

impl From<ExecArgs> for ExecCommandInput {
    fn from(args: ExecArgs) -> Self {
        let mut input = ExecCommandInput::new(args.profile);
        input.command = args.cmd;
        input.args = args.args;
        input.start_ec2_server = args.ec2_server;
        input.start_ecs_server = args.ecs_server;
        input.lazy = args.lazy;
        input.json_deprecated = args.json;
        input.session_duration = args.duration;
        input.no_session = args.no_session;
        input.use_stdout = args.stdout;
        input.region = args.region;
        input.mfa_token = args.mfa_token;
        input.prompt = args.prompt;
        input
    }
}

/// A `--duration` value that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDuration {
    input: String,
}

impl Display for InvalidDuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid duration `{}`: expected a sequence of numbers with units, like `1h30m`",
            self.input
        )
    }
}

impl Error for InvalidDuration {}

/// Parses durations like `1h`, `90m`, `1h30m`, `3600s` or `1500ms`.
///
/// Every number needs a unit. Fractions are accepted, as in `1.5h`.
pub fn parse_duration(input: &str) -> Result<Duration, InvalidDuration> {
    let invalid = || InvalidDuration {
        input: input.to_string(),
    };
    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid());
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, after_number) = rest.split_at(number_len);
        let number: f64 = number.parse().map_err(|_| invalid())?;
        let unit_len = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, after_unit) = after_number.split_at(unit_len);
        let unit_nanos = match unit {
            "h" => 3_600_000_000_000.0,
            "m" => 60_000_000_000.0,
            "s" => 1_000_000_000.0,
            "ms" => 1_000_000.0,
            "us" | "µs" => 1_000.0,
            "ns" => 1.0,
            _ => return Err(invalid()),
        };
        let nanos = (number * unit_nanos).round();
        if !nanos.is_finite() || nanos > u64::MAX as f64 {
            return Err(invalid());
        }
        total = total
            .checked_add(Duration::from_nanos(nanos as u64))
            .ok_or_else(invalid)?;
        rest = after_unit;
    }
    Ok(total)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> ExecArgs {
        ExecArgs::try_parse_from(std::iter::once("exec").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("90m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1.5h"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("3600s"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1500ms"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        for bad in ["", "1", "h", "1d", "1h30", "-1h", "1.2.3h"] {
            assert!(parse_duration(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn profile_command_and_arguments() {
        let args = parse(&["prod", "aws", "s3", "ls"]);
        assert_eq!(args.profile, "prod");
        assert_eq!(args.cmd.as_deref(), Some("aws"));
        assert_eq!(args.args, vec!["s3".to_string(), "ls".to_string()]);

        let args = parse(&["prod"]);
        assert_eq!(args.cmd, None);
        assert!(args.args.is_empty());
    }

    #[test]
    fn flags_after_a_separator_belong_to_the_command() {
        let args = parse(&["-d", "2h", "prod", "--", "ls", "-la"]);
        assert_eq!(args.duration, Some(Duration::from_secs(7200)));
        assert_eq!(args.cmd.as_deref(), Some("ls"));
        assert_eq!(args.args, vec!["-la".to_string()]);
    }

    #[test]
    fn server_is_an_alias_for_ecs_server() {
        assert!(parse(&["--server", "prod"]).ecs_server);
        assert!(parse(&["-s", "prod"]).ecs_server);
        assert!(parse(&["--ecs-server", "prod"]).ecs_server);
        assert!(!parse(&["--ec2-server", "prod"]).ecs_server);
    }

    #[test]
    fn short_flags() {
        let args = parse(&["-n", "-t", "123456", "-j", "prod"]);
        assert!(args.no_session);
        assert_eq!(args.mfa_token.as_deref(), Some("123456"));
        assert!(args.json);
    }

    #[test]
    fn profile_is_required() {
        assert!(ExecArgs::try_parse_from(["exec", "--ec2-server"]).is_err());
    }

    #[test]
    fn bad_duration_is_a_usage_error() {
        assert!(ExecArgs::try_parse_from(["exec", "--duration", "soon", "prod"]).is_err());
    }

    #[test]
    fn converts_into_command_input() {
        let input = ExecCommandInput::from(parse(&[
            "--ecs-server",
            "--lazy",
            "--region",
            "eu-west-1",
            "--prompt",
            "zenity",
            "--stdout",
            "prod",
            "make",
            "deploy",
        ]));
        assert_eq!(input.profile_name, "prod");
        assert_eq!(input.command.as_deref(), Some("make"));
        assert_eq!(input.args, vec!["deploy".to_string()]);
        assert!(input.start_ecs_server);
        assert!(!input.start_ec2_server);
        assert!(input.lazy);
        assert!(input.use_stdout);
        assert_eq!(input.region.as_deref(), Some("eu-west-1"));
        assert_eq!(input.prompt.as_deref(), Some("zenity"));
    }
}
