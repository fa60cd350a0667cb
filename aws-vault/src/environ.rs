/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The environment handed to the child process.

use std::ffi::{OsStr, OsString};
use std::fmt::{self, Debug, Formatter};

/// Variables that would shadow or confuse the injected credentials
const SHADOWING_VARS: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AWS_SECURITY_TOKEN",
    "AWS_CREDENTIAL_FILE",
    "AWS_DEFAULT_PROFILE",
    "AWS_PROFILE",
    "AWS_SDK_LOAD_CONFIG",
];

/// Names the profile an aws-vault child process runs under
pub const AWS_VAULT: &str = "AWS_VAULT";

/// An ordered set of environment variables
///
/// Keys are unique; [`set`](Environ::set) replaces an existing entry in place.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environ {
    vars: Vec<(OsString, OsString)>,
}

impl Environ {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the environment of the current process.
    pub fn current() -> Self {
        std::env::vars_os().collect()
    }

    /// Returns the value of `key`.
    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        let key = key.as_ref();
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// Whether `key` is set to a non-empty value.
    pub fn is_set(&self, key: impl AsRef<OsStr>) -> bool {
        matches!(self.get(key), Some(value) if !value.is_empty())
    }

    /// Sets `key`, replacing any existing value.
    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.vars.push((key, value)),
        }
    }

    /// Removes `key`.
    pub fn unset(&mut self, key: impl AsRef<OsStr>) {
        let key = key.as_ref();
        self.vars.retain(|(k, _)| k != key);
    }

    /// Iterates over the variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    /// Returns the number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variables are set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Removes variables that would shadow injected credentials, then marks the environment
    /// as belonging to `profile_name` and sets the region variables if `region` is known.
    pub fn update_for_aws_vault(&mut self, profile_name: &str, region: Option<&str>) {
        for key in SHADOWING_VARS {
            self.unset(key);
        }
        self.set(AWS_VAULT, profile_name);
        if let Some(region) = region {
            // most SDKs read AWS_REGION, boto3 reads AWS_DEFAULT_REGION
            tracing::info!(region = %region, "setting subprocess env: AWS_REGION, AWS_DEFAULT_REGION");
            self.set("AWS_REGION", region);
            self.set("AWS_DEFAULT_REGION", region);
        }
    }
}

impl<K: Into<OsString>, V: Into<OsString>> FromIterator<(K, V)> for Environ {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut environ = Environ::new();
        for (key, value) in iter {
            environ.set(key, value);
        }
        environ
    }
}

impl Debug for Environ {
    // values carry credentials
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environ")
            .field("keys", &self.vars.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn environ(vars: &[(&str, &str)]) -> Environ {
        vars.iter().copied().collect()
    }

    #[test]
    fn set_replaces_in_place() {
        let mut env = environ(&[("A", "1"), ("B", "2")]);
        env.set("A", "3");
        env.set("C", "4");
        let vars: Vec<_> = env.iter().collect();
        assert_eq!(
            vars,
            vec![
                (OsStr::new("A"), OsStr::new("3")),
                (OsStr::new("B"), OsStr::new("2")),
                (OsStr::new("C"), OsStr::new("4")),
            ]
        );
    }

    #[test]
    fn unset_matches_whole_keys() {
        let mut env = environ(&[("AWS_PROFILE", "dev"), ("AWS_PROFILE_EXTRA", "keep")]);
        env.unset("AWS_PROFILE");
        env.unset("NOT_THERE");
        assert_eq!(env.get("AWS_PROFILE"), None);
        assert_eq!(env.get("AWS_PROFILE_EXTRA"), Some(OsStr::new("keep")));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn empty_values_are_not_set() {
        let env = environ(&[("AWS_VAULT", "")]);
        assert!(!env.is_set("AWS_VAULT"));
        assert!(environ(&[("AWS_VAULT", "prod")]).is_set("AWS_VAULT"));
    }

    #[test]
    fn update_for_aws_vault_sanitizes_the_environment() {
        let mut env = environ(&[
            ("PATH", "/usr/bin"),
            ("AWS_ACCESS_KEY_ID", "AKIDOLD"),
            ("AWS_SECRET_ACCESS_KEY", "old-secret"),
            ("AWS_SESSION_TOKEN", "old-token"),
            ("AWS_SECURITY_TOKEN", "old-token"),
            ("AWS_CREDENTIAL_FILE", "/tmp/creds"),
            ("AWS_DEFAULT_PROFILE", "dev"),
            ("AWS_PROFILE", "dev"),
            ("AWS_SDK_LOAD_CONFIG", "1"),
            ("AWS_REGION", "us-west-2"),
        ]);
        env.update_for_aws_vault("prod", Some("eu-west-1"));

        for key in SHADOWING_VARS {
            assert_eq!(env.get(key), None, "{} should be removed", key);
        }
        assert_eq!(env.get("PATH"), Some(OsStr::new("/usr/bin")));
        assert_eq!(env.get("AWS_VAULT"), Some(OsStr::new("prod")));
        assert_eq!(env.get("AWS_REGION"), Some(OsStr::new("eu-west-1")));
        assert_eq!(env.get("AWS_DEFAULT_REGION"), Some(OsStr::new("eu-west-1")));
    }

    #[test]
    fn region_is_left_alone_when_unknown() {
        let mut env = environ(&[("AWS_REGION", "us-west-2")]);
        env.update_for_aws_vault("prod", None);
        assert_eq!(env.get("AWS_REGION"), Some(OsStr::new("us-west-2")));
        assert_eq!(env.get("AWS_DEFAULT_REGION"), None);
    }

    #[test]
    fn debug_omits_values() {
        let env = environ(&[("AWS_SECRET_ACCESS_KEY", "super-secret")]);
        let debug = format!("{:?}", env);
        assert!(debug.contains("AWS_SECRET_ACCESS_KEY"));
        assert!(!debug.contains("super-secret"));
    }
}
