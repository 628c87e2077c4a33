//! Wallet secret resolution. Strategies run in a fixed order and the first non-empty value
//! wins; none of them ever logs the secret itself.

use crate::config::{KeyRef, SecretConfig};
use crate::errors::PaytollError;
use eyre::Context as _;
use std::process::{Command, Stdio};
use zeroize::Zeroizing;

/// Runs an external program and returns its stdout. `Ok(None)` means the program is
/// missing or exited non-zero.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> eyre::Result<Option<Zeroizing<String>>>;
}

pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> eyre::Result<Option<Zeroizing<String>>> {
        let out = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
        {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(program, "secret helper not found");
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("run `{program}`")),
        };
        let stdout = Zeroizing::new(out.stdout);
        if !out.status.success() {
            tracing::warn!(program, code = ?out.status.code(), "secret helper exited non-zero");
            return Ok(None);
        }
        let s = String::from_utf8(stdout.to_vec()).context("secret helper output is not utf-8")?;
        Ok(Some(Zeroizing::new(s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Other,
}

impl Platform {
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretStrategy {
    Env,
    Keychain,
    SecretService,
    Command,
}

impl SecretStrategy {
    pub const ORDER: [Self; 4] = [Self::Env, Self::Keychain, Self::SecretService, Self::Command];

    const fn as_str(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Keychain => "keychain",
            Self::SecretService => "secret_service",
            Self::Command => "command",
        }
    }
}

/// The OS and process facilities a resolution run may touch.
pub struct SecretSources<'a> {
    pub platform: Platform,
    pub env: &'a dyn Fn(&str) -> Option<String>,
    pub runner: &'a dyn CommandRunner,
}

fn non_empty(v: Zeroizing<String>) -> Option<Zeroizing<String>> {
    let trimmed = v.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(Zeroizing::new(trimmed.to_owned()))
    }
}

fn require_platform(
    strategy: SecretStrategy,
    want: Platform,
    have: Platform,
) -> Result<(), PaytollError> {
    if want == have {
        return Ok(());
    }
    Err(PaytollError::Config(format!(
        "secret strategy `{}` is configured but not supported on this platform",
        strategy.as_str()
    )))
}

fn run_helper(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<Option<Zeroizing<String>>, PaytollError> {
    runner
        .run(program, args)
        .map_err(|e| PaytollError::Config(format!("{e:#}")))
}

fn try_strategy(
    strategy: SecretStrategy,
    cfg: &SecretConfig,
    src: &SecretSources<'_>,
) -> Result<Option<Zeroizing<String>>, PaytollError> {
    match strategy {
        SecretStrategy::Env => Ok((src.env)(&cfg.env_var).map(Zeroizing::new)),
        SecretStrategy::Keychain => {
            let Some(KeyRef { service, account }) = &cfg.keychain else {
                return Ok(None);
            };
            require_platform(strategy, Platform::MacOs, src.platform)?;
            run_helper(
                src.runner,
                "security",
                &["find-generic-password", "-s", service, "-a", account, "-w"],
            )
        }
        SecretStrategy::SecretService => {
            let Some(KeyRef { service, account }) = &cfg.secret_service else {
                return Ok(None);
            };
            require_platform(strategy, Platform::Linux, src.platform)?;
            run_helper(
                src.runner,
                "secret-tool",
                &["lookup", "service", service, "account", account],
            )
        }
        SecretStrategy::Command => {
            let Some(cmd) = &cfg.command else {
                return Ok(None);
            };
            run_helper(src.runner, "sh", &["-c", cmd])
        }
    }
}

/// First non-empty secret across [`SecretStrategy::ORDER`], or `None` (free tier).
pub fn resolve(
    cfg: &SecretConfig,
    src: &SecretSources<'_>,
) -> Result<Option<Zeroizing<String>>, PaytollError> {
    for strategy in SecretStrategy::ORDER {
        if let Some(secret) = try_strategy(strategy, cfg, src)?.and_then(non_empty) {
            tracing::info!(strategy = strategy.as_str(), "resolved wallet secret");
            return Ok(Some(secret));
        }
    }
    Ok(None)
}
