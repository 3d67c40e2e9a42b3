//! # Admin Queries and Mutations
//!
//! Operator-facing side of the engine: read the effective policy for a key,
//! set an override, or return a key to the default. Every mutation is
//! written through the [`PolicyStore`](super::store::PolicyStore) first and
//! only then applied in memory, followed by bucket invalidation so that the
//! next arrival is measured against the new policy from a full bucket.
//!
//! The textual front mirrors the operator command:
//!
//! ```text
//!     GET <#channel|DEFAULT>
//!     SET <#channel|DEFAULT> DEFAULT
//!     SET <#channel|DEFAULT> <joins> <seconds>
//! ```

use super::config::Policy;
use super::core::JoinRate;
use super::error::{JoinRateError, Result};
use super::policy::EffectivePolicy;
use super::utils::{is_default_key, normalize_key};
use std::fmt;
use tracing::info;

/// Usage string reported with syntax errors.
pub const ADMIN_SYNTAX: &str = "<GET|SET> <#channel|DEFAULT> <joins> <seconds>";

const MISSING_WINDOW: &str = "Please provide a rate and time limit";
const BAD_NUMBER: &str = "Invalid value given for rate or time.";

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Report the effective policy for a key.
    Get {
        /// Target key.
        key: String,
    },
    /// Set an override (or the default itself).
    Set {
        /// Target key.
        key: String,
        /// Joins per window.
        rate: i64,
        /// Window in seconds.
        window: i64,
    },
    /// Return a key to the default policy.
    Reset {
        /// Target key.
        key: String,
    },
}

impl AdminCommand {
    /// Parses command arguments, subcommand first.
    ///
    /// # Errors
    ///
    /// - [`JoinRateError::Syntax`] for a missing subcommand or key, an
    ///   unknown subcommand, or trailing arguments after `SET`. Extra
    ///   arguments after `GET <key>` are ignored.
    /// - [`JoinRateError::InvalidArgument`] for a missing window or a value
    ///   that is not an integer.
    ///
    /// ```rust
    /// use joinrate::AdminCommand;
    ///
    /// let cmd = AdminCommand::parse(&["SET", "#rust", "10", "60"]).unwrap();
    /// assert_eq!(cmd, AdminCommand::Set { key: "#rust".into(), rate: 10, window: 60 });
    ///
    /// let cmd = AdminCommand::parse(&["set", "#rust", "default"]).unwrap();
    /// assert_eq!(cmd, AdminCommand::Reset { key: "#rust".into() });
    /// ```
    pub fn parse(args: &[&str]) -> Result<Self> {
        match args {
            [sub, key, ..] if sub.eq_ignore_ascii_case("GET") => Ok(Self::Get {
                key: key.to_string(),
            }),
            [sub, key, value, rest @ ..] if sub.eq_ignore_ascii_case("SET") && rest.len() <= 1 => {
                if value.eq_ignore_ascii_case("DEFAULT") {
                    if !rest.is_empty() {
                        return Err(JoinRateError::Syntax(ADMIN_SYNTAX));
                    }
                    return Ok(Self::Reset {
                        key: key.to_string(),
                    });
                }
                let (rate, window) = parse_rate_window(value, rest.first().copied())?;
                Ok(Self::Set {
                    key: key.to_string(),
                    rate,
                    window,
                })
            }
            _ => Err(JoinRateError::Syntax(ADMIN_SYNTAX)),
        }
    }
}

fn parse_rate_window(rate: &str, window: Option<&str>) -> Result<(i64, i64)> {
    let window = window.ok_or_else(|| JoinRateError::InvalidArgument(MISSING_WINDOW.into()))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|_| JoinRateError::InvalidArgument(BAD_NUMBER.into()))
    };
    Ok((parse(rate)?, parse(window)?))
}

/// Operator-visible result of an [`AdminCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Answer to `GET`.
    Current(EffectivePolicy),
    /// Answer to `SET <key> <joins> <seconds>`.
    Updated(EffectivePolicy),
    /// Answer to `SET <key> DEFAULT`.
    Reverted {
        /// Key as given by the operator.
        key: String,
    },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Current(policy) => {
                write!(
                    f,
                    "Joinrate warning threshold for {} is set to {} joins in {}s",
                    policy.key, policy.rate, policy.window
                )?;
                if policy.is_default {
                    write!(f, " (default)")?;
                }
                Ok(())
            }
            Reply::Updated(policy) => write!(
                f,
                "Joinrate warning threshold for {} is now set to {} joins in {}s",
                policy.key, policy.rate, policy.window
            ),
            Reply::Reverted { key } => {
                write!(f, "{} has been returned to the default warning threshold", key)
            }
        }
    }
}

impl JoinRate {
    /// Effective policy for `key`, annotated when the default applies.
    ///
    /// # Errors
    ///
    /// [`JoinRateError::UninitializedDefault`] if `key` has no override and
    /// the engine is not ready.
    pub fn get(&self, key: &str) -> Result<EffectivePolicy> {
        self.policies.effective(key)
    }

    /// Sets the policy for `key` and invalidates its bucket.
    ///
    /// Setting `DEFAULT` replaces the default policy and invalidates every
    /// bucket that has no override of its own.
    pub fn set(&self, key: &str, rate: i64, window: i64) -> Result<EffectivePolicy> {
        if is_default_key(key) {
            self.replace_default(Policy::default_policy(rate, window))?;
        } else {
            let policy = Policy::new(normalize_key(key), rate, window);
            self.store.upsert(&policy)?;
            self.policies.upsert_override(policy);
            self.buckets.invalidate(key);
        }

        info!("Join rate threshold for {} set to {} joins in {}s", key, rate, window);
        Ok(EffectivePolicy {
            key: key.to_string(),
            rate,
            window,
            is_default: false,
        })
    }

    /// Like [`set`](Self::set), taking the raw operator arguments.
    ///
    /// # Errors
    ///
    /// [`JoinRateError::InvalidArgument`] if `window` is missing or either
    /// value is not an integer. Nothing is mutated in that case.
    pub fn set_from_args(
        &self,
        key: &str,
        rate: &str,
        window: Option<&str>,
    ) -> Result<EffectivePolicy> {
        let (rate, window) = parse_rate_window(rate, window)?;
        self.set(key, rate, window)
    }

    /// Removes the override for `key` and invalidates its bucket.
    ///
    /// Returns `true` if an override was loaded in memory. The store delete
    /// and the bucket invalidation happen either way. Resetting `DEFAULT`
    /// restores the built-in fallback.
    pub fn reset(&self, key: &str) -> Result<bool> {
        if is_default_key(key) {
            self.replace_default(self.config.fallback_policy())?;
            info!("Default join rate threshold restored to built-in fallback");
            return Ok(true);
        }

        // The store may hold records the registry has not loaded yet.
        let normalized = normalize_key(key);
        self.store.delete(&normalized)?;
        let existed = self.policies.remove_override(&normalized).is_some();
        self.buckets.invalidate(&normalized);

        if existed {
            info!("Join rate threshold for {} returned to default", key);
        }
        Ok(existed)
    }

    /// Runs a parsed command.
    pub fn execute(&self, command: &AdminCommand) -> Result<Reply> {
        match command {
            AdminCommand::Get { key } => self.get(key).map(Reply::Current),
            AdminCommand::Set { key, rate, window } => {
                self.set(key, *rate, *window).map(Reply::Updated)
            }
            AdminCommand::Reset { key } => self.reset(key).map(|_| Reply::Reverted {
                key: key.clone(),
            }),
        }
    }

    fn replace_default(&self, policy: Policy) -> Result<()> {
        self.store.upsert(&policy)?;
        self.policies.install_default(policy);
        self.buckets
            .invalidate_where(|key| !self.policies.has_override(key));
        Ok(())
    }
}
