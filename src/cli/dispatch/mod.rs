//! Command-line argument dispatch and server initialization.
//!
//! This module maps validated CLI arguments to the appropriate action, such
//! as starting the API server with its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands;
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let issuer = matches
        .get_one::<String>(commands::ARG_ISSUER)
        .cloned()
        .context("missing issuer")?;
    let dsn = matches.get_one::<String>(commands::ARG_DSN).cloned();
    let allowed_origin = matches
        .get_one::<String>(commands::ARG_ALLOWED_ORIGIN)
        .cloned();
    let master_key = matches
        .get_one::<String>(commands::ARG_MASTER_KEY)
        .map(|value| SecretString::from(value.clone()));
    let recovery_pepper = matches
        .get_one::<String>(commands::ARG_RECOVERY_PEPPER)
        .map(|value| SecretString::from(value.clone()));

    Ok(Action::Server(Args {
        port,
        dsn,
        issuer,
        allowed_origin,
        master_key,
        recovery_pepper,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn builds_a_server_action_from_defaults() {
        temp_env::with_vars(
            [
                ("GARDI_PORT", None::<&str>),
                ("GARDI_DSN", None),
                ("GARDI_ISSUER", None),
                ("GARDI_MASTER_KEY", None),
            ],
            || {
                let matches = commands::new()
                    .try_get_matches_from(["gardi"])
                    .expect("parses");
                let Action::Server(args) = handler(&matches).expect("dispatches");
                assert_eq!(args.port, 8080);
                assert_eq!(args.issuer, "gardi");
                assert!(args.dsn.is_none());
                assert!(args.master_key.is_none());
            },
        );
    }

    #[test]
    fn environment_variables_feed_the_args() {
        temp_env::with_vars(
            [
                ("GARDI_PORT", Some("9999")),
                ("GARDI_DSN", Some("postgres://localhost/gardi")),
            ],
            || {
                let matches = commands::new()
                    .try_get_matches_from(["gardi"])
                    .expect("parses");
                let Action::Server(args) = handler(&matches).expect("dispatches");
                assert_eq!(args.port, 9999);
                assert_eq!(args.dsn.as_deref(), Some("postgres://localhost/gardi"));
            },
        );
    }
}
