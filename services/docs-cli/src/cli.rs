//! Command-line arguments

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "docs-cli", version, about = "Command-line client for the document API")]
pub struct Args {
    /// TOML configuration file
    #[arg(
        long,
        global = true,
        env = "CONFIG_PATH",
        value_name = "PATH",
        default_value = "docs-cli.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// GET a resource and print it as JSON
    Get {
        /// Resource path relative to the API base URL, or an absolute URL
        path: String,
        /// Follow next-page links to the end
        #[arg(long)]
        all: bool,
    },
    /// Force a token refresh
    Refresh,
    /// Sign in with an authorization code or a password
    #[command(group(ArgGroup::new("method").required(true).args(["code", "password"])))]
    SignIn {
        /// Authorization code from the browser sign-in
        #[arg(long)]
        code: Option<String>,
        /// Username; the password is read from DOCS_PASSWORD or stdin
        #[arg(long, value_name = "USERNAME")]
        password: Option<String>,
    },
    /// Forget the stored credential
    SignOut,
    /// Print whether a usable credential is stored
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::sync::Mutex;

    /// Parsing reads CONFIG_PATH, so tests that set it must not overlap.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("docs-cli").chain(args.iter().copied()))
    }

    #[test]
    fn definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn config_flag_beats_env_and_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("CONFIG_PATH") };
        assert_eq!(parse(&["status"]).unwrap().config, PathBuf::from("docs-cli.toml"));

        unsafe { std::env::set_var("CONFIG_PATH", "/env/docs.toml") };
        assert_eq!(parse(&["status"]).unwrap().config, PathBuf::from("/env/docs.toml"));
        let args = parse(&["get", "documents", "--config", "/cli/docs.toml"]).unwrap();
        unsafe { std::env::remove_var("CONFIG_PATH") };

        assert_eq!(args.config, PathBuf::from("/cli/docs.toml"));
        assert_eq!(
            args.command,
            Command::Get {
                path: "documents".into(),
                all: false
            }
        );
    }

    #[test]
    fn sign_in_needs_exactly_one_method() {
        let _lock = ENV_MUTEX.lock().unwrap();
        assert_eq!(
            parse(&["sign-in", "--password", "ada@example.com"])
                .unwrap()
                .command,
            Command::SignIn {
                code: None,
                password: Some("ada@example.com".into())
            }
        );
        assert!(parse(&["sign-in"]).is_err());
        assert!(parse(&["sign-in", "--code", "abc", "--password", "ada"]).is_err());
    }
}
