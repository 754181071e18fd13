//! Command-line interface definitions for mitm-addon.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Traffic export and userscript injection addon for an intercepting proxy.
///
/// The addon itself runs inside the proxy. This binary is the tooling around
/// it: inspect the scripts directory, try injection on a saved page, decode a
/// captured control-channel stream, or check that the host is listening.
#[derive(Parser, Debug)]
#[command(name = "mitm-addon")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Userscripts directory (overrides `injector.scripts_dir`).
    #[arg(long = "scripts-dir", value_name = "DIR", global = true)]
    pub scripts_dir: Option<PathBuf>,

    /// Control channel address: `host:port` or `unix:<path>`.
    #[arg(long = "channel", value_name = "ADDR", global = true)]
    pub channel: Option<String>,

    /// Export at most one capped payload chunk per flow direction.
    #[arg(long = "truncate", global = true)]
    pub truncate_payloads: bool,

    /// Disable script injection.
    #[arg(long = "no-inject", global = true)]
    pub no_inject: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for mitm-addon.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the scripts in the scripts directory.
    Scripts {
        /// Print the listing as JSON.
        #[arg(long = "json")]
        json: bool,
    },

    /// Show which scripts would be injected into a URL.
    Match {
        /// Absolute `http://` or `https://` URL.
        url: String,
    },

    /// Inject matching scripts into a saved HTML page.
    Inject {
        /// URL the page was served from.
        url: String,

        /// HTML file to rewrite.
        file: PathBuf,

        /// Where to write the result (stdout if omitted).
        #[arg(short = 'o', long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Decode a captured control-channel stream.
    Decode {
        /// Capture file (stdin if omitted).
        file: Option<PathBuf>,

        /// Print whole payloads instead of a preview.
        #[arg(long = "full")]
        full: bool,
    },

    /// Connect to the control channel and send a `running` and a `log` frame.
    Probe {
        /// Text of the log frame.
        #[arg(long = "message", default_value = "probe")]
        message: String,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_scripts() {
        let cli = Cli::parse_from(["mitm-addon", "scripts", "--json"]);
        assert!(matches!(cli.command, Commands::Scripts { json: true }));
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "mitm-addon",
            "match",
            "https://example.com/",
            "--scripts-dir",
            "/tmp/scripts",
            "-vv",
        ]);

        assert_eq!(cli.scripts_dir, Some(PathBuf::from("/tmp/scripts")));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Match { url } => assert_eq!(url, "https://example.com/"),
            _ => panic!("Expected Match command"),
        }
    }

    #[test]
    fn test_cli_parse_inject() {
        let cli = Cli::parse_from([
            "mitm-addon",
            "inject",
            "https://example.com/",
            "page.html",
            "-o",
            "out.html",
        ]);

        match cli.command {
            Commands::Inject { url, file, output } => {
                assert_eq!(url, "https://example.com/");
                assert_eq!(file, PathBuf::from("page.html"));
                assert_eq!(output, Some(PathBuf::from("out.html")));
            }
            _ => panic!("Expected Inject command"),
        }
    }

    #[test]
    fn test_cli_parse_decode_stdin() {
        let cli = Cli::parse_from(["mitm-addon", "decode"]);
        assert!(matches!(cli.command, Commands::Decode { file: None, full: false }));
    }

    #[test]
    fn test_cli_parse_probe() {
        let cli = Cli::parse_from(["mitm-addon", "--channel", "127.0.0.1:5000", "--truncate", "probe"]);
        assert_eq!(cli.channel.as_deref(), Some("127.0.0.1:5000"));
        assert!(cli.truncate_payloads);
        match cli.command {
            Commands::Probe { message } => assert_eq!(message, "probe"),
            _ => panic!("Expected Probe command"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["mitm-addon"]).is_err());
    }
}
