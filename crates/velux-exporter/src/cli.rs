//! Command-line arguments.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Poll the Velux ACTIVE cloud and expose the home as Prometheus metrics.
///
/// Identity is read from MAIL, PASSWORD, CLIENTID and CLIENTSECRET, the
/// system keyring, or the `[identity]` table of the config file.
#[derive(Debug, Parser)]
#[command(name = "velux-netatmo-exporter", version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "VELUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address for the /metrics endpoint [default: 0.0.0.0:9211]
    #[arg(long, short = 'l')]
    pub listen: Option<SocketAddr>,

    /// Where the OAuth token is cached between runs
    #[arg(long)]
    pub token_path: Option<PathBuf>,

    /// Time between poll cycles, e.g. "60s" or "2m"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Run a single poll cycle, print the metrics, and exit
    #[arg(long)]
    pub once: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Apply flag overrides on top of the loaded config.
    pub fn apply(&self, config: &mut velux_config::Config) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(path) = &self.token_path {
            config.token_path.clone_from(path);
        }
        if let Some(interval) = self.poll_interval {
            config.poll_interval = interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "velux-netatmo-exporter",
            "--listen",
            "127.0.0.1:9999",
            "--poll-interval",
            "2m",
            "-vv",
        ]);
        let mut config = velux_config::Config::default();
        cli.apply(&mut config);

        assert_eq!(config.listen.port(), 9999);
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(cli.verbose, 2);
        assert!(!cli.once);
    }
}
