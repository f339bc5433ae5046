//! Command-line interface and console commands for obpanel

use argh::FromArgs;
use std::time::Duration;

/// Operator panel for the store and streaming agent
#[derive(FromArgs, Debug)]
pub struct PanelArgs {
    /// path to the panel file (built-in defaults when omitted)
    #[argh(positional)]
    pub panel_file: Option<String>,

    /// replace the agent's arguments before anything starts
    #[argh(option)]
    pub args: Option<String>,

    /// start all services right away
    #[argh(switch)]
    pub autostart: bool,

    /// with --autostart, skip health checks
    #[argh(switch)]
    pub force: bool,

    /// grace period before a forced kill, in milliseconds
    #[argh(option)]
    pub grace_ms: Option<u64>,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// validate panel file and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

impl PanelArgs {
    /// Grace period override, if given
    pub fn grace_period(&self) -> Option<Duration> {
        self.grace_ms.map(Duration::from_millis)
    }

    /// Log filter, falling back to `info` for unknown levels
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}

/// Console command typed by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start all services; `force` skips health checks
    Start { force: bool },
    Stop,
    Status,
    /// Show the agent's arguments, or replace them
    Args(Option<String>),
    /// Show the link settings parsed from the agent's arguments
    Link,
    /// Check executables, the runtime installation and endpoints
    Check,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  start [--force]   start all services (--force skips health checks)
  stop              stop all services
  status            show service states
  args [text]       show or replace the agent's arguments
  link              show the link settings
  check             check executables, runtime and endpoints
  help              show this help
  quit              stop everything and exit";

impl Command {
    /// Parse one console line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "" => return Ok(None),
            "start" => match rest {
                "" => Command::Start { force: false },
                "--force" | "-f" => Command::Start { force: true },
                other => return Err(format!("Unknown start option '{}'", other)),
            },
            "stop" => Command::Stop,
            "status" => Command::Status,
            "args" if rest.is_empty() => Command::Args(None),
            "args" => Command::Args(Some(rest.to_string())),
            "link" => Command::Link,
            "check" | "doctor" => Command::Check,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("Unknown command '{}'. Type 'help'.", other)),
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        assert_eq!(
            Command::parse("start"),
            Ok(Some(Command::Start { force: false }))
        );
        assert_eq!(
            Command::parse("  start --force "),
            Ok(Some(Command::Start { force: true }))
        );
        assert!(Command::parse("start now").is_err());
    }

    #[test]
    fn test_parse_args_keeps_text() {
        let result = Command::parse("args 127.0.0.1 node link rx -e opus");
        assert_eq!(
            result,
            Ok(Some(Command::Args(Some(
                "127.0.0.1 node link rx -e opus".to_string()
            ))))
        );
        assert_eq!(Command::parse("args"), Ok(Some(Command::Args(None))));
    }

    #[test]
    fn test_parse_blank_and_unknown() {
        assert_eq!(Command::parse("   "), Ok(None));
        assert!(Command::parse("reboot").is_err());
        assert_eq!(Command::parse("exit"), Ok(Some(Command::Quit)));
        assert_eq!(Command::parse("doctor"), Ok(Some(Command::Check)));
        assert!(HELP.contains("check"));
    }

    #[test]
    fn test_panel_args() {
        let args = PanelArgs::from_args(
            &["obpanel"],
            &["panel.yaml", "--autostart", "--grace-ms", "1500", "-l", "DEBUG"],
        )
        .unwrap();
        assert_eq!(args.panel_file.as_deref(), Some("panel.yaml"));
        assert!(args.autostart);
        assert!(!args.force);
        assert_eq!(args.grace_period(), Some(Duration::from_millis(1500)));
        assert_eq!(args.log_filter(), "debug");
    }
}
