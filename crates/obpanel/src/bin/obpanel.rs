//! obpanel CLI
//!
//! Usage:
//!   obpanel
//!   obpanel panel.yaml --autostart
//!   obpanel panel.yaml --args "127.0.0.1 studio link rx" --dry-run

use indexmap::IndexMap;
use obpanel::cli::HELP;
use obpanel::{
    check_requirements, CheckResult, Command, ConfigStore, LinkSettings, PanelArgs, PanelFile,
    RuntimeEnv, ServiceState, Supervisor, SupervisorConfig, SupervisorError, SupervisorEvent,
};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a start/stop run on a background task
enum Completion {
    Started(Result<IndexMap<String, ServiceState>, SupervisorError>),
    Stopped(Result<IndexMap<String, ServiceState>, SupervisorError>),
    Checked(Vec<CheckResult>),
}

/// What console commands act on
struct Panel {
    supervisor: Arc<Supervisor>,
    runtime: Option<RuntimeEnv>,
    done: mpsc::UnboundedSender<Completion>,
}

#[tokio::main]
async fn main() {
    let args: PanelArgs = argh::from_env();

    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    let panel = match &args.panel_file {
        Some(path) => {
            log::info!("Loading panel file: {}", path);
            match PanelFile::from_file(path) {
                Ok(panel) => panel,
                Err(e) => {
                    log::error!("Failed to load panel file: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => PanelFile::default(),
    };

    if args.validate {
        if let Err(e) = panel.validate() {
            log::error!("Invalid panel file: {}", e);
            std::process::exit(1);
        }
        let source = args.panel_file.as_deref().unwrap_or("<defaults>");
        println!("Panel file '{}' is valid", source);
        println!("  Version: {}", panel.version);
        println!("  Services: {}", panel.services.len());
        println!(
            "  Editable: {}",
            panel.editable_service().unwrap_or("-")
        );
        return;
    }

    let store = match ConfigStore::from_panel(&panel) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(text) = &args.args {
        if let Err(e) = store.set_arguments(text) {
            log::error!("Rejected --args: {}", e);
            std::process::exit(1);
        }
    }

    let mut config = SupervisorConfig::from(&panel);
    if let Some(grace) = args.grace_period() {
        config.grace_period = grace;
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let supervisor = match Supervisor::new(store, config, event_tx) {
        Ok(supervisor) => Arc::new(supervisor),
        Err(e) => {
            log::error!("Failed to create supervisor: {}", e);
            std::process::exit(1);
        }
    };

    if args.dry_run {
        match supervisor.plan() {
            Ok(plan) => println!("{}", plan),
            Err(e) => {
                log::error!("Failed to generate launch plan: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    // A plain thread, so a pending read never holds up runtime shutdown
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || forward_lines(std::io::stdin().lock(), &line_tx));

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let panel = Panel {
        supervisor: supervisor.clone(),
        runtime: panel.runtime,
        done: done_tx,
    };

    println!("{}", HELP);
    if args.autostart {
        panel.spawn_start(args.force);
    }

    let mut stdin_open = true;
    let mut reap = tokio::time::interval(REAP_INTERVAL);
    reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,

            Some(event) = event_rx.recv() => render(event),

            line = line_rx.recv(), if stdin_open => {
                let Some(line) = line else {
                    log::debug!("Console input closed");
                    stdin_open = false;
                    continue;
                };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => panel.handle(command),
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
            }

            Some(done) = done_rx.recv() => report(done),

            _ = reap.tick() => {
                for exit in supervisor.reap_exited() {
                    log::debug!("Reaped '{}' (code {:?})", exit.service, exit.code);
                }
            }
        }
    }

    let grace = supervisor.config().grace_period;
    if let Err(e) = supervisor.stop_all(grace).await {
        log::error!("Shutdown incomplete: {}", e);
    }
    while let Ok(event) = event_rx.try_recv() {
        render(event);
    }

    log::info!("obpanel exiting");
}

/// Forward console lines until input ends, a read fails or nobody listens.
/// Returns how many lines were delivered.
fn forward_lines(input: impl BufRead, tx: &mpsc::UnboundedSender<String>) -> usize {
    let mut sent = 0;
    for line in input.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
                sent += 1;
            }
            Err(e) => {
                log::debug!("Console read failed: {}", e);
                break;
            }
        }
    }
    sent
}

impl Panel {
    fn spawn_start(&self, force: bool) {
        let supervisor = self.supervisor.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = supervisor.start_all(force).await;
            let _ = done.send(Completion::Started(result));
        });
    }

    fn spawn_stop(&self) {
        let supervisor = self.supervisor.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let grace = supervisor.config().grace_period;
            let result = supervisor.stop_all(grace).await;
            let _ = done.send(Completion::Stopped(result));
        });
    }

    fn spawn_check(&self) {
        let specs = self.supervisor.config_store().specs();
        let runtime = self.runtime.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let results = check_requirements(&specs, runtime.as_ref()).await;
            let _ = done.send(Completion::Checked(results));
        });
    }

    fn handle(&self, command: Command) {
        let supervisor = &self.supervisor;
        match command {
            Command::Start { force } => self.spawn_start(force),
            Command::Stop => self.spawn_stop(),
            Command::Status => print_status(supervisor),
            Command::Args(None) => match supervisor.config_store().arguments() {
                Some(args) => println!("{}", args),
                None => println!("No service has editable arguments"),
            },
            Command::Args(Some(text)) => match supervisor.set_arguments(&text) {
                Ok(tokens) => println!("Arguments set: {}", tokens.join(" ")),
                Err(e) => println!("{}", e),
            },
            Command::Link => {
                let store = supervisor.config_store();
                let tokens: Vec<String> = store
                    .editable_service()
                    .and_then(|name| store.get_spec(&name).ok())
                    .map(|spec| spec.args)
                    .unwrap_or_default();
                println!("{}", LinkSettings::from_tokens(&tokens));
            }
            Command::Check => self.spawn_check(),
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
    }
}

fn print_status(supervisor: &Supervisor) {
    for service in supervisor.snapshot() {
        let mut line = format!("  {:<8} {}", service.name, service.state);
        if service.degraded {
            line.push_str(" (degraded)");
        }
        if let (Some(pid), Some(started)) = (service.pid, service.started_at) {
            line.push_str(&format!("  pid {} since {}", pid, started.format("%H:%M:%S")));
        }
        if let Some(uptime) = service.uptime {
            line.push_str(&format!(" (up {}s)", uptime.as_secs()));
        }
        if let Some(outcome) = service.last_exit {
            line.push_str(&format!("  last: {}", outcome));
        }
        if let Some(error) = &service.last_error {
            line.push_str(&format!("  error: {}", error));
        }
        println!("{}", line);
    }
}

fn render(event: SupervisorEvent) {
    match event {
        SupervisorEvent::Line(line) => println!("{}", line),
        // Stop and failure notices also arrive as lines
        other => log::trace!("{:?}", other),
    }
}

fn report(done: Completion) {
    match done {
        Completion::Started(Ok(status)) | Completion::Stopped(Ok(status)) => {
            let summary: Vec<String> = status
                .iter()
                .map(|(name, state)| format!("{}: {}", name, state))
                .collect();
            println!("{}", summary.join(", "));
        }
        Completion::Started(Err(e)) => println!("Start failed: {}", e),
        Completion::Stopped(Err(e)) => println!("Stop failed: {}", e),
        Completion::Checked(results) => {
            for result in &results {
                println!("{}", result);
            }
            let failed = results.iter().filter(|r| !r.passed).count();
            match failed {
                0 => println!("All checks passed"),
                n => println!("{} check(s) failed", n),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_forward_lines_until_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sent = forward_lines(Cursor::new("start\nargs -e opus\n\nquit"), &tx);
        assert_eq!(sent, 4);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["start", "args -e opus", "", "quit"]);
    }

    #[test]
    fn test_forward_lines_stops_when_receiver_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert_eq!(forward_lines(Cursor::new("status\nstop\n"), &tx), 0);
    }

    #[test]
    fn test_forward_lines_stops_on_read_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // invalid UTF-8 on the second line ends forwarding
        let input: &[u8] = b"status\n\xff\xfe\nstop\n";
        assert_eq!(forward_lines(input, &tx), 1);
        assert_eq!(rx.try_recv().ok().as_deref(), Some("status"));
        assert!(rx.try_recv().is_err());
    }
}
