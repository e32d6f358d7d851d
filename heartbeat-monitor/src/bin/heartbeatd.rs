//! Interactive heartbeat monitor.
//!
//! Reads commands from stdin and prints the monitor's log as it grows.
//! Settings start from the `HEARTBEAT_*` environment variables.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};

use heartbeat_monitor::tracing::prelude::*;
use heartbeat_monitor::config::window_from_millis;
use heartbeat_monitor::{Configuration, HeartbeatMonitor, LogEvent, LogUpdate};

const USAGE: &str = "\
Commands:
  0 | 1             Send a heartbeat with that value
  pulse <n>         Send a heartbeat with value n
  enable | disable  Toggle monitoring
  active <ms>       Set the active window
  recovery <ms>     Set the recovery window
  dim <level>       Set the dim level
  state             Show the current state
  log               Reprint the current log
  help              Show this text
  quit              Exit

Environment:
  HEARTBEAT_ENABLED, HEARTBEAT_ACTIVE_WINDOW_MS,
  HEARTBEAT_RECOVERY_WINDOW_MS, HEARTBEAT_DIM_LEVEL   Initial settings
  HEARTBEAT_LOG_FORMAT=json                           Print log as JSON lines";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Pulse(i64),
    Enable(bool),
    ActiveWindow(i64),
    RecoveryWindow(i64),
    DimLevel(u32),
    State,
    Log,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let mut arg = || words.next().context("missing argument");

    let command = match word {
        "pulse" => Command::Pulse(arg()?.parse()?),
        "enable" => Command::Enable(true),
        "disable" => Command::Enable(false),
        "active" => Command::ActiveWindow(arg()?.parse()?),
        "recovery" => Command::RecoveryWindow(arg()?.parse()?),
        "dim" => Command::DimLevel(arg()?.parse()?),
        "state" => Command::State,
        "log" => Command::Log,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => match other.parse() {
            Ok(value) => Command::Pulse(value),
            Err(_) => bail!("unknown command: {other}"),
        },
    };
    Ok(Some(command))
}

/// Apply a settings change to the running configuration.
fn reconfigure(monitor: &HeartbeatMonitor, command: &Command) -> Result<()> {
    let current = monitor.config().unwrap_or_default();
    let next = match *command {
        Command::Enable(enabled) => current.with_enabled(enabled),
        Command::ActiveWindow(ms) => {
            current.with_active_window(window_from_millis("active_window", ms)?)
        }
        Command::RecoveryWindow(ms) => {
            current.with_recovery_window(window_from_millis("recovery_window", ms)?)
        }
        Command::DimLevel(level) => current.with_dim_level(level),
        _ => return Ok(()),
    };
    monitor.configure(next)?;
    Ok(())
}

/// What the terminal shows: the monitor's log plus the heartbeat lines the
/// front end adds itself.
#[derive(Debug, Default)]
struct LogPane {
    entries: Vec<LogEvent>,
}

impl LogPane {
    fn apply(&mut self, update: &LogUpdate) {
        match update {
            LogUpdate::Cleared => self.entries.clear(),
            LogUpdate::Appended(event) => self.entries.push(event.clone()),
        }
    }

    fn heartbeat(&mut self, value: i64) -> LogUpdate {
        let update = LogUpdate::Appended(LogEvent::info(format!("Heartbeat received {value}")));
        self.apply(&update);
        update
    }

    fn entries(&self) -> &[LogEvent] {
        &self.entries
    }
}

fn print_update(update: &LogUpdate, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(update)?),
        Format::Text => match update {
            LogUpdate::Cleared => println!("---"),
            LogUpdate::Appended(event) if event.important => println!("** {}", event.message),
            LogUpdate::Appended(event) => println!("   {}", event.message),
        },
    }
    Ok(())
}

fn print_settings(config: &Configuration) {
    println!(
        "enabled={} active={:?} recovery={:?} dim={}",
        config.enabled,
        config.active_window,
        config.recovery_window,
        config.dim_level
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    heartbeat_monitor::tracing::init_journald_or_stdout();

    let format = match std::env::var("HEARTBEAT_LOG_FORMAT").as_deref() {
        Ok("json") => Format::Json,
        _ => Format::Text,
    };

    let config = Configuration::from_env()?;
    let monitor = HeartbeatMonitor::new();
    let mut updates = monitor.subscribe_events();
    monitor.configure(config)?;
    print_settings(&config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pane = LogPane::default();

    loop {
        tokio::select! {
            Some(update) = updates.recv() => {
                pane.apply(&update);
                print_update(&update, format)?;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let command = match parse_command(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("{e:#}");
                        continue;
                    }
                };

                match command {
                    Command::Pulse(value) => {
                        // Catch up first so a pending clear cannot wipe this line.
                        while let Ok(update) = updates.try_recv() {
                            pane.apply(&update);
                            print_update(&update, format)?;
                        }
                        print_update(&pane.heartbeat(value), format)?;
                        monitor.pulse(value);
                    }
                    Command::State => println!("{}", monitor.current_state()),
                    Command::Log => {
                        for event in pane.entries() {
                            print_update(&LogUpdate::Appended(event.clone()), format)?;
                        }
                    }
                    Command::Help => println!("{USAGE}"),
                    Command::Quit => break,
                    settings => match reconfigure(&monitor, &settings) {
                        Ok(()) => {
                            if let Some(config) = monitor.config() {
                                print_settings(&config);
                            }
                        }
                        Err(e) => eprintln!("{e:#}"),
                    },
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    monitor.shutdown();
    // Give the log a moment to drain before exiting.
    tokio::time::sleep(Duration::from_millis(10)).await;
    while let Ok(update) = updates.try_recv() {
        print_update(&update, format)?;
    }
    Ok(())
}
