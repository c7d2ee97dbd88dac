use std::io::Write;

use clap::Subcommand;
use pomofocus_core::timer::{Phase, TimerEngine, TimerHandle, TimerService, TimerState};
use pomofocus_core::{Config, CoreError, Event};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{open_stores, CliResult};

const KEYS_HELP: &str = "p: start/pause  r: reset  w/s/l: work/short/long  q: quit";

#[derive(Subcommand)]
pub enum TimerAction {
    /// Run the timer in the foreground, reading commands from stdin
    Run {
        /// Phase to load before starting (work, short-break, long-break)
        #[arg(long)]
        mode: Option<Phase>,
        /// Load the phase but wait for `p` before counting down
        #[arg(long)]
        paused: bool,
    },
    /// Print the startup state as JSON
    Status,
}

pub fn run(action: TimerAction, config: &Config) -> CliResult {
    match action {
        TimerAction::Run { mode, paused } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_foreground(config, mode, paused))
        }
        TimerAction::Status => {
            let (settings, _) = open_stores(config);
            let engine = TimerEngine::load(settings.as_ref());
            println!("{}", serde_json::to_string_pretty(&engine.state())?);
            Ok(())
        }
    }
}

async fn run_foreground(config: &Config, mode: Option<Phase>, paused: bool) -> CliResult {
    let (settings, sessions) = open_stores(config);
    let handle = TimerService::spawn(settings, sessions).await;

    if let Some(phase) = mode {
        handle.switch_mode(phase).await?;
    }
    if !paused {
        handle.start().await?;
    }

    eprintln!("{KEYS_HELP}");
    let mut state = handle.subscribe();
    let mut events = handle.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    render(&state.borrow_and_update());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                render(&current);
            }
            event = events.recv() => match event {
                Ok(event) => announce(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed timer events"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !dispatch(&handle, line.trim()).await? {
                        break;
                    }
                }
                None => stdin_open = false,
            },
        }
    }

    println!();
    handle.shutdown().await?;
    Ok(())
}

/// Apply one keyboard command. Returns false on quit.
async fn dispatch(handle: &TimerHandle, input: &str) -> Result<bool, CoreError> {
    match input {
        "p" => {
            handle.toggle().await?;
        }
        "r" => {
            handle.reset().await?;
        }
        "w" => {
            handle.switch_mode(Phase::Work).await?;
        }
        "s" => {
            handle.switch_mode(Phase::ShortBreak).await?;
        }
        "l" => {
            handle.switch_mode(Phase::LongBreak).await?;
        }
        "q" => return Ok(false),
        "" => {}
        other => eprintln!("unknown command '{other}' ({KEYS_HELP})"),
    }
    Ok(true)
}

fn render(state: &TimerState) {
    let status = if state.running { "running" } else { "paused" };
    print!(
        "\r{:<11} {}  [{status}]  sessions: {}   ",
        state.phase.label(),
        format_clock(state.remaining_secs),
        state.completed_work_sessions,
    );
    let _ = std::io::stdout().flush();
}

fn announce(event: &Event) {
    match event {
        Event::PhaseCompleted { completed, next, auto_started, .. } => {
            let then = if *auto_started { "starting" } else { "press p to start" };
            println!("\n{completed} finished. Next: {next} ({then})");
        }
        Event::PersistenceFailed { operation, message, .. } => {
            println!("\nwarning: {operation} failed: {message}");
        }
        _ => {}
    }
}

fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_pads_minutes_and_seconds() {
        assert_eq!(format_clock(1500), "25:00");
        assert_eq!(format_clock(61), "01:01");
        assert_eq!(format_clock(0), "00:00");
    }

    #[test]
    fn clock_keeps_long_phases_in_minutes() {
        assert_eq!(format_clock(24 * 60 * 60), "1440:00");
    }
}
