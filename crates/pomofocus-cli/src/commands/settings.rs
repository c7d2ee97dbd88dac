use clap::Subcommand;
use pomofocus_core::timer::{TimerConfig, TimerConfigPatch};
use pomofocus_core::{Config, SqliteStore};

use super::{open_database, CliResult};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print the timer settings as JSON
    List,
    /// Get one setting
    Get {
        /// Setting name (e.g. "work_minutes" or "workDuration")
        key: String,
    },
    /// Change one setting
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
    /// Restore the default durations and cadence
    Reset,
}

pub fn run(action: SettingsAction, config: &Config) -> CliResult {
    let store = SqliteStore::new(open_database(config)?);

    match action {
        SettingsAction::List => {
            let settings = TimerConfig::load(&store);
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsAction::Get { key } => {
            let settings = TimerConfig::load(&store);
            match settings.get(&key) {
                Some(value) => println!("{value}"),
                None => {
                    let known = TimerConfig::keys().join(", ");
                    return Err(format!("unknown setting: {key} (expected one of {known})").into());
                }
            }
        }
        SettingsAction::Set { key, value } => {
            let patch = TimerConfigPatch::from_key_value(&key, &value)?;
            let settings = TimerConfig::load(&store).merged(&patch)?;
            settings.save(&store)?;
            println!("ok");
        }
        SettingsAction::Reset => {
            TimerConfig::default().save(&store)?;
            println!("settings reset to defaults");
        }
    }
    Ok(())
}
