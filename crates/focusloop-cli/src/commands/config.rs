use std::error::Error;

use clap::Subcommand;
use focusloop_core::Config;

const KEYS_HELP: &str = "\
Keys:
  timer.focus_duration_secs       length of a focus interval
  timer.break_duration_secs       length of a short break
  timer.long_break_duration_secs  length of a long break
  timer.long_break_interval       focus intervals per long break (0 = never)
  notifications.enabled           completion notifications
  visibility.debounce_ms          spacing between accepted suspend/resume signals
  visibility.persist_paused       keep paused timers across suspension";

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one setting
    #[command(after_help = KEYS_HELP)]
    Get {
        /// Dotted key, e.g. "timer.focus_duration_secs"
        key: String,
    },
    /// Change one setting; timer durations are checked before saving
    #[command(after_help = KEYS_HELP)]
    Set {
        /// Dotted key, e.g. "timer.long_break_interval"
        key: String,
        value: String,
    },
    /// Print every setting
    List {
        /// Print JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
    /// Restore the default 25/5/15 minute cycle and other defaults
    Reset,
    /// Print where the config file lives
    Path,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key).ok_or_else(|| format!("unknown key: {key}"))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            let previous = config.get(&key);
            config.set(&key, &value)?;
            let timer = config.timer_configuration()?;
            config.save()?;

            match previous {
                Some(previous) if previous != value => println!("{key} = {value} (was {previous})"),
                _ => println!("{key} = {value}"),
            }
            if key.starts_with("timer.") {
                println!("{}", describe_cycle(&config, timer.focus_ms()));
            }
        }
        ConfigAction::List { json } => {
            let config = Config::load()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
        ConfigAction::Reset => {
            let config = Config::default();
            config.save()?;
            println!("{}", describe_cycle(&config, config.timer.focus_duration_secs * 1000));
        }
        ConfigAction::Path => println!("{}", Config::path()?.display()),
    }
    Ok(())
}

/// One-line summary of the focus/break cycle, e.g.
/// "cycle: 25m focus, 5m break, 15m long break every 4 focus intervals".
fn describe_cycle(config: &Config, focus_ms: u64) -> String {
    let timer = &config.timer;
    let mut line = format!(
        "cycle: {} focus, {} break",
        minutes(focus_ms / 1000),
        minutes(timer.break_duration_secs)
    );
    if timer.long_break_interval > 0 {
        line.push_str(&format!(
            ", {} long break every {} focus intervals",
            minutes(timer.long_break_duration_secs),
            timer.long_break_interval
        ));
    }
    line
}

fn minutes(secs: u64) -> String {
    if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cycle_summary() {
        let config = Config::default();
        assert_eq!(
            describe_cycle(&config, 1_500_000),
            "cycle: 25m focus, 5m break, 15m long break every 4 focus intervals"
        );
    }

    #[test]
    fn cycle_without_long_breaks() {
        let mut config = Config::default();
        config.timer.long_break_interval = 0;
        config.timer.break_duration_secs = 90;
        assert_eq!(describe_cycle(&config, 600_000), "cycle: 10m focus, 1m30s break");
    }
}
