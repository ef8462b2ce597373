//! Line commands typed on stdin while the processor runs.

use anyhow::{Context, Result, anyhow, bail};
use anymidi_core::{AnalysisConfig, WindowingMethod};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Quit,
    /// Send all-notes-off and forget the sounding note.
    Panic,
    /// Print the current configuration.
    Show,
    /// A validated configuration snapshot to hand to the processor.
    Apply(AnalysisConfig),
}

pub const HELP: &str = "commands: window <name> | attack <x> | release <x> | partials <n> | \
floor <x> | lowcut <hz> | highcut <hz> | channel <1-16> | offset <n> | silence <on|off> | panic | show | quit";

fn value<T>(arg: Option<&str>, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = arg.ok_or_else(|| anyhow!("missing value for {}", what))?;
    raw.parse()
        .with_context(|| format!("invalid value '{}' for {}", raw, what))
}

/// Parses one line against the current configuration. An empty line quits.
pub fn parse_command(line: &str, current: &AnalysisConfig) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Ok(Command::Quit);
    };
    let arg = words.next();

    let mut next = current.clone();
    match keyword.to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => return Ok(Command::Quit),
        "panic" => return Ok(Command::Panic),
        "show" => return Ok(Command::Show),
        "window" => {
            let name = arg.ok_or_else(|| anyhow!("missing window name"))?;
            next.window = name.parse::<WindowingMethod>()?;
        }
        "attack" => next.attack_threshold = value(arg, "attack")?,
        "release" => next.release_threshold = value(arg, "release")?,
        "partials" => next.partial_count = value(arg, "partials")?,
        "floor" => next.partial_floor = value(arg, "floor")?,
        "lowcut" => next.low_cut_hz = value(arg, "lowcut")?,
        "highcut" => next.high_cut_hz = value(arg, "highcut")?,
        "channel" => next.midi_channel = value(arg, "channel")?,
        "offset" => next.note_offset = value(arg, "offset")?,
        "silence" => {
            next.release_on_silence = match arg {
                Some("on") => true,
                Some("off") => false,
                _ => bail!("silence takes 'on' or 'off'"),
            }
        }
        other => bail!("unknown command '{}'", other),
    }

    next.validate()?;
    Ok(Command::Apply(next))
}
