use std::{io::Write, path::Path};

use anyhow::{Context, Result};

use crate::protocol::profile::Profile;

#[cfg(windows)]
const LINE_SEPARATOR: &str = "\r\n";
#[cfg(not(windows))]
const LINE_SEPARATOR: &str = "\n";

/// `<profile name>.log`, with any directory part of the port name dropped.
pub fn default_history_file_name(profile: &Profile) -> String {
    let name = profile.default_name();
    let base = Path::new(&name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(name);
    format!("{base}.log")
}

pub fn render_history<S: AsRef<str>>(lines: &[S]) -> String {
    let mut text = String::new();
    for line in lines {
        text.push_str(line.as_ref());
        text.push_str(LINE_SEPARATOR);
    }
    text
}

/// Write the text view's lines to `path`, one per platform line.
pub fn save_history<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create history file {}", path.display()))?;
    file.write_all(render_history(lines).as_bytes())
        .with_context(|| format!("Failed to write history file {}", path.display()))?;
    log::info!("saved {} line(s) of history to {}", lines.len(), path.display());
    Ok(())
}
