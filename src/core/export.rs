//! Plain-text transcript export.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::core::message::Turn;
use crate::core::persona::Persona;

const SEPARATOR: &str = "---";

/// Render the turn sequence as a text document: a role header per turn,
/// the model's reasoning (when present) as a blockquote above its answer,
/// and separators between turns. Pure formatting; directives are exported
/// verbatim as part of the text.
pub fn format_transcript(turns: &VecDeque<Turn>, persona: &Persona) -> String {
    let mut sections = Vec::with_capacity(turns.len());
    for turn in turns {
        if turn.text.is_empty() && !turn.has_thought() {
            continue;
        }
        let header = if turn.is_user() {
            "## You".to_string()
        } else {
            format!("## {}", persona.title)
        };

        let mut section = String::new();
        section.push_str(&header);
        section.push_str("\n\n");
        if turn.has_thought() {
            for line in turn.thought.lines() {
                section.push_str("> ");
                section.push_str(line);
                section.push('\n');
            }
            section.push('\n');
        }
        section.push_str(&turn.text);
        sections.push(section);
    }
    let mut document = sections.join(&format!("\n\n{SEPARATOR}\n\n"));
    if !document.is_empty() {
        document.push('\n');
    }
    document
}

pub fn default_dump_filename() -> String {
    format!("labchat-log-{}.txt", Utc::now().format("%Y-%m-%d"))
}

/// Write the transcript to `path`, refusing to overwrite an existing file
/// so an export never clobbers an earlier one.
pub fn dump_transcript(
    turns: &VecDeque<Turn>,
    persona: &Persona,
    path: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if turns.iter().all(|t| t.text.is_empty()) {
        return Err("No conversation to export - the chat history is empty.".into());
    }
    if path.exists() {
        return Err(format!(
            "File '{}' already exists. Please specify a different filename.",
            path.display()
        )
        .into());
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(format_transcript(turns, persona).as_bytes())?;
    writer.flush()?;
    Ok(path.to_path_buf())
}
