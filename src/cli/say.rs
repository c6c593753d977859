//! One-shot "say" command: stream a single answer to stdout and exit.

use std::error::Error;
use std::io::{self, Write};

use crate::cli::SessionSettings;
use crate::core::chat_stream::{ChatStreamService, StreamEvent};
use crate::core::config::Config;
use crate::core::conversation::Conversation;
use crate::core::directives::RenderedTurn;
use crate::core::persona::PersonaManager;

pub async fn run_say(
    config: &Config,
    settings: &SessionSettings,
    persona_override: Option<&str>,
    prompt: &str,
) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        eprintln!("Usage: labchat say <prompt>");
        std::process::exit(1);
    }

    let mut personas = PersonaManager::load(config)?;
    if let Some(id) = persona_override {
        personas
            .set_active_persona(id)
            .map_err(|e| -> Box<dyn Error> { e.into() })?;
    }
    let persona = personas.active_persona();

    let mut conversation = Conversation::new(persona);
    let history = conversation
        .submit(prompt)
        .expect("fresh conversation accepts a non-empty prompt");

    let mut handle = ChatStreamService::open(settings.stream_params(persona, history));
    let mut printed = 0usize;
    while let Some(event) = handle.next().await {
        match event {
            StreamEvent::Snapshot(snapshot) => {
                print!("{}", &snapshot.text[printed..]);
                io::stdout().flush()?;
                printed = snapshot.text.len();
                conversation.apply_snapshot(&snapshot);
            }
            StreamEvent::Failed(detail) => {
                eprintln!("\n\n{detail}");
                std::process::exit(1);
            }
            StreamEvent::Completed => {
                conversation.finalize_exchange();
            }
        }
    }
    println!();

    if let Some(turn) = conversation.turns().back() {
        let rendered = RenderedTurn::from_text(&turn.text);
        if let Some(chart) = rendered.chart {
            println!(
                "[{} chart] {} ({} points)",
                chart.kind.as_str(),
                chart.title,
                chart.series.len()
            );
        }
        if let Some(level) = rendered.confidence {
            println!("confidence: {}", level.as_str());
        }
    }

    Ok(())
}
