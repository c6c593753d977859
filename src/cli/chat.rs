//! TUI-less interactive chat loop.
//!
//! Presentation glue around the conversation core: reads lines from stdin,
//! streams answers incrementally, and renders extracted directives once an
//! exchange finalizes. Destructive operations (reset, persona switch on a
//! grown conversation) ask for confirmation here; the state machine itself
//! performs them unconditionally.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::cli::SessionSettings;
use crate::core::chat_stream::{ChatStreamService, StreamEvent};
use crate::core::config::Config;
use crate::core::conversation::{Conversation, ExchangePhase, STREAM_FAILURE_TEXT};
use crate::core::directives::{ChartDirective, RenderedTurn};
use crate::core::export::{default_dump_filename, dump_transcript};
use crate::core::persona::{Persona, PersonaManager};

type InputLines = Lines<BufReader<Stdin>>;

enum LoopControl {
    Continue,
    Quit,
}

pub async fn run_chat(
    config: &Config,
    settings: &SessionSettings,
    persona_override: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let mut personas = PersonaManager::load(config)?;
    if let Some(id) = persona_override {
        personas
            .set_active_persona(id)
            .map_err(|e| -> Box<dyn Error> { e.into() })?;
    }
    let mut conversation = Conversation::new(personas.active_persona());

    print_persona_intro(&conversation, personas.active_persona());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            match handle_command(
                command,
                &mut conversation,
                &mut personas,
                settings,
                &mut lines,
            )
            .await?
            {
                LoopControl::Continue => continue,
                LoopControl::Quit => break,
            }
        }

        // While only the greeting is on screen, a bare number picks the
        // matching example prompt.
        let submission = match input.parse::<usize>() {
            Ok(n) if conversation.is_pristine() && n >= 1 => personas
                .active_persona()
                .example_prompts
                .get(n - 1)
                .cloned()
                .unwrap_or(input),
            _ => input,
        };

        if let Some(history) = conversation.submit(&submission) {
            run_exchange(
                &mut conversation,
                settings,
                personas.active_persona(),
                history,
            )
            .await?;
        }
    }

    Ok(())
}

/// Drive one streaming exchange to its terminal state, printing snapshots
/// incrementally. Ctrl+C cancels the stream; the partial answer settles as
/// the final one.
async fn run_exchange(
    conversation: &mut Conversation,
    settings: &SessionSettings,
    persona: &Persona,
    history: Vec<crate::api::ApiMessage>,
) -> Result<(), Box<dyn Error>> {
    let mut handle = ChatStreamService::open(settings.stream_params(persona, history));
    let mut printed_text = 0usize;
    let mut printed_thought = 0usize;

    println!();
    loop {
        tokio::select! {
            event = handle.next() => {
                let Some(event) = event else { break };
                match event {
                    StreamEvent::Snapshot(snapshot) => {
                        // Thought deltas usually precede the answer; show
                        // them live only until the answer starts.
                        if printed_text == 0 && snapshot.thought.len() > printed_thought {
                            print!("{}", &snapshot.thought[printed_thought..]);
                            printed_thought = snapshot.thought.len();
                        }
                        if snapshot.text.len() > printed_text {
                            if printed_text == 0 && printed_thought > 0 {
                                println!("\n");
                            }
                            print!("{}", &snapshot.text[printed_text..]);
                            printed_text = snapshot.text.len();
                        }
                        io::stdout().flush()?;
                        conversation.apply_snapshot(&snapshot);
                    }
                    StreamEvent::Failed(detail) => {
                        conversation.fail_exchange(&detail);
                    }
                    StreamEvent::Completed => {
                        conversation.finalize_exchange();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                conversation.finalize_exchange();
                println!();
                println!("[interrupted]");
                return Ok(());
            }
        }
    }
    println!();

    match conversation.phase() {
        ExchangePhase::Errored => println!("{STREAM_FAILURE_TEXT}"),
        ExchangePhase::Finalized => {
            if let Some(turn) = conversation.turns().back() {
                let rendered = RenderedTurn::from_text(&turn.text);
                if let Some(chart) = &rendered.chart {
                    print_chart(chart);
                }
                if let Some(level) = rendered.confidence {
                    println!();
                    println!("confidence: {}", level.as_str());
                }
            }
        }
        _ => {}
    }

    Ok(())
}

async fn handle_command(
    command: &str,
    conversation: &mut Conversation,
    personas: &mut PersonaManager,
    settings: &SessionSettings,
    lines: &mut InputLines,
) -> Result<LoopControl, Box<dyn Error>> {
    let mut parts = command.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

    match name {
        "quit" | "exit" => return Ok(LoopControl::Quit),
        "help" => {
            println!("Commands: /personas, /persona <id>, /regenerate, /reset, /export [filename], /quit");
        }
        "personas" => {
            for persona in personas.list_personas() {
                let marker = if persona.id == personas.active_persona().id {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {} — {}", persona.id, persona.title);
            }
        }
        "persona" => {
            let Some(id) = arg else {
                println!("Usage: /persona <id>");
                return Ok(LoopControl::Continue);
            };
            if personas.find_persona_by_id(id).is_none() {
                if let Err(message) = personas.set_active_persona(id) {
                    println!("{message}");
                }
                return Ok(LoopControl::Continue);
            }
            if conversation.needs_confirmation()
                && !confirm(
                    lines,
                    "Switching personas will clear the current conversation. Continue?",
                )
                .await?
            {
                return Ok(LoopControl::Continue);
            }
            if let Err(message) = personas.set_active_persona(id) {
                println!("{message}");
                return Ok(LoopControl::Continue);
            }
            conversation.switch_persona(personas.active_persona());
            print_persona_intro(conversation, personas.active_persona());
        }
        "regenerate" => {
            match conversation.regenerate() {
                Some(history) => {
                    run_exchange(conversation, settings, personas.active_persona(), history)
                        .await?;
                }
                None => println!("Nothing to regenerate."),
            }
        }
        "reset" => {
            if conversation.needs_confirmation()
                && !confirm(lines, "Are you sure you want to clear the conversation?").await?
            {
                return Ok(LoopControl::Continue);
            }
            conversation.reset(personas.active_persona());
            print_persona_intro(conversation, personas.active_persona());
        }
        "export" => {
            let path = arg
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default_dump_filename()));
            match dump_transcript(conversation.turns(), personas.active_persona(), &path) {
                Ok(path) => println!("Transcript written to {}", path.display()),
                Err(e) => println!("Export failed: {e}"),
            }
        }
        _ => println!("Unknown command: /{name} (try /help)"),
    }

    Ok(LoopControl::Continue)
}

async fn confirm(lines: &mut InputLines, question: &str) -> Result<bool, Box<dyn Error>> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let answer = lines.next_line().await?;
    Ok(answer.is_some_and(|line| {
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }))
}

fn print_persona_intro(conversation: &Conversation, persona: &Persona) {
    println!();
    println!("{} — {}", persona.title, persona.subtitle);
    println!();
    println!("{}", persona.greeting);
    if conversation.is_pristine() && !persona.example_prompts.is_empty() {
        println!();
        println!("Try one (type its number):");
        for (i, prompt) in persona.example_prompts.iter().enumerate() {
            println!("  {}. {}", i + 1, prompt);
        }
    }
}

fn print_prompt() -> Result<(), Box<dyn Error>> {
    print!("\nyou> ");
    io::stdout().flush()?;
    Ok(())
}

fn print_chart(chart: &ChartDirective) {
    println!();
    println!("[{} chart] {}", chart.kind.as_str(), chart.title);
    let max = chart
        .series
        .iter()
        .map(|p| p.value)
        .fold(0.0_f64, f64::max);
    for point in &chart.series {
        let width = if max > 0.0 {
            ((point.value / max) * 24.0).round() as usize
        } else {
            0
        };
        println!("  {:<16} {:<24} {}", point.label, "#".repeat(width), point.value);
    }
}
