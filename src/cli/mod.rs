//! Command-line interface parsing and dispatch.

pub mod chat;
pub mod imagine;
pub mod persona_list;
pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::api::ApiMessage;
use crate::core::chat_stream::StreamParams;
use crate::core::config::Config;
use crate::core::persona::Persona;

#[derive(Parser)]
#[command(name = "labchat")]
#[command(about = "A terminal chat interface for streaming lab-assistant personas")]
#[command(
    long_about = "Labchat is a terminal chat front-end that routes your messages to one of \
several lab-assistant personas and streams the answer back, extracting inline \
chart and confidence annotations from the response.\n\n\
Environment Variables:\n\
  LABCHAT_API_KEY   API key for the generation service (GEMINI_API_KEY is\n\
                    honored as a fallback)\n\
  LABCHAT_BASE_URL  Custom API base URL (optional)\n\n\
Chat commands:\n\
  /personas           List available personas\n\
  /persona <id>       Switch persona (clears the conversation)\n\
  /regenerate         Replace the last answer\n\
  /reset              Clear the conversation\n\
  /export [filename]  Write the transcript to a text file\n\
  /quit               Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Persona to start with (see `labchat personas`)
    #[arg(short = 'P', long, global = true, value_name = "PERSONA")]
    pub persona: Option<String>,

    /// Model id override
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Ask the model for its additional "thought" channel
    #[arg(long, global = true)]
    pub deep_reasoning: bool,

    /// Allow the service to consult external knowledge retrieval
    #[arg(long, global = true)]
    pub web_retrieval: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Send one prompt and print the streamed answer
    Say {
        /// The prompt to send
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// List available personas
    Personas,
    /// Generate a single image from a prompt
    Imagine {
        /// The image prompt
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Resolution tier
        #[arg(long, default_value = "1024x1024")]
        size: String,
        /// Aspect ratio, e.g. 1:1 or 16:9
        #[arg(long)]
        aspect_ratio: Option<String>,
        /// Output file
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Resolved connection settings shared by every subcommand that talks to
/// the generation service.
pub struct SessionSettings {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub deep_reasoning: bool,
    pub web_retrieval: bool,
}

impl SessionSettings {
    fn resolve(config: &Config, args: &Args) -> Result<Self, Box<dyn Error>> {
        Ok(SessionSettings {
            client: reqwest::Client::new(),
            base_url: config.resolve_base_url(),
            api_key: config.resolve_api_key()?,
            model: args
                .model
                .clone()
                .unwrap_or_else(|| config.model().to_string()),
            deep_reasoning: args.deep_reasoning || config.deep_reasoning.unwrap_or(false),
            web_retrieval: args.web_retrieval || config.web_retrieval.unwrap_or(false),
        })
    }

    /// Parameters for one streaming exchange under the given persona.
    pub fn stream_params(&self, persona: &Persona, history: Vec<ApiMessage>) -> StreamParams {
        StreamParams {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            system_instruction: persona.instructions.clone(),
            history,
            deep_reasoning: self.deep_reasoning,
            web_retrieval: self.web_retrieval,
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    match &args.command {
        Some(Commands::Personas) => persona_list::list_personas(&config),
        Some(Commands::Say { prompt }) => {
            let prompt = prompt.join(" ");
            let settings = SessionSettings::resolve(&config, &args)?;
            say::run_say(&config, &settings, args.persona.as_deref(), &prompt).await
        }
        Some(Commands::Imagine {
            prompt,
            size,
            aspect_ratio,
            output,
        }) => {
            let prompt = prompt.join(" ");
            let settings = SessionSettings::resolve(&config, &args)?;
            imagine::run_imagine(
                &settings,
                &prompt,
                size,
                aspect_ratio.as_deref(),
                output.clone(),
            )
            .await
        }
        Some(Commands::Chat) | None => {
            let settings = SessionSettings::resolve(&config, &args)?;
            chat::run_chat(&config, &settings, args.persona.as_deref()).await
        }
    }
}
