//! `labchat personas` listing.

use std::error::Error;

use crate::core::config::Config;
use crate::core::persona::PersonaManager;

pub fn list_personas(config: &Config) -> Result<(), Box<dyn Error>> {
    let personas = PersonaManager::load(config)?;
    let active_id = personas.active_persona().id.clone();

    println!("Available personas:\n");
    for persona in personas.list_personas() {
        let marker = if persona.id == active_id { "*" } else { " " };
        println!(
            "{marker} {:<14} {} — {}",
            persona.id, persona.title, persona.subtitle
        );
    }
    println!("\n* = default persona (set default_persona in the config to change)");

    Ok(())
}
