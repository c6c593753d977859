use crate::core::builtin_personas::load_builtin_personas;
use crate::core::config::Config;
use serde::{Deserialize, Serialize};

/// A named assistant configuration: a system instruction string plus the
/// display identity the front-end shows for it. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub accent: Option<String>,
    pub greeting: String,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub example_prompts: Vec<String>,
    pub instructions: String,
}

/// Manages the persona roster and the currently selected persona.
pub struct PersonaManager {
    personas: Vec<Persona>,
    active: usize,
}

impl PersonaManager {
    /// Build the roster from the built-in personas plus any defined in the
    /// configuration. A config persona with a built-in id replaces the
    /// built-in; others are appended after them.
    pub fn load(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let mut personas = load_builtin_personas();
        for custom in &config.personas {
            match personas.iter_mut().find(|p| p.id == custom.id) {
                Some(existing) => *existing = custom.clone(),
                None => personas.push(custom.clone()),
            }
        }

        let mut manager = PersonaManager {
            personas,
            active: 0,
        };
        if let Some(default_id) = &config.default_persona {
            manager.set_active_persona(default_id)?;
        }
        Ok(manager)
    }

    pub fn list_personas(&self) -> &[Persona] {
        &self.personas
    }

    pub fn find_persona_by_id(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// The selected persona. The roster is never empty, so this always
    /// resolves.
    pub fn active_persona(&self) -> &Persona {
        &self.personas[self.active]
    }

    pub fn set_active_persona(&mut self, persona_id: &str) -> Result<(), String> {
        match self
            .personas
            .iter()
            .position(|p| p.id.eq_ignore_ascii_case(persona_id))
        {
            Some(index) => {
                self.active = index;
                Ok(())
            }
            None => {
                let available_ids: Vec<&str> =
                    self.personas.iter().map(|p| p.id.as_str()).collect();
                Err(format!(
                    "Persona '{}' not found. Available personas: {}",
                    persona_id,
                    available_ids.join(", ")
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(id: &str, title: &str) -> Persona {
        Persona {
            id: id.to_string(),
            title: title.to_string(),
            subtitle: String::new(),
            accent: None,
            greeting: format!("Hello from {title}."),
            placeholder: None,
            example_prompts: Vec::new(),
            instructions: "You are a test assistant.".to_string(),
        }
    }

    #[test]
    fn default_roster_starts_on_the_first_builtin() {
        let manager = PersonaManager::load(&Config::default()).unwrap();
        assert_eq!(manager.active_persona().id, "design");
        assert_eq!(manager.list_personas().len(), 4);
    }

    #[test]
    fn config_personas_extend_and_shadow_builtins() {
        let mut config = Config::default();
        config.personas.push(custom("rheology", "Rheology Coach"));
        config.personas.push(custom("ml", "Custom ML Persona"));

        let manager = PersonaManager::load(&config).unwrap();
        assert_eq!(manager.list_personas().len(), 5);
        assert_eq!(
            manager.find_persona_by_id("ml").unwrap().title,
            "Custom ML Persona"
        );
        assert!(manager.find_persona_by_id("rheology").is_some());
    }

    #[test]
    fn default_persona_from_config_is_applied() {
        let config = Config {
            default_persona: Some("eln".to_string()),
            ..Config::default()
        };
        let manager = PersonaManager::load(&config).unwrap();
        assert_eq!(manager.active_persona().id, "eln");
    }

    #[test]
    fn unknown_default_persona_fails_load() {
        let config = Config {
            default_persona: Some("ghost".to_string()),
            ..Config::default()
        };
        assert!(PersonaManager::load(&config).is_err());
    }

    #[test]
    fn switching_to_an_unknown_persona_reports_the_roster() {
        let mut manager = PersonaManager::load(&Config::default()).unwrap();
        let err = manager.set_active_persona("ghost").unwrap_err();
        assert!(err.contains("ghost"));
        assert!(err.contains("design"));
        assert_eq!(manager.active_persona().id, "design");
    }

    #[test]
    fn persona_lookup_is_case_insensitive() {
        let mut manager = PersonaManager::load(&Config::default()).unwrap();
        manager.set_active_persona("INFORMATICS").unwrap();
        assert_eq!(manager.active_persona().id, "informatics");
    }
}
