use crate::core::persona::Persona;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct BuiltinPersonaConfig {
    personas: Vec<Persona>,
}

/// Response-format contract shared by every built-in persona. Custom
/// personas defined in the config author their own instructions and opt in
/// to the directives themselves.
const DIRECTIVE_CONTRACT: &str = "\
RESPONSE DIRECTIVES:
- When numeric comparisons would help, embed exactly one chart tag of the form [[CHART:<type>:<title>:<data>]] where <type> is one of bar, line, pie, area; <title> contains no colons; and <data> is a JSON object of label-to-number pairs or a JSON array of {\"name\": ..., \"value\": ...} objects.
- End substantive answers with a single [[CONFIDENCE: High]], [[CONFIDENCE: Medium]], or [[CONFIDENCE: Low]] tag reflecting how well-established the answer is.
- Emit each directive at most once and never inside code blocks.";

pub fn load_builtin_personas() -> Vec<Persona> {
    const CONFIG_CONTENT: &str = include_str!("../builtins/personas.toml");
    let config: BuiltinPersonaConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtins/personas.toml");
    config
        .personas
        .into_iter()
        .map(|mut persona| {
            persona.instructions =
                format!("{}\n\n{}", persona.instructions.trim_end(), DIRECTIVE_CONTRACT);
            persona
        })
        .collect()
}

/// Find a built-in persona by id (case-insensitive).
pub fn find_builtin_persona(id: &str) -> Option<Persona> {
    load_builtin_personas()
        .into_iter()
        .find(|p| p.id.eq_ignore_ascii_case(id))
}
