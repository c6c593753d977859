//! Conversation state machine.
//!
//! [`Conversation`] owns the ordered turn sequence and the lifecycle of the
//! single in-flight exchange. Submissions are serialized, never pipelined:
//! while an exchange is awaiting its first fragment or streaming, further
//! submissions are silently rejected. The trailing turn is the only mutable
//! one, and it is updated by whole-turn replacement so earlier snapshots
//! stay valid for rendering.

use std::collections::VecDeque;

use tracing::warn;

use crate::api::ApiMessage;
use crate::core::chat_stream::ResponseSnapshot;
use crate::core::message::Turn;
use crate::core::persona::Persona;

/// Fixed text shown in place of an answer when the stream fails. The
/// transport detail goes to the log, not the transcript.
pub const STREAM_FAILURE_TEXT: &str = "Error: Failed to generate response. Please try again.";

/// Lifecycle of the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    /// Request dispatched, placeholder appended, nothing received yet.
    AwaitingFirstFragment,
    Streaming,
    Finalized,
    Errored,
}

pub struct Conversation {
    turns: VecDeque<Turn>,
    phase: ExchangePhase,
}

impl Conversation {
    /// A conversation is never empty: it starts with the persona's greeting.
    pub fn new(persona: &Persona) -> Self {
        let mut turns = VecDeque::new();
        turns.push_back(Turn::model(persona.greeting.clone()));
        Conversation {
            turns,
            phase: ExchangePhase::Idle,
        }
    }

    pub fn turns(&self) -> &VecDeque<Turn> {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn is_exchange_in_flight(&self) -> bool {
        matches!(
            self.phase,
            ExchangePhase::AwaitingFirstFragment | ExchangePhase::Streaming
        )
    }

    /// Whether only the seed greeting is present (the front-end shows
    /// example prompts in that state).
    pub fn is_pristine(&self) -> bool {
        self.turns.len() == 1
    }

    /// Destructive operations on a grown conversation want confirmation
    /// first; that dialog belongs to the front-end.
    pub fn needs_confirmation(&self) -> bool {
        self.turns.len() > 1
    }

    /// Accept a user submission.
    ///
    /// Returns the ordered API history to stream against, or `None` when
    /// the submission is rejected: empty after trimming, or an exchange is
    /// already in flight. Rejection changes no state.
    pub fn submit(&mut self, text: &str) -> Option<Vec<ApiMessage>> {
        let trimmed = text.trim();
        if trimmed.is_empty() || self.is_exchange_in_flight() {
            return None;
        }
        self.turns.push_back(Turn::user(trimmed));
        Some(self.begin_exchange())
    }

    /// Replace the last answer: drop the trailing model turn and re-issue
    /// the exchange for the user turn before it. Valid only when the
    /// trailing turn is a settled model turn preceded by a user turn.
    pub fn regenerate(&mut self) -> Option<Vec<ApiMessage>> {
        if self.is_exchange_in_flight() {
            return None;
        }
        if !self.turns.back().is_some_and(Turn::is_model) {
            return None;
        }
        if !self.turns.iter().rev().skip(1).any(Turn::is_user) {
            return None;
        }
        self.turns.pop_back();
        Some(self.begin_exchange())
    }

    /// History snapshot for the service plus the placeholder the incoming
    /// fragments will fill.
    fn begin_exchange(&mut self) -> Vec<ApiMessage> {
        let history = self
            .turns
            .iter()
            .map(|turn| ApiMessage {
                role: turn.role.as_api_str().to_string(),
                content: turn.text.clone(),
            })
            .collect();
        self.turns.push_back(Turn::placeholder());
        self.phase = ExchangePhase::AwaitingFirstFragment;
        history
    }

    /// Apply one cumulative snapshot to the placeholder. Snapshots arrive
    /// in stream order and carry the full accumulated text, so this always
    /// replaces rather than appends. Ignored when no exchange is in flight
    /// (e.g. a stray fragment after reset).
    pub fn apply_snapshot(&mut self, snapshot: &ResponseSnapshot) {
        if !self.is_exchange_in_flight() {
            return;
        }
        if let Some(last) = self.turns.back_mut() {
            let mut turn = Turn::model(snapshot.text.clone());
            turn.thought = snapshot.thought.clone();
            *last = turn;
        }
        self.phase = ExchangePhase::Streaming;
    }

    /// The stream ended normally; the placeholder becomes an ordinary
    /// immutable turn.
    pub fn finalize_exchange(&mut self) {
        if self.is_exchange_in_flight() {
            self.phase = ExchangePhase::Finalized;
        }
    }

    /// The stream failed. The placeholder is replaced with the fixed error
    /// turn; `detail` is only logged. Terminal for this exchange — no
    /// automatic retry.
    pub fn fail_exchange(&mut self, detail: &str) {
        if !self.is_exchange_in_flight() {
            return;
        }
        warn!("generation stream failed: {detail}");
        if let Some(last) = self.turns.back_mut() {
            *last = Turn::model(STREAM_FAILURE_TEXT);
        }
        self.phase = ExchangePhase::Errored;
    }

    /// Replace the whole conversation with a fresh greeting, even
    /// mid-stream. The caller is responsible for cancelling an in-flight
    /// stream (dropping its handle does).
    pub fn reset(&mut self, persona: &Persona) {
        self.turns.clear();
        self.turns.push_back(Turn::model(persona.greeting.clone()));
        self.phase = ExchangePhase::Idle;
    }

    /// Switching persona discards the conversation; confirmation for a
    /// grown conversation is the front-end's call.
    pub fn switch_persona(&mut self, persona: &Persona) {
        self.reset(persona);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;

    fn persona(id: &str, greeting: &str) -> Persona {
        Persona {
            id: id.to_string(),
            title: format!("{id} assistant"),
            subtitle: String::new(),
            accent: None,
            greeting: greeting.to_string(),
            placeholder: None,
            example_prompts: Vec::new(),
            instructions: "You are a test assistant.".to_string(),
        }
    }

    fn snapshot(text: &str, thought: &str) -> ResponseSnapshot {
        ResponseSnapshot {
            text: text.to_string(),
            thought: thought.to_string(),
        }
    }

    fn finished_exchange(conversation: &mut Conversation, answer: &str) {
        conversation.apply_snapshot(&snapshot(answer, ""));
        conversation.finalize_exchange();
    }

    #[test]
    fn seeds_with_the_persona_greeting() {
        let conversation = Conversation::new(&persona("design", "Hello."));
        assert_eq!(conversation.len(), 1);
        assert!(conversation.is_pristine());
        assert_eq!(conversation.turns()[0].text, "Hello.");
        assert!(conversation.turns()[0].is_model());
        assert_eq!(conversation.phase(), ExchangePhase::Idle);
    }

    #[test]
    fn empty_and_whitespace_submissions_are_rejected() {
        let mut conversation = Conversation::new(&persona("design", "Hi."));
        assert!(conversation.submit("").is_none());
        assert!(conversation.submit("   ").is_none());
        assert!(conversation.submit("\n\t").is_none());
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.phase(), ExchangePhase::Idle);
    }

    #[test]
    fn submit_appends_user_turn_and_placeholder() {
        let mut conversation = Conversation::new(&persona("design", "Hi."));
        let history = conversation.submit("  design a hydrogel  ").unwrap();

        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.turns()[1].text, "design a hydrogel");
        assert!(conversation.turns()[1].is_user());
        assert!(conversation.turns()[2].text.is_empty());
        assert_eq!(conversation.phase(), ExchangePhase::AwaitingFirstFragment);

        // History covers greeting plus the new user turn, not the placeholder.
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "assistant");
        assert_eq!(history[0].content, "Hi.");
        assert_eq!(history[1].role, "user");
        assert_eq!(history[1].content, "design a hydrogel");
    }

    #[test]
    fn back_to_back_submissions_are_serialized() {
        let mut conversation = Conversation::new(&persona("design", "Hi."));
        assert!(conversation.submit("first").is_some());
        assert!(conversation.submit("second").is_none());
        // Only the first exchange is reflected in the transcript.
        assert_eq!(conversation.len(), 3);

        conversation.apply_snapshot(&snapshot("answer", ""));
        assert!(conversation.submit("still streaming").is_none());
        conversation.finalize_exchange();
        assert!(conversation.submit("second").is_some());
    }

    #[test]
    fn snapshots_fill_the_placeholder_in_order() {
        let mut conversation = Conversation::new(&persona("design", "Hi."));
        conversation.submit("go").unwrap();

        conversation.apply_snapshot(&snapshot("d1", ""));
        assert_eq!(conversation.phase(), ExchangePhase::Streaming);
        conversation.apply_snapshot(&snapshot("d1d2", "t1"));
        conversation.apply_snapshot(&snapshot("d1d2d3", "t1t2"));

        let last = conversation.turns().back().unwrap();
        assert_eq!(last.text, "d1d2d3");
        assert_eq!(last.thought, "t1t2");
        assert_eq!(conversation.len(), 3);

        conversation.finalize_exchange();
        assert_eq!(conversation.phase(), ExchangePhase::Finalized);
    }

    #[test]
    fn snapshots_after_finalize_are_ignored() {
        let mut conversation = Conversation::new(&persona("design", "Hi."));
        conversation.submit("go").unwrap();
        finished_exchange(&mut conversation, "done");

        conversation.apply_snapshot(&snapshot("late fragment", ""));
        assert_eq!(conversation.turns().back().unwrap().text, "done");
        assert_eq!(conversation.phase(), ExchangePhase::Finalized);
    }

    #[test]
    fn failure_replaces_the_placeholder_with_the_fixed_error_turn() {
        let mut conversation = Conversation::new(&persona("design", "Hi."));
        conversation.submit("go").unwrap();
        conversation.apply_snapshot(&snapshot("partial", ""));
        conversation.fail_exchange("connection reset by peer");

        assert_eq!(conversation.len(), 3);
        let last = conversation.turns().back().unwrap();
        assert_eq!(last.role, Role::Model);
        assert_eq!(last.text, STREAM_FAILURE_TEXT);
        assert_eq!(conversation.phase(), ExchangePhase::Errored);

        // Terminal for the exchange, but the conversation stays usable.
        assert!(conversation.submit("try something else").is_some());
    }

    #[test]
    fn regenerate_replaces_the_last_answer() {
        let mut conversation = Conversation::new(&persona("design", "Hi."));
        conversation.submit("user_A").unwrap();
        finished_exchange(&mut conversation, "model_B");
        assert_eq!(conversation.len(), 3);

        let history = conversation.regenerate().unwrap();
        // Length dropped by one, then the placeholder grew it back.
        assert_eq!(conversation.len(), 3);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "user_A");

        finished_exchange(&mut conversation, "model_B_prime");
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.turns()[1].text, "user_A");
        assert_eq!(conversation.turns()[2].text, "model_B_prime");
    }

    #[test]
    fn regenerate_needs_a_settled_model_turn_with_a_user_before_it() {
        let mut conversation = Conversation::new(&persona("design", "Hi."));
        // Greeting only: nothing to regenerate.
        assert!(conversation.regenerate().is_none());
        assert_eq!(conversation.len(), 1);

        conversation.submit("go").unwrap();
        // Mid-exchange: rejected.
        assert!(conversation.regenerate().is_none());

        finished_exchange(&mut conversation, "answer");
        assert!(conversation.regenerate().is_some());
    }

    #[test]
    fn reset_yields_a_single_greeting_regardless_of_prior_state() {
        let design = persona("design", "Design greeting.");
        let ml = persona("ml", "ML greeting.");

        let mut conversation = Conversation::new(&design);
        conversation.submit("one").unwrap();
        finished_exchange(&mut conversation, "answer one");
        conversation.submit("two").unwrap();

        // Reset mid-stream.
        conversation.reset(&ml);
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.turns()[0].text, "ML greeting.");
        assert_eq!(conversation.phase(), ExchangePhase::Idle);

        // A fragment from the abandoned stream no longer applies.
        conversation.apply_snapshot(&snapshot("stray", ""));
        assert_eq!(conversation.turns()[0].text, "ML greeting.");
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn switch_persona_is_a_reset_to_the_new_greeting() {
        let design = persona("design", "Design greeting.");
        let eln = persona("eln", "ELN greeting.");

        let mut conversation = Conversation::new(&design);
        assert!(!conversation.needs_confirmation());
        conversation.submit("hello").unwrap();
        finished_exchange(&mut conversation, "answer");
        assert!(conversation.needs_confirmation());

        conversation.switch_persona(&eln);
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.turns()[0].text, "ELN greeting.");
    }
}
