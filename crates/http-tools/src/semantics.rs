//! Tool effect semantics.
//!
//! Each tool declares what it does to the upstream; this maps that onto MCP `ToolAnnotations`.

use rmcp::model::ToolAnnotations;

/// What a tool does to upstream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Pure read (list/get/search/status).
    Read,
    /// Creates a new upstream object (message, application, request, download).
    Create,
    /// Replaces or edits an existing object.
    Update,
    /// Removes an object.
    Delete,
    /// Imperative action with side effects (start/stop/pause, tests, toggles).
    Action,
}

/// Generate MCP tool annotations for an effect.
///
/// `openWorldHint` is always `true`: every tool talks to an external system.
#[must_use]
pub fn annotations_for_effect(effect: Effect) -> ToolAnnotations {
    let (read_only, destructive, idempotent) = match effect {
        Effect::Read => (true, false, Some(true)),
        Effect::Create => (false, false, Some(false)),
        Effect::Update => (false, true, Some(true)),
        Effect::Delete => (false, true, Some(true)),
        // start/stop style actions may or may not be repeatable; do not guess.
        Effect::Action => (false, true, None),
    };

    ToolAnnotations {
        title: None,
        read_only_hint: Some(read_only),
        destructive_hint: Some(destructive),
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}
