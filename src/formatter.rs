use crate::models::{Action, Event};

/// Builds the chat message for an audit event.
///
/// Returns an empty string for actions without a message; the pipeline does
/// not dispatch those.
pub fn format_event(event: &Event) -> String {
    let actor = &event.actor.name;
    let target = &event.target.name;

    match event.kind() {
        Action::ImpersonationStart => {
            format!("\"{}\" has started impersonating user \"{}\"", actor, target)
        }
        Action::ImpersonationEnd => {
            format!("\"{}\" has finished impersonating user \"{}\"", actor, target)
        }
        Action::UserCreate if target.is_empty() => format!("\"{}\" has created a user", actor),
        Action::UserCreate => format!("\"{}\" has created user \"{}\"", actor, target),
        Action::UserDelete => format!("\"{}\" has deleted user \"{}\"", actor, target),
        Action::UserUpdate if actor == target => format!("\"{}\" has updated their account", actor),
        Action::UserUpdate => format!("\"{}\" has updated user \"{}\"", actor, target),
        Action::Unknown(_) => String::new(),
    }
}
