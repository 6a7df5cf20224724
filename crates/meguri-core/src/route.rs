//! Routing labels and the routing function trait.

use crate::state::State;

name_type!(
    /// Label returned by a routing function and looked up in a conditional
    /// edge's route map.
    Label
);

impl From<bool> for Label {
    fn from(b: bool) -> Self {
        Self::new(if b { "true" } else { "false" })
    }
}

/// Chooses the outgoing label of a conditional edge from the post-merge state.
///
/// Implemented for any `Fn(&State) -> impl Into<Label>`:
///
/// ```
/// use meguri_core::{Label, Router, State};
///
/// let router = |state: &State| {
///     if state.get_as::<f64>("quality").unwrap_or(0.0) > 0.8 { "stop" } else { "loop" }
/// };
/// assert_eq!(router.route(&State::default()), Label::new("loop"));
/// ```
pub trait Router: Send + Sync {
    /// Returns the label for the given state.
    fn route(&self, state: &State) -> Label;
}

impl<F, L> Router for F
where
    F: Fn(&State) -> L + Send + Sync,
    L: Into<Label>,
{
    fn route(&self, state: &State) -> Label {
        self(state).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_conversions() {
        assert_eq!(Label::from("stop"), Label::new("stop"));
        assert_eq!(Label::from(String::from("loop")).as_str(), "loop");
        assert_eq!(Label::from(true).as_str(), "true");
    }

    #[test]
    fn test_closure_router() {
        let router = |state: &State| Label::new(format!("n{}", state.len()));
        assert_eq!(router.route(&State::default()).as_str(), "n0");
    }
}
