use super::action::Action;
use super::{StateId, TransitionId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransitionKind {
    #[default]
    External,
    Internal,
}

/// One token of a transition's `event` attribute.
///
/// Matching is by token prefix: `error` matches `error.execution` but not
/// `errors`. A trailing `.*` or `.` is dropped when the descriptor is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor(String);

impl EventDescriptor {
    pub const WILDCARD: &'static str = "*";

    pub(crate) fn new(raw: &str) -> Self {
        let trimmed = raw.strip_suffix(".*").unwrap_or(raw);
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, event: &str) -> bool {
        if self.0 == Self::WILDCARD {
            return true;
        }
        match event.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

/// Precomputed route from a transition's source to one of its targets.
///
/// The exit set of a microstep is read off these paths rather than by
/// walking the tree per event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPath {
    /// Transition domain; `None` is the document root.
    pub lca: Option<StateId>,
    /// Source first, up to the child of `lca`. Empty when the transition
    /// stays inside its source.
    pub upward: Vec<StateId>,
    /// Child of `lca` first, down to the target.
    pub downward: Vec<StateId>,
    /// The upward segment leaves a region of a parallel state, so the
    /// sibling regions are exited too.
    pub cross_region: bool,
}

#[derive(Debug)]
pub struct Transition {
    pub(crate) index: TransitionId,
    /// `None` only for the document's initial transition.
    pub(crate) source: Option<StateId>,
    pub(crate) events: Vec<EventDescriptor>,
    pub(crate) cond: Option<String>,
    pub(crate) targets: Vec<StateId>,
    pub(crate) kind: TransitionKind,
    pub(crate) actions: Vec<Action>,
    pub(crate) domain: Option<StateId>,
    pub(crate) paths: Vec<TransitionPath>,
}

impl PartialEq for Transition {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Transition {}

impl Transition {
    pub fn index(&self) -> TransitionId {
        self.index
    }

    pub fn source(&self) -> Option<StateId> {
        self.source
    }

    pub fn events(&self) -> &[EventDescriptor] {
        &self.events
    }

    pub fn cond(&self) -> Option<&str> {
        self.cond.as_deref()
    }

    pub fn targets(&self) -> &[StateId] {
        &self.targets
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Transition domain; `None` when the domain is the document root.
    pub fn domain(&self) -> Option<StateId> {
        self.domain
    }

    pub fn paths(&self) -> &[TransitionPath] {
        &self.paths
    }

    pub fn is_eventless(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_targetless(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn matches_event(&self, name: &str) -> bool {
        self.events.iter().any(|d| d.matches(name))
    }
}
