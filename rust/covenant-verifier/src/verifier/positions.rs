//! The position and error registry.
//!
//! Every IVL node either carries [`Position::None`] (prelude nodes only) or
//! an identifier registered here. When the external verifier reports a
//! failure at an identifier, the registry entry recovers the source node,
//! the enclosing function, any inlined-call breadcrumbs, and the rule table
//! that rewrites the backend's failure code into a diagnostic code.

use std::collections::HashMap;

use covenant_core::span::Span;

use crate::verifier::rules::{Rules, NO_RULES};

/// Position attached to an emitted IVL node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Position {
    /// Built-in prelude nodes have no source counterpart.
    #[default]
    None,
    /// A registered identifier.
    Id(u64),
}

impl Position {
    pub fn id(&self) -> Option<u64> {
        match self {
            Position::None => None,
            Position::Id(id) => Some(*id),
        }
    }
}

/// A breadcrumb recording an inlining site, so diagnostics can show the
/// originating caller chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub label: String,
    pub span: Span,
}

impl Via {
    pub fn new(label: &str, span: Span) -> Self {
        Self { label: label.to_string(), span }
    }
}

/// Renames counterexample model variables back to source names.
#[derive(Debug, Clone, Default)]
pub struct ModelTransform {
    /// `(ivl name, source name)` pairs.
    pub bindings: Vec<(String, String)>,
}

impl ModelTransform {
    pub fn source_name(&self, ivl_name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(from, _)| from == ivl_name)
            .map(|(_, to)| to.as_str())
    }
}

/// Everything needed to turn a failure at one IVL node back into a
/// source-level diagnostic.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Name of the enclosing contract function, if any.
    pub function: Option<String>,
    /// Source region of the originating node.
    pub span: Span,
    /// Rendered source form of the originating node.
    pub text: String,
    /// Resource under check, for allocation diagnostics.
    pub resource: Option<String>,
    pub vias: Vec<Via>,
    pub rules: Rules,
    pub model: Option<ModelTransform>,
}

/// Append-only registry of error positions, local to one translation run.
#[derive(Debug, Default)]
pub struct PositionRegistry {
    next: u64,
    entries: HashMap<u64, ErrorInfo>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source node and return its positioned handle.
    pub fn to_position(&mut self, span: Span, text: String, function: Option<&str>) -> Position {
        self.register(ErrorInfo {
            function: function.map(str::to_string),
            span,
            text,
            resource: None,
            vias: Vec::new(),
            rules: NO_RULES,
            model: None,
        })
    }

    /// Register with a rule table attached.
    pub fn to_position_with_rules(
        &mut self,
        span: Span,
        text: String,
        function: Option<&str>,
        rules: Rules,
    ) -> Position {
        self.register(ErrorInfo {
            function: function.map(str::to_string),
            span,
            text,
            resource: None,
            vias: Vec::new(),
            rules,
            model: None,
        })
    }

    /// Register a fully specified entry.
    pub fn register(&mut self, info: ErrorInfo) -> Position {
        self.next += 1;
        self.entries.insert(self.next, info);
        Position::Id(self.next)
    }

    pub fn no_position(&self) -> Position {
        Position::None
    }

    pub fn lookup(&self, id: u64) -> Option<&ErrorInfo> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered identifiers, for coverage checks in tests.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_identity() {
        let mut registry = PositionRegistry::new();
        let span = Span::new(3, 1, 3, 10);
        let pos = registry.to_position(span, "self.x + 1".to_string(), Some("inc"));
        let id = pos.id().unwrap();
        let info = registry.lookup(id).unwrap();
        assert_eq!(info.span, span);
        assert_eq!(info.text, "self.x + 1");
        assert_eq!(info.function.as_deref(), Some("inc"));
    }

    #[test]
    fn identifiers_are_fresh() {
        let mut registry = PositionRegistry::new();
        let a = registry.to_position(Span::dummy(), String::new(), None);
        let b = registry.to_position(Span::dummy(), String::new(), None);
        assert_ne!(a, b);
    }

    #[test]
    fn no_position_has_no_id() {
        let registry = PositionRegistry::new();
        assert_eq!(registry.no_position().id(), None);
    }

    #[test]
    fn model_transform_renames() {
        let modelt = ModelTransform {
            bindings: vec![("l$x".to_string(), "x".to_string())],
        };
        assert_eq!(modelt.source_name("l$x"), Some("x"));
        assert_eq!(modelt.source_name("l$y"), None);
    }
}
