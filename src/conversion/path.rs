//! Conversion paths through the rule graph.

use std::fmt;
use std::rc::Rc;

use super::ConversionRule;

/// An ordered chain of rules leading from one representation to another.
#[derive(Clone, Default)]
pub struct ConversionPath {
    rules: Vec<Rc<dyn ConversionRule>>,
}

impl ConversionPath {
    pub fn new(rules: Vec<Rc<dyn ConversionRule>>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rc<dyn ConversionRule>] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Sum of the rule costs.
    pub fn cost(&self) -> u32 {
        self.rules.iter().map(|r| r.conversion_cost()).sum()
    }

    pub fn source(&self) -> Option<&str> {
        self.rules.first().map(|r| r.source_representation_name())
    }

    pub fn target(&self) -> Option<&str> {
        self.rules.last().map(|r| r.target_representation_name())
    }

    /// Every representation name visited, source first.
    pub fn representation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.source().into_iter().collect();
        names.extend(self.rules.iter().map(|r| r.target_representation_name()));
        names
    }
}

impl fmt::Debug for ConversionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionPath")
            .field("steps", &self.representation_names())
            .field("cost", &self.cost())
            .finish()
    }
}

impl fmt::Display for ConversionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.representation_names().join(" -> "))?;
        write!(f, " (cost {})", self.cost())
    }
}

/// Every acyclic rule chain from `source` to `target`, in discovery order.
///
/// Discovery is depth-first over `rules` in registration order, so the
/// result is deterministic for a given registry.
pub fn find_paths(
    rules: &[Rc<dyn ConversionRule>],
    source: &str,
    target: &str,
) -> Vec<ConversionPath> {
    let mut found = Vec::new();
    if source == target {
        return found;
    }
    let mut visited = vec![source.to_string()];
    let mut chain = Vec::new();
    walk(rules, source, target, &mut visited, &mut chain, &mut found);
    found
}

fn walk(
    rules: &[Rc<dyn ConversionRule>],
    current: &str,
    target: &str,
    visited: &mut Vec<String>,
    chain: &mut Vec<Rc<dyn ConversionRule>>,
    found: &mut Vec<ConversionPath>,
) {
    for rule in rules
        .iter()
        .filter(|r| r.source_representation_name() == current)
    {
        let next = rule.target_representation_name();
        if visited.iter().any(|v| v == next) {
            continue;
        }
        chain.push(Rc::clone(rule));
        if next == target {
            found.push(ConversionPath::new(chain.clone()));
        } else {
            visited.push(next.to_string());
            walk(rules, next, target, visited, chain, found);
            visited.pop();
        }
        chain.pop();
    }
}

/// The lowest-cost path; the earliest one wins ties.
pub fn cheapest_path(paths: &[ConversionPath]) -> Option<&ConversionPath> {
    paths.iter().fold(None, |best: Option<&ConversionPath>, path| match best {
        Some(b) if b.cost() <= path.cost() => Some(b),
        _ => Some(path),
    })
}
