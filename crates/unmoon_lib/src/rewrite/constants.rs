use std::collections::HashMap;

use crate::UnmoonError;
use crate::ast::{Expr, MemberAccess};

use super::Rewriter;

/// Undoes indirection tables: `x.KEY` becomes the configured name path or integer.
#[derive(Debug, Clone, Default)]
pub struct ConstantReplacer {
    constants: HashMap<String, Vec<String>>,
}

impl ConstantReplacer {
    /// Drops mappings whose path would be rewritten again below its own root, such as
    /// `FOO => a.FOO.b`; those grow the tree on every visit.
    pub fn new(mut constants: HashMap<String, Vec<String>>) -> Self {
        let nesting: Vec<String> = constants
            .iter()
            .filter(|(_, path)| reenters(path, &constants))
            .map(|(key, _)| key.clone())
            .collect();
        for key in nesting {
            log::warn!("ignoring constant mapping {key}: its path contains a mapped key");
            constants.remove(&key);
        }
        Self { constants }
    }

    /// Parses a `{"KEY": ["seg", ...]}` JSON mapping.
    pub fn from_json(src: &str) -> Result<Self, UnmoonError> {
        Ok(Self::new(serde_json::from_str(src)?))
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}

/// Member segments other than the outermost become `MemberAccess` nodes that get
/// visited again, so none of them may be a mapped key.
fn reenters(path: &[String], constants: &HashMap<String, Vec<String>>) -> bool {
    match path {
        [_, inner @ .., _] => inner.iter().any(|seg| constants.contains_key(seg)),
        _ => false,
    }
}

fn replacement(segments: &[String]) -> Option<Expr> {
    let (first, rest) = segments.split_first()?;
    if let Ok(v) = first.parse::<i64>() {
        return Some(Expr::num(v as f64));
    }
    Some(
        rest.iter()
            .fold(Expr::name(first.as_str()), |acc, seg| Expr::member(acc, seg.as_str())),
    )
}

impl Rewriter for ConstantReplacer {
    fn name(&self) -> &'static str {
        "constant-replacer"
    }

    fn member(&mut self, node: &MemberAccess) -> Option<Expr> {
        let new = replacement(self.constants.get(&node.field)?)?;
        match &new {
            Expr::Member(m) if m == node => None,
            _ => Some(new),
        }
    }
}
