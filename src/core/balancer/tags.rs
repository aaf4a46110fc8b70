// src/core/balancer/tags.rs

//! Tag-based score adjustments.
//!
//! A match expression is a comma-separated tag list, optionally prefixed with
//! `-` to invert it: `"gpu,ssd"` applies when the node has either tag,
//! `"-gpu,ssd"` applies when it has neither.

/// One requested adjustment: the match expression and its signed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAdjustment {
    pub matcher: String,
    pub delta: i64,
}

impl TagAdjustment {
    pub fn new(matcher: impl Into<String>, delta: i64) -> Self {
        Self {
            matcher: matcher.into(),
            delta,
        }
    }
}

/// Evaluates one adjustment against a node's tags, returning the delta to
/// apply (0 when the expression does not match).
pub fn apply_adjustment(node_tags: &[String], matcher: &str, delta: i64) -> i64 {
    let (invert, expr) = match matcher.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, matcher),
    };
    let have_one = expr
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .any(|wanted| node_tags.iter().any(|t| t == wanted));
    if have_one != invert { delta } else { 0 }
}

/// Sums every adjustment for a node. The result is signed; the caller clamps
/// the final score at zero.
pub fn total_adjustment(node_tags: &[String], adjustments: &[TagAdjustment]) -> i64 {
    adjustments
        .iter()
        .map(|adj| apply_adjustment(node_tags, &adj.matcher, adj.delta))
        .sum()
}
