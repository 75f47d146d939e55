//! Fallback strategies for target resolution.
//!
//! Each strategy derives a new target descriptor from the *original* one.
//! Descriptors are treated as CSS-like locators: compounds joined by
//! combinators (` `, `>`, `+`, `~`), with classes, attribute blocks and
//! pseudo-classes inside each compound. A strategy that cannot produce a
//! descriptor different from the original does not apply.

use std::time::Duration;

/// Prefix of a text-based descriptor, e.g. `text=Save`.
pub const TEXT_PREFIX: &str = "text=";

/// Attributes whose value is human-visible text about the element.
const TEXT_ATTRIBUTES: &[&str] = &["aria-label", "title", "placeholder", "alt"];

const TEXT_PSEUDOS: &[&str] = &[":contains(", ":has-text("];

const POSITIONAL_PSEUDOS: &[&str] = &[
    "nth-child",
    "nth-last-child",
    "nth-of-type",
    "nth-last-of-type",
    "first-child",
    "last-child",
    "first-of-type",
    "last-of-type",
    "only-child",
    "eq",
];

/// Fallbacks in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Search by associated text, or drop class and attribute filters.
    SemanticRelaxation,
    /// Keep only the subject compound, without positional pseudo-classes.
    DescriptorSimplification,
    /// Wait, then try the original descriptor again.
    DelayedReResolution,
}

impl FallbackStrategy {
    pub const ORDER: [FallbackStrategy; 3] = [
        FallbackStrategy::SemanticRelaxation,
        FallbackStrategy::DescriptorSimplification,
        FallbackStrategy::DelayedReResolution,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FallbackStrategy::SemanticRelaxation => "semantic_relaxation",
            FallbackStrategy::DescriptorSimplification => "descriptor_simplification",
            FallbackStrategy::DelayedReResolution => "delayed_re_resolution",
        }
    }

    /// The descriptor to try next, or `None` if this strategy does not apply.
    pub fn derive(&self, original: &str) -> Option<String> {
        match self {
            FallbackStrategy::SemanticRelaxation => relax(original),
            FallbackStrategy::DescriptorSimplification => simplify(original),
            FallbackStrategy::DelayedReResolution => Some(original.to_string()),
        }
    }

    /// How long to wait before the attempt.
    pub fn delay(&self, re_resolve_delay: Duration) -> Duration {
        match self {
            FallbackStrategy::DelayedReResolution => re_resolve_delay,
            _ => Duration::ZERO,
        }
    }
}

/// Semantic relaxation.
///
/// Prefers the element's visible text when the descriptor mentions it;
/// otherwise drops class and attribute filters while keeping the hierarchy.
pub fn relax(original: &str) -> Option<String> {
    let original = original.trim();
    if original.starts_with(TEXT_PREFIX) {
        return None;
    }
    if let Some(text) = text_hint(original) {
        return Some(format!("{}{}", TEXT_PREFIX, text));
    }

    let compounds = split_compounds(original);
    let subject = strip_filters(&compounds.last()?.1);
    if subject.is_empty() {
        return None;
    }

    let mut relaxed: Vec<(char, String)> = compounds[..compounds.len() - 1]
        .iter()
        .map(|(combinator, compound)| (*combinator, strip_filters(compound)))
        .filter(|(_, compound)| !compound.is_empty())
        .collect();
    relaxed.push((compounds[compounds.len() - 1].0, subject));

    let candidate = join_compounds(&relaxed);
    (candidate != original).then_some(candidate)
}

/// Descriptor simplification: the last compound only, minus ordinal
/// pseudo-classes.
pub fn simplify(original: &str) -> Option<String> {
    let original = original.trim();
    let compounds = split_compounds(original);
    let subject = strip_positional(&compounds.last()?.1);
    (!subject.is_empty() && subject != original).then_some(subject)
}

fn text_hint(descriptor: &str) -> Option<&str> {
    for pseudo in TEXT_PSEUDOS {
        if let Some(start) = descriptor.find(pseudo) {
            let rest = &descriptor[start + pseudo.len()..];
            if let Some(end) = rest.find(')') {
                let text = trim_quotes(rest[..end].trim());
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }

    for attribute in TEXT_ATTRIBUTES {
        let needle = format!("[{}=", attribute);
        if let Some(start) = descriptor.find(&needle) {
            let rest = &descriptor[start + needle.len()..];
            if let Some(end) = rest.find(']') {
                let text = trim_quotes(rest[..end].trim());
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }
    None
}

fn trim_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Splits a descriptor into `(combinator, compound)` pairs. The first
/// compound's combinator is `' '` and carries no meaning.
fn split_compounds(descriptor: &str) -> Vec<(char, String)> {
    let mut compounds = Vec::new();
    let mut current = String::new();
    let mut combinator = ' ';
    let mut depth = 0usize;

    for c in descriptor.chars() {
        match c {
            '[' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if depth == 0 && (c.is_whitespace() || matches!(c, '>' | '+' | '~')) => {
                if !current.is_empty() {
                    compounds.push((combinator, std::mem::take(&mut current)));
                    combinator = ' ';
                }
                if c != ' ' && !c.is_whitespace() {
                    combinator = c;
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        compounds.push((combinator, current));
    }
    compounds
}

fn join_compounds(compounds: &[(char, String)]) -> String {
    let mut out = String::new();
    for (i, (combinator, compound)) in compounds.iter().enumerate() {
        if i > 0 {
            match combinator {
                ' ' => out.push(' '),
                c => {
                    out.push(' ');
                    out.push(*c);
                    out.push(' ');
                }
            }
        }
        out.push_str(compound);
    }
    out
}

/// Drops `.class` and `[attr]` filters from one compound.
fn strip_filters(compound: &str) -> String {
    let mut out = String::with_capacity(compound.len());
    let mut chars = compound.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                }
            }
            '.' => {
                while chars
                    .peek()
                    .is_some_and(|n| n.is_alphanumeric() || *n == '-' || *n == '_')
                {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Drops ordinal pseudo-classes such as `:nth-child(2)` from one compound.
fn strip_positional(compound: &str) -> String {
    let mut out = String::with_capacity(compound.len());
    let mut rest = compound;

    while let Some(idx) = rest.find(':') {
        out.push_str(&rest[..idx]);
        let pseudo = &rest[idx..];
        let name_end = pseudo[1..]
            .find(|c: char| !(c.is_alphanumeric() || c == '-'))
            .map_or(pseudo.len(), |n| n + 1);
        let name = &pseudo[1..name_end];

        let mut end = name_end;
        if pseudo[end..].starts_with('(') {
            end = pseudo[end..].find(')').map_or(pseudo.len(), |close| end + close + 1);
        }

        if !POSITIONAL_PSEUDOS.contains(&name) {
            out.push_str(&pseudo[..end]);
        }
        rest = &pseudo[end..];
    }
    out.push_str(rest);
    out
}
