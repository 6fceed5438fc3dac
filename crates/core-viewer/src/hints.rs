//! Hint mode: labeled overlay selection of interactive page elements.
//!
//! Element rectangles are gathered in the page; labels come from a home-row
//! alphabet and each typed character narrows the live set. A unique full
//! match yields the click target; a per-keystroke timeout auto-selects the
//! lowest-ordered remaining hint.

use serde_json::Value;
use smallvec::SmallVec;

/// Alphabet ordered by typing comfort; labels are one char until the
/// element count forces two.
const ALPHABET: &[u8] = b"asdfghjkl";

/// Expression evaluated in the page: centers of visible interactive
/// elements, viewport coordinates, capped to keep labels short.
pub const COLLECT_HINTS_JS: &str = r#"(() => {
  const sel = 'a[href], button, input, select, textarea, summary, [onclick], [role="button"], [role="link"], [tabindex]';
  const out = [];
  for (const el of document.querySelectorAll(sel)) {
    const r = el.getBoundingClientRect();
    if (r.width < 3 || r.height < 3) continue;
    if (r.bottom < 0 || r.right < 0) continue;
    if (r.top > window.innerHeight || r.left > window.innerWidth) continue;
    out.push({ x: r.left + r.width / 2, y: r.top + r.height / 2 });
    if (out.length >= 81) break;
  }
  return JSON.stringify(out);
})()"#;

#[derive(Debug, Clone, PartialEq)]
pub struct Hint {
    pub label: String,
    /// Click target in browser viewport coordinates.
    pub x: f64,
    pub y: f64,
}

/// Outcome of feeding one character into the hint set.
#[derive(Debug, Clone, PartialEq)]
pub enum HintOutcome {
    /// Still narrowing.
    Pending,
    /// Exactly one hint fully matched.
    Match(Hint),
    /// No hint matches the typed prefix.
    NoMatch,
}

#[derive(Debug, Clone, Default)]
pub struct HintSet {
    hints: Vec<Hint>,
    input: String,
}

impl HintSet {
    /// Parse the JSON produced by [`COLLECT_HINTS_JS`] and label each point.
    pub fn from_eval_result(value: &Value) -> Self {
        let parsed: Vec<(f64, f64)> = value
            .as_str()
            .and_then(|s| serde_json::from_str::<Value>(s).ok())
            .and_then(|v| {
                v.as_array().map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            let x = item.get("x")?.as_f64()?;
                            let y = item.get("y")?.as_f64()?;
                            Some((x, y))
                        })
                        .collect()
                })
            })
            .unwrap_or_default();

        let labels = labels_for(parsed.len());
        let hints = parsed
            .into_iter()
            .zip(labels)
            .map(|((x, y), label)| Hint { label, x, y })
            .collect();
        Self {
            hints,
            input: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    /// Hints still matching the typed prefix, in label order.
    pub fn remaining(&self) -> SmallVec<[&Hint; 8]> {
        self.hints
            .iter()
            .filter(|h| h.label.starts_with(&self.input))
            .collect()
    }

    /// Lowest-ordered remaining hint (the timeout auto-selection target).
    /// Order is label-assignment order, which follows the alphabet.
    pub fn lowest(&self) -> Option<&Hint> {
        self.remaining().into_iter().next()
    }

    /// Feed one character, narrowing the set.
    pub fn type_char(&mut self, c: char) -> HintOutcome {
        let c = c.to_ascii_lowercase();
        if !ALPHABET.contains(&(c as u8)) {
            return HintOutcome::Pending;
        }
        self.input.push(c);
        let matches: Vec<&Hint> = self
            .hints
            .iter()
            .filter(|h| h.label.starts_with(&self.input))
            .collect();
        match matches.len() {
            0 => HintOutcome::NoMatch,
            1 if matches[0].label == self.input => HintOutcome::Match(matches[0].clone()),
            _ => {
                // A full match among longer siblings cannot happen: the
                // label set is prefix-free by construction.
                HintOutcome::Pending
            }
        }
    }
}

/// Generate `n` prefix-free labels over the alphabet: single chars while
/// they suffice, otherwise two-char labels throughout.
fn labels_for(n: usize) -> Vec<String> {
    let k = ALPHABET.len();
    if n <= k {
        return ALPHABET[..n]
            .iter()
            .map(|&c| (c as char).to_string())
            .collect();
    }
    let mut out = Vec::with_capacity(n);
    'outer: for &a in ALPHABET {
        for &b in ALPHABET {
            if out.len() >= n {
                break 'outer;
            }
            out.push(format!("{}{}", a as char, b as char));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set_of(n: usize) -> HintSet {
        let points: Vec<Value> = (0..n)
            .map(|i| json!({ "x": (i * 10) as f64, "y": (i * 20) as f64 }))
            .collect();
        let payload = Value::String(serde_json::to_string(&points).expect("encode"));
        HintSet::from_eval_result(&payload)
    }

    #[test]
    fn small_sets_get_single_char_labels() {
        let set = set_of(3);
        let labels: Vec<&str> = set.remaining().iter().map(|h| h.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "s", "d"]);
    }

    #[test]
    fn large_sets_get_prefix_free_pairs() {
        let set = set_of(20);
        let remaining = set.remaining();
        assert_eq!(remaining.len(), 20);
        assert!(remaining.iter().all(|h| h.label.len() == 2));
        // Prefix-freedom: no label is a prefix of another.
        for a in remaining.iter() {
            for b in remaining.iter() {
                if a.label != b.label {
                    assert!(!b.label.starts_with(a.label.as_str()));
                }
            }
        }
    }

    #[test]
    fn unique_match_fires_on_full_label() {
        let mut set = set_of(3);
        match set.type_char('s') {
            HintOutcome::Match(hint) => {
                assert_eq!(hint.label, "s");
                assert_eq!(hint.x, 10.0);
                assert_eq!(hint.y, 20.0);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn two_char_labels_narrow_then_match() {
        let mut set = set_of(20);
        assert_eq!(set.type_char('a'), HintOutcome::Pending);
        let remaining_len = set.remaining().len();
        assert_eq!(remaining_len, 9, "one column of the pair space");
        match set.type_char('s') {
            HintOutcome::Match(hint) => assert_eq!(hint.label, "as"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_prefix_reports_no_match() {
        let mut set = set_of(2); // labels: a, s
        assert_eq!(set.type_char('d'), HintOutcome::NoMatch);
    }

    #[test]
    fn characters_outside_alphabet_are_ignored() {
        let mut set = set_of(2);
        assert_eq!(set.type_char('9'), HintOutcome::Pending);
        assert_eq!(set.input(), "");
    }

    #[test]
    fn lowest_orders_by_label() {
        let set = set_of(5);
        assert_eq!(set.lowest().expect("nonempty").label, "a");
    }

    #[test]
    fn malformed_eval_result_yields_empty_set() {
        let set = HintSet::from_eval_result(&json!(null));
        assert!(set.is_empty());
        let set = HintSet::from_eval_result(&json!("not json at all"));
        assert!(set.is_empty());
    }
}
