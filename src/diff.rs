//! Difference engine: "is the external resource equivalent to the desired
//! state?"
//!
//! Comparison rules the per-kind adapters build on:
//!
//! - Server-assigned fields (IDs, ARNs, timestamps) are never compared.
//! - List-valued fields with set semantics ignore ordering, and a nil list
//!   equals an empty one.
//! - A null desired field means "don't care" only when the field is
//!   late-initialized; the adapters call [`late_init`] before comparing.
//! - Map comparison is structural: a key present in observed but absent
//!   from desired is drift (the key is to be removed).
//! - Tag diffing returns disjoint add/remove sets; a changed value puts the
//!   key in both, and removal must be applied first.

use std::collections::BTreeMap;
use std::fmt;

/// Order-insensitive equality for list fields with set semantics.
pub fn set_eq<T: Ord + Clone>(desired: &[T], observed: &[T]) -> bool {
    let mut a = desired.to_vec();
    let mut b = observed.to_vec();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}

/// [`set_eq`] over optional lists, treating nil and empty as equivalent.
pub fn set_eq_opt<T: Ord + Clone>(desired: Option<&Vec<T>>, observed: &[T]) -> bool {
    match desired {
        Some(d) => set_eq(d, observed),
        None => observed.is_empty(),
    }
}

/// Disjoint add/remove sets produced by [`tag_diff`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Keys (with values) to add or re-add
    pub add: BTreeMap<String, String>,
    /// Keys to remove. Applied before `add` so a value change on the same
    /// key does not collide.
    pub remove: Vec<String>,
}

impl TagDiff {
    /// True when observed tags already equal the desired set
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Compute the tag operations that turn `observed` into `desired`.
///
/// A key whose value changed appears in both sets.
pub fn tag_diff(
    desired: &BTreeMap<String, String>,
    observed: &BTreeMap<String, String>,
) -> TagDiff {
    let mut diff = TagDiff::default();
    for (key, value) in desired {
        match observed.get(key) {
            Some(observed_value) if observed_value == value => {}
            Some(_) => {
                // Value change: remove first, then add
                diff.remove.push(key.clone());
                diff.add.insert(key.clone(), value.clone());
            }
            None => {
                diff.add.insert(key.clone(), value.clone());
            }
        }
    }
    for key in observed.keys() {
        if !desired.contains_key(key) {
            diff.remove.push(key.clone());
        }
    }
    diff.remove.sort();
    diff.remove.dedup();
    diff
}

/// Fill a null desired field from the observed value.
///
/// Returns true when the field was filled. Never overwrites explicit user
/// intent; only unambiguously-null fields are touched.
pub fn late_init<T: Clone>(desired: &mut Option<T>, observed: Option<&T>) -> bool {
    if desired.is_none() {
        if let Some(value) = observed {
            *desired = Some(value.clone());
            return true;
        }
    }
    false
}

/// Structured diff accumulator producing an observable diff string.
#[derive(Clone, Debug, Default)]
pub struct Diff {
    entries: Vec<String>,
}

impl Diff {
    /// An empty diff
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field drift
    pub fn field(&mut self, path: &str, desired: impl fmt::Debug, observed: impl fmt::Debug) {
        self.entries
            .push(format!("{path}: desired={desired:?} observed={observed:?}"));
    }

    /// Record a pre-rendered drift entry
    pub fn note(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// True when no drift was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entries.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn set_eq_ignores_ordering() {
        // desired ["a","b"] vs observed ["b","a"] is no drift
        assert!(set_eq(
            &["a".to_string(), "b".to_string()],
            &["b".to_string(), "a".to_string()]
        ));
        assert!(!set_eq(&["a".to_string()], &["a".to_string(), "b".to_string()]));
        assert!(set_eq::<String>(&[], &[]));
    }

    #[test]
    fn set_eq_opt_treats_nil_as_empty() {
        assert!(set_eq_opt::<String>(None, &[]));
        assert!(!set_eq_opt(None, &["sg-1".to_string()]));
        assert!(set_eq_opt(
            Some(&vec!["sg-1".to_string()]),
            &["sg-1".to_string()]
        ));
    }

    #[test]
    fn tag_diff_is_empty_when_equal() {
        let t = tags(&[("env", "prod"), ("owner", "cumulus")]);
        assert!(tag_diff(&t, &t.clone()).is_empty());
    }

    #[test]
    fn tag_diff_adds_missing_and_removes_stray() {
        let desired = tags(&[("env", "prod"), ("new", "1")]);
        let observed = tags(&[("env", "prod"), ("stray", "x")]);
        let diff = tag_diff(&desired, &observed);
        assert_eq!(diff.add, tags(&[("new", "1")]));
        assert_eq!(diff.remove, vec!["stray".to_string()]);
    }

    #[test]
    fn changed_value_appears_in_both_sets() {
        let desired = tags(&[("env", "prod")]);
        let observed = tags(&[("env", "staging")]);
        let diff = tag_diff(&desired, &observed);
        assert_eq!(diff.add, tags(&[("env", "prod")]));
        assert_eq!(diff.remove, vec!["env".to_string()]);
    }

    /// Applying remove(to_remove) then add(to_add) to the observed map must
    /// yield the desired map.
    #[test]
    fn remove_then_add_converges_to_desired() {
        let cases = [
            (tags(&[("a", "1")]), tags(&[])),
            (tags(&[]), tags(&[("a", "1")])),
            (tags(&[("a", "1"), ("b", "2")]), tags(&[("a", "9"), ("c", "3")])),
            (tags(&[("k", "v")]), tags(&[("k", "v")])),
        ];
        for (desired, observed) in cases {
            let diff = tag_diff(&desired, &observed);
            let mut state = observed.clone();
            for key in &diff.remove {
                state.remove(key);
            }
            state.extend(diff.add.clone());
            assert_eq!(state, desired, "observed={observed:?}");
        }
    }

    #[test]
    fn late_init_fills_only_null_fields() {
        let mut desired = None;
        assert!(late_init(&mut desired, Some(&3600)));
        assert_eq!(desired, Some(3600));

        // Already set: left alone even when observed differs
        let mut desired = Some(7200);
        assert!(!late_init(&mut desired, Some(&3600)));
        assert_eq!(desired, Some(7200));

        // Nothing observed: nothing to fill
        let mut desired: Option<i32> = None;
        assert!(!late_init(&mut desired, None));
        assert!(desired.is_none());
    }

    #[test]
    fn diff_string_is_structured() {
        let mut diff = Diff::new();
        assert!(diff.is_empty());
        diff.field("spec.forProvider.subnets", ["s-1", "s-2"], ["s-1"]);
        diff.note("tags: 1 to add, 0 to remove");
        assert!(!diff.is_empty());
        let rendered = diff.to_string();
        assert!(rendered.contains("spec.forProvider.subnets"));
        assert!(rendered.contains("tags: 1 to add"));
    }
}
