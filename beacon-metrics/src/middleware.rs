//! Tag processing applied to every metric before it reaches the backend.

use std::cell::RefCell;

use crate::metric::Tags;

/// Tag names that are never sent unless high cardinality tags are allowed.
const HIGH_CARDINALITY_TAGS: &[&str] = &["event", "project", "group"];

thread_local! {
    static GLOBAL_TAGS: RefCell<Vec<Tags>> = const { RefCell::new(Vec::new()) };
}

/// Pops the innermost tag scope when dropped, including during unwinding.
struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        GLOBAL_TAGS.with_borrow_mut(|stack| {
            stack.pop();
        });
    }
}

/// Runs `f` with additional tags applied to every metric emitted on the current thread.
///
/// Scopes nest. Tags of inner scopes override tags of outer scopes, and tags passed explicitly
/// to a metric override all global tags.
///
/// ```
/// use beacon_metrics::{Tags, current_global_tags, global_tags};
///
/// let tags = Tags::from([("task".to_owned(), "cleanup".to_owned())]);
/// global_tags(tags, || {
///     assert_eq!(current_global_tags()["task"], "cleanup");
/// });
/// assert!(current_global_tags().is_empty());
/// ```
pub fn global_tags<R>(tags: Tags, f: impl FnOnce() -> R) -> R {
    GLOBAL_TAGS.with_borrow_mut(|stack| stack.push(tags));
    let _guard = ScopeGuard;
    f()
}

/// Adds tags to the innermost global tag scope of the current thread.
///
/// Outside of [`global_tags`], the tags remain for the lifetime of the thread.
pub fn add_global_tags(tags: Tags) {
    GLOBAL_TAGS.with_borrow_mut(|stack| match stack.last_mut() {
        Some(scope) => scope.extend(tags),
        None => stack.push(tags),
    });
}

/// Returns all global tags in effect on the current thread.
pub fn current_global_tags() -> Tags {
    GLOBAL_TAGS.with_borrow(|stack| {
        stack
            .iter()
            .flatten()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    })
}

/// Returns `true` if a tag with this name is likely to have unbounded values.
pub fn is_high_cardinality_tag(name: &str) -> bool {
    name.ends_with("_id") || HIGH_CARDINALITY_TAGS.contains(&name)
}

/// Removes high cardinality tags from a metric.
pub fn filter_high_cardinality_tags(key: &str, tags: &mut Tags) {
    tags.retain(|name, _| {
        let keep = !is_high_cardinality_tag(name);
        if !keep {
            beacon_log::debug!(
                metric = key,
                tag = name.as_str(),
                "dropping high cardinality metric tag"
            );
        }
        keep
    });
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_nested_scopes() {
        global_tags(tags(&[("a", "1"), ("b", "1")]), || {
            global_tags(tags(&[("b", "2")]), || {
                assert_eq!(current_global_tags(), tags(&[("a", "1"), ("b", "2")]));
            });
            assert_eq!(current_global_tags(), tags(&[("a", "1"), ("b", "1")]));
        });
        assert!(current_global_tags().is_empty());
    }

    #[test]
    fn test_add_to_innermost_scope() {
        global_tags(Tags::new(), || {
            add_global_tags(tags(&[("c", "3")]));
            assert_eq!(current_global_tags(), tags(&[("c", "3")]));
        });
        assert!(current_global_tags().is_empty());
    }

    #[test]
    fn test_scope_popped_on_panic() {
        let fail = true;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            global_tags(tags(&[("a", "1")]), || {
                if fail {
                    panic!("boom");
                }
            });
        }));

        assert!(result.is_err());
        assert!(current_global_tags().is_empty());
    }

    #[test]
    fn test_filter_high_cardinality() {
        let mut metric_tags = tags(&[
            ("project", "1"),
            ("project_id", "1"),
            ("group", "2"),
            ("event", "3"),
            ("result", "success"),
            ("platform", "python"),
        ]);

        filter_high_cardinality_tags("jobs.started", &mut metric_tags);
        assert_eq!(
            metric_tags,
            tags(&[("platform", "python"), ("result", "success")])
        );
    }
}
