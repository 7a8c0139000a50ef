//! Idempotent finalizer edits on object metadata
//!
//! These only touch the in-memory object; the scope persists them.

use kube::core::ObjectMeta;

/// Whether `finalizer` is present
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add `finalizer` if missing. Returns true when the metadata changed.
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove `finalizer` if present. Returns true when the metadata changed.
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    before != finalizers.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut meta = ObjectMeta::default();
        assert!(add_finalizer(&mut meta, "a/b"));
        assert!(!add_finalizer(&mut meta, "a/b"));
        assert_eq!(meta.finalizers, Some(vec!["a/b".to_string()]));
    }

    #[test]
    fn remove_keeps_foreign_finalizers() {
        let mut meta = ObjectMeta {
            finalizers: Some(vec!["ours".to_string(), "theirs".to_string()]),
            ..Default::default()
        };
        assert!(remove_finalizer(&mut meta, "ours"));
        assert!(!remove_finalizer(&mut meta, "ours"));
        assert_eq!(meta.finalizers, Some(vec!["theirs".to_string()]));
    }

    #[test]
    fn remove_on_empty_metadata() {
        let mut meta = ObjectMeta::default();
        assert!(!remove_finalizer(&mut meta, "x"));
        assert!(!has_finalizer(&meta, "x"));
    }
}
