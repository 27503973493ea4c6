//! Name-keyed registry for `workFn` and `conditionFn` callables (§9:
//! "Callable fields" — closures are not serializable and should not cross
//! the persistence boundary, so definitions reference callables by name).

use crate::token::Token;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A service/script activity's work function: takes the incoming token's
/// data, returns a patch to right-biased-merge into it, or an error
/// message if the work failed.
pub type WorkFn = Arc<dyn Fn(&Token) -> Result<Map<String, Value>, String> + Send + Sync>;

/// An exclusive/inclusive gateway's per-candidate predicate.
pub type ConditionFn = Arc<dyn Fn(&Token, &str) -> bool + Send + Sync>;

/// Holds every named `workFn`/`conditionFn` an engine's definitions may
/// reference.
#[derive(Clone, Default)]
pub struct CallableRegistry {
    work_fns: HashMap<String, WorkFn>,
    condition_fns: HashMap<String, ConditionFn>,
}

impl CallableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_work_fn(&mut self, name: impl Into<String>, f: WorkFn) {
        self.work_fns.insert(name.into(), f);
    }

    pub fn register_condition_fn(&mut self, name: impl Into<String>, f: ConditionFn) {
        self.condition_fns.insert(name.into(), f);
    }

    #[must_use]
    pub fn work_fn(&self, name: &str) -> Option<WorkFn> {
        self.work_fns.get(name).cloned()
    }

    #[must_use]
    pub fn condition_fn(&self, name: &str) -> Option<ConditionFn> {
        self.condition_fns.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_resolves_work_fn() {
        let mut registry = CallableRegistry::new();
        registry.register_work_fn(
            "mark_processed",
            Arc::new(|_token: &Token| Ok(Map::from_iter([("processed".to_string(), Value::from(true))]))),
        );

        let work_fn = registry.work_fn("mark_processed").expect("registered");
        let token = Token::new(Map::new());
        let patch = work_fn(&token).unwrap();
        assert_eq!(patch.get("processed"), Some(&Value::from(true)));
    }

    #[test]
    fn unregistered_name_resolves_to_none() {
        let registry = CallableRegistry::new();
        assert!(registry.work_fn("missing").is_none());
        assert!(registry.condition_fn("missing").is_none());
    }
}
