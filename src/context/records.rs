//! Read-through accessors for preferences, project maps and project knowledge
//!
//! All three record types change rarely, so each lookup is cached for a
//! configurable TTL. A cache miss costs exactly one store query. Absence is
//! cached as well: a project without a map does not hit the store on every
//! assembly.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::assembler::USER_PREFERENCES_HEADER;
use super::clip;
use crate::config::ContextConfig;
use crate::error::Result;
use crate::model::{ProjectKnowledge, ProjectMap, UserPreferences};
use crate::store::ContextStore;

struct RecordCache<K, V> {
    ttl: Duration,
    inner: Mutex<CacheState<K, V>>,
}

struct CacheState<K, V> {
    entries: HashMap<K, (Instant, Option<V>)>,
    /// Bumped on invalidation; a load started under an older generation is not cached
    generations: HashMap<K, u64>,
}

impl<K: Eq + Hash + Clone, V: Clone> RecordCache<K, V> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheState {
                entries: HashMap::new(),
                generations: HashMap::new(),
            }),
        }
    }

    /// The lock is not held while `load` runs
    fn get_or_load<F>(&self, key: &K, load: F) -> Result<Option<V>>
    where
        F: FnOnce() -> Result<Option<V>>,
    {
        if self.ttl.is_zero() {
            return load();
        }

        let generation = {
            let mut state = self.inner.lock();
            let fresh = state
                .entries
                .get(key)
                .filter(|(loaded_at, _)| loaded_at.elapsed() < self.ttl)
                .map(|(_, value)| value.clone());
            if let Some(value) = fresh {
                return Ok(value);
            }
            state.entries.remove(key);
            state.generations.get(key).copied().unwrap_or(0)
        };

        let value = load()?;

        let mut state = self.inner.lock();
        if state.generations.get(key).copied().unwrap_or(0) == generation {
            state
                .entries
                .insert(key.clone(), (Instant::now(), value.clone()));
        }
        Ok(value)
    }

    fn invalidate(&self, key: &K) {
        let mut state = self.inner.lock();
        state.entries.remove(key);
        *state.generations.entry(key.clone()).or_insert(0) += 1;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

pub struct Accessors {
    store: ContextStore,
    user_context_max_chars: usize,
    preferences: RecordCache<String, UserPreferences>,
    maps: RecordCache<i64, ProjectMap>,
    knowledge: RecordCache<i64, ProjectKnowledge>,
}

impl Accessors {
    pub fn new(store: ContextStore, config: &ContextConfig) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        Self {
            store,
            user_context_max_chars: config.user_context_max_chars,
            preferences: RecordCache::new(ttl),
            maps: RecordCache::new(ttl),
            knowledge: RecordCache::new(ttl),
        }
    }

    pub fn get_user_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        self.preferences
            .get_or_load(&user_id.to_string(), || self.store.get_user_preferences(user_id))
    }

    pub fn get_project_map(&self, project_id: i64) -> Result<Option<ProjectMap>> {
        self.maps
            .get_or_load(&project_id, || self.store.get_project_map(project_id))
    }

    pub fn get_project_knowledge(&self, project_id: i64) -> Result<Option<ProjectKnowledge>> {
        self.knowledge
            .get_or_load(&project_id, || self.store.get_project_knowledge(project_id))
    }

    /// Render the user's preferences as a bounded block
    ///
    /// Returns an empty string when the user has no preferences, and also when
    /// the store cannot be read: personalization is optional.
    pub fn build_user_context(&self, user_id: &str) -> String {
        match self.get_user_preferences(user_id) {
            Ok(Some(prefs)) => render_preferences(&prefs, self.user_context_max_chars),
            Ok(None) => {
                debug!(user_id, "no stored preferences");
                String::new()
            }
            Err(e) => {
                warn!(user_id, error = %e, "preferences unavailable, omitting");
                String::new()
            }
        }
    }

    pub fn invalidate_user(&self, user_id: &str) {
        self.preferences.invalidate(&user_id.to_string());
    }

    pub fn invalidate_project(&self, project_id: i64) {
        self.maps.invalidate(&project_id);
        self.knowledge.invalidate(&project_id);
    }
}

fn render_preferences(prefs: &UserPreferences, max_chars: usize) -> String {
    if prefs.is_blank() {
        return String::new();
    }

    let mut block = String::from(USER_PREFERENCES_HEADER);
    let fields = [
        ("Preferred language", &prefs.language),
        ("Skill level", &prefs.skill_level),
        ("Style notes", &prefs.style_notes),
    ];
    for (label, value) in fields {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            block.push_str(&format!("\n{label}: {value}"));
        }
    }

    clip(&block, max_chars)
}
