//! Session, identity and mbox-cache state for one delivery client.
//!
//! Identity and session fields are read-through/write-through against the
//! [`DataStore`]: nothing here caches them in memory. Mbox caches and the
//! notification queue live only as long as the owning client.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use tracing::trace;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ConfigSnapshot;
use crate::config::PrivacyStatus;
use crate::json::is_empty_json;
use crate::json::non_blank;
use crate::store::DataStore;

pub(crate) const TNT_ID_KEY: &str = "TNT_ID";
pub(crate) const THIRD_PARTY_ID_KEY: &str = "THIRD_PARTY_ID";
pub(crate) const SESSION_ID_KEY: &str = "SESSION_ID";
pub(crate) const SESSION_TIMESTAMP_KEY: &str = "SESSION_TIMESTAMP";
pub(crate) const EDGE_HOST_KEY: &str = "EDGE_HOST";

pub const SHARED_STATE_TNT_ID: &str = "tntid";
pub const SHARED_STATE_THIRD_PARTY_ID: &str = "thirdpartyid";

const EDGE_HOST_PREFIX: &str = "mboxedge";
const EDGE_HOST_SUFFIX: &str = ".tt.omtrdc.net";

pub type MboxCache = HashMap<String, Value>;

/// Regional edge host encoded in a tntId of the form `<uuid>.<hint>_<rest>`.
///
/// Only an all-digit location hint yields a host.
pub fn edge_host_for_tnt_id(tnt_id: &str) -> Option<String> {
    let (uuid, tail) = tnt_id.split_once('.')?;
    let (hint, _) = tail.split_once('_')?;
    if uuid.is_empty() || hint.is_empty() || !hint.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{EDGE_HOST_PREFIX}{hint}{EDGE_HOST_SUFFIX}"))
}

pub struct StateStore {
    store: Arc<dyn DataStore>,
    clock: Arc<dyn Clock>,
    config: Option<ConfigSnapshot>,
    prefetched: MboxCache,
    loaded: MboxCache,
    notifications: Vec<Value>,
}

impl StateStore {
    pub fn new(store: Arc<dyn DataStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            config: None,
            prefetched: MboxCache::new(),
            loaded: MboxCache::new(),
            notifications: Vec::new(),
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    // ---- configuration ----

    /// Current configuration, or defaults before the first update.
    pub fn config(&self) -> ConfigSnapshot {
        self.config.clone().unwrap_or_default()
    }

    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }

    pub fn client_code(&self) -> String {
        self.config
            .as_ref()
            .map(|c| c.client_code.clone())
            .unwrap_or_default()
    }

    pub fn privacy_status(&self) -> PrivacyStatus {
        self.config
            .as_ref()
            .map(|c| c.privacy_status)
            .unwrap_or_default()
    }

    pub fn update_config(&mut self, config: ConfigSnapshot) {
        let opted_out = config.privacy_status == PrivacyStatus::OptOut;
        let previous = self.config.replace(config);
        let client_code_changed = previous.is_some_and(|prev| {
            !prev.client_code.is_empty() && prev.client_code != self.client_code()
        });

        if client_code_changed {
            debug!("Client code changed, resetting session and edge host");
            self.reset_session();
            self.update_edge_host(None);
        }
        if opted_out {
            debug!("Privacy opted out, clearing visitor identifiers");
            self.update_tnt_id(None);
            self.set_third_party_id(None);
            self.update_edge_host(None);
        }
    }

    // ---- session ----

    fn session_timeout_millis(&self) -> i64 {
        let millis = self.config().session_timeout_secs.saturating_mul(1000);
        i64::try_from(millis).unwrap_or(i64::MAX)
    }

    fn session_timestamp(&self) -> i64 {
        self.store
            .get_long(SESSION_TIMESTAMP_KEY)
            .unwrap_or_default()
    }

    pub fn is_session_expired(&self) -> bool {
        let timestamp = self.session_timestamp();
        timestamp > 0
            && self.clock.now_millis().saturating_sub(timestamp) > self.session_timeout_millis()
    }

    /// Current session id; issues and persists a fresh one when none is
    /// stored, the timestamp was reset, or the session timed out.
    pub fn session_id(&self) -> String {
        let stored = self.store.get_string(SESSION_ID_KEY);
        let expired = self.is_session_expired();
        match stored {
            Some(id) if !id.trim().is_empty() && !expired && self.session_timestamp() > 0 => id,
            _ => {
                if expired {
                    self.update_edge_host(None);
                }
                let id = Uuid::new_v4().to_string();
                trace!("Issuing session id {id}");
                self.store.set_string(SESSION_ID_KEY, &id);
                self.touch_session(false);
                id
            }
        }
    }

    /// `reset = true` drops the timestamp so the next read issues a new id.
    pub fn touch_session(&self, reset: bool) {
        if reset {
            trace!("Removing session timestamp");
            self.store.remove(SESSION_TIMESTAMP_KEY);
        } else {
            self.store
                .set_long(SESSION_TIMESTAMP_KEY, self.clock.now_millis());
        }
    }

    pub fn set_session_id(&self, session_id: Option<&str>) {
        match non_blank(session_id) {
            Some(id) => {
                self.store.set_string(SESSION_ID_KEY, id);
                self.touch_session(false);
            }
            None => self.store.remove(SESSION_ID_KEY),
        }
    }

    pub fn reset_session(&self) {
        self.store.remove(SESSION_ID_KEY);
        self.touch_session(true);
    }

    // ---- identity ----

    pub fn tnt_id(&self) -> Option<String> {
        self.store
            .get_string(TNT_ID_KEY)
            .filter(|id| !id.trim().is_empty())
    }

    /// Persists a new tntId and derives the edge host from it.
    pub fn update_tnt_id(&self, tnt_id: Option<&str>) {
        let tnt_id = non_blank(tnt_id);
        if self.tnt_id().as_deref() == tnt_id {
            return;
        }
        match tnt_id {
            Some(id) => {
                debug!("Persisting tntId {id}");
                self.store.set_string(TNT_ID_KEY, id);
            }
            None => {
                debug!("Removing tntId from the data store");
                self.store.remove(TNT_ID_KEY);
            }
        }
        let edge_host = tnt_id.and_then(edge_host_for_tnt_id);
        self.update_edge_host(edge_host.as_deref());
    }

    pub fn third_party_id(&self) -> Option<String> {
        self.store
            .get_string(THIRD_PARTY_ID_KEY)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn set_third_party_id(&self, third_party_id: Option<&str>) {
        match non_blank(third_party_id) {
            Some(id) => self.store.set_string(THIRD_PARTY_ID_KEY, id),
            None => self.store.remove(THIRD_PARTY_ID_KEY),
        }
    }

    /// Edge host; cleared first if the session has expired.
    pub fn edge_host(&self) -> Option<String> {
        if self.is_session_expired() {
            debug!("Session expired, dropping cached edge host");
            self.update_edge_host(None);
        }
        self.store
            .get_string(EDGE_HOST_KEY)
            .filter(|host| !host.trim().is_empty())
    }

    pub fn update_edge_host(&self, edge_host: Option<&str>) {
        let edge_host = non_blank(edge_host);
        let current = self.store.get_string(EDGE_HOST_KEY);
        if current.as_deref() == edge_host {
            return;
        }
        match edge_host {
            Some(host) => self.store.set_string(EDGE_HOST_KEY, host),
            None => self.store.remove(EDGE_HOST_KEY),
        }
    }

    pub fn reset_identities(&self) {
        self.update_tnt_id(None);
        self.set_third_party_id(None);
        self.update_edge_host(None);
        self.reset_session();
    }

    /// `{tntid, thirdpartyid}` with blank values left out.
    pub fn generate_shared_state(&self) -> HashMap<String, String> {
        let mut state = HashMap::new();
        if let Some(tnt_id) = self.tnt_id() {
            state.insert(SHARED_STATE_TNT_ID.to_string(), tnt_id);
        }
        if let Some(third_party_id) = self.third_party_id() {
            state.insert(SHARED_STATE_THIRD_PARTY_ID.to_string(), third_party_id);
        }
        state
    }

    // ---- mbox caches ----

    pub fn prefetched_mboxes(&self) -> &MboxCache {
        &self.prefetched
    }

    pub fn loaded_mboxes(&self) -> &MboxCache {
        &self.loaded
    }

    pub fn merge_prefetched(&mut self, mboxes: MboxCache) {
        if mboxes.is_empty() {
            return;
        }
        self.prefetched.extend(mboxes);
    }

    pub fn save_loaded(&mut self, mboxes: MboxCache) {
        for (name, mbox) in mboxes {
            if name.trim().is_empty() || is_empty_json(&mbox) || self.prefetched.contains_key(&name)
            {
                continue;
            }
            self.loaded.insert(name, mbox);
        }
    }

    pub fn remove_duplicate_loaded(&mut self) {
        let prefetched = &self.prefetched;
        self.loaded.retain(|name, _| !prefetched.contains_key(name));
    }

    pub fn clear_prefetched(&mut self) {
        self.prefetched.clear();
    }

    // ---- notifications ----

    pub fn add_notification(&mut self, notification: Value) {
        if is_empty_json(&notification) {
            return;
        }
        self.notifications.push(notification);
    }

    pub fn notifications(&self) -> &[Value] {
        &self.notifications
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryDataStore;
    use maplit::hashmap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const START: i64 = 1_700_000_000_000;

    fn state() -> (StateStore, Arc<InMemoryDataStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryDataStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let mut state = StateStore::new(store.clone(), clock.clone());
        state.update_config(ConfigSnapshot::default().with_client_code("acme"));
        (state, store, clock)
    }

    #[test]
    fn edge_host_follows_location_hint() {
        assert_eq!(
            edge_host_for_tnt_id("66E5C681-4F70-41A2-86AE-F1E151443B10.32_0"),
            Some("mboxedge32.tt.omtrdc.net".to_string())
        );
        assert_eq!(
            edge_host_for_tnt_id("66E5C681-4F70-41A2-86AE-F1E151443B10.a1a_0"),
            None
        );
        assert_eq!(edge_host_for_tnt_id("66E5C681-4F70-41A2-86AE-F1E151443B10"), None);
        assert_eq!(edge_host_for_tnt_id("uuid._0"), None);
    }

    #[test]
    fn huge_session_timeout_never_expires() {
        let (mut state, _, clock) = state();
        let mut config = ConfigSnapshot::default().with_client_code("acme");
        config.session_timeout_secs = 10_000_000_000_000_000;
        state.update_config(config);

        let first = state.session_id();
        clock.advance_secs(365 * 24 * 60 * 60);
        assert!(!state.is_session_expired());
        assert_eq!(state.session_id(), first);
    }

    #[test]
    fn session_id_is_stable_within_timeout() {
        let (state, _, clock) = state();
        let first = state.session_id();
        clock.advance_secs(1799);
        assert_eq!(state.session_id(), first);
    }

    #[test]
    fn session_id_rotates_after_timeout() {
        let (state, store, clock) = state();
        let first = state.session_id();
        clock.advance_secs(1801);
        let second = state.session_id();
        assert_ne!(second, first);
        assert_eq!(store.get_string(SESSION_ID_KEY), Some(second));
        assert_eq!(store.get_long(SESSION_TIMESTAMP_KEY), Some(START + 1_801_000));
    }

    #[test]
    fn resetting_the_timestamp_forces_a_new_session() {
        let (state, _, _) = state();
        let first = state.session_id();
        state.touch_session(true);
        assert_ne!(state.session_id(), first);
    }

    #[test]
    fn tnt_id_update_derives_edge_host() {
        let (state, store, _) = state();
        state.update_tnt_id(Some("66E5C681-4F70-41A2-86AE-F1E151443B10.32_0"));
        assert_eq!(state.edge_host(), Some("mboxedge32.tt.omtrdc.net".to_string()));

        state.update_tnt_id(Some("66E5C681-4F70-41A2-86AE-F1E151443B10.a1a_0"));
        assert_eq!(state.edge_host(), None);
        assert!(!store.contains(EDGE_HOST_KEY));

        state.update_tnt_id(None);
        assert_eq!(state.tnt_id(), None);
        assert!(!store.contains(TNT_ID_KEY));
    }

    #[test]
    fn expired_session_drops_edge_host() {
        let (state, _, clock) = state();
        state.session_id();
        state.update_edge_host(Some("mboxedge35.tt.omtrdc.net"));
        clock.advance_secs(1801);
        assert_eq!(state.edge_host(), None);
    }

    #[test]
    fn client_code_change_resets_session_and_edge_host() {
        let (mut state, store, _) = state();
        let session = state.session_id();
        state.update_edge_host(Some("mboxedge35.tt.omtrdc.net"));

        state.update_config(ConfigSnapshot::default().with_client_code("acme"));
        assert_eq!(state.session_id(), session);
        assert!(store.contains(EDGE_HOST_KEY));

        state.update_config(ConfigSnapshot::default().with_client_code("other"));
        assert!(!store.contains(EDGE_HOST_KEY));
        assert_ne!(state.session_id(), session);
    }

    #[test]
    fn opt_out_clears_identifiers() {
        let (mut state, _, _) = state();
        state.update_tnt_id(Some("66E5C681-4F70-41A2-86AE-F1E151443B10.32_0"));
        state.set_third_party_id(Some("third"));
        state.update_config(
            ConfigSnapshot::default()
                .with_client_code("acme")
                .with_privacy_status(PrivacyStatus::OptOut),
        );
        assert_eq!(state.tnt_id(), None);
        assert_eq!(state.third_party_id(), None);
        assert_eq!(state.edge_host(), None);
    }

    #[test]
    fn shared_state_omits_blank_values() {
        let (state, _, _) = state();
        assert!(state.generate_shared_state().is_empty());
        state.set_third_party_id(Some("third"));
        assert_eq!(
            state.generate_shared_state(),
            hashmap! {"thirdpartyid".to_string() => "third".to_string()}
        );
    }

    #[test]
    fn loaded_cache_yields_to_prefetch() {
        let (mut state, _, _) = state();
        state.merge_prefetched(hashmap! {"a".to_string() => json!({"name": "a"})});
        state.save_loaded(hashmap! {
            "a".to_string() => json!({"name": "a", "loaded": true}),
            "b".to_string() => json!({"name": "b"}),
            " ".to_string() => json!({"name": " "}),
            "c".to_string() => json!({}),
        });
        assert_eq!(
            state.loaded_mboxes(),
            &hashmap! {"b".to_string() => json!({"name": "b"})}
        );

        state.merge_prefetched(hashmap! {"b".to_string() => json!({"name": "b", "v": 2})});
        state.remove_duplicate_loaded();
        assert!(state.loaded_mboxes().is_empty());
        assert_eq!(state.prefetched_mboxes().len(), 2);
    }

    #[test]
    fn notifications_ignore_empty_json() {
        let (mut state, _, _) = state();
        state.add_notification(json!({}));
        state.add_notification(Value::Null);
        state.add_notification(json!({"id": "1"}));
        assert_eq!(state.notifications(), &[json!({"id": "1"})]);
        state.clear_notifications();
        assert!(state.notifications().is_empty());
    }
}
