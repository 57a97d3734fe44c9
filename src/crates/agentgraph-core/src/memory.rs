//! Per-subject profiles kept in the long-term store
//!
//! A profile is one record per subject (customer, user) that outlives
//! conversations. It is read once when a conversation starts and rewritten
//! wholesale when it ends. There is no field-level merge: whatever produced
//! the new profile is responsible for carrying old fields forward.
//!
//! Concurrent conversations for the same subject race; the last
//! [`save_profile`] wins.

use crate::error::Result;
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Load the profile at `namespace`/`key`, or `T::default()` when absent
pub async fn load_profile<T>(store: &dyn Store, namespace: &[String], key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match store.get(namespace, key).await? {
        Some(item) => Ok(serde_json::from_value(item.value)?),
        None => {
            tracing::debug!(namespace = ?namespace, key, "no stored profile, using default");
            Ok(T::default())
        }
    }
}

/// Replace the profile at `namespace`/`key`
pub async fn save_profile<T: Serialize>(
    store: &dyn Store,
    namespace: &[String],
    key: &str,
    profile: &T,
) -> Result<()> {
    store.put(namespace, key, serde_json::to_value(profile)?).await?;
    Ok(())
}

/// Namespace `[scope, subject]` for a subject's profile
pub fn profile_namespace(scope: &str, subject: &str) -> Vec<String> {
    vec![scope.to_string(), subject.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Preferences {
        customer_id: String,
        music_preferences: Vec<String>,
    }

    #[tokio::test]
    async fn test_absent_profile_is_default() {
        let store = InMemoryStore::new();
        let ns = profile_namespace("memory_profile", "7");
        let profile: Preferences = load_profile(&store, &ns, "user_memory").await.unwrap();
        assert_eq!(profile, Preferences::default());
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_record() {
        let store = InMemoryStore::new();
        let ns = profile_namespace("memory_profile", "7");

        let first = Preferences {
            customer_id: "7".into(),
            music_preferences: vec!["rock".into(), "jazz".into()],
        };
        save_profile(&store, &ns, "user_memory", &first).await.unwrap();

        let second = Preferences {
            customer_id: "7".into(),
            music_preferences: vec!["blues".into()],
        };
        save_profile(&store, &ns, "user_memory", &second).await.unwrap();

        let loaded: Preferences = load_profile(&store, &ns, "user_memory").await.unwrap();
        assert_eq!(loaded, second);
    }

    #[tokio::test]
    async fn test_malformed_profile_is_an_error() {
        let store = InMemoryStore::new();
        let ns = profile_namespace("memory_profile", "7");
        store.put(&ns, "user_memory", serde_json::json!(42)).await.unwrap();
        let loaded: Result<Preferences> = load_profile(&store, &ns, "user_memory").await;
        assert!(loaded.is_err());
    }
}
