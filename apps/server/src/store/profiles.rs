use std::collections::HashMap;

use remus_shared::error::RemusError;
use remus_shared::ids::UserId;

use super::{db_err, ProfileRecord, Store};

impl Store {
    /// Create or refresh a profile on an authenticated touch. Also bumps
    /// `last_seen_at`, so callers need no separate touch.
    pub async fn upsert_profile(
        &self,
        id: &UserId,
        username: &str,
        email: Option<&str>,
    ) -> Result<ProfileRecord, RemusError> {
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO profiles (id, username, email, created_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 email = COALESCE(excluded.email, profiles.email),
                 last_seen_at = excluded.last_seen_at",
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        self.get_profile(id).await?.ok_or(RemusError::NotFound)
    }

    pub async fn get_profile(&self, id: &UserId) -> Result<Option<ProfileRecord>, RemusError> {
        sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, username, email, created_at, last_seen_at FROM profiles WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn profiles_by_ids(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, ProfileRecord>, RemusError> {
        let mut result = HashMap::new();
        if ids.is_empty() {
            return Ok(result);
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT id, username, email, created_at, last_seen_at FROM profiles WHERE id IN ({placeholders})"
        );
        let mut q = sqlx::query_as::<_, ProfileRecord>(&query);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(self.pool()).await.map_err(db_err)?;
        for row in rows {
            result.insert(row.id.clone(), row);
        }
        Ok(result)
    }

    pub async fn list_profiles(&self) -> Result<Vec<ProfileRecord>, RemusError> {
        sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, username, email, created_at, last_seen_at FROM profiles ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_creates_then_refreshes() {
        let store = Store::open_in_memory().await.unwrap();
        let id = UserId::from("auth-1");

        let first = store.upsert_profile(&id, "dax", None).await.unwrap();
        assert_eq!(first.username, "dax");
        assert!(first.last_seen_at.is_some());

        let second = store
            .upsert_profile(&id, "dax-renamed", Some("dax@example.com"))
            .await
            .unwrap();
        assert_eq!(second.username, "dax-renamed");
        assert_eq!(second.email.as_deref(), Some("dax@example.com"));
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn upsert_keeps_known_email_when_authority_omits_it() {
        let store = Store::open_in_memory().await.unwrap();
        let id = UserId::from("auth-2");
        store
            .upsert_profile(&id, "kira", Some("kira@example.com"))
            .await
            .unwrap();
        let refreshed = store.upsert_profile(&id, "kira", None).await.unwrap();
        assert_eq!(refreshed.email.as_deref(), Some("kira@example.com"));
    }

    #[tokio::test]
    async fn profiles_by_ids_returns_only_known() {
        let store = Store::open_in_memory().await.unwrap();
        store.upsert_profile(&UserId::from("a"), "a", None).await.unwrap();
        store.upsert_profile(&UserId::from("b"), "b", None).await.unwrap();

        let map = store
            .profiles_by_ids(&[UserId::from("a"), UserId::from("missing")])
            .await
            .unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&UserId::from("a")));
    }
}
