use std::collections::BTreeMap;
use std::path::Path;

use remus_shared::api::settings::SettingsView;
use remus_shared::error::RemusError;
use remus_shared::permissions::Permissions;
use serde::Deserialize;

use super::{db_err, Store};

/// Shape of the JSON document the pre-SQL builds persisted. Every section is
/// optional so partial exports still import.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LegacyExport {
    #[serde(default)]
    profiles: Vec<LegacyProfile>,
    #[serde(default)]
    guilds: Vec<LegacyGuild>,
    #[serde(default)]
    roles: Vec<LegacyRole>,
    #[serde(default)]
    members: Vec<LegacyMember>,
    #[serde(default)]
    channels: Vec<LegacyChannel>,
    #[serde(default)]
    messages: Vec<LegacyMessage>,
    #[serde(default)]
    uploads: Vec<LegacyUpload>,
    #[serde(default)]
    bans: Vec<LegacyBan>,
    #[serde(default)]
    audit: Vec<LegacyAudit>,
    #[serde(default)]
    settings: Option<SettingsView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyProfile {
    id: String,
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyGuild {
    id: String,
    name: String,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRole {
    id: String,
    guild_id: String,
    name: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    permissions: u64,
    #[serde(default)]
    hoist: bool,
    #[serde(default)]
    position: i64,
    #[serde(default)]
    icon_url: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMember {
    guild_id: String,
    user_id: String,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    role_ids: Vec<String>,
    #[serde(default)]
    joined_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    timeout_until: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    voice_muted: bool,
    #[serde(default)]
    voice_deafened: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyOverrideEntry {
    #[serde(default)]
    allow: u64,
    #[serde(default)]
    deny: u64,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyOverrides {
    #[serde(default)]
    roles: BTreeMap<String, LegacyOverrideEntry>,
    #[serde(default)]
    members: BTreeMap<String, LegacyOverrideEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyChannel {
    id: String,
    guild_id: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    position: Option<i64>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    permission_overrides: LegacyOverrides,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyAttachment {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMessage {
    id: String,
    channel_id: String,
    author_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<LegacyAttachment>,
    #[serde(default)]
    reply_to_id: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyUpload {
    id: String,
    channel_id: String,
    author_id: String,
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyBan {
    user_id: String,
    #[serde(default)]
    banned_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyAudit {
    #[serde(default)]
    id: Option<String>,
    guild_id: String,
    action: String,
    #[serde(default)]
    actor_id: Option<String>,
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One-shot import: runs only when the store has no guilds and no profiles.
/// The whole import is a single transaction; a failure leaves the database
/// untouched and the export file in place.
pub(super) async fn maybe_import(store: &Store, path: &Path) -> Result<bool, RemusError> {
    if !tables_empty(store).await? {
        return Ok(false);
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| RemusError::Internal(format!("read legacy export: {e}")))?;
    let export: LegacyExport = serde_json::from_str(&contents)
        .map_err(|e| RemusError::InvalidDatabase(format!("legacy export is not valid: {e}")))?;

    import(store, export).await?;
    tracing::info!(path = %path.display(), "imported legacy JSON export");
    Ok(true)
}

async fn tables_empty(store: &Store) -> Result<bool, RemusError> {
    let guilds: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM guilds")
        .fetch_one(store.pool())
        .await
        .map_err(db_err)?;
    let profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
        .fetch_one(store.pool())
        .await
        .map_err(db_err)?;
    Ok(guilds == 0 && profiles == 0)
}

async fn import(store: &Store, export: LegacyExport) -> Result<(), RemusError> {
    let now = chrono::Utc::now();
    let mut tx = store.pool().begin().await.map_err(db_err)?;

    for p in &export.profiles {
        sqlx::query(
            "INSERT INTO profiles (id, username, email, created_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&p.id)
        .bind(&p.username)
        .bind(&p.email)
        .bind(p.created_at.unwrap_or(now))
        .bind(p.last_seen_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    for g in &export.guilds {
        sqlx::query("INSERT INTO guilds (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(&g.id)
            .bind(&g.name)
            .bind(g.created_at.unwrap_or(now))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
    }

    for r in &export.roles {
        sqlx::query(
            "INSERT INTO roles (id, guild_id, name, color, permissions, hoist, position, icon_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&r.id)
        .bind(&r.guild_id)
        .bind(&r.name)
        .bind(r.color.as_deref().unwrap_or("#99aab5"))
        .bind(Permissions::from_bits_truncate(r.permissions))
        .bind(r.hoist)
        .bind(r.position)
        .bind(&r.icon_url)
        .bind(r.created_at.unwrap_or(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    for m in &export.members {
        sqlx::query(
            "INSERT INTO members (guild_id, user_id, nickname, joined_at, timeout_until, voice_muted, voice_deafened)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&m.guild_id)
        .bind(&m.user_id)
        .bind(&m.nickname)
        .bind(m.joined_at.unwrap_or(now))
        .bind(m.timeout_until)
        .bind(m.voice_muted)
        .bind(m.voice_deafened)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for role_id in &m.role_ids {
            // The implicit @everyone membership is normalized on read, not
            // stored.
            if role_id == &m.guild_id {
                continue;
            }
            sqlx::query(
                "INSERT OR IGNORE INTO member_roles (guild_id, user_id, role_id) VALUES (?1, ?2, ?3)",
            )
            .bind(&m.guild_id)
            .bind(&m.user_id)
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
    }

    for c in &export.channels {
        sqlx::query(
            "INSERT INTO channels (id, guild_id, name, kind, category_id, position, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&c.id)
        .bind(&c.guild_id)
        .bind(&c.name)
        .bind(&c.kind)
        .bind(&c.category_id)
        .bind(c.position.unwrap_or(0))
        .bind(&c.created_by)
        .bind(c.created_at.unwrap_or(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for (role_id, entry) in &c.permission_overrides.roles {
            insert_override(&mut tx, &c.id, "role", role_id, entry).await?;
        }
        for (user_id, entry) in &c.permission_overrides.members {
            insert_override(&mut tx, &c.id, "member", user_id, entry).await?;
        }
    }

    for m in &export.messages {
        sqlx::query(
            "INSERT INTO messages (id, channel_id, author_id, content, reply_to_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&m.id)
        .bind(&m.channel_id)
        .bind(&m.author_id)
        .bind(&m.content)
        .bind(&m.reply_to_id)
        .bind(m.created_at.unwrap_or(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for (position, a) in m.attachments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO message_attachments (message_id, position, upload_id, name, size, mime_type, url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&m.id)
            .bind(position as i64)
            .bind(&a.id)
            .bind(&a.name)
            .bind(a.size)
            .bind(&a.mime_type)
            .bind(&a.url)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
    }

    for u in &export.uploads {
        sqlx::query(
            "INSERT INTO uploads (id, channel_id, author_id, name, size, mime_type, url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&u.id)
        .bind(&u.channel_id)
        .bind(&u.author_id)
        .bind(&u.name)
        .bind(u.size)
        .bind(&u.mime_type)
        .bind(&u.url)
        .bind(u.created_at.unwrap_or(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    for b in &export.bans {
        sqlx::query("INSERT INTO bans (user_id, banned_at, reason) VALUES (?1, ?2, ?3)")
            .bind(&b.user_id)
            .bind(b.banned_at.unwrap_or(now))
            .bind(&b.reason)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
    }

    for a in &export.audit {
        sqlx::query(
            "INSERT INTO audit (id, guild_id, action, actor_id, target_id, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(
            a.id.clone()
                .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
        )
        .bind(&a.guild_id)
        .bind(&a.action)
        .bind(&a.actor_id)
        .bind(&a.target_id)
        .bind(a.data.to_string())
        .bind(a.created_at.unwrap_or(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    }

    if let Some(settings) = &export.settings {
        let value = serde_json::to_string(settings)
            .map_err(|e| RemusError::Internal(format!("encode settings: {e}")))?;
        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES ('settings', ?1)")
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
    }

    tx.commit().await.map_err(db_err)?;
    Ok(())
}

async fn insert_override(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    channel_id: &str,
    target_kind: &str,
    target_id: &str,
    entry: &LegacyOverrideEntry,
) -> Result<(), RemusError> {
    let allow = Permissions::from_bits_truncate(entry.allow);
    let deny = Permissions::from_bits_truncate(entry.deny) - allow;
    if allow.is_empty() && deny.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO channel_overrides (channel_id, target_kind, target_id, allow, deny)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(channel_id)
    .bind(target_kind)
    .bind(target_id)
    .bind(allow)
    .bind(deny)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}
