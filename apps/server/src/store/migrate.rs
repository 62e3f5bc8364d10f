use std::path::{Path, PathBuf};

use remus_shared::error::RemusError;
use sqlx::SqlitePool;

use super::db_err;

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// Schema statements. Late columns (`channels.position`,
/// `messages.reply_to_id`) are intentionally absent here and added by
/// table-info probes so databases created by earlier builds migrate in place.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS profiles (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        email TEXT,
        created_at TEXT NOT NULL,
        last_seen_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS guilds (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS roles (
        id TEXT PRIMARY KEY,
        guild_id TEXT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        color TEXT NOT NULL DEFAULT '#99aab5',
        permissions INTEGER NOT NULL DEFAULT 0,
        hoist INTEGER NOT NULL DEFAULT 0,
        position INTEGER NOT NULL DEFAULT 0,
        icon_url TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS members (
        guild_id TEXT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        nickname TEXT,
        joined_at TEXT NOT NULL,
        timeout_until TEXT,
        voice_muted INTEGER NOT NULL DEFAULT 0,
        voice_deafened INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (guild_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS member_roles (
        guild_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        role_id TEXT NOT NULL,
        PRIMARY KEY (guild_id, user_id, role_id),
        FOREIGN KEY (guild_id, user_id) REFERENCES members(guild_id, user_id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS channels (
        id TEXT PRIMARY KEY,
        guild_id TEXT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        category_id TEXT,
        created_by TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS channel_overrides (
        channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
        target_kind TEXT NOT NULL,
        target_id TEXT NOT NULL,
        allow INTEGER NOT NULL DEFAULT 0,
        deny INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (channel_id, target_kind, target_id)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
        author_id TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS message_attachments (
        message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        upload_id TEXT NOT NULL,
        name TEXT NOT NULL,
        size INTEGER NOT NULL,
        mime_type TEXT NOT NULL,
        url TEXT NOT NULL,
        PRIMARY KEY (message_id, position)
    )",
    "CREATE TABLE IF NOT EXISTS uploads (
        id TEXT PRIMARY KEY,
        channel_id TEXT NOT NULL,
        author_id TEXT NOT NULL,
        name TEXT NOT NULL,
        size INTEGER NOT NULL,
        mime_type TEXT NOT NULL,
        url TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bans (
        user_id TEXT PRIMARY KEY,
        banned_at TEXT NOT NULL,
        reason TEXT
    )",
    "CREATE TABLE IF NOT EXISTS audit (
        id TEXT PRIMARY KEY,
        guild_id TEXT NOT NULL,
        action TEXT NOT NULL,
        actor_id TEXT,
        target_id TEXT,
        data TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_channel_created
        ON messages (channel_id, created_at, id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_author ON messages (author_id)",
    "CREATE INDEX IF NOT EXISTS idx_uploads_channel ON uploads (channel_id)",
    "CREATE INDEX IF NOT EXISTS idx_uploads_author ON uploads (author_id)",
    "CREATE INDEX IF NOT EXISTS idx_audit_guild_created ON audit (guild_id, created_at, id)",
    "CREATE INDEX IF NOT EXISTS idx_channels_guild ON channels (guild_id)",
    "CREATE INDEX IF NOT EXISTS idx_roles_guild ON roles (guild_id)",
];

/// Inspect the database file before SQLite touches it. A file that is
/// neither empty nor a SQLite database is either a legacy JSON export
/// (copied aside and the original renamed to a timestamped backup) or
/// corruption (fatal).
///
/// Returns the path of a legacy export to import, if one is waiting.
pub(super) fn salvage_if_not_sqlite(db_file: &Path) -> Result<Option<PathBuf>, RemusError> {
    let legacy_path = db_file.with_extension("legacy.json");

    let bytes = match std::fs::read(db_file) {
        Ok(bytes) => bytes,
        // Missing file: fresh install, but a legacy export from a previous
        // salvage may still be pending import.
        Err(_) => return Ok(legacy_path.exists().then_some(legacy_path)),
    };

    if bytes.is_empty() || bytes.starts_with(SQLITE_MAGIC) {
        return Ok(legacy_path.exists().then_some(legacy_path));
    }

    let looks_like_json = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map(|b| *b == b'{')
        .unwrap_or(false);
    if !looks_like_json {
        return Err(RemusError::InvalidDatabase(format!(
            "{} is neither a SQLite database nor a JSON export",
            db_file.display()
        )));
    }

    std::fs::copy(db_file, &legacy_path)
        .map_err(|e| RemusError::Internal(format!("copy legacy export: {e}")))?;
    let backup = db_file.with_extension(format!("{}.bak", chrono::Utc::now().timestamp()));
    std::fs::rename(db_file, &backup)
        .map_err(|e| RemusError::Internal(format!("back up legacy file: {e}")))?;
    tracing::warn!(
        legacy = %legacy_path.display(),
        backup = %backup.display(),
        "database file contained a JSON export; moved aside for import"
    );
    Ok(Some(legacy_path))
}

/// Create missing tables and indices, then add late columns guarded by
/// `PRAGMA table_info` probes.
pub(super) async fn run(pool: &SqlitePool) -> Result<(), RemusError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await.map_err(db_err)?;
    }

    if !table_has_column(pool, "channels", "position").await? {
        sqlx::query("ALTER TABLE channels ADD COLUMN position INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await
            .map_err(db_err)?;
        tracing::info!("migration: added channels.position");
    }
    if !table_has_column(pool, "messages", "reply_to_id").await? {
        sqlx::query("ALTER TABLE messages ADD COLUMN reply_to_id TEXT")
            .execute(pool)
            .await
            .map_err(db_err)?;
        tracing::info!("migration: added messages.reply_to_id");
    }

    Ok(())
}

pub(super) async fn table_has_column(
    pool: &SqlitePool,
    table: &str,
    column: &str,
) -> Result<bool, RemusError> {
    let columns: Vec<String> = sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{table}')"))
        .fetch_all(pool)
        .await
        .map_err(db_err)?;
    Ok(columns.iter().any(|c| c == column))
}

/// Assign sequential positions within each `(guild_id, category_id)` group,
/// in `created_at` order, to rows migration left at the column default.
pub(super) async fn backfill_positions(pool: &SqlitePool) -> Result<(), RemusError> {
    #[derive(sqlx::FromRow)]
    struct GroupRow {
        guild_id: String,
        category_id: Option<String>,
    }

    let needs_backfill: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM channels c
         WHERE c.position = 0
           AND 1 < (SELECT COUNT(*) FROM channels o
                    WHERE o.guild_id = c.guild_id
                      AND o.category_id IS c.category_id
                      AND o.position = 0)",
    )
    .fetch_one(pool)
    .await
    .map_err(db_err)?;
    if needs_backfill == 0 {
        return Ok(());
    }

    let mut tx = pool.begin().await.map_err(db_err)?;
    let groups: Vec<GroupRow> = sqlx::query_as(
        "SELECT DISTINCT guild_id, category_id FROM channels",
    )
    .fetch_all(&mut *tx)
    .await
    .map_err(db_err)?;

    for group in groups {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM channels
             WHERE guild_id = ?1 AND category_id IS ?2
             ORDER BY created_at, id",
        )
        .bind(&group.guild_id)
        .bind(&group.category_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        for (position, id) in ids.iter().enumerate() {
            sqlx::query("UPDATE channels SET position = ?1 WHERE id = ?2")
                .bind(position as i64)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
    }
    tx.commit().await.map_err(db_err)?;
    tracing::info!("migration: backfilled channel positions");
    Ok(())
}
