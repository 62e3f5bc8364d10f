use std::path::Path;
use std::sync::Arc;

use remus_shared::api::channel::{
    ChannelKind, ChannelView, OverrideEntry, PermissionOverridesView,
};
use remus_shared::api::member::{BanView, MemberView};
use remus_shared::api::role::RoleView;
use remus_shared::api::upload::{AttachmentView, UploadView};
use remus_shared::api::user::ProfileView;
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, GuildId, MessageId, RoleId, UploadId, UserId};
use remus_shared::permissions::Permissions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

mod channels;
mod guilds;
mod legacy;
mod members;
mod messages;
mod migrate;
mod moderation;
mod profiles;
mod roles;
mod uploads;

pub use moderation::AuditRecord;

/// Durable relational store. All rows are owned here; callers go through the
/// typed operations and never touch the pool directly.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
    node_guild: Arc<std::sync::OnceLock<GuildId>>,
}

pub(crate) fn db_err(e: sqlx::Error) -> RemusError {
    tracing::error!(error = %e, "database error");
    RemusError::Internal("database error".into())
}

impl Store {
    /// Bring up the store against a database file: salvage a legacy JSON
    /// export masquerading as the db, open with WAL + foreign keys, migrate,
    /// backfill, run the one-shot legacy import, and seed the node guild.
    pub async fn open(db_file: &Path, guild_name: &str) -> Result<Self, RemusError> {
        if let Some(parent) = db_file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RemusError::Internal(format!("create data dir: {e}")))?;
        }

        let legacy_export = migrate::salvage_if_not_sqlite(db_file)?;

        let options = SqliteConnectOptions::new()
            .filename(db_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self {
            pool,
            node_guild: Arc::new(std::sync::OnceLock::new()),
        };
        store.initialize(guild_name, legacy_export).await?;
        Ok(store)
    }

    /// In-memory store for tests and tooling. Runs the same bring-up minus
    /// the file salvage step.
    pub async fn open_in_memory() -> Result<Self, RemusError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        let store = Self {
            pool,
            node_guild: Arc::new(std::sync::OnceLock::new()),
        };
        store.initialize("Remus Community", None).await?;
        Ok(store)
    }

    async fn initialize(
        &self,
        guild_name: &str,
        legacy_export: Option<std::path::PathBuf>,
    ) -> Result<(), RemusError> {
        migrate::run(&self.pool).await?;
        migrate::backfill_positions(&self.pool).await?;
        if let Some(path) = legacy_export {
            legacy::maybe_import(self, &path).await?;
        }
        self.bootstrap(guild_name).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn cache_node_guild(&self, id: GuildId) {
        let _ = self.node_guild.set(id);
    }

    pub(crate) fn cached_node_guild(&self) -> Option<GuildId> {
        self.node_guild.get().cloned()
    }
}

// ─── Records ────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProfileRecord {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ProfileRecord {
    pub fn view(&self) -> ProfileView {
        ProfileView {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GuildRecord {
    pub id: GuildId,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleRecord {
    pub id: RoleId,
    pub guild_id: GuildId,
    pub name: String,
    pub color: String,
    pub permissions: Permissions,
    pub hoist: bool,
    pub position: i64,
    pub icon_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl RoleRecord {
    /// The `@everyone` role shares its id with the guild.
    pub fn is_everyone(&self) -> bool {
        self.id.as_str() == self.guild_id.as_str()
    }

    pub fn view(&self) -> RoleView {
        RoleView {
            id: self.id.clone(),
            guild_id: self.guild_id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            permissions: self.permissions,
            hoist: self.hoist,
            position: self.position,
            icon_url: self.icon_url.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberRecord {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub nickname: Option<String>,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    pub timeout_until: Option<chrono::DateTime<chrono::Utc>>,
    pub voice_muted: bool,
    pub voice_deafened: bool,
    /// Explicit role ids plus the implicit `@everyone` (guild id), loaded
    /// separately from `member_roles`.
    #[sqlx(skip)]
    pub role_ids: Vec<RoleId>,
}

impl MemberRecord {
    pub fn timed_out(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.timeout_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn view(&self, profile: Option<ProfileView>) -> MemberView {
        MemberView {
            guild_id: self.guild_id.clone(),
            user_id: self.user_id.clone(),
            nickname: self.nickname.clone(),
            role_ids: self.role_ids.clone(),
            joined_at: self.joined_at,
            timeout_until: self.timeout_until,
            voice_muted: self.voice_muted,
            voice_deafened: self.voice_deafened,
            user: profile,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OverrideRecord {
    pub channel_id: ChannelId,
    pub target_kind: String,
    pub target_id: String,
    pub allow: Permissions,
    pub deny: Permissions,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    pub kind: String,
    pub category_id: Option<ChannelId>,
    pub position: i64,
    pub created_by: Option<UserId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[sqlx(skip)]
    pub overrides: Vec<OverrideRecord>,
}

impl ChannelRecord {
    pub fn channel_kind(&self) -> ChannelKind {
        ChannelKind::parse(&self.kind).unwrap_or(ChannelKind::Text)
    }

    pub fn view(&self) -> ChannelView {
        let mut overrides = PermissionOverridesView::default();
        for row in &self.overrides {
            let entry = OverrideEntry {
                allow: row.allow,
                deny: row.deny,
            };
            match row.target_kind.as_str() {
                "role" => {
                    overrides.roles.insert(RoleId::from(row.target_id.clone()), entry);
                }
                "member" => {
                    overrides
                        .members
                        .insert(UserId::from(row.target_id.clone()), entry);
                }
                other => {
                    tracing::warn!(target_kind = other, "unknown override target kind");
                }
            }
        }
        ChannelView {
            id: self.id.clone(),
            guild_id: self.guild_id.clone(),
            name: self.name.clone(),
            kind: self.channel_kind(),
            category_id: self.category_id.clone(),
            position: self.position,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            permission_overrides: overrides,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttachmentRecord {
    pub upload_id: UploadId,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub url: String,
}

impl AttachmentRecord {
    pub fn view(&self) -> AttachmentView {
        AttachmentView {
            id: self.upload_id.clone(),
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            url: self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub reply_to_id: Option<MessageId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[sqlx(skip)]
    pub attachments: Vec<AttachmentRecord>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadRecord {
    pub id: UploadId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl UploadRecord {
    pub fn attachment_view(&self) -> AttachmentView {
        AttachmentView {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            url: self.url.clone(),
        }
    }

    pub fn view(&self) -> UploadView {
        UploadView {
            id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            author_id: self.author_id.clone(),
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            url: self.url.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BanRecord {
    pub user_id: UserId,
    pub banned_at: chrono::DateTime<chrono::Utc>,
    pub reason: Option<String>,
}

impl BanRecord {
    pub fn view(&self) -> BanView {
        BanView {
            user_id: self.user_id.clone(),
            banned_at: self.banned_at,
            reason: self.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_seeds_node_guild_and_defaults() {
        let store = Store::open_in_memory().await.unwrap();
        let guild = store.node_guild().await.unwrap();
        assert_eq!(guild.name, "Remus Community");

        let roles = store.list_roles(&guild.id).await.unwrap();
        let everyone = roles.iter().find(|r| r.is_everyone()).unwrap();
        assert_eq!(everyone.permissions, Permissions::DEFAULT_EVERYONE);
        assert_eq!(everyone.position, 0);
        let admin = roles.iter().find(|r| r.name == "Admin").unwrap();
        assert_eq!(admin.permissions, Permissions::all());
        assert!(admin.position > everyone.position);

        let channels = store.list_channels(&guild.id).await.unwrap();
        let names: Vec<&str> = channels.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"general"));
        assert!(names.contains(&"Lounge"));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let guild = store.node_guild().await.unwrap();
        store.initialize("Other Name", None).await.unwrap();
        let again = store.node_guild().await.unwrap();
        assert_eq!(guild.id, again.id);
        assert_eq!(again.name, "Remus Community");
        assert_eq!(store.list_channels(&guild.id).await.unwrap().len(), 2);
    }

    #[test]
    fn member_timed_out_only_while_in_future() {
        let now = chrono::Utc::now();
        let mut member = MemberRecord {
            guild_id: GuildId::generate(),
            user_id: UserId::from("u1"),
            nickname: None,
            joined_at: now,
            timeout_until: Some(now + chrono::Duration::minutes(5)),
            voice_muted: false,
            voice_deafened: false,
            role_ids: vec![],
        };
        assert!(member.timed_out(now));
        member.timeout_until = Some(now - chrono::Duration::minutes(5));
        assert!(!member.timed_out(now));
        member.timeout_until = None;
        assert!(!member.timed_out(now));
    }

    #[test]
    fn channel_record_view_splits_override_targets() {
        let channel_id = ChannelId::generate();
        let record = ChannelRecord {
            id: channel_id.clone(),
            guild_id: GuildId::generate(),
            name: "general".into(),
            kind: "text".into(),
            category_id: None,
            position: 0,
            created_by: None,
            created_at: chrono::Utc::now(),
            overrides: vec![
                OverrideRecord {
                    channel_id: channel_id.clone(),
                    target_kind: "role".into(),
                    target_id: "r1".into(),
                    allow: Permissions::SEND_MESSAGES,
                    deny: Permissions::empty(),
                },
                OverrideRecord {
                    channel_id,
                    target_kind: "member".into(),
                    target_id: "u1".into(),
                    allow: Permissions::empty(),
                    deny: Permissions::VIEW_CHANNELS,
                },
            ],
        };
        let view = record.view();
        assert_eq!(view.permission_overrides.roles.len(), 1);
        assert_eq!(view.permission_overrides.members.len(), 1);
    }
}
