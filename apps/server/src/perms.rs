use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, GuildId, RoleId, UserId};
use remus_shared::permissions::Permissions;

use crate::store::{ChannelRecord, MemberRecord, RoleRecord, Store};

/// Everything the pure computation needs, gathered by [`permissions`].
#[derive(Debug, Default)]
pub struct PermissionInputs {
    pub member: Option<MemberRecord>,
    pub roles: Vec<RoleRecord>,
    pub channel: Option<ChannelRecord>,
    pub category: Option<ChannelRecord>,
}

/// Effective permissions for `(guild, user, channel?)`.
pub async fn permissions(
    store: &Store,
    guild_id: &GuildId,
    user_id: &UserId,
    channel_id: Option<&ChannelId>,
) -> Result<Permissions, RemusError> {
    let member = store.get_member(guild_id, user_id).await?;
    let mut inputs = PermissionInputs {
        member,
        roles: store.list_roles(guild_id).await?,
        channel: None,
        category: None,
    };
    if let Some(channel_id) = channel_id {
        let channel = store
            .get_channel(channel_id)
            .await?
            .ok_or(RemusError::NotFound)?;
        if &channel.guild_id != guild_id {
            return Err(RemusError::NotFound);
        }
        if let Some(category_id) = &channel.category_id {
            inputs.category = store.get_channel(category_id).await?;
        }
        inputs.channel = Some(channel);
    }
    Ok(compute(guild_id, user_id, &inputs, chrono::Utc::now()))
}

/// Pure permission composition:
/// role-OR → ADMINISTRATOR short-circuit → category overrides → channel
/// overrides (each: @everyone, role unions, member) → timeout mask.
pub fn compute(
    guild_id: &GuildId,
    user_id: &UserId,
    inputs: &PermissionInputs,
    now: chrono::DateTime<chrono::Utc>,
) -> Permissions {
    let Some(member) = &inputs.member else {
        return Permissions::empty();
    };

    let role_by_id: std::collections::HashMap<&str, &RoleRecord> = inputs
        .roles
        .iter()
        .map(|role| (role.id.as_str(), role))
        .collect();

    let everyone_id = RoleId::from(guild_id.as_str());
    let mut held: Vec<&RoleId> = vec![&everyone_id];
    held.extend(member.role_ids.iter().filter(|id| **id != everyone_id));

    let mut perms = Permissions::empty();
    for role_id in &held {
        if let Some(role) = role_by_id.get(role_id.as_str()) {
            perms |= role.permissions;
        }
    }

    if perms.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    if let Some(channel) = &inputs.channel {
        if let Some(category) = &inputs.category {
            perms = apply_overrides(perms, category, guild_id, user_id, &held);
        }
        perms = apply_overrides(perms, channel, guild_id, user_id, &held);
    }

    if member.timed_out(now) {
        perms -= Permissions::TIMEOUT_BLOCKED;
    }

    perms
}

/// One override layer: `@everyone` first, then the union of the member's
/// role overrides, then the member's own override.
fn apply_overrides(
    mut perms: Permissions,
    channel: &ChannelRecord,
    guild_id: &GuildId,
    user_id: &UserId,
    held_roles: &[&RoleId],
) -> Permissions {
    for row in &channel.overrides {
        if row.target_kind == "role" && row.target_id == guild_id.as_str() {
            perms = (perms - row.deny) | row.allow;
        }
    }

    let mut allow_union = Permissions::empty();
    let mut deny_union = Permissions::empty();
    for row in &channel.overrides {
        if row.target_kind != "role" || row.target_id == guild_id.as_str() {
            continue;
        }
        if held_roles.iter().any(|id| id.as_str() == row.target_id) {
            allow_union |= row.allow;
            deny_union |= row.deny;
        }
    }
    perms = (perms - deny_union) | allow_union;

    for row in &channel.overrides {
        if row.target_kind == "member" && row.target_id == user_id.as_str() {
            perms = (perms - row.deny) | row.allow;
        }
    }

    perms
}

// ─── Role hierarchy ─────────────────────────────────────────

/// The member's top role position; hierarchy rank for moderation gating.
pub fn top_position(member: &MemberRecord, roles: &[RoleRecord]) -> i64 {
    member
        .role_ids
        .iter()
        .filter_map(|id| roles.iter().find(|role| &role.id == id))
        .map(|role| role.position)
        .max()
        .unwrap_or(0)
}

/// May `actor` manage `target_role`? Administrators always may; touching
/// `@everyone` needs MANAGE_SERVER; otherwise the actor's top position must
/// strictly outrank the role.
pub fn can_manage_role(
    actor: &MemberRecord,
    actor_perms: Permissions,
    roles: &[RoleRecord],
    target_role: &RoleRecord,
) -> bool {
    if actor_perms.contains(Permissions::ADMINISTRATOR) {
        return true;
    }
    if target_role.is_everyone() {
        return actor_perms.contains(Permissions::MANAGE_SERVER);
    }
    top_position(actor, roles) > target_role.position
}

/// May `actor` moderate `target`? Self-operations are always allowed;
/// Administrators always may; otherwise strict top-position dominance.
pub fn can_manage_member(
    actor: &MemberRecord,
    actor_perms: Permissions,
    roles: &[RoleRecord],
    target: &MemberRecord,
) -> bool {
    if actor.user_id == target.user_id {
        return true;
    }
    if actor_perms.contains(Permissions::ADMINISTRATOR) {
        return true;
    }
    top_position(actor, roles) > top_position(target, roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OverrideRecord;

    fn guild() -> GuildId {
        GuildId::from("g1")
    }

    fn role(id: &str, position: i64, permissions: Permissions) -> RoleRecord {
        RoleRecord {
            id: RoleId::from(id),
            guild_id: guild(),
            name: id.to_string(),
            color: "#99aab5".into(),
            permissions,
            hoist: false,
            position,
            icon_url: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn member(user: &str, role_ids: &[&str]) -> MemberRecord {
        MemberRecord {
            guild_id: guild(),
            user_id: UserId::from(user),
            nickname: None,
            joined_at: chrono::Utc::now(),
            timeout_until: None,
            voice_muted: false,
            voice_deafened: false,
            role_ids: std::iter::once(RoleId::from("g1"))
                .chain(role_ids.iter().map(|id| RoleId::from(*id)))
                .collect(),
        }
    }

    fn channel(id: &str, overrides: Vec<OverrideRecord>) -> ChannelRecord {
        ChannelRecord {
            id: ChannelId::from(id),
            guild_id: guild(),
            name: id.to_string(),
            kind: "text".into(),
            category_id: None,
            position: 0,
            created_by: None,
            created_at: chrono::Utc::now(),
            overrides,
        }
    }

    fn role_override(channel_id: &str, role_id: &str, allow: Permissions, deny: Permissions) -> OverrideRecord {
        OverrideRecord {
            channel_id: ChannelId::from(channel_id),
            target_kind: "role".into(),
            target_id: role_id.to_string(),
            allow,
            deny,
        }
    }

    fn member_override(channel_id: &str, user_id: &str, allow: Permissions, deny: Permissions) -> OverrideRecord {
        OverrideRecord {
            channel_id: ChannelId::from(channel_id),
            target_kind: "member".into(),
            target_id: user_id.to_string(),
            allow,
            deny,
        }
    }

    #[test]
    fn no_member_means_no_permissions() {
        let inputs = PermissionInputs {
            member: None,
            roles: vec![role("g1", 0, Permissions::DEFAULT_EVERYONE)],
            channel: None,
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        assert!(perms.is_empty());
    }

    #[test]
    fn guild_level_is_the_or_of_held_roles() {
        let inputs = PermissionInputs {
            member: Some(member("u1", &["r1"])),
            roles: vec![
                role("g1", 0, Permissions::VIEW_CHANNELS),
                role("r1", 1, Permissions::SEND_MESSAGES),
                role("r2", 2, Permissions::BAN_MEMBERS),
            ],
            channel: None,
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        assert_eq!(perms, Permissions::VIEW_CHANNELS | Permissions::SEND_MESSAGES);
    }

    #[test]
    fn member_override_outranks_role_deny() {
        // Spec scenario: R2 grants SEND_MESSAGES, the channel denies it for
        // R2, the member override allows it back. Member wins.
        let chan = channel(
            "c1",
            vec![
                role_override("c1", "r2", Permissions::empty(), Permissions::SEND_MESSAGES),
                member_override("c1", "u1", Permissions::SEND_MESSAGES, Permissions::empty()),
            ],
        );
        let inputs = PermissionInputs {
            member: Some(member("u1", &["r2"])),
            roles: vec![
                role("g1", 0, Permissions::empty()),
                role("r1", 1, Permissions::empty()),
                role("r2", 2, Permissions::SEND_MESSAGES),
            ],
            channel: Some(chan),
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        assert!(perms.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn role_deny_without_member_override_wins() {
        let chan = channel(
            "c1",
            vec![role_override(
                "c1",
                "r2",
                Permissions::empty(),
                Permissions::SEND_MESSAGES,
            )],
        );
        let inputs = PermissionInputs {
            member: Some(member("u1", &["r2"])),
            roles: vec![
                role("g1", 0, Permissions::empty()),
                role("r2", 2, Permissions::SEND_MESSAGES),
            ],
            channel: Some(chan),
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        assert!(!perms.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn role_allow_union_beats_role_deny_union() {
        // One held role denies, another allows: the allow union is applied
        // after the deny union within the same layer.
        let chan = channel(
            "c1",
            vec![
                role_override("c1", "r1", Permissions::empty(), Permissions::SEND_MESSAGES),
                role_override("c1", "r2", Permissions::SEND_MESSAGES, Permissions::empty()),
            ],
        );
        let inputs = PermissionInputs {
            member: Some(member("u1", &["r1", "r2"])),
            roles: vec![
                role("g1", 0, Permissions::empty()),
                role("r1", 1, Permissions::empty()),
                role("r2", 2, Permissions::empty()),
            ],
            channel: Some(chan),
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        assert!(perms.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn everyone_override_applies_before_role_overrides() {
        let chan = channel(
            "c1",
            vec![
                // @everyone (role id == guild id) denies SEND_MESSAGES.
                role_override("c1", "g1", Permissions::empty(), Permissions::SEND_MESSAGES),
                role_override("c1", "r1", Permissions::SEND_MESSAGES, Permissions::empty()),
            ],
        );
        let inputs = PermissionInputs {
            member: Some(member("u1", &["r1"])),
            roles: vec![
                role("g1", 0, Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNELS),
                role("r1", 1, Permissions::empty()),
            ],
            channel: Some(chan),
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        // The r1 allow re-grants what the @everyone override removed.
        assert!(perms.contains(Permissions::SEND_MESSAGES));
        assert!(perms.contains(Permissions::VIEW_CHANNELS));
    }

    #[test]
    fn category_overrides_apply_before_channel_overrides() {
        let category = channel(
            "cat",
            vec![role_override(
                "cat",
                "g1",
                Permissions::empty(),
                Permissions::VIEW_CHANNELS,
            )],
        );
        let mut chan = channel(
            "c1",
            vec![role_override(
                "c1",
                "g1",
                Permissions::VIEW_CHANNELS,
                Permissions::empty(),
            )],
        );
        chan.category_id = Some(ChannelId::from("cat"));
        let inputs = PermissionInputs {
            member: Some(member("u1", &[])),
            roles: vec![role("g1", 0, Permissions::VIEW_CHANNELS)],
            channel: Some(chan),
            category: Some(category),
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        // The channel layer re-allows what the category denied.
        assert!(perms.contains(Permissions::VIEW_CHANNELS));
    }

    #[test]
    fn administrator_short_circuits_overrides_and_timeout() {
        // Spec scenario: Admin role plus an active timeout still yields the
        // full mask.
        let chan = channel(
            "c1",
            vec![member_override(
                "c1",
                "u1",
                Permissions::empty(),
                Permissions::all(),
            )],
        );
        let mut admin = member("u1", &["admin"]);
        admin.timeout_until = Some(chrono::Utc::now() + chrono::Duration::minutes(5));
        let inputs = PermissionInputs {
            member: Some(admin),
            roles: vec![
                role("g1", 0, Permissions::DEFAULT_EVERYONE),
                role("admin", 5, Permissions::ADMINISTRATOR),
            ],
            channel: Some(chan),
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        assert_eq!(perms, Permissions::all());
    }

    #[test]
    fn timeout_masks_the_blocked_bits_only() {
        let mut timed_out = member("u1", &[]);
        timed_out.timeout_until = Some(chrono::Utc::now() + chrono::Duration::minutes(5));
        let inputs = PermissionInputs {
            member: Some(timed_out),
            roles: vec![role("g1", 0, Permissions::DEFAULT_EVERYONE)],
            channel: None,
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        assert!(!perms.contains(Permissions::SEND_MESSAGES));
        assert!(!perms.contains(Permissions::ATTACH_FILES));
        assert!(!perms.contains(Permissions::VOICE_SPEAK));
        assert!(!perms.contains(Permissions::SCREENSHARE));
        assert!(perms.contains(Permissions::VIEW_CHANNELS));
        assert!(perms.contains(Permissions::READ_HISTORY));
        assert!(perms.contains(Permissions::VOICE_CONNECT));
    }

    #[test]
    fn expired_timeout_has_no_effect() {
        let mut was_timed_out = member("u1", &[]);
        was_timed_out.timeout_until = Some(chrono::Utc::now() - chrono::Duration::minutes(5));
        let inputs = PermissionInputs {
            member: Some(was_timed_out),
            roles: vec![role("g1", 0, Permissions::DEFAULT_EVERYONE)],
            channel: None,
            category: None,
        };
        let perms = compute(&guild(), &UserId::from("u1"), &inputs, chrono::Utc::now());
        assert!(perms.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn top_position_is_max_of_held_roles() {
        let roles = vec![
            role("g1", 0, Permissions::empty()),
            role("r1", 3, Permissions::empty()),
            role("r2", 7, Permissions::empty()),
        ];
        assert_eq!(top_position(&member("u1", &["r1", "r2"]), &roles), 7);
        assert_eq!(top_position(&member("u2", &[]), &roles), 0);
    }

    #[test]
    fn hierarchy_requires_strict_dominance() {
        let roles = vec![
            role("g1", 0, Permissions::empty()),
            role("low", 3, Permissions::empty()),
            role("high", 7, Permissions::empty()),
        ];
        let actor = member("a", &["high"]);
        let peer = member("b", &["high"]);
        let junior = member("c", &["low"]);

        assert!(can_manage_member(&actor, Permissions::KICK_MEMBERS, &roles, &junior));
        assert!(!can_manage_member(&actor, Permissions::KICK_MEMBERS, &roles, &peer));
        assert!(can_manage_member(&actor, Permissions::ADMINISTRATOR, &roles, &peer));
        // Self-operations are always allowed.
        assert!(can_manage_member(&actor, Permissions::empty(), &roles, &actor));
    }

    #[test]
    fn everyone_role_requires_manage_server() {
        let everyone = role("g1", 0, Permissions::empty());
        let roles = vec![everyone.clone(), role("high", 7, Permissions::empty())];
        let actor = member("a", &["high"]);

        // Position alone is not enough for @everyone.
        assert!(!can_manage_role(&actor, Permissions::MANAGE_ROLES, &roles, &everyone));
        assert!(can_manage_role(
            &actor,
            Permissions::MANAGE_ROLES | Permissions::MANAGE_SERVER,
            &roles,
            &everyone
        ));

        let target = role("mid", 5, Permissions::empty());
        assert!(can_manage_role(&actor, Permissions::MANAGE_ROLES, &roles, &target));
        let above = role("top", 9, Permissions::empty());
        assert!(!can_manage_role(&actor, Permissions::MANAGE_ROLES, &roles, &above));
        assert!(can_manage_role(&actor, Permissions::ADMINISTRATOR, &roles, &above));
    }
}
