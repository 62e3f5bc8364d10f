use remus_server::store::Store;
use remus_shared::api::channel::ChannelKind;
use remus_shared::ids::{ChannelId, GuildId, UserId};

async fn node() -> (Store, GuildId) {
    let store = Store::open_in_memory().await.unwrap();
    let guild_id = store.node_guild_id().await.unwrap();
    (store, guild_id)
}

async fn member(store: &Store, guild_id: &GuildId, user: &str) -> UserId {
    let user_id = UserId::from(user);
    store.upsert_profile(&user_id, user, None).await.unwrap();
    store.add_member(guild_id, &user_id).await.unwrap();
    user_id
}

async fn upload(store: &Store, channel_id: &ChannelId, author: &UserId, name: &str) -> remus_server::store::UploadRecord {
    store
        .create_upload(
            channel_id,
            author,
            name,
            64,
            "image/png",
            &format!("/uploads/{name}"),
        )
        .await
        .unwrap()
}

/// Spec scenario: a channel with 3 messages × 2 attachments each. Deleting
/// it removes all messages and all 6 upload rows, and hands the uploads
/// back for file deletion.
#[tokio::test]
async fn channel_delete_cascades_messages_and_uploads() {
    let (store, guild_id) = node().await;
    let author = member(&store, &guild_id, "writer").await;
    let channel = store
        .create_channel(&guild_id, "doomed", ChannelKind::Text, None, None)
        .await
        .unwrap();

    let mut message_ids = Vec::new();
    for i in 0..3 {
        let a = upload(&store, &channel.id, &author, &format!("a{i}.png")).await;
        let b = upload(&store, &channel.id, &author, &format!("b{i}.png")).await;
        let message = store
            .create_message(&channel.id, &author, &format!("msg {i}"), &[a, b], None)
            .await
            .unwrap();
        message_ids.push(message.id);
    }

    let (_, removed_uploads) = store.delete_channel(&channel.id).await.unwrap();
    assert_eq!(removed_uploads.len(), 6);

    for id in &message_ids {
        assert!(store.get_message(id).await.unwrap().is_none());
    }
    assert!(store.get_channel(&channel.id).await.unwrap().is_none());
    assert!(store.list_uploads().await.unwrap().is_empty());
}

/// Cross-channel replies survive a channel delete with cleared pointers.
#[tokio::test]
async fn channel_delete_clears_foreign_reply_pointers() {
    let (store, guild_id) = node().await;
    let author = member(&store, &guild_id, "writer").await;
    let doomed = store
        .create_channel(&guild_id, "doomed", ChannelKind::Text, None, None)
        .await
        .unwrap();
    let surviving = store
        .create_channel(&guild_id, "surviving", ChannelKind::Text, None, None)
        .await
        .unwrap();

    let target = store
        .create_message(&doomed.id, &author, "original", &[], None)
        .await
        .unwrap();
    // Replies only reference messages in the same channel, so put the reply
    // in the doomed channel and a plain message elsewhere.
    store
        .create_message(&doomed.id, &author, "reply", &[], Some(&target.id))
        .await
        .unwrap();
    let unrelated = store
        .create_message(&surviving.id, &author, "elsewhere", &[], None)
        .await
        .unwrap();

    store.delete_channel(&doomed.id).await.unwrap();
    assert!(store.get_message(&unrelated.id).await.unwrap().is_some());
}

/// Ban → unban round-trip: the user can rejoin, but purged artifacts stay
/// gone.
#[tokio::test]
async fn ban_purges_and_unban_allows_rejoin() {
    let (store, guild_id) = node().await;
    let user = member(&store, &guild_id, "troll").await;
    let channel = store
        .create_channel(&guild_id, "scene", ChannelKind::Text, None, None)
        .await
        .unwrap();
    let up = upload(&store, &channel.id, &user, "meme.png").await;
    let message = store
        .create_message(&channel.id, &user, "look at this", &[up], None)
        .await
        .unwrap();

    // Ban implies purge.
    store.add_ban(&user, Some("enough")).await.unwrap();
    store.purge_user(&user).await.unwrap();

    assert!(store.is_banned(&user).await.unwrap());
    assert!(store.get_member(&guild_id, &user).await.unwrap().is_none());
    assert!(store.get_profile(&user).await.unwrap().is_none());
    assert!(store.get_message(&message.id).await.unwrap().is_none());
    assert!(store.list_uploads().await.unwrap().is_empty());

    // Unban and rejoin: fresh membership, history still absent.
    store.remove_ban(&user).await.unwrap();
    store.upsert_profile(&user, "troll", None).await.unwrap();
    store.add_member(&guild_id, &user).await.unwrap();
    assert!(store.get_member(&guild_id, &user).await.unwrap().is_some());
    assert!(store
        .list_messages(&channel.id, None, 50)
        .await
        .unwrap()
        .is_empty());
}

/// Audit invariant: per-guild count never exceeds the configured cap.
#[tokio::test]
async fn audit_count_never_exceeds_cap() {
    let (store, guild_id) = node().await;
    store
        .update_settings(&remus_shared::api::settings::UpdateSettingsRequest {
            audit_max_entries: Some(5),
            timeout_max_minutes: None,
        })
        .await
        .unwrap();

    for i in 0..20 {
        store
            .add_audit(
                &guild_id,
                "channel.update",
                None,
                Some(&format!("c{i}")),
                serde_json::json!({}),
            )
            .await
            .unwrap();
        let count = store.list_audit(&guild_id, 100).await.unwrap().len();
        assert!(count <= 5, "audit overflowed the cap at entry {i}");
    }
}
