use remus_server::store::Store;

/// Bring-up against a directory that does not exist yet: directories are
/// created, the guild is seeded, and a second open reuses everything.
#[tokio::test]
async fn fresh_open_seeds_and_reopen_reuses() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = dir.path().join("data").join("remus.db");

    let store = Store::open(&db_file, "Test Node").await.unwrap();
    let guild = store.node_guild().await.unwrap();
    assert_eq!(guild.name, "Test Node");
    let channels = store.list_channels(&guild.id).await.unwrap();
    assert_eq!(channels.len(), 2);
    drop(store);

    let store = Store::open(&db_file, "Renamed Node").await.unwrap();
    let again = store.node_guild().await.unwrap();
    assert_eq!(again.id, guild.id);
    assert_eq!(again.name, "Test Node", "bring-up must not recreate the guild");
    assert_eq!(store.list_channels(&guild.id).await.unwrap().len(), 2);
}

/// A JSON document sitting where the database should be is salvaged and
/// imported once: profiles, guild, roles, members, channels, messages,
/// uploads, bans, audit, settings.
#[tokio::test]
async fn legacy_json_export_is_imported_once() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = dir.path().join("remus.db");
    std::fs::write(
        &db_file,
        serde_json::json!({
            "profiles": [
                { "id": "legacy-user", "username": "old-timer" }
            ],
            "guilds": [
                { "id": "legacy-guild", "name": "Old Haunt" }
            ],
            "roles": [
                { "id": "legacy-guild", "guildId": "legacy-guild", "name": "@everyone",
                  "permissions": 194, "position": 0 },
                { "id": "legacy-mod", "guildId": "legacy-guild", "name": "Mod",
                  "permissions": 256, "position": 3 }
            ],
            "members": [
                { "guildId": "legacy-guild", "userId": "legacy-user",
                  "roleIds": ["legacy-guild", "legacy-mod"] }
            ],
            "channels": [
                { "id": "legacy-chan", "guildId": "legacy-guild", "name": "old-general",
                  "type": "text" }
            ],
            "messages": [
                { "id": "legacy-msg", "channelId": "legacy-chan", "authorId": "legacy-user",
                  "content": "hello from the past" }
            ],
            "uploads": [],
            "bans": [ { "userId": "persona-non-grata" } ],
            "audit": [],
            "settings": { "auditMaxEntries": 42, "timeoutMaxMinutes": 120 }
        })
        .to_string(),
    )
    .unwrap();

    let store = Store::open(&db_file, "Fresh Name").await.unwrap();

    let guild = store.node_guild().await.unwrap();
    assert_eq!(guild.id.as_str(), "legacy-guild");
    assert_eq!(guild.name, "Old Haunt");

    let profile = store
        .get_profile(&"legacy-user".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.username, "old-timer");

    let member = store
        .get_member(&guild.id, &"legacy-user".into())
        .await
        .unwrap()
        .unwrap();
    assert!(member.role_ids.iter().any(|r| r.as_str() == "legacy-mod"));

    let messages = store
        .list_messages(&"legacy-chan".into(), None, 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hello from the past");

    assert!(store.is_banned(&"persona-non-grata".into()).await.unwrap());
    assert_eq!(store.settings().await.unwrap().audit_max_entries, 42);

    // Bring-up still tops up missing defaults in the imported data.
    let roles = store.list_roles(&guild.id).await.unwrap();
    assert!(roles.iter().any(|r| r.name == "Admin"));

    // The original file was moved aside; the DB is now real SQLite and a
    // reopen must not import again.
    let reimport = Store::open(&db_file, "Fresh Name").await.unwrap();
    assert_eq!(reimport.list_profiles().await.unwrap().len(), 1);
}

/// Corruption that is not a JSON export is fatal, not silently recreated.
#[tokio::test]
async fn corrupt_database_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = dir.path().join("remus.db");
    std::fs::write(&db_file, b"\x00\x01\x02 definitely not sqlite").unwrap();

    let err = Store::open(&db_file, "Test Node").await.unwrap_err();
    assert!(matches!(
        err,
        remus_shared::error::RemusError::InvalidDatabase(_)
    ));
    // The broken file is left in place for the operator.
    assert!(db_file.exists());
}
