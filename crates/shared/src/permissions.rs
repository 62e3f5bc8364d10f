use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const ADMINISTRATOR        = 1 << 0;
        const VIEW_CHANNELS        = 1 << 1;
        const MANAGE_CHANNELS      = 1 << 2;
        const MANAGE_ROLES         = 1 << 3;
        const MANAGE_SERVER        = 1 << 4;
        const VIEW_AUDIT_LOG       = 1 << 5;
        const SEND_MESSAGES        = 1 << 6;
        const READ_HISTORY         = 1 << 7;
        const MANAGE_MESSAGES      = 1 << 8;
        const ATTACH_FILES         = 1 << 9;
        const VOICE_CONNECT        = 1 << 10;
        const VOICE_SPEAK          = 1 << 11;
        const VOICE_MUTE_MEMBERS   = 1 << 12;
        const VOICE_DEAFEN_MEMBERS = 1 << 13;
        const VOICE_MOVE_MEMBERS   = 1 << 14;
        const SCREENSHARE          = 1 << 15;
        const KICK_MEMBERS         = 1 << 16;
        const BAN_MEMBERS          = 1 << 17;
        const TIMEOUT_MEMBERS      = 1 << 18;
    }
}

impl Permissions {
    /// Bits stripped from a member while their timeout is active.
    pub const TIMEOUT_BLOCKED: Permissions = Permissions::SEND_MESSAGES
        .union(Permissions::ATTACH_FILES)
        .union(Permissions::VOICE_SPEAK)
        .union(Permissions::SCREENSHARE);

    /// Baseline mask granted to `@everyone` when the node guild is created.
    pub const DEFAULT_EVERYONE: Permissions = Permissions::VIEW_CHANNELS
        .union(Permissions::SEND_MESSAGES)
        .union(Permissions::READ_HISTORY)
        .union(Permissions::ATTACH_FILES)
        .union(Permissions::VOICE_CONNECT)
        .union(Permissions::VOICE_SPEAK)
        .union(Permissions::SCREENSHARE);
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::empty()
    }
}

impl serde::Serialize for Permissions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Permissions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(Permissions::from_bits_truncate(bits))
    }
}

#[cfg(feature = "sqlx")]
mod sqlx_impls {
    use super::Permissions;
    use sqlx::encode::IsNull;
    use sqlx::sqlite::{Sqlite, SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
    use sqlx::{Decode, Encode, Type};

    impl Type<Sqlite> for Permissions {
        fn type_info() -> SqliteTypeInfo {
            <i64 as Type<Sqlite>>::type_info()
        }

        fn compatible(ty: &SqliteTypeInfo) -> bool {
            <i64 as Type<Sqlite>>::compatible(ty)
        }
    }

    impl<'q> Encode<'q, Sqlite> for Permissions {
        fn encode_by_ref(
            &self,
            buf: &mut Vec<SqliteArgumentValue<'q>>,
        ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
            <i64 as Encode<'q, Sqlite>>::encode_by_ref(&(self.bits() as i64), buf)
        }
    }

    impl<'r> Decode<'r, Sqlite> for Permissions {
        fn decode(value: SqliteValueRef<'r>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
            let val = <i64 as Decode<'r, Sqlite>>::decode(value)?;
            Ok(Permissions::from_bits_truncate(val as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip() {
        let perms = Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNELS;
        let json = serde_json::to_value(perms).unwrap();
        assert!(json.is_number());
        let back: Permissions = serde_json::from_value(json).unwrap();
        assert_eq!(perms, back);
    }

    #[test]
    fn deserialize_truncates_unknown_bits() {
        let json = serde_json::json!(u64::MAX);
        let perms: Permissions = serde_json::from_value(json).unwrap();
        assert_eq!(perms, Permissions::all());
    }

    #[test]
    fn timeout_blocked_is_the_four_canonical_bits() {
        assert_eq!(
            Permissions::TIMEOUT_BLOCKED,
            Permissions::SEND_MESSAGES
                | Permissions::ATTACH_FILES
                | Permissions::VOICE_SPEAK
                | Permissions::SCREENSHARE
        );
    }

    #[test]
    fn default_everyone_does_not_grant_moderation() {
        let baseline = Permissions::DEFAULT_EVERYONE;
        assert!(!baseline.contains(Permissions::ADMINISTRATOR));
        assert!(!baseline.contains(Permissions::MANAGE_CHANNELS));
        assert!(!baseline.contains(Permissions::KICK_MEMBERS));
        assert!(!baseline.contains(Permissions::BAN_MEMBERS));
        assert!(baseline.contains(Permissions::VIEW_CHANNELS));
        assert!(baseline.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn all_flags_have_unique_bits() {
        let flags = Permissions::all().iter().collect::<Vec<_>>();
        assert_eq!(flags.len(), 19);
        for (i, a) in flags.iter().enumerate() {
            for (j, b) in flags.iter().enumerate() {
                if i != j {
                    assert!((*a & *b).is_empty(), "flags {i} and {j} share bits");
                }
            }
        }
    }

    #[test]
    fn serialize_as_u64_number() {
        let json = serde_json::to_string(&Permissions::ADMINISTRATOR).unwrap();
        assert_eq!(json, "1");
    }
}
