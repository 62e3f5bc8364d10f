macro_rules! define_id {
    ($name:ident) => {
        /// Opaque string identifier. The node mints time-sortable UUID v7
        /// strings for entities it owns; user ids come from the external
        /// authority verbatim.
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
        )]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
        #[cfg_attr(feature = "sqlx", sqlx(transparent))]
        pub struct $name(pub String);

        impl $name {
            /// Mint a new time-sortable identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(UserId);
define_id!(GuildId);
define_id!(ChannelId);
define_id!(MessageId);
define_id!(RoleId);
define_id!(UploadId);
define_id!(AuditId);
define_id!(SessionId);
define_id!(TransportId);
define_id!(ProducerId);
define_id!(ConsumerId);
