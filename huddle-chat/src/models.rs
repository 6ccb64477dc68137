use std::fmt;
use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::{Jsonb, Text};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{
    audit_logs, blocked_ips, chat_room_members, chat_rooms, message_reactions, message_reports,
    messages, users,
};

/// String-backed enum stored in a varchar column.
macro_rules! string_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
        #[diesel(sql_type = Text)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse().map_err(Into::into)
            }
        }
    };
}

string_enum! {
    pub enum RoomKind {
        Private => "private",
        Group => "group",
    }
}

string_enum! {
    /// Role inside a single room. Ordered by privilege.
    pub enum MemberRole {
        Member => "member",
        Admin => "admin",
        Owner => "owner",
    }
}

string_enum! {
    pub enum MessageKind {
        Text => "text",
        Image => "image",
        Document => "document",
        Audio => "audio",
    }
}

string_enum! {
    pub enum ReportReason {
        Spam => "spam",
        Harassment => "harassment",
        Inappropriate => "inappropriate",
        Violence => "violence",
        HateSpeech => "hate_speech",
        Other => "other",
    }
}

string_enum! {
    pub enum ReportStatus {
        Pending => "pending",
        Reviewed => "reviewed",
        Resolved => "resolved",
        Dismissed => "dismissed",
    }
}

string_enum! {
    pub enum UserStatus {
        Online => "online",
        Offline => "offline",
        Away => "away",
        Busy => "busy",
    }
}

string_enum! {
    pub enum AuditAction {
        MessageReported => "message_reported",
        ReportReviewed => "report_reviewed",
        MessageDeletedByModeration => "message_deleted_by_moderation",
        IpBlocked => "ip_blocked",
        IpUnblocked => "ip_unblocked",
    }
}

string_enum! {
    pub enum AuditTargetKind {
        Room => "room",
        Message => "message",
        Report => "report",
        BlockedIp => "blocked_ip",
    }
}

// --- Room settings ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(default)]
pub struct RoomSettings {
    pub allow_media: bool,
    pub allow_voice_messages: bool,
    pub message_retention_days: i32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            allow_media: true,
            allow_voice_messages: true,
            message_retention_days: 365,
        }
    }
}

impl RoomSettings {
    pub fn allows(&self, kind: MessageKind) -> bool {
        match kind {
            MessageKind::Text => true,
            MessageKind::Image | MessageKind::Document => self.allow_media,
            MessageKind::Audio => self.allow_voice_messages,
        }
    }
}

impl ToSql<Jsonb, Pg> for RoomSettings {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        // jsonb binary format version
        out.write_all(&[1])?;
        serde_json::to_writer(&mut *out, self)?;
        Ok(IsNull::No)
    }
}

impl FromSql<Jsonb, Pg> for RoomSettings {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = <serde_json::Value as FromSql<Jsonb, Pg>>::from_sql(bytes)?;
        Ok(serde_json::from_value(value)?)
    }
}

// --- User ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl NewUser {
    /// A first-seen caller. Without a name claim the row gets `user-<id prefix>`.
    pub fn first_seen(id: Uuid, name: Option<&str>) -> Self {
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("user-{}", id.simple().to_string().chars().take(8).collect::<String>()),
        };
        Self {
            id,
            name,
            avatar_url: None,
        }
    }
}

/// The fields of a user that other participants may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

// --- Room ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = chat_rooms)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub kind: RoomKind,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub created_by: Option<Uuid>,
    pub settings: RoomSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = chat_rooms)]
pub struct NewRoom {
    pub name: String,
    pub kind: RoomKind,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub created_by: Option<Uuid>,
    pub settings: RoomSettings,
}

/// Partial room update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = chat_rooms)]
pub struct RoomChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub settings: Option<RoomSettings>,
    pub updated_at: Option<DateTime<Utc>>,
}

// --- Membership ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = chat_room_members)]
pub struct Membership {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    /// Mute expiry is evaluated lazily; an elapsed `muted_until` means unmuted.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.is_muted && self.muted_until.map_or(true, |until| until > now)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = chat_room_members)]
pub struct NewMembership {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
}

// --- Message ---

#[derive(Debug, Queryable, Identifiable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub media_filename: Option<String>,
    pub media_size: Option<i64>,
    pub reply_to_id: Option<Uuid>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Blob reference handed back by the upload collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub filename: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub media_filename: Option<String>,
    pub media_size: Option<i64>,
    pub reply_to_id: Option<Uuid>,
}

// --- Reaction ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = message_reactions)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = message_reactions)]
pub struct NewReaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
}

// --- Report ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = message_reports)]
pub struct Report {
    pub id: Uuid,
    pub message_id: Uuid,
    pub reported_by: Uuid,
    pub reviewed_by: Option<Uuid>,
    pub reason: ReportReason,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub moderator_notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = message_reports)]
pub struct NewReport {
    pub message_id: Uuid,
    pub reported_by: Uuid,
    pub reason: ReportReason,
    pub description: Option<String>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = message_reports)]
pub struct ReportReview {
    pub status: ReportStatus,
    pub reviewed_by: Option<Uuid>,
    pub moderator_notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

// --- Blocked IP ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = blocked_ips)]
pub struct BlockedIp {
    pub id: Uuid,
    pub ip_address: String,
    pub blocked_by: Option<Uuid>,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlockedIp {
    pub fn is_blocking_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires| expires > now)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = blocked_ips)]
pub struct NewBlockedIp {
    pub ip_address: String,
    pub blocked_by: Option<Uuid>,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

// --- Audit log ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = audit_logs)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub target_type: Option<AuditTargetKind>,
    pub target_id: Option<Uuid>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditEntry {
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub target_type: Option<AuditTargetKind>,
    pub target_id: Option<Uuid>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
