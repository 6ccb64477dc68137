//! Persistence substrate.
//!
//! Every multi-row mutation the core relies on being atomic (room creation with
//! its memberships, report review with its takedown, room deletion) is a single
//! call here, so an implementation can wrap it in one transaction.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use huddle_shared::types::pagination::PageRequest;
use huddle_shared::AppResult;

use crate::models::{
    AuditEntry, BlockedIp, MemberRole, Membership, Message, NewAuditEntry, NewBlockedIp,
    NewMembership, NewMessage, NewReaction, NewReport, NewRoom, Reaction, Report, ReportReview,
    ReportStatus, Room, RoomChanges, User, UserStatus,
};

/// One page of rows plus the total row count across all pages.
pub type Page<T> = (Vec<T>, u64);

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Case-sensitive substring match over content.
    pub search: Option<String>,
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub status: Option<ReportStatus>,
    pub reporter: Option<Uuid>,
}

/// Soft-delete applied to a report's message in the same transaction as the review.
#[derive(Debug, Clone)]
pub struct Takedown<'a> {
    pub placeholder: &'a str,
}

pub trait ChatStore: Send + Sync {
    fn ping(&self) -> AppResult<()>;

    // --- users ---
    /// Insert the user on first sight. A given name replaces the stored one.
    fn ensure_user(&self, id: Uuid, name: Option<&str>) -> AppResult<User>;
    fn find_user(&self, id: Uuid) -> AppResult<Option<User>>;
    fn find_users(&self, ids: &[Uuid]) -> AppResult<Vec<User>>;
    fn update_user_status(
        &self,
        id: Uuid,
        status: UserStatus,
        last_seen: DateTime<Utc>,
    ) -> AppResult<Option<User>>;

    // --- rooms ---
    /// Inserts the room and all initial memberships atomically.
    fn create_room(&self, room: NewRoom, members: &[(Uuid, MemberRole)]) -> AppResult<Room>;
    fn find_room(&self, id: Uuid) -> AppResult<Option<Room>>;
    /// Rooms the user participates in, most recently updated first.
    fn rooms_for_user(&self, user_id: Uuid) -> AppResult<Vec<Room>>;
    fn update_room(&self, id: Uuid, changes: RoomChanges) -> AppResult<Room>;
    /// Hard delete, cascading memberships, messages, reactions and reports.
    fn delete_room(&self, id: Uuid) -> AppResult<()>;

    // --- memberships ---
    fn find_membership(&self, room_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>>;
    fn room_memberships(&self, room_id: Uuid) -> AppResult<Vec<Membership>>;
    /// Fails with a unique violation if the pair already exists.
    fn insert_membership(&self, membership: NewMembership) -> AppResult<Membership>;
    fn delete_membership(&self, room_id: Uuid, user_id: Uuid) -> AppResult<bool>;
    fn set_mute(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Membership>>;

    // --- messages ---
    fn insert_message(&self, message: NewMessage) -> AppResult<Message>;
    fn find_message(&self, id: Uuid) -> AppResult<Option<Message>>;
    fn find_messages(&self, ids: &[Uuid]) -> AppResult<Vec<Message>>;
    fn last_message(&self, room_id: Uuid) -> AppResult<Option<Message>>;
    fn edit_message(&self, id: Uuid, content: &str, at: DateTime<Utc>) -> AppResult<Message>;
    fn soft_delete_message(&self, id: Uuid, placeholder: &str, at: DateTime<Utc>) -> AppResult<Message>;
    /// Most recent first.
    fn list_messages(
        &self,
        room_id: Uuid,
        filter: &MessageFilter,
        page: &PageRequest,
    ) -> AppResult<Page<Message>>;

    // --- reactions ---
    /// Insert-or-ignore on (message, user, emoji).
    fn upsert_reaction(&self, reaction: NewReaction) -> AppResult<()>;
    fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> AppResult<bool>;
    /// Oldest first.
    fn reactions_for(&self, message_ids: &[Uuid]) -> AppResult<Vec<Reaction>>;

    // --- reports ---
    /// Fails with a unique violation if the (message, reporter) pair already exists.
    fn insert_report(&self, report: NewReport) -> AppResult<Report>;
    fn find_report(&self, id: Uuid) -> AppResult<Option<Report>>;
    fn list_reports(&self, filter: &ReportFilter, page: &PageRequest) -> AppResult<Page<Report>>;
    /// Applies the review and, if given, the takedown of the reported message
    /// in one unit. Returns the updated report and the taken-down message.
    fn review_report(
        &self,
        id: Uuid,
        review: ReportReview,
        takedown: Option<Takedown<'_>>,
    ) -> AppResult<(Report, Option<Message>)>;

    // --- blocked ips ---
    /// Insert, or reactivate and re-attribute an existing row for the same ip.
    fn upsert_blocked_ip(&self, block: NewBlockedIp) -> AppResult<BlockedIp>;
    fn find_blocked_ip(&self, ip: &str) -> AppResult<Option<BlockedIp>>;
    fn deactivate_blocked_ip(&self, ip: &str) -> AppResult<Option<BlockedIp>>;
    /// Blocks in force at `now`, most recent first.
    fn list_active_blocks(&self, now: DateTime<Utc>, page: &PageRequest) -> AppResult<Page<BlockedIp>>;

    // --- audit log ---
    fn insert_audit(&self, entry: NewAuditEntry) -> AppResult<AuditEntry>;
    fn list_audit(&self, page: &PageRequest) -> AppResult<Page<AuditEntry>>;
}
