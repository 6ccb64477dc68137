use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use huddle_shared::types::pagination::PageRequest;
use huddle_shared::{AppError, AppResult};

use crate::models::{
    AuditEntry, BlockedIp, MemberRole, Membership, Message, NewAuditEntry, NewBlockedIp,
    NewMembership, NewMessage, NewReaction, NewReport, NewRoom, NewUser, Reaction, Report,
    ReportReview, ReportStatus, Room, RoomChanges, User, UserStatus,
};

use super::{ChatStore, MessageFilter, Page, ReportFilter, Takedown};

/// In-process store. Rows are kept in insertion order, so "most recent first"
/// is reverse iteration.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    rooms: Vec<Room>,
    memberships: Vec<Membership>,
    messages: Vec<Message>,
    reactions: Vec<Reaction>,
    reports: Vec<Report>,
    blocked_ips: Vec<BlockedIp>,
    audit: Vec<AuditEntry>,
}

fn unique_violation(what: &str) -> AppError {
    AppError::Database(DieselError::DatabaseError(
        DatabaseErrorKind::UniqueViolation,
        Box::new(format!("duplicate key value violates unique constraint on {what}")),
    ))
}

fn not_found() -> AppError {
    AppError::Database(DieselError::NotFound)
}

fn paginate<T>(rows: impl Iterator<Item = T>, page: &PageRequest) -> Page<T> {
    let rows: Vec<T> = rows.collect();
    let total = rows.len() as u64;
    let items = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    (items, total)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| AppError::internal("memory store lock poisoned"))
    }

    /// Users are owned by the identity provider; this seeds or renames one.
    pub fn upsert_user(&self, id: Uuid, name: &str, avatar_url: Option<&str>) -> AppResult<User> {
        let mut t = self.lock()?;
        if let Some(user) = t.users.iter_mut().find(|u| u.id == id) {
            user.name = name.to_string();
            user.avatar_url = avatar_url.map(str::to_string);
            return Ok(user.clone());
        }
        let user = User {
            id,
            name: name.to_string(),
            avatar_url: avatar_url.map(str::to_string),
            status: UserStatus::Offline,
            last_seen: None,
            created_at: Utc::now(),
        };
        t.users.push(user.clone());
        Ok(user)
    }
}

impl Tables {
    fn insert_membership(&mut self, new: NewMembership) -> AppResult<Membership> {
        if self
            .memberships
            .iter()
            .any(|m| m.room_id == new.room_id && m.user_id == new.user_id)
        {
            return Err(unique_violation("chat_room_members (room_id, user_id)"));
        }
        let membership = Membership {
            id: Uuid::now_v7(),
            room_id: new.room_id,
            user_id: new.user_id,
            role: new.role,
            is_muted: false,
            muted_until: None,
            joined_at: Utc::now(),
        };
        self.memberships.push(membership.clone());
        Ok(membership)
    }

    fn soft_delete(&mut self, id: Uuid, placeholder: &str, at: DateTime<Utc>) -> AppResult<Message> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(not_found)?;
        message.content = placeholder.to_string();
        message.is_deleted = true;
        message.deleted_at = Some(at);
        Ok(message.clone())
    }
}

impl ChatStore for MemoryStore {
    fn ping(&self) -> AppResult<()> {
        self.lock().map(|_| ())
    }

    fn ensure_user(&self, id: Uuid, name: Option<&str>) -> AppResult<User> {
        let row = NewUser::first_seen(id, name);
        let mut t = self.lock()?;
        if let Some(user) = t.users.iter_mut().find(|u| u.id == id) {
            if name.is_some() {
                user.name = row.name;
            }
            return Ok(user.clone());
        }
        let user = User {
            id,
            name: row.name,
            avatar_url: row.avatar_url,
            status: UserStatus::Offline,
            last_seen: None,
            created_at: Utc::now(),
        };
        t.users.push(user.clone());
        Ok(user)
    }

    fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.id == id).cloned())
    }

    fn find_users(&self, ids: &[Uuid]) -> AppResult<Vec<User>> {
        let t = self.lock()?;
        Ok(t.users.iter().filter(|u| ids.contains(&u.id)).cloned().collect())
    }

    fn update_user_status(
        &self,
        id: Uuid,
        status: UserStatus,
        last_seen: DateTime<Utc>,
    ) -> AppResult<Option<User>> {
        let mut t = self.lock()?;
        Ok(t.users.iter_mut().find(|u| u.id == id).map(|user| {
            user.status = status;
            user.last_seen = Some(last_seen);
            user.clone()
        }))
    }

    fn create_room(&self, new: NewRoom, members: &[(Uuid, MemberRole)]) -> AppResult<Room> {
        let mut t = self.lock()?;
        let now = Utc::now();
        let room = Room {
            id: Uuid::now_v7(),
            name: new.name,
            kind: new.kind,
            description: new.description,
            avatar_url: new.avatar_url,
            created_by: new.created_by,
            settings: new.settings,
            created_at: now,
            updated_at: now,
        };

        // validate the whole batch before touching any table
        for (i, (user_id, _)) in members.iter().enumerate() {
            if members[..i].iter().any(|(other, _)| other == user_id) {
                return Err(unique_violation("chat_room_members (room_id, user_id)"));
            }
        }

        t.rooms.push(room.clone());
        for (user_id, role) in members {
            t.insert_membership(NewMembership {
                room_id: room.id,
                user_id: *user_id,
                role: *role,
            })?;
        }
        Ok(room)
    }

    fn find_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        Ok(self.lock()?.rooms.iter().find(|r| r.id == id).cloned())
    }

    fn rooms_for_user(&self, user_id: Uuid) -> AppResult<Vec<Room>> {
        let t = self.lock()?;
        let mut rooms: Vec<Room> = t
            .rooms
            .iter()
            .rev()
            .filter(|r| {
                t.memberships
                    .iter()
                    .any(|m| m.room_id == r.id && m.user_id == user_id)
            })
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rooms)
    }

    fn update_room(&self, id: Uuid, changes: RoomChanges) -> AppResult<Room> {
        let mut t = self.lock()?;
        let room = t.rooms.iter_mut().find(|r| r.id == id).ok_or_else(not_found)?;
        if let Some(name) = changes.name {
            room.name = name;
        }
        if let Some(description) = changes.description {
            room.description = Some(description);
        }
        if let Some(avatar_url) = changes.avatar_url {
            room.avatar_url = Some(avatar_url);
        }
        if let Some(settings) = changes.settings {
            room.settings = settings;
        }
        if let Some(updated_at) = changes.updated_at {
            room.updated_at = updated_at;
        }
        Ok(room.clone())
    }

    fn delete_room(&self, id: Uuid) -> AppResult<()> {
        let mut t = self.lock()?;
        let before = t.rooms.len();
        t.rooms.retain(|r| r.id != id);
        if t.rooms.len() == before {
            return Err(not_found());
        }
        let doomed: Vec<Uuid> = t
            .messages
            .iter()
            .filter(|m| m.room_id == id)
            .map(|m| m.id)
            .collect();
        t.memberships.retain(|m| m.room_id != id);
        t.messages.retain(|m| m.room_id != id);
        t.reactions.retain(|r| !doomed.contains(&r.message_id));
        t.reports.retain(|r| !doomed.contains(&r.message_id));
        Ok(())
    }

    fn find_membership(&self, room_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>> {
        let t = self.lock()?;
        Ok(t.memberships
            .iter()
            .find(|m| m.room_id == room_id && m.user_id == user_id)
            .cloned())
    }

    fn room_memberships(&self, room_id: Uuid) -> AppResult<Vec<Membership>> {
        let t = self.lock()?;
        Ok(t.memberships.iter().filter(|m| m.room_id == room_id).cloned().collect())
    }

    fn insert_membership(&self, membership: NewMembership) -> AppResult<Membership> {
        self.lock()?.insert_membership(membership)
    }

    fn delete_membership(&self, room_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let mut t = self.lock()?;
        let before = t.memberships.len();
        t.memberships
            .retain(|m| !(m.room_id == room_id && m.user_id == user_id));
        Ok(t.memberships.len() != before)
    }

    fn set_mute(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Membership>> {
        let mut t = self.lock()?;
        Ok(t.memberships
            .iter_mut()
            .find(|m| m.room_id == room_id && m.user_id == user_id)
            .map(|m| {
                m.is_muted = muted;
                m.muted_until = until;
                m.clone()
            }))
    }

    fn insert_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut t = self.lock()?;
        let now = Utc::now();
        let room = t.rooms.iter_mut().find(|r| r.id == new.room_id).ok_or_else(not_found)?;
        room.updated_at = now;
        let message = Message {
            id: Uuid::now_v7(),
            room_id: new.room_id,
            user_id: new.user_id,
            content: new.content,
            kind: new.kind,
            media_url: new.media_url,
            media_filename: new.media_filename,
            media_size: new.media_size,
            reply_to_id: new.reply_to_id,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
        };
        t.messages.push(message.clone());
        Ok(message)
    }

    fn find_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.lock()?.messages.iter().find(|m| m.id == id).cloned())
    }

    fn find_messages(&self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        let t = self.lock()?;
        Ok(t.messages.iter().filter(|m| ids.contains(&m.id)).cloned().collect())
    }

    fn last_message(&self, room_id: Uuid) -> AppResult<Option<Message>> {
        let t = self.lock()?;
        Ok(t.messages.iter().rev().find(|m| m.room_id == room_id).cloned())
    }

    fn edit_message(&self, id: Uuid, content: &str, at: DateTime<Utc>) -> AppResult<Message> {
        let mut t = self.lock()?;
        let message = t.messages.iter_mut().find(|m| m.id == id).ok_or_else(not_found)?;
        message.content = content.to_string();
        message.is_edited = true;
        message.edited_at = Some(at);
        Ok(message.clone())
    }

    fn soft_delete_message(&self, id: Uuid, placeholder: &str, at: DateTime<Utc>) -> AppResult<Message> {
        self.lock()?.soft_delete(id, placeholder, at)
    }

    fn list_messages(
        &self,
        room_id: Uuid,
        filter: &MessageFilter,
        page: &PageRequest,
    ) -> AppResult<Page<Message>> {
        let t = self.lock()?;
        let rows = t
            .messages
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id)
            .filter(|m| filter.include_deleted || !m.is_deleted)
            .filter(|m| {
                filter
                    .search
                    .as_deref()
                    .map_or(true, |needle| m.content.contains(needle))
            })
            .cloned();
        Ok(paginate(rows, page))
    }

    fn upsert_reaction(&self, new: NewReaction) -> AppResult<()> {
        let mut t = self.lock()?;
        let exists = t.reactions.iter().any(|r| {
            r.message_id == new.message_id && r.user_id == new.user_id && r.emoji == new.emoji
        });
        if !exists {
            t.reactions.push(Reaction {
                id: Uuid::now_v7(),
                message_id: new.message_id,
                user_id: new.user_id,
                emoji: new.emoji,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> AppResult<bool> {
        let mut t = self.lock()?;
        let before = t.reactions.len();
        t.reactions.retain(|r| {
            !(r.message_id == message_id && r.user_id == user_id && r.emoji == emoji)
        });
        Ok(t.reactions.len() != before)
    }

    fn reactions_for(&self, message_ids: &[Uuid]) -> AppResult<Vec<Reaction>> {
        let t = self.lock()?;
        Ok(t.reactions
            .iter()
            .filter(|r| message_ids.contains(&r.message_id))
            .cloned()
            .collect())
    }

    fn insert_report(&self, new: NewReport) -> AppResult<Report> {
        let mut t = self.lock()?;
        if t.reports
            .iter()
            .any(|r| r.message_id == new.message_id && r.reported_by == new.reported_by)
        {
            return Err(unique_violation("message_reports (message_id, reported_by)"));
        }
        let report = Report {
            id: Uuid::now_v7(),
            message_id: new.message_id,
            reported_by: new.reported_by,
            reviewed_by: None,
            reason: new.reason,
            description: new.description,
            status: ReportStatus::Pending,
            moderator_notes: None,
            reviewed_at: None,
            created_at: Utc::now(),
        };
        t.reports.push(report.clone());
        Ok(report)
    }

    fn find_report(&self, id: Uuid) -> AppResult<Option<Report>> {
        Ok(self.lock()?.reports.iter().find(|r| r.id == id).cloned())
    }

    fn list_reports(&self, filter: &ReportFilter, page: &PageRequest) -> AppResult<Page<Report>> {
        let t = self.lock()?;
        let rows = t
            .reports
            .iter()
            .rev()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.reporter.map_or(true, |u| r.reported_by == u))
            .cloned();
        Ok(paginate(rows, page))
    }

    fn review_report(
        &self,
        id: Uuid,
        review: ReportReview,
        takedown: Option<Takedown<'_>>,
    ) -> AppResult<(Report, Option<Message>)> {
        let mut t = self.lock()?;
        let index = t.reports.iter().position(|r| r.id == id).ok_or_else(not_found)?;
        let message_id = t.reports[index].message_id;

        let removed = match takedown {
            Some(takedown) => {
                let at = review.reviewed_at.unwrap_or_else(Utc::now);
                Some(t.soft_delete(message_id, takedown.placeholder, at)?)
            }
            None => None,
        };

        let report = &mut t.reports[index];
        report.status = review.status;
        report.reviewed_by = review.reviewed_by;
        if review.moderator_notes.is_some() {
            report.moderator_notes = review.moderator_notes;
        }
        report.reviewed_at = review.reviewed_at;
        Ok((report.clone(), removed))
    }

    fn upsert_blocked_ip(&self, new: NewBlockedIp) -> AppResult<BlockedIp> {
        let mut t = self.lock()?;
        let now = Utc::now();
        if let Some(existing) = t.blocked_ips.iter_mut().find(|b| b.ip_address == new.ip_address) {
            existing.blocked_by = new.blocked_by;
            existing.reason = new.reason;
            existing.expires_at = new.expires_at;
            existing.is_active = true;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let block = BlockedIp {
            id: Uuid::now_v7(),
            ip_address: new.ip_address,
            blocked_by: new.blocked_by,
            reason: new.reason,
            expires_at: new.expires_at,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        t.blocked_ips.push(block.clone());
        Ok(block)
    }

    fn find_blocked_ip(&self, ip: &str) -> AppResult<Option<BlockedIp>> {
        Ok(self.lock()?.blocked_ips.iter().find(|b| b.ip_address == ip).cloned())
    }

    fn deactivate_blocked_ip(&self, ip: &str) -> AppResult<Option<BlockedIp>> {
        let mut t = self.lock()?;
        Ok(t.blocked_ips.iter_mut().find(|b| b.ip_address == ip).map(|b| {
            b.is_active = false;
            b.updated_at = Utc::now();
            b.clone()
        }))
    }

    fn list_active_blocks(&self, now: DateTime<Utc>, page: &PageRequest) -> AppResult<Page<BlockedIp>> {
        let t = self.lock()?;
        let rows = t
            .blocked_ips
            .iter()
            .rev()
            .filter(|b| b.is_blocking_at(now))
            .cloned();
        Ok(paginate(rows, page))
    }

    fn insert_audit(&self, new: NewAuditEntry) -> AppResult<AuditEntry> {
        let mut t = self.lock()?;
        let entry = AuditEntry {
            id: Uuid::now_v7(),
            user_id: new.user_id,
            action: new.action,
            target_type: new.target_type,
            target_id: new.target_id,
            old_values: new.old_values,
            new_values: new.new_values,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            created_at: Utc::now(),
        };
        t.audit.push(entry.clone());
        Ok(entry)
    }

    fn list_audit(&self, page: &PageRequest) -> AppResult<Page<AuditEntry>> {
        let t = self.lock()?;
        Ok(paginate(t.audit.iter().rev().cloned(), page))
    }
}
