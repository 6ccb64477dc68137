//! Read models: rows joined with the users and related rows clients need.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use huddle_shared::{AppError, AppResult};

use crate::models::{AuditEntry, BlockedIp, MemberRole, Message, PublicUser, Report, Room};
use crate::store::ChatStore;

#[derive(Debug, Clone, Serialize)]
pub struct ReactionView {
    pub emoji: String,
    pub user_id: Uuid,
    pub user: Option<PublicUser>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyView {
    #[serde(flatten)]
    pub message: Message,
    pub user: Option<PublicUser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub user: Option<PublicUser>,
    pub reactions: Vec<ReactionView>,
    /// `None` when there is no parent or the parent no longer exists.
    pub reply_to: Option<ReplyView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub user_id: Uuid,
    pub user: Option<PublicUser>,
    pub role: MemberRole,
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: Room,
    pub participants: Vec<ParticipantView>,
    pub last_message: Option<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub user: Option<PublicUser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportView {
    #[serde(flatten)]
    pub report: Report,
    pub reporter: Option<PublicUser>,
    pub reviewer: Option<PublicUser>,
    pub message: Option<ReportedMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedIpView {
    #[serde(flatten)]
    pub block: BlockedIp,
    pub blocked_by_user: Option<PublicUser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntryView {
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub user: Option<PublicUser>,
}

fn directory(
    store: &dyn ChatStore,
    ids: impl IntoIterator<Item = Uuid>,
) -> AppResult<HashMap<Uuid, PublicUser>> {
    let ids: Vec<Uuid> = ids.into_iter().collect::<HashSet<_>>().into_iter().collect();
    Ok(store
        .find_users(&ids)?
        .iter()
        .map(|u| (u.id, PublicUser::from(u)))
        .collect())
}

pub fn message_views(store: &dyn ChatStore, messages: Vec<Message>) -> AppResult<Vec<MessageView>> {
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
    let parent_ids: Vec<Uuid> = messages.iter().filter_map(|m| m.reply_to_id).collect();

    let parents: HashMap<Uuid, Message> = store
        .find_messages(&parent_ids)?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    let mut reactions: HashMap<Uuid, Vec<_>> = HashMap::new();
    for reaction in store.reactions_for(&ids)? {
        reactions.entry(reaction.message_id).or_default().push(reaction);
    }

    let users = directory(
        store,
        messages
            .iter()
            .map(|m| m.user_id)
            .chain(parents.values().map(|m| m.user_id))
            .chain(reactions.values().flatten().map(|r| r.user_id)),
    )?;

    Ok(messages
        .into_iter()
        .map(|message| {
            let reply_to = message
                .reply_to_id
                .and_then(|id| parents.get(&id))
                .map(|parent| ReplyView {
                    message: parent.clone(),
                    user: users.get(&parent.user_id).cloned(),
                });
            let reactions = reactions
                .remove(&message.id)
                .unwrap_or_default()
                .into_iter()
                .map(|r| ReactionView {
                    user: users.get(&r.user_id).cloned(),
                    emoji: r.emoji,
                    user_id: r.user_id,
                    created_at: r.created_at,
                })
                .collect();
            MessageView {
                user: users.get(&message.user_id).cloned(),
                reactions,
                reply_to,
                message,
            }
        })
        .collect())
}

pub fn message_view(store: &dyn ChatStore, message: Message) -> AppResult<MessageView> {
    let mut views = message_views(store, vec![message])?;
    views
        .pop()
        .ok_or_else(|| AppError::internal("message view hydration returned nothing"))
}

pub fn room_detail(store: &dyn ChatStore, room: Room) -> AppResult<RoomDetail> {
    let memberships = store.room_memberships(room.id)?;
    let users = directory(store, memberships.iter().map(|m| m.user_id))?;
    let participants = memberships
        .into_iter()
        .map(|m| ParticipantView {
            user: users.get(&m.user_id).cloned(),
            user_id: m.user_id,
            role: m.role,
            is_muted: m.is_muted,
            muted_until: m.muted_until,
            joined_at: m.joined_at,
        })
        .collect();
    let last_message = store.last_message(room.id)?;
    Ok(RoomDetail {
        room,
        participants,
        last_message,
    })
}

pub fn report_views(store: &dyn ChatStore, reports: Vec<Report>) -> AppResult<Vec<ReportView>> {
    let message_ids: Vec<Uuid> = reports.iter().map(|r| r.message_id).collect();
    let messages: HashMap<Uuid, Message> = store
        .find_messages(&message_ids)?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    let users = directory(
        store,
        reports
            .iter()
            .flat_map(|r| std::iter::once(r.reported_by).chain(r.reviewed_by))
            .chain(messages.values().map(|m| m.user_id)),
    )?;

    Ok(reports
        .into_iter()
        .map(|report| ReportView {
            reporter: users.get(&report.reported_by).cloned(),
            reviewer: report.reviewed_by.and_then(|id| users.get(&id).cloned()),
            message: messages.get(&report.message_id).map(|m| ReportedMessage {
                message: m.clone(),
                user: users.get(&m.user_id).cloned(),
            }),
            report,
        })
        .collect())
}

pub fn blocked_ip_views(store: &dyn ChatStore, blocks: Vec<BlockedIp>) -> AppResult<Vec<BlockedIpView>> {
    let users = directory(store, blocks.iter().filter_map(|b| b.blocked_by))?;
    Ok(blocks
        .into_iter()
        .map(|block| BlockedIpView {
            blocked_by_user: block.blocked_by.and_then(|id| users.get(&id).cloned()),
            block,
        })
        .collect())
}

pub fn audit_entry_views(store: &dyn ChatStore, entries: Vec<AuditEntry>) -> AppResult<Vec<AuditEntryView>> {
    let users = directory(store, entries.iter().filter_map(|e| e.user_id))?;
    Ok(entries
        .into_iter()
        .map(|entry| AuditEntryView {
            user: entry.user_id.and_then(|id| users.get(&id).cloned()),
            entry,
        })
        .collect())
}
