use std::collections::HashSet;

use chrono::{Duration, Utc};
use uuid::Uuid;

use huddle_shared::{AppError, AppResult, ErrorCode};

use crate::access::RoomAccess;
use crate::broadcast::{self, Broadcaster, Channel};
use crate::models::{MemberRole, Membership, NewMembership, NewRoom, RoomChanges, RoomKind, RoomSettings};
use crate::services::on_conflict;
use crate::store::ChatStore;
use crate::views::{self, RoomDetail};

pub const MAX_MUTE_MINUTES: i64 = 43_200;

#[derive(Debug, Clone)]
pub struct CreateRoom {
    pub name: String,
    pub kind: RoomKind,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub participant_ids: Vec<Uuid>,
    pub settings: Option<RoomSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRoom {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub settings: Option<RoomSettings>,
}

fn require_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::field(ErrorCode::ValidationError, "name", "the name field is required"));
    }
    Ok(name.to_string())
}

/// Create a room; the creator becomes its owner and every listed user a member.
pub fn create_room(store: &dyn ChatStore, actor: Uuid, input: CreateRoom) -> AppResult<RoomDetail> {
    let name = require_name(&input.name)?;

    let mut seen = HashSet::new();
    let invited: Vec<Uuid> = input
        .participant_ids
        .into_iter()
        .filter(|id| *id != actor && seen.insert(*id))
        .collect();

    let known = store.find_users(&invited)?;
    if known.len() != invited.len() {
        return Err(AppError::field(
            ErrorCode::ValidationError,
            "participant_ids",
            "the selected participant does not exist",
        ));
    }

    let mut members = vec![(actor, MemberRole::Owner)];
    members.extend(invited.iter().map(|id| (*id, MemberRole::Member)));

    let room = store.create_room(
        NewRoom {
            name,
            kind: input.kind,
            description: input.description,
            avatar_url: input.avatar_url,
            created_by: Some(actor),
            settings: input.settings.unwrap_or_default(),
        },
        &members,
    )?;

    tracing::info!(room_id = %room.id, owner = %actor, participants = members.len(), "chat room created");
    views::room_detail(store, room)
}

pub fn list_rooms(store: &dyn ChatStore, actor: Uuid) -> AppResult<Vec<RoomDetail>> {
    store
        .rooms_for_user(actor)?
        .into_iter()
        .map(|room| views::room_detail(store, room))
        .collect()
}

pub fn show_room(store: &dyn ChatStore, actor: Uuid, room_id: Uuid) -> AppResult<RoomDetail> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;
    views::room_detail(store, access.room)
}

pub fn update_room(
    store: &dyn ChatStore,
    actor: Uuid,
    room_id: Uuid,
    input: UpdateRoom,
) -> AppResult<RoomDetail> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_admin()?;

    let name = input.name.as_deref().map(require_name).transpose()?;
    let room = store.update_room(
        room_id,
        RoomChanges {
            name,
            description: input.description,
            avatar_url: input.avatar_url,
            settings: input.settings,
            updated_at: Some(Utc::now()),
        },
    )?;

    tracing::info!(room_id = %room_id, actor = %actor, "chat room updated");
    views::room_detail(store, room)
}

pub fn delete_room(store: &dyn ChatStore, actor: Uuid, room_id: Uuid) -> AppResult<()> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_owner()?;
    store.delete_room(room_id)?;
    tracing::info!(room_id = %room_id, actor = %actor, "chat room deleted");
    Ok(())
}

pub fn add_participant(
    store: &dyn ChatStore,
    actor: Uuid,
    room_id: Uuid,
    target: Uuid,
    role: MemberRole,
) -> AppResult<Membership> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_admin()?;

    if role == MemberRole::Owner {
        return Err(AppError::field(
            ErrorCode::ValidationError,
            "role",
            "the selected role is invalid",
        ));
    }
    if store.find_user(target)?.is_none() {
        return Err(AppError::new(ErrorCode::UserNotFound, "user not found"));
    }

    let membership = store
        .insert_membership(NewMembership {
            room_id,
            user_id: target,
            role,
        })
        .map_err(on_conflict(ErrorCode::AlreadyParticipant, "user is already a participant"))?;

    tracing::info!(room_id = %room_id, actor = %actor, target = %target, role = %role, "participant added");
    Ok(membership)
}

/// Remove `target` from the room. Removing yourself needs only membership;
/// removing anyone else needs admin. The owner can never be removed.
/// The target's live connections stop receiving the room channel.
pub fn remove_participant(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: Uuid,
    room_id: Uuid,
    target: Uuid,
) -> AppResult<()> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;

    let target_membership = if target == actor {
        access.membership.clone()
    } else {
        store.find_membership(room_id, target)?
    };

    if target_membership.as_ref().map(|m| m.role) == Some(MemberRole::Owner) {
        return Err(AppError::new(
            ErrorCode::OwnerMustTransfer,
            "the owner cannot leave or be removed; transfer ownership first",
        ));
    }
    if target != actor {
        access.require_admin()?;
    }
    if target_membership.is_none() {
        return Err(AppError::new(ErrorCode::ParticipantNotFound, "user is not a participant"));
    }

    store.delete_membership(room_id, target)?;
    tracing::info!(room_id = %room_id, actor = %actor, target = %target, "participant removed");

    broadcast::evict(hub, target, &Channel::Room(room_id));
    Ok(())
}

pub fn leave(store: &dyn ChatStore, hub: &dyn Broadcaster, actor: Uuid, room_id: Uuid) -> AppResult<()> {
    remove_participant(store, hub, actor, room_id, actor)
}

/// Mute a participant, indefinitely when no duration is given.
pub fn mute(
    store: &dyn ChatStore,
    actor: Uuid,
    room_id: Uuid,
    target: Uuid,
    duration_minutes: Option<i64>,
) -> AppResult<Membership> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_admin()?;

    if let Some(minutes) = duration_minutes {
        if !(1..=MAX_MUTE_MINUTES).contains(&minutes) {
            return Err(AppError::field(
                ErrorCode::ValidationError,
                "duration_minutes",
                format!("the duration must be between 1 and {MAX_MUTE_MINUTES} minutes"),
            ));
        }
    }

    let until = duration_minutes.map(|m| Utc::now() + Duration::minutes(m));
    let membership = store
        .set_mute(room_id, target, true, until)?
        .ok_or_else(|| AppError::new(ErrorCode::ParticipantNotFound, "user is not a participant"))?;

    tracing::info!(room_id = %room_id, actor = %actor, target = %target, until = ?until, "participant muted");
    Ok(membership)
}

pub fn unmute(store: &dyn ChatStore, actor: Uuid, room_id: Uuid, target: Uuid) -> AppResult<Membership> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_admin()?;

    let membership = store
        .set_mute(room_id, target, false, None)?
        .ok_or_else(|| AppError::new(ErrorCode::ParticipantNotFound, "user is not a participant"))?;

    tracing::info!(room_id = %room_id, actor = %actor, target = %target, "participant unmuted");
    Ok(membership)
}
