//! Room role resolution. Every room and message operation goes through
//! [`RoomAccess`] before touching state.

use uuid::Uuid;

use huddle_shared::types::auth::AuthUser;
use huddle_shared::{AppError, AppResult, ErrorCode};

use crate::models::{MemberRole, Membership, Room};
use crate::store::ChatStore;

/// Effective role of a user in a room. `None` means not a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoomRole {
    None,
    Member,
    Admin,
    Owner,
}

impl From<MemberRole> for RoomRole {
    fn from(role: MemberRole) -> Self {
        match role {
            MemberRole::Member => RoomRole::Member,
            MemberRole::Admin => RoomRole::Admin,
            MemberRole::Owner => RoomRole::Owner,
        }
    }
}

pub fn role_of(membership: Option<&Membership>) -> RoomRole {
    membership.map_or(RoomRole::None, |m| m.role.into())
}

/// A loaded room together with the caller's membership in it.
#[derive(Debug, Clone)]
pub struct RoomAccess {
    pub room: Room,
    pub actor: Uuid,
    pub membership: Option<Membership>,
}

impl RoomAccess {
    pub fn load(store: &dyn ChatStore, room_id: Uuid, actor: Uuid) -> AppResult<Self> {
        let room = store
            .find_room(room_id)?
            .ok_or_else(|| AppError::new(ErrorCode::RoomNotFound, "chat room not found"))?;
        let membership = store.find_membership(room_id, actor)?;
        Ok(Self {
            room,
            actor,
            membership,
        })
    }

    pub fn role(&self) -> RoomRole {
        role_of(self.membership.as_ref())
    }

    pub fn require_participant(&self) -> AppResult<&Membership> {
        self.membership.as_ref().ok_or_else(|| {
            AppError::new(
                ErrorCode::NotRoomParticipant,
                "you are not a participant of this chat room",
            )
        })
    }

    pub fn require_admin(&self) -> AppResult<&Membership> {
        let membership = self.require_participant()?;
        if self.role() < RoomRole::Admin {
            return Err(AppError::new(
                ErrorCode::RoomAdminRequired,
                "only room admins can perform this action",
            ));
        }
        Ok(membership)
    }

    pub fn require_owner(&self) -> AppResult<&Membership> {
        match &self.membership {
            Some(m) if m.role == MemberRole::Owner => Ok(m),
            _ => Err(AppError::new(
                ErrorCode::RoomOwnerRequired,
                "only the room owner can perform this action",
            )),
        }
    }
}

pub fn is_admin(store: &dyn ChatStore, room_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    Ok(role_of(store.find_membership(room_id, user_id)?.as_ref()) >= RoomRole::Admin)
}

pub fn is_owner(store: &dyn ChatStore, room_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    Ok(role_of(store.find_membership(room_id, user_id)?.as_ref()) == RoomRole::Owner)
}

/// Moderation endpoints need a global moderator or admin role.
pub fn require_moderator(actor: &AuthUser) -> AppResult<()> {
    if actor.is_moderator() {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorCode::ModeratorRequired,
            "only moderators can perform this action",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRoom, RoomKind, RoomSettings};
    use crate::store::MemoryStore;
    use huddle_shared::types::auth::UserRole;
    use huddle_shared::ErrorCategory;

    fn seeded() -> (MemoryStore, Uuid, Uuid, Uuid, Uuid) {
        let store = MemoryStore::new();
        let (owner, admin, member) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let room = store
            .create_room(
                NewRoom {
                    name: "ops".into(),
                    kind: RoomKind::Group,
                    description: None,
                    avatar_url: None,
                    created_by: Some(owner),
                    settings: RoomSettings::default(),
                },
                &[
                    (owner, MemberRole::Owner),
                    (admin, MemberRole::Admin),
                    (member, MemberRole::Member),
                ],
            )
            .unwrap();
        (store, room.id, owner, admin, member)
    }

    #[test]
    fn roles_are_ordered_by_privilege() {
        assert!(RoomRole::Owner > RoomRole::Admin);
        assert!(RoomRole::Admin > RoomRole::Member);
        assert!(RoomRole::Member > RoomRole::None);
    }

    #[test]
    fn predicates_follow_membership() {
        let (store, room, owner, admin, member) = seeded();
        assert!(is_owner(&store, room, owner).unwrap());
        assert!(is_admin(&store, room, owner).unwrap());
        assert!(is_admin(&store, room, admin).unwrap());
        assert!(!is_owner(&store, room, admin).unwrap());
        assert!(!is_admin(&store, room, member).unwrap());
        assert!(!is_admin(&store, room, Uuid::now_v7()).unwrap());
    }

    #[test]
    fn access_checks_yield_typed_errors() {
        let (store, room, owner, admin, member) = seeded();
        let stranger = RoomAccess::load(&store, room, Uuid::now_v7()).unwrap();
        assert_eq!(stranger.role(), RoomRole::None);
        assert_eq!(
            stranger.require_participant().unwrap_err().code(),
            Some(ErrorCode::NotRoomParticipant)
        );

        let as_member = RoomAccess::load(&store, room, member).unwrap();
        assert_eq!(
            as_member.require_admin().unwrap_err().category(),
            ErrorCategory::Forbidden
        );

        assert!(RoomAccess::load(&store, room, admin).unwrap().require_admin().is_ok());
        assert!(RoomAccess::load(&store, room, admin).unwrap().require_owner().is_err());
        assert!(RoomAccess::load(&store, room, owner).unwrap().require_owner().is_ok());

        let missing = RoomAccess::load(&store, Uuid::now_v7(), owner).unwrap_err();
        assert_eq!(missing.code(), Some(ErrorCode::RoomNotFound));
    }

    #[test]
    fn moderator_gate_uses_global_role() {
        let id = Uuid::now_v7();
        assert!(require_moderator(&AuthUser::new(id, UserRole::Moderator)).is_ok());
        assert!(require_moderator(&AuthUser::new(id, UserRole::Admin)).is_ok());
        let err = require_moderator(&AuthUser::new(id, UserRole::User)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);
    }
}
