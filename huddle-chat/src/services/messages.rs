use std::collections::HashSet;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use huddle_shared::types::pagination::{PageRequest, Paginated};
use huddle_shared::types::request::RequestMeta;
use huddle_shared::{AppError, AppResult, ErrorCode};

use crate::access::RoomAccess;
use crate::broadcast::{self, Broadcaster, Channel, MESSAGE_SENT};
use crate::models::{MediaRef, Message, MessageKind, NewMessage, NewReaction};
use crate::store::{ChatStore, MessageFilter};
use crate::views::{self, MessageView};

pub const DELETED_PLACEHOLDER: &str = "This message was deleted";
pub const LIST_PAGE_SIZE: u64 = 50;
pub const SEARCH_PAGE_SIZE: u64 = 20;

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub content: Option<String>,
    pub kind: MessageKind,
    pub media: Option<MediaRef>,
    pub reply_to_id: Option<Uuid>,
}

/// Push the message to the room channel, skipping `except_socket`.
pub(crate) fn announce(hub: &dyn Broadcaster, view: &MessageView, except_socket: Option<&str>) {
    let payload = json!({ "message": view });
    broadcast::publish(hub, &Channel::Room(view.message.room_id), MESSAGE_SENT, payload, except_socket);
}

fn message_in_room(store: &dyn ChatStore, access: &RoomAccess, message_id: Uuid) -> AppResult<Message> {
    store
        .find_message(message_id)?
        .filter(|m| m.room_id == access.room.id)
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))
}

fn require_author(message: &Message, actor: Uuid) -> AppResult<()> {
    if message.user_id != actor {
        return Err(AppError::new(
            ErrorCode::NotMessageAuthor,
            "only the author can change this message",
        ));
    }
    Ok(())
}

fn require_live(message: &Message) -> AppResult<()> {
    if message.is_deleted {
        return Err(AppError::new(ErrorCode::MessageDeleted, "this message has been deleted"));
    }
    Ok(())
}

/// Participant who may currently post into the room.
fn require_poster(access: &RoomAccess) -> AppResult<()> {
    let membership = access.require_participant()?;
    if membership.is_muted_at(Utc::now()) {
        return Err(AppError::new(ErrorCode::ParticipantMuted, "you are muted in this chat room"));
    }
    Ok(())
}

fn require_kind_allowed(access: &RoomAccess, kind: MessageKind) -> AppResult<()> {
    if !access.room.settings.allows(kind) {
        return Err(AppError::new(
            ErrorCode::MediaNotAllowed,
            format!("{kind} messages are not allowed in this chat room"),
        ));
    }
    Ok(())
}

pub fn send(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: Uuid,
    meta: &RequestMeta,
    room_id: Uuid,
    input: SendMessage,
) -> AppResult<MessageView> {
    let access = RoomAccess::load(store, room_id, actor)?;
    require_poster(&access)?;

    let content = input.content.unwrap_or_default();
    if content.trim().is_empty() && input.media.is_none() {
        return Err(AppError::field(
            ErrorCode::EmptyMessage,
            "content",
            "the content field is required when no media is attached",
        ));
    }
    require_kind_allowed(&access, input.kind)?;

    if let Some(parent_id) = input.reply_to_id {
        let same_room = store
            .find_message(parent_id)?
            .is_some_and(|parent| parent.room_id == room_id);
        if !same_room {
            return Err(AppError::field(
                ErrorCode::InvalidReplyTarget,
                "reply_to_id",
                "the message being replied to does not exist in this chat room",
            ));
        }
    }

    let media = input.media;
    let message = store.insert_message(NewMessage {
        room_id,
        user_id: actor,
        content,
        kind: input.kind,
        media_url: media.as_ref().map(|m| m.url.clone()),
        media_filename: media.as_ref().and_then(|m| m.filename.clone()),
        media_size: media.as_ref().and_then(|m| m.size),
        reply_to_id: input.reply_to_id,
    })?;

    tracing::info!(room_id = %room_id, actor = %actor, message_id = %message.id, kind = %message.kind, "message sent");

    let view = views::message_view(store, message)?;
    announce(hub, &view, meta.socket_id.as_deref());
    Ok(view)
}

pub fn edit(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: Uuid,
    room_id: Uuid,
    message_id: Uuid,
    content: &str,
) -> AppResult<MessageView> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;
    let message = message_in_room(store, &access, message_id)?;
    require_author(&message, actor)?;
    require_live(&message)?;

    if content.trim().is_empty() && message.media_url.is_none() {
        return Err(AppError::field(ErrorCode::EmptyMessage, "content", "the content field is required"));
    }

    let message = store.edit_message(message_id, content, Utc::now())?;
    tracing::info!(room_id = %room_id, actor = %actor, message_id = %message_id, "message edited");

    let view = views::message_view(store, message)?;
    announce(hub, &view, None);
    Ok(view)
}

/// Author-only soft delete. The row stays; its content becomes a placeholder.
pub fn soft_delete(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: Uuid,
    room_id: Uuid,
    message_id: Uuid,
) -> AppResult<MessageView> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;
    let message = message_in_room(store, &access, message_id)?;
    require_author(&message, actor)?;
    require_live(&message)?;

    let message = store.soft_delete_message(message_id, DELETED_PLACEHOLDER, Utc::now())?;
    tracing::info!(room_id = %room_id, actor = %actor, message_id = %message_id, "message deleted");

    let view = views::message_view(store, message)?;
    announce(hub, &view, None);
    Ok(view)
}

fn require_emoji(emoji: &str) -> AppResult<&str> {
    let emoji = emoji.trim();
    if emoji.is_empty() || emoji.chars().count() > 10 {
        return Err(AppError::field(
            ErrorCode::ValidationError,
            "emoji",
            "the emoji must be between 1 and 10 characters",
        ));
    }
    Ok(emoji)
}

/// Idempotent: reacting twice with the same emoji leaves one reaction.
/// Deleted messages still accept reactions.
pub fn react(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: Uuid,
    room_id: Uuid,
    message_id: Uuid,
    emoji: &str,
) -> AppResult<MessageView> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;
    let message = message_in_room(store, &access, message_id)?;
    let emoji = require_emoji(emoji)?;

    store.upsert_reaction(NewReaction {
        message_id,
        user_id: actor,
        emoji: emoji.to_string(),
    })?;
    tracing::info!(room_id = %room_id, actor = %actor, message_id = %message_id, emoji, "reaction added");

    let view = views::message_view(store, message)?;
    announce(hub, &view, None);
    Ok(view)
}

pub fn unreact(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: Uuid,
    room_id: Uuid,
    message_id: Uuid,
    emoji: &str,
) -> AppResult<MessageView> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;
    let message = message_in_room(store, &access, message_id)?;
    let emoji = require_emoji(emoji)?;

    let removed = store.delete_reaction(message_id, actor, emoji)?;
    tracing::info!(room_id = %room_id, actor = %actor, message_id = %message_id, emoji, removed, "reaction removed");

    let view = views::message_view(store, message)?;
    announce(hub, &view, None);
    Ok(view)
}

/// Room history, most recent first. Deleted messages appear with their placeholder.
pub fn list(
    store: &dyn ChatStore,
    actor: Uuid,
    room_id: Uuid,
    page: PageRequest,
) -> AppResult<Paginated<MessageView>> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;

    let filter = MessageFilter {
        search: None,
        include_deleted: true,
    };
    let (items, total) = store.list_messages(room_id, &filter, &page)?;
    Ok(Paginated::new(views::message_views(store, items)?, total, &page))
}

pub fn search(
    store: &dyn ChatStore,
    actor: Uuid,
    room_id: Uuid,
    query: &str,
    page: PageRequest,
) -> AppResult<Paginated<MessageView>> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;

    let query = query.trim();
    if query.is_empty() {
        return Err(AppError::field(ErrorCode::ValidationError, "query", "the query field is required"));
    }

    let filter = MessageFilter {
        search: Some(query.to_string()),
        include_deleted: false,
    };
    let (items, total) = store.list_messages(room_id, &filter, &page)?;
    Ok(Paginated::new(views::message_views(store, items)?, total, &page))
}

/// Copy a message into other rooms. Rooms the actor cannot post into are
/// skipped silently; only the created copies are returned.
pub fn forward(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: Uuid,
    meta: &RequestMeta,
    room_id: Uuid,
    message_id: Uuid,
    target_room_ids: &[Uuid],
) -> AppResult<Vec<MessageView>> {
    let access = RoomAccess::load(store, room_id, actor)?;
    access.require_participant()?;
    let original = message_in_room(store, &access, message_id)?;
    require_live(&original)?;

    let mut seen = HashSet::new();
    let mut forwarded = Vec::new();
    for target in target_room_ids.iter().filter(|id| seen.insert(**id)) {
        let target_access = match RoomAccess::load(store, *target, actor) {
            Ok(target_access) => target_access,
            Err(e) if e.code() == Some(ErrorCode::RoomNotFound) => continue,
            Err(e) => return Err(e),
        };
        if require_poster(&target_access).is_err() || require_kind_allowed(&target_access, original.kind).is_err() {
            tracing::debug!(room_id = %target, actor = %actor, "forward target skipped");
            continue;
        }

        let copy = store.insert_message(NewMessage {
            room_id: *target,
            user_id: actor,
            content: original.content.clone(),
            kind: original.kind,
            media_url: original.media_url.clone(),
            media_filename: original.media_filename.clone(),
            media_size: original.media_size,
            reply_to_id: None,
        })?;

        let view = views::message_view(store, copy)?;
        announce(hub, &view, meta.socket_id.as_deref());
        forwarded.push(view);
    }

    tracing::info!(
        room_id = %room_id,
        actor = %actor,
        message_id = %message_id,
        requested = target_room_ids.len(),
        forwarded = forwarded.len(),
        "message forwarded"
    );
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RoomChanges, RoomSettings};
    use crate::services::membership;
    use crate::services::testing::Fixture;
    use huddle_shared::ErrorCategory;

    fn text(content: &str) -> SendMessage {
        SendMessage {
            content: Some(content.into()),
            kind: MessageKind::Text,
            media: None,
            reply_to_id: None,
        }
    }

    fn no_meta() -> RequestMeta {
        RequestMeta::default()
    }

    #[test]
    fn send_requires_content_or_media() {
        let fx = Fixture::new();
        let a = fx.user("A");
        let room = fx.room(a, &[]);

        let empty = send(&fx.store, &fx.hub, a, &no_meta(), room, text("  ")).unwrap_err();
        assert_eq!(empty.category(), ErrorCategory::Validation);
        assert_eq!(empty.code(), Some(ErrorCode::EmptyMessage));

        let media_only = SendMessage {
            content: None,
            kind: MessageKind::Image,
            media: Some(MediaRef {
                url: "https://cdn.example/cat.png".into(),
                filename: Some("cat.png".into()),
                size: Some(2048),
            }),
            reply_to_id: None,
        };
        let view = send(&fx.store, &fx.hub, a, &no_meta(), room, media_only).unwrap();
        assert_eq!(view.message.content, "");
        assert_eq!(view.message.media_size, Some(2048));

        assert!(send(&fx.store, &fx.hub, a, &no_meta(), room, text("hi")).is_ok());
    }

    #[test]
    fn content_is_stored_as_submitted() {
        let fx = Fixture::new();
        let a = fx.user("A");
        let room = fx.room(a, &[]);

        let view = send(&fx.store, &fx.hub, a, &no_meta(), room, text("  indented\n")).unwrap();
        assert_eq!(view.message.content, "  indented\n");

        let edited = edit(&fx.store, &fx.hub, a, room, view.message.id, " second ").unwrap();
        assert_eq!(edited.message.content, " second ");

        let blank = edit(&fx.store, &fx.hub, a, room, view.message.id, "\t").unwrap_err();
        assert_eq!(blank.code(), Some(ErrorCode::EmptyMessage));
    }

    #[test]
    fn send_broadcasts_to_room_excluding_sender_connection() {
        let fx = Fixture::new();
        let (a, b) = (fx.user("A"), fx.user("B"));
        let room = fx.room(a, &[b]);
        let meta = RequestMeta::default().with_socket("sid-a");

        let view = send(&fx.store, &fx.hub, a, &meta, room, text("hi")).unwrap();

        let events = fx.hub.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, Channel::Room(room));
        assert_eq!(events[0].event, MESSAGE_SENT);
        assert_eq!(events[0].except_socket.as_deref(), Some("sid-a"));
        assert_eq!(events[0].payload["message"]["id"], view.message.id.to_string());
        assert_eq!(events[0].payload["message"]["user"]["name"], "A");
    }

    #[test]
    fn outsiders_and_muted_members_cannot_send() {
        let fx = Fixture::new();
        let (a, b, c) = (fx.user("A"), fx.user("B"), fx.user("C"));
        let room = fx.room(a, &[b]);

        let outsider = send(&fx.store, &fx.hub, c, &no_meta(), room, text("hi")).unwrap_err();
        assert_eq!(outsider.category(), ErrorCategory::Forbidden);

        membership::mute(&fx.store, a, room, b, Some(10)).unwrap();
        let muted = send(&fx.store, &fx.hub, b, &no_meta(), room, text("hi")).unwrap_err();
        assert_eq!(muted.code(), Some(ErrorCode::ParticipantMuted));

        // an elapsed mute no longer applies
        fx.store
            .set_mute(room, b, true, Some(Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();
        assert!(send(&fx.store, &fx.hub, b, &no_meta(), room, text("back")).is_ok());
        assert_eq!(fx.hub.events().len(), 1);
    }

    #[test]
    fn room_settings_gate_media_kinds() {
        let fx = Fixture::new();
        let a = fx.user("A");
        let room = fx.room(a, &[]);
        fx.store
            .update_room(
                room,
                RoomChanges {
                    settings: Some(RoomSettings {
                        allow_media: true,
                        allow_voice_messages: false,
                        message_retention_days: 30,
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

        let voice = SendMessage {
            content: None,
            kind: MessageKind::Audio,
            media: Some(MediaRef { url: "https://cdn.example/v.ogg".into(), filename: None, size: None }),
            reply_to_id: None,
        };
        let err = send(&fx.store, &fx.hub, a, &no_meta(), room, voice).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::MediaNotAllowed));
    }

    #[test]
    fn replies_must_target_the_same_room() {
        let fx = Fixture::new();
        let a = fx.user("A");
        let (room, other) = (fx.room(a, &[]), fx.room(a, &[]));
        let parent = send(&fx.store, &fx.hub, a, &no_meta(), room, text("question")).unwrap();
        let elsewhere = send(&fx.store, &fx.hub, a, &no_meta(), other, text("elsewhere")).unwrap();

        let reply = send(
            &fx.store,
            &fx.hub,
            a,
            &no_meta(),
            room,
            SendMessage { reply_to_id: Some(parent.message.id), ..text("answer") },
        )
        .unwrap();
        assert_eq!(reply.reply_to.as_ref().map(|r| r.message.id), Some(parent.message.id));
        assert_eq!(reply.reply_to.as_ref().and_then(|r| r.user.as_ref()).map(|u| u.id), Some(a));

        for bad in [elsewhere.message.id, Uuid::now_v7()] {
            let err = send(
                &fx.store,
                &fx.hub,
                a,
                &no_meta(),
                room,
                SendMessage { reply_to_id: Some(bad), ..text("answer") },
            )
            .unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::InvalidReplyTarget));
        }
    }

    #[test]
    fn only_the_author_may_edit_or_delete_even_against_owner() {
        let fx = Fixture::new();
        let (a, b) = (fx.user("A"), fx.user("B"));
        let room = fx.room(a, &[b]);
        let msg = send(&fx.store, &fx.hub, b, &no_meta(), room, text("mine")).unwrap().message;

        let edit_err = edit(&fx.store, &fx.hub, a, room, msg.id, "theirs").unwrap_err();
        assert_eq!(edit_err.category(), ErrorCategory::Forbidden);
        let delete_err = soft_delete(&fx.store, &fx.hub, a, room, msg.id).unwrap_err();
        assert_eq!(delete_err.category(), ErrorCategory::Forbidden);

        let edited = edit(&fx.store, &fx.hub, b, room, msg.id, "mine, edited").unwrap();
        assert!(edited.message.is_edited);
        assert!(edited.message.edited_at.is_some());

        let last = fx.hub.events().pop().unwrap();
        assert_eq!(last.except_socket, None);
        assert_eq!(last.payload["message"]["content"], "mine, edited");
    }

    #[test]
    fn soft_delete_is_terminal() {
        let fx = Fixture::new();
        let (a, b) = (fx.user("A"), fx.user("B"));
        let room = fx.room(a, &[b]);
        let msg = send(&fx.store, &fx.hub, a, &no_meta(), room, text("oops")).unwrap().message;
        react(&fx.store, &fx.hub, b, room, msg.id, "👍").unwrap();

        let deleted = soft_delete(&fx.store, &fx.hub, a, room, msg.id).unwrap();
        assert!(deleted.message.is_deleted);
        assert_eq!(deleted.message.content, DELETED_PLACEHOLDER);
        assert_eq!(deleted.reactions.len(), 1);

        let again = soft_delete(&fx.store, &fx.hub, a, room, msg.id).unwrap_err();
        assert_eq!(again.category(), ErrorCategory::InvalidState);
        let edit_err = edit(&fx.store, &fx.hub, a, room, msg.id, "revive").unwrap_err();
        assert_eq!(edit_err.category(), ErrorCategory::InvalidState);

        // reactions stay open on deleted messages
        assert_eq!(react(&fx.store, &fx.hub, b, room, msg.id, "😢").unwrap().reactions.len(), 2);
    }

    #[test]
    fn reacting_twice_keeps_one_row() {
        let fx = Fixture::new();
        let (a, b) = (fx.user("A"), fx.user("B"));
        let room = fx.room(a, &[b]);
        let msg = send(&fx.store, &fx.hub, a, &no_meta(), room, text("vote")).unwrap().message;

        let first = react(&fx.store, &fx.hub, b, room, msg.id, "👍").unwrap();
        let second = react(&fx.store, &fx.hub, b, room, msg.id, "👍").unwrap();
        assert_eq!(first.reactions.len(), 1);
        assert_eq!(second.reactions.len(), 1);
        assert_eq!(fx.store.reactions_for(&[msg.id]).unwrap().len(), 1);

        let cleared = unreact(&fx.store, &fx.hub, b, room, msg.id, "👍").unwrap();
        assert!(cleared.reactions.is_empty());
        // removing an absent reaction is a no-op
        assert!(unreact(&fx.store, &fx.hub, b, room, msg.id, "👍").is_ok());
    }

    #[test]
    fn list_and_search_paginate_most_recent_first() {
        let fx = Fixture::new();
        let (a, b) = (fx.user("A"), fx.user("B"));
        let room = fx.room(a, &[b]);
        for i in 0..3 {
            send(&fx.store, &fx.hub, a, &no_meta(), room, text(&format!("note {i}"))).unwrap();
        }
        let gone = send(&fx.store, &fx.hub, a, &no_meta(), room, text("note secret")).unwrap();
        soft_delete(&fx.store, &fx.hub, a, room, gone.message.id).unwrap();

        let page = list(&fx.store, b, room, PageRequest::new(1, LIST_PAGE_SIZE)).unwrap();
        assert_eq!(page.total, 4);
        assert!(page.items[0].message.is_deleted);
        assert_eq!(page.items[1].message.content, "note 2");

        let hits = search(&fx.store, b, room, "note", PageRequest::new(1, 2)).unwrap();
        assert_eq!(hits.total, 3);
        assert_eq!(hits.items.len(), 2);
        assert_eq!(hits.total_pages, 2);
        assert!(hits.items.iter().all(|m| !m.message.is_deleted));

        let blank = search(&fx.store, b, room, " ", PageRequest::new(1, SEARCH_PAGE_SIZE)).unwrap_err();
        assert_eq!(blank.category(), ErrorCategory::Validation);
        let outsider = list(&fx.store, fx.user("C"), room, PageRequest::new(1, LIST_PAGE_SIZE)).unwrap_err();
        assert_eq!(outsider.category(), ErrorCategory::Forbidden);
    }

    #[test]
    fn forward_skips_rooms_the_actor_cannot_post_into() {
        let fx = Fixture::new();
        let (a, b, c) = (fx.user("A"), fx.user("B"), fx.user("C"));
        let source = fx.room(a, &[b]);
        let open = fx.room(c, &[a]);
        let foreign = fx.room(c, &[]);
        let muted = fx.room(c, &[a]);
        membership::mute(&fx.store, c, muted, a, None).unwrap();

        let original = send(&fx.store, &fx.hub, b, &no_meta(), source, text("pass it on")).unwrap();
        let meta = RequestMeta::default().with_socket("sid-a");
        let copies = forward(
            &fx.store,
            &fx.hub,
            a,
            &meta,
            source,
            original.message.id,
            &[open, foreign, muted, Uuid::now_v7(), open],
        )
        .unwrap();

        assert_eq!(copies.len(), 1);
        let copy = &copies[0].message;
        assert_eq!(copy.room_id, open);
        assert_eq!(copy.user_id, a);
        assert_eq!(copy.content, "pass it on");
        assert_eq!(copy.reply_to_id, None);

        let last = fx.hub.events().pop().unwrap();
        assert_eq!(last.channel, Channel::Room(open));
        assert_eq!(last.except_socket.as_deref(), Some("sid-a"));
    }

    #[test]
    fn deleted_messages_cannot_be_forwarded() {
        let fx = Fixture::new();
        let a = fx.user("A");
        let (source, target) = (fx.room(a, &[]), fx.room(a, &[]));
        let msg = send(&fx.store, &fx.hub, a, &no_meta(), source, text("bye")).unwrap();
        soft_delete(&fx.store, &fx.hub, a, source, msg.message.id).unwrap();

        let err = forward(&fx.store, &fx.hub, a, &no_meta(), source, msg.message.id, &[target]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidState);
    }
}
