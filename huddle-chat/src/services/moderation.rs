use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use huddle_shared::types::auth::AuthUser;
use huddle_shared::types::pagination::{PageRequest, Paginated};
use huddle_shared::types::request::RequestMeta;
use huddle_shared::{AppError, AppResult, ErrorCode};

use super::messages::announce;
use super::on_conflict;
use crate::access::{require_moderator, RoomAccess};
use crate::audit::{self, AuditEvent, AuditTarget};
use crate::broadcast::Broadcaster;
use crate::models::{AuditAction, NewBlockedIp, NewReport, Report, ReportReason, ReportReview, ReportStatus};
use crate::store::{ChatStore, ReportFilter, Takedown};
use crate::views::{self, AuditEntryView, BlockedIpView, ReportView};

pub const MODERATION_PLACEHOLDER: &str = "This message was removed by moderation";
pub const MY_REPORTS_PAGE_SIZE: u64 = 20;
pub const REPORTS_PAGE_SIZE: u64 = 20;
pub const BLOCKED_IPS_PAGE_SIZE: u64 = 20;
pub const AUDIT_PAGE_SIZE: u64 = 50;

/// Flag a message for moderator review. One report per (message, reporter).
pub fn report(
    store: &dyn ChatStore,
    actor: &AuthUser,
    meta: &RequestMeta,
    message_id: Uuid,
    reason: ReportReason,
    description: Option<String>,
) -> AppResult<ReportView> {
    let message = store
        .find_message(message_id)?
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))?;
    RoomAccess::load(store, message.room_id, actor.id)?.require_participant()?;

    let description = description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
    let report = store
        .insert_report(NewReport {
            message_id,
            reported_by: actor.id,
            reason,
            description,
        })
        .map_err(on_conflict(ErrorCode::DuplicateReport, "you have already reported this message"))?;

    tracing::info!(actor = %actor.id, message_id = %message_id, report_id = %report.id, reason = %reason, "message reported");

    audit::record(
        store,
        actor.id,
        meta,
        AuditEvent::new(AuditAction::MessageReported)
            .on(AuditTarget::Message(message_id))
            .new_values(json!({ "report_id": report.id, "reason": reason })),
    );

    first_view(store, report)
}

fn first_view(store: &dyn ChatStore, report: Report) -> AppResult<ReportView> {
    views::report_views(store, vec![report])?
        .pop()
        .ok_or_else(|| AppError::internal("report view missing"))
}

pub fn my_reports(store: &dyn ChatStore, actor: &AuthUser, page: PageRequest) -> AppResult<Paginated<ReportView>> {
    let filter = ReportFilter {
        status: None,
        reporter: Some(actor.id),
    };
    let (items, total) = store.list_reports(&filter, &page)?;
    Ok(Paginated::new(views::report_views(store, items)?, total, &page))
}

/// Moderator queue. Defaults to pending reports.
pub fn list_reports(
    store: &dyn ChatStore,
    actor: &AuthUser,
    status: Option<ReportStatus>,
    page: PageRequest,
) -> AppResult<Paginated<ReportView>> {
    require_moderator(actor)?;
    let filter = ReportFilter {
        status: Some(status.unwrap_or(ReportStatus::Pending)),
        reporter: None,
    };
    let (items, total) = store.list_reports(&filter, &page)?;
    Ok(Paginated::new(views::report_views(store, items)?, total, &page))
}

#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub status: ReportStatus,
    pub moderator_notes: Option<String>,
}

/// Close a pending report. Resolving it also takes the message down in the
/// same unit of work.
pub fn review(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: &AuthUser,
    meta: &RequestMeta,
    report_id: Uuid,
    decision: ReviewDecision,
) -> AppResult<ReportView> {
    require_moderator(actor)?;
    if decision.status == ReportStatus::Pending {
        return Err(AppError::field(
            ErrorCode::ValidationError,
            "status",
            "the status must be reviewed, resolved or dismissed",
        ));
    }

    let existing = store
        .find_report(report_id)?
        .ok_or_else(|| AppError::new(ErrorCode::ReportNotFound, "report not found"))?;
    if existing.status != ReportStatus::Pending {
        return Err(AppError::invalid_state("this report has already been reviewed"));
    }

    let original = match decision.status {
        ReportStatus::Resolved => store.find_message(existing.message_id)?,
        _ => None,
    };
    let takedown = (decision.status == ReportStatus::Resolved).then_some(Takedown {
        placeholder: MODERATION_PLACEHOLDER,
    });

    let notes = decision.moderator_notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    let (report, removed) = store.review_report(
        report_id,
        ReportReview {
            status: decision.status,
            reviewed_by: Some(actor.id),
            moderator_notes: notes.clone(),
            reviewed_at: Some(Utc::now()),
        },
        takedown,
    )?;

    tracing::info!(
        actor = %actor.id,
        report_id = %report_id,
        from = %existing.status,
        to = %report.status,
        "report reviewed"
    );

    if let Some(message) = removed {
        audit::record(
            store,
            actor.id,
            meta,
            AuditEvent::new(AuditAction::MessageDeletedByModeration)
                .on(AuditTarget::Message(message.id))
                .old_values(json!({ "content": original.map(|m| m.content) }))
                .new_values(json!({ "is_deleted": true, "report_id": report_id })),
        );
        let view = views::message_view(store, message)?;
        announce(hub, &view, None);
    }

    audit::record(
        store,
        actor.id,
        meta,
        AuditEvent::new(AuditAction::ReportReviewed)
            .on(AuditTarget::Report(report_id))
            .old_values(json!({ "status": existing.status }))
            .new_values(json!({ "status": report.status, "moderator_notes": notes })),
    );

    first_view(store, report)
}

/// Block an ip, or refresh an existing block and re-attribute it to `actor`.
pub fn block_ip(
    store: &dyn ChatStore,
    actor: &AuthUser,
    meta: &RequestMeta,
    ip: IpAddr,
    reason: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> AppResult<BlockedIpView> {
    require_moderator(actor)?;
    if expires_at.is_some_and(|at| at <= Utc::now()) {
        return Err(AppError::field(
            ErrorCode::ValidationError,
            "expires_at",
            "the expiry must be a date in the future",
        ));
    }

    let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    let block = store.upsert_blocked_ip(NewBlockedIp {
        ip_address: ip.to_string(),
        blocked_by: Some(actor.id),
        reason: reason.clone(),
        expires_at,
    })?;

    tracing::info!(actor = %actor.id, ip = %ip, expires_at = ?expires_at, "ip blocked");

    audit::record(
        store,
        actor.id,
        meta,
        AuditEvent::new(AuditAction::IpBlocked)
            .on(AuditTarget::BlockedIp(block.id))
            .new_values(json!({ "ip_address": block.ip_address, "reason": reason, "expires_at": expires_at })),
    );

    views::blocked_ip_views(store, vec![block])?
        .pop()
        .ok_or_else(|| AppError::internal("blocked ip view missing"))
}

pub fn unblock_ip(store: &dyn ChatStore, actor: &AuthUser, meta: &RequestMeta, ip: IpAddr) -> AppResult<()> {
    require_moderator(actor)?;
    let address = ip.to_string();
    store
        .deactivate_blocked_ip(&address)?
        .ok_or_else(|| AppError::new(ErrorCode::BlockedIpNotFound, "this ip address is not blocked"))?;

    tracing::info!(actor = %actor.id, ip = %ip, "ip unblocked");

    // looked up by address, so the entry carries no target
    audit::record(
        store,
        actor.id,
        meta,
        AuditEvent::new(AuditAction::IpUnblocked).new_values(json!({ "ip_address": address })),
    );
    Ok(())
}

pub fn list_blocked_ips(
    store: &dyn ChatStore,
    actor: &AuthUser,
    page: PageRequest,
) -> AppResult<Paginated<BlockedIpView>> {
    require_moderator(actor)?;
    let (items, total) = store.list_active_blocks(Utc::now(), &page)?;
    Ok(Paginated::new(views::blocked_ip_views(store, items)?, total, &page))
}

pub fn list_audit_logs(
    store: &dyn ChatStore,
    actor: &AuthUser,
    page: PageRequest,
) -> AppResult<Paginated<AuditEntryView>> {
    require_moderator(actor)?;
    let (items, total) = store.list_audit(&page)?;
    Ok(Paginated::new(views::audit_entry_views(store, items)?, total, &page))
}

/// Whether a block is in force for `ip` at `now`. Expiry is evaluated here, not swept.
pub fn is_ip_blocked(store: &dyn ChatStore, ip: IpAddr, now: DateTime<Utc>) -> AppResult<bool> {
    Ok(store
        .find_blocked_ip(&ip.to_string())?
        .is_some_and(|block| block.is_blocking_at(now)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use huddle_shared::types::auth::UserRole;
    use huddle_shared::ErrorCategory;

    use crate::broadcast::{Channel, MESSAGE_SENT};
    use crate::models::{AuditTargetKind, MessageKind};
    use crate::services::messages::{self, SendMessage};
    use crate::services::testing::Fixture;

    fn user(id: Uuid) -> AuthUser {
        AuthUser::new(id, UserRole::User)
    }

    fn moderator(fx: &Fixture) -> AuthUser {
        AuthUser::new(fx.user("Mod"), UserRole::Moderator)
    }

    fn meta() -> RequestMeta {
        RequestMeta::new(Some("198.51.100.4".into()), Some("test-agent".into()))
    }

    /// Room with A (owner) and B, plus one message from A.
    fn reported_setup(fx: &Fixture) -> (Uuid, Uuid, Uuid, Uuid) {
        let (a, b) = (fx.user("A"), fx.user("B"));
        let room = fx.room(a, &[b]);
        let message = messages::send(
            &fx.store,
            &fx.hub,
            a,
            &RequestMeta::default(),
            room,
            SendMessage {
                content: Some("buy cheap stuff".into()),
                kind: MessageKind::Text,
                media: None,
                reply_to_id: None,
            },
        )
        .unwrap()
        .message;
        (a, b, room, message.id)
    }

    fn audit_actions(fx: &Fixture) -> Vec<AuditAction> {
        let (entries, _) = fx.store.list_audit(&PageRequest::new(1, AUDIT_PAGE_SIZE)).unwrap();
        entries.into_iter().map(|e| e.action).collect()
    }

    #[test]
    fn reporting_twice_is_a_conflict() {
        let fx = Fixture::new();
        let (_, b, _, message) = reported_setup(&fx);

        let first = report(&fx.store, &user(b), &meta(), message, ReportReason::Spam, None).unwrap();
        assert_eq!(first.report.status, ReportStatus::Pending);
        assert_eq!(first.reporter.as_ref().map(|u| u.name.as_str()), Some("B"));

        let second = report(&fx.store, &user(b), &meta(), message, ReportReason::Other, None).unwrap_err();
        assert_eq!(second.code(), Some(ErrorCode::DuplicateReport));
        assert_eq!(second.category(), ErrorCategory::Conflict);

        let mine = my_reports(&fx.store, &user(b), PageRequest::new(1, MY_REPORTS_PAGE_SIZE)).unwrap();
        assert_eq!(mine.total, 1);
        assert_eq!(audit_actions(&fx), vec![AuditAction::MessageReported]);
    }

    #[test]
    fn reporters_must_see_the_message() {
        let fx = Fixture::new();
        let (_, _, _, message) = reported_setup(&fx);
        let outsider = fx.user("C");

        let err = report(&fx.store, &user(outsider), &meta(), message, ReportReason::Spam, None).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);
        let missing = report(&fx.store, &user(outsider), &meta(), Uuid::now_v7(), ReportReason::Spam, None)
            .unwrap_err();
        assert_eq!(missing.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn moderation_queue_requires_moderator_role() {
        let fx = Fixture::new();
        let (a, b, _, message) = reported_setup(&fx);
        let filed = report(&fx.store, &user(b), &meta(), message, ReportReason::Spam, None).unwrap();
        let page = PageRequest::new(1, REPORTS_PAGE_SIZE);

        let denied = list_reports(&fx.store, &user(a), None, page).unwrap_err();
        assert_eq!(denied.code(), Some(ErrorCode::ModeratorRequired));
        let denied = review(
            &fx.store,
            &fx.hub,
            &user(a),
            &meta(),
            filed.report.id,
            ReviewDecision { status: ReportStatus::Dismissed, moderator_notes: None },
        )
        .unwrap_err();
        assert_eq!(denied.category(), ErrorCategory::Forbidden);

        let queue = list_reports(&fx.store, &moderator(&fx), None, page).unwrap();
        assert_eq!(queue.total, 1);
        let author = queue.items[0].message.as_ref().and_then(|m| m.user.as_ref()).map(|u| u.id);
        assert_eq!(author, Some(a));
    }

    #[test]
    fn resolving_takes_the_message_down_and_audits_twice() {
        let fx = Fixture::new();
        let (_, b, room, message) = reported_setup(&fx);
        let filed = report(&fx.store, &user(b), &meta(), message, ReportReason::Spam, None).unwrap();
        let moderator = moderator(&fx);

        let reviewed = review(
            &fx.store,
            &fx.hub,
            &moderator,
            &meta(),
            filed.report.id,
            ReviewDecision { status: ReportStatus::Resolved, moderator_notes: Some("spam".into()) },
        )
        .unwrap();
        assert_eq!(reviewed.report.status, ReportStatus::Resolved);
        assert_eq!(reviewed.report.reviewed_by, Some(moderator.id));
        assert_eq!(reviewed.reviewer.as_ref().map(|u| u.id), Some(moderator.id));

        let taken_down = fx.store.find_message(message).unwrap().unwrap();
        assert!(taken_down.is_deleted);
        assert_eq!(taken_down.content, MODERATION_PLACEHOLDER);

        let last = fx.hub.events().pop().unwrap();
        assert_eq!(last.channel, Channel::Room(room));
        assert_eq!(last.event, MESSAGE_SENT);
        assert_eq!(last.payload["message"]["content"], MODERATION_PLACEHOLDER);

        let (entries, _) = fx.store.list_audit(&PageRequest::new(1, AUDIT_PAGE_SIZE)).unwrap();
        let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::ReportReviewed,
                AuditAction::MessageDeletedByModeration,
                AuditAction::MessageReported,
            ]
        );
        assert_eq!(entries[0].old_values, Some(json!({ "status": "pending" })));
        assert_eq!(entries[1].target_type, Some(AuditTargetKind::Message));

        let again = review(
            &fx.store,
            &fx.hub,
            &moderator,
            &meta(),
            filed.report.id,
            ReviewDecision { status: ReportStatus::Dismissed, moderator_notes: None },
        )
        .unwrap_err();
        assert_eq!(again.category(), ErrorCategory::InvalidState);
    }

    #[test]
    fn dismissing_leaves_the_message_alone() {
        let fx = Fixture::new();
        let (_, b, _, message) = reported_setup(&fx);
        let filed = report(&fx.store, &user(b), &meta(), message, ReportReason::Harassment, None).unwrap();
        let events_before = fx.hub.events().len();

        review(
            &fx.store,
            &fx.hub,
            &moderator(&fx),
            &meta(),
            filed.report.id,
            ReviewDecision { status: ReportStatus::Dismissed, moderator_notes: None },
        )
        .unwrap();

        assert!(!fx.store.find_message(message).unwrap().unwrap().is_deleted);
        assert_eq!(fx.hub.events().len(), events_before);
        assert_eq!(audit_actions(&fx)[0], AuditAction::ReportReviewed);

        let pending = review(
            &fx.store,
            &fx.hub,
            &moderator(&fx),
            &meta(),
            Uuid::now_v7(),
            ReviewDecision { status: ReportStatus::Pending, moderator_notes: None },
        )
        .unwrap_err();
        assert_eq!(pending.category(), ErrorCategory::Validation);
    }

    #[test]
    fn expired_blocks_stop_blocking() {
        let fx = Fixture::new();
        let moderator = moderator(&fx);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let now = Utc::now();

        let block = block_ip(&fx.store, &moderator, &meta(), ip, Some("abuse".into()), Some(now + Duration::hours(1)))
            .unwrap();
        assert_eq!(block.blocked_by_user.as_ref().map(|u| u.id), Some(moderator.id));
        assert!(is_ip_blocked(&fx.store, ip, now).unwrap());
        assert!(!is_ip_blocked(&fx.store, ip, now + Duration::hours(2)).unwrap());
        assert!(!is_ip_blocked(&fx.store, "203.0.113.10".parse().unwrap(), now).unwrap());

        let past = block_ip(&fx.store, &moderator, &meta(), ip, None, Some(now - Duration::minutes(1))).unwrap_err();
        assert_eq!(past.category(), ErrorCategory::Validation);
    }

    #[test]
    fn unblock_deactivates_and_audits_without_target() {
        let fx = Fixture::new();
        let moderator = moderator(&fx);
        let ip: IpAddr = "2001:db8::1".parse().unwrap();

        block_ip(&fx.store, &moderator, &meta(), ip, None, None).unwrap();
        let listed = list_blocked_ips(&fx.store, &moderator, PageRequest::new(1, BLOCKED_IPS_PAGE_SIZE)).unwrap();
        assert_eq!(listed.total, 1);

        unblock_ip(&fx.store, &moderator, &meta(), ip).unwrap();
        assert!(!is_ip_blocked(&fx.store, ip, Utc::now()).unwrap());
        let listed = list_blocked_ips(&fx.store, &moderator, PageRequest::new(1, BLOCKED_IPS_PAGE_SIZE)).unwrap();
        assert_eq!(listed.total, 0);

        let logs = list_audit_logs(&fx.store, &moderator, PageRequest::new(1, AUDIT_PAGE_SIZE)).unwrap();
        assert_eq!(logs.items[0].entry.action, AuditAction::IpUnblocked);
        assert_eq!(logs.items[0].entry.target_type, None);
        assert_eq!(logs.items[0].entry.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(logs.items[1].entry.action, AuditAction::IpBlocked);

        let unknown = unblock_ip(&fx.store, &moderator, &meta(), "192.0.2.55".parse().unwrap()).unwrap_err();
        assert_eq!(unknown.category(), ErrorCategory::NotFound);
    }
}
