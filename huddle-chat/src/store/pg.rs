use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use uuid::Uuid;

use huddle_shared::db::DbPool;
use huddle_shared::types::pagination::PageRequest;
use huddle_shared::{AppError, AppResult};

use crate::models::{
    AuditEntry, BlockedIp, MemberRole, Membership, Message, NewAuditEntry, NewBlockedIp,
    NewMembership, NewMessage, NewReaction, NewReport, NewRoom, NewUser, Reaction, Report,
    ReportReview, Room, RoomChanges, User, UserStatus,
};
use crate::schema::{
    audit_logs, blocked_ips, chat_room_members, chat_rooms, message_reactions, message_reports,
    messages, users,
};

use super::{ChatStore, MessageFilter, Page, ReportFilter, Takedown};

type Conn = PooledConnection<ConnectionManager<PgConnection>>;

/// Postgres-backed store over an r2d2 pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> AppResult<Conn> {
        self.pool.get().map_err(|e| AppError::Internal(e.into()))
    }
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl ChatStore for PgStore {
    fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn()?;
        diesel::sql_query("SELECT 1").execute(&mut conn)?;
        Ok(())
    }

    fn ensure_user(&self, id: Uuid, name: Option<&str>) -> AppResult<User> {
        let mut conn = self.conn()?;
        let row = NewUser::first_seen(id, name);
        let insert = diesel::insert_into(users::table)
            .values(&row)
            .on_conflict(users::id);

        let user = match name {
            Some(_) => insert
                .do_update()
                .set(users::name.eq(&row.name))
                .get_result::<User>(&mut conn)?,
            None => {
                insert.do_nothing().execute(&mut conn)?;
                users::table.find(id).first::<User>(&mut conn)?
            }
        };
        Ok(user)
    }

    fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table.find(id).first::<User>(&mut conn).optional()?)
    }

    fn find_users(&self, ids: &[Uuid]) -> AppResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        Ok(users::table
            .filter(users::id.eq_any(ids))
            .load::<User>(&mut conn)?)
    }

    fn update_user_status(
        &self,
        id: Uuid,
        status: UserStatus,
        last_seen: DateTime<Utc>,
    ) -> AppResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(diesel::update(users::table.find(id))
            .set((users::status.eq(status), users::last_seen.eq(Some(last_seen))))
            .get_result::<User>(&mut conn)
            .optional()?)
    }

    fn create_room(&self, room: NewRoom, members: &[(Uuid, MemberRole)]) -> AppResult<Room> {
        let mut conn = self.conn()?;
        conn.transaction::<_, AppError, _>(|conn| {
            let room: Room = diesel::insert_into(chat_rooms::table)
                .values(&room)
                .get_result(conn)?;

            let rows: Vec<NewMembership> = members
                .iter()
                .map(|(user_id, role)| NewMembership {
                    room_id: room.id,
                    user_id: *user_id,
                    role: *role,
                })
                .collect();
            diesel::insert_into(chat_room_members::table)
                .values(&rows)
                .execute(conn)?;

            Ok(room)
        })
    }

    fn find_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        let mut conn = self.conn()?;
        Ok(chat_rooms::table.find(id).first::<Room>(&mut conn).optional()?)
    }

    fn rooms_for_user(&self, user_id: Uuid) -> AppResult<Vec<Room>> {
        let mut conn = self.conn()?;
        let room_ids = chat_room_members::table
            .filter(chat_room_members::user_id.eq(user_id))
            .select(chat_room_members::room_id);
        Ok(chat_rooms::table
            .filter(chat_rooms::id.eq_any(room_ids))
            .order(chat_rooms::updated_at.desc())
            .load::<Room>(&mut conn)?)
    }

    fn update_room(&self, id: Uuid, changes: RoomChanges) -> AppResult<Room> {
        let mut conn = self.conn()?;
        Ok(diesel::update(chat_rooms::table.find(id))
            .set(&changes)
            .get_result::<Room>(&mut conn)?)
    }

    fn delete_room(&self, id: Uuid) -> AppResult<()> {
        let mut conn = self.conn()?;
        conn.transaction::<_, AppError, _>(|conn| {
            // reply_to_id carries no foreign key; everything else cascades
            let deleted = diesel::delete(chat_rooms::table.find(id)).execute(conn)?;
            if deleted == 0 {
                return Err(AppError::Database(diesel::result::Error::NotFound));
            }
            Ok(())
        })
    }

    fn find_membership(&self, room_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>> {
        let mut conn = self.conn()?;
        Ok(chat_room_members::table
            .filter(chat_room_members::room_id.eq(room_id))
            .filter(chat_room_members::user_id.eq(user_id))
            .first::<Membership>(&mut conn)
            .optional()?)
    }

    fn room_memberships(&self, room_id: Uuid) -> AppResult<Vec<Membership>> {
        let mut conn = self.conn()?;
        Ok(chat_room_members::table
            .filter(chat_room_members::room_id.eq(room_id))
            .order(chat_room_members::joined_at.asc())
            .load::<Membership>(&mut conn)?)
    }

    fn insert_membership(&self, membership: NewMembership) -> AppResult<Membership> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(chat_room_members::table)
            .values(&membership)
            .get_result::<Membership>(&mut conn)?)
    }

    fn delete_membership(&self, room_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(
            chat_room_members::table
                .filter(chat_room_members::room_id.eq(room_id))
                .filter(chat_room_members::user_id.eq(user_id)),
        )
        .execute(&mut conn)?;
        Ok(deleted > 0)
    }

    fn set_mute(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Membership>> {
        let mut conn = self.conn()?;
        Ok(diesel::update(
            chat_room_members::table
                .filter(chat_room_members::room_id.eq(room_id))
                .filter(chat_room_members::user_id.eq(user_id)),
        )
        .set((
            chat_room_members::is_muted.eq(muted),
            chat_room_members::muted_until.eq(until),
        ))
        .get_result::<Membership>(&mut conn)
        .optional()?)
    }

    fn insert_message(&self, message: NewMessage) -> AppResult<Message> {
        let mut conn = self.conn()?;
        conn.transaction::<_, AppError, _>(|conn| {
            let message: Message = diesel::insert_into(messages::table)
                .values(&message)
                .get_result(conn)?;
            diesel::update(chat_rooms::table.find(message.room_id))
                .set(chat_rooms::updated_at.eq(message.created_at))
                .execute(conn)?;
            Ok(message)
        })
    }

    fn find_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let mut conn = self.conn()?;
        Ok(messages::table.find(id).first::<Message>(&mut conn).optional()?)
    }

    fn find_messages(&self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        Ok(messages::table
            .filter(messages::id.eq_any(ids))
            .load::<Message>(&mut conn)?)
    }

    fn last_message(&self, room_id: Uuid) -> AppResult<Option<Message>> {
        let mut conn = self.conn()?;
        Ok(messages::table
            .filter(messages::room_id.eq(room_id))
            .order(messages::created_at.desc())
            .first::<Message>(&mut conn)
            .optional()?)
    }

    fn edit_message(&self, id: Uuid, content: &str, at: DateTime<Utc>) -> AppResult<Message> {
        let mut conn = self.conn()?;
        Ok(diesel::update(messages::table.find(id))
            .set((
                messages::content.eq(content),
                messages::is_edited.eq(true),
                messages::edited_at.eq(Some(at)),
            ))
            .get_result::<Message>(&mut conn)?)
    }

    fn soft_delete_message(&self, id: Uuid, placeholder: &str, at: DateTime<Utc>) -> AppResult<Message> {
        let mut conn = self.conn()?;
        Ok(soft_delete(&mut conn, id, placeholder, at)?)
    }

    fn list_messages(
        &self,
        room_id: Uuid,
        filter: &MessageFilter,
        page: &PageRequest,
    ) -> AppResult<Page<Message>> {
        let mut conn = self.conn()?;

        let scoped = || {
            let mut query = messages::table
                .filter(messages::room_id.eq(room_id))
                .into_boxed::<Pg>();
            if !filter.include_deleted {
                query = query.filter(messages::is_deleted.eq(false));
            }
            if let Some(needle) = &filter.search {
                query = query.filter(messages::content.like(format!("%{}%", escape_like(needle))));
            }
            query
        };

        let total: i64 = scoped().select(count_star()).first(&mut conn)?;
        let items = scoped()
            .order((messages::created_at.desc(), messages::id.desc()))
            .offset(page.offset() as i64)
            .limit(page.limit() as i64)
            .load::<Message>(&mut conn)?;

        Ok((items, total as u64))
    }

    fn upsert_reaction(&self, reaction: NewReaction) -> AppResult<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(message_reactions::table)
            .values(&reaction)
            .on_conflict((
                message_reactions::message_id,
                message_reactions::user_id,
                message_reactions::emoji,
            ))
            .do_nothing()
            .execute(&mut conn)?;
        Ok(())
    }

    fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(
            message_reactions::table
                .filter(message_reactions::message_id.eq(message_id))
                .filter(message_reactions::user_id.eq(user_id))
                .filter(message_reactions::emoji.eq(emoji)),
        )
        .execute(&mut conn)?;
        Ok(deleted > 0)
    }

    fn reactions_for(&self, message_ids: &[Uuid]) -> AppResult<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        Ok(message_reactions::table
            .filter(message_reactions::message_id.eq_any(message_ids))
            .order(message_reactions::created_at.asc())
            .load::<Reaction>(&mut conn)?)
    }

    fn insert_report(&self, report: NewReport) -> AppResult<Report> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(message_reports::table)
            .values(&report)
            .get_result::<Report>(&mut conn)?)
    }

    fn find_report(&self, id: Uuid) -> AppResult<Option<Report>> {
        let mut conn = self.conn()?;
        Ok(message_reports::table
            .find(id)
            .first::<Report>(&mut conn)
            .optional()?)
    }

    fn list_reports(&self, filter: &ReportFilter, page: &PageRequest) -> AppResult<Page<Report>> {
        let mut conn = self.conn()?;

        let scoped = || {
            let mut query = message_reports::table.into_boxed::<Pg>();
            if let Some(status) = filter.status {
                query = query.filter(message_reports::status.eq(status));
            }
            if let Some(reporter) = filter.reporter {
                query = query.filter(message_reports::reported_by.eq(reporter));
            }
            query
        };

        let total: i64 = scoped().select(count_star()).first(&mut conn)?;
        let items = scoped()
            .order(message_reports::created_at.desc())
            .offset(page.offset() as i64)
            .limit(page.limit() as i64)
            .load::<Report>(&mut conn)?;

        Ok((items, total as u64))
    }

    fn review_report(
        &self,
        id: Uuid,
        review: ReportReview,
        takedown: Option<Takedown<'_>>,
    ) -> AppResult<(Report, Option<Message>)> {
        let mut conn = self.conn()?;
        conn.transaction::<_, AppError, _>(|conn| {
            let reviewed_at = review.reviewed_at.unwrap_or_else(Utc::now);
            let report: Report = diesel::update(message_reports::table.find(id))
                .set(&review)
                .get_result(conn)?;

            let removed = match takedown {
                Some(takedown) => Some(soft_delete(
                    conn,
                    report.message_id,
                    takedown.placeholder,
                    reviewed_at,
                )?),
                None => None,
            };

            Ok((report, removed))
        })
    }

    fn upsert_blocked_ip(&self, block: NewBlockedIp) -> AppResult<BlockedIp> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(blocked_ips::table)
            .values(&block)
            .on_conflict(blocked_ips::ip_address)
            .do_update()
            .set((
                blocked_ips::blocked_by.eq(block.blocked_by),
                blocked_ips::reason.eq(block.reason.clone()),
                blocked_ips::expires_at.eq(block.expires_at),
                blocked_ips::is_active.eq(true),
                blocked_ips::updated_at.eq(Utc::now()),
            ))
            .get_result::<BlockedIp>(&mut conn)?)
    }

    fn find_blocked_ip(&self, ip: &str) -> AppResult<Option<BlockedIp>> {
        let mut conn = self.conn()?;
        Ok(blocked_ips::table
            .filter(blocked_ips::ip_address.eq(ip))
            .first::<BlockedIp>(&mut conn)
            .optional()?)
    }

    fn deactivate_blocked_ip(&self, ip: &str) -> AppResult<Option<BlockedIp>> {
        let mut conn = self.conn()?;
        Ok(diesel::update(blocked_ips::table.filter(blocked_ips::ip_address.eq(ip)))
            .set((
                blocked_ips::is_active.eq(false),
                blocked_ips::updated_at.eq(Utc::now()),
            ))
            .get_result::<BlockedIp>(&mut conn)
            .optional()?)
    }

    fn list_active_blocks(&self, now: DateTime<Utc>, page: &PageRequest) -> AppResult<Page<BlockedIp>> {
        let mut conn = self.conn()?;

        let scoped = || {
            blocked_ips::table
                .filter(blocked_ips::is_active.eq(true))
                .filter(
                    blocked_ips::expires_at
                        .is_null()
                        .or(blocked_ips::expires_at.gt(now)),
                )
                .into_boxed::<Pg>()
        };

        let total: i64 = scoped().select(count_star()).first(&mut conn)?;
        let items = scoped()
            .order(blocked_ips::created_at.desc())
            .offset(page.offset() as i64)
            .limit(page.limit() as i64)
            .load::<BlockedIp>(&mut conn)?;

        Ok((items, total as u64))
    }

    fn insert_audit(&self, entry: NewAuditEntry) -> AppResult<AuditEntry> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(audit_logs::table)
            .values(&entry)
            .get_result::<AuditEntry>(&mut conn)?)
    }

    fn list_audit(&self, page: &PageRequest) -> AppResult<Page<AuditEntry>> {
        let mut conn = self.conn()?;
        let total: i64 = audit_logs::table.select(count_star()).first(&mut conn)?;
        let items = audit_logs::table
            .order(audit_logs::created_at.desc())
            .offset(page.offset() as i64)
            .limit(page.limit() as i64)
            .load::<AuditEntry>(&mut conn)?;
        Ok((items, total as u64))
    }
}

fn soft_delete(
    conn: &mut PgConnection,
    id: Uuid,
    placeholder: &str,
    at: DateTime<Utc>,
) -> QueryResult<Message> {
    diesel::update(messages::table.find(id))
        .set((
            messages::content.eq(placeholder),
            messages::is_deleted.eq(true),
            messages::deleted_at.eq(Some(at)),
        ))
        .get_result(conn)
}
