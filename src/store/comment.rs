//! Comment persistence and the group/sequence numbering scheme.
//!
//! Every top-level comment opens a thread (`comment_group`) and carries
//! `seq = 0`; replies take the next sequence number of that thread. Group ids
//! are allocated from `t_comment_group` and sequence numbers from the
//! thread's `last_seq` counter, both inside the transaction that inserts the
//! comment, so numbers are never shared and never recycled.

use chrono::Utc;
use log::debug;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::entity::comment::{self, CommentStatus};
use crate::entity::comment_group;
use crate::error::AppError;
use crate::response::{page_offset, Page};
use crate::sql::{exec_sql, map_tx_error, query_all, query_count, query_one};

pub const START_GROUP: i32 = 0;

/// Next free thread id: `max + 1`, or [`START_GROUP`] for an empty store.
pub async fn next_group<C: ConnectionTrait>(db: &C) -> Result<i32, AppError> {
    let row = query_one(
        db,
        "select max(comment_group) as max_group from t_comment_group",
        vec![],
    )
    .await?;
    let current: Option<i32> = row
        .and_then(|r| r.try_get::<Option<i32>>("", "max_group").ok())
        .flatten();
    Ok(current.map(|g| g + 1).unwrap_or(START_GROUP))
}

/// Allocates the next reply sequence in `group`. Must run inside the
/// transaction that inserts the reply.
pub async fn next_seq<C: ConnectionTrait>(db: &C, group: i32) -> Result<i32, AppError> {
    let affected = exec_sql(
        db,
        "update t_comment_group set last_seq = last_seq + 1 where comment_group = ?",
        vec![group.into()],
    )
    .await?;
    if affected == 0 {
        return Err(group_not_found(group));
    }
    let counter = comment_group::Entity::find_by_id(group)
        .one(db)
        .await?
        .ok_or_else(|| group_not_found(group))?;
    Ok(counter.last_seq)
}

pub async fn create(
    db: &DatabaseConnection,
    post_id: i32,
    member_id: i32,
    content: &str,
) -> Result<comment::Model, AppError> {
    let content = content.to_string();
    let saved = db
        .transaction::<_, comment::Model, AppError>(move |txn| {
            Box::pin(async move {
                let group = next_group(txn).await?;
                exec_sql(
                    txn,
                    "insert into t_comment_group (comment_group, post_id, last_seq) values (?, ?, 0)",
                    vec![group.into(), post_id.into()],
                )
                .await?;
                insert_comment(txn, post_id, member_id, group, 0, content).await
            })
        })
        .await
        .map_err(map_tx_error)?;
    debug!(
        "comment created id={} post={} group={}",
        saved.id, saved.post_id, saved.comment_group
    );
    Ok(saved)
}

pub async fn create_reply(
    db: &DatabaseConnection,
    post_id: i32,
    member_id: i32,
    group: i32,
    content: &str,
) -> Result<comment::Model, AppError> {
    let content = content.to_string();
    let saved = db
        .transaction::<_, comment::Model, AppError>(move |txn| {
            Box::pin(async move {
                let head = find_group_head(txn, group).await?;
                if head.post_id != post_id {
                    return Err(AppError::param_error(format!(
                        "comment group {} does not belong to post {}",
                        group, post_id
                    )));
                }
                let seq = next_seq(txn, group).await?;
                insert_comment(txn, post_id, member_id, group, seq, content).await
            })
        })
        .await
        .map_err(map_tx_error)?;
    debug!(
        "reply created id={} group={} seq={}",
        saved.id, saved.comment_group, saved.seq
    );
    Ok(saved)
}

pub async fn update(
    db: &DatabaseConnection,
    id: i32,
    content: &str,
) -> Result<comment::Model, AppError> {
    let existing = find(db, id).await?;
    let mut active: comment::ActiveModel = existing.into();
    active.content = Set(content.to_string());
    active.updated = Set(Some(Utc::now()));
    Ok(active.update(db).await?)
}

/// Soft-deletes `id`, or its whole thread when `id` is a top-level comment.
/// Returns the ids that were marked deleted.
pub async fn delete(db: &DatabaseConnection, id: i32) -> Result<Vec<i32>, AppError> {
    let target = find(db, id).await?;
    let deleted = db
        .transaction::<_, Vec<i32>, AppError>(move |txn| {
            Box::pin(async move {
                if !target.is_top_level() {
                    mark_deleted(txn, "id = ?", target.id).await?;
                    return Ok(vec![target.id]);
                }
                let ids = active_ids(txn, "comment_group = ?", target.comment_group).await?;
                mark_deleted(txn, "comment_group = ?", target.comment_group).await?;
                Ok(ids)
            })
        })
        .await
        .map_err(map_tx_error)?;
    debug!("comment delete id={} cascaded to {:?}", id, deleted);
    Ok(deleted)
}

/// Soft-deletes every comment on a post. Returns the affected ids.
pub async fn delete_by_post<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<Vec<i32>, AppError> {
    let ids = active_ids(db, "post_id = ?", post_id).await?;
    mark_deleted(db, "post_id = ?", post_id).await?;
    Ok(ids)
}

/// Active comment by id.
pub async fn find<C: ConnectionTrait>(db: &C, id: i32) -> Result<comment::Model, AppError> {
    comment::Entity::find_by_id(id)
        .filter(comment::Column::Status.eq(CommentStatus::Active))
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("comment {} not found", id)))
}

pub async fn list_top_level_by_post(
    db: &DatabaseConnection,
    post_id: i32,
    page: u64,
    size: u64,
) -> Result<Page<comment::Model>, AppError> {
    page_offset(page, size)?;
    let paginator = comment::Entity::find()
        .filter(comment::Column::PostId.eq(post_id))
        .filter(comment::Column::Seq.eq(0))
        .filter(comment::Column::Status.eq(CommentStatus::Active))
        .order_by_asc(comment::Column::CommentGroup)
        .paginate(db, size.max(1));
    let total = paginator.num_items().await?;
    let list = paginator.fetch_page(page).await?;
    Ok(Page::new(list, page, size, total))
}

/// Active replies of `group` in ascending `seq`; the top-level entry is
/// never included.
pub async fn list_replies<C: ConnectionTrait>(
    db: &C,
    group: i32,
) -> Result<Vec<comment::Model>, AppError> {
    Ok(comment::Entity::find()
        .filter(comment::Column::CommentGroup.eq(group))
        .filter(comment::Column::Seq.gt(0))
        .filter(comment::Column::Status.eq(CommentStatus::Active))
        .order_by_asc(comment::Column::Seq)
        .all(db)
        .await?)
}

/// Distinct member ids with an active comment on the post, `exclude_member_id`
/// left out, ordered by member id.
pub async fn find_commenters(
    db: &DatabaseConnection,
    post_id: i32,
    exclude_member_id: i32,
    page: u64,
    size: u64,
) -> Result<Page<i32>, AppError> {
    let size = size.max(1);
    let offset = page_offset(page, size)?;
    let total = query_count(
        db,
        "select count(distinct member_id) as cnt from t_comment \
         where post_id = ? and member_id <> ? and status = 'ACTIVE'",
        vec![post_id.into(), exclude_member_id.into()],
    )
    .await?;
    let rows = query_all(
        db,
        "select distinct member_id from t_comment \
         where post_id = ? and member_id <> ? and status = 'ACTIVE' \
         order by member_id limit ? offset ?",
        vec![
            post_id.into(),
            exclude_member_id.into(),
            (size as i64).into(),
            (offset as i64).into(),
        ],
    )
    .await?;
    let list = rows
        .into_iter()
        .filter_map(|row| row.try_get::<i32>("", "member_id").ok())
        .collect();
    Ok(Page::new(list, page, size, total))
}

async fn find_group_head<C: ConnectionTrait>(
    db: &C,
    group: i32,
) -> Result<comment::Model, AppError> {
    comment::Entity::find()
        .filter(comment::Column::CommentGroup.eq(group))
        .filter(comment::Column::Seq.eq(0))
        .filter(comment::Column::Status.eq(CommentStatus::Active))
        .one(db)
        .await?
        .ok_or_else(|| group_not_found(group))
}

async fn insert_comment<C: ConnectionTrait>(
    db: &C,
    post_id: i32,
    member_id: i32,
    group: i32,
    seq: i32,
    content: String,
) -> Result<comment::Model, AppError> {
    let now = Utc::now();
    let model = comment::ActiveModel {
        post_id: Set(post_id),
        member_id: Set(member_id),
        content: Set(content),
        comment_group: Set(group),
        seq: Set(seq),
        status: Set(CommentStatus::Active),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };
    Ok(model.insert(db).await?)
}

async fn active_ids<C: ConnectionTrait>(
    db: &C,
    condition: &str,
    value: i32,
) -> Result<Vec<i32>, AppError> {
    let sql = format!(
        "select id from t_comment where {} and status = 'ACTIVE' order by seq",
        condition
    );
    let rows = query_all(db, &sql, vec![value.into()]).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<i32>("", "id").ok())
        .collect())
}

async fn mark_deleted<C: ConnectionTrait>(
    db: &C,
    condition: &str,
    value: i32,
) -> Result<u64, AppError> {
    let sql = format!(
        "update t_comment set status = 'DELETED', updated = ? where {} and status = 'ACTIVE'",
        condition
    );
    exec_sql(db, &sql, vec![Utc::now().into(), value.into()]).await
}

fn group_not_found(group: i32) -> AppError {
    AppError::not_found(format!("comment group {} not found", group))
}

#[cfg(test)]
mod tests {
    use sea_orm::{DatabaseConnection, EntityTrait};

    use super::*;
    use crate::db::test_support::{insert_member, insert_post, memory_db};
    use crate::entity::comment;

    async fn setup() -> (DatabaseConnection, i32, i32) {
        let db = memory_db().await;
        let member = insert_member(&db, "alice").await;
        let post = insert_post(&db, member.id, "bike").await;
        (db, post.id, member.id)
    }

    async fn status_of(db: &DatabaseConnection, id: i32) -> CommentStatus {
        comment::Entity::find_by_id(id)
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[actix_web::test]
    async fn next_group_starts_at_zero() {
        let (db, _, _) = setup().await;
        assert_eq!(next_group(&db).await.unwrap(), START_GROUP);
    }

    #[actix_web::test]
    async fn top_level_groups_increase_and_stay_unique() {
        let (db, post_id, member_id) = setup().await;
        let mut groups = Vec::new();
        for i in 0..5 {
            let c = create(&db, post_id, member_id, &format!("c{}", i)).await.unwrap();
            assert_eq!(c.seq, 0);
            groups.push(c.comment_group);
        }
        assert_eq!(groups, vec![0, 1, 2, 3, 4]);
    }

    #[actix_web::test]
    async fn two_posts_get_groups_in_creation_order() {
        let (db, first_post, member_id) = setup().await;
        let second_post = insert_post(&db, member_id, "desk").await.id;
        let a = create(&db, first_post, member_id, "on bike").await.unwrap();
        let b = create(&db, second_post, member_id, "on desk").await.unwrap();
        assert_eq!(a.comment_group, 0);
        assert_eq!(b.comment_group, 1);
    }

    #[actix_web::test]
    async fn replies_number_from_one() {
        let (db, post_id, member_id) = setup().await;
        let head = create(&db, post_id, member_id, "head").await.unwrap();
        let seqs: Vec<i32> = {
            let mut out = Vec::new();
            for i in 0..3 {
                let r = create_reply(&db, post_id, member_id, head.comment_group, &format!("r{}", i))
                    .await
                    .unwrap();
                assert_eq!(r.comment_group, head.comment_group);
                out.push(r.seq);
            }
            out
        };
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[actix_web::test]
    async fn reply_sequences_are_scoped_per_group() {
        let (db, post_id, member_id) = setup().await;
        let a = create(&db, post_id, member_id, "a").await.unwrap();
        let b = create(&db, post_id, member_id, "b").await.unwrap();
        create_reply(&db, post_id, member_id, a.comment_group, "a1").await.unwrap();
        create_reply(&db, post_id, member_id, a.comment_group, "a2").await.unwrap();
        let b1 = create_reply(&db, post_id, member_id, b.comment_group, "b1").await.unwrap();
        assert_eq!(b1.seq, 1);
    }

    #[actix_web::test]
    async fn reply_to_missing_group_is_not_found() {
        let (db, post_id, member_id) = setup().await;
        let err = create_reply(&db, post_id, member_id, 42, "orphan").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[actix_web::test]
    async fn next_seq_on_missing_group_is_not_found() {
        let (db, _, _) = setup().await;
        let err = next_seq(&db, 7).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[actix_web::test]
    async fn reply_must_target_the_thread_post() {
        let (db, post_id, member_id) = setup().await;
        let other_post = insert_post(&db, member_id, "lamp").await.id;
        let head = create(&db, post_id, member_id, "head").await.unwrap();
        let err = create_reply(&db, other_post, member_id, head.comment_group, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Param(_)));
    }

    #[actix_web::test]
    async fn sequence_numbers_are_not_recycled() {
        let (db, post_id, member_id) = setup().await;
        let head = create(&db, post_id, member_id, "head").await.unwrap();
        create_reply(&db, post_id, member_id, head.comment_group, "r1").await.unwrap();
        let r2 = create_reply(&db, post_id, member_id, head.comment_group, "r2").await.unwrap();
        delete(&db, r2.id).await.unwrap();
        let r3 = create_reply(&db, post_id, member_id, head.comment_group, "r3").await.unwrap();
        assert_eq!(r3.seq, 3);
    }

    #[actix_web::test]
    async fn update_keeps_group_and_seq() {
        let (db, post_id, member_id) = setup().await;
        let head = create(&db, post_id, member_id, "head").await.unwrap();
        let reply = create_reply(&db, post_id, member_id, head.comment_group, "before")
            .await
            .unwrap();
        let updated = update(&db, reply.id, "after").await.unwrap();
        assert_eq!(updated.content, "after");
        assert_eq!(updated.comment_group, reply.comment_group);
        assert_eq!(updated.seq, reply.seq);
    }

    #[actix_web::test]
    async fn deleting_a_reply_leaves_the_thread() {
        let (db, post_id, member_id) = setup().await;
        let head = create(&db, post_id, member_id, "head").await.unwrap();
        let r1 = create_reply(&db, post_id, member_id, head.comment_group, "r1").await.unwrap();
        let r2 = create_reply(&db, post_id, member_id, head.comment_group, "r2").await.unwrap();

        let deleted = delete(&db, r1.id).await.unwrap();
        assert_eq!(deleted, vec![r1.id]);
        assert_eq!(status_of(&db, r1.id).await, CommentStatus::Deleted);
        assert_eq!(status_of(&db, head.id).await, CommentStatus::Active);
        assert_eq!(status_of(&db, r2.id).await, CommentStatus::Active);
    }

    #[actix_web::test]
    async fn deleting_the_head_cascades_over_the_group() {
        let (db, post_id, member_id) = setup().await;
        let c0 = create(&db, post_id, member_id, "C0").await.unwrap();
        assert_eq!((c0.comment_group, c0.seq), (0, 0));
        let r1 = create_reply(&db, post_id, member_id, 0, "R1").await.unwrap();
        assert_eq!((r1.comment_group, r1.seq), (0, 1));
        let r2 = create_reply(&db, post_id, member_id, 0, "R2").await.unwrap();
        assert_eq!((r2.comment_group, r2.seq), (0, 2));
        let other = create(&db, post_id, member_id, "other thread").await.unwrap();

        let deleted = delete(&db, c0.id).await.unwrap();
        assert_eq!(deleted, vec![c0.id, r1.id, r2.id]);

        let top = list_top_level_by_post(&db, post_id, 0, 10).await.unwrap();
        assert_eq!(top.list.iter().map(|c| c.id).collect::<Vec<_>>(), vec![other.id]);
        assert!(list_replies(&db, 0).await.unwrap().is_empty());
        assert_eq!(status_of(&db, other.id).await, CommentStatus::Active);
    }

    #[actix_web::test]
    async fn deleted_comment_is_gone_for_reads_and_writes() {
        let (db, post_id, member_id) = setup().await;
        let head = create(&db, post_id, member_id, "head").await.unwrap();
        delete(&db, head.id).await.unwrap();
        assert!(matches!(find(&db, head.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(update(&db, head.id, "x").await, Err(AppError::NotFound(_))));
        assert!(matches!(delete(&db, head.id).await, Err(AppError::NotFound(_))));
        let err = create_reply(&db, post_id, member_id, head.comment_group, "late")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[actix_web::test]
    async fn list_replies_is_ordered_and_excludes_head() {
        let (db, post_id, member_id) = setup().await;
        let head = create(&db, post_id, member_id, "head").await.unwrap();
        for i in 0..3 {
            create_reply(&db, post_id, member_id, head.comment_group, &format!("r{}", i))
                .await
                .unwrap();
        }
        let replies = list_replies(&db, head.comment_group).await.unwrap();
        assert_eq!(replies.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(replies.iter().all(|r| r.id != head.id));
    }

    #[actix_web::test]
    async fn top_level_listing_pages_by_post() {
        let (db, post_id, member_id) = setup().await;
        let other_post = insert_post(&db, member_id, "chair").await.id;
        for i in 0..3 {
            let head = create(&db, post_id, member_id, &format!("h{}", i)).await.unwrap();
            create_reply(&db, post_id, member_id, head.comment_group, "reply").await.unwrap();
        }
        create(&db, other_post, member_id, "elsewhere").await.unwrap();

        let first = list_top_level_by_post(&db, post_id, 0, 2).await.unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(first.total_page, 2);
        assert_eq!(first.list.len(), 2);
        assert!(first.list.iter().all(|c| c.seq == 0 && c.post_id == post_id));

        let second = list_top_level_by_post(&db, post_id, 1, 2).await.unwrap();
        assert_eq!(second.list.len(), 1);
        assert_eq!(second.list[0].content, "h2");
    }

    #[actix_web::test]
    async fn commenters_are_distinct_and_exclude_the_writer() {
        let (db, post_id, writer) = setup().await;
        let bob = insert_member(&db, "bob").await.id;
        let carol = insert_member(&db, "carol").await.id;
        let head = create(&db, post_id, bob, "is it available?").await.unwrap();
        create_reply(&db, post_id, writer, head.comment_group, "yes").await.unwrap();
        create_reply(&db, post_id, bob, head.comment_group, "great").await.unwrap();
        create(&db, post_id, carol, "price?").await.unwrap();

        let page = find_commenters(&db, post_id, writer, 0, 5).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.list, vec![bob, carol]);
    }

    #[actix_web::test]
    async fn listings_reject_pages_past_the_offset_range() {
        let (db, post_id, member_id) = setup().await;
        create(&db, post_id, member_id, "head").await.unwrap();
        assert!(matches!(
            list_top_level_by_post(&db, post_id, u64::MAX, 5).await,
            Err(AppError::Param(_))
        ));
        assert!(matches!(
            find_commenters(&db, post_id, member_id, u64::MAX, 5).await,
            Err(AppError::Param(_))
        ));
    }

    #[actix_web::test]
    async fn delete_by_post_marks_every_comment() {
        let (db, post_id, member_id) = setup().await;
        let head = create(&db, post_id, member_id, "head").await.unwrap();
        let reply = create_reply(&db, post_id, member_id, head.comment_group, "r").await.unwrap();
        let ids = delete_by_post(&db, post_id).await.unwrap();
        assert_eq!(ids, vec![head.id, reply.id]);
        assert_eq!(status_of(&db, reply.id).await, CommentStatus::Deleted);
    }
}
