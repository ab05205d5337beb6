use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Select, Set,
};

use crate::entity::post::{self, Category, PostStatus, TransactionType};
use crate::error::AppError;
use crate::response::{page_offset, Page};
use crate::sql::exec_sql;

/// Writable fields of a post.
#[derive(Clone, Debug, PartialEq)]
pub struct PostDraft {
    pub title: String,
    pub description: String,
    pub price: i32,
    pub transaction_type: TransactionType,
    pub category: Category,
}

impl PostDraft {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::param_error("title must not be blank"));
        }
        if self.description.trim().is_empty() {
            return Err(AppError::param_error("description must not be blank"));
        }
        if self.price < 0 {
            return Err(AppError::param_error("price must not be negative"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PostFilter {
    All,
    Category(Category),
    Member(i32),
    Keyword(String),
    Buyer(i32),
}

pub async fn create<C: ConnectionTrait>(
    db: &C,
    member_id: i32,
    draft: PostDraft,
) -> Result<post::Model, AppError> {
    draft.validate()?;
    let now = Utc::now();
    let model = post::ActiveModel {
        member_id: Set(member_id),
        title: Set(draft.title),
        description: Set(draft.description),
        price: Set(draft.price),
        views: Set(0),
        transaction_type: Set(draft.transaction_type),
        category: Set(draft.category),
        status: Set(PostStatus::ForSale),
        buyer_id: Set(None),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };
    Ok(model.insert(db).await?)
}

/// Post by id; soft-deleted posts are not found.
pub async fn find<C: ConnectionTrait>(db: &C, id: i32) -> Result<post::Model, AppError> {
    post::Entity::find_by_id(id)
        .filter(post::Column::Status.ne(PostStatus::Deleted))
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("post {} not found", id)))
}

pub async fn increment_views<C: ConnectionTrait>(db: &C, id: i32) -> Result<(), AppError> {
    exec_sql(
        db,
        "update t_post set views = views + 1 where id = ? and status <> 'DELETED'",
        vec![id.into()],
    )
    .await?;
    Ok(())
}

/// Newest first.
pub async fn list(
    db: &DatabaseConnection,
    filter: PostFilter,
    page: u64,
    size: u64,
) -> Result<Page<post::Model>, AppError> {
    page_offset(page, size)?;
    let paginator = filtered(filter)
        .order_by_desc(post::Column::Id)
        .paginate(db, size.max(1));
    let total = paginator.num_items().await?;
    let list = paginator.fetch_page(page).await?;
    Ok(Page::new(list, page, size, total))
}

fn filtered(filter: PostFilter) -> Select<post::Entity> {
    let select = post::Entity::find().filter(post::Column::Status.ne(PostStatus::Deleted));
    match filter {
        PostFilter::All => select,
        PostFilter::Category(category) => select.filter(post::Column::Category.eq(category)),
        PostFilter::Member(member_id) => select.filter(post::Column::MemberId.eq(member_id)),
        PostFilter::Keyword(keyword) => select.filter(post::Column::Title.contains(keyword.trim())),
        PostFilter::Buyer(buyer_id) => select.filter(post::Column::BuyerId.eq(buyer_id)),
    }
}

pub async fn update<C: ConnectionTrait>(
    db: &C,
    id: i32,
    draft: PostDraft,
) -> Result<post::Model, AppError> {
    draft.validate()?;
    let existing = find(db, id).await?;
    let mut active: post::ActiveModel = existing.into();
    active.title = Set(draft.title);
    active.description = Set(draft.description);
    active.price = Set(draft.price);
    active.transaction_type = Set(draft.transaction_type);
    active.category = Set(draft.category);
    active.updated = Set(Some(Utc::now()));
    Ok(active.update(db).await?)
}

pub async fn update_status<C: ConnectionTrait>(
    db: &C,
    id: i32,
    status: PostStatus,
) -> Result<post::Model, AppError> {
    if status == PostStatus::Deleted {
        return Err(AppError::param_error("use delete to remove a post"));
    }
    let existing = find(db, id).await?;
    let mut active: post::ActiveModel = existing.into();
    active.status = Set(status);
    active.updated = Set(Some(Utc::now()));
    Ok(active.update(db).await?)
}

/// Assigns the buyer and marks the post sold.
pub async fn purchase<C: ConnectionTrait>(
    db: &C,
    id: i32,
    buyer_id: i32,
) -> Result<post::Model, AppError> {
    let existing = find(db, id).await?;
    if existing.member_id == buyer_id {
        return Err(AppError::param_error("the writer cannot buy their own post"));
    }
    let mut active: post::ActiveModel = existing.into();
    active.buyer_id = Set(Some(buyer_id));
    active.status = Set(PostStatus::Sold);
    active.updated = Set(Some(Utc::now()));
    Ok(active.update(db).await?)
}

pub async fn soft_delete<C: ConnectionTrait>(db: &C, id: i32) -> Result<(), AppError> {
    let affected = exec_sql(
        db,
        "update t_post set status = 'DELETED', updated = ? where id = ? and status <> 'DELETED'",
        vec![Utc::now().into(), id.into()],
    )
    .await?;
    if affected == 0 {
        return Err(AppError::not_found(format!("post {} not found", id)));
    }
    Ok(())
}
