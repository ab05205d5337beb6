use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use log::info;
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::entity::comment::{self, CommentStatus};
use crate::entity::image::DomainName;
use crate::entity::post;
use crate::error::AppError;
use crate::response::{Page, ResponseDto};
use crate::routes::form::FormData;
use crate::sql::to_rfc3339;
use crate::store::comment as comment_store;
use crate::store::image::{ImageStore, ImageView};
use crate::store::member as member_store;
use crate::store::post as post_store;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::post().to(create)))
        .service(web::resource("/reply").route(web::post().to(create_reply)))
        .service(
            web::resource("/{id:\\d+}")
                .route(web::get().to(get_comment))
                .route(web::put().to(update))
                .route(web::delete().to(delete)),
        );
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: i32,
    pub post_id: i32,
    pub member_id: i32,
    pub username: String,
    pub content: String,
    pub comment_group: i32,
    pub seq: i32,
    pub status: CommentStatus,
    pub images: Vec<ImageView>,
    pub created_at: Option<String>,
}

/// A top-level comment with its thread.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCommentView {
    #[serde(flatten)]
    pub comment: CommentView,
    pub post_title: String,
    pub replies: Vec<CommentView>,
}

fn to_view(model: comment::Model, username: String, images: Vec<ImageView>) -> CommentView {
    CommentView {
        id: model.id,
        post_id: model.post_id,
        member_id: model.member_id,
        username,
        content: model.content,
        comment_group: model.comment_group,
        seq: model.seq,
        status: model.status,
        images,
        created_at: model.created.map(to_rfc3339),
    }
}

async fn build_view(
    db: &DatabaseConnection,
    images: &ImageStore,
    model: comment::Model,
) -> Result<CommentView, AppError> {
    let author = member_store::find(db, model.member_id).await?;
    let attached = images.get_images(db, DomainName::Comment, model.id).await?;
    Ok(to_view(model, author.username, attached))
}

/// One page of a post's top-level comments, each with its replies.
pub async fn post_comment_page(
    db: &DatabaseConnection,
    images: &ImageStore,
    post: &post::Model,
    page: u64,
    size: u64,
) -> Result<Page<PostCommentView>, AppError> {
    let heads = comment_store::list_top_level_by_post(db, post.id, page, size).await?;

    let mut threads = Vec::with_capacity(heads.list.len());
    let mut member_ids = Vec::new();
    for head in &heads.list {
        let replies = comment_store::list_replies(db, head.comment_group).await?;
        member_ids.push(head.member_id);
        member_ids.extend(replies.iter().map(|r| r.member_id));
        threads.push(replies);
    }
    member_ids.sort_unstable();
    member_ids.dedup();
    let members = member_store::find_many(db, &member_ids).await?;
    let username = |id: i32| members.get(&id).map(|m| m.username.clone()).unwrap_or_default();

    let mut list = Vec::with_capacity(heads.list.len());
    for (head, replies) in heads.list.into_iter().zip(threads) {
        let mut reply_views = Vec::with_capacity(replies.len());
        for reply in replies {
            let attached = images.get_images(db, DomainName::Comment, reply.id).await?;
            let name = username(reply.member_id);
            reply_views.push(to_view(reply, name, attached));
        }
        let attached = images.get_images(db, DomainName::Comment, head.id).await?;
        let name = username(head.member_id);
        list.push(PostCommentView {
            comment: to_view(head, name, attached),
            post_title: post.title.clone(),
            replies: reply_views,
        });
    }
    Ok(Page::new(list, heads.page, heads.size, heads.total))
}

fn content_of(form: &FormData) -> Result<String, AppError> {
    Ok(form.required("content")?.trim().to_string())
}

async fn create(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    auth: AuthUser,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = FormData::read(payload).await?;
    let post_id: i32 = form.number("postId")?;
    let content = content_of(&form)?;
    ImageStore::validate(&form.images)?;
    post_store::find(db.get_ref(), post_id).await?;

    let saved = comment_store::create(db.get_ref(), post_id, auth.member_id, &content).await?;
    let attached = images
        .save(db.get_ref(), &form.images, DomainName::Comment, saved.id)
        .await?;
    let author = member_store::find(db.get_ref(), auth.member_id).await?;
    info!(
        "comment created id={} post={} group={}",
        saved.id, post_id, saved.comment_group
    );
    let view = to_view(saved, author.username, attached);
    Ok(HttpResponse::Created().json(ResponseDto::success(Some(view))))
}

async fn create_reply(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    auth: AuthUser,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = FormData::read(payload).await?;
    let post_id: i32 = form.number("postId")?;
    let group: i32 = form.number("commentGroup")?;
    let content = content_of(&form)?;
    ImageStore::validate(&form.images)?;
    post_store::find(db.get_ref(), post_id).await?;

    let saved =
        comment_store::create_reply(db.get_ref(), post_id, auth.member_id, group, &content).await?;
    let attached = images
        .save(db.get_ref(), &form.images, DomainName::Comment, saved.id)
        .await?;
    let author = member_store::find(db.get_ref(), auth.member_id).await?;
    let view = to_view(saved, author.username, attached);
    Ok(HttpResponse::Created().json(ResponseDto::success(Some(view))))
}

async fn get_comment(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let found = comment_store::find(db.get_ref(), path.into_inner()).await?;
    let view = build_view(db.get_ref(), images.get_ref(), found).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(view))))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let existing = comment_store::find(db.get_ref(), id).await?;
    auth.ensure_owner(existing.member_id, "comment")?;

    let form = FormData::read(payload).await?;
    let content = content_of(&form)?;
    ImageStore::validate(&form.images)?;

    let saved = comment_store::update(db.get_ref(), id, &content).await?;
    images
        .delete_all_images(db.get_ref(), DomainName::Comment, id)
        .await?;
    images
        .save(db.get_ref(), &form.images, DomainName::Comment, id)
        .await?;
    let view = build_view(db.get_ref(), images.get_ref(), saved).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(view))))
}

async fn delete(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let existing = comment_store::find(db.get_ref(), id).await?;
    auth.ensure_owner(existing.member_id, "comment")?;

    let deleted = comment_store::delete(db.get_ref(), id).await?;
    for comment_id in &deleted {
        images
            .delete_all_images(db.get_ref(), DomainName::Comment, *comment_id)
            .await?;
    }
    info!("comment delete id={} removed {} comment(s)", id, deleted.len());
    Ok(HttpResponse::Ok().json(ResponseDto::<()>::success(None)))
}
