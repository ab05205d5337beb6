use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::config::AppConfig;
use crate::entity::image::DomainName;
use crate::entity::post::{self, Category, PostStatus, TransactionType};
use crate::error::AppError;
use crate::response::{Page, PageQuery, ResponseDto};
use crate::routes::comment::post_comment_page;
use crate::routes::form::FormData;
use crate::routes::member::ProfileView;
use crate::sql::{map_tx_error, to_rfc3339};
use crate::store::comment as comment_store;
use crate::store::image::{ImageStore, ImageView};
use crate::store::member as member_store;
use crate::store::post::{self as post_store, PostDraft, PostFilter};
use crate::view_gate::ViewGate;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::post().to(create))
            .route(web::get().to(list_all)),
    )
    .service(web::resource("/category").route(web::get().to(list_by_category)))
    .service(web::resource("/search").route(web::get().to(search)))
    .service(web::resource("/member/{member_id:\\d+}").route(web::get().to(list_by_member)))
    .service(web::resource("/buyer/{buyer_id:\\d+}").route(web::get().to(list_by_buyer)))
    .service(
        web::resource("/{id:\\d+}")
            .route(web::get().to(get_post))
            .route(web::put().to(update))
            .route(web::delete().to(delete)),
    )
    .service(web::resource("/{id:\\d+}/status").route(web::patch().to(update_status)))
    .service(web::resource("/{id:\\d+}/purchase").route(web::patch().to(purchase)))
    .service(web::resource("/{id:\\d+}/comments").route(web::get().to(list_comments)))
    .service(
        web::resource("/{id:\\d+}/communication-members")
            .route(web::get().to(communication_members)),
    );
}

#[derive(Deserialize)]
struct CategoryQuery {
    category: Category,
    #[serde(default)]
    page: u64,
}

#[derive(Deserialize)]
struct SearchQuery {
    keyword: Option<String>,
    #[serde(default)]
    page: u64,
}

#[derive(Deserialize)]
struct StatusUpdateRequest {
    status: PostStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuyerUpdateRequest {
    buyer_id: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: i32,
    pub member_id: i32,
    pub username: String,
    pub title: String,
    pub description: String,
    pub price: i32,
    pub views: i32,
    pub transaction_type: TransactionType,
    pub category: Category,
    pub status: PostStatus,
    pub images: Vec<ImageView>,
    pub buyer_id: Option<i32>,
    pub created_at: Option<String>,
}

fn to_view(model: post::Model, username: String, images: Vec<ImageView>) -> PostView {
    PostView {
        id: model.id,
        member_id: model.member_id,
        username,
        title: model.title,
        description: model.description,
        price: model.price,
        views: model.views,
        transaction_type: model.transaction_type,
        category: model.category,
        status: model.status,
        images,
        buyer_id: model.buyer_id,
        created_at: model.created.map(to_rfc3339),
    }
}

async fn build_view(
    db: &DatabaseConnection,
    images: &ImageStore,
    model: post::Model,
) -> Result<PostView, AppError> {
    let writer = member_store::find(db, model.member_id).await?;
    let attached = images.get_images(db, DomainName::Post, model.id).await?;
    Ok(to_view(model, writer.username, attached))
}

async fn build_page(
    db: &DatabaseConnection,
    images: &ImageStore,
    page: Page<post::Model>,
) -> Result<Page<PostView>, AppError> {
    let mut writer_ids: Vec<i32> = page.list.iter().map(|p| p.member_id).collect();
    writer_ids.sort_unstable();
    writer_ids.dedup();
    let writers = member_store::find_many(db, &writer_ids).await?;

    let mut list = Vec::with_capacity(page.list.len());
    for model in page.list {
        let attached = images.get_images(db, DomainName::Post, model.id).await?;
        let username = writers
            .get(&model.member_id)
            .map(|m| m.username.clone())
            .unwrap_or_default();
        list.push(to_view(model, username, attached));
    }
    Ok(Page::new(list, page.page, page.size, page.total))
}

async fn list_page(
    db: &DatabaseConnection,
    images: &ImageStore,
    config: &AppConfig,
    filter: PostFilter,
    page: u64,
) -> Result<HttpResponse, AppError> {
    let found = post_store::list(db, filter, page, config.page_size).await?;
    let views = build_page(db, images, found).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(views))))
}

fn draft_of(form: &FormData) -> Result<PostDraft, AppError> {
    Ok(PostDraft {
        title: form.required("title")?.trim().to_string(),
        description: form.required("description")?.to_string(),
        price: form.number("price")?,
        transaction_type: form.enumeration("transactionType")?,
        category: form.enumeration("category")?,
    })
}

async fn create(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    auth: AuthUser,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = FormData::read(payload).await?;
    let draft = draft_of(&form)?;
    ImageStore::validate(&form.images)?;

    let saved = post_store::create(db.get_ref(), auth.member_id, draft).await?;
    let attached = images
        .save(db.get_ref(), &form.images, DomainName::Post, saved.id)
        .await?;
    let writer = member_store::find(db.get_ref(), auth.member_id).await?;
    info!("post created id={} writer={}", saved.id, auth.member_id);
    let view = to_view(saved, writer.username, attached);
    Ok(HttpResponse::Created().json(ResponseDto::success(Some(view))))
}

async fn get_post(
    req: HttpRequest,
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let mut found = post_store::find(db.get_ref(), id).await?;

    let gate = ViewGate::check(&req, id, config.view_cookie_max_age);
    if !gate.already_viewed {
        post_store::increment_views(db.get_ref(), id).await?;
        found = post_store::find(db.get_ref(), id).await?;
    }

    let view = build_view(db.get_ref(), images.get_ref(), found).await?;
    let mut builder = HttpResponse::Ok();
    if let Some(cookie) = gate.set_cookie {
        builder.cookie(cookie);
    }
    Ok(builder.json(ResponseDto::success(Some(view))))
}

async fn list_all(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    config: web::Data<AppConfig>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    list_page(db.get_ref(), images.get_ref(), config.get_ref(), PostFilter::All, query.page).await
}

async fn list_by_category(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    config: web::Data<AppConfig>,
    query: web::Query<CategoryQuery>,
) -> Result<HttpResponse, AppError> {
    let filter = PostFilter::Category(query.category);
    list_page(db.get_ref(), images.get_ref(), config.get_ref(), filter, query.page).await
}

async fn list_by_member(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let filter = PostFilter::Member(path.into_inner());
    list_page(db.get_ref(), images.get_ref(), config.get_ref(), filter, query.page).await
}

async fn search(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    config: web::Data<AppConfig>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, AppError> {
    let keyword = query
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::param_error("keyword cannot be blank"))?;
    let filter = PostFilter::Keyword(keyword.to_string());
    list_page(db.get_ref(), images.get_ref(), config.get_ref(), filter, query.page).await
}

async fn list_by_buyer(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let filter = PostFilter::Buyer(path.into_inner());
    list_page(db.get_ref(), images.get_ref(), config.get_ref(), filter, query.page).await
}

async fn update(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let existing = post_store::find(db.get_ref(), id).await?;
    auth.ensure_owner(existing.member_id, "post")?;

    let form = FormData::read(payload).await?;
    let draft = draft_of(&form)?;
    ImageStore::validate(&form.images)?;

    let saved = post_store::update(db.get_ref(), id, draft).await?;
    images
        .delete_all_images(db.get_ref(), DomainName::Post, id)
        .await?;
    images
        .save(db.get_ref(), &form.images, DomainName::Post, id)
        .await?;
    let view = build_view(db.get_ref(), images.get_ref(), saved).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(view))))
}

async fn update_status(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<StatusUpdateRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let existing = post_store::find(db.get_ref(), id).await?;
    auth.ensure_owner(existing.member_id, "post")?;

    let saved = post_store::update_status(db.get_ref(), id, payload.status).await?;
    let view = build_view(db.get_ref(), images.get_ref(), saved).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(view))))
}

async fn purchase(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<BuyerUpdateRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let existing = post_store::find(db.get_ref(), id).await?;
    auth.ensure_owner(existing.member_id, "post")?;
    member_store::find(db.get_ref(), payload.buyer_id).await?;

    let saved = post_store::purchase(db.get_ref(), id, payload.buyer_id).await?;
    info!("post {} sold to member {}", id, payload.buyer_id);
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
    let existing = post_store::find(db.get_ref(), id).await?;
    auth.ensure_owner(existing.member_id, "post")?;

    let removed_comments = db
        .transaction::<_, Vec<i32>, AppError>(move |txn| {
            Box::pin(async move {
                post_store::soft_delete(txn, id).await?;
                comment_store::delete_by_post(txn, id).await
            })
        })
        .await
        .map_err(map_tx_error)?;

    images
        .delete_all_images(db.get_ref(), DomainName::Post, id)
        .await?;
    for comment_id in &removed_comments {
        images
            .delete_all_images(db.get_ref(), DomainName::Comment, *comment_id)
            .await?;
    }
    info!("post {} deleted with {} comment(s)", id, removed_comments.len());
    Ok(HttpResponse::Ok().json(ResponseDto::<()>::success(None)))
}

async fn list_comments(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let found = post_store::find(db.get_ref(), path.into_inner()).await?;
    let page =
        post_comment_page(db.get_ref(), images.get_ref(), &found, query.page, config.page_size)
            .await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(page))))
}

/// Members who commented on the post, the writer left out.
async fn communication_members(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let found = post_store::find(db.get_ref(), path.into_inner()).await?;
    let ids = comment_store::find_commenters(
        db.get_ref(),
        found.id,
        found.member_id,
        query.page,
        config.page_size,
    )
    .await?;
    let mut members = member_store::find_many(db.get_ref(), &ids.list).await?;
    let profiles: Vec<ProfileView> = ids
        .list
        .iter()
        .filter_map(|id| members.remove(id))
        .map(ProfileView::from)
        .collect();
    let page = Page::new(profiles, ids.page, ids.size, ids.total);
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(page))))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test::{self, TestRequest};
    use serde_json::{json, Value};

    use crate::db::test_support::{insert_member, insert_post};
    use crate::routes::test_support::{multipart, TestState, PNG_BYTES};

    fn post_form() -> (String, Vec<u8>) {
        multipart(
            &[
                ("title", "desk lamp"),
                ("description", "works fine"),
                ("price", "12000"),
                ("transactionType", "SALE"),
                ("category", "HOME_APPLIANCE"),
            ],
            &[("lamp.png", "image/png", PNG_BYTES)],
        )
    }

    #[actix_web::test]
    async fn create_returns_post_view() {
        let state = TestState::new("post-create").await;
        let writer = insert_member(&state.db, "writer").await;
        let token = state.token(writer.id);
        let app = init_test_app!(state);

        let (ct, body) = post_form();
        let req = TestRequest::post()
            .uri("/api/v1/posts")
            .insert_header(("token", token))
            .insert_header(("content-type", ct))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["title"], "desk lamp");
        assert_eq!(body["data"]["status"], "FOR_SALE");
        assert_eq!(body["data"]["category"], "HOME_APPLIANCE");
        assert_eq!(body["data"]["username"], "writer");
        assert_eq!(body["data"]["images"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn repeat_view_with_marker_cookie_is_not_counted() {
        let state = TestState::new("post-views").await;
        let writer = insert_member(&state.db, "writer").await;
        let post = insert_post(&state.db, writer.id, "bike").await;
        let app = init_test_app!(state);
        let uri = format!("/api/v1/posts/{}", post.id);

        let resp = test::call_service(&app, TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let marker = resp
            .response()
            .cookies()
            .find(|c| c.name() == format!("viewed_post_{}", post.id))
            .map(|c| c.into_owned())
            .expect("marker cookie");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["views"], 1);

        let req = TestRequest::get().uri(&uri).cookie(marker).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["views"], 1);

        let req = TestRequest::get().uri(&uri).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["views"], 2);
    }

    #[actix_web::test]
    async fn stranger_cannot_change_status() {
        let state = TestState::new("post-status").await;
        let writer = insert_member(&state.db, "writer").await;
        let other = insert_member(&state.db, "other").await;
        let post = insert_post(&state.db, writer.id, "bike").await;
        let other_token = state.token(other.id);
        let writer_token = state.token(writer.id);
        let app = init_test_app!(state);
        let uri = format!("/api/v1/posts/{}/status", post.id);

        let req = TestRequest::patch()
            .uri(&uri)
            .insert_header(("token", other_token))
            .set_json(json!({"status": "RESERVED"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = TestRequest::patch()
            .uri(&uri)
            .insert_header(("token", writer_token))
            .set_json(json!({"status": "RESERVED"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "RESERVED");
    }

    #[actix_web::test]
    async fn purchase_then_list_by_buyer() {
        let state = TestState::new("post-purchase").await;
        let writer = insert_member(&state.db, "writer").await;
        let buyer = insert_member(&state.db, "buyer").await;
        let post = insert_post(&state.db, writer.id, "bike").await;
        let token = state.token(writer.id);
        let app = init_test_app!(state);

        let req = TestRequest::patch()
            .uri(&format!("/api/v1/posts/{}/purchase", post.id))
            .insert_header(("token", token))
            .set_json(json!({"buyerId": buyer.id}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "SOLD");
        assert_eq!(body["data"]["buyerId"], buyer.id);

        let req = TestRequest::get()
            .uri(&format!("/api/v1/posts/buyer/{}", buyer.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["list"][0]["id"], post.id);
    }

    #[actix_web::test]
    async fn delete_hides_post_and_its_comments() {
        let state = TestState::new("post-delete").await;
        let writer = insert_member(&state.db, "writer").await;
        let other = insert_member(&state.db, "other").await;
        let post = insert_post(&state.db, writer.id, "bike").await;
        let head = crate::store::comment::create(&state.db, post.id, other.id, "hi")
            .await
            .unwrap();
        let token = state.token(writer.id);
        let db = state.db.clone();
        let app = init_test_app!(state);

        let req = TestRequest::delete()
            .uri(&format!("/api/v1/posts/{}", post.id))
            .insert_header(("token", token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = TestRequest::get()
            .uri(&format!("/api/v1/posts/{}", post.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        assert!(crate::store::comment::find(&db, head.id).await.is_err());
    }

    #[actix_web::test]
    async fn communication_members_exclude_writer() {
        let state = TestState::new("post-members").await;
        let writer = insert_member(&state.db, "writer").await;
        let a = insert_member(&state.db, "alice").await;
        let b = insert_member(&state.db, "bob").await;
        let post = insert_post(&state.db, writer.id, "bike").await;
        let head = crate::store::comment::create(&state.db, post.id, a.id, "price?")
            .await
            .unwrap();
        crate::store::comment::create_reply(&state.db, post.id, writer.id, head.comment_group, "10k")
            .await
            .unwrap();
        crate::store::comment::create(&state.db, post.id, b.id, "me too")
            .await
            .unwrap();
        crate::store::comment::create(&state.db, post.id, a.id, "again")
            .await
            .unwrap();
        let app = init_test_app!(state);

        let req = TestRequest::get()
            .uri(&format!("/api/v1/posts/{}/communication-members", post.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 2);
        let names: Vec<&str> = body["data"]["list"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["username"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[actix_web::test]
    async fn comment_listings_reject_pages_past_the_offset_range() {
        let state = TestState::new("post-page-range").await;
        let writer = insert_member(&state.db, "writer").await;
        let post = insert_post(&state.db, writer.id, "bike").await;
        let app = init_test_app!(state);

        for path in ["comments", "communication-members"] {
            let req = TestRequest::get()
                .uri(&format!("/api/v1/posts/{}/{}?page=18446744073709551615", post.id, path))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["code"], 1);
        }
    }

    #[actix_web::test]
    async fn category_listing_rejects_unknown_category() {
        let state = TestState::new("post-category").await;
        let writer = insert_member(&state.db, "writer").await;
        insert_post(&state.db, writer.id, "phone").await;
        let app = init_test_app!(state);

        let req = TestRequest::get()
            .uri("/api/v1/posts/category?category=DIGITAL_DEVICE")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 1);

        let req = TestRequest::get()
            .uri("/api/v1/posts/category?category=TOYS")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
