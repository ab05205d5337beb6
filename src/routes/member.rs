use actix_web::{web, HttpResponse};
use log::info;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::auth::{issue_token, AuthUser};
use crate::config::AppConfig;
use crate::entity::member;
use crate::error::AppError;
use crate::response::ResponseDto;
use crate::sql::to_rfc3339;
use crate::store::member as member_store;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/signup").route(web::post().to(signup)))
        .service(web::resource("/signin").route(web::post().to(signin)))
        .service(web::resource("/me").route(web::get().to(me)))
        .service(web::resource("/{id:\\d+}").route(web::get().to(get_profile)));
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpRequest {
    email: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    token: String,
    member_id: i32,
    username: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub created: Option<String>,
}

impl From<member::Model> for ProfileView {
    fn from(model: member::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            username: model.username,
            created: model.created.map(to_rfc3339),
        }
    }
}

async fn signup(
    db: web::Data<DatabaseConnection>,
    payload: web::Json<SignUpRequest>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let created = member_store::register(
        db.get_ref(),
        payload.email.as_deref().unwrap_or_default(),
        payload.username.as_deref().unwrap_or_default(),
        payload.password.as_deref().unwrap_or_default(),
    )
    .await?;
    info!("member registered id={}", created.id);
    Ok(HttpResponse::Created().json(ResponseDto::success(Some(ProfileView::from(created)))))
}

async fn signin(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    payload: web::Json<SignInRequest>,
) -> Result<HttpResponse, AppError> {
    let email = payload.email.clone().unwrap_or_default();
    let password = payload.password.clone().unwrap_or_default();
    if email.trim().is_empty() {
        return Err(AppError::param_error("email cannot be null"));
    }
    if password.trim().is_empty() {
        return Err(AppError::param_error("password cannot be null"));
    }

    let found = member_store::authenticate(db.get_ref(), &email, &password).await?;
    let token = issue_token(&config, found.id)?;
    let response = SignInResponse {
        token,
        member_id: found.id,
        username: found.username,
    };
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(response))))
}

async fn me(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let found = member_store::find(db.get_ref(), auth.member_id).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(ProfileView::from(found)))))
}

async fn get_profile(
    db: web::Data<DatabaseConnection>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let found = member_store::find(db.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(ProfileView::from(found)))))
}
