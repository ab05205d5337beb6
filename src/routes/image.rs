use actix_web::{web, HttpResponse};
use sea_orm::DatabaseConnection;

use crate::error::AppError;
use crate::store::image::ImageStore;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/{id:\\d+}").route(web::get().to(serve)));
}

async fn serve(
    db: web::Data<DatabaseConnection>,
    images: web::Data<ImageStore>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let (data, content_type) = images.read(db.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().content_type(content_type).body(data))
}
