use actix_web::web;

#[cfg(test)]
macro_rules! init_test_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($state.config.clone()))
                .app_data(actix_web::web::Data::new($state.db.clone()))
                .app_data(actix_web::web::Data::new($state.images.clone()))
                .app_data(
                    actix_web::web::JsonConfig::default()
                        .error_handler(crate::response::json_error_handler),
                )
                .app_data(
                    actix_web::web::QueryConfig::default()
                        .error_handler(crate::response::query_error_handler),
                )
                .configure(crate::routes::configure),
        )
        .await
    };
}

pub mod comment;
pub mod cors;
pub mod form;
pub mod image;
pub mod member;
pub mod post;

/// Mounts every resource under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::scope("/members").configure(member::config))
            .service(web::scope("/posts").configure(post::config))
            .service(web::scope("/comments").configure(comment::config))
            .service(web::scope("/images").configure(image::config)),
    );
}
