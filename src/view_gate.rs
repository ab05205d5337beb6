use actix_web::cookie::{time::Duration, Cookie, SameSite};
use actix_web::HttpRequest;

const COOKIE_PREFIX: &str = "viewed_post_";

/// Outcome of checking a client's marker cookie for one post.
#[derive(Debug)]
pub struct ViewGate {
    pub already_viewed: bool,
    pub set_cookie: Option<Cookie<'static>>,
}

impl ViewGate {
    /// Repeat views carry the marker and leave the counter alone; first views
    /// get a marker that expires after `max_age_secs`. Client-side only, a
    /// client dropping its cookies is counted again.
    pub fn check(req: &HttpRequest, post_id: i32, max_age_secs: i64) -> Self {
        let name = cookie_name(post_id);
        if req.cookie(&name).is_some() {
            return Self {
                already_viewed: true,
                set_cookie: None,
            };
        }
        Self {
            already_viewed: false,
            set_cookie: Some(build_cookie(name, max_age_secs)),
        }
    }
}

fn cookie_name(post_id: i32) -> String {
    format!("{}{}", COOKIE_PREFIX, post_id)
}

fn build_cookie(name: String, max_age_secs: i64) -> Cookie<'static> {
    Cookie::build(name, "1")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(max_age_secs))
        .finish()
}

#[cfg(test)]
mod tests {
    use actix_web::cookie::Cookie;
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn first_view_issues_marker() {
        let req = TestRequest::default().to_http_request();
        let gate = ViewGate::check(&req, 3, 60);
        assert!(!gate.already_viewed);
        let cookie = gate.set_cookie.unwrap();
        assert_eq!(cookie.name(), "viewed_post_3");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(60)));
    }

    #[test]
    fn marker_for_same_post_suppresses_count() {
        let req = TestRequest::default()
            .cookie(Cookie::new("viewed_post_3", "1"))
            .to_http_request();
        let gate = ViewGate::check(&req, 3, 60);
        assert!(gate.already_viewed);
        assert!(gate.set_cookie.is_none());
    }

    #[test]
    fn marker_for_other_post_is_ignored() {
        let req = TestRequest::default()
            .cookie(Cookie::new("viewed_post_31", "1"))
            .to_http_request();
        assert!(!ViewGate::check(&req, 3, 60).already_viewed);
    }
}
