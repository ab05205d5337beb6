pub mod comment;
pub mod image;
pub mod member;
pub mod post;
