pub mod comment;
pub mod comment_group;
pub mod image;
pub mod member;
pub mod post;
