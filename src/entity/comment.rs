use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommentStatus {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "DELETED")]
    Deleted,
}

/// `seq == 0` marks the top-level comment of `comment_group`; replies carry
/// `seq >= 1`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "t_comment")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub post_id: i32,
    pub member_id: i32,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub comment_group: i32,
    pub seq: i32,
    pub status: CommentStatus,
    pub created: Option<DateTimeUtc>,
    pub updated: Option<DateTimeUtc>,
}

impl Model {
    pub fn is_top_level(&self) -> bool {
        self.seq == 0
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
