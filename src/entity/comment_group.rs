use sea_orm::entity::prelude::*;

/// One row per thread. `last_seq` is the highest reply sequence ever issued
/// in the group and only moves forward.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "t_comment_group")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub comment_group: i32,
    pub post_id: i32,
    pub last_seq: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
