use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    #[sea_orm(string_value = "SALE")]
    Sale,
    #[sea_orm(string_value = "SHARE")]
    Share,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    #[sea_orm(string_value = "DIGITAL_DEVICE")]
    DigitalDevice,
    #[sea_orm(string_value = "HOME_APPLIANCE")]
    HomeAppliance,
    #[sea_orm(string_value = "FURNITURE")]
    Furniture,
    #[sea_orm(string_value = "KIDS")]
    Kids,
    #[sea_orm(string_value = "CLOTHING")]
    Clothing,
    #[sea_orm(string_value = "BEAUTY")]
    Beauty,
    #[sea_orm(string_value = "SPORTS")]
    Sports,
    #[sea_orm(string_value = "HOBBY")]
    Hobby,
    #[sea_orm(string_value = "BOOKS")]
    Books,
    #[sea_orm(string_value = "PET")]
    Pet,
    #[sea_orm(string_value = "ETC")]
    Etc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    #[sea_orm(string_value = "FOR_SALE")]
    ForSale,
    #[sea_orm(string_value = "RESERVED")]
    Reserved,
    #[sea_orm(string_value = "SOLD")]
    Sold,
    #[sea_orm(string_value = "DELETED")]
    Deleted,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "t_post")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub member_id: i32,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub price: i32,
    pub views: i32,
    pub transaction_type: TransactionType,
    pub category: Category,
    pub status: PostStatus,
    pub buyer_id: Option<i32>,
    pub created: Option<DateTimeUtc>,
    pub updated: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
