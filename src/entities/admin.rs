use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "admins")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    #[sea_orm(unique)]
    pub email: String,
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::admin_permission::Entity")]
    AdminPermission,
}

impl Related<super::admin_permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AdminPermission.def()
    }
}

impl Related<super::permission::Entity> for Entity {
    fn to() -> RelationDef {
        super::admin_permission::Relation::Permission.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::admin_permission::Relation::Admin.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
