use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Named permission in `{entity}-{action}` form, scoped to a guard.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "permissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub guard_name: String,
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

impl Related<super::admin::Entity> for Entity {
    fn to() -> RelationDef {
        super::admin_permission::Relation::Admin.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::admin_permission::Relation::Permission.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
