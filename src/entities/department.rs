use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "departments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::department_employee::Entity")]
    DepartmentEmployee,
}

impl Related<super::department_employee::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DepartmentEmployee.def()
    }
}

impl Related<super::employee::Entity> for Entity {
    fn to() -> RelationDef {
        super::department_employee::Relation::Employee.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::department_employee::Relation::Department.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
