use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Auto-increment primary key with a backend-specific integer type.
/// SQLite only auto-increments plain INTEGER primary keys.
fn auto_pk<T: IntoIden>(manager: &SchemaManager<'_>, name: T) -> ColumnDef {
    match manager.get_database_backend() {
        sea_orm::DatabaseBackend::Postgres => ColumnDef::new(name)
            .big_integer()
            .not_null()
            .auto_increment()
            .primary_key()
            .to_owned(),
        _ => ColumnDef::new(name)
            .integer()
            .not_null()
            .auto_increment()
            .primary_key()
            .to_owned(),
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Geo reference tables: countries -> states -> cities
        manager
            .create_table(
                Table::create()
                    .table(Countries::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, Countries::Id))
                    .col(string(Countries::Name))
                    .col(string(Countries::Code))
                    .col(string(Countries::Phonecode))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(States::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, States::Id))
                    .col(string(States::Name))
                    .col(big_integer(States::CountryId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_states_country")
                            .from(States::Table, States::CountryId)
                            .to(Countries::Table, Countries::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Cities::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, Cities::Id))
                    .col(string(Cities::Name))
                    .col(big_integer(Cities::StateId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cities_state")
                            .from(Cities::Table, Cities::StateId)
                            .to(States::Table, States::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Departments::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, Departments::Id))
                    .col(string(Departments::Name))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Employees::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, Employees::Id))
                    .col(string(Employees::FirstName))
                    .col(string(Employees::LastName))
                    .col(string(Employees::Address))
                    .col(string(Employees::DateHired))
                    .col(string_null(Employees::Image))
                    .col(
                        ColumnDef::new(Employees::Status)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(Employees::CountryId))
                    .col(big_integer(Employees::StateId))
                    .col(big_integer(Employees::CityId))
                    .col(big_integer(Employees::CreatedAt))
                    .col(big_integer(Employees::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_employees_country")
                            .from(Employees::Table, Employees::CountryId)
                            .to(Countries::Table, Countries::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_employees_state")
                            .from(Employees::Table, Employees::StateId)
                            .to(States::Table, States::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_employees_city")
                            .from(Employees::Table, Employees::CityId)
                            .to(Cities::Table, Cities::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Create index on employees.created_at (default list sort)
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_employees_created")
                    .table(Employees::Table)
                    .col(Employees::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Pivot table carrying the per-pairing `order` attribute
        manager
            .create_table(
                Table::create()
                    .table(DepartmentEmployee::Table)
                    .if_not_exists()
                    .col(big_integer(DepartmentEmployee::EmployeeId))
                    .col(big_integer(DepartmentEmployee::DepartmentId))
                    .col(
                        ColumnDef::new(DepartmentEmployee::Order)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .primary_key(
                        Index::create()
                            .col(DepartmentEmployee::EmployeeId)
                            .col(DepartmentEmployee::DepartmentId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_department_employee_employee")
                            .from(DepartmentEmployee::Table, DepartmentEmployee::EmployeeId)
                            .to(Employees::Table, Employees::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_department_employee_department")
                            .from(DepartmentEmployee::Table, DepartmentEmployee::DepartmentId)
                            .to(Departments::Table, Departments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Actor tables: admins hold permissions, users never access the panel
        manager
            .create_table(
                Table::create()
                    .table(Admins::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, Admins::Id))
                    .col(string(Admins::Name))
                    .col(
                        ColumnDef::new(Admins::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(string(Admins::PasswordHash))
                    .col(big_integer(Admins::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, Users::Id))
                    .col(string(Users::Name))
                    .col(
                        ColumnDef::new(Users::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(string(Users::PasswordHash))
                    .col(big_integer(Users::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Permissions::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, Permissions::Id))
                    .col(string(Permissions::Name))
                    .col(string(Permissions::GuardName))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_permissions_name_guard")
                    .table(Permissions::Table)
                    .col(Permissions::Name)
                    .col(Permissions::GuardName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AdminPermissions::Table)
                    .if_not_exists()
                    .col(big_integer(AdminPermissions::AdminId))
                    .col(big_integer(AdminPermissions::PermissionId))
                    .primary_key(
                        Index::create()
                            .col(AdminPermissions::AdminId)
                            .col(AdminPermissions::PermissionId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_admin_permissions_admin")
                            .from(AdminPermissions::Table, AdminPermissions::AdminId)
                            .to(Admins::Table, Admins::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_admin_permissions_permission")
                            .from(AdminPermissions::Table, AdminPermissions::PermissionId)
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Sessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sessions::SessionId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Sessions::PrincipalType))
                    .col(big_integer(Sessions::PrincipalId))
                    .col(big_integer(Sessions::CreatedAt))
                    .col(big_integer(Sessions::ExpiresAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sessions_expires")
                    .table(Sessions::Table)
                    .col(Sessions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // Export run bookkeeping (status, row accounting)
        manager
            .create_table(
                Table::create()
                    .table(ExportRuns::Table)
                    .if_not_exists()
                    .col(auto_pk(manager, ExportRuns::Id))
                    .col(string(ExportRuns::FileName))
                    .col(string(ExportRuns::Status))
                    .col(big_integer(ExportRuns::StartedAt))
                    .col(big_integer_null(ExportRuns::CompletedAt))
                    .col(big_integer_null(ExportRuns::SuccessfulRows))
                    .col(big_integer_null(ExportRuns::FailedRows))
                    .col(string_null(ExportRuns::ErrorMessage))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_export_runs_started")
                    .table(ExportRuns::Table)
                    .col(ExportRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExportRuns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AdminPermissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Permissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Admins::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DepartmentEmployee::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Employees::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Departments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Cities::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(States::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Countries::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Countries {
    Table,
    Id,
    Name,
    Code,
    Phonecode,
}

#[derive(DeriveIden)]
enum States {
    Table,
    Id,
    Name,
    CountryId,
}

#[derive(DeriveIden)]
enum Cities {
    Table,
    Id,
    Name,
    StateId,
}

#[derive(DeriveIden)]
enum Departments {
    Table,
    Id,
    Name,
}

#[derive(DeriveIden)]
enum Employees {
    Table,
    Id,
    FirstName,
    LastName,
    Address,
    DateHired,
    Image,
    Status,
    CountryId,
    StateId,
    CityId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DepartmentEmployee {
    Table,
    EmployeeId,
    DepartmentId,
    Order,
}

#[derive(DeriveIden)]
enum Admins {
    Table,
    Id,
    Name,
    Email,
    PasswordHash,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Name,
    Email,
    PasswordHash,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Permissions {
    Table,
    Id,
    Name,
    GuardName,
}

#[derive(DeriveIden)]
enum AdminPermissions {
    Table,
    AdminId,
    PermissionId,
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    SessionId,
    PrincipalType,
    PrincipalId,
    CreatedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum ExportRuns {
    Table,
    Id,
    FileName,
    Status,
    StartedAt,
    CompletedAt,
    SuccessfulRows,
    FailedRows,
    ErrorMessage,
}
