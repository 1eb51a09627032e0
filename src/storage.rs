use crate::authz::{PermissionSet, ADMIN_GUARD};
use crate::entities;
use crate::errors::AppError;
use crate::geo;
use crate::session::SESSION_TTL_SECS;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::{NaiveDate, Utc};
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, IntoActiveModel,
    ModelTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

/// `order` assigned when a department is attached through the employee
/// form, which exposes no order field.
pub const DEFAULT_ATTACH_ORDER: i64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub principal_type: String,
    pub principal_id: i64,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub date_hired: String,
    pub image: Option<String>,
    pub status: bool,
    pub country_id: i64,
    pub state_id: i64,
    pub city_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl From<entities::employee::Model> for Employee {
    fn from(model: entities::employee::Model) -> Self {
        Employee {
            id: model.id,
            first_name: model.first_name,
            last_name: model.last_name,
            address: model.address,
            date_hired: model.date_hired,
            image: model.image,
            status: model.status != 0,
            country_id: model.country_id,
            state_id: model.state_id,
            city_id: model.city_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// One department attached to an employee, with the pivot `order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentMembership {
    pub department_id: i64,
    pub name: String,
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRun {
    pub id: i64,
    pub file_name: String,
    pub status: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub successful_rows: Option<i64>,
    pub failed_rows: Option<i64>,
    pub error_message: Option<String>,
}

impl From<entities::export_run::Model> for ExportRun {
    fn from(model: entities::export_run::Model) -> Self {
        ExportRun {
            id: model.id,
            file_name: model.file_name,
            status: model.status,
            started_at: model.started_at,
            completed_at: model.completed_at,
            successful_rows: model.successful_rows,
            failed_rows: model.failed_rows,
            error_message: model.error_message,
        }
    }
}

/// Employee form payload. All text fields are required and capped at
/// 255 characters; `departments` is required on create and optional on
/// update (None leaves the association set untouched).
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct EmployeeInput {
    #[validate(required, length(min = 1, max = 255))]
    pub first_name: Option<String>,
    #[validate(required, length(min = 1, max = 255))]
    pub last_name: Option<String>,
    #[validate(required, length(min = 1, max = 255))]
    pub address: Option<String>,
    #[validate(required, custom(function = validate_date_hired))]
    pub date_hired: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub status: bool,
    #[validate(required)]
    pub country_id: Option<i64>,
    #[validate(required)]
    pub state_id: Option<i64>,
    #[validate(required)]
    pub city_id: Option<i64>,
    pub departments: Option<Vec<i64>>,
}

fn validate_date_hired(value: &str) -> Result<(), ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_date"))
}

fn required_error(field: &'static str) -> AppError {
    let mut errors = ValidationErrors::new();
    errors.add(field, ValidationError::new("required"));
    errors.into()
}

struct ResolvedEmployee {
    first_name: String,
    last_name: String,
    address: String,
    date_hired: String,
    country_id: i64,
    state_id: i64,
    city_id: i64,
}

impl EmployeeInput {
    /// Unwrap the required fields after `validate()` has passed.
    fn resolved(&self) -> Result<ResolvedEmployee, AppError> {
        Ok(ResolvedEmployee {
            first_name: self
                .first_name
                .clone()
                .ok_or_else(|| required_error("first_name"))?,
            last_name: self
                .last_name
                .clone()
                .ok_or_else(|| required_error("last_name"))?,
            address: self
                .address
                .clone()
                .ok_or_else(|| required_error("address"))?,
            date_hired: self
                .date_hired
                .clone()
                .ok_or_else(|| required_error("date_hired"))?,
            country_id: self.country_id.ok_or_else(|| required_error("country_id"))?,
            state_id: self.state_id.ok_or_else(|| required_error("state_id"))?,
            city_id: self.city_id.ok_or_else(|| required_error("city_id"))?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct DepartmentInput {
    #[validate(required, length(min = 1, max = 255))]
    pub name: Option<String>,
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, AppError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

fn hash_password(password: &str) -> Result<String, AppError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Other(format!("Password hashing failed: {}", e)))
}

fn password_matches(password: &str, hash: &str) -> Result<bool, AppError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Other(format!("Invalid password hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// Admin management functions

pub async fn create_admin(
    db: &DatabaseConnection,
    name: &str,
    email: &str,
    password: &str,
) -> Result<Admin, AppError> {
    let created_at = Utc::now().timestamp();
    let password_hash = hash_password(password)?;

    let admin = entities::admin::ActiveModel {
        name: Set(name.to_string()),
        email: Set(email.to_string()),
        password_hash: Set(password_hash),
        created_at: Set(created_at),
        ..Default::default()
    };

    let model = admin.insert(db).await?;

    Ok(Admin {
        id: model.id,
        name: model.name,
        email: model.email,
        created_at: model.created_at,
    })
}

pub async fn get_admin(db: &DatabaseConnection, id: i64) -> Result<Option<Admin>, AppError> {
    Ok(entities::admin::Entity::find_by_id(id)
        .one(db)
        .await?
        .map(|model| Admin {
            id: model.id,
            name: model.name,
            email: model.email,
            created_at: model.created_at,
        }))
}

pub async fn get_admin_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<Admin>, AppError> {
    use entities::admin::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Email.eq(email))
        .one(db)
        .await?
        .map(|model| Admin {
            id: model.id,
            name: model.name,
            email: model.email,
            created_at: model.created_at,
        }))
}

/// Returns the admin id when the credentials check out.
pub async fn verify_admin_password(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
) -> Result<Option<i64>, AppError> {
    use entities::admin::{Column, Entity};

    let Some(model) = Entity::find().filter(Column::Email.eq(email)).one(db).await? else {
        return Ok(None);
    };

    if password_matches(password, &model.password_hash)? {
        Ok(Some(model.id))
    } else {
        Ok(None)
    }
}

/// Grant a named permission under the admin guard, creating the
/// permission row on first use. Granting twice is a no-op.
pub async fn grant_permission(
    db: &DatabaseConnection,
    admin_id: i64,
    name: &str,
) -> Result<(), AppError> {
    use entities::permission::{Column, Entity};

    let permission = match Entity::find()
        .filter(Column::Name.eq(name))
        .filter(Column::GuardName.eq(ADMIN_GUARD))
        .one(db)
        .await?
    {
        Some(p) => p,
        None => {
            entities::permission::ActiveModel {
                name: Set(name.to_string()),
                guard_name: Set(ADMIN_GUARD.to_string()),
                ..Default::default()
            }
            .insert(db)
            .await?
        }
    };

    let existing = entities::admin_permission::Entity::find_by_id((admin_id, permission.id))
        .one(db)
        .await?;
    if existing.is_none() {
        entities::admin_permission::ActiveModel {
            admin_id: Set(admin_id),
            permission_id: Set(permission.id),
        }
        .insert(db)
        .await?;
    }

    Ok(())
}

pub async fn revoke_permission(
    db: &DatabaseConnection,
    admin_id: i64,
    name: &str,
) -> Result<(), AppError> {
    use entities::permission::{Column, Entity};

    if let Some(permission) = Entity::find()
        .filter(Column::Name.eq(name))
        .filter(Column::GuardName.eq(ADMIN_GUARD))
        .one(db)
        .await?
    {
        entities::admin_permission::Entity::delete_by_id((admin_id, permission.id))
            .exec(db)
            .await?;
    }

    Ok(())
}

/// Load the admin's permission snapshot under the admin guard. The
/// snapshot is resolved fresh from the database on every call; callers
/// hold it for the duration of one request only.
pub async fn load_admin_permissions(
    db: &DatabaseConnection,
    admin_id: i64,
) -> Result<PermissionSet, AppError> {
    let admin = entities::admin::Entity::find_by_id(admin_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("admin {admin_id}")))?;

    let names = admin
        .find_related(entities::permission::Entity)
        .all(db)
        .await?
        .into_iter()
        .filter(|p| p.guard_name == ADMIN_GUARD)
        .map(|p| p.name);

    Ok(PermissionSet::new(ADMIN_GUARD, names))
}

// User management functions

pub async fn create_user(
    db: &DatabaseConnection,
    name: &str,
    email: &str,
    password: &str,
) -> Result<AppUser, AppError> {
    let created_at = Utc::now().timestamp();
    let password_hash = hash_password(password)?;

    let user = entities::app_user::ActiveModel {
        name: Set(name.to_string()),
        email: Set(email.to_string()),
        password_hash: Set(password_hash),
        created_at: Set(created_at),
        ..Default::default()
    };

    let model = user.insert(db).await?;

    Ok(AppUser {
        id: model.id,
        name: model.name,
        email: model.email,
        created_at: model.created_at,
    })
}

pub async fn get_user(db: &DatabaseConnection, id: i64) -> Result<Option<AppUser>, AppError> {
    Ok(entities::app_user::Entity::find_by_id(id)
        .one(db)
        .await?
        .map(|model| AppUser {
            id: model.id,
            name: model.name,
            email: model.email,
            created_at: model.created_at,
        }))
}

pub async fn verify_user_password(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
) -> Result<Option<i64>, AppError> {
    use entities::app_user::{Column, Entity};

    let Some(model) = Entity::find().filter(Column::Email.eq(email)).one(db).await? else {
        return Ok(None);
    };

    if password_matches(password, &model.password_hash)? {
        Ok(Some(model.id))
    } else {
        Ok(None)
    }
}

// Session functions

pub async fn create_session(
    db: &DatabaseConnection,
    principal_type: &str,
    principal_id: i64,
) -> Result<Session, AppError> {
    let session_id = random_id();
    let now = Utc::now().timestamp();
    let expires_at = now + SESSION_TTL_SECS;

    let session = entities::session::ActiveModel {
        session_id: Set(session_id.clone()),
        principal_type: Set(principal_type.to_string()),
        principal_id: Set(principal_id),
        created_at: Set(now),
        expires_at: Set(expires_at),
    };

    session.insert(db).await?;

    Ok(Session {
        session_id,
        principal_type: principal_type.to_string(),
        principal_id,
        created_at: now,
        expires_at,
    })
}

pub async fn get_session(
    db: &DatabaseConnection,
    session_id: &str,
) -> Result<Option<Session>, AppError> {
    let now = Utc::now().timestamp();

    Ok(entities::session::Entity::find_by_id(session_id)
        .one(db)
        .await?
        .filter(|model| model.expires_at > now)
        .map(|model| Session {
            session_id: model.session_id,
            principal_type: model.principal_type,
            principal_id: model.principal_id,
            created_at: model.created_at,
            expires_at: model.expires_at,
        }))
}

pub async fn delete_session(db: &DatabaseConnection, session_id: &str) -> Result<(), AppError> {
    entities::session::Entity::delete_by_id(session_id)
        .exec(db)
        .await?;
    Ok(())
}

// Geo reference data functions

pub async fn create_country(
    db: &DatabaseConnection,
    name: &str,
    code: &str,
    phonecode: &str,
) -> Result<entities::country::Model, AppError> {
    let country = entities::country::ActiveModel {
        name: Set(name.to_string()),
        code: Set(code.to_string()),
        phonecode: Set(phonecode.to_string()),
        ..Default::default()
    };
    Ok(country.insert(db).await?)
}

pub async fn create_state(
    db: &DatabaseConnection,
    name: &str,
    country_id: i64,
) -> Result<entities::state::Model, AppError> {
    let state = entities::state::ActiveModel {
        name: Set(name.to_string()),
        country_id: Set(country_id),
        ..Default::default()
    };
    Ok(state.insert(db).await?)
}

pub async fn create_city(
    db: &DatabaseConnection,
    name: &str,
    state_id: i64,
) -> Result<entities::city::Model, AppError> {
    let city = entities::city::ActiveModel {
        name: Set(name.to_string()),
        state_id: Set(state_id),
        ..Default::default()
    };
    Ok(city.insert(db).await?)
}

pub async fn list_countries(
    db: &DatabaseConnection,
) -> Result<Vec<entities::country::Model>, AppError> {
    use entities::country::{Column, Entity};
    Ok(Entity::find().order_by_asc(Column::Name).all(db).await?)
}

// Department functions

pub async fn create_department(
    db: &DatabaseConnection,
    input: DepartmentInput,
) -> Result<entities::department::Model, AppError> {
    input.validate()?;
    let name = input.name.ok_or_else(|| required_error("name"))?;

    let department = entities::department::ActiveModel {
        name: Set(name),
        ..Default::default()
    };
    Ok(department.insert(db).await?)
}

pub async fn get_department(
    db: &DatabaseConnection,
    id: i64,
) -> Result<Option<entities::department::Model>, AppError> {
    Ok(entities::department::Entity::find_by_id(id).one(db).await?)
}

pub async fn list_departments(
    db: &DatabaseConnection,
) -> Result<Vec<entities::department::Model>, AppError> {
    use entities::department::{Column, Entity};
    Ok(Entity::find().order_by_asc(Column::Id).all(db).await?)
}

pub async fn update_department(
    db: &DatabaseConnection,
    id: i64,
    input: DepartmentInput,
) -> Result<entities::department::Model, AppError> {
    input.validate()?;
    let name = input.name.ok_or_else(|| required_error("name"))?;

    let department = entities::department::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("department {id}")))?;

    let mut active = department.into_active_model();
    active.name = Set(name);
    Ok(active.update(db).await?)
}

/// Hard delete; pivot rows go with the department.
pub async fn delete_department(db: &DatabaseConnection, id: i64) -> Result<(), AppError> {
    use entities::department_employee::Column;

    let department = entities::department::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("department {id}")))?;

    let txn = db.begin().await?;
    entities::department_employee::Entity::delete_many()
        .filter(Column::DepartmentId.eq(id))
        .exec(&txn)
        .await?;
    department.delete(&txn).await?;
    txn.commit().await?;
    Ok(())
}

async fn ensure_departments_exist(
    db: &DatabaseConnection,
    ids: &[i64],
) -> Result<(), AppError> {
    use entities::department::{Column, Entity};

    let found = Entity::find()
        .filter(Column::Id.is_in(ids.to_vec()))
        .select_only()
        .column(Column::Id)
        .into_tuple::<i64>()
        .all(db)
        .await?;

    for id in ids {
        if !found.contains(id) {
            return Err(AppError::NotFound(format!("department {id}")));
        }
    }
    Ok(())
}

// Employee functions

pub async fn create_employee(
    db: &DatabaseConnection,
    input: EmployeeInput,
) -> Result<Employee, AppError> {
    input.validate()?;
    let resolved = input.resolved()?;

    // The create form requires at least one department
    let departments = match &input.departments {
        Some(ids) if !ids.is_empty() => ids.clone(),
        _ => return Err(required_error("departments")),
    };

    geo::ensure_hierarchy(db, resolved.country_id, resolved.state_id, resolved.city_id).await?;
    ensure_departments_exist(db, &departments).await?;

    let now = Utc::now().timestamp();
    let txn = db.begin().await?;

    let model = entities::employee::ActiveModel {
        first_name: Set(resolved.first_name),
        last_name: Set(resolved.last_name),
        address: Set(resolved.address),
        date_hired: Set(resolved.date_hired),
        image: Set(input.image.clone()),
        status: Set(if input.status { 1 } else { 0 }),
        country_id: Set(resolved.country_id),
        state_id: Set(resolved.state_id),
        city_id: Set(resolved.city_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    for department_id in &departments {
        entities::department_employee::ActiveModel {
            employee_id: Set(model.id),
            department_id: Set(*department_id),
            order: Set(DEFAULT_ATTACH_ORDER),
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;
    Ok(model.into())
}

pub async fn get_employee(db: &DatabaseConnection, id: i64) -> Result<Option<Employee>, AppError> {
    Ok(entities::employee::Entity::find_by_id(id)
        .one(db)
        .await?
        .map(Employee::from))
}

/// Update the record and, when `departments` is provided, resync the
/// association set in the same transaction. Newly attached departments
/// get the default order; surviving pairings keep theirs.
pub async fn update_employee(
    db: &DatabaseConnection,
    id: i64,
    input: EmployeeInput,
) -> Result<Employee, AppError> {
    use entities::department_employee::Column as PivotColumn;

    input.validate()?;
    let resolved = input.resolved()?;

    let existing = entities::employee::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("employee {id}")))?;

    geo::ensure_hierarchy(db, resolved.country_id, resolved.state_id, resolved.city_id).await?;
    if let Some(ids) = &input.departments {
        ensure_departments_exist(db, ids).await?;
    }

    let now = Utc::now().timestamp();
    let txn = db.begin().await?;

    let mut active = existing.into_active_model();
    active.first_name = Set(resolved.first_name);
    active.last_name = Set(resolved.last_name);
    active.address = Set(resolved.address);
    active.date_hired = Set(resolved.date_hired);
    active.image = Set(input.image.clone());
    active.status = Set(if input.status { 1 } else { 0 });
    active.country_id = Set(resolved.country_id);
    active.state_id = Set(resolved.state_id);
    active.city_id = Set(resolved.city_id);
    active.updated_at = Set(now);
    let model = active.update(&txn).await?;

    if let Some(wanted) = &input.departments {
        let current: Vec<i64> = entities::department_employee::Entity::find()
            .filter(PivotColumn::EmployeeId.eq(id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|row| row.department_id)
            .collect();

        for department_id in &current {
            if !wanted.contains(department_id) {
                entities::department_employee::Entity::delete_by_id((id, *department_id))
                    .exec(&txn)
                    .await?;
            }
        }
        for department_id in wanted {
            if !current.contains(department_id) {
                entities::department_employee::ActiveModel {
                    employee_id: Set(id),
                    department_id: Set(*department_id),
                    order: Set(DEFAULT_ATTACH_ORDER),
                }
                .insert(&txn)
                .await?;
            }
        }
    }

    txn.commit().await?;
    Ok(model.into())
}

/// Hard delete; the record and its pivot rows go together.
pub async fn delete_employee(db: &DatabaseConnection, id: i64) -> Result<(), AppError> {
    use entities::department_employee::Column as PivotColumn;

    let employee = entities::employee::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("employee {id}")))?;

    let txn = db.begin().await?;
    entities::department_employee::Entity::delete_many()
        .filter(PivotColumn::EmployeeId.eq(id))
        .exec(&txn)
        .await?;
    employee.delete(&txn).await?;
    txn.commit().await?;
    Ok(())
}

// Employee-department association functions

/// Attach a department to an employee. Attaching a department that is
/// already associated is rejected rather than made idempotent, so the
/// caller learns about the stale form state.
pub async fn attach_department(
    db: &DatabaseConnection,
    employee_id: i64,
    department_id: i64,
    order: i64,
) -> Result<(), AppError> {
    entities::employee::Entity::find_by_id(employee_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("employee {employee_id}")))?;
    entities::department::Entity::find_by_id(department_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("department {department_id}")))?;

    let existing =
        entities::department_employee::Entity::find_by_id((employee_id, department_id))
            .one(db)
            .await?;
    if existing.is_some() {
        return Err(AppError::Duplicate(format!(
            "department {department_id} already attached to employee {employee_id}"
        )));
    }

    entities::department_employee::ActiveModel {
        employee_id: Set(employee_id),
        department_id: Set(department_id),
        order: Set(order),
    }
    .insert(db)
    .await?;

    Ok(())
}

pub async fn detach_department(
    db: &DatabaseConnection,
    employee_id: i64,
    department_id: i64,
) -> Result<(), AppError> {
    let result =
        entities::department_employee::Entity::delete_by_id((employee_id, department_id))
            .exec(db)
            .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound(format!(
            "department {department_id} is not attached to employee {employee_id}"
        )));
    }
    Ok(())
}

pub async fn update_department_order(
    db: &DatabaseConnection,
    employee_id: i64,
    department_id: i64,
    order: i64,
) -> Result<(), AppError> {
    let pivot = entities::department_employee::Entity::find_by_id((employee_id, department_id))
        .one(db)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "department {department_id} is not attached to employee {employee_id}"
            ))
        })?;

    let mut active = pivot.into_active_model();
    active.order = Set(order);
    active.update(db).await?;
    Ok(())
}

pub async fn departments_for_employee(
    db: &DatabaseConnection,
    employee_id: i64,
) -> Result<Vec<DepartmentMembership>, AppError> {
    use entities::department_employee::{Column, Entity};

    let rows = Entity::find()
        .filter(Column::EmployeeId.eq(employee_id))
        .find_also_related(entities::department::Entity)
        .order_by_asc(Column::Order)
        .order_by_asc(Column::DepartmentId)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(pivot, department)| {
            department.map(|d| DepartmentMembership {
                department_id: d.id,
                name: d.name,
                order: pivot.order,
            })
        })
        .collect())
}

// Export run bookkeeping

pub async fn start_export_run(
    db: &DatabaseConnection,
    file_name: &str,
) -> Result<ExportRun, AppError> {
    let now = Utc::now().timestamp();

    let run = entities::export_run::ActiveModel {
        file_name: Set(file_name.to_string()),
        status: Set("pending".to_string()),
        started_at: Set(now),
        completed_at: Set(None),
        successful_rows: Set(None),
        failed_rows: Set(None),
        error_message: Set(None),
        ..Default::default()
    };

    Ok(run.insert(db).await?.into())
}

pub async fn complete_export_run(
    db: &DatabaseConnection,
    run_id: i64,
    successful_rows: i64,
    failed_rows: i64,
) -> Result<(), AppError> {
    let run = entities::export_run::Entity::find_by_id(run_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("export run {run_id}")))?;

    let mut active = run.into_active_model();
    active.completed_at = Set(Some(Utc::now().timestamp()));
    active.status = Set("completed".to_string());
    active.successful_rows = Set(Some(successful_rows));
    active.failed_rows = Set(Some(failed_rows));
    active.update(db).await?;
    Ok(())
}

pub async fn fail_export_run(
    db: &DatabaseConnection,
    run_id: i64,
    failed_rows: i64,
    error_message: &str,
) -> Result<(), AppError> {
    let run = entities::export_run::Entity::find_by_id(run_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("export run {run_id}")))?;

    let mut active = run.into_active_model();
    active.completed_at = Set(Some(Utc::now().timestamp()));
    active.status = Set("failed".to_string());
    active.failed_rows = Set(Some(failed_rows));
    active.error_message = Set(Some(error_message.to_string()));
    active.update(db).await?;
    Ok(())
}

pub async fn get_export_run(
    db: &DatabaseConnection,
    run_id: i64,
) -> Result<Option<ExportRun>, AppError> {
    Ok(entities::export_run::Entity::find_by_id(run_id)
        .one(db)
        .await?
        .map(ExportRun::from))
}

pub async fn list_export_runs(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<ExportRun>, AppError> {
    use entities::export_run::{Column, Entity};

    Ok(Entity::find()
        .order_by_desc(Column::StartedAt)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?
        .into_iter()
        .map(ExportRun::from)
        .collect())
}

/// Create the bootstrap admin with the full permission set when no
/// admin with the seed email exists yet.
pub async fn ensure_default_admin(
    db: &DatabaseConnection,
    seed: &crate::settings::Seed,
) -> Result<(), AppError> {
    use crate::authz::{permission_name, Action, Resource};

    if get_admin_by_email(db, &seed.admin_email).await?.is_some() {
        return Ok(());
    }

    let admin = create_admin(db, &seed.admin_name, &seed.admin_email, &seed.admin_password).await?;
    for resource in [Resource::Employee, Resource::Department] {
        for action in [Action::View, Action::Create, Action::Update, Action::Delete] {
            grant_permission(db, admin.id, &permission_name(resource, action)).await?;
        }
    }

    tracing::info!(email = %seed.admin_email, "Created default admin");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::TestDb;
    use super::*;
    use migration::MigratorTrait as _;

    async fn seed_geo(db: &DatabaseConnection) -> (i64, i64, i64) {
        let country = create_country(db, "Jordan", "JO", "962")
            .await
            .expect("Failed to create country");
        let state = create_state(db, "Amman", country.id)
            .await
            .expect("Failed to create state");
        let city = create_city(db, "Abdali", state.id)
            .await
            .expect("Failed to create city");
        (country.id, state.id, city.id)
    }

    async fn seed_department(db: &DatabaseConnection, name: &str) -> i64 {
        create_department(
            db,
            DepartmentInput {
                name: Some(name.to_string()),
            },
        )
        .await
        .expect("Failed to create department")
        .id
    }

    fn employee_input(
        first: &str,
        last: &str,
        geo: (i64, i64, i64),
        departments: Vec<i64>,
    ) -> EmployeeInput {
        EmployeeInput {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            address: Some("12 Main Street".to_string()),
            date_hired: Some("2024-03-01".to_string()),
            image: None,
            status: true,
            country_id: Some(geo.0),
            state_id: Some(geo.1),
            city_id: Some(geo.2),
            departments: Some(departments),
        }
    }

    // ============================================================================
    // Employee CRUD Tests
    // ============================================================================

    #[tokio::test]
    async fn test_create_employee() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let dept = seed_department(db, "Engineering").await;

        let employee = create_employee(db, employee_input("Alice", "Zephyr", geo, vec![dept]))
            .await
            .expect("Failed to create employee");

        assert_eq!(employee.first_name, "Alice");
        assert_eq!(employee.full_name(), "Alice Zephyr");
        assert!(employee.status);

        let memberships = departments_for_employee(db, employee.id)
            .await
            .expect("Failed to load departments");
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].name, "Engineering");
        assert_eq!(memberships[0].order, DEFAULT_ATTACH_ORDER);
    }

    #[tokio::test]
    async fn test_create_employee_missing_first_name_writes_nothing() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let dept = seed_department(db, "Engineering").await;

        let mut input = employee_input("x", "Smith", geo, vec![dept]);
        input.first_name = None;

        let err = create_employee(db, input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // No partial write
        let count = entities::employee::Entity::find()
            .all(db)
            .await
            .expect("Query failed")
            .len();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_create_employee_rejects_overlong_field() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let dept = seed_department(db, "Engineering").await;

        let mut input = employee_input("Alice", "Zephyr", geo, vec![dept]);
        input.address = Some("x".repeat(300));

        let err = create_employee(db, input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_employee_rejects_bad_date() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let dept = seed_department(db, "Engineering").await;

        let mut input = employee_input("Alice", "Zephyr", geo, vec![dept]);
        input.date_hired = Some("01/03/2024".to_string());

        let err = create_employee(db, input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_employee_requires_departments() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;

        let err = create_employee(db, employee_input("Alice", "Zephyr", geo, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_employee_rejects_foreign_state() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let dept = seed_department(db, "Engineering").await;

        // A state under a different country
        let other_country = create_country(db, "Egypt", "EG", "20")
            .await
            .expect("Failed to create country");
        let other_state = create_state(db, "Cairo", other_country.id)
            .await
            .expect("Failed to create state");

        let mut input = employee_input("Alice", "Zephyr", geo, vec![dept]);
        input.state_id = Some(other_state.id);

        let err = create_employee(db, input).await.unwrap_err();
        assert!(matches!(err, AppError::Referential(_)));
    }

    #[tokio::test]
    async fn test_update_employee_fields_and_departments() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let eng = seed_department(db, "Engineering").await;
        let hr = seed_department(db, "HR").await;

        let employee = create_employee(db, employee_input("Alice", "Zephyr", geo, vec![eng]))
            .await
            .expect("Failed to create employee");

        // Bump the surviving pairing's order so we can check it is kept
        update_department_order(db, employee.id, eng, 5)
            .await
            .expect("Failed to update order");

        let mut input = employee_input("Alicia", "Zephyr", geo, vec![eng, hr]);
        input.status = false;
        let updated = update_employee(db, employee.id, input)
            .await
            .expect("Failed to update employee");

        assert_eq!(updated.first_name, "Alicia");
        assert!(!updated.status);

        let memberships = departments_for_employee(db, employee.id)
            .await
            .expect("Failed to load departments");
        assert_eq!(memberships.len(), 2);
        let eng_row = memberships
            .iter()
            .find(|m| m.department_id == eng)
            .expect("engineering missing");
        assert_eq!(eng_row.order, 5);
        let hr_row = memberships
            .iter()
            .find(|m| m.department_id == hr)
            .expect("hr missing");
        assert_eq!(hr_row.order, DEFAULT_ATTACH_ORDER);
    }

    #[tokio::test]
    async fn test_update_employee_without_departments_keeps_associations() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let eng = seed_department(db, "Engineering").await;

        let employee = create_employee(db, employee_input("Alice", "Zephyr", geo, vec![eng]))
            .await
            .expect("Failed to create employee");

        let mut input = employee_input("Alice", "Stone", geo, vec![]);
        input.departments = None;
        update_employee(db, employee.id, input)
            .await
            .expect("Failed to update employee");

        let memberships = departments_for_employee(db, employee.id)
            .await
            .expect("Failed to load departments");
        assert_eq!(memberships.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_employee_removes_pivot_rows() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let eng = seed_department(db, "Engineering").await;
        let hr = seed_department(db, "HR").await;

        let employee = create_employee(db, employee_input("Alice", "Zephyr", geo, vec![eng, hr]))
            .await
            .expect("Failed to create employee");

        delete_employee(db, employee.id)
            .await
            .expect("Failed to delete employee");

        assert!(get_employee(db, employee.id)
            .await
            .expect("Query failed")
            .is_none());
        let pivots = entities::department_employee::Entity::find()
            .all(db)
            .await
            .expect("Query failed");
        assert!(pivots.is_empty());
    }

    // ============================================================================
    // Association Tests
    // ============================================================================

    #[tokio::test]
    async fn test_attach_detach_and_order() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let eng = seed_department(db, "Engineering").await;
        let hr = seed_department(db, "HR").await;

        let employee = create_employee(db, employee_input("Alice", "Zephyr", geo, vec![eng]))
            .await
            .expect("Failed to create employee");

        attach_department(db, employee.id, hr, 3)
            .await
            .expect("Failed to attach");

        let memberships = departments_for_employee(db, employee.id)
            .await
            .expect("Failed to load departments");
        assert_eq!(memberships.len(), 2);

        update_department_order(db, employee.id, hr, 1)
            .await
            .expect("Failed to update order");
        let memberships = departments_for_employee(db, employee.id)
            .await
            .expect("Failed to load departments");
        let hr_row = memberships
            .iter()
            .find(|m| m.department_id == hr)
            .expect("hr missing");
        assert_eq!(hr_row.order, 1);

        detach_department(db, employee.id, hr)
            .await
            .expect("Failed to detach");
        let memberships = departments_for_employee(db, employee.id)
            .await
            .expect("Failed to load departments");
        assert_eq!(memberships.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_attach_rejected() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let eng = seed_department(db, "Engineering").await;

        let employee = create_employee(db, employee_input("Alice", "Zephyr", geo, vec![eng]))
            .await
            .expect("Failed to create employee");

        let err = attach_department(db, employee.id, eng, 2).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_detach_missing_association_not_found() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let geo = seed_geo(db).await;
        let eng = seed_department(db, "Engineering").await;
        let hr = seed_department(db, "HR").await;

        let employee = create_employee(db, employee_input("Alice", "Zephyr", geo, vec![eng]))
            .await
            .expect("Failed to create employee");

        let err = detach_department(db, employee.id, hr).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    // ============================================================================
    // Admin / Permission Tests
    // ============================================================================

    #[tokio::test]
    async fn test_create_admin_and_verify_password() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let admin = create_admin(db, "admin", "admin@example.com", "secret123")
            .await
            .expect("Failed to create admin");

        let verified = verify_admin_password(db, "admin@example.com", "secret123")
            .await
            .expect("Query failed");
        assert_eq!(verified, Some(admin.id));

        let wrong = verify_admin_password(db, "admin@example.com", "nope")
            .await
            .expect("Query failed");
        assert_eq!(wrong, None);
    }

    #[tokio::test]
    async fn test_grant_and_load_permissions() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let admin = create_admin(db, "admin", "admin@example.com", "secret123")
            .await
            .expect("Failed to create admin");

        grant_permission(db, admin.id, "employee-view")
            .await
            .expect("Failed to grant");
        // Granting twice is a no-op
        grant_permission(db, admin.id, "employee-view")
            .await
            .expect("Failed to re-grant");
        grant_permission(db, admin.id, "employee-delete")
            .await
            .expect("Failed to grant");

        let set = load_admin_permissions(db, admin.id)
            .await
            .expect("Failed to load permissions");
        assert!(set.contains("employee-view"));
        assert!(set.contains("employee-delete"));
        assert!(!set.contains("employee-create"));
        assert_eq!(set.guard(), ADMIN_GUARD);

        revoke_permission(db, admin.id, "employee-delete")
            .await
            .expect("Failed to revoke");
        let set = load_admin_permissions(db, admin.id)
            .await
            .expect("Failed to load permissions");
        assert!(!set.contains("employee-delete"));
    }

    #[tokio::test]
    async fn test_ensure_default_admin_is_idempotent() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let seed = crate::settings::Seed::default();
        ensure_default_admin(db, &seed)
            .await
            .expect("Failed to seed admin");
        ensure_default_admin(db, &seed)
            .await
            .expect("Second seed failed");

        let admin = get_admin_by_email(db, &seed.admin_email)
            .await
            .expect("Query failed")
            .expect("Admin missing");
        let set = load_admin_permissions(db, admin.id)
            .await
            .expect("Failed to load permissions");
        assert!(set.contains("employee-view"));
        assert!(set.contains("department-delete"));
    }

    // ============================================================================
    // Session Tests
    // ============================================================================

    #[tokio::test]
    async fn test_session_roundtrip() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let session = create_session(db, "admin", 1)
            .await
            .expect("Failed to create session");

        let loaded = get_session(db, &session.session_id)
            .await
            .expect("Query failed")
            .expect("Session missing");
        assert_eq!(loaded.principal_type, "admin");
        assert_eq!(loaded.principal_id, 1);

        delete_session(db, &session.session_id)
            .await
            .expect("Failed to delete session");
        assert!(get_session(db, &session.session_id)
            .await
            .expect("Query failed")
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_session_not_returned() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let session = create_session(db, "admin", 1)
            .await
            .expect("Failed to create session");

        // Force the session into the past
        use entities::session::{Column, Entity};
        Entity::update_many()
            .col_expr(Column::ExpiresAt, sea_orm::sea_query::Expr::value(0))
            .filter(Column::SessionId.eq(&session.session_id))
            .exec(db)
            .await
            .expect("Failed to expire session");

        assert!(get_session(db, &session.session_id)
            .await
            .expect("Query failed")
            .is_none());
    }

    // ============================================================================
    // Export Run Tests
    // ============================================================================

    #[tokio::test]
    async fn test_export_run_lifecycle() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let run = start_export_run(db, "employee_export_2026-01-01_00-00-00.csv")
            .await
            .expect("Failed to start run");
        assert_eq!(run.status, "pending");

        complete_export_run(db, run.id, 8, 2)
            .await
            .expect("Failed to complete run");

        let loaded = get_export_run(db, run.id)
            .await
            .expect("Query failed")
            .expect("Run missing");
        assert_eq!(loaded.status, "completed");
        assert_eq!(loaded.successful_rows, Some(8));
        assert_eq!(loaded.failed_rows, Some(2));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_export_run_failure_path() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let run = start_export_run(db, "employee_export_2026-01-01_00-00-00.csv")
            .await
            .expect("Failed to start run");

        fail_export_run(db, run.id, 10, "disk full")
            .await
            .expect("Failed to mark failed");

        let loaded = get_export_run(db, run.id)
            .await
            .expect("Query failed")
            .expect("Run missing");
        assert_eq!(loaded.status, "failed");
        assert_eq!(loaded.failed_rows, Some(10));
        assert_eq!(loaded.error_message.as_deref(), Some("disk full"));
    }

    // Keep the migration round-trip honest
    #[tokio::test]
    async fn test_migration_down_up() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        migration::Migrator::down(db, None)
            .await
            .expect("Failed to roll back");
        migration::Migrator::up(db, None)
            .await
            .expect("Failed to re-apply");
    }
}
