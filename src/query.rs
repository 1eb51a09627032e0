//! Employee listing queries: tabs, filters, search, sorting and
//! pagination over a single joined select.
//!
//! Derived columns are computed in SQL so they can be sorted on:
//! `departments_count` is a correlated subquery over the pivot table
//! and the full name is concatenated from the two name columns.

use sea_orm::sea_query::{Expr, Func, Query, SimpleExpr, SubQueryStatement};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult, JoinType, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Select,
};
use serde::{Deserialize, Serialize};

use crate::entities::{city, country, department_employee, employee, state};
use crate::errors::AppError;

pub const DEFAULT_PER_PAGE: u64 = 25;
pub const MAX_PER_PAGE: u64 = 100;

/// Status tabs shown above the table. `All` applies no constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    All,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    FullName,
    DateHired,
    Status,
    DepartmentsCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn order(self) -> Order {
        match self {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        }
    }
}

/// Query-string shape for the employee table. Everything is optional;
/// an empty query lists every employee newest-first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmployeeQuery {
    pub country_id: Option<i64>,
    pub status: Option<bool>,
    #[serde(default)]
    pub tab: Tab,
    /// Global search, matched against first and last name.
    pub search: Option<String>,
    /// Per-column search on the address.
    pub address: Option<String>,
    /// Per-column search on the country name.
    pub country: Option<String>,
    pub sort: Option<SortColumn>,
    pub direction: Option<SortDirection>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, FromQueryResult, Serialize)]
pub struct EmployeeRow {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub date_hired: String,
    pub image: Option<String>,
    pub status: i64,
    pub country_id: i64,
    pub state_id: i64,
    pub city_id: i64,
    pub country_name: Option<String>,
    pub state_name: Option<String>,
    pub city_name: Option<String>,
    pub departments_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EmployeeRow {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_active(&self) -> bool {
        self.status != 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeePage {
    pub rows: Vec<EmployeeRow>,
    pub page: u64,
    pub per_page: u64,
    pub total_items: u64,
    pub total_pages: u64,
}

/// Badge label shown for the employee status.
pub fn status_label(active: bool) -> &'static str {
    if active {
        "Active"
    } else {
        "InActive"
    }
}

/// Badge color paired with `status_label`.
pub fn status_color(active: bool) -> &'static str {
    if active {
        "success"
    } else {
        "danger"
    }
}

/// Correlated count of pivot rows for the current employee.
fn departments_count_expr() -> SimpleExpr {
    let sub = Query::select()
        .expr(Expr::cust("COUNT(*)"))
        .from(department_employee::Entity)
        .and_where(
            Expr::col((
                department_employee::Entity,
                department_employee::Column::EmployeeId,
            ))
            .equals((employee::Entity, employee::Column::Id)),
        )
        .to_owned();

    SimpleExpr::SubQuery(None, Box::new(SubQueryStatement::SelectStatement(sub)))
}

fn contains_lowered(column: SimpleExpr, term: &str) -> SimpleExpr {
    let pattern = format!("%{}%", term.to_lowercase());
    Expr::expr(Func::lower(column)).like(pattern)
}

fn build_select(query: &EmployeeQuery) -> Select<employee::Entity> {
    let mut select = employee::Entity::find()
        .column_as(country::Column::Name, "country_name")
        .column_as(state::Column::Name, "state_name")
        .column_as(city::Column::Name, "city_name")
        .expr_as(departments_count_expr(), "departments_count")
        .join(JoinType::LeftJoin, employee::Relation::Country.def())
        .join(JoinType::LeftJoin, employee::Relation::State.def())
        .join(JoinType::LeftJoin, employee::Relation::City.def());

    // Tab first, then filters; both constrain the same status column so
    // a disagreeing pair yields an empty page rather than a winner.
    match query.tab {
        Tab::All => {}
        Tab::Active => select = select.filter(employee::Column::Status.eq(1)),
        Tab::Inactive => select = select.filter(employee::Column::Status.eq(0)),
    }

    if let Some(active) = query.status {
        select = select.filter(employee::Column::Status.eq(if active { 1 } else { 0 }));
    }
    if let Some(country_id) = query.country_id {
        select = select.filter(employee::Column::CountryId.eq(country_id));
    }

    if let Some(term) = query.search.as_deref().filter(|t| !t.trim().is_empty()) {
        let term = term.trim();
        select = select.filter(
            Condition::any()
                .add(contains_lowered(
                    Expr::col((employee::Entity, employee::Column::FirstName)).into(),
                    term,
                ))
                .add(contains_lowered(
                    Expr::col((employee::Entity, employee::Column::LastName)).into(),
                    term,
                )),
        );
    }

    if let Some(term) = query.address.as_deref().filter(|t| !t.trim().is_empty()) {
        select = select.filter(contains_lowered(
            Expr::col((employee::Entity, employee::Column::Address)).into(),
            term.trim(),
        ));
    }
    if let Some(term) = query.country.as_deref().filter(|t| !t.trim().is_empty()) {
        select = select.filter(contains_lowered(
            Expr::col((country::Entity, country::Column::Name)).into(),
            term.trim(),
        ));
    }

    let order = query
        .direction
        .map(SortDirection::order)
        .unwrap_or(match query.sort {
            // Explicit sorts default ascending; the fallback listing is
            // newest-first.
            Some(_) => Order::Asc,
            None => Order::Desc,
        });

    select = match query.sort {
        Some(SortColumn::FullName) => {
            select.order_by(Expr::cust("first_name || ' ' || last_name"), order)
        }
        Some(SortColumn::DateHired) => select.order_by(employee::Column::DateHired, order),
        Some(SortColumn::Status) => select.order_by(employee::Column::Status, order),
        Some(SortColumn::DepartmentsCount) => {
            select.order_by(Expr::cust("departments_count"), order)
        }
        Some(SortColumn::CreatedAt) => select.order_by(employee::Column::CreatedAt, order),
        Some(SortColumn::UpdatedAt) => select.order_by(employee::Column::UpdatedAt, order),
        None => select.order_by(employee::Column::CreatedAt, order),
    };

    // Stable tiebreak so pagination never shuffles equal keys
    select.order_by(employee::Column::Id, Order::Asc)
}

pub async fn list_employees(
    db: &DatabaseConnection,
    query: &EmployeeQuery,
) -> Result<EmployeePage, AppError> {
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    let page = query.page.unwrap_or(1).max(1);

    let paginator = build_select(query)
        .into_model::<EmployeeRow>()
        .paginate(db, per_page);

    let totals = paginator.num_items_and_pages().await?;
    let rows = paginator.fetch_page(page - 1).await?;

    Ok(EmployeePage {
        rows,
        page,
        per_page,
        total_items: totals.number_of_items,
        total_pages: totals.number_of_pages,
    })
}
