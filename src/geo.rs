//! Country -> State -> City selection cascade.
//!
//! `GeoSelection` models the form-side rules: changing a parent
//! selection atomically resets every dependent selection, so there is
//! no intermediate state where a city disagrees with the current state.
//! `ensure_hierarchy` re-checks parentage at save time for callers that
//! bypass the form flow.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

use crate::entities::{city, state};
use crate::errors::AppError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoSelection {
    pub country_id: Option<i64>,
    pub state_id: Option<i64>,
    pub city_id: Option<i64>,
}

impl GeoSelection {
    pub fn new(country_id: Option<i64>, state_id: Option<i64>, city_id: Option<i64>) -> Self {
        Self {
            country_id,
            state_id,
            city_id,
        }
    }

    /// Selecting (or clearing) a country unsets state and city.
    pub fn select_country(&mut self, country_id: Option<i64>) {
        if self.country_id != country_id {
            self.state_id = None;
            self.city_id = None;
        }
        self.country_id = country_id;
    }

    /// Selecting (or clearing) a state unsets city.
    pub fn select_state(&mut self, state_id: Option<i64>) {
        if self.state_id != state_id {
            self.city_id = None;
        }
        self.state_id = state_id;
    }

    pub fn select_city(&mut self, city_id: Option<i64>) {
        self.city_id = city_id;
    }

    /// A selection is complete once all three levels are set.
    pub fn is_complete(&self) -> bool {
        self.country_id.is_some() && self.state_id.is_some() && self.city_id.is_some()
    }
}

/// Verify that `state_id` is a child of `country_id` and `city_id` a
/// child of `state_id`. The cascade prevents inconsistent selections in
/// the form flow; this is the save-time check for everything else.
pub async fn ensure_hierarchy<C: ConnectionTrait>(
    db: &C,
    country_id: i64,
    state_id: i64,
    city_id: i64,
) -> Result<(), AppError> {
    let state_row = state::Entity::find_by_id(state_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("state {state_id}")))?;

    if state_row.country_id != country_id {
        return Err(AppError::Referential(format!(
            "state {state_id} does not belong to country {country_id}"
        )));
    }

    let city_row = city::Entity::find_by_id(city_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("city {city_id}")))?;

    if city_row.state_id != state_id {
        return Err(AppError::Referential(format!(
            "city {city_id} does not belong to state {state_id}"
        )));
    }

    Ok(())
}

/// States selectable under the given country.
pub async fn state_options<C: ConnectionTrait>(
    db: &C,
    country_id: i64,
) -> Result<Vec<state::Model>, AppError> {
    Ok(state::Entity::find()
        .filter(state::Column::CountryId.eq(country_id))
        .all(db)
        .await?)
}

/// Cities selectable under the given state.
pub async fn city_options<C: ConnectionTrait>(
    db: &C,
    state_id: i64,
) -> Result<Vec<city::Model>, AppError> {
    Ok(city::Entity::find()
        .filter(city::Column::StateId.eq(state_id))
        .all(db)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_change_resets_state_and_city() {
        let mut sel = GeoSelection::default();
        sel.select_country(Some(1));
        sel.select_state(Some(10));
        sel.select_city(Some(100));
        assert!(sel.is_complete());

        // Changing country to a different one unsets both descendants
        sel.select_country(Some(2));
        assert_eq!(sel.country_id, Some(2));
        assert_eq!(sel.state_id, None);
        assert_eq!(sel.city_id, None);
    }

    #[test]
    fn test_state_change_resets_city_only() {
        let mut sel = GeoSelection::new(Some(1), Some(10), Some(100));

        sel.select_state(Some(11));
        assert_eq!(sel.country_id, Some(1));
        assert_eq!(sel.state_id, Some(11));
        assert_eq!(sel.city_id, None);
    }

    #[test]
    fn test_clearing_country_clears_everything() {
        let mut sel = GeoSelection::new(Some(1), Some(10), Some(100));

        sel.select_country(None);
        assert_eq!(sel, GeoSelection::default());
    }

    #[test]
    fn test_clearing_state_clears_city() {
        let mut sel = GeoSelection::new(Some(1), Some(10), Some(100));

        sel.select_state(None);
        assert_eq!(sel.country_id, Some(1));
        assert_eq!(sel.state_id, None);
        assert_eq!(sel.city_id, None);
    }

    #[test]
    fn test_reselecting_same_country_keeps_descendants() {
        let mut sel = GeoSelection::new(Some(1), Some(10), Some(100));

        sel.select_country(Some(1));
        assert_eq!(sel.state_id, Some(10));
        assert_eq!(sel.city_id, Some(100));
    }
}
