//! Tour analytics and geo search.
//!
//! Computed over the default-scoped tour documents rather than pushed into
//! the store, so both backends answer identically.

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{Difficulty, Tour};
use crate::query::{Comparison, Filter, FindQuery};
use crate::resource::{Resource, from_document};
use crate::store::DocumentStore;

const EARTH_RADIUS_MI: f64 = 3963.2;
const EARTH_RADIUS_KM: f64 = 6378.1;
const STATS_MIN_RATING: f64 = 4.5;
const MONTHLY_PLAN_GROUPS: usize = 12;

/// Tours visible to default queries, optionally narrowed further.
pub async fn load_tours(store: &dyn DocumentStore, filters: Vec<Filter>) -> AppResult<Vec<Tour>> {
    let mut scope = Tour::default_scope();
    scope.extend(filters);
    store
        .find(Tour::COLLECTION, &FindQuery::scoped(scope))
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifficultyStats {
    pub difficulty: String,
    pub num_tours: u64,
    pub num_ratings: u64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Statistics of highly rated tours per difficulty, cheapest average first.
pub async fn tour_stats(store: &dyn DocumentStore) -> AppResult<Vec<DifficultyStats>> {
    let tours = load_tours(
        store,
        vec![Filter::new("ratings_average", Comparison::Gte, STATS_MIN_RATING)],
    )
    .await?;
    Ok(stats_by_difficulty(&tours))
}

pub fn stats_by_difficulty(tours: &[Tour]) -> Vec<DifficultyStats> {
    let mut groups: Vec<(Difficulty, Vec<&Tour>)> = Vec::new();
    for tour in tours.iter().filter(|t| t.ratings_average >= STATS_MIN_RATING) {
        match groups.iter_mut().find(|(d, _)| *d == tour.difficulty) {
            Some((_, members)) => members.push(tour),
            None => groups.push((tour.difficulty, vec![tour])),
        }
    }

    let mut stats: Vec<DifficultyStats> = groups
        .into_iter()
        .map(|(difficulty, members)| {
            let n = members.len() as f64;
            let prices = members.iter().map(|t| t.price);
            DifficultyStats {
                difficulty: difficulty.as_str().to_uppercase(),
                num_tours: members.len() as u64,
                num_ratings: members.iter().map(|t| u64::from(t.ratings_quantity)).sum(),
                avg_rating: members.iter().map(|t| t.ratings_average).sum::<f64>() / n,
                avg_price: prices.clone().sum::<f64>() / n,
                min_price: prices.clone().fold(f64::INFINITY, f64::min),
                max_price: prices.fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect();
    stats.sort_by(|a, b| a.avg_price.total_cmp(&b.avg_price));
    stats
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthPlan {
    pub month: u32,
    pub num_tour_starts: u64,
    pub tours: Vec<String>,
}

/// Tour starts in `year` grouped by month, busiest month first.
pub async fn monthly_plan(store: &dyn DocumentStore, year: i32) -> AppResult<Vec<MonthPlan>> {
    let tours = load_tours(store, Vec::new()).await?;
    Ok(plan_for_year(&tours, year))
}

pub fn plan_for_year(tours: &[Tour], year: i32) -> Vec<MonthPlan> {
    let mut months: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for tour in tours {
        for start in tour.start_dates.iter().filter(|d| d.year() == year) {
            months.entry(start.month()).or_default().push(tour.name.clone());
        }
    }
    let mut plan: Vec<MonthPlan> = months
        .into_iter()
        .map(|(month, tours)| MonthPlan {
            month,
            num_tour_starts: tours.len() as u64,
            tours,
        })
        .collect();
    // Stable: equal counts stay in calendar order.
    plan.sort_by(|a, b| b.num_tour_starts.cmp(&a.num_tour_starts));
    plan.truncate(MONTHLY_PLAN_GROUPS);
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    /// `mi` selects miles; anything else is kilometers.
    pub fn parse(raw: &str) -> Self {
        if raw == "mi" {
            DistanceUnit::Miles
        } else {
            DistanceUnit::Kilometers
        }
    }

    fn earth_radius(self) -> f64 {
        match self {
            DistanceUnit::Miles => EARTH_RADIUS_MI,
            DistanceUnit::Kilometers => EARTH_RADIUS_KM,
        }
    }
}

/// A `lat,lng` path segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let invalid = || {
            AppError::BadRequest(
                "Please provide latitude and longitude in the format lat,lng.".into(),
            )
        };
        let (lat, lng) = raw.split_once(',').ok_or_else(invalid)?;
        let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(invalid());
        }
        Ok(Self { lat, lng })
    }

    /// Great-circle distance in radians.
    pub fn angle_to(&self, other: &LatLng) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.lng - self.lng).to_radians();
        let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * h.sqrt().min(1.0).asin()
    }

    pub fn distance_to(&self, other: &LatLng, unit: DistanceUnit) -> f64 {
        self.angle_to(other) * unit.earth_radius()
    }
}

fn start_point(tour: &Tour) -> Option<LatLng> {
    tour.start_location.as_ref().map(|loc| LatLng {
        lat: loc.latitude(),
        lng: loc.longitude(),
    })
}

/// Tours starting within `distance` of `center`.
pub fn within(tours: Vec<Tour>, center: LatLng, distance: f64, unit: DistanceUnit) -> Vec<Tour> {
    let radius = distance / unit.earth_radius();
    tours
        .into_iter()
        .filter(|tour| start_point(tour).is_some_and(|p| center.angle_to(&p) <= radius))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TourDistance {
    pub id: uuid::Uuid,
    pub name: String,
    pub distance: f64,
}

/// Distance from `center` to every tour start, nearest first.
pub fn distances(tours: &[Tour], center: LatLng, unit: DistanceUnit) -> Vec<TourDistance> {
    let mut out: Vec<TourDistance> = tours
        .iter()
        .filter_map(|tour| {
            start_point(tour).map(|p| TourDistance {
                id: tour.id,
                name: tour.name.clone(),
                distance: center.distance_to(&p, unit),
            })
        })
        .collect();
    out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    out
}
