//! Booking model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::FieldError;
use crate::resource::{Expansion, Fields, Resource};
use crate::store::Collection;

const PARTIES: &[Expansion] = &[
    Expansion::reference("user", Collection::Users, &["name", "email"]),
    Expansion::reference("tour", Collection::Tours, &["name", "price", "ratings_average"]),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub tour: Uuid,
    pub user: Uuid,
    pub price: f64,
    #[serde(default = "paid")]
    pub paid: bool,
    pub created_at: DateTime<Utc>,
}

fn paid() -> bool {
    true
}

impl Booking {
    pub fn new(tour: Uuid, user: Uuid, price: f64) -> Self {
        Self {
            id: Uuid::now_v7(),
            tour,
            user,
            price,
            paid: true,
            created_at: Utc::now(),
        }
    }
}

impl Resource for Booking {
    const NAME: &'static str = "booking";
    const PLURAL: &'static str = "bookings";
    const COLLECTION: Collection = Collection::Bookings;
    const QUERY_FIELDS: &'static [&'static str] = &["tour", "user", "price", "paid"];
    const EXPAND_ONE: &'static [Expansion] = PARTIES;
    const EXPAND_MANY: &'static [Expansion] = PARTIES;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate_create(input: &Map<String, Value>) -> Result<Self, Vec<FieldError>> {
        let mut fields = Fields::new(input);
        let tour = fields.required::<Uuid>("tour", "Booking must belong to a Tour!");
        let user = fields.required::<Uuid>("user", "Booking must belong to a User!");
        let price = fields.required::<f64>("price", "Booking must have a price.");
        fields.check(
            "price",
            price.is_none_or(|p| p >= 0.0),
            "Price must not be negative",
        );
        let paid = fields.optional::<bool>("paid");

        let (Some(tour), Some(user), Some(price)) = (tour, user, price) else {
            return Err(fields.into_errors());
        };
        let mut booking = Booking::new(tour, user, price);
        booking.paid = paid.unwrap_or(true);
        fields.finish(booking)
    }

    fn validate_update(
        input: &Map<String, Value>,
        _current: &Self,
    ) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut fields = Fields::new(input);
        let price = fields.optional::<f64>("price");
        fields.check(
            "price",
            price.is_none_or(|p| p >= 0.0),
            "Price must not be negative",
        );
        let paid = fields.optional::<bool>("paid");

        let mut patch = Map::new();
        if let Some(price) = price {
            patch.insert("price".to_string(), price.into());
        }
        if let Some(paid) = paid {
            patch.insert("paid".to_string(), paid.into());
        }
        fields.finish(patch)
    }
}
