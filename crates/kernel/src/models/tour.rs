//! Tour model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::FieldError;
use crate::resource::fields::char_len;
use crate::resource::{Expansion, Fields, Resource, patch_value};
use crate::store::Collection;

pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Difficult => "difficult",
        }
    }
}

/// A GeoJSON point with display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "type", default = "point")]
    pub kind: String,
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

fn point() -> String {
    "Point".to_string()
}

impl Location {
    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub duration: u32,
    pub max_group_size: u32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: u32,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub secret_tour: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<Location>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub guides: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Fields read from a create or update body; `None` means not supplied.
#[derive(Debug, Default)]
struct TourInput {
    name: Option<String>,
    duration: Option<u32>,
    max_group_size: Option<u32>,
    difficulty: Option<Difficulty>,
    ratings_average: Option<f64>,
    ratings_quantity: Option<u32>,
    price: Option<f64>,
    price_discount: Option<f64>,
    summary: Option<String>,
    description: Option<String>,
    image_cover: Option<String>,
    images: Option<Vec<String>>,
    start_dates: Option<Vec<DateTime<Utc>>>,
    secret_tour: Option<bool>,
    start_location: Option<Location>,
    locations: Option<Vec<Location>>,
    guides: Option<Vec<Uuid>>,
}

impl TourInput {
    /// Read and check every supplied field. `price` is the price a discount
    /// must stay below when the body does not carry one.
    fn read(fields: &mut Fields<'_>, creating: bool, price: Option<f64>) -> Self {
        let name: Option<String> = fields
            .field::<String>("name", creating, "A tour must have a name")
            .map(|n| n.trim().to_string());
        if let Some(name) = &name {
            let len = char_len(name);
            fields.check(
                "name",
                len <= 45,
                "A tour name must have less or equal then 45 characters",
            );
            fields.check(
                "name",
                len >= 10,
                "A tour name must have more or equal then 10 characters",
            );
            fields.check(
                "name",
                name.chars().all(|c| c.is_alphabetic() || c == ' '),
                "Tour name must only contain characters",
            );
        }

        let duration = fields.field::<u32>("duration", creating, "A tour must have a duration");
        fields.check(
            "duration",
            duration != Some(0),
            "Duration must be at least one day",
        );
        let max_group_size =
            fields.field::<u32>("max_group_size", creating, "A tour must have a group size");
        fields.check(
            "max_group_size",
            max_group_size != Some(0),
            "Group size must be at least one",
        );

        let difficulty = fields.choice::<Difficulty>(
            "difficulty",
            creating,
            "A tour must have a difficulty",
            "Difficulty is either: easy, medium, difficult",
        );

        let ratings_average = fields.optional::<f64>("ratings_average");
        if let Some(avg) = ratings_average {
            fields.check("ratings_average", avg >= 1.0, "Rating must be above 1.0");
            fields.check("ratings_average", avg <= 5.0, "Rating must be below 5.0");
        }
        let ratings_quantity = fields.optional::<u32>("ratings_quantity");

        let new_price = fields.field::<f64>("price", creating, "A tour must have a price");
        fields.check(
            "price",
            new_price.is_none_or(|p| p > 0.0),
            "Price must be positive",
        );
        let price_discount = fields.optional::<f64>("price_discount");
        if let (Some(discount), Some(price)) = (price_discount, new_price.or(price)) {
            fields.check(
                "price_discount",
                discount < price,
                format!("Discount price ({discount}) should be below regular price"),
            );
        }

        let summary = fields
            .field::<String>("summary", creating, "A tour must have a description")
            .map(|s| s.trim().to_string());
        fields.check(
            "summary",
            summary.as_deref().is_none_or(|s| !s.is_empty()),
            "A tour must have a description",
        );
        let description = fields
            .optional::<String>("description")
            .map(|s| s.trim().to_string());
        let image_cover =
            fields.field::<String>("image_cover", creating, "A tour must have a cover image");

        let start_location = fields.optional::<Location>("start_location");
        let locations = fields.optional::<Vec<Location>>("locations");
        for location in start_location.iter().chain(locations.iter().flatten()) {
            let [lng, lat] = location.coordinates;
            fields.check(
                "locations",
                (-180.0..=180.0).contains(&lng) && (-90.0..=90.0).contains(&lat),
                format!("Invalid coordinates: [{lng}, {lat}]"),
            );
        }

        Self {
            name,
            duration,
            max_group_size,
            difficulty,
            ratings_average: ratings_average.map(round_rating),
            ratings_quantity,
            price: new_price,
            price_discount,
            summary,
            description,
            image_cover,
            images: fields.optional("images"),
            start_dates: fields.optional("start_dates"),
            secret_tour: fields.optional("secret_tour"),
            start_location,
            locations,
            guides: fields.optional("guides"),
        }
    }
}

/// Round a rating average to two decimals.
pub fn round_rating(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Lowercase, hyphen-separated URL slug.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

impl Resource for Tour {
    const NAME: &'static str = "tour";
    const PLURAL: &'static str = "tours";
    const COLLECTION: Collection = Collection::Tours;
    const QUERY_FIELDS: &'static [&'static str] = &[
        "name",
        "slug",
        "duration",
        "max_group_size",
        "difficulty",
        "ratings_average",
        "ratings_quantity",
        "price",
        "price_discount",
        "summary",
        "description",
        "image_cover",
        "images",
        "start_dates",
        "start_location",
        "locations",
        "guides",
    ];
    const EXPAND_ONE: &'static [Expansion] = &[
        Expansion::reference("guides", Collection::Users, &["name", "email", "photo", "role"]),
        Expansion::children(
            "reviews",
            Collection::Reviews,
            "tour",
            &["review", "rating", "user", "created_at"],
            &[Expansion::reference("user", Collection::Users, &["name", "photo"])],
        ),
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate_create(input: &Map<String, Value>) -> Result<Self, Vec<FieldError>> {
        let mut fields = Fields::new(input);
        let t = TourInput::read(&mut fields, true, None);
        let (
            Some(name),
            Some(duration),
            Some(max_group_size),
            Some(difficulty),
            Some(price),
            Some(summary),
            Some(image_cover),
        ) = (
            t.name,
            t.duration,
            t.max_group_size,
            t.difficulty,
            t.price,
            t.summary,
            t.image_cover,
        )
        else {
            return Err(fields.into_errors());
        };

        let tour = Tour {
            id: Uuid::now_v7(),
            slug: slugify(&name),
            name,
            duration,
            max_group_size,
            difficulty,
            ratings_average: t.ratings_average.unwrap_or(DEFAULT_RATINGS_AVERAGE),
            ratings_quantity: t.ratings_quantity.unwrap_or(0),
            price,
            price_discount: t.price_discount,
            summary,
            description: t.description,
            image_cover,
            images: t.images.unwrap_or_default(),
            start_dates: t.start_dates.unwrap_or_default(),
            secret_tour: t.secret_tour.unwrap_or(false),
            start_location: t.start_location,
            locations: t.locations.unwrap_or_default(),
            guides: t.guides.unwrap_or_default(),
            created_at: Utc::now(),
        };
        fields.finish(tour)
    }

    fn validate_update(
        input: &Map<String, Value>,
        current: &Self,
    ) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut fields = Fields::new(input);
        let t = TourInput::read(&mut fields, false, Some(current.price));
        if !fields.is_valid() {
            return Err(fields.into_errors());
        }

        let mut patch = Map::new();
        let mut put = |key: &str, value: Value| {
            patch.insert(key.to_string(), value);
        };
        if let Some(name) = &t.name {
            put("slug", Value::String(slugify(name)));
            put("name", Value::String(name.clone()));
        }
        if let Some(v) = t.duration {
            put("duration", v.into());
        }
        if let Some(v) = t.max_group_size {
            put("max_group_size", v.into());
        }
        if let Some(v) = t.difficulty {
            put("difficulty", v.as_str().into());
        }
        if let Some(v) = t.ratings_average {
            put("ratings_average", v.into());
        }
        if let Some(v) = t.ratings_quantity {
            put("ratings_quantity", v.into());
        }
        if let Some(v) = t.price {
            put("price", v.into());
        }
        if let Some(v) = t.price_discount {
            put("price_discount", v.into());
        }
        if let Some(v) = t.summary {
            put("summary", v.into());
        }
        if let Some(v) = t.description {
            put("description", v.into());
        }
        if let Some(v) = t.image_cover {
            put("image_cover", v.into());
        }
        if let Some(v) = &t.images {
            put("images", patch_value(v));
        }
        if let Some(v) = &t.start_dates {
            put("start_dates", patch_value(v));
        }
        if let Some(v) = t.secret_tour {
            put("secret_tour", v.into());
        }
        if let Some(v) = &t.start_location {
            put("start_location", patch_value(v));
        }
        if let Some(v) = &t.locations {
            put("locations", patch_value(v));
        }
        if let Some(v) = &t.guides {
            put("guides", patch_value(v));
        }

        // A lowered price must still exceed a discount kept from before.
        if let (Some(price), None, Some(discount)) =
            (t.price, t.price_discount, current.price_discount)
        {
            fields.check(
                "price_discount",
                discount < price,
                format!("Discount price ({discount}) should be below regular price"),
            );
        }
        fields.finish(patch)
    }

    fn present(doc: &mut Map<String, Value>) {
        if let Some(duration) = doc.get("duration").and_then(Value::as_f64) {
            doc.insert(
                "duration_weeks".to_string(),
                Value::from(duration / 7.0),
            );
        }
    }
}
