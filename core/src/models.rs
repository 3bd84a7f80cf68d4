use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub const ALL: [MealType; 4] = [
        MealType::Breakfast,
        MealType::Lunch,
        MealType::Dinner,
        MealType::Snack,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }

    /// Lenient parse for values coming off the wire: anything unknown is a snack.
    #[must_use]
    pub fn from_remote(value: &str) -> Self {
        value.parse().unwrap_or(MealType::Snack)
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            _ => bail!(
                "Invalid meal type '{s}'. Must be one of: {}",
                MEAL_TYPES.join(", ")
            ),
        }
    }
}

/// Energy in kcal for the given macro grams (4/4/9).
#[must_use]
pub fn calories_from_macros(carbs: f64, protein: f64, fat: f64) -> f64 {
    4.0 * carbs + 4.0 * protein + 9.0 * fat
}

/// Per-principal macro targets. There is at most one of these per principal on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSet {
    pub user_id: String,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub updated_at: DateTime<Utc>,
}

impl GoalSet {
    #[must_use]
    pub fn new(user_id: &str, carbs: f64, protein: f64, fat: f64) -> Self {
        Self {
            user_id: user_id.to_string(),
            carbs,
            protein,
            fat,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn calories(&self) -> f64 {
        calories_from_macros(self.carbs, self.protein, self.fat)
    }
}

/// A single food-log record. `id` is assigned on the device and never changes; it is
/// the key the entry is mirrored under remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub date: NaiveDate,
    pub meal_type: MealType,
    pub food_name: String,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// The calorie override when present, otherwise derived from the macros.
    #[must_use]
    pub fn effective_calories(&self) -> f64 {
        self.calories
            .unwrap_or_else(|| calories_from_macros(self.carbs, self.protein, self.fat))
    }
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub date: NaiveDate,
    pub meal_type: MealType,
    pub food_name: String,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub calories: Option<f64>,
    pub barcode: Option<String>,
}

impl NewLogEntry {
    pub fn validate(&self) -> Result<()> {
        validate_food_name(&self.food_name)?;
        validate_macros(self.carbs, self.protein, self.fat)?;
        validate_calories(self.calories)
    }

    /// Stamp a fresh identifier and creation time on the entry for `user_id`.
    #[must_use]
    pub fn into_entry(self, user_id: &str) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            date: self.date,
            meal_type: self.meal_type,
            food_name: self.food_name.trim().to_string(),
            carbs: self.carbs,
            protein: self.protein,
            fat: self.fat,
            calories: self.calories,
            barcode: self.barcode.filter(|b| !b.trim().is_empty()),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateLogEntry {
    pub food_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub meal_type: Option<MealType>,
    pub carbs: Option<f64>,
    pub protein: Option<f64>,
    pub fat: Option<f64>,
    pub calories: Option<Option<f64>>,
}

impl UpdateLogEntry {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.food_name.is_none()
            && self.date.is_none()
            && self.meal_type.is_none()
            && self.carbs.is_none()
            && self.protein.is_none()
            && self.fat.is_none()
            && self.calories.is_none()
    }

    /// Apply the set fields to `entry`, validating the result.
    pub fn apply(&self, entry: &mut LogEntry) -> Result<()> {
        if let Some(ref name) = self.food_name {
            validate_food_name(name)?;
            entry.food_name = name.trim().to_string();
        }
        if let Some(date) = self.date {
            entry.date = date;
        }
        if let Some(meal_type) = self.meal_type {
            entry.meal_type = meal_type;
        }
        if let Some(carbs) = self.carbs {
            entry.carbs = carbs;
        }
        if let Some(protein) = self.protein {
            entry.protein = protein;
        }
        if let Some(fat) = self.fat {
            entry.fat = fat;
        }
        if let Some(calories) = self.calories {
            entry.calories = calories;
        }
        validate_macros(entry.carbs, entry.protein, entry.fat)?;
        validate_calories(entry.calories)
    }
}

// --- Lookup cache ---

/// Nutrition facts per 100 g as returned by a lookup provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodFacts {
    pub barcode: String,
    pub name: String,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<String>,
}

/// A previously resolved product, keyed by barcode. Never synchronized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedFood {
    pub barcode: String,
    pub food_name: String,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub calories: Option<f64>,
    pub cached_at: DateTime<Utc>,
}

impl CachedFood {
    /// Macros for `grams` of this food, scaled from the per-100 g facts.
    #[must_use]
    pub fn portion(&self, grams: f64) -> Portion {
        let factor = grams / 100.0;
        Portion {
            carbs: self.carbs * factor,
            protein: self.protein * factor,
            fat: self.fat * factor,
            calories: self.calories.map(|c| c * factor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Portion {
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub calories: Option<f64>,
}

// --- Serving units ---

#[derive(Debug, Clone, PartialEq)]
pub enum ServingUnit {
    Grams,
    Ounces,
    Cups,
    /// A counted unit ("cookie") with the weight of a single item.
    Custom { label: String, grams_per_unit: f64 },
}

impl ServingUnit {
    #[must_use]
    pub fn standard(unit: &str) -> Option<Self> {
        match unit.trim().to_lowercase().as_str() {
            "g" | "gram" | "grams" => Some(ServingUnit::Grams),
            "oz" | "ounce" | "ounces" => Some(ServingUnit::Ounces),
            "cup" | "cups" => Some(ServingUnit::Cups),
            _ => None,
        }
    }

    #[must_use]
    pub fn grams_per_unit(&self) -> f64 {
        match self {
            ServingUnit::Grams => 1.0,
            ServingUnit::Ounces => 28.3495,
            ServingUnit::Cups => 240.0,
            ServingUnit::Custom { grams_per_unit, .. } => *grams_per_unit,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            ServingUnit::Grams => "g",
            ServingUnit::Ounces => "oz",
            ServingUnit::Cups => "cups",
            ServingUnit::Custom { label, .. } => label,
        }
    }

    #[must_use]
    pub fn to_grams(&self, value: f64) -> f64 {
        value * self.grams_per_unit()
    }
}

/// Parse an amount such as "150", "150g", "2 cups" or "1.5oz".
///
/// A bare number is grams. Units other than the standard ones need `custom_grams`
/// (the weight of one item) and become [`ServingUnit::Custom`].
pub fn parse_amount(s: &str, custom_grams: Option<f64>) -> Result<(f64, ServingUnit)> {
    let s = s.trim();
    let split = s
        .find(|c: char| c.is_alphabetic())
        .unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(split);
    let qty: f64 = num_part
        .trim()
        .parse()
        .with_context(|| format!("Invalid amount '{s}'. Use e.g. '150g', '2 cups', '1.5oz'"))?;
    if !qty.is_finite() || qty <= 0.0 {
        bail!("Amount must be greater than 0");
    }
    let unit_part = unit_part.trim();
    if unit_part.is_empty() {
        return Ok((qty, ServingUnit::Grams));
    }
    if let Some(unit) = ServingUnit::standard(unit_part) {
        return Ok((qty, unit));
    }
    match custom_grams {
        Some(g) if g.is_finite() && g > 0.0 => Ok((
            qty,
            ServingUnit::Custom {
                label: unit_part.to_string(),
                grams_per_unit: g,
            },
        )),
        Some(_) => bail!("Grams per unit must be greater than 0"),
        None => bail!(
            "Unknown unit '{unit_part}'. Supported: g, oz, cups (or pass the weight of one '{unit_part}')"
        ),
    }
}

// --- Daily summary ---

#[derive(Debug, Clone, Serialize)]
pub struct MealGroup {
    pub meal_type: MealType,
    pub entries: Vec<LogEntry>,
    pub subtotal_calories: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub meals: Vec<MealGroup>,
    pub total_calories: f64,
    pub total_carbs: f64,
    pub total_protein: f64,
    pub total_fat: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goals: Option<GoalSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories_remaining: Option<f64>,
}

impl DailySummary {
    #[must_use]
    pub fn build(date: NaiveDate, entries: Vec<LogEntry>, goals: Option<GoalSet>) -> Self {
        let mut meals = Vec::new();
        for meal_type in MealType::ALL {
            let group: Vec<LogEntry> = entries
                .iter()
                .filter(|e| e.meal_type == meal_type)
                .cloned()
                .collect();
            if group.is_empty() {
                continue;
            }
            let subtotal_calories = group.iter().map(LogEntry::effective_calories).sum();
            meals.push(MealGroup {
                meal_type,
                entries: group,
                subtotal_calories,
            });
        }

        let total_calories: f64 = entries.iter().map(LogEntry::effective_calories).sum();
        let total_carbs = entries.iter().map(|e| e.carbs).sum();
        let total_protein = entries.iter().map(|e| e.protein).sum();
        let total_fat = entries.iter().map(|e| e.fat).sum();
        let calories_remaining = goals.as_ref().map(|g| g.calories() - total_calories);

        Self {
            date,
            meals,
            total_calories,
            total_carbs,
            total_protein,
            total_fat,
            goals,
            calories_remaining,
        }
    }
}

// --- Time helpers ---

/// The instant of local midnight starting `date`, used as the wire form of an entry's day.
#[must_use]
pub fn local_midnight(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map_or_else(|| Utc.from_utc_datetime(&naive), |dt| dt.with_timezone(&Utc))
}

/// The local calendar day containing `ts`.
#[must_use]
pub fn local_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

// --- Validation ---

pub fn validate_macros(carbs: f64, protein: f64, fat: f64) -> Result<()> {
    for (name, value) in [("carbs", carbs), ("protein", protein), ("fat", fat)] {
        if !value.is_finite() {
            bail!("{name} must be a number");
        }
        if value < 0.0 {
            bail!("{name} must not be negative");
        }
    }
    Ok(())
}

pub fn validate_calories(calories: Option<f64>) -> Result<()> {
    if let Some(c) = calories {
        if !c.is_finite() || c < 0.0 {
            bail!("calories must not be negative");
        }
    }
    Ok(())
}

pub fn validate_food_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Food name must not be empty");
    }
    Ok(())
}
