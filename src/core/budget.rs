//! Budget business logic - the fixed-table cost calculator and persisted quotes.
//!
//! Prices are USD. Every component cost is rounded to cents before it is summed,
//! so the stored components always add up to `total_cost`.

use crate::{
    core::{project, round2, string_enum},
    entities::{Budget, budget, user},
    errors::{Error, Result},
};
use chrono::{Duration, Utc};
use sea_orm::{ActiveValue::Set, QueryOrder, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::info;

string_enum! {
    pub enum BudgetStatus {
        Draft => "draft",
        Approved => "approved",
        Rejected => "rejected",
        Expired => "expired",
    }
}

string_enum! {
    /// How much hands-on work a build needs.
    pub enum Complexity {
        #[serde(alias = "Baixo", alias = "baixo")]
        Low => "low",
        #[serde(alias = "Médio", alias = "médio", alias = "Medio", alias = "medio")]
        Medium => "medium",
        #[serde(alias = "Alto", alias = "alto")]
        High => "high",
    }
}

impl Complexity {
    /// Base labor hours before size adjustments.
    #[must_use]
    pub const fn base_hours(self) -> f64 {
        match self {
            Self::Low => 2.0,
            Self::Medium => 6.0,
            Self::High => 12.0,
        }
    }
}

/// Printable materials with tabulated prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Material {
    Pla,
    Abs,
    Petg,
    Nylon,
    Resin,
    Metal,
    Aluminium,
    Steel,
    Composite,
}

impl Material {
    /// Parses a material name, accepting common English and Portuguese spellings.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "pla" => Some(Self::Pla),
            "abs" => Some(Self::Abs),
            "petg" => Some(Self::Petg),
            "nylon" => Some(Self::Nylon),
            "resin" | "resina" => Some(Self::Resin),
            "metal" => Some(Self::Metal),
            "aluminium" | "aluminum" | "alumínio" | "aluminio" => Some(Self::Aluminium),
            "steel" | "aço" | "aco" => Some(Self::Steel),
            "composite" => Some(Self::Composite),
            _ => None,
        }
    }

    /// USD per kilogram.
    #[must_use]
    pub const fn price_per_kg(self) -> f64 {
        match self {
            Self::Pla => 25.0,
            Self::Abs => 30.0,
            Self::Petg => 35.0,
            Self::Nylon => 45.0,
            Self::Resin => 120.0,
            Self::Metal => 150.0,
            Self::Aluminium => 80.0,
            Self::Steel => 50.0,
            Self::Composite => DEFAULT_PRICE_PER_KG,
        }
    }

    /// Grams per cubic centimetre.
    #[must_use]
    pub const fn density(self) -> f64 {
        match self {
            Self::Pla => 1.24,
            Self::Abs => 1.05,
            Self::Petg => 1.27,
            Self::Nylon => 1.15,
            Self::Resin => 1.20,
            Self::Metal => 7.80,
            Self::Aluminium => 2.70,
            Self::Steel => 7.85,
            Self::Composite => DEFAULT_DENSITY,
        }
    }

    /// Deposition rate in cubic centimetres per hour.
    #[must_use]
    pub const fn print_speed(self) -> f64 {
        match self {
            Self::Pla => 25.0,
            Self::Petg => 22.0,
            Self::Nylon => 15.0,
            Self::Metal => 10.0,
            Self::Composite => 12.0,
            Self::Abs | Self::Resin | Self::Aluminium | Self::Steel => DEFAULT_PRINT_SPEED,
        }
    }
}

const DEFAULT_PRICE_PER_KG: f64 = 30.0;
const DEFAULT_DENSITY: f64 = 1.0;
const DEFAULT_PRINT_SPEED: f64 = 20.0;
const DEFAULT_MATERIAL: &str = "ABS";
const DEFAULT_COMPONENT_COST: f64 = 10.0;
const BUDGET_VALIDITY_DAYS: i64 = 30;

/// Keyword estimates for unpriced components, most specific keywords first.
const COMPONENT_ESTIMATES: &[(&str, f64)] = &[
    ("sensor_ir", 8.0),
    ("sensor_weight", 12.0),
    ("motor_stepper", 45.0),
    ("sensor", 15.0),
    ("motor", 50.0),
    ("camera", 80.0),
    ("led", 2.0),
    ("resistor", 0.5),
    ("capacitor", 1.0),
    ("connector", 3.0),
];

/// Bounding box in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            width: 50.0,
            height: 20.0,
            depth: 30.0,
        }
    }
}

impl Dimensions {
    #[must_use]
    pub fn volume_cm3(&self) -> f64 {
        self.width * self.height * self.depth / 1000.0
    }
}

/// What is being built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Specifications {
    pub material: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub complexity: Option<Complexity>,
    /// Adds machine time to the quote
    #[serde(default)]
    pub include_printing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceOffer {
    pub price: f64,
    #[serde(default)]
    pub supplier: Option<String>,
}

/// An electronic or mechanical part bought for the build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Component {
    #[serde(default)]
    pub name: String,
    /// Free-form part type, matched by keyword when no price is known
    #[serde(rename = "type", default)]
    pub part_type: String,
    #[serde(default)]
    pub pricing: Vec<PriceOffer>,
    #[serde(default = "one")]
    pub quantity: u32,
}

const fn one() -> u32 {
    1
}

/// One priced hardware line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub total: f64,
    pub estimated: bool,
}

/// Share of the total per cost component, in percent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostShares {
    pub material: f64,
    pub hardware: f64,
    pub labor: f64,
    pub printing: f64,
}

/// Result of a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub material: String,
    pub volume_cm3: f64,
    pub weight_g: f64,
    pub labor_hours: f64,
    pub print_hours: f64,
    pub material_cost: f64,
    pub hardware_cost: f64,
    pub labor_cost: f64,
    pub printing_cost: f64,
    pub total_cost: f64,
    pub markup_percentage: f64,
    pub final_price: f64,
    pub breakdown: CostShares,
    pub items: Vec<LineItem>,
    /// 0.5 to 0.95; lower when defaults or keyword estimates were used
    pub confidence: f64,
}

/// Fixed-rate calculator.
#[derive(Debug, Clone, PartialEq)]
pub struct CostCalculator {
    pub markup_percentage: f64,
    pub labor_rate: f64,
    pub printing_rate: f64,
    /// Multiplier covering supports, purge and failed prints
    pub waste_factor: f64,
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self {
            markup_percentage: 20.0,
            labor_rate: 25.0,
            printing_rate: 25.0,
            waste_factor: 1.3,
        }
    }
}

impl CostCalculator {
    /// Material cost including waste, and the part weight in grams.
    #[must_use]
    pub fn material_cost(&self, material: &str, dimensions: &Dimensions) -> (f64, f64) {
        let parsed = Material::parse(material);
        let price = parsed.map_or(DEFAULT_PRICE_PER_KG, Material::price_per_kg);
        let density = parsed.map_or(DEFAULT_DENSITY, Material::density);
        let weight_g = dimensions.volume_cm3() * density;
        let cost = weight_g / 1000.0 * price * self.waste_factor;
        (round2(cost), round2(weight_g))
    }

    /// Cheapest offer, or a keyword estimate when no offer is listed.
    #[must_use]
    pub fn component_unit_price(component: &Component) -> (f64, bool) {
        let cheapest = component
            .pricing
            .iter()
            .map(|offer| offer.price)
            .fold(None, |min: Option<f64>, p| Some(min.map_or(p, |m| m.min(p))));
        if let Some(price) = cheapest {
            return (price, false);
        }
        let part_type = component.part_type.to_lowercase();
        let estimate = COMPONENT_ESTIMATES
            .iter()
            .find(|(keyword, _)| part_type.contains(keyword))
            .map_or(DEFAULT_COMPONENT_COST, |(_, cost)| *cost);
        (estimate, true)
    }

    /// Sum of all components and the itemised lines.
    #[must_use]
    pub fn hardware_cost(components: &[Component]) -> (f64, Vec<LineItem>) {
        let items: Vec<LineItem> = components
            .iter()
            .map(|component| {
                let (unit_price, estimated) = Self::component_unit_price(component);
                let description = if component.name.is_empty() {
                    component.part_type.clone()
                } else {
                    component.name.clone()
                };
                LineItem {
                    description,
                    quantity: component.quantity,
                    unit_price,
                    total: round2(unit_price * f64::from(component.quantity)),
                    estimated,
                }
            })
            .collect();
        let total = round2(items.iter().map(|item| item.total).sum());
        (total, items)
    }

    /// Labor hours and cost. Parts over 500 cm³ take 20% longer, over 1000 cm³ 50%.
    #[must_use]
    pub fn labor_cost(&self, complexity: Complexity, dimensions: Option<&Dimensions>) -> (f64, f64) {
        let mut hours = complexity.base_hours();
        if let Some(dimensions) = dimensions {
            let volume = dimensions.volume_cm3();
            if volume > 1000.0 {
                hours *= 1.5;
            } else if volume > 500.0 {
                hours *= 1.2;
            }
        }
        (round2(hours * self.labor_rate), hours)
    }

    /// Machine time and its cost.
    #[must_use]
    pub fn printing_cost(&self, material: &str, dimensions: &Dimensions) -> (f64, f64) {
        let speed = Material::parse(material).map_or(DEFAULT_PRINT_SPEED, Material::print_speed);
        let hours = dimensions.volume_cm3() / speed;
        (round2(hours * self.printing_rate), round2(hours))
    }

    /// Prices a build. `markup` overrides the calculator's default markup.
    pub fn calculate(
        &self,
        specs: &Specifications,
        components: &[Component],
        markup: Option<f64>,
    ) -> Result<CostEstimate> {
        if let Some(dimensions) = &specs.dimensions {
            let all_positive = [dimensions.width, dimensions.height, dimensions.depth]
                .iter()
                .all(|v| v.is_finite() && *v > 0.0);
            if !all_positive {
                return Err(Error::validation("Dimensions must be positive numbers"));
            }
        }
        let markup_percentage = markup.unwrap_or(self.markup_percentage);
        if !markup_percentage.is_finite() || !(0.0..=1000.0).contains(&markup_percentage) {
            return Err(Error::validation("Markup must be between 0 and 1000 percent"));
        }
        for component in components {
            if component.pricing.iter().any(|o| !o.price.is_finite() || o.price < 0.0) {
                return Err(Error::validation(format!(
                    "Component {} has an invalid price",
                    component.name
                )));
            }
        }

        let material = specs
            .material
            .clone()
            .unwrap_or_else(|| DEFAULT_MATERIAL.to_string());
        let dimensions = specs.dimensions.unwrap_or_default();
        let complexity = specs.complexity.unwrap_or(Complexity::Medium);

        let (material_cost, weight_g) = self.material_cost(&material, &dimensions);
        let (hardware_cost, items) = Self::hardware_cost(components);
        let (labor_cost, labor_hours) = self.labor_cost(complexity, specs.dimensions.as_ref());
        let (printing_cost, print_hours) = if specs.include_printing {
            self.printing_cost(&material, &dimensions)
        } else {
            (0.0, 0.0)
        };

        let total_cost = round2(material_cost + hardware_cost + labor_cost + printing_cost);
        let final_price = round2(total_cost * (1.0 + markup_percentage / 100.0));
        let share = |part: f64| {
            if total_cost > 0.0 {
                round2(part / total_cost * 100.0)
            } else {
                0.0
            }
        };

        let estimated_lines = items.iter().filter(|item| item.estimated).count();
        let mut confidence = 0.95 - 0.05 * estimated_lines as f64;
        if specs.dimensions.is_none() {
            confidence -= 0.10;
        }

        Ok(CostEstimate {
            material,
            volume_cm3: round2(dimensions.volume_cm3()),
            weight_g,
            labor_hours,
            print_hours,
            material_cost,
            hardware_cost,
            labor_cost,
            printing_cost,
            total_cost,
            markup_percentage,
            final_price,
            breakdown: CostShares {
                material: share(material_cost),
                hardware: share(hardware_cost),
                labor: share(labor_cost),
                printing: share(printing_cost),
            },
            items,
            confidence: round2(confidence.max(0.5)),
        })
    }
}

/// Request to price and persist a budget.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetRequest {
    pub project_id: i64,
    #[serde(default)]
    pub specifications: Specifications,
    #[serde(default)]
    pub components: Vec<Component>,
    pub markup_percentage: Option<f64>,
}

/// Prices the request and stores it as a draft valid for 30 days.
pub async fn generate_budget(
    db: &DatabaseConnection,
    calculator: &CostCalculator,
    author: &user::Model,
    request: BudgetRequest,
) -> Result<budget::Model> {
    let owner_project = project::get_editable_project(db, author, request.project_id).await?;
    let estimate = calculator.calculate(
        &request.specifications,
        &request.components,
        request.markup_percentage,
    )?;

    let now = Utc::now();
    let created = budget::ActiveModel {
        project_id: Set(owner_project.id),
        title: Set(format!("Budget - {}", now.format("%d/%m/%Y"))),
        material_cost: Set(estimate.material_cost),
        hardware_cost: Set(estimate.hardware_cost),
        labor_cost: Set(estimate.labor_cost),
        printing_cost: Set(estimate.printing_cost),
        total_cost: Set(estimate.total_cost),
        markup_percentage: Set(estimate.markup_percentage),
        final_price: Set(estimate.final_price),
        breakdown: Set(serde_json::to_value(&estimate)?),
        status: Set(BudgetStatus::Draft.as_str().to_string()),
        valid_until: Set(now + Duration::days(BUDGET_VALIDITY_DAYS)),
        created_by: Set(Some(author.id)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(
        budget_id = created.id,
        project_id = created.project_id,
        final_price = created.final_price,
        "budget generated"
    );
    Ok(created)
}

async fn find_budget(db: &DatabaseConnection, budget_id: i64) -> Result<budget::Model> {
    Budget::find_by_id(budget_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("budget", budget_id))
}

/// Loads a budget whose project the viewer can see.
pub async fn get_budget(
    db: &DatabaseConnection,
    viewer: &user::Model,
    budget_id: i64,
) -> Result<budget::Model> {
    let model = find_budget(db, budget_id).await?;
    project::get_project(db, viewer, model.project_id).await?;
    Ok(model)
}

/// Budgets of a project, newest first.
pub async fn list_project_budgets(
    db: &DatabaseConnection,
    viewer: &user::Model,
    project_id: i64,
) -> Result<Vec<budget::Model>> {
    project::get_project(db, viewer, project_id).await?;
    Budget::find()
        .filter(budget::Column::ProjectId.eq(project_id))
        .order_by_desc(budget::Column::CreatedAt)
        .order_by_desc(budget::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn decide(
    db: &DatabaseConnection,
    viewer: &user::Model,
    budget_id: i64,
    to: BudgetStatus,
) -> Result<budget::Model> {
    let model = find_budget(db, budget_id).await?;
    project::get_editable_project(db, viewer, model.project_id).await?;

    let current: BudgetStatus = model.status.parse()?;
    if current != BudgetStatus::Draft {
        return Err(Error::InvalidTransition {
            from: current.to_string(),
            to: to.to_string(),
        });
    }
    let now = Utc::now();
    let mut active: budget::ActiveModel = model.clone().into();
    if model.valid_until < now {
        active.status = Set(BudgetStatus::Expired.as_str().to_string());
        active.updated_at = Set(now);
        active.update(db).await?;
        return Err(Error::InvalidTransition {
            from: BudgetStatus::Expired.to_string(),
            to: to.to_string(),
        });
    }

    active.status = Set(to.as_str().to_string());
    active.updated_at = Set(now);
    let updated = active.update(db).await?;
    info!(budget_id, status = %to, "budget decided");
    Ok(updated)
}

/// Approves a draft budget so production can start.
pub async fn approve_budget(
    db: &DatabaseConnection,
    viewer: &user::Model,
    budget_id: i64,
) -> Result<budget::Model> {
    decide(db, viewer, budget_id, BudgetStatus::Approved).await
}

pub async fn reject_budget(
    db: &DatabaseConnection,
    viewer: &user::Model,
    budget_id: i64,
) -> Result<budget::Model> {
    decide(db, viewer, budget_id, BudgetStatus::Rejected).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    fn specs(material: &str, dims: Option<Dimensions>, complexity: Complexity) -> Specifications {
        Specifications {
            material: Some(material.to_string()),
            dimensions: dims,
            complexity: Some(complexity),
            include_printing: false,
        }
    }

    #[test]
    fn test_material_cost_tables() {
        let calc = CostCalculator::default();
        // 30 cm³ of PLA: 37.2 g -> 0.0372 kg * 25 * 1.3
        let (cost, weight) = calc.material_cost("PLA", &Dimensions::default());
        assert_eq!(weight, 37.2);
        assert_eq!(cost, 1.21);

        // Unknown material falls back to 30 USD/kg at 1.0 g/cm³
        let (cost, weight) = calc.material_cost("Unobtainium", &Dimensions::default());
        assert_eq!(weight, 30.0);
        assert_eq!(cost, 1.17);

        assert_eq!(Material::parse("Aço"), Some(Material::Steel));
        assert_eq!(Material::parse("resina"), Some(Material::Resin));
        assert_eq!(Material::parse("Aluminum"), Some(Material::Aluminium));
    }

    #[test]
    fn test_component_pricing() {
        let priced = Component {
            name: "HX711".to_string(),
            part_type: "sensor_weight".to_string(),
            pricing: vec![
                PriceOffer { price: 4.5, supplier: None },
                PriceOffer { price: 3.9, supplier: Some("B".to_string()) },
            ],
            quantity: 2,
        };
        assert_eq!(CostCalculator::component_unit_price(&priced), (3.9, false));

        let estimate = |t: &str| {
            CostCalculator::component_unit_price(&Component {
                part_type: t.to_string(),
                quantity: 1,
                ..Default::default()
            })
        };
        assert_eq!(estimate("sensor_ir"), (8.0, true));
        assert_eq!(estimate("Sensor_Weight load cell"), (12.0, true));
        assert_eq!(estimate("temperature sensor"), (15.0, true));
        assert_eq!(estimate("motor_stepper nema17"), (45.0, true));
        assert_eq!(estimate("dc motor"), (50.0, true));
        assert_eq!(estimate("widget"), (10.0, true));

        let (total, items) = CostCalculator::hardware_cost(&[priced]);
        assert_eq!(total, 7.8);
        assert_eq!(items[0].quantity, 2);
    }

    #[test]
    fn test_labor_scales_with_size() {
        let calc = CostCalculator::default();
        assert_eq!(calc.labor_cost(Complexity::Low, None), (50.0, 2.0));
        assert_eq!(calc.labor_cost(Complexity::High, None), (300.0, 12.0));

        let medium_box = Dimensions { width: 100.0, height: 80.0, depth: 70.0 }; // 560 cm³
        let (cost, hours) = calc.labor_cost(Complexity::Medium, Some(&medium_box));
        assert!((hours - 7.2).abs() < 1e-9);
        assert_eq!(cost, 180.0);

        let big_box = Dimensions { width: 200.0, height: 100.0, depth: 100.0 }; // 2000 cm³
        assert_eq!(calc.labor_cost(Complexity::Medium, Some(&big_box)).0, 225.0);
    }

    #[test]
    fn test_full_calculation() {
        let calc = CostCalculator::default();
        let components = vec![Component {
            name: "Camera".to_string(),
            part_type: "camera".to_string(),
            pricing: vec![],
            quantity: 1,
        }];
        let estimate = calc
            .calculate(
                &specs("PLA", Some(Dimensions::default()), Complexity::Medium),
                &components,
                None,
            )
            .unwrap();
        assert_eq!(estimate.material_cost, 1.21);
        assert_eq!(estimate.hardware_cost, 80.0);
        assert_eq!(estimate.labor_cost, 150.0);
        assert_eq!(estimate.printing_cost, 0.0);
        assert_eq!(estimate.total_cost, 231.21);
        assert_eq!(estimate.markup_percentage, 20.0);
        assert_eq!(estimate.final_price, 277.45);
        assert_eq!(estimate.confidence, 0.9);
        let shares = &estimate.breakdown;
        assert!((shares.material + shares.hardware + shares.labor - 100.0).abs() < 0.05);

        let custom = calc
            .calculate(&Specifications::default(), &[], Some(50.0))
            .unwrap();
        assert_eq!(custom.material, "ABS");
        assert_eq!(custom.markup_percentage, 50.0);
        assert_eq!(custom.final_price, round2(custom.total_cost * 1.5));
        assert_eq!(custom.confidence, 0.85);
    }

    #[test]
    fn test_printing_is_opt_in() {
        let calc = CostCalculator::default();
        let mut s = specs("PLA", Some(Dimensions::default()), Complexity::Low);
        s.include_printing = true;
        let estimate = calc.calculate(&s, &[], None).unwrap();
        // 30 cm³ at 25 cm³/h = 1.2 h at 25 USD/h
        assert_eq!(estimate.print_hours, 1.2);
        assert_eq!(estimate.printing_cost, 30.0);
        assert_eq!(estimate.total_cost, 81.21);
    }

    #[test]
    fn test_complexity_accepts_portuguese_names() {
        let parsed: Specifications =
            serde_json::from_str(r#"{"material": "PLA", "complexity": "Médio"}"#).unwrap();
        assert_eq!(parsed.complexity, Some(Complexity::Medium));
        let parsed: Vec<Complexity> = serde_json::from_str(r#"["Baixo", "Alto", "high"]"#).unwrap();
        assert_eq!(parsed, vec![Complexity::Low, Complexity::High, Complexity::High]);
        assert!(serde_json::from_str::<Complexity>(r#""enorme""#).is_err());
    }

    #[test]
    fn test_calculation_validation() {
        let calc = CostCalculator::default();
        let bad_dims = specs(
            "PLA",
            Some(Dimensions { width: 0.0, height: 1.0, depth: 1.0 }),
            Complexity::Low,
        );
        assert!(calc.calculate(&bad_dims, &[], None).is_err());
        assert!(calc.calculate(&Specifications::default(), &[], Some(-5.0)).is_err());
        let negative = Component {
            pricing: vec![PriceOffer { price: -1.0, supplier: None }],
            ..Default::default()
        };
        assert!(calc.calculate(&Specifications::default(), &[negative], None).is_err());
    }

    #[tokio::test]
    async fn test_generate_and_decide() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "owner").await?;
        let project = create_test_project(&db, &owner, "Enclosure").await?;
        let calc = CostCalculator::default();

        let missing = generate_budget(
            &db,
            &calc,
            &owner,
            BudgetRequest {
                project_id: 9_999,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));

        let first = create_test_budget(&db, &owner, project.id).await?;
        assert_eq!(first.status, "draft");
        assert!(first.title.starts_with("Budget - "));
        assert!(first.valid_until > Utc::now() + Duration::days(29));
        assert_eq!(first.breakdown["material"], serde_json::json!("PLA"));
        let second = create_test_budget(&db, &owner, project.id).await?;

        let listed = list_project_budgets(&db, &owner, project.id).await?;
        assert_eq!(listed.iter().map(|b| b.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let approved = approve_budget(&db, &owner, first.id).await?;
        assert_eq!(approved.status, "approved");
        let again = reject_budget(&db, &owner, first.id).await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));

        let stranger = create_test_user(&db, "stranger").await?;
        let denied = approve_budget(&db, &stranger, second.id).await;
        assert!(matches!(denied, Err(Error::Forbidden { .. })));
        Ok(())
    }
}
