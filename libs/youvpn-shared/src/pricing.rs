use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment mechanism selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    /// In-platform Telegram Stars.
    Stars,
    /// Real-currency payments through a payment provider token.
    Provider,
}

impl Rail {
    pub fn currency(&self) -> &'static str {
        match self {
            Rail::Stars => "XTR",
            Rail::Provider => "RUB",
        }
    }

    /// Multiplier from the table price to the amount the gateway reports.
    pub fn minor_units(&self) -> i64 {
        match self {
            Rail::Stars => 1,
            Rail::Provider => 100,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Rail::Stars => "⭐",
            Rail::Provider => "₽",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: &'static str,
    pub title: &'static str,
    pub days: i64,
    pub price: i64,
}

impl Plan {
    pub fn minor_amount(&self, rail: Rail) -> i64 {
        self.price * rail.minor_units()
    }

    pub fn months(&self) -> i64 {
        (self.days / 30).max(1)
    }
}

struct PlanRow {
    id: &'static str,
    title: &'static str,
    days: i64,
    stars: i64,
    rub: i64,
}

// Display order. Provider prices assume roughly 2 RUB per Star.
const PLAN_ROWS: [PlanRow; 4] = [
    PlanRow {
        id: "1_month",
        title: "1 месяц (Премиум)",
        days: 30,
        stars: 250,
        rub: 500,
    },
    PlanRow {
        id: "3_months",
        title: "3 месяца (Премиум)",
        days: 90,
        stars: 600,
        rub: 1200,
    },
    PlanRow {
        id: "6_months",
        title: "6 месяцев (Премиум)",
        days: 180,
        stars: 1000,
        rub: 2000,
    },
    PlanRow {
        id: "12_months",
        title: "12 месяцев (Премиум)",
        days: 365,
        stars: 1750,
        rub: 3500,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("unknown plan: {0}")]
    UnknownPlan(String),
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    rail: Rail,
    plans: Vec<Plan>,
}

impl PricingTable {
    pub fn for_rail(rail: Rail) -> Self {
        let plans = PLAN_ROWS
            .iter()
            .map(|row| Plan {
                id: row.id,
                title: row.title,
                days: row.days,
                price: match rail {
                    Rail::Stars => row.stars,
                    Rail::Provider => row.rub,
                },
            })
            .collect();
        Self { rail, plans }
    }

    pub fn rail(&self) -> Rail {
        self.rail
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Unknown ids are an error; there is no fallback plan.
    pub fn get(&self, plan_id: &str) -> Result<&Plan, PricingError> {
        self.plans
            .iter()
            .find(|p| p.id == plan_id)
            .ok_or_else(|| PricingError::UnknownPlan(plan_id.to_string()))
    }

    /// Amount the gateway must report for `plan_id`, in minor units.
    pub fn expected_amount(&self, plan_id: &str) -> Result<i64, PricingError> {
        Ok(self.get(plan_id)?.minor_amount(self.rail))
    }

    /// Saving against paying the monthly plan every month, rounded to a whole percent.
    pub fn discount_percent(&self, plan_id: &str) -> Result<u32, PricingError> {
        let plan = self.get(plan_id)?;
        let Some(monthly) = self.plans.iter().find(|p| p.months() == 1) else {
            return Ok(0);
        };
        let full = monthly.price * plan.months();
        if full <= 0 || plan.price >= full {
            return Ok(0);
        }
        let saved = full - plan.price;
        Ok(((saved * 100 + full / 2) / full) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_prices_are_double_stars() {
        let stars = PricingTable::for_rail(Rail::Stars);
        let rub = PricingTable::for_rail(Rail::Provider);
        for plan in stars.plans() {
            assert_eq!(rub.get(plan.id).unwrap().price, plan.price * 2);
        }
    }

    #[test]
    fn test_expected_amount_scales_by_rail() {
        let stars = PricingTable::for_rail(Rail::Stars);
        assert_eq!(stars.expected_amount("1_month").unwrap(), 250);

        let rub = PricingTable::for_rail(Rail::Provider);
        assert_eq!(rub.expected_amount("1_month").unwrap(), 50_000);
    }

    #[test]
    fn test_unknown_plan_fails_closed() {
        let table = PricingTable::for_rail(Rail::Stars);
        assert_eq!(
            table.get("2_weeks"),
            Err(PricingError::UnknownPlan("2_weeks".into()))
        );
        assert!(table.expected_amount("").is_err());
    }

    #[test]
    fn test_discounts() {
        let table = PricingTable::for_rail(Rail::Provider);
        assert_eq!(table.discount_percent("1_month").unwrap(), 0);
        assert_eq!(table.discount_percent("3_months").unwrap(), 20);
        assert_eq!(table.discount_percent("6_months").unwrap(), 33);
        assert_eq!(table.discount_percent("12_months").unwrap(), 42);
    }

    #[test]
    fn test_three_months_plan() {
        let table = PricingTable::for_rail(Rail::Stars);
        let plan = table.get("3_months").unwrap();
        assert_eq!(plan.price, 600);
        assert_eq!(plan.days, 90);
        assert_eq!(table.rail().currency(), "XTR");
    }
}
