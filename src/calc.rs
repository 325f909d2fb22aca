//! Profit, payroll and profitability calculator
//!
//! Pure and deterministic: no I/O, no clock, fixed-point arithmetic only.
//! Operates on an object's estimate sheet plus the category sums of its
//! committed ledger entries.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{ConstructionObject, EntryKind, ExpenseCategory, LedgerEntry};

const FOREMAN_SHARE: Decimal = dec!(0.45);
const CREW_LEAD_SHARE: Decimal = dec!(0.10);
const HUNDRED: Decimal = dec!(100);

/// Estimate-side inputs, lifted from a `ConstructionObject`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateSheet {
    pub prepayment: Decimal,
    pub final_payment: Decimal,
    pub contract_estimate: Decimal,
    pub discount: Decimal,
    pub works_estimate: Decimal,
    pub consumables_estimate: Decimal,
    pub overhead_estimate: Decimal,
    pub transport_estimate: Decimal,
}

impl From<&ConstructionObject> for EstimateSheet {
    fn from(obj: &ConstructionObject) -> Self {
        Self {
            prepayment: obj.prepayment,
            final_payment: obj.final_payment,
            contract_estimate: obj.contract_estimate,
            discount: obj.discount,
            works_estimate: obj.works_estimate,
            consumables_estimate: obj.consumables_estimate,
            overhead_estimate: obj.overhead_estimate,
            transport_estimate: obj.transport_estimate,
        }
    }
}

/// Committed spend grouped by category, plus the advances total.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActualTotals {
    pub consumables: Decimal,
    pub transport: Decimal,
    pub overhead: Decimal,
    pub advances: Decimal,
}

/// Sum committed entries by category. Advances accumulate separately;
/// they draw on the payroll shares, not on the expense deltas.
pub fn actual_totals(entries: &[LedgerEntry]) -> ActualTotals {
    let mut totals = ActualTotals::default();
    for entry in entries {
        match &entry.kind {
            EntryKind::Expense { category } => match category {
                ExpenseCategory::Consumables => totals.consumables += entry.amount,
                ExpenseCategory::Transport => totals.transport += entry.amount,
                ExpenseCategory::Overhead => totals.overhead += entry.amount,
            },
            EntryKind::Advance { .. } => totals.advances += entry.amount,
        }
    }
    totals
}

/// Full calculator output. Deltas are signed: overruns come out negative
/// and are never clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitReport {
    pub total_receipts: Decimal,
    pub contract_margin: Decimal,

    pub foreman_payroll_share: Decimal,
    pub crew_lead_payroll_share: Decimal,
    pub payroll_total: Decimal,
    pub works_profit: Decimal,

    pub consumables_delta: Decimal,
    pub overhead_delta: Decimal,
    pub transport_delta: Decimal,

    pub total_expenses: Decimal,
    pub profit: Decimal,
    /// `None` when there are no receipts: profitability is undefined,
    /// not zero.
    pub profitability_pct: Option<Decimal>,
}

pub fn calculate(estimate: &EstimateSheet, actuals: &ActualTotals) -> ProfitReport {
    let total_receipts = estimate.prepayment + estimate.final_payment;
    let contract_margin = estimate.contract_estimate - estimate.discount;

    let foreman_payroll_share = estimate.works_estimate * FOREMAN_SHARE;
    let crew_lead_payroll_share = estimate.works_estimate * CREW_LEAD_SHARE;
    let payroll_total = foreman_payroll_share + crew_lead_payroll_share;
    let works_profit = estimate.works_estimate - payroll_total;

    let consumables_delta = estimate.consumables_estimate - actuals.consumables;
    let overhead_delta = estimate.overhead_estimate - actuals.overhead;
    let transport_delta = estimate.transport_estimate - actuals.transport;

    let profit = contract_margin
        + estimate.works_estimate * FOREMAN_SHARE
        + consumables_delta
        + overhead_delta
        + transport_delta;

    let total_expenses = estimate.discount
        + payroll_total
        + actuals.consumables
        + actuals.overhead
        + actuals.transport;

    let profitability_pct = if total_receipts > Decimal::ZERO {
        Some(HUNDRED * profit / total_receipts)
    } else {
        None
    };

    ProfitReport {
        total_receipts,
        contract_margin,
        foreman_payroll_share,
        crew_lead_payroll_share,
        payroll_total,
        works_profit,
        consumables_delta,
        overhead_delta,
        transport_delta,
        total_expenses,
        profit,
        profitability_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn sheet() -> EstimateSheet {
        EstimateSheet {
            prepayment: dec!(100000),
            final_payment: dec!(99000),
            contract_estimate: dec!(150000),
            discount: dec!(0),
            works_estimate: dec!(100000),
            consumables_estimate: dec!(20000),
            overhead_estimate: dec!(10000),
            transport_estimate: dec!(5000),
        }
    }

    fn actuals() -> ActualTotals {
        ActualTotals {
            consumables: dec!(15000),
            overhead: dec!(10000),
            transport: dec!(6000),
            advances: dec!(0),
        }
    }

    #[test]
    fn reference_profit_case() {
        // 150000 + 45000 + 5000 + 0 - 1000 = 199000
        let report = calculate(&sheet(), &actuals());
        assert_eq!(report.profit, dec!(199000));
        assert_eq!(report.foreman_payroll_share, dec!(45000));
        assert_eq!(report.crew_lead_payroll_share, dec!(10000));
        assert_eq!(report.works_profit, dec!(45000));
    }

    #[test]
    fn profitability_defined() {
        let report = calculate(&sheet(), &actuals());
        // 199000 / 199000 receipts
        assert_eq!(report.profitability_pct, Some(dec!(100)));
    }

    #[test]
    fn zero_receipts_is_undefined_not_zero() {
        let mut estimate = sheet();
        estimate.prepayment = Decimal::ZERO;
        estimate.final_payment = Decimal::ZERO;
        let report = calculate(&estimate, &actuals());
        assert_eq!(report.profitability_pct, None);
    }

    #[test]
    fn overruns_stay_negative() {
        let mut spent = actuals();
        spent.transport = dec!(50000);
        let report = calculate(&sheet(), &spent);
        assert_eq!(report.transport_delta, dec!(-45000));
        assert!(report.profit < dec!(199000));
    }

    #[test]
    fn totals_group_by_category_and_advances() {
        let object_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let entry = |kind: EntryKind, amount: Decimal| LedgerEntry {
            entry_id: Uuid::new_v4(),
            object_id,
            kind,
            amount,
            date,
            description: String::new(),
            file_ref: None,
            created_by: user_id,
            created_at: Utc::now(),
        };

        let entries = vec![
            entry(
                EntryKind::Expense {
                    category: ExpenseCategory::Consumables,
                },
                dec!(1000),
            ),
            entry(
                EntryKind::Expense {
                    category: ExpenseCategory::Consumables,
                },
                dec!(500.50),
            ),
            entry(
                EntryKind::Expense {
                    category: ExpenseCategory::Transport,
                },
                dec!(200),
            ),
            entry(
                EntryKind::Advance {
                    worker_name: "Иванов".to_string(),
                    work_type: "Кладка".to_string(),
                },
                dec!(15000),
            ),
        ];

        let totals = actual_totals(&entries);
        assert_eq!(totals.consumables, dec!(1500.50));
        assert_eq!(totals.transport, dec!(200));
        assert_eq!(totals.overhead, Decimal::ZERO);
        assert_eq!(totals.advances, dec!(15000));
    }
}
