//! Text report generation
//!
//! Downstream consumer of the calculator: formats an object's ledger
//! summary into a plain-text message for the conversation channel.

use rust_decimal::Decimal;

use crate::calc::{ActualTotals, ProfitReport};
use crate::models::ConstructionObject;

/// Format a money amount as "1 234 567.89₽".
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let negative = rounded.is_sign_negative();
    let abs = rounded.abs();
    let raw = format!("{:.2}", abs);
    let (int_part, frac_part) = raw.split_once('.').unwrap_or((raw.as_str(), "00"));

    let mut grouped = String::new();
    let digits: Vec<char> = int_part.chars().collect();
    for (i, ch) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(*ch);
    }

    let sign = if negative { "-" } else { "" };
    format!("{}{}.{}₽", sign, grouped, frac_part)
}

pub fn format_percentage(value: Decimal) -> String {
    format!("{:.2}%", value.round_dp(2))
}

/// Render the financial summary for one object.
pub fn object_report(
    object: &ConstructionObject,
    actuals: &ActualTotals,
    report: &ProfitReport,
) -> String {
    let mut out = String::new();

    out.push_str(&format!("Отчет по объекту: {}\n", object.name));
    out.push_str(&format!("Статус: {}\n\n", object.status));

    out.push_str("Поступления\n");
    out.push_str(&format!("  Аванс: {}\n", format_currency(object.prepayment)));
    out.push_str(&format!(
        "  Окончательный расчет: {}\n",
        format_currency(object.final_payment)
    ));
    out.push_str(&format!(
        "  Всего: {}\n\n",
        format_currency(report.total_receipts)
    ));

    out.push_str("Смета / факт\n");
    out.push_str(&format!(
        "  Контракт: {} (скидка {})\n",
        format_currency(object.contract_estimate),
        format_currency(object.discount)
    ));
    out.push_str(&format!(
        "  Расходники: {} / {} (разница {})\n",
        format_currency(object.consumables_estimate),
        format_currency(actuals.consumables),
        format_currency(report.consumables_delta)
    ));
    out.push_str(&format!(
        "  Накладные: {} / {} (разница {})\n",
        format_currency(object.overhead_estimate),
        format_currency(actuals.overhead),
        format_currency(report.overhead_delta)
    ));
    out.push_str(&format!(
        "  Транспорт: {} / {} (разница {})\n\n",
        format_currency(object.transport_estimate),
        format_currency(actuals.transport),
        format_currency(report.transport_delta)
    ));

    out.push_str("ФЗП\n");
    out.push_str(&format!(
        "  Прораб (45%): {}\n",
        format_currency(report.foreman_payroll_share)
    ));
    out.push_str(&format!(
        "  Бригадир (10%): {}\n",
        format_currency(report.crew_lead_payroll_share)
    ));
    out.push_str(&format!(
        "  Выдано авансов: {}\n\n",
        format_currency(actuals.advances)
    ));

    out.push_str(&format!("Прибыль: {}\n", format_currency(report.profit)));
    match report.profitability_pct {
        Some(pct) => out.push_str(&format!("Рентабельность: {}\n", format_percentage(pct))),
        None => out.push_str("Рентабельность: — (нет поступлений)\n"),
    }

    out
}
