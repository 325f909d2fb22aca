//! Flow step tables and per-step validation
//!
//! Each flow is an ordered const table of steps; a step declares what
//! kind of input it expects and the prompt to (re-)emit. Validation
//! failures never advance the step index.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Non-empty free text.
    Text,
    /// Non-negative money amount (estimate fields may legitimately be zero).
    Money,
    /// Calendar year for report selection.
    Year,
    /// Month number 1..=12.
    Month,
    /// Free text or voice routed through the extraction adapter.
    Unstructured,
    /// Button press handled by the confirmation loop / dispatcher.
    Choice,
}

#[derive(Debug, Clone, Copy)]
pub struct StepDef {
    pub name: &'static str,
    pub kind: InputKind,
    pub prompt: &'static str,
}

/// Object creation: 11 ordered fields, then confirmation.
pub const OBJECT_STEPS: [StepDef; 11] = [
    StepDef {
        name: "name",
        kind: InputKind::Text,
        prompt: "Введите название объекта:",
    },
    StepDef {
        name: "address",
        kind: InputKind::Text,
        prompt: "Введите адрес объекта:",
    },
    StepDef {
        name: "foreman_name",
        kind: InputKind::Text,
        prompt: "Введите имя прораба:",
    },
    StepDef {
        name: "prepayment",
        kind: InputKind::Money,
        prompt: "Введите сумму аванса (поступление):",
    },
    StepDef {
        name: "final_payment",
        kind: InputKind::Money,
        prompt: "Введите сумму окончательного расчета:",
    },
    StepDef {
        name: "contract_estimate",
        kind: InputKind::Money,
        prompt: "Введите сумму контракта по смете:",
    },
    StepDef {
        name: "discount",
        kind: InputKind::Money,
        prompt: "Введите скидку по контракту:",
    },
    StepDef {
        name: "works_estimate",
        kind: InputKind::Money,
        prompt: "Введите смету на работы:",
    },
    StepDef {
        name: "consumables_estimate",
        kind: InputKind::Money,
        prompt: "Введите смету на расходники:",
    },
    StepDef {
        name: "overhead_estimate",
        kind: InputKind::Money,
        prompt: "Введите смету на накладные:",
    },
    StepDef {
        name: "transport_estimate",
        kind: InputKind::Money,
        prompt: "Введите смету на транспорт:",
    },
];

/// Expense and advance entry: one unstructured step, then confirmation.
pub const ENTRY_STEPS: [StepDef; 1] = [StepDef {
    name: "entry_input",
    kind: InputKind::Unstructured,
    prompt: "Опишите запись в свободной форме (текстом или голосом). \
             Я определю дату, сумму и описание.",
}];

/// Optional receipt-photo follow-up after an expense commit.
pub const PHOTO_STEP: StepDef = StepDef {
    name: "photo",
    kind: InputKind::Choice,
    prompt: "Прикрепите фото чека или отправьте «пропустить».",
};

/// Report period selection.
pub const REPORT_STEPS: [StepDef; 2] = [
    StepDef {
        name: "year",
        kind: InputKind::Year,
        prompt: "Введите год отчета (например, 2026):",
    },
    StepDef {
        name: "month",
        kind: InputKind::Month,
        prompt: "Введите месяц отчета (1-12):",
    },
];

/// A validated step value held in the accumulated flow data.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Money(Decimal),
    Int(i64),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_money(&self) -> Option<Decimal> {
        match self {
            FieldValue::Money(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Money input for structured steps: digits with optional spacing and a
/// comma or dot decimal mark. Zero is allowed here (discounts and final
/// payments may not exist yet); negatives are not.
pub fn parse_money(input: &str) -> Option<Decimal> {
    let normalized: String = input
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if normalized.is_empty() {
        return None;
    }
    let amount = Decimal::from_str(&normalized).ok()?;
    if amount < Decimal::ZERO {
        return None;
    }
    Some(amount.round_dp(2))
}

/// Validate raw text against a step's expected input kind.
pub fn validate(kind: InputKind, input: &str) -> Result<FieldValue> {
    match kind {
        InputKind::Text => {
            let trimmed = input.trim();
            if trimmed.is_empty() {
                Err(BotError::Validation("Текст не может быть пустым.".to_string()))
            } else {
                Ok(FieldValue::Text(trimmed.to_string()))
            }
        }
        InputKind::Money => parse_money(input)
            .map(FieldValue::Money)
            .ok_or_else(|| {
                BotError::Validation(
                    "Введите сумму числом, например 150000 или 3500,50.".to_string(),
                )
            }),
        InputKind::Year => input
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|y| (2000..=2100).contains(y))
            .map(FieldValue::Int)
            .ok_or_else(|| BotError::Validation("Введите год числом, например 2026.".to_string())),
        InputKind::Month => input
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|m| (1..=12).contains(m))
            .map(FieldValue::Int)
            .ok_or_else(|| BotError::Validation("Введите месяц числом от 1 до 12.".to_string())),
        InputKind::Unstructured | InputKind::Choice => Err(BotError::Validation(
            "Этот шаг обрабатывается отдельно.".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn object_flow_has_eleven_steps() {
        assert_eq!(OBJECT_STEPS.len(), 11);
        assert_eq!(OBJECT_STEPS[0].name, "name");
        assert_eq!(OBJECT_STEPS[0].kind, InputKind::Text);
        assert!(OBJECT_STEPS[3..]
            .iter()
            .all(|s| s.kind == InputKind::Money));
    }

    #[test]
    fn money_accepts_zero_but_not_negative() {
        assert_eq!(parse_money("0"), Some(dec!(0)));
        assert_eq!(parse_money("150 000"), Some(dec!(150000)));
        assert_eq!(parse_money("3500,50"), Some(dec!(3500.50)));
        assert_eq!(parse_money("-5"), None);
        assert_eq!(parse_money("много"), None);
    }

    #[test]
    fn validation_by_kind() {
        assert!(matches!(
            validate(InputKind::Text, "Дом на Лесной"),
            Ok(FieldValue::Text(_))
        ));
        assert!(validate(InputKind::Text, "   ").is_err());
        assert_eq!(
            validate(InputKind::Money, "100000").unwrap(),
            FieldValue::Money(dec!(100000))
        );
        assert!(validate(InputKind::Year, "1990").is_err());
        assert_eq!(
            validate(InputKind::Month, "12").unwrap(),
            FieldValue::Int(12)
        );
        assert!(validate(InputKind::Month, "13").is_err());
    }
}
