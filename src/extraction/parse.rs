//! Deterministic normalization of extracted fields
//!
//! The external service returns loosely-typed fields; everything here is
//! pure string→value parsing so that identical input always yields an
//! identical candidate record. Amounts never default to zero and dates
//! never silently guess beyond the documented resolution rules.

use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{BotError, Result};

/// Unit and hundreds words with their values.
const NUMERAL_WORDS: &[(&str, u64)] = &[
    ("один", 1),
    ("одна", 1),
    ("два", 2),
    ("две", 2),
    ("три", 3),
    ("четыре", 4),
    ("пять", 5),
    ("шесть", 6),
    ("семь", 7),
    ("восемь", 8),
    ("девять", 9),
    ("десять", 10),
    ("одиннадцать", 11),
    ("двенадцать", 12),
    ("тринадцать", 13),
    ("четырнадцать", 14),
    ("пятнадцать", 15),
    ("шестнадцать", 16),
    ("семнадцать", 17),
    ("восемнадцать", 18),
    ("девятнадцать", 19),
    ("двадцать", 20),
    ("тридцать", 30),
    ("сорок", 40),
    ("пятьдесят", 50),
    ("шестьдесят", 60),
    ("семьдесят", 70),
    ("восемьдесят", 80),
    ("девяносто", 90),
    ("сто", 100),
    ("двести", 200),
    ("триста", 300),
    ("четыреста", 400),
    ("пятьсот", 500),
    ("шестьсот", 600),
    ("семьсот", 700),
    ("восемьсот", 800),
    ("девятьсот", 900),
];

const MULTIPLIER_WORDS: &[(&str, u64)] = &[
    ("тысяча", 1_000),
    ("тысячи", 1_000),
    ("тысяч", 1_000),
    ("миллион", 1_000_000),
    ("миллиона", 1_000_000),
    ("миллионов", 1_000_000),
];

const CURRENCY_WORDS: &[&str] = &["₽", "р", "р.", "руб", "руб.", "рубль", "рубля", "рублей"];

fn numeral_value(word: &str) -> Option<u64> {
    NUMERAL_WORDS
        .iter()
        .find(|(w, _)| *w == word)
        .map(|(_, v)| *v)
}

fn multiplier_value(word: &str) -> Option<u64> {
    MULTIPLIER_WORDS
        .iter()
        .find(|(w, _)| *w == word)
        .map(|(_, v)| *v)
}

/// Parse a colloquial amount phrase ("пять тысяч", "3 500,50 руб", "5000р")
/// into a positive fixed-point amount. Returns an error for anything
/// malformed; a guessed or zero amount is never produced.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned = raw.trim().to_lowercase();
    if cleaned.is_empty() {
        return Err(BotError::Extraction("empty amount".to_string()));
    }

    // Fast path: a plain numeric string, possibly with spacing separators,
    // a comma decimal mark and a currency suffix.
    if let Some(amount) = parse_numeric_amount(&cleaned) {
        return ensure_positive(amount, raw);
    }

    // Word path: accumulate unit words, scale on multipliers. All
    // accumulation is checked; an absurd phrase must fail, not wrap.
    let overflow = || BotError::Extraction(format!("amount out of range: {}", raw));
    let mut total: u64 = 0;
    let mut current: u64 = 0;
    let mut matched_any = false;

    for token in cleaned.split_whitespace() {
        let token = token.trim_matches(|c: char| c == ',' || c == '.');
        if token.is_empty() || CURRENCY_WORDS.contains(&token) {
            continue;
        }
        if let Some(v) = numeral_value(token) {
            current = current.checked_add(v).ok_or_else(overflow)?;
            matched_any = true;
        } else if let Ok(v) = token.parse::<u64>() {
            // Mixed form: "5 тысяч"
            current = current.checked_add(v).ok_or_else(overflow)?;
            matched_any = true;
        } else if let Some(m) = multiplier_value(token) {
            let base = if current == 0 { 1 } else { current };
            total = base
                .checked_mul(m)
                .and_then(|scaled| total.checked_add(scaled))
                .ok_or_else(overflow)?;
            current = 0;
            matched_any = true;
        } else {
            return Err(BotError::Extraction(format!(
                "unrecognized amount phrase: {}",
                raw
            )));
        }
    }

    if !matched_any {
        return Err(BotError::Extraction(format!(
            "unrecognized amount phrase: {}",
            raw
        )));
    }

    let grand = total.checked_add(current).ok_or_else(overflow)?;
    ensure_positive(Decimal::from(grand), raw)
}

fn parse_numeric_amount(cleaned: &str) -> Option<Decimal> {
    let mut s = cleaned.to_string();
    for suffix in CURRENCY_WORDS {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped.trim_end().to_string();
            break;
        }
    }
    // Spaces group thousands; a comma is a decimal mark.
    let normalized: String = s
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if !normalized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    Decimal::from_str(&normalized).ok()
}

fn ensure_positive(amount: Decimal, raw: &str) -> Result<Decimal> {
    if amount > Decimal::ZERO {
        Ok(amount.round_dp(2))
    } else {
        Err(BotError::Extraction(format!(
            "amount must be positive: {}",
            raw
        )))
    }
}

/// Resolve a possibly relative or partial date against `today`.
///
/// Accepted: absent/"сегодня" → today, "вчера"/"позавчера", ISO
/// `YYYY-MM-DD`, `DD.MM.YYYY`, and `DD.MM` which defaults to the current
/// year. Anything else fails explicitly rather than defaulting.
pub fn resolve_date(raw: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    let raw = match raw {
        None => return Ok(today),
        Some(s) => s.trim(),
    };

    match raw.to_lowercase().as_str() {
        "" | "сегодня" => return Ok(today),
        "вчера" => {
            return today
                .checked_sub_days(Days::new(1))
                .ok_or_else(|| BotError::Extraction("date out of range".to_string()))
        }
        "позавчера" => {
            return today
                .checked_sub_days(Days::new(2))
                .ok_or_else(|| BotError::Extraction("date out of range".to_string()))
        }
        _ => {}
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d.%m.%Y") {
        return Ok(date);
    }

    // Partial day.month resolves against the current year; an impossible
    // combination (31.02) is an error, not a guess.
    if let Some((day, month)) = raw.split_once('.') {
        if let (Ok(day), Ok(month)) = (day.parse::<u32>(), month.parse::<u32>()) {
            return NaiveDate::from_ymd_opt(today.year(), month, day).ok_or_else(
                || BotError::Extraction(format!("impossible date: {}", raw)),
            );
        }
    }

    Err(BotError::Extraction(format!("unresolvable date: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 30).unwrap()
    }

    #[test]
    fn amount_phrase_five_thousand() {
        assert_eq!(parse_amount("пять тысяч").unwrap(), dec!(5000.00));
    }

    #[test]
    fn amount_compound_phrases() {
        assert_eq!(
            parse_amount("двадцать пять тысяч триста").unwrap(),
            dec!(25300)
        );
        assert_eq!(parse_amount("сто пятьдесят тысяч").unwrap(), dec!(150000));
        assert_eq!(parse_amount("тысяча").unwrap(), dec!(1000));
        assert_eq!(parse_amount("5 тысяч рублей").unwrap(), dec!(5000));
    }

    #[test]
    fn amount_numeric_forms() {
        assert_eq!(parse_amount("5000").unwrap(), dec!(5000));
        assert_eq!(parse_amount("3 500,50 руб").unwrap(), dec!(3500.50));
        assert_eq!(parse_amount("5000р").unwrap(), dec!(5000));
    }

    #[test]
    fn malformed_amount_is_an_error_not_zero() {
        assert!(parse_amount("примерно дофига").is_err());
        assert!(parse_amount("").is_err());
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("-100").is_err());
    }

    #[test]
    fn absurd_amount_is_an_error_not_a_wrap() {
        // u64::MAX scaled by a multiplier, and a sum past u64::MAX.
        assert!(parse_amount("18446744073709551615 тысяч").is_err());
        assert!(parse_amount("18446744073709551615 один").is_err());
        assert!(parse_amount("18446744073709551615 тысяч один миллион").is_err());
    }

    #[test]
    fn amount_parsing_is_deterministic() {
        let a = parse_amount("пять тысяч").unwrap();
        let b = parse_amount("пять тысяч").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn date_defaults_and_relatives() {
        assert_eq!(resolve_date(None, today()).unwrap(), today());
        assert_eq!(resolve_date(Some("сегодня"), today()).unwrap(), today());
        assert_eq!(
            resolve_date(Some("вчера"), today()).unwrap(),
            NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()
        );
    }

    #[test]
    fn date_partial_defaults_to_current_year() {
        assert_eq!(
            resolve_date(Some("25.10"), today()).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 25).unwrap()
        );
    }

    #[test]
    fn date_absolute_formats() {
        assert_eq!(
            resolve_date(Some("2025-10-25"), today()).unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, 25).unwrap()
        );
        assert_eq!(
            resolve_date(Some("01.02.2026"), today()).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
        );
    }

    #[test]
    fn impossible_date_fails_explicitly() {
        assert!(resolve_date(Some("31.02"), today()).is_err());
        assert!(resolve_date(Some("когда-то"), today()).is_err());
    }
}
