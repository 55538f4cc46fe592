//! Criterion scorers for invoice/transaction pairs.
//!
//! Each scorer is a pure function returning a similarity in `[0.0, 1.0]`.
//! They are banded rather than continuous: accounting data is noisy in
//! predictable ways (rounded fees, settlement lag, truncated memo lines),
//! and the bands encode how much of each kind of noise still counts as
//! "the same payment". Anything a scorer cannot interpret scores `0.0`
//! instead of failing, so one bad field never takes down a run.

use crate::models::{CriteriaScores, Invoice, LedgerTransaction};
use crate::utils::dates;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;

/// Entity labels that mean "we do not actually know".
const ENTITY_PLACEHOLDERS: &[&str] = &["needs review", "unknown", "n/a", "pending"];

/// Suffixes stripped when comparing entity names across legal variants.
const LEGAL_SUFFIXES: &[&str] = &[
    "llc", "inc", "ltd", "corp", "corporation", "co", "sa", "gmbh", "holding", "holdings",
];

/// Score a pair on all five criteria.
pub fn score_pair(invoice: &Invoice, transaction: &LedgerTransaction) -> CriteriaScores {
    CriteriaScores {
        amount: amount_score(invoice, transaction),
        date: date_score(invoice, transaction),
        vendor: vendor_score(invoice, transaction),
        entity: entity_score(invoice, transaction),
        pattern: pattern_score(invoice, transaction),
    }
}

/// Relative difference between the invoice total and the absolute
/// transaction amount, banded. Transaction sign is ignored because revenue
/// lands as negative amounts in some ledger exports and positive in others.
pub fn amount_score(invoice: &Invoice, transaction: &LedgerTransaction) -> f64 {
    let target = invoice.total_amount;
    if target <= Decimal::ZERO {
        return 0.0;
    }

    let difference = (target - transaction.amount.abs()).abs();
    if difference < Decimal::new(1, 2) {
        return 1.0;
    }

    let relative = match difference.checked_div(target).and_then(|r| r.to_f64()) {
        Some(relative) => relative,
        None => return 0.0,
    };

    if relative <= 0.02 {
        0.95
    } else if relative <= 0.05 {
        0.80
    } else if relative <= 0.10 {
        0.60
    } else if relative <= 0.20 {
        0.30
    } else {
        0.0
    }
}

/// Distance in days between the transaction date and the invoice's target
/// date (due date, falling back to issue date), banded. An unparseable
/// transaction date scores `0.0`.
pub fn date_score(invoice: &Invoice, transaction: &LedgerTransaction) -> f64 {
    let transaction_date = match dates::parse_flexible(&transaction.date) {
        Some(date) => date,
        None => return 0.0,
    };

    let days = (transaction_date - invoice.target_date()).num_days().abs();
    match days {
        0 => 1.0,
        1..=3 => 0.90,
        4..=7 => 0.80,
        8..=15 => 0.70,
        16..=30 => 0.50,
        31..=60 => 0.30,
        _ => 0.10,
    }
}

/// How strongly the transaction description resembles the invoice's vendor
/// name. Containment is decisive; otherwise edit-distance similarity is
/// banded, with token overlap as a last resort capped at `0.6`.
pub fn vendor_score(invoice: &Invoice, transaction: &LedgerTransaction) -> f64 {
    let vendor = invoice.vendor_name.trim().to_lowercase();
    let description = transaction.description.trim().to_lowercase();
    if vendor.is_empty() || description.is_empty() {
        return 0.0;
    }

    if description.contains(&vendor) || vendor.contains(&description) {
        return 1.0;
    }

    let similarity = strsim::normalized_levenshtein(&vendor, &description);
    if similarity >= 0.8 {
        similarity
    } else if similarity >= 0.6 {
        similarity * 0.8
    } else if similarity >= 0.4 {
        similarity * 0.6
    } else {
        token_overlap(&vendor, &description).min(0.6)
    }
}

/// Fraction of vendor-name words that also appear in the description.
fn token_overlap(vendor: &str, description: &str) -> f64 {
    let vendor_words: Vec<&str> = vendor.split_whitespace().collect();
    if vendor_words.is_empty() {
        return 0.0;
    }

    let description_words: HashSet<&str> = description.split_whitespace().collect();
    let shared = vendor_words
        .iter()
        .filter(|word| description_words.contains(*word))
        .count();

    shared as f64 / vendor_words.len() as f64
}

/// Agreement between the invoice's business unit and the transaction's
/// classified entity. Placeholder labels count as absent, and a pair where
/// either side is absent scores a neutral `0.5` rather than a penalty.
pub fn entity_score(invoice: &Invoice, transaction: &LedgerTransaction) -> f64 {
    let unit = normalize_entity(Some(invoice.business_unit.as_str()));
    let entity = normalize_entity(transaction.classified_entity.as_deref());

    match (unit, entity) {
        (Some(unit), Some(entity)) => {
            if unit == entity {
                return 1.0;
            }
            let unit_family = entity_family(&unit);
            let entity_family = entity_family(&entity);
            if !unit_family.is_empty() && unit_family == entity_family {
                0.8
            } else {
                0.2
            }
        }
        _ => 0.5,
    }
}

fn normalize_entity(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim().to_lowercase();
    if value.is_empty() || ENTITY_PLACEHOLDERS.contains(&value.as_str()) {
        return None;
    }
    Some(value)
}

/// Entity name with legal-form suffixes removed, so "Delta LLC" and
/// "Delta Holdings" land in the same family.
fn entity_family(name: &str) -> String {
    name.split_whitespace()
        .filter(|word| !LEGAL_SUFFIXES.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the transaction description references the invoice number,
/// either verbatim or through a shared numeric run of at least four digits.
pub fn pattern_score(invoice: &Invoice, transaction: &LedgerTransaction) -> f64 {
    let number = invoice.invoice_number.trim();
    if number.is_empty() {
        return 0.0;
    }

    if transaction.description.contains(number) {
        return 1.0;
    }

    let description_runs: HashSet<String> =
        numeric_runs(&transaction.description).into_iter().collect();
    let referenced = numeric_runs(number)
        .into_iter()
        .filter(|run| run.len() >= 4)
        .any(|run| description_runs.contains(&run));

    if referenced {
        0.8
    } else {
        0.0
    }
}

/// Maximal runs of consecutive ASCII digits in a string.
fn numeric_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    runs
}
