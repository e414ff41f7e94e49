//! Rule-based spending feedback for expense summaries.

use std::collections::BTreeMap;

/// Recommended share of spending per category, in percent.
fn guideline(category: &str) -> f64 {
    match category {
        "food" => 30.0,
        "transport" => 15.0,
        "entertainment" => 10.0,
        "shopping" => 20.0,
        _ => 25.0,
    }
}

const LARGEST_CATEGORY_WARNING: f64 = 40.0;
const HIGH_TOTAL: f64 = 50_000.0;
const LOW_TOTAL: f64 = 10_000.0;

/// Build the feedback paragraph for a period.
///
/// `percentages` holds each category's share of `total`.
pub fn spending_feedback(
    total: f64,
    by_category: &BTreeMap<String, f64>,
    percentages: &BTreeMap<String, f64>,
    period_days: i64,
) -> String {
    if total <= 0.0 {
        return format!(
            "You haven't spent anything in the last {} days. Your savings must be growing!",
            period_days
        );
    }

    let mut points = Vec::new();

    for (category, &share) in percentages {
        let limit = guideline(category);
        if share > limit + 10.0 {
            points.push(format!(
                "You're spending {:.1}% on {}, which is quite high. Consider reducing {} expenses to stay within a healthy budget.",
                share, category, category
            ));
        } else if share > limit {
            points.push(format!(
                "Your {} spending is {:.1}%, slightly above the recommended {}%. Keep an eye on this category.",
                category, share, limit
            ));
        } else if share < limit / 2.0 {
            points.push(format!(
                "Great job keeping {} expenses low at {:.1}%! You're well under the {}% guideline.",
                category, share, limit
            ));
        }
    }

    let largest = by_category
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
    if let Some((category, _)) = largest {
        let share = percentages.get(category).copied().unwrap_or(0.0);
        if share > LARGEST_CATEGORY_WARNING {
            points.push(format!(
                "{} is your largest expense category at {:.1}%. This might be worth reviewing for potential savings.",
                title_case(category),
                share
            ));
        }
    }

    if total > HIGH_TOTAL {
        points.push(
            "You're spending quite significantly. Consider tracking specific budgets for each category."
                .to_string(),
        );
    } else if total < LOW_TOTAL {
        points.push("Excellent budgeting! Your spending is very controlled and mindful.".to_string());
    }

    if points.is_empty() {
        points.push(
            "Your spending patterns look healthy and balanced across categories. Keep it up!"
                .to_string(),
        );
    }

    format!(
        "In the last {} days, you spent {} across {} categories. {}",
        period_days,
        format_inr(total),
        by_category.len(),
        points.join(" ")
    )
}

/// `₹12,345.60` with thousands separators.
pub fn format_inr(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}₹{}.{}", sign, grouped, fraction)
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
