//! Qualification scoring and temperature classification.
//!
//! Recomputed after every turn that advances a slot. Weights come from
//! config; the shape is fixed:
//!
//! ```text
//! score = name + bill(scaling) + solution + competitor + engagement
//! ```

use solis_core::config::FunnelConfig;
use solis_core::types::{SolutionChoice, Temperature};
use solis_store::types::Slots;

/// Engagement tier from the conversation's message count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engagement {
    Low,
    Medium,
    High,
}

impl Engagement {
    pub fn from_message_count(count: u32) -> Self {
        match count {
            0..=4 => Engagement::Low,
            5..=14 => Engagement::Medium,
            _ => Engagement::High,
        }
    }

    fn points(&self) -> u32 {
        match self {
            Engagement::Low => 2,
            Engagement::Medium => 5,
            Engagement::High => 10,
        }
    }
}

/// Compute the 0..100 qualification score.
pub fn compute(slots: &Slots, engagement: Engagement, cfg: &FunnelConfig) -> u8 {
    let mut score: u32 = 0;

    if slots.name.is_some() {
        score += cfg.w_name as u32;
    }

    if let Some(bill) = slots.bill_amount {
        score += bill_points(bill, cfg);
    }

    match slots.solution {
        Some(SolutionChoice::OwnPlant) | Some(SolutionChoice::LotRental) => {
            score += cfg.w_solution_preferred as u32;
        }
        Some(s) if s.is_known() => score += cfg.w_solution_known as u32,
        _ => {}
    }

    match slots.has_competitor {
        Some(false) => score += cfg.w_no_competitor as u32,
        Some(true) => {
            // A weak competitor discount makes the lead easier to win over.
            if slots
                .competitor_discount_pct
                .map(|pct| pct < cfg.competitor_pct_threshold)
                .unwrap_or(false)
            {
                score += cfg.w_weak_competitor as u32;
            }
        }
        None => {}
    }

    score += engagement.points();
    score.min(100) as u8
}

/// Bill contribution: a quarter of the weight for crossing the minimum, the
/// rest scaling linearly up to `full_bill_amount`.
fn bill_points(bill: f64, cfg: &FunnelConfig) -> u32 {
    if bill < cfg.min_bill_threshold {
        return 0;
    }
    let max = cfg.w_bill_max as f64;
    let floor = max * 0.25;
    let span = (cfg.full_bill_amount - cfg.min_bill_threshold).max(1.0);
    let frac = ((bill - cfg.min_bill_threshold) / span).clamp(0.0, 1.0);
    (floor + (max - floor) * frac).round() as u32
}

/// Score → temperature, ties broken toward the upper tier at the boundary.
pub fn temperature(score: u8, cfg: &FunnelConfig) -> Temperature {
    Temperature::from_score(score, cfg.hot_score_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FunnelConfig {
        FunnelConfig::default()
    }

    #[test]
    fn empty_slots_score_is_engagement_only() {
        let score = compute(&Slots::default(), Engagement::Low, &cfg());
        assert_eq!(score, 2);
        assert_eq!(temperature(score, &cfg()), Temperature::Cold);
    }

    #[test]
    fn bill_below_minimum_contributes_nothing() {
        let slots = Slots {
            bill_amount: Some(cfg().min_bill_threshold - 50.0),
            ..Default::default()
        };
        assert_eq!(compute(&slots, Engagement::Low, &cfg()), 2);
    }

    #[test]
    fn bill_at_minimum_gets_the_floor() {
        let slots = Slots {
            bill_amount: Some(cfg().min_bill_threshold),
            ..Default::default()
        };
        // floor = 40 * 0.25 = 10, plus engagement 2.
        assert_eq!(compute(&slots, Engagement::Low, &cfg()), 12);
    }

    #[test]
    fn bill_at_full_amount_gets_the_max() {
        let slots = Slots {
            bill_amount: Some(cfg().full_bill_amount),
            ..Default::default()
        };
        assert_eq!(compute(&slots, Engagement::Low, &cfg()), 42);
    }

    #[test]
    fn qualified_lead_scores_above_sixty() {
        // The end-to-end scenario: João, own plant, R$ 850, Origo at 10%.
        let slots = Slots {
            name: Some("João".to_string()),
            solution: Some(SolutionChoice::OwnPlant),
            bill_amount: Some(850.0),
            has_competitor: Some(true),
            competitor_name: Some("Origo".to_string()),
            competitor_discount_pct: Some(10.0),
            ..Default::default()
        };
        let score = compute(&slots, Engagement::Medium, &cfg());
        assert!(score >= 60, "got {score}");
        assert!(matches!(
            temperature(score, &cfg()),
            Temperature::Warm | Temperature::Hot
        ));
    }

    #[test]
    fn no_competitor_beats_strong_competitor() {
        let base = Slots {
            name: Some("Ana".to_string()),
            ..Default::default()
        };
        let none = Slots {
            has_competitor: Some(false),
            ..base.clone()
        };
        let strong = Slots {
            has_competitor: Some(true),
            competitor_discount_pct: Some(25.0),
            ..base
        };
        assert!(
            compute(&none, Engagement::Low, &cfg()) > compute(&strong, Engagement::Low, &cfg())
        );
    }

    #[test]
    fn score_is_clamped_to_one_hundred() {
        let mut custom = cfg();
        custom.w_name = 200;
        let slots = Slots {
            name: Some("X".to_string()),
            ..Default::default()
        };
        assert_eq!(compute(&slots, Engagement::High, &custom), 100);
    }

    #[test]
    fn engagement_tiers() {
        assert_eq!(Engagement::from_message_count(0), Engagement::Low);
        assert_eq!(Engagement::from_message_count(5), Engagement::Medium);
        assert_eq!(Engagement::from_message_count(15), Engagement::High);
    }
}
