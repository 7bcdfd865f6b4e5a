//! Segment predicates and content personalization
//!
//! Segments are a fixed set of named predicates over the customer
//! population; execution resolves each content variant's target segment
//! into a concrete customer list through them. Personalization substitutes
//! the named placeholders a variant body may carry with customer
//! attributes, falling back to a channel-appropriate default when an
//! attribute is missing.

use crate::db::customers::Customer;
use crate::messaging::Channel;
use async_trait::async_trait;
use regex::Regex;

/// Customers with at least this many visits count as loyal
pub const LOYAL_VISIT_THRESHOLD: i64 = 5;

/// Customers with at least this many points count as high-value
pub const HIGH_VALUE_POINTS_THRESHOLD: i64 = 500;

/// Customers who visited within this window count as recent
pub const RECENT_WINDOW_DAYS: i64 = 30;

/// The fixed segment set
pub const KNOWN_SEGMENTS: &[&str] = &[
    "loyal",
    "high_value",
    "recent",
    "sms_subscribers",
    "email_subscribers",
];

pub fn is_known_segment(name: &str) -> bool {
    KNOWN_SEGMENTS.contains(&name)
}

/// Evaluate one segment predicate against a customer.
///
/// `now` is the unix timestamp the recency window is anchored to.
pub fn segment_matches(segment: &str, customer: &Customer, now: i64) -> bool {
    match segment {
        "loyal" => customer.visit_count >= LOYAL_VISIT_THRESHOLD,
        "high_value" => customer.loyalty_points >= HIGH_VALUE_POINTS_THRESHOLD,
        "recent" => customer.last_visit_at >= now - RECENT_WINDOW_DAYS * 24 * 60 * 60,
        "sms_subscribers" => customer.sms_opt_in,
        "email_subscribers" => customer.email_opt_in,
        _ => false,
    }
}

/// Source of customers per tenant and segment.
///
/// The SQLite-backed implementation lives in `db::customers`; tests swap in
/// in-memory fixtures.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// All customers of a tenant
    async fn customers(&self, tenant_id: &str) -> anyhow::Result<Vec<Customer>>;

    /// Customers of a tenant matching a segment predicate
    async fn customers_in(&self, tenant_id: &str, segment: &str) -> anyhow::Result<Vec<Customer>>;
}

/// Substitutes `{name}`, `{first_name}`, `{loyalty_points}`, and
/// `{visit_count}` placeholders in variant bodies.
pub struct Personalizer {
    placeholder: Regex,
}

impl Personalizer {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{(name|first_name|loyalty_points|visit_count)\}")
                .expect("placeholder pattern is valid"),
        }
    }

    /// Render a template for one customer on one channel
    pub fn render(&self, template: &str, customer: &Customer, channel: Channel) -> String {
        self.placeholder
            .replace_all(template, |caps: &regex::Captures| {
                match &caps[1] {
                    "name" => customer
                        .name
                        .clone()
                        .unwrap_or_else(|| default_name(channel).to_string()),
                    "first_name" => customer
                        .name
                        .as_deref()
                        .and_then(|n| n.split_whitespace().next())
                        .map(String::from)
                        .unwrap_or_else(|| default_name(channel).to_string()),
                    "loyalty_points" => customer.loyalty_points.to_string(),
                    "visit_count" => customer.visit_count.to_string(),
                    _ => String::new(),
                }
            })
            .into_owned()
    }
}

impl Default for Personalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel-appropriate stand-in when the customer record has no name
fn default_name(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "Valued Customer",
        Channel::Sms => "there",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(
        name: Option<&str>,
        visits: i64,
        points: i64,
        last_visit_at: i64,
        email_opt_in: bool,
        sms_opt_in: bool,
    ) -> Customer {
        Customer {
            id: "c1".to_string(),
            tenant_id: "t1".to_string(),
            name: name.map(String::from),
            email: Some("c1@example.com".to_string()),
            phone: Some("+15550100".to_string()),
            email_opt_in,
            sms_opt_in,
            loyalty_points: points,
            visit_count: visits,
            last_visit_at,
        }
    }

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_loyal_predicate() {
        assert!(segment_matches("loyal", &customer(None, 5, 0, 0, true, false), NOW));
        assert!(!segment_matches("loyal", &customer(None, 4, 0, 0, true, false), NOW));
    }

    #[test]
    fn test_high_value_predicate() {
        assert!(segment_matches(
            "high_value",
            &customer(None, 0, 500, 0, true, false),
            NOW
        ));
        assert!(!segment_matches(
            "high_value",
            &customer(None, 0, 499, 0, true, false),
            NOW
        ));
    }

    #[test]
    fn test_recent_predicate() {
        let ten_days_ago = NOW - 10 * 24 * 60 * 60;
        let ninety_days_ago = NOW - 90 * 24 * 60 * 60;
        assert!(segment_matches(
            "recent",
            &customer(None, 0, 0, ten_days_ago, true, false),
            NOW
        ));
        assert!(!segment_matches(
            "recent",
            &customer(None, 0, 0, ninety_days_ago, true, false),
            NOW
        ));
    }

    #[test]
    fn test_subscriber_predicates() {
        let c = customer(None, 0, 0, 0, true, false);
        assert!(segment_matches("email_subscribers", &c, NOW));
        assert!(!segment_matches("sms_subscribers", &c, NOW));
    }

    #[test]
    fn test_unknown_segment_matches_nothing() {
        let c = customer(None, 99, 9999, NOW, true, true);
        assert!(!segment_matches("vips", &c, NOW));
        assert!(!is_known_segment("vips"));
        assert!(is_known_segment("high_value"));
    }

    #[test]
    fn test_render_substitutes_attributes() {
        let p = Personalizer::new();
        let c = customer(Some("Dana Kim"), 7, 820, NOW, true, true);

        let out = p.render(
            "Hi {first_name}! You have {loyalty_points} points after {visit_count} visits, {name}.",
            &c,
            Channel::Email,
        );
        assert_eq!(
            out,
            "Hi Dana! You have 820 points after 7 visits, Dana Kim."
        );
    }

    #[test]
    fn test_render_missing_name_uses_channel_default() {
        let p = Personalizer::new();
        let c = customer(None, 2, 10, NOW, true, true);

        let email = p.render("Hello {name}", &c, Channel::Email);
        assert_eq!(email, "Hello Valued Customer");

        let sms = p.render("Hello {first_name}", &c, Channel::Sms);
        assert_eq!(sms, "Hello there");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders_alone() {
        let p = Personalizer::new();
        let c = customer(Some("Dana"), 1, 1, NOW, true, true);
        let out = p.render("Use code {promo_code}, {name}", &c, Channel::Email);
        assert_eq!(out, "Use code {promo_code}, Dana");
    }
}
