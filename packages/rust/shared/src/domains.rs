//! Static registry of domain templates.
//!
//! A template tells the extraction and analysis prompts which fields a page in
//! that domain usually carries, what the analysis should focus on and the tone
//! to use when answering follow-up questions. Unknown keys resolve to
//! [`GENERAL`].

use serde::Serialize;

/// Key of the catch-all template.
pub const GENERAL: &str = "general";

/// Extraction and analysis hints for one kind of website.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DomainTemplate {
    pub key: &'static str,
    pub name: &'static str,
    /// Fields the extraction prompt asks for. Soft expectations only.
    pub fields: &'static [&'static str],
    pub analysis_focus: &'static [&'static str],
    pub qna_style: &'static str,
}

impl DomainTemplate {
    /// Comma-separated field list for prompt construction.
    pub fn field_list(&self) -> String {
        self.fields.join(", ")
    }

    /// Bulleted analysis focus for prompt construction.
    pub fn focus_bullets(&self) -> String {
        self.analysis_focus
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

static TEMPLATES: &[DomainTemplate] = &[
    DomainTemplate {
        key: "ecommerce",
        name: "E-Commerce",
        fields: &[
            "product_name", "price", "discount", "rating", "reviews_count", "availability",
            "description", "features", "images",
        ],
        analysis_focus: &[
            "pricing signals", "feature differentiation", "customer sentiment",
            "availability or shipping info", "value propositions",
        ],
        qna_style: "Answer as a product analyst focused on shopper needs.",
    },
    DomainTemplate {
        key: "news",
        name: "News & Media",
        fields: &[
            "headline", "author", "publish_date", "content", "tags", "category", "image",
            "summary",
        ],
        analysis_focus: &[
            "story angle", "sentiment tone", "source credibility", "timeliness", "topic coverage",
        ],
        qna_style: "Answer as an editorial analyst focusing on article details.",
    },
    DomainTemplate {
        key: "business",
        name: "Business & Finance",
        fields: &[
            "company_name", "revenue", "stock_price", "market_cap", "employees", "location",
            "description", "services",
        ],
        analysis_focus: &[
            "business model", "financial metrics", "market positioning", "growth signals",
            "competitive differentiation",
        ],
        qna_style: "Answer as a strategy consultant summarizing business context.",
    },
    DomainTemplate {
        key: "jobs",
        name: "Job Listings",
        fields: &[
            "job_title", "company", "location", "salary", "job_type", "requirements",
            "description", "posted_date",
        ],
        analysis_focus: &[
            "salary/seniority clues", "skills requirements", "location trends", "employment type",
            "employer highlights",
        ],
        qna_style: "Answer as a career coach referencing job details.",
    },
    DomainTemplate {
        key: "real_estate",
        name: "Real Estate",
        fields: &[
            "property_type", "price", "location", "bedrooms", "bathrooms", "area", "amenities",
            "description",
        ],
        analysis_focus: &[
            "pricing vs location", "property features", "unique amenities", "market positioning",
            "investment highlights",
        ],
        qna_style: "Answer as a property analyst comparing real estate listings.",
    },
    DomainTemplate {
        key: "restaurant",
        name: "Restaurant & Food",
        fields: &[
            "restaurant_name", "cuisine", "rating", "price_range", "location", "menu_items",
            "reviews", "hours",
        ],
        analysis_focus: &[
            "dining experience", "menu highlights", "price positioning", "customer sentiment",
            "unique value props",
        ],
        qna_style: "Answer as a food critic who evaluated the listings.",
    },
    DomainTemplate {
        key: "social_media",
        name: "Social Media",
        fields: &[
            "post_content", "author", "timestamp", "likes", "shares", "comments", "hashtags",
            "mentions", "media_type", "engagement_metrics",
        ],
        analysis_focus: &[
            "engagement patterns", "content themes", "audience sentiment", "viral potential",
            "influencer identification",
        ],
        qna_style: "Answer as a social media analyst focusing on engagement and trends.",
    },
    DomainTemplate {
        key: "education",
        name: "Education & Courses",
        fields: &[
            "course_title", "instructor", "duration", "price", "rating", "enrollment_count",
            "curriculum", "prerequisites", "certification", "description",
        ],
        analysis_focus: &[
            "course value proposition", "pricing competitiveness", "content quality indicators",
            "instructor credibility", "student outcomes",
        ],
        qna_style: "Answer as an education consultant evaluating course offerings.",
    },
    DomainTemplate {
        key: "healthcare",
        name: "Healthcare & Medical",
        fields: &[
            "provider_name", "specialty", "location", "rating", "reviews", "services",
            "insurance_accepted", "availability", "credentials", "contact_info",
        ],
        analysis_focus: &[
            "service quality indicators", "patient satisfaction", "accessibility factors",
            "specialization areas", "trust signals",
        ],
        qna_style: "Answer as a healthcare analyst focusing on provider information and patient experience.",
    },
    DomainTemplate {
        key: "travel",
        name: "Travel & Tourism",
        fields: &[
            "destination", "accommodation", "price", "rating", "amenities", "location",
            "availability", "reviews", "images", "booking_info",
        ],
        analysis_focus: &[
            "value for money", "location advantages", "amenity comparisons", "guest satisfaction",
            "booking convenience",
        ],
        qna_style: "Answer as a travel advisor comparing destinations and accommodations.",
    },
    DomainTemplate {
        key: "technology",
        name: "Technology & Software",
        fields: &[
            "product_name", "version", "price", "features", "specifications", "reviews",
            "compatibility", "support", "license_type", "documentation",
        ],
        analysis_focus: &[
            "feature differentiation", "pricing models", "user satisfaction",
            "technical capabilities", "market positioning",
        ],
        qna_style: "Answer as a technology analyst evaluating software and tech products.",
    },
    DomainTemplate {
        key: "legal",
        name: "Legal Services",
        fields: &[
            "firm_name", "practice_areas", "attorney_names", "location", "experience",
            "case_results", "reviews", "contact_info", "consultation_fee",
        ],
        analysis_focus: &[
            "expertise areas", "client satisfaction", "success indicators",
            "service accessibility", "professional credentials",
        ],
        qna_style: "Answer as a legal services analyst focusing on firm capabilities and client outcomes.",
    },
    DomainTemplate {
        key: "entertainment",
        name: "Entertainment & Media",
        fields: &[
            "title", "genre", "rating", "release_date", "cast", "director", "reviews",
            "streaming_platform", "duration", "synopsis",
        ],
        analysis_focus: &[
            "content quality", "audience reception", "genre trends", "platform availability",
            "critical acclaim",
        ],
        qna_style: "Answer as an entertainment critic analyzing media content and audience response.",
    },
    DomainTemplate {
        key: "sports",
        name: "Sports & Fitness",
        fields: &[
            "event_name", "date", "teams", "scores", "venue", "ticket_price", "player_stats",
            "league", "broadcast_info", "highlights",
        ],
        analysis_focus: &[
            "performance metrics", "event details", "ticketing information", "fan engagement",
            "statistical trends",
        ],
        qna_style: "Answer as a sports analyst focusing on events, statistics, and performance data.",
    },
    DomainTemplate {
        key: "automotive",
        name: "Automotive",
        fields: &[
            "make", "model", "year", "price", "mileage", "condition", "features", "location",
            "seller_info", "specifications", "images",
        ],
        analysis_focus: &[
            "value assessment", "condition indicators", "feature comparisons", "market pricing",
            "seller credibility",
        ],
        qna_style: "Answer as an automotive analyst evaluating vehicles and market value.",
    },
    DomainTemplate {
        key: "fashion",
        name: "Fashion & Clothing",
        fields: &[
            "product_name", "brand", "price", "size", "color", "material", "style", "availability",
            "reviews", "images", "care_instructions",
        ],
        analysis_focus: &[
            "style trends", "price positioning", "quality indicators", "brand reputation",
            "customer satisfaction",
        ],
        qna_style: "Answer as a fashion analyst evaluating products and trends.",
    },
    DomainTemplate {
        key: "books",
        name: "Books & Literature",
        fields: &[
            "title", "author", "isbn", "price", "rating", "reviews", "publication_date", "genre",
            "publisher", "page_count", "description",
        ],
        analysis_focus: &[
            "literary quality", "reader reception", "genre classification", "pricing comparison",
            "author reputation",
        ],
        qna_style: "Answer as a literary analyst evaluating books and reader feedback.",
    },
    DomainTemplate {
        key: "events",
        name: "Events & Conferences",
        fields: &[
            "event_name", "date", "location", "venue", "ticket_price", "speakers", "agenda",
            "attendee_count", "registration_info", "description",
        ],
        analysis_focus: &[
            "event value", "speaker quality", "networking opportunities",
            "pricing competitiveness", "attendee experience",
        ],
        qna_style: "Answer as an events analyst evaluating conferences and gatherings.",
    },
    DomainTemplate {
        key: "general",
        name: "General",
        fields: &["title", "content", "images", "links", "metadata"],
        analysis_focus: &[
            "content structure", "key information", "call-to-action clarity", "trust indicators",
            "unique insights",
        ],
        qna_style: "Answer as a general web analyst summarizing the page.",
    },
];

/// All registered templates, `general` last.
pub fn all() -> &'static [DomainTemplate] {
    TEMPLATES
}

/// Whether `key` names a registered template.
pub fn is_known(key: &str) -> bool {
    TEMPLATES.iter().any(|t| t.key == key)
}

/// Look up a template by key, falling back to `general`.
pub fn lookup(key: &str) -> &'static DomainTemplate {
    let key = key.trim().to_ascii_lowercase();
    TEMPLATES
        .iter()
        .find(|t| t.key == key)
        .unwrap_or_else(general)
}

fn general() -> &'static DomainTemplate {
    // `general` is always the last entry.
    &TEMPLATES[TEMPLATES.len() - 1]
}

/// Resolve a user-supplied domain key, returning `general` for unknown keys.
pub fn resolve_key(key: &str) -> String {
    let template = lookup(key);
    if template.key != key.trim().to_ascii_lowercase() {
        tracing::debug!(requested = key, "unknown domain, using general template");
    }
    template.key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_nineteen_templates() {
        assert_eq!(all().len(), 19);
        assert_eq!(all().last().map(|t| t.key), Some(GENERAL));
    }

    #[test]
    fn keys_are_unique() {
        let mut keys: Vec<&str> = all().iter().map(|t| t.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), all().len());
    }

    #[test]
    fn lookup_known_and_unknown() {
        assert_eq!(lookup("ecommerce").name, "E-Commerce");
        assert_eq!(lookup("Real_Estate").key, "real_estate");
        assert_eq!(lookup("underwater-basket-weaving").key, GENERAL);
        assert_eq!(resolve_key("nope"), "general");
        assert!(is_known("books"));
        assert!(!is_known("nope"));
    }

    #[test]
    fn prompt_helpers() {
        let t = lookup("general");
        assert_eq!(t.field_list(), "title, content, images, links, metadata");
        assert!(t.focus_bullets().starts_with("- content structure"));
    }
}
