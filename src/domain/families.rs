//! The content families managed by the admin front end.
//!
//! Summary field sets list what list views show; detail views carry the full
//! entity as the backend returns it.

use crate::cache::{FamilyDescriptor, KeyRegistry, SummaryProjection};

/// Path prefix of the administrative REST resources.
pub const ADMIN_PREFIX: &str = "/api/admin";

pub const CAROUSEL: &str = "carousel";
pub const ATTRACTIONS: &str = "attractions";
pub const DESTINATIONS: &str = "destinations";
pub const FACILITIES: &str = "facilities";
pub const GALLERY: &str = "gallery";
pub const NEWS: &str = "news";
pub const HERITAGE: &str = "heritage";
pub const REGULATIONS: &str = "regulations";
pub const CONTACT: &str = "contact";
pub const PRICING: &str = "pricing";
pub const PROFILE: &str = "profile";

pub const ALL: &[&str] = &[
    CAROUSEL,
    ATTRACTIONS,
    DESTINATIONS,
    FACILITIES,
    GALLERY,
    NEWS,
    HERITAGE,
    REGULATIONS,
    CONTACT,
    PRICING,
    PROFILE,
];

const CAROUSEL_SUMMARY: &[&str] = &["id", "title", "image_url", "position", "is_active"];
const ATTRACTION_SUMMARY: &[&str] = &[
    "id",
    "name",
    "slug",
    "category",
    "thumbnail_url",
    "is_featured",
];
const DESTINATION_SUMMARY: &[&str] = &[
    "id",
    "name",
    "slug",
    "region",
    "thumbnail_url",
    "is_featured",
];
const FACILITY_SUMMARY: &[&str] = &["id", "name", "category", "thumbnail_url", "is_featured"];
const GALLERY_SUMMARY: &[&str] = &["id", "title", "category", "image_url", "thumbnail_url"];
const NEWS_SUMMARY: &[&str] = &[
    "id",
    "title",
    "slug",
    "excerpt",
    "published_at",
    "is_featured",
];
const HERITAGE_SUMMARY: &[&str] = &["id", "name", "slug", "era", "thumbnail_url", "is_featured"];
const REGULATION_SUMMARY: &[&str] = &["id", "title", "category", "effective_date"];
const CONTACT_SUMMARY: &[&str] = &["id", "label", "kind", "value"];
const PRICING_SUMMARY: &[&str] = &["id", "name", "price", "currency", "unit"];
const PROFILE_SUMMARY: &[&str] = &["id", "name", "tagline", "logo_url"];

fn family(name: &str, summary: &'static [&'static str]) -> FamilyDescriptor {
    FamilyDescriptor::new(name, SummaryProjection::new(summary))
        .path(format!("{ADMIN_PREFIX}/{name}"))
}

/// Descriptors for every content family.
pub fn catalog() -> Vec<FamilyDescriptor> {
    vec![
        family(CAROUSEL, CAROUSEL_SUMMARY),
        family(ATTRACTIONS, ATTRACTION_SUMMARY)
            .featured()
            .categories()
            .filter_field("category"),
        family(DESTINATIONS, DESTINATION_SUMMARY)
            .featured()
            .filter_field("region"),
        family(FACILITIES, FACILITY_SUMMARY)
            .featured()
            .categories()
            .filter_field("category"),
        family(GALLERY, GALLERY_SUMMARY)
            .categories()
            .filter_field("category"),
        family(NEWS, NEWS_SUMMARY).featured(),
        family(HERITAGE, HERITAGE_SUMMARY)
            .featured()
            .filter_field("era"),
        family(REGULATIONS, REGULATION_SUMMARY)
            .categories()
            .filter_field("category"),
        family(CONTACT, CONTACT_SUMMARY).filter_field("kind"),
        family(PRICING, PRICING_SUMMARY),
        family(PROFILE, PROFILE_SUMMARY),
    ]
}

/// A key registry preloaded with every content family.
pub fn registry() -> KeyRegistry {
    KeyRegistry::with_families(catalog())
}
