//! Names and public URLs of optimized images.

use imgopt_core::BatchId;
use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid regex"));

const FALLBACK_SLUG: &str = "img";

/// Readable stem derived from the last path segment of the source URL.
///
/// `https://cdn.example.com/p/Red Shoe.PNG?w=300` becomes `red-shoe-png`.
pub fn slug_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let last_segment = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let slug = NON_ALNUM
        .replace_all(last_segment, "-")
        .trim_matches('-')
        .to_lowercase();
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// `{slug}-{10 random hex chars}`; unique per converted item.
pub fn nice_id(slug: &str) -> String {
    let unique = Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug, &unique[..10])
}

/// Whether `value` could have been produced by [`nice_id`]. Guards the image route.
pub fn is_valid_nice_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 255
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub fn public_image_url(public_base_url: &str, batch_id: BatchId, nice_id: &str) -> String {
    format!(
        "{}/api/i/{}/{}",
        public_base_url.trim_end_matches('/'),
        batch_id,
        nice_id
    )
}
