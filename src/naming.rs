use std::sync::OnceLock;

use regex::Regex;

use crate::error::{BranchError, Result};

pub const MAX_SLUG_LEN: usize = 50;
pub const MAX_DATABASE_NAME_LEN: usize = 63;
pub const RESERVED_SLUG: &str = "main";

fn slug_regex() -> &'static Regex {
    static SLUG_RE: OnceLock<Regex> = OnceLock::new();
    SLUG_RE.get_or_init(|| {
        Regex::new("^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("static slug pattern is valid")
    })
}

/// Derives a URL-safe slug from a free-form branch name.
///
/// Lowercases, turns whitespace and underscores into hyphens, drops anything
/// else outside `[a-z0-9-]`, collapses hyphen runs, trims, and truncates to
/// [`MAX_SLUG_LEN`]. Names that normalize to nothing become `"branch"`.
/// Deterministic and idempotent.
pub fn generate_slug(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
        } else if (ch.is_whitespace() || ch == '_' || ch == '-') && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "branch".to_string()
    } else {
        slug.to_string()
    }
}

/// Checks a slug against the branch naming rules.
///
/// Rejects the empty string, the reserved value `main`, slugs longer than
/// [`MAX_SLUG_LEN`], and anything outside `^[a-z0-9]([a-z0-9-]*[a-z0-9])?$`.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() {
        return Err(BranchError::InvalidSlug(slug.to_string()));
    }
    if slug == RESERVED_SLUG {
        return Err(BranchError::ReservedSlug(slug.to_string()));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(BranchError::SlugTooLong(slug.to_string()));
    }
    if !slug_regex().is_match(slug) {
        return Err(BranchError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

/// Derives the physical database name for a branch.
///
/// Concatenates prefix and slug, maps hyphens to underscores, prepends `_`
/// when the first character is a digit, and truncates to Postgres's 63-byte
/// identifier limit.
pub fn generate_database_name(prefix: &str, slug: &str) -> String {
    let mut name = format!("{prefix}{slug}").replace('-', "_");
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    while name.len() > MAX_DATABASE_NAME_LEN {
        name.pop();
    }
    name
}

pub fn generate_pr_slug(pr_number: u64) -> String {
    format!("pr-{pr_number}")
}

/// Quotes a string for use as a SQL identifier, doubling embedded quotes.
///
/// `CREATE DATABASE` and `DROP DATABASE` cannot take bound parameters; every
/// site that splices a database name into DDL must go through here.
pub fn sanitize_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_from_plain_name() {
        assert_eq!(generate_slug("My Feature Branch"), "my-feature-branch");
    }

    #[test]
    fn slug_drops_punctuation_without_separating() {
        assert_eq!(generate_slug("feature/ABC-123"), "featureabc-123");
    }

    #[test]
    fn slug_collapses_hyphen_runs() {
        assert_eq!(generate_slug("feature---branch"), "feature-branch");
        assert_eq!(generate_slug("a _ - b"), "a-b");
    }

    #[test]
    fn slug_falls_back_on_empty_input() {
        assert_eq!(generate_slug(""), "branch");
        assert_eq!(generate_slug("@#$%"), "branch");
        assert_eq!(generate_slug("---"), "branch");
    }

    #[test]
    fn slug_truncates_to_max_len() {
        let long = "x".repeat(200);
        assert_eq!(generate_slug(&long).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn slug_generation_is_idempotent() {
        for name in ["My Feature Branch", "feature/ABC-123", "", "a--b__c  d", "PR #42"] {
            let once = generate_slug(name);
            assert_eq!(generate_slug(&once), once, "not idempotent for {name:?}");
        }
    }

    #[test]
    fn generated_slugs_always_validate() {
        for name in [
            "My Feature Branch",
            "feature/ABC-123",
            "",
            "@#$%",
            "  -- leading junk",
            "Ünïcödé nämé",
            &"word ".repeat(40),
        ] {
            let slug = generate_slug(name);
            assert!(
                validate_slug(&slug).is_ok() || slug == "branch",
                "generated slug {slug:?} failed validation"
            );
        }
    }

    #[test]
    fn validate_rejects_reserved_and_malformed() {
        assert!(matches!(validate_slug("main"), Err(BranchError::ReservedSlug(_))));
        assert!(matches!(validate_slug(""), Err(BranchError::InvalidSlug(_))));
        assert!(matches!(validate_slug("Feature"), Err(BranchError::InvalidSlug(_))));
        assert!(matches!(validate_slug("-leading"), Err(BranchError::InvalidSlug(_))));
        assert!(matches!(validate_slug("trailing-"), Err(BranchError::InvalidSlug(_))));
        assert!(matches!(
            validate_slug(&"a".repeat(51)),
            Err(BranchError::SlugTooLong(_))
        ));
        assert!(validate_slug("a").is_ok());
        assert!(validate_slug("feat-x").is_ok());
    }

    #[test]
    fn database_name_derivation() {
        assert_eq!(generate_database_name("branch_", "my-feature"), "branch_my_feature");
        assert_eq!(generate_database_name("", "123feature"), "_123feature");
        assert_eq!(generate_database_name("", "abc"), "abc");
    }

    #[test]
    fn database_name_stays_within_postgres_limit() {
        let slug = "s".repeat(MAX_SLUG_LEN);
        for prefix in ["", "branch_", &"p".repeat(40)] {
            let name = generate_database_name(prefix, &slug);
            assert!(name.len() <= MAX_DATABASE_NAME_LEN);
            let first = name.chars().next().unwrap();
            assert!(first.is_ascii_lowercase() || first == '_');
        }
    }

    #[test]
    fn pr_slug_format() {
        assert_eq!(generate_pr_slug(42), "pr-42");
        assert!(validate_slug(&generate_pr_slug(7)).is_ok());
    }

    #[test]
    fn identifier_quoting_doubles_embedded_quotes() {
        assert_eq!(sanitize_identifier("plain_db"), "\"plain_db\"");
        assert_eq!(sanitize_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
