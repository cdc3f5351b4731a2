use envoy_xds_controller_k8s_api::meta::GENERAL_ACCESS_GROUP;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const NAME_REGEX: &str = r"^[a-z0-9][a-z0-9-]*[a-z0-9]$";
const MAX_NAME_LEN: usize = 200;
const MAX_DOMAIN_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

static NAME: Lazy<Regex> = Lazy::new(|| Regex::new(NAME_REGEX).expect("should_compile"));

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NameError {
    #[error("name cannot be longer than {MAX_NAME_LEN} characters")]
    TooLong,

    #[error(
        "name must contain only lowercase letters, numbers and hyphens, and must start and end \
         with alphanumeric character"
    )]
    Invalid,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DomainError {
    #[error("domain cannot be empty")]
    Empty,

    #[error("domain name too long")]
    TooLong,

    #[error("empty label in domain name")]
    EmptyLabel,

    #[error("domain label too long")]
    LabelTooLong,

    #[error("domain label cannot start or end with hyphen")]
    Hyphen,

    #[error("invalid character in domain name")]
    BadChar,
}

/// Wildcard placement errors, as used for secret-domain lookups.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PatternError {
    #[error("empty domain")]
    Empty,

    #[error("wildcard (*) must be at the start of domain")]
    NotAtStart,

    #[error("wildcard domain too short")]
    TooShort,

    #[error("wildcard must be followed by dot (e.g., *.example.com, not *example.com)")]
    NoDot,

    #[error("multiple wildcards not allowed")]
    Multiple,

    #[error("wildcard domain must have at least one label after *.")]
    NoLabel,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum AccessGroupError {
    #[error("access group is required")]
    Empty,

    #[error("forbidden to create virtual service in general access group")]
    General,
}

pub fn validate_name(name: &str) -> Result<(), NameError> {
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    if !NAME.is_match(name) {
        return Err(NameError::Invalid);
    }
    Ok(())
}

/// Validates a virtual-host domain: a sequence of DNS labels, optionally prefixed by `*.`, or
/// the bare `*`.
pub fn validate_domain(domain: &str) -> Result<(), DomainError> {
    if domain.is_empty() {
        return Err(DomainError::Empty);
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(DomainError::TooLong);
    }
    if domain == "*" {
        return Ok(());
    }

    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    for label in domain.split('.') {
        if label.is_empty() {
            return Err(DomainError::EmptyLabel);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(DomainError::LabelTooLong);
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(DomainError::Hyphen);
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(DomainError::BadChar);
        }
    }
    Ok(())
}

pub fn validate_domain_pattern(domain: &str) -> Result<(), PatternError> {
    if domain.is_empty() {
        return Err(PatternError::Empty);
    }
    let Some(idx) = domain.find('*') else {
        return Ok(());
    };
    if idx != 0 {
        return Err(PatternError::NotAtStart);
    }
    if domain.len() < 3 {
        return Err(PatternError::TooShort);
    }
    if !domain[1..].starts_with('.') {
        return Err(PatternError::NoDot);
    }
    if domain.matches('*').count() > 1 {
        return Err(PatternError::Multiple);
    }
    match &domain[2..] {
        "" | "." => Err(PatternError::NoLabel),
        _ => Ok(()),
    }
}

/// Validates the access group of a virtual service being created.
pub fn validate_access_group(group: &str) -> Result<(), AccessGroupError> {
    if group.trim().is_empty() {
        return Err(AccessGroupError::Empty);
    }
    if group == GENERAL_ACCESS_GROUP {
        return Err(AccessGroupError::General);
    }
    Ok(())
}
