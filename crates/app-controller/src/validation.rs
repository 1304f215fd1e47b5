// This is adapted from Kubernetes.
// See apimachinery/pkg/util/validation/validation.go in the Kubernetes source

use std::{fmt::Display, sync::LazyLock};

use regex::Regex;
use snafu::Snafu;

/// Kubernetes limits namespace and service names to a single DNS label.
pub const DNS_LABEL_MAX_LENGTH: usize = 63;

const RFC_1123_LABEL_FMT: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";
const RFC_1123_LABEL_ERROR_MSG: &str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character";

const RFC_1035_LABEL_FMT: &str = "[a-z]([-a-z0-9]*[a-z0-9])?";
const RFC_1035_LABEL_ERROR_MSG: &str = "a DNS-1035 label must consist of lower case alphanumeric characters or '-', start with an alphabetic character, and end with an alphanumeric character";

static RFC_1123_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{RFC_1123_LABEL_FMT}$")).expect("failed to compile RFC 1123 label regex")
});

static RFC_1035_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{RFC_1035_LABEL_FMT}$")).expect("failed to compile RFC 1035 label regex")
});

type Result<T = (), E = Errors> = std::result::Result<T, E>;

/// A collection of errors discovered during validation.
#[derive(Debug)]
pub struct Errors(Vec<Error>);

impl Display for Errors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            let prefix = match i {
                0 => "",
                _ => ", ",
            };
            write!(f, "{prefix}{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

/// A single validation error.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{msg} (regex used for validation is {regex:?})"))]
    Regex {
        msg: &'static str,
        regex: &'static str,
    },

    #[snafu(display("input is {length} bytes long but must be no more than {max_length}"))]
    TooLong { length: usize, max_length: usize },
}

fn validate_str_length(value: &str, max_length: usize) -> Result<(), Error> {
    if value.len() > max_length {
        TooLongSnafu {
            length: value.len(),
            max_length,
        }
        .fail()
    } else {
        Ok(())
    }
}

fn validate_str_regex(
    value: &str,
    regex: &'static Regex,
    msg: &'static str,
) -> Result<(), Error> {
    if regex.is_match(value) {
        Ok(())
    } else {
        RegexSnafu {
            msg,
            regex: regex
                .as_str()
                .trim_start_matches('^')
                .trim_end_matches('$'),
        }
        .fail()
    }
}

/// Returns [`Ok`] if *all* validations are [`Ok`], otherwise returns all errors.
fn validate_all(validations: impl IntoIterator<Item = Result<(), Error>>) -> Result {
    let errors = validations
        .into_iter()
        .filter_map(Result::err)
        .collect::<Vec<_>>();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Errors(errors))
    }
}

/// Validates a namespace name: a lowercase RFC 1123 label of at most 63 characters.
pub fn validate_namespace_name(name: &str) -> Result {
    validate_all([
        validate_str_length(name, DNS_LABEL_MAX_LENGTH),
        validate_str_regex(name, &RFC_1123_LABEL_REGEX, RFC_1123_LABEL_ERROR_MSG),
    ])
}

/// Validates a workload name. The scheduler derives DNS names from it, so it must be an
/// RFC 1035 label.
pub fn validate_workload_name(name: &str) -> Result {
    validate_all([
        validate_str_length(name, DNS_LABEL_MAX_LENGTH),
        validate_str_regex(name, &RFC_1035_LABEL_REGEX, RFC_1035_LABEL_ERROR_MSG),
    ])
}

/// Returns whether `name` is usable as a namespace name.
pub fn is_namespace_name(name: &str) -> bool {
    validate_namespace_name(name).is_ok()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("a")]
    #[case("0")]
    #[case("alice3k9x2a")]
    #[case("a-1")]
    #[case("1-a")]
    #[case("a--1--2--b")]
    #[case(&"a".repeat(63))]
    fn namespace_name_pass(#[case] value: &str) {
        assert!(validate_namespace_name(value).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("-")]
    #[case("a-")]
    #[case("-a")]
    #[case("A")]
    #[case("aBc")]
    #[case("a_b")]
    #[case("a.b")]
    #[case("john.doe")]
    #[case("a b")]
    #[case("a@b")]
    #[case(&"a".repeat(64))]
    fn namespace_name_fail(#[case] value: &str) {
        assert!(validate_namespace_name(value).is_err());
    }

    #[rstest]
    #[case("hello")]
    #[case("hello-world")]
    #[case("app1")]
    fn workload_name_pass(#[case] value: &str) {
        assert!(validate_workload_name(value).is_ok());
    }

    #[rstest]
    #[case("1app")]
    #[case("Hello")]
    #[case("app-")]
    #[case("my_app")]
    #[case(&"a".repeat(64))]
    fn workload_name_fail(#[case] value: &str) {
        assert!(validate_workload_name(value).is_err());
    }

    #[test]
    fn too_long_and_invalid_reports_both() {
        let value = format!("{}_", "a".repeat(63));
        let errors = validate_namespace_name(&value).expect_err("must be invalid");
        assert_eq!(errors.0.len(), 2);
    }
}
