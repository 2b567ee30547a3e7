use regex::Regex;

/// Filters tests by name against the `LABU_TEST_PATTERN` expression.
#[derive(Clone, Debug)]
pub struct TestMatcher {
    pattern: Regex,
}

impl TestMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, test: &str) -> bool {
        self.pattern.is_match(test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_by_test_name() {
        let matcher = TestMatcher::new("rpc/.*").expect("pattern compiles");
        assert!(matcher.matches("rpc/a"));
        assert!(matcher.matches("rpc/get-balance"));
        assert!(!matcher.matches("sys/b"));
    }

    #[test]
    fn matches_anywhere_in_the_name() {
        let matcher = TestMatcher::new("balance").expect("pattern compiles");
        assert!(matcher.matches("rpc/get-balance (alpha)"));
        assert!(!matcher.matches("rpc/get-nonce"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(TestMatcher::new("(unclosed").is_err());
    }
}
