//! Helpers for `arn:partition:service:region:account:resource` strings.

fn field(arn: &str, index: usize) -> Option<&str> {
    arn.split(':').nth(index).filter(|s| !s.is_empty())
}

pub fn region(arn: &str) -> Option<&str> {
    field(arn, 3)
}

pub fn account(arn: &str) -> Option<&str> {
    field(arn, 4)
}

/// Drops a trailing version or alias from a function ARN.
pub fn unqualified(function_arn: &str) -> &str {
    match function_arn.match_indices(':').nth(6) {
        Some((idx, _)) => &function_arn[..idx],
        None => function_arn,
    }
}

/// Last `:`-separated component, e.g. the topic name of a topic ARN.
pub fn resource_name(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or(arn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_function_arn() {
        let arn = "arn:aws:lambda:eu-west-1:123456789012:function:orders:7";
        assert_eq!(region(arn), Some("eu-west-1"));
        assert_eq!(account(arn), Some("123456789012"));
        assert_eq!(
            unqualified(arn),
            "arn:aws:lambda:eu-west-1:123456789012:function:orders"
        );
        assert_eq!(unqualified("arn:aws:lambda:r:a:function:f"), "arn:aws:lambda:r:a:function:f");
    }

    #[test]
    fn topic_name_is_last_component() {
        assert_eq!(resource_name("arn:aws:sns:us-east-1:000000000000:alerts"), "alerts");
        assert_eq!(region("not-an-arn"), None);
    }
}
