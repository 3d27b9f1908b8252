//! Entity extraction from a query string (§4.2): a fixed pattern set for
//! the external systems this system integrates with.

use std::sync::OnceLock;

use regex::Regex;

/// One entity match pulled out of a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMatch {
    pub system: &'static str,
    pub value: String,
}

struct Patterns {
    jira: Regex,
    salesforce: Regex,
    servicenow: Regex,
    email: Regex,
    generic_number: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        jira: Regex::new(r"\b[A-Z]+-\d+\b").unwrap(),
        salesforce: Regex::new(r"\b[a-zA-Z0-9]{15}([a-zA-Z0-9]{3})?\b").unwrap(),
        servicenow: Regex::new(r"\b(INC|CHG|PRB|TASK|REQ|RITM|KB)\d{7}\b").unwrap(),
        email: Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap(),
        generic_number: Regex::new(r"\b\d{6,}\b").unwrap(),
    })
}

/// Extract every recognized external-entity reference from `query`, in
/// pattern-declaration order. A value matched by an earlier pattern is not
/// re-reported by a later, looser one (the generic-number pattern skips
/// anything already claimed by ServiceNow/Salesforce).
pub fn extract_entities(query: &str) -> Vec<EntityMatch> {
    let p = patterns();
    let mut found = Vec::new();
    let mut claimed: Vec<(usize, usize)> = Vec::new();

    for m in p.jira.find_iter(query) {
        found.push(EntityMatch {
            system: "jira",
            value: m.as_str().to_string(),
        });
        claimed.push((m.start(), m.end()));
    }
    for m in p.servicenow.find_iter(query) {
        found.push(EntityMatch {
            system: "servicenow",
            value: m.as_str().to_string(),
        });
        claimed.push((m.start(), m.end()));
    }
    for m in p.email.find_iter(query) {
        found.push(EntityMatch {
            system: "email",
            value: m.as_str().to_string(),
        });
        claimed.push((m.start(), m.end()));
    }
    for m in p.salesforce.find_iter(query) {
        if claimed.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e) {
            continue;
        }
        found.push(EntityMatch {
            system: "salesforce",
            value: m.as_str().to_string(),
        });
        claimed.push((m.start(), m.end()));
    }
    for m in p.generic_number.find_iter(query) {
        if claimed.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e) {
            continue;
        }
        found.push(EntityMatch {
            system: "generic",
            value: m.as_str().to_string(),
        });
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_jira_key() {
        let found = extract_entities("please look at PROJ-1234 again");
        assert!(found.iter().any(|e| e.system == "jira" && e.value == "PROJ-1234"));
    }

    #[test]
    fn finds_servicenow_number() {
        let found = extract_entities("ticket INC0012345 is blocked");
        assert!(found.iter().any(|e| e.system == "servicenow" && e.value == "INC0012345"));
    }

    #[test]
    fn finds_email() {
        let found = extract_entities("contact jane.doe@example.com about this");
        assert!(found.iter().any(|e| e.system == "email"));
    }

    #[test]
    fn generic_number_does_not_duplicate_servicenow_match() {
        let found = extract_entities("INC0012345");
        assert_eq!(found.iter().filter(|e| e.value == "INC0012345").count(), 1);
    }

    #[test]
    fn no_entities_in_plain_text() {
        let found = extract_entities("what is the weather today");
        assert!(found.is_empty());
    }
}
