use llm_tutor_core::{
    ClassifiedError, ErrorContext, ErrorKind, QualityChecker, RequestContext, RetryCondition,
    TokenUsage,
};
use test_case::test_case;

// ===== RequestContext Tests =====

#[test]
fn test_request_context_builder() {
    let context = RequestContext::new()
        .with_level("beginner")
        .with_case_type("diagnosis")
        .with_case_id("case-42")
        .with_concepts(["anemia", "iron"])
        .with_metadata("session", "s-1");

    assert_eq!(context.level.as_deref(), Some("beginner"));
    assert_eq!(context.case_type.as_deref(), Some("diagnosis"));
    assert_eq!(context.case_id.as_deref(), Some("case-42"));
    assert_eq!(context.concepts, vec!["anemia".to_string(), "iron".to_string()]);
    assert_eq!(context.metadata.get("session").map(String::as_str), Some("s-1"));
}

#[test]
fn test_request_context_deserializes_with_missing_collections() {
    let context: RequestContext =
        serde_json::from_str(r#"{"level":"advanced","case_type":null,"case_id":null}"#).unwrap();

    assert_eq!(context.level.as_deref(), Some("advanced"));
    assert!(context.concepts.is_empty());
    assert!(context.metadata.is_empty());
}

#[test]
fn test_token_usage_totals() {
    let usage = TokenUsage::new(120, 80);
    assert_eq!(usage.total_tokens, 200);
}

// ===== Strategy Trait Tests =====

#[test_case(ErrorKind::Network, 1 => true; "network first attempt")]
#[test_case(ErrorKind::Network, 4 => false; "network past budget")]
#[test_case(ErrorKind::Quota, 1 => false; "quota never")]
fn test_closure_retry_condition(kind: ErrorKind, attempt: u32) -> bool {
    let condition = |error: &ClassifiedError, attempt: u32| {
        error.kind() == ErrorKind::Network && attempt < 3
    };
    let error = ClassifiedError::new(kind, "failure", ErrorContext::default());
    condition.should_retry(&error, attempt)
}

struct LengthChecker;

impl QualityChecker for LengthChecker {
    fn score(&self, response: &str, _context: &RequestContext) -> f64 {
        (response.len() as f64 / 100.0).min(1.0)
    }
}

#[test]
fn test_quality_checker_as_trait_object() {
    let checker: Box<dyn QualityChecker> = Box::new(LengthChecker);
    assert_eq!(checker.score("short", &RequestContext::default()), 0.05);
}

#[test]
fn test_error_record_snapshot() {
    let error = ClassifiedError::new(
        ErrorKind::Parsing,
        "bad json",
        ErrorContext::new("op", "agent").with_attempt(2),
    );
    let record = error.record();

    assert_eq!(record.kind, ErrorKind::Parsing);
    assert_eq!(record.attempt, 2);
    assert_eq!(record.id, error.id());
}
