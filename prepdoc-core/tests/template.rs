use bson::{Bson, doc};
use rstest::rstest;

use prepdoc_core::{
    error::QueryError,
    matcher::{count_placeholders, ensure_arguments, match_arguments},
    options::{LookupMode, PlaceholderPolicy, StatementOptions},
    template::{Node, Template, entries_to_document},
    value::{Bindings, TypedValue},
};

#[rstest]
#[case(r#"{"collection":"u"}"#, 0)]
#[case(r#"{"collection":"u","name":"?"}"#, 1)]
#[case(r#"{"collection":"u","a":"?","b":{"c":"?","d":{"e":"?"}}}"#, 3)]
#[case(r#"{"collection":"u","$or":[{"a":"?"},{"b":"?"},"?"]}"#, 2)]
#[case(r#"{"collection":"u","name":"alice","age":30}"#, 0)]
fn placeholders_are_counted_recursively(#[case] source: &str, #[case] expected: usize) {
    let template = Template::parse(source).unwrap();

    assert_eq!(count_placeholders(template.entries()), expected);
}

#[test]
fn argument_matching_compares_counts() {
    let template = Template::parse(r#"{"collection":"u","a":"?","b":"?"}"#).unwrap();
    let mut bindings = Bindings::new();
    bindings.bind("a", 1);

    assert!(!match_arguments(&template, &bindings));
    assert_eq!(
        ensure_arguments(&template, &bindings),
        Err(QueryError::ParameterCountMismatch { placeholders: 2, bindings: 1 })
    );

    bindings.bind("b", 2);
    assert!(match_arguments(&template, &bindings));
    assert_eq!(ensure_arguments(&template, &bindings), Ok(()));
}

#[test]
fn rebinding_replaces_the_value() {
    let mut bindings = Bindings::new();

    assert_eq!(bindings.bind("a", 1), None);
    assert_eq!(bindings.bind("a", "x"), Some(TypedValue::Int32(1)));
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings.get("a"), Some(&TypedValue::Str("x".to_string())));
}

#[test]
fn template_preserves_key_order_and_types() {
    let template = Template::parse(r#"{"collection":"u","z":1,"a":"?","big":5000000000,"f":1.5,"n":null}"#).unwrap();
    let keys = template
        .entries()
        .iter()
        .map(|(key, _)| key.as_str())
        .collect::<Vec<_>>();

    assert_eq!(keys, vec!["collection", "z", "a", "big", "f", "n"]);
    assert_eq!(
        entries_to_document(template.entries()),
        doc! {
            "collection": "u",
            "z": 1,
            "a": "?",
            "big": 5_000_000_000_i64,
            "f": 1.5,
            "n": Bson::Null,
        }
    );
}

#[test]
fn template_accessors() {
    let template = Template::parse(
        r#"{"collection":"users","distinct":"role","profile":{"$lookupRoles":{"from":"r"}}}"#,
    )
    .unwrap();

    assert_eq!(template.collection(), Some("users"));
    assert_eq!(template.distinct_key(), Some("role"));
    assert!(template.mentions("from"));
    assert!(!template.mentions("missing"));
    assert!(template.get("profile").is_some_and(|node| matches!(node, Node::Object(_))));
}

#[test]
fn lookup_mode_defaults_follow_the_template() {
    let with_lookup = Template::parse(r#"{"collection":"u","$lookup":{"from":"a"}}"#).unwrap();
    let without_lookup = Template::parse(r#"{"collection":"u","$match":{"a":"?"}}"#).unwrap();
    let options = StatementOptions::default();

    assert_eq!(options.lookup_mode_for(&with_lookup), LookupMode::Single);
    assert_eq!(options.lookup_mode_for(&without_lookup), LookupMode::Interleaved);

    let pinned = StatementOptions::builder()
        .lookup_mode(LookupMode::Interleaved)
        .build();
    assert_eq!(pinned.lookup_mode_for(&with_lookup), LookupMode::Interleaved);
}

#[rstest]
#[case(true, LookupMode::Single)]
#[case(false, LookupMode::Interleaved)]
fn multi_lookup_flag_polarity(#[case] flag: bool, #[case] expected: LookupMode) {
    assert_eq!(LookupMode::from_multi_lookup(flag), expected);
}

#[test]
fn options_deserialize_with_defaults() {
    let options: StatementOptions = serde_json::from_str(r#"{"placeholders":"lenient"}"#).unwrap();

    assert_eq!(options.placeholders, PlaceholderPolicy::Lenient);
    assert_eq!(options.lookup_mode, None);
    assert!(!options.is_strict());

    let options: StatementOptions = serde_json::from_str(r#"{"lookup_mode":"interleaved"}"#).unwrap();
    assert!(options.is_strict());
    assert_eq!(options.lookup_mode, Some(LookupMode::Interleaved));
}

#[rstest]
#[case(TypedValue::Int32(5), Some(5))]
#[case(TypedValue::Int64(7), Some(7))]
#[case(TypedValue::Str(" 12 ".to_string()), Some(12))]
#[case(TypedValue::Str("many".to_string()), None)]
#[case(TypedValue::Bool(true), None)]
fn limit_values(#[case] value: TypedValue, #[case] expected: Option<i64>) {
    assert_eq!(value.as_limit(), expected);
}
