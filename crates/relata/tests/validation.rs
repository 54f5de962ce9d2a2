mod fixtures;

use fixtures::{Person, create, isolate};
use relata::prelude::*;
use relata::{DriverCall, PhraseTable, register_rule, registry, verify_password};

struct Member;

impl Entity for Member {
    const NAME: &'static str = "Member";

    fn schema() -> Schema {
        Schema::new()
            .property(Property::string("login").validate("alpha_dash|string:min=3:max=12"))
            .property(Property::array("confirm").validate("matching|string:min=5"))
            .property(Property::string("password").validate("password:min=8").hidden())
            .property(Property::enumeration("role", ["admin", "member"]).default("member"))
            .property(Property::integer("score").validate("range:min=0:max=10").nullable())
            .property(
                Property::string("code")
                    .title("Invite code")
                    .validate("callable:fn=even_length")
                    .nullable(),
            )
    }
}

#[test]
fn first_failing_rule_names_the_error() {
    let env = isolate();
    let mut member = Member::new().unwrap();

    let created = member
        .create(row! { "confirm" => vec![Value::from("ab"), Value::from("cd")] })
        .unwrap();

    assert!(!created);
    assert_eq!(member.errors().codes(), vec!["matching"]);
    assert_eq!(member.errors().messages(), vec!["Confirm must match"]);
    assert_eq!(env.driver.calls(DriverCall::Create), 0);
}

#[test]
fn matching_values_collapse_before_the_next_rule() {
    let _env = isolate();
    let mut member = Member::new().unwrap();
    assert!(
        !member
            .create(row! { "confirm" => vec![Value::from("abc"), Value::from("abc")] })
            .unwrap()
    );
    assert_eq!(member.errors().codes(), vec!["string"]);

    let mut member = Member::new().unwrap();
    assert!(
        member
            .create(row! { "confirm" => vec![Value::from("secret"), Value::from("secret")] })
            .unwrap()
    );
}

#[test]
fn every_failing_property_is_reported() {
    let _env = isolate();
    let mut member = Member::new().unwrap();
    let created = member
        .create(row! { "login" => "a b", "role" => "owner", "score" => 11 })
        .unwrap();

    assert!(!created);
    assert_eq!(member.errors().len(), 3);
    assert!(member.errors().has_code("alpha_dash"));
    assert!(member.errors().has_code("enum"));
    assert!(member.errors().has_code("range"));
    let score: Vec<_> = member.errors().for_field("score").collect();
    assert_eq!(score.len(), 1);
}

#[test]
fn rules_normalize_written_values() {
    let env = isolate();
    let person = create::<Person>(row! { "name" => "Ada", "email" => "  Ada@Example.COM " });
    assert_eq!(person.get("email"), Value::from("ada@example.com"));
    assert_eq!(env.driver.rows("persons")[0]["email"], Value::from("ada@example.com"));
}

#[test]
fn passwords_are_hashed() {
    let env = isolate();
    let member = create::<Member>(row! { "password" => "correct horse" });

    let stored = env.driver.rows("members")[0]["password"].to_string();
    assert_ne!(stored, "correct horse");
    assert!(verify_password("correct horse", &stored));
    assert!(!member.to_array().contains_key("password"));

    let mut short = Member::new().unwrap();
    assert!(!short.create(row! { "password" => "short" }).unwrap());
    assert_eq!(
        short.errors().messages(),
        vec!["Password must be at least 8 characters"]
    );
}

#[test]
fn unique_rejects_a_taken_value() {
    let _env = isolate();
    create::<Person>(row! { "name" => "Ada", "email" => "ada@example.com" });

    let mut copy = Person::new().unwrap();
    assert!(
        !copy
            .create(row! { "name" => "Copy", "email" => "ADA@example.com" })
            .unwrap()
    );
    assert_eq!(copy.errors().codes(), vec!["unique"]);
    assert!(copy.errors().has_field("email"));
}

#[test]
fn unique_skips_the_models_own_value() {
    let _env = isolate();
    let mut ada = create::<Person>(row! { "name" => "Ada", "email" => "ada@example.com" });
    assert!(ada.set(row! { "email" => "ada@example.com", "age" => 37 }).unwrap());
    assert!(ada.errors().is_empty());
}

#[test]
fn null_is_accepted_for_nullable_properties() {
    let _env = isolate();
    let mut member = Member::new().unwrap();
    assert!(member.create(row! { "score" => Value::Null }).unwrap());
    assert!(member.get("score").is_null());
    assert_eq!(member.get("role"), Value::from("member"));
}

#[test]
fn registered_rules_run_through_callable() {
    let _env = isolate();
    register_rule("even_length", |value, _, _| {
        Ok(value.as_str().is_some_and(|s| s.len() % 2 == 0))
    })
    .unwrap();
    assert!(register_rule("email", |_, _, _| Ok(true)).is_err());

    let mut member = Member::new().unwrap();
    assert!(!member.create(row! { "code" => "abc" }).unwrap());
    assert_eq!(member.errors().codes(), vec!["callable"]);
    assert_eq!(member.errors().messages(), vec!["Invite code is invalid"]);

    let mut member = Member::new().unwrap();
    assert!(member.create(row! { "code" => "abcd" }).unwrap());
}

#[test]
fn translator_overrides_messages() {
    let _env = isolate();
    registry::set_translator(Arc::new(
        PhraseTable::new("en")
            .phrase("en", "validation.required", "{{field_name}} is required")
            .phrase("fr", "validation.required", "{{field_name}} est obligatoire"),
    ));

    let mut person = Person::new().unwrap();
    assert!(!person.create(Row::new()).unwrap());
    assert_eq!(person.errors().messages(), vec!["Name is required"]);

    registry::set_locale(Some("fr".to_string()));
    assert!(!person.create(Row::new()).unwrap());
    assert_eq!(person.errors().messages(), vec!["Name est obligatoire"]);

    // Keys the table lacks fall back to the built-in phrases.
    let mut copy = Person::new().unwrap();
    assert!(!copy.create(row! { "name" => "x", "email" => "nope" }).unwrap());
    assert_eq!(
        copy.errors().messages(),
        vec!["Email must be a valid email address"]
    );
}

#[test]
fn validation_errors_carry_their_parameters() {
    let _env = isolate();
    let mut member = Member::new().unwrap();
    assert!(!member.create(row! { "login" => "ab" }).unwrap());

    let error = member.errors().iter().next().expect("error");
    assert_eq!(error.code, "string");
    assert_eq!(error.field.as_deref(), Some("login"));
    assert_eq!(error.params.get("min").map(String::as_str), Some("3"));
    assert_eq!(error.params.get("field_name").map(String::as_str), Some("Login"));
}
