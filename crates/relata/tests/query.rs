mod fixtures;

use fixtures::{Article, Person, create, isolate};
use relata::prelude::*;
use relata::{DriverCall, MAX_LIMIT, Operation};

fn seed_people(env: &fixtures::Isolated) {
    let people = [
        ("Ada", Some(36), Some("ada@example.com")),
        ("Grace", Some(45), None),
        ("Linus", Some(21), Some("linus@example.com")),
        ("Barbara", None, None),
    ];
    for (i, (name, age, email)) in people.into_iter().enumerate() {
        let mut row = row! { "id" => i as i64 + 1, "name" => name };
        row.insert("age".to_string(), age.map_or(Value::Null, Value::from));
        row.insert("email".to_string(), email.map_or(Value::Null, Value::from));
        env.driver.insert_row("persons", row);
    }
}

fn names(models: &[Model]) -> Vec<String> {
    models.iter().map(|m| m.get("name").to_string()).collect()
}

#[test]
fn filters_combine_with_and() {
    let env = isolate();
    seed_people(&env);

    let found = Person::query()
        .where_op("age", Operator::Gt, 30)
        .where_null("email")
        .execute()
        .unwrap();
    assert_eq!(names(&found), vec!["Grace"]);

    let found = Person::query()
        .where_in("name", ["Ada", "Linus", "Nobody"])
        .execute()
        .unwrap();
    assert_eq!(names(&found), vec!["Ada", "Linus"]);

    let found = Person::query()
        .where_op("name", Operator::Like, "%a")
        .sort("name asc")
        .execute()
        .unwrap();
    assert_eq!(names(&found), vec!["Ada", "Barbara"]);

    let found = Person::query()
        .where_all(row! { "name" => "Ada", "age" => 36 })
        .execute()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].is_loaded());
}

#[test]
fn raw_null_checks_are_supported() {
    let env = isolate();
    seed_people(&env);

    let with_email = Person::query()
        .where_raw("email IS NOT NULL")
        .execute()
        .unwrap();
    assert_eq!(names(&with_email), vec!["Ada", "Linus"]);

    let err = Person::query().where_raw("age > 30").execute().unwrap_err();
    match err {
        Error::Driver(driver) => assert_eq!(driver.operation, Operation::Query),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn sorting_and_paging() {
    let env = isolate();
    seed_people(&env);

    let by_age = Person::query()
        .where_op("age", Operator::NotEq, Value::Null)
        .sort_by("age", Direction::Desc)
        .execute()
        .unwrap();
    assert_eq!(names(&by_age), vec!["Grace", "Ada", "Linus"]);

    let page = Person::query().sort("name asc").start(1).limit(2).execute().unwrap();
    assert_eq!(names(&page), vec!["Barbara", "Grace"]);

    let first = Person::query().sort("age asc").where_op("age", Operator::Gte, 0).first().unwrap();
    assert_eq!(first.map(|p| p.get("name")), Some(Value::from("Linus")));
    assert_eq!(Person::query().first_n(3).unwrap().len(), 3);
    assert!(
        Person::query()
            .where_eq("name", "Nobody")
            .first()
            .unwrap()
            .is_none()
    );
}

#[test]
fn execute_returns_one_page_and_all_walks_every_page() {
    let env = isolate();
    for id in 1..=1200_i64 {
        env.driver
            .insert_row("persons", row! { "id" => id, "name" => format!("p{}", id) });
    }
    env.driver.reset_calls();

    assert_eq!(Person::query().execute().unwrap().len(), 100);
    assert_eq!(
        Person::query().limit(5000).execute().unwrap().len(),
        MAX_LIMIT
    );
    env.driver.reset_calls();

    let everyone = Person::query().all().unwrap();
    assert_eq!(everyone.len(), 1200);
    assert_eq!(env.driver.calls(DriverCall::Query), 2);

    let tail = Person::query().start(1150).all().unwrap();
    assert_eq!(tail.len(), 50);
}

#[test]
fn aggregates() {
    let env = isolate();
    seed_people(&env);
    env.driver.reset_calls();

    let query = Person::query();
    assert_eq!(query.count().unwrap(), 4);
    assert_eq!(query.sum("age").unwrap(), 102.0);
    assert_eq!(query.average("age").unwrap(), 34.0);
    assert_eq!(query.min("age").unwrap(), Value::Int(21));
    assert_eq!(query.max("age").unwrap(), Value::Int(45));
    assert_eq!(query.clone().where_eq("name", "Ada").count().unwrap(), 1);

    // Paging never narrows an aggregate.
    assert_eq!(query.clone().limit(1).count().unwrap(), 4);
    assert_eq!(Person::query().where_eq("name", "x").max("age").unwrap(), Value::Null);

    assert_eq!(env.driver.calls(DriverCall::Count), 3);
    assert_eq!(env.driver.calls(DriverCall::Query), 0);
}

#[test]
fn bulk_update_and_delete() {
    let env = isolate();
    seed_people(&env);

    let updated = Person::query()
        .where_op("age", Operator::Lt, 40)
        .set(row! { "age" => 50 })
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(Person::query().where_eq("age", 50).count().unwrap(), 2);

    let deleted = Person::query().where_null("age").delete().unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(env.driver.rows("persons").len(), 3);
}

#[test]
fn bulk_update_counts_refused_models_out() {
    let _env = isolate();
    create::<Person>(row! { "name" => "Ada" });
    create::<Person>(row! { "name" => "Grace" });

    let saved = Person::query().set(row! { "email" => "not-an-email" }).unwrap();
    assert_eq!(saved, 0);
}

#[test]
fn soft_deleted_rows_are_scoped_out() {
    let env = isolate();
    let mut draft = create::<Article>(row! { "title" => "Draft" });
    create::<Article>(row! { "title" => "Final" });

    assert!(draft.delete().unwrap());
    assert!(draft.is_persisted());
    assert!(draft.is_deleted());
    assert_eq!(env.driver.rows("articles").len(), 2);

    assert_eq!(Article::query().count().unwrap(), 1);
    assert_eq!(Article::query().with_deleted().count().unwrap(), 2);
    let visible = Article::query().execute().unwrap();
    assert_eq!(visible[0].get("title"), Value::from("Final"));

    let stored = Article::find_or_fail(1).unwrap();
    assert!(stored.is_deleted());
}

#[test]
fn restore_clears_the_deletion_stamp() {
    let _env = isolate();
    let mut article = create::<Article>(row! { "title" => "Draft" });

    assert!(matches!(article.restore(), Err(Error::InvalidState { .. })));

    article.delete().unwrap();
    assert!(article.restore().unwrap());
    assert!(!article.is_deleted());
    assert_eq!(Article::query().count().unwrap(), 1);
}

#[test]
fn join_exposes_qualified_columns() {
    let env = isolate();
    seed_people(&env);
    env.driver
        .insert_row("badges", row! { "owner_id" => 1, "label" => "gold" });

    let found = Person::query()
        .join("badges", "id", "owner_id")
        .where_eq("badges.label", "gold")
        .execute()
        .unwrap();
    assert_eq!(names(&found), vec!["Ada"]);
    assert_eq!(found[0].raw_value("badges.label"), Value::from("gold"));
}

#[test]
fn queries_fail_without_a_driver() {
    let _env = isolate();
    relata::registry::clear_driver();
    assert!(Person::query().execute().unwrap_err().is_no_driver());
    assert!(Person::query().count().unwrap_err().is_no_driver());
}
