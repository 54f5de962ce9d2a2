mod fixtures;

use fixtures::{Article, Person, Team, create, isolate};
use relata::prelude::*;
use relata::{DriverCall, transaction};

#[test]
fn only_the_outermost_level_reaches_the_driver() {
    let env = isolate();

    transaction::begin().unwrap();
    transaction::begin().unwrap();
    transaction::begin().unwrap();
    assert_eq!(transaction::depth(), 3);

    transaction::commit().unwrap();
    transaction::commit().unwrap();
    assert_eq!(env.driver.calls(DriverCall::Commit), 0);
    transaction::rollback().unwrap();

    assert_eq!(transaction::depth(), 0);
    assert_eq!(env.driver.calls(DriverCall::Begin), 1);
    assert_eq!(env.driver.calls(DriverCall::Commit), 0);
    assert_eq!(env.driver.calls(DriverCall::Rollback), 1);
}

#[test]
fn finishing_without_a_transaction_is_an_error() {
    let env = isolate();
    assert!(matches!(transaction::commit(), Err(Error::InvalidState { .. })));
    assert!(matches!(transaction::rollback(), Err(Error::InvalidState { .. })));
    assert_eq!(env.driver.total_calls(), 0);
}

#[test]
fn outer_rollback_undoes_committed_inner_writes() {
    let env = isolate();

    transaction::begin().unwrap();
    create::<Article>(row! { "title" => "One" });
    create::<Article>(row! { "title" => "Two" });
    assert_eq!(env.driver.rows("articles").len(), 2);
    transaction::rollback().unwrap();

    assert!(env.driver.rows("articles").is_empty());
    assert_eq!(env.driver.calls(DriverCall::Begin), 1);
    assert_eq!(env.driver.calls(DriverCall::Commit), 0);
}

#[test]
fn inner_rollback_leaves_the_decision_to_the_outer_level() {
    let env = isolate();

    transaction::begin().unwrap();
    create::<Team>(row! { "name" => "Kept" });
    transaction::begin().unwrap();
    create::<Team>(row! { "name" => "Also kept" });
    transaction::rollback().unwrap();
    assert_eq!(transaction::depth(), 1);
    transaction::commit().unwrap();

    assert_eq!(env.driver.rows("teams").len(), 2);
    assert_eq!(env.driver.calls(DriverCall::Commit), 1);
    assert_eq!(env.driver.calls(DriverCall::Rollback), 0);
}

#[test]
fn external_transaction_is_adopted_and_left_open() {
    let env = isolate();
    env.driver.set_in_transaction(true);

    create::<Article>(row! { "title" => "Draft" });

    assert_eq!(transaction::depth(), 0);
    assert_eq!(env.driver.calls(DriverCall::Begin), 0);
    assert_eq!(env.driver.calls(DriverCall::Commit), 0);
    assert_eq!(env.driver.rows("articles").len(), 1);

    transaction::begin().unwrap();
    assert_eq!(transaction::depth(), 2);
    transaction::begin().unwrap();
    transaction::commit().unwrap();
    transaction::commit().unwrap();
    assert_eq!(transaction::depth(), 0);
    assert_eq!(env.driver.calls(DriverCall::Commit), 0);
}

#[test]
fn transactional_type_commits_its_own_level() {
    let env = isolate();
    let mut article = create::<Article>(row! { "title" => "Draft" });
    article.set(row! { "title" => "Final" }).unwrap();
    article.delete().unwrap();

    assert_eq!(env.driver.calls(DriverCall::Begin), 3);
    assert_eq!(env.driver.calls(DriverCall::Commit), 3);
    assert_eq!(transaction::depth(), 0);
}

#[test]
fn refused_write_rolls_back_its_level() {
    let env = isolate();
    let mut article = Article::new().unwrap();
    assert!(!article.create(row! { "title" => "" }).unwrap());

    assert_eq!(env.driver.calls(DriverCall::Begin), 1);
    assert_eq!(env.driver.calls(DriverCall::Rollback), 1);
    assert_eq!(env.driver.calls(DriverCall::Create), 0);
    assert_eq!(transaction::depth(), 0);
}

#[test]
fn save_related_runs_in_one_transaction() {
    let env = isolate();
    let mut team = create::<Team>(row! { "name" => "Core" });
    env.driver.reset_calls();

    let mut ada = Person::new().unwrap();
    ada.stage("name", "Ada");
    assert!(team.save_related("members", &mut ada).unwrap());
    assert_eq!(ada.get("team_id"), Value::Int(1));
    assert_eq!(env.driver.calls(DriverCall::Begin), 1);
    assert_eq!(env.driver.calls(DriverCall::Commit), 1);

    let mut nameless = Person::new().unwrap();
    assert!(!team.save_related("members", &mut nameless).unwrap());
    assert!(nameless.errors().has_code("required"));
    assert_eq!(env.driver.calls(DriverCall::Rollback), 1);
    assert_eq!(env.driver.rows("persons").len(), 1);
    assert_eq!(transaction::depth(), 0);
}

#[test]
fn driver_error_inside_nested_levels_unwinds_the_depth() {
    let env = isolate();
    env.driver.fail_on(DriverCall::Update);
    let mut article = create::<Article>(row! { "title" => "Draft" });

    transaction::begin().unwrap();
    assert!(article.set(row! { "title" => "Final" }).is_err());
    assert_eq!(transaction::depth(), 1);
    transaction::rollback().unwrap();

    assert_eq!(transaction::depth(), 0);
    assert_eq!(env.driver.calls(DriverCall::Rollback), 1);
}
