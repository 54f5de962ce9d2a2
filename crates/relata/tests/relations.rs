mod fixtures;

use fixtures::{Captain, Comment, Group, Person, Team, create, isolate};
use relata::prelude::*;
use relata::{DriverCall, Loaded, RelationKind, Relationship, registry, transaction};

// ============================================================================
// Belongs-to
// ============================================================================

#[test]
fn belongs_to_loads_lazily_and_caches() {
    let env = isolate();
    let team = create::<Team>(row! { "name" => "Core" });
    create::<Person>(row! { "name" => "Ada", "team_id" => team.id_value() });

    let person = Person::find_or_fail(1).unwrap();
    env.driver.reset_calls();

    let loaded = person.related("team").unwrap().expect("team");
    assert_eq!(loaded.get("name"), Value::from("Core"));
    assert_eq!(env.driver.calls(DriverCall::Query), 1);

    person.related("team").unwrap();
    assert_eq!(env.driver.calls(DriverCall::Query), 1);
    assert!(person.is_relation_loaded("team"));
}

#[test]
fn unset_foreign_key_is_an_empty_result_without_a_query() {
    let env = isolate();
    let person = create::<Person>(row! { "name" => "Ada" });
    env.driver.reset_calls();

    assert!(person.related("team").unwrap().is_none());
    assert_eq!(env.driver.total_calls(), 0);
}

#[test]
fn belongs_to_attach_writes_the_local_key() {
    let env = isolate();
    let mut person = create::<Person>(row! { "name" => "Ada" });
    let mut team = Team::new().unwrap();
    team.stage("name", "Core");

    assert!(person.attach("team", &mut team).unwrap());

    assert!(team.is_persisted());
    assert_eq!(env.driver.rows("persons")[0]["team_id"], Value::Int(1));
    assert_eq!(
        person.related("team").unwrap().map(|t| t.get("name")),
        Some(Value::from("Core"))
    );

    assert!(person.detach("team", None).unwrap());
    assert_eq!(env.driver.rows("persons")[0]["team_id"], Value::Null);
}

#[test]
fn restaging_the_key_drops_the_cached_relation() {
    let _env = isolate();
    create::<Team>(row! { "name" => "Core" });
    create::<Team>(row! { "name" => "Docs" });
    let mut person = create::<Person>(row! { "name" => "Ada", "team_id" => 1 });

    assert_eq!(
        person.related("team").unwrap().map(|t| t.get("name")),
        Some(Value::from("Core"))
    );
    person.stage("team_id", 2);
    assert!(!person.is_relation_loaded("team"));
    assert_eq!(
        person.related("team").unwrap().map(|t| t.get("name")),
        Some(Value::from("Docs"))
    );
}

#[test]
fn unknown_relation_is_a_config_error() {
    let _env = isolate();
    let person = create::<Person>(row! { "name" => "Ada" });
    assert!(matches!(person.related("boss"), Err(Error::Config(_))));
    assert!(matches!(
        person.related("groups"),
        Err(Error::Config(_))
    ));
}

// ============================================================================
// Has-one / has-many
// ============================================================================

#[test]
fn has_many_attach_and_detach() {
    let env = isolate();
    let mut team = create::<Team>(row! { "name" => "Core" });
    let mut ada = create::<Person>(row! { "name" => "Ada" });
    let mut grace = Person::new().unwrap();
    grace.stage("name", "Grace");

    assert!(team.attach("members", &mut ada).unwrap());
    assert!(team.attach("members", &mut grace).unwrap());
    assert!(grace.is_persisted());
    assert_eq!(team.related_many("members").unwrap().len(), 2);

    assert!(team.detach("members", Some(&mut ada)).unwrap());
    let names: Vec<Value> = team
        .related_many("members")
        .unwrap()
        .iter()
        .map(|p| p.get("name"))
        .collect();
    assert_eq!(names, vec![Value::from("Grace")]);

    assert!(team.detach("members", None).unwrap());
    assert!(team.related_many("members").unwrap().is_empty());
    assert!(
        env.driver
            .rows("persons")
            .iter()
            .all(|row| row["team_id"].is_null())
    );
}

#[test]
fn attaching_to_an_unsaved_owner_is_an_error() {
    let _env = isolate();
    let mut team = Team::new().unwrap();
    let mut ada = create::<Person>(row! { "name" => "Ada" });
    assert!(matches!(
        team.attach("members", &mut ada),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn has_many_sync_deletes_members_outside_the_set() {
    let env = isolate();
    let mut team = create::<Team>(row! { "name" => "Core" });
    for (id, name, team_id) in [(1_i64, "Ada", 1_i64), (2, "Grace", 1), (3, "Linus", 1), (4, "Barbara", 2)] {
        env.driver.insert_row(
            "persons",
            row! { "id" => id, "name" => name, "team_id" => team_id },
        );
    }

    assert!(team.sync("members", vec![Value::from(1), Value::from(4)]).unwrap());

    let rows = env.driver.rows("persons");
    let names: Vec<String> = rows.iter().map(|r| r["name"].to_string()).collect();
    assert_eq!(names, vec!["Ada", "Barbara"]);
    // Ids outside the relation are not pulled in.
    assert_eq!(rows[1]["team_id"], Value::Int(2));
    assert_eq!(team.related_many("members").unwrap().len(), 1);

    assert!(team.sync("members", Vec::new()).unwrap());
    assert_eq!(env.driver.rows("persons").len(), 1);
    assert!(team.related_many("members").unwrap().is_empty());
    assert_eq!(transaction::depth(), 0);
}

#[test]
fn has_one_resolves_a_single_model() {
    let _env = isolate();
    let mut team = create::<Team>(row! { "name" => "Core" });
    assert!(team.related("captain").unwrap().is_none());

    let captain = team
        .create_related("captain", row! { "name" => "Ada" })
        .unwrap();
    assert!(captain.is_persisted());
    assert_eq!(captain.get("team_id"), Value::Int(1));
    assert_eq!(
        team.related("captain").unwrap().map(|c| c.get("name")),
        Some(Value::from("Ada"))
    );

    let reloaded = Team::find_or_fail(1).unwrap();
    assert_eq!(
        reloaded.related("captain").unwrap().map(|c| c.id_value()),
        Some(Value::Int(1))
    );
    assert_eq!(Captain::query().count().unwrap(), 1);
}

#[test]
fn sync_is_refused_for_belongs_to() {
    let _env = isolate();
    let mut person = create::<Person>(row! { "name" => "Ada" });
    assert!(matches!(
        person.sync("team", vec![Value::from(1)]),
        Err(Error::Config(_))
    ));
}

// ============================================================================
// Belongs-to-many
// ============================================================================

#[test]
fn belongs_to_many_attach_uses_the_pivot_table() {
    let env = isolate();
    let mut person = create::<Person>(row! { "name" => "Ada" });
    let mut admins = create::<Group>(row! { "name" => "admins" });
    let mut staff = Group::new().unwrap();
    staff.stage("name", "staff");

    assert!(person.attach("groups", &mut admins).unwrap());
    assert!(person.attach("groups", &mut staff).unwrap());
    // Attaching twice keeps one link.
    assert!(person.attach("groups", &mut admins).unwrap());

    assert_eq!(
        env.driver.rows("group_person"),
        vec![
            row! { "person_id" => 1, "group_id" => 1 },
            row! { "person_id" => 1, "group_id" => 2 },
        ]
    );
    let mut names: Vec<String> = person
        .related_many("groups")
        .unwrap()
        .iter()
        .map(|g| g.get("name").to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["admins", "staff"]);

    let relation = person.relation("groups").unwrap();
    assert_eq!(relation.kind(), RelationKind::BelongsToMany);
}

#[test]
fn save_related_writes_pending_changes_of_a_persisted_model() {
    let env = isolate();
    let mut person = create::<Person>(row! { "name" => "Ada" });
    let mut group = create::<Group>(row! { "name" => "old" });
    group.stage("name", "new");

    assert!(person.save_related("groups", &mut group).unwrap());

    assert_eq!(env.driver.rows("groups")[0]["name"], Value::from("new"));
    assert!(group.unsaved().is_empty());
    assert_eq!(
        env.driver.rows("group_person"),
        vec![row! { "person_id" => 1, "group_id" => 1 }]
    );

    let mut team = create::<Team>(row! { "name" => "Core" });
    team.stage("name", "Platform");
    assert!(person.save_related("team", &mut team).unwrap());
    assert_eq!(env.driver.rows("teams")[0]["name"], Value::from("Platform"));
    assert_eq!(env.driver.rows("persons")[0]["team_id"], Value::Int(1));
}

#[test]
fn save_related_rolls_back_when_the_related_model_is_refused() {
    let env = isolate();
    let mut person = create::<Person>(row! { "name" => "Ada" });
    let mut team = create::<Team>(row! { "name" => "Core" });
    team.stage("name", Value::Null);
    env.driver.reset_calls();

    assert!(!person.save_related("team", &mut team).unwrap());
    assert!(person.get("team_id").is_null());
    assert_eq!(env.driver.rows("teams")[0]["name"], Value::from("Core"));
    assert_eq!(env.driver.calls(DriverCall::Update), 0);
    assert_eq!(transaction::depth(), 0);
}

#[test]
fn belongs_to_many_sync_and_detach() {
    let env = isolate();
    let mut person = create::<Person>(row! { "name" => "Ada" });
    for name in ["a", "b", "c"] {
        create::<Group>(row! { "name" => name });
    }

    assert!(person.sync("groups", vec![Value::from(1), Value::from(2), Value::from(2)]).unwrap());
    assert_eq!(env.driver.rows("group_person").len(), 2);

    assert!(person.sync("groups", vec![Value::from(2), Value::from(3)]).unwrap());
    let linked: Vec<Value> = env
        .driver
        .rows("group_person")
        .iter()
        .map(|row| row["group_id"].clone())
        .collect();
    assert_eq!(linked, vec![Value::Int(2), Value::Int(3)]);

    let mut third = Group::find_or_fail(3).unwrap();
    assert!(person.detach("groups", Some(&mut third)).unwrap());
    assert_eq!(person.related_many("groups").unwrap().len(), 1);

    assert!(person.detach("groups", None).unwrap());
    assert!(env.driver.rows("group_person").is_empty());
    assert!(person.related_many("groups").unwrap().is_empty());
}

// ============================================================================
// Polymorphic
// ============================================================================

#[test]
fn polymorphic_attach_writes_type_and_key() {
    let env = isolate();
    let mut team = create::<Team>(row! { "name" => "Core" });
    let mut comment = Comment::new().unwrap();
    comment.stage("body", "nice");

    assert!(comment.attach("subject", &mut team).unwrap());

    assert!(comment.is_persisted());
    let row = &env.driver.rows("comments")[0];
    assert_eq!(row["subject_type"], Value::from("team"));
    assert_eq!(row["subject_id"], Value::Int(1));

    let reloaded = Comment::find_or_fail(1).unwrap();
    let subject = reloaded.related("subject").unwrap().expect("subject");
    assert_eq!(subject.model_type().name(), "Team");
    assert_eq!(subject.get("name"), Value::from("Core"));
}

#[test]
fn unmapped_discriminator_resolves_to_nothing() {
    let _env = isolate();
    create::<Comment>(row! { "body" => "x", "subject_type" => "robot", "subject_id" => 1 });

    let comment = Comment::find_or_fail(1).unwrap();
    assert!(comment.related("subject").unwrap().is_none());
    assert!(matches!(
        comment.relation("subject").unwrap().target_type(&comment),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn attaching_an_unmapped_type_is_a_config_error() {
    let _env = isolate();
    let mut comment = create::<Comment>(row! { "body" => "x" });
    let mut group = create::<Group>(row! { "name" => "admins" });
    assert!(matches!(
        comment.attach("subject", &mut group),
        Err(Error::Config(_))
    ));
}

// ============================================================================
// Eager loading
// ============================================================================

fn seed_teams(env: &fixtures::Isolated, teams: i64, members_each: i64) {
    let mut person = 0;
    for team in 1..=teams {
        env.driver
            .insert_row("teams", row! { "id" => team, "name" => format!("team {}", team) });
        for _ in 0..members_each {
            person += 1;
            env.driver.insert_row(
                "persons",
                row! { "id" => person, "name" => format!("person {}", person), "team_id" => team },
            );
        }
    }
}

#[test]
fn eager_loading_costs_one_query_per_relation() {
    let env = isolate();
    seed_teams(&env, 50, 2);
    env.driver.reset_calls();

    let teams = Team::query().limit(50).with("members").execute().unwrap();

    assert_eq!(teams.len(), 50);
    assert_eq!(env.driver.calls(DriverCall::Query), 2);
    for team in &teams {
        assert!(team.is_relation_loaded("members"));
        let members = team.related_many("members").unwrap();
        assert_eq!(members.len(), 2);
        assert!(
            members
                .iter()
                .all(|m| m.get("team_id").loosely_eq(&team.id_value()))
        );
    }
    assert_eq!(env.driver.calls(DriverCall::Query), 2);
    assert_eq!(registry::lazy_loads(|t| t.stats().total_loads), 0);
}

#[test]
fn eager_loading_stays_at_one_query_past_the_page_size() {
    let env = isolate();
    seed_teams(&env, 50, 30);
    env.driver.reset_calls();

    let teams = Team::query().limit(50).with("members").execute().unwrap();

    assert_eq!(teams.len(), 50);
    assert_eq!(env.driver.calls(DriverCall::Query), 2);
    let members: usize = teams
        .iter()
        .map(|team| team.related_many("members").unwrap().len())
        .sum();
    assert_eq!(members, 1500);
}

#[test]
fn eager_belongs_to_shares_one_query() {
    let env = isolate();
    seed_teams(&env, 3, 4);
    env.driver.insert_row("persons", row! { "id" => 100, "name" => "loner" });
    env.driver.reset_calls();

    let people = Person::query().with("team").execute().unwrap();

    assert_eq!(people.len(), 13);
    assert_eq!(env.driver.calls(DriverCall::Query), 2);
    let loner = people.iter().find(|p| p.id_value() == Value::Int(100)).unwrap();
    assert!(loner.is_relation_loaded("team"));
    assert!(loner.related("team").unwrap().is_none());
    assert_eq!(
        people[0].related("team").unwrap().map(|t| t.get("name")),
        Some(Value::from("team 1"))
    );
}

#[test]
fn eager_loading_without_keys_skips_the_query() {
    let env = isolate();
    create::<Person>(row! { "name" => "Ada" });
    env.driver.reset_calls();

    let people = Person::query().with("team").execute().unwrap();

    assert_eq!(env.driver.calls(DriverCall::Query), 1);
    assert!(people[0].is_relation_loaded("team"));
    assert!(people[0].related("team").unwrap().is_none());
}

#[test]
fn eager_loading_many_to_many_and_polymorphic() {
    let env = isolate();
    let mut ada = create::<Person>(row! { "name" => "Ada" });
    let mut grace = create::<Person>(row! { "name" => "Grace" });
    let mut admins = create::<Group>(row! { "name" => "admins" });
    let mut staff = create::<Group>(row! { "name" => "staff" });
    ada.attach("groups", &mut admins).unwrap();
    ada.attach("groups", &mut staff).unwrap();
    grace.attach("groups", &mut staff).unwrap();

    let mut team = create::<Team>(row! { "name" => "Core" });
    let mut on_team = create::<Comment>(row! { "body" => "team" });
    on_team.attach("subject", &mut team).unwrap();
    let mut on_ada = create::<Comment>(row! { "body" => "ada" });
    on_ada.attach("subject", &mut ada).unwrap();
    create::<Comment>(row! { "body" => "none" });

    env.driver.reset_calls();
    let people = Person::query().sort("id asc").with("groups").execute().unwrap();
    assert_eq!(env.driver.calls(DriverCall::Query), 2);
    assert_eq!(people[0].related_many("groups").unwrap().len(), 2);
    assert_eq!(people[1].related_many("groups").unwrap().len(), 1);

    env.driver.reset_calls();
    let comments = Comment::query().sort("id asc").with("subject").execute().unwrap();
    // One query per distinct target type.
    assert_eq!(env.driver.calls(DriverCall::Query), 3);
    let subjects: Vec<Option<String>> = comments
        .iter()
        .map(|c| {
            c.related("subject")
                .unwrap()
                .map(|m| m.model_type().name().to_string())
        })
        .collect();
    assert_eq!(
        subjects,
        vec![Some("Team".to_string()), Some("Person".to_string()), None]
    );
}

#[test]
fn eager_loading_an_unknown_relation_is_a_config_error() {
    let _env = isolate();
    create::<Team>(row! { "name" => "Core" });
    let err = Team::query().with("sponsors").execute().unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn loaded_relations_are_serialized() {
    let _env = isolate();
    let mut team = create::<Team>(row! { "name" => "Core" });
    let mut ada = create::<Person>(row! { "name" => "Ada" });
    team.attach("members", &mut ada).unwrap();

    assert!(!team.to_array().contains_key("members"));
    team.related_many("members").unwrap();
    let json = team.to_json();
    assert_eq!(json["members"][0]["name"], "Ada");
}

// ============================================================================
// Lazy-load tracking
// ============================================================================

#[test]
fn lazy_loads_are_counted_per_relation() {
    let env = isolate();
    seed_teams(&env, 4, 1);
    registry::set_n1_threshold(3);

    let people = Person::query().execute().unwrap();
    for person in &people {
        person.related("team").unwrap();
    }

    let (count, stats) = registry::lazy_loads(|t| (t.count_for("Person", "team"), t.stats()));
    assert_eq!(count, 4);
    assert_eq!(stats.total_loads, 4);
    assert_eq!(stats.potential_n1, 1);
}

#[test]
fn loaded_slot_variants() {
    let _env = isolate();
    let team = create::<Team>(row! { "name" => "Core" });
    let one = Loaded::One(Some(Box::new(team.clone())));
    assert_eq!(one.len(), 1);
    assert_eq!(one.as_one().map(Model::id_value), Some(Value::Int(1)));
    assert!(Loaded::One(None).is_empty());
    assert_eq!(Loaded::Many(vec![team]).to_value().as_array().map(<[Value]>::len), Some(1));
}
