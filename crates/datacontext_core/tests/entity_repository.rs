mod common;

use common::{Client, Ticket};
use datacontext_core::{
    DataContext, Predicate, PrimaryKeyStrategy, Query, RepoError, Repository, SchemaModel,
    SortKey,
};
use std::cell::Cell;
use std::rc::Rc;
use uuid::Uuid;

fn memory_store() -> DataContext {
    DataContext::open_in_memory(SchemaModel::builtin()).unwrap()
}

fn clients(ctx: &DataContext) -> Repository<'_, Client> {
    Repository::new(ctx, PrimaryKeyStrategy::Uuid).unwrap()
}

fn tickets(ctx: &DataContext) -> Repository<'_, Ticket> {
    Repository::new(ctx, PrimaryKeyStrategy::AutoNumber).unwrap()
}

fn seed_clients(repo: &Repository<'_, Client>) {
    for (name, city) in [("Bia", "Porto"), ("Ana", "Lisbon"), ("Caio", "Lisbon")] {
        repo.add(|client| {
            client.name = Some(name.to_string());
            client.city = Some(city.to_string());
        })
        .unwrap();
    }
}

fn names(records: &[Client]) -> Vec<&str> {
    records
        .iter()
        .map(|client| client.name.as_deref().unwrap_or(""))
        .collect()
}

#[test]
fn add_assigns_uuid_key_and_persists() {
    let ctx = memory_store();
    let repo = clients(&ctx);

    let client = repo
        .add(|client| {
            client.name = Some("Ana".to_string());
            client.birthday = Some("1990-04-01".to_string());
        })
        .unwrap();

    let id = client.client_id.clone().unwrap();
    assert_eq!(id.len(), 36);
    assert_eq!(Uuid::parse_str(&id).unwrap().to_string(), id);
    assert!(!ctx.has_pending_changes());
    assert_eq!(repo.find(&id).unwrap(), Some(client));
}

#[test]
fn uuid_keys_are_unique() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    let first = repo.add_default().unwrap();
    let second = repo.add_default().unwrap();
    assert_ne!(first.client_id, second.client_id);
    assert_eq!(repo.count(None).unwrap(), 2);
}

#[test]
fn create_returns_unstaged_record_with_key() {
    let ctx = memory_store();
    let repo = clients(&ctx);

    let mut client = repo.create().unwrap();
    assert!(client.client_id.is_some());
    assert_eq!(repo.count(None).unwrap(), 0);

    client.name = Some("Ana".to_string());
    repo.insert(&client).unwrap();
    ctx.save().unwrap();

    let stored = repo.find(client.client_id.as_ref().unwrap()).unwrap();
    assert_eq!(stored.and_then(|client| client.name).as_deref(), Some("Ana"));
}

#[test]
fn auto_number_uses_count_plus_one() {
    let ctx = memory_store();
    let repo = tickets(&ctx);

    let ids: Vec<i64> = (0..3)
        .map(|_| repo.add_default().unwrap().id.unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert!(repo.delete(&1).unwrap());
    match repo.add_default() {
        Err(RepoError::DuplicateKey { collection, .. }) => assert_eq!(collection, "Ticket"),
        other => panic!("expected duplicate key, got {other:?}"),
    }
    assert!(!ctx.has_pending_changes());
    assert_eq!(repo.count(None).unwrap(), 2);
}

#[test]
fn none_strategy_leaves_key_to_caller() {
    let ctx = memory_store();
    let repo: Repository<'_, Client> = Repository::new(&ctx, PrimaryKeyStrategy::None).unwrap();

    let mut client = repo.create().unwrap();
    assert_eq!(client.client_id, None);
    assert!(matches!(
        repo.insert(&client),
        Err(RepoError::MissingKey { .. })
    ));

    client.client_id = Some("manual".to_string());
    repo.insert(&client).unwrap();
    ctx.save().unwrap();
    assert!(repo.find(&"manual".to_string()).unwrap().is_some());
}

#[test]
fn custom_strategy_calls_generator() {
    let ctx = memory_store();
    let counter = Rc::new(Cell::new(100));
    let source = Rc::clone(&counter);
    let repo: Repository<'_, Ticket> = Repository::new(
        &ctx,
        PrimaryKeyStrategy::custom(move || {
            source.set(source.get() + 1);
            source.get()
        }),
    )
    .unwrap();

    assert_eq!(repo.add_default().unwrap().id, Some(101));
    assert_eq!(repo.add_default().unwrap().id, Some(102));
    assert_eq!(counter.get(), 102);
}

#[test]
fn unsupported_strategy_and_bad_collection_are_rejected() {
    let ctx = memory_store();

    let err = Repository::<Client>::new(&ctx, PrimaryKeyStrategy::AutoNumber)
        .err()
        .expect("string keys cannot auto-number");
    assert!(matches!(
        err,
        RepoError::UnsupportedKeyStrategy {
            strategy: "auto_number",
            ..
        }
    ));

    let err = Repository::<Ticket>::with_collection(&ctx, "bad name", PrimaryKeyStrategy::None)
        .err()
        .expect("collection names must be identifiers");
    assert!(matches!(err, RepoError::InvalidCollection(_)));
}

#[test]
fn filter_sort_and_first() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    seed_clients(&repo);

    let lisbon = repo
        .filter(
            &Predicate::eq("city", "Lisbon"),
            &[SortKey::descending("name")],
        )
        .unwrap();
    assert_eq!(names(&lisbon), vec!["Caio", "Ana"]);

    let all = repo.get_all(&[SortKey::ascending("name")]).unwrap();
    assert_eq!(names(&all), vec!["Ana", "Bia", "Caio"]);

    let first = repo
        .first(
            Some(&Predicate::starts_with("name", "C")),
            &[SortKey::ascending("name")],
        )
        .unwrap();
    assert_eq!(first.and_then(|client| client.name).as_deref(), Some("Caio"));

    let none = repo.first(Some(&Predicate::eq("city", "Faro")), &[]).unwrap();
    assert!(none.is_none());
}

#[test]
fn first_without_predicate_returns_some_record() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    assert!(repo.first(None, &[]).unwrap().is_none());

    seed_clients(&repo);
    assert!(repo.first(None, &[]).unwrap().is_some());
}

#[test]
fn query_pages_results() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    seed_clients(&repo);

    let page = repo
        .query(
            &Query::new()
                .sort(SortKey::ascending("name"))
                .limit(2)
                .offset(1),
        )
        .unwrap();
    assert_eq!(names(&page), vec!["Bia", "Caio"]);

    let tail = repo
        .query(&Query::new().sort(SortKey::ascending("name")).offset(2))
        .unwrap();
    assert_eq!(names(&tail), vec!["Caio"]);
}

#[test]
fn count_with_and_without_predicate() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    seed_clients(&repo);

    assert_eq!(repo.count(None).unwrap(), 3);
    assert_eq!(
        repo.count(Some(&Predicate::eq("city", "Lisbon"))).unwrap(),
        2
    );
    assert_eq!(
        repo.count(Some(&Predicate::in_list("name", ["Ana", "Bia"])))
            .unwrap(),
        2
    );
    assert_eq!(repo.count(Some(&Predicate::is_null("birthday"))).unwrap(), 3);
}

#[test]
fn update_applies_changes_and_commits() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    let client = repo
        .add(|client| client.name = Some("Ana".to_string()))
        .unwrap();
    let id = client.client_id.unwrap();

    let updated = repo
        .update(&id, |client| client.city = Some("Braga".to_string()))
        .unwrap()
        .unwrap();
    assert_eq!(updated.city.as_deref(), Some("Braga"));
    assert!(!ctx.has_pending_changes());
    assert_eq!(
        repo.find(&id).unwrap().and_then(|client| client.city).as_deref(),
        Some("Braga")
    );

    let missing = repo
        .update(&"nope".to_string(), |client| client.name = None)
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn delete_reports_presence() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    let id = repo.add_default().unwrap().client_id.unwrap();

    assert!(repo.delete(&id).unwrap());
    assert!(!repo.delete(&id).unwrap());
    assert!(repo.find(&id).unwrap().is_none());
    assert!(!repo.contains_key(&id).unwrap());
}

#[test]
fn clear_empties_only_its_collection() {
    let ctx = memory_store();
    let people = clients(&ctx);
    let work = tickets(&ctx);
    seed_clients(&people);
    work.add_default().unwrap();

    people.clear().unwrap();

    assert!(!ctx.has_pending_changes());
    assert_eq!(people.count(None).unwrap(), 0);
    assert_eq!(work.count(None).unwrap(), 1);
}

#[test]
fn duplicate_insert_fails_and_put_replaces() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    let mut client = repo
        .add(|client| client.name = Some("Ana".to_string()))
        .unwrap();

    assert!(matches!(
        repo.insert(&client),
        Err(RepoError::DuplicateKey { .. })
    ));
    ctx.rollback().unwrap();

    client.name = Some("Ana Maria".to_string());
    repo.put(&client).unwrap();
    ctx.save().unwrap();

    assert_eq!(repo.count(None).unwrap(), 1);
    let stored = repo.find(client.client_id.as_ref().unwrap()).unwrap();
    assert_eq!(stored, Some(client));
}

#[test]
fn failed_writes_leave_pending_state_untouched() {
    let ctx = memory_store();
    let repo: Repository<'_, Client> = Repository::new(&ctx, PrimaryKeyStrategy::None).unwrap();
    let with_key = |client: &mut Client| client.client_id = Some("k".to_string());

    repo.add(with_key).unwrap();
    assert!(matches!(
        repo.add(with_key),
        Err(RepoError::DuplicateKey { .. })
    ));
    assert!(!ctx.has_pending_changes());

    let staged = Client {
        client_id: Some("staged".to_string()),
        ..Client::default()
    };
    repo.insert(&staged).unwrap();
    assert!(matches!(
        repo.insert(&Client {
            client_id: Some("k".to_string()),
            ..Client::default()
        }),
        Err(RepoError::DuplicateKey { .. })
    ));
    assert!(ctx.has_pending_changes());
    ctx.save().unwrap();

    assert_eq!(repo.count(None).unwrap(), 2);
    assert!(repo.contains_key(&"staged".to_string()).unwrap());
}

#[test]
fn collections_are_isolated_by_name() {
    let ctx = memory_store();
    let archived: Repository<'_, Client> =
        Repository::with_collection(&ctx, "ArchivedClient", PrimaryKeyStrategy::None).unwrap();
    let active: Repository<'_, Client> =
        Repository::with_collection(&ctx, "Client", PrimaryKeyStrategy::None).unwrap();

    let record = Client {
        client_id: Some("same".to_string()),
        ..Client::default()
    };
    archived.insert(&record).unwrap();
    active.insert(&record).unwrap();
    ctx.save().unwrap();

    assert_eq!(archived.count(None).unwrap(), 1);
    assert_eq!(active.count(None).unwrap(), 1);
}

#[test]
fn malformed_predicates_are_query_errors() {
    let ctx = memory_store();
    let repo = clients(&ctx);
    seed_clients(&repo);

    let err = repo
        .filter(&Predicate::eq("name; DROP TABLE records", "x"), &[])
        .unwrap_err();
    assert!(matches!(err, RepoError::Query(_)));

    let err = repo.get_all(&[SortKey::ascending("")]).unwrap_err();
    assert!(matches!(err, RepoError::Query(_)));
    assert_eq!(repo.count(None).unwrap(), 3);
}

#[test]
fn undecodable_bodies_surface_as_invalid_data() {
    let ctx = memory_store();
    let foreign: Repository<'_, Client> =
        Repository::with_collection(&ctx, "Ticket", PrimaryKeyStrategy::Uuid).unwrap();
    foreign.add_default().unwrap();

    let err = tickets(&ctx).get_all(&[]).unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
}
