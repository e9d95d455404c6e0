use super::*;
use crate::options::CursorPosition;
use crate::query::op;
use crate::schema::{FieldDef, IndexDef, SqlType};
use crate::store::Store;
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
    age: i64,
    email: String,
}

fn user(name: &str, age: i64, email: &str) -> User {
    User {
        name: name.into(),
        age,
        email: email.into(),
    }
}

struct FrozenClock(AtomicI64);

impl FrozenClock {
    fn at(millis: i64) -> Arc<Self> {
        Arc::new(FrozenClock(AtomicI64::new(millis)))
    }

    fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// `id001`, `id002`, ... so tests can name ids up front.
struct SeqIds(AtomicU64);

impl IdGenerator for SeqIds {
    fn next_id(&self) -> String {
        format!("id{:03}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

fn setup_store(clock: Arc<FrozenClock>) -> Store {
    Store::builder()
        .id_generator(Arc::new(SeqIds(AtomicU64::new(0))))
        .clock(clock)
        .open()
        .unwrap()
}

fn user_schema() -> SchemaDef<User> {
    SchemaDef::builder()
        .indexed("name", SqlType::Text)
        .indexed("age", SqlType::Integer)
        .unique("email", SqlType::Text)
        .build()
        .unwrap()
}

fn users(store: &Store) -> Collection<User> {
    store.collection("users", user_schema()).unwrap()
}

fn docs(store: &Store) -> Collection<Value> {
    store.collection("docs", SchemaDef::new()).unwrap()
}

fn all() -> Query<User> {
    Query::empty()
}

fn names(found: &[Document<User>]) -> Vec<&str> {
    found.iter().map(|d| d.data.name.as_str()).collect()
}

// ── Inserts ──────────────────────────────────────────────────────────

#[test]
fn test_insert_and_find_by_id() {
    let store = setup_store(FrozenClock::at(1_000));
    let users = users(&store);

    let doc = users.insert_one(user("A", 30, "a@x.com")).unwrap();
    assert_eq!(doc.id, "id001");
    assert_eq!((doc.created_at, doc.updated_at), (1_000, 1_000));

    let found = users.find_by_id("id001").unwrap().unwrap();
    assert_eq!(found, doc);
    assert!(users.find_by_id("nope").unwrap().is_none());
}

#[test]
fn test_unique_violation_names_field_and_value() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);

    users.insert_one(user("A", 30, "a@x.com")).unwrap();
    let err = users.insert_one(user("B", 30, "a@x.com")).unwrap_err();
    match err {
        DocliteError::UniqueConstraint { field, value } => {
            assert_eq!(field, "email");
            assert_eq!(value, "a@x.com");
        }
        other => panic!("expected UniqueConstraint, got {other:?}"),
    }
    assert_eq!(users.count(&all()).unwrap(), 1);
}

#[test]
fn test_unique_compound_index_violation() {
    let store = setup_store(FrozenClock::at(1));
    let schema: SchemaDef<User> = SchemaDef::builder()
        .indexed("name", SqlType::Text)
        .indexed("age", SqlType::Integer)
        .field(FieldDef::new("email", SqlType::Text))
        .index(IndexDef::new("name_age", ["name", "age"]).unique())
        .build()
        .unwrap();
    let users = store.collection("people", schema).unwrap();

    users.insert_one(user("A", 30, "a@x.com")).unwrap();
    users.insert_one(user("A", 31, "a@x.com")).unwrap();
    let err = users.insert_one(user("A", 30, "b@x.com")).unwrap_err();
    assert!(
        matches!(&err, DocliteError::UniqueConstraint { field, value } if field == "name, age" && value == "A, 30"),
        "{err:?}"
    );
}

#[test]
fn test_insert_many_is_atomic() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);

    let err = users
        .insert_many(vec![
            user("A", 1, "a@x.com"),
            user("B", 2, "b@x.com"),
            user("C", 3, "a@x.com"),
        ])
        .unwrap_err();
    assert!(matches!(err, DocliteError::UniqueConstraint { .. }));
    assert_eq!(users.count(&all()).unwrap(), 0);

    let result = users
        .insert_many(vec![user("A", 1, "a@x.com"), user("B", 2, "b@x.com")])
        .unwrap();
    assert_eq!(result.inserted_count, 2);
    assert_eq!(names(&result.documents), vec!["A", "B"]);
    assert_eq!(users.insert_many(Vec::new()).unwrap().inserted_count, 0);
}

#[test]
fn test_validation_rejects_before_write() {
    let store = setup_store(FrozenClock::at(1));
    let schema: SchemaDef<Value> = SchemaDef::builder()
        .field(FieldDef::new("name", SqlType::Text).nullable(false))
        .field(FieldDef::new("age", SqlType::Integer))
        .build()
        .unwrap();
    let people = store.collection("people", schema).unwrap();

    let err = people.insert_one(json!({"age": 3})).unwrap_err();
    assert!(matches!(err, DocliteError::Validation { field: Some(ref f), .. } if f == "name"));
    let err = people.insert_one(json!({"name": "A", "age": "old"})).unwrap_err();
    assert!(matches!(err, DocliteError::Validation { field: Some(ref f), .. } if f == "age"));
    let err = people.insert_one(json!("not an object")).unwrap_err();
    assert!(matches!(err, DocliteError::Validation { field: None, .. }));
    assert_eq!(people.count(&Query::empty()).unwrap(), 0);
}

#[test]
fn test_validate_hook_rewrites_payload() {
    let store = setup_store(FrozenClock::at(1));
    let schema: SchemaDef<User> = SchemaDef::builder()
        .unique("email", SqlType::Text)
        .validate(|mut u: User| {
            u.email = u.email.to_lowercase();
            Ok(u)
        })
        .build()
        .unwrap();
    let users = store.collection("users", schema).unwrap();

    let doc = users.insert_one(user("A", 1, "A@X.COM")).unwrap();
    assert_eq!(doc.data.email, "a@x.com");
    let err = users.insert_one(user("B", 2, "a@X.com")).unwrap_err();
    assert!(matches!(err, DocliteError::UniqueConstraint { .. }));
}

// ── Reads ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    name: String,
    price: i64,
}

#[test]
fn test_price_range_sorted() {
    let store = setup_store(FrozenClock::at(1));
    let schema: SchemaDef<Product> = SchemaDef::builder()
        .indexed("price", SqlType::Integer)
        .build()
        .unwrap();
    let products = store.collection("products", schema).unwrap();
    // Inserted out of price order so the sort does the work.
    for price in [70, 10, 100, 40, 30, 90, 60, 20, 80, 50] {
        products
            .insert_one(Product {
                name: format!("p{price}"),
                price,
            })
            .unwrap();
    }

    let query = Query::gte("price", 30).and_also(Query::lt("price", 70));
    let found = products
        .find(&query, &QueryOptions::new().sort_asc("price"))
        .unwrap();
    let prices: Vec<i64> = found.iter().map(|d| d.data.price).collect();
    assert_eq!(prices, vec![30, 40, 50, 60]);

    let page = products
        .find(&query, &QueryOptions::new().sort_asc("price").skip(1).limit(2))
        .unwrap();
    assert_eq!(page.iter().map(|d| d.data.price).collect::<Vec<_>>(), vec![40, 50]);

    let tail = products
        .find(&query, &QueryOptions::new().sort_asc("price").skip(3))
        .unwrap();
    assert_eq!(tail.iter().map(|d| d.data.price).collect::<Vec<_>>(), vec![60]);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Player {
    name: String,
    score: Option<i64>,
}

fn players(store: &Store, scores: &[(&str, Option<i64>)]) -> Collection<Player> {
    let schema: SchemaDef<Player> = SchemaDef::builder()
        .indexed("score", SqlType::Integer)
        .build()
        .unwrap();
    let players = store.collection("players", schema).unwrap();
    for (name, score) in scores {
        players
            .insert_one(Player {
                name: name.to_string(),
                score: *score,
            })
            .unwrap();
    }
    players
}

fn player_names(found: &[Document<Player>]) -> Vec<&str> {
    found.iter().map(|d| d.data.name.as_str()).collect()
}

#[test]
fn test_cursor_pagination_breaks_ties_by_id() {
    let store = setup_store(FrozenClock::at(1));
    let players = players(
        &store,
        &[("a", Some(50)), ("b", Some(40)), ("c", Some(40)), ("d", Some(30))],
    );
    let base = QueryOptions::new().sort_desc("score").limit(2);

    let first = players.find(&Query::empty(), &base).unwrap();
    assert_eq!(player_names(&first), vec!["a", "b"]);

    let b = &first[1];
    let after_b = base
        .clone()
        .after(CursorPosition::with_values(b.id.clone(), [json!(40)]));
    let second = players.find(&Query::empty(), &after_b).unwrap();
    assert_eq!(player_names(&second), vec!["c", "d"]);

    // Without values the anchor document is read first.
    let after_b = base.clone().after(CursorPosition::new(b.id.clone()));
    let second = players.find(&Query::empty(), &after_b).unwrap();
    assert_eq!(player_names(&second), vec!["c", "d"]);
}

#[test]
fn test_before_cursor_keeps_requested_order() {
    let store = setup_store(FrozenClock::at(1));
    let players = players(
        &store,
        &[("a", Some(50)), ("b", Some(40)), ("c", Some(40)), ("d", Some(30))],
    );
    let all = players
        .find(&Query::empty(), &QueryOptions::new().sort_desc("score"))
        .unwrap();
    let d = &all[3];

    let page = players
        .find(
            &Query::empty(),
            &QueryOptions::new()
                .sort_desc("score")
                .limit(2)
                .before(CursorPosition::new(d.id.clone())),
        )
        .unwrap();
    assert_eq!(player_names(&page), vec!["b", "c"]);
}

#[test]
fn test_cursor_over_null_sort_values() {
    let store = setup_store(FrozenClock::at(1));
    let players = players(
        &store,
        &[("a", None), ("b", Some(10)), ("c", None), ("d", Some(5))],
    );
    let opts = QueryOptions::new().sort_asc("score");
    let all = players.find(&Query::empty(), &opts).unwrap();
    // NULL sorts first ascending, ties by id.
    assert_eq!(player_names(&all), vec!["a", "c", "d", "b"]);

    let page = players
        .find(
            &Query::empty(),
            &opts.clone().limit(2).after(CursorPosition::new(all[0].id.clone())),
        )
        .unwrap();
    assert_eq!(player_names(&page), vec!["c", "d"]);

    let desc = QueryOptions::new().sort_desc("score");
    let page = players
        .find(
            &Query::empty(),
            &desc.after(CursorPosition::new(all[3].id.clone())),
        )
        .unwrap();
    assert_eq!(player_names(&page), vec!["d", "a", "c"]);
}

#[test]
fn test_cursor_with_unknown_anchor() {
    let store = setup_store(FrozenClock::at(1));
    let players = players(&store, &[("a", Some(1))]);
    let err = players
        .find(
            &Query::empty(),
            &QueryOptions::new()
                .sort_asc("score")
                .after(CursorPosition::new("missing")),
        )
        .unwrap_err();
    assert!(matches!(err, DocliteError::NotFound { ref id, .. } if id == "missing"));
}

#[test]
fn test_select_then_omit() {
    let store = setup_store(FrozenClock::at(1));
    let docs = docs(&store);
    docs.insert_one(json!({"name": "A", "age": 3, "address": {"city": "Oslo", "zip": "0150"}}))
        .unwrap();

    let found = docs
        .find_one(
            &Query::empty(),
            &QueryOptions::new().select(["name", "age", "address.city", "_id"]).omit(["age"]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(found.id, "id001");
    assert_eq!(found.data, json!({"name": "A", "address": {"city": "Oslo"}}));

    let found = docs
        .find_one(&Query::empty(), &QueryOptions::new().omit(["address", "_id"]))
        .unwrap()
        .unwrap();
    assert_eq!(found.id, "id001");
    assert_eq!(found.data, json!({"name": "A", "age": 3}));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Contact {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[test]
fn test_projection_on_typed_collection() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users.insert_one(user("A", 30, "a@x.com")).unwrap();
    let select_name = QueryOptions::new().select(["name"]);

    let err = users.find(&all(), &select_name).unwrap_err();
    assert!(
        matches!(&err, DocliteError::InvalidOperation(msg) if msg.contains("find_projected")),
        "{err:?}"
    );

    let found = users.find_projected(&all(), &select_name).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "id001");
    assert_eq!(found[0].data, json!({"name": "A"}));

    let found = users
        .find_projected(&all(), &QueryOptions::new().omit(["email"]))
        .unwrap();
    assert_eq!(found[0].data, json!({"name": "A", "age": 30}));

    // Optional fields can be projected away without leaving `T`.
    let contacts: Collection<Contact> = store.collection("contacts", SchemaDef::new()).unwrap();
    contacts
        .insert_one(Contact {
            name: "B".into(),
            email: Some("b@x.com".into()),
        })
        .unwrap();
    let found = contacts
        .find(&Query::empty(), &QueryOptions::new().omit(["email"]))
        .unwrap();
    assert_eq!(
        found[0].data,
        Contact {
            name: "B".into(),
            email: None
        }
    );
}

#[test]
fn test_search() {
    let store = setup_store(FrozenClock::at(1));
    let docs = docs(&store);
    docs.insert_one(json!({"title": "Rust 100%", "text": "x"})).unwrap();
    docs.insert_one(json!({"title": "rusty", "text": "y"})).unwrap();
    docs.insert_one(json!({"title": "go", "text": "RUST"})).unwrap();

    let found = docs
        .find(&Query::empty(), &QueryOptions::new().search("rust", ["title", "text"]))
        .unwrap();
    assert_eq!(found.len(), 3);

    let found = docs
        .find(
            &Query::empty(),
            &QueryOptions::new().search_with("Rust", ["title", "text"], true),
        )
        .unwrap();
    assert_eq!(found.len(), 1);

    docs.insert_one(json!({"title": "ÉCOLE", "text": "z"})).unwrap();
    let found = docs
        .find(&Query::empty(), &QueryOptions::new().search("école", ["title"]))
        .unwrap();
    assert_eq!(found.len(), 1);

    // `%` is matched literally.
    let found = docs
        .find(&Query::empty(), &QueryOptions::new().search("0%", ["title"]))
        .unwrap();
    assert_eq!(found.len(), 1);

    let err = docs
        .find(&Query::empty(), &QueryOptions::new().search("x", Vec::<String>::new()))
        .unwrap_err();
    assert!(matches!(err, DocliteError::InvalidOperation(_)));
}

#[test]
fn test_array_operators_end_to_end() {
    let store = setup_store(FrozenClock::at(1));
    let docs = docs(&store);
    docs.insert_one(json!({"name": "A", "tags": ["x", "y"], "items": [{"sku": "s1", "qty": 1}]}))
        .unwrap();
    docs.insert_one(json!({"name": "B", "tags": ["x"], "items": [{"sku": "s1", "qty": 5}]}))
        .unwrap();

    let count = |q: Query<Value>| docs.count(&q).unwrap();
    assert_eq!(count(op::all(["x", "y"]).bind("tags")), 1);
    assert_eq!(count(op::size(1).bind("tags")), 1);
    assert_eq!(count(op::at(0, "x").bind("tags")), 2);
    assert_eq!(count(op::elem_match(op::eq("y").on_element()).bind("tags")), 1);
    let element = Query::<Value>::and([Query::eq("sku", "s1"), Query::gt("qty", 2)]);
    assert_eq!(count(op::elem_match(element).bind("items")), 1);
}

#[test]
fn test_ne_matches_missing_fields() {
    let store = setup_store(FrozenClock::at(1));
    let docs = docs(&store);
    docs.insert_one(json!({"role": "admin"})).unwrap();
    docs.insert_one(json!({"role": "member"})).unwrap();
    docs.insert_one(json!({})).unwrap();

    assert_eq!(docs.count(&Query::ne("role", "admin")).unwrap(), 2);
    assert_eq!(docs.count(&Query::eq("role", Value::Null)).unwrap(), 1);
    assert_eq!(docs.count(&Query::not_in("role", ["admin"])).unwrap(), 2);
    assert_eq!(docs.count(&Query::is_in("role", Vec::<Value>::new())).unwrap(), 0);
}

#[test]
fn test_find_by_ids_exists_and_count() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users
        .insert_many(vec![
            user("A", 30, "a@x.com"),
            user("B", 40, "b@x.com"),
            user("C", 30, "c@x.com"),
        ])
        .unwrap();

    let found = users.find_by_ids(&["id003", "missing", "id001"]).unwrap();
    assert_eq!(names(&found), vec!["C", "A"]);

    assert!(users.exists(&Query::eq("age", 40)).unwrap());
    assert!(!users.exists(&Query::eq("age", 41)).unwrap());
    assert_eq!(users.count(&Query::eq("age", 30)).unwrap(), 2);
    assert_eq!(users.count(&all()).unwrap(), 3);
    assert_eq!(users.find_all().unwrap().len(), 3);
}

#[test]
fn test_distinct() {
    let store = setup_store(FrozenClock::at(1));
    let docs = docs(&store);
    for v in [json!({"age": 40}), json!({"age": 30}), json!({"age": 40}), json!({})] {
        docs.insert_one(v).unwrap();
    }
    assert_eq!(docs.distinct("age", None).unwrap(), vec![json!(30), json!(40)]);
    assert_eq!(
        docs.distinct("age", Some(&Query::gt("age", 35))).unwrap(),
        vec![json!(40)]
    );
    assert!(docs.distinct("bad name", None).is_err());
}

#[test]
fn test_distinct_keeps_payload_types() {
    let store = setup_store(FrozenClock::at(1));
    let docs = docs(&store);
    docs.insert_one(json!({"active": true, "tags": ["a", "b"], "meta": {"k": 1}}))
        .unwrap();
    docs.insert_one(json!({"active": false, "tags": ["c"], "meta": {"k": 1}}))
        .unwrap();
    docs.insert_one(json!({"active": true, "tags": ["c"]})).unwrap();

    assert_eq!(
        docs.distinct("active", None).unwrap(),
        vec![json!(false), json!(true)]
    );
    assert_eq!(
        docs.distinct("tags", None).unwrap(),
        vec![json!(["a", "b"]), json!(["c"])]
    );
    assert_eq!(docs.distinct("meta", None).unwrap(), vec![json!({"k": 1})]);
    assert_eq!(
        docs.distinct("_id", Some(&Query::eq("active", true))).unwrap(),
        vec![json!("id001"), json!("id003")]
    );

    // An indexed boolean is stored as 0/1 but still reads back as a bool.
    let schema: SchemaDef<Value> = SchemaDef::builder()
        .indexed("active", SqlType::Boolean)
        .build()
        .unwrap();
    let flags = store.collection("flags", schema).unwrap();
    flags.insert_one(json!({"active": true})).unwrap();
    flags.insert_one(json!({"active": false})).unwrap();
    assert_eq!(
        flags.distinct("active", None).unwrap(),
        vec![json!(false), json!(true)]
    );
}

// ── Updates and deletes ──────────────────────────────────────────────

#[test]
fn test_update_one_many_and_by_id() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users
        .insert_many(vec![
            user("A", 30, "a@x.com"),
            user("B", 30, "b@x.com"),
            user("C", 50, "c@x.com"),
        ])
        .unwrap();

    let result = users
        .update_many(&Query::eq("age", 30), |mut u| {
            u.age += 1;
            u
        })
        .unwrap();
    assert_eq!((result.matched_count, result.modified_count), (2, 2));
    assert_eq!(users.count(&Query::eq("age", 31)).unwrap(), 2);

    let result = users
        .update_one(&Query::eq("age", 31), |mut u| {
            u.name = "first".into();
            u
        })
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(users.find_by_id("id001").unwrap().unwrap().data.name, "first");

    let result = users.update_one(&Query::eq("age", 99), |u| u).unwrap();
    assert_eq!(result, UpdateResult::default());

    let updated = users
        .update_by_id("id003", |mut u| {
            u.age = 51;
            u
        })
        .unwrap();
    assert_eq!(updated.data.age, 51);
    let err = users.update_by_id("missing", |u| u).unwrap_err();
    assert!(matches!(err, DocliteError::NotFound { .. }));
}

#[test]
fn test_update_many_rolls_back_on_unique_violation() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users
        .insert_many(vec![user("A", 1, "a@x.com"), user("B", 1, "b@x.com")])
        .unwrap();

    let err = users
        .update_many(&all(), |mut u| {
            u.email = "same@x.com".into();
            u.age = 2;
            u
        })
        .unwrap_err();
    assert!(matches!(err, DocliteError::UniqueConstraint { .. }));
    assert_eq!(users.count(&Query::eq("age", 1)).unwrap(), 2);
}

#[test]
fn test_replace_one_and_by_id() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users.insert_one(user("A", 30, "a@x.com")).unwrap();

    let result = users
        .replace_one(&Query::eq("name", "A"), user("A2", 31, "a2@x.com"), ReplaceOptions::default())
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(users.find_by_id("id001").unwrap().unwrap().data.name, "A2");

    let result = users
        .replace_one(&Query::eq("name", "Z"), user("Z", 1, "z@x.com"), ReplaceOptions::default())
        .unwrap();
    assert_eq!(result, UpdateResult::default());

    let result = users
        .replace_one(
            &Query::eq("name", "Z"),
            user("Z", 1, "z@x.com"),
            ReplaceOptions { upsert: true },
        )
        .unwrap();
    assert_eq!(result.upserted_id.as_deref(), Some("id002"));

    let replaced = users.replace_by_id("id002", user("Y", 2, "y@x.com")).unwrap();
    assert_eq!(replaced.id, "id002");
    assert!(users.replace_by_id("missing", user("Q", 0, "q@x.com")).is_err());
}

#[test]
fn test_deletes() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users
        .insert_many(vec![
            user("A", 30, "a@x.com"),
            user("B", 30, "b@x.com"),
            user("C", 40, "c@x.com"),
            user("D", 50, "d@x.com"),
        ])
        .unwrap();

    assert_eq!(users.delete_one(&Query::eq("age", 30)).unwrap().deleted_count, 1);
    assert!(users.find_by_id("id001").unwrap().is_none());
    assert_eq!(users.delete_many(&Query::gte("age", 30)).unwrap().deleted_count, 3);
    assert_eq!(users.delete_many(&all()).unwrap().deleted_count, 0);

    let doc = users.insert_one(user("E", 1, "e@x.com")).unwrap();
    assert!(users.delete_by_id(&doc.id).unwrap());
    assert!(!users.delete_by_id(&doc.id).unwrap());
}

// ── Timestamps ───────────────────────────────────────────────────────

#[test]
fn test_updated_at_strictly_advances() {
    let clock = FrozenClock::at(5_000);
    let store = setup_store(Arc::clone(&clock));
    let users = users(&store);

    let doc = users.insert_one(user("A", 1, "a@x.com")).unwrap();
    let bump = |u: User| User { age: u.age + 1, ..u };
    let first = users.update_by_id(&doc.id, bump).unwrap();
    let second = users.update_by_id(&doc.id, bump).unwrap();
    assert_eq!(first.updated_at, 5_001);
    assert_eq!(second.updated_at, 5_002);
    assert_eq!(second.created_at, 5_000);

    clock.set(9_000);
    let third = users.update_by_id(&doc.id, bump).unwrap();
    assert_eq!(third.updated_at, 9_000);
    assert_eq!(users.find_by_id(&doc.id).unwrap().unwrap().updated_at, 9_000);

    let recent = users.find(&Query::gte("updatedAt", 9_000), &QueryOptions::new()).unwrap();
    assert_eq!(recent.len(), 1);
}

#[test]
fn test_timestamps_disabled() {
    let store = setup_store(FrozenClock::at(5_000));
    let schema: SchemaDef<Value> = SchemaDef::builder().timestamps(false).build().unwrap();
    let notes = store.collection("notes", schema).unwrap();

    let doc = notes.insert_one(json!({"text": "hi"})).unwrap();
    assert_eq!((doc.created_at, doc.updated_at), (0, 0));
    let updated = notes.update_by_id(&doc.id, |_| json!({"text": "bye"})).unwrap();
    assert_eq!(updated.updated_at, 0);
    assert_eq!(notes.find_by_id(&doc.id).unwrap().unwrap().data, json!({"text": "bye"}));

    let err = notes.count(&Query::gt("createdAt", 0)).unwrap_err();
    assert!(matches!(err, DocliteError::Query { sql: None, .. }));
    assert!(!store
        .engine()
        .table_columns("notes")
        .unwrap()
        .contains(&"createdAt".to_string()));
}

// ── Find-and-modify ──────────────────────────────────────────────────

#[test]
fn test_find_one_and_update_before_and_after() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users.insert_one(user("A", 30, "a@x.com")).unwrap();
    let birthday = |mut u: User| {
        u.age += 1;
        u
    };

    let before = users
        .find_one_and_update(&Query::eq("name", "A"), birthday, FindAndModifyOptions::new())
        .unwrap()
        .unwrap();
    assert_eq!(before.data.age, 30);
    assert_eq!(users.find_by_id(&before.id).unwrap().unwrap().data.age, 31);

    let after = users
        .find_one_and_update(
            &Query::eq("name", "A"),
            birthday,
            FindAndModifyOptions::new().return_after(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(after.data.age, 32);
    assert_eq!(users.find_by_id(&after.id).unwrap().unwrap(), after);

    let none = users
        .find_one_and_update(&Query::eq("name", "Z"), birthday, FindAndModifyOptions::new())
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn test_find_one_and_update_sort_picks_target() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users
        .insert_many(vec![
            user("A", 30, "a@x.com"),
            user("B", 50, "b@x.com"),
            user("C", 40, "c@x.com"),
        ])
        .unwrap();

    let picked = users
        .find_one_and_update(
            &all(),
            |mut u| {
                u.name = "oldest".into();
                u
            },
            FindAndModifyOptions::new().sort(SortKey::desc("age")),
        )
        .unwrap()
        .unwrap();
    assert_eq!(picked.data.name, "B");

    // Without a sort the lowest id is the target.
    let picked = users
        .find_one_and_update(&all(), |u| u, FindAndModifyOptions::new())
        .unwrap()
        .unwrap();
    assert_eq!(picked.data.name, "A");
}

#[test]
fn test_find_one_and_update_upsert() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    let set_name = |mut u: User| {
        u.name = "Z".into();
        u
    };

    let result = users
        .find_one_and_update(
            &Query::eq("name", "Z"),
            set_name,
            FindAndModifyOptions::new().upsert(user("", 0, "z@x.com")),
        )
        .unwrap();
    assert!(result.is_none());
    assert_eq!(users.count(&Query::eq("name", "Z")).unwrap(), 1);

    let result = users
        .find_one_and_update(
            &Query::eq("name", "Y"),
            |mut u: User| {
                u.name = "Y".into();
                u
            },
            FindAndModifyOptions::new()
                .upsert(user("", 0, "y@x.com"))
                .return_after(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.data, user("Y", 0, "y@x.com"));
}

#[test]
fn test_find_one_and_replace_and_delete() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users
        .insert_many(vec![user("A", 30, "a@x.com"), user("B", 40, "b@x.com")])
        .unwrap();

    let before = users
        .find_one_and_replace(
            &Query::eq("name", "A"),
            user("A2", 31, "a2@x.com"),
            FindAndModifyOptions::new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(before.data.name, "A");
    assert_eq!(users.find_by_id(&before.id).unwrap().unwrap().data.name, "A2");

    let err = users
        .find_one_and_replace(
            &all(),
            user("Q", 0, "q@x.com"),
            FindAndModifyOptions::new().upsert(user("Q", 0, "q@x.com")),
        )
        .unwrap_err();
    assert!(matches!(err, DocliteError::InvalidOperation(_)));

    let deleted = users
        .find_one_and_delete(&all(), FindAndModifyOptions::new().sort(SortKey::desc("age")))
        .unwrap()
        .unwrap();
    assert_eq!(deleted.data.name, "B");
    assert_eq!(users.count(&all()).unwrap(), 1);
    assert!(users
        .find_one_and_delete(&Query::eq("name", "nobody"), FindAndModifyOptions::new())
        .unwrap()
        .is_none());

    let err = users
        .find_one_and_delete(&all(), FindAndModifyOptions::new().upsert(user("Q", 0, "q@x.com")))
        .unwrap_err();
    assert!(matches!(err, DocliteError::InvalidOperation(_)));
}

// ── Transactions ─────────────────────────────────────────────────────

#[test]
fn test_transaction_rollback_returns_failing_error() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);

    let result: crate::error::Result<()> = store.transact(|| {
        users.insert_one(user("A", 1, "a@x.com"))?;
        users.insert_one(user("B", 2, "b@x.com"))?;
        users.update_many(&all(), |mut u| {
            u.age += 10;
            u
        })?;
        users.insert_one(user("C", 3, "a@x.com"))?;
        Ok(())
    });
    let err = result.unwrap_err();
    assert!(
        matches!(&err, DocliteError::UniqueConstraint { field, .. } if field == "email"),
        "{err:?}"
    );
    assert_eq!(users.count(&all()).unwrap(), 0);
}

#[test]
fn test_nested_operations_join_the_outer_transaction() {
    let store = setup_store(FrozenClock::at(1));
    let users = users(&store);
    users.insert_one(user("A", 1, "a@x.com")).unwrap();

    let result: crate::error::Result<()> = store.transact(|| {
        users.find_one_and_update(&all(), |mut u| {
            u.age = 99;
            u
        }, FindAndModifyOptions::new())?;
        Err(DocliteError::InvalidOperation("stop".into()))
    });
    assert!(result.is_err());
    assert_eq!(users.find_by_id("id001").unwrap().unwrap().data.age, 1);
}
