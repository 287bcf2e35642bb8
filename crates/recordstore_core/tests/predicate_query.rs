use recordstore_core::{
    Entity, Predicate, QueryError, RecordRepository, SortSpec, SqliteStore, Store, StoreConfig,
    StoreError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Meta {
    views: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Book {
    title: String,
    year: i64,
    score: f64,
    series: Option<String>,
    meta: Meta,
}

impl Entity for Book {
    const ENTITY_NAME: &'static str = "Book";
}

fn seeded_store() -> SqliteStore {
    let store =
        SqliteStore::open(&StoreConfig::in_memory("books").with_entity(Book::ENTITY_NAME)).unwrap();
    let repo = RecordRepository::<Book>::try_new(&store).unwrap();
    let books = [
        ("Dune", 1965, 4.5, Some("Dune"), 90),
        ("Dune Messiah", 1969, 3.9, Some("Dune"), 40),
        ("Hyperion", 1989, 4.3, Some("Cantos"), 70),
        ("Neuromancer", 1984, 4.1, None, 70),
        ("Solaris", 1961, 4.0, None, 10),
    ];
    for (title, year, score, series, views) in books {
        repo.add(|book| {
            book.title = title.to_string();
            book.year = year;
            book.score = score;
            book.series = series.map(str::to_string);
            book.meta.views = views;
        })
        .unwrap();
    }
    store
}

fn titles(store: &SqliteStore, predicate: &Predicate, sort: Option<&SortSpec>) -> Vec<String> {
    RecordRepository::<Book>::try_new(store)
        .unwrap()
        .query(predicate, sort)
        .unwrap()
        .into_iter()
        .map(|book| book.into_inner().title)
        .collect()
}

#[test]
fn unsorted_query_follows_insertion_order() {
    let store = seeded_store();
    assert_eq!(
        titles(&store, &Predicate::True, None),
        vec!["Dune", "Dune Messiah", "Hyperion", "Neuromancer", "Solaris"]
    );
}

#[test]
fn sort_keys_apply_in_order_with_insertion_tiebreak() {
    let store = seeded_store();
    let sort = SortSpec::new().descending("meta.views");
    assert_eq!(
        titles(&store, &Predicate::True, Some(&sort)),
        vec!["Dune", "Hyperion", "Neuromancer", "Dune Messiah", "Solaris"]
    );

    let sort = SortSpec::new().descending("meta.views").ascending("year");
    assert_eq!(
        titles(&store, &Predicate::True, Some(&sort)),
        vec!["Dune", "Neuromancer", "Hyperion", "Dune Messiah", "Solaris"]
    );
}

#[test]
fn comparisons_and_ranges() {
    let store = seeded_store();
    assert_eq!(
        titles(
            &store,
            &Predicate::ge("year", 1965).and(Predicate::lt("year", 1985)),
            None
        ),
        vec!["Dune", "Dune Messiah", "Neuromancer"]
    );
    assert_eq!(
        titles(&store, &Predicate::gt("score", 4.2), None),
        vec!["Dune", "Hyperion"]
    );
}

#[test]
fn null_safe_equality_on_optional_attributes() {
    let store = seeded_store();
    assert_eq!(
        titles(&store, &Predicate::is_null("series"), None),
        vec!["Neuromancer", "Solaris"]
    );
    assert_eq!(
        titles(&store, &Predicate::eq("series", None::<String>), None),
        vec!["Neuromancer", "Solaris"]
    );
    assert_eq!(
        titles(&store, &Predicate::ne("series", "Dune"), None),
        vec!["Hyperion", "Neuromancer", "Solaris"]
    );
}

#[test]
fn membership_text_matching_and_negation() {
    let store = seeded_store();
    assert_eq!(
        titles(&store, &Predicate::one_of("year", [1961, 1989]), None),
        vec!["Hyperion", "Solaris"]
    );
    assert_eq!(
        titles(&store, &Predicate::contains("title", "er"), None),
        vec!["Hyperion", "Neuromancer"]
    );
    assert_eq!(
        titles(&store, &Predicate::begins_with("title", "Dune"), None),
        vec!["Dune", "Dune Messiah"]
    );
    assert!(titles(&store, &Predicate::begins_with("title", "dune"), None).is_empty());
    assert_eq!(
        titles(
            &store,
            &Predicate::begins_with("title", "Dune").negate(),
            None
        ),
        vec!["Hyperion", "Neuromancer", "Solaris"]
    );
}

#[test]
fn nested_attributes_and_disjunction() {
    let store = seeded_store();
    let predicate = Predicate::eq("meta.views", 70).or(Predicate::lt("meta.views", 20));
    assert_eq!(
        titles(&store, &predicate, None),
        vec!["Hyperion", "Neuromancer", "Solaris"]
    );
}

#[test]
fn limit_and_offset_page_through_results() {
    let store = seeded_store();
    let repo = RecordRepository::<Book>::try_new(&store).unwrap();
    let request = repo
        .fetch_request()
        .with_sort(SortSpec::new().ascending("year"))
        .with_limit(2)
        .with_offset(1);

    let page: Vec<String> = store
        .fetch::<Book>(&request)
        .unwrap()
        .into_iter()
        .map(|book| book.into_inner().title)
        .collect();
    assert_eq!(page, vec!["Dune", "Dune Messiah"]);
}

#[test]
fn non_finite_operands_are_rejected_before_matching_nulls() {
    let store = seeded_store();
    let repo = RecordRepository::<Book>::try_new(&store).unwrap();

    let err = repo
        .query(&Predicate::eq("series", f64::NAN), None)
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::QueryFailed(QueryError::InvalidValue { ref attribute, .. })
            if attribute == "series"
    ));

    let err = repo
        .update_all(
            &Predicate::one_of("series", [f64::INFINITY, f64::NAN]),
            |book| book.series = Some("Lost".to_string()),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::QueryFailed(QueryError::InvalidValue { .. })
    ));
    assert!(!store.has_changes());
    assert_eq!(
        titles(&store, &Predicate::is_null("series"), None),
        vec!["Neuromancer", "Solaris"]
    );
}
