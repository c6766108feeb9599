mod fixtures;

use fixtures::{plain, seed, setup, setup_with};
use modelcache::{Attrs, CacheConfig, CacheError, InstanceStatus, Result, Value};

#[test]
fn test_find_uncached_object() -> Result<()> {
    let (store, mut cache) = setup();
    seed(&store, "PlainModel", vec![plain("1", None)]);

    let found = cache.get("PlainModel", [("id", "1")])?.expect("seeded row is cached");
    assert_eq!(cache.find("PlainModel", [("id", "1")])?, vec![found]);
    assert_eq!(cache.status(found)?, InstanceStatus::Persistent);

    // The column default was applied by the store
    assert_eq!(cache.value(found, "titel")?, &Value::from(""));
    assert_eq!(store.stats()?.loads, 1);
    Ok(())
}

#[test]
fn test_find_cached_object() -> Result<()> {
    let (store, mut cache) = setup();
    let created = cache.create("PlainModel", [("id", "1")])?;

    assert_eq!(cache.get("PlainModel", [("id", "1")])?, Some(created));
    assert_eq!(cache.find("PlainModel", [("id", "1")])?, vec![created]);
    assert_eq!(store.stats()?.loads, 1);
    Ok(())
}

#[test]
fn test_find_multiple_objects() -> Result<()> {
    let (store, mut cache) = setup();
    seed(&store, "PlainModel", vec![plain("1", Some("")), plain("2", Some(""))]);

    let result = cache.find("PlainModel", [("titel", "")])?;
    assert_eq!(result.len(), 2);

    let ids: Vec<&Value> = result
        .iter()
        .map(|handle| cache.value(*handle, "id"))
        .collect::<Result<_>>()?;
    assert_eq!(ids, vec![&Value::from("1"), &Value::from("2")]);
    Ok(())
}

#[test]
fn test_get_multiple_objects() {
    let (store, mut cache) = setup();
    seed(&store, "PlainModel", vec![plain("1", Some("")), plain("2", Some(""))]);

    match cache.get("PlainModel", [("titel", "")]) {
        Err(CacheError::MultipleResults { entity, count }) => {
            assert_eq!(entity, "PlainModel");
            assert_eq!(count, 2);
        }
        other => panic!("Expected MultipleResults, got {:?}", other),
    }
    assert!(cache.get_or_create("PlainModel", [("titel", "")]).is_err());
}

#[test]
fn test_non_existent_object() -> Result<()> {
    let (store, mut cache) = setup();
    seed(&store, "PlainModel", vec![plain("1", None)]);
    cache.create("PlainModel", [("id", "2")])?;

    assert_eq!(cache.get("PlainModel", [("id", "3")])?, None);
    assert!(cache.find("PlainModel", [("id", "3")])?.is_empty());
    Ok(())
}

#[test]
fn test_get_or_create_returns_same_instance() -> Result<()> {
    let (_store, mut cache) = setup();

    let first = cache.get_or_create("PlainModel", [("id", "7")])?;
    let second = cache.get_or_create("PlainModel", [("id", "7")])?;

    assert_eq!(first, second);
    assert_eq!(cache.len("PlainModel")?, 1);
    assert_eq!(cache.status(first)?, InstanceStatus::New);
    Ok(())
}

#[test]
fn test_empty_lookup_returns_every_instance() -> Result<()> {
    let (store, mut cache) = setup();
    seed(&store, "PlainModel", vec![plain("1", None), plain("2", None)]);
    let created = cache.create("PlainModel", [("id", "3")])?;

    let all = cache.find("PlainModel", Attrs::new())?;
    assert_eq!(all.len(), 3);
    assert_eq!(all[2], created);
    Ok(())
}

#[test]
fn test_lookup_validates_attributes() -> Result<()> {
    let (store, mut cache) = setup();

    assert!(matches!(
        cache.find("PlainModel", [("title", "typo")]),
        Err(CacheError::UnknownAttribute { .. })
    ));
    assert!(matches!(
        cache.find("PlainModel", Attrs::new().with("id", "1").with("id", "2")),
        Err(CacheError::DuplicateAttribute(_))
    ));
    assert!(matches!(
        cache.find("SequenceModel", [("id", "1")]),
        Err(CacheError::TypeMismatch(_))
    ));
    assert!(matches!(
        cache.create("Unknown", Attrs::new()),
        Err(CacheError::UnknownEntity(_))
    ));

    // Nothing reached the store
    assert_eq!(store.stats()?.loads, 0);
    Ok(())
}

#[test]
fn test_lookup_widens_integers_for_float_attributes() -> Result<()> {
    let (store, mut cache) = setup();
    seed(
        &store,
        "Manager",
        vec![vec![Value::Integer(1), Value::from("Ann"), Value::Float(5.0)]],
    );

    let manager = cache.get("Manager", [("budget", 5)])?.expect("joined row is cached");
    assert_eq!(cache.value(manager, "name")?, &Value::from("Ann"));
    Ok(())
}

#[test]
fn test_related_follows_foreign_keys() -> Result<()> {
    let (store, mut cache) = setup();
    seed(&store, "SequenceModel", vec![vec![Value::Integer(5), Value::from("five")]]);
    seed(&store, "LinkedModel", vec![vec![Value::from("a"), Value::Integer(5)]]);

    let linked = cache.get("LinkedModel", [("id", "a")])?.expect("seeded");
    let target = cache.related(linked, "sequence_model")?.expect("fk is set");

    assert_eq!(cache.value(target, "titel")?, &Value::from("five"));
    assert_eq!(store.stats()?.loads, 2);

    assert!(matches!(
        cache.related(linked, "partner"),
        Err(CacheError::UnknownRelationship { .. })
    ));
    Ok(())
}

#[test]
fn test_related_prefers_explicit_link() -> Result<()> {
    let (_store, mut cache) = setup();
    let target = cache.create("SequenceModel", [("titel", "new")])?;
    let linked = cache.create("LinkedModel", [("id", "a")])?;

    assert_eq!(cache.related(linked, "sequence_model")?, None);
    cache.link(linked, "sequence_model", Some(target))?;
    assert_eq!(cache.related(linked, "sequence_model")?, Some(target));

    let plain = cache.create("PlainModel", [("id", "p")])?;
    assert!(matches!(
        cache.link(linked, "sequence_model", Some(plain)),
        Err(CacheError::TypeMismatch(_))
    ));
    Ok(())
}

#[test]
fn test_cache_config_is_validated() {
    let registry = fixtures::registry();
    let store = fixtures::store(&registry);
    let config = CacheConfig::new(["PlainModel"]).sequence("PlainModel", "titel", "seq");

    assert!(matches!(
        modelcache::EntityCache::new(registry, config, store),
        Err(CacheError::InvalidConfig(_))
    ));
}

#[test]
fn test_setup_with_custom_config() -> Result<()> {
    let (_store, mut cache) = setup_with(CacheConfig::new(["PlainModel"]));
    cache.create("PlainModel", [("id", "1")])?;
    assert!(cache.is_loaded("PlainModel")?);
    assert!(!cache.is_loaded("SequenceModel")?);
    Ok(())
}
