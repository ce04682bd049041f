use std::sync::Arc;

use bayesgen::{AnalyzeOptions, Error, MixtureMetamodel, ModelConfig, Session, Value};

fn people_session() -> Session {
    let mut session = Session::open_in_memory().unwrap();
    session
        .host()
        .connection()
        .execute_batch(
            "CREATE TABLE people (name TEXT, age REAL, height REAL, city TEXT);
             INSERT INTO people VALUES ('ann', 31, 170, 'oslo');
             INSERT INTO people VALUES ('bob', 45, 182, 'rome');
             INSERT INTO people VALUES ('cy', 27, 165, 'oslo');
             INSERT INTO people VALUES ('di', NULL, 175, 'lima');
             INSERT INTO people VALUES ('ed', 52, 180, 'rome');
             INSERT INTO people VALUES ('flo', 38, 168, NULL);",
        )
        .unwrap();
    session
        .register_metamodel(Arc::new(MixtureMetamodel::new()))
        .unwrap();
    session
}

fn generator_count(session: &Session) -> usize {
    session.host().generators().unwrap().len()
}

#[test]
fn test_create_generator_records_columns() {
    let session = people_session();
    let g = session
        .create_generator_from_spec(
            "people_gen",
            "people",
            "mixture",
            "AGE numerical, city categorical",
        )
        .unwrap();

    assert_eq!(session.generator_id("people_gen").unwrap(), g);
    let record = session.generator(g).unwrap();
    assert_eq!(record.table, "people");
    assert_eq!(record.metamodel, "mixture");

    let columns = session.generator_columns(g).unwrap();
    let described: Vec<(i64, &str, &str)> = columns
        .iter()
        .map(|c| (c.colno, c.name.as_str(), c.stattype.as_str()))
        .collect();
    assert_eq!(
        described,
        vec![(1, "age", "numerical"), (3, "city", "categorical")]
    );
}

#[test]
fn test_schema_errors_create_nothing() {
    let session = people_session();
    for spec in [
        "age",
        "age numerical(3)",
        "age numerical, age categorical",
        "age ordinal",
    ] {
        let err = session
            .create_generator_from_spec("g", "people", "mixture", spec)
            .unwrap_err();
        assert!(err.is_schema_error(), "{}: {:?}", spec, err);
    }

    let err = session
        .create_generator_from_spec("g", "people", "mixture", "age (numerical")
        .unwrap_err();
    assert!(err.is_schema_error());
    assert_eq!(generator_count(&session), 0);
}

#[test]
fn test_failed_creation_leaves_no_record() {
    let session = people_session();

    let err = session
        .create_generator_from_spec("g", "people", "mixture", "age numerical, weight numerical")
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchColumn { .. }));

    let err = session
        .create_generator_from_spec("g", "nowhere", "mixture", "age numerical")
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchTable(_)));

    let err = session
        .create_generator_from_spec("g", "people", "crosscat", "age numerical")
        .unwrap_err();
    assert!(matches!(err, Error::NotRegistered(_)));

    assert_eq!(generator_count(&session), 0);
    let private: i64 = session
        .host()
        .connection()
        .query_row("SELECT COUNT(*) FROM mixture_generator", [], |r| r.get(0))
        .unwrap();
    assert_eq!(private, 0);
}

#[test]
fn test_duplicate_generator_name() {
    let session = people_session();
    session
        .create_generator_from_spec("g", "people", "mixture", "age numerical")
        .unwrap();
    let err = session
        .create_generator_from_spec("G", "people", "mixture", "height numerical")
        .unwrap_err();
    assert!(matches!(err, Error::GeneratorExists(_)));
    assert_eq!(generator_count(&session), 1);
}

#[test]
fn test_drop_generator_removes_everything() {
    let session = people_session();
    let g = session
        .create_generator_from_spec("g", "people", "mixture", "age numerical, city categorical")
        .unwrap();
    session
        .initialize_models(g, &[0, 1], &ModelConfig::new())
        .unwrap();
    session
        .insertmany(g, &[vec![Value::from(60.0), Value::from("oslo")]])
        .unwrap();

    session.drop_generator(g).unwrap();
    assert_eq!(generator_count(&session), 0);

    let conn = session.host().connection();
    for table in ["mixture_generator", "mixture_model", "mixture_observation"] {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0, "{} not empty", table);
    }

    let err = session.drop_generator(g).unwrap_err();
    assert!(matches!(err, Error::NoSuchGenerator(_)));
}

#[test]
fn test_queries_after_drop_models_fail() {
    let session = people_session();
    let g = session
        .create_generator_from_spec("g", "people", "mixture", "age numerical, height numerical")
        .unwrap();
    session
        .initialize_models(g, &[0, 1, 2], &ModelConfig::new())
        .unwrap();
    session
        .analyze_models(g, &AnalyzeOptions::default().with_iterations(2))
        .unwrap();
    assert!(session.column_dependence_probability(g, 1, 2).is_ok());

    session.drop_models(g, None).unwrap();

    let err = session.column_dependence_probability(g, 1, 2).unwrap_err();
    assert!(matches!(err, Error::NoModels(_)));
    assert!(err.is_lifecycle_violation());

    let err = session.analyze_models(g, &AnalyzeOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NoModels(_)));

    // Back to initialized.
    session
        .initialize_models(g, &[0], &ModelConfig::new())
        .unwrap();
    assert!(session.row_typicality(g, 1).is_ok());
}

#[test]
fn test_model_number_conflicts() {
    let session = people_session();
    let g = session
        .create_generator_from_spec("g", "people", "mixture", "age numerical")
        .unwrap();
    session
        .initialize_models(g, &[0, 1], &ModelConfig::new())
        .unwrap();

    let err = session
        .initialize_models(g, &[1, 2], &ModelConfig::new())
        .unwrap_err();
    assert!(matches!(err, Error::ModelExists { modelno: 1, .. }));

    // Nothing from the failed call was created.
    let err = session.drop_models(g, Some(&[2])).unwrap_err();
    assert!(matches!(err, Error::NoSuchModel { modelno: 2, .. }));

    // A partly unknown list drops nothing.
    let err = session.drop_models(g, Some(&[0, 5])).unwrap_err();
    assert!(matches!(err, Error::NoSuchModel { modelno: 5, .. }));
    session.drop_models(g, Some(&[0])).unwrap();
    session.drop_models(g, Some(&[1])).unwrap();
}

#[test]
fn test_unknown_model_option_rejected() {
    let session = people_session();
    let g = session
        .create_generator_from_spec("g", "people", "mixture", "age numerical")
        .unwrap();

    let config = ModelConfig::new().with("learning_rate", 0.1);
    let err = session.initialize_models(g, &[0], &config).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let config = ModelConfig::from_toml("initialization = \"single_view\"\nseed = 4").unwrap();
    session.initialize_models(g, &[0], &config).unwrap();
}

#[test]
fn test_rename_column() {
    let session = people_session();
    let g = session
        .create_generator_from_spec("g", "people", "mixture", "age numerical, city categorical")
        .unwrap();
    session
        .initialize_models(g, &[0], &ModelConfig::new())
        .unwrap();

    session
        .host()
        .connection()
        .execute_batch("ALTER TABLE people RENAME COLUMN city TO town")
        .unwrap();
    session.rename_column(g, "city", "town").unwrap();

    let names: Vec<String> = session
        .generator_columns(g)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["age", "town"]);

    // Models still see the renamed column.
    session
        .analyze_models(g, &AnalyzeOptions::default())
        .unwrap();
    assert!(session.column_typicality(g, 3).is_ok());

    let err = session.rename_column(g, "city", "place").unwrap_err();
    assert!(matches!(err, Error::NoSuchColumn { .. }));
}

#[test]
fn test_default_models_from_settings() {
    let settings = bayesgen::Settings::from_toml(
        r#"
        [models]
        count = 3

        [models.config]
        seed = 5
        "#,
    )
    .unwrap();
    let mut session = Session::from_settings(settings).unwrap();
    session
        .host()
        .connection()
        .execute_batch("CREATE TABLE t (x REAL); INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);")
        .unwrap();
    session
        .register_metamodel(Arc::new(MixtureMetamodel::new()))
        .unwrap();

    let g = session
        .create_generator_from_spec("g", "t", "mixture", "x numerical")
        .unwrap();
    session.initialize_default_models(g).unwrap();

    let err = session
        .initialize_models(g, &[2], &ModelConfig::new())
        .unwrap_err();
    assert!(matches!(err, Error::ModelExists { modelno: 2, .. }));
}
