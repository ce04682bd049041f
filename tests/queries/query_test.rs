use std::sync::Arc;

use bayesgen::{
    AnalyzeOptions, Error, GeneratorId, MixtureMetamodel, ModelConfig, Session, Value,
    DEFAULT_MI_SAMPLES,
};

// Column numbers of table `m`.
const A: i64 = 0;
const B: i64 = 1;
const C: i64 = 2;

/// Two well separated groups; `b` tracks `a`, `c` labels the group.
/// Row 5 has no `b`.
fn analyzed_session() -> (Session, GeneratorId) {
    let mut session = Session::open_in_memory().unwrap();
    let conn = session.host().connection();
    conn.execute_batch("CREATE TABLE m (a REAL, b REAL, c TEXT)")
        .unwrap();
    for i in 0..30 {
        let low = i % 2 == 0;
        let a = if low { 1.0 } else { 10.0 } + (i % 3) as f64 * 0.1;
        let b = if i == 4 { None } else { Some(2.0 * a) };
        let c = if low { "low" } else { "high" };
        conn.execute(
            "INSERT INTO m VALUES (?1, ?2, ?3)",
            rusqlite::params![a, b, c],
        )
        .unwrap();
    }

    session
        .register_metamodel(Arc::new(MixtureMetamodel::new()))
        .unwrap();
    let g = session
        .create_generator_from_spec("m_gen", "m", "mixture", "a numerical, b numerical, c categorical")
        .unwrap();
    session
        .initialize_models(g, &[0, 1, 2, 3], &ModelConfig::new().with("seed", 3))
        .unwrap();
    session
        .analyze_models(g, &AnalyzeOptions::default().with_iterations(15))
        .unwrap();
    (session, g)
}

fn in_unit_interval(x: f64) -> bool {
    (0.0..=1.0).contains(&x)
}

#[test]
fn test_simulate_shape_and_constraints() {
    let (session, g) = analyzed_session();

    let samples = session
        .simulate(g, &[(A, Value::from(3.0))], &[B], 5)
        .unwrap();
    assert_eq!(samples.len(), 5);
    for sample in &samples {
        assert_eq!(sample.len(), 1);
        assert!(matches!(sample[0], Value::Number(x) if x.is_finite()));
    }

    // A constrained target column echoes its constraint.
    let samples = session
        .simulate(g, &[(C, Value::from("low"))], &[C, A], 3)
        .unwrap();
    for sample in &samples {
        assert_eq!(sample[0], Value::from("low"));
        assert!(matches!(sample[1], Value::Number(_)));
    }

    let categories = session.simulate(g, &[], &[C], 20).unwrap();
    for sample in &categories {
        assert!(sample[0] == Value::from("low") || sample[0] == Value::from("high"));
    }

    assert!(session.simulate(g, &[], &[A], 0).unwrap().is_empty());
}

#[test]
fn test_simulate_rejects_unknown_column() {
    let (session, g) = analyzed_session();
    let err = session.simulate(g, &[], &[7], 1).unwrap_err();
    assert!(matches!(err, Error::NoSuchColumnNumber { colno: 7, .. }));

    let err = session
        .simulate(g, &[(7, Value::from(1.0))], &[A], 1)
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchColumnNumber { .. }));
}

#[test]
fn test_insertmany_changes_value_probability() {
    let (session, g) = analyzed_session();
    let before = session
        .column_value_probability(g, C, &Value::from("zeta"))
        .unwrap();

    let rows: Vec<Vec<Value>> = (0..10)
        .map(|_| vec![Value::from(5.0), Value::from(10.0), Value::from("zeta")])
        .collect();
    session.insertmany(g, &rows).unwrap();

    let after = session
        .column_value_probability(g, C, &Value::from("zeta"))
        .unwrap();
    assert!(after > before, "{} <= {}", after, before);

    let stored: i64 = session
        .host()
        .connection()
        .query_row("SELECT COUNT(*) FROM mixture_observation", [], |r| r.get(0))
        .unwrap();
    assert_eq!(stored, 10);
}

#[test]
fn test_insertmany_validates_rows() {
    let (session, g) = analyzed_session();

    let err = session
        .insertmany(g, &[vec![Value::from(1.0), Value::from(2.0)]])
        .unwrap_err();
    assert!(err.is_lifecycle_violation());

    let err = session
        .insertmany(
            g,
            &[vec![Value::from("one"), Value::from(2.0), Value::from("low")]],
        )
        .unwrap_err();
    assert!(err.is_lifecycle_violation());

    // A bad row anywhere in the batch inserts nothing.
    let rows = vec![
        vec![Value::from(1.0), Value::from(2.0), Value::from("low")],
        vec![Value::from(1.0)],
    ];
    assert!(session.insertmany(g, &rows).is_err());
    let stored: i64 = session
        .host()
        .connection()
        .query_row("SELECT COUNT(*) FROM mixture_observation", [], |r| r.get(0))
        .unwrap();
    assert_eq!(stored, 0);

    session.insertmany(g, &[]).unwrap();
}

#[test]
fn test_predict_respects_threshold() {
    let (session, g) = analyzed_session();
    let prediction = session.predict_confidence(g, A, 1, Some(50)).unwrap();
    assert!(in_unit_interval(prediction.confidence));
    assert!(matches!(prediction.value, Value::Number(_)));

    let at = session
        .predict(g, A, 1, prediction.confidence, Some(50))
        .unwrap();
    assert_eq!(at, Some(prediction.value.clone()));

    let above = session
        .predict(g, A, 1, prediction.confidence + 0.01, Some(50))
        .unwrap();
    assert_eq!(above, None);

    assert!(session.predict(g, A, 1, 0.0, None).unwrap().is_some());
}

#[test]
fn test_predict_categorical() {
    let (session, g) = analyzed_session();
    let prediction = session.predict_confidence(g, C, 1, None).unwrap();
    assert!(prediction.value == Value::from("low") || prediction.value == Value::from("high"));
    assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);
}

#[test]
fn test_predictive_probability_of_null_cell() {
    let (session, g) = analyzed_session();

    // Row 5 was inserted with b missing.
    assert_eq!(
        session.row_column_predictive_probability(g, 5, B).unwrap(),
        None
    );

    let p = session
        .row_column_predictive_probability(g, 1, B)
        .unwrap()
        .unwrap();
    assert!(p > 0.0);

    let p = session
        .row_column_predictive_probability(g, 2, C)
        .unwrap()
        .unwrap();
    assert!(p > 0.0 && p <= 1.0);
}

#[test]
fn test_query_ranges() {
    let (session, g) = analyzed_session();

    assert_eq!(session.column_dependence_probability(g, A, A).unwrap(), 1.0);
    assert!(in_unit_interval(
        session.column_dependence_probability(g, A, C).unwrap()
    ));

    for colno in [A, B, C] {
        assert!(in_unit_interval(session.column_typicality(g, colno).unwrap()));
    }

    let mi = session
        .mutual_information(g, A, B, DEFAULT_MI_SAMPLES)
        .unwrap();
    assert!(mi >= 0.0 && mi.is_finite());
    let err = session.mutual_information(g, A, B, 0).unwrap_err();
    assert!(err.is_lifecycle_violation());

    for rowid in [1, 2, 30] {
        let t = session.row_typicality(g, rowid).unwrap();
        assert!(t > 0.0 && t <= 1.0);
    }

    assert_eq!(session.row_similarity(g, 3, 3, &[]).unwrap(), 1.0);
    let s = session.row_similarity(g, 1, 2, &[A, C]).unwrap();
    assert!(in_unit_interval(s));

    let density = session
        .column_value_probability(g, A, &Value::from(1.1))
        .unwrap();
    assert!(density > 0.0);
}

#[test]
fn test_queries_are_reproducible() {
    let (session, g) = analyzed_session();
    let first = session.mutual_information(g, A, C, 40).unwrap();
    let second = session.mutual_information(g, A, C, 40).unwrap();
    assert_eq!(first, second);

    let draws = session.simulate(g, &[], &[A, C], 4).unwrap();
    assert_eq!(draws, session.simulate(g, &[], &[A, C], 4).unwrap());
}

#[test]
fn test_unknown_rows_and_columns() {
    let (session, g) = analyzed_session();

    let err = session.row_typicality(g, 999).unwrap_err();
    assert!(matches!(err, Error::NoSuchRow { rowid: 999, .. }));

    let err = session.row_similarity(g, 1, 999, &[]).unwrap_err();
    assert!(matches!(err, Error::NoSuchRow { .. }));

    let err = session.column_typicality(g, 9).unwrap_err();
    assert!(matches!(err, Error::NoSuchColumnNumber { colno: 9, .. }));

    let err = session
        .column_value_probability(g, A, &Value::Null)
        .unwrap_err();
    assert!(err.is_lifecycle_violation());

    let err = session.row_typicality(g + 100, 1).unwrap_err();
    assert!(matches!(err, Error::NoSuchGenerator(_)));
}

fn execute(session: &Session, sql: &str) {
    session.host().connection().execute_batch(sql).unwrap();
}

#[test]
fn test_predictive_probability_follows_edited_cells() {
    let (session, g) = analyzed_session();
    assert!(session
        .row_column_predictive_probability(g, 3, A)
        .unwrap()
        .is_some());

    execute(&session, "UPDATE m SET a = NULL WHERE _rowid_ = 3");
    assert_eq!(
        session.row_column_predictive_probability(g, 3, A).unwrap(),
        None
    );

    // Analysis re-reads the edited row and keeps the answer.
    session
        .analyze_models(g, &AnalyzeOptions::default().with_iterations(1))
        .unwrap();
    assert_eq!(
        session.row_column_predictive_probability(g, 3, A).unwrap(),
        None
    );
    assert!(session
        .row_column_predictive_probability(g, 3, B)
        .unwrap()
        .is_some());
}

#[test]
fn test_ill_typed_cell_is_reported() {
    let (session, g) = analyzed_session();
    execute(&session, "INSERT INTO m VALUES ('abc', 1.0, 'low')");
    session
        .analyze_models(g, &AnalyzeOptions::default().with_iterations(1))
        .unwrap();

    let err = session
        .row_column_predictive_probability(g, 31, A)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let p = session
        .row_column_predictive_probability(g, 31, B)
        .unwrap()
        .unwrap();
    assert!(p > 0.0);
}

#[test]
fn test_blob_cell_keeps_generator_usable() {
    let (session, g) = analyzed_session();
    execute(&session, "INSERT INTO m VALUES (X'00FF', 2.0, 'high')");

    session
        .analyze_models(g, &AnalyzeOptions::default().with_iterations(1))
        .unwrap();
    let err = session
        .row_column_predictive_probability(g, 31, A)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    session.drop_models(g, None).unwrap();
    let err = session.row_typicality(g, 1).unwrap_err();
    assert!(matches!(err, Error::NoModels(_)));
}

#[test]
fn test_drop_models_without_readable_table() {
    let (session, g) = analyzed_session();
    execute(&session, "DROP TABLE m");

    session.drop_models(g, Some(&[1])).unwrap();
    let err = session.drop_models(g, Some(&[1])).unwrap_err();
    assert!(matches!(err, Error::NoSuchModel { modelno: 1, .. }));
    session.drop_models(g, None).unwrap();
}

#[test]
fn test_queries_see_appended_rows() {
    let (session, g) = analyzed_session();
    execute(&session, "INSERT INTO m VALUES (5.0, 10.0, 'low')");

    let t = session.row_typicality(g, 31).unwrap();
    assert!(t > 0.0 && t <= 1.0);
    let s = session.row_similarity(g, 31, 31, &[]).unwrap();
    assert_eq!(s, 1.0);
    assert!(session
        .row_column_predictive_probability(g, 31, A)
        .unwrap()
        .is_some());

    execute(&session, "DELETE FROM m WHERE _rowid_ = 2");
    let err = session.row_typicality(g, 1).unwrap_err();
    assert!(err.is_lifecycle_violation());
}
