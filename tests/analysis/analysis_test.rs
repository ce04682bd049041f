use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bayesgen::{
    AnalyzeOptions, GeneratorId, Interrupt, MixtureMetamodel, ModelConfig, Session, StopReason,
};

const SCHEMA: &str = "x numerical, y numerical, kind categorical";

fn fill(session: &Session) {
    let conn = session.host().connection();
    conn.execute_batch("CREATE TABLE obs (x REAL, y REAL, kind TEXT)")
        .unwrap();
    for i in 0..24 {
        let x = if i % 3 == 0 { -4.0 } else { 4.0 } + (i % 5) as f64 * 0.2;
        let kind = if i % 3 == 0 { "a" } else { "b" };
        conn.execute(
            "INSERT INTO obs VALUES (?1, ?2, ?3)",
            rusqlite::params![x, -x, kind],
        )
        .unwrap();
    }
}

/// A session with a generator and four fresh models.
fn prepared(path: Option<&Path>) -> (Session, Arc<MixtureMetamodel>, GeneratorId) {
    let mut session = match path {
        Some(path) => Session::open(path).unwrap(),
        None => Session::open_in_memory().unwrap(),
    };
    fill(&session);
    let metamodel = Arc::new(MixtureMetamodel::new());
    session.register_metamodel(metamodel.clone()).unwrap();
    let g = session
        .create_generator_from_spec("obs_gen", "obs", "mixture", SCHEMA)
        .unwrap();
    session
        .initialize_models(g, &[0, 1, 2, 3], &ModelConfig::new().with("seed", 21))
        .unwrap();
    (session, metamodel, g)
}

fn stored_states(session: &Session) -> Vec<String> {
    let conn = session.host().connection();
    let mut stmt = conn
        .prepare("SELECT state FROM mixture_model ORDER BY modelno")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap()
}

/// Ten iterations, checkpoint every five, interrupted after the seventh.
fn interrupted_options() -> AnalyzeOptions {
    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();
    AnalyzeOptions::default()
        .with_iterations(10)
        .with_checkpoint_every(5)
        .with_interrupt(interrupt)
        .with_progress(move |progress| {
            if progress.iteration == 7 {
                trigger.trigger();
            }
        })
}

#[test]
fn test_interrupt_keeps_last_checkpoint() {
    let (session, metamodel, g) = prepared(None);

    let report = session.analyze_models(g, &interrupted_options()).unwrap();
    assert_eq!(report.stop, StopReason::Interrupted);
    assert_eq!(report.iterations, 7);
    assert_eq!(report.committed_iterations, 5);
    assert_eq!(report.checkpoints, 1);

    for modelno in 0..4 {
        assert_eq!(
            metamodel
                .model_iterations(session.host(), g, modelno)
                .unwrap(),
            Some(5)
        );
    }

    // Queries run against the checkpointed state.
    let p = session.column_dependence_probability(g, 0, 1).unwrap();
    assert!((0.0..=1.0).contains(&p));

    // Identical to an uninterrupted five-iteration run.
    let (reference, _, rg) = prepared(None);
    reference
        .analyze_models(rg, &AnalyzeOptions::default().with_iterations(5))
        .unwrap();
    assert_eq!(stored_states(&session), stored_states(&reference));
    assert_eq!(
        session.column_dependence_probability(g, 0, 2).unwrap(),
        reference.column_dependence_probability(rg, 0, 2).unwrap()
    );
}

#[test]
fn test_checkpoint_survives_reopen_with_fresh_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("host.db");

    {
        let (session, _, g) = prepared(Some(&path));
        let report = session.analyze_models(g, &interrupted_options()).unwrap();
        assert_eq!(report.committed_iterations, 5);
        session.close().unwrap();
    }

    let mut session = Session::open(&path).unwrap();
    let metamodel = Arc::new(MixtureMetamodel::new());
    session.register_metamodel(metamodel.clone()).unwrap();
    let g = session.generator_id("obs_gen").unwrap();

    assert_eq!(
        metamodel.model_iterations(session.host(), g, 0).unwrap(),
        Some(5)
    );
    let typicality = session.row_typicality(g, 1).unwrap();
    assert!(typicality > 0.0 && typicality <= 1.0);
}

#[test]
fn test_analysis_resumes_from_checkpoint() {
    let (session, metamodel, g) = prepared(None);
    session.analyze_models(g, &interrupted_options()).unwrap();
    session
        .analyze_models(g, &AnalyzeOptions::default().with_iterations(5))
        .unwrap();
    assert_eq!(
        metamodel.model_iterations(session.host(), g, 2).unwrap(),
        Some(10)
    );

    let (reference, _, rg) = prepared(None);
    reference
        .analyze_models(rg, &AnalyzeOptions::default().with_iterations(10))
        .unwrap();
    assert_eq!(stored_states(&session), stored_states(&reference));
}

#[test]
fn test_selected_models_only() {
    let (session, metamodel, g) = prepared(None);
    session
        .analyze_models(
            g,
            &AnalyzeOptions::default().with_models([1, 3]).with_iterations(3),
        )
        .unwrap();

    let iterations: Vec<Option<u64>> = (0..4)
        .map(|m| metamodel.model_iterations(session.host(), g, m).unwrap())
        .collect();
    assert_eq!(iterations, vec![Some(0), Some(3), Some(0), Some(3)]);

    let err = session
        .analyze_models(g, &AnalyzeOptions::default().with_models([9]))
        .unwrap_err();
    assert!(err.is_lifecycle_violation());
}

#[test]
fn test_time_budget_stops_analysis() {
    let (session, metamodel, g) = prepared(None);
    let report = session
        .analyze_models(
            g,
            &AnalyzeOptions::default()
                .with_iterations(1_000)
                .with_max_duration(Duration::ZERO),
        )
        .unwrap();
    assert_eq!(report.stop, StopReason::TimeBudget);
    assert_eq!(report.iterations, 0);
    assert_eq!(
        metamodel.model_iterations(session.host(), g, 0).unwrap(),
        Some(0)
    );
}

#[test]
fn test_progress_reports_every_iteration() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let (session, _, g) = prepared(None);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let options = AnalyzeOptions::default()
        .with_iterations(4)
        .with_progress(move |progress| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert!(progress.committed_iterations <= progress.iteration);
        });

    let report = session.analyze_models(g, &options).unwrap();
    assert_eq!(report.stop, StopReason::Completed);
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[test]
fn test_rows_added_to_table_are_picked_up() {
    let (session, _, g) = prepared(None);
    session
        .analyze_models(g, &AnalyzeOptions::default().with_iterations(2))
        .unwrap();

    session
        .host()
        .connection()
        .execute("INSERT INTO obs VALUES (100.0, -100.0, 'c')", [])
        .unwrap();
    let rowid = session.host().connection().last_insert_rowid();

    session
        .analyze_models(g, &AnalyzeOptions::default().with_iterations(1))
        .unwrap();
    let typicality = session.row_typicality(g, rowid).unwrap();
    assert!(typicality > 0.0 && typicality <= 1.0);
}
