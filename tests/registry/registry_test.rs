use std::sync::Arc;

use bayesgen::{
    AnalysisReport, AnalyzeOptions, ColumnNumber, Error, GeneratorColumn, GeneratorId, Host,
    Instantiate, Metamodel, MixtureMetamodel, ModelConfig, ModelNumber, Prediction, Result,
    RowId, SchemaItem, Session, Value,
};

/// A metamodel whose installation creates a table and then fails.
struct BrokenInstall;

impl Metamodel for BrokenInstall {
    fn name(&self) -> &str {
        "broken"
    }

    fn register(&self, host: &Host) -> Result<()> {
        host.connection()
            .execute_batch("CREATE TABLE broken_private (x INTEGER)")?;
        Err(Error::invalid("installation failed"))
    }

    fn create_generator(
        &self,
        _host: &Host,
        _table: &str,
        _schema: &[SchemaItem],
        _instantiate: &mut Instantiate<'_>,
    ) -> Result<(GeneratorId, Vec<GeneratorColumn>)> {
        Err(Error::Unsupported("create_generator"))
    }

    fn drop_generator(&self, _host: &Host, _generator_id: GeneratorId) -> Result<()> {
        Err(Error::Unsupported("drop_generator"))
    }

    fn initialize_models(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _modelnos: &[ModelNumber],
        _config: &ModelConfig,
    ) -> Result<()> {
        Err(Error::Unsupported("initialize_models"))
    }

    fn drop_models(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _modelnos: Option<&[ModelNumber]>,
    ) -> Result<()> {
        Err(Error::Unsupported("drop_models"))
    }

    fn analyze_models(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _options: &AnalyzeOptions,
    ) -> Result<AnalysisReport> {
        Err(Error::Unsupported("analyze_models"))
    }

    fn column_dependence_probability(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _colno0: ColumnNumber,
        _colno1: ColumnNumber,
    ) -> Result<f64> {
        Err(Error::Unsupported("column_dependence_probability"))
    }

    fn mutual_information(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _colno0: ColumnNumber,
        _colno1: ColumnNumber,
        _numsamples: usize,
    ) -> Result<f64> {
        Err(Error::Unsupported("mutual_information"))
    }

    fn column_typicality(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _colno: ColumnNumber,
    ) -> Result<f64> {
        Err(Error::Unsupported("column_typicality"))
    }

    fn column_value_probability(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _colno: ColumnNumber,
        _value: &Value,
    ) -> Result<f64> {
        Err(Error::Unsupported("column_value_probability"))
    }

    fn row_similarity(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _rowid: RowId,
        _target_rowid: RowId,
        _colnos: &[ColumnNumber],
    ) -> Result<f64> {
        Err(Error::Unsupported("row_similarity"))
    }

    fn row_typicality(&self, _host: &Host, _generator_id: GeneratorId, _rowid: RowId) -> Result<f64> {
        Err(Error::Unsupported("row_typicality"))
    }

    fn row_column_predictive_probability(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _rowid: RowId,
        _colno: ColumnNumber,
    ) -> Result<Option<f64>> {
        Err(Error::Unsupported("row_column_predictive_probability"))
    }

    fn predict_confidence(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _colno: ColumnNumber,
        _rowid: RowId,
        _numsamples: Option<usize>,
    ) -> Result<Prediction> {
        Err(Error::Unsupported("predict_confidence"))
    }

    fn simulate(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _constraints: &[(ColumnNumber, Value)],
        _colnos: &[ColumnNumber],
        _numpredictions: usize,
    ) -> Result<Vec<Vec<Value>>> {
        Err(Error::Unsupported("simulate"))
    }

    fn insertmany(&self, _host: &Host, _generator_id: GeneratorId, _rows: &[Vec<Value>]) -> Result<()> {
        Err(Error::Unsupported("insertmany"))
    }
}

fn table_exists(session: &Session, table: &str) -> bool {
    session.host().table_exists(table).unwrap()
}

#[test]
fn test_register_installs_private_tables() {
    let mut session = Session::open_in_memory().unwrap();
    session
        .register_metamodel(Arc::new(MixtureMetamodel::new()))
        .unwrap();

    assert!(session.registry().contains("mixture"));
    assert!(table_exists(&session, "mixture_model"));
    assert!(table_exists(&session, "mixture_observation"));
}

#[test]
fn test_duplicate_name_keeps_first_instance() {
    let mut session = Session::open_in_memory().unwrap();
    let first: Arc<dyn Metamodel> = Arc::new(MixtureMetamodel::new());
    let second: Arc<dyn Metamodel> = Arc::new(MixtureMetamodel::new());

    session.register_metamodel(Arc::clone(&first)).unwrap();
    let err = session.register_metamodel(Arc::clone(&second)).unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(ref name) if name == "mixture"));
    assert!(err.is_registration_conflict());

    let registered = session.registry().get("mixture").unwrap();
    assert!(Arc::ptr_eq(&registered, &first));
}

#[test]
fn test_deregister_checks_instance() {
    let mut session = Session::open_in_memory().unwrap();
    let first: Arc<dyn Metamodel> = Arc::new(MixtureMetamodel::new());
    let stranger: Arc<dyn Metamodel> = Arc::new(MixtureMetamodel::new());

    let err = session.deregister_metamodel(&first).unwrap_err();
    assert!(matches!(err, Error::NotRegistered(_)));

    session.register_metamodel(Arc::clone(&first)).unwrap();
    let err = session.deregister_metamodel(&stranger).unwrap_err();
    assert!(matches!(err, Error::InstanceMismatch(_)));
    assert!(session.registry().contains("mixture"));

    let removed = session.deregister_metamodel(&first).unwrap();
    assert!(Arc::ptr_eq(&removed, &first));
    assert!(session.registry().is_empty());

    // The name is free again, for any instance.
    session.register_metamodel(stranger).unwrap();
    assert_eq!(session.registry().names(), vec!["mixture"]);
}

#[test]
fn test_failed_register_leaves_nothing_behind() {
    let mut session = Session::open_in_memory().unwrap();
    let err = session
        .register_metamodel(Arc::new(BrokenInstall))
        .unwrap_err();
    assert!(err.is_lifecycle_violation());

    assert!(!session.registry().contains("broken"));
    assert!(!table_exists(&session, "broken_private"));
    assert!(!session.host().in_savepoint());
}

#[test]
fn test_unsupported_rename_is_reported() {
    let metamodel = BrokenInstall;
    let host = Host::open_in_memory().unwrap();
    let err = metamodel.rename_column(&host, 1, "a", "b").unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn test_register_is_idempotent_across_sessions_on_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("host.db");

    for _ in 0..2 {
        let mut session = Session::open(&path).unwrap();
        session
            .register_metamodel(Arc::new(MixtureMetamodel::new()))
            .unwrap();
        session.close().unwrap();
    }
}
