use std::sync::Arc;

use anyhow::Result;
use tributary::testing::{
    COPY_KIND, STATIC_TABLES_KIND, StaticTablesSpec, copy_builder, group_key, table,
    tables_source_builder,
};
use tributary::*;

fn registry() -> TransformationRegistry {
    let mut r = TransformationRegistry::new();
    r.register_source(STATIC_TABLES_KIND, tables_source_builder());
    r.register_transformation(COPY_KIND, copy_builder());
    r
}

fn input_table(tag: &str, rows: &[(Time, i64)]) -> Result<Table> {
    let key = group_key(&[("tag", Value::Str(tag.into()))])?;
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|&(t, v)| vec![Value::Time(t), Value::Int(v)])
        .collect();
    let refs: Vec<&[Value]> = rows.iter().map(|r| r.as_slice()).collect();
    table(
        key,
        &[(DEFAULT_TIME_COL, ColumnType::Time), ("v", ColumnType::Int)],
        &refs,
    )
}

/// from0 -> copy0, with copy0 as the root.
fn copy_plan(tables: Vec<Table>) -> PlanSpec {
    let mut graph = PlanGraph::new();
    let from = graph.create_physical_node("from0", Arc::new(StaticTablesSpec::new(tables)));
    let copy = graph.create_physical_node(
        "copy0",
        Arc::new(tributary::testing::OpSpec::new(COPY_KIND)),
    );
    graph.connect(from, copy);

    let mut plan = PlanSpec::new(graph, 0);
    plan.add_root(copy);
    plan
}

#[test]
fn copy_plan_delivers_one_table_per_group_key() -> Result<()> {
    let a = input_table("a", &[(1, 10), (2, 20)])?;
    let b = input_table("b", &[(5, 50)])?;
    let plan = copy_plan(vec![a.clone(), b.clone()]);

    let results = Executor::new().execute(&plan, &registry())?;
    assert_eq!(results.len(), 1);

    let mut tables = results["copy0"].clone();
    tables.sort_by(|x, y| x.key().to_string().cmp(&y.key().to_string()));
    assert_eq!(tables.len(), 2);

    assert_eq!(tables[0].key(), a.key());
    assert_eq!(tables[0].num_rows(), 2);
    assert_eq!(tables[0].record(1).get("v"), Some(&Value::Int(20)));
    assert_eq!(tables[1].key(), b.key());
    assert_eq!(tables[1].num_rows(), 1);
    Ok(())
}

#[test]
fn operator_error_fails_the_run_with_its_message() -> Result<()> {
    // two tables for the same key trip the copy operator
    let first = input_table("a", &[(1, 10)])?;
    let second = input_table("a", &[(2, 20)])?;
    let plan = copy_plan(vec![first, second]);

    let err = Executor::new()
        .execute(&plan, &registry())
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("execution failed at root copy0"), "got: {msg}");
    assert!(msg.contains("duplicate table for group key"), "got: {msg}");
    Ok(())
}

#[test]
fn fan_out_feeds_every_root() -> Result<()> {
    let input = input_table("a", &[(1, 10)])?;

    let mut graph = PlanGraph::new();
    let from = graph.create_physical_node(
        "from0",
        Arc::new(StaticTablesSpec::new(vec![input.clone()])),
    );
    let copy1 = graph.create_physical_node(
        "copy0",
        Arc::new(tributary::testing::OpSpec::new(COPY_KIND)),
    );
    let copy2 = graph.create_physical_node(
        "copy1",
        Arc::new(tributary::testing::OpSpec::new(COPY_KIND)),
    );
    graph.connect(from, copy1);
    graph.connect(from, copy2);

    let mut plan = PlanSpec::new(graph, 0);
    plan.add_root(copy1);
    plan.add_root(copy2);

    let results = Executor::new().execute(&plan, &registry())?;
    assert_eq!(results.len(), 2);
    for root in ["copy0", "copy1"] {
        let tables = &results[root];
        assert_eq!(tables.len(), 1, "root {root}");
        assert_eq!(tables[0].key(), input.key());
        assert_eq!(tables[0].num_rows(), 1);
    }
    Ok(())
}

#[test]
fn deep_chain_survives_a_small_queue() -> Result<()> {
    let tables: Vec<Table> = (0..20)
        .map(|i| input_table(&format!("k{i}"), &[(i, i * 10)]))
        .collect::<Result<_>>()?;

    let mut graph = PlanGraph::new();
    let from = graph.create_physical_node("from0", Arc::new(StaticTablesSpec::new(tables)));
    let mut prev = from;
    for i in 0..4 {
        let copy = graph.create_physical_node(
            &format!("copy{i}"),
            Arc::new(tributary::testing::OpSpec::new(COPY_KIND)),
        );
        graph.connect(prev, copy);
        prev = copy;
    }

    let mut plan = PlanSpec::new(graph, 0);
    plan.add_root(prev);

    let results = Executor::new()
        .with_queue_capacity(1)
        .execute(&plan, &registry())?;
    assert_eq!(results["copy3"].len(), 20);
    Ok(())
}

#[test]
fn unregistered_kind_is_reported_before_anything_runs() -> Result<()> {
    let plan = copy_plan(vec![input_table("a", &[(1, 10)])?]);

    let empty = TransformationRegistry::new();
    let err = Executor::new().execute(&plan, &empty).unwrap_err();
    assert!(
        err.to_string().contains("no transformation registered for kind"),
        "got: {err}"
    );
    Ok(())
}

#[test]
fn error_finish_skips_the_flush_and_forwards_the_same_error() -> Result<()> {
    let cache = Arc::new(BuilderCache::new());
    let ds = StreamDataset::new(DatasetId(7), Arc::clone(&cache) as Arc<dyn TableCache>);

    // pending output that must never reach downstream
    let tbl = input_table("a", &[(1, 10)])?;
    let (builder, _) = cache.table_builder(tbl.key());
    {
        let mut b = builder.lock().unwrap();
        for col in tbl.cols() {
            b.add_col(col.clone())?;
        }
        b.append_record(&tbl.record(0))?;
    }

    #[derive(Default)]
    struct Watcher {
        processed: std::sync::Mutex<usize>,
        err: std::sync::Mutex<Option<FinishError>>,
    }
    impl Transformation for Watcher {
        fn process(&self, _from: DatasetId, _tbl: Table) -> Result<()> {
            *self.processed.lock().unwrap() += 1;
            Ok(())
        }
        fn retract_table(&self, _from: DatasetId, _key: &GroupKey) -> Result<()> {
            Ok(())
        }
        fn update_watermark(&self, _from: DatasetId, _mark: Time) -> Result<()> {
            Ok(())
        }
        fn update_processing_time(&self, _from: DatasetId, _time: Time) -> Result<()> {
            Ok(())
        }
        fn finish(&self, _from: DatasetId, err: Option<FinishError>) {
            *self.err.lock().unwrap() = err;
        }
    }
    let watcher = Arc::new(Watcher::default());
    ds.add_transformation(Arc::clone(&watcher) as Arc<dyn Transformation>);

    let boom = finish_error(anyhow::anyhow!("source failed"));
    ds.finish(Some(Arc::clone(&boom)));

    assert_eq!(
        *watcher.processed.lock().unwrap(),
        0,
        "nothing may be flushed on an error finish"
    );
    let got = watcher.err.lock().unwrap().clone().expect("error forwarded");
    assert!(Arc::ptr_eq(&got, &boom), "the forwarded error must be the upstream one");
    Ok(())
}

#[test]
fn finish_is_idempotent_at_the_dataset_level() -> Result<()> {
    let cache = Arc::new(BuilderCache::new());
    let ds = StreamDataset::new(DatasetId(7), Arc::clone(&cache) as Arc<dyn TableCache>);

    let tbl = input_table("a", &[(1, 10)])?;
    let (builder, _) = cache.table_builder(tbl.key());
    {
        let mut b = builder.lock().unwrap();
        for col in tbl.cols() {
            b.add_col(col.clone())?;
        }
        b.append_record(&tbl.record(0))?;
    }

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    struct Probe(Arc<std::sync::Mutex<Vec<Option<String>>>>);
    impl Transformation for Probe {
        fn process(&self, _from: DatasetId, _tbl: Table) -> Result<()> {
            Ok(())
        }
        fn retract_table(&self, _from: DatasetId, _key: &GroupKey) -> Result<()> {
            Ok(())
        }
        fn update_watermark(&self, _from: DatasetId, _mark: Time) -> Result<()> {
            Ok(())
        }
        fn update_processing_time(&self, _from: DatasetId, _time: Time) -> Result<()> {
            Ok(())
        }
        fn finish(&self, _from: DatasetId, err: Option<FinishError>) {
            self.0.lock().unwrap().push(err.map(|e| e.to_string()));
        }
    }
    ds.add_transformation(Arc::new(Probe(Arc::clone(&seen))));

    ds.finish(None);
    ds.finish(None);
    ds.finish(Some(finish_error(anyhow::anyhow!("late"))));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "finish must propagate exactly once");
    assert_eq!(seen[0], None);
    Ok(())
}
