//! The push-based executor: one worker thread per plan node, bounded
//! channels between them.
//!
//! Every non-source node gets a mailbox (a bounded crossbeam channel) and a
//! worker thread draining it. Upstream nodes talk to their successors through
//! [`Mailbox`] handles, which implement [`Transformation`] by enqueueing
//! messages, so operators never know whether their consumer runs in-thread
//! or across a channel. Bounded queues give natural backpressure: a fast
//! source blocks once its successor's queue fills.
//!
//! Roots feed a [`Collector`] that accumulates flushed tables. `execute`
//! returns them keyed by root node id, or the first error any collector
//! observed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::exec::registry::{ExecContext, TransformationRegistry};
use crate::exec::transformation::{
    DatasetId, FinishError, Source, Transformation, finish_error,
};
use crate::group_key::GroupKey;
use crate::plan::spec::PlanSpec;
use crate::table::Table;
use crate::values::Time;

/// One unit of the execution protocol in flight between two nodes.
enum ExecMessage {
    Process { from: DatasetId, table: Table },
    Retract { from: DatasetId, key: GroupKey },
    Watermark { from: DatasetId, time: Time },
    ProcessingTime { from: DatasetId, time: Time },
    Finish { from: DatasetId, err: Option<FinishError> },
}

/// A channel-backed stand-in for a downstream transformation.
struct Mailbox {
    tx: Sender<ExecMessage>,
}

impl Mailbox {
    fn send(&self, msg: ExecMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| anyhow!("downstream worker hung up"))
    }
}

impl Transformation for Mailbox {
    fn process(&self, from: DatasetId, tbl: Table) -> Result<()> {
        self.send(ExecMessage::Process { from, table: tbl })
    }

    fn retract_table(&self, from: DatasetId, key: &GroupKey) -> Result<()> {
        self.send(ExecMessage::Retract { from, key: key.clone() })
    }

    fn update_watermark(&self, from: DatasetId, mark: Time) -> Result<()> {
        self.send(ExecMessage::Watermark { from, time: mark })
    }

    fn update_processing_time(&self, from: DatasetId, time: Time) -> Result<()> {
        self.send(ExecMessage::ProcessingTime { from, time })
    }

    fn finish(&self, from: DatasetId, err: Option<FinishError>) {
        // the worker may already have shut down after an earlier error
        let _ = self.send(ExecMessage::Finish { from, err });
    }
}

/// Terminal consumer attached to each root node.
#[derive(Default)]
struct Collector {
    tables: Mutex<Vec<Table>>,
    err: Mutex<Option<FinishError>>,
}

impl Transformation for Collector {
    fn process(&self, _from: DatasetId, tbl: Table) -> Result<()> {
        self.tables.lock().unwrap().push(tbl);
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
        if let Some(err) = err {
            self.err.lock().unwrap().get_or_insert(err);
        }
    }
}

fn dispatch(t: &dyn Transformation, msg: ExecMessage) -> Result<()> {
    match msg {
        ExecMessage::Process { from, table } => t.process(from, table),
        ExecMessage::Retract { from, key } => t.retract_table(from, &key),
        ExecMessage::Watermark { from, time } => t.update_watermark(from, time),
        ExecMessage::ProcessingTime { from, time } => t.update_processing_time(from, time),
        ExecMessage::Finish { .. } => unreachable!("finish is handled by the worker loop"),
    }
}

fn worker(t: Arc<dyn Transformation>, rx: Receiver<ExecMessage>, n_parents: usize) {
    let mut finished = 0usize;
    while let Ok(msg) = rx.recv() {
        if let ExecMessage::Finish { from, err } = msg {
            t.finish(from, err);
            finished += 1;
            if finished >= n_parents {
                break;
            }
            continue;
        }
        let from = message_origin(&msg);
        if let Err(e) = dispatch(t.as_ref(), msg) {
            tracing::debug!(%from, error = %e, "worker failed, finishing downstream");
            t.finish(from, Some(finish_error(e)));
            break;
        }
    }
}

fn message_origin(msg: &ExecMessage) -> DatasetId {
    match msg {
        ExecMessage::Process { from, .. }
        | ExecMessage::Retract { from, .. }
        | ExecMessage::Watermark { from, .. }
        | ExecMessage::ProcessingTime { from, .. }
        | ExecMessage::Finish { from, .. } => *from,
    }
}

/// Runs a physical plan against a registry of operator implementations.
pub struct Executor {
    queue_capacity: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of each inter-node queue, in messages.
    pub fn with_queue_capacity(mut self, cap: usize) -> Self {
        self.queue_capacity = cap.max(1);
        self
    }

    /// Instantiate and run the plan to completion.
    ///
    /// Returns the tables each root flushed, keyed by root node id. The
    /// first error observed at any root fails the whole run.
    pub fn execute(
        &self,
        plan: &PlanSpec,
        registry: &TransformationRegistry,
    ) -> Result<HashMap<String, Vec<Table>>> {
        let order = plan.topo_sort()?;

        let mut mailboxes: HashMap<DatasetId, Arc<Mailbox>> = HashMap::new();
        let mut receivers: Vec<(Arc<dyn Transformation>, Receiver<ExecMessage>, usize)> =
            Vec::new();
        let mut sources: Vec<Arc<dyn Source>> = Vec::new();
        let mut collectors: Vec<(String, Arc<Collector>)> = Vec::new();

        // Build consumers before producers: walking the topological order
        // backward guarantees every node's successor mailboxes exist when
        // its own dataset is wired up.
        for &id in order.iter().rev() {
            let node = plan.graph.node(id);
            let ds_id = DatasetId(id.raw() as u64);
            let ctx = ExecContext {
                parents: node
                    .predecessors()
                    .iter()
                    .map(|p| DatasetId(p.raw() as u64))
                    .collect(),
                now: plan.now,
            };

            let downstream = self.downstream_for(plan, id, &mailboxes, &mut collectors)?;

            if node.predecessors().is_empty() {
                let builder = registry.source(&node.kind())?;
                let source = builder.build(ds_id, node.spec().as_ref(), &ctx)?;
                source.add_transformation(downstream);
                sources.push(source);
                tracing::debug!(node = node.id(), kind = %node.kind(), "instantiated source");
            } else {
                let builder = registry.transformation(&node.kind())?;
                let (t, d) = builder.build(ds_id, node.spec().as_ref(), &ctx)?;
                d.add_transformation(downstream);

                let (tx, rx) = bounded(self.queue_capacity);
                mailboxes.insert(ds_id, Arc::new(Mailbox { tx }));
                receivers.push((t, rx, node.predecessors().len()));
                tracing::debug!(node = node.id(), kind = %node.kind(), "instantiated transformation");
            }
        }

        let mut handles = Vec::new();
        for (t, rx, n_parents) in receivers {
            handles.push(thread::spawn(move || worker(t, rx, n_parents)));
        }
        for source in sources {
            handles.push(thread::spawn(move || source.run()));
        }
        // Drop our ends of the channels so workers see hangup if a producer
        // panics instead of finishing.
        drop(mailboxes);

        for handle in handles {
            if handle.join().is_err() {
                bail!("executor worker panicked");
            }
        }

        let mut results = HashMap::new();
        for (root, collector) in collectors {
            if let Some(err) = collector.err.lock().unwrap().take() {
                bail!("execution failed at root {root}: {err}");
            }
            let tables = std::mem::take(&mut *collector.tables.lock().unwrap());
            results.insert(root, tables);
        }
        Ok(results)
    }

    fn downstream_for(
        &self,
        plan: &PlanSpec,
        id: crate::plan::node_id::NodeId,
        mailboxes: &HashMap<DatasetId, Arc<Mailbox>>,
        collectors: &mut Vec<(String, Arc<Collector>)>,
    ) -> Result<Arc<dyn Transformation>> {
        let node = plan.graph.node(id);
        if plan.is_root(id) {
            if !node.successors().is_empty() {
                bail!("root node {} has successors", node.id());
            }
            let collector = Arc::new(Collector::default());
            collectors.push((node.id().to_string(), Arc::clone(&collector)));
            return Ok(collector);
        }
        match node.successors() {
            [] => bail!("node {} has no successors and is not a root", node.id()),
            [succ] => {
                let ds = DatasetId(succ.raw() as u64);
                mailboxes
                    .get(&ds)
                    .map(|m| Arc::clone(m) as Arc<dyn Transformation>)
                    .ok_or_else(|| anyhow!("successor {ds} of {} was not instantiated", node.id()))
            }
            many => {
                let mut set = crate::exec::transformation::TransformationSet::new();
                for succ in many {
                    let ds = DatasetId(succ.raw() as u64);
                    let mailbox = mailboxes.get(&ds).ok_or_else(|| {
                        anyhow!("successor {ds} of {} was not instantiated", node.id())
                    })?;
                    set.add(Arc::clone(mailbox) as Arc<dyn Transformation>);
                }
                Ok(Arc::new(FanOut(set)))
            }
        }
    }
}

/// Adapter presenting a [`TransformationSet`] as a single transformation.
///
/// [`TransformationSet`]: crate::exec::transformation::TransformationSet
struct FanOut(crate::exec::transformation::TransformationSet);

impl Transformation for FanOut {
    fn process(&self, from: DatasetId, tbl: Table) -> Result<()> {
        self.0.process(from, tbl)
    }

    fn retract_table(&self, from: DatasetId, key: &GroupKey) -> Result<()> {
        self.0.retract_table(from, key)
    }

    fn update_watermark(&self, from: DatasetId, mark: Time) -> Result<()> {
        self.0.update_watermark(from, mark)
    }

    fn update_processing_time(&self, from: DatasetId, time: Time) -> Result<()> {
        self.0.update_processing_time(from, time)
    }

    fn finish(&self, from: DatasetId, err: Option<FinishError>) {
        self.0.finish(from, err)
    }
}
